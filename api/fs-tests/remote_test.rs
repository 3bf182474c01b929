//Scenario tests for the linear (session-style) topology: lazy listings,
//expiring snapshots, streaming reads, and write-back on close.

use std::io::SeekFrom;
use std::time::Duration;

use dircache_api::error::VfsError;
use dircache_api::types::{FileKind, LinearState, OpenFlags};

use crate::class::CacheFS;

#[path = "utils.rs"]
mod utils;

#[path = "mockfs.rs"]
mod mockfs;

use mockfs::FtpMock;

const HOUR: Duration = Duration::from_secs(3600);

fn session(ttl: Duration) -> CacheFS<FtpMock> {
    CacheFS::new(FtpMock::standard(ttl))
}

#[test]
fn root_always_exists() {
    let mut vfs = session(HOUR);
    //the session root resolves even before anything was listed
    let st = vfs.stat("host#ftp/").unwrap();
    assert_eq!(st.kind, FileKind::Directory);
    assert_eq!(utils::dir_names(&mut vfs, "host#ftp/"), vec!["big", "pub"]);
}

#[test]
fn linear_fetch() {
    let mut vfs = session(HOUR);
    let mut fh = vfs
        .open("host#ftp/big", OpenFlags::LINEAR, 0)
        .unwrap();
    assert_eq!(fh.linear, LinearState::PreOpen);
    assert_eq!(vfs.sub().starts, 0);

    //the first read drives PreOpen -> Open
    let mut buf = vec![0u8; 8192];
    assert_eq!(vfs.read(&mut fh, &mut buf).unwrap(), 8192);
    assert_eq!(fh.linear, LinearState::Open);
    assert_eq!(vfs.sub().starts, 1);
    assert!(buf.iter().all(|&b| b == 0x42));

    let sup = vfs.getid("host#ftp/").unwrap();
    assert_eq!(vfs.store().super_ref(sup).fd_usage, 1);
    vfs.close(fh).unwrap();
    assert_eq!(vfs.store().super_ref(sup).fd_usage, 0);
    assert!(vfs.has_stamp(sup));
}

#[test]
fn linear_reget_from_offset() {
    let mut vfs = session(HOUR);
    let mut fh = vfs
        .open("host#ftp/big", OpenFlags::LINEAR, 0)
        .unwrap();

    //a pre-open handle still seeks virtually; the stream then starts there
    assert_eq!(vfs.lseek(&mut fh, SeekFrom::End(-3)).unwrap(), 99_997);
    let mut buf = vec![0u8; 16];
    assert_eq!(vfs.read(&mut fh, &mut buf).unwrap(), 3);
    assert_eq!(vfs.read(&mut fh, &mut buf).unwrap(), 0);
    vfs.close(fh).unwrap();
}

#[test]
#[should_panic(expected = "seek on a running linear stream")]
fn linear_seek_is_fatal() {
    let mut vfs = session(HOUR);
    let mut fh = vfs
        .open("host#ftp/big", OpenFlags::LINEAR, 0)
        .unwrap();
    let mut buf = vec![0u8; 64];
    vfs.read(&mut fh, &mut buf).unwrap();
    let _ = vfs.lseek(&mut fh, SeekFrom::Start(0));
}

#[test]
#[should_panic(expected = "write on a linear handle")]
fn linear_write_is_fatal() {
    let mut vfs = session(HOUR);
    let mut fh = vfs
        .open("host#ftp/big", OpenFlags::LINEAR, 0)
        .unwrap();
    let _ = vfs.write(&mut fh, b"nope");
}

#[test]
fn stale_snapshot_reloads() {
    //zero ttl: every snapshot is expired by the time it is looked at again
    let mut vfs = session(Duration::from_secs(0));

    let mut h1 = vfs.opendir("host#ftp/pub").unwrap();
    let d1 = h1.inode();
    assert_eq!(vfs.readdir(&mut h1), Some("a.txt".to_string()));
    vfs.closedir(h1);
    let live = vfs.store().total_inodes();

    //the stale snapshot and its children are freed and loaded afresh
    let h2 = vfs.opendir("host#ftp/pub").unwrap();
    assert_ne!(h2.inode(), d1);
    assert_eq!(vfs.sub().loads, vec!["pub", "pub"]);
    vfs.closedir(h2);
    assert_eq!(vfs.store().total_inodes(), live);
}

#[test]
fn flush_is_one_shot() {
    let mut vfs = session(HOUR);

    utils::dir_names(&mut vfs, "host#ftp/pub");
    utils::dir_names(&mut vfs, "host#ftp/pub");
    assert_eq!(vfs.sub().loads.len(), 1);

    assert!(vfs.setctl("host#ftp/", crate::class::Setctl::Flush));
    utils::dir_names(&mut vfs, "host#ftp/pub");
    assert_eq!(vfs.sub().loads.len(), 2);

    //the flag is consumed; freshness is back to the timestamps
    utils::dir_names(&mut vfs, "host#ftp/pub");
    assert_eq!(vfs.sub().loads.len(), 2);
}

#[test]
fn write_back_on_close() {
    let mut vfs = session(HOUR);

    let mut fh = vfs
        .open("host#ftp/f", OpenFlags::CREATE | OpenFlags::WRITE, 0o644)
        .unwrap();
    assert_eq!(vfs.write(&mut fh, b"hi").unwrap(), 2);
    vfs.close(fh).unwrap();

    //stored back exactly once, and the superblock was invalidated
    assert_eq!(vfs.sub().stores, vec!["f"]);

    //a fresh open re-lists the invalidated cache and fetches the body back
    //through the stream
    let mut fh = vfs.open("host#ftp/f", OpenFlags::empty(), 0).unwrap();
    assert_eq!(utils::read_all(&mut vfs, &mut fh), b"hi");
    vfs.close(fh).unwrap();
}

#[test]
fn plain_open_materializes_local_copy() {
    let mut vfs = session(HOUR);
    let mut fh = vfs.open("host#ftp/pub/a.txt", OpenFlags::empty(), 0).unwrap();
    assert_eq!(vfs.sub().starts, 1);
    assert_eq!(utils::read_all(&mut vfs, &mut fh), b"hello");

    //the local copy lives on the host and belongs to the inode
    let local = vfs.store().inode(fh.ino).localname.clone().unwrap();
    assert!(local.exists());
    vfs.close(fh).unwrap();
    //last reference was the directory entry; the inode survives, and so
    //does its cached body
    assert!(local.exists());

    //getlocalcopy reuses the cache without a second fetch
    let again = vfs.getlocalcopy("host#ftp/pub/a.txt").unwrap();
    assert_eq!(again, local);
    assert_eq!(vfs.sub().starts, 1);
    vfs.ungetlocalcopy("host#ftp/pub/a.txt", &again);
}

#[test]
fn interrupted_transfer_cleans_up() {
    let mut vfs = session(HOUR);
    let flag = vfs.interrupt_flag();
    vfs.sub_mut().interrupt_after = Some((1, flag));

    //the fetch dies between chunks and unwinds the partial copy
    assert!(matches!(
        vfs.open("host#ftp/big", OpenFlags::empty(), 0),
        Err(VfsError::Interrupted)
    ));
    assert_eq!(vfs.ferrno(), libc::EINTR);

    let sup = vfs.getid("host#ftp/").unwrap();
    let root = vfs.store().super_ref(sup).root.unwrap();
    let snapshot = vfs.store().inode(root).subdir[0];
    let big = vfs
        .store()
        .inode(vfs.store().entry(snapshot).ino)
        .subdir
        .iter()
        .copied()
        .find(|&e| vfs.store().entry(e).name == "big")
        .unwrap();
    assert!(vfs
        .store()
        .inode(vfs.store().entry(big).ino)
        .localname
        .is_none());

    //with the interrupt gone the fetch goes through
    vfs.sub_mut().interrupt_after = None;
    let mut fh = vfs.open("host#ftp/big", OpenFlags::empty(), 0).unwrap();
    assert_eq!(utils::read_all(&mut vfs, &mut fh).len(), 100_000);
    vfs.close(fh).unwrap();
}

#[test]
fn stale_data_control_pins_the_cache() {
    let mut vfs = session(HOUR);
    utils::dir_names(&mut vfs, "host#ftp/pub");
    let sup = vfs.getid("host#ftp/").unwrap();
    let root_before = vfs.store().super_ref(sup).root;

    //resolving the control path lists the session root as a side effect
    assert!(vfs.setctl("host#ftp/", crate::class::Setctl::StaleData(true)));
    assert_eq!(vfs.sub().loads.len(), 2);
    vfs.invalidate(sup);
    assert_eq!(vfs.store().super_ref(sup).root, root_before);

    //clearing the bit invalidates immediately
    assert!(vfs.setctl("host#ftp/", crate::class::Setctl::StaleData(false)));
    assert_ne!(vfs.store().super_ref(sup).root, root_before);

    //and the next listing reloads from the server
    utils::dir_names(&mut vfs, "host#ftp/pub");
    assert_eq!(vfs.sub().loads.len(), 3);
}

#[test]
fn wire_log_captures_traffic() {
    let mut vfs = session(HOUR);
    let sink = tempfile::Builder::new()
        .prefix("wire-")
        .tempfile()
        .unwrap();
    let path = sink.path().to_path_buf();
    assert!(vfs.setctl("host#ftp/", crate::class::Setctl::Logfile(path.clone())));

    utils::dir_names(&mut vfs, "host#ftp/pub");
    let logged = std::fs::read_to_string(&path).unwrap();
    assert!(logged.contains("LIST pub"));
}
