//Scenario tests for the tree (archive-style) topology.

use dircache_api::error::VfsError;
use dircache_api::types::{FileKind, LookupFlags, OpenFlags, PROCESS_UMASK, LINK_FOLLOW};

use crate::class::CacheFS;

#[path = "utils.rs"]
mod utils;

#[path = "mockfs.rs"]
mod mockfs;

use mockfs::TarMock;

fn archive() -> CacheFS<TarMock> {
    CacheFS::new(TarMock::standard())
}

#[test]
fn archive_read() {
    let mut vfs = archive();

    let st = vfs.stat("x.tar#utar/a/b/c").unwrap();
    assert_eq!(st.kind, FileKind::Regular);
    assert_eq!(st.size, 7);

    assert_eq!(utils::dir_names(&mut vfs, "x.tar#utar/a"), vec!["b", "l"]);

    let mut buf = [0u8; 16];
    let n = vfs.readlink("x.tar#utar/a/l", &mut buf).unwrap();
    assert_eq!(&buf[..n], b"b/c");

    //stat follows the relative link down to the file, lstat does not
    assert_eq!(vfs.stat("x.tar#utar/a/l").unwrap().size, 7);
    assert_eq!(vfs.lstat("x.tar#utar/a/l").unwrap().kind, FileKind::Symlink);

    //readlink on a plain file is EINVAL
    assert!(matches!(
        vfs.readlink("x.tar#utar/a/b/c", &mut buf),
        Err(VfsError::InvalidArgument)
    ));
    assert_eq!(vfs.ferrno(), libc::EINVAL);
}

#[test]
fn symlink_loop() {
    let mut vfs = archive();
    assert!(matches!(
        vfs.stat("x.tar#utar/l1"),
        Err(VfsError::LinkLoop)
    ));
    assert_eq!(vfs.ferrno(), libc::ELOOP);
}

#[test]
fn superblock_dedup_and_gc() {
    let mut vfs = archive();

    vfs.stat("x.tar#utar/a/b/c").unwrap();
    vfs.stat("x.tar#utar/a").unwrap();
    assert_eq!(vfs.sub().opened, 1);

    //a different archive gets its own superblock
    vfs.stat("y.tar#utar/a/b/c").unwrap();
    assert_eq!(vfs.sub().opened, 2);

    let x = vfs.getid("x.tar#utar/").unwrap();
    let y = vfs.getid("y.tar#utar/").unwrap();
    assert_ne!(x, y);
    assert!(vfs.nothingisopen(x));
    //fresh superblocks are idle, hence stamped for the collector
    assert!(vfs.has_stamp(x));

    vfs.free(x);
    assert!(vfs.getid("x.tar#utar/").is_none());

    //freeing the second superblock releases every object
    vfs.free(y);
    assert_eq!(vfs.store().total_inodes(), 0);
    assert_eq!(vfs.store().total_entries(), 0);
}

#[test]
fn rejected_archives_stay_silent() {
    let mut vfs = CacheFS::new(TarMock {
        reject: true,
        ..TarMock::standard()
    });
    assert!(matches!(
        vfs.stat("x.tar#utar/a"),
        Err(VfsError::Rejected)
    ));
    assert_eq!(vfs.ferrno(), 0);
}

#[test]
fn open_close_balance() {
    let mut vfs = archive();
    let sup = {
        vfs.stat("x.tar#utar/a/b/c").unwrap();
        vfs.getid("x.tar#utar/").unwrap()
    };
    let nlink_before = vfs.stat("x.tar#utar/a/b/c").unwrap().nlink;

    let mut fh = vfs.open("x.tar#utar/a/b/c", OpenFlags::empty(), 0).unwrap();
    assert_eq!(vfs.store().super_ref(sup).fd_usage, 1);
    assert!(!vfs.has_stamp(sup));
    assert_eq!(vfs.fstat(&fh).nlink, nlink_before + 1);

    assert_eq!(utils::read_all(&mut vfs, &mut fh), b"7 bytes");

    vfs.close(fh).unwrap();
    assert_eq!(vfs.store().super_ref(sup).fd_usage, 0);
    assert!(vfs.has_stamp(sup));
    assert_eq!(vfs.stat("x.tar#utar/a/b/c").unwrap().nlink, nlink_before);
}

#[test]
fn opendir_is_idempotent_on_nlink() {
    let mut vfs = archive();
    let before = vfs.stat("x.tar#utar/a").unwrap().nlink;

    let mut handle = vfs.opendir("x.tar#utar/a").unwrap();
    assert_eq!(vfs.stat("x.tar#utar/a").unwrap().nlink, before + 1);
    assert!(vfs.readdir(&mut handle).is_some());
    vfs.closedir(handle);

    assert_eq!(vfs.stat("x.tar#utar/a").unwrap().nlink, before);
}

#[test]
fn create_write_reopen() {
    let mut vfs = archive();

    let mut fh = vfs
        .open(
            "x.tar#utar/a/new",
            OpenFlags::CREATE | OpenFlags::WRITE,
            0o644,
        )
        .unwrap();
    assert_eq!(vfs.write(&mut fh, b"hi").unwrap(), 2);
    vfs.close(fh).unwrap();

    //the body survives in the local-file cache
    let mut fh = vfs.open("x.tar#utar/a/new", OpenFlags::empty(), 0).unwrap();
    assert_eq!(utils::read_all(&mut vfs, &mut fh), b"hi");
    vfs.close(fh).unwrap();

    //exclusive creation now fails
    assert!(matches!(
        vfs.open(
            "x.tar#utar/a/new",
            OpenFlags::CREATE | OpenFlags::EXCL | OpenFlags::WRITE,
            0o644,
        ),
        Err(VfsError::Exists)
    ));
    assert_eq!(vfs.ferrno(), libc::EEXIST);
}

#[test]
fn readonly_creation_fails_silently() {
    let mut vfs = CacheFS::new(TarMock {
        readonly: true,
        ..TarMock::standard()
    });
    vfs.stat("x.tar#utar/a").unwrap();

    assert!(matches!(
        vfs.open(
            "x.tar#utar/nope",
            OpenFlags::CREATE | OpenFlags::WRITE,
            0o644,
        ),
        Err(VfsError::ReadOnly)
    ));
    //silent by contract: the class errno is untouched
    assert_eq!(vfs.ferrno(), 0);
}

#[test]
fn directories_refuse_file_opens() {
    let mut vfs = archive();
    assert!(matches!(
        vfs.open("x.tar#utar/a", OpenFlags::empty(), 0),
        Err(VfsError::IsDirectory)
    ));
    assert_eq!(vfs.ferrno(), libc::EISDIR);

    vfs.chdir("x.tar#utar/a").unwrap();
    assert!(matches!(
        vfs.chdir("x.tar#utar/a/b/c"),
        Err(VfsError::NotDirectory)
    ));
    assert_eq!(vfs.ferrno(), libc::ENOTDIR);

    assert!(matches!(
        vfs.stat("x.tar#utar/missing"),
        Err(VfsError::NotFound)
    ));
    assert_eq!(vfs.ferrno(), libc::ENOENT);
}

#[test]
fn automake_fabricates_directories() {
    let mut vfs = archive();
    vfs.stat("x.tar#utar/a").unwrap();
    let sup = vfs.getid("x.tar#utar/").unwrap();
    let root = vfs.store().super_ref(sup).root.unwrap();

    let ent = vfs
        .find_entry(root, "fab/sub", LINK_FOLLOW, LookupFlags::MKDIR)
        .unwrap()
        .unwrap();
    let ino = vfs.store().entry(ent).ino;
    assert_eq!(vfs.store().inode(ino).st.kind, FileKind::Directory);
    assert_eq!(vfs.store().inode(ino).st.perm, 0o777 & !*PROCESS_UMASK);

    //both fabricated components resolve now
    assert_eq!(vfs.stat("x.tar#utar/fab").unwrap().kind, FileKind::Directory);
    assert_eq!(utils::dir_names(&mut vfs, "x.tar#utar/fab"), vec!["sub"]);
}
