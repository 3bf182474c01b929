#![allow(dead_code)]

//Mock filesystems driving the scenario tests: a tar-like archive class
//(full tree known at open time) and an ftp-like session class (lazy
//listings, expiring snapshots, streaming reads, write-back).

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::anyhow;

use dircache_api::error::{VfsError, VfsResult};
use dircache_api::fs::{
    ArchiveId, ArchiveSupport, Cookie, DirLoad, HandleOps, LinearRead, ScanVerdict,
    StoreBack,
};
use dircache_api::store::Store;
use dircache_api::types::{
    ClassFlags, FileHandle, FileKind, InodeId, LinearState, OpenFlags, Stat, SuperId,
};

//Write a body into a persisted temp file, the way an extractor would
fn write_temp(body: &[u8]) -> VfsResult<PathBuf> {
    let (mut f, path) = tempfile::Builder::new()
        .prefix("mockfs-")
        .tempfile()
        .map_err(VfsError::Io)?
        .keep()
        .map_err(|e| VfsError::Io(e.error))?;
    f.write_all(body)?;
    Ok(path)
}

//--------------------------------------------------------------------------
// Tar-like archive class
//--------------------------------------------------------------------------

pub struct TarNode {
    pub path: &'static str,
    pub kind: FileKind,
    pub body: &'static [u8],
    pub link: &'static str,
}

impl TarNode {
    pub fn file(path: &'static str, body: &'static [u8]) -> TarNode {
        TarNode {
            path,
            kind: FileKind::Regular,
            body,
            link: "",
        }
    }

    pub fn symlink(path: &'static str, target: &'static str) -> TarNode {
        TarNode {
            path,
            kind: FileKind::Symlink,
            body: b"",
            link: target,
        }
    }
}

pub struct TarMock {
    pub nodes: Vec<TarNode>,
    pub readonly: bool,
    pub reject: bool,
    //open_archive call count, to observe superblock deduplication
    pub opened: usize,
}

impl TarMock {
    //The fixture most archive tests run against:
    //  a/b/c   7-byte file
    //  a/l     -> "b/c"
    //  l1 <-> l2 symlink loop
    pub fn standard() -> TarMock {
        TarMock {
            nodes: vec![
                TarNode::file("a/b/c", b"7 bytes"),
                TarNode::symlink("a/l", "b/c"),
                TarNode::symlink("l1", "l2"),
                TarNode::symlink("l2", "l1"),
            ],
            readonly: false,
            reject: false,
            opened: 0,
        }
    }
}

impl ArchiveSupport for TarMock {
    fn name(&self) -> &str {
        "mocktar"
    }

    fn flags(&self) -> ClassFlags {
        if self.readonly {
            ClassFlags::READONLY
        } else {
            ClassFlags::empty()
        }
    }

    fn archive_check(&mut self, _archive: &ArchiveId<'_>) -> Option<Cookie> {
        if self.reject {
            None
        } else {
            Some(Cookie::default())
        }
    }

    fn archive_same(
        &self,
        store: &Store,
        sup: SuperId,
        archive: &ArchiveId<'_>,
        _cookie: &Cookie,
    ) -> ScanVerdict {
        if store.super_ref(sup).name == archive.name {
            ScanVerdict::Same
        } else {
            ScanVerdict::Other
        }
    }

    fn open_archive(
        &mut self,
        store: &mut Store,
        sup: SuperId,
        archive: &ArchiveId<'_>,
    ) -> VfsResult<()> {
        if archive.name.is_empty() {
            return Err(anyhow!("archive without a name").into());
        }
        self.opened += 1;

        let root = store.new_inode(sup, Some(Stat::default_for(FileKind::Directory, 0o755)));
        //No entry ever names the root; pin it against directory holds
        store.inode_mut(root).st.nlink = 1;
        store.super_mut(sup).root = Some(root);
        store.super_mut(sup).name = archive.name.to_string();

        for node in &self.nodes {
            let (dirpath, base) = match node.path.rsplit_once('/') {
                Some((d, b)) => (d, b),
                None => ("", node.path),
            };
            let dir = store.ensure_dirs(root, dirpath);
            let mut st = Stat::default_for(node.kind, 0o644);
            st.size = node.body.len() as u64;
            let ent = store.generate_entry(base, dir, st);
            let ino = store.entry(ent).ino;
            if node.kind == FileKind::Symlink {
                store.inode_mut(ino).linkname = Some(node.link.to_string());
            }
            if node.kind == FileKind::Regular {
                store.inode_mut(ino).data = Some(Box::new(node.body.to_vec()));
            }
            store.insert_entry(dir, ent);
        }
        Ok(())
    }

    fn handle_ops(&mut self) -> Option<&mut dyn HandleOps> {
        Some(self)
    }
}

impl HandleOps for TarMock {
    //Extract-on-open: archive members get their body copied into the local
    //file cache the first time a handle needs it
    fn fh_open(
        &mut self,
        store: &mut Store,
        fh: &mut FileHandle,
        _flags: OpenFlags,
        _perm: u32,
    ) -> VfsResult<()> {
        if store.inode(fh.ino).localname.is_some() {
            return Ok(());
        }
        let body = store
            .inode(fh.ino)
            .data
            .as_ref()
            .and_then(|d| d.downcast_ref::<Vec<u8>>())
            .cloned()
            .unwrap_or_default();
        let local = write_temp(&body)?;
        store.inode_mut(fh.ino).localname = Some(local);
        Ok(())
    }

    fn fh_close(&mut self, _store: &mut Store, _fh: &mut FileHandle) -> VfsResult<()> {
        Ok(())
    }
}

//--------------------------------------------------------------------------
// Ftp-like session class
//--------------------------------------------------------------------------

#[derive(Clone)]
pub struct RemoteNode {
    pub name: String,
    pub kind: FileKind,
    pub link: Option<String>,
}

impl RemoteNode {
    pub fn dir(name: &str) -> RemoteNode {
        RemoteNode {
            name: name.to_string(),
            kind: FileKind::Directory,
            link: None,
        }
    }

    pub fn file(name: &str) -> RemoteNode {
        RemoteNode {
            name: name.to_string(),
            kind: FileKind::Regular,
            link: None,
        }
    }
}

//In-handle stream state for linear reads
struct Stream {
    bytes: Vec<u8>,
    off: usize,
}

pub struct FtpMock {
    //server-side state: directory listings keyed by path, file bodies
    //keyed by full path ("" is the root directory)
    pub listings: HashMap<String, Vec<RemoteNode>>,
    pub bodies: HashMap<String, Vec<u8>>,
    pub ttl: Duration,
    //observability for the tests
    pub loads: Vec<String>,
    pub stores: Vec<String>,
    pub starts: usize,
    pub chunks: usize,
    //set the shared interrupt flag after serving this many chunks
    pub interrupt_after: Option<(usize, Arc<AtomicBool>)>,
}

impl FtpMock {
    //Server fixture: /pub/a.txt ("hello") and a 100000-byte /big
    pub fn standard(ttl: Duration) -> FtpMock {
        let mut listings = HashMap::new();
        listings.insert(
            String::new(),
            vec![RemoteNode::dir("pub"), RemoteNode::file("big")],
        );
        listings.insert("pub".to_string(), vec![RemoteNode::file("a.txt")]);

        let mut bodies = HashMap::new();
        bodies.insert("big".to_string(), vec![0x42; 100_000]);
        bodies.insert("pub/a.txt".to_string(), b"hello".to_vec());

        FtpMock {
            listings,
            bodies,
            ttl,
            loads: Vec::new(),
            stores: Vec::new(),
            starts: 0,
            chunks: 0,
            interrupt_after: None,
        }
    }
}

impl ArchiveSupport for FtpMock {
    fn name(&self) -> &str {
        "mockftp"
    }

    fn flags(&self) -> ClassFlags {
        ClassFlags::REMOTE
    }

    fn archive_same(
        &self,
        store: &Store,
        sup: SuperId,
        archive: &ArchiveId<'_>,
        _cookie: &Cookie,
    ) -> ScanVerdict {
        if store.super_ref(sup).name == archive.name {
            ScanVerdict::Same
        } else {
            ScanVerdict::Other
        }
    }

    fn open_archive(
        &mut self,
        store: &mut Store,
        sup: SuperId,
        archive: &ArchiveId<'_>,
    ) -> VfsResult<()> {
        let root = store.new_inode(sup, Some(Stat::default_for(FileKind::Directory, 0o755)));
        store.inode_mut(root).st.nlink = 1;
        store.super_mut(sup).root = Some(root);
        store.super_mut(sup).name = archive.name.to_string();
        Ok(())
    }

    fn dir_loader(&mut self) -> Option<&mut dyn DirLoad> {
        Some(self)
    }

    fn linear(&mut self) -> Option<&mut dyn LinearRead> {
        Some(self)
    }

    fn store_back(&mut self) -> Option<&mut dyn StoreBack> {
        Some(self)
    }
}

impl DirLoad for FtpMock {
    fn dir_load(&mut self, store: &mut Store, dir: InodeId, path: &str) -> VfsResult<()> {
        self.loads.push(path.to_string());
        store.log_wire(format!("LIST {}\r\n", path).as_bytes());

        let listing = match self.listings.get(path) {
            Some(l) => l.clone(),
            None => return Err(VfsError::NotFound),
        };
        for node in listing {
            let full = if path.is_empty() {
                node.name.clone()
            } else {
                format!("{}/{}", path, node.name)
            };
            let mut st = Stat::default_for(node.kind, 0o644);
            if let Some(body) = self.bodies.get(&full) {
                st.size = body.len() as u64;
            }
            let ent = store.generate_entry(&node.name, dir, st);
            let ino = store.entry(ent).ino;
            if let Some(target) = &node.link {
                store.inode_mut(ino).linkname = Some(target.clone());
            }
            //remember the server path; linear_start keys the body by it
            store.inode_mut(ino).data = Some(Box::new(full));
            store.insert_entry(dir, ent);
        }
        //the loader owns the expiry
        store.inode_mut(dir).timestamp = Some(SystemTime::now() + self.ttl);
        Ok(())
    }
}

impl LinearRead for FtpMock {
    fn linear_start(
        &mut self,
        store: &mut Store,
        fh: &mut FileHandle,
        pos: u64,
    ) -> VfsResult<()> {
        self.starts += 1;
        let path = store
            .inode(fh.ino)
            .data
            .as_ref()
            .and_then(|d| d.downcast_ref::<String>())
            .cloned()
            .ok_or(VfsError::Detached)?;
        let bytes = self.bodies.get(&path).cloned().ok_or(VfsError::NotFound)?;
        fh.data = Some(Box::new(Stream {
            bytes,
            off: pos as usize,
        }));
        fh.linear = LinearState::Open;
        Ok(())
    }

    fn linear_read(
        &mut self,
        _store: &mut Store,
        fh: &mut FileHandle,
        buf: &mut [u8],
    ) -> VfsResult<usize> {
        let stream = fh
            .data
            .as_mut()
            .and_then(|d| d.downcast_mut::<Stream>())
            .expect("linear_read without a running stream");
        let n = buf.len().min(stream.bytes.len() - stream.off);
        buf[..n].copy_from_slice(&stream.bytes[stream.off..stream.off + n]);
        stream.off += n;
        fh.pos += n as u64;

        self.chunks += 1;
        if let Some((after, flag)) = &self.interrupt_after {
            if self.chunks >= *after {
                flag.store(true, Ordering::Relaxed);
            }
        }
        Ok(n)
    }

    fn linear_close(&mut self, _store: &mut Store, fh: &mut FileHandle) {
        fh.data = None;
    }
}

impl StoreBack for FtpMock {
    fn file_store(
        &mut self,
        _store: &mut Store,
        _fh: &mut FileHandle,
        full_path: &str,
        local: &Path,
    ) -> VfsResult<()> {
        let key = full_path.trim_start_matches('/').to_string();
        let bytes = std::fs::read(local)?;

        let (dir, base) = match key.rsplit_once('/') {
            Some((d, b)) => (d.to_string(), b.to_string()),
            None => (String::new(), key.clone()),
        };
        let listing = self.listings.entry(dir).or_insert_with(Vec::new);
        if !listing.iter().any(|n| n.name == base) {
            listing.push(RemoteNode::file(&base));
        }
        self.bodies.insert(key.clone(), bytes);
        self.stores.push(key);
        Ok(())
    }
}
