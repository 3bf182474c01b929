//! File handles and I/O: open, read, write, lseek, close, the linear
//! streaming state machine, write-back on close, and whole-file retrieval
//! into the local-copy cache.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use dircache_api::error::{VfsError, VfsResult};
use dircache_api::fs::ArchiveSupport;
use dircache_api::types::{
    ClassFlags, FileHandle, FileKind, InodeId, LinearState, LookupFlags,
    OpenFlags, Stat, LINK_FOLLOW,
};

use crate::class::CacheFS;

/// Create the host temp file backing a cached file body and persist it;
/// the inode owns the path from here on.
fn mkstemps(class: &str, hint: &str) -> io::Result<PathBuf> {
    let safe: String = hint
        .chars()
        .map(|c| if c == '/' { '_' } else { c })
        .collect();
    let (file, path) = tempfile::Builder::new()
        .prefix(&format!("{}-{}-", class, safe))
        .tempfile()?
        .keep()
        .map_err(|e| e.error)?;
    drop(file);
    Ok(path)
}

/// Host open options for a local copy; the linear bit never reaches the
/// host.
fn host_open_options(flags: OpenFlags) -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.read(true);
    if flags.contains(OpenFlags::WRITE) {
        opts.write(true);
        if flags.contains(OpenFlags::TRUNC) {
            opts.truncate(true);
        }
    }
    opts
}

/// Transfer progress line, with a percentage when the expected size is
/// known.
fn print_stats(fs_name: &str, action: &str, file_name: &str, have: u64, need: u64) {
    if need > 0 {
        log::info!(
            "{}: {}: {} {}% ({} bytes transferred)",
            fs_name,
            action,
            file_name,
            have * 100 / need,
            have
        );
    } else {
        log::info!(
            "{}: {}: {} {} bytes transferred",
            fs_name,
            action,
            file_name,
            have
        );
    }
}

impl<S: ArchiveSupport> CacheFS<S> {
    /// Open `path`, returning an owned handle the other file operations
    /// take back. `perm` is used when the open creates the file.
    ///
    /// Creation requires `CREATE` and a writable class; a read-only class
    /// refuses without raising an error. `CREATE | EXCL` on an existing
    /// file fails with `Exists`. Requesting `LINEAR` on a class with a
    /// streaming protocol arms the forward-only state machine instead of
    /// attaching a local copy.
    pub fn open(&mut self, path: &str, flags: OpenFlags, perm: u32) -> VfsResult<FileHandle> {
        let r = self.open_inner(path, flags, perm);
        self.record(r)
    }

    fn open_inner(
        &mut self,
        path: &str,
        flags: OpenFlags,
        perm: u32,
    ) -> VfsResult<FileHandle> {
        let (sup, q) = self.get_path(path, LookupFlags::empty())?;
        let mut was_changed = false;

        let (found, lookup_err) =
            match self.find_inode(sup, &q, LINK_FOLLOW, LookupFlags::empty()) {
                Ok(opt) => (opt, None),
                Err(e) => (None, Some(e)),
            };
        if found.is_some() && flags.contains(OpenFlags::CREATE | OpenFlags::EXCL) {
            return Err(VfsError::Exists);
        }

        let ino = match found {
            Some(ino) => ino,
            None => {
                if !flags.contains(OpenFlags::CREATE) {
                    return Err(lookup_err.unwrap_or(VfsError::NotFound));
                }
                if self.sub.flags().contains(ClassFlags::READONLY) {
                    return Err(VfsError::ReadOnly);
                }
                let (dirname, base) = match q.rsplit_once('/') {
                    Some((d, b)) => (d, b),
                    None => ("", q.as_str()),
                };
                let base = base.to_string();
                let dir = self
                    .find_inode(sup, dirname, LINK_FOLLOW, LookupFlags::DIR)?
                    .ok_or(VfsError::NotFound)?;
                let ent = self.generate(&base, dir, FileKind::Regular, 0o755);
                let ino = self.store.entry(ent).ino;
                self.store.insert_entry(dir, ent);
                let local = mkstemps(self.sub.name(), &base)?;
                self.store.inode_mut(ino).localname = Some(local);
                was_changed = true;
                ino
            }
        };

        if self.store.inode(ino).st.kind == FileKind::Directory {
            return Err(VfsError::IsDirectory);
        }

        let mut fh = FileHandle::new(ino, was_changed);

        if flags.contains(OpenFlags::LINEAR) {
            if self.sub.linear().is_some() {
                log::info!("Starting linear transfer...");
                fh.linear = LinearState::PreOpen;
            }
        } else if let Some(ops) = self.sub.handle_ops() {
            ops.fh_open(&mut self.store, &mut fh, flags, perm)?;
        } else if self.sub.flags().contains(ClassFlags::REMOTE)
            && self.sub.linear().is_some()
            && self.store.inode(ino).localname.is_none()
        {
            // No handle hooks: materialize the body through the stream.
            self.retrieve_inner(ino)?;
        }

        if let Some(local) = self.store.inode(ino).localname.clone() {
            let f = host_open_options(flags).open(&local)?;
            fh.file = Some(f);
        }

        // We had no open file and now we have one.
        self.stamp_remove(sup);
        self.store.super_mut(sup).fd_usage += 1;
        self.store.inode_mut(ino).st.nlink += 1;
        Ok(fh)
    }

    /// Read from an open handle.
    ///
    /// The first read of a pre-opened linear handle starts the stream at
    /// the handle position; a running stream delegates to the subclass
    /// reader; otherwise the local copy serves the read.
    pub fn read(&mut self, fh: &mut FileHandle, buf: &mut [u8]) -> VfsResult<usize> {
        let r = self.read_inner(fh, buf);
        self.record(r)
    }

    fn read_inner(&mut self, fh: &mut FileHandle, buf: &mut [u8]) -> VfsResult<usize> {
        if fh.linear == LinearState::PreOpen {
            let pos = fh.pos;
            match self.sub.linear() {
                Some(lin) => lin.linear_start(&mut self.store, fh, pos)?,
                None => panic!("linear handle on a class without a streaming protocol"),
            }
            if fh.linear != LinearState::Open {
                panic!("linear_start() did not set the linear state");
            }
        }

        if fh.linear == LinearState::Open {
            return match self.sub.linear() {
                Some(lin) => lin.linear_read(&mut self.store, fh, buf),
                None => panic!("linear handle on a class without a streaming protocol"),
            };
        }

        if let Some(f) = fh.file.as_mut() {
            return Ok(f.read(buf)?);
        }
        panic!("read: handle has neither a stream nor a local copy");
    }

    /// Write to an open handle. Marks the handle changed, so the body is
    /// stored back to the filesystem on close where supported. Writing to
    /// any linear handle is a contract violation.
    pub fn write(&mut self, fh: &mut FileHandle, buf: &[u8]) -> VfsResult<usize> {
        let r = self.write_inner(fh, buf);
        self.record(r)
    }

    fn write_inner(&mut self, fh: &mut FileHandle, buf: &[u8]) -> VfsResult<usize> {
        if fh.linear != LinearState::Off {
            panic!("write on a linear handle");
        }
        if self.sub.flags().contains(ClassFlags::READONLY) {
            return Err(VfsError::ReadOnly);
        }
        fh.changed = true;
        match fh.file.as_mut() {
            Some(f) => Ok(f.write(buf)?),
            None => panic!("write: handle has no local copy"),
        }
    }

    /// Reposition an open handle, returning the new position.
    ///
    /// A handle with a local copy seeks on the host. Without one the
    /// position is computed virtually against the inode size, clamped to
    /// `[0, size]`. Seeking a running linear stream is a contract
    /// violation.
    pub fn lseek(&mut self, fh: &mut FileHandle, pos: SeekFrom) -> VfsResult<u64> {
        let r = self.lseek_inner(fh, pos);
        self.record(r)
    }

    fn lseek_inner(&mut self, fh: &mut FileHandle, pos: SeekFrom) -> VfsResult<u64> {
        if fh.linear == LinearState::Open {
            panic!("seek on a running linear stream");
        }
        if let Some(f) = fh.file.as_mut() {
            return Ok(f.seek(pos)?);
        }

        let size = self.store.inode(fh.ino).st.size;
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::Current(d) => fh.pos as i64 + d,
            SeekFrom::End(d) => size as i64 + d,
        };
        fh.pos = if target < 0 {
            0
        } else if (target as u64) < size {
            target as u64
        } else {
            size
        };
        Ok(fh.pos)
    }

    /// Close a handle, consuming it.
    ///
    /// Releases the superblock pin (re-registering the idle stamp when this
    /// was the last handle), shuts a running stream down, runs the subclass
    /// close hook, stores a changed body back to the filesystem and then
    /// invalidates the whole superblock, since the server-side tree just
    /// changed under the cache, and finally releases the handle's reference
    /// on the inode.
    pub fn close(&mut self, fh: FileHandle) -> VfsResult<()> {
        let r = self.close_inner(fh);
        self.record(r)
    }

    fn close_inner(&mut self, mut fh: FileHandle) -> VfsResult<()> {
        let sup = self.store.inode(fh.ino).sup;
        self.store.super_mut(sup).fd_usage -= 1;
        if self.store.super_ref(sup).fd_usage == 0 {
            self.stamp_create(sup);
        }

        let mut res = Ok(());
        if fh.linear == LinearState::Open {
            if let Some(lin) = self.sub.linear() {
                lin.linear_close(&mut self.store, &mut fh);
            }
        }
        if let Some(ops) = self.sub.handle_ops() {
            res = ops.fh_close(&mut self.store, &mut fh);
        }

        if fh.changed && self.sub.store_back().is_some() {
            match self.fullpath(fh.ino) {
                Ok(full) => {
                    let local = self
                        .store
                        .inode(fh.ino)
                        .localname
                        .clone()
                        .expect("changed file without a local copy");
                    if let Some(sb) = self.sub.store_back() {
                        res = sb.file_store(&mut self.store, &mut fh, &full, &local);
                    }
                }
                Err(e) => res = Err(e),
            }
            self.invalidate(sup);
        }

        drop(fh.file.take());
        self.free_inode(fh.ino);
        res
    }

    /// Metadata of the inode behind an open handle.
    pub fn fstat(&self, fh: &FileHandle) -> Stat {
        self.store.inode(fh.ino).st
    }

    /// Fetch a whole remote file through the streaming protocol into a
    /// host temp file, recorded as the inode's local copy.
    ///
    /// Progress is reported per chunk, and the interrupt flag is polled
    /// between chunks: on cancellation or error the stream is shut down,
    /// the partial copy unlinked, and the inode left without a local copy.
    /// For a restartable fetch, open the file with `OpenFlags::LINEAR`
    /// instead.
    pub fn retrieve_file(&mut self, ino: InodeId) -> VfsResult<()> {
        let r = self.retrieve_inner(ino);
        self.record(r)
    }

    pub(crate) fn retrieve_inner(&mut self, ino: InodeId) -> VfsResult<()> {
        if self.store.inode(ino).localname.is_some() {
            return Ok(());
        }
        let name = match self.store.inode(ino).ent {
            Some(e) => self.store.entry(e).name.clone(),
            None => return Err(VfsError::Detached),
        };
        let want = self.store.inode(ino).st.size;

        let local = mkstemps(self.sub.name(), &name)?;
        let mut out = File::create(&local)?;
        self.store.inode_mut(ino).localname = Some(local.clone());

        let mut fh = FileHandle::new(ino, false);
        self.interrupted.store(false, Ordering::Relaxed);

        if let Err(e) = self.drain_stream(&mut fh, &mut out, &name, want) {
            drop(out);
            let _ = std::fs::remove_file(&local);
            self.store.inode_mut(ino).localname = None;
            return Err(e);
        }
        Ok(())
    }

    fn drain_stream(
        &mut self,
        fh: &mut FileHandle,
        out: &mut File,
        name: &str,
        want: u64,
    ) -> VfsResult<()> {
        let fs_name = self.sub.name().to_string();
        match self.sub.linear() {
            Some(lin) => lin.linear_start(&mut self.store, fh, 0)?,
            None => panic!("retrieve_file on a class without a streaming protocol"),
        }

        let mut total = 0u64;
        let mut buf = [0u8; 8192];
        loop {
            let n = match self.sub.linear() {
                Some(lin) => match lin.linear_read(&mut self.store, fh, &mut buf) {
                    Ok(n) => n,
                    Err(e) => {
                        self.shut_stream(fh);
                        return Err(e);
                    }
                },
                None => panic!("streaming protocol vanished mid-transfer"),
            };
            if n == 0 {
                break;
            }
            total += n as u64;
            print_stats(&fs_name, "Getting file", name, total, want);

            if self.interrupted.load(Ordering::Relaxed) {
                self.shut_stream(fh);
                return Err(VfsError::Interrupted);
            }
            if let Err(e) = out.write_all(&buf[..n]) {
                self.shut_stream(fh);
                return Err(e.into());
            }
        }
        self.shut_stream(fh);
        Ok(())
    }

    fn shut_stream(&mut self, fh: &mut FileHandle) {
        if let Some(lin) = self.sub.linear() {
            lin.linear_close(&mut self.store, fh);
        }
    }

    /// Local copy of `path`, reusing the session's file cache. Remote
    /// classes only; archives go through the generic host facilities.
    pub fn getlocalcopy(&mut self, path: &str) -> Option<PathBuf> {
        if !self.sub.flags().contains(ClassFlags::REMOTE) {
            return None;
        }
        let fh = self.open(path, OpenFlags::empty(), 0).ok()?;
        let local = self.store.inode(fh.ino).localname.clone();
        let _ = self.close(fh);
        local
    }

    /// Return a local copy handed out by
    /// [`getlocalcopy`](CacheFS::getlocalcopy). A no-op: the cache owns
    /// the file, and removes it when the inode dies.
    pub fn ungetlocalcopy(&mut self, _path: &str, _local: &Path) {}
}
