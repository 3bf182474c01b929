//! The cache class: wiring, object lifetimes, freshness, and the stat-like
//! half of the operation table.

use std::collections::HashSet;
use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dircache_api::error::{VfsError, VfsResult};
use dircache_api::fs::ArchiveSupport;
use dircache_api::store::Store;
use dircache_api::types::{
    ClassFlags, EntryId, FileKind, InodeId, LookupFlags, Stat, SuperId,
};

/// Device numbers handed out to classes, so inodes of different classes
/// never collide on `(dev, ino)`.
static NEXT_RDEV: AtomicU64 = AtomicU64::new(1);

/// Which resolver the class runs. Installed once, at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolver {
    /// Full hierarchical tree; archives.
    Tree,
    /// Flat cache of directory snapshots keyed by full path; sessions.
    Linear,
}

/// Control operations accepted by [`CacheFS::setctl`].
pub enum Setctl {
    /// Set or clear the superblock's "keep stale data" bit. Clearing it
    /// triggers an immediate invalidation.
    StaleData(bool),
    /// Open a write-mode sink for raw wire traffic.
    Logfile(PathBuf),
    /// Arm the one-shot flush flag: the next freshness check fails once.
    Flush,
}

/// The directory-cache class for one filesystem kind.
///
/// Owns the object arena and the subclass, and exposes the whole operation
/// table as inherent methods. Single-threaded and blocking by design: every
/// operation takes `&mut self`, and subclass hooks that talk to the network
/// block the calling thread.
pub struct CacheFS<S: ArchiveSupport> {
    pub(crate) sub: S,
    pub(crate) store: Store,
    /// Live superblocks, newest first.
    pub(crate) supers: Vec<SuperId>,
    pub(crate) resolver: Resolver,
    /// errno of the last failed operation, surfaced by `ferrno`.
    pub(crate) verrno: i32,
    /// One-shot flag forcing the next freshness check to fail.
    pub(crate) flush: bool,
    /// Idle stamps: superblocks with no open file handle, eligible for
    /// reclamation by an external garbage collector.
    pub(crate) stamps: HashSet<SuperId>,
    /// Cooperative cancellation flag polled between linear-read chunks.
    pub(crate) interrupted: Arc<AtomicBool>,
}

impl<S: ArchiveSupport> CacheFS<S> {
    /// Wire up a class around `sub`, installing the resolver variant the
    /// subclass flags call for.
    pub fn new(sub: S) -> CacheFS<S> {
        let resolver = if sub.flags().contains(ClassFlags::REMOTE) {
            Resolver::Linear
        } else {
            Resolver::Tree
        };
        CacheFS {
            store: Store::new(NEXT_RDEV.fetch_add(1, Ordering::Relaxed)),
            sub,
            supers: Vec::new(),
            resolver,
            verrno: 0,
            flush: false,
            stamps: HashSet::new(),
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The subclass.
    pub fn sub(&self) -> &S {
        &self.sub
    }

    /// The subclass, mutably.
    pub fn sub_mut(&mut self) -> &mut S {
        &mut self.sub
    }

    /// The object arena, for inspection.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Shared handle on the interrupt flag. Hosts set it from their signal
    /// or key handling to abort a running linear transfer.
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupted)
    }

    /// errno of the last failed operation.
    pub fn ferrno(&self) -> i32 {
        self.verrno
    }

    /// Capture a failure into the class errno on its way out. Read-only
    /// refusals and archive-check vetoes stay silent by contract.
    pub(crate) fn record<T>(&mut self, r: VfsResult<T>) -> VfsResult<T> {
        if let Err(e) = &r {
            match e {
                VfsError::ReadOnly | VfsError::Rejected => {}
                _ => self.verrno = e.as_errno(),
            }
        }
        r
    }

    /// Allocate an inode and run the subclass init hook on it.
    pub(crate) fn make_inode(&mut self, sup: SuperId, st: Stat) -> InodeId {
        let id = self.store.new_inode(sup, Some(st));
        self.sub.init_inode(self.store.inode_mut(id));
        id
    }

    /// Allocate an entry and run the subclass init hook on it.
    pub(crate) fn make_entry(&mut self, name: &str, ino: InodeId) -> EntryId {
        let id = self.store.new_entry(name, ino);
        self.sub.init_entry(self.store.entry_mut(id));
        id
    }

    /// A fresh entry naming a fresh inode with default metadata, init hooks
    /// applied. Not yet inserted anywhere.
    pub(crate) fn generate(
        &mut self,
        name: &str,
        parent: InodeId,
        kind: FileKind,
        perm: u32,
    ) -> EntryId {
        let sup = self.store.inode(parent).sup;
        let ino = self.make_inode(sup, Stat::default_for(kind, perm));
        self.make_entry(name, ino)
    }

    /// Destroy an entry: detach it from its parent, clear the inode's
    /// named-by pointer, and release the one reference the entry held.
    pub(crate) fn free_entry(&mut self, ent: EntryId) {
        let dead = self.store.remove_entry(ent);
        self.free_inode(dead.ino);
    }

    /// Release one reference on an inode, destroying it at zero.
    ///
    /// A multi-referenced inode just loses one link. The last release frees
    /// every child entry first (each child holds exactly one reference, so
    /// the recursion terminates), runs the subclass destructor, unlinks the
    /// cached local copy from the host, and drops the arena slot.
    pub(crate) fn free_inode(&mut self, ino: InodeId) {
        if self.store.inode(ino).st.nlink > 1 {
            self.store.inode_mut(ino).st.nlink -= 1;
            return;
        }
        while let Some(&child) = self.store.inode(ino).subdir.first() {
            self.free_entry(child);
        }
        let mut dead = self.store.remove_inode(ino);
        self.sub.drop_inode(&mut dead);
        if let Some(local) = dead.localname.take() {
            let _ = std::fs::remove_file(&local);
        }
    }

    /// Is the directory snapshot still fresh? Consumes the one-shot flush
    /// flag, then defers to the subclass freshness hook.
    pub(crate) fn dir_uptodate(&mut self, ino: InodeId) -> bool {
        if self.flush {
            self.flush = false;
            return false;
        }
        self.sub.dir_uptodate(self.store.inode(ino))
    }

    /// Throw away every cached object under `sup` and install a fresh empty
    /// root, unless the superblock asked to keep stale data.
    pub fn invalidate(&mut self, sup: SuperId) {
        if self.store.super_ref(sup).want_stale {
            return;
        }
        if let Some(root) = self.store.super_mut(sup).root.take() {
            self.free_inode(root);
        }
        let root = self.make_inode(sup, Stat::default_for(FileKind::Directory, 0o755));
        // No entry ever names a root; pin it so directory holds can't
        // reclaim it.
        self.store.inode_mut(root).st.nlink = 1;
        self.store.super_mut(sup).root = Some(root);
    }

    /// Control interface.
    pub fn setctl(&mut self, path: &str, op: Setctl) -> bool {
        match op {
            Setctl::StaleData(on) => {
                let ino = match self.inode_from_path(path, LookupFlags::empty()) {
                    Ok(i) => i,
                    Err(_) => return false,
                };
                let sup = self.store.inode(ino).sup;
                self.store.super_mut(sup).want_stale = on;
                if !on {
                    self.invalidate(sup);
                }
                true
            }
            Setctl::Logfile(p) => match File::create(p) {
                Ok(f) => {
                    self.store.set_logfile(Some(f));
                    true
                }
                Err(_) => false,
            },
            Setctl::Flush => {
                self.flush = true;
                true
            }
        }
    }

    /// Metadata of the object at `path`, following a trailing symlink.
    pub fn stat(&mut self, path: &str) -> VfsResult<Stat> {
        let r = self.internal_stat(path, LookupFlags::FOLLOW);
        self.record(r)
    }

    /// Metadata of the object at `path` itself, symlinks unresolved.
    pub fn lstat(&mut self, path: &str) -> VfsResult<Stat> {
        let r = self.internal_stat(path, LookupFlags::empty());
        self.record(r)
    }

    fn internal_stat(&mut self, path: &str, flags: LookupFlags) -> VfsResult<Stat> {
        let ino = self.inode_from_path(path, flags)?;
        Ok(self.store.inode(ino).st)
    }

    /// Copy the symlink target at `path` into `buf`, without a trailing
    /// NUL, returning the number of bytes copied. A target longer than the
    /// buffer is truncated, as the host call would.
    pub fn readlink(&mut self, path: &str, buf: &mut [u8]) -> VfsResult<usize> {
        let r = self.readlink_inner(path, buf);
        self.record(r)
    }

    fn readlink_inner(&mut self, path: &str, buf: &mut [u8]) -> VfsResult<usize> {
        let ino = self.inode_from_path(path, LookupFlags::empty())?;
        if self.store.inode(ino).st.kind != FileKind::Symlink {
            return Err(VfsError::InvalidArgument);
        }
        let ino = self.store.inode(ino);
        let link = ino.linkname.as_ref().ok_or(VfsError::DanglingLink)?;
        let len = buf.len().min(link.len());
        buf[..len].copy_from_slice(&link.as_bytes()[..len]);
        Ok(len)
    }
}

// Scenario tests are shared through the api crate's fs-tests directory and
// compiled as child modules here, where they can reach the crate internals.
#[cfg(test)]
#[path = "../../api/fs-tests/archive_test.rs"]
mod archive_tests;

#[cfg(test)]
#[path = "../../api/fs-tests/remote_test.rs"]
mod remote_tests;
