//! The superblock registry: locating, deduplicating, opening and destroying
//! archives and sessions, plus the idle-stamp surface the external garbage
//! collector drives.

use dircache_api::error::{VfsError, VfsResult};
use dircache_api::fs::{ArchiveSupport, ScanVerdict};
use dircache_api::types::{LookupFlags, SuperId};

use crate::class::CacheFS;

impl<S: ArchiveSupport> CacheFS<S> {
    /// Dissect `raw` and locate (or open) the superblock serving it.
    /// Returns the superblock and the local remainder of the path.
    ///
    /// The scan walks live superblocks newest-first, letting the subclass
    /// match each one; `NO_OPEN` turns a miss into an error instead of
    /// opening a fresh archive.
    pub(crate) fn get_path(
        &mut self,
        raw: &str,
        flags: LookupFlags,
    ) -> VfsResult<(SuperId, String)> {
        let (archive, local) = self.sub.dissect(raw);
        let remainder = local.unwrap_or("").to_string();

        let cookie = match self.sub.archive_check(&archive) {
            Some(c) => c,
            None => return Err(VfsError::Rejected),
        };

        for i in 0..self.supers.len() {
            let sup = self.supers[i];
            match self.sub.archive_same(&self.store, sup, &archive, &cookie) {
                ScanVerdict::Same => return Ok((sup, remainder)),
                ScanVerdict::Stop => break,
                ScanVerdict::Other => {}
            }
        }

        if flags.contains(LookupFlags::NO_OPEN) {
            return Err(VfsError::ArchiveIo);
        }

        let sup = self.store.new_super();
        if self.sub.open_archive(&mut self.store, sup, &archive).is_err() {
            self.free_super(sup);
            return Err(VfsError::ArchiveIo);
        }
        if self.store.super_ref(sup).name.is_empty() {
            panic!("open_archive must fill the superblock name");
        }
        if self.store.super_ref(sup).root.is_none() {
            panic!("open_archive must fill the root inode");
        }

        self.supers.insert(0, sup);
        self.stamp_create(sup);
        Ok((sup, remainder))
    }

    /// Destroy a superblock: free its tree, drop it from the registry, and
    /// let the subclass tear down whatever it attached.
    pub(crate) fn free_super(&mut self, sup: SuperId) {
        if let Some(root) = self.store.super_mut(sup).root.take() {
            self.free_inode(root);
        }
        self.supers.retain(|&s| s != sup);
        self.stamps.remove(&sup);
        self.sub.free_archive(&mut self.store, sup);
        self.store.remove_super(sup);
    }

    /// Opaque id of the superblock serving `path`, if one is already open.
    /// This is what the external garbage collector keys idle timers by.
    pub fn getid(&mut self, path: &str) -> Option<SuperId> {
        self.get_path(path, LookupFlags::NO_OPEN)
            .ok()
            .map(|(sup, _)| sup)
    }

    /// Liveness probe of the garbage-collection surface. The cache's data
    /// structures survive freeing a superblock at any time, so this is
    /// unconditionally true.
    pub fn nothingisopen(&self, _id: SuperId) -> bool {
        true
    }

    /// Garbage-collection entry point: destroy the superblock behind an id
    /// produced by [`getid`](CacheFS::getid).
    pub fn free(&mut self, id: SuperId) {
        self.free_super(id);
    }

    /// Register an idle stamp: no file handle is open, the external
    /// collector may reclaim this superblock once its timer runs out.
    pub(crate) fn stamp_create(&mut self, sup: SuperId) {
        self.stamps.insert(sup);
    }

    /// Drop the idle stamp; an open handle pins the superblock.
    pub(crate) fn stamp_remove(&mut self, sup: SuperId) {
        self.stamps.remove(&sup);
    }

    /// Does `sup` currently carry an idle stamp?
    pub fn has_stamp(&self, sup: SuperId) -> bool {
        self.stamps.contains(&sup)
    }
}
