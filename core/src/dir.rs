//! Handle-based sequential reading of a directory's entries.

use dircache_api::error::{VfsError, VfsResult};
use dircache_api::fs::ArchiveSupport;
use dircache_api::types::{FileKind, InodeId, LookupFlags};

use crate::class::CacheFS;

/// Cursor over a directory's child list. Holding one contributes one
/// `nlink` to the directory, so the snapshot cannot be reclaimed while an
/// enumeration is running; `closedir` releases the hold.
pub struct DirHandle {
    pub(crate) dir: InodeId,
    cursor: usize,
}

impl DirHandle {
    /// The directory being enumerated.
    pub fn inode(&self) -> InodeId {
        self.dir
    }
}

impl<S: ArchiveSupport> CacheFS<S> {
    /// Open a directory for enumeration. Resolves `path` as a directory,
    /// following symlinks, and takes a hold on the result.
    pub fn opendir(&mut self, path: &str) -> VfsResult<DirHandle> {
        let r = self.opendir_inner(path);
        self.record(r)
    }

    fn opendir_inner(&mut self, path: &str) -> VfsResult<DirHandle> {
        let dir =
            self.inode_from_path(path, LookupFlags::DIR | LookupFlags::FOLLOW)?;
        if self.store.inode(dir).st.kind != FileKind::Directory {
            return Err(VfsError::NotDirectory);
        }
        self.store.inode_mut(dir).st.nlink += 1;
        Ok(DirHandle { dir, cursor: 0 })
    }

    /// Name of the next entry, or `None` at the end. Returns an owned
    /// string; nothing the cache does later can invalidate it.
    pub fn readdir(&mut self, handle: &mut DirHandle) -> Option<String> {
        let eid = *self.store.inode(handle.dir).subdir.get(handle.cursor)?;
        handle.cursor += 1;
        Some(self.store.entry(eid).name.clone())
    }

    /// Finish an enumeration, releasing the hold taken by `opendir`.
    pub fn closedir(&mut self, handle: DirHandle) {
        self.free_inode(handle.dir);
    }

    /// Does `path` resolve to a directory? Open-then-close; succeeds iff
    /// the directory resolves.
    pub fn chdir(&mut self, path: &str) -> VfsResult<()> {
        let handle = self.opendir(path)?;
        self.closedir(handle);
        Ok(())
    }
}
