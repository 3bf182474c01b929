//! The hook contract filesystem authors implement.
//!
//! The cache core is generic over one subclass type implementing
//! [`ArchiveSupport`]. Identity hooks (naming, opening, matching archives)
//! are required; everything else defaults to "absent". Optional capability
//! surfaces (lazy directory loading, the linear streaming protocol,
//! random-access handle hooks, write-back) are modelled as accessors
//! returning `Option<&mut dyn …>`, so an unused capability is explicitly
//! absent rather than a null pointer checked at every call site. A subclass
//! that has a capability typically implements the capability trait on
//! itself and returns `Some(self)` from the accessor.
//!
//! Hooks receive the class [`Store`] mutably and build their object graphs
//! directly through it. The `init_inode`/`init_entry` hooks fire for
//! objects the *core* fabricates (automake, snapshot directories, open with
//! creation); objects a subclass creates itself are the subclass's own to
//! initialize.

use std::any::Any;
use std::time::SystemTime;

use crate::error::VfsResult;
use crate::store::Store;
use crate::types::{
    ClassFlags, Entry, FileHandle, Inode, InodeId, OpenFlags, SuperId,
};

/// Verdict of [`ArchiveSupport::archive_same`] while the registry scans for
/// an existing superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    /// Not this one; keep scanning.
    Other,
    /// This superblock serves the requested archive; reuse it.
    Same,
    /// Not this one, and no later superblock can match either.
    Stop,
}

/// Opaque token produced by [`ArchiveSupport::archive_check`] and handed to
/// every `archive_same` call of the same lookup, so the subclass can parse
/// the archive identity once per resolution.
#[derive(Default)]
pub struct Cookie(
    /// The subclass payload, if any.
    pub Option<Box<dyn Any>>,
);

/// Identity of the archive or session a path refers to, as produced by
/// [`ArchiveSupport::dissect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveId<'a> {
    /// The archive or host part of the path.
    pub name: &'a str,
    /// The operator between `#` and the first separator, if any.
    pub op: Option<&'a str>,
}

/// Lazy directory loading, required by remote (linear-resolver) classes.
pub trait DirLoad {
    /// Populate the freshly created snapshot inode `dir` with the entries
    /// of the remote directory `path`, and set `dir`'s expiry timestamp.
    fn dir_load(&mut self, store: &mut Store, dir: InodeId, path: &str) -> VfsResult<()>;
}

/// The forward-only streaming read protocol, for filesystems where random
/// access is impossible.
pub trait LinearRead {
    /// Start streaming `fh`'s inode at byte `pos`. On success the subclass
    /// *must* move `fh.linear` to `LinearState::Open`; leaving it anywhere
    /// else is treated as a fatal contract violation by the core.
    fn linear_start(&mut self, store: &mut Store, fh: &mut FileHandle, pos: u64) -> VfsResult<()>;

    /// Read the next chunk of the stream into `buf`; 0 means end of file.
    fn linear_read(
        &mut self,
        store: &mut Store,
        fh: &mut FileHandle,
        buf: &mut [u8],
    ) -> VfsResult<usize>;

    /// Shut the stream down.
    fn linear_close(&mut self, store: &mut Store, fh: &mut FileHandle);
}

/// Random-access handle lifecycle hooks.
pub trait HandleOps {
    /// Called while `open` assembles a non-linear handle, before the local
    /// copy is opened; the usual job is to materialize `localname`.
    fn fh_open(
        &mut self,
        store: &mut Store,
        fh: &mut FileHandle,
        flags: OpenFlags,
        perm: u32,
    ) -> VfsResult<()>;

    /// Called while `close` tears the handle down.
    fn fh_close(&mut self, store: &mut Store, fh: &mut FileHandle) -> VfsResult<()>;
}

/// Write-back on close, for writable remote filesystems.
pub trait StoreBack {
    /// Upload the changed local copy at `local` to `full_path` within the
    /// session.
    fn file_store(
        &mut self,
        store: &mut Store,
        fh: &mut FileHandle,
        full_path: &str,
        local: &std::path::Path,
    ) -> VfsResult<()>;
}

/// The subclass contract. One implementation per filesystem kind.
pub trait ArchiveSupport {
    /// Short class name, used in user messages and temp-file prefixes.
    fn name(&self) -> &str;

    /// Static class properties. Defaults to a writable tree filesystem.
    fn flags(&self) -> ClassFlags {
        ClassFlags::empty()
    }

    /// Split a raw boundary path into the archive identity and the local
    /// remainder. The default implements the `archive#op/path` grammar;
    /// classes with another addressing scheme override it.
    fn dissect<'a>(&self, raw: &'a str) -> (ArchiveId<'a>, Option<&'a str>) {
        match raw.rfind('#') {
            Some(i) => {
                let archive = &raw[..i];
                let rest = &raw[i + 1..];
                match rest.find('/') {
                    Some(j) => {
                        let op = &rest[..j];
                        (
                            ArchiveId {
                                name: archive,
                                op: if op.is_empty() { None } else { Some(op) },
                            },
                            Some(&rest[j + 1..]),
                        )
                    }
                    None => (
                        ArchiveId {
                            name: archive,
                            op: if rest.is_empty() { None } else { Some(rest) },
                        },
                        None,
                    ),
                }
            }
            None => (ArchiveId { name: raw, op: None }, None),
        }
    }

    /// Pre-validate an archive identity before the registry scan. Returning
    /// `None` aborts the lookup silently; the returned cookie is passed to
    /// every `archive_same` call of this lookup.
    fn archive_check(&mut self, _archive: &ArchiveId<'_>) -> Option<Cookie> {
        Some(Cookie::default())
    }

    /// Does the live superblock `sup` serve `archive`?
    fn archive_same(
        &self,
        store: &Store,
        sup: SuperId,
        archive: &ArchiveId<'_>,
        cookie: &Cookie,
    ) -> ScanVerdict;

    /// Open the archive or session, filling `name` and `root` on the
    /// superblock `sup`. A root that should survive directory holds needs
    /// its `nlink` pinned to 1, since no entry ever names it.
    fn open_archive(
        &mut self,
        store: &mut Store,
        sup: SuperId,
        archive: &ArchiveId<'_>,
    ) -> VfsResult<()>;

    /// Tear down subclass state attached to a dying superblock.
    fn free_archive(&mut self, _store: &mut Store, _sup: SuperId) {}

    /// Lazy initialization of core-created inodes.
    fn init_inode(&mut self, _ino: &mut Inode) {}

    /// Lazy initialization of core-created entries.
    fn init_entry(&mut self, _ent: &mut Entry) {}

    /// Destructor for subclass-private inode state. Runs after the inode's
    /// children are gone and before its local copy is unlinked.
    fn drop_inode(&mut self, _ino: &mut Inode) {}

    /// Is the directory snapshot `ino` still fresh? The default compares
    /// the wall clock against the expiry the loader stored: fresh iff now
    /// is strictly earlier. The core consumes the one-shot flush flag
    /// before ever asking.
    fn dir_uptodate(&self, ino: &Inode) -> bool {
        match ino.timestamp {
            Some(expiry) => SystemTime::now() < expiry,
            None => false,
        }
    }

    /// Lazy directory loading; required when `ClassFlags::REMOTE` is set.
    fn dir_loader(&mut self) -> Option<&mut dyn DirLoad> {
        None
    }

    /// The streaming read protocol, if the filesystem has one.
    fn linear(&mut self) -> Option<&mut dyn LinearRead> {
        None
    }

    /// Random-access handle hooks, if the filesystem needs them.
    fn handle_ops(&mut self) -> Option<&mut dyn HandleOps> {
        None
    }

    /// Write-back on close, if the filesystem is writable end-to-end.
    fn store_back(&mut self) -> Option<&mut dyn StoreBack> {
        None
    }
}
