//! Module containing the types shared by the cache core and its filesystems.
//!
//! The object graph of the cache is expressed as an arena (see
//! [`store`](../store/index.html)) of inodes and entries addressed by integer
//! ids. "Parent" and "named-by" pointers are plain non-owning ids; ownership
//! is the parent-to-child edge plus the `nlink` holds taken by open handles.
//! This keeps the "decrement the link count, destroy at zero" lifetime rule
//! explicit instead of hiding it behind aliased pointers.

use lazy_static::lazy_static;
use std::any::Any;
use std::fs::File;
use std::path::PathBuf;
use std::time::SystemTime;

use bitflags::bitflags;

/// Id of an inode inside a [`Store`](../store/struct.Store.html).
///
/// Also serves as the inode number reported in [`Stat::ino`]: ids are handed
/// out by a per-class monotonic counter starting at 1, so they are unique
/// within every superblock of the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InodeId(pub(crate) u64);

/// Id of a directory entry inside a `Store`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub(crate) u64);

/// Id of a superblock inside a `Store`.
///
/// This is also the opaque value `getid()` hands to the external garbage
/// collector to key idle timers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SuperId(pub(crate) u64);

/// Kind of file-like object an inode represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Regular file
    Regular,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
}

lazy_static! {
    /// Process umask, probed once with the usual set-then-restore dance.
    /// Probing on every stat would race in a threaded host, so the value is
    /// read a single time and cached for the life of the process.
    pub static ref PROCESS_UMASK: u32 = unsafe {
        let prev = libc::umask(0o022);
        libc::umask(prev);
        prev as u32
    };
    /// Real uid of the process, read once.
    pub static ref PROCESS_UID: u32 = unsafe { libc::getuid() as u32 };
    /// Real gid of the process, read once.
    pub static ref PROCESS_GID: u32 = unsafe { libc::getgid() as u32 };
}

/// Metadata block carried by every inode.
///
/// An owned value; operations that report it (`stat`, `lstat`, `fstat`)
/// return copies rather than references into the cache, so callers never
/// alias a buffer the cache may rewrite behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// What kind of object this is.
    pub kind: FileKind,
    /// Permission bits, already masked by the process umask when the stat
    /// was produced by [`Stat::default_for`].
    pub perm: u32,
    /// Inode number, unique within the superblock. Filled by the store.
    pub ino: u64,
    /// Device number of the owning class. Filled by the store.
    pub dev: u64,
    /// Reference count: the number of entries naming this inode plus one for
    /// every transient hold (open file handle, open directory handle).
    /// Maintained by the store and class operations only.
    pub nlink: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning group id.
    pub gid: u32,
    /// Size in bytes.
    pub size: u64,
    /// Access time.
    pub atime: SystemTime,
    /// Modification time.
    pub mtime: SystemTime,
    /// Change time.
    pub ctime: SystemTime,
}

impl Default for Stat {
    fn default() -> Stat {
        Stat {
            kind: FileKind::Regular,
            perm: 0,
            ino: 0,
            dev: 0,
            nlink: 0,
            uid: 0,
            gid: 0,
            size: 0,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
        }
    }
}

impl Stat {
    /// Default metadata for a freshly fabricated object: current uid/gid,
    /// zeroed device and inode number (the store fills those in), size zero,
    /// all timestamps "now", and `perm` masked by the cached process umask.
    pub fn default_for(kind: FileKind, perm: u32) -> Stat {
        let now = SystemTime::now();
        Stat {
            kind,
            perm: perm & !*PROCESS_UMASK,
            ino: 0,
            dev: 0,
            nlink: 0,
            uid: *PROCESS_UID,
            gid: *PROCESS_GID,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }
}

/// Hop budget that follows symbolic links, and serves as loop protection:
/// every hop spends one unit, and a chain longer than this fails with
/// `LinkLoop`.
pub const LINK_FOLLOW: i32 = 15;

/// Sentinel hop budget that leaves symbolic links unresolved.
pub const LINK_NO_FOLLOW: i32 = -1;

bitflags! {
    /// Static properties of a filesystem class.
    pub struct ClassFlags: u32 {
        /// The filesystem cannot be written; `open` with creation is
        /// rejected silently and `write` is refused.
        const READONLY = 1 << 0;
        /// Directory contents are fetched lazily per directory and may go
        /// stale; installs the linear (flat-cache) resolver.
        const REMOTE = 1 << 1;
    }
}

bitflags! {
    /// Modifiers for path resolution. The empty set is the plain lookup.
    pub struct LookupFlags: u32 {
        /// Resolve a trailing symlink instead of returning it.
        const FOLLOW = 1 << 0;
        /// The object looked up is a directory.
        const DIR = 1 << 1;
        /// Locate an existing superblock only; never open a new one.
        const NO_OPEN = 1 << 2;
        /// Fabricate missing path components as directories.
        const MKDIR = 1 << 3;
        /// Fabricate missing path components as regular files.
        const MKFILE = 1 << 4;
    }
}

bitflags! {
    /// Modifiers for `open`. The empty set opens read-only.
    pub struct OpenFlags: u32 {
        /// Open for writing.
        const WRITE = 1 << 0;
        /// Create the file if it does not exist.
        const CREATE = 1 << 1;
        /// Together with `CREATE`, fail if the file already exists.
        const EXCL = 1 << 2;
        /// Truncate an existing local copy on open.
        const TRUNC = 1 << 3;
        /// Request the forward-only streaming read protocol instead of a
        /// local copy. Never forwarded to the host `open`.
        const LINEAR = 1 << 4;
    }
}

/// State machine of a file handle's streaming mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearState {
    /// Random-access handle; reads go through the local copy.
    Off,
    /// Linear mode requested; the stream starts on the first read.
    PreOpen,
    /// The stream is running. Seeking and writing are contract violations.
    Open,
    /// The stream was shut down. Only ever observed if a subclass
    /// mis-implements `linear_start`; reads from this state are fatal.
    Closed,
}

/// A file-like object inside one superblock.
pub struct Inode {
    /// Metadata. `st.nlink` is the live reference count.
    pub st: Stat,
    /// The superblock this inode belongs to, for life.
    pub sup: SuperId,
    /// The single entry naming this inode, if any.
    pub ent: Option<EntryId>,
    /// Ordered child entries. Empty for non-directories.
    pub subdir: Vec<EntryId>,
    /// Symlink target, present on symlinks that carry one.
    pub linkname: Option<String>,
    /// Host file caching this inode's body. Owned by the inode: unlinked
    /// from the host filesystem when the inode is destroyed.
    pub localname: Option<PathBuf>,
    /// Expiry of this directory snapshot, written by the loader. `None`
    /// (and any past instant) means stale.
    pub timestamp: Option<SystemTime>,
    /// Subclass-private slot.
    pub data: Option<Box<dyn Any>>,
}

/// A name in a parent directory, owning one reference to its inode.
pub struct Entry {
    /// The name. Non-empty and separator-free in the tree topology; the
    /// linear topology keys its snapshot entries by full directory path
    /// (the session root is the empty string).
    pub name: String,
    /// The inode this entry names.
    pub ino: InodeId,
    /// The directory inode holding this entry, once inserted.
    pub dir: Option<InodeId>,
}

/// One open archive or remote session.
pub struct Super {
    /// Human-readable identity, filled by `open_archive`. Also what the
    /// default `archive_same` matching compares against.
    pub name: String,
    /// Root directory inode, filled by `open_archive`.
    pub root: Option<InodeId>,
    /// Number of live inodes owned by this superblock.
    pub ino_usage: usize,
    /// Number of open file handles into this superblock. While non-zero the
    /// superblock is pinned; when it drops back to zero the superblock
    /// becomes a candidate for stamp-based reclamation.
    pub fd_usage: usize,
    /// Sticky "do not auto-evict" bit, toggled by the `StaleData` control.
    pub want_stale: bool,
    /// Subclass-private slot.
    pub data: Option<Box<dyn Any>>,
}

/// Per-open-file state.
///
/// Handles are owned by the caller and passed back into the cache for every
/// operation; `close` consumes the handle. Dropping a handle without closing
/// it leaks the `nlink` hold, exactly as losing the pointer did in older
/// cache designs, so don't.
pub struct FileHandle {
    /// The inode this handle reads and writes. Holds one `nlink`.
    pub ino: InodeId,
    /// Byte position used by linear streams and virtual seeks.
    pub pos: u64,
    /// Host descriptor onto `localname`, when a local copy is attached.
    pub file: Option<File>,
    /// Set by writes (and by creation); a changed handle is stored back to
    /// the filesystem on close if the class supports it.
    pub changed: bool,
    /// Streaming-mode state.
    pub linear: LinearState,
    /// Subclass-private slot.
    pub data: Option<Box<dyn Any>>,
}

impl FileHandle {
    /// Fresh handle on `ino`: position zero, no host descriptor, streaming
    /// off.
    pub fn new(ino: InodeId, changed: bool) -> FileHandle {
        FileHandle {
            ino,
            pos: 0,
            file: None,
            changed,
            linear: LinearState::Off,
            data: None,
        }
    }
}

///Tests for the shared types
#[cfg(test)]
mod stat_tests {
    use super::*;

    #[test]
    fn default_stat() {
        let st = Stat::default_for(FileKind::Directory, 0o777);
        assert_eq!(st.kind, FileKind::Directory);
        //The umask was applied, whatever the environment set it to
        assert_eq!(st.perm, 0o777 & !*PROCESS_UMASK);
        assert_eq!(st.perm & *PROCESS_UMASK, 0);
        //Device and inode number are left for the store to fill
        assert_eq!(st.ino, 0);
        assert_eq!(st.dev, 0);
        assert_eq!(st.nlink, 0);
        assert_eq!(st.size, 0);
        assert_eq!(st.uid, *PROCESS_UID);
        assert_eq!(st.gid, *PROCESS_GID);
        assert_eq!(st.atime, st.mtime);
    }

    #[test]
    fn fresh_handle() {
        let fh = FileHandle::new(InodeId(7), true);
        assert_eq!(fh.ino, InodeId(7));
        assert_eq!(fh.pos, 0);
        assert!(fh.file.is_none());
        assert!(fh.changed);
        assert_eq!(fh.linear, LinearState::Off);
    }
}
