//! The shared directory-cache core
//!
//! One in-memory representation of directory hierarchies serving a family of
//! filesystems layered over the host: archive readers, where the whole tree
//! is known the moment the archive is opened, and session-based remote
//! filesystems, where directory listings are fetched lazily, time out, and
//! may go stale.
//!
//! The crate provides the cache class [`CacheFS`], generic over a subclass
//! implementing [`dircache_api::fs::ArchiveSupport`]. The class owns the
//! object arena, tracks live superblocks, resolves paths over the two
//! topologies through one interface, follows symlinks with hop-limited loop
//! protection, and exposes the handle-based operation surface: open, read,
//! write, lseek, close, stat, lstat, fstat, readlink, opendir, readdir,
//! closedir, chdir, plus the control and garbage-collection interfaces.
//!
//! Paths handed to the resolvers never begin with the separator; the root of
//! an archive or session is simply the empty string.

#![deny(missing_docs)]

mod class;
mod dir;
mod file;
mod resolve;
mod supers;

pub use crate::class::{CacheFS, Setctl};
pub use crate::dir::DirHandle;
