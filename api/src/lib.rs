//! Shared directory-cache primitives
//!
//! This crate contains everything a filesystem author needs to plug a new
//! archive- or session-based filesystem into the cache core: the common data
//! model (inodes, entries, superblocks and their id types), the arena that
//! owns them, the error taxonomy, and the hook traits the core dispatches
//! through.
//!
//! The cache core itself lives in the sibling `dircache_core` crate; this
//! split keeps the contract filesystem authors code against small and stable.

#![deny(missing_docs)]

pub mod error;

//Basic modules for types
pub mod types;

//The arena owning every inode, entry and superblock
pub mod store;

//Traits filesystem authors implement
pub mod fs;
