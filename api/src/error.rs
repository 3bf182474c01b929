//! The error taxonomy shared by the cache core and its filesystems.
//!
//! Every operation of the cache surfaces its failure as a [`VfsError`]; the
//! class additionally keeps the errno of the last failed operation so hosts
//! that speak POSIX can read it back through `ferrno()`. The mapping from
//! variants to errno values lives in [`VfsError::as_errno`].
//!
//! Subclass hooks that fail for reasons the taxonomy does not name (a
//! garbled server listing, say) can wrap any error into the `Other` variant
//! through [`anyhow`], and interact nicely with the `?` operator while doing
//! so.

use std::io;
use thiserror::Error;

/// Error type used by every cache operation.
///
/// The `#[error]` tag takes care of the `Display` aspect of the errors. The
/// `#[from]` tag on `Io` generates a `From<io::Error>` implementation, so
/// host syscall failures convert with the `?` operator and keep their
/// original errno.
#[derive(Error, Debug)]
pub enum VfsError {
    /// A path component does not exist.
    #[error("no such file or directory")]
    NotFound,
    /// A non-directory was found where a directory was required.
    #[error("not a directory")]
    NotDirectory,
    /// A directory was found where a file was required.
    #[error("is a directory")]
    IsDirectory,
    /// The target exists and the caller asked for exclusive creation.
    #[error("file exists")]
    Exists,
    /// A symlink chain exhausted its hop budget.
    #[error("too many levels of symbolic links")]
    LinkLoop,
    /// The operation does not apply to this kind of inode.
    #[error("invalid argument")]
    InvalidArgument,
    /// A symlink carries no target string.
    #[error("malformed symbolic link")]
    DanglingLink,
    /// The archive or session could not be opened or spoken to.
    #[error("archive input/output error")]
    ArchiveIo,
    /// The inode is no longer named by any entry.
    #[error("entry is detached from the tree")]
    Detached,
    /// Write access on a read-only filesystem. Surfaced without touching
    /// the class errno; see the open() contract.
    #[error("filesystem is read-only")]
    ReadOnly,
    /// `archive_check` vetoed the archive. Silent by contract.
    #[error("archive rejected by the filesystem")]
    Rejected,
    /// The filesystem does not provide the needed capability.
    #[error("operation not supported by this filesystem")]
    Unsupported,
    /// A transfer was cancelled through the interrupt flag. The partial
    /// local copy has already been cleaned up.
    #[error("transfer interrupted")]
    Interrupted,
    /// A host syscall failed; the original errno is preserved.
    #[error("host I/O error")]
    Io(#[from] io::Error),
    /// Subclass-specific failure carrying its own context.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VfsError {
    /// POSIX errno for this error, for hosts that read `ferrno()`.
    pub fn as_errno(&self) -> i32 {
        match self {
            VfsError::NotFound => libc::ENOENT,
            VfsError::NotDirectory => libc::ENOTDIR,
            VfsError::IsDirectory => libc::EISDIR,
            VfsError::Exists => libc::EEXIST,
            VfsError::LinkLoop => libc::ELOOP,
            VfsError::InvalidArgument => libc::EINVAL,
            VfsError::DanglingLink => libc::EFAULT,
            VfsError::ArchiveIo => libc::EIO,
            VfsError::Detached => libc::EAGAIN,
            VfsError::ReadOnly => libc::EROFS,
            VfsError::Rejected => 0,
            VfsError::Unsupported => libc::EIO,
            VfsError::Interrupted => libc::EINTR,
            VfsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            VfsError::Other(_) => libc::EIO,
        }
    }
}

/// Generic alias for a `Result` with the error type `VfsError`.
pub type VfsResult<T> = std::result::Result<T, VfsError>;
