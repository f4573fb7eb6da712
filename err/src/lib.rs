//! Error kinds shared by the region engine (`tinyfat`) and the mount-host
//! bridge (`tinyfat-fuse`). Kept as a standalone crate so the bridge can
//! depend on the error type without pulling in the allocator/resolver code.

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// An interior path component named a file, or a directory was required
    /// where a file was found.
    #[error("not a directory")]
    NotADirectory,
    /// A file was required where a directory was found.
    #[error("is a directory")]
    IsADirectory,
    /// The final path component does not exist.
    #[error("no such entry")]
    NoSuchEntry,
    /// A path component is longer than the 32-byte (including terminator)
    /// name limit.
    #[error("name too long")]
    NameTooLong,
    /// The path does not begin with `/`.
    #[error("invalid path")]
    InvalidPath,
    /// `rmdir` on a non-empty directory, or `rename` onto a non-empty
    /// directory.
    #[error("directory not empty")]
    NotEmpty,
    /// The block allocator has no free blocks left.
    #[error("no space left on device")]
    NoSpace,
    /// A transient (host) allocation failed.
    #[error("out of memory")]
    OutOfMemory,
    /// An invariant of the on-region format was violated (a block chain
    /// loops, a directory entry points at a block that isn't allocated, a
    /// directory's stream size isn't a multiple of the entry size...).
    #[error("filesystem corrupt")]
    Corrupt,
}

pub type Result<T> = core::result::Result<T, Error>;
