//! Maps `tinyfat_err::Error` onto the POSIX error codes `fuser` expects in
//! a `Reply*::error` call. spec.md §9.1 assigns this mapping to "the
//! bridge", not the core, on purpose: the core's error kinds are named
//! abstractly so a non-POSIX host could map them differently.

use tinyfat_err::Error;

pub fn to_errno(err: Error) -> libc::c_int {
    match err {
        Error::NotADirectory => libc::ENOTDIR,
        Error::IsADirectory => libc::EISDIR,
        Error::NoSuchEntry => libc::ENOENT,
        Error::NameTooLong => libc::ENAMETOOLONG,
        Error::InvalidPath => libc::EINVAL,
        Error::NotEmpty => libc::ENOTEMPTY,
        Error::NoSpace => libc::ENOSPC,
        Error::OutOfMemory => libc::ENOMEM,
        Error::Corrupt => libc::EIO,
    }
}
