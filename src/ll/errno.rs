//! Protocol error numbers.
//!
//! A reply header carries either zero or a negated errno value. The numbering is the host's
//! `errno.h`, which is what every FUSE server on the other end of the channel uses as well.

use std::fmt;
use std::num::NonZeroI32;

/// A non-zero protocol error number, always stored positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub(crate) NonZeroI32);

impl Errno {
    /// Operation not permitted
    pub const EPERM: Errno = Errno::from_const(libc::EPERM);
    /// No such file or directory
    pub const ENOENT: Errno = Errno::from_const(libc::ENOENT);
    /// Interrupted system call
    pub const EINTR: Errno = Errno::from_const(libc::EINTR);
    /// I/O error
    pub const EIO: Errno = Errno::from_const(libc::EIO);
    /// No such device or address
    pub const ENXIO: Errno = Errno::from_const(libc::ENXIO);
    /// Bad file number
    pub const EBADF: Errno = Errno::from_const(libc::EBADF);
    /// Try again
    pub const EAGAIN: Errno = Errno::from_const(libc::EAGAIN);
    /// Out of memory
    pub const ENOMEM: Errno = Errno::from_const(libc::ENOMEM);
    /// Permission denied
    pub const EACCES: Errno = Errno::from_const(libc::EACCES);
    /// Bad address
    pub const EFAULT: Errno = Errno::from_const(libc::EFAULT);
    /// Device or resource busy
    pub const EBUSY: Errno = Errno::from_const(libc::EBUSY);
    /// File exists
    pub const EEXIST: Errno = Errno::from_const(libc::EEXIST);
    /// Cross-device link
    pub const EXDEV: Errno = Errno::from_const(libc::EXDEV);
    /// No such device
    pub const ENODEV: Errno = Errno::from_const(libc::ENODEV);
    /// Not a directory
    pub const ENOTDIR: Errno = Errno::from_const(libc::ENOTDIR);
    /// Is a directory
    pub const EISDIR: Errno = Errno::from_const(libc::EISDIR);
    /// Invalid argument
    pub const EINVAL: Errno = Errno::from_const(libc::EINVAL);
    /// File table overflow
    pub const ENFILE: Errno = Errno::from_const(libc::ENFILE);
    /// Too many open files
    pub const EMFILE: Errno = Errno::from_const(libc::EMFILE);
    /// Text file busy
    pub const ETXTBSY: Errno = Errno::from_const(libc::ETXTBSY);
    /// File too large
    pub const EFBIG: Errno = Errno::from_const(libc::EFBIG);
    /// No space left on device
    pub const ENOSPC: Errno = Errno::from_const(libc::ENOSPC);
    /// Illegal seek
    pub const ESPIPE: Errno = Errno::from_const(libc::ESPIPE);
    /// Read-only file system
    pub const EROFS: Errno = Errno::from_const(libc::EROFS);
    /// Too many links
    pub const EMLINK: Errno = Errno::from_const(libc::EMLINK);
    /// Broken pipe
    pub const EPIPE: Errno = Errno::from_const(libc::EPIPE);
    /// Math result not representable
    pub const ERANGE: Errno = Errno::from_const(libc::ERANGE);
    /// Resource deadlock would occur
    pub const EDEADLK: Errno = Errno::from_const(libc::EDEADLK);
    /// File name too long
    pub const ENAMETOOLONG: Errno = Errno::from_const(libc::ENAMETOOLONG);
    /// No record locks available
    pub const ENOLCK: Errno = Errno::from_const(libc::ENOLCK);
    /// Function not implemented
    pub const ENOSYS: Errno = Errno::from_const(libc::ENOSYS);
    /// Directory not empty
    pub const ENOTEMPTY: Errno = Errno::from_const(libc::ENOTEMPTY);
    /// Too many symbolic links encountered
    pub const ELOOP: Errno = Errno::from_const(libc::ELOOP);
    /// No data available
    pub const ENODATA: Errno = Errno::from_const(libc::ENODATA);
    /// Protocol error
    pub const EPROTO: Errno = Errno::from_const(libc::EPROTO);
    /// Value too large for defined data type
    pub const EOVERFLOW: Errno = Errno::from_const(libc::EOVERFLOW);
    /// Operation not supported
    pub const ENOTSUP: Errno = Errno::from_const(libc::ENOTSUP);
    /// Connection aborted
    pub const ECONNABORTED: Errno = Errno::from_const(libc::ECONNABORTED);
    /// Connection reset by peer
    pub const ECONNRESET: Errno = Errno::from_const(libc::ECONNRESET);
    /// Not connected
    pub const ENOTCONN: Errno = Errno::from_const(libc::ENOTCONN);
    /// Timed out
    pub const ETIMEDOUT: Errno = Errno::from_const(libc::ETIMEDOUT);
    /// Connection refused
    pub const ECONNREFUSED: Errno = Errno::from_const(libc::ECONNREFUSED);
    /// Stale file handle
    pub const ESTALE: Errno = Errno::from_const(libc::ESTALE);
    /// Quota exceeded
    pub const EDQUOT: Errno = Errno::from_const(libc::EDQUOT);
    /// Operation canceled
    pub const ECANCELED: Errno = Errno::from_const(libc::ECANCELED);

    const fn from_const(code: i32) -> Errno {
        match NonZeroI32::new(code) {
            Some(code) => Errno(code),
            None => panic!("errno constant must be non-zero"),
        }
    }

    /// Builds an errno from the `error` field of a reply header. Servers send negated
    /// values; both signs are accepted. Returns `None` for zero.
    pub fn from_wire(error: i32) -> Option<Errno> {
        NonZeroI32::new(error.checked_abs().unwrap_or(i32::MAX)).map(Errno)
    }

    /// The positive errno value.
    pub fn code(&self) -> i32 {
        self.0.get()
    }

    /// The value as it appears in a reply header.
    pub(crate) fn to_wire(self) -> i32 {
        -self.0.get()
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

impl From<Errno> for i32 {
    fn from(errno: Errno) -> Self {
        errno.code()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_wire_accepts_both_signs() {
        assert_eq!(Errno::from_wire(-libc::ENOENT), Some(Errno::ENOENT));
        assert_eq!(Errno::from_wire(libc::ENOENT), Some(Errno::ENOENT));
        assert_eq!(Errno::from_wire(0), None);
    }

    #[test]
    fn from_wire_saturates_min() {
        assert_eq!(Errno::from_wire(i32::MIN).map(|e| e.code()), Some(i32::MAX));
    }

    #[test]
    fn wire_is_negated() {
        assert_eq!(Errno::EIO.to_wire(), -libc::EIO);
    }
}
