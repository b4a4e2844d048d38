//! Native status codes and the translation from protocol error numbers.
//!
//! The dispatch layer above this crate speaks NTSTATUS: a 32-bit value whose two top bits
//! give the severity. Every reply error is folded into one of these before it is reported to
//! whatever triggered the operation.

use std::fmt;

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

use crate::ll::Errno;

/// Native status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct NtStatus(pub u32);

#[allow(missing_docs)]
impl NtStatus {
    pub const SUCCESS: NtStatus = NtStatus(0x0000_0000);
    pub const PENDING: NtStatus = NtStatus(0x0000_0103);
    pub const DEVICE_BUSY: NtStatus = NtStatus(0x8000_0011);
    pub const NOT_IMPLEMENTED: NtStatus = NtStatus(0xC000_0002);
    pub const ACCESS_VIOLATION: NtStatus = NtStatus(0xC000_0005);
    pub const INVALID_HANDLE: NtStatus = NtStatus(0xC000_0008);
    pub const INVALID_PARAMETER: NtStatus = NtStatus(0xC000_000D);
    pub const NO_SUCH_DEVICE: NtStatus = NtStatus(0xC000_000E);
    pub const INVALID_DEVICE_REQUEST: NtStatus = NtStatus(0xC000_0010);
    pub const ACCESS_DENIED: NtStatus = NtStatus(0xC000_0022);
    pub const OBJECT_NAME_INVALID: NtStatus = NtStatus(0xC000_0033);
    pub const OBJECT_NAME_NOT_FOUND: NtStatus = NtStatus(0xC000_0034);
    pub const OBJECT_NAME_COLLISION: NtStatus = NtStatus(0xC000_0035);
    pub const SHARING_VIOLATION: NtStatus = NtStatus(0xC000_0043);
    pub const QUOTA_EXCEEDED: NtStatus = NtStatus(0xC000_0044);
    pub const LOCK_NOT_GRANTED: NtStatus = NtStatus(0xC000_0055);
    pub const REVISION_MISMATCH: NtStatus = NtStatus(0xC000_0059);
    pub const DISK_FULL: NtStatus = NtStatus(0xC000_007F);
    pub const INTEGER_OVERFLOW: NtStatus = NtStatus(0xC000_0095);
    pub const FILE_INVALID: NtStatus = NtStatus(0xC000_0098);
    pub const INSUFFICIENT_RESOURCES: NtStatus = NtStatus(0xC000_009A);
    pub const MEDIA_WRITE_PROTECTED: NtStatus = NtStatus(0xC000_00A2);
    pub const IO_TIMEOUT: NtStatus = NtStatus(0xC000_00B5);
    pub const FILE_IS_A_DIRECTORY: NtStatus = NtStatus(0xC000_00BA);
    pub const NOT_SUPPORTED: NtStatus = NtStatus(0xC000_00BB);
    pub const INVALID_NETWORK_RESPONSE: NtStatus = NtStatus(0xC000_00C3);
    pub const NOT_SAME_DEVICE: NtStatus = NtStatus(0xC000_00D4);
    pub const CANT_WAIT: NtStatus = NtStatus(0xC000_00D8);
    pub const DIRECTORY_NOT_EMPTY: NtStatus = NtStatus(0xC000_0101);
    pub const NOT_A_DIRECTORY: NtStatus = NtStatus(0xC000_0103);
    pub const NAME_TOO_LONG: NtStatus = NtStatus(0xC000_0106);
    pub const TOO_MANY_OPENED_FILES: NtStatus = NtStatus(0xC000_011F);
    pub const CANCELLED: NtStatus = NtStatus(0xC000_0120);
    pub const PIPE_BROKEN: NtStatus = NtStatus(0xC000_014B);
    pub const IO_DEVICE_ERROR: NtStatus = NtStatus(0xC000_0185);
    pub const POSSIBLE_DEADLOCK: NtStatus = NtStatus(0xC000_0194);
    pub const CONNECTION_RESET: NtStatus = NtStatus(0xC000_020D);
    pub const CONNECTION_REFUSED: NtStatus = NtStatus(0xC000_0236);
    pub const CONNECTION_ABORTED: NtStatus = NtStatus(0xC000_0241);
    pub const TOO_MANY_LINKS: NtStatus = NtStatus(0xC000_0265);
    pub const REPARSE_POINT_NOT_RESOLVED: NtStatus = NtStatus(0xC000_0280);
    pub const FILE_TOO_LARGE: NtStatus = NtStatus(0xC000_0904);
}

impl NtStatus {
    /// Success and informational codes; everything below the warning severity.
    pub fn is_success(self) -> bool {
        self.0 < 0x8000_0000
    }

    /// Error severity.
    pub fn is_error(self) -> bool {
        self.0 >= 0xC000_0000
    }
}

impl Default for NtStatus {
    fn default() -> Self {
        NtStatus::SUCCESS
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Maps a protocol error number to a native failure status.
///
/// Implementations must be total: an error number they do not recognise still yields a
/// failure status.
pub trait StatusTranslator: Send + Sync {
    /// Translate a non-zero protocol error.
    fn translate(&self, errno: Errno) -> NtStatus;
}

/// The fixed errno table used unless the session is given another translator.
///
/// Unrecognised numbers map to [`NtStatus::ACCESS_DENIED`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrnoTranslator;

impl StatusTranslator for ErrnoTranslator {
    fn translate(&self, errno: Errno) -> NtStatus {
        match errno.code() {
            libc::EPERM | libc::EACCES => NtStatus::ACCESS_DENIED,
            libc::ENOENT => NtStatus::OBJECT_NAME_NOT_FOUND,
            libc::EINTR | libc::ECANCELED => NtStatus::CANCELLED,
            libc::EIO => NtStatus::IO_DEVICE_ERROR,
            libc::ENXIO | libc::ENODEV => NtStatus::NO_SUCH_DEVICE,
            libc::EBADF => NtStatus::INVALID_HANDLE,
            libc::EAGAIN => NtStatus::CANT_WAIT,
            libc::ENOMEM => NtStatus::INSUFFICIENT_RESOURCES,
            libc::EFAULT => NtStatus::ACCESS_VIOLATION,
            libc::EBUSY => NtStatus::DEVICE_BUSY,
            libc::EEXIST => NtStatus::OBJECT_NAME_COLLISION,
            libc::EXDEV => NtStatus::NOT_SAME_DEVICE,
            libc::ENOTDIR => NtStatus::NOT_A_DIRECTORY,
            libc::EISDIR => NtStatus::FILE_IS_A_DIRECTORY,
            libc::EINVAL => NtStatus::INVALID_PARAMETER,
            libc::ENFILE | libc::EMFILE => NtStatus::TOO_MANY_OPENED_FILES,
            libc::ETXTBSY => NtStatus::SHARING_VIOLATION,
            libc::EFBIG => NtStatus::FILE_TOO_LARGE,
            libc::ENOSPC => NtStatus::DISK_FULL,
            libc::ESPIPE => NtStatus::INVALID_PARAMETER,
            libc::EROFS => NtStatus::MEDIA_WRITE_PROTECTED,
            libc::EMLINK => NtStatus::TOO_MANY_LINKS,
            libc::EPIPE => NtStatus::PIPE_BROKEN,
            libc::ERANGE | libc::EOVERFLOW => NtStatus::INTEGER_OVERFLOW,
            libc::EDEADLK => NtStatus::POSSIBLE_DEADLOCK,
            libc::ENAMETOOLONG => NtStatus::NAME_TOO_LONG,
            libc::ENOLCK => NtStatus::LOCK_NOT_GRANTED,
            libc::ENOSYS => NtStatus::NOT_IMPLEMENTED,
            libc::ENOTEMPTY => NtStatus::DIRECTORY_NOT_EMPTY,
            libc::ELOOP => NtStatus::REPARSE_POINT_NOT_RESOLVED,
            libc::EPROTO => NtStatus::INVALID_NETWORK_RESPONSE,
            libc::ENOTSUP => NtStatus::NOT_SUPPORTED,
            libc::ECONNABORTED | libc::ENOTCONN => NtStatus::CONNECTION_ABORTED,
            libc::ECONNRESET => NtStatus::CONNECTION_RESET,
            libc::ECONNREFUSED => NtStatus::CONNECTION_REFUSED,
            libc::ETIMEDOUT => NtStatus::IO_TIMEOUT,
            libc::ESTALE => NtStatus::FILE_INVALID,
            libc::EDQUOT => NtStatus::QUOTA_EXCEEDED,
            _ => NtStatus::ACCESS_DENIED,
        }
    }
}
