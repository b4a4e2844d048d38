//! Low-level wire protocol: ABI structures, request framing and reply decoding.

mod argument;
pub(crate) mod errno;
pub(crate) mod flags;
pub(crate) mod fuse_abi;
pub(crate) mod reply;
pub(crate) mod request;

use std::fmt;

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

pub(crate) use argument::ArgumentIterator;
pub use errno::Errno;

/// Inode number, the protocol-level identifier of a file system object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct INodeNo(pub u64);

impl INodeNo {
    /// The root directory of the mounted file system.
    pub const ROOT: INodeNo = INodeNo(fuse_abi::FUSE_ROOT_ID);
}

impl From<INodeNo> for u64 {
    fn from(ino: INodeNo) -> Self {
        ino.0
    }
}

impl fmt::Display for INodeNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation token of one in-flight operation.
///
/// Written into the `unique` field of the request header and echoed by the server in the
/// reply. The low 32 bits select a slot in the session's context table and the high 32 bits
/// carry the slot's generation, so a token is never reused while its operation is
/// outstanding and a stale token can be recognised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Unique(pub u64);

impl Unique {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        Unique((u64::from(generation) << 32) | u64::from(index))
    }

    pub(crate) fn index(self) -> usize {
        (self.0 & u64::from(u32::MAX)) as usize
    }

    pub(crate) fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Display for Unique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Protocol version, as exchanged in Init.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Version(pub u32, pub u32);

impl Version {
    /// The version this driver declares in its Init request.
    pub const CURRENT: Version = Version(
        fuse_abi::FUSE_KERNEL_VERSION,
        fuse_abi::FUSE_KERNEL_MINOR_VERSION,
    );

    /// Major version.
    pub fn major(&self) -> u32 {
        self.0
    }

    /// Minor version.
    pub fn minor(&self) -> u32 {
        self.1
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0, self.1)
    }
}

#[cfg(test)]
mod test {
    #[test]
    fn unique_packs_index_and_generation() {
        let unique = super::Unique::new(7, 3);
        assert_eq!(unique.0, 0x0000_0003_0000_0007);
        assert_eq!(unique.index(), 7);
        assert_eq!(unique.generation(), 3);
    }
}
