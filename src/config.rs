//! Session configuration and the values negotiated by Init.

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

use crate::ll::Version;
use crate::ll::flags::init_flags::InitFlags;
use crate::ll::fuse_abi as abi;
use crate::ll::fuse_abi::consts::FUSE_BUFFER_HEADER_SIZE;
use crate::ll::fuse_abi::consts::FUSE_MAX_FRAME_SIZE;
use crate::ll::fuse_abi::consts::FUSE_MIN_READ_BUFFER;
use crate::ll::request::HEADER_SIZE;

/// Default limit on Lookup name length, in bytes
const DEFAULT_MAX_NAME_LEN: usize = 255;

/// Default capacity of the context table
const DEFAULT_MAX_CONTEXTS: usize = 4096;

/// Smallest frame every request kind fits in
const MIN_FRAME_SIZE: usize = HEADER_SIZE + size_of::<abi::fuse_init_in>();

/// Static configuration of a session
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SessionConfig {
    max_frame_size: usize,
    max_name_len: usize,
    max_readahead: u32,
    init_flags: InitFlags,
    max_contexts: usize,
    batch_forget: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_frame_size: FUSE_MIN_READ_BUFFER,
            max_name_len: DEFAULT_MAX_NAME_LEN,
            max_readahead: 0,
            init_flags: InitFlags::empty(),
            max_contexts: DEFAULT_MAX_CONTEXTS,
            batch_forget: true,
        }
    }
}

impl SessionConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame size used until Init has negotiated one
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Set the frame size used until Init has negotiated one
    ///
    /// On success returns the previous value. On error returns the nearest value which will succeed
    pub fn set_max_frame_size(&mut self, value: usize) -> Result<usize, usize> {
        if value < MIN_FRAME_SIZE {
            return Err(MIN_FRAME_SIZE);
        }
        if value > FUSE_MAX_FRAME_SIZE {
            return Err(FUSE_MAX_FRAME_SIZE);
        }
        let previous = self.max_frame_size;
        self.max_frame_size = value;
        Ok(previous)
    }

    /// Longest Lookup name accepted, in bytes
    pub fn max_name_len(&self) -> usize {
        self.max_name_len
    }

    /// Set the longest Lookup name accepted
    pub fn set_max_name_len(&mut self, value: usize) -> &mut Self {
        self.max_name_len = value;
        self
    }

    /// Readahead offered in Init
    pub fn max_readahead(&self) -> u32 {
        self.max_readahead
    }

    /// Set the readahead offered in Init
    pub fn set_max_readahead(&mut self, value: u32) -> &mut Self {
        self.max_readahead = value;
        self
    }

    /// Capabilities offered in Init
    pub fn init_flags(&self) -> InitFlags {
        self.init_flags
    }

    /// Add capabilities to offer in Init
    pub fn add_init_flags(&mut self, flags: InitFlags) -> &mut Self {
        self.init_flags |= flags;
        self
    }

    /// Capacity of the context table
    pub fn max_contexts(&self) -> usize {
        self.max_contexts
    }

    /// Set the capacity of the context table
    ///
    /// On success returns the previous value. On error returns the nearest value which will succeed
    pub fn set_max_contexts(&mut self, value: usize) -> Result<usize, usize> {
        if value == 0 {
            return Err(1);
        }
        let previous = self.max_contexts;
        self.max_contexts = value;
        Ok(previous)
    }

    /// Whether multi-entry forget lists go out as BatchForget
    pub fn batch_forget(&self) -> bool {
        self.batch_forget
    }

    /// Enable or disable BatchForget
    pub fn set_batch_forget(&mut self, enabled: bool) -> &mut Self {
        self.batch_forget = enabled;
        self
    }

    /// What the session assumes before Init completes
    pub(crate) fn initial(&self) -> Negotiated {
        Negotiated {
            version: Version::CURRENT,
            flags: InitFlags::empty(),
            max_readahead: self.max_readahead,
            max_write: 0,
            max_frame_size: self.max_frame_size,
        }
    }
}

/// Values learned from the Init reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Negotiated {
    /// Protocol version in effect
    pub version: Version,
    /// Capabilities granted by the server
    pub flags: InitFlags,
    /// Readahead granted by the server
    pub max_readahead: u32,
    /// Largest write payload the server accepts
    pub max_write: u32,
    /// Frame capacity of contexts created from now on
    pub max_frame_size: usize,
}

impl Negotiated {
    /// Frame size matching a server's `max_write`
    pub(crate) fn frame_size_for(max_write: u32) -> usize {
        (max_write as usize)
            .saturating_add(FUSE_BUFFER_HEADER_SIZE)
            .clamp(FUSE_MIN_READ_BUFFER, FUSE_MAX_FRAME_SIZE)
    }

    /// Whether the server understands BatchForget
    pub fn supports_batch_forget(&self) -> bool {
        self.version.minor() >= abi::FUSE_BATCH_FORGET_MINOR_VERSION
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.max_frame_size(), 8192);
        assert_eq!(config.max_name_len(), 255);
        assert_eq!(config.max_readahead(), 0);
        assert!(config.init_flags().is_empty());
        assert!(config.batch_forget());
    }

    #[test]
    fn frame_size_bounds() {
        let mut config = SessionConfig::new();
        assert_eq!(config.set_max_frame_size(10), Err(56));
        assert_eq!(config.set_max_frame_size(56), Ok(8192));
        assert_eq!(
            config.set_max_frame_size(usize::MAX),
            Err(FUSE_MAX_FRAME_SIZE)
        );
        assert_eq!(config.max_frame_size(), 56);
    }

    #[test]
    fn negotiated_frame_size() {
        assert_eq!(Negotiated::frame_size_for(0), 8192);
        assert_eq!(Negotiated::frame_size_for(128 * 1024), 128 * 1024 + 4096);
        assert_eq!(Negotiated::frame_size_for(u32::MAX), FUSE_MAX_FRAME_SIZE);
    }

    #[test]
    fn batch_forget_needs_minor_16() {
        let mut negotiated = SessionConfig::default().initial();
        assert!(negotiated.supports_batch_forget());
        negotiated.version = Version(7, 15);
        assert!(!negotiated.supports_batch_forget());
    }
}
