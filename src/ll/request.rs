//! Request framing.
//!
//! A request is a `fuse_in_header` followed by an opcode specific payload. The buffer owned by
//! an operation context has a fixed capacity (the frame size in effect when the context was
//! created); the per-opcode framers size their payload against that capacity before writing
//! the header, so running over it is a programming error, not a runtime condition.

use log::debug;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

use super::INodeNo;
use super::Unique;
use super::fuse_abi as abi;
use crate::identity::CallerIdentity;

pub(crate) const HEADER_SIZE: usize = size_of::<abi::fuse_in_header>();

/// Request buffer of one operation context.
#[derive(Debug)]
pub(crate) struct RequestBuf {
    data: Vec<u8>,
    capacity: usize,
}

impl RequestBuf {
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity >= HEADER_SIZE, "frame capacity below header size");
        // Most frames are tiny; grow on demand instead of reserving the full capacity.
        Self {
            data: Vec::with_capacity(capacity.min(256)),
            capacity,
        }
    }

    /// Maximum total length of a frame built in this buffer.
    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resets the buffer and writes the fixed header.
    ///
    /// The correlation token and the caller identity always come from the owning context;
    /// `payload_len` must already be known so that `len` covers the whole frame.
    pub(crate) fn build_header(
        &mut self,
        payload_len: usize,
        opcode: abi::fuse_opcode,
        nodeid: INodeNo,
        unique: Unique,
        identity: &CallerIdentity,
    ) {
        let len = HEADER_SIZE + payload_len;
        assert!(
            len <= self.capacity,
            "{opcode:?} frame of {len} bytes exceeds capacity {}",
            self.capacity
        );
        let header = abi::fuse_in_header {
            len: len as u32,
            opcode: opcode as u32,
            unique: unique.0,
            nodeid: nodeid.0,
            uid: identity.uid,
            gid: identity.gid,
            pid: identity.pid,
            padding: 0,
        };
        self.data.clear();
        self.data.extend_from_slice(header.as_bytes());
        debug!("{opcode:?} unique {unique} nodeid {nodeid} len {len}");
    }

    /// Appends a typed argument to the payload.
    pub(crate) fn push<T: IntoBytes + Immutable>(&mut self, arg: &T) {
        self.push_bytes(arg.as_bytes());
    }

    /// Appends raw bytes to the payload.
    pub(crate) fn push_bytes(&mut self, bytes: &[u8]) {
        assert!(
            self.data.len() >= HEADER_SIZE,
            "payload written before header"
        );
        assert!(
            self.data.len() + bytes.len() <= self.capacity,
            "payload exceeds frame capacity"
        );
        self.data.extend_from_slice(bytes);
    }

    /// The finished frame. The header's `len` must match what was actually written.
    pub(crate) fn as_bytes(&self) -> &[u8] {
        debug_assert_eq!(
            self.data
                .get(..4)
                .map(|l| u32::from_ne_bytes([l[0], l[1], l[2], l[3]]) as usize),
            Some(self.data.len()),
            "header length does not match frame"
        );
        &self.data
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn identity() -> CallerIdentity {
        CallerIdentity {
            uid: 0xc8,
            gid: 0x64,
            pid: 0x4d2,
        }
    }

    #[test]
    fn header_only() {
        let mut buf = RequestBuf::new(64);
        buf.build_header(
            0,
            abi::fuse_opcode::FUSE_GETATTR,
            INodeNo(0x11),
            Unique(0xdeadbeef),
            &identity(),
        );
        assert_eq!(
            buf.as_bytes(),
            [
                0x28, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00, 0xef, 0xbe, 0xad, 0xde, 0x00,
                0x00, 0x00, 0x00, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc8, 0x00,
                0x00, 0x00, 0x64, 0x00, 0x00, 0x00, 0xd2, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00,
                0x00,
            ]
        );
    }

    #[test]
    fn header_and_payload() {
        let mut buf = RequestBuf::new(64);
        buf.build_header(
            8,
            abi::fuse_opcode::FUSE_FORGET,
            INodeNo(5),
            Unique(1),
            &identity(),
        );
        buf.push(&abi::fuse_forget_in { nlookup: 1 });
        let bytes = buf.as_bytes();
        assert_eq!(bytes.len(), 48);
        assert_eq!(bytes[0], 48);
        assert_eq!(&bytes[40..], [0x01, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn rebuild_replaces_previous_frame() {
        let mut buf = RequestBuf::new(64);
        buf.build_header(
            4,
            abi::fuse_opcode::FUSE_LOOKUP,
            INodeNo(1),
            Unique(1),
            &identity(),
        );
        buf.push_bytes(b"abc\0");
        buf.build_header(
            0,
            abi::fuse_opcode::FUSE_GETATTR,
            INodeNo(1),
            Unique(1),
            &identity(),
        );
        assert_eq!(buf.as_bytes().len(), HEADER_SIZE);
    }

    #[test]
    #[should_panic(expected = "exceeds capacity")]
    fn header_over_capacity() {
        let mut buf = RequestBuf::new(48);
        buf.build_header(
            9,
            abi::fuse_opcode::FUSE_LOOKUP,
            INodeNo(1),
            Unique(1),
            &identity(),
        );
    }

    #[test]
    #[should_panic(expected = "payload exceeds frame capacity")]
    fn payload_over_capacity() {
        let mut buf = RequestBuf::new(48);
        buf.build_header(
            8,
            abi::fuse_opcode::FUSE_LOOKUP,
            INodeNo(1),
            Unique(1),
            &identity(),
        );
        buf.push_bytes(&[0; 9]);
    }
}
