//! Read side of request frames.
//!
//! The engine only writes requests, but a transport has to look at what it is handed (to
//! route replies, or to answer in place of a server) and so do tests. [`Frame`] decodes a
//! request built by this crate.

use std::ffi::OsStr;

use ref_cast::RefCastCustom;
use ref_cast::ref_cast_custom;

use crate::Error;
use crate::context::OperationKind;
use crate::forget_one::ForgetOne;
use crate::identity::CallerIdentity;
use crate::ll::ArgumentIterator;
use crate::ll::INodeNo;
use crate::ll::Unique;
use crate::ll::Version;
use crate::ll::flags::init_flags::InitFlags;
use crate::ll::fuse_abi as abi;
use crate::ll::fuse_abi::fuse_in_header;
use crate::ll::request::HEADER_SIZE;

/// Fixed header of a request frame.
#[derive(Debug, RefCastCustom)]
#[repr(transparent)]
pub struct RequestHeader {
    header: fuse_in_header,
}

impl RequestHeader {
    #[ref_cast_custom]
    pub(crate) fn ref_cast(header: &fuse_in_header) -> &RequestHeader;

    /// Total frame length, header included.
    #[inline]
    pub fn len(&self) -> usize {
        self.header.len as usize
    }

    /// Raw opcode number.
    #[inline]
    pub fn opcode(&self) -> u32 {
        self.header.opcode
    }

    /// Operation kind, if the opcode is one this crate emits.
    pub fn kind(&self) -> Option<OperationKind> {
        abi::fuse_opcode::try_from(self.header.opcode)
            .ok()
            .map(OperationKind::from_opcode)
    }

    /// Correlation token.
    #[inline]
    pub fn unique(&self) -> Unique {
        Unique(self.header.unique)
    }

    /// Target inode.
    #[inline]
    pub fn nodeid(&self) -> INodeNo {
        INodeNo(self.header.nodeid)
    }

    /// Returns the uid of this request
    #[inline]
    pub fn uid(&self) -> u32 {
        self.header.uid
    }

    /// Returns the gid of this request
    #[inline]
    pub fn gid(&self) -> u32 {
        self.header.gid
    }

    /// Returns the pid of this request
    #[inline]
    pub fn pid(&self) -> u32 {
        self.header.pid
    }

    /// The caller identity the frame was stamped with.
    pub fn identity(&self) -> CallerIdentity {
        CallerIdentity {
            uid: self.header.uid,
            gid: self.header.gid,
            pid: self.header.pid,
        }
    }
}

/// Arguments of an Init request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitRequest {
    /// Version the driver declares
    pub version: Version,
    /// Largest readahead the driver accepts
    pub max_readahead: u32,
    /// Capabilities the driver offers
    pub flags: InitFlags,
}

/// A decoded request frame.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    header: fuse_in_header,
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Splits `data` into header and payload. Bytes past the header's length are ignored.
    pub fn parse(data: &'a [u8]) -> Result<Self, Error> {
        let mut it = ArgumentIterator::new(data);
        let header: fuse_in_header = it
            .fetch()
            .ok_or(Error::Malformed("request shorter than its header"))?;
        let len = header.len as usize;
        if len < HEADER_SIZE || len > data.len() {
            return Err(Error::Malformed("request length does not match buffer"));
        }
        Ok(Frame {
            header,
            payload: &data[HEADER_SIZE..len],
        })
    }

    /// The fixed header.
    pub fn header(&self) -> &RequestHeader {
        RequestHeader::ref_cast(&self.header)
    }

    /// Payload following the header.
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }

    /// Whether the server is expected to answer this frame.
    pub fn wants_reply(&self) -> bool {
        self.header().kind().is_none_or(OperationKind::wants_reply)
    }

    /// Name of a Lookup request.
    pub fn lookup_name(&self) -> Option<&'a OsStr> {
        if self.header().kind() != Some(OperationKind::Lookup) {
            return None;
        }
        let mut it = ArgumentIterator::new(self.payload);
        let name = it.fetch_str()?;
        (it.len() == 0).then_some(name)
    }

    /// Arguments of an Init request.
    pub fn init(&self) -> Option<InitRequest> {
        if self.header().kind() != Some(OperationKind::Init) {
            return None;
        }
        let arg: abi::fuse_init_in = ArgumentIterator::new(self.payload).fetch()?;
        Some(InitRequest {
            version: Version(arg.major, arg.minor),
            max_readahead: arg.max_readahead,
            flags: InitFlags::from_bits_retain(arg.flags),
        })
    }

    /// Entries of a Forget or BatchForget request, in frame order.
    pub fn forgets(&self) -> Option<Vec<ForgetOne>> {
        let mut it = ArgumentIterator::new(self.payload);
        match self.header().kind()? {
            OperationKind::Forget => {
                let arg: abi::fuse_forget_in = it.fetch()?;
                Some(vec![ForgetOne::new(self.header().nodeid(), arg.nlookup)])
            }
            OperationKind::BatchForget => {
                let arg: abi::fuse_batch_forget_in = it.fetch()?;
                let nodes: Vec<abi::fuse_forget_one> = it.fetch_array(arg.count as usize)?;
                Some(nodes.into_iter().map(ForgetOne::from).collect())
            }
            _ => None,
        }
    }
}
