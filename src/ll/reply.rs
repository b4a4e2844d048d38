//! Reply framing.
//!
//! A reply is a `fuse_out_header` followed by an opcode specific payload. The transport hands
//! the engine the reply belonging to a given context; [`Response`] decodes it. [`ReplyFrame`]
//! is the inverse, used by transports that answer on behalf of the server and by tests.

use std::io::IoSlice;

use smallvec::SmallVec;
use smallvec::smallvec;
use zerocopy::Immutable;
use zerocopy::IntoBytes;

use super::ArgumentIterator;
use super::Errno;
use super::INodeNo;
use super::Unique;
use super::Version;
use super::flags::init_flags::InitFlags;
use super::fuse_abi as abi;
use super::fuse_abi::consts::FUSE_COMPAT_INIT_OUT_SIZE;
use crate::Error;

const INLINE_DATA_THRESHOLD: usize = size_of::<u64>() * 4;
pub(crate) type ResponseBuf = SmallVec<[u8; INLINE_DATA_THRESHOLD]>;

/// File attributes returned by Lookup and Getattr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Attr {
    /// Inode number
    pub ino: INodeNo,
    /// Size in bytes
    pub size: u64,
    /// Size in blocks
    pub blocks: u64,
    /// File type and permissions
    pub mode: u32,
    /// Number of hard links
    pub nlink: u32,
    /// Owner
    pub uid: u32,
    /// Group
    pub gid: u32,
    /// Device id
    pub rdev: u32,
    /// Preferred block size
    pub blksize: u32,
}

impl From<&abi::fuse_attr> for Attr {
    fn from(attr: &abi::fuse_attr) -> Self {
        Attr {
            ino: INodeNo(attr.ino),
            size: attr.size,
            blocks: attr.blocks,
            mode: attr.mode,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: attr.rdev,
            blksize: attr.blksize,
        }
    }
}

impl Attr {
    fn to_abi(self) -> abi::fuse_attr {
        abi::fuse_attr {
            ino: self.ino.0,
            size: self.size,
            blocks: self.blocks,
            atime: 0,
            mtime: 0,
            ctime: 0,
            atimensec: 0,
            mtimensec: 0,
            ctimensec: 0,
            mode: self.mode,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: self.rdev,
            blksize: self.blksize,
            flags: 0,
        }
    }
}

/// Directory entry returned by Lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Inode number of the entry
    pub ino: INodeNo,
    /// Inode generation
    pub generation: u64,
    /// Attributes of the entry
    pub attr: Attr,
}

/// Values the server answered an Init request with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InitOut {
    pub(crate) version: Version,
    pub(crate) max_readahead: u32,
    pub(crate) flags: InitFlags,
    pub(crate) max_write: u32,
}

/// Fixed header of a reply frame.
///
/// Lets a transport find the correlation token of a reply it read before handing the reply
/// to [`Session::resume`](crate::Session::resume).
#[derive(Debug, Clone, Copy)]
pub struct ReplyHeader {
    header: abi::fuse_out_header,
}

impl ReplyHeader {
    /// Reads the header at the start of `data` and checks its length against the buffer.
    pub fn parse(data: &[u8]) -> Result<Self, Error> {
        let header: abi::fuse_out_header = ArgumentIterator::new(data)
            .fetch()
            .ok_or(Error::Malformed("reply shorter than its header"))?;
        let len = header.len as usize;
        if len < size_of::<abi::fuse_out_header>() || len > data.len() {
            return Err(Error::Malformed("reply length does not match buffer"));
        }
        Ok(ReplyHeader { header })
    }

    /// Total reply length, header included.
    #[inline]
    pub fn len(&self) -> usize {
        self.header.len as usize
    }

    /// Correlation token of the request this answers.
    #[inline]
    pub fn unique(&self) -> Unique {
        Unique(self.header.unique)
    }

    /// The error the server reported, `None` for success.
    pub fn error(&self) -> Option<Errno> {
        Errno::from_wire(self.header.error)
    }
}

/// A decoded reply.
#[derive(Debug)]
pub(crate) struct Response<'a> {
    unique: Unique,
    error: Option<Errno>,
    payload: &'a [u8],
}

impl<'a> Response<'a> {
    pub(crate) fn parse(data: &'a [u8]) -> Result<Self, Error> {
        let header = ReplyHeader::parse(data)?;
        Ok(Response {
            unique: header.unique(),
            error: header.error(),
            payload: &data[size_of::<abi::fuse_out_header>()..header.len()],
        })
    }

    pub(crate) fn unique(&self) -> Unique {
        self.unique
    }

    pub(crate) fn error(&self) -> Option<Errno> {
        self.error
    }

    pub(crate) fn init_out(&self) -> Option<InitOut> {
        let out: abi::fuse_init_out = ArgumentIterator::new(self.payload)
            .fetch_truncated(FUSE_COMPAT_INIT_OUT_SIZE)?;
        Some(InitOut {
            version: Version(out.major, out.minor),
            max_readahead: out.max_readahead,
            flags: InitFlags::from_bits_truncate(out.flags),
            max_write: out.max_write,
        })
    }

    pub(crate) fn entry(&self) -> Option<Entry> {
        let out: abi::fuse_entry_out = ArgumentIterator::new(self.payload).fetch()?;
        Some(Entry {
            ino: INodeNo(out.nodeid),
            generation: out.generation,
            attr: Attr::from(&out.attr),
        })
    }

    pub(crate) fn attr(&self) -> Option<Attr> {
        let out: abi::fuse_attr_out = ArgumentIterator::new(self.payload).fetch()?;
        Some(Attr::from(&out.attr))
    }
}

/// An encoded reply, as a server would write it.
#[derive(Debug, Clone)]
pub struct ReplyFrame {
    error: Option<Errno>,
    data: ResponseBuf,
}

impl ReplyFrame {
    /// Reply carrying no error and no payload.
    pub fn new_empty() -> Self {
        Self {
            error: None,
            data: ResponseBuf::new(),
        }
    }

    /// Reply carrying only an error.
    pub fn new_error(error: Errno) -> Self {
        Self {
            error: Some(error),
            data: ResponseBuf::new(),
        }
    }

    /// Successful reply with an arbitrary payload.
    pub fn new_data(data: &[u8]) -> Self {
        Self {
            error: None,
            data: ResponseBuf::from_slice(data),
        }
    }

    /// Successful Init reply.
    pub fn new_init(version: Version, flags: InitFlags, max_write: u32) -> Self {
        let out = abi::fuse_init_out {
            major: version.0,
            minor: version.1,
            max_readahead: 0,
            flags: flags.bits(),
            max_background: 0,
            congestion_threshold: 0,
            max_write,
            time_gran: 1,
            max_pages: 0,
            map_alignment: 0,
            unused: [0; 8],
        };
        Self::from_struct(&out)
    }

    /// Successful Lookup reply.
    pub fn new_entry(entry: &Entry) -> Self {
        let out = abi::fuse_entry_out {
            nodeid: entry.ino.0,
            generation: entry.generation,
            entry_valid: 1,
            attr_valid: 1,
            entry_valid_nsec: 0,
            attr_valid_nsec: 0,
            attr: entry.attr.to_abi(),
        };
        Self::from_struct(&out)
    }

    /// Successful Getattr reply.
    pub fn new_attr(attr: &Attr) -> Self {
        let out = abi::fuse_attr_out {
            attr_valid: 1,
            attr_valid_nsec: 0,
            dummy: 0,
            attr: attr.to_abi(),
        };
        Self::from_struct(&out)
    }

    fn from_struct<T: IntoBytes + Immutable + ?Sized>(data: &T) -> Self {
        Self::new_data(data.as_bytes())
    }

    /// Calls `f` with the reply as a list of slices, header first.
    pub fn with_iovec<F: FnOnce(&[IoSlice<'_>]) -> T, T>(&self, unique: Unique, f: F) -> T {
        let header = abi::fuse_out_header {
            unique: unique.0,
            error: self.error.map_or(0, Errno::to_wire),
            len: (size_of::<abi::fuse_out_header>() + self.data.len()) as u32,
        };
        let mut v: SmallVec<[IoSlice<'_>; 2]> = smallvec![IoSlice::new(header.as_bytes())];
        if !self.data.is_empty() {
            v.push(IoSlice::new(&self.data));
        }
        f(&v)
    }

    /// The reply as one contiguous buffer.
    pub fn to_vec(&self, unique: Unique) -> Vec<u8> {
        self.with_iovec(unique, |iov| {
            iov.iter().flat_map(|s| s.iter().copied()).collect()
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reply_empty() {
        let r = ReplyFrame::new_empty();
        assert_eq!(
            r.to_vec(Unique(0xdeadbeef)),
            vec![
                0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xef, 0xbe, 0xad, 0xde, 0x00, 0x00,
                0x00, 0x00,
            ],
        );
    }

    #[test]
    fn reply_error() {
        let r = ReplyFrame::new_error(Errno::from_wire(66).unwrap());
        assert_eq!(
            r.to_vec(Unique(0xdeadbeef)),
            vec![
                0x10, 0x00, 0x00, 0x00, 0xbe, 0xff, 0xff, 0xff, 0xef, 0xbe, 0xad, 0xde, 0x00, 0x00,
                0x00, 0x00,
            ],
        );
    }

    #[test]
    fn reply_header_names_the_request() {
        let bytes = ReplyFrame::new_error(Errno::ENOENT).to_vec(Unique(0x1_0000_0003));
        let header = ReplyHeader::parse(&bytes).unwrap();
        assert_eq!(header.unique(), Unique(0x1_0000_0003));
        assert_eq!(header.len(), 16);
        assert_eq!(header.error(), Some(Errno::ENOENT));
        assert!(ReplyHeader::parse(&bytes[..12]).is_err());
    }

    #[test]
    fn parse_error_reply() {
        let bytes = ReplyFrame::new_error(Errno::ENOENT).to_vec(Unique(7));
        let r = Response::parse(&bytes).unwrap();
        assert_eq!(r.unique(), Unique(7));
        assert_eq!(r.error(), Some(Errno::ENOENT));
        assert!(r.entry().is_none());
    }

    #[test]
    fn parse_rejects_short_buffers() {
        assert!(matches!(
            Response::parse(&[0x10, 0, 0, 0]),
            Err(Error::Malformed(_))
        ));
        let mut bytes = ReplyFrame::new_data(&[1, 2, 3, 4]).to_vec(Unique(1));
        bytes.truncate(18);
        assert!(matches!(Response::parse(&bytes), Err(Error::Malformed(_))));
    }

    #[test]
    fn parse_ignores_trailing_bytes() {
        let mut bytes = ReplyFrame::new_data(&[0xaa]).to_vec(Unique(1));
        bytes.extend_from_slice(&[0xff; 7]);
        let r = Response::parse(&bytes).unwrap();
        assert_eq!(r.payload, [0xaa]);
    }

    #[test]
    fn init_out_short_layout() {
        let bytes = ReplyFrame::new_data(&[7, 0, 0, 0, 12, 0, 0, 0]).to_vec(Unique(1));
        let out = Response::parse(&bytes).unwrap().init_out().unwrap();
        assert_eq!(out.version, Version(7, 12));
        assert_eq!(out.max_write, 0);

        let bytes = ReplyFrame::new_data(&[7, 0, 0, 0]).to_vec(Unique(1));
        assert!(Response::parse(&bytes).unwrap().init_out().is_none());
    }

    #[test]
    fn entry_and_attr() {
        let attr = Attr {
            ino: INodeNo(0x11),
            size: 0x22,
            mode: 0o100644,
            nlink: 1,
            ..Attr::default()
        };
        let entry = Entry {
            ino: INodeNo(0x11),
            generation: 3,
            attr,
        };
        let bytes = ReplyFrame::new_entry(&entry).to_vec(Unique(1));
        assert_eq!(bytes.len(), 16 + 128);
        assert_eq!(Response::parse(&bytes).unwrap().entry(), Some(entry));

        let bytes = ReplyFrame::new_attr(&attr).to_vec(Unique(1));
        assert_eq!(bytes.len(), 16 + 104);
        assert_eq!(Response::parse(&bytes).unwrap().attr(), Some(attr));
    }
}
