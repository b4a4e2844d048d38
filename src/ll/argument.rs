//! Argument decomposition for frames coming back from the transport.
//!
//! Helper to decompose a slice of binary data (a reply, or a request being inspected by a
//! transport) into multiple data structures. Buffers handed over by a transport carry no
//! alignment guarantee, so typed arguments are copied out rather than referenced in place.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;

use zerocopy::FromBytes;
use zerocopy::FromZeros;
use zerocopy::IntoBytes;

/// An iterator that can be used to fetch typed arguments from a byte slice.
#[derive(Debug)]
pub(crate) struct ArgumentIterator<'a> {
    data: &'a [u8],
}

impl<'a> ArgumentIterator<'a> {
    /// Create a new argument iterator for the given byte slice.
    pub(crate) fn new(data: &'a [u8]) -> ArgumentIterator<'a> {
        ArgumentIterator { data }
    }

    /// Returns the size of the remaining data.
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// Fetch a slice of all remaining bytes.
    pub(crate) fn fetch_all(&mut self) -> &'a [u8] {
        let bytes = self.data;
        self.data = &[];
        bytes
    }

    /// Fetch a typed argument. Returns `None` if there's not enough data left.
    pub(crate) fn fetch<T: FromBytes>(&mut self) -> Option<T> {
        let (value, rest) = T::read_from_prefix(self.data).ok()?;
        self.data = rest;
        Some(value)
    }

    /// Fetch a typed argument that a peer may have truncated to an older, shorter layout.
    /// At least `min` bytes must be present; missing trailing fields read as zero.
    pub(crate) fn fetch_truncated<T: FromBytes + IntoBytes>(&mut self, min: usize) -> Option<T> {
        if self.data.len() < min {
            return None;
        }
        let mut value = T::new_zeroed();
        let dst = value.as_mut_bytes();
        let n = dst.len().min(self.data.len());
        dst[..n].copy_from_slice(&self.data[..n]);
        self.data = &self.data[n..];
        Some(value)
    }

    /// Fetch `count` consecutive typed arguments. Returns `None` if there's not enough data
    /// left, in which case nothing is consumed.
    pub(crate) fn fetch_array<T: FromBytes>(&mut self, count: usize) -> Option<Vec<T>> {
        let needed = size_of::<T>().checked_mul(count)?;
        if self.data.len() < needed {
            return None;
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.fetch()?);
        }
        Some(out)
    }

    /// Fetch a (zero-terminated) string (can be non-utf8). Returns `None` if there's not enough
    /// data left or no zero-termination could be found.
    pub(crate) fn fetch_str(&mut self) -> Option<&'a OsStr> {
        let len = memchr::memchr(0, self.data)?;
        let (out, rest) = self.data.split_at(len);
        self.data = &rest[1..];
        Some(OsStr::from_bytes(out))
    }
}

#[cfg(test)]
mod test {
    use zerocopy::Immutable;
    use zerocopy::KnownLayout;

    use super::*;

    const TEST_DATA: [u8; 10] = [0x66, 0x6f, 0x6f, 0x00, 0x62, 0x61, 0x72, 0x00, 0x62, 0x61];

    #[repr(C)]
    #[derive(Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
    struct TestArgument {
        p1: u8,
        p2: u8,
        p3: u16,
    }

    #[test]
    fn generic_argument() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        let arg: TestArgument = it.fetch().unwrap();
        assert_eq!(arg.p1, 0x66);
        assert_eq!(arg.p2, 0x6f);
        assert_eq!(arg.p3, 0x006f);
        let arg: TestArgument = it.fetch().unwrap();
        assert_eq!(arg.p1, 0x62);
        assert_eq!(arg.p3, 0x0072);
        assert_eq!(it.len(), 2);
    }

    #[test]
    fn unaligned_source() {
        // Skip one byte so every u16 below starts at an odd address.
        let mut it = ArgumentIterator::new(&TEST_DATA[1..]);
        let arg: u16 = it.fetch().unwrap();
        assert_eq!(arg, 0x6f6f);
        assert_eq!(it.len(), 7);
    }

    #[test]
    fn truncated_argument_is_zero_filled() {
        let mut it = ArgumentIterator::new(&TEST_DATA[..3]);
        assert!(it.fetch::<TestArgument>().is_none());
        let arg: TestArgument = it.fetch_truncated(2).unwrap();
        assert_eq!(arg.p1, 0x66);
        assert_eq!(arg.p2, 0x6f);
        assert_eq!(arg.p3, 0x006f);
        assert_eq!(it.len(), 0);

        let mut it = ArgumentIterator::new(&TEST_DATA[..1]);
        assert!(it.fetch_truncated::<TestArgument>(2).is_none());
        assert_eq!(it.len(), 1);
    }

    #[test]
    fn array_argument() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        let arr: Vec<u16> = it.fetch_array(4).unwrap();
        assert_eq!(arr, vec![0x6f66, 0x006f, 0x6162, 0x0072]);
        assert!(it.fetch_array::<u16>(2).is_none());
        assert_eq!(it.len(), 2);
    }

    #[test]
    fn string_argument() {
        let mut it = ArgumentIterator::new(&TEST_DATA);
        assert_eq!(it.fetch_str().unwrap(), "foo");
        assert_eq!(it.fetch_str().unwrap(), "bar");
        assert!(it.fetch_str().is_none());
        assert_eq!(it.fetch_all(), [0x62, 0x61]);
    }
}
