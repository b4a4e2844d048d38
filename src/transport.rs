//! Delivery of frames to the user space server.
//!
//! The engine never moves bytes itself. It hands each finished frame to a [`Transport`];
//! for frames that want a reply, whoever drives the transport later feeds the reply to
//! [`Session::resume`](crate::Session::resume) under the frame's correlation token.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::io::Read;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Duration;

use log::error;
use parking_lot::Condvar;
use parking_lot::Mutex;

use crate::frame_header::Frame;
use crate::ll::Errno;
use crate::ll::Unique;
use crate::ll::fuse_abi as abi;
use crate::ll::reply::ReplyHeader;
use crate::status::ErrnoTranslator;
use crate::status::NtStatus;
use crate::status::StatusTranslator;

/// Moves request frames to the server.
pub trait Transport: Send + Sync {
    /// Queue `frame` for delivery.
    ///
    /// When `wants_reply` is set, the reply is expected back through
    /// [`Session::resume`](crate::Session::resume) exactly once. An error means the frame
    /// was not taken and no reply will follow.
    fn submit(&self, frame: &[u8], unique: Unique, wants_reply: bool) -> Result<(), NtStatus>;

    /// Deliver `frame` and block until its reply is available.
    ///
    /// `Ok(None)` means the server went away without answering.
    fn send_and_wait(&self, frame: &[u8]) -> Result<Option<Vec<u8>>, NtStatus>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn submit(&self, frame: &[u8], unique: Unique, wants_reply: bool) -> Result<(), NtStatus> {
        (**self).submit(frame, unique, wants_reply)
    }

    fn send_and_wait(&self, frame: &[u8]) -> Result<Option<Vec<u8>>, NtStatus> {
        (**self).send_and_wait(frame)
    }
}

fn io_status(err: &io::Error) -> NtStatus {
    match err.kind() {
        io::ErrorKind::UnexpectedEof => NtStatus::CONNECTION_ABORTED,
        _ => Errno::from_wire(err.raw_os_error().unwrap_or(libc::EIO))
            .map_or(NtStatus::IO_DEVICE_ERROR, |errno| {
                ErrnoTranslator.translate(errno)
            }),
    }
}

/// Transport over a stream file descriptor (a socket or pipe pair end).
///
/// Frames are written whole under a lock so concurrent submits never interleave. Replies
/// are read back with [`FdTransport::receive`], typically from a dedicated thread that
/// passes each of them to [`Session::resume`](crate::Session::resume) under the token
/// [`ReplyHeader::unique`] reads from it.
///
/// Blocking round trips ([`Transport::send_and_wait`]) may run while such a thread is
/// receiving. Whichever thread reads a reply a blocking call waits for hands it over to that
/// call; `receive` only returns the replies nobody is blocked on.
#[derive(Debug)]
pub struct FdTransport {
    writer: Mutex<File>,
    reader: Mutex<File>,
    replies: Mutex<Replies>,
    delivered: Condvar,
}

#[derive(Debug, Default)]
struct Replies {
    /// Blocking calls by token, with their reply once it was read
    waiting: HashMap<Unique, Option<Vec<u8>>>,
    /// Replies a blocking call read on behalf of `receive`
    backlog: VecDeque<Vec<u8>>,
    closed: bool,
}

/// How long a blocking call waits for another reader before trying to read itself.
const READER_POLL: Duration = Duration::from_millis(10);

impl FdTransport {
    /// Wrap a connected stream descriptor.
    pub fn new(fd: OwnedFd) -> io::Result<Self> {
        let reader = File::from(fd.try_clone()?);
        Ok(Self {
            writer: Mutex::new(File::from(fd)),
            reader: Mutex::new(reader),
            replies: Mutex::new(Replies::default()),
            delivered: Condvar::new(),
        })
    }

    /// Read one reply. Returns `Ok(None)` on a clean end of stream.
    pub fn receive(&self) -> io::Result<Option<Vec<u8>>> {
        let mut reader = self.reader.lock();
        loop {
            if let Some(reply) = self.replies.lock().backlog.pop_front() {
                return Ok(Some(reply));
            }
            let Some(reply) = self.read_one(&mut reader)? else {
                return Ok(None);
            };
            if let Some(reply) = self.route(reply) {
                return Ok(Some(reply));
            }
        }
    }

    fn write(&self, frame: &[u8], unique: Unique) -> Result<(), NtStatus> {
        self.writer.lock().write_all(frame).map_err(|err| {
            error!("failed to send frame {unique}: {err}");
            io_status(&err)
        })
    }

    /// Reads one reply; the end of the stream or a read error wakes every blocking call.
    fn read_one(&self, reader: &mut File) -> io::Result<Option<Vec<u8>>> {
        let result = read_reply(reader);
        if !matches!(result, Ok(Some(_))) {
            self.replies.lock().closed = true;
            self.delivered.notify_all();
        }
        result
    }

    /// Hands `reply` to the blocking call waiting for it, or gives it back.
    fn route(&self, reply: Vec<u8>) -> Option<Vec<u8>> {
        let Ok(header) = ReplyHeader::parse(&reply) else {
            return Some(reply);
        };
        let mut replies = self.replies.lock();
        match replies.waiting.get_mut(&header.unique()) {
            Some(slot) if slot.is_none() => {
                *slot = Some(reply);
                self.delivered.notify_all();
                None
            }
            _ => Some(reply),
        }
    }

    fn wait_for(&self, unique: Unique) -> Result<Option<Vec<u8>>, NtStatus> {
        loop {
            {
                let mut replies = self.replies.lock();
                if let Some(reply) = replies.waiting.get_mut(&unique).and_then(Option::take) {
                    return Ok(Some(reply));
                }
                if replies.closed {
                    return Ok(None);
                }
            }
            let Some(mut reader) = self.reader.try_lock() else {
                let mut replies = self.replies.lock();
                let delivered = replies.waiting.get(&unique).is_some_and(Option::is_some);
                if !delivered && !replies.closed {
                    self.delivered.wait_for(&mut replies, READER_POLL);
                }
                continue;
            };
            // Another reader may have delivered it before the lock was free.
            if self.replies.lock().waiting.get(&unique).is_some_and(Option::is_some) {
                continue;
            }
            match self.read_one(&mut reader) {
                Ok(Some(reply)) => {
                    if let Some(other) = self.route(reply) {
                        self.replies.lock().backlog.push_back(other);
                    }
                }
                Ok(None) => return Ok(None),
                Err(err) => {
                    error!("failed to receive reply to {unique}: {err}");
                    return Err(io_status(&err));
                }
            }
        }
    }
}

fn read_reply(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    const HEADER: usize = size_of::<abi::fuse_out_header>();
    let mut buf = vec![0u8; HEADER];
    let mut filled = 0;
    while filled < HEADER {
        match reader.read(&mut buf[filled..])? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(io::ErrorKind::UnexpectedEof.into()),
            n => filled += n,
        }
    }
    let len = u32::from_ne_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if !(HEADER..=abi::consts::FUSE_MAX_FRAME_SIZE).contains(&len) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("reply length {len} out of range"),
        ));
    }
    buf.resize(len, 0);
    reader.read_exact(&mut buf[HEADER..])?;
    Ok(Some(buf))
}

impl Transport for FdTransport {
    fn submit(&self, frame: &[u8], unique: Unique, _wants_reply: bool) -> Result<(), NtStatus> {
        self.write(frame, unique)
    }

    fn send_and_wait(&self, frame: &[u8]) -> Result<Option<Vec<u8>>, NtStatus> {
        let unique = Frame::parse(frame)
            .map_err(|err| {
                error!("refusing to send frame: {err}");
                NtStatus::INVALID_PARAMETER
            })?
            .header()
            .unique();
        self.replies.lock().waiting.insert(unique, None);
        let result = self
            .write(frame, unique)
            .and_then(|()| self.wait_for(unique));
        self.replies.lock().waiting.remove(&unique);
        result
    }
}

#[cfg(test)]
mod test {
    use std::os::unix::net::UnixStream;
    use std::thread;

    use zerocopy::IntoBytes;

    use super::*;
    use crate::ll::reply::ReplyFrame;

    #[test]
    fn submit_writes_whole_frame() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let transport = FdTransport::new(OwnedFd::from(a)).unwrap();
        transport.submit(&[1, 2, 3, 4], Unique(1), false).unwrap();
        let mut buf = [0u8; 4];
        b.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    fn request(unique: u64) -> Vec<u8> {
        abi::fuse_in_header {
            len: 40,
            opcode: 3,
            unique,
            nodeid: 1,
            uid: 0,
            gid: 0,
            pid: 0,
            padding: 0,
        }
        .as_bytes()
        .to_vec()
    }

    fn read_request(stream: &mut UnixStream) -> Vec<u8> {
        let mut buf = vec![0u8; 40];
        stream.read_exact(&mut buf).unwrap();
        buf
    }

    #[test]
    fn send_and_wait_reads_reply() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let transport = FdTransport::new(OwnedFd::from(a)).unwrap();
        let server = thread::spawn(move || {
            let request = read_request(&mut b);
            let unique = Frame::parse(&request).unwrap().header().unique();
            b.write_all(&ReplyFrame::new_data(&[7, 8, 9]).to_vec(unique))
                .unwrap();
        });
        let reply = transport.send_and_wait(&request(9)).unwrap().unwrap();
        server.join().unwrap();
        assert_eq!(reply.len(), 19);
        assert_eq!(ReplyHeader::parse(&reply).unwrap().unique(), Unique(9));
        assert_eq!(&reply[16..], [7, 8, 9]);
    }

    #[test]
    fn send_and_wait_alongside_receiver() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let transport = Arc::new(FdTransport::new(OwnedFd::from(a)).unwrap());
        let receiver = {
            let transport = transport.clone();
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(reply) = transport.receive().unwrap() {
                    seen.push(ReplyHeader::parse(&reply).unwrap().unique());
                }
                seen
            })
        };
        let server = thread::spawn(move || {
            let request = read_request(&mut b);
            let unique = Frame::parse(&request).unwrap().header().unique();
            b.write_all(&ReplyFrame::new_empty().to_vec(Unique(5)))
                .unwrap();
            b.write_all(&ReplyFrame::new_empty().to_vec(unique)).unwrap();
        });

        let reply = transport.send_and_wait(&request(9)).unwrap().unwrap();
        assert_eq!(ReplyHeader::parse(&reply).unwrap().unique(), Unique(9));
        server.join().unwrap();
        assert_eq!(receiver.join().unwrap(), [Unique(5)]);
    }

    #[test]
    fn send_and_wait_end_of_stream() {
        let (a, mut b) = UnixStream::pair().unwrap();
        let transport = FdTransport::new(OwnedFd::from(a)).unwrap();
        let server = thread::spawn(move || {
            read_request(&mut b);
        });
        assert_eq!(transport.send_and_wait(&request(9)), Ok(None));
        server.join().unwrap();
    }

    #[test]
    fn send_and_wait_refuses_garbage() {
        let (a, _b) = UnixStream::pair().unwrap();
        let transport = FdTransport::new(OwnedFd::from(a)).unwrap();
        assert_eq!(
            transport.send_and_wait(&[7, 8, 9]),
            Err(NtStatus::INVALID_PARAMETER)
        );
    }

    #[test]
    fn receive_end_of_stream() {
        let (a, b) = UnixStream::pair().unwrap();
        let transport = FdTransport::new(OwnedFd::from(a)).unwrap();
        drop(b);
        assert!(transport.receive().unwrap().is_none());
    }

    #[test]
    fn broken_pipe_is_a_status() {
        let (a, b) = UnixStream::pair().unwrap();
        let transport = FdTransport::new(OwnedFd::from(a)).unwrap();
        drop(b);
        let status = transport.submit(&[0; 64], Unique(1), false).unwrap_err();
        assert!(status.is_error());
    }
}
