//! Per-opcode state machines.
//!
//! [`step`] runs the step a context's cursor points at and reports what the session must do
//! next. A machine that needs a reply builds its request, moves its cursor to
//! [`Cursor::Suspended`] and yields; the session submits the frame and parks the context
//! until the reply is handed back. A fire-and-forget machine yields its frame and continues
//! at the next step once the transport took it.
//!
//! Every machine writes at most one frame per step and keeps whatever a later step needs in
//! the context, never on the stack.

use log::debug;
use log::info;
use log::warn;

use crate::config::Negotiated;
use crate::context::Args;
use crate::context::Cursor;
use crate::context::OperationContext;
use crate::context::OperationKind;
use crate::context::ReplyData;
use crate::ll::INodeNo;
use crate::ll::Version;
use crate::ll::fuse_abi as abi;
use crate::ll::reply::Response;
use crate::ll::request::HEADER_SIZE;
use crate::ll::request::RequestBuf;
use crate::status::NtStatus;
use crate::status::StatusTranslator;

/// What the session does after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Yield {
    /// Hand the frame in the context's request buffer to the transport.
    Submit { wants_reply: bool },
    /// The machine is terminal.
    Done,
}

/// Length of a Lookup frame for a name of `name_len` bytes.
pub(crate) fn lookup_frame_len(name_len: usize) -> usize {
    HEADER_SIZE + name_len + 1
}

/// Forget entries a BatchForget frame of `capacity` bytes holds.
pub(crate) fn batch_forget_capacity(capacity: usize) -> usize {
    capacity.saturating_sub(HEADER_SIZE + size_of::<abi::fuse_batch_forget_in>())
        / size_of::<abi::fuse_forget_one>()
}

/// Runs the current step of `ctx`.
///
/// `reply` is the decoded reply when the context is being resumed, `None` otherwise.
pub(crate) fn step(
    ctx: &mut OperationContext,
    reply: Option<&Response<'_>>,
    translator: &dyn StatusTranslator,
) -> Yield {
    let Cursor::Ready(n) = ctx.cursor else {
        debug_assert_eq!(ctx.cursor, Cursor::Done, "stepping a suspended context");
        return Yield::Done;
    };
    match (ctx.kind(), n) {
        (OperationKind::Init, 0) => init_request(ctx),
        (OperationKind::Lookup, 0) => lookup_request(ctx),
        (OperationKind::Getattr, 0) => getattr_request(ctx),
        (OperationKind::Init | OperationKind::Lookup | OperationKind::Getattr, 1) => {
            match reply {
                Some(reply) => interpret(ctx, reply, translator),
                None => ctx.fail(NtStatus::INVALID_NETWORK_RESPONSE),
            }
            Yield::Done
        }
        (OperationKind::Forget, 0) => forget_request(ctx),
        (OperationKind::BatchForget, 0) => batch_forget_request(ctx),
        (OperationKind::Create | OperationKind::Open, 0) => {
            debug!("{:?} {} is not implemented", ctx.kind(), ctx.unique());
            ctx.fail(NtStatus::NOT_IMPLEMENTED);
            Yield::Done
        }
        _ => {
            ctx.cursor = Cursor::Done;
            Yield::Done
        }
    }
}

fn buffer(request: &mut Option<RequestBuf>, capacity: usize) -> &mut RequestBuf {
    request.get_or_insert_with(|| RequestBuf::new(capacity))
}

fn suspend(ctx: &mut OperationContext) -> Yield {
    ctx.cursor = Cursor::Suspended(1);
    Yield::Submit { wants_reply: true }
}

fn init_request(ctx: &mut OperationContext) -> Yield {
    let Args::Init {
        max_readahead,
        flags,
    } = ctx.args
    else {
        unreachable!("init context without init arguments");
    };
    let arg = abi::fuse_init_in {
        major: Version::CURRENT.major(),
        minor: Version::CURRENT.minor(),
        max_readahead,
        flags: flags.bits(),
    };
    let (unique, identity) = (ctx.unique(), *ctx.identity());
    let opcode = ctx.kind().opcode();
    let buf = buffer(&mut ctx.request, ctx.capacity);
    buf.build_header(size_of::<abi::fuse_init_in>(), opcode, INodeNo(0), unique, &identity);
    buf.push(&arg);
    suspend(ctx)
}

fn lookup_request(ctx: &mut OperationContext) -> Yield {
    let (unique, identity) = (ctx.unique(), *ctx.identity());
    let opcode = ctx.kind().opcode();
    let parent = ctx.ino();
    let Args::Name(name) = &ctx.args else {
        unreachable!("lookup context without a name");
    };
    let buf = buffer(&mut ctx.request, ctx.capacity);
    buf.build_header(name.len() + 1, opcode, parent, unique, &identity);
    buf.push_bytes(name);
    buf.push_bytes(&[0]);
    suspend(ctx)
}

fn getattr_request(ctx: &mut OperationContext) -> Yield {
    let (unique, identity) = (ctx.unique(), *ctx.identity());
    let opcode = ctx.kind().opcode();
    let ino = ctx.ino();
    let buf = buffer(&mut ctx.request, ctx.capacity);
    buf.build_header(size_of::<abi::fuse_getattr_in>(), opcode, ino, unique, &identity);
    buf.push(&abi::fuse_getattr_in {
        getattr_flags: 0,
        dummy: 0,
        fh: 0,
    });
    suspend(ctx)
}

fn interpret(ctx: &mut OperationContext, reply: &Response<'_>, translator: &dyn StatusTranslator) {
    debug!(
        "reply {} to {:?}, error {:?}",
        reply.unique(),
        ctx.kind(),
        reply.error()
    );
    ctx.cursor = Cursor::Done;
    if let Some(errno) = reply.error() {
        ctx.status = translator.translate(errno);
        return;
    }
    ctx.reply = match ctx.kind() {
        OperationKind::Init => negotiate(ctx, reply).map(ReplyData::Init),
        OperationKind::Lookup => reply.entry().map(ReplyData::Entry),
        OperationKind::Getattr => reply.attr().map(ReplyData::Attr),
        _ => None,
    };
    if ctx.reply.is_none() {
        warn!(
            "reply {} to {:?} carries no usable payload",
            reply.unique(),
            ctx.kind()
        );
    }
}

fn negotiate(ctx: &OperationContext, reply: &Response<'_>) -> Option<Negotiated> {
    let out = reply.init_out()?;
    if out.version.major() != Version::CURRENT.major() {
        warn!(
            "server speaks protocol {}, driver speaks {}",
            out.version,
            Version::CURRENT
        );
        return None;
    }
    let Args::Init {
        max_readahead,
        flags,
    } = ctx.args
    else {
        return None;
    };
    let negotiated = Negotiated {
        version: out.version.min(Version::CURRENT),
        flags: out.flags & flags,
        max_readahead: out.max_readahead.min(max_readahead),
        max_write: out.max_write,
        max_frame_size: Negotiated::frame_size_for(out.max_write),
    };
    info!(
        "negotiated protocol {}, max_write {}, frame size {}",
        negotiated.version, negotiated.max_write, negotiated.max_frame_size
    );
    Some(negotiated)
}

fn forget_request(ctx: &mut OperationContext) -> Yield {
    let (unique, identity) = (ctx.unique(), *ctx.identity());
    let opcode = ctx.kind().opcode();
    let Some(ino) = ctx.forgets.drain_one() else {
        ctx.cursor = Cursor::Done;
        return Yield::Done;
    };
    let buf = buffer(&mut ctx.request, ctx.capacity);
    buf.build_header(size_of::<abi::fuse_forget_in>(), opcode, ino, unique, &identity);
    buf.push(&abi::fuse_forget_in { nlookup: 1 });
    ctx.in_flight.push(ino);
    ctx.cursor = Cursor::Ready(1);
    Yield::Submit { wants_reply: false }
}

fn batch_forget_request(ctx: &mut OperationContext) -> Yield {
    let (unique, identity) = (ctx.unique(), *ctx.identity());
    let opcode = ctx.kind().opcode();
    let buf = buffer(&mut ctx.request, ctx.capacity);
    let drained = ctx.forgets.drain_batch(batch_forget_capacity(buf.capacity()));
    if drained.is_empty() {
        ctx.cursor = Cursor::Done;
        return Yield::Done;
    }
    let count = drained.len();
    buf.build_header(
        size_of::<abi::fuse_batch_forget_in>() + count * size_of::<abi::fuse_forget_one>(),
        opcode,
        INodeNo(0),
        unique,
        &identity,
    );
    buf.push(&abi::fuse_batch_forget_in {
        count: count as u32,
        dummy: 0,
    });
    for ino in &drained {
        buf.push(&abi::fuse_forget_one {
            nodeid: ino.0,
            nlookup: 1,
        });
    }
    ctx.in_flight.extend_from_slice(&drained);
    ctx.cursor = Cursor::Ready(1);
    Yield::Submit { wants_reply: false }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::forget::ForgetQueue;
    use crate::identity::CallerIdentity;
    use crate::ll::Errno;
    use crate::ll::Unique;
    use crate::ll::reply::ReplyFrame;
    use crate::status::ErrnoTranslator;

    const ID: CallerIdentity = CallerIdentity {
        uid: 1000,
        gid: 100,
        pid: 42,
    };

    fn attached(mut ctx: OperationContext, capacity: usize) -> OperationContext {
        ctx.attach(Unique::new(0, 1), capacity);
        ctx
    }

    fn queue(ids: &[u64]) -> ForgetQueue {
        ids.iter().map(|&i| INodeNo(i)).collect()
    }

    #[test]
    fn lookup_frame() {
        let ctx = OperationContext::lookup(INodeNo(1), "hello", ID).unwrap();
        let mut ctx = attached(ctx, 8192);
        assert_eq!(
            step(&mut ctx, None, &ErrnoTranslator),
            Yield::Submit { wants_reply: true }
        );
        assert_eq!(ctx.cursor, Cursor::Suspended(1));
        let frame = ctx.frame();
        assert_eq!(frame.len(), lookup_frame_len(5));
        assert_eq!(&frame[HEADER_SIZE..], b"hello\0");
    }

    #[test]
    fn getattr_frame() {
        let mut ctx = attached(OperationContext::getattr(INodeNo(9), ID), 8192);
        step(&mut ctx, None, &ErrnoTranslator);
        assert_eq!(ctx.frame().len(), HEADER_SIZE + 16);
        assert_eq!(ctx.frame()[16], 9);
    }

    #[test]
    fn reply_error_is_translated() {
        let mut ctx = attached(OperationContext::getattr(INodeNo(9), ID), 8192);
        step(&mut ctx, None, &ErrnoTranslator);
        ctx.cursor = Cursor::Ready(1);
        let bytes = ReplyFrame::new_error(Errno::ENOENT).to_vec(ctx.unique());
        let reply = Response::parse(&bytes).unwrap();
        assert_eq!(step(&mut ctx, Some(&reply), &ErrnoTranslator), Yield::Done);
        assert_eq!(ctx.status(), NtStatus::OBJECT_NAME_NOT_FOUND);
        assert!(ctx.is_done());
    }

    #[test]
    fn batch_forget_fills_capacity() {
        let mut ctx = attached(OperationContext::forget(queue(&[5, 9, 12]), true), 80);
        assert_eq!(batch_forget_capacity(80), 2);
        assert_eq!(
            step(&mut ctx, None, &ErrnoTranslator),
            Yield::Submit { wants_reply: false }
        );
        let frame = ctx.frame();
        assert_eq!(frame.len(), 80);
        assert_eq!(&frame[HEADER_SIZE..HEADER_SIZE + 4], [2, 0, 0, 0]);
        assert_eq!(frame[48], 5);
        assert_eq!(frame[64], 9);
        assert_eq!(ctx.in_flight, [INodeNo(5), INodeNo(9)]);
        assert_eq!(ctx.forgets().iter().copied().collect::<Vec<_>>(), [INodeNo(12)]);
        assert_eq!(step(&mut ctx, None, &ErrnoTranslator), Yield::Done);
    }

    #[test]
    fn forget_drains_one() {
        let mut ctx = attached(OperationContext::forget(queue(&[3, 4]), false), 8192);
        step(&mut ctx, None, &ErrnoTranslator);
        assert_eq!(ctx.frame().len(), HEADER_SIZE + 8);
        assert_eq!(ctx.frame()[16], 3);
        assert_eq!(ctx.in_flight, [INodeNo(3)]);
        assert_eq!(ctx.forgets().len(), 1);
    }

    #[test]
    fn create_and_open_do_nothing() {
        for ctx in [
            OperationContext::create(INodeNo(1), "f", ID),
            OperationContext::open(INodeNo(2), ID),
        ] {
            let mut ctx = attached(ctx, 8192);
            assert_eq!(step(&mut ctx, None, &ErrnoTranslator), Yield::Done);
            assert_eq!(ctx.status(), NtStatus::NOT_IMPLEMENTED);
            assert!(ctx.frame().is_empty());
        }
    }
}
