//! Operation contexts
//!
//! An operation context is the unit of work of the engine: the arguments of one operation,
//! the identity snapshot of its caller, its request buffer, the step its state machine will
//! resume at, and its result. Between the request and the reply a context lives in the
//! session's [`ContextTable`], addressed by its correlation token.

use std::ffi::OsStr;
use std::fmt;
use std::os::unix::ffi::OsStrExt;

use log::warn;

use crate::Error;
use crate::config::Negotiated;
use crate::forget::ForgetQueue;
use crate::identity::CallerIdentity;
use crate::ll::INodeNo;
use crate::ll::Unique;
use crate::ll::flags::init_flags::InitFlags;
use crate::ll::fuse_abi::fuse_opcode;
use crate::ll::reply::Attr;
use crate::ll::reply::Entry;
use crate::ll::request::RequestBuf;
use crate::status::NtStatus;

/// Operation kinds the engine knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Version and capability negotiation.
    Init,
    /// Resolve a name inside a directory.
    Lookup,
    /// Fetch attributes of an inode.
    Getattr,
    /// Drop the lookup count of one inode.
    Forget,
    /// Drop the lookup count of several inodes at once.
    BatchForget,
    /// Create and open a file. Not implemented.
    Create,
    /// Open a file. Not implemented.
    Open,
}

impl OperationKind {
    pub(crate) fn opcode(self) -> fuse_opcode {
        match self {
            OperationKind::Init => fuse_opcode::FUSE_INIT,
            OperationKind::Lookup => fuse_opcode::FUSE_LOOKUP,
            OperationKind::Getattr => fuse_opcode::FUSE_GETATTR,
            OperationKind::Forget => fuse_opcode::FUSE_FORGET,
            OperationKind::BatchForget => fuse_opcode::FUSE_BATCH_FORGET,
            OperationKind::Create => fuse_opcode::FUSE_CREATE,
            OperationKind::Open => fuse_opcode::FUSE_OPEN,
        }
    }

    pub(crate) fn from_opcode(opcode: fuse_opcode) -> Self {
        match opcode {
            fuse_opcode::FUSE_INIT => OperationKind::Init,
            fuse_opcode::FUSE_LOOKUP => OperationKind::Lookup,
            fuse_opcode::FUSE_GETATTR => OperationKind::Getattr,
            fuse_opcode::FUSE_FORGET => OperationKind::Forget,
            fuse_opcode::FUSE_BATCH_FORGET => OperationKind::BatchForget,
            fuse_opcode::FUSE_CREATE => OperationKind::Create,
            fuse_opcode::FUSE_OPEN => OperationKind::Open,
        }
    }

    /// Whether a request of this kind is answered by the server.
    pub fn wants_reply(self) -> bool {
        !matches!(self, OperationKind::Forget | OperationKind::BatchForget)
    }
}

/// Where a state machine stands.
///
/// The step index is all that survives between the request and the reply; anything else a
/// later step needs is kept in the context itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Cursor {
    /// Runnable at the given step.
    Ready(u8),
    /// Waiting for a reply; resumes at the given step.
    Suspended(u8),
    /// Terminal.
    Done,
}

/// Data decoded from a successful reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyData {
    /// Init reply.
    Init(Negotiated),
    /// Lookup reply.
    Entry(Entry),
    /// Getattr reply.
    Attr(Attr),
}

/// Arguments only some kinds carry.
#[derive(Debug)]
pub(crate) enum Args {
    None,
    Init {
        max_readahead: u32,
        flags: InitFlags,
    },
    Name(Vec<u8>),
}

type FinalizeHook = Box<dyn FnOnce(&mut OperationContext) + Send>;

/// One operation, from the triggering event to its final status.
pub struct OperationContext {
    kind: OperationKind,
    ino: INodeNo,
    pub(crate) args: Args,
    identity: CallerIdentity,
    unique: Unique,
    pub(crate) capacity: usize,
    pub(crate) cursor: Cursor,
    pub(crate) status: NtStatus,
    pub(crate) reply: Option<ReplyData>,
    pub(crate) request: Option<RequestBuf>,
    pub(crate) forgets: ForgetQueue,
    pub(crate) in_flight: Vec<INodeNo>,
    pub(crate) confirmed: Vec<INodeNo>,
    finalize: Option<FinalizeHook>,
}

impl fmt::Debug for OperationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationContext")
            .field("kind", &self.kind)
            .field("ino", &self.ino)
            .field("unique", &self.unique)
            .field("cursor", &self.cursor)
            .field("status", &self.status)
            .field("forgets", &self.forgets.len())
            .finish_non_exhaustive()
    }
}

impl OperationContext {
    fn new(kind: OperationKind, ino: INodeNo, args: Args, identity: CallerIdentity) -> Self {
        Self {
            kind,
            ino,
            args,
            identity,
            unique: Unique(0),
            capacity: 0,
            cursor: Cursor::Ready(0),
            status: NtStatus::SUCCESS,
            reply: None,
            request: None,
            forgets: ForgetQueue::new(),
            in_flight: Vec::new(),
            confirmed: Vec::new(),
            finalize: None,
        }
    }

    pub(crate) fn init(identity: CallerIdentity, max_readahead: u32, flags: InitFlags) -> Self {
        Self::new(
            OperationKind::Init,
            INodeNo(0),
            Args::Init {
                max_readahead,
                flags,
            },
            identity,
        )
    }

    /// Lookup of `name` in directory `parent`.
    ///
    /// The name must not contain NUL; its length is checked against the session limits when
    /// the operation is posted.
    pub fn lookup(
        parent: INodeNo,
        name: impl AsRef<OsStr>,
        identity: CallerIdentity,
    ) -> Result<Self, Error> {
        let name = name.as_ref().as_bytes();
        if memchr::memchr(0, name).is_some() {
            return Err(Error::InvalidName);
        }
        Ok(Self::new(
            OperationKind::Lookup,
            parent,
            Args::Name(name.to_vec()),
            identity,
        ))
    }

    /// Attribute fetch of `ino`.
    pub fn getattr(ino: INodeNo, identity: CallerIdentity) -> Self {
        Self::new(OperationKind::Getattr, ino, Args::None, identity)
    }

    /// Create of `name` in `parent`. Terminates as not implemented without contacting the
    /// server.
    pub fn create(parent: INodeNo, name: impl AsRef<OsStr>, identity: CallerIdentity) -> Self {
        let name = name.as_ref().as_bytes().to_vec();
        Self::new(OperationKind::Create, parent, Args::Name(name), identity)
    }

    /// Open of `ino`. Terminates as not implemented without contacting the server.
    pub fn open(ino: INodeNo, identity: CallerIdentity) -> Self {
        Self::new(OperationKind::Open, ino, Args::None, identity)
    }

    /// A forget context owning `forgets`. `batch` selects BatchForget framing.
    pub(crate) fn forget(forgets: ForgetQueue, batch: bool) -> Self {
        let kind = if batch {
            OperationKind::BatchForget
        } else {
            OperationKind::Forget
        };
        let mut ctx = Self::new(kind, INodeNo(0), Args::None, CallerIdentity::KERNEL);
        ctx.forgets = forgets;
        ctx
    }

    /// Registers a hook run exactly once, after the last step and before the context is
    /// dropped.
    pub fn on_finalize(&mut self, hook: impl FnOnce(&mut OperationContext) + Send + 'static) {
        assert!(self.finalize.is_none(), "finalize hook already set");
        self.finalize = Some(Box::new(hook));
    }

    /// Kind of operation.
    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Target inode (the parent directory for name based operations).
    pub fn ino(&self) -> INodeNo {
        self.ino
    }

    /// Name argument of name based operations.
    pub fn name(&self) -> Option<&OsStr> {
        match &self.args {
            Args::Name(name) => Some(OsStr::from_bytes(name)),
            _ => None,
        }
    }

    /// Caller identity captured at creation.
    pub fn identity(&self) -> &CallerIdentity {
        &self.identity
    }

    /// Correlation token; zero until the context is posted.
    pub fn unique(&self) -> Unique {
        self.unique
    }

    /// Result so far; final once the context is terminal.
    pub fn status(&self) -> NtStatus {
        self.status
    }

    /// Decoded reply data, if the reply carried any.
    pub fn reply(&self) -> Option<&ReplyData> {
        self.reply.as_ref()
    }

    /// Forget entries still owned and not yet sent.
    pub fn forgets(&self) -> &ForgetQueue {
        &self.forgets
    }

    /// Forget entries that went out in a successfully submitted frame.
    pub fn confirmed_forgets(&self) -> &[INodeNo] {
        &self.confirmed
    }

    /// Whether the state machine reached its terminal step.
    pub fn is_done(&self) -> bool {
        self.cursor == Cursor::Done
    }

    pub(crate) fn name_len(&self) -> Option<usize> {
        match &self.args {
            Args::Name(name) => Some(name.len()),
            _ => None,
        }
    }

    /// Binds the context to its token and frame capacity. The request buffer is allocated by
    /// the first step that frames a request.
    pub(crate) fn attach(&mut self, unique: Unique, capacity: usize) {
        self.unique = unique;
        self.capacity = capacity;
    }

    /// Takes the built frame out, leaving the context free to be parked and resumed elsewhere.
    pub(crate) fn take_request(&mut self) -> Option<RequestBuf> {
        self.request.take()
    }

    /// A suspended context becomes runnable at the step it was suspended at.
    pub(crate) fn wake(&mut self) {
        if let Cursor::Suspended(n) = self.cursor {
            self.cursor = Cursor::Ready(n);
        }
    }

    /// The frame built by the last step.
    pub(crate) fn frame(&self) -> &[u8] {
        match &self.request {
            Some(buf) if !buf.is_empty() => buf.as_bytes(),
            _ => &[],
        }
    }

    /// Terminates with `status`, skipping any step still ahead.
    pub(crate) fn fail(&mut self, status: NtStatus) {
        self.status = status;
        self.cursor = Cursor::Done;
    }

    /// The frame holding `in_flight` entries was accepted by the transport.
    pub(crate) fn commit_forgets(&mut self) {
        self.confirmed.append(&mut self.in_flight);
    }

    /// The frame holding `in_flight` entries never left; they go back to the owned list.
    pub(crate) fn rollback_forgets(&mut self) {
        if !self.in_flight.is_empty() {
            warn!(
                "{} forget entries of {} were not sent",
                self.in_flight.len(),
                self.unique
            );
            self.forgets.restore_front(&self.in_flight);
            self.in_flight.clear();
        }
    }

    /// Runs the finalize hook. A second call is a no-op.
    pub(crate) fn finalize(&mut self) {
        debug_assert_eq!(self.cursor, Cursor::Done, "finalize before terminal step");
        self.rollback_forgets();
        if let Some(hook) = self.finalize.take() {
            hook(self);
        }
    }
}

enum SlotState {
    Free,
    /// Handed out to the thread currently stepping the context.
    Running,
    Suspended(OperationContext),
}

struct Slot {
    generation: u32,
    state: SlotState,
}

/// Live contexts, addressed by correlation token.
///
/// A token is the slot index plus the slot's generation at the time the context was
/// registered. Freeing a slot keeps its generation; reusing it bumps the generation, so a
/// token outlives its context only as a value that no longer resolves.
pub(crate) struct ContextTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
    max: usize,
    running: usize,
}

impl fmt::Debug for ContextTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextTable")
            .field("slots", &self.slots.len())
            .field("free", &self.free.len())
            .field("max", &self.max)
            .finish()
    }
}

impl ContextTable {
    pub(crate) fn new(max: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            max: max.min(u32::MAX as usize),
            running: 0,
        }
    }

    /// Mints a token for a new context and marks its slot running.
    pub(crate) fn reserve(&mut self) -> Result<Unique, Error> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < self.max => {
                self.slots.push(Slot {
                    generation: 0,
                    state: SlotState::Free,
                });
                (self.slots.len() - 1) as u32
            }
            None => return Err(Error::Exhausted),
        };
        let slot = &mut self.slots[index as usize];
        // Generation zero is skipped so no token is ever zero, the unique of notifications.
        slot.generation = match slot.generation.wrapping_add(1) {
            0 => 1,
            g => g,
        };
        slot.state = SlotState::Running;
        self.running += 1;
        Ok(Unique::new(index, slot.generation))
    }

    fn slot_mut(&mut self, unique: Unique) -> Result<&mut Slot, Error> {
        match self.slots.get_mut(unique.index()) {
            Some(slot) if slot.generation == unique.generation() => Ok(slot),
            _ => Err(Error::StaleToken(unique)),
        }
    }

    /// Parks a running context until its reply arrives.
    pub(crate) fn park(&mut self, ctx: OperationContext) {
        let unique = ctx.unique();
        let slot = self
            .slot_mut(unique)
            .unwrap_or_else(|_| panic!("parking unregistered context {unique}"));
        assert!(
            matches!(slot.state, SlotState::Running),
            "parking context {unique} that is not running"
        );
        slot.state = SlotState::Suspended(ctx);
        self.running -= 1;
    }

    /// Takes a suspended context out to resume it.
    pub(crate) fn take(&mut self, unique: Unique) -> Result<OperationContext, Error> {
        let slot = self.slot_mut(unique)?;
        match std::mem::replace(&mut slot.state, SlotState::Running) {
            SlotState::Suspended(ctx) => {
                self.running += 1;
                Ok(ctx)
            }
            SlotState::Running => Err(Error::NotSuspended(unique)),
            SlotState::Free => {
                slot.state = SlotState::Free;
                Err(Error::StaleToken(unique))
            }
        }
    }

    /// Frees the slot of a running context that reached its end.
    pub(crate) fn release(&mut self, unique: Unique) {
        let Ok(slot) = self.slot_mut(unique) else {
            panic!("releasing unregistered context {unique}");
        };
        assert!(
            matches!(slot.state, SlotState::Running),
            "releasing context {unique} that is not running"
        );
        slot.state = SlotState::Free;
        self.running -= 1;
        self.free.push(unique.index() as u32);
    }

    /// Contexts parked awaiting a reply.
    pub(crate) fn suspended(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s.state, SlotState::Suspended(_)))
            .count()
    }

    /// Contexts registered and not yet released.
    pub(crate) fn in_flight(&self) -> usize {
        self.running + self.suspended()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parked(table: &mut ContextTable) -> Unique {
        let unique = table.reserve().unwrap();
        let mut ctx = OperationContext::getattr(INodeNo(1), CallerIdentity::KERNEL);
        ctx.attach(unique, 4096);
        ctx.cursor = Cursor::Suspended(1);
        table.park(ctx);
        unique
    }

    #[test]
    fn tokens_are_unique_and_nonzero() {
        let mut table = ContextTable::new(8);
        let a = table.reserve().unwrap();
        let b = table.reserve().unwrap();
        assert_ne!(a, b);
        assert_ne!(a.0, 0);
        assert_ne!(b.0, 0);
    }

    #[test]
    fn reused_slot_gets_new_generation() {
        let mut table = ContextTable::new(1);
        let a = table.reserve().unwrap();
        table.release(a);
        let b = table.reserve().unwrap();
        assert_eq!(a.index(), b.index());
        assert_ne!(a, b);
        assert!(matches!(table.take(a), Err(Error::StaleToken(_))));
    }

    #[test]
    fn exhausted() {
        let mut table = ContextTable::new(1);
        table.reserve().unwrap();
        assert_eq!(table.reserve(), Err(Error::Exhausted));
    }

    #[test]
    fn take_once() {
        let mut table = ContextTable::new(4);
        let unique = parked(&mut table);
        assert_eq!(table.suspended(), 1);
        let ctx = table.take(unique).unwrap();
        assert_eq!(ctx.unique(), unique);
        assert_eq!(table.take(unique).unwrap_err(), Error::NotSuspended(unique));
        table.release(unique);
        assert_eq!(table.take(unique).unwrap_err(), Error::StaleToken(unique));
        assert_eq!(table.in_flight(), 0);
    }

    #[test]
    fn unknown_index() {
        let mut table = ContextTable::new(4);
        let bogus = Unique::new(3, 1);
        assert_eq!(table.take(bogus).unwrap_err(), Error::StaleToken(bogus));
    }

    #[test]
    fn lookup_rejects_nul() {
        assert_eq!(
            OperationContext::lookup(INodeNo(1), "a\0b", CallerIdentity::KERNEL).unwrap_err(),
            Error::InvalidName
        );
    }

    #[test]
    fn finalize_runs_once() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let mut ctx = OperationContext::open(INodeNo(2), CallerIdentity::KERNEL);
        let counter = calls.clone();
        ctx.on_finalize(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        ctx.cursor = Cursor::Done;
        ctx.finalize();
        ctx.finalize();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
