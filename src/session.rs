//! Protocol session
//!
//! A session is the engine's front door for one connection to a user space server. Triggering
//! events post operation contexts to it; it mints their correlation tokens, runs their state
//! machines, hands frames to the transport, and parks the contexts that wait for a reply until
//! the transport resumes them. Every context ends by running its finalize hook exactly once
//! and releasing its token.

use std::fmt;
use std::sync::Arc;

use log::debug;
use log::error;
use log::warn;
use parking_lot::Mutex;
use parking_lot::RwLock;

use crate::Error;
use crate::Result;
use crate::config::Negotiated;
use crate::config::SessionConfig;
use crate::context::ContextTable;
use crate::context::OperationContext;
use crate::context::OperationKind;
use crate::context::ReplyData;
use crate::forget::ForgetCache;
use crate::forget::ForgetQueue;
use crate::identity::CallerIdentity;
use crate::ll::Unique;
use crate::ll::reply::Response;
use crate::ll::request::HEADER_SIZE;
use crate::proto;
use crate::proto::Yield;
use crate::status::ErrnoTranslator;
use crate::status::NtStatus;
use crate::status::StatusTranslator;
use crate::transport::Transport;

/// Final outcome of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Correlation token the operation ran under
    pub unique: Unique,
    /// Kind of operation
    pub kind: OperationKind,
    /// Native result
    pub status: NtStatus,
    /// Data decoded from a successful reply
    pub reply: Option<ReplyData>,
}

/// Where an operation stands after the session ran it as far as it could.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Suspended until the reply for this token is handed to [`Session::resume`].
    Pending(Unique),
    /// Terminal; the context has been finalized and released.
    Completed(Completion),
}

impl Progress {
    /// The token to expect a reply for, if the operation is waiting.
    pub fn pending(&self) -> Option<Unique> {
        match self {
            Progress::Pending(unique) => Some(*unique),
            Progress::Completed(_) => None,
        }
    }

    /// The outcome, if the operation is terminal.
    pub fn completion(&self) -> Option<&Completion> {
        match self {
            Progress::Pending(_) => None,
            Progress::Completed(completion) => Some(completion),
        }
    }
}

/// Protocol session over transport `T`, translating reply errors with `S`.
pub struct Session<T, S = ErrnoTranslator> {
    transport: T,
    translator: S,
    config: SessionConfig,
    negotiated: RwLock<Negotiated>,
    table: Mutex<ContextTable>,
}

impl<T, S> fmt::Debug for Session<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("negotiated", &*self.negotiated.read())
            .field("table", &*self.table.lock())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Session<T> {
    /// Create a session translating reply errors with the default table.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self::with_translator(transport, ErrnoTranslator, config)
    }
}

impl<T: Transport, S: StatusTranslator> Session<T, S> {
    /// Create a session with a custom status translator.
    pub fn with_translator(transport: T, translator: S, config: SessionConfig) -> Self {
        Self {
            transport,
            translator,
            negotiated: RwLock::new(config.initial()),
            table: Mutex::new(ContextTable::new(config.max_contexts())),
            config,
        }
    }

    /// Static configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Values in effect; the configured defaults until an Init reply was accepted.
    pub fn negotiated(&self) -> Negotiated {
        *self.negotiated.read()
    }

    /// The transport frames are handed to.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Operations registered and not yet completed.
    pub fn in_flight(&self) -> usize {
        self.table.lock().in_flight()
    }

    /// Run `ctx` until it completes or waits for a reply.
    pub fn post(&self, ctx: OperationContext) -> Result<Progress> {
        let ctx = self.register(ctx)?;
        Ok(self.drive(ctx, None))
    }

    /// Post the Init negotiation with the configured readahead and capabilities.
    pub fn post_init(&self) -> Result<Progress> {
        self.post(OperationContext::init(
            CallerIdentity::KERNEL,
            self.config.max_readahead(),
            self.config.init_flags(),
        ))
    }

    /// Take over every entry of `donor` and send forgets for them.
    ///
    /// `donor` is left empty and may be reused at once. Entries that go out in a frame the
    /// transport accepted are reported to `cache` as deleted; anything else is handed back
    /// with [`ForgetCache::restore`]. Nothing is taken from `donor` if the call fails.
    pub fn post_forget(
        &self,
        donor: &mut ForgetQueue,
        cache: Arc<dyn ForgetCache>,
    ) -> Result<Progress> {
        if donor.is_empty() {
            return Err(Error::EmptyForgetList);
        }
        let negotiated = self.negotiated();
        let batch = donor.len() > 1
            && self.config.batch_forget()
            && negotiated.supports_batch_forget()
            && proto::batch_forget_capacity(negotiated.max_frame_size) > 0;
        let unique = self.table.lock().reserve()?;
        let mut ctx = OperationContext::forget(donor.take(), batch);
        ctx.on_finalize(move |ctx| {
            if !ctx.confirmed.is_empty() {
                cache.delete_confirmed(&ctx.confirmed);
            }
            let unsent = ctx.forgets.take();
            if !unsent.is_empty() {
                warn!(
                    "returning {} unsent forget entries of {}",
                    unsent.len(),
                    ctx.unique()
                );
                cache.restore(unsent);
            }
        });
        ctx.attach(unique, negotiated.max_frame_size);
        Ok(self.drive(ctx, None))
    }

    /// Hand the reply for `unique` to the context waiting for it.
    ///
    /// A token that names no suspended context is rejected. A reply whose header names another
    /// token is rejected too and leaves the context waiting. A reply that cannot be decoded
    /// terminates the context with [`NtStatus::INVALID_NETWORK_RESPONSE`].
    pub fn resume(&self, unique: Unique, reply: &[u8]) -> Result<Progress> {
        let mut ctx = self.table.lock().take(unique).inspect_err(|err| {
            warn!("rejected reply: {err}");
        })?;
        let response = match Response::parse(reply) {
            Ok(response) if response.unique() != unique => {
                let got = response.unique();
                warn!("reply for {got} delivered to {unique}");
                self.table.lock().park(ctx);
                return Err(Error::UniqueMismatch {
                    expected: unique,
                    got,
                });
            }
            Ok(response) => response,
            Err(err) => {
                warn!("reply to {unique}: {err}");
                ctx.fail(NtStatus::INVALID_NETWORK_RESPONSE);
                return Ok(Progress::Completed(self.complete(ctx)));
            }
        };
        ctx.wake();
        Ok(self.drive(ctx, Some(response)))
    }

    /// Terminate the context waiting under `unique` with `status`, as a transport does when
    /// the server goes away or a request times out.
    pub fn abort(&self, unique: Unique, status: NtStatus) -> Result<Completion> {
        let mut ctx = self.table.lock().take(unique)?;
        debug!("aborting {unique} with {status}");
        ctx.fail(status);
        Ok(self.complete(ctx))
    }

    /// Run `ctx` to completion on the calling thread, blocking in
    /// [`Transport::send_and_wait`] for every reply.
    pub fn call(&self, ctx: OperationContext) -> Result<Completion> {
        let mut ctx = self.register(ctx)?;
        let mut reply: Option<Vec<u8>> = None;
        loop {
            let bytes = reply.take();
            let response = match bytes.as_deref().map(Response::parse).transpose() {
                Ok(Some(response)) if response.unique() != ctx.unique() => {
                    warn!(
                        "reply for {} delivered to {}",
                        response.unique(),
                        ctx.unique()
                    );
                    ctx.fail(NtStatus::INVALID_NETWORK_RESPONSE);
                    break;
                }
                Ok(response) => response,
                Err(err) => {
                    warn!("reply to {}: {err}", ctx.unique());
                    ctx.fail(NtStatus::INVALID_NETWORK_RESPONSE);
                    break;
                }
            };
            match proto::step(&mut ctx, response.as_ref(), &self.translator) {
                Yield::Done => break,
                Yield::Submit { wants_reply: false } => self.submit_oneway(&mut ctx),
                Yield::Submit { wants_reply: true } => {
                    match self.transport.send_and_wait(ctx.frame()) {
                        Ok(Some(bytes)) => {
                            ctx.wake();
                            reply = Some(bytes);
                        }
                        Ok(None) => {
                            error!("no reply to {}", ctx.unique());
                            ctx.fail(NtStatus::CONNECTION_ABORTED);
                        }
                        Err(status) => {
                            error!("failed to send {}: {status}", ctx.unique());
                            ctx.fail(status);
                        }
                    }
                }
            }
        }
        Ok(self.complete(ctx))
    }

    /// Checks `ctx` against the limits in effect and gives it a token.
    fn register(&self, mut ctx: OperationContext) -> Result<OperationContext> {
        let capacity = self.negotiated.read().max_frame_size;
        if ctx.kind() == OperationKind::Lookup {
            if let Some(len) = ctx.name_len() {
                let max = self
                    .config
                    .max_name_len()
                    .min(capacity.saturating_sub(HEADER_SIZE + 1));
                if len > max {
                    return Err(Error::NameTooLong { len, max });
                }
            }
        }
        let unique = self.table.lock().reserve()?;
        ctx.attach(unique, capacity);
        Ok(ctx)
    }

    /// Steps `ctx` until it is terminal or parked.
    fn drive(&self, mut ctx: OperationContext, mut reply: Option<Response<'_>>) -> Progress {
        loop {
            let current = reply.take();
            match proto::step(&mut ctx, current.as_ref(), &self.translator) {
                Yield::Done => return Progress::Completed(self.complete(ctx)),
                Yield::Submit { wants_reply: false } => self.submit_oneway(&mut ctx),
                Yield::Submit { wants_reply: true } => {
                    let unique = ctx.unique();
                    // Parked before the frame leaves: the reply may come back on another
                    // thread before submit returns.
                    let request = ctx.take_request();
                    self.table.lock().park(ctx);
                    let frame = request.as_ref().map_or(&[][..], |r| r.as_bytes());
                    let Err(status) = self.transport.submit(frame, unique, true) else {
                        return Progress::Pending(unique);
                    };
                    error!("failed to send {unique}: {status}");
                    match self.table.lock().take(unique) {
                        Ok(taken) => {
                            ctx = taken;
                            ctx.fail(status);
                        }
                        Err(err) => {
                            // Completed by a resume or abort the transport raced in.
                            warn!("context {unique} gone after failed submit: {err}");
                            return Progress::Pending(unique);
                        }
                    }
                }
            }
        }
    }

    fn submit_oneway(&self, ctx: &mut OperationContext) {
        match self.transport.submit(ctx.frame(), ctx.unique(), false) {
            Ok(()) => ctx.commit_forgets(),
            Err(status) => {
                error!("failed to send {}: {status}", ctx.unique());
                ctx.rollback_forgets();
                ctx.fail(status);
            }
        }
    }

    /// Finalizes `ctx`, releases its token and applies what an Init reply negotiated.
    fn complete(&self, mut ctx: OperationContext) -> Completion {
        ctx.finalize();
        self.table.lock().release(ctx.unique());
        if let Some(ReplyData::Init(negotiated)) = ctx.reply() {
            *self.negotiated.write() = *negotiated;
        }
        debug!(
            "{:?} {} completed with {}",
            ctx.kind(),
            ctx.unique(),
            ctx.status()
        );
        Completion {
            unique: ctx.unique(),
            kind: ctx.kind(),
            status: ctx.status(),
            reply: ctx.reply().copied(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ll::INodeNo;
    use crate::ll::reply::ReplyFrame;

    #[derive(Default)]
    struct Sink {
        frames: Mutex<Vec<(Vec<u8>, Unique, bool)>>,
        fail: bool,
    }

    impl Transport for Sink {
        fn submit(
            &self,
            frame: &[u8],
            unique: Unique,
            wants_reply: bool,
        ) -> std::result::Result<(), NtStatus> {
            if self.fail {
                return Err(NtStatus::CONNECTION_ABORTED);
            }
            self.frames.lock().push((frame.to_vec(), unique, wants_reply));
            Ok(())
        }

        fn send_and_wait(
            &self,
            _frame: &[u8],
        ) -> std::result::Result<Option<Vec<u8>>, NtStatus> {
            Ok(None)
        }
    }

    #[test]
    fn getattr_round_trip() {
        let session = Session::new(Sink::default(), SessionConfig::default());
        let progress = session
            .post(OperationContext::getattr(INodeNo(1), CallerIdentity::KERNEL))
            .unwrap();
        let unique = progress.pending().unwrap();
        assert_eq!(session.in_flight(), 1);
        let frames = session.transport().frames.lock().clone();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].1, unique);
        assert!(frames[0].2);

        let reply = ReplyFrame::new_empty().to_vec(unique);
        let progress = session.resume(unique, &reply).unwrap();
        let completion = progress.completion().unwrap();
        assert_eq!(completion.status, NtStatus::SUCCESS);
        assert_eq!(session.in_flight(), 0);
    }

    #[test]
    fn failed_submit_completes_immediately() {
        let sink = Sink {
            fail: true,
            ..Sink::default()
        };
        let session = Session::new(sink, SessionConfig::default());
        let progress = session
            .post(OperationContext::getattr(INodeNo(1), CallerIdentity::KERNEL))
            .unwrap();
        assert_eq!(
            progress.completion().unwrap().status,
            NtStatus::CONNECTION_ABORTED
        );
        assert_eq!(session.in_flight(), 0);
    }

    #[test]
    fn call_without_reply_is_aborted() {
        let session = Session::new(Sink::default(), SessionConfig::default());
        let completion = session
            .call(OperationContext::getattr(INodeNo(1), CallerIdentity::KERNEL))
            .unwrap();
        assert_eq!(completion.status, NtStatus::CONNECTION_ABORTED);
    }
}
