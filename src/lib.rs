//! Kernel side FUSE protocol engine
//!
//! This crate is the protocol translation layer of a file system driver that forwards file
//! system operations to a user space server speaking the FUSE wire protocol. For every
//! operation it frames a request, hands it to a [`Transport`], suspends the operation until
//! the correlated reply arrives (or finishes at once for fire-and-forget requests), and folds
//! the reply's error into a native [`NtStatus`].
//!
//! Operations are [`OperationContext`]s posted to a [`Session`]. Each runs as an explicit
//! state machine whose cursor is stored in the context, so a reply can resume it on any
//! thread. Forget notifications are coalesced: a [`ForgetQueue`] is spliced into one context
//! and drained into as few Forget/BatchForget frames as the frame size allows.

#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

pub use crate::config::Negotiated;
pub use crate::config::SessionConfig;
pub use crate::context::OperationContext;
pub use crate::context::OperationKind;
pub use crate::context::ReplyData;
pub use crate::error::Error;
pub use crate::error::Result;
pub use crate::forget::ForgetCache;
pub use crate::forget::ForgetQueue;
pub use crate::forget::PendingForgets;
pub use crate::forget_one::ForgetOne;
pub use crate::frame_header::Frame;
pub use crate::frame_header::InitRequest;
pub use crate::frame_header::RequestHeader;
pub use crate::identity::CallerIdentity;
pub use crate::identity::IdentityResolver;
pub use crate::identity::ProcessIdentity;
pub use crate::identity::TokenClass;
pub use crate::ll::Errno;
pub use crate::ll::INodeNo;
pub use crate::ll::Unique;
pub use crate::ll::Version;
pub use crate::ll::flags::init_flags::InitFlags;
pub use crate::ll::fuse_abi::FUSE_ROOT_ID;
pub use crate::ll::fuse_abi::consts;
pub use crate::ll::reply::Attr;
pub use crate::ll::reply::Entry;
pub use crate::ll::reply::ReplyFrame;
pub use crate::ll::reply::ReplyHeader;
pub use crate::session::Completion;
pub use crate::session::Progress;
pub use crate::session::Session;
pub use crate::status::ErrnoTranslator;
pub use crate::status::NtStatus;
pub use crate::status::StatusTranslator;
pub use crate::transport::FdTransport;
pub use crate::transport::Transport;

mod config;
mod context;
mod error;
mod forget;
mod forget_one;
mod frame_header;
mod identity;
mod ll;
mod proto;
mod session;
mod status;
mod transport;
