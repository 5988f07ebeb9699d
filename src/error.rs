//! Error types for nlrpc.

use std::fmt;
use std::io;

use thiserror::Error;

/// Error type for RPC client operations.
///
/// Everything here is a status returned to the caller of a call; nothing in
/// this taxonomy is fatal. The one fatal condition in the crate (destroying a
/// client with pending calls) is an assertion, not an `Error` variant.
#[derive(Debug, Error)]
pub enum Error {
    /// Local serialization failed before any transmission.
    #[error("cannot encode arguments")]
    CannotEncodeArgs,
    /// The reply bytes did not parse as a valid reply header.
    #[error("cannot decode result")]
    CannotDecodeResult,
    /// The authentication capability rejected the reply verifier.
    #[error("reply verifier rejected")]
    AuthInvalid,
    /// The message bus refused the outgoing frame.
    #[error("cannot send request: {0}")]
    CannotSend(#[source] io::Error),
    /// No reply arrived before the retry budget was exhausted, or the client
    /// was torn down while the call was outstanding.
    #[error("cannot receive reply: {0}")]
    CannotReceive(RecvCause),
    /// The peer decoded the call and rejected it.
    #[error("call rejected by peer: {0}")]
    Rejected(RejectCause),
    /// The message bus could not allocate a transport group.
    #[error("cannot allocate a transport group")]
    GroupExhausted,
}

/// Why a call returned [`Error::CannotReceive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvCause {
    /// Every attempt timed out.
    Timeout,
    /// The client was closed while the call was outstanding.
    Shutdown,
    /// The wait was interrupted (interruptible clients only).
    Interrupted,
}

impl fmt::Display for RecvCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecvCause::Timeout => write!(f, "timed out"),
            RecvCause::Shutdown => write!(f, "client closed"),
            RecvCause::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Rejection detail surfaced verbatim from a decoded reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCause {
    /// The remote program is not registered.
    ProgUnavail,
    /// The remote program does not serve the requested version.
    ProgMismatch { low: u32, high: u32 },
    /// The remote program does not implement the procedure.
    ProcUnavail,
    /// The peer could not decode the arguments.
    GarbageArgs,
    /// The peer failed internally while serving the call.
    SystemErr,
    /// The peer speaks a different RPC protocol version.
    RpcMismatch { low: u32, high: u32 },
    /// The peer rejected the call credentials.
    AuthError(u32),
}

impl fmt::Display for RejectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectCause::ProgUnavail => write!(f, "program unavailable"),
            RejectCause::ProgMismatch { low, high } => {
                write!(f, "program version mismatch (supported {}..={})", low, high)
            }
            RejectCause::ProcUnavail => write!(f, "procedure unavailable"),
            RejectCause::GarbageArgs => write!(f, "garbage arguments"),
            RejectCause::SystemErr => write!(f, "remote system error"),
            RejectCause::RpcMismatch { low, high } => {
                write!(f, "RPC version mismatch (supported {}..={})", low, high)
            }
            RejectCause::AuthError(stat) => write!(f, "authentication error (stat {})", stat),
        }
    }
}

/// Result type for nlrpc operations.
pub type Result<T> = std::result::Result<T, Error>;
