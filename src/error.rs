//! Crate-wide error type.
//!
//! One variant per error kind in the propagation policy: locally retriable
//! kinds (`Conflict`, `RpcTimeout` on idempotent ops) are retried by the
//! scheduler; others are returned to the caller as-is.

use thiserror::Error;

use crate::id::Id;

#[derive(Error, Debug, Clone)]
pub enum HermesError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict on {0}, retry")]
    Conflict(String),

    #[error("no space: {0}")]
    NoSpace(String),

    #[error("io error on target {target}: {detail}")]
    Io { target: String, detail: String },

    #[error("rpc timed out calling node {0}")]
    RpcTimeout(u32),

    #[error("rpc unreachable: node {0}")]
    RpcUnreachable(u32),

    #[error("rpc remote abort: {0}")]
    RpcRemoteAbort(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid range: {0}")]
    RangeInvalid(String),

    #[error("task cancelled")]
    Cancelled,

    #[error("daemon shutting down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, HermesError>;

impl HermesError {
    /// Whether the scheduler may retry this error automatically.
    ///
    /// `idempotent` must reflect whether the *operation*, not just the
    /// error kind, is safe to replay (a `Conflict` is always retriable; an
    /// `RpcTimeout` only for idempotent ops, per the propagation policy).
    pub fn is_retriable(&self, idempotent: bool) -> bool {
        match self {
            HermesError::Conflict(_) => true,
            HermesError::RpcTimeout(_) => idempotent,
            _ => false,
        }
    }

    /// Whether this error should unwind the current task and, for
    /// `Shutdown`, initiate daemon drain.
    pub fn is_fatal(&self) -> bool {
        matches!(self, HermesError::Shutdown)
    }

    pub fn not_found<T: std::fmt::Display>(what: T) -> Self {
        HermesError::NotFound(what.to_string())
    }

    pub fn blob_not_found(id: Id<crate::id::BlobTag>) -> Self {
        HermesError::NotFound(format!("blob {id}"))
    }
}
