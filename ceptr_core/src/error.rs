//! The matchable error taxonomy for routing, resolution and delivery.
//!
//! Reducer-level failures are not here: those are data, written into the
//! failing run tree as `REDUCTION_ERROR` subtrees (see [`crate::process`]).
//! Everything else uses either these variants (when a caller needs to match
//! on the kind) or the plain [`crate::CeptrError`] boxed error.

use crate::{ReceptorAddress, SemanticId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    #[error("no receptor at address {0}")]
    BadAddress(i32),
    #[error("the routing table is full")]
    TooManyReceptors,
    #[error("the active receptor list is full")]
    TooManyActive,
    #[error("receptor at {0:?} is not alive")]
    DeadReceptor(ReceptorAddress),
    #[error("protocol {0:?} is not defined")]
    ProtocolNotFound(SemanticId),
    #[error("no binding for goal {0:?}")]
    UnboundGoal(SemanticId),
    #[error("no binding for usage {0:?}")]
    UnboundUsage(SemanticId),
    #[error("protocol definition error: {0}")]
    ProtocolBuild(String),
    #[error("malformed signal: {0}")]
    BadSignalShape(&'static str),
    #[error("a senderless signal cannot use the self address")]
    SelfWithoutSender,
    #[error("run tree construction failed: {0}")]
    RunTree(String),
}

/// What happened to a delivered signal. `NoMatch` is informational, not a
/// failure: the signal is recorded on the aspect either way.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    NoMatch,
}
