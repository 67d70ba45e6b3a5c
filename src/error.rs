use thiserror::Error;

/// Result codes of the message-pipe primitives.
///
/// Variants follow the result taxonomy of the handle layer: callers that care
/// about the distinction between "peer is gone" and "something else broke"
/// match on `FailedPrecondition` explicitly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum MojoError {
  #[error("Invalid argument: {0}")]
  InvalidArgument(&'static str),

  // --- Readiness ---
  #[error("Operation would block")]
  ShouldWait,
  #[error("Deadline exceeded while waiting")]
  DeadlineExceeded,
  #[error("Wait was cancelled")]
  Cancelled,

  // --- Peer / Handle State ---
  #[error("Failed precondition: peer closed or signals can never be satisfied")]
  FailedPrecondition,
  #[error("Handle is busy")]
  Busy, // Handle in transit or the writing endpoint itself
  #[error("Already exists")]
  AlreadyExists,
  #[error("Not found")]
  NotFound,

  // --- Message Errors ---
  #[error("Invalid message: {0}")]
  InvalidMessage(String),

  // --- Internal Errors ---
  #[error("Internal library error: {0}")]
  Internal(String),
}

impl MojoError {
  /// True for the clean end-of-life condition (the other endpoint is gone).
  pub fn is_peer_closed(&self) -> bool {
    matches!(self, MojoError::FailedPrecondition)
  }
}

/// Convenience alias used by the primitive layer.
pub type MojoResult<T> = Result<T, MojoError>;
