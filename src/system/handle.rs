use crate::system::message_pipe::Endpoint;
use std::fmt;

/// Process-unique identity of a message-pipe endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub(crate) u64);

impl HandleId {
  pub const INVALID: HandleId = HandleId(0);

  pub fn value(self) -> u64 {
    self.0
  }
}

impl fmt::Display for HandleId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Non-owning reference to one endpoint of a message pipe.
///
/// Cloning a `Handle` does not keep the endpoint open; only the owning
/// `ScopedMessagePipeHandle` decides when it closes. A default `Handle` is
/// invalid and every operation on it fails with `InvalidArgument`.
#[derive(Clone, Default)]
pub struct Handle {
  pub(crate) endpoint: Option<Endpoint>,
}

impl Handle {
  pub fn invalid() -> Self {
    Self::default()
  }

  pub(crate) fn from_endpoint(endpoint: Endpoint) -> Self {
    Self {
      endpoint: Some(endpoint),
    }
  }

  pub fn id(&self) -> HandleId {
    self.endpoint.as_ref().map_or(HandleId::INVALID, |e| e.id())
  }

  /// True while the endpoint exists and has not been closed.
  pub fn is_valid(&self) -> bool {
    self.endpoint.as_ref().map_or(false, |e| !e.is_closed())
  }
}

impl PartialEq for Handle {
  fn eq(&self, other: &Self) -> bool {
    self.id() == other.id()
  }
}

impl Eq for Handle {}

impl fmt::Debug for Handle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Handle")
      .field("id", &self.id().0)
      .field("valid", &self.is_valid())
      .finish()
  }
}

/// Owning wrapper around a message-pipe endpoint. Dropping it closes the
/// endpoint, which the peer observes as `PEER_CLOSED`.
#[derive(Default)]
pub struct ScopedMessagePipeHandle {
  handle: Handle,
}

impl ScopedMessagePipeHandle {
  pub(crate) fn new(handle: Handle) -> Self {
    Self { handle }
  }

  pub fn invalid() -> Self {
    Self::default()
  }

  pub fn get(&self) -> Handle {
    self.handle.clone()
  }

  pub fn id(&self) -> HandleId {
    self.handle.id()
  }

  pub fn is_valid(&self) -> bool {
    self.handle.is_valid()
  }

  /// Moves ownership out, leaving `self` invalid.
  pub fn take(&mut self) -> ScopedMessagePipeHandle {
    std::mem::take(self)
  }

  /// Closes the endpoint now. Safe to call on an invalid handle.
  pub fn close(&mut self) {
    if let Some(endpoint) = self.handle.endpoint.take() {
      endpoint.close();
    }
  }
}

impl Drop for ScopedMessagePipeHandle {
  fn drop(&mut self) {
    self.close();
  }
}

impl fmt::Debug for ScopedMessagePipeHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("ScopedMessagePipeHandle").field(&self.handle).finish()
  }
}
