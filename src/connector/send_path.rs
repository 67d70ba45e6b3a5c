use crate::connector::ConnectorConfig;
use crate::error::MojoError;
use crate::message::{Message, MessageReceiver};
use crate::system::ScopedMessagePipeHandle;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State shared between the send path and the read/error path.
pub(crate) struct PipeSlot {
  pub handle: ScopedMessagePipeHandle,
  /// Set once a write found the peer gone; later writes succeed silently.
  pub drop_writes: bool,
}

/// Storage for the `PipeSlot`: a plain `RefCell` for single-threaded send, a
/// shared mutex when other threads may write.
pub(crate) enum SendPath {
  Local(RefCell<PipeSlot>),
  Shared(Arc<Mutex<PipeSlot>>),
}

impl SendPath {
  pub fn new(handle: ScopedMessagePipeHandle, config: ConnectorConfig) -> Self {
    let slot = PipeSlot {
      handle,
      drop_writes: false,
    };
    match config {
      ConnectorConfig::SingleThreadedSend => SendPath::Local(RefCell::new(slot)),
      ConnectorConfig::MultiThreadedSend => SendPath::Shared(Arc::new(Mutex::new(slot))),
    }
  }

  /// Runs `f` with exclusive access to the slot. `f` must not re-enter the
  /// connector.
  pub fn with_slot<R>(&self, f: impl FnOnce(&mut PipeSlot) -> R) -> R {
    match self {
      SendPath::Local(slot) => f(&mut slot.borrow_mut()),
      SendPath::Shared(slot) => f(&mut slot.lock()),
    }
  }

  pub fn shared_slot(&self) -> Option<Arc<Mutex<PipeSlot>>> {
    match self {
      SendPath::Local(_) => None,
      SendPath::Shared(slot) => Some(slot.clone()),
    }
  }
}

/// Writes `message` through the slot, applying the connector's write policy.
///
/// * invalid handle or dropped writes: success without touching the pipe;
/// * peer gone: success, and every later write is dropped;
/// * handle busy: panic, the transport state is undefined;
/// * anything else: failure of this call only.
pub(crate) fn write_through_slot(slot: &mut PipeSlot, message: &mut Message) -> bool {
  if !slot.handle.is_valid() || slot.drop_writes {
    return true;
  }

  let handle = slot.handle.get();
  match handle.write_message(message.data_bytes(), message.handles_mut()) {
    Ok(()) => {
      // Attached handles now belong to the transport.
      debug_assert!(message.handles().is_empty());
      tracing::trace!(pipe = %handle.id(), bytes = message.data_num_bytes(), "Message written");
      true
    }
    Err(MojoError::FailedPrecondition) => {
      // The peer is gone. Keep reporting success so the owner drains its
      // backlog; the read side surfaces the error exactly once.
      tracing::debug!(pipe = %handle.id(), "Peer closed, dropping this and all further writes");
      slot.drop_writes = true;
      true
    }
    Err(MojoError::Busy) => {
      tracing::error!(pipe = %handle.id(), "Write reported a busy handle");
      panic!("Race condition or other bug detected: message carries a busy handle");
    }
    Err(e) => {
      tracing::warn!(pipe = %handle.id(), error = %e, "Write rejected");
      false
    }
  }
}

/// Thread-safe send endpoint of a connector created with
/// `ConnectorConfig::MultiThreadedSend`.
///
/// Shares the connector's locked pipe slot, so writes from any thread are
/// serialized with the owner's reset and close paths.
#[derive(Clone)]
pub struct ConnectorSender {
  slot: Arc<Mutex<PipeSlot>>,
  error: Arc<AtomicBool>,
}

impl ConnectorSender {
  pub(crate) fn new(slot: Arc<Mutex<PipeSlot>>, error: Arc<AtomicBool>) -> Self {
    Self { slot, error }
  }

  /// Same contract as `Connector::accept`.
  pub fn accept(&self, message: &mut Message) -> bool {
    // A stale read only means one extra write into a pipe that already failed.
    if self.error.load(Ordering::Acquire) {
      return false;
    }
    write_through_slot(&mut self.slot.lock(), message)
  }
}

impl MessageReceiver for ConnectorSender {
  fn accept(&self, message: &mut Message) -> bool {
    ConnectorSender::accept(self, message)
  }
}
