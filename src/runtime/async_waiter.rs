// src/runtime/async_waiter.rs

use crate::error::{MojoError, MojoResult};
use crate::system::{Handle, HandleSignals};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Identifies one outstanding registration made through an `AsyncWaiter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsyncWaitId(u64);

impl fmt::Display for AsyncWaitId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Invoked exactly once with the wait outcome, unless the wait is cancelled.
pub type WaitCallback = Box<dyn FnOnce(MojoResult<()>)>;

/// Callback-based readiness notification for message-pipe handles.
///
/// Callbacks run on the thread that registered them, never synchronously from
/// inside `async_wait`. A wait cancelled through `cancel_wait` never invokes
/// its callback.
pub trait AsyncWaiter {
  fn async_wait(
    &self,
    handle: &Handle,
    signals: HandleSignals,
    deadline: Option<Duration>,
    callback: WaitCallback,
  ) -> AsyncWaitId;

  fn cancel_wait(&self, id: AsyncWaitId);
}

type PendingWaits = RefCell<HashMap<AsyncWaitId, JoinHandle<()>>>;

/// `AsyncWaiter` backed by `tokio::task::spawn_local`.
///
/// Each wait is a local task awaiting `Handle::ready`; cancelling aborts the
/// task before it can reach the callback. Must be used from within a
/// `tokio::task::LocalSet`.
pub struct LocalTaskWaiter {
  next_id: Cell<u64>,
  pending: Rc<PendingWaits>,
}

impl LocalTaskWaiter {
  pub fn new() -> Self {
    Self {
      next_id: Cell::new(1),
      pending: Rc::new(RefCell::new(HashMap::new())),
    }
  }

  /// Number of waits registered and not yet fired or cancelled.
  pub fn pending_count(&self) -> usize {
    self.pending.borrow().len()
  }
}

impl Default for LocalTaskWaiter {
  fn default() -> Self {
    Self::new()
  }
}

impl AsyncWaiter for LocalTaskWaiter {
  fn async_wait(
    &self,
    handle: &Handle,
    signals: HandleSignals,
    deadline: Option<Duration>,
    callback: WaitCallback,
  ) -> AsyncWaitId {
    let id = AsyncWaitId(self.next_id.get());
    self.next_id.set(id.0 + 1);

    let handle = handle.clone();
    let pending: Weak<PendingWaits> = Rc::downgrade(&self.pending);
    tracing::trace!(wait_id = id.0, handle = %handle.id(), ?signals, "Async wait registered");

    let task = tokio::task::spawn_local(async move {
      let result = match deadline {
        None => handle.ready(signals).await,
        Some(deadline) => tokio::time::timeout(deadline, handle.ready(signals))
          .await
          .unwrap_or(Err(MojoError::DeadlineExceeded)),
      };
      if let Some(pending) = pending.upgrade() {
        pending.borrow_mut().remove(&id);
      }
      tracing::trace!(wait_id = id.0, ?result, "Async wait fired");
      callback(result);
    });
    self.pending.borrow_mut().insert(id, task);
    id
  }

  fn cancel_wait(&self, id: AsyncWaitId) {
    let task = self.pending.borrow_mut().remove(&id);
    if let Some(task) = task {
      tracing::trace!(wait_id = id.0, "Async wait cancelled");
      task.abort();
    }
  }
}

impl Drop for LocalTaskWaiter {
  fn drop(&mut self) {
    for (_, task) in self.pending.borrow_mut().drain() {
      task.abort();
    }
  }
}

thread_local! {
  static DEFAULT_WAITER: Rc<LocalTaskWaiter> = Rc::new(LocalTaskWaiter::new());
}

/// The calling thread's shared `LocalTaskWaiter`.
pub fn default_waiter() -> Rc<dyn AsyncWaiter> {
  DEFAULT_WAITER.with(|waiter| waiter.clone() as Rc<dyn AsyncWaiter>)
}
