use crate::system::activity_monitor;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// An auto-reset event that can be signalled from any thread and watched by a
/// `SyncHandleRegistry` alongside message-pipe handles.
#[derive(Clone)]
pub struct SyncEvent {
  inner: Arc<EventInner>,
}

struct EventInner {
  id: u64,
  signaled: AtomicBool,
}

impl SyncEvent {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(EventInner {
        id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
        signaled: AtomicBool::new(false),
      }),
    }
  }

  pub fn id(&self) -> u64 {
    self.inner.id
  }

  pub fn signal(&self) {
    self.inner.signaled.store(true, Ordering::Release);
    activity_monitor().bump();
  }

  pub fn is_signaled(&self) -> bool {
    self.inner.signaled.load(Ordering::Acquire)
  }

  pub fn reset(&self) {
    self.inner.signaled.store(false, Ordering::Release);
  }

  /// Clears the signal, returning whether it was set.
  pub(crate) fn consume(&self) -> bool {
    self.inner.signaled.swap(false, Ordering::AcqRel)
  }
}

impl Default for SyncEvent {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Debug for SyncEvent {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SyncEvent")
      .field("id", &self.inner.id)
      .field("signaled", &self.is_signaled())
      .finish()
  }
}
