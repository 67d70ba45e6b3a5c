use crate::error::{MojoError, MojoResult};
use crate::message::Message;
use crate::system::{activity_monitor, Handle, HandleId, HandleSignals, HandleSignalsState, ScopedMessagePipeHandle};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Factory for connected endpoint pairs.
pub struct MessagePipe;

impl MessagePipe {
  /// Creates a pipe and returns its two endpoints. A message written on one
  /// endpoint becomes readable on the other, in write order.
  #[allow(clippy::new_ret_no_self)]
  pub fn new() -> (ScopedMessagePipeHandle, ScopedMessagePipeHandle) {
    let first = NEXT_HANDLE_ID.fetch_add(2, Ordering::Relaxed);
    let inner = Arc::new(PipeInner {
      ids: [HandleId(first), HandleId(first + 1)],
      state: Mutex::new(PipeState::default()),
      notify: [Notify::new(), Notify::new()],
    });
    tracing::trace!(handle0 = first, handle1 = first + 1, "Message pipe created");
    let endpoint = |side| {
      ScopedMessagePipeHandle::new(Handle::from_endpoint(Endpoint {
        pipe: inner.clone(),
        side,
      }))
    };
    (endpoint(0), endpoint(1))
  }
}

pub(crate) struct PipeInner {
  ids: [HandleId; 2],
  state: Mutex<PipeState>,
  // Woken whenever the signals of the corresponding side may have changed.
  notify: [Notify; 2],
}

#[derive(Default)]
struct PipeState {
  // queues[i] holds the messages readable from endpoint i.
  queues: [VecDeque<Message>; 2],
  closed: [bool; 2],
}

impl PipeState {
  fn signals_state(&self, side: usize) -> HandleSignalsState {
    let peer = 1 - side;
    let has_messages = !self.queues[side].is_empty();
    let peer_open = !self.closed[peer];

    let mut satisfied = HandleSignals::empty();
    let mut satisfiable = HandleSignals::PEER_CLOSED;
    if has_messages {
      satisfied |= HandleSignals::READABLE;
      satisfiable |= HandleSignals::READABLE;
    }
    if peer_open {
      satisfied |= HandleSignals::WRITABLE;
      satisfiable |= HandleSignals::READABLE | HandleSignals::WRITABLE;
    } else {
      satisfied |= HandleSignals::PEER_CLOSED;
    }
    HandleSignalsState { satisfied, satisfiable }
  }
}

#[derive(Clone)]
pub(crate) struct Endpoint {
  pipe: Arc<PipeInner>,
  side: usize,
}

impl Endpoint {
  pub fn id(&self) -> HandleId {
    self.pipe.ids[self.side]
  }

  pub fn is_closed(&self) -> bool {
    self.pipe.state.lock().closed[self.side]
  }

  pub fn close(&self) {
    let dropped = {
      let mut state = self.pipe.state.lock();
      if state.closed[self.side] {
        return;
      }
      state.closed[self.side] = true;
      std::mem::take(&mut state.queues[self.side])
    };
    tracing::trace!(handle = %self.id(), dropped_messages = dropped.len(), "Message pipe endpoint closed");
    // Queued messages may own handles of this very pipe; drop them unlocked.
    drop(dropped);
    self.pipe.notify[0].notify_waiters();
    self.pipe.notify[1].notify_waiters();
    activity_monitor().bump();
  }

  fn check_signals(&self, signals: HandleSignals) -> Option<MojoResult<()>> {
    let state = self.pipe.state.lock();
    if state.closed[self.side] {
      return Some(Err(MojoError::Cancelled));
    }
    state
      .signals_state(self.side)
      .evaluate(signals)
      .map(|ok| if ok { Ok(()) } else { Err(MojoError::FailedPrecondition) })
  }
}

impl Handle {
  fn endpoint(&self) -> MojoResult<&Endpoint> {
    match &self.endpoint {
      Some(endpoint) if !endpoint.is_closed() => Ok(endpoint),
      _ => Err(MojoError::InvalidArgument("invalid or closed handle")),
    }
  }

  /// Non-blocking write of `data` plus `handles`.
  ///
  /// On success every handle is drained out of `handles` and owned by the
  /// transport. On failure `handles` is left untouched.
  pub fn write_message(&self, data: Bytes, handles: &mut Vec<ScopedMessagePipeHandle>) -> MojoResult<()> {
    let endpoint = self.endpoint()?;
    let peer = 1 - endpoint.side;
    for attached in handles.iter() {
      // Either end of this pipe inside its own queue would never close.
      if attached.id() == endpoint.id() || attached.id() == endpoint.pipe.ids[peer] {
        return Err(MojoError::Busy);
      }
      // Checked before locking: the attached handle may belong to this pipe.
      if !attached.is_valid() {
        return Err(MojoError::InvalidArgument("attached handle is invalid"));
      }
    }

    {
      let mut state = endpoint.pipe.state.lock();
      if state.closed[endpoint.side] {
        return Err(MojoError::InvalidArgument("invalid or closed handle"));
      }
      if state.closed[peer] {
        return Err(MojoError::FailedPrecondition);
      }
      let message = Message::from_parts(data, handles.drain(..).collect());
      state.queues[peer].push_back(message);
    }
    endpoint.pipe.notify[peer].notify_waiters();
    activity_monitor().bump();
    Ok(())
  }

  /// Non-blocking read of exactly one message.
  pub fn read_message(&self) -> MojoResult<Message> {
    let endpoint = self.endpoint()?;
    let mut state = endpoint.pipe.state.lock();
    if let Some(message) = state.queues[endpoint.side].pop_front() {
      return Ok(message);
    }
    if state.closed[1 - endpoint.side] {
      Err(MojoError::FailedPrecondition)
    } else {
      Err(MojoError::ShouldWait)
    }
  }

  pub fn query_signals_state(&self) -> MojoResult<HandleSignalsState> {
    let endpoint = self.endpoint()?;
    let state = endpoint.pipe.state.lock();
    Ok(state.signals_state(endpoint.side))
  }

  /// Blocks the calling thread until one of `signals` is satisfied, none of
  /// them can ever be, or `deadline` (`None` = indefinite) elapses.
  pub fn wait(&self, signals: HandleSignals, deadline: Option<Duration>) -> MojoResult<()> {
    let endpoint = self.endpoint()?;
    let deadline = deadline.map(|d| Instant::now() + d);
    let monitor = activity_monitor();
    loop {
      let seen = monitor.generation();
      if let Some(result) = endpoint.check_signals(signals) {
        return result;
      }
      if !monitor.wait_for_change(seen, deadline) {
        return Err(MojoError::DeadlineExceeded);
      }
    }
  }

  /// Resolves once one of `signals` is satisfied or can never be. Resolves to
  /// `Cancelled` if the endpoint is closed while waiting.
  pub async fn ready(&self, signals: HandleSignals) -> MojoResult<()> {
    let endpoint = self.endpoint()?.clone();
    let notify = &endpoint.pipe.notify[endpoint.side];
    loop {
      let notified = notify.notified();
      tokio::pin!(notified);
      notified.as_mut().enable();
      if let Some(result) = endpoint.check_signals(signals) {
        return result;
      }
      notified.await;
    }
  }
}
