use crate::connector::send_path::{write_through_slot, SendPath};
use crate::connector::{ConnectorConfig, ConnectorOptions, ConnectorSender};
use crate::error::{MojoError, MojoResult};
use crate::message::{Message, MessageReceiver};
use crate::runtime::{default_waiter, AsyncWaitId, AsyncWaiter, SyncHandleRegistry};
use crate::system::{Handle, HandleId, HandleSignals, MessagePipe, ScopedMessagePipeHandle};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Binds a message pipe to a message receiver.
///
/// The connector watches its pipe from construction on, so a closed peer is
/// noticed even when no message is expected. Incoming messages are read and
/// dispatched in pipe order; any pipe failure or a rejected message ends in
/// exactly one call of the connection-error handler, after which the connector
/// is permanently dead but still safe to call.
///
/// A `Connector` is bound to the thread that created it (it is `!Send`). With
/// `ConnectorConfig::MultiThreadedSend`, other threads write through
/// `thread_safe_sender()`.
///
/// The receiver and the error handler may drop the connector from inside
/// their callbacks. The read loop only holds weak references across those
/// calls and stops as soon as the connector is gone.
pub struct Connector {
  inner: Rc<ConnectorInner>,
}

struct ConnectorInner {
  self_weak: Weak<ConnectorInner>,
  // Identity for logs; stays fixed when the pipe is swapped for a dummy.
  log_id: HandleId,
  waiter: Rc<dyn AsyncWaiter>,
  send_path: SendPath,
  error: Arc<AtomicBool>,

  incoming_receiver: RefCell<Option<Weak<dyn MessageReceiver>>>,
  connection_error_handler: RefCell<Option<Box<dyn FnOnce()>>>,
  enforce_errors_from_incoming_receiver: Cell<bool>,

  async_wait_id: Cell<Option<AsyncWaitId>>,
  paused: Cell<bool>,

  register_sync_handle_watch_count: Cell<usize>,
  registered_with_sync_handle_watcher: Cell<bool>,
  sync_handle_watcher_callback_count: Cell<usize>,
  // Shared with any in-progress `run_sync_handle_watch`, which keeps its own
  // reference so it can observe the flag after this connector is gone.
  should_stop_sync_handle_watch: RefCell<Option<Rc<Cell<bool>>>>,
}

impl Connector {
  /// Binds `message_pipe` using the thread's default waiter.
  pub fn new(message_pipe: ScopedMessagePipeHandle, config: ConnectorConfig) -> Self {
    Self::with_options(message_pipe, ConnectorOptions::new(config), default_waiter())
  }

  pub fn with_waiter(
    message_pipe: ScopedMessagePipeHandle,
    config: ConnectorConfig,
    waiter: Rc<dyn AsyncWaiter>,
  ) -> Self {
    Self::with_options(message_pipe, ConnectorOptions::new(config), waiter)
  }

  pub fn with_options(
    message_pipe: ScopedMessagePipeHandle,
    options: ConnectorOptions,
    waiter: Rc<dyn AsyncWaiter>,
  ) -> Self {
    let log_id = message_pipe.id();
    let inner = Rc::new_cyclic(|self_weak| ConnectorInner {
      self_weak: self_weak.clone(),
      log_id,
      waiter,
      send_path: SendPath::new(message_pipe, options.config),
      error: Arc::new(AtomicBool::new(false)),
      incoming_receiver: RefCell::new(None),
      connection_error_handler: RefCell::new(None),
      enforce_errors_from_incoming_receiver: Cell::new(options.enforce_errors_from_incoming_receiver),
      async_wait_id: Cell::new(None),
      paused: Cell::new(false),
      register_sync_handle_watch_count: Cell::new(0),
      registered_with_sync_handle_watcher: Cell::new(false),
      sync_handle_watcher_callback_count: Cell::new(0),
      should_stop_sync_handle_watch: RefCell::new(None),
    });
    tracing::debug!(connector = %log_id, config = ?options.config, "Connector created");

    // Watch the pipe even without a receiver so closure is noticed.
    inner.wait_to_read_more();
    Self { inner }
  }

  /// Sets the target for incoming messages. Only a weak reference is kept;
  /// once the receiver is dropped, incoming messages count as rejected.
  pub fn set_incoming_receiver<R: MessageReceiver + 'static>(&self, receiver: &Rc<R>) {
    let weak: Weak<R> = Rc::downgrade(receiver);
    let weak: Weak<dyn MessageReceiver> = weak;
    *self.inner.incoming_receiver.borrow_mut() = Some(weak);
  }

  pub fn clear_incoming_receiver(&self) {
    self.inner.incoming_receiver.borrow_mut().take();
  }

  /// Installs the handler run once when the connection fails. The handler may
  /// drop this connector.
  pub fn set_connection_error_handler(&self, handler: impl FnOnce() + 'static) {
    *self.inner.connection_error_handler.borrow_mut() = Some(Box::new(handler));
  }

  pub fn set_enforce_errors_from_incoming_receiver(&self, enforce: bool) {
    self.inner.enforce_errors_from_incoming_receiver.set(enforce);
  }

  /// True while the connector still owns a pipe handle (including the dummy
  /// installed after a forced reset).
  pub fn is_valid(&self) -> bool {
    self.inner.handle().is_valid()
  }

  pub fn encountered_error(&self) -> bool {
    self.inner.error()
  }

  pub fn is_paused(&self) -> bool {
    self.inner.paused.get()
  }

  /// Non-owning reference to the current pipe handle.
  pub fn handle(&self) -> Handle {
    self.inner.handle()
  }

  /// True while a sync-handle-registry callback of this connector is running.
  pub fn during_sync_handle_watcher_callback(&self) -> bool {
    self.inner.sync_handle_watcher_callback_count.get() > 0
  }

  /// Returns a `Send + Sync` sender when built with
  /// `ConnectorConfig::MultiThreadedSend`.
  pub fn thread_safe_sender(&self) -> Option<ConnectorSender> {
    self
      .inner
      .send_path
      .shared_slot()
      .map(|slot| ConnectorSender::new(slot, self.inner.error.clone()))
  }

  /// Stops watching and closes the pipe.
  pub fn close_message_pipe(&self) {
    self.inner.cancel_wait();
    let handle = self.inner.send_path.with_slot(|slot| slot.handle.take());
    tracing::debug!(connector = %self.inner.log_id, "Message pipe closed by owner");
    drop(handle);
  }

  /// Stops watching and hands the pipe back to the caller.
  pub fn pass_message_pipe(&self) -> ScopedMessagePipeHandle {
    self.inner.cancel_wait();
    self.inner.send_path.with_slot(|slot| slot.handle.take())
  }

  /// Breaks the connection on purpose. The error handler runs asynchronously.
  pub fn raise_error(&self) {
    ConnectorInner::handle_error(self.inner.clone(), true, true);
  }

  /// Blocks until one message arrives and dispatches it.
  ///
  /// Resumes processing first if paused. Returns `false` on timeout or error;
  /// a pipe error runs the error handler before this returns.
  pub fn wait_for_incoming_message(&self, deadline: Option<Duration>) -> bool {
    if self.inner.error() {
      return false;
    }
    self.resume_incoming_method_call_processing();

    match self.inner.handle().wait(HandleSignals::READABLE, deadline) {
      Ok(()) => {}
      Err(MojoError::ShouldWait) | Err(MojoError::DeadlineExceeded) => return false,
      Err(e) => {
        // Callers of this method expect re-entrance, so the handler runs now.
        ConnectorInner::handle_error(self.inner.clone(), !e.is_peer_closed(), false);
        return false;
      }
    }
    let (_, read_result) = ConnectorInner::read_single_message(&self.inner.self_weak);
    read_result.is_ok()
  }

  /// Stops dispatching without losing queued messages. The pending wait is
  /// cancelled; a pipe error seen while paused is reported after resuming.
  pub fn pause_incoming_method_call_processing(&self) {
    if self.inner.paused.get() {
      return;
    }
    tracing::debug!(connector = %self.inner.log_id, "Incoming processing paused");
    self.inner.paused.set(true);
    self.inner.cancel_wait();
  }

  pub fn resume_incoming_method_call_processing(&self) {
    if !self.inner.paused.get() {
      return;
    }
    tracing::debug!(connector = %self.inner.log_id, "Incoming processing resumed");
    self.inner.paused.set(false);
    self.inner.wait_to_read_more();
  }

  /// Writes `message` to the pipe.
  ///
  /// Returns `false` once the connector has failed or when this particular
  /// write is rejected. After the peer is gone, writes report success without
  /// touching the pipe. Panics if the message carries a busy handle.
  pub fn accept(&self, message: &mut Message) -> bool {
    if self.inner.error() {
      return false;
    }
    self
      .inner
      .send_path
      .with_slot(|slot| write_through_slot(slot, message))
  }

  /// Opts in to being watched by the thread's `SyncHandleRegistry`.
  /// Reference counted; returns `false` after an error.
  pub fn register_sync_handle_watch(&self) -> bool {
    let inner = &self.inner;
    if inner.error() {
      return false;
    }
    inner.register_sync_handle_watch_count.set(inner.register_sync_handle_watch_count.get() + 1);
    if !inner.registered_with_sync_handle_watcher.get() && !inner.paused.get() {
      inner.registered_with_sync_handle_watcher.set(inner.register_with_sync_registry());
    }
    true
  }

  pub fn unregister_sync_handle_watch(&self) {
    let inner = &self.inner;
    let count = inner.register_sync_handle_watch_count.get();
    if count == 0 {
      tracing::warn!(connector = %inner.log_id, "Unbalanced unregister_sync_handle_watch ignored");
      return;
    }
    inner.register_sync_handle_watch_count.set(count - 1);
    if count > 1 {
      return;
    }
    if inner.registered_with_sync_handle_watcher.get() {
      SyncHandleRegistry::current().unregister_handle(&inner.handle());
      inner.registered_with_sync_handle_watcher.set(false);
    }
  }

  /// Blocks the thread, dispatching messages of every sync-watched pipe on it,
  /// until `should_stop` is set or this connector stops watching (error,
  /// pause, close). Requires a prior `register_sync_handle_watch`.
  pub fn run_sync_handle_watch(&self, should_stop: &Cell<bool>) -> bool {
    let inner = &self.inner;
    debug_assert!(inner.register_sync_handle_watch_count.get() > 0);
    if inner.error() {
      return false;
    }
    self.resume_incoming_method_call_processing();

    // A flag already set belongs to a watch that is stopping; start a new one.
    // The local clone outlives this connector if dispatch drops it.
    let stop_flag = {
      let mut slot = inner.should_stop_sync_handle_watch.borrow_mut();
      let flag = match slot.as_ref() {
        Some(flag) if !flag.get() => flag.clone(),
        _ => Rc::new(Cell::new(false)),
      };
      *slot = Some(flag.clone());
      flag
    };
    SyncHandleRegistry::current().wait(&[should_stop, &*stop_flag])
  }
}

impl MessageReceiver for Connector {
  fn accept(&self, message: &mut Message) -> bool {
    Connector::accept(self, message)
  }
}

impl ConnectorInner {
  fn error(&self) -> bool {
    self.error.load(Ordering::Acquire)
  }

  fn handle(&self) -> Handle {
    self.send_path.with_slot(|slot| slot.handle.get())
  }

  fn incoming_receiver(&self) -> Option<Rc<dyn MessageReceiver>> {
    self.incoming_receiver.borrow().as_ref().and_then(Weak::upgrade)
  }

  /// Registers the single async wait. Never called while one is outstanding
  /// or while paused.
  fn wait_to_read_more(&self) {
    assert!(self.async_wait_id.get().is_none(), "async wait already outstanding");
    assert!(!self.paused.get(), "cannot wait while paused");

    let weak = self.self_weak.clone();
    let id = self.waiter.async_wait(
      &self.handle(),
      HandleSignals::READABLE,
      None,
      Box::new(move |result| ConnectorInner::call_on_handle_ready(&weak, result)),
    );
    self.async_wait_id.set(Some(id));
    tracing::trace!(connector = %self.log_id, wait_id = %id, "Waiting for readability");

    if self.register_sync_handle_watch_count.get() > 0 && !self.registered_with_sync_handle_watcher.get() {
      self.registered_with_sync_handle_watcher.set(self.register_with_sync_registry());
    }
  }

  fn register_with_sync_registry(&self) -> bool {
    let weak = self.self_weak.clone();
    SyncHandleRegistry::current().register_handle(
      &self.handle(),
      HandleSignals::READABLE,
      Rc::new(move |result| ConnectorInner::on_sync_handle_watcher_handle_ready(&weak, result)),
    )
  }

  fn cancel_wait(&self) {
    if let Some(id) = self.async_wait_id.take() {
      self.waiter.cancel_wait(id);
    }
    if self.registered_with_sync_handle_watcher.replace(false) {
      if let Some(registry) = SyncHandleRegistry::try_current() {
        registry.unregister_handle(&self.handle());
      }
    }
    if let Some(flag) = self.should_stop_sync_handle_watch.borrow().as_ref() {
      flag.set(true);
    }
  }

  fn call_on_handle_ready(weak: &Weak<ConnectorInner>, result: MojoResult<()>) {
    let Some(this) = weak.upgrade() else {
      return;
    };
    assert!(this.async_wait_id.take().is_some(), "async wait fired without registration");
    drop(this);
    Self::on_handle_ready_internal(weak, result);
  }

  fn on_sync_handle_watcher_handle_ready(weak: &Weak<ConnectorInner>, result: MojoResult<()>) {
    let Some(this) = weak.upgrade() else {
      return;
    };
    this.sync_handle_watcher_callback_count.set(this.sync_handle_watcher_callback_count.get() + 1);
    drop(this);

    Self::on_handle_ready_internal(weak, result);

    // The connector may have been dropped by the dispatch above.
    if let Some(this) = weak.upgrade() {
      this.sync_handle_watcher_callback_count.set(this.sync_handle_watcher_callback_count.get() - 1);
    }
  }

  fn on_handle_ready_internal(weak: &Weak<ConnectorInner>, result: MojoResult<()>) {
    if let Err(e) = result {
      if let Some(this) = weak.upgrade() {
        Self::handle_error(this, !e.is_peer_closed(), false);
      }
      return;
    }
    Self::read_all_available_messages(weak);
  }

  /// Reads and dispatches one message.
  ///
  /// Returns `(false, _)` when the caller must stop touching the connector:
  /// it was dropped during dispatch or an error was handled.
  fn read_single_message(weak: &Weak<ConnectorInner>) -> (bool, MojoResult<()>) {
    let Some(this) = weak.upgrade() else {
      return (false, Err(MojoError::Cancelled));
    };
    assert!(!this.paused.get(), "read while paused");

    let read_result = this.handle().read_message();
    let mut receiver_result = false;
    let status = match read_result {
      Ok(mut message) => {
        // Dispatch may spin a nested loop; keep listening meanwhile.
        if this.async_wait_id.get().is_none() {
          this.wait_to_read_more();
        }
        let receiver = this.incoming_receiver();
        tracing::trace!(connector = %this.log_id, bytes = message.data_num_bytes(), "Dispatching message");
        drop(this);
        receiver_result = receiver.map_or(false, |receiver| receiver.accept(&mut message));
        Ok(())
      }
      Err(e) => {
        drop(this);
        Err(e)
      }
    };

    let Some(this) = weak.upgrade() else {
      tracing::trace!("Connector dropped during dispatch");
      return (false, status);
    };

    match status {
      Ok(()) => {}
      Err(MojoError::ShouldWait) => return (true, Err(MojoError::ShouldWait)),
      Err(e) => {
        let force_pipe_reset = !e.is_peer_closed();
        Self::handle_error(this, force_pipe_reset, false);
        return (false, Err(e));
      }
    }

    if this.enforce_errors_from_incoming_receiver.get() && !receiver_result {
      tracing::warn!(connector = %this.log_id, "Incoming message rejected by receiver");
      Self::handle_error(this, true, false);
      return (false, Ok(()));
    }
    (true, Ok(()))
  }

  fn read_all_available_messages(weak: &Weak<ConnectorInner>) {
    loop {
      match weak.upgrade() {
        Some(this) if !this.error() => {}
        _ => return,
      }

      let (keep_going, read_result) = Self::read_single_message(weak);
      if !keep_going {
        return;
      }

      let Some(this) = weak.upgrade() else {
        return;
      };
      if this.paused.get() {
        return;
      }
      if read_result == Err(MojoError::ShouldWait) {
        // A forced reset inside dispatch may already have re-registered.
        if this.async_wait_id.get().is_none() {
          this.wait_to_read_more();
        }
        return;
      }
    }
  }

  /// Single convergence point of every failure. Idempotent; runs the error
  /// handler at most once.
  ///
  /// With `force_async_handler` (or while paused) the pipe is swapped for a
  /// closed dummy and the handler runs later, when the dummy's read error
  /// comes back through the normal wait.
  fn handle_error(this: Rc<ConnectorInner>, mut force_pipe_reset: bool, mut force_async_handler: bool) {
    if this.error() || !this.handle().is_valid() {
      return;
    }

    if !force_pipe_reset && force_async_handler {
      force_pipe_reset = true;
    }
    if this.paused.get() {
      // The owner asked not to be re-entered until it resumes.
      force_async_handler = true;
    }

    this.cancel_wait();
    if force_pipe_reset {
      let (dummy, peer) = MessagePipe::new();
      drop(peer);
      let old = this.send_path.with_slot(|slot| std::mem::replace(&mut slot.handle, dummy));
      tracing::debug!(connector = %this.log_id, old_pipe = %old.id(), "Pipe reset to closed dummy");
      drop(old);
    }

    if force_async_handler {
      if !this.paused.get() {
        this.wait_to_read_more();
      }
      return;
    }

    this.error.store(true, Ordering::Release);
    tracing::debug!(connector = %this.log_id, "Connection error");
    let handler = this.connection_error_handler.borrow_mut().take();
    drop(this);
    if let Some(handler) = handler {
      handler();
    }
  }
}

impl Drop for ConnectorInner {
  fn drop(&mut self) {
    self.cancel_wait();
    tracing::debug!(connector = %self.log_id, "Connector dropped");
  }
}
