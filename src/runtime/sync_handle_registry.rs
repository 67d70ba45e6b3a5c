// src/runtime/sync_handle_registry.rs

use crate::error::{MojoError, MojoResult};
use crate::system::{activity_monitor, Handle, HandleId, HandleSignals, SyncEvent};
use linked_hash_map::LinkedHashMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

pub type HandleCallback = Rc<dyn Fn(MojoResult<()>)>;
pub type EventCallback = Rc<dyn Fn()>;

struct HandleEntry {
  handle: Handle,
  signals: HandleSignals,
  callback: HandleCallback,
}

struct EventEntry {
  event: SyncEvent,
  callback: EventCallback,
}

/// Per-thread set of handles and events watched while a synchronous call
/// blocks the thread.
///
/// Every connector on the thread that has an outstanding sync call registers
/// its pipe here, so a thread blocked in one call keeps dispatching the
/// messages other sync calls on the same thread are waiting for.
pub struct SyncHandleRegistry {
  handles: RefCell<LinkedHashMap<HandleId, HandleEntry>>,
  events: RefCell<LinkedHashMap<u64, EventEntry>>,
}

thread_local! {
  static CURRENT_REGISTRY: Rc<SyncHandleRegistry> = Rc::new(SyncHandleRegistry::new());
}

impl SyncHandleRegistry {
  fn new() -> Self {
    Self {
      handles: RefCell::new(LinkedHashMap::new()),
      events: RefCell::new(LinkedHashMap::new()),
    }
  }

  /// The registry of the calling thread.
  pub fn current() -> Rc<SyncHandleRegistry> {
    CURRENT_REGISTRY.with(Rc::clone)
  }

  /// Like `current`, but `None` once the thread-local has been torn down
  /// (connectors dropped during thread exit).
  pub fn try_current() -> Option<Rc<SyncHandleRegistry>> {
    CURRENT_REGISTRY.try_with(Rc::clone).ok()
  }

  /// Starts watching `handle`. Returns `false` if it is already registered or
  /// invalid.
  pub fn register_handle(&self, handle: &Handle, signals: HandleSignals, callback: HandleCallback) -> bool {
    if !handle.is_valid() {
      return false;
    }
    let id = handle.id();
    let mut handles = self.handles.borrow_mut();
    if handles.contains_key(&id) {
      return false;
    }
    handles.insert(
      id,
      HandleEntry {
        handle: handle.clone(),
        signals,
        callback,
      },
    );
    tracing::trace!(handle = %id, "Handle registered for sync watching");
    true
  }

  pub fn unregister_handle(&self, handle: &Handle) {
    if self.handles.borrow_mut().remove(&handle.id()).is_some() {
      tracing::trace!(handle = %handle.id(), "Handle unregistered from sync watching");
    }
  }

  pub fn is_handle_registered(&self, handle: &Handle) -> bool {
    self.handles.borrow().contains_key(&handle.id())
  }

  /// Watches `event`; `callback` runs each time it is signalled while a
  /// `wait` is in progress. Returns `false` if already registered.
  pub fn register_event(&self, event: &SyncEvent, callback: EventCallback) -> bool {
    let mut events = self.events.borrow_mut();
    if events.contains_key(&event.id()) {
      return false;
    }
    events.insert(
      event.id(),
      EventEntry {
        event: event.clone(),
        callback,
      },
    );
    true
  }

  pub fn unregister_event(&self, event: &SyncEvent) {
    self.events.borrow_mut().remove(&event.id());
  }

  /// Blocks the thread, dispatching ready handles and signalled events, until
  /// one of `should_stop` is set.
  ///
  /// Each round runs every ready handle callback, then every signalled event
  /// callback, in registration order. Returns `true` when stopped by a flag,
  /// `false` if nothing is left to watch (no flag could ever be set again).
  pub fn wait(&self, should_stop: &[&Cell<bool>]) -> bool {
    let monitor = activity_monitor();
    loop {
      if should_stop.iter().any(|flag| flag.get()) {
        return true;
      }
      if self.handles.borrow().is_empty() && self.events.borrow().is_empty() {
        tracing::debug!("Sync wait has nothing left to watch");
        return false;
      }

      let seen = monitor.generation();
      let handles_run = self.dispatch_ready_handles();
      let events_run = self.dispatch_signalled_events();
      if handles_run == 0 && events_run == 0 {
        monitor.wait_for_change(seen, None);
      }
    }
  }

  /// Runs the callback of every ready handle once. Readiness is evaluated
  /// right before each callback, since an earlier callback may have drained
  /// or unregistered a later handle. Callbacks run with no registry borrow
  /// held.
  fn dispatch_ready_handles(&self) -> usize {
    let ids: Vec<HandleId> = self.handles.borrow().keys().copied().collect();
    let mut dispatched = 0;
    for id in ids {
      let ready = self.handles.borrow().get(&id).and_then(|entry| {
        let result: Option<MojoResult<()>> = match entry.handle.query_signals_state() {
          Ok(state) => state
            .evaluate(entry.signals)
            .map(|ok| if ok { Ok(()) } else { Err(MojoError::FailedPrecondition) }),
          Err(_) => Some(Err(MojoError::Cancelled)),
        };
        result.map(|result| (entry.callback.clone(), result))
      });

      let Some((callback, result)) = ready else {
        continue;
      };
      if result == Err(MojoError::Cancelled) {
        // The endpoint was closed under us; it can never become ready again.
        self.handles.borrow_mut().remove(&id);
      }
      callback(result);
      dispatched += 1;
    }
    dispatched
  }

  fn dispatch_signalled_events(&self) -> usize {
    let ids: Vec<u64> = self.events.borrow().keys().copied().collect();
    let mut dispatched = 0;
    for id in ids {
      let entry = self
        .events
        .borrow()
        .get(&id)
        .map(|entry| (entry.event.clone(), entry.callback.clone()));
      let Some((event, callback)) = entry else {
        continue;
      };
      if event.consume() {
        callback();
        dispatched += 1;
      }
    }
    dispatched
  }
}
