// tests/sync_watch.rs

use rmojo::{Connector, ConnectorConfig, Message, MessagePipe, MessageReceiver, ScopedMessagePipeHandle, SyncHandleRegistry};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::thread::JoinHandle;
use std::time::Duration;
mod common;

use common::{message, RecordingReceiver};

/// Records messages and sets `stop` on the first one.
struct StoppingReceiver {
  log: RecordingReceiver,
  stop: Rc<Cell<bool>>,
  connector: RefCell<Option<Rc<Connector>>>,
  saw_sync_callback: Cell<bool>,
}

impl StoppingReceiver {
  fn new(stop: Rc<Cell<bool>>) -> Self {
    Self {
      log: RecordingReceiver::new(),
      stop,
      connector: RefCell::new(None),
      saw_sync_callback: Cell::new(false),
    }
  }
}

impl MessageReceiver for StoppingReceiver {
  fn accept(&self, message: &mut Message) -> bool {
    if let Some(connector) = self.connector.borrow().as_ref() {
      self.saw_sync_callback.set(connector.during_sync_handle_watcher_callback());
    }
    self.stop.set(true);
    self.log.accept(message)
  }
}

/// Writes `payload` to `handle` from another thread after `delay`, handing
/// the handle back on join.
fn delayed_write(handle: ScopedMessagePipeHandle, delay: Duration, payload: &'static [u8]) -> JoinHandle<ScopedMessagePipeHandle> {
  std::thread::spawn(move || {
    std::thread::sleep(delay);
    let mut msg = message(1, payload);
    handle.get().write_message(msg.data_bytes(), msg.handles_mut()).unwrap();
    handle
  })
}

// --- Test: a blocked thread dispatches the reply it waits for ---
#[tokio::test]
async fn test_run_sync_handle_watch_dispatches_reply() {
  common::local(async {
    let (h0, h1) = MessagePipe::new();
    let b = Rc::new(Connector::new(h1, ConnectorConfig::SingleThreadedSend));
    let stop = Rc::new(Cell::new(false));
    let receiver = Rc::new(StoppingReceiver::new(stop.clone()));
    *receiver.connector.borrow_mut() = Some(b.clone());
    b.set_incoming_receiver(&receiver);

    assert!(b.register_sync_handle_watch());
    let writer = delayed_write(h0, Duration::from_millis(20), b"reply");

    assert!(b.run_sync_handle_watch(&stop));
    assert_eq!(receiver.log.payloads(), vec![b"reply".to_vec()]);
    assert!(receiver.saw_sync_callback.get());
    assert!(!b.during_sync_handle_watcher_callback());

    b.unregister_sync_handle_watch();
    receiver.connector.borrow_mut().take();
    drop(writer.join().unwrap());
  })
  .await;
}

// --- Test: sibling sync pipes on the same thread keep making progress ---
#[tokio::test]
async fn test_sibling_connectors_progress_during_watch() {
  common::local(async {
    let (x0, x1) = MessagePipe::new();
    let (y0, y1) = MessagePipe::new();
    let x = Connector::new(x1, ConnectorConfig::SingleThreadedSend);
    let y = Connector::new(y1, ConnectorConfig::SingleThreadedSend);

    let stop = Rc::new(Cell::new(false));
    let x_receiver = Rc::new(StoppingReceiver::new(stop.clone()));
    let y_receiver = Rc::new(RecordingReceiver::new());
    x.set_incoming_receiver(&x_receiver);
    y.set_incoming_receiver(&y_receiver);

    assert!(x.register_sync_handle_watch());
    assert!(y.register_sync_handle_watch());

    let y_writer = delayed_write(y0, Duration::from_millis(10), b"for y");
    let x_writer = delayed_write(x0, Duration::from_millis(40), b"for x");

    assert!(x.run_sync_handle_watch(&stop));
    assert_eq!(y_receiver.payloads(), vec![b"for y".to_vec()]);
    assert_eq!(x_receiver.log.payloads(), vec![b"for x".to_vec()]);

    x.unregister_sync_handle_watch();
    y.unregister_sync_handle_watch();
    drop(x_writer.join().unwrap());
    drop(y_writer.join().unwrap());
  })
  .await;
}

// --- Test: a pipe error ends the watch and reports once ---
#[tokio::test]
async fn test_error_stops_sync_watch() {
  common::local(async {
    let (h0, h1) = MessagePipe::new();
    let b = Connector::new(h1, ConnectorConfig::SingleThreadedSend);
    let errors = Rc::new(Cell::new(0));
    let errors_clone = errors.clone();
    b.set_connection_error_handler(move || errors_clone.set(errors_clone.get() + 1));

    assert!(b.register_sync_handle_watch());
    let closer = std::thread::spawn(move || {
      std::thread::sleep(Duration::from_millis(20));
      drop(h0);
    });

    let never = Cell::new(false);
    assert!(b.run_sync_handle_watch(&never));
    assert_eq!(errors.get(), 1);
    assert!(b.encountered_error());

    // A dead connector neither watches nor registers.
    assert!(!b.run_sync_handle_watch(&never));
    assert!(!b.register_sync_handle_watch());
    b.unregister_sync_handle_watch();
    closer.join().unwrap();
  })
  .await;
}

struct PausingReceiver {
  connector: RefCell<Option<Rc<Connector>>>,
  calls: Cell<usize>,
}

impl MessageReceiver for PausingReceiver {
  fn accept(&self, _message: &mut Message) -> bool {
    self.calls.set(self.calls.get() + 1);
    let connector = self.connector.borrow().clone();
    if let Some(connector) = connector {
      connector.pause_incoming_method_call_processing();
    }
    true
  }
}

// --- Test: pausing inside the watch ends it without the caller's flag ---
#[tokio::test]
async fn test_pause_ends_sync_watch() {
  common::local(async {
    let (h0, h1) = MessagePipe::new();
    let b = Rc::new(Connector::new(h1, ConnectorConfig::SingleThreadedSend));
    let receiver = Rc::new(PausingReceiver {
      connector: RefCell::new(Some(b.clone())),
      calls: Cell::new(0),
    });
    b.set_incoming_receiver(&receiver);

    assert!(b.register_sync_handle_watch());
    let writer = delayed_write(h0, Duration::from_millis(20), b"pause me");

    let never = Cell::new(false);
    assert!(b.run_sync_handle_watch(&never));
    assert_eq!(receiver.calls.get(), 1);
    assert!(b.is_paused());
    assert!(!SyncHandleRegistry::current().is_handle_registered(&b.handle()));

    // Running again resumes and starts a fresh stop flag.
    let h0 = writer.join().unwrap();
    let writer = delayed_write(h0, Duration::from_millis(20), b"again");
    assert!(b.run_sync_handle_watch(&never));
    assert_eq!(receiver.calls.get(), 2);

    b.unregister_sync_handle_watch();
    receiver.connector.borrow_mut().take();
    drop(writer.join().unwrap());
  })
  .await;
}

// --- Test: registration is reference counted and follows pause ---
#[tokio::test]
async fn test_sync_watch_registration_is_counted() {
  common::local(async {
    let (_h0, h1) = MessagePipe::new();
    let b = Connector::new(h1, ConnectorConfig::SingleThreadedSend);
    let registry = SyncHandleRegistry::current();

    assert!(b.register_sync_handle_watch());
    assert!(b.register_sync_handle_watch());
    assert!(registry.is_handle_registered(&b.handle()));

    b.pause_incoming_method_call_processing();
    assert!(!registry.is_handle_registered(&b.handle()));
    b.resume_incoming_method_call_processing();
    assert!(registry.is_handle_registered(&b.handle()));

    b.unregister_sync_handle_watch();
    assert!(registry.is_handle_registered(&b.handle()));
    b.unregister_sync_handle_watch();
    assert!(!registry.is_handle_registered(&b.handle()));

    // Unbalanced: logged and ignored.
    b.unregister_sync_handle_watch();
    assert!(!registry.is_handle_registered(&b.handle()));
  })
  .await;
}

#[tokio::test]
async fn test_drop_unregisters_from_sync_watch() {
  common::local(async {
    let (_h0, h1) = MessagePipe::new();
    let b = Connector::new(h1, ConnectorConfig::SingleThreadedSend);
    assert!(b.register_sync_handle_watch());
    let handle = b.handle();
    drop(b);
    assert!(!SyncHandleRegistry::current().is_handle_registered(&handle));
  })
  .await;
}
