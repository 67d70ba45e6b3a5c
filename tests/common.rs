// tests/common.rs
#![allow(dead_code)] // Not every test binary uses every helper

use rmojo::{Message, MessageFlags, MessageHeader, MessageReceiver};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::sync::Once;
use std::time::{Duration, Instant};

use tokio::task::LocalSet;

// Use std::sync::Once for one-time initialization
static TRACING_INIT: Once = Once::new();

// Setup function to initialize tracing
pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    // Can be overridden by RUST_LOG env variable
    let default_filter = "rmojo=debug,warn";
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let subscriber = FmtSubscriber::builder()
      .with_max_level(tracing::Level::TRACE)
      .with_env_filter(env_filter)
      .with_target(true) // Show module path
      .with_line_number(true) // Show line numbers
      .with_span_events(FmtSpan::CLOSE)
      .with_test_writer() // Write to test output capture
      .finish();

    // Another test binary thread may have won the race; that is fine.
    let _ = tracing::subscriber::set_global_default(subscriber);
  });
}

/// Runs `fut` inside a fresh `LocalSet` so the default waiter can spawn.
pub async fn local<F: Future>(fut: F) -> F::Output {
  setup_tracing();
  LocalSet::new().run_until(fut).await
}

/// Lets pending local wait tasks run.
pub async fn settle() {
  for _ in 0..16 {
    tokio::task::yield_now().await;
  }
  tokio::time::sleep(Duration::from_millis(5)).await;
  for _ in 0..16 {
    tokio::task::yield_now().await;
  }
}

/// Polls `cond` while letting local tasks run. Returns whether it became true
/// before `timeout`.
pub async fn run_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
  let start = Instant::now();
  while !cond() {
    if start.elapsed() > timeout {
      return false;
    }
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(1)).await;
  }
  true
}

/// Builds a message with a v0 header and `payload`.
pub fn message(name: u32, payload: &[u8]) -> Message {
  Message::with_header(MessageHeader::new(name, MessageFlags::empty()), payload)
}

/// Receiver that records payloads and answers with a configurable result.
pub struct RecordingReceiver {
  pub received: RefCell<Vec<Vec<u8>>>,
  pub handle_counts: RefCell<Vec<usize>>,
  pub accept_result: Cell<bool>,
}

impl RecordingReceiver {
  pub fn new() -> Self {
    Self {
      received: RefCell::new(Vec::new()),
      handle_counts: RefCell::new(Vec::new()),
      accept_result: Cell::new(true),
    }
  }

  pub fn count(&self) -> usize {
    self.received.borrow().len()
  }

  pub fn payloads(&self) -> Vec<Vec<u8>> {
    self.received.borrow().clone()
  }
}

impl MessageReceiver for RecordingReceiver {
  fn accept(&self, message: &mut Message) -> bool {
    let payload = message.payload().map(|p| p.to_vec()).unwrap_or_else(|_| message.data().to_vec());
    self.received.borrow_mut().push(payload);
    self.handle_counts.borrow_mut().push(message.handles().len());
    self.accept_result.get()
  }
}
