// src/lib.rs

//! rmojo - a pure-Rust message-pipe connector.
//!
//! A `Connector` owns one endpoint of a message pipe. It reads framed messages
//! off the pipe and hands them to a `MessageReceiver`, writes outgoing
//! messages, supports pausing, blocking waits for a single message and a
//! cooperative "watch every sync pipe on this thread" mode used to emulate
//! synchronous calls. Every failure converges on one connection-error
//! notification.

/// The connector itself plus its configuration and thread-safe sender.
pub mod connector;
/// Defines the error type shared by every layer.
pub mod error;
/// Message framing: `Message`, `MessageHeader`, flags and the receiver trait.
pub mod message;
/// Readiness plumbing: the async waiter and the per-thread sync registry.
pub mod runtime;
/// In-process message pipes, handles and signals.
pub mod system;

// Re-export core types for user convenience, making them accessible directly
// from the crate root (e.g., `rmojo::Connector`, `rmojo::MojoError`).
pub use connector::{Connector, ConnectorConfig, ConnectorOptions, ConnectorSender};
pub use error::{MojoError, MojoResult};
pub use message::{Message, MessageBuilder, MessageFlags, MessageHeader, MessageReceiver};
pub use runtime::{AsyncWaiter, LocalTaskWaiter, SyncHandleRegistry};
pub use system::{Handle, HandleSignals, MessagePipe, ScopedMessagePipeHandle, SyncEvent};

// --- Top-Level Library Information Functions ---

/// Major version number of the rmojo library.
const VERSION_MAJOR: i32 = 0;
/// Minor version number of the rmojo library.
const VERSION_MINOR: i32 = 1;
/// Patch version number of the rmojo library.
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
///
/// # Examples
///
/// ```
/// let (major, minor, patch) = rmojo::version();
/// println!("rmojo version: {}.{}.{}", major, minor, patch);
/// ```
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}
