//! The message-pipe connector: reads framed messages off a pipe and hands them
//! to a receiver, writes outgoing messages, and turns every pipe failure into a
//! single connection-error notification.

mod core;
mod options;
mod send_path;

pub use self::core::Connector;
pub use options::{ConnectorConfig, ConnectorOptions};
pub use send_path::ConnectorSender;
