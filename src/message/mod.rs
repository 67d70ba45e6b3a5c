//! Message-related types (`Message`, `MessageHeader`, `MessageFlags`, `MessageReceiver`).

mod flags;
mod header;
mod msg;
mod receiver;

pub use flags::MessageFlags;
pub use header::{MessageHeader, MESSAGE_HEADER_V0_SIZE, MESSAGE_HEADER_V1_SIZE};
pub use msg::{Message, MessageBuilder};
pub use receiver::MessageReceiver;
