//! In-process message-pipe primitives: handles, pipes, readiness signals and
//! the cross-thread activity monitor that blocking waits sleep on.

mod activity;
mod event;
mod handle;
mod message_pipe;
mod signals;

pub(crate) use activity::activity_monitor;
pub use event::SyncEvent;
pub use handle::{Handle, HandleId, ScopedMessagePipeHandle};
pub use message_pipe::MessagePipe;
pub use signals::{HandleSignals, HandleSignalsState};
