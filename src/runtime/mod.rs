// src/runtime/mod.rs

//! Readiness plumbing consumed by the connector: the callback-based async
//! waiter and the per-thread registry used while a synchronous call blocks.

pub mod async_waiter;
pub mod sync_handle_registry;

pub use async_waiter::{default_waiter, AsyncWaitId, AsyncWaiter, LocalTaskWaiter, WaitCallback};
pub use sync_handle_registry::{EventCallback, HandleCallback, SyncHandleRegistry};
