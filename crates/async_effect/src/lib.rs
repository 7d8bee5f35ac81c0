//! Async Effect - cancellable, pausable async routines
//!
//! Runs asynchronous routines on behalf of an owner that can go away at any time,
//! such as a UI component, a connection handler or a request scope.
//!
//! # Overview
//!
//! - Every invocation becomes a controlled task that can be canceled, paused and
//!   resumed. Cancellation is authoritative: the routine is dropped at its current
//!   suspension point.
//! - [`AsyncCallback`] admits calls under a concurrency limit with a bounded FIFO
//!   queue, can combine calls with equal arguments, and can cancel older calls
//!   when a new one arrives.
//! - [`AsyncEffect`] reruns a routine whenever its epoch changes, tearing down the
//!   previous run first.
//! - Both can publish a [`StatusSnapshot`] of the current task. Cancellations
//!   caused by teardown or restarts are never published.
//! - Tearing down the owner cancels every task it still owns.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use async_effect::{routine_fn, AsyncCallback, CallbackConfig, CancelReason, QueueCapacity, Scope};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let search = AsyncCallback::new(
//!         routine_fn(|_scope: Scope, query: String| async move {
//!             tokio::time::sleep(Duration::from_millis(10)).await;
//!             Ok::<_, String>(query.len())
//!         })
//!         .named("search"),
//!         CallbackConfig::new()
//!             .with_concurrency(1)
//!             .with_queue_capacity(QueueCapacity::Bounded(1)),
//!     )?;
//!
//!     let first = search.call("rust".to_string());
//!     let second = search.call("tokio".to_string());
//!     let third = search.call("futures".to_string());
//!
//!     assert_eq!(first.await?, 4);
//!     assert_eq!(second.await?, 5);
//!     assert!(third.await.unwrap_err().is_overflow());
//!
//!     search.cancel(CancelReason::Canceled);
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod callback;
pub mod config;
pub mod context;
pub mod effect;
pub mod error;
pub mod limits;
pub mod reporter;
pub mod status;
pub mod task;

mod control;
mod dedup;
mod owner;
mod registry;

pub use admission::Admission;
pub use callback::AsyncCallback;
pub use config::{CallbackConfig, EffectConfig};
pub use context::Scope;
pub use effect::AsyncEffect;
pub use error::{CancelReason, CanceledError, ConfigError, ConfigResult, TaskError};
pub use limits::{Limit, QueueCapacity};
pub use reporter::{MultiSink, NoOpSink, StatusSink, TracingSink};
pub use status::StatusSnapshot;
pub use task::{
    routine_fn, Caught, FnRoutine, Payload, Routine, Settlement, TaskHandle, TaskId, TaskState,
};

// Re-export async_trait for convenience
pub use async_trait::async_trait;
