//! Status sinks
//!
//! A runner with status tracking enabled publishes every new [`StatusSnapshot`]
//! to its sink, after its own bookkeeping is done. A sink may therefore call back
//! into the runner that published the snapshot.

use std::fmt::Debug;

use tracing::info;

use crate::status::StatusSnapshot;

/// Receives status snapshots as they are published
pub trait StatusSink<T, E>: Send {
    /// Called with every newly published snapshot
    fn publish(&mut self, snapshot: &StatusSnapshot<T, E>);

    /// Called once the runner is torn down
    fn finish(&mut self) {}
}

impl<T, E, F> StatusSink<T, E> for F
where
    F: FnMut(&StatusSnapshot<T, E>) + Send,
{
    fn publish(&mut self, snapshot: &StatusSnapshot<T, E>) {
        self(snapshot)
    }
}

/// A sink that discards all snapshots
#[derive(Debug, Default)]
pub struct NoOpSink;

impl<T, E> StatusSink<T, E> for NoOpSink {
    fn publish(&mut self, _snapshot: &StatusSnapshot<T, E>) {}
}

/// Logs every snapshot as a tracing event
#[derive(Debug, Default)]
pub struct TracingSink {
    context: Option<String>,
}

impl TracingSink {
    pub fn new() -> Self {
        Self { context: None }
    }

    /// Label every event with `context`
    pub fn with_context(context: impl Into<String>) -> Self {
        Self {
            context: Some(context.into()),
        }
    }
}

impl<T, E: Debug> StatusSink<T, E> for TracingSink {
    fn publish(&mut self, snapshot: &StatusSnapshot<T, E>) {
        let context = self.context.as_deref().unwrap_or_default();
        if snapshot.pending {
            info!(
                context,
                paused = snapshot.paused,
                "{}",
                if snapshot.paused { "paused" } else { "running" }
            );
        } else if snapshot.canceled {
            info!(context, error = ?snapshot.error, "canceled");
        } else if let Some(error) = &snapshot.error {
            info!(context, ?error, "failed");
        } else if snapshot.done {
            info!(context, "completed");
        }
    }

    fn finish(&mut self) {
        info!(context = self.context.as_deref().unwrap_or_default(), "torn down");
    }
}

/// Broadcasts snapshots to several sinks
pub struct MultiSink<T, E> {
    sinks: Vec<Box<dyn StatusSink<T, E>>>,
}

impl<T, E> MultiSink<T, E> {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink<S: StatusSink<T, E> + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl<T, E> Default for MultiSink<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> StatusSink<T, E> for MultiSink<T, E> {
    fn publish(&mut self, snapshot: &StatusSnapshot<T, E>) {
        for sink in &mut self.sinks {
            sink.publish(snapshot);
        }
    }

    fn finish(&mut self) {
        for sink in &mut self.sinks {
            sink.finish();
        }
    }
}
