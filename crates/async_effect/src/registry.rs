use std::sync::Arc;

use tokio::sync::oneshot;

use crate::control::TaskControl;
use crate::error::CancelReason;
use crate::task::{Payload, Settlement, TaskId};

/// An owner's bookkeeping for one unsettled task.
pub(crate) struct TaskEntry<T, E> {
    pub control: Arc<TaskControl>,
    settle: oneshot::Sender<Settlement<T, E>>,
    gate: Option<oneshot::Sender<()>>,
}

impl<T, E> TaskEntry<T, E> {
    pub fn new(
        control: Arc<TaskControl>,
        settle: oneshot::Sender<Settlement<T, E>>,
        gate: Option<oneshot::Sender<()>>,
    ) -> Self {
        Self {
            control,
            settle,
            gate,
        }
    }

    pub fn id(&self) -> TaskId {
        self.control.id()
    }

    /// Let a queued task start running.
    pub fn open_gate(&mut self) {
        if let Some(gate) = self.gate.take() {
            let _ = gate.send(());
        }
    }

    /// Deliver the outcome to every handle of the task.
    pub fn settle(self, outcome: Settlement<T, E>) {
        // Handles may all have been dropped
        let _ = self.settle.send(outcome);
    }
}

/// The set of unsettled tasks of one owner, in admission order.
pub(crate) struct TaskRegistry<T, E> {
    entries: Vec<TaskEntry<T, E>>,
}

impl<T, E> TaskRegistry<T, E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn register(&mut self, entry: TaskEntry<T, E>) {
        self.entries.push(entry);
    }

    /// Remove a task. Unknown ids are ignored.
    pub fn unregister(&mut self, id: TaskId) -> Option<TaskEntry<T, E>> {
        let index = self.entries.iter().position(|entry| entry.id() == id)?;
        Some(self.entries.remove(index))
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskEntry<T, E>> {
        self.entries.iter().find(|entry| entry.id() == id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut TaskEntry<T, E>> {
        self.entries.iter_mut().find(|entry| entry.id() == id)
    }

    /// Drain the registry and mark every task canceled with `reason`.
    ///
    /// Draining first means tasks settling as a consequence cannot be observed
    /// half-removed.
    pub fn cancel_all(&mut self, reason: &CancelReason) -> Vec<TaskEntry<T, E>> {
        let entries = std::mem::take(&mut self.entries);
        for entry in &entries {
            entry.control.mark_canceled(reason.clone());
        }
        entries
    }

    /// Pause every task. Returns the ids that were actually paused.
    pub fn pause_all(&self, data: Option<Payload>) -> Vec<TaskId> {
        self.entries
            .iter()
            .filter(|entry| entry.control.mark_paused(data.clone()))
            .map(TaskEntry::id)
            .collect()
    }

    /// Resume every task. Returns the ids that were actually resumed.
    pub fn resume_all(&self, data: Option<Payload>) -> Vec<TaskId> {
        self.entries
            .iter()
            .filter(|entry| entry.control.mark_resumed(data.clone()))
            .map(TaskEntry::id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;

    fn entry() -> (TaskEntry<u8, String>, oneshot::Receiver<Settlement<u8, String>>) {
        let control = Arc::new(TaskControl::new(
            TaskId::new(),
            "test".to_string(),
            TaskState::Running,
            None,
        ));
        let (tx, rx) = oneshot::channel();
        (TaskEntry::new(control, tx, None), rx)
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut registry = TaskRegistry::new();
        let (entry, _rx) = entry();
        let id = entry.id();
        registry.register(entry);

        assert!(registry.unregister(id).is_some());
        assert!(registry.unregister(id).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn test_cancel_all_drains() {
        let mut registry = TaskRegistry::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (entry, rx) = entry();
            registry.register(entry);
            receivers.push(rx);
        }

        let drained = registry.cancel_all(&CancelReason::Unmounted);
        assert_eq!(drained.len(), 3);
        assert_eq!(registry.len(), 0);
        for entry in &drained {
            assert_eq!(entry.control.reason(), Some(CancelReason::Unmounted));
        }
    }

    #[test]
    fn test_pause_all_skips_paused() {
        let mut registry = TaskRegistry::new();
        let (first, _rx1) = entry();
        let (second, _rx2) = entry();
        first.control.mark_paused(None);
        let second_id = second.id();
        registry.register(first);
        registry.register(second);

        assert_eq!(registry.pause_all(None), vec![second_id]);
        assert_eq!(registry.resume_all(None).len(), 2);
        assert!(registry.resume_all(None).is_empty());
    }

    #[test]
    fn test_settle_reaches_receiver() {
        let (entry, mut rx) = entry();
        entry.settle(Ok(9));
        assert_eq!(rx.try_recv().unwrap(), Ok(9));
    }
}
