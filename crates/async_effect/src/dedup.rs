use crate::task::{TaskHandle, TaskId};

/// In-flight tasks keyed by their arguments, for combining equal calls.
pub(crate) struct DedupIndex<A, T, E> {
    entries: Vec<(TaskId, A, TaskHandle<T, E>)>,
}

impl<A: PartialEq, T, E> DedupIndex<A, T, E> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, args: A, handle: TaskHandle<T, E>) {
        self.entries.push((handle.id(), args, handle));
    }

    /// The most recently recorded task with equal arguments
    pub fn lookup(&self, args: &A) -> Option<&TaskHandle<T, E>> {
        self.entries
            .iter()
            .rev()
            .find(|(_, recorded, _)| recorded == args)
            .map(|(_, _, handle)| handle)
    }

    pub fn forget(&mut self, id: TaskId) {
        self.entries.retain(|(recorded, _, _)| *recorded != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CancelReason;

    fn handle() -> TaskHandle<u32, String> {
        TaskHandle::rejected("test".to_string(), CancelReason::Canceled)
    }

    #[test]
    fn test_lookup_prefers_newest() {
        let mut index = DedupIndex::new();
        let (older, newer) = (handle(), handle());
        index.record((1, "a"), older.clone());
        index.record((1, "a"), newer.clone());
        index.record((2, "b"), handle());

        assert_eq!(index.lookup(&(1, "a")).map(TaskHandle::id), Some(newer.id()));
        assert!(index.lookup(&(3, "c")).is_none());

        index.forget(newer.id());
        assert_eq!(index.lookup(&(1, "a")).map(TaskHandle::id), Some(older.id()));
        assert_eq!(index.entries.len(), 2);
    }
}
