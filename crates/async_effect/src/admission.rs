//! Admission control: running slots and the FIFO wait queue

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::limits::ResolvedLimits;
use crate::task::TaskId;

/// How a call was admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// Started right away
    Immediate,
    /// Waiting for a running slot
    Queued,
    /// Attached to an in-flight task with equal arguments
    Combined,
    /// Never started, the handle is already settled
    Rejected,
}

/// The queue was full when a call arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueFull;

/// Tracks which tasks hold a running slot and which wait for one.
///
/// Waiting tasks are granted slots strictly in arrival order.
#[derive(Debug)]
pub(crate) struct AdmissionController {
    limits: ResolvedLimits,
    running: HashSet<TaskId>,
    queue: VecDeque<TaskId>,
}

impl AdmissionController {
    pub fn new(limits: ResolvedLimits) -> Self {
        Self {
            limits,
            running: HashSet::new(),
            queue: VecDeque::new(),
        }
    }

    fn has_free_slot(&self) -> bool {
        self.limits
            .concurrency
            .map_or(true, |limit| self.running.len() < limit)
    }

    pub fn admit(&mut self, id: TaskId) -> Result<Admission, QueueFull> {
        if self.has_free_slot() {
            self.running.insert(id);
            return Ok(Admission::Immediate);
        }

        if !self.limits.queue.has_room(self.queue.len()) {
            return Err(QueueFull);
        }

        self.queue.push_back(id);
        Ok(Admission::Queued)
    }

    /// Free the slot held by `id` and grant it to the longest waiting task.
    pub fn release(&mut self, id: TaskId) -> Option<TaskId> {
        if !self.running.remove(&id) || !self.has_free_slot() {
            return None;
        }

        let next = self.queue.pop_front()?;
        self.running.insert(next);
        Some(next)
    }

    /// Remove a waiting task from the queue. Returns `false` if it was not waiting.
    pub fn withdraw(&mut self, id: TaskId) -> bool {
        match self.queue.iter().position(|queued| *queued == id) {
            Some(index) => {
                self.queue.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}
