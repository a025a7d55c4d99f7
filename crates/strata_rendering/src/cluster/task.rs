//! Deadline-bounded compaction queue.
//!
//! One FIFO for the whole session, drained once per frame. The deadline is
//! checked between tasks only: a compaction pass that has started always
//! finishes. A task that reports itself incomplete goes back to the front
//! so it is retried before newer requests.

use std::collections::VecDeque;

use strata_core::Clock;

use super::realm::RealmKind;
use super::vertex_cluster::ClusterKey;

/// A pending compaction of one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterTask {
    /// Realm holding the cluster.
    pub realm: RealmKind,
    /// Cluster to compact.
    pub key: ClusterKey,
    /// Instance the task was queued for. A cluster closed and recreated
    /// under the same key does not inherit the task.
    pub cluster_id: u64,
}

/// What running a task did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Finished, or no longer applicable.
    Complete,
    /// Must run again in a later frame.
    Incomplete,
}

/// Summary of one drain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskRunSummary {
    /// Tasks that completed.
    pub completed: usize,
    /// True if a task was pushed back to the front.
    pub requeued: bool,
    /// Tasks still queued afterwards.
    pub remaining: usize,
}

/// FIFO of pending compactions.
#[derive(Debug, Default)]
pub struct ClusterTaskManager {
    queue: VecDeque<ClusterTask>,
    flawless: bool,
}

impl ClusterTaskManager {
    /// Creates an empty queue.
    #[must_use]
    pub fn new(flawless: bool) -> Self {
        Self {
            queue: VecDeque::new(),
            flawless,
        }
    }

    /// Appends a task.
    pub fn schedule(&mut self, task: ClusterTask) {
        self.queue.push_back(task);
    }

    /// Runs queued tasks until the queue empties or `deadline_nanos` passes.
    ///
    /// In flawless mode the deadline is ignored and everything runs.
    pub fn run<C, F>(&mut self, clock: &C, deadline_nanos: u64, mut run_task: F) -> TaskRunSummary
    where
        C: Clock + ?Sized,
        F: FnMut(&ClusterTask) -> TaskOutcome,
    {
        let deadline = if self.flawless { u64::MAX } else { deadline_nanos };
        let mut summary = TaskRunSummary::default();

        while clock.now_nanos() < deadline {
            let Some(task) = self.queue.pop_front() else {
                break;
            };
            match run_task(&task) {
                TaskOutcome::Complete => summary.completed += 1,
                TaskOutcome::Incomplete => {
                    self.queue.push_front(task);
                    summary.requeued = true;
                    break;
                }
            }
        }

        summary.remaining = self.queue.len();
        summary
    }

    /// Enables or disables the deadline override.
    pub fn set_flawless_frames(&mut self, flawless: bool) {
        self.flawless = flawless;
    }

    /// True if the deadline is ignored.
    #[must_use]
    pub const fn is_flawless(&self) -> bool {
        self.flawless
    }

    /// Queued task count.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queued tasks in run order.
    pub fn iter(&self) -> impl Iterator<Item = &ClusterTask> {
        self.queue.iter()
    }

    /// Drops every task of one realm.
    pub fn cancel_realm(&mut self, realm: RealmKind) {
        self.queue.retain(|task| task.realm != realm);
    }

    /// Drops every task.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}
