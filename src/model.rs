//! Core data model: task partitioning and scheduling policy.
//!
//! A task is a contiguous run of input indices; it has no stored
//! representation beyond its index. All bounds are derived arithmetically
//! from the partition, so parent and workers agree on task geometry without
//! exchanging anything at runtime.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// How tasks are assigned to workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    /// Workers pull task indices from a shared atomic counter until it runs
    /// past the task count. Balances uneven per-element cost at the price of
    /// one contention point shared by all workers.
    #[default]
    Dynamic,

    /// Each worker iterates a precomputed, disjoint range of task indices.
    /// No shared counter and no contention; best when per-element cost is
    /// uniform.
    Static,
}

/// Division of an input of `n` elements into fixed-size tasks.
///
/// Every task covers exactly `task_size` elements except the last, which
/// covers the remainder when `n` is not a multiple of `task_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    n: usize,
    task_size: usize,
    task_count: usize,
}

impl Partition {
    /// Split `n` elements into tasks of `task_size` elements each.
    ///
    /// `task_size` must be at least 1; `MapConfig::validate` enforces this
    /// before a partition is ever built.
    pub fn new(n: usize, task_size: usize) -> Self {
        debug_assert!(task_size >= 1);
        Self {
            n,
            task_size,
            task_count: n.div_ceil(task_size),
        }
    }

    /// Number of input elements
    pub fn input_len(&self) -> usize {
        self.n
    }

    /// Elements per task (the final task may be shorter)
    pub fn task_size(&self) -> usize {
        self.task_size
    }

    /// Total number of tasks: `ceil(n / task_size)`
    pub fn task_count(&self) -> usize {
        self.task_count
    }

    /// True if there is no work at all
    pub fn is_empty(&self) -> bool {
        self.task_count == 0
    }

    /// Input index range covered by task `task`, clamped to the input length
    /// so the final task covers exactly the remainder.
    pub fn element_range(&self, task: usize) -> Range<usize> {
        let start = task.saturating_mul(self.task_size).min(self.n);
        let end = start.saturating_add(self.task_size).min(self.n);
        start..end
    }

    /// Task index range owned by `worker` under static scheduling.
    ///
    /// Workers receive `ceil(task_count / workers)` consecutive tasks each;
    /// trailing workers may receive an empty range and simply do no work.
    pub fn worker_range(&self, worker: usize, workers: usize) -> Range<usize> {
        debug_assert!(workers >= 1);
        let per_worker = self.task_count.div_ceil(workers.max(1));
        let start = worker.saturating_mul(per_worker).min(self.task_count);
        let end = start.saturating_add(per_worker).min(self.task_count);
        start..end
    }
}
