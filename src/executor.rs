//! Parent-side orchestration and the worker claim loop.
//!
//! The parent partitions the index space, maps the shared regions, forks the
//! workers, and blocks at the join barrier; workers claim tasks per the
//! configured policy, apply the transform, write results into the shared
//! output buffer, and leave via `_exit`. The transform is never invoked by
//! the parent process.

use crate::config::MapConfig;
use crate::error::{MapError, Result};
use crate::model::{Partition, Schedule};
use crate::shm::{SharedRegion, TaskCursor, WorkerLedger};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Exit status of a worker whose transform panicked.
const PANIC_EXIT_CODE: i32 = 101;

/// Map `transform` over `input` using forked worker processes, returning the
/// results in input order.
///
/// Workers inherit the input slice and the transform's captured state by
/// copy-on-write at fork time and write results directly into a shared
/// output buffer; the parent copies the buffer into an owned `Vec` only
/// after every worker has been joined. Shared memory never outlives the
/// call.
///
/// `Out: Copy` because output values are placed in OS-backed shared memory
/// without the normal owning allocator and copied out bytewise.
///
/// This call forks the current process. It is intended for single-threaded
/// callers: only the calling thread is duplicated into each worker, so the
/// transform must not rely on other threads, locks they may hold, or an
/// async runtime owned by the parent.
///
/// # Errors
///
/// [`MapError::InvalidConfig`] for a zero worker count or task size,
/// [`MapError::Allocation`] if shared memory cannot be mapped (reported
/// before any process is spawned), [`MapError::Spawn`] if a fork fails
/// (already-spawned workers are joined first), and
/// [`MapError::WorkerFailure`] if any worker exits abnormally, including
/// via a panicking transform. The call is all-or-nothing: on any failure
/// the partial output is discarded.
///
/// # Example
///
/// ```
/// use forkmap::{parallel_map, MapConfig};
///
/// let input: Vec<u64> = (0..1000).collect();
/// let config = MapConfig::builder().workers(4).task_size(64).build()?;
/// let output = parallel_map(&input, &config, |&x| x * 10)?;
/// assert_eq!(output[7], 70);
/// # Ok::<(), forkmap::MapError>(())
/// ```
pub fn parallel_map<In, Out, F>(input: &[In], config: &MapConfig, transform: F) -> Result<Vec<Out>>
where
    In: Sync,
    Out: Copy,
    F: Fn(&In) -> Out,
{
    config.validate()?;

    let n = input.len();
    if n == 0 {
        return Ok(Vec::new());
    }

    let partition = Partition::new(n, config.task_size);

    // All shared regions are mapped before the first fork so every worker
    // inherits identical mappings; they are dropped (unmapped) only after
    // the join barrier, on every exit path.
    let cursor = TaskCursor::new()?;
    let ledger = WorkerLedger::new(config.workers)?;
    let out_bytes = n
        .checked_mul(std::mem::size_of::<Out>())
        .ok_or_else(|| MapError::invalid_config("output buffer size overflows usize"))?;
    let out = SharedRegion::anonymous(out_bytes)?;

    debug!(
        n,
        task_count = partition.task_count(),
        task_size = config.task_size,
        workers = config.workers,
        schedule = ?config.schedule,
        "starting parallel map"
    );

    let mut children: Vec<Pid> = Vec::with_capacity(config.workers);
    for worker in 0..config.workers {
        // SAFETY: children touch only inherited copy-on-write state and the
        // shared regions, and leave via `_exit` without unwinding.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                let code = run_worker(
                    worker, input, config, &partition, &cursor, &ledger, &out, &transform,
                );
                // SAFETY: `_exit` skips atexit handlers and destructors,
                // none of which may run twice in a forked child.
                unsafe { libc::_exit(code) }
            }
            Ok(ForkResult::Parent { child }) => children.push(child),
            Err(errno) => {
                warn!(worker, %errno, "fork failed, joining already-spawned workers");
                if let Err(join_err) = join_all(&children) {
                    warn!("join after failed spawn also failed: {join_err}");
                }
                return Err(MapError::Spawn { worker, errno });
            }
        }
    }

    join_all(&children)?;

    debug!(claims = ?ledger.snapshot(), "all workers joined");

    // The join barrier has ordered every worker write before this read.
    // SAFETY: every slot was written exactly once by the worker owning it;
    // Out: Copy makes the bytewise copy a valid value copy.
    let result = unsafe { std::slice::from_raw_parts(out.as_ptr::<Out>(), n) }.to_vec();
    Ok(result)
}

/// The task-claim loop, executed inside a forked worker. Returns the
/// worker's exit status instead of unwinding.
#[allow(clippy::too_many_arguments)]
fn run_worker<In, Out, F>(
    worker: usize,
    input: &[In],
    config: &MapConfig,
    partition: &Partition,
    cursor: &TaskCursor,
    ledger: &WorkerLedger,
    out: &SharedRegion,
    transform: &F,
) -> i32
where
    Out: Copy,
    F: Fn(&In) -> Out,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let out_ptr = out.as_ptr::<Out>();
        match config.schedule {
            Schedule::Dynamic => loop {
                let task = cursor.claim();
                if task >= partition.task_count() {
                    break;
                }
                ledger.record_claim(worker);
                run_task(task, input, partition, out_ptr, transform);
            },
            Schedule::Static => {
                for task in partition.worker_range(worker, config.workers) {
                    ledger.record_claim(worker);
                    run_task(task, input, partition, out_ptr, transform);
                }
            }
        }
    }));

    match outcome {
        Ok(()) => 0,
        Err(_) => PANIC_EXIT_CODE,
    }
}

/// Apply the transform to every element of one task, writing each result
/// into the output slot matching its input index.
fn run_task<In, Out, F>(
    task: usize,
    input: &[In],
    partition: &Partition,
    out_ptr: *mut Out,
    transform: &F,
) where
    Out: Copy,
    F: Fn(&In) -> Out,
{
    for i in partition.element_range(task) {
        let value = transform(&input[i]);
        // SAFETY: i < n, and no other worker owns this slot.
        unsafe { out_ptr.add(i).write(value) };
    }
}

/// Wait for every spawned worker. Every child is reaped even when an earlier
/// one failed; the first failure is reported after the full sweep.
fn join_all(children: &[Pid]) -> Result<()> {
    let mut failure: Option<MapError> = None;

    for (worker, &pid) in children.iter().enumerate() {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, 0)) => {}
            Ok(WaitStatus::Exited(_, code)) => {
                warn!(worker, %pid, code, "worker exited with nonzero status");
                failure.get_or_insert(MapError::worker_failure(
                    worker,
                    pid.as_raw(),
                    format!("exited with status {code}"),
                ));
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                warn!(worker, %pid, %signal, "worker killed by signal");
                failure.get_or_insert(MapError::worker_failure(
                    worker,
                    pid.as_raw(),
                    format!("killed by {signal}"),
                ));
            }
            Ok(status) => {
                failure.get_or_insert(MapError::worker_failure(
                    worker,
                    pid.as_raw(),
                    format!("stopped in unexpected state {status:?}"),
                ));
            }
            Err(errno) => {
                warn!(worker, %pid, %errno, "waitpid failed");
                failure.get_or_insert(MapError::Join {
                    pid: pid.as_raw(),
                    errno,
                });
            }
        }
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_worker_smoke() {
        let input: Vec<i32> = (0..100).collect();
        let config = MapConfig::builder().workers(1).build().unwrap();

        let output = parallel_map(&input, &config, |&x| x + 1).unwrap();
        let expected: Vec<i32> = (1..101).collect();
        assert_eq!(output, expected);
    }

    #[test]
    fn test_empty_input_short_circuits() {
        let input: Vec<i32> = Vec::new();
        let config = MapConfig::default();

        let output = parallel_map(&input, &config, |&x| x * 2).unwrap();
        assert!(output.is_empty());
    }

    #[test]
    fn test_zero_sized_output_type() {
        let input: Vec<u8> = vec![1, 2, 3, 4];
        let config = MapConfig::builder().workers(2).build().unwrap();

        let output = parallel_map(&input, &config, |_| ()).unwrap();
        assert_eq!(output.len(), 4);
    }

    #[test]
    fn test_invalid_config_rejected_before_spawn() {
        let input: Vec<i32> = vec![1, 2, 3];
        let config = MapConfig {
            workers: 0,
            ..MapConfig::default()
        };

        let err = parallel_map(&input, &config, |&x| x).unwrap_err();
        assert!(matches!(err, MapError::InvalidConfig(_)));
    }

    #[test]
    fn test_static_with_more_workers_than_tasks() {
        let input: Vec<u64> = (0..3).collect();
        let config = MapConfig::builder()
            .workers(8)
            .schedule(Schedule::Static)
            .build()
            .unwrap();

        let output = parallel_map(&input, &config, |&x| x * 2).unwrap();
        assert_eq!(output, vec![0, 2, 4]);
    }
}
