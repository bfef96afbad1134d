//! Anonymous shared memory regions and the coordination state living in them.
//!
//! Everything the parent and its forked workers mutate together is placed in
//! `MAP_SHARED | MAP_ANONYMOUS` mappings created before the first fork, so
//! every worker inherits the same mapping at the same address. Regions hold
//! only fixed-layout values (atomics, raw output slots) and never pointers,
//! which would dangle across address spaces.

use crate::error::{MapError, Result};
use nix::errno::Errno;
use nix::sys::mman::{mmap_anonymous, munmap, MapFlags, ProtFlags};
use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::warn;

/// Host page size; mapping lengths are rounded up to a whole page count.
fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page > 0 {
        page as usize
    } else {
        4096
    }
}

/// An anonymous shared mapping, visible identically to the parent and every
/// process forked after its creation.
///
/// The region is an owned handle: dropping it unmaps the memory exactly
/// once. The orchestrator keeps regions alive until every worker has been
/// joined, so a mapping is never released while a child could still be
/// writing into it.
#[derive(Debug)]
pub struct SharedRegion {
    ptr: NonNull<c_void>,
    len: usize,
}

impl SharedRegion {
    /// Map at least `bytes` bytes of zero-initialized shared memory,
    /// rounded up to the page granularity.
    pub fn anonymous(bytes: usize) -> Result<Self> {
        let page = page_size();
        let len = bytes
            .max(1)
            .div_ceil(page)
            .checked_mul(page)
            .ok_or(MapError::Allocation {
                bytes,
                errno: Errno::ENOMEM,
            })?;
        let length = NonZeroUsize::new(len).ok_or(MapError::Allocation {
            bytes: len,
            errno: Errno::EINVAL,
        })?;

        // SAFETY: no address hint is passed, so the kernel picks a fresh
        // range and no existing mapping can be clobbered.
        let ptr = unsafe {
            mmap_anonymous(
                None,
                length,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
            )
        }
        .map_err(|errno| MapError::Allocation { bytes: len, errno })?;

        Ok(Self { ptr, len })
    }

    /// Mapped length in bytes (a whole number of pages)
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the mapping has zero length (never the case for a live region)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base of the mapping as a typed pointer. Page alignment satisfies any
    /// `T` with alignment up to the page size.
    pub fn as_ptr<T>(&self) -> *mut T {
        self.ptr.as_ptr().cast()
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: ptr/len are exactly what mmap_anonymous returned, and the
        // handle is dropped at most once.
        if let Err(errno) = unsafe { munmap(self.ptr, self.len) } {
            warn!(len = self.len, %errno, "failed to unmap shared region");
        }
    }
}

// The region is plain shared memory; concurrent access goes through the
// atomics placed in it or through disjoint slots.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

/// The shared "next task index to claim" counter for dynamic scheduling.
///
/// A single `AtomicUsize` in its own shared region; anonymous mappings are
/// zero-filled, so the cursor starts at task 0. The only cross-process
/// mutation is the lock-free fetch-and-increment in [`claim`](Self::claim).
#[derive(Debug)]
pub struct TaskCursor {
    region: SharedRegion,
}

impl TaskCursor {
    pub fn new() -> Result<Self> {
        let region = SharedRegion::anonymous(std::mem::size_of::<AtomicUsize>())?;
        Ok(Self { region })
    }

    fn cell(&self) -> &AtomicUsize {
        // SAFETY: the region is at least one zero-initialized, page-aligned
        // AtomicUsize and lives as long as self.
        unsafe { &*self.region.as_ptr::<AtomicUsize>() }
    }

    /// Atomically claim the next task index. Claims past the task count are
    /// the worker's signal to stop; they are harmless.
    pub fn claim(&self) -> usize {
        self.cell().fetch_add(1, Ordering::AcqRel)
    }

    /// Number of claims made so far
    pub fn position(&self) -> usize {
        self.cell().load(Ordering::Acquire)
    }
}

/// Per-worker claim counters, written by workers and read by the parent
/// after the join barrier for diagnostics.
///
/// Each worker owns one slot, so slots are never contended; the join barrier
/// makes them visible to the parent.
#[derive(Debug)]
pub struct WorkerLedger {
    region: SharedRegion,
    workers: usize,
}

impl WorkerLedger {
    pub fn new(workers: usize) -> Result<Self> {
        let bytes = workers
            .max(1)
            .checked_mul(std::mem::size_of::<AtomicU64>())
            .ok_or(MapError::Allocation {
                bytes: usize::MAX,
                errno: Errno::ENOMEM,
            })?;
        let region = SharedRegion::anonymous(bytes)?;
        Ok(Self { region, workers })
    }

    fn slot(&self, worker: usize) -> &AtomicU64 {
        assert!(worker < self.workers.max(1));
        // SAFETY: in-bounds slot of a zero-initialized shared region that
        // lives as long as self.
        unsafe { &*self.region.as_ptr::<AtomicU64>().add(worker) }
    }

    /// Record one claimed task for `worker`
    pub fn record_claim(&self, worker: usize) {
        self.slot(worker).fetch_add(1, Ordering::Relaxed);
    }

    /// Tasks claimed by `worker`
    pub fn claims(&self, worker: usize) -> u64 {
        self.slot(worker).load(Ordering::Relaxed)
    }

    /// Claim counts for all workers, in worker order
    pub fn snapshot(&self) -> Vec<u64> {
        (0..self.workers).map(|w| self.claims(w)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::wait::{waitpid, WaitStatus};
    use nix::unistd::{fork, ForkResult};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_region_rounds_to_pages() {
        let page = page_size();

        let region = SharedRegion::anonymous(1).unwrap();
        assert_eq!(region.len(), page);

        let region = SharedRegion::anonymous(page + 1).unwrap();
        assert_eq!(region.len(), 2 * page);

        let region = SharedRegion::anonymous(0).unwrap();
        assert_eq!(region.len(), page);
    }

    #[test]
    fn test_region_read_write() {
        let region = SharedRegion::anonymous(64 * std::mem::size_of::<u64>()).unwrap();
        let ptr = region.as_ptr::<u64>();

        for i in 0..64u64 {
            unsafe { ptr.add(i as usize).write(i * 3) };
        }
        for i in 0..64u64 {
            assert_eq!(unsafe { ptr.add(i as usize).read() }, i * 3);
        }
    }

    #[test]
    fn test_region_zero_initialized() {
        let region = SharedRegion::anonymous(1024).unwrap();
        let ptr = region.as_ptr::<u8>();
        for i in 0..1024 {
            assert_eq!(unsafe { ptr.add(i).read() }, 0);
        }
    }

    #[test]
    fn test_region_shared_across_fork() {
        let region = SharedRegion::anonymous(std::mem::size_of::<u64>()).unwrap();
        let ptr = region.as_ptr::<u64>();

        match unsafe { fork() }.unwrap() {
            ForkResult::Child => {
                unsafe { ptr.write(0xBEEF) };
                unsafe { libc::_exit(0) };
            }
            ForkResult::Parent { child } => {
                let status = waitpid(child, None).unwrap();
                assert_eq!(status, WaitStatus::Exited(child, 0));
                assert_eq!(unsafe { ptr.read() }, 0xBEEF);
            }
        }
    }

    #[test]
    fn test_cursor_claims_sequentially() {
        let cursor = TaskCursor::new().unwrap();
        assert_eq!(cursor.position(), 0);

        assert_eq!(cursor.claim(), 0);
        assert_eq!(cursor.claim(), 1);
        assert_eq!(cursor.claim(), 2);
        assert_eq!(cursor.position(), 3);
    }

    #[test]
    fn test_cursor_claims_unique_under_contention() {
        let cursor = Arc::new(TaskCursor::new().unwrap());
        let threads = 8;
        let claims_per_thread = 1000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let cursor = Arc::clone(&cursor);
                thread::spawn(move || {
                    (0..claims_per_thread)
                        .map(|_| cursor.claim())
                        .collect::<Vec<usize>>()
                })
            })
            .collect();

        let mut all: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();

        let expected: Vec<usize> = (0..threads * claims_per_thread).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_ledger_records_per_worker() {
        let ledger = WorkerLedger::new(4).unwrap();

        ledger.record_claim(0);
        ledger.record_claim(0);
        ledger.record_claim(3);

        assert_eq!(ledger.claims(0), 2);
        assert_eq!(ledger.claims(1), 0);
        assert_eq!(ledger.claims(3), 1);
        assert_eq!(ledger.snapshot(), vec![2, 0, 0, 1]);
    }

    #[test]
    #[should_panic]
    fn test_ledger_rejects_out_of_bounds_worker() {
        let ledger = WorkerLedger::new(2).unwrap();
        ledger.record_claim(2);
    }
}
