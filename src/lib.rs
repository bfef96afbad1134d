//! # forkmap: process-parallel map over a slice
//!
//! Maps a pure function over a fixed-size input using forked OS worker
//! processes instead of threads. Workers inherit the input and the
//! transform's captured state by copy-on-write at fork time, claim tasks
//! either from a shared atomic cursor (dynamic scheduling) or from
//! precomputed disjoint ranges (static scheduling), and write results into
//! an anonymous shared memory buffer. The parent joins every worker before
//! copying the buffer into an owned, ordered result.
//!
//! ## Quick start
//!
//! ```
//! use forkmap::{parallel_map, MapConfig, Schedule};
//!
//! let input: Vec<u64> = (0..10_000).collect();
//!
//! let config = MapConfig::builder()
//!     .workers(4)
//!     .task_size(100)
//!     .schedule(Schedule::Dynamic)
//!     .build()?;
//!
//! let squares = parallel_map(&input, &config, |&x| x * x)?;
//! assert_eq!(squares[12], 144);
//! # Ok::<(), forkmap::MapError>(())
//! ```
//!
//! The call is all-or-nothing: allocation failures, spawn failures, and
//! abnormal worker exits (including a panicking transform) surface as
//! [`MapError`] and no partial output escapes. Shared memory is released on
//! every exit path, only after all workers have been joined.

// Module declarations
pub mod config;
pub mod error;
pub mod executor;
pub mod model;
pub mod shm;

// Re-exports for convenience
pub use config::{MapConfig, MapConfigBuilder};
pub use error::{MapError, Result};
pub use executor::parallel_map;
pub use model::{Partition, Schedule};
pub use shm::{SharedRegion, TaskCursor, WorkerLedger};
