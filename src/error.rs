use nix::errno::Errno;
use thiserror::Error;

/// Errors produced by a parallel map call.
///
/// Allocation and spawn failures are reported before any result is produced;
/// join and worker failures are reported only after every spawned worker has
/// been waited for, so no child process is ever leaked on an error path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapError {
    // Configuration errors
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // Shared memory errors
    #[error("shared memory allocation of {bytes} bytes failed: {errno}")]
    Allocation { bytes: usize, errno: Errno },

    // Process lifecycle errors
    #[error("failed to spawn worker {worker}: {errno}")]
    Spawn { worker: usize, errno: Errno },

    #[error("failed to join worker process {pid}: {errno}")]
    Join { pid: i32, errno: Errno },

    #[error("worker {worker} (pid {pid}) {reason}")]
    WorkerFailure {
        worker: usize,
        pid: i32,
        reason: String,
    },
}

impl MapError {
    /// Create an invalid-configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a worker-failure error
    pub fn worker_failure(worker: usize, pid: i32, reason: impl Into<String>) -> Self {
        Self::WorkerFailure {
            worker,
            pid,
            reason: reason.into(),
        }
    }

    /// Check if this error indicates OS resource exhaustion rather than a
    /// bug in the call; such a call may succeed later with fewer workers or
    /// a smaller input.
    pub fn is_resource_exhaustion(&self) -> bool {
        match self {
            Self::Allocation { errno, .. } => {
                matches!(errno, Errno::ENOMEM | Errno::EMFILE | Errno::ENFILE)
            }
            Self::Spawn { errno, .. } => matches!(errno, Errno::EAGAIN | Errno::ENOMEM),
            _ => false,
        }
    }
}

/// Result type alias for MapError
pub type Result<T> = std::result::Result<T, MapError>;
