use crate::error::{MapError, Result};
use crate::model::Schedule;
use serde::{Deserialize, Serialize};

/// Parallel map configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Number of worker processes to fork
    pub workers: usize,
    /// Input elements per task (the final task may be shorter)
    pub task_size: usize,
    /// Task assignment policy
    pub schedule: Schedule,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            // One worker per CPU
            workers: num_cpus::get().max(1),
            task_size: 1,
            schedule: Schedule::Dynamic,
        }
    }
}

impl MapConfig {
    /// Create a new builder for MapConfig
    pub fn builder() -> MapConfigBuilder {
        MapConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(MapError::invalid_config("workers must be greater than 0"));
        }
        if self.task_size == 0 {
            return Err(MapError::invalid_config("task_size must be greater than 0"));
        }
        Ok(())
    }

    /// Single worker, no coordination. Useful as a baseline and for
    /// debugging a transform without process interleaving.
    pub fn sequential() -> Self {
        Self {
            workers: 1,
            task_size: 1,
            schedule: Schedule::Static,
        }
    }

    /// Static pre-partitioning across all CPUs with coarse tasks; eliminates
    /// the shared counter when per-element cost is uniform.
    pub fn static_partitioned(task_size: usize) -> Self {
        Self {
            workers: num_cpus::get().max(1),
            task_size: task_size.max(1),
            schedule: Schedule::Static,
        }
    }
}

/// Builder for MapConfig
pub struct MapConfigBuilder {
    config: MapConfig,
}

impl MapConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: MapConfig::default(),
        }
    }

    /// Set the number of worker processes
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// Set the number of elements per task
    pub fn task_size(mut self, task_size: usize) -> Self {
        self.config.task_size = task_size;
        self
    }

    /// Set the scheduling policy
    pub fn schedule(mut self, schedule: Schedule) -> Self {
        self.config.schedule = schedule;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<MapConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for MapConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
