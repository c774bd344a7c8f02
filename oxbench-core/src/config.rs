//! Runtime configuration for one benchmark run.

use crate::executor::ExecutorKind;
use crate::result::BenchmarkMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration validation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// `max_threads` was zero.
    #[error("max_threads must be >= 1")]
    ZeroThreads,

    /// A thread group was empty.
    #[error("thread_groups entries must be positive")]
    EmptyThreadGroup,

    /// The groups did not cover the configured thread count.
    #[error("thread_groups sum to {sum}, expected max_threads = {expected}")]
    ThreadGroupMismatch {
        /// Sum of the configured group sizes.
        sum: usize,
        /// The configured thread count.
        expected: usize,
    },

    /// `batch_size` was zero.
    #[error("batch_size must be >= 1")]
    ZeroBatch,

    /// `iteration_time` was zero.
    #[error("iteration_time must be > 0")]
    ZeroIterationTime,
}

/// Knobs for one benchmark run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Number of worker threads.
    pub max_threads: usize,
    /// Contiguous thread-group sizes; empty means one group of all threads.
    /// Group `g` receives a contiguous range of thread ids.
    pub thread_groups: Vec<usize>,
    /// Iterations run before measurement starts.
    pub warmup_iterations: usize,
    /// Measured iterations.
    pub measurement_iterations: usize,
    /// Time budget of one iteration (ignored for single-shot runs).
    pub iteration_time: Duration,
    /// Invocations per worker for single-shot runs.
    pub batch_size: u64,
    /// Stop at the first failed iteration and surface its error.
    pub fail_on_error: bool,
    /// Pool strategy, read once at startup and immutable after.
    pub executor: ExecutorKind,
    /// Modes this run honors; empty means "whatever the benchmark declares".
    pub benchmark_types: Vec<BenchmarkMode>,
    /// Bound for joining stuck workers and for each executor-shutdown wait.
    pub shutdown_timeout: Duration,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            max_threads: 1,
            thread_groups: Vec::new(),
            warmup_iterations: 5,
            measurement_iterations: 5,
            iteration_time: Duration::from_secs(1),
            batch_size: 1,
            fail_on_error: false,
            executor: ExecutorKind::default(),
            benchmark_types: Vec::new(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl BenchmarkConfig {
    /// Validate configuration values, returning the first error found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if !self.thread_groups.is_empty() {
            if self.thread_groups.iter().any(|&g| g == 0) {
                return Err(ConfigError::EmptyThreadGroup);
            }
            let sum: usize = self.thread_groups.iter().sum();
            if sum != self.max_threads {
                return Err(ConfigError::ThreadGroupMismatch {
                    sum,
                    expected: self.max_threads,
                });
            }
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if self.iteration_time.is_zero() {
            return Err(ConfigError::ZeroIterationTime);
        }
        Ok(())
    }

    /// Effective group sizes: the configured groups, or one group of all
    /// threads when none were configured.
    pub fn effective_thread_groups(&self) -> Vec<usize> {
        if self.thread_groups.is_empty() {
            vec![self.max_threads]
        } else {
            self.thread_groups.clone()
        }
    }

    /// Group id for a thread id: the smallest `g` whose prefix sum exceeds
    /// `thread`. Ids are 0-based and stable for the run.
    pub fn group_of(&self, thread: usize) -> usize {
        let groups = self.effective_thread_groups();
        let mut covered = 0;
        for (g, size) in groups.iter().enumerate() {
            covered += size;
            if covered > thread {
                return g;
            }
        }
        groups.len().saturating_sub(1)
    }

    /// Number of thread groups.
    pub fn group_count(&self) -> usize {
        self.effective_thread_groups().len()
    }

    /// Concrete modes to run, honoring the configured mode filter.
    pub fn resolve_modes(&self, declared: &[BenchmarkMode]) -> Vec<BenchmarkMode> {
        let mut resolved = Vec::new();
        for mode in declared {
            for concrete in mode.expand() {
                if !resolved.contains(concrete) {
                    resolved.push(*concrete);
                }
            }
        }
        if self.benchmark_types.is_empty() {
            return resolved;
        }
        let mut allowed = Vec::new();
        for mode in &self.benchmark_types {
            for concrete in mode.expand() {
                if !allowed.contains(concrete) {
                    allowed.push(*concrete);
                }
            }
        }
        resolved.retain(|m| allowed.contains(m));
        resolved
    }
}
