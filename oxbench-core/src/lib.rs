#![warn(missing_docs)]
//! OxBench Core - Execution Engine
//!
//! This crate provides the runtime half of the harness:
//! - `Control` / `Loop` for cooperative stop signalling inside measured code
//! - `StateRegistry` mapping (scope, group, thread) to state instances
//! - `Executor` pool strategies with bounded-wait shutdown
//! - `ThreadGroupRunner` coordinating workers across start/stop barriers
//! - `IterationCoordinator` driving warmup and measurement iterations
//!
//! The build-time half (descriptor model and stub generation) lives in
//! `oxbench-gen`; stubs plug into this crate through the [`BenchmarkTask`]
//! trait.

mod config;
mod control;
mod coordinator;
mod executor;
mod output;
mod registry;
mod result;
mod runner;
mod task;

pub use config::{BenchmarkConfig, ConfigError};
pub use control::{Control, Loop};
pub use coordinator::{run_mode, IterationCoordinator};
pub use executor::{Executor, ExecutorError, ExecutorKind, Job};
pub use output::{OutputFormat, ProfilerHook, ProfilerRecord};
pub use registry::{StateInstance, StateKey, StateRegistry};
pub use result::{
    aggregate, AggregatedMetric, BenchmarkMode, IterationData, IterationStatus, ModeRun,
    WorkResult,
};
pub use runner::{RunnerError, ThreadGroupRunner};
pub use task::{panic_message, BenchmarkTask, StateArgs, TaskError, WorkerContext};

/// Lock a mutex, recovering from poisoning.
///
/// A poisoned lock here means a peer worker panicked while holding it; that
/// panic is already captured and reported as an iteration failure, so the
/// guarded data is still usable.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
