//! The seam between generated stubs and the execution engine.

use crate::control::Loop;
use crate::registry::{StateInstance, StateRegistry};
use crate::result::WorkResult;
use std::any::Any;
use thiserror::Error;

/// Identity of the worker executing a task, plus the run's registry.
pub struct WorkerContext<'a> {
    /// 0-based worker id, stable for the run.
    pub worker: usize,
    /// 0-based thread-group id this worker belongs to.
    pub group: usize,
    /// The run's state storage.
    pub registry: &'a StateRegistry,
}

/// Ordered state instances bound for one worker.
///
/// Stubs decide the ordering; bodies receive the instances in method
/// parameter order.
pub struct StateArgs(Vec<StateInstance>);

impl StateArgs {
    /// Wrap an ordered instance list.
    pub fn new(instances: Vec<StateInstance>) -> Self {
        Self(instances)
    }

    /// Number of bound instances.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no instances are bound.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The raw instance at `index`.
    pub fn instance(&self, index: usize) -> Option<&StateInstance> {
        self.0.get(index)
    }

    /// Downcast the instance at `index` to its concrete type.
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.0.get(index).and_then(|i| i.downcast_ref::<T>())
    }
}

/// Errors from user-supplied code routed through a stub.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// State construction or a run-level setup helper failed. Fatal for the
    /// benchmark: no further iterations run.
    #[error("state `{state}` failed to initialize: {reason}")]
    Init {
        /// The state type that failed.
        state: String,
        /// What went wrong.
        reason: String,
    },

    /// A setup helper failed.
    #[error("setup `{helper}` failed: {reason}")]
    Setup {
        /// Qualified helper name.
        helper: String,
        /// What went wrong.
        reason: String,
    },

    /// A teardown helper failed.
    #[error("teardown `{helper}` failed: {reason}")]
    Teardown {
        /// Qualified helper name.
        helper: String,
        /// What went wrong.
        reason: String,
    },

    /// The benchmark body itself failed.
    #[error("benchmark body failed: {reason}")]
    Body {
        /// What went wrong.
        reason: String,
    },
}

impl TaskError {
    /// Whether this error aborts the whole benchmark rather than one
    /// iteration.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TaskError::Init { .. })
    }
}

/// Extract a readable message from a captured panic payload.
pub fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// One benchmark's executable surface, as produced by the stub generator.
///
/// The runner guarantees the calling discipline per worker per iteration:
/// `setup_iteration`, then the measured loop of `setup_invocation` /
/// `invoke` / `teardown_invocation`, then `teardown_iteration` — with the
/// start barrier between setup and the loop and the end barrier between the
/// loop and teardown. `teardown_trial` runs once, coordinator-side, at the
/// very end of the run.
pub trait BenchmarkTask: Send + Sync {
    /// Bind state for this worker and run iteration-level setup helpers.
    fn setup_iteration(&self, ctx: &WorkerContext<'_>) -> Result<StateArgs, TaskError>;

    /// Run invocation-level setup helpers.
    fn setup_invocation(&self, ctx: &WorkerContext<'_>, args: &StateArgs)
        -> Result<(), TaskError>;

    /// Invoke the measured body once.
    fn invoke(&self, args: &StateArgs, lp: &mut Loop) -> Result<WorkResult, TaskError>;

    /// Run invocation-level teardown helpers.
    fn teardown_invocation(
        &self,
        ctx: &WorkerContext<'_>,
        args: &StateArgs,
    ) -> Result<(), TaskError>;

    /// Run iteration-level teardown helpers.
    fn teardown_iteration(
        &self,
        ctx: &WorkerContext<'_>,
        args: &StateArgs,
    ) -> Result<(), TaskError>;

    /// Run trial-level teardown for every live state instance.
    fn teardown_trial(&self, registry: &StateRegistry) -> Result<(), TaskError>;
}
