//! Worker launch and barrier discipline for one benchmark run.
//!
//! The runner owns the executor, the per-iteration control flag, and the two
//! reusable barriers delimiting the measured region. Workers and the
//! coordinator meet at the start barrier (workers + 1 parties); workers alone
//! meet at the end barrier. The measured interval runs from the start-barrier
//! release to the last worker's stop-flag observation, both read on the
//! shared monotonic clock.

use crate::config::{BenchmarkConfig, ConfigError};
use crate::control::{Control, Loop};
use crate::executor::{Executor, ExecutorError};
use crate::registry::StateRegistry;
use crate::result::{BenchmarkMode, IterationData, IterationStatus, WorkResult};
use crate::task::{panic_message, BenchmarkTask, TaskError, WorkerContext};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Failures that end a benchmark run early.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The configuration did not validate.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The worker pool failed.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// Workers did not report back within the bounded wait; the run is
    /// abandoned because the barriers are no longer trustworthy.
    #[error("{missing} worker(s) failed to report within {waited:?}")]
    WorkerStuck {
        /// How many workers never reported.
        missing: usize,
        /// The bounded wait that elapsed.
        waited: Duration,
    },

    /// Trial-level setup failed; no iterations follow.
    #[error("trial setup failed: {0}")]
    Fatal(TaskError),

    /// An iteration failed while `fail_on_error` was set.
    #[error("iteration failed: {reason}")]
    FailedIteration {
        /// The first error observed.
        reason: String,
    },
}

struct WorkerReport {
    worker: usize,
    result: WorkResult,
    error: Option<TaskError>,
    stop_seen: Instant,
}

/// Owns the machinery shared by every iteration of one benchmark run.
pub struct ThreadGroupRunner<T: BenchmarkTask + 'static> {
    task: Arc<T>,
    config: BenchmarkConfig,
    registry: Arc<StateRegistry>,
    executor: Executor,
    start_barrier: Arc<Barrier>,
    end_barrier: Arc<Barrier>,
    worker_groups: Vec<usize>,
}

impl<T: BenchmarkTask + 'static> ThreadGroupRunner<T> {
    /// Validate the configuration and build the pool, registry, and
    /// barriers for a run. `label` prefixes worker thread names.
    pub fn new(task: Arc<T>, config: BenchmarkConfig, label: &str) -> Result<Self, RunnerError> {
        config.validate()?;
        let executor = Executor::new(config.executor, config.max_threads, label)?;
        let threads = config.max_threads;
        let worker_groups = (0..threads).map(|t| config.group_of(t)).collect();
        Ok(Self {
            task,
            registry: Arc::new(StateRegistry::new(threads)),
            executor,
            start_barrier: Arc::new(Barrier::new(threads + 1)),
            end_barrier: Arc::new(Barrier::new(threads)),
            worker_groups,
            config,
        })
    }

    /// The run's state storage.
    pub fn registry(&self) -> &StateRegistry {
        &self.registry
    }

    /// The run's configuration.
    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// The task under measurement.
    pub fn task(&self) -> &T {
        &self.task
    }

    /// Shut the pool down, waiting out any stragglers.
    pub fn shutdown(mut self) {
        let wait = self.config.shutdown_timeout;
        self.executor.shutdown(wait);
    }

    /// Run one iteration: dispatch every worker, invoke `before_release`
    /// (profiler start) while workers run their iteration setups, release
    /// the start barrier, enforce the time budget, and collect per-worker
    /// reports.
    pub(crate) fn run_iteration(
        &self,
        mode: BenchmarkMode,
        warm_up: bool,
        before_release: impl FnOnce(),
    ) -> Result<IterationData, RunnerError> {
        let control = Arc::new(Control::new(warm_up));
        let threads = self.config.max_threads;
        let single_shot = mode == BenchmarkMode::SingleShotTime;
        let (tx, rx) = mpsc::channel::<WorkerReport>();

        for worker in 0..threads {
            let task = Arc::clone(&self.task);
            let registry = Arc::clone(&self.registry);
            let control = Arc::clone(&control);
            let start = Arc::clone(&self.start_barrier);
            let end = Arc::clone(&self.end_barrier);
            let tx = tx.clone();
            let group = self.worker_groups[worker];
            let batch = self.config.batch_size;
            self.executor.submit(Box::new(move || {
                let report = worker_iteration(
                    task.as_ref(),
                    registry.as_ref(),
                    worker,
                    group,
                    &control,
                    &start,
                    &end,
                    single_shot,
                    batch,
                );
                let _ = tx.send(report);
            }))?;
        }
        drop(tx);

        before_release();
        self.start_barrier.wait();
        let started = Instant::now();

        if !single_shot {
            thread::sleep(self.config.iteration_time);
            control.request_stop();
        }

        let waited = self.config.shutdown_timeout;
        let mut reports: Vec<Option<WorkerReport>> = (0..threads).map(|_| None).collect();
        let mut received = 0;
        while received < threads {
            match rx.recv_timeout(waited) {
                Ok(report) => {
                    let worker = report.worker;
                    reports[worker] = Some(report);
                    received += 1;
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        control.request_stop();

        if received < threads {
            let missing = threads - received;
            tracing::warn!(missing, ?waited, "abandoning iteration: workers did not report");
            return Err(RunnerError::WorkerStuck { missing, waited });
        }

        let ended = reports
            .iter()
            .flatten()
            .map(|r| r.stop_seen)
            .max()
            .unwrap_or(started);
        let duration = ended.saturating_duration_since(started);

        let mut thread_results = Vec::with_capacity(threads);
        let mut status = IterationStatus::Ok;
        for report in reports.into_iter().flatten() {
            if let Some(error) = report.error {
                if error.is_fatal() {
                    return Err(RunnerError::Fatal(error));
                }
                if !status.is_failed() {
                    status = IterationStatus::Failed(error.to_string());
                }
            }
            thread_results.push(report.result);
        }

        Ok(IterationData {
            mode,
            warmup: warm_up,
            duration,
            thread_results,
            profiler_results: Vec::new(),
            status,
        })
    }
}

/// Catch panics out of user-supplied code, folding them into [`TaskError`].
fn guard<R>(f: impl FnOnce() -> Result<R, TaskError>) -> Result<R, TaskError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Body {
            reason: panic_message(payload),
        }),
    }
}

/// The worker contract. Errors never skip a barrier: whatever happens, a
/// worker arrives at the start barrier once and the end barrier once, so
/// peers and the coordinator are never left waiting.
#[allow(clippy::too_many_arguments)]
fn worker_iteration<T: BenchmarkTask>(
    task: &T,
    registry: &StateRegistry,
    worker: usize,
    group: usize,
    control: &Arc<Control>,
    start: &Barrier,
    end: &Barrier,
    single_shot: bool,
    batch: u64,
) -> WorkerReport {
    let ctx = WorkerContext {
        worker,
        group,
        registry,
    };

    let mut error: Option<TaskError> = None;
    let args = match guard(|| task.setup_iteration(&ctx)) {
        Ok(args) => Some(args),
        Err(e) => {
            error = Some(e);
            None
        }
    };

    start.wait();
    let began = Instant::now();
    let mut lp = Loop::new(Arc::clone(control));

    if let Some(args) = &args {
        if error.is_none() {
            loop {
                if control.stop_measurement() {
                    break;
                }
                if let Err(e) = guard(|| task.setup_invocation(&ctx, args)) {
                    error = Some(e);
                    break;
                }
                match guard(|| task.invoke(args, &mut lp)) {
                    Ok(result) => lp.record(result.operations),
                    Err(e) => {
                        error = Some(e);
                        break;
                    }
                }
                if let Err(e) = guard(|| task.teardown_invocation(&ctx, args)) {
                    error = Some(e);
                    break;
                }
                if single_shot && lp.operations() >= batch {
                    break;
                }
            }
        }
    }

    let stop_seen = Instant::now();
    end.wait();

    // Iteration teardown runs even for a failed iteration; the first error
    // wins the report.
    if let Some(args) = &args {
        if let Err(e) = guard(|| task.teardown_iteration(&ctx, args)) {
            error.get_or_insert(e);
        }
    }

    WorkerReport {
        worker,
        result: WorkResult::new(lp.operations(), stop_seen.saturating_duration_since(began)),
        error,
        stop_seen,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StateArgs;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Minimal task: no states, counts lifecycle events.
    struct CountingTask {
        iteration_setups: AtomicU64,
        invocations: AtomicU64,
        iteration_teardowns: AtomicU64,
    }

    impl CountingTask {
        fn new() -> Self {
            Self {
                iteration_setups: AtomicU64::new(0),
                invocations: AtomicU64::new(0),
                iteration_teardowns: AtomicU64::new(0),
            }
        }
    }

    impl BenchmarkTask for CountingTask {
        fn setup_iteration(&self, _ctx: &WorkerContext<'_>) -> Result<StateArgs, TaskError> {
            self.iteration_setups.fetch_add(1, Ordering::AcqRel);
            Ok(StateArgs::new(Vec::new()))
        }

        fn setup_invocation(
            &self,
            _ctx: &WorkerContext<'_>,
            _args: &StateArgs,
        ) -> Result<(), TaskError> {
            Ok(())
        }

        fn invoke(&self, _args: &StateArgs, _lp: &mut Loop) -> Result<WorkResult, TaskError> {
            self.invocations.fetch_add(1, Ordering::AcqRel);
            Ok(WorkResult::one_op())
        }

        fn teardown_invocation(
            &self,
            _ctx: &WorkerContext<'_>,
            _args: &StateArgs,
        ) -> Result<(), TaskError> {
            Ok(())
        }

        fn teardown_iteration(
            &self,
            _ctx: &WorkerContext<'_>,
            _args: &StateArgs,
        ) -> Result<(), TaskError> {
            self.iteration_teardowns.fetch_add(1, Ordering::AcqRel);
            Ok(())
        }

        fn teardown_trial(&self, _registry: &StateRegistry) -> Result<(), TaskError> {
            Ok(())
        }
    }

    fn single_shot_config(threads: usize, batch: u64) -> BenchmarkConfig {
        BenchmarkConfig {
            max_threads: threads,
            batch_size: batch,
            warmup_iterations: 0,
            measurement_iterations: 1,
            iteration_time: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(10),
            ..Default::default()
        }
    }

    #[test]
    fn test_single_shot_runs_batch_per_worker() {
        let task = Arc::new(CountingTask::new());
        let runner =
            ThreadGroupRunner::new(Arc::clone(&task), single_shot_config(2, 3), "t").unwrap();
        let data = runner
            .run_iteration(BenchmarkMode::SingleShotTime, false, || {})
            .unwrap();
        runner.shutdown();

        assert_eq!(data.operation_counts(), vec![3, 3]);
        assert_eq!(task.invocations.load(Ordering::Acquire), 6);
        assert_eq!(task.iteration_setups.load(Ordering::Acquire), 2);
        assert_eq!(task.iteration_teardowns.load(Ordering::Acquire), 2);
        assert!(!data.status.is_failed());
    }

    #[test]
    fn test_timed_iteration_stops_on_flag() {
        let task = Arc::new(CountingTask::new());
        let config = BenchmarkConfig {
            max_threads: 2,
            iteration_time: Duration::from_millis(20),
            ..single_shot_config(2, 1)
        };
        let runner = ThreadGroupRunner::new(Arc::clone(&task), config, "t").unwrap();
        let data = runner
            .run_iteration(BenchmarkMode::Throughput, false, || {})
            .unwrap();
        runner.shutdown();

        assert!(data.total_operations() > 0);
        assert!(data.duration >= Duration::from_millis(20));
    }

    struct FailingTask;

    impl BenchmarkTask for FailingTask {
        fn setup_iteration(&self, _ctx: &WorkerContext<'_>) -> Result<StateArgs, TaskError> {
            Ok(StateArgs::new(Vec::new()))
        }

        fn setup_invocation(
            &self,
            _ctx: &WorkerContext<'_>,
            _args: &StateArgs,
        ) -> Result<(), TaskError> {
            Ok(())
        }

        fn invoke(&self, _args: &StateArgs, _lp: &mut Loop) -> Result<WorkResult, TaskError> {
            panic!("boom on first invocation");
        }

        fn teardown_invocation(
            &self,
            _ctx: &WorkerContext<'_>,
            _args: &StateArgs,
        ) -> Result<(), TaskError> {
            Ok(())
        }

        fn teardown_iteration(
            &self,
            _ctx: &WorkerContext<'_>,
            _args: &StateArgs,
        ) -> Result<(), TaskError> {
            Ok(())
        }

        fn teardown_trial(&self, _registry: &StateRegistry) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[test]
    fn test_body_panic_marks_iteration_failed() {
        let runner =
            ThreadGroupRunner::new(Arc::new(FailingTask), single_shot_config(1, 1), "t").unwrap();
        let data = runner
            .run_iteration(BenchmarkMode::SingleShotTime, false, || {})
            .unwrap();
        runner.shutdown();

        match &data.status {
            IterationStatus::Failed(reason) => assert!(reason.contains("boom")),
            other => panic!("expected failure, got {:?}", other),
        }
    }
}
