//! Iteration sequencing for one benchmark under one mode.

use crate::config::BenchmarkConfig;
use crate::output::{OutputFormat, ProfilerHook, ProfilerRecord};
use crate::result::{BenchmarkMode, IterationData, IterationStatus, ModeRun};
use crate::runner::{RunnerError, ThreadGroupRunner};
use crate::task::BenchmarkTask;
use std::sync::Arc;

/// Drives a benchmark through its warmup and measurement iterations,
/// applying the per-iteration protocol: profilers around the measured
/// region, results to the sink, and trial teardown on every exit path.
pub struct IterationCoordinator<'a, T: BenchmarkTask + 'static> {
    runner: &'a ThreadGroupRunner<T>,
    sink: &'a mut dyn OutputFormat,
    profilers: &'a mut [Box<dyn ProfilerHook>],
}

impl<'a, T: BenchmarkTask + 'static> IterationCoordinator<'a, T> {
    /// Attach a coordinator to a runner, a result sink, and profiler hooks.
    pub fn new(
        runner: &'a ThreadGroupRunner<T>,
        sink: &'a mut dyn OutputFormat,
        profilers: &'a mut [Box<dyn ProfilerHook>],
    ) -> Self {
        Self {
            runner,
            sink,
            profilers,
        }
    }

    /// Run all iterations under `mode` and return the measurement sequence.
    /// Warmup iterations are reported to the sink but not returned.
    ///
    /// Trial teardown runs no matter how the iteration sequence ends:
    /// normally, on a failed iteration with `fail_on_error`, or on a fatal
    /// trial-setup error.
    pub fn run(&mut self, mode: BenchmarkMode) -> Result<Vec<IterationData>, RunnerError> {
        let outcome = self.run_iterations(mode);
        if let Err(e) = self.runner.task().teardown_trial(self.runner.registry()) {
            tracing::warn!(error = %e, "trial teardown failed");
            self.sink.exception(&e);
        }
        outcome
    }

    fn run_iterations(&mut self, mode: BenchmarkMode) -> Result<Vec<IterationData>, RunnerError> {
        let config: BenchmarkConfig = self.runner.config().clone();

        for _ in 0..config.warmup_iterations {
            self.one_iteration(mode, true)?;
        }

        let mut measured = Vec::with_capacity(config.measurement_iterations);
        for _ in 0..config.measurement_iterations {
            let data = self.one_iteration(mode, false)?;
            let failure = match &data.status {
                IterationStatus::Failed(reason) => Some(reason.clone()),
                IterationStatus::Ok => None,
            };
            measured.push(data);
            if let Some(reason) = failure {
                if config.fail_on_error {
                    return Err(RunnerError::FailedIteration { reason });
                }
            }
        }
        Ok(measured)
    }

    fn one_iteration(
        &mut self,
        mode: BenchmarkMode,
        warm_up: bool,
    ) -> Result<IterationData, RunnerError> {
        let runner = self.runner;
        let profilers = &mut *self.profilers;

        // Workers run their iteration setups between dispatch and the start
        // barrier; profilers come up in that same window, before release.
        let mut data = runner.run_iteration(mode, warm_up, || {
            for profiler in profilers.iter_mut() {
                if let Err(e) = profiler.start_profile() {
                    tracing::warn!(profiler = %profiler.name(), error = %e, "profiler start failed");
                }
            }
        })?;

        for profiler in self.profilers.iter_mut() {
            match profiler.end_profile() {
                Ok(value) => data.profiler_results.push(ProfilerRecord {
                    source: profiler.name().to_string(),
                    value,
                }),
                Err(e) => {
                    tracing::warn!(profiler = %profiler.name(), error = %e, "profiler end failed");
                    self.sink
                        .exception(&format!("profiler {} failed: {e}", profiler.name()));
                }
            }
        }

        self.sink.iteration_result(&data);
        Ok(data)
    }
}

/// Run `task` under one concrete mode with a fresh registry and pool, and
/// aggregate into a [`ModeRun`]. The pool is always shut down before this
/// returns, error paths included.
pub fn run_mode<T: BenchmarkTask + 'static>(
    task: Arc<T>,
    mode: BenchmarkMode,
    config: &BenchmarkConfig,
    label: &str,
    sink: &mut dyn OutputFormat,
    profilers: &mut [Box<dyn ProfilerHook>],
) -> Result<ModeRun, RunnerError> {
    let runner = ThreadGroupRunner::new(task, config.clone(), label)?;
    let iterations = IterationCoordinator::new(&runner, sink, profilers).run(mode);
    runner.shutdown();
    Ok(ModeRun {
        mode,
        iterations: iterations?,
    })
}
