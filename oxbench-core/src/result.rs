//! Result contracts: per-invocation work results, per-iteration records,
//! and the per-mode aggregation rules.

use crate::output::ProfilerRecord;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What a benchmark body reports back per invocation, and what a worker
/// accumulates over one measured interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkResult {
    /// Number of operations performed.
    pub operations: u64,
    /// Time spent performing them.
    pub time: Duration,
}

impl WorkResult {
    /// Create a result from explicit counts.
    pub fn new(operations: u64, time: Duration) -> Self {
        Self { operations, time }
    }

    /// The common single-operation result; the harness supplies the timing.
    pub fn one_op() -> Self {
        Self {
            operations: 1,
            time: Duration::ZERO,
        }
    }
}

/// Measurement modes a benchmark can run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BenchmarkMode {
    /// Operations per unit of time: `sum(ops) / max(time)` across threads.
    Throughput,
    /// Time per operation: `sum(time) / sum(ops)` across threads.
    AverageTime,
    /// Per-invocation timing samples; aggregates like [`Self::AverageTime`].
    SampleTime,
    /// A fixed batch of invocations per worker, no time budget.
    SingleShotTime,
    /// Shorthand that expands to every concrete mode.
    All,
}

impl BenchmarkMode {
    /// Expand `All` into the concrete modes; concrete modes map to themselves.
    pub fn expand(self) -> &'static [BenchmarkMode] {
        match self {
            BenchmarkMode::Throughput => &[BenchmarkMode::Throughput],
            BenchmarkMode::AverageTime => &[BenchmarkMode::AverageTime],
            BenchmarkMode::SampleTime => &[BenchmarkMode::SampleTime],
            BenchmarkMode::SingleShotTime => &[BenchmarkMode::SingleShotTime],
            BenchmarkMode::All => &[
                BenchmarkMode::Throughput,
                BenchmarkMode::AverageTime,
                BenchmarkMode::SampleTime,
                BenchmarkMode::SingleShotTime,
            ],
        }
    }

    /// Short label used in output and thread names.
    pub fn label(self) -> &'static str {
        match self {
            BenchmarkMode::Throughput => "thrpt",
            BenchmarkMode::AverageTime => "avgt",
            BenchmarkMode::SampleTime => "sample",
            BenchmarkMode::SingleShotTime => "ss",
            BenchmarkMode::All => "all",
        }
    }
}

impl std::str::FromStr for BenchmarkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "throughput" | "thrpt" => Ok(BenchmarkMode::Throughput),
            "average-time" | "avgt" => Ok(BenchmarkMode::AverageTime),
            "sample-time" | "sample" => Ok(BenchmarkMode::SampleTime),
            "single-shot-time" | "ss" => Ok(BenchmarkMode::SingleShotTime),
            "all" => Ok(BenchmarkMode::All),
            other => Err(format!("unknown benchmark mode: {other}")),
        }
    }
}

/// A score produced by applying a mode's aggregation rule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregatedMetric {
    /// Operations per second (Throughput).
    OpsPerSecond(f64),
    /// Nanoseconds per operation (AverageTime, SampleTime, SingleShotTime).
    NanosPerOp(f64),
}

/// Aggregate per-thread results under a concrete mode's rule.
///
/// Returns `None` for an empty input, a zero divisor, or the `All`
/// pseudo-mode (expand it first).
pub fn aggregate(mode: BenchmarkMode, parts: &[WorkResult]) -> Option<AggregatedMetric> {
    if parts.is_empty() {
        return None;
    }
    let total_ops: u64 = parts.iter().map(|r| r.operations).sum();
    match mode {
        BenchmarkMode::Throughput => {
            let max_time = parts.iter().map(|r| r.time).max()?;
            if max_time.is_zero() {
                return None;
            }
            Some(AggregatedMetric::OpsPerSecond(
                total_ops as f64 / max_time.as_secs_f64(),
            ))
        }
        BenchmarkMode::AverageTime | BenchmarkMode::SampleTime | BenchmarkMode::SingleShotTime => {
            if total_ops == 0 {
                return None;
            }
            let total_time: Duration = parts.iter().map(|r| r.time).sum();
            Some(AggregatedMetric::NanosPerOp(
                total_time.as_nanos() as f64 / total_ops as f64,
            ))
        }
        BenchmarkMode::All => None,
    }
}

/// Terminal status of one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationStatus {
    /// The iteration completed normally.
    Ok,
    /// Something inside the measured region or its hooks failed.
    Failed(String),
}

impl IterationStatus {
    /// Whether this iteration failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, IterationStatus::Failed(_))
    }
}

/// The record produced for every iteration, warmup included.
#[derive(Debug)]
pub struct IterationData {
    /// Mode the iteration ran under.
    pub mode: BenchmarkMode,
    /// Whether this was a warmup iteration.
    pub warmup: bool,
    /// Measured interval: last thread through the start barrier to last
    /// thread observing the stop flag, on the coordinator's clock.
    pub duration: Duration,
    /// Per-worker accumulated results, indexed by worker id.
    pub thread_results: Vec<WorkResult>,
    /// Opaque profiler payloads attached after the measured region.
    pub profiler_results: Vec<ProfilerRecord>,
    /// Outcome of the iteration.
    pub status: IterationStatus,
}

impl IterationData {
    /// Per-worker operation counts, indexed by worker id.
    pub fn operation_counts(&self) -> Vec<u64> {
        self.thread_results.iter().map(|r| r.operations).collect()
    }

    /// Total operations across all workers.
    pub fn total_operations(&self) -> u64 {
        self.thread_results.iter().map(|r| r.operations).sum()
    }

    /// Apply this iteration's mode aggregation rule. `None` when the
    /// iteration failed or produced no work.
    pub fn score(&self) -> Option<AggregatedMetric> {
        if self.status.is_failed() {
            return None;
        }
        aggregate(self.mode, &self.thread_results)
    }
}

/// All measurement iterations of one benchmark under one mode.
#[derive(Debug)]
pub struct ModeRun {
    /// The concrete mode that ran.
    pub mode: BenchmarkMode,
    /// Measurement iterations in order; warmup iterations are not included.
    pub iterations: Vec<IterationData>,
}

impl ModeRun {
    /// Whether any measurement iteration failed.
    pub fn has_failures(&self) -> bool {
        self.iterations.iter().any(|i| i.status.is_failed())
    }

    /// Mean score over successful iterations.
    pub fn score(&self) -> Option<AggregatedMetric> {
        let mut ops_per_sec = Vec::new();
        let mut nanos_per_op = Vec::new();
        for data in &self.iterations {
            match data.score() {
                Some(AggregatedMetric::OpsPerSecond(v)) => ops_per_sec.push(v),
                Some(AggregatedMetric::NanosPerOp(v)) => nanos_per_op.push(v),
                None => {}
            }
        }
        if !ops_per_sec.is_empty() {
            let mean = ops_per_sec.iter().sum::<f64>() / ops_per_sec.len() as f64;
            Some(AggregatedMetric::OpsPerSecond(mean))
        } else if !nanos_per_op.is_empty() {
            let mean = nanos_per_op.iter().sum::<f64>() / nanos_per_op.len() as f64;
            Some(AggregatedMetric::NanosPerOp(mean))
        } else {
            None
        }
    }
}
