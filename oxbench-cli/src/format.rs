//! Human-readable result sink.

use oxbench_core::{AggregatedMetric, IterationData, OutputFormat};
use std::fmt;
use std::io::Write;

/// Render a score with its unit.
pub fn format_metric(metric: &AggregatedMetric) -> String {
    match metric {
        AggregatedMetric::OpsPerSecond(v) => format!("{v:.2} ops/s"),
        AggregatedMetric::NanosPerOp(v) => format!("{v:.2} ns/op"),
    }
}

/// Plain-text sink for terminals and logs.
pub struct HumanFormat<W: Write> {
    out: W,
    verbose: bool,
    iteration: usize,
}

impl<W: Write> HumanFormat<W> {
    /// Wrap a writer; `verbose` gates `verbose_print`.
    pub fn new(out: W, verbose: bool) -> Self {
        Self {
            out,
            verbose,
            iteration: 0,
        }
    }

    /// Reset the iteration counter, called between benchmarks.
    pub fn begin_benchmark(&mut self, id: &str) {
        self.iteration = 0;
        let _ = writeln!(self.out, "# benchmark: {id}");
    }

    /// Consume the sink, returning the writer.
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> OutputFormat for HumanFormat<W> {
    fn iteration_result(&mut self, data: &IterationData) {
        self.iteration += 1;
        let phase = if data.warmup { "warmup " } else { "" };
        let score = data
            .score()
            .map(|m| format_metric(&m))
            .unwrap_or_else(|| "n/a".to_string());
        let status = match &data.status {
            oxbench_core::IterationStatus::Ok => String::new(),
            oxbench_core::IterationStatus::Failed(reason) => format!(" FAILED: {reason}"),
        };
        let _ = writeln!(
            self.out,
            "{phase}iteration {}: {} ops in {:?}, {score}{status}",
            self.iteration,
            data.total_operations(),
            data.duration,
        );
    }

    fn exception(&mut self, err: &dyn fmt::Display) {
        let _ = writeln!(self.out, "ERROR: {err}");
    }

    fn verbose_print(&mut self, msg: &str) {
        if self.verbose {
            let _ = writeln!(self.out, "{msg}");
        }
    }
}
