//! The sinks and capabilities the core writes to but does not implement:
//! result output and profiler hooks.

use crate::result::IterationData;
use std::any::Any;
use std::fmt;

/// Where the core reports results and diagnostics. Formatting is downstream.
pub trait OutputFormat {
    /// One iteration finished (warmup iterations included).
    fn iteration_result(&mut self, data: &IterationData);

    /// A diagnostic or error surfaced outside the normal result flow.
    fn exception(&mut self, err: &dyn fmt::Display);

    /// Free-form progress text, shown only in verbose settings.
    fn verbose_print(&mut self, msg: &str);
}

/// A profiler attached around the measured region.
///
/// Hook failures are never fatal: the coordinator logs them and moves on.
pub trait ProfilerHook: Send {
    /// Name used to label the attached results.
    fn name(&self) -> &str;

    /// Called before workers are released into the measured region.
    fn start_profile(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Called after all workers have left the measured region. The payload is
    /// opaque to the core and is attached to the iteration record as-is.
    fn end_profile(&mut self)
        -> Result<Box<dyn Any + Send>, Box<dyn std::error::Error + Send + Sync>>;
}

/// An opaque profiler payload attached to an iteration.
pub struct ProfilerRecord {
    /// Which profiler produced this.
    pub source: String,
    /// The payload; only the producing profiler's downstream knows its shape.
    pub value: Box<dyn Any + Send>,
}

impl fmt::Debug for ProfilerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfilerRecord")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}
