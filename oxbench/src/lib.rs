#![warn(missing_docs)]
//! # OxBench
//!
//! A microbenchmark harness built around two halves:
//!
//! - **Stub generation** (`oxbench-gen`): a resolved benchmark descriptor —
//!   method identity, state-typed parameters with their scopes, and
//!   setup/teardown helpers with their levels — becomes an executor stub,
//!   either emitted as source or compiled in memory.
//! - **Execution** (`oxbench-core`): worker threads meet at reusable
//!   barriers around each measured interval, state instances are created
//!   and shared exactly per their declared scope, and every iteration is
//!   reported through a pluggable output sink with profiler hooks around
//!   the measured region.
//!
//! ## Quick start
//!
//! ```ignore
//! use oxbench::prelude::*;
//!
//! let descriptor = BenchmarkDescriptor::new("my.crate.Hashing", "digest")
//!     .declare_state("my.crate.Input", vec![HelperMethod::setup("fill", Level::Trial)])
//!     .with_param("my.crate.Input", Scope::Benchmark);
//!
//! let bindings = RuntimeBindings::new(|args, _lp| {
//!     let input: &Input = state_ref(args, 0).expect("bound");
//!     digest(input);
//!     WorkResult::one_op()
//! })
//! .state("my.crate.Input", StateBinding::new(Input::default).helper("fill", Input::fill));
//!
//! let stub = StubGenerator::new().compile(&descriptor, bindings)?;
//! oxbench::run(&[stub])?;
//! ```

// Re-export the execution engine.
pub use oxbench_core::{
    aggregate, panic_message, run_mode, AggregatedMetric, BenchmarkConfig, BenchmarkMode,
    BenchmarkTask, ConfigError, Control, Executor, ExecutorError, ExecutorKind,
    IterationCoordinator, IterationData, IterationStatus, Loop, ModeRun, OutputFormat,
    ProfilerHook, ProfilerRecord, RunnerError, StateArgs, StateInstance, StateKey, StateRegistry,
    TaskError, ThreadGroupRunner, WorkResult, WorkerContext,
};

// Re-export the generator.
pub use oxbench_gen::{
    dense_display_names, state_ref, BenchmarkDescriptor, CompiledStub, GenError, GeneratedStub,
    HelperKind, HelperMethod, Level, Padded, ParamBinding, RuntimeBindings, Scope, StateBinding,
    StateObject, StubGenerator, StubLayout, BENCHMARK_LIST,
};

// Re-export the front-end entry point.
pub use oxbench_cli::{run, run_with_cli, Cli, HarnessConfig, HumanFormat};

/// Prelude for benchmark binaries.
pub mod prelude {
    pub use crate::{
        state_ref, BenchmarkConfig, BenchmarkDescriptor, BenchmarkMode, HelperMethod, Level,
        Loop, RuntimeBindings, Scope, StateArgs, StateBinding, StubGenerator, WorkResult,
    };
}
