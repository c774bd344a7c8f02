//! OxBench Gen - Benchmark Stub Generation
//!
//! The build-time half of the harness. A front-end (annotation processing,
//! build script, or hand-written registration) resolves each benchmark
//! method into a [`BenchmarkDescriptor`]; this crate validates it, assigns
//! deterministic storage identifiers and padded wrapper types, and produces
//! either:
//!
//! - an emitted source stub ([`StubGenerator::generate_source`]), compiled
//!   alongside user code, or
//! - an in-memory [`CompiledStub`] ([`StubGenerator::compile`]) bound to
//!   runtime closures — same layout, same guard semantics.
//!
//! The generator also accumulates the benchmark list: every valid method,
//! ascending, one per line, written to the well-known resource path in its
//! final pass.

mod descriptor;
mod layout;
mod list;
mod source;
mod stub;

pub use descriptor::{
    BenchmarkDescriptor, HelperKind, HelperMethod, Level, ParamBinding, Scope, StateDecl,
    RESULT_TYPE,
};
pub use layout::{GenError, HelperBlock, StateObject, StubLayout};
pub use list::{dense_display_names, BENCHMARK_LIST};
pub use source::GeneratedStub;
pub use stub::{
    state_ref, BodyFn, CompiledStub, HelperFn, Padded, RuntimeBindings, StateBinding,
    StateFactory,
};

use layout::NameTables;
use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

/// Transforms benchmark descriptors into executor stubs.
///
/// One generator instance covers one generation pass: padded-type and
/// collapsed-identifier assignments are shared across every benchmark it
/// processes, and every accepted benchmark lands in the emitted list.
#[derive(Default)]
pub struct StubGenerator {
    names: NameTables,
    methods: BTreeSet<String>,
}

impl StubGenerator {
    /// A fresh generator with empty name tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit the source stub for one benchmark. On success the benchmark is
    /// recorded for the list; on error the caller reports the diagnostic and
    /// skips the benchmark.
    pub fn generate_source(
        &mut self,
        descriptor: &BenchmarkDescriptor,
    ) -> Result<GeneratedStub, GenError> {
        let layout = layout::build_layout(&mut self.names, descriptor)?;
        let generated = GeneratedStub {
            qualified_name: layout.descriptor.qualified_name(),
            stub_name: layout.stub_name.clone(),
            source: source::emit(&layout),
        };
        tracing::debug!(benchmark = %generated.qualified_name, "generated stub source");
        self.methods.insert(generated.qualified_name.clone());
        Ok(generated)
    }

    /// Compile one benchmark for in-process execution, binding the layout to
    /// runtime closures. Same validation and bookkeeping as
    /// [`Self::generate_source`].
    pub fn compile(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        bindings: RuntimeBindings,
    ) -> Result<CompiledStub, GenError> {
        let layout = layout::build_layout(&mut self.names, descriptor)?;
        let compiled = CompiledStub::build(layout, bindings)?;
        tracing::debug!(benchmark = %compiled.id(), "compiled runtime stub");
        self.methods.insert(compiled.id().to_string());
        Ok(compiled)
    }

    /// The benchmark list so far: valid methods only, ascending, one per
    /// line, trailing newline.
    pub fn benchmark_list(&self) -> String {
        list::render_list(&self.methods)
    }

    /// Final pass: write the benchmark list under `root` at
    /// [`BENCHMARK_LIST`]. Returns the written path.
    pub fn write_benchmark_list(&self, root: &Path) -> io::Result<PathBuf> {
        list::write_list(root, &self.methods)
    }

    /// Compile a batch of benchmarks. A failed benchmark is reported through
    /// the sink and skipped; the rest still compile and land in the list.
    pub fn compile_all(
        &mut self,
        benchmarks: Vec<(BenchmarkDescriptor, RuntimeBindings)>,
        sink: &mut dyn oxbench_core::OutputFormat,
    ) -> Vec<CompiledStub> {
        let mut stubs = Vec::with_capacity(benchmarks.len());
        for (descriptor, bindings) in benchmarks {
            match self.compile(&descriptor, bindings) {
                Ok(stub) => stubs.push(stub),
                Err(e) => {
                    tracing::warn!(benchmark = %descriptor.qualified_name(), error = %e, "skipping benchmark");
                    sink.exception(&e);
                }
            }
        }
        stubs
    }

    /// Accepted benchmark identities, ascending.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(String::as_str)
    }
}
