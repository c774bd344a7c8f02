//! Runtime-compiled stubs.
//!
//! The in-memory counterpart of the emitted source: the same layout, guard
//! discipline, and helper ordering, bound to user-supplied factories and
//! closures and executed through `oxbench-core`.

use crate::descriptor::{HelperKind, HelperMethod, Level, Scope};
use crate::layout::{GenError, StateObject, StubLayout};
use fxhash::FxHashSet;
use oxbench_core::{
    panic_message, run_mode, BenchmarkConfig, BenchmarkMode, BenchmarkTask, Loop, ModeRun,
    OutputFormat, ProfilerHook, RunnerError, StateArgs, StateInstance, StateKey, StateRegistry,
    TaskError, WorkResult, WorkerContext,
};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 128-byte aligned wrapper around a state instance.
///
/// The runtime analog of the emitted `padded_*` types: two adjacent
/// instances never share a cache line.
#[repr(align(128))]
pub struct Padded<T>(pub T);

/// Constructs one state instance.
pub type StateFactory = Box<dyn Fn() -> Box<dyn Any + Send + Sync> + Send + Sync>;

/// Invokes one helper method against a type-erased instance.
pub type HelperFn =
    Box<dyn Fn(&(dyn Any + Send + Sync)) -> Result<(), String> + Send + Sync>;

/// Invokes the benchmark body with its bound states, in method parameter
/// order.
pub type BodyFn = Box<dyn Fn(&StateArgs, &mut Loop) -> WorkResult + Send + Sync>;

/// Runtime implementation of one state type: its constructor and helpers.
pub struct StateBinding {
    factory: StateFactory,
    helpers: BTreeMap<String, HelperFn>,
}

impl StateBinding {
    /// Bind a state type to its constructor. The instance is wrapped in
    /// [`Padded`] before publication.
    pub fn new<T: Send + Sync + 'static>(
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            factory: Box::new(move || {
                let padded: Box<dyn Any + Send + Sync> = Box::new(Padded(factory()));
                padded
            }),
            helpers: BTreeMap::new(),
        }
    }

    /// Attach a helper method implementation.
    pub fn helper<T: Send + Sync + 'static>(
        mut self,
        name: &str,
        f: impl Fn(&T) + Send + Sync + 'static,
    ) -> Self {
        self.helpers.insert(
            name.to_string(),
            Box::new(move |instance| match instance.downcast_ref::<Padded<T>>() {
                Some(padded) => {
                    f(&padded.0);
                    Ok(())
                }
                None => Err("state instance has unexpected type".to_string()),
            }),
        );
        self
    }
}

/// Everything the runtime needs to execute one benchmark: a body plus a
/// binding per state type the descriptor references.
pub struct RuntimeBindings {
    states: BTreeMap<String, StateBinding>,
    body: BodyFn,
}

impl RuntimeBindings {
    /// Bind the benchmark body. States arrive in method parameter order;
    /// use [`state_ref`] to recover concrete types.
    pub fn new(body: impl Fn(&StateArgs, &mut Loop) -> WorkResult + Send + Sync + 'static) -> Self {
        Self {
            states: BTreeMap::new(),
            body: Box::new(body),
        }
    }

    /// Attach a state binding.
    pub fn state(mut self, type_name: &str, binding: StateBinding) -> Self {
        self.states.insert(type_name.to_string(), binding);
        self
    }
}

/// Recover a concrete state reference from bound arguments.
pub fn state_ref<T: 'static>(args: &StateArgs, index: usize) -> Option<&T> {
    args.get::<Padded<T>>(index).map(|padded| &padded.0)
}

pub(crate) struct StubInner {
    pub(crate) layout: StubLayout,
    bindings: RuntimeBindings,
    qualified: String,
}

impl StubInner {
    fn binding(&self, type_name: &str) -> Result<&StateBinding, TaskError> {
        self.bindings
            .states
            .get(type_name)
            .ok_or_else(|| TaskError::Init {
                state: type_name.to_string(),
                reason: "no runtime binding".to_string(),
            })
    }

    /// Invoke one helper, folding panics and type mismatches into the
    /// phase-appropriate error.
    fn call_helper(
        &self,
        state: &StateObject,
        instance: &StateInstance,
        helper: &HelperMethod,
    ) -> Result<(), TaskError> {
        let qualified = format!("{}::{}", state.type_name, helper.name);
        let wrap = |reason: String| match helper.kind {
            HelperKind::Setup => TaskError::Setup {
                helper: qualified.clone(),
                reason,
            },
            HelperKind::Teardown => TaskError::Teardown {
                helper: qualified.clone(),
                reason,
            },
        };
        let binding = self.binding(&state.type_name)?;
        let func = binding
            .helpers
            .get(&helper.name)
            .ok_or_else(|| wrap("no runtime implementation".to_string()))?;
        match catch_unwind(AssertUnwindSafe(|| func(instance.as_ref()))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(wrap(reason)),
            Err(payload) => Err(wrap(panic_message(payload))),
        }
    }
}

/// Per-trial executable view of a stub: the shared layout and bindings plus
/// this trial's `_inited` guard flags.
struct TrialTask {
    stub: Arc<StubInner>,
    benchmark_inited: Mutex<FxHashSet<(usize, Level)>>,
    group_inited: Mutex<FxHashSet<(usize, usize, Level)>>,
    thread_inited: Mutex<FxHashSet<(usize, usize, Level)>>,
}

impl TrialTask {
    fn new(stub: Arc<StubInner>) -> Self {
        Self {
            stub,
            benchmark_inited: Mutex::new(FxHashSet::default()),
            group_inited: Mutex::new(FxHashSet::default()),
            thread_inited: Mutex::new(FxHashSet::default()),
        }
    }

    /// Double-checked slot initialization: construct, run Trial-level setup
    /// helpers, flag, and publish — all under the slot's lock.
    fn try_init(&self, ctx: &WorkerContext<'_>, index: usize) -> Result<StateInstance, TaskError> {
        let state = &self.stub.layout.states[index];
        let key = match state.scope {
            Scope::Benchmark => StateKey::Benchmark {
                field: &state.field_id,
            },
            Scope::Group => StateKey::Group {
                field: &state.field_id,
                group: ctx.group,
            },
            Scope::Thread => StateKey::Thread {
                field: &state.field_id,
                worker: ctx.worker,
            },
        };
        ctx.registry.get_or_init(key, || {
            let binding = self.stub.binding(&state.type_name)?;
            let constructed = catch_unwind(AssertUnwindSafe(|| (binding.factory)()))
                .map_err(|payload| TaskError::Init {
                    state: state.type_name.clone(),
                    reason: panic_message(payload),
                })?;
            let instance: StateInstance = Arc::from(constructed);
            for i in state.helpers_at(Level::Trial, HelperKind::Setup) {
                self.stub
                    .call_helper(state, &instance, &state.helpers[i])
                    .map_err(|e| TaskError::Init {
                        state: state.type_name.clone(),
                        reason: e.to_string(),
                    })?;
            }
            match state.scope {
                Scope::Benchmark => {
                    lock(&self.benchmark_inited).insert((index, Level::Trial));
                }
                Scope::Group => {
                    lock(&self.group_inited).insert((index, ctx.group, Level::Trial));
                }
                Scope::Thread => {
                    lock(&self.thread_inited).insert((index, ctx.worker, Level::Trial));
                }
            }
            Ok(instance)
        })
    }

    fn bind_all(&self, ctx: &WorkerContext<'_>) -> Result<Vec<StateInstance>, TaskError> {
        (0..self.stub.layout.states.len())
            .map(|index| self.try_init(ctx, index))
            .collect()
    }

    /// Run the guarded helper blocks for one `(level, kind)` in emission
    /// order. Guard discipline matches the emitted source: setup flags flip
    /// only once every helper at the level has succeeded, so a failed setup
    /// is retried on the next cycle; teardown observes the flag and clears
    /// it before running, so exactly one thread executes it.
    fn run_blocks(
        &self,
        ctx: &WorkerContext<'_>,
        args: &StateArgs,
        level: Level,
        kind: HelperKind,
    ) -> Result<(), TaskError> {
        for block in self.stub.layout.helper_blocks(level, kind) {
            let state = &self.stub.layout.states[block.state];
            let instance = match args.instance(block.state) {
                Some(instance) => instance,
                None => continue,
            };
            match block.scope {
                Scope::Thread => {
                    for &i in &block.helpers {
                        self.stub.call_helper(state, instance, &state.helpers[i])?;
                    }
                }
                Scope::Benchmark => {
                    let mut flags = lock(&self.benchmark_inited);
                    let key = (block.state, level);
                    match kind {
                        HelperKind::Setup => {
                            if !flags.contains(&key) {
                                for &i in &block.helpers {
                                    self.stub.call_helper(state, instance, &state.helpers[i])?;
                                }
                                flags.insert(key);
                            }
                        }
                        HelperKind::Teardown => {
                            if flags.remove(&key) {
                                for &i in &block.helpers {
                                    self.stub.call_helper(state, instance, &state.helpers[i])?;
                                }
                            }
                        }
                    }
                }
                Scope::Group => {
                    let mut flags = lock(&self.group_inited);
                    let key = (block.state, ctx.group, level);
                    match kind {
                        HelperKind::Setup => {
                            if !flags.contains(&key) {
                                for &i in &block.helpers {
                                    self.stub.call_helper(state, instance, &state.helpers[i])?;
                                }
                                flags.insert(key);
                            }
                        }
                        HelperKind::Teardown => {
                            if flags.remove(&key) {
                                for &i in &block.helpers {
                                    self.stub.call_helper(state, instance, &state.helpers[i])?;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl BenchmarkTask for TrialTask {
    fn setup_iteration(&self, ctx: &WorkerContext<'_>) -> Result<StateArgs, TaskError> {
        let instances = self.bind_all(ctx)?;
        let args = StateArgs::new(instances);
        self.run_blocks(ctx, &args, Level::Iteration, HelperKind::Setup)?;
        Ok(args)
    }

    fn setup_invocation(
        &self,
        ctx: &WorkerContext<'_>,
        args: &StateArgs,
    ) -> Result<(), TaskError> {
        self.run_blocks(ctx, args, Level::Invocation, HelperKind::Setup)
    }

    fn invoke(&self, args: &StateArgs, lp: &mut Loop) -> Result<WorkResult, TaskError> {
        let mut ordered = Vec::with_capacity(self.stub.layout.params.len());
        for &index in &self.stub.layout.params {
            match args.instance(index) {
                Some(instance) => ordered.push(instance.clone()),
                None => {
                    return Err(TaskError::Body {
                        reason: "state binding missing at invocation".to_string(),
                    })
                }
            }
        }
        let body_args = StateArgs::new(ordered);
        match catch_unwind(AssertUnwindSafe(|| (self.stub.bindings.body)(&body_args, lp))) {
            Ok(result) => Ok(result),
            Err(payload) => Err(TaskError::Body {
                reason: panic_message(payload),
            }),
        }
    }

    fn teardown_invocation(
        &self,
        ctx: &WorkerContext<'_>,
        args: &StateArgs,
    ) -> Result<(), TaskError> {
        self.run_blocks(ctx, args, Level::Invocation, HelperKind::Teardown)
    }

    fn teardown_iteration(
        &self,
        ctx: &WorkerContext<'_>,
        args: &StateArgs,
    ) -> Result<(), TaskError> {
        self.run_blocks(ctx, args, Level::Iteration, HelperKind::Teardown)
    }

    /// Trial teardown over every live instance, reverse scope order, each
    /// guarded by the trial flag its `try_init` set.
    fn teardown_trial(&self, registry: &StateRegistry) -> Result<(), TaskError> {
        for block in self.stub.layout.helper_blocks(Level::Trial, HelperKind::Teardown) {
            let state = &self.stub.layout.states[block.state];
            match block.scope {
                Scope::Group => {
                    for (group, instance) in registry.group_instances(&state.field_id) {
                        if lock(&self.group_inited).remove(&(block.state, group, Level::Trial)) {
                            for &i in &block.helpers {
                                self.stub.call_helper(state, &instance, &state.helpers[i])?;
                            }
                        }
                    }
                }
                Scope::Benchmark => {
                    if let Some(instance) = registry.benchmark_instance(&state.field_id) {
                        if lock(&self.benchmark_inited).remove(&(block.state, Level::Trial)) {
                            for &i in &block.helpers {
                                self.stub.call_helper(state, &instance, &state.helpers[i])?;
                            }
                        }
                    }
                }
                Scope::Thread => {
                    for (worker, instance) in registry.thread_instances(&state.field_id) {
                        if lock(&self.thread_inited).remove(&(block.state, worker, Level::Trial)) {
                            for &i in &block.helpers {
                                self.stub.call_helper(state, &instance, &state.helpers[i])?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// A loaded, runnable benchmark: descriptor semantics bound to runtime
/// closures.
pub struct CompiledStub {
    inner: Arc<StubInner>,
}

impl std::fmt::Debug for CompiledStub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledStub").finish_non_exhaustive()
    }
}

impl CompiledStub {
    pub(crate) fn build(layout: StubLayout, bindings: RuntimeBindings) -> Result<Self, GenError> {
        for state in &layout.states {
            let binding =
                bindings
                    .states
                    .get(&state.type_name)
                    .ok_or_else(|| GenError::MissingBinding {
                        state_type: state.type_name.clone(),
                    })?;
            for helper in &state.helpers {
                if !binding.helpers.contains_key(&helper.name) {
                    return Err(GenError::MissingHelper {
                        state_type: state.type_name.clone(),
                        helper: helper.name.clone(),
                    });
                }
            }
        }
        let qualified = layout.descriptor.qualified_name();
        Ok(Self {
            inner: Arc::new(StubInner {
                layout,
                bindings,
                qualified,
            }),
        })
    }

    /// `<owner>.<method>`, the identity used in the benchmark list.
    pub fn id(&self) -> &str {
        &self.inner.qualified
    }

    /// Modes the benchmark declares.
    pub fn modes(&self) -> &[BenchmarkMode] {
        &self.inner.layout.descriptor.benchmark_types
    }

    /// Run this benchmark once per resolved mode, each with a fresh state
    /// registry and pool.
    pub fn run(
        &self,
        config: &BenchmarkConfig,
        sink: &mut dyn OutputFormat,
        profilers: &mut [Box<dyn ProfilerHook>],
    ) -> Result<Vec<ModeRun>, RunnerError> {
        let modes = config.resolve_modes(self.modes());
        let mut runs = Vec::with_capacity(modes.len());
        for mode in modes {
            let task = Arc::new(TrialTask::new(Arc::clone(&self.inner)));
            let label = format!(
                "{}-{}",
                self.inner.layout.descriptor.method_name,
                mode.label()
            );
            runs.push(run_mode(task, mode, config, &label, sink, profilers)?);
        }
        Ok(runs)
    }
}
