//! The resolved benchmark descriptor the generator consumes.
//!
//! Annotation processing is an external collaborator: whatever front-end
//! discovers benchmark methods hands the generator one of these records per
//! method, with helper methods already flattened across the type hierarchy.

use oxbench_core::BenchmarkMode;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Time scale at which a helper fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    /// Once per benchmark run.
    Trial,
    /// Once per iteration.
    Iteration,
    /// Once per invocation of the benchmark body.
    Invocation,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Level::Trial => "Trial",
            Level::Iteration => "Iteration",
            Level::Invocation => "Invocation",
        })
    }
}

/// Sharing discipline of a state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    /// One instance shared by every worker in the run.
    Benchmark,
    /// One instance per thread group.
    Group,
    /// One instance per worker thread.
    Thread,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scope::Benchmark => "Benchmark",
            Scope::Group => "Group",
            Scope::Thread => "Thread",
        })
    }
}

/// Whether a helper runs before or after its level's region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HelperKind {
    /// Runs before the region.
    Setup,
    /// Runs after the region.
    Teardown,
}

/// A setup or teardown method declared on a state type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperMethod {
    /// Method name on the state type.
    pub name: String,
    /// When it fires.
    pub level: Level,
    /// Which side of the region it runs on.
    pub kind: HelperKind,
}

impl HelperMethod {
    /// A setup helper.
    pub fn setup(name: &str, level: Level) -> Self {
        Self {
            name: name.to_string(),
            level,
            kind: HelperKind::Setup,
        }
    }

    /// A teardown helper.
    pub fn teardown(name: &str, level: Level) -> Self {
        Self {
            name: name.to_string(),
            level,
            kind: HelperKind::Teardown,
        }
    }
}

/// One state-typed parameter of a benchmark method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamBinding {
    /// Fully qualified state type name.
    pub state_type: String,
    /// Sharing discipline declared on the type.
    pub scope: Scope,
}

/// A state type's declaration: its flattened helper methods, in declared
/// source order (ancestors included, flattened by the front-end).
#[derive(Debug, Clone, Default)]
pub struct StateDecl {
    /// Helpers in declared order.
    pub helpers: Vec<HelperMethod>,
}

/// Required return type of a benchmark method.
pub const RESULT_TYPE: &str = "WorkResult";

/// What the generator consumes, one per annotated benchmark method.
#[derive(Debug, Clone)]
pub struct BenchmarkDescriptor {
    /// Fully qualified owning type.
    pub owner_type: String,
    /// Method name.
    pub method_name: String,
    /// Modes the benchmark declares.
    pub benchmark_types: Vec<BenchmarkMode>,
    /// State parameters in method order.
    pub parameters: Vec<ParamBinding>,
    /// Types carrying the state capability, keyed by qualified name.
    pub states: BTreeMap<String, StateDecl>,
    /// Declared return type; must be [`RESULT_TYPE`].
    pub return_type: String,
    /// Whether the trailing `Loop` parameter is present.
    pub loop_param: bool,
}

impl BenchmarkDescriptor {
    /// Start a descriptor with the default valid signature and Throughput
    /// mode.
    pub fn new(owner_type: &str, method_name: &str) -> Self {
        Self {
            owner_type: owner_type.to_string(),
            method_name: method_name.to_string(),
            benchmark_types: vec![BenchmarkMode::Throughput],
            parameters: Vec::new(),
            states: BTreeMap::new(),
            return_type: RESULT_TYPE.to_string(),
            loop_param: true,
        }
    }

    /// `<owner>.<method>`, the identity used in the benchmark list.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner_type, self.method_name)
    }

    /// Replace the declared modes.
    pub fn with_modes(mut self, modes: &[BenchmarkMode]) -> Self {
        self.benchmark_types = modes.to_vec();
        self
    }

    /// Append a state parameter.
    pub fn with_param(mut self, state_type: &str, scope: Scope) -> Self {
        self.parameters.push(ParamBinding {
            state_type: state_type.to_string(),
            scope,
        });
        self
    }

    /// Declare a state-capable type and its helpers.
    pub fn declare_state(mut self, state_type: &str, helpers: Vec<HelperMethod>) -> Self {
        self.states
            .insert(state_type.to_string(), StateDecl { helpers });
        self
    }

    /// Override the return type (used to model invalid signatures).
    pub fn with_return_type(mut self, return_type: &str) -> Self {
        self.return_type = return_type.to_string();
        self
    }

    /// Override the `Loop` parameter presence (used to model invalid
    /// signatures).
    pub fn with_loop_param(mut self, present: bool) -> Self {
        self.loop_param = present;
        self
    }
}
