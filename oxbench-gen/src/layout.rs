//! Generator-internal state handles and the per-benchmark stub layout.
//!
//! Everything here iterates in a stable total order: state objects sort by
//! their storage-slot identifier, and synthetic name suffixes are assigned by
//! monotonic counters threaded through that sorted walk. For a fixed
//! descriptor the layout, and everything derived from it, is identical
//! across runs.

use crate::descriptor::{BenchmarkDescriptor, HelperKind, HelperMethod, Level, Scope, RESULT_TYPE};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Why a benchmark was rejected by the generator.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GenError {
    /// A method parameter's type does not carry the state capability.
    #[error("`{method}`: parameter type `{state_type}` does not carry the state capability")]
    NotAState {
        /// The offending benchmark.
        method: String,
        /// The offending parameter type.
        state_type: String,
    },

    /// Wrong return type or missing `Loop` parameter.
    #[error("`{method}`: benchmark methods must return `WorkResult` and take a single `Loop` parameter")]
    BadSignature {
        /// The offending benchmark.
        method: String,
    },

    /// The same shared-scope state type was bound twice.
    #[error("`{method}`: duplicate {scope}-scoped parameter of type `{state_type}`")]
    DuplicateState {
        /// The offending benchmark.
        method: String,
        /// The duplicated scope.
        scope: Scope,
        /// The duplicated type.
        state_type: String,
    },

    /// Runtime compilation was missing a factory for a state type.
    #[error("no runtime binding supplied for state type `{state_type}`")]
    MissingBinding {
        /// The unbound type.
        state_type: String,
    },

    /// Runtime compilation was missing a helper implementation.
    #[error("no runtime implementation for helper `{state_type}::{helper}`")]
    MissingHelper {
        /// The declaring type.
        state_type: String,
        /// The missing helper method.
        helper: String,
    },
}

/// A state object bound into one stub: the original type, its padded
/// wrapper, and the identifiers the generator assigned for its storage slot
/// and per-worker local.
#[derive(Debug, Clone)]
pub struct StateObject {
    /// Fully qualified original type.
    pub type_name: String,
    /// Generator-assigned padded wrapper type (`padded_0`, `padded_1`, ...).
    pub padded_type: String,
    /// Sharing discipline.
    pub scope: Scope,
    /// Storage slot identifier (`f_...`), the sort key for emitted code.
    pub field_id: String,
    /// Per-worker binding identifier (`l_...`).
    pub local_id: String,
    /// Helpers in declared order.
    pub helpers: Vec<HelperMethod>,
}

impl StateObject {
    /// Helper indices at `(level, kind)`, in declared order.
    pub fn helpers_at(&self, level: Level, kind: HelperKind) -> Vec<usize> {
        self.helpers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.level == level && h.kind == kind)
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether any helper fires at `level`, either kind.
    pub fn has_helpers_at(&self, level: Level) -> bool {
        self.helpers.iter().any(|h| h.level == level)
    }
}

// Identity and ordering follow the storage-slot identifier so that emitted
// code walks state objects deterministically.
impl PartialEq for StateObject {
    fn eq(&self, other: &Self) -> bool {
        self.field_id == other.field_id
    }
}

impl Eq for StateObject {}

impl PartialOrd for StateObject {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StateObject {
    fn cmp(&self, other: &Self) -> Ordering {
        self.field_id.cmp(&other.field_id)
    }
}

/// One guarded run of helpers for one state object at one level.
#[derive(Debug)]
pub struct HelperBlock {
    /// Index into [`StubLayout::states`].
    pub state: usize,
    /// The owning state's scope, deciding the guard shape.
    pub scope: Scope,
    /// Indices into the state's `helpers`, declared order, already filtered
    /// to the block's level and kind. May be empty: a state with helpers at
    /// this level on the other side still gets its guard flipped.
    pub helpers: Vec<usize>,
}

/// The validated, ordered shape of one benchmark's stub.
#[derive(Debug, Clone)]
pub struct StubLayout {
    /// The descriptor this was built from.
    pub descriptor: BenchmarkDescriptor,
    /// State objects sorted by `field_id`.
    pub states: Vec<StateObject>,
    /// Method parameter position to index into `states`.
    pub params: Vec<usize>,
    /// Type name of the emitted stub.
    pub stub_name: String,
}

impl StubLayout {
    /// Helper blocks for `(level, kind)` in emission order.
    ///
    /// Setup walks Thread-scoped states first, then Benchmark, then Group;
    /// teardown walks the reverse. Within one scope, states come in
    /// `field_id` order; within one state, helpers in declared order. A state
    /// participates if it has any helper at the level, so paired guard flags
    /// flip symmetrically even when one side declares no helpers.
    pub fn helper_blocks(&self, level: Level, kind: HelperKind) -> Vec<HelperBlock> {
        let scope_order: [Scope; 3] = match kind {
            HelperKind::Setup => [Scope::Thread, Scope::Benchmark, Scope::Group],
            HelperKind::Teardown => [Scope::Group, Scope::Benchmark, Scope::Thread],
        };
        let mut blocks = Vec::new();
        for scope in scope_order {
            for (index, state) in self.states.iter().enumerate() {
                if state.scope != scope || !state.has_helpers_at(level) {
                    continue;
                }
                blocks.push(HelperBlock {
                    state: index,
                    scope,
                    helpers: state.helpers_at(level, kind),
                });
            }
        }
        blocks
    }

    /// State indices with the given scope, in `field_id` order.
    pub fn states_with_scope(&self, scope: Scope) -> Vec<usize> {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| s.scope == scope)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Synthetic-name assignment shared across every benchmark one generator
/// processes: identical original types share one padded type, and collapsed
/// identifiers stay stable in first-encounter order.
#[derive(Debug, Default)]
pub(crate) struct NameTables {
    collapsed: BTreeMap<String, String>,
    collapsed_index: usize,
    padded: BTreeMap<String, String>,
    padded_index: usize,
}

impl NameTables {
    /// Collapse a qualified type name to a short identifier stem, e.g.
    /// `com.example.SumState` -> `sumstate0_`.
    pub(crate) fn collapse(&mut self, type_name: &str) -> String {
        if let Some(existing) = self.collapsed.get(type_name) {
            return existing.clone();
        }
        let last = type_name
            .rsplit(['.', ':'])
            .next()
            .unwrap_or(type_name)
            .to_lowercase();
        let collapsed = format!("{last}{}_", self.collapsed_index);
        self.collapsed_index += 1;
        self.collapsed
            .insert(type_name.to_string(), collapsed.clone());
        collapsed
    }

    /// The padded wrapper type for an original type, assigned on first
    /// encounter.
    pub(crate) fn padded(&mut self, type_name: &str) -> String {
        if let Some(existing) = self.padded.get(type_name) {
            return existing.clone();
        }
        let padded = format!("padded_{}", self.padded_index);
        self.padded_index += 1;
        self.padded.insert(type_name.to_string(), padded.clone());
        padded
    }
}

/// Validate a descriptor and assign identifiers, producing the stub layout.
pub(crate) fn build_layout(
    names: &mut NameTables,
    descriptor: &BenchmarkDescriptor,
) -> Result<StubLayout, GenError> {
    let method = descriptor.qualified_name();

    if descriptor.return_type != RESULT_TYPE || !descriptor.loop_param {
        return Err(GenError::BadSignature { method });
    }

    let mut shared_seen: BTreeSet<(String, Scope)> = BTreeSet::new();
    let mut local_index: BTreeMap<String, usize> = BTreeMap::new();
    let mut states: Vec<StateObject> = Vec::new();
    let mut param_fields: Vec<String> = Vec::new();

    for param in &descriptor.parameters {
        let decl = descriptor.states.get(&param.state_type).ok_or_else(|| {
            GenError::NotAState {
                method: method.clone(),
                state_type: param.state_type.clone(),
            }
        })?;

        let index = match param.scope {
            Scope::Benchmark | Scope::Group => {
                if !shared_seen.insert((param.state_type.clone(), param.scope)) {
                    return Err(GenError::DuplicateState {
                        method: method.clone(),
                        scope: param.scope,
                        state_type: param.state_type.clone(),
                    });
                }
                0
            }
            Scope::Thread => {
                let slot = local_index.entry(param.state_type.clone()).or_insert(0);
                let index = *slot;
                *slot += 1;
                index
            }
        };

        let collapsed = names.collapse(&param.state_type);
        let field_id = format!("f_{collapsed}{index}");
        if states.iter().any(|s| s.field_id == field_id) {
            return Err(GenError::DuplicateState {
                method: method.clone(),
                scope: param.scope,
                state_type: param.state_type.clone(),
            });
        }
        param_fields.push(field_id.clone());
        states.push(StateObject {
            type_name: param.state_type.clone(),
            padded_type: names.padded(&param.state_type),
            scope: param.scope,
            local_id: format!("l_{collapsed}{index}"),
            field_id,
            helpers: decl.helpers.clone(),
        });
    }

    states.sort();

    let params = param_fields
        .iter()
        .map(|field| {
            states
                .iter()
                .position(|s| &s.field_id == field)
                .unwrap_or_default()
        })
        .collect();

    let stub_name = format!(
        "{}_{}_stub",
        descriptor.owner_type.replace(['.', ':'], "_"),
        descriptor.method_name
    );

    Ok(StubLayout {
        descriptor: descriptor.clone(),
        states,
        params,
        stub_name,
    })
}
