//! Source rendition of a stub.
//!
//! Renders a [`StubLayout`] to Rust source meant to be compiled alongside
//! user code. The walk order is fixed by the layout, so output is
//! byte-identical across runs for a fixed descriptor.

use crate::descriptor::{HelperKind, Level, Scope};
use crate::layout::StubLayout;

/// One emitted stub: the benchmark identity plus its source text.
#[derive(Debug, Clone)]
pub struct GeneratedStub {
    /// `<owner>.<method>`.
    pub qualified_name: String,
    /// Emitted stub type name.
    pub stub_name: String,
    /// The stub source.
    pub source: String,
}

const LEVELS: [Level; 3] = [Level::Trial, Level::Iteration, Level::Invocation];

/// Turn a dotted type name into a Rust path.
fn rust_path(type_name: &str) -> String {
    type_name.replace('.', "::")
}

pub(crate) fn emit(layout: &StubLayout) -> String {
    let mut out = String::new();
    emit_header(layout, &mut out);
    emit_statics(layout, &mut out);
    emit_struct(layout, &mut out);
    emit_impl(layout, &mut out);
    emit_state_overrides(layout, &mut out);
    out
}

fn line(out: &mut String, text: &str) {
    out.push_str(text);
    out.push('\n');
}

fn emit_header(layout: &StubLayout, out: &mut String) {
    line(
        out,
        &format!(
            "// Generated by oxbench-gen for {}. Do not edit.",
            layout.descriptor.qualified_name()
        ),
    );
    line(
        out,
        "#![allow(non_camel_case_types, non_snake_case, non_upper_case_globals, dead_code)]",
    );
    line(out, "");
    line(out, "use std::collections::HashMap;");
    line(
        out,
        "use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};",
    );
    line(out, "use std::time::Instant;");
    line(out, "");
    line(out, "use oxbench_core::{Loop, WorkResult};");
    line(out, "");
    line(out, "fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {");
    line(
        out,
        "    mutex.lock().unwrap_or_else(PoisonError::into_inner)",
    );
    line(out, "}");
    line(out, "");
}

fn emit_statics(layout: &StubLayout, out: &mut String) {
    for &index in &layout.states_with_scope(Scope::Benchmark) {
        let state = &layout.states[index];
        line(
            out,
            &format!(
                "static {}: OnceLock<Arc<{}>> = OnceLock::new();",
                state.field_id, state.padded_type
            ),
        );
        for level in LEVELS {
            line(
                out,
                &format!(
                    "static {}_{level}_inited: Mutex<bool> = Mutex::new(false);",
                    state.field_id
                ),
            );
        }
        line(out, "");
    }

    let group_states = layout.states_with_scope(Scope::Group);
    for &index in &group_states {
        let state = &layout.states[index];
        line(
            out,
            &format!(
                "static {}_map: OnceLock<Mutex<HashMap<usize, Arc<{}>>>> = OnceLock::new();",
                state.field_id, state.padded_type
            ),
        );
    }
    if !group_states.is_empty() {
        line(out, "");
        for level in LEVELS {
            line(
                out,
                &format!(
                    "static group_{level}_inited: OnceLock<Mutex<HashMap<(&'static str, usize), bool>>> = OnceLock::new();"
                ),
            );
        }
        line(out, "");
    }
}

fn emit_struct(layout: &StubLayout, out: &mut String) {
    let thread_states = layout.states_with_scope(Scope::Thread);
    if thread_states.is_empty() {
        line(out, &format!("pub struct {};", layout.stub_name));
        line(out, "");
        return;
    }
    line(out, &format!("pub struct {} {{", layout.stub_name));
    for &index in &thread_states {
        let state = &layout.states[index];
        line(
            out,
            &format!("    {}: Option<Arc<{}>>,", state.field_id, state.padded_type),
        );
        for level in LEVELS {
            line(
                out,
                &format!("    {}_{level}_inited: bool,", state.field_id),
            );
        }
    }
    line(out, "}");
    line(out, "");
}

fn emit_impl(layout: &StubLayout, out: &mut String) {
    line(out, &format!("impl {} {{", layout.stub_name));
    emit_constructor(layout, out);
    emit_state_initializers(layout, out);
    emit_run_fn(layout, out);
    emit_trial_teardown_fn(layout, out);
    line(out, "}");
    line(out, "");
}

fn emit_constructor(layout: &StubLayout, out: &mut String) {
    let thread_states = layout.states_with_scope(Scope::Thread);
    line(out, "    pub fn new() -> Self {");
    if thread_states.is_empty() {
        line(out, "        Self");
    } else {
        line(out, "        Self {");
        for &index in &thread_states {
            let state = &layout.states[index];
            line(out, &format!("            {}: None,", state.field_id));
            for level in LEVELS {
                line(
                    out,
                    &format!("            {}_{level}_inited: false,", state.field_id),
                );
            }
        }
        line(out, "        }");
    }
    line(out, "    }");
    line(out, "");
}

/// The `try_init_*` double-checked initializers, one per slot, Trial-level
/// setup helpers inlined before publication.
fn emit_state_initializers(layout: &StubLayout, out: &mut String) {
    for state in &layout.states {
        let trial_setups: Vec<&str> = state
            .helpers_at(Level::Trial, HelperKind::Setup)
            .into_iter()
            .map(|i| state.helpers[i].name.as_str())
            .collect();
        match state.scope {
            Scope::Benchmark => {
                line(
                    out,
                    &format!(
                        "    fn try_init_{f}(&self, candidate: {p}) -> Arc<{p}> {{",
                        f = state.field_id,
                        p = state.padded_type
                    ),
                );
                line(out, &format!("        {}.get_or_init(|| {{", state.field_id));
                line(out, "            let val = Arc::new(candidate);");
                for name in &trial_setups {
                    line(out, &format!("            val.0.{name}();"));
                }
                line(
                    out,
                    &format!(
                        "            *guard(&{}_Trial_inited) = true;",
                        state.field_id
                    ),
                );
                line(out, "            val");
                line(out, "        }).clone()");
                line(out, "    }");
            }
            Scope::Group => {
                line(
                    out,
                    &format!(
                        "    fn try_init_{f}(&self, group_id: usize, candidate: {p}) -> Arc<{p}> {{",
                        f = state.field_id,
                        p = state.padded_type
                    ),
                );
                line(
                    out,
                    &format!(
                        "        let mut map = guard({}_map.get_or_init(|| Mutex::new(HashMap::new())));",
                        state.field_id
                    ),
                );
                line(out, "        if !map.contains_key(&group_id) {");
                line(out, "            let val = Arc::new(candidate);");
                for name in &trial_setups {
                    line(out, &format!("            val.0.{name}();"));
                }
                line(out, "            map.insert(group_id, val);");
                line(
                    out,
                    "            guard(group_Trial_inited.get_or_init(|| Mutex::new(HashMap::new())))",
                );
                line(
                    out,
                    &format!(
                        "                .insert((\"{}\", group_id), true);",
                        state.field_id
                    ),
                );
                line(out, "        }");
                line(
                    out,
                    "        map.get(&group_id).expect(\"published above\").clone()",
                );
                line(out, "    }");
            }
            Scope::Thread => {
                line(
                    out,
                    &format!(
                        "    fn try_init_{f}(&mut self, candidate: {p}) -> Arc<{p}> {{",
                        f = state.field_id,
                        p = state.padded_type
                    ),
                );
                line(out, &format!("        if self.{}.is_none() {{", state.field_id));
                line(out, "            let val = Arc::new(candidate);");
                for name in &trial_setups {
                    line(out, &format!("            val.0.{name}();"));
                }
                line(out, &format!("            self.{} = Some(val);", state.field_id));
                line(
                    out,
                    &format!("            self.{}_Trial_inited = true;", state.field_id),
                );
                line(out, "        }");
                line(
                    out,
                    &format!(
                        "        self.{}.as_ref().expect(\"published above\").clone()",
                        state.field_id
                    ),
                );
                line(out, "    }");
            }
        }
        line(out, "");
    }
}

/// Local bindings pulled through `try_init_*`, in slot order.
fn emit_state_getters(layout: &StubLayout, out: &mut String) {
    for state in &layout.states {
        match state.scope {
            Scope::Group => line(
                out,
                &format!(
                    "        let {l} = self.try_init_{f}(group_id, {p}(Default::default()));",
                    l = state.local_id,
                    f = state.field_id,
                    p = state.padded_type
                ),
            ),
            Scope::Benchmark | Scope::Thread => line(
                out,
                &format!(
                    "        let {l} = self.try_init_{f}({p}(Default::default()));",
                    l = state.local_id,
                    f = state.field_id,
                    p = state.padded_type
                ),
            ),
        }
    }
}

fn emit_run_fn(layout: &StubLayout, out: &mut String) {
    line(
        out,
        &format!(
            "    pub fn run_{}(&mut self, group_id: usize, lp: &mut Loop) -> WorkResult {{",
            layout.descriptor.method_name
        ),
    );
    emit_state_getters(layout, out);
    line(out, "");
    emit_helper_blocks(layout, Level::Trial, HelperKind::Setup, "        ", out);
    emit_helper_blocks(layout, Level::Iteration, HelperKind::Setup, "        ", out);
    line(out, "        let started = Instant::now();");
    line(out, "        let mut operations = 0u64;");
    line(out, "        while !lp.control().stop_measurement() {");
    emit_helper_blocks(layout, Level::Invocation, HelperKind::Setup, "            ", out);
    let args: Vec<String> = layout
        .params
        .iter()
        .map(|&i| format!("&{}.0", layout.states[i].local_id))
        .chain(std::iter::once("lp".to_string()))
        .collect();
    line(
        out,
        &format!(
            "            let result = {}::{}({});",
            rust_path(&layout.descriptor.owner_type),
            layout.descriptor.method_name,
            args.join(", ")
        ),
    );
    emit_helper_blocks(layout, Level::Invocation, HelperKind::Teardown, "            ", out);
    line(out, "            operations += result.operations;");
    line(out, "        }");
    emit_helper_blocks(layout, Level::Iteration, HelperKind::Teardown, "        ", out);
    line(out, "        WorkResult::new(operations, started.elapsed())");
    line(out, "    }");
    line(out, "");
}

fn emit_trial_teardown_fn(layout: &StubLayout, out: &mut String) {
    line(
        out,
        "    pub fn trial_teardown(&mut self, group_id: usize) {",
    );
    emit_state_getters(layout, out);
    line(out, "");
    emit_helper_blocks(layout, Level::Trial, HelperKind::Teardown, "        ", out);
    line(out, "    }");
}

/// One `(level, kind)` run of guarded helper blocks, in emission order.
fn emit_helper_blocks(
    layout: &StubLayout,
    level: Level,
    kind: HelperKind,
    indent: &str,
    out: &mut String,
) {
    for block in layout.helper_blocks(level, kind) {
        let state = &layout.states[block.state];
        let calls: Vec<String> = block
            .helpers
            .iter()
            .map(|&i| format!("{}.0.{}();", state.local_id, state.helpers[i].name))
            .collect();
        match block.scope {
            Scope::Thread => {
                for call in &calls {
                    line(out, &format!("{indent}{call}"));
                }
            }
            Scope::Benchmark => {
                line(out, &format!("{indent}{{"));
                line(
                    out,
                    &format!(
                        "{indent}    let mut inited = guard(&{}_{level}_inited);",
                        state.field_id
                    ),
                );
                match kind {
                    HelperKind::Setup => {
                        // Flag flips only after every setup at this level
                        // succeeded; a mid-setup failure is retried on the
                        // next cycle instead of latching the guard.
                        line(out, &format!("{indent}    if !*inited {{"));
                        for call in &calls {
                            line(out, &format!("{indent}        {call}"));
                        }
                        line(out, &format!("{indent}        *inited = true;"));
                    }
                    HelperKind::Teardown => {
                        line(out, &format!("{indent}    if *inited {{"));
                        line(out, &format!("{indent}        *inited = false;"));
                        for call in &calls {
                            line(out, &format!("{indent}        {call}"));
                        }
                    }
                }
                line(out, &format!("{indent}    }}"));
                line(out, &format!("{indent}}}"));
            }
            Scope::Group => {
                line(out, &format!("{indent}{{"));
                line(
                    out,
                    &format!(
                        "{indent}    let mut inited = guard(group_{level}_inited.get_or_init(|| Mutex::new(HashMap::new())));",
                    ),
                );
                let key = format!("(\"{}\", group_id)", state.field_id);
                match kind {
                    HelperKind::Setup => {
                        // Flag flips only after every setup at this level
                        // succeeded; a mid-setup failure leaves teardown off.
                        line(
                            out,
                            &format!(
                                "{indent}    if !inited.get(&{key}).copied().unwrap_or(false) {{"
                            ),
                        );
                        for call in &calls {
                            line(out, &format!("{indent}        {call}"));
                        }
                        line(out, &format!("{indent}        inited.insert({key}, true);"));
                    }
                    HelperKind::Teardown => {
                        line(
                            out,
                            &format!(
                                "{indent}    if inited.get(&{key}).copied().unwrap_or(false) {{"
                            ),
                        );
                        line(out, &format!("{indent}        inited.insert({key}, false);"));
                        for call in &calls {
                            line(out, &format!("{indent}        {call}"));
                        }
                    }
                }
                line(out, &format!("{indent}    }}"));
                line(out, &format!("{indent}}}"));
            }
        }
    }
}

/// Padded wrapper types, one per distinct original type in this stub.
fn emit_state_overrides(layout: &StubLayout, out: &mut String) {
    let mut visited = std::collections::BTreeSet::new();
    for state in &layout.states {
        if !visited.insert(state.padded_type.clone()) {
            continue;
        }
        line(
            out,
            "/// Padding wrapper; two adjacent state instances never share a cache line.",
        );
        line(out, "#[repr(align(128))]");
        line(
            out,
            &format!(
                "pub struct {}(pub {});",
                state.padded_type,
                rust_path(&state.type_name)
            ),
        );
        line(out, "");
    }
}
