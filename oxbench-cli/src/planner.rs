//! Benchmark selection: regex filtering with deterministic ordering.

use oxbench_gen::CompiledStub;
use regex::Regex;

/// The benchmarks selected for one run, sorted by id.
pub struct Plan<'a> {
    /// Selected stubs, ascending by id.
    pub stubs: Vec<&'a CompiledStub>,
}

/// Filter stubs by an optional id regex and sort them for deterministic
/// execution order.
pub fn build_plan<'a>(
    stubs: impl Iterator<Item = &'a CompiledStub>,
    filter: Option<&Regex>,
) -> Plan<'a> {
    let mut selected: Vec<&CompiledStub> = stubs
        .filter(|stub| filter.map(|re| re.is_match(stub.id())).unwrap_or(true))
        .collect();
    selected.sort_by(|a, b| a.id().cmp(b.id()));
    Plan { stubs: selected }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxbench_core::WorkResult;
    use oxbench_gen::{BenchmarkDescriptor, RuntimeBindings, StubGenerator};

    fn stub(generator: &mut StubGenerator, owner: &str, method: &str) -> CompiledStub {
        generator
            .compile(
                &BenchmarkDescriptor::new(owner, method),
                RuntimeBindings::new(|_, _| WorkResult::one_op()),
            )
            .unwrap()
    }

    #[test]
    fn test_plan_sorts_and_filters() {
        let mut generator = StubGenerator::new();
        let stubs = vec![
            stub(&mut generator, "a.B", "m2"),
            stub(&mut generator, "a.A", "m1"),
            stub(&mut generator, "a.B", "m1"),
        ];

        let plan = build_plan(stubs.iter(), None);
        let ids: Vec<&str> = plan.stubs.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["a.A.m1", "a.B.m1", "a.B.m2"]);

        let re = Regex::new("a\\.B\\.").unwrap();
        let plan = build_plan(stubs.iter(), Some(&re));
        let ids: Vec<&str> = plan.stubs.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["a.B.m1", "a.B.m2"]);
    }
}
