//! Integration tests for the harness: stub compilation, state-scope
//! lifecycles, helper ordering, and failure handling, end to end.

use oxbench::{
    state_ref, BenchmarkConfig, BenchmarkDescriptor, BenchmarkMode, HelperMethod, IterationData,
    IterationStatus, Level, OutputFormat, RunnerError, RuntimeBindings, Scope, StateBinding,
    StubGenerator, WorkResult,
};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sink that remembers every reported iteration and diagnostic.
#[derive(Default)]
struct RecordingSink {
    iterations: Vec<(bool, IterationStatus)>,
    exceptions: Vec<String>,
}

impl OutputFormat for RecordingSink {
    fn iteration_result(&mut self, data: &IterationData) {
        self.iterations.push((data.warmup, data.status.clone()));
    }

    fn exception(&mut self, err: &dyn fmt::Display) {
        self.exceptions.push(err.to_string());
    }

    fn verbose_print(&mut self, _msg: &str) {}
}

/// Single-shot configuration: deterministic invocation counts, no clocks to
/// wait on.
fn single_shot(threads: usize, batch: u64, measurement: usize) -> BenchmarkConfig {
    BenchmarkConfig {
        max_threads: threads,
        batch_size: batch,
        warmup_iterations: 0,
        measurement_iterations: measurement,
        iteration_time: Duration::from_millis(10),
        ..Default::default()
    }
}

/// A state whose helpers count into shared atomics, so tests can observe the
/// lifecycle from outside the run.
struct Probe {
    hits: Arc<AtomicU64>,
}

/// Iteration count is honored: one measurement iteration runs the
/// iteration-level setup exactly once and reports exactly one result.
#[test]
fn test_iteration_count_honored() {
    let setups = Arc::new(AtomicU64::new(0));
    let observed = Arc::clone(&setups);

    let descriptor = BenchmarkDescriptor::new("it.IterationCount", "test")
        .with_modes(&[BenchmarkMode::SingleShotTime])
        .declare_state(
            "it.Probe",
            vec![HelperMethod::setup("bump", Level::Iteration)],
        )
        .with_param("it.Probe", Scope::Benchmark);

    let bindings = RuntimeBindings::new(|_, _| WorkResult::one_op()).state(
        "it.Probe",
        StateBinding::new(move || Probe {
            hits: Arc::clone(&setups),
        })
        .helper("bump", |probe: &Probe| {
            probe.hits.fetch_add(1, Ordering::AcqRel);
        }),
    );

    let stub = StubGenerator::new().compile(&descriptor, bindings).unwrap();
    let mut sink = RecordingSink::default();
    let runs = stub
        .run(&single_shot(1, 1, 1), &mut sink, &mut [])
        .unwrap();

    assert_eq!(observed.load(Ordering::Acquire), 1);
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].iterations.len(), 1);
    assert_eq!(sink.iterations.len(), 1);
    assert_eq!(sink.iterations[0], (false, IterationStatus::Ok));
}

/// A benchmark-scoped state is constructed once and every worker observes
/// the same instance.
#[test]
fn test_benchmark_scope_is_shared_across_workers() {
    let constructions = Arc::new(AtomicUsize::new(0));
    let identities: Arc<Mutex<HashSet<usize>>> = Arc::new(Mutex::new(HashSet::new()));

    let descriptor = BenchmarkDescriptor::new("it.Sharing", "test")
        .with_modes(&[BenchmarkMode::SingleShotTime])
        .declare_state("it.Shared", Vec::new())
        .with_param("it.Shared", Scope::Benchmark);

    let factory_count = Arc::clone(&constructions);
    let seen = Arc::clone(&identities);
    let bindings = RuntimeBindings::new(move |args, _| {
        let shared: &u64 = state_ref(args, 0).expect("benchmark state bound");
        seen.lock()
            .unwrap()
            .insert(shared as *const u64 as usize);
        WorkResult::one_op()
    })
    .state(
        "it.Shared",
        StateBinding::new(move || {
            factory_count.fetch_add(1, Ordering::AcqRel);
            0u64
        }),
    );

    let stub = StubGenerator::new().compile(&descriptor, bindings).unwrap();
    let mut sink = RecordingSink::default();
    stub.run(&single_shot(4, 1, 1), &mut sink, &mut []).unwrap();

    assert_eq!(constructions.load(Ordering::Acquire), 1);
    assert_eq!(identities.lock().unwrap().len(), 1);
}

/// Group scope partitions workers: `thread_groups = [2, 2]` creates two
/// instances, each shared by the two workers of its group.
#[test]
fn test_group_scope_partitions_workers() {
    let instances: Arc<Mutex<Vec<Arc<AtomicU64>>>> = Arc::new(Mutex::new(Vec::new()));

    let descriptor = BenchmarkDescriptor::new("it.Groups", "test")
        .with_modes(&[BenchmarkMode::SingleShotTime])
        .declare_state("it.PerGroup", Vec::new())
        .with_param("it.PerGroup", Scope::Group);

    let created = Arc::clone(&instances);
    let bindings = RuntimeBindings::new(|args, _| {
        let hits: &Arc<AtomicU64> = state_ref(args, 0).expect("group state bound");
        hits.fetch_add(1, Ordering::AcqRel);
        WorkResult::one_op()
    })
    .state(
        "it.PerGroup",
        StateBinding::new(move || {
            let hits = Arc::new(AtomicU64::new(0));
            created.lock().unwrap().push(Arc::clone(&hits));
            hits
        }),
    );

    let config = BenchmarkConfig {
        thread_groups: vec![2, 2],
        ..single_shot(4, 1, 1)
    };
    let stub = StubGenerator::new().compile(&descriptor, bindings).unwrap();
    let mut sink = RecordingSink::default();
    stub.run(&config, &mut sink, &mut []).unwrap();

    let created = instances.lock().unwrap();
    assert_eq!(created.len(), 2);
    // Each instance saw exactly its group's two workers.
    for hits in created.iter() {
        assert_eq!(hits.load(Ordering::Acquire), 2);
    }
}

/// Thread scope: distinct workers hold distinct instances, one each.
#[test]
fn test_thread_scope_is_per_worker() {
    let constructions = Arc::new(AtomicUsize::new(0));
    let identities: Arc<Mutex<HashSet<usize>>> = Arc::new(Mutex::new(HashSet::new()));

    let descriptor = BenchmarkDescriptor::new("it.Locals", "test")
        .with_modes(&[BenchmarkMode::SingleShotTime])
        .declare_state("it.Local", Vec::new())
        .with_param("it.Local", Scope::Thread);

    let factory_count = Arc::clone(&constructions);
    let seen = Arc::clone(&identities);
    let bindings = RuntimeBindings::new(move |args, _| {
        let local: &u64 = state_ref(args, 0).expect("thread state bound");
        seen.lock().unwrap().insert(local as *const u64 as usize);
        WorkResult::one_op()
    })
    .state(
        "it.Local",
        StateBinding::new(move || {
            factory_count.fetch_add(1, Ordering::AcqRel);
            0u64
        }),
    );

    // Two measurement iterations: instances persist across iterations.
    let stub = StubGenerator::new().compile(&descriptor, bindings).unwrap();
    let mut sink = RecordingSink::default();
    stub.run(&single_shot(3, 1, 2), &mut sink, &mut []).unwrap();

    assert_eq!(constructions.load(Ordering::Acquire), 3);
    assert_eq!(identities.lock().unwrap().len(), 3);
}

/// The observable helper sequence for one iteration follows the contract:
/// trial setups at first bind, then Thread/Benchmark/Group iteration setups,
/// the invocation-wrapped bodies, and teardowns in reverse scope order;
/// trial teardowns close the run.
#[test]
fn test_helper_ordering_round_trip() {
    let log: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let event = |log: &Arc<Mutex<Vec<String>>>, name: &str| {
        let log = Arc::clone(log);
        let name = name.to_string();
        move |_probe: &()| {
            log.lock().unwrap().push(name.clone());
        }
    };

    // Type names chosen so the slot sort matches declaration order.
    let descriptor = BenchmarkDescriptor::new("it.Ordering", "test")
        .with_modes(&[BenchmarkMode::SingleShotTime])
        .declare_state(
            "it.B",
            vec![
                HelperMethod::setup("b_trial_setup", Level::Trial),
                HelperMethod::setup("b_iter_setup", Level::Iteration),
                HelperMethod::teardown("b_iter_teardown", Level::Iteration),
                HelperMethod::setup("b_inv_setup", Level::Invocation),
                HelperMethod::teardown("b_inv_teardown", Level::Invocation),
                HelperMethod::teardown("b_trial_teardown", Level::Trial),
            ],
        )
        .declare_state(
            "it.G",
            vec![
                HelperMethod::setup("g_trial_setup", Level::Trial),
                HelperMethod::setup("g_iter_setup", Level::Iteration),
                HelperMethod::teardown("g_iter_teardown", Level::Iteration),
                HelperMethod::setup("g_inv_setup", Level::Invocation),
                HelperMethod::teardown("g_inv_teardown", Level::Invocation),
                HelperMethod::teardown("g_trial_teardown", Level::Trial),
            ],
        )
        .declare_state(
            "it.T",
            vec![
                HelperMethod::setup("t_trial_setup", Level::Trial),
                HelperMethod::setup("t_iter_setup", Level::Iteration),
                HelperMethod::teardown("t_iter_teardown", Level::Iteration),
                HelperMethod::setup("t_inv_setup", Level::Invocation),
                HelperMethod::teardown("t_inv_teardown", Level::Invocation),
                HelperMethod::teardown("t_trial_teardown", Level::Trial),
            ],
        )
        .with_param("it.B", Scope::Benchmark)
        .with_param("it.G", Scope::Group)
        .with_param("it.T", Scope::Thread);

    let state = |prefix: &str| {
        let mut binding = StateBinding::new(|| ());
        for suffix in [
            "trial_setup",
            "iter_setup",
            "iter_teardown",
            "inv_setup",
            "inv_teardown",
            "trial_teardown",
        ] {
            let name = format!("{prefix}_{suffix}");
            binding = binding.helper(&name, event(&log, &name));
        }
        binding
    };

    let body_log = Arc::clone(&log);
    let bindings = RuntimeBindings::new(move |_, _| {
        body_log.lock().unwrap().push("body".to_string());
        WorkResult::one_op()
    })
    .state("it.B", state("b"))
    .state("it.G", state("g"))
    .state("it.T", state("t"));

    let stub = StubGenerator::new().compile(&descriptor, bindings).unwrap();
    let mut sink = RecordingSink::default();
    stub.run(&single_shot(1, 2, 1), &mut sink, &mut []).unwrap();

    let invocation = [
        "t_inv_setup",
        "b_inv_setup",
        "g_inv_setup",
        "body",
        "g_inv_teardown",
        "b_inv_teardown",
        "t_inv_teardown",
    ];
    let mut expected: Vec<&str> = vec![
        // Trial setups run inside each slot's initializer, slot order.
        "b_trial_setup",
        "g_trial_setup",
        "t_trial_setup",
        // Iteration setup: Thread, then Benchmark, then Group.
        "t_iter_setup",
        "b_iter_setup",
        "g_iter_setup",
    ];
    expected.extend(invocation);
    expected.extend(invocation);
    expected.extend([
        // Iteration teardown reverses the scope order.
        "g_iter_teardown",
        "b_iter_teardown",
        "t_iter_teardown",
        // Trial teardown closes the run, reverse scope order.
        "g_trial_teardown",
        "b_trial_teardown",
        "t_trial_teardown",
    ]);

    assert_eq!(*log.lock().unwrap(), expected);
}

/// Setup and teardown totals match per state and level over a complete run.
#[test]
fn test_setup_teardown_totals_balance() {
    let setups = Arc::new(AtomicU64::new(0));
    let teardowns = Arc::new(AtomicU64::new(0));

    let descriptor = BenchmarkDescriptor::new("it.Balance", "test")
        .with_modes(&[BenchmarkMode::SingleShotTime])
        .declare_state(
            "it.Probe",
            vec![
                HelperMethod::setup("up", Level::Iteration),
                HelperMethod::teardown("down", Level::Iteration),
            ],
        )
        .with_param("it.Probe", Scope::Benchmark);

    let up_hits = Arc::clone(&setups);
    let down_hits = Arc::clone(&teardowns);
    let bindings = RuntimeBindings::new(|_, _| WorkResult::one_op()).state(
        "it.Probe",
        StateBinding::new(move || Probe {
            hits: Arc::new(AtomicU64::new(0)),
        })
        .helper("up", move |_: &Probe| {
            up_hits.fetch_add(1, Ordering::AcqRel);
        })
        .helper("down", move |_: &Probe| {
            down_hits.fetch_add(1, Ordering::AcqRel);
        }),
    );

    let stub = StubGenerator::new().compile(&descriptor, bindings).unwrap();
    let mut sink = RecordingSink::default();
    stub.run(&single_shot(4, 2, 3), &mut sink, &mut []).unwrap();

    let up = setups.load(Ordering::Acquire);
    let down = teardowns.load(Ordering::Acquire);
    assert_eq!(up, down);
    // Benchmark-scoped: exactly once per iteration regardless of workers.
    assert_eq!(up, 3);
}

/// A body failure mid-run marks that iteration Failed but still runs
/// iteration teardown, later iterations, and trial teardown.
#[test]
fn test_teardown_still_runs_on_failure() {
    let iter_teardowns = Arc::new(AtomicU64::new(0));
    let trial_teardowns = Arc::new(AtomicU64::new(0));

    let descriptor = BenchmarkDescriptor::new("it.Failure", "test")
        .with_modes(&[BenchmarkMode::SingleShotTime])
        .declare_state(
            "it.Clock",
            vec![
                HelperMethod::setup("tick", Level::Iteration),
                HelperMethod::teardown("tock", Level::Iteration),
                HelperMethod::teardown("stop", Level::Trial),
            ],
        )
        .with_param("it.Clock", Scope::Benchmark);

    struct Clock {
        iteration: AtomicU64,
        invocation: AtomicU64,
    }

    let tocks = Arc::clone(&iter_teardowns);
    let stops = Arc::clone(&trial_teardowns);
    let bindings = RuntimeBindings::new(move |args, _| {
        let clock: &Clock = state_ref(args, 0).expect("clock bound");
        let invocation = clock.invocation.fetch_add(1, Ordering::AcqRel) + 1;
        if clock.iteration.load(Ordering::Acquire) == 2 && invocation == 5 {
            panic!("synthetic failure at iteration 2, invocation 5");
        }
        WorkResult::one_op()
    })
    .state(
        "it.Clock",
        StateBinding::new(|| Clock {
            iteration: AtomicU64::new(0),
            invocation: AtomicU64::new(0),
        })
        .helper("tick", |clock: &Clock| {
            clock.iteration.fetch_add(1, Ordering::AcqRel);
            clock.invocation.store(0, Ordering::Release);
        })
        .helper("tock", move |_: &Clock| {
            tocks.fetch_add(1, Ordering::AcqRel);
        })
        .helper("stop", move |_: &Clock| {
            stops.fetch_add(1, Ordering::AcqRel);
        }),
    );

    let stub = StubGenerator::new().compile(&descriptor, bindings).unwrap();
    let mut sink = RecordingSink::default();
    let runs = stub
        .run(&single_shot(1, 10, 3), &mut sink, &mut [])
        .unwrap();

    let statuses: Vec<bool> = runs[0]
        .iterations
        .iter()
        .map(|i| i.status.is_failed())
        .collect();
    assert_eq!(statuses, vec![false, true, false]);
    match &runs[0].iterations[1].status {
        IterationStatus::Failed(reason) => assert!(reason.contains("synthetic failure")),
        other => panic!("expected failure, got {:?}", other),
    }
    // Iteration teardown ran for the failed iteration too; trial teardown
    // ran exactly once at run end.
    assert_eq!(iter_teardowns.load(Ordering::Acquire), 3);
    assert_eq!(trial_teardowns.load(Ordering::Acquire), 1);
}

/// A failing Benchmark-scoped Iteration-Setup helper must not latch the
/// setup guard: the failed iteration runs neither setup nor teardown to
/// completion, and the next iteration runs setup again, so totals stay
/// balanced per state and level.
#[test]
fn test_failed_iteration_setup_keeps_guard_balanced() {
    let setup_attempts = Arc::new(AtomicU64::new(0));
    let teardowns = Arc::new(AtomicU64::new(0));

    let descriptor = BenchmarkDescriptor::new("it.FlakySetup", "test")
        .with_modes(&[BenchmarkMode::SingleShotTime])
        .declare_state(
            "it.Flaky",
            vec![
                HelperMethod::setup("up", Level::Iteration),
                HelperMethod::teardown("down", Level::Iteration),
            ],
        )
        .with_param("it.Flaky", Scope::Benchmark);

    let ups = Arc::clone(&setup_attempts);
    let downs = Arc::clone(&teardowns);
    let bindings = RuntimeBindings::new(|_, _| WorkResult::one_op()).state(
        "it.Flaky",
        StateBinding::new(|| ())
            .helper("up", move |_: &()| {
                if ups.fetch_add(1, Ordering::AcqRel) + 1 == 2 {
                    panic!("setup failed on second iteration");
                }
            })
            .helper("down", move |_: &()| {
                downs.fetch_add(1, Ordering::AcqRel);
            }),
    );

    let stub = StubGenerator::new().compile(&descriptor, bindings).unwrap();
    let mut sink = RecordingSink::default();
    let runs = stub
        .run(&single_shot(1, 1, 3), &mut sink, &mut [])
        .unwrap();

    let statuses: Vec<bool> = runs[0]
        .iterations
        .iter()
        .map(|i| i.status.is_failed())
        .collect();
    assert_eq!(statuses, vec![false, true, false]);
    match &runs[0].iterations[1].status {
        IterationStatus::Failed(reason) => assert!(reason.contains("up")),
        other => panic!("expected failure, got {:?}", other),
    }
    // Setup was attempted on every iteration; the failure did not leave the
    // guard stuck on.
    assert_eq!(setup_attempts.load(Ordering::Acquire), 3);
    // Two completed setups, two teardowns; the failed iteration ran neither
    // side to completion.
    assert_eq!(teardowns.load(Ordering::Acquire), 2);
}

/// With fail_on_error set, the first failed iteration stops the run and the
/// error surfaces, but trial teardown still runs.
#[test]
fn test_fail_on_error_stops_and_surfaces() {
    let trial_teardowns = Arc::new(AtomicU64::new(0));

    let descriptor = BenchmarkDescriptor::new("it.FailFast", "test")
        .with_modes(&[BenchmarkMode::SingleShotTime])
        .declare_state(
            "it.Probe",
            vec![HelperMethod::teardown("close", Level::Trial)],
        )
        .with_param("it.Probe", Scope::Benchmark);

    let closes = Arc::clone(&trial_teardowns);
    let bindings = RuntimeBindings::new(|_, _| -> WorkResult {
        panic!("always fails");
    })
    .state(
        "it.Probe",
        StateBinding::new(|| Probe {
            hits: Arc::new(AtomicU64::new(0)),
        })
        .helper("close", move |_: &Probe| {
            closes.fetch_add(1, Ordering::AcqRel);
        }),
    );

    let config = BenchmarkConfig {
        fail_on_error: true,
        ..single_shot(1, 1, 3)
    };
    let stub = StubGenerator::new().compile(&descriptor, bindings).unwrap();
    let mut sink = RecordingSink::default();
    let err = stub.run(&config, &mut sink, &mut []).unwrap_err();

    match err {
        RunnerError::FailedIteration { reason } => assert!(reason.contains("always fails")),
        other => panic!("expected FailedIteration, got {other:?}"),
    }
    assert_eq!(trial_teardowns.load(Ordering::Acquire), 1);
}

/// Zero warmup iterations: measurement proceeds immediately, trial setup
/// still runs.
#[test]
fn test_zero_warmup_still_runs_trial_setup() {
    let trial_setups = Arc::new(AtomicU64::new(0));

    let descriptor = BenchmarkDescriptor::new("it.NoWarmup", "test")
        .with_modes(&[BenchmarkMode::SingleShotTime])
        .declare_state(
            "it.Probe",
            vec![HelperMethod::setup("open", Level::Trial)],
        )
        .with_param("it.Probe", Scope::Benchmark);

    let opens = Arc::clone(&trial_setups);
    let bindings = RuntimeBindings::new(|_, _| WorkResult::one_op()).state(
        "it.Probe",
        StateBinding::new(|| Probe {
            hits: Arc::new(AtomicU64::new(0)),
        })
        .helper("open", move |_: &Probe| {
            opens.fetch_add(1, Ordering::AcqRel);
        }),
    );

    let stub = StubGenerator::new().compile(&descriptor, bindings).unwrap();
    let mut sink = RecordingSink::default();
    let runs = stub
        .run(&single_shot(1, 1, 1), &mut sink, &mut [])
        .unwrap();

    assert_eq!(trial_setups.load(Ordering::Acquire), 1);
    assert_eq!(runs[0].iterations.len(), 1);
    assert!(sink.iterations.iter().all(|(warmup, _)| !warmup));
}

/// A worker stuck past the bounded join wait abandons the run with an
/// infrastructure error, and shutdown still waits the straggler out.
#[test]
fn test_stuck_worker_abandons_run_but_exits_cleanly() {
    let descriptor = BenchmarkDescriptor::new("it.Stuck", "test")
        .with_modes(&[BenchmarkMode::Throughput])
        .declare_state("it.Probe", Vec::new())
        .with_param("it.Probe", Scope::Thread);

    let bindings = RuntimeBindings::new(|_, _| {
        // Ignores the stop flag far past the bounded wait.
        std::thread::sleep(Duration::from_millis(300));
        WorkResult::one_op()
    })
    .state(
        "it.Probe",
        StateBinding::new(|| Probe {
            hits: Arc::new(AtomicU64::new(0)),
        }),
    );

    let config = BenchmarkConfig {
        max_threads: 1,
        warmup_iterations: 0,
        measurement_iterations: 1,
        iteration_time: Duration::from_millis(10),
        shutdown_timeout: Duration::from_millis(50),
        ..Default::default()
    };

    let stub = StubGenerator::new().compile(&descriptor, bindings).unwrap();
    let mut sink = RecordingSink::default();
    let started = std::time::Instant::now();
    let err = stub.run(&config, &mut sink, &mut []).unwrap_err();

    assert!(matches!(err, RunnerError::WorkerStuck { .. }));
    // The shutdown loop retried until the sleeping worker returned; no
    // threads were left behind.
    assert!(started.elapsed() >= Duration::from_millis(300));
}

/// `All` expands to every concrete mode, one run each.
#[test]
fn test_all_modes_expand() {
    let descriptor = BenchmarkDescriptor::new("it.Modes", "test")
        .with_modes(&[BenchmarkMode::All])
        .declare_state("it.Probe", Vec::new())
        .with_param("it.Probe", Scope::Thread);

    let bindings = RuntimeBindings::new(|_, _| WorkResult::one_op()).state(
        "it.Probe",
        StateBinding::new(|| Probe {
            hits: Arc::new(AtomicU64::new(0)),
        }),
    );

    let config = BenchmarkConfig {
        max_threads: 1,
        warmup_iterations: 0,
        measurement_iterations: 1,
        iteration_time: Duration::from_millis(5),
        batch_size: 2,
        ..Default::default()
    };
    let stub = StubGenerator::new().compile(&descriptor, bindings).unwrap();
    let mut sink = RecordingSink::default();
    let runs = stub.run(&config, &mut sink, &mut []).unwrap();

    let modes: Vec<BenchmarkMode> = runs.iter().map(|r| r.mode).collect();
    assert_eq!(
        modes,
        vec![
            BenchmarkMode::Throughput,
            BenchmarkMode::AverageTime,
            BenchmarkMode::SampleTime,
            BenchmarkMode::SingleShotTime,
        ]
    );
    assert!(runs.iter().all(|r| !r.has_failures()));
}
