//! End-to-end scenarios exercised through the crate's public surface rather
//! than any internal module.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use lincheck_engine::actor::{Actor, ActorFlags, ExecutionScenario, Value};
use lincheck_engine::config::{LincheckConfig, StrategyKind, VerifierKind};
use lincheck_engine::engine::LincheckEngine;
use lincheck_engine::failure::{LincheckFailure, Minimizer};
use lincheck_engine::generators::scenario_gen::{ActorTemplate, GeneratorPool};
use lincheck_engine::observer::NullObserver;
use lincheck_engine::result::ActorResult;
use lincheck_engine::runner::{ConcurrentSpecification, ExecutionResult, HBClock, ResultWithClock, Runner, RunnerConfig};
use lincheck_engine::spec::{OperationStep, SequentialSpecification, Ticket};
use lincheck_engine::strategy::model_checking::ModelCheckingStrategy;
use lincheck_engine::strategy::stress::StressStrategy;
use lincheck_engine::strategy::run_iteration;
use lincheck_engine::verifier::{EpsilonVerifier, LinearizabilityVerifier, Verifier};

fn actor(name: &str) -> Actor {
    Actor::new(name, vec![], ActorFlags::default())
}

fn arg_actor(name: &str, value: i64) -> Actor {
    Actor::new(name, vec![Value::Int(value)], ActorFlags::default())
}

// Seed test 1: concurrent counter (correct).

#[derive(Clone)]
struct AtomicCounter(Arc<AtomicI64>);

impl ConcurrentSpecification for AtomicCounter {
    fn invoke(&self, actor: &Actor, _thread_id: i64) -> OperationStep {
        match actor.method_id() {
            "inc" => {
                self.0.fetch_add(1, Ordering::SeqCst);
                OperationStep::Completed(ActorResult::Void)
            }
            "get" => OperationStep::Completed(ActorResult::Value(Value::Int(self.0.load(Ordering::SeqCst)))),
            other => OperationStep::Completed(ActorResult::Exception(format!("unknown method {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
struct CounterModel {
    value: i64,
}

impl SequentialSpecification for CounterModel {
    fn initial() -> Self {
        Self::default()
    }
    fn step(&mut self, actor: &Actor) -> OperationStep {
        match actor.method_id() {
            "inc" => {
                self.value += 1;
                OperationStep::Completed(ActorResult::Void)
            }
            "get" => OperationStep::Completed(ActorResult::Value(Value::Int(self.value))),
            other => OperationStep::Completed(ActorResult::Exception(format!("unknown method {other}"))),
        }
    }
}

#[test]
fn concurrent_counter_is_linearizable_under_stress() {
    let runner: Runner<AtomicCounter> =
        Runner::new(|| AtomicCounter(Arc::new(AtomicI64::new(0))), RunnerConfig::default());
    let scenario =
        ExecutionScenario::new(vec![], vec![vec![actor("inc")], vec![actor("inc")]], vec![actor("get")])
            .expect("valid scenario");
    let verifier: LinearizabilityVerifier<CounterModel> = LinearizabilityVerifier::new();
    let mut strategy = StressStrategy::new(11, 30);
    let observer = NullObserver;
    let failure = run_iteration(&mut strategy, &runner, &scenario, &verifier, &observer).expect("checks");
    assert!(failure.is_none(), "correct counter must never fail: {failure:?}");
}

#[test]
fn concurrent_counter_passes_through_the_full_engine() {
    let config = LincheckConfig::new()
        .with_seed(17)
        .with_iterations(15)
        .with_invocations_per_iteration(20)
        .with_threads(2)
        .with_actors_per_thread(2);
    let engine: LincheckEngine<AtomicCounter, CounterModel> = LincheckEngine::new(
        config,
        || AtomicCounter(Arc::new(AtomicI64::new(0))),
        || GeneratorPool::new().with_template(ActorTemplate::new("inc", ActorFlags::default())).with_template(
            ActorTemplate::new("get", ActorFlags::default()),
        ),
    );
    let outcome = engine.run().expect("engine runs without internal errors");
    assert!(outcome.is_none());
}

// Seed test 2: the classic clocks-test violation — a fabricated result whose
// vector clock claims `d` started after `a` ran, yet reports the pre-`a`
// value. The verifier must reject it regardless of how it was produced.

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
struct FlagModel {
    x: i64,
}

impl SequentialSpecification for FlagModel {
    fn initial() -> Self {
        Self::default()
    }
    fn step(&mut self, actor: &Actor) -> OperationStep {
        match actor.method_id() {
            "a" => {
                self.x = 1;
                OperationStep::Completed(ActorResult::Void)
            }
            "b" | "c" => OperationStep::Completed(ActorResult::Void),
            "d" => OperationStep::Completed(ActorResult::Value(Value::Int(self.x))),
            other => OperationStep::Completed(ActorResult::Exception(format!("unknown method {other}"))),
        }
    }
}

#[test]
fn clocks_test_classic_violation_is_rejected() {
    let scenario = ExecutionScenario::new(
        vec![],
        vec![vec![actor("a"), actor("b")], vec![actor("c"), actor("d")]],
        vec![],
    )
    .expect("valid scenario");

    // T2's `d` claims `x == 0` (stale) while its clock shows it started
    // after T1 had executed both of its actors.
    let result = ExecutionResult::new(
        vec![],
        vec![
            vec![
                ResultWithClock { result: ActorResult::Void, clock_on_start: HBClock::from_counts(vec![0, 0]) },
                ResultWithClock { result: ActorResult::Void, clock_on_start: HBClock::from_counts(vec![0, 0]) },
            ],
            vec![
                ResultWithClock { result: ActorResult::Void, clock_on_start: HBClock::from_counts(vec![0, 0]) },
                ResultWithClock {
                    result: ActorResult::Value(Value::Int(0)),
                    clock_on_start: HBClock::from_counts(vec![2, 1]),
                },
            ],
        ],
        vec![],
    );

    let verifier: LinearizabilityVerifier<FlagModel> = LinearizabilityVerifier::new();
    assert!(!verifier.verify(&scenario, &result).expect("checks"));
}

// Seed test 3: a linearizable FIFO queue.

#[derive(Clone)]
struct ConcurrentQueue(Arc<Mutex<VecDeque<i64>>>);

impl ConcurrentSpecification for ConcurrentQueue {
    fn invoke(&self, actor: &Actor, _thread_id: i64) -> OperationStep {
        match actor.method_id() {
            "add" => {
                if let Some(Value::Int(x)) = actor.args().first() {
                    self.0.lock().expect("queue mutex poisoned").push_back(*x);
                }
                OperationStep::Completed(ActorResult::Void)
            }
            "poll" => {
                let popped = self.0.lock().expect("queue mutex poisoned").pop_front();
                OperationStep::Completed(popped.map_or(ActorResult::Value(Value::Unit), |x| {
                    ActorResult::Value(Value::Int(x))
                }))
            }
            "peek" => {
                let front = self.0.lock().expect("queue mutex poisoned").front().copied();
                OperationStep::Completed(front.map_or(ActorResult::Value(Value::Unit), |x| {
                    ActorResult::Value(Value::Int(x))
                }))
            }
            other => OperationStep::Completed(ActorResult::Exception(format!("unknown method {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
struct QueueModel(VecDeque<i64>);

impl SequentialSpecification for QueueModel {
    fn initial() -> Self {
        Self::default()
    }
    fn step(&mut self, actor: &Actor) -> OperationStep {
        match actor.method_id() {
            "add" => {
                if let Some(Value::Int(x)) = actor.args().first() {
                    self.0.push_back(*x);
                }
                OperationStep::Completed(ActorResult::Void)
            }
            "poll" => {
                let popped = self.0.pop_front();
                OperationStep::Completed(popped.map_or(ActorResult::Value(Value::Unit), |x| {
                    ActorResult::Value(Value::Int(x))
                }))
            }
            "peek" => {
                let front = self.0.front().copied();
                OperationStep::Completed(front.map_or(ActorResult::Value(Value::Unit), |x| {
                    ActorResult::Value(Value::Int(x))
                }))
            }
            other => OperationStep::Completed(ActorResult::Exception(format!("unknown method {other}"))),
        }
    }
}

#[test]
fn linearizable_queue_accepts_polls_in_either_order() {
    let runner: Runner<ConcurrentQueue> =
        Runner::new(|| ConcurrentQueue(Arc::new(Mutex::new(VecDeque::new()))), RunnerConfig::default());
    let scenario = ExecutionScenario::new(
        vec![arg_actor("add", 1), arg_actor("add", 2)],
        vec![vec![actor("poll")], vec![actor("poll")]],
        vec![actor("peek")],
    )
    .expect("valid scenario");
    let verifier: LinearizabilityVerifier<QueueModel> = LinearizabilityVerifier::new();
    let mut strategy = StressStrategy::new(23, 30);
    let observer = NullObserver;
    let failure = run_iteration(&mut strategy, &runner, &scenario, &verifier, &observer).expect("checks");
    assert!(failure.is_none(), "correct queue must never fail: {failure:?}");
}

// Seed test 4: cancellation of a semaphore acquire.

#[derive(Clone)]
struct ConcurrentSemaphore(Arc<Mutex<i64>>);

fn acquire_or_suspend(permits: &Mutex<i64>) -> OperationStep {
    let mut guard = permits.lock().expect("semaphore mutex poisoned");
    if *guard > 0 {
        *guard -= 1;
        OperationStep::Completed(ActorResult::Void)
    } else {
        OperationStep::Suspended
    }
}

impl ConcurrentSpecification for ConcurrentSemaphore {
    fn invoke(&self, actor: &Actor, _thread_id: i64) -> OperationStep {
        match actor.method_id() {
            "acquire" => acquire_or_suspend(&self.0),
            "release" => {
                *self.0.lock().expect("semaphore mutex poisoned") += 1;
                OperationStep::Completed(ActorResult::Void)
            }
            other => OperationStep::Completed(ActorResult::Exception(format!("unknown method {other}"))),
        }
    }

    fn resume(&self, _ticket: Ticket) -> OperationStep {
        acquire_or_suspend(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
struct SemaphoreModel {
    permits: i64,
    waiters: Vec<Ticket>,
    resumed: Vec<Ticket>,
}

impl SequentialSpecification for SemaphoreModel {
    fn initial() -> Self {
        Self::default()
    }
    fn step(&mut self, actor: &Actor) -> OperationStep {
        match actor.method_id() {
            "acquire" if self.permits > 0 => {
                self.permits -= 1;
                OperationStep::Completed(ActorResult::Void)
            }
            "acquire" => OperationStep::Suspended,
            "release" => {
                if let Some(waiter) = self.waiters.pop() {
                    self.resumed.push(waiter);
                } else {
                    self.permits += 1;
                }
                OperationStep::Completed(ActorResult::Void)
            }
            other => OperationStep::Completed(ActorResult::Exception(format!("unknown method {other}"))),
        }
    }

    fn resume(&mut self, _ticket: Ticket) -> OperationStep {
        OperationStep::Completed(ActorResult::Void)
    }

    fn cancel(&mut self, ticket: Ticket) {
        self.waiters.retain(|t| *t != ticket);
    }

    fn take_resumed_tickets(&mut self) -> Vec<Ticket> {
        std::mem::take(&mut self.resumed)
    }
}

#[test]
fn semaphore_acquire_accepts_completion_or_cancellation() {
    // T1 acquires a binary semaphore starting at zero permits, flagged
    // `cancel_on_suspension`; T2 releases. Whichever interleaving the
    // strategy draws, T1 either completes (permits arrived first) or is
    // cancelled: both are accepted outcomes.
    let runner: Runner<ConcurrentSemaphore> =
        Runner::new(|| ConcurrentSemaphore(Arc::new(Mutex::new(0))), RunnerConfig::default());
    let acquire = Actor::new(
        "acquire",
        vec![],
        ActorFlags { is_suspendable: true, cancel_on_suspension: true, ..ActorFlags::default() },
    );
    let scenario = ExecutionScenario::new(vec![], vec![vec![acquire], vec![actor("release")]], vec![])
        .expect("valid scenario");
    let verifier: LinearizabilityVerifier<SemaphoreModel> = LinearizabilityVerifier::new();
    let mut strategy = StressStrategy::new(5, 40);
    let observer = NullObserver;
    let failure = run_iteration(&mut strategy, &runner, &scenario, &verifier, &observer).expect("checks");
    assert!(failure.is_none(), "semaphore cancellation/completion must always be accepted: {failure:?}");
}

// Seed test 5: a bug reachable from exactly one actor on each of two
// threads must shrink down to that 2-actor witness.

#[test]
fn minimizer_shrinks_to_the_two_actor_witness() {
    let scenario = ExecutionScenario::new(
        vec![],
        vec![
            vec![actor("bug"), actor("noise"), actor("noise")],
            vec![actor("trigger"), actor("noise"), actor("noise")],
            vec![actor("noise"), actor("noise"), actor("noise")],
        ],
        vec![],
    )
    .expect("valid scenario");
    assert_eq!(scenario.total_actor_count(), 9);

    let failure = LincheckFailure::incorrect_results(scenario, ExecutionResult::default(), Vec::new());
    let minimizer = Minimizer::new();
    let shrunk = minimizer.minimize(failure, &mut |candidate| {
        let has_bug = candidate.parallel().iter().flatten().any(|a| a.method_id() == "bug");
        let has_trigger = candidate.parallel().iter().flatten().any(|a| a.method_id() == "trigger");
        (has_bug && has_trigger)
            .then(|| LincheckFailure::incorrect_results(candidate.clone(), ExecutionResult::default(), Vec::new()))
    });

    assert_eq!(shrunk.scenario().total_actor_count(), 2);
    let methods: Vec<&str> =
        shrunk.scenario().parallel().iter().flatten().map(lincheck_engine::actor::Actor::method_id).collect();
    assert!(methods.contains(&"bug"));
    assert!(methods.contains(&"trigger"));
}

// Seed test 6: an obstruction-freedom violation under model-checking mode.
// A single-parallel-thread scenario has exactly one runnable thread at
// every interleaving point — the simplest case the heuristic is defined
// for (model_checking's "lone runnable thread past threshold" detector).

#[derive(Clone)]
struct NoopSpec;

impl ConcurrentSpecification for NoopSpec {
    fn invoke(&self, _actor: &Actor, _thread_id: i64) -> OperationStep {
        OperationStep::Completed(ActorResult::Void)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
struct NoopModel;

impl SequentialSpecification for NoopModel {
    fn initial() -> Self {
        Self
    }
    fn step(&mut self, _actor: &Actor) -> OperationStep {
        OperationStep::Completed(ActorResult::Void)
    }
}

#[test]
fn obstruction_freedom_violation_flagged_when_only_one_thread_is_ever_runnable() {
    let runner: Runner<NoopSpec> = Runner::new(|| NoopSpec, RunnerConfig::default());
    let scenario = ExecutionScenario::new(
        vec![],
        vec![vec![actor("noop"), actor("noop"), actor("noop"), actor("noop"), actor("noop")]],
        vec![],
    )
    .expect("valid scenario");
    let mut strategy =
        ModelCheckingStrategy::new(1, 1).with_check_obstruction_freedom(true).with_hanging_detection_threshold(2);
    let verifier = EpsilonVerifier;
    let observer = NullObserver;
    let failure = run_iteration(&mut strategy, &runner, &scenario, &verifier, &observer).expect("checks");
    assert!(matches!(failure, Some(LincheckFailure::ObstructionFreedomViolation { .. })));
}

#[test]
fn strategy_and_verifier_kinds_are_selectable_from_config() {
    let config = LincheckConfig::new().with_strategy(StrategyKind::ModelChecking).with_verifier(VerifierKind::Epsilon);
    assert_eq!(config.strategy(), StrategyKind::ModelChecking);
    assert_eq!(config.verifier(), VerifierKind::Epsilon);
}
