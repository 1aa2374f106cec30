//! Top-level orchestration entry point.
//!
//! [`LincheckEngine::run`] wires the full pipeline end to end: a generator
//! draws a scenario; a strategy drives the runner to produce a result set,
//! which the verifier checks; on mismatch, the minimizer shrinks the
//! scenario. Everything upstream of this module is a reusable piece
//! (generator, runner, strategy, verifier, minimizer); this is the one call
//! site that owns the loop over `iterations` and decides when to stop and
//! minimize.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::config::{LincheckConfig, StrategyKind, VerifierKind};
use crate::error::EngineResult;
use crate::failure::{LincheckFailure, Minimizer};
use crate::generators::scenario_gen::{ExecutionGenerator, ExecutionGeneratorConfig, GeneratorPool};
use crate::observer::{InvocationObserver, NullObserver};
use crate::runner::{ConcurrentSpecification, Runner, RunnerConfig};
use crate::spec::SequentialSpecification;
use crate::strategy::model_checking::ModelCheckingStrategy;
use crate::strategy::stress::StressStrategy;
use crate::strategy::{run_iteration, Strategy};
use crate::verifier::{
    EpsilonVerifier, LinearizabilityVerifier, QuiescentConsistencyVerifier, SerializabilityVerifier, Verifier,
};

fn build_verifier<S: SequentialSpecification + 'static>(kind: VerifierKind) -> Box<dyn Verifier> {
    match kind {
        VerifierKind::Linearizability => Box::new(LinearizabilityVerifier::<S>::new()),
        VerifierKind::QuiescentConsistency => Box::new(QuiescentConsistencyVerifier::<S>::new()),
        VerifierKind::Serializability => Box::new(SerializabilityVerifier::<S>::new()),
        VerifierKind::Epsilon => Box::new(EpsilonVerifier),
    }
}

fn build_strategy<C: ConcurrentSpecification + 'static>(
    kind: StrategyKind,
    seed: u64,
    config: &LincheckConfig,
) -> Box<dyn Strategy<C>> {
    match kind {
        StrategyKind::Stress => Box::new(StressStrategy::new(seed, config.invocations_per_iteration())),
        StrategyKind::ModelChecking => Box::new(
            ModelCheckingStrategy::new(seed, config.invocations_per_iteration())
                .with_check_obstruction_freedom(config.check_obstruction_freedom())
                .with_hanging_detection_threshold(config.hanging_detection_threshold()),
        ),
    }
}

/// Drives the full generate/run/verify/minimize pipeline against one
/// concurrent implementation `C`, checked against sequential model `S`.
///
/// `C` is the type under test, built fresh per invocation by the factory
/// supplied to [`LincheckEngine::new`]. `S` is the sequential specification
/// the verifier checks observed results against; it never runs concurrently
/// and carries no runtime state of its own here (`PhantomData`).
pub struct LincheckEngine<C: ConcurrentSpecification + 'static, S: SequentialSpecification + 'static> {
    config: LincheckConfig,
    factory: Arc<dyn Fn() -> C + Send + Sync>,
    pool_factory: Arc<dyn Fn() -> GeneratorPool>,
    observer: Box<dyn InvocationObserver>,
    _sequential: PhantomData<fn() -> S>,
}

impl<C: ConcurrentSpecification + 'static, S: SequentialSpecification + 'static> LincheckEngine<C, S> {
    /// Build an engine around a fresh-instance factory for the type under
    /// test and a fresh-pool factory for the scenario generator's actor
    /// templates: a new [`GeneratorPool`] per iteration so `use_once`
    /// templates reset between scenarios.
    pub fn new(
        config: LincheckConfig,
        factory: impl Fn() -> C + Send + Sync + 'static,
        pool_factory: impl Fn() -> GeneratorPool + 'static,
    ) -> Self {
        Self {
            config,
            factory: Arc::new(factory),
            pool_factory: Arc::new(pool_factory),
            observer: Box::new(NullObserver),
            _sequential: PhantomData,
        }
    }

    /// Replace the default no-op observer.
    #[must_use]
    pub fn with_observer(mut self, observer: impl InvocationObserver + 'static) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Run the configured number of iterations, each drawing a fresh
    /// random scenario and replaying it up to
    /// `invocations_per_iteration` times. Returns the first
    /// [`LincheckFailure`], minimized per `minimize_failed_scenario`, or
    /// `None` if every iteration passed.
    ///
    /// # Errors
    ///
    /// Returns `Err` only for developer errors surfaced as a value rather
    /// than a found bug: a malformed scenario/result shape, or a generator
    /// that could not draw a valid scenario from its pool.
    pub fn run(&self) -> EngineResult<Option<LincheckFailure>> {
        let base_seed = self.config.seed().unwrap_or_else(rand::random);
        let runner_factory = Arc::clone(&self.factory);
        let runner: Runner<C> = Runner::new(
            move || (runner_factory)(),
            RunnerConfig {
                timeout_ms: self.config.timeout_ms(),
                hanging_detection_threshold: self.config.hanging_detection_threshold(),
            },
        );
        let verifier = build_verifier::<S>(self.config.verifier());

        for iteration in 0..self.config.iterations() {
            #[allow(clippy::cast_possible_truncation)]
            let seed = base_seed.wrapping_add(iteration as u64);
            let mut pool = (self.pool_factory)();
            let mut generator = ExecutionGenerator::new(
                seed,
                ExecutionGeneratorConfig {
                    threads: self.config.threads(),
                    actors_per_thread: self.config.actors_per_thread(),
                    actors_before: self.config.actors_before(),
                    actors_after: self.config.actors_after(),
                },
            );
            let scenario = generator.generate(&mut pool)?;

            let mut strategy = build_strategy::<C>(self.config.strategy(), seed, &self.config);
            let outcome =
                run_iteration(strategy.as_mut(), &runner, &scenario, &verifier, self.observer.as_ref())?;

            let Some(failure) = outcome else { continue };

            if !self.config.minimize_failed_scenario() {
                return Ok(Some(failure));
            }

            let minimizer = Minimizer::new();
            let minimized = minimizer.minimize(failure, &mut |candidate| {
                let mut strategy = build_strategy::<C>(self.config.strategy(), seed, &self.config);
                run_iteration(strategy.as_mut(), &runner, candidate, &verifier, self.observer.as_ref())
                    .ok()
                    .flatten()
            });
            return Ok(Some(minimized));
        }
        Ok(None)
    }
}
