//! Strategy: stress.
//!
//! No interleaving tree. Each invocation picks a fresh wait pattern and
//! runs directly under real OS-level parallel threads; the only
//! coordination is a synchronization barrier at invocation start and a
//! join at invocation end.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::actor::ExecutionScenario;
use crate::observer::InvocationObserver;
use crate::runner::{ConcurrentSpecification, Runner, WaitPattern};
use crate::strategy::{outcome_from_runner_result, InvocationOutcome, Strategy};

/// Randomized repeated execution, varying the busy-wait pattern inserted
/// between actors.
pub struct StressStrategy {
    rng: StdRng,
    add_waits: bool,
    max_wait_iterations: u32,
    invocations_per_iteration: usize,
}

impl StressStrategy {
    /// Construct a stress strategy seeded from `seed`, running up to
    /// `invocations_per_iteration` invocations per call to
    /// [`crate::strategy::run_iteration`].
    #[must_use]
    pub fn new(seed: u64, invocations_per_iteration: usize) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), add_waits: true, max_wait_iterations: 100, invocations_per_iteration }
    }

    /// Enable or disable busy-wait injection between actors.
    #[must_use]
    pub const fn with_add_waits(mut self, enabled: bool) -> Self {
        self.add_waits = enabled;
        self
    }

    /// Set the ceiling on injected busy-wait iterations.
    #[must_use]
    pub const fn with_max_wait_iterations(mut self, ceiling: u32) -> Self {
        self.max_wait_iterations = ceiling;
        self
    }
}

impl WaitPattern for StressStrategy {
    fn wait_iterations(&mut self, _thread_id: usize) -> u32 {
        if !self.add_waits {
            return 0;
        }
        self.rng.gen_range(0..=self.max_wait_iterations)
    }
}

impl<C: ConcurrentSpecification + 'static> Strategy<C> for StressStrategy {
    fn run_invocation(
        &mut self,
        runner: &Runner<C>,
        scenario: &ExecutionScenario,
        observer: &dyn InvocationObserver,
    ) -> InvocationOutcome {
        observer.on_invocation_start(scenario);
        let outcome = outcome_from_runner_result(runner.run_stress(scenario, self));
        match &outcome {
            InvocationOutcome::Completed(result) => observer.on_invocation_end(scenario, Some(result)),
            _ => observer.on_invocation_end(scenario, None),
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "stress"
    }

    fn invocations_per_iteration(&self) -> usize {
        self.invocations_per_iteration
    }
}
