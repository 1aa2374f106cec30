//! Configuration surface.
//!
//! `LincheckConfig` is a plain, fluent builder (`with_*` methods) holding
//! the engine's tunable parameters. There is no file-based loading and no
//! `serde`: configuration is always constructed in Rust code by the test
//! author.

/// Selects which verifier checks a scenario's observed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerifierKind {
    /// Full linearizability check.
    #[default]
    Linearizability,
    /// Quiescent-consistency: permits out-of-order execution of actors
    /// marked quiescent-consistent.
    QuiescentConsistency,
    /// Serializability: flattens all actors into one history first.
    Serializability,
    /// No-op verifier that always reports success.
    Epsilon,
}

/// Selects which exploration strategy drives the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyKind {
    /// Randomized repeated execution with scrambled timing.
    #[default]
    Stress,
    /// Interleaving-tree exploration with switch points.
    ModelChecking,
}

/// The engine's configuration surface.
#[derive(Debug, Clone)]
pub struct LincheckConfig {
    iterations: usize,
    threads: usize,
    actors_per_thread: usize,
    actors_before: usize,
    actors_after: usize,
    invocations_per_iteration: usize,
    minimize_failed_scenario: bool,
    verifier: VerifierKind,
    strategy: StrategyKind,
    check_obstruction_freedom: bool,
    hanging_detection_threshold: u32,
    timeout_ms: u64,
    seed: Option<u64>,
}

impl Default for LincheckConfig {
    fn default() -> Self {
        Self {
            iterations: 100,
            threads: 2,
            actors_per_thread: 3,
            actors_before: 1,
            actors_after: 1,
            invocations_per_iteration: 1_000,
            minimize_failed_scenario: true,
            verifier: VerifierKind::default(),
            strategy: StrategyKind::default(),
            check_obstruction_freedom: false,
            hanging_detection_threshold: 10_000,
            timeout_ms: 5_000,
            seed: None,
        }
    }
}

impl LincheckConfig {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct random scenarios to try.
    #[must_use]
    pub const fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Parallel thread count per scenario.
    #[must_use]
    pub const fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Actors per parallel thread.
    #[must_use]
    pub const fn with_actors_per_thread(mut self, n: usize) -> Self {
        self.actors_per_thread = n;
        self
    }

    /// Init-phase length bound.
    #[must_use]
    pub const fn with_actors_before(mut self, n: usize) -> Self {
        self.actors_before = n;
        self
    }

    /// Post-phase length bound.
    #[must_use]
    pub const fn with_actors_after(mut self, n: usize) -> Self {
        self.actors_after = n;
        self
    }

    /// Replays per scenario.
    #[must_use]
    pub const fn with_invocations_per_iteration(mut self, n: usize) -> Self {
        self.invocations_per_iteration = n;
        self
    }

    /// Enable or disable the greedy minimizer.
    #[must_use]
    pub const fn with_minimize_failed_scenario(mut self, enabled: bool) -> Self {
        self.minimize_failed_scenario = enabled;
        self
    }

    /// Select the verifier.
    #[must_use]
    pub const fn with_verifier(mut self, verifier: VerifierKind) -> Self {
        self.verifier = verifier;
        self
    }

    /// Select the exploration strategy.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Reject non-blocking violations in model-checking mode.
    #[must_use]
    pub const fn with_check_obstruction_freedom(mut self, enabled: bool) -> Self {
        self.check_obstruction_freedom = enabled;
        self
    }

    /// Busy-loop iterations (or scheduler picks) before a hang is inferred.
    #[must_use]
    pub const fn with_hanging_detection_threshold(mut self, n: u32) -> Self {
        self.hanging_detection_threshold = n;
        self
    }

    /// Wall-clock ceiling per invocation, in milliseconds.
    #[must_use]
    pub const fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Fix the engine seed for reproducibility. The engine keeps no
    /// persisted state of its own; a fixed seed is the only way to replay
    /// the same run.
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Number of distinct random scenarios to try.
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    /// Parallel thread count per scenario.
    #[must_use]
    pub const fn threads(&self) -> usize {
        self.threads
    }

    /// Actors per parallel thread.
    #[must_use]
    pub const fn actors_per_thread(&self) -> usize {
        self.actors_per_thread
    }

    /// Init-phase length bound.
    #[must_use]
    pub const fn actors_before(&self) -> usize {
        self.actors_before
    }

    /// Post-phase length bound.
    #[must_use]
    pub const fn actors_after(&self) -> usize {
        self.actors_after
    }

    /// Replays per scenario.
    #[must_use]
    pub const fn invocations_per_iteration(&self) -> usize {
        self.invocations_per_iteration
    }

    /// Whether the greedy minimizer is enabled.
    #[must_use]
    pub const fn minimize_failed_scenario(&self) -> bool {
        self.minimize_failed_scenario
    }

    /// The selected verifier.
    #[must_use]
    pub const fn verifier(&self) -> VerifierKind {
        self.verifier
    }

    /// The selected exploration strategy.
    #[must_use]
    pub const fn strategy(&self) -> StrategyKind {
        self.strategy
    }

    /// Whether obstruction-freedom violations are rejected in MC mode.
    #[must_use]
    pub const fn check_obstruction_freedom(&self) -> bool {
        self.check_obstruction_freedom
    }

    /// Busy-loop iterations before a hang is inferred.
    #[must_use]
    pub const fn hanging_detection_threshold(&self) -> u32 {
        self.hanging_detection_threshold
    }

    /// Wall-clock ceiling per invocation, in milliseconds.
    #[must_use]
    pub const fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// The fixed engine seed, if any.
    #[must_use]
    pub const fn seed(&self) -> Option<u64> {
        self.seed
    }
}
