//! Failure taxonomy & greedy scenario minimizer.
//!
//! The minimizer's shrink loop follows the same shape as a mutation tester:
//! try removing an actor, check if the failure still reproduces, keep the
//! removal on success.

use std::fmt;

use crate::actor::ExecutionScenario;
use crate::runner::ExecutionResult;

/// One recorded interleaving event, carried in a [`LincheckFailure`]'s trace
/// when available: a sequence of switch, pass-through, state-snapshot, and
/// thread-finish records tagged with the executing thread id, the current
/// actor id, and a call-stack summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// The scheduler switched execution to a different thread.
    SwitchEvent {
        /// The thread being switched to.
        thread: usize,
        /// The actor id it resumes into.
        actor_id: String,
        /// A short call-stack summary at the switch point.
        call_stack: Vec<String>,
    },
    /// A thread passed an interleaving point without switching.
    PassInterleavingPoint {
        /// The thread that passed the point.
        thread: usize,
        /// The actor id it is currently executing.
        actor_id: String,
    },
    /// A state-representation snapshot was taken.
    StateRepresentation {
        /// The thread active when the snapshot was taken.
        thread: usize,
        /// The rendered state.
        state: String,
    },
    /// A thread completed all of its actors.
    FinishThread {
        /// The thread that finished.
        thread: usize,
    },
}

/// The category a [`LincheckFailure`] belongs to, independent of its
/// payload. Used by [`Minimizer::minimize`] to decide whether a shrunk
/// scenario still reproduces the same failure, so minimization can recurse
/// on the smaller scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCategory {
    /// The observed results admit no legal sequential interleaving.
    IncorrectResults,
    /// No worker made progress within the wall-clock budget.
    Deadlock,
    /// An actor raised an exception it did not declare as handled.
    UnexpectedException,
    /// A non-blocking operation made no progress while no other thread was
    /// runnable.
    ObstructionFreedomViolation,
    /// A user-supplied validation function failed.
    ValidationFailure,
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::IncorrectResults => "incorrect results",
            Self::Deadlock => "deadlock",
            Self::UnexpectedException => "unexpected exception",
            Self::ObstructionFreedomViolation => "obstruction-freedom violation",
            Self::ValidationFailure => "validation failure",
        };
        write!(f, "{s}")
    }
}

/// A reproducible engine failure. Each variant carries the triggering
/// scenario and, optionally, a trace of interleaving events.
#[derive(Debug, Clone)]
pub enum LincheckFailure {
    /// The observed results admit no legal sequential interleaving.
    IncorrectResults {
        /// The scenario that produced the mismatch.
        scenario: ExecutionScenario,
        /// The results the runner observed.
        result: ExecutionResult,
        /// The interleaving trace, if one was recorded.
        trace: Vec<TraceEvent>,
    },
    /// No worker made progress within the wall-clock budget.
    Deadlock {
        /// The scenario that hung.
        scenario: ExecutionScenario,
        /// Elapsed time before the watchdog gave up, in milliseconds.
        elapsed_ms: u64,
        /// The interleaving trace, if one was recorded.
        trace: Vec<TraceEvent>,
    },
    /// An actor raised an exception it did not declare as handled.
    UnexpectedException {
        /// The scenario containing the offending actor.
        scenario: ExecutionScenario,
        /// The actor whose invocation raised the exception.
        method_id: String,
        /// The exception's message/kind.
        message: String,
    },
    /// A non-blocking operation made no progress while no other thread was
    /// runnable, under `check_obstruction_freedom`.
    ObstructionFreedomViolation {
        /// The scenario that triggered the violation.
        scenario: ExecutionScenario,
        /// The interleaving trace, if one was recorded.
        trace: Vec<TraceEvent>,
    },
    /// A user-supplied validation function failed.
    ValidationFailure {
        /// The scenario active when validation failed.
        scenario: ExecutionScenario,
        /// The validation function's error message.
        message: String,
    },
}

impl LincheckFailure {
    /// Build an [`Self::IncorrectResults`] failure.
    #[must_use]
    pub fn incorrect_results(scenario: ExecutionScenario, result: ExecutionResult, trace: Vec<TraceEvent>) -> Self {
        Self::IncorrectResults { scenario, result, trace }
    }

    /// Build a [`Self::Deadlock`] failure.
    #[must_use]
    pub fn deadlock(scenario: ExecutionScenario, elapsed_ms: u64, trace: Vec<TraceEvent>) -> Self {
        Self::Deadlock { scenario, elapsed_ms, trace }
    }

    /// Build an [`Self::UnexpectedException`] failure.
    #[must_use]
    pub fn unexpected_exception(
        scenario: ExecutionScenario,
        method_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::UnexpectedException { scenario, method_id: method_id.into(), message: message.into() }
    }

    /// Build an [`Self::ObstructionFreedomViolation`] failure.
    #[must_use]
    pub fn obstruction_freedom_violation(scenario: ExecutionScenario, trace: Vec<TraceEvent>) -> Self {
        Self::ObstructionFreedomViolation { scenario, trace }
    }

    /// Build a [`Self::ValidationFailure`] failure.
    #[must_use]
    pub fn validation_failure(scenario: ExecutionScenario, message: impl Into<String>) -> Self {
        Self::ValidationFailure { scenario, message: message.into() }
    }

    /// This failure's category, independent of its payload.
    #[must_use]
    pub const fn category(&self) -> FailureCategory {
        match self {
            Self::IncorrectResults { .. } => FailureCategory::IncorrectResults,
            Self::Deadlock { .. } => FailureCategory::Deadlock,
            Self::UnexpectedException { .. } => FailureCategory::UnexpectedException,
            Self::ObstructionFreedomViolation { .. } => FailureCategory::ObstructionFreedomViolation,
            Self::ValidationFailure { .. } => FailureCategory::ValidationFailure,
        }
    }

    /// The scenario that triggered this failure.
    #[must_use]
    pub const fn scenario(&self) -> &ExecutionScenario {
        match self {
            Self::IncorrectResults { scenario, .. }
            | Self::Deadlock { scenario, .. }
            | Self::UnexpectedException { scenario, .. }
            | Self::ObstructionFreedomViolation { scenario, .. }
            | Self::ValidationFailure { scenario, .. } => scenario,
        }
    }

    /// The recorded interleaving trace, if any (empty for failure kinds that
    /// never carry one).
    #[must_use]
    pub fn trace(&self) -> &[TraceEvent] {
        match self {
            Self::IncorrectResults { trace, .. }
            | Self::Deadlock { trace, .. }
            | Self::ObstructionFreedomViolation { trace, .. } => trace,
            Self::UnexpectedException { .. } | Self::ValidationFailure { .. } => &[],
        }
    }
}

impl fmt::Display for LincheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.category())?;
        writeln!(f, "{}", self.scenario().fmt_table())?;
        match self {
            Self::IncorrectResults { result, .. } => writeln!(f, "observed: {result:?}")?,
            Self::Deadlock { elapsed_ms, .. } => writeln!(f, "no progress within {elapsed_ms}ms")?,
            Self::UnexpectedException { method_id, message, .. } => {
                writeln!(f, "unexpected exception from {method_id}: {message}")?;
            }
            Self::ObstructionFreedomViolation { .. } => writeln!(f, "non-blocking operation made no progress")?,
            Self::ValidationFailure { message, .. } => writeln!(f, "validation failed: {message}")?,
        }
        let trace = self.trace();
        if !trace.is_empty() {
            writeln!(f, "trace:")?;
            for event in trace {
                writeln!(f, "  {event:?}")?;
            }
        }
        Ok(())
    }
}

/// Positions eligible for removal, parallel first (by thread, in order),
/// then init, then post. Thread
/// numbering follows [`ExecutionScenario::without_actor`]'s (`0` = init,
/// `1..=threads` = parallel, `threads + 1` = post).
fn shrink_positions(scenario: &ExecutionScenario) -> Vec<(usize, usize)> {
    let mut positions = Vec::new();
    for (t, lane) in scenario.parallel().iter().enumerate() {
        for i in 0..lane.len() {
            positions.push((t + 1, i));
        }
    }
    for i in 0..scenario.init().len() {
        positions.push((0, i));
    }
    let post_thread = scenario.parallel().len() + 1;
    for i in 0..scenario.post().len() {
        positions.push((post_thread, i));
    }
    positions
}

/// Greedy scenario shrinker.
#[derive(Debug, Default, Clone, Copy)]
pub struct Minimizer;

impl Minimizer {
    /// Construct a minimizer. Stateless: all state lives in the loop inside
    /// [`Self::minimize`].
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Shrink `failure`'s scenario to the smallest one `reproduces` still
    /// accepts as the same [`FailureCategory`]. `reproduces`
    /// re-runs the whole pipeline (generator input fixed, strategy, runner,
    /// verifier) against a candidate scenario and reports whatever failure,
    /// if any, it produces; this function never runs the pipeline itself.
    ///
    /// For each actor position (parallel first, then init, then post),
    /// tries removing it; on the first removal whose candidate still
    /// reproduces the same category, recurses on that smaller scenario and
    /// restarts the scan; otherwise tries the next position. Returns the
    /// original failure if no single removal ever reproduces.
    pub fn minimize(
        &self,
        failure: LincheckFailure,
        reproduces: &mut dyn FnMut(&ExecutionScenario) -> Option<LincheckFailure>,
    ) -> LincheckFailure {
        let mut current = failure;
        loop {
            let category = current.category();
            let positions = shrink_positions(current.scenario());
            let mut shrunk = None;
            for (thread, index) in positions {
                let Some(candidate) = current.scenario().without_actor(thread, index) else { continue };
                if let Some(next) = reproduces(&candidate) {
                    if next.category() == category {
                        shrunk = Some(next);
                        break;
                    }
                }
            }
            match shrunk {
                Some(next) => current = next,
                None => return current,
            }
        }
    }
}
