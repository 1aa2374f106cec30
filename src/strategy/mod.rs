//! Exploration strategies that drive the runner.
//!
//! A [`Strategy`] owns whatever scheduling state it needs (a wait pattern
//! for [`stress`], an interleaving tree for [`model_checking`]) and drives
//! one [`crate::runner::Runner`] invocation at a time. [`run_iteration`]
//! wires a strategy, a runner, and a [`crate::verifier::Verifier`] together:
//! the strategy drives the runner to produce a result set, the verifier
//! checks it, and on mismatch the minimizer shrinks the scenario.

pub mod model_checking;
pub mod stress;

use crate::actor::ExecutionScenario;
use crate::failure::LincheckFailure;
use crate::observer::InvocationObserver;
use crate::runner::{ConcurrentSpecification, ExecutionResult, Runner, RunnerError, RunnerResult};
use crate::verifier::Verifier;

/// The outcome of one invocation, generalizing [`RunnerError`] with the
/// strategy-specific obstruction-freedom violation.
#[derive(Debug)]
pub enum InvocationOutcome {
    /// The invocation completed; here is its result.
    Completed(ExecutionResult),
    /// No worker made progress within the wall-clock budget.
    Deadlock {
        /// Elapsed time before the watchdog gave up, in milliseconds.
        elapsed_ms: u64,
    },
    /// An actor raised an exception it did not declare as handled.
    UnexpectedException {
        /// The actor whose invocation raised the exception.
        method_id: String,
        /// The exception's message/kind.
        message: String,
    },
    /// A user-supplied validation function failed.
    ValidationFailure(String),
    /// A non-blocking operation made no progress while no other thread was
    /// runnable, under `check_obstruction_freedom`.
    ObstructionFreedomViolation,
}

fn outcome_from_runner_result(result: RunnerResult<ExecutionResult>) -> InvocationOutcome {
    match result {
        Ok(r) => InvocationOutcome::Completed(r),
        Err(RunnerError::Deadlock { elapsed_ms }) => InvocationOutcome::Deadlock { elapsed_ms },
        Err(RunnerError::UnexpectedException { method_id, message }) => {
            InvocationOutcome::UnexpectedException { method_id, message }
        }
        Err(RunnerError::ValidationFailed(message)) => InvocationOutcome::ValidationFailure(message),
    }
}

/// Drives the runner across one invocation at a time.
///
/// Implemented by [`stress::StressStrategy`] (real OS threads, scrambled
/// timing, no interleaving tree) and [`model_checking::ModelCheckingStrategy`]
/// (single-threaded cooperative scheduling, a lazily-built interleaving
/// tree).
pub trait Strategy<C: ConcurrentSpecification> {
    /// Run exactly one invocation of `scenario` against `runner`.
    fn run_invocation(
        &mut self,
        runner: &Runner<C>,
        scenario: &ExecutionScenario,
        observer: &dyn InvocationObserver,
    ) -> InvocationOutcome;

    /// Short, stable name for logging/reporting (`"stress"` /
    /// `"model-checking"`).
    fn name(&self) -> &'static str;

    /// Number of invocations to run per iteration before giving up without
    /// a failure.
    fn invocations_per_iteration(&self) -> usize;
}

/// Run one full iteration: repeat invocations of `scenario` until either
/// `invocations_per_iteration` is exhausted or a [`LincheckFailure`] is
/// produced. Both strategies exit on the same condition; model-checking
/// additionally exits on tree exhaustion, which it reports as an empty
/// `invocations_per_iteration` once `root` is fully explored.
///
/// # Errors
///
/// Returns `Err` only if the verifier itself fails to check a result
/// (malformed scenario/result shape); this is a developer error distinct
/// from `Some(LincheckFailure)`, propagated rather than swallowed.
pub fn run_iteration<C, S, V>(
    strategy: &mut S,
    runner: &Runner<C>,
    scenario: &ExecutionScenario,
    verifier: &V,
    observer: &dyn InvocationObserver,
) -> crate::verifier::VerifierResult<Option<LincheckFailure>>
where
    C: ConcurrentSpecification,
    S: Strategy<C> + ?Sized,
    V: Verifier,
{
    for _ in 0..strategy.invocations_per_iteration() {
        match strategy.run_invocation(runner, scenario, observer) {
            InvocationOutcome::Completed(result) => {
                if !verifier.verify(scenario, &result)? {
                    return Ok(Some(LincheckFailure::incorrect_results(scenario.clone(), result, Vec::new())));
                }
            }
            InvocationOutcome::Deadlock { elapsed_ms } => {
                return Ok(Some(LincheckFailure::deadlock(scenario.clone(), elapsed_ms, Vec::new())));
            }
            InvocationOutcome::UnexpectedException { method_id, message } => {
                return Ok(Some(LincheckFailure::unexpected_exception(scenario.clone(), method_id, message)));
            }
            InvocationOutcome::ValidationFailure(message) => {
                return Ok(Some(LincheckFailure::validation_failure(scenario.clone(), message)));
            }
            InvocationOutcome::ObstructionFreedomViolation => {
                return Ok(Some(LincheckFailure::obstruction_freedom_violation(scenario.clone(), Vec::new())));
            }
        }
    }
    Ok(None)
}
