//! Crate-wide error channel.
//!
//! Every subsystem owns its own small `thiserror` enum next to the module it
//! guards (`actor::ScenarioError`, `spec::LtsError`, ...).
//! [`EngineError`] aggregates them with `#[from]` for the one public
//! orchestration entry point that ties the whole pipeline together.
//!
//! Engine-internal assertion violations (e.g. a sequential specification
//! that is not actually deterministic) are not represented here: they are
//! developer errors, surfaced through `debug_assert!` rather than as a
//! value of this enum.

use thiserror::Error;

use crate::actor::ScenarioError;
use crate::generators::scenario_gen::ExecutionGeneratorError;
use crate::generators::GeneratorError;
use crate::runner::RunnerError;
use crate::spec::LtsError;
use crate::verifier::VerifierError;

/// Top-level error type for the engine's public orchestration entry points.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A scenario failed its structural validity checks.
    #[error("invalid scenario: {0}")]
    Scenario(#[from] ScenarioError),

    /// A parameter generator could not produce a value.
    #[error("generator error: {0}")]
    Generator(#[from] GeneratorError),

    /// The execution generator failed to draw a scenario.
    #[error("scenario generation failed: {0}")]
    Generation(#[from] ExecutionGeneratorError),

    /// The sequential specification / LTS reported an error.
    #[error("sequential specification error: {0}")]
    Lts(#[from] LtsError),

    /// The verifier could not check a scenario/result pair.
    #[error("verifier error: {0}")]
    Verifier(#[from] VerifierError),

    /// The runner failed to execute an invocation.
    #[error("runner error: {0}")]
    Runner(#[from] RunnerError),
}

/// Convenience alias for fallible engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
