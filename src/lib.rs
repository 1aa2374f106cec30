//! lincheck-engine
//!
//! The core concurrency testing engine: given a sequential specification and
//! a set of typed operations, the engine generates random concurrent
//! scenarios, executes each scenario many times under controlled
//! interleavings, verifies every observed outcome against the sequential
//! specification to detect non-linearizable histories, and minimizes any
//! failing scenario to the smallest witness.
//!
//! ## Pipeline
//!
//! An [`generators::scenario_gen::ExecutionGenerator`] draws an
//! [`actor::ExecutionScenario`] from a pool of [`generators::ParameterGenerator`]s.
//! A [`strategy::Strategy`] (stress or model-checking) drives the
//! [`runner::Runner`] to produce an [`runner::ExecutionResult`], which the
//! [`verifier::Verifier`] checks against a [`spec::lts::Lts`] built over a
//! user-supplied [`spec::SequentialSpecification`]. On mismatch, the
//! [`failure::Minimizer`] shrinks the scenario and the pipeline re-runs.
//! [`engine::LincheckEngine`] is the one call site that owns this whole loop.
//!
//! ## Module organization
//!
//! - [`actor`]: Actor & Scenario model (typed, immutable test programs).
//! - [`generators`]: Parameter generators (deterministic PRNG value streams).
//! - [`spec`]: Sequential specification trait and the hash-consed LTS.
//! - [`verifier`]: Cached, happens-before-filtered linearizability checker.
//! - [`runner`]: Parallel executor producing results with vector clocks.
//! - [`strategy`]: Stress and model-checking exploration strategies.
//! - [`failure`]: Failure taxonomy and the greedy scenario minimizer.
//! - [`config`]: The engine's configuration surface.
//! - [`observer`]: Observer hook left in place of out-of-scope subsystems.
//! - [`error`]: The crate-wide error channel.
//! - [`engine`]: The public orchestration entry point, [`engine::LincheckEngine::run`].
//!
//! Out of scope: bytecode instrumentation, reflection-based
//! parameter-generator extraction, failure-report serialization,
//! build/packaging, logging setup, plotting, and the
//! distributed-simulation/fuzzing subsystems. Each is represented, where the
//! core consumes it, only by [`observer::InvocationObserver`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(missing_docs)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod actor;
pub mod config;
pub mod engine;
pub mod error;
pub mod failure;
pub mod generators;
pub mod observer;
pub mod result;
pub mod runner;
pub mod spec;
pub mod strategy;
pub mod verifier;

pub use error::{EngineError, EngineResult};
pub use result::ActorResult;

/// Commonly used items, re-exported for a single glob import.
pub mod prelude {
    pub use crate::actor::{Actor, ActorFlags, ExecutionScenario};
    pub use crate::config::LincheckConfig;
    pub use crate::engine::LincheckEngine;
    pub use crate::error::{EngineError, EngineResult};
    pub use crate::failure::{LincheckFailure, Minimizer};
    pub use crate::generators::scenario_gen::ExecutionGenerator;
    pub use crate::generators::ParameterGenerator;
    pub use crate::observer::{InvocationObserver, NullObserver};
    pub use crate::result::ActorResult;
    pub use crate::runner::{ExecutionResult, HBClock, Runner};
    pub use crate::spec::lts::Lts;
    pub use crate::spec::SequentialSpecification;
    pub use crate::strategy::model_checking::ModelCheckingStrategy;
    pub use crate::strategy::stress::StressStrategy;
    pub use crate::strategy::Strategy;
    pub use crate::verifier::{LinearizabilityVerifier, Verifier};
}
