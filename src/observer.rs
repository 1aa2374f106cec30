//! `InvocationObserver` hook.
//!
//! Distributed-simulation and plot-emitting sinks are out of scope for this
//! engine; the only surface the core exposes where a consumer might want to
//! plug one in is this observer trait: a set of default-no-op callbacks the
//! runner and the model-checking strategy invoke at invocation boundaries
//! and at every recorded switch point.

use crate::actor::ExecutionScenario;
use crate::runner::ExecutionResult;

/// Observes the lifecycle of one invocation.
///
/// All methods default to doing nothing; implementors override only the
/// callbacks they care about.
pub trait InvocationObserver {
    /// Called once, before the init part of an invocation begins.
    fn on_invocation_start(&self, _scenario: &ExecutionScenario) {}

    /// Called once, after an invocation completes (successfully or not).
    fn on_invocation_end(&self, _scenario: &ExecutionScenario, _result: Option<&ExecutionResult>) {}

    /// Called by the model-checking strategy at every recorded interleaving
    /// switch point: `from`/`to` are logical thread ids.
    fn on_switch_point(&self, _from: usize, _to: usize) {}
}

/// The default observer: every callback is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl InvocationObserver for NullObserver {}

/// An observer that forwards every callback to the `log` facade, gated behind
/// the crate's `logging` feature.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl InvocationObserver for LoggingObserver {
    fn on_invocation_start(&self, scenario: &ExecutionScenario) {
        #[cfg(feature = "logging")]
        log::debug!("invocation start: {} actors", scenario.total_actor_count());
        #[cfg(not(feature = "logging"))]
        let _ = scenario;
    }

    fn on_invocation_end(&self, scenario: &ExecutionScenario, result: Option<&ExecutionResult>) {
        #[cfg(feature = "logging")]
        log::debug!(
            "invocation end: {} actors, {}",
            scenario.total_actor_count(),
            if result.is_some() { "completed" } else { "failed" }
        );
        #[cfg(not(feature = "logging"))]
        let _ = (scenario, result);
    }

    fn on_switch_point(&self, from: usize, to: usize) {
        #[cfg(feature = "logging")]
        log::trace!("switch point: thread {from} -> thread {to}");
        #[cfg(not(feature = "logging"))]
        let _ = (from, to);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, ActorFlags};

    #[test]
    fn null_observer_accepts_all_callbacks() {
        let scenario =
            ExecutionScenario::new(vec![], vec![vec![Actor::new("a", vec![], ActorFlags::default())]], vec![])
                .expect("valid");
        let observer = NullObserver;
        observer.on_invocation_start(&scenario);
        observer.on_invocation_end(&scenario, None);
        observer.on_switch_point(0, 1);
    }

    #[test]
    fn logging_observer_accepts_all_callbacks() {
        let scenario =
            ExecutionScenario::new(vec![], vec![vec![Actor::new("a", vec![], ActorFlags::default())]], vec![])
                .expect("valid");
        let observer = LoggingObserver;
        observer.on_invocation_start(&scenario);
        observer.on_invocation_end(&scenario, None);
        observer.on_switch_point(0, 1);
    }
}
