//! Linearizability verifier.
//!
//! A [`Verifier`] accepts `(scenario, ExecutionResult)` and answers
//! *linearizable?*, via a per-thread happens-before DFS this module
//! implements against [`crate::spec::lts::Lts`].

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;

use thiserror::Error;

use crate::actor::{Actor, ExecutionScenario};
use crate::result::ActorResult;
use crate::runner::{ExecutionResult, ResultWithClock};
use crate::spec::lts::{Lts, StateId};
use crate::spec::{SequentialSpecification, Ticket};

/// Errors raised while checking a scenario/result pair.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerifierError {
    /// `result`'s shape (per-lane actor counts) does not match `scenario`.
    #[error("result shape does not match scenario: {0}")]
    ShapeMismatch(String),
}

/// Result alias for verifier operations.
pub type VerifierResult<T> = Result<T, VerifierError>;

/// Checks whether an observed [`ExecutionResult`] is a legal outcome of
/// running `scenario`.
pub trait Verifier {
    /// Check `result` against `scenario`.
    ///
    /// # Errors
    ///
    /// Returns [`VerifierError::ShapeMismatch`] if `result`'s per-phase
    /// actor counts don't match `scenario`'s.
    fn verify(&self, scenario: &ExecutionScenario, result: &ExecutionResult) -> VerifierResult<bool>;
}

fn check_shape(scenario: &ExecutionScenario, result: &ExecutionResult) -> VerifierResult<()> {
    if result.init().len() != scenario.init().len() {
        return Err(VerifierError::ShapeMismatch(format!(
            "init: scenario has {} actors, result has {}",
            scenario.init().len(),
            result.init().len()
        )));
    }
    if result.post().len() != scenario.post().len() {
        return Err(VerifierError::ShapeMismatch(format!(
            "post: scenario has {} actors, result has {}",
            scenario.post().len(),
            result.post().len()
        )));
    }
    if result.parallel().len() != scenario.parallel().len() {
        return Err(VerifierError::ShapeMismatch(format!(
            "parallel: scenario has {} threads, result has {}",
            scenario.parallel().len(),
            result.parallel().len()
        )));
    }
    for (lane, (expected, observed)) in scenario.parallel().iter().zip(result.parallel()).enumerate() {
        if expected.len() != observed.len() {
            return Err(VerifierError::ShapeMismatch(format!(
                "parallel thread {lane}: scenario has {} actors, result has {}",
                expected.len(),
                observed.len()
            )));
        }
    }
    Ok(())
}

/// A search node: the current LTS state,
/// per-thread executed counts, suspension flags, and tickets. Threads follow
/// the verifier's numbering (0 = init, `1..=threads` = parallel, `threads+1`
/// = post).
#[derive(Debug, Clone)]
struct VerifierContext {
    state: StateId,
    executed: Vec<usize>,
    suspended: Vec<bool>,
    tickets: Vec<Option<Ticket>>,
}

impl VerifierContext {
    fn initial(initial_state: StateId, logical_threads: usize) -> Self {
        Self {
            state: initial_state,
            executed: vec![0; logical_threads],
            suspended: vec![false; logical_threads],
            tickets: vec![None; logical_threads],
        }
    }

    fn all_executed(&self, scenario: &ExecutionScenario) -> bool {
        (0..self.executed.len()).all(|t| self.executed[t] >= scenario.actors_for_thread(t).len())
    }
}

/// Whether the happens-before clock filter applies to a given actor on a
/// given search branch, distinguishing the three DFS-based verifier variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HbMode {
    /// Enforce happens-before for every parallel actor (linearizability).
    Strict,
    /// Enforce happens-before except for actors flagged
    /// `quiescent_consistent` (quiescent-consistency).
    RelaxQuiescent,
    /// Never enforce happens-before (serializability: thread-local program
    /// order is still preserved by construction, real-time order is not).
    Ignore,
}

fn hb_satisfied(mode: HbMode, actor: &Actor, clock_on_start: &crate::runner::HBClock, executed: &[usize]) -> bool {
    match mode {
        HbMode::Ignore => true,
        HbMode::RelaxQuiescent if actor.flags().quiescent_consistent => true,
        HbMode::Strict | HbMode::RelaxQuiescent => {
            (0..clock_on_start.len()).all(|j| executed[j + 1] as u32 >= clock_on_start.get(j))
        }
    }
}

fn expected_result<'r>(scenario: &ExecutionScenario, result: &'r ExecutionResult, thread: usize, idx: usize) -> &'r ActorResult {
    let threads = scenario.parallel().len();
    if thread == 0 {
        #[allow(clippy::indexing_slicing)]
        return &result.init()[idx];
    }
    if thread <= threads {
        #[allow(clippy::indexing_slicing)]
        return &result.parallel()[thread - 1][idx].result;
    }
    #[allow(clippy::indexing_slicing)]
    &result.post()[idx]
}

fn clock_on_start(result: &ExecutionResult, thread: usize, idx: usize) -> Option<&ResultWithClock> {
    result.parallel().get(thread - 1).and_then(|lane| lane.get(idx))
}

struct Search<'a, S: SequentialSpecification> {
    scenario: &'a ExecutionScenario,
    result: &'a ExecutionResult,
    lts: &'a Lts<S>,
    hb_mode: HbMode,
}

impl<S: SequentialSpecification> Search<'_, S> {
    fn run(&self, ctx: &VerifierContext) -> bool {
        if ctx.all_executed(self.scenario) {
            return true;
        }

        let threads = self.scenario.parallel().len();
        for t in 0..ctx.executed.len() {
            let actors = self.scenario.actors_for_thread(t);
            let idx = ctx.executed[t];
            if idx >= actors.len() {
                continue;
            }

            // Legal ordering: init before parallel, parallel before post.
            if (1..=threads).contains(&t) && ctx.executed[0] < self.scenario.init().len() {
                continue;
            }
            if t == threads + 1 && (1..=threads).any(|p| ctx.executed[p] < self.scenario.actors_for_thread(p).len()) {
                continue;
            }

            #[allow(clippy::indexing_slicing)]
            let actor = &actors[idx];

            if (1..=threads).contains(&t) {
                if let Some(rwc) = clock_on_start(self.result, t, idx) {
                    if !hb_satisfied(self.hb_mode, actor, &rwc.clock_on_start, &ctx.executed) {
                        continue;
                    }
                }
            }

            if ctx.suspended[t] {
                let expected = expected_result(self.scenario, self.result, t, idx);
                if actor.flags().cancel_on_suspension && *expected == ActorResult::Cancelled {
                    let Some(ticket) = ctx.tickets[t] else { continue };
                    let Ok(info) = self.lts.cancellation_transition(ctx.state, ticket) else { continue };
                    if info.result != *expected {
                        continue;
                    }
                    let child = self.advance(ctx, t, info.next_state, false, None, &info.resumed_tickets, &info.ticket_remap);
                    if self.run(&child) {
                        return true;
                    }
                }
                continue;
            }

            let expected = expected_result(self.scenario, self.result, t, idx);
            let Ok(info) = self.lts.transition(ctx.state, actor, ctx.tickets[t]) else { continue };
            if info.result != *expected {
                continue;
            }

            let still_suspended = info.result == ActorResult::Suspended;
            let next_ticket = if still_suspended { info.ticket } else { None };
            let child = self.advance(ctx, t, info.next_state, still_suspended, next_ticket, &info.resumed_tickets, &info.ticket_remap);
            if self.run(&child) {
                return true;
            }
        }
        false
    }

    #[allow(clippy::too_many_arguments)]
    fn advance(
        &self,
        ctx: &VerifierContext,
        thread: usize,
        next_state: StateId,
        still_suspended: bool,
        next_ticket: Option<Ticket>,
        resumed_tickets: &[Ticket],
        ticket_remap: &HashMap<Ticket, Ticket>,
    ) -> VerifierContext {
        let mut child = ctx.clone();
        child.state = next_state;

        if !still_suspended {
            child.executed[thread] += 1;
        }
        child.suspended[thread] = still_suspended;
        child.tickets[thread] = next_ticket;

        for slot in &mut child.tickets {
            if let Some(old) = *slot {
                if let Some(&new) = ticket_remap.get(&old) {
                    *slot = Some(new);
                }
            }
        }
        for j in 0..child.tickets.len() {
            if let Some(t) = child.tickets[j] {
                if resumed_tickets.contains(&t) {
                    child.suspended[j] = false;
                }
            }
        }
        child
    }
}

fn search<S: SequentialSpecification>(
    scenario: &ExecutionScenario,
    result: &ExecutionResult,
    lts: &Lts<S>,
    hb_mode: HbMode,
) -> VerifierResult<bool> {
    check_shape(scenario, result)?;
    let search = Search { scenario, result, lts, hb_mode };
    let initial = VerifierContext::initial(lts.initial_state(), scenario.logical_thread_count());
    Ok(search.run(&initial))
}

/// Cache layer: `scenario -> set<ExecutionResult>` of results already proven
/// linearizable, keyed by the scenario's pretty-printed table. A hit
/// short-circuits the DFS entirely.
struct VerifierCache {
    hits: Mutex<HashMap<String, HashSet<ExecutionResult>>>,
}

impl VerifierCache {
    fn new() -> Self {
        Self { hits: Mutex::new(HashMap::new()) }
    }

    #[allow(clippy::expect_used)]
    fn contains(&self, key: &str, result: &ExecutionResult) -> bool {
        let hits = self.hits.lock().expect("verifier cache mutex poisoned");
        hits.get(key).is_some_and(|set| set.contains(result))
    }

    #[allow(clippy::expect_used)]
    fn insert(&self, key: String, result: ExecutionResult) {
        let mut hits = self.hits.lock().expect("verifier cache mutex poisoned");
        hits.entry(key).or_default().insert(result);
    }
}

/// Full linearizability verifier: a cached DFS over the LTS, filtering
/// candidate transitions by the scenario's happens-before clocks.
pub struct LinearizabilityVerifier<S: SequentialSpecification> {
    lts: Lts<S>,
    cache: VerifierCache,
}

impl<S: SequentialSpecification> Default for LinearizabilityVerifier<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SequentialSpecification> LinearizabilityVerifier<S> {
    /// Construct a verifier with a fresh LTS.
    #[must_use]
    pub fn new() -> Self {
        Self { lts: Lts::new(), cache: VerifierCache::new() }
    }
}

impl<S: SequentialSpecification> Verifier for LinearizabilityVerifier<S> {
    fn verify(&self, scenario: &ExecutionScenario, result: &ExecutionResult) -> VerifierResult<bool> {
        let key = scenario.fmt_table();
        if self.cache.contains(&key, result) {
            #[cfg(feature = "logging")]
            log::trace!("verifier: cache hit for scenario with {} actors", scenario.total_actor_count());
            return Ok(true);
        }
        #[cfg(feature = "logging")]
        log::trace!("verifier: cache miss, running DFS");
        let linearizable = search(scenario, result, &self.lts, HbMode::Strict)?;
        if linearizable {
            self.cache.insert(key, result.clone());
        }
        Ok(linearizable)
    }
}

/// Permits out-of-order execution of actors flagged `quiescent_consistent`.
pub struct QuiescentConsistencyVerifier<S: SequentialSpecification> {
    lts: Lts<S>,
}

impl<S: SequentialSpecification> Default for QuiescentConsistencyVerifier<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SequentialSpecification> QuiescentConsistencyVerifier<S> {
    /// Construct a verifier with a fresh LTS.
    #[must_use]
    pub fn new() -> Self {
        Self { lts: Lts::new() }
    }
}

impl<S: SequentialSpecification> Verifier for QuiescentConsistencyVerifier<S> {
    fn verify(&self, scenario: &ExecutionScenario, result: &ExecutionResult) -> VerifierResult<bool> {
        search(scenario, result, &self.lts, HbMode::RelaxQuiescent)
    }
}

/// Flattens every actor into a single-threaded history (program order per
/// thread preserved, real-time order not enforced) and delegates to the same
/// DFS.
pub struct SerializabilityVerifier<S: SequentialSpecification> {
    lts: Lts<S>,
}

impl<S: SequentialSpecification> Default for SerializabilityVerifier<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SequentialSpecification> SerializabilityVerifier<S> {
    /// Construct a verifier with a fresh LTS.
    #[must_use]
    pub fn new() -> Self {
        Self { lts: Lts::new() }
    }
}

impl<S: SequentialSpecification> Verifier for SerializabilityVerifier<S> {
    fn verify(&self, scenario: &ExecutionScenario, result: &ExecutionResult) -> VerifierResult<bool> {
        search(scenario, result, &self.lts, HbMode::Ignore)
    }
}

/// A no-op verifier that always reports success. Used to A/B the overhead
/// of verification itself and by tests that only want to exercise the
/// runner.
#[derive(Debug, Default)]
pub struct EpsilonVerifier;

impl Verifier for EpsilonVerifier {
    fn verify(&self, _scenario: &ExecutionScenario, _result: &ExecutionResult) -> VerifierResult<bool> {
        Ok(true)
    }
}

/// Delegating impl so a runtime-selected `Box<dyn Verifier>` (the shape
/// [`crate::engine::LincheckEngine`] needs to pick a verifier from
/// [`crate::config::VerifierKind`] at runtime) can itself be used wherever a
/// `V: Verifier` bound is required.
impl Verifier for Box<dyn Verifier> {
    fn verify(&self, scenario: &ExecutionScenario, result: &ExecutionResult) -> VerifierResult<bool> {
        (**self).verify(scenario, result)
    }
}
