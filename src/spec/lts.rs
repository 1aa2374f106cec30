//! The hash-consed labeled transition system over a sequential specification.
//!
//! States form the nodes of the LTS; transitions are `(Actor, ticket) ->
//! TransitionInfo` edges. States are never referenced directly: the LTS
//! owns a slab of states and hands out 32-bit [`StateId`]s, and
//! [`TransitionInfo`] names its destination by id.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;

use crate::actor::{Actor, Value};
use crate::result::ActorResult;
use crate::spec::{LtsError, LtsResult, OperationStep, SequentialSpecification, Ticket};

/// A 32-bit handle to an interned [`SequentialSpecification`] state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

/// One LTS edge: `(next_state, result, ticket, resumed_tickets,
/// ticket_remap)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionInfo {
    /// The state this transition leads to.
    pub next_state: StateId,
    /// The result the transition produced.
    pub result: ActorResult,
    /// A fresh ticket naming this invocation, if it suspended.
    pub ticket: Option<Ticket>,
    /// Tickets that became resumable as a side effect of this transition.
    pub resumed_tickets: Vec<Ticket>,
    /// Tickets that survived this transition under a new identity (e.g. a
    /// resumed-but-still-suspended operation keeps running under a fresh
    /// ticket bound to the post-transition state).
    pub ticket_remap: HashMap<Ticket, Ticket>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TransitionKey {
    state: StateId,
    method_id: String,
    args: Vec<Value>,
    ticket: Option<Ticket>,
}

struct LtsInner<S> {
    arena: Vec<S>,
    index: HashMap<S, StateId>,
    cache: HashMap<TransitionKey, TransitionInfo>,
    live_tickets: HashSet<Ticket>,
    next_ticket: u32,
}

impl<S: SequentialSpecification> LtsInner<S> {
    fn new() -> Self {
        let initial = S::initial();
        let mut arena = Vec::new();
        let mut index = HashMap::new();
        arena.push(initial.clone());
        index.insert(initial, StateId(0));
        Self { arena, index, cache: HashMap::new(), live_tickets: HashSet::new(), next_ticket: 0 }
    }

    fn intern(&mut self, state: S) -> StateId {
        if let Some(&id) = self.index.get(&state) {
            return id;
        }
        #[allow(clippy::cast_possible_truncation)]
        let id = StateId(self.arena.len() as u32);
        self.arena.push(state.clone());
        self.index.insert(state, id);
        id
    }

    fn alloc_ticket(&mut self) -> Ticket {
        let t = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.live_tickets.insert(t);
        t
    }
}

/// The LTS: one canonical [`SequentialSpecification`] instance per
/// equivalence class, transitions computed lazily and cached.
///
/// Locking: LTS construction is process-wide; a mutex guards the intern
/// table. The whole inner table (arena, intern index, transition cache,
/// live tickets) is a single [`Mutex`], owned by exactly one long-lived
/// object and mutated behind it.
pub struct Lts<S: SequentialSpecification> {
    inner: Mutex<LtsInner<S>>,
}

impl<S: SequentialSpecification> Default for Lts<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SequentialSpecification> Lts<S> {
    /// Construct a new LTS, interning the initial state at [`StateId(0)`].
    #[must_use]
    pub fn new() -> Self {
        Self { inner: Mutex::new(LtsInner::new()) }
    }

    /// The initial state's id. States are never destroyed within a test
    /// run, so this id is always valid for the lifetime of the LTS.
    #[must_use]
    pub const fn initial_state(&self) -> StateId {
        StateId(0)
    }

    /// Number of distinct equivalence classes interned so far.
    #[must_use]
    pub fn state_count(&self) -> usize {
        let inner = lock(&self.inner);
        inner.arena.len()
    }

    /// Compute (or fetch from cache) the transition for `actor` from
    /// `parent`, given the thread's current `ticket` (if it is resuming a
    /// previously suspended invocation rather than starting a fresh one).
    ///
    /// # Errors
    ///
    /// Returns [`LtsError::UnknownTicket`] if `ticket` is `Some` but was
    /// never issued by this LTS (or has already been retired by a
    /// cancellation or a completed resume).
    pub fn transition(
        &self,
        parent: StateId,
        actor: &Actor,
        ticket: Option<Ticket>,
    ) -> LtsResult<TransitionInfo> {
        let mut inner = lock(&self.inner);

        if let Some(t) = ticket {
            if !inner.live_tickets.contains(&t) {
                return Err(LtsError::UnknownTicket(t));
            }
        }

        let key = TransitionKey {
            state: parent,
            method_id: actor.method_id().to_string(),
            args: actor.args().to_vec(),
            ticket,
        };
        if let Some(cached) = inner.cache.get(&key) {
            #[cfg(feature = "logging")]
            log::trace!("lts: cache hit for {}@{:?}", actor.method_id(), parent);
            return Ok(cached.clone());
        }

        #[allow(clippy::indexing_slicing)]
        let mut clone = inner.arena[parent.0 as usize].clone();
        let step = match ticket {
            Some(t) => clone.resume(t),
            None => clone.step(actor),
        };
        let resumed_tickets = clone.take_resumed_tickets();

        let (result, new_ticket) = match step {
            OperationStep::Completed(result) => (result, None),
            OperationStep::Suspended => {
                let t = inner.alloc_ticket();
                (ActorResult::Suspended, Some(t))
            }
        };

        let mut ticket_remap = HashMap::new();
        if let (Some(old), Some(new)) = (ticket, new_ticket) {
            ticket_remap.insert(old, new);
        }
        if let Some(old) = ticket {
            if new_ticket.is_none() {
                inner.live_tickets.remove(&old);
            }
        }

        let next_state = inner.intern(clone);
        let info =
            TransitionInfo { next_state, result, ticket: new_ticket, resumed_tickets, ticket_remap };
        inner.cache.insert(key, info.clone());
        Ok(info)
    }

    /// Compute the transition for cancelling a suspended `ticket` on top of
    /// `parent`: discards the paused continuation and proceeds.
    ///
    /// # Errors
    ///
    /// Returns [`LtsError::UnknownTicket`] if `ticket` was never issued by
    /// this LTS or has already been retired.
    pub fn cancellation_transition(&self, parent: StateId, ticket: Ticket) -> LtsResult<TransitionInfo> {
        let mut inner = lock(&self.inner);
        if !inner.live_tickets.contains(&ticket) {
            return Err(LtsError::UnknownTicket(ticket));
        }

        let key = TransitionKey {
            state: parent,
            method_id: "@cancel".to_string(),
            args: vec![Value::Int(i64::from(ticket.0))],
            ticket: Some(ticket),
        };
        if let Some(cached) = inner.cache.get(&key) {
            return Ok(cached.clone());
        }

        #[allow(clippy::indexing_slicing)]
        let mut clone = inner.arena[parent.0 as usize].clone();
        clone.cancel(ticket);
        let resumed_tickets = clone.take_resumed_tickets();
        inner.live_tickets.remove(&ticket);

        let next_state = inner.intern(clone);
        let info = TransitionInfo {
            next_state,
            result: ActorResult::Cancelled,
            ticket: None,
            resumed_tickets,
            ticket_remap: HashMap::new(),
        };
        inner.cache.insert(key, info.clone());
        Ok(info)
    }
}

#[allow(clippy::expect_used)]
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // The LTS mutex is only ever held for the short, panic-free duration of
    // a single transition computation; a poisoned lock means a prior
    // transition panicked, which is itself a developer error worth
    // propagating loudly rather than silently ignoring.
    mutex.lock().expect("lts mutex poisoned by a prior panic")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorFlags;

    #[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
    struct Counter {
        value: i64,
    }

    impl SequentialSpecification for Counter {
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
                other => panic!("unknown method {other}"),
            }
        }
    }

    fn actor(name: &str) -> Actor {
        Actor::new(name, vec![], ActorFlags::default())
    }

    #[test]
    fn initial_state_is_interned_at_zero() {
        let lts: Lts<Counter> = Lts::new();
        assert_eq!(lts.initial_state(), StateId(0));
        assert_eq!(lts.state_count(), 1);
    }

    #[test]
    fn repeated_inc_reaches_same_state_class_via_different_paths() {
        let lts: Lts<Counter> = Lts::new();
        let s0 = lts.initial_state();
        let t1 = lts.transition(s0, &actor("inc"), None).expect("transitions");
        let t2 = lts.transition(s0, &actor("inc"), None).expect("transitions");
        // Same (state, actor, ticket) key -> identical cached transition.
        assert_eq!(t1.next_state, t2.next_state);
        assert_eq!(t1.result, ActorResult::Void);
    }

    #[test]
    fn get_reflects_prior_inc() {
        let lts: Lts<Counter> = Lts::new();
        let s0 = lts.initial_state();
        let after_inc = lts.transition(s0, &actor("inc"), None).expect("transitions").next_state;
        let got = lts.transition(after_inc, &actor("get"), None).expect("transitions");
        assert_eq!(got.result, ActorResult::Value(Value::Int(1)));
    }

    #[test]
    fn unknown_ticket_is_rejected() {
        let lts: Lts<Counter> = Lts::new();
        let s0 = lts.initial_state();
        let err = lts.transition(s0, &actor("get"), Some(Ticket(999))).unwrap_err();
        assert_eq!(err, LtsError::UnknownTicket(Ticket(999)));
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
    struct Semaphore {
        permits: i64,
        waiters: Vec<Ticket>,
        resumed: Vec<Ticket>,
    }

    impl SequentialSpecification for Semaphore {
        fn initial() -> Self {
            Self { permits: 0, waiters: Vec::new(), resumed: Vec::new() }
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
                other => panic!("unknown method {other}"),
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
    fn acquire_with_no_permits_suspends_and_allocates_a_ticket() {
        let lts: Lts<Semaphore> = Lts::new();
        let s0 = lts.initial_state();
        let t = lts.transition(s0, &actor("acquire"), None).expect("transitions");
        assert_eq!(t.result, ActorResult::Suspended);
        assert!(t.ticket.is_some());
    }

    #[test]
    fn cancellation_retires_the_ticket() {
        let lts: Lts<Semaphore> = Lts::new();
        let s0 = lts.initial_state();
        let t = lts.transition(s0, &actor("acquire"), None).expect("transitions");
        let ticket = t.ticket.expect("suspended");
        let cancelled = lts.cancellation_transition(t.next_state, ticket).expect("cancels");
        assert_eq!(cancelled.result, ActorResult::Cancelled);
        let err = lts.cancellation_transition(cancelled.next_state, ticket).unwrap_err();
        assert_eq!(err, LtsError::UnknownTicket(ticket));
    }
}
