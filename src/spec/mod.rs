//! Sequential specification & LTS.
//!
//! The sequential specification is a reference implementation of the data
//! type under test: constructible in a known initial state, and able to
//! apply one actor at a time. States are collapsed into a runtime-interned
//! arena rather than represented as compile-time phantom states (see
//! [`lts`]).

pub mod lts;

use thiserror::Error;

use crate::actor::Actor;
use crate::result::ActorResult;

/// An opaque handle naming a suspended invocation within the LTS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(pub u32);

/// One step of a (possibly suspendable) operation against a sequential
/// specification.
///
/// Suspendable operations are modeled as a task state machine driven
/// step-by-step by the LTS rather than through language-level coroutines:
/// `step`/`resume` either complete immediately or
/// report [`OperationStep::Suspended`], at which point the LTS allocates a
/// ticket and the specification is expected to remember enough state to
/// resume that ticket later via [`SequentialSpecification::resume`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStep {
    /// The operation completed with this result.
    Completed(ActorResult),
    /// The operation reached a suspension point and has not completed.
    Suspended,
}

/// A reference (sequential) implementation of the data type under test.
///
/// Implementors must be cheaply cloneable (the LTS clones the current state
/// before every speculative transition) and must implement `Eq`/`Hash` in a
/// way consistent with a "two states are the same equivalence class"
/// notion: two states that represent the same observable data-structure
/// contents must compare equal and hash equally, so the LTS's interning
/// table collapses them to one node.
pub trait SequentialSpecification: Clone + Eq + std::hash::Hash {
    /// Construct the initial state.
    fn initial() -> Self;

    /// Apply a non-suspendable actor, or begin a suspendable one.
    ///
    /// Implementations of suspendable operations that cannot make progress
    /// should return [`OperationStep::Suspended`]; the LTS will allocate a
    /// fresh [`Ticket`] and later call [`SequentialSpecification::resume`]
    /// with it once some other actor's transition makes it eligible again
    /// (tracked by [`SequentialSpecification::take_resumed_tickets`]).
    fn step(&mut self, actor: &Actor) -> OperationStep;

    /// Resume a previously suspended ticket. The default implementation
    /// treats resumption as an immediate cancellation, which is correct for
    /// specifications with no suspendable operations at all.
    fn resume(&mut self, ticket: Ticket) -> OperationStep {
        let _ = ticket;
        OperationStep::Completed(ActorResult::Cancelled)
    }

    /// Cancel a previously suspended ticket. The default implementation is
    /// a no-op, appropriate for
    /// specifications with no suspendable operations.
    fn cancel(&mut self, ticket: Ticket) {
        let _ = ticket;
    }

    /// Drain the set of tickets that became resumable as a side effect of
    /// the most recent `step`/`resume`/`cancel` call. The default
    /// implementation reports none, correct
    /// for specifications with no suspendable operations.
    fn take_resumed_tickets(&mut self) -> Vec<Ticket> {
        Vec::new()
    }
}

/// Errors raised by the LTS layer.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LtsError {
    /// `resume`/`cancel` was called with a ticket this LTS never issued (or
    /// already retired), indicating a bug in the calling verifier/runner
    /// code rather than in the sequential specification.
    #[error("ticket {0:?} was never issued by this LTS, or has already been retired")]
    UnknownTicket(Ticket),
}

/// Result alias for LTS operations.
pub type LtsResult<T> = Result<T, LtsError>;
