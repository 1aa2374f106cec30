//! Actor & Scenario model.
//!
//! An [`Actor`] is an immutable invocation record: a method id, its typed
//! arguments, and the flags that govern how the runner and verifier treat
//! it. An [`ExecutionScenario`] is an immutable init/parallel/post triple of
//! actors; all mutation happens by constructing a new scenario (mirrors
//! `SmnTin-lincheck`'s `Scenario<Op>` init/parallel/post triple, generalized
//! to carry flags and a method id rather than a single `Op` value).

use std::collections::HashSet;
use std::fmt;

use thiserror::Error;

/// Opaque, engine-agnostic argument or return value.
///
/// The core treats these as opaque; equality/hash are only used by the LTS's
/// state interning and by the verifier's result comparison, never by the
/// scenario model itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// A unit value (used for the thread-id sentinel's absence, etc).
    Unit,
    /// A boolean.
    Bool(bool),
    /// A 64-bit signed integer (covers both the int-range and long-range
    /// parameter generator kinds).
    Int(i64),
    /// A string.
    Str(String),
    /// An exception/enum discriminant name, for enum-choice generators.
    Symbol(String),
}

/// A named, user-declared exception kind that an actor is willing to accept
/// as a normal outcome rather than as an unexpected failure.
pub type ExceptionKind = String;

/// Flags governing how the runner and verifier treat a single actor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorFlags {
    /// If the actor suspends, a later cancellation transition is legal.
    pub cancel_on_suspension: bool,
    /// A spurious extra suspension before cancellation is not a failure.
    pub allow_extra_suspension: bool,
    /// The actor may block the calling thread (e.g. on a lock).
    pub blocking: bool,
    /// The actor may cause *other* actors to block.
    pub causes_blocking: bool,
    /// Cancellation is legal even before the operation's own cleanup runs.
    pub prompt_cancellation: bool,
    /// The backing parameter generator may only be drawn from once.
    pub use_once: bool,
    /// The actor's operation is a suspendable (coroutine-like) operation.
    pub is_suspendable: bool,
    /// Eligible for out-of-order execution under the quiescent-consistency
    /// verifier variant. Ignored by the full linearizability verifier.
    pub quiescent_consistent: bool,
}

/// The set of exception kinds this actor treats as a result rather than a
/// failure.
pub type HandledExceptions = HashSet<ExceptionKind>;

/// An immutable invocation: a method id, ordered typed arguments, and flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    method_id: String,
    args: Vec<Value>,
    flags: ActorFlags,
    handled_exceptions: HandledExceptions,
    /// Name of the non-parallel group this actor's generator belongs to, if
    /// any; all actors of one group run on the same thread.
    non_parallel_group: Option<String>,
}

impl Actor {
    /// Construct a new actor. Actors are immutable after construction.
    #[must_use]
    pub fn new(method_id: impl Into<String>, args: Vec<Value>, flags: ActorFlags) -> Self {
        Self {
            method_id: method_id.into(),
            args,
            flags,
            handled_exceptions: HandledExceptions::new(),
            non_parallel_group: None,
        }
    }

    /// Attach the set of exception kinds this actor treats as a result.
    #[must_use]
    pub fn with_handled_exceptions(mut self, kinds: HandledExceptions) -> Self {
        self.handled_exceptions = kinds;
        self
    }

    /// Attach a non-parallel group name.
    #[must_use]
    pub fn with_non_parallel_group(mut self, group: impl Into<String>) -> Self {
        self.non_parallel_group = Some(group.into());
        self
    }

    /// The method id this actor invokes.
    #[must_use]
    pub fn method_id(&self) -> &str {
        &self.method_id
    }

    /// The actor's ordered argument list.
    #[must_use]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// The actor's flags.
    #[must_use]
    pub const fn flags(&self) -> &ActorFlags {
        &self.flags
    }

    /// Whether this actor is a suspendable (coroutine-like) operation.
    #[must_use]
    pub const fn is_suspendable(&self) -> bool {
        self.flags.is_suspendable
    }

    /// Whether `kind` is one of this actor's declared handled exceptions.
    #[must_use]
    pub fn handles_exception(&self, kind: &str) -> bool {
        self.handled_exceptions.contains(kind)
    }

    /// The non-parallel group this actor's generator belongs to, if any.
    #[must_use]
    pub fn non_parallel_group(&self) -> Option<&str> {
        self.non_parallel_group.as_deref()
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.method_id)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match arg {
                Value::Unit => write!(f, "()")?,
                Value::Bool(b) => write!(f, "{b}")?,
                Value::Int(n) => write!(f, "{n}")?,
                Value::Str(s) | Value::Symbol(s) => write!(f, "{s:?}")?,
            }
        }
        write!(f, ")")
    }
}

/// Errors raised while constructing or validating an [`ExecutionScenario`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ScenarioError {
    /// The parallel part contained no non-empty threads.
    #[error("parallel part must contain at least one non-empty thread")]
    EmptyParallelPart,

    /// A suspendable actor was placed in the init part.
    #[error("init part may not contain suspendable actors")]
    SuspendableInInit,

    /// The parallel part contains a suspendable actor but the post part is
    /// non-empty.
    #[error("post part must be empty when the parallel part has a suspendable actor")]
    PostPartNotEmptyWithSuspension,
}

/// Result alias for scenario construction/validation.
pub type ScenarioResult<T> = Result<T, ScenarioError>;

/// An immutable init/parallel/post test program.
///
/// Invariant: `init ∥ ∀t∈parallel ∥ post` are non-overlapping; the parallel
/// part is non-empty. Construction always validates this invariant; there is
/// no way to obtain an [`ExecutionScenario`] that violates it.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionScenario {
    init: Vec<Actor>,
    parallel: Vec<Vec<Actor>>,
    post: Vec<Actor>,
}

impl ExecutionScenario {
    /// Construct a new scenario, validating its structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError`] if the parallel part is empty, if the init
    /// part contains a suspendable actor, or if the post part is non-empty
    /// while any parallel actor is suspendable.
    pub fn new(init: Vec<Actor>, parallel: Vec<Vec<Actor>>, post: Vec<Actor>) -> ScenarioResult<Self> {
        let scenario = Self { init, parallel, post };
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> ScenarioResult<()> {
        if self.is_parallel_empty() {
            return Err(ScenarioError::EmptyParallelPart);
        }
        if self.init.iter().any(Actor::is_suspendable) {
            return Err(ScenarioError::SuspendableInInit);
        }
        if self.has_suspendable() && !self.post.is_empty() {
            return Err(ScenarioError::PostPartNotEmptyWithSuspension);
        }
        Ok(())
    }

    /// Whether this scenario satisfies all structural invariants. Since
    /// [`ExecutionScenario::new`] always validates, this only re-validates
    /// after an external mutation path (e.g. the minimizer pruning empty
    /// threads) and is kept as an explicit, named predicate for callers that
    /// hold onto a scenario across such a mutation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// True iff every thread in the parallel part is empty (or there are no
    /// threads at all).
    #[must_use]
    pub fn is_parallel_empty(&self) -> bool {
        self.parallel.iter().all(Vec::is_empty)
    }

    /// True iff any actor anywhere in the scenario is suspendable.
    #[must_use]
    pub fn has_suspendable(&self) -> bool {
        self.init.iter().any(Actor::is_suspendable)
            || self.parallel.iter().flatten().any(Actor::is_suspendable)
            || self.post.iter().any(Actor::is_suspendable)
    }

    /// The sequential init part.
    #[must_use]
    pub fn init(&self) -> &[Actor] {
        &self.init
    }

    /// The parallel part: one ordered actor list per thread.
    #[must_use]
    pub fn parallel(&self) -> &[Vec<Actor>] {
        &self.parallel
    }

    /// The sequential post part.
    #[must_use]
    pub fn post(&self) -> &[Actor] {
        &self.post
    }

    /// Number of parallel threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.parallel.len()
    }

    /// Total number of actors across init, parallel, and post parts.
    #[must_use]
    pub fn total_actor_count(&self) -> usize {
        self.init.len() + self.parallel.iter().map(Vec::len).sum::<usize>() + self.post.len()
    }

    /// Project the scenario onto a single logical thread id, following the
    /// verifier's numbering: `0` is init, `1..=threads` are the parallel
    /// threads, `threads + 1` is post.
    #[must_use]
    pub fn actors_for_thread(&self, thread: usize) -> &[Actor] {
        if thread == 0 {
            &self.init
        } else if thread <= self.parallel.len() {
            &self.parallel[thread - 1]
        } else {
            &self.post
        }
    }

    /// `threads + 1`: the total number of logical threads this scenario
    /// spans, including the synthetic init (`0`) and post (`threads + 1`)
    /// threads used by the verifier.
    #[must_use]
    pub fn logical_thread_count(&self) -> usize {
        self.parallel.len() + 2
    }

    /// Build a new scenario with the actor at `(thread, index)` removed,
    /// pruning the thread from the parallel part if it becomes empty. Used
    /// by the greedy minimizer. `thread` follows the verifier's numbering
    /// scheme (0 = init, `threads+1` = post).
    ///
    /// Returns `None` if the removal would violate scenario invariants that
    /// cannot be repaired by pruning (e.g. removing the last actor from the
    /// only non-empty parallel thread).
    #[must_use]
    pub fn without_actor(&self, thread: usize, index: usize) -> Option<Self> {
        let mut init = self.init.clone();
        let mut parallel = self.parallel.clone();
        let mut post = self.post.clone();

        if thread == 0 {
            if index >= init.len() {
                return None;
            }
            init.remove(index);
        } else if thread <= parallel.len() {
            let lane = &mut parallel[thread - 1];
            if index >= lane.len() {
                return None;
            }
            lane.remove(index);
        } else {
            if index >= post.len() {
                return None;
            }
            post.remove(index);
        }

        parallel.retain(|lane| !lane.is_empty());
        Self::new(init, parallel, post).ok()
    }

    /// Render the scenario as a pretty-printed per-thread table, in the
    /// boxed style grounded on the `SmnTin-lincheck` crate's
    /// execution-trace renderer.
    #[must_use]
    pub fn fmt_table(&self) -> String {
        let mut out = String::new();
        render_part(&mut out, "INIT PART", std::slice::from_ref(&self.init));
        render_part(&mut out, "PARALLEL PART", &self.parallel);
        render_part(&mut out, "POST PART", std::slice::from_ref(&self.post));
        out
    }
}

fn render_part(out: &mut String, title: &str, lanes: &[Vec<Actor>]) {
    out.push_str(title);
    out.push('\n');
    for (i, lane) in lanes.iter().enumerate() {
        out.push_str(&format!("  thread {i}:\n"));
        for actor in lane {
            out.push_str(&format!("    {actor}\n"));
        }
    }
}

impl fmt::Display for ExecutionScenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fmt_table())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(name: &str) -> Actor {
        Actor::new(name, vec![], ActorFlags::default())
    }

    fn suspendable_actor(name: &str) -> Actor {
        Actor::new(name, vec![], ActorFlags { is_suspendable: true, ..ActorFlags::default() })
    }

    #[test]
    fn valid_scenario_constructs() {
        let scenario =
            ExecutionScenario::new(vec![actor("init")], vec![vec![actor("a")]], vec![actor("post")]);
        assert!(scenario.is_ok());
        assert!(scenario.expect("valid").is_valid());
    }

    #[test]
    fn empty_parallel_part_rejected() {
        let err = ExecutionScenario::new(vec![], vec![vec![]], vec![]).unwrap_err();
        assert_eq!(err, ScenarioError::EmptyParallelPart);
    }

    #[test]
    fn no_threads_at_all_rejected() {
        let err = ExecutionScenario::new(vec![], vec![], vec![]).unwrap_err();
        assert_eq!(err, ScenarioError::EmptyParallelPart);
    }

    #[test]
    fn suspendable_actor_in_init_rejected() {
        let err =
            ExecutionScenario::new(vec![suspendable_actor("x")], vec![vec![actor("a")]], vec![])
                .unwrap_err();
        assert_eq!(err, ScenarioError::SuspendableInInit);
    }

    #[test]
    fn suspendable_parallel_actor_requires_empty_post() {
        let err = ExecutionScenario::new(
            vec![],
            vec![vec![suspendable_actor("a")]],
            vec![actor("post")],
        )
        .unwrap_err();
        assert_eq!(err, ScenarioError::PostPartNotEmptyWithSuspension);
    }

    #[test]
    fn suspendable_parallel_actor_with_empty_post_ok() {
        let scenario =
            ExecutionScenario::new(vec![], vec![vec![suspendable_actor("a")]], vec![]);
        assert!(scenario.is_ok());
    }

    #[test]
    fn without_actor_prunes_empty_threads() {
        let scenario = ExecutionScenario::new(
            vec![],
            vec![vec![actor("a")], vec![actor("b")]],
            vec![],
        )
        .expect("valid");
        let shrunk = scenario.without_actor(1, 0).expect("still valid");
        assert_eq!(shrunk.thread_count(), 1);
        assert_eq!(shrunk.total_actor_count(), 1);
    }

    #[test]
    fn without_actor_returns_none_if_it_would_empty_all_threads() {
        let scenario = ExecutionScenario::new(vec![], vec![vec![actor("a")]], vec![]).expect("valid");
        assert!(scenario.without_actor(1, 0).is_none());
    }

    #[test]
    fn actors_for_thread_follows_verifier_numbering() {
        let scenario = ExecutionScenario::new(
            vec![actor("i")],
            vec![vec![actor("a")], vec![actor("b")]],
            vec![actor("p")],
        )
        .expect("valid");
        assert_eq!(scenario.actors_for_thread(0).len(), 1);
        assert_eq!(scenario.actors_for_thread(1)[0].method_id(), "a");
        assert_eq!(scenario.actors_for_thread(2)[0].method_id(), "b");
        assert_eq!(scenario.actors_for_thread(3)[0].method_id(), "p");
        assert_eq!(scenario.logical_thread_count(), 4);
    }

    #[test]
    fn fmt_table_contains_method_ids() {
        let scenario =
            ExecutionScenario::new(vec![actor("add")], vec![vec![actor("poll")]], vec![])
                .expect("valid");
        let table = scenario.fmt_table();
        assert!(table.contains("add"));
        assert!(table.contains("poll"));
    }
}
