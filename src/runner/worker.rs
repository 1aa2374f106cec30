//! Per-worker execution and the happens-before clock bookkeeping that rides
//! along with every parallel-part result.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::actor::Actor;
use crate::result::ActorResult;
use crate::runner::{ConcurrentSpecification, RunnerConfig, RunnerError, RunnerResult, ThreadScheduler, WaitPattern};
use crate::spec::{OperationStep, Ticket};

/// A fixed-size vector of natural numbers, one slot per parallel thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct HBClock(Vec<u32>);

impl HBClock {
    /// Build a clock of `threads` zeroed slots.
    #[must_use]
    pub fn zeroed(threads: usize) -> Self {
        Self(vec![0; threads])
    }

    /// Build a clock from explicit per-thread counts (mainly for tests that
    /// construct an [`crate::runner::ExecutionResult`] by hand).
    #[must_use]
    pub fn from_counts(counts: Vec<u32>) -> Self {
        Self(counts)
    }

    /// The recorded count for thread `j`.
    #[must_use]
    pub fn get(&self, j: usize) -> u32 {
        self.0.get(j).copied().unwrap_or(0)
    }

    /// Number of slots (== thread count).
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether this clock has no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// `(Result, snapshot of the vector clock observed when the actor started)`.
/// Equality and hashing ignore the clock unless the caller explicitly asks
/// for it via [`ResultWithClock::clocks_match`].
#[derive(Debug, Clone)]
pub struct ResultWithClock {
    /// The actor's outcome.
    pub result: ActorResult,
    /// The happens-before clock snapshot taken when the actor started.
    pub clock_on_start: HBClock,
}

impl PartialEq for ResultWithClock {
    fn eq(&self, other: &Self) -> bool {
        self.result == other.result
    }
}
impl Eq for ResultWithClock {}

impl std::hash::Hash for ResultWithClock {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.result.hash(state);
    }
}

impl ResultWithClock {
    /// Whether `self` and `other` carry the same clock snapshot, in addition
    /// to the same result (they already compare equal via `PartialEq`, which
    /// ignores the clock — this helper exists so call sites can be explicit
    /// about *which* notion of equality they mean).
    #[must_use]
    pub fn clocks_match(&self, other: &Self) -> bool {
        self.clock_on_start == other.clock_on_start
    }

    /// A copy of `self` with the clock zeroed out, for
    /// `equals_ignoring_clocks`-style comparisons.
    #[must_use]
    pub fn with_empty_clock(&self) -> Self {
        Self { result: self.result.clone(), clock_on_start: HBClock::zeroed(self.clock_on_start.len()) }
    }
}

/// Results for init, parallel (with clocks), and post, plus optional state
/// snapshots at phase boundaries.
///
/// Equality ignores state snapshots, since state extraction need not be
/// deterministic across two otherwise-equal runs.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    init: Vec<ActorResult>,
    parallel: Vec<Vec<ResultWithClock>>,
    post: Vec<ActorResult>,
    state_snapshots: Vec<Option<String>>,
}

impl PartialEq for ExecutionResult {
    fn eq(&self, other: &Self) -> bool {
        self.init == other.init && self.parallel == other.parallel && self.post == other.post
    }
}
impl Eq for ExecutionResult {}

impl std::hash::Hash for ExecutionResult {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.init.hash(state);
        self.parallel.hash(state);
        self.post.hash(state);
    }
}

impl ExecutionResult {
    /// Construct a result with no state snapshots recorded.
    #[must_use]
    pub fn new(init: Vec<ActorResult>, parallel: Vec<Vec<ResultWithClock>>, post: Vec<ActorResult>) -> Self {
        Self { init, parallel, post, state_snapshots: Vec::new() }
    }

    /// Attach phase-boundary state snapshots (ignored by equality).
    #[must_use]
    pub fn with_state_snapshots(mut self, snapshots: Vec<Option<String>>) -> Self {
        self.state_snapshots = snapshots;
        self
    }

    /// Results for the init part, in order.
    #[must_use]
    pub fn init(&self) -> &[ActorResult] {
        &self.init
    }

    /// Results for the parallel part: one ordered list per thread, each
    /// entry carrying its happens-before clock.
    #[must_use]
    pub fn parallel(&self) -> &[Vec<ResultWithClock>] {
        &self.parallel
    }

    /// Results for the post part, in order.
    #[must_use]
    pub fn post(&self) -> &[ActorResult] {
        &self.post
    }

    /// Recorded state snapshots at phase boundaries, if any were taken.
    #[must_use]
    pub fn state_snapshots(&self) -> &[Option<String>] {
        &self.state_snapshots
    }

    /// A copy of `self` with every parallel clock zeroed, for
    /// `equals_ignoring_clocks`-style comparisons.
    #[must_use]
    pub fn with_empty_clocks(&self) -> Self {
        let parallel =
            self.parallel.iter().map(|lane| lane.iter().map(ResultWithClock::with_empty_clock).collect()).collect();
        Self { init: self.init.clone(), parallel, post: self.post.clone(), state_snapshots: Vec::new() }
    }

    /// Compare two results as equal while ignoring their happens-before
    /// clocks entirely.
    #[must_use]
    pub fn equals_ignoring_clocks(&self, other: &Self) -> bool {
        self.with_empty_clocks() == other.with_empty_clocks()
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new(), Vec::new())
    }
}

fn snapshot_clock(executed: &[AtomicU32], this_thread: usize) -> HBClock {
    let mut clock = vec![0; executed.len()];
    for (j, counter) in executed.iter().enumerate() {
        if j != this_thread {
            clock[j] = counter.load(Ordering::SeqCst);
        }
    }
    HBClock(clock)
}

fn classify_unexpected(actor: &Actor, step: OperationStep) -> Result<ActorResult, RunnerError> {
    match step {
        OperationStep::Completed(ActorResult::Exception(kind)) if !actor.handles_exception(&kind) => {
            Err(RunnerError::UnexpectedException { method_id: actor.method_id().to_string(), message: kind })
        }
        OperationStep::Completed(result) => Ok(result),
        OperationStep::Suspended => Ok(ActorResult::Suspended),
    }
}

/// Busy-wait for roughly `iterations` spins, scrambling timing between
/// actors per the stress strategy's wait pattern.
fn busy_wait(iterations: u32) {
    let mut sink = 0u64;
    for i in 0..iterations {
        sink = sink.wrapping_add(std::hint::black_box(u64::from(i)));
    }
    std::hint::black_box(sink);
}

/// Run one parallel lane to completion under real OS threads (stress mode),
/// recording the happens-before clock observed at the start of each actor.
/// Suspendable actors are retried via [`ConcurrentSpecification::resume`]
/// under a runner-assigned ticket until they complete, are cancelled, or the
/// invocation deadline passes.
#[allow(clippy::expect_used)]
fn draw_wait(waits: &Mutex<&mut dyn WaitPattern>, thread_id: usize) -> u32 {
    waits.lock().expect("wait pattern mutex poisoned by a prior panic").wait_iterations(thread_id)
}

pub(super) fn run_lane_stress<C: ConcurrentSpecification>(
    instance: &C,
    lane: &[Actor],
    thread_id: usize,
    executed: &Arc<Vec<AtomicU32>>,
    deadline: Instant,
    waits: &Mutex<&mut dyn WaitPattern>,
) -> Vec<ResultWithClock> {
    let mut out = Vec::with_capacity(lane.len());
    let mut next_ticket = 0u32;
    for actor in lane {
        if Instant::now() > deadline {
            out.push(ResultWithClock { result: ActorResult::NoResult, clock_on_start: HBClock::zeroed(executed.len()) });
            continue;
        }
        let clock_on_start = snapshot_clock(executed, thread_id);
        #[allow(clippy::cast_possible_wrap)]
        let mut step = instance.invoke(actor, thread_id as i64);
        let mut ticket: Option<Ticket> = None;
        while let OperationStep::Suspended = step {
            let t = *ticket.get_or_insert_with(|| {
                let t = Ticket(next_ticket);
                next_ticket += 1;
                t
            });
            if Instant::now() > deadline {
                break;
            }
            if actor.flags().cancel_on_suspension {
                instance.cancel(t);
                step = OperationStep::Completed(ActorResult::Cancelled);
                break;
            }
            let waited = draw_wait(waits, thread_id);
            busy_wait(waited.max(1));
            step = instance.resume(t);
        }
        let result = match classify_unexpected(actor, step) {
            Ok(r) => r,
            Err(_) => ActorResult::Exception("unexpected".to_string()),
        };
        out.push(ResultWithClock { result, clock_on_start });
        executed[thread_id].fetch_add(1, Ordering::SeqCst);
        let waited = draw_wait(waits, thread_id);
        if waited > 0 {
            busy_wait(waited);
        }
    }
    out
}

/// Run all parallel lanes to completion with a single logical worker active
/// at a time, chosen by `scheduler` at every actor boundary (model-checking
/// mode: single-threaded cooperative scheduling).
///
/// A thread whose current actor suspends is held at a runner-assigned
/// [`Ticket`] rather than advancing its cursor; it only becomes runnable
/// again once [`ConcurrentSpecification::take_resumed_tickets`] reports its
/// ticket resumable, or, if the actor is `cancel_on_suspension` and it is
/// the only thread left with outstanding work, via a cancellation
/// transition.
pub(super) fn run_lanes_model_checked<C: ConcurrentSpecification>(
    instance: &C,
    lanes: &[Vec<Actor>],
    scheduler: &mut dyn ThreadScheduler,
    config: &RunnerConfig,
) -> RunnerResult<Vec<Vec<ResultWithClock>>> {
    let threads = lanes.len();
    let mut cursor = vec![0usize; threads];
    let mut executed = vec![0u32; threads];
    let mut out: Vec<Vec<ResultWithClock>> = vec![Vec::new(); threads];
    let mut pending: Vec<Option<Ticket>> = vec![None; threads];
    let mut clock_on_suspend: Vec<Option<HBClock>> = vec![None; threads];
    let mut resumable: HashSet<Ticket> = HashSet::new();
    let mut next_ticket = 0u32;
    let mut stalls = 0u32;

    loop {
        let runnable: Vec<usize> = (0..threads)
            .filter(|&t| cursor[t] < lanes[t].len())
            .filter(|&t| pending[t].is_none() || pending[t].is_some_and(|tk| resumable.contains(&tk)))
            .collect();

        if runnable.is_empty() {
            // Every remaining thread is suspended and not yet resumable. If
            // exactly one is left and it permits cancellation, cancel it
            // rather than declaring a deadlock.
            let waiting: Vec<usize> = (0..threads).filter(|&t| cursor[t] < lanes[t].len()).collect();
            if let [thread] = waiting[..] {
                let actor = &lanes[thread][cursor[thread]];
                if actor.flags().cancel_on_suspension {
                    if let Some(ticket) = pending[thread] {
                        instance.cancel(ticket);
                        for t in instance.take_resumed_tickets() {
                            resumable.insert(t);
                        }
                        #[allow(clippy::indexing_slicing)]
                        let clock = clock_on_suspend[thread].clone().unwrap_or_else(|| HBClock::zeroed(threads));
                        out[thread].push(ResultWithClock { result: ActorResult::Cancelled, clock_on_start: clock });
                        cursor[thread] += 1;
                        executed[thread] += 1;
                        pending[thread] = None;
                        clock_on_suspend[thread] = None;
                        stalls = 0;
                        continue;
                    }
                }
            }
            if waiting.is_empty() {
                break;
            }
            return Err(RunnerError::Deadlock { elapsed_ms: 0 });
        }

        let thread = scheduler.choose_thread(&runnable);
        scheduler.record_interleaving_point();

        let actor = &lanes[thread][cursor[thread]];
        #[allow(clippy::indexing_slicing)]
        let clock = clock_on_suspend[thread].clone().unwrap_or_else(|| {
            let mut c = vec![0u32; threads];
            for (j, count) in executed.iter().enumerate() {
                if j != thread {
                    c[j] = *count;
                }
            }
            HBClock(c)
        });

        #[allow(clippy::cast_possible_wrap)]
        let step = match pending[thread] {
            Some(ticket) => instance.resume(ticket),
            None => instance.invoke(actor, thread as i64),
        };
        for t in instance.take_resumed_tickets() {
            resumable.insert(t);
        }

        match classify_unexpected(actor, step)? {
            ActorResult::Suspended => {
                if pending[thread].is_none() {
                    pending[thread] = Some(Ticket(next_ticket));
                    next_ticket += 1;
                    clock_on_suspend[thread] = Some(clock);
                } else if let Some(ticket) = pending[thread] {
                    resumable.remove(&ticket);
                }
                stalls += 1;
            }
            result => {
                out[thread].push(ResultWithClock { result, clock_on_start: clock });
                cursor[thread] += 1;
                executed[thread] += 1;
                if let Some(ticket) = pending[thread].take() {
                    resumable.remove(&ticket);
                }
                clock_on_suspend[thread] = None;
                stalls = 0;
            }
        }

        if stalls > config.hanging_detection_threshold {
            return Err(RunnerError::Deadlock { elapsed_ms: 0 });
        }
    }

    Ok(out)
}
