//! Parallel execution runner.
//!
//! Replays a [`crate::actor::ExecutionScenario`] against a user-supplied
//! concurrent implementation, producing an [`ExecutionResult`] carrying
//! per-actor happens-before clocks. The runner operates in one of two modes:
//!
//! - [`Runner::run_stress`]: real OS threads, one per parallel lane, timing
//!   scrambled by the stress strategy.
//! - [`Runner::run_model_checked`]: single-threaded cooperative execution,
//!   one actor invocation at a time, ordered by a [`ThreadScheduler`]
//!   (the model-checking strategy).
//!
//! Bytecode-level interleaving points (shared-variable reads, monitor
//! enter/exit, and the like) are explicitly out of scope: this engine
//! schedules at actor-invocation granularity, and suspendable actors
//! additionally yield control at their own suspension boundary via
//! [`ConcurrentSpecification::resume`].

mod worker;

pub use worker::{ExecutionResult, HBClock, ResultWithClock};

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::actor::{Actor, ExecutionScenario};
use crate::generators::EXTERNAL_THREAD_ID;
use crate::result::ActorResult;
use crate::spec::{OperationStep, Ticket};

/// The real (possibly buggy) concurrent implementation under test.
///
/// Mirrors [`crate::spec::SequentialSpecification`]'s task-state-machine
/// shape, but receives `&self`: the type under test manages its own
/// thread-safety (atomics, locks), so the runner may call into it from
/// multiple worker threads concurrently without any locking of its own.
pub trait ConcurrentSpecification: Send + Sync {
    /// Invoke `actor` as thread `thread_id` (or [`EXTERNAL_THREAD_ID`] for
    /// init/post actors running on the driver).
    fn invoke(&self, actor: &Actor, thread_id: i64) -> OperationStep;

    /// Resume a previously suspended ticket. Default: report cancellation,
    /// correct for implementations with no suspendable operations.
    fn resume(&self, ticket: Ticket) -> OperationStep {
        let _ = ticket;
        OperationStep::Completed(ActorResult::Cancelled)
    }

    /// Cancel a previously suspended ticket.
    fn cancel(&self, ticket: Ticket) {
        let _ = ticket;
    }

    /// Tickets that became resumable as a side effect of the most recent
    /// `invoke`/`resume`/`cancel` call. Default: none.
    fn take_resumed_tickets(&self) -> Vec<Ticket> {
        Vec::new()
    }

    /// An optional, read-only snapshot of observable state, taken at phase
    /// boundaries. Default: no snapshot is taken.
    fn state_snapshot(&self) -> Option<String> {
        None
    }
}

/// Chooses which runnable worker executes its next actor, in
/// [`Runner::run_model_checked`]. Implemented by
/// `crate::strategy::model_checking::ModelCheckingStrategy`.
pub trait ThreadScheduler {
    /// Pick one element of `runnable` (a list of logical thread ids) to run
    /// next.
    fn choose_thread(&mut self, runnable: &[usize]) -> usize;

    /// Called once per interleaving point (here: once per actor boundary),
    /// so the scheduler can advance its own bookkeeping (e.g. an
    /// interleaving-point counter).
    fn record_interleaving_point(&mut self) {}
}

/// Decides per-invocation timing noise in [`Runner::run_stress`].
/// Implemented by `crate::strategy::stress::StressStrategy`.
///
/// `Send` so a single instance can be shared (behind a mutex) across the
/// worker threads one stress invocation spawns.
pub trait WaitPattern: Send {
    /// Busy-wait iterations to inject before the next actor on `thread_id`,
    /// or 0 for none.
    fn wait_iterations(&mut self, thread_id: usize) -> u32;
}

/// A validation function: a zero-argument, void-returning reference check
/// supplied by the user.
pub type ValidationFn<C> = Box<dyn Fn(&C) -> Result<(), String> + Send + Sync>;

/// Errors produced by a single invocation of the runner.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// An actor raised an exception not declared in its `handled_exceptions`.
    #[error("unexpected exception from actor {method_id}: {message}")]
    UnexpectedException {
        /// The actor whose invocation raised the exception.
        method_id: String,
        /// The exception's message/kind.
        message: String,
    },
    /// No worker made progress within the invocation's wall-clock budget.
    #[error("deadlock: no progress within {elapsed_ms}ms")]
    Deadlock {
        /// Elapsed wall-clock time before the watchdog gave up.
        elapsed_ms: u64,
    },
    /// A user-supplied validation function failed after some phase.
    #[error("validation failed: {0}")]
    ValidationFailed(String),
}

/// Result alias for runner operations.
pub type RunnerResult<T> = Result<T, RunnerError>;

/// Per-invocation tuning the runner itself owns (mirrors the relevant slice
/// of [`crate::config::LincheckConfig`]).
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Wall-clock ceiling for one invocation.
    pub timeout_ms: u64,
    /// Busy-loop iterations (or scheduler picks, in MC mode) before a
    /// stalled invocation is declared a deadlock.
    pub hanging_detection_threshold: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self { timeout_ms: 5_000, hanging_detection_threshold: 10_000 }
    }
}

thread_local! {
    static CURRENT_THREAD_ID: std::cell::Cell<i64> = const { std::cell::Cell::new(EXTERNAL_THREAD_ID) };
}

/// Replays scenarios against a fresh instance of `C` per invocation.
///
/// Built once per iteration, reusing one test-instance constructor and its
/// warm caches across invocations; [`Runner::initialize`]/[`Runner::close`]
/// bracket the worker pool's lifetime, with resources released on every
/// exit path.
pub struct Runner<C: ConcurrentSpecification> {
    factory: Arc<dyn Fn() -> C + Send + Sync>,
    validations: Vec<ValidationFn<C>>,
    config: RunnerConfig,
}

impl<C: ConcurrentSpecification + 'static> Runner<C> {
    /// Build a runner around a fresh-instance factory and its tuning.
    pub fn new(factory: impl Fn() -> C + Send + Sync + 'static, config: RunnerConfig) -> Self {
        Self { factory: Arc::new(factory), validations: Vec::new(), config }
    }

    /// Register a validation function, run after every phase.
    #[must_use]
    pub fn with_validation(mut self, check: impl Fn(&C) -> Result<(), String> + Send + Sync + 'static) -> Self {
        self.validations.push(Box::new(check));
        self
    }

    /// Build the worker pool / warm caches. A no-op placeholder: worker
    /// threads in this runner are spawned fresh per stress invocation
    /// rather than pooled, since Rust's `std::thread::scope` already
    /// amortizes the cost of join bookkeeping within one invocation.
    pub fn initialize(&self) {}

    /// Release any held resources. A no-op counterpart to
    /// [`Runner::initialize`].
    pub fn close(&self) {}

    /// The index of the calling worker thread, or [`EXTERNAL_THREAD_ID`] on
    /// the driver thread.
    #[must_use]
    pub fn current_thread_id() -> i64 {
        CURRENT_THREAD_ID.with(std::cell::Cell::get)
    }

    fn run_validations(&self, instance: &C) -> RunnerResult<()> {
        for check in &self.validations {
            check(instance).map_err(RunnerError::ValidationFailed)?;
        }
        Ok(())
    }

    fn run_sequential_phase(
        &self,
        instance: &C,
        actors: &[Actor],
    ) -> RunnerResult<Vec<ActorResult>> {
        let mut results = Vec::with_capacity(actors.len());
        for actor in actors {
            match instance.invoke(actor, EXTERNAL_THREAD_ID) {
                OperationStep::Completed(ActorResult::Exception(kind))
                    if !actor.handles_exception(&kind) =>
                {
                    return Err(RunnerError::UnexpectedException {
                        method_id: actor.method_id().to_string(),
                        message: kind,
                    });
                }
                OperationStep::Completed(result) => results.push(result),
                OperationStep::Suspended => {
                    return Err(RunnerError::UnexpectedException {
                        method_id: actor.method_id().to_string(),
                        message: "suspended in init/post phase".to_string(),
                    });
                }
            }
        }
        Ok(results)
    }

    /// Run one invocation under real OS-level parallel threads, injecting
    /// busy-wait noise from `waits` to scramble timing.
    ///
    /// # Errors
    ///
    /// See [`RunnerError`].
    pub fn run_stress(
        &self,
        scenario: &ExecutionScenario,
        waits: &mut dyn WaitPattern,
    ) -> RunnerResult<ExecutionResult> {
        let instance = (self.factory)();
        let deadline = Instant::now() + Duration::from_millis(self.config.timeout_ms);

        let init = self.run_sequential_phase(&instance, scenario.init())?;
        self.run_validations(&instance)?;

        let thread_count = scenario.parallel().len();
        let executed: Vec<std::sync::atomic::AtomicU32> =
            (0..thread_count).map(|_| std::sync::atomic::AtomicU32::new(0)).collect();
        let executed = Arc::new(executed);
        let waits_mutex = std::sync::Mutex::new(waits);

        let parallel_results: Vec<Vec<ResultWithClock>> = std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(thread_count);
            for (tid, lane) in scenario.parallel().iter().enumerate() {
                let instance_ref = &instance;
                let executed_ref = Arc::clone(&executed);
                let lane_ref = lane.as_slice();
                let waits_ref = &waits_mutex;
                handles.push(scope.spawn(move || {
                    CURRENT_THREAD_ID.with(|c| c.set(tid as i64));
                    worker::run_lane_stress(
                        instance_ref,
                        lane_ref,
                        tid,
                        &executed_ref,
                        deadline,
                        waits_ref,
                    )
                }));
            }
            handles.into_iter().map(|h| h.join().unwrap_or_default()).collect()
        });

        if Instant::now() > deadline {
            return Err(RunnerError::Deadlock { elapsed_ms: self.config.timeout_ms });
        }

        self.run_validations(&instance)?;
        let post = self.run_sequential_phase(&instance, scenario.post())?;
        self.run_validations(&instance)?;

        Ok(ExecutionResult::new(init, parallel_results, post))
    }

    /// Run one invocation with a single logical worker active at a time,
    /// ordered by `scheduler` (model-checking mode: single-threaded
    /// cooperative scheduling).
    ///
    /// # Errors
    ///
    /// See [`RunnerError`].
    pub fn run_model_checked(
        &self,
        scenario: &ExecutionScenario,
        scheduler: &mut dyn ThreadScheduler,
    ) -> RunnerResult<ExecutionResult> {
        let instance = (self.factory)();
        let init = self.run_sequential_phase(&instance, scenario.init())?;
        self.run_validations(&instance)?;

        let parallel_results =
            worker::run_lanes_model_checked(&instance, scenario.parallel(), scheduler, &self.config)?;

        self.run_validations(&instance)?;
        let post = self.run_sequential_phase(&instance, scenario.post())?;
        self.run_validations(&instance)?;

        Ok(ExecutionResult::new(init, parallel_results, post))
    }
}
