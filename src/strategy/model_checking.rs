//! Strategy: model-checking.
//!
//! Single-threaded cooperative scheduling driven by a lazily-built
//! interleaving tree whose interior nodes alternate between
//! `ThreadChoosingNode` (picks which runnable worker runs next) and
//! `SwitchChoosingNode` (picks the position of the next forced context
//! switch), represented as the `Choice::{Thread(children),
//! Switch{start, children}}` sum type below.
//!
//! Simplification note (recorded in `DESIGN.md`): rather than priming a
//! node's width only when the runner first reaches it (which would need
//! threading runtime state back into tree construction), this
//! implementation computes node widths up front from the scenario's static
//! thread count and total interleaving-point count, known before the
//! invocation runs. The weighted-unexplored-child descent, bottom-up
//! `fully_explored` propagation, and `max_switches` growth all still work
//! the same way; only the moment widths become known is earlier.

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::actor::ExecutionScenario;
use crate::observer::InvocationObserver;
use crate::runner::{ConcurrentSpecification, Runner, ThreadScheduler};
use crate::strategy::{outcome_from_runner_result, InvocationOutcome, Strategy};

/// One planned step resolved during tree descent, consumed at runtime by
/// [`ModelCheckingStrategy::choose_thread`].
#[derive(Debug, Clone, Copy)]
enum PlanEntry {
    /// A rank (child index at a `ThreadChoosingNode`) to resolve against
    /// the runtime's actual runnable-thread list.
    Thread(usize),
    /// A forced switch at this absolute interleaving-point count.
    Switch {
        /// The child index chosen at the owning `SwitchChoosingNode`.
        idx: usize,
        /// `start + idx`: the absolute point at which to force a switch.
        position: usize,
    },
}

/// One interior node of the interleaving tree.
#[derive(Debug)]
enum TreeNode {
    /// Picks which runnable worker runs next.
    Thread {
        /// One child per switchable-thread rank.
        children: Vec<ChildSlot>,
    },
    /// Picks the position of the next context switch, counted from `start`
    /// interleaving points into the invocation.
    Switch {
        /// Interleaving-point count this node's suffix begins at.
        start: usize,
        /// One child per candidate switch position in the suffix.
        children: Vec<ChildSlot>,
    },
}

impl TreeNode {
    fn children(&self) -> &[ChildSlot] {
        match self {
            Self::Thread { children } | Self::Switch { children, .. } => children,
        }
    }

    fn children_mut(&mut self) -> &mut Vec<ChildSlot> {
        match self {
            Self::Thread { children } | Self::Switch { children, .. } => children,
        }
    }

    fn fully_explored(&self) -> bool {
        let children = self.children();
        !children.is_empty() && children.iter().all(ChildSlot::is_fully_explored)
    }
}

/// One child edge out of a [`TreeNode`]: its remaining unexplored fraction
/// (weight = `fraction_unexplored`, 1.0 initially) and, once primed, the
/// subtree beneath it.
#[derive(Debug)]
struct ChildSlot {
    fraction_unexplored: f64,
    node: Option<TreeNode>,
}

impl ChildSlot {
    fn unexplored() -> Self {
        Self { fraction_unexplored: 1.0, node: None }
    }

    fn is_fully_explored(&self) -> bool {
        self.fraction_unexplored <= f64::EPSILON
    }

    /// Recompute this slot's fraction from its own subtree. Called
    /// bottom-up after every invocation via [`refresh_path`].
    fn refresh(&mut self) {
        if let Some(node) = &self.node {
            if node.fully_explored() {
                self.fraction_unexplored = 0.0;
            } else {
                let children = node.children();
                #[allow(clippy::cast_precision_loss)]
                let avg = children.iter().map(|c| c.fraction_unexplored).sum::<f64>() / children.len() as f64;
                self.fraction_unexplored = avg;
            }
        }
    }
}

fn weighted_choice(children: &[ChildSlot], rng: &mut StdRng) -> usize {
    let total: f64 = children.iter().map(|c| c.fraction_unexplored.max(0.0)).sum();
    if total <= f64::EPSILON {
        return rng.gen_range(0..children.len());
    }
    let mut roll = rng.gen_range(0.0..total);
    for (i, child) in children.iter().enumerate() {
        let weight = child.fraction_unexplored.max(0.0);
        if roll < weight {
            return i;
        }
        roll -= weight;
    }
    children.len() - 1
}

/// Descend the tree from `root`, priming any unprimed node it passes
/// through, picking a weighted-random unexplored child at each level, down
/// to `2 * max_switches + 1` levels (alternating thread/switch). Returns
/// the chosen child-index path (for [`refresh_path`]) and the resolved
/// runtime plan.
fn descend(
    root: &mut ChildSlot,
    rng: &mut StdRng,
    max_switches: usize,
    thread_count: usize,
    total_points: usize,
) -> (Vec<usize>, Vec<PlanEntry>) {
    let mut path = Vec::new();
    let mut plan = Vec::new();
    let max_depth = 2 * max_switches + 1;
    let mut is_thread_level = true;
    let mut switch_start = 0usize;
    let mut current = root;

    for _ in 0..max_depth {
        if current.node.is_none() {
            let width = if is_thread_level {
                thread_count.max(1)
            } else {
                total_points.saturating_sub(switch_start).max(1)
            };
            current.node = Some(if is_thread_level {
                TreeNode::Thread { children: (0..width).map(|_| ChildSlot::unexplored()).collect() }
            } else {
                TreeNode::Switch { start: switch_start, children: (0..width).map(|_| ChildSlot::unexplored()).collect() }
            });
        }

        let Some(node) = current.node.as_mut() else { break };
        if node.children().is_empty() {
            break;
        }

        let idx = weighted_choice(node.children(), rng);
        path.push(idx);

        if is_thread_level {
            plan.push(PlanEntry::Thread(idx));
        } else if let TreeNode::Switch { start, .. } = node {
            let position = *start + idx;
            switch_start = position;
            plan.push(PlanEntry::Switch { idx, position });
        }

        current = &mut node.children_mut()[idx];
        is_thread_level = !is_thread_level;
    }

    (path, plan)
}

/// Re-walk `path` from `slot`, recursing to the deepest visited node first
/// so that [`ChildSlot::refresh`] recomputes fractions bottom-up and
/// `fully_explored` propagates upward. A path that runs out (the deepest
/// planned level, beyond which `max_switches` caps the tree) is a leaf: one
/// visit is enough to mark it fully explored.
fn refresh_path(slot: &mut ChildSlot, path: &[usize]) {
    match path.split_first() {
        Some((idx, rest)) => {
            if let Some(node) = slot.node.as_mut() {
                if let Some(child) = node.children_mut().get_mut(*idx) {
                    refresh_path(child, rest);
                }
            }
            slot.refresh();
        }
        None => slot.fraction_unexplored = 0.0,
    }
}

/// Interleaving-tree exploration strategy.
pub struct ModelCheckingStrategy {
    rng: StdRng,
    max_switches: usize,
    root: ChildSlot,
    max_invocations: usize,
    used_invocations: usize,
    check_obstruction_freedom: bool,
    hanging_detection_threshold: u32,
    plan: Vec<PlanEntry>,
    path: Vec<usize>,
    plan_cursor: usize,
    point_counter: usize,
    current_thread: Option<usize>,
    lone_runnable_streak: u32,
    obstruction_violation_detected: bool,
}

impl ModelCheckingStrategy {
    /// Construct a model-checking strategy seeded from `seed`, exploring up
    /// to `max_invocations` invocations before giving up.
    #[must_use]
    pub fn new(seed: u64, max_invocations: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            max_switches: 1,
            root: ChildSlot::unexplored(),
            max_invocations,
            used_invocations: 0,
            check_obstruction_freedom: false,
            hanging_detection_threshold: 1_000,
            plan: Vec::new(),
            path: Vec::new(),
            plan_cursor: 0,
            point_counter: 0,
            current_thread: None,
            lone_runnable_streak: 0,
            obstruction_violation_detected: false,
        }
    }

    /// Enable rejecting obstruction-freedom violations.
    #[must_use]
    pub const fn with_check_obstruction_freedom(mut self, enabled: bool) -> Self {
        self.check_obstruction_freedom = enabled;
        self
    }

    /// Busy-loop / lone-runnable-thread iterations tolerated before a
    /// non-blocking operation is judged stuck.
    #[must_use]
    pub const fn with_hanging_detection_threshold(mut self, threshold: u32) -> Self {
        self.hanging_detection_threshold = threshold;
        self
    }

    /// The current `max_switches` depth the tree is exploring.
    #[must_use]
    pub const fn max_switches(&self) -> usize {
        self.max_switches
    }

    /// Number of invocations run so far.
    #[must_use]
    pub const fn used_invocations(&self) -> usize {
        self.used_invocations
    }

    /// Whether the tree at the current `max_switches` depth is fully
    /// explored.
    #[must_use]
    pub fn is_fully_explored(&self) -> bool {
        self.root.is_fully_explored()
    }

    fn begin_invocation(&mut self, total_points: usize, thread_count: usize) {
        self.point_counter = 0;
        self.plan_cursor = 0;
        self.current_thread = None;
        self.lone_runnable_streak = 0;
        self.obstruction_violation_detected = false;
        let (path, plan) = descend(&mut self.root, &mut self.rng, self.max_switches, thread_count, total_points);
        self.path = path;
        self.plan = plan;
    }

    fn finish_invocation(&mut self) {
        let path = std::mem::take(&mut self.path);
        refresh_path(&mut self.root, &path);
        self.used_invocations += 1;
        if self.root.is_fully_explored() {
            #[cfg(feature = "logging")]
            log::debug!("model-checking: max_switches={} fully explored, advancing", self.max_switches);
            self.max_switches += 1;
            self.root = ChildSlot::unexplored();
        }
    }

    fn consume_thread_rank(&mut self) -> Option<usize> {
        match self.plan.get(self.plan_cursor) {
            Some(&PlanEntry::Thread(rank)) => {
                self.plan_cursor += 1;
                Some(rank)
            }
            _ => None,
        }
    }

    fn should_force_switch(&mut self) -> bool {
        match self.plan.get(self.plan_cursor) {
            Some(&PlanEntry::Switch { position, .. }) if self.point_counter >= position => {
                self.plan_cursor += 1;
                true
            }
            _ => false,
        }
    }
}

impl ThreadScheduler for ModelCheckingStrategy {
    /// Returns the next planned thread id while the plan is still in
    /// force, else a uniformly random runnable thread.
    fn choose_thread(&mut self, runnable: &[usize]) -> usize {
        if runnable.is_empty() {
            return 0;
        }
        if runnable.len() == 1 {
            self.lone_runnable_streak += 1;
            if self.check_obstruction_freedom && self.lone_runnable_streak > self.hanging_detection_threshold {
                self.obstruction_violation_detected = true;
            }
            self.current_thread = Some(runnable[0]);
            return runnable[0];
        }
        self.lone_runnable_streak = 0;

        if self.plan_cursor >= self.plan.len() {
            #[allow(clippy::indexing_slicing)]
            let chosen = runnable[self.rng.gen_range(0..runnable.len())];
            self.current_thread = Some(chosen);
            return chosen;
        }

        if self.current_thread.is_none() {
            let rank = self.consume_thread_rank().unwrap_or(0);
            #[allow(clippy::indexing_slicing)]
            let chosen = runnable[rank % runnable.len()];
            self.current_thread = Some(chosen);
            return chosen;
        }

        if self.should_force_switch() {
            let rank = self.consume_thread_rank().unwrap_or_else(|| self.rng.gen_range(0..runnable.len()));
            #[allow(clippy::indexing_slicing)]
            let chosen = runnable[rank % runnable.len()];
            self.current_thread = Some(chosen);
            return chosen;
        }

        if let Some(t) = self.current_thread {
            if runnable.contains(&t) {
                return t;
            }
        }
        #[allow(clippy::indexing_slicing)]
        let chosen = runnable[self.rng.gen_range(0..runnable.len())];
        self.current_thread = Some(chosen);
        chosen
    }

    fn record_interleaving_point(&mut self) {
        self.point_counter += 1;
    }
}

impl<C: ConcurrentSpecification + 'static> Strategy<C> for ModelCheckingStrategy {
    fn run_invocation(
        &mut self,
        runner: &Runner<C>,
        scenario: &ExecutionScenario,
        observer: &dyn InvocationObserver,
    ) -> InvocationOutcome {
        observer.on_invocation_start(scenario);
        let total_points: usize = scenario.parallel().iter().map(Vec::len).sum();
        let thread_count = scenario.parallel().len();
        self.begin_invocation(total_points, thread_count);

        let runner_outcome = outcome_from_runner_result(runner.run_model_checked(scenario, self));
        self.finish_invocation();

        // Obstruction-freedom violations are a strategy-level judgment
        // layered on top of an otherwise-successful invocation.
        let outcome = if self.check_obstruction_freedom
            && self.obstruction_violation_detected
            && matches!(runner_outcome, InvocationOutcome::Completed(_))
        {
            InvocationOutcome::ObstructionFreedomViolation
        } else {
            runner_outcome
        };

        match &outcome {
            InvocationOutcome::Completed(result) => observer.on_invocation_end(scenario, Some(result)),
            _ => observer.on_invocation_end(scenario, None),
        }
        outcome
    }

    fn name(&self) -> &'static str {
        "model-checking"
    }

    fn invocations_per_iteration(&self) -> usize {
        self.max_invocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{Actor, ActorFlags, Value};
    use crate::result::ActorResult;
    use crate::runner::RunnerConfig;
    use crate::spec::OperationStep;
    use crate::verifier::LinearizabilityVerifier;

    #[test]
    fn max_switches_starts_at_one() {
        let strategy = ModelCheckingStrategy::new(0, 100);
        assert_eq!(strategy.max_switches(), 1);
    }

    #[test]
    fn trivial_single_thread_tree_fully_explores_in_one_invocation() {
        // thread_count=1, total_points=1: every level of the tree has
        // exactly one child, so the only possible path is explored by a
        // single invocation.
        let mut strategy = ModelCheckingStrategy::new(7, 1000);
        strategy.begin_invocation(1, 1);
        strategy.finish_invocation();
        assert_eq!(strategy.max_switches(), 2);
    }

    #[test]
    fn lone_runnable_thread_past_threshold_flags_obstruction_violation() {
        let mut strategy = ModelCheckingStrategy::new(1, 10)
            .with_check_obstruction_freedom(true)
            .with_hanging_detection_threshold(3);
        strategy.begin_invocation(4, 1);
        for _ in 0..5 {
            strategy.choose_thread(&[0]);
        }
        assert!(strategy.obstruction_violation_detected);
    }

    #[test]
    fn obstruction_freedom_check_disabled_never_flags() {
        let mut strategy = ModelCheckingStrategy::new(1, 10).with_hanging_detection_threshold(1);
        strategy.begin_invocation(4, 1);
        for _ in 0..20 {
            strategy.choose_thread(&[0]);
        }
        assert!(!strategy.obstruction_violation_detected);
    }

    #[derive(Clone)]
    struct AtomicCounter(std::sync::Arc<std::sync::atomic::AtomicI64>);

    impl ConcurrentSpecification for AtomicCounter {
        fn invoke(&self, actor: &Actor, _thread_id: i64) -> OperationStep {
            match actor.method_id() {
                "inc" => {
                    self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    OperationStep::Completed(ActorResult::Void)
                }
                "get" => {
                    OperationStep::Completed(ActorResult::Value(Value::Int(self.0.load(std::sync::atomic::Ordering::SeqCst))))
                }
                other => OperationStep::Completed(ActorResult::Exception(format!("unknown method {other}"))),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
    struct Counter {
        value: i64,
    }

    impl crate::spec::SequentialSpecification for Counter {
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
                other => OperationStep::Completed(ActorResult::Exception(format!("unknown method {other}"))),
            }
        }
    }

    fn actor(name: &str) -> Actor {
        Actor::new(name, vec![], ActorFlags::default())
    }

    #[test]
    fn model_checking_iteration_passes_on_correct_counter() {
        let runner: Runner<AtomicCounter> = Runner::new(
            || AtomicCounter(std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0))),
            RunnerConfig::default(),
        );
        let scenario =
            ExecutionScenario::new(vec![], vec![vec![actor("inc")], vec![actor("inc")]], vec![actor("get")])
                .expect("valid scenario");
        let verifier: LinearizabilityVerifier<Counter> = LinearizabilityVerifier::new();
        let mut strategy = ModelCheckingStrategy::new(3, 20);
        let observer = crate::observer::NullObserver;
        let failure = crate::strategy::run_iteration(&mut strategy, &runner, &scenario, &verifier, &observer)
            .expect("checks");
        assert!(failure.is_none());
    }
}
