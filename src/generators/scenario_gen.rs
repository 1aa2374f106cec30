//! Execution generator: produces random scenarios from the test structure.
//!
//! Non-parallel groups are shuffled and pinned to `group_index mod threads`,
//! then each thread draws from its pinned group's remaining templates union
//! the shared parallel pool.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

use crate::actor::{Actor, ActorFlags, ExecutionScenario, HandledExceptions, ScenarioError};
use crate::generators::{substitute_thread_id, GeneratorError, GeneratorResult, ParameterGenerator, EXTERNAL_THREAD_ID};

/// A template describing one kind of actor the generator can draw: a method
/// id, one [`ParameterGenerator`] per argument position, and the flags that
/// every actor drawn from this template carries.
pub struct ActorTemplate {
    method_id: String,
    arg_generators: Vec<Box<dyn ParameterGenerator>>,
    thread_id_positions: Vec<bool>,
    flags: ActorFlags,
    handled_exceptions: HandledExceptions,
    /// Non-parallel group name. `None` means this template belongs to the
    /// shared parallel pool.
    group: Option<String>,
}

impl ActorTemplate {
    /// Construct a new actor template.
    #[must_use]
    pub fn new(method_id: impl Into<String>, flags: ActorFlags) -> Self {
        Self {
            method_id: method_id.into(),
            arg_generators: Vec::new(),
            thread_id_positions: Vec::new(),
            flags,
            handled_exceptions: HandledExceptions::new(),
            group: None,
        }
    }

    /// Append an ordinary argument generator.
    #[must_use]
    pub fn with_arg(mut self, generator: Box<dyn ParameterGenerator>) -> Self {
        self.arg_generators.push(generator);
        self.thread_id_positions.push(false);
        self
    }

    /// Append a thread-id sentinel argument position.
    #[must_use]
    pub fn with_thread_id_arg(mut self) -> Self {
        self.arg_generators.push(Box::new(crate::generators::ThreadIdTokenGenerator));
        self.thread_id_positions.push(true);
        self
    }

    /// Attach the set of exception kinds this template's actors treat as a
    /// result rather than a failure.
    #[must_use]
    pub fn with_handled_exceptions(mut self, kinds: HandledExceptions) -> Self {
        self.handled_exceptions = kinds;
        self
    }

    /// Pin this template to a non-parallel group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    const fn is_suspendable(&self) -> bool {
        self.flags.is_suspendable
    }

    const fn is_use_once(&self) -> bool {
        self.flags.use_once
    }

    fn draw(&mut self, runtime_thread_id: i64) -> GeneratorResult<Actor> {
        let mut args = Vec::with_capacity(self.arg_generators.len());
        for generator in &mut self.arg_generators {
            args.push(generator.generate()?);
        }
        let args = substitute_thread_id(args, runtime_thread_id, &self.thread_id_positions);
        Ok(Actor::new(self.method_id.clone(), args, self.flags.clone())
            .with_handled_exceptions(self.handled_exceptions.clone()))
    }
}

/// The pool of actor templates the generator draws from: a set of
/// non-parallel groups (all actors of one group must run on the same
/// thread) plus an implicit shared parallel pool (templates with no group).
#[derive(Default)]
pub struct GeneratorPool {
    templates: Vec<ActorTemplate>,
}

impl GeneratorPool {
    /// Construct an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a template to the pool.
    #[must_use]
    pub fn with_template(mut self, template: ActorTemplate) -> Self {
        self.templates.push(template);
        self
    }
}

/// Errors raised while generating a random execution scenario.
#[derive(Error, Debug)]
pub enum ExecutionGeneratorError {
    /// A parameter generator failed mid-draw.
    #[error("generator error while drawing scenario: {0}")]
    Generator(#[from] GeneratorError),
    /// The drawn actor lists did not form a valid scenario.
    #[error("generated scenario is invalid: {0}")]
    Scenario(#[from] ScenarioError),
}

/// Result alias for execution-generation operations.
pub type ExecutionGeneratorResult<T> = Result<T, ExecutionGeneratorError>;

/// Structural parameters of the scenario to generate.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionGeneratorConfig {
    /// Number of parallel threads to draw actors for.
    pub threads: usize,
    /// Actors to draw per parallel thread.
    pub actors_per_thread: usize,
    /// Maximum actors to draw into the init part.
    pub actors_before: usize,
    /// Maximum actors to draw into the post part.
    pub actors_after: usize,
}

impl Default for ExecutionGeneratorConfig {
    fn default() -> Self {
        Self { threads: 2, actors_per_thread: 3, actors_before: 1, actors_after: 1 }
    }
}

/// Draws random [`ExecutionScenario`]s from a [`GeneratorPool`].
pub struct ExecutionGenerator {
    rng: StdRng,
    config: ExecutionGeneratorConfig,
}

impl ExecutionGenerator {
    /// Construct a generator seeded from `seed` with the given structural
    /// configuration.
    #[must_use]
    pub fn new(seed: u64, config: ExecutionGeneratorConfig) -> Self {
        Self { rng: StdRng::seed_from_u64(seed), config }
    }

    /// Draw one random [`ExecutionScenario`] from `pool`, consuming any
    /// `use_once` templates it draws from.
    ///
    /// # Errors
    ///
    /// Returns an error if a template's generator fails, or if the drawn
    /// actor lists fail scenario validation (e.g. every thread ends up
    /// empty because the pool was exhausted).
    pub fn generate(&mut self, pool: &mut GeneratorPool) -> ExecutionGeneratorResult<ExecutionScenario> {
        // Step 1: init part, up to actors_before actors, drawn only from
        // generators that are neither suspendable nor use_once — a use_once
        // template drawn here would be consumed and unavailable to the
        // parallel part, which is never what the init phase is for.
        let mut init = Vec::new();
        for _ in 0..self.config.actors_before {
            let Some(idx) = self.pick_index(pool, |t| !t.is_suspendable() && !t.is_use_once()) else { break };
            let actor = pool.templates[idx].draw(EXTERNAL_THREAD_ID)?;
            init.push(actor);
            self.remove_if_exhausted(pool, idx);
        }

        // Step 2: shuffle non-parallel groups and pin group g to thread g mod threads.
        let threads = self.config.threads.max(1);
        let mut group_names: Vec<String> =
            pool.templates.iter().filter_map(|t| t.group.clone()).collect::<HashSet<_>>().into_iter().collect();
        group_names.shuffle(&mut self.rng);
        let group_thread: HashMap<String, usize> =
            group_names.into_iter().enumerate().map(|(i, g)| (g, i % threads)).collect();

        // Step 3: each thread draws actors_per_thread actors from its pinned
        // group's remaining templates union the shared parallel pool.
        let mut parallel: Vec<Vec<Actor>> = vec![Vec::new(); threads];
        for (thread, lane) in parallel.iter_mut().enumerate() {
            for _ in 0..self.config.actors_per_thread {
                let Some(idx) = self.pick_index(pool, |t| match &t.group {
                    None => true,
                    Some(g) => group_thread.get(g) == Some(&thread),
                }) else {
                    break;
                };
                #[allow(clippy::cast_possible_wrap)]
                let actor = pool.templates[idx].draw(thread as i64)?;
                lane.push(actor);
                self.remove_if_exhausted(pool, idx);
            }
        }

        // Step 4: remove empty threads.
        parallel.retain(|lane| !lane.is_empty());

        // Step 5: draw post only if no parallel actor is suspendable.
        let mut post = Vec::new();
        let any_suspendable = parallel.iter().flatten().any(Actor::is_suspendable);
        if !any_suspendable {
            for _ in 0..self.config.actors_after {
                let Some(idx) = self.pick_index(pool, |_| true) else { break };
                let actor = pool.templates[idx].draw(EXTERNAL_THREAD_ID)?;
                post.push(actor);
                self.remove_if_exhausted(pool, idx);
            }
        }

        Ok(ExecutionScenario::new(init, parallel, post)?)
    }

    fn pick_index(&mut self, pool: &GeneratorPool, predicate: impl Fn(&ActorTemplate) -> bool) -> Option<usize> {
        let candidates: Vec<usize> =
            pool.templates.iter().enumerate().filter(|(_, t)| predicate(t)).map(|(i, _)| i).collect();
        if candidates.is_empty() {
            return None;
        }
        let pick = self.rng.gen_range(0..candidates.len());
        Some(candidates[pick])
    }

    fn remove_if_exhausted(&self, pool: &mut GeneratorPool, idx: usize) {
        if pool.templates[idx].is_use_once() {
            pool.templates.remove(idx);
        }
    }
}
