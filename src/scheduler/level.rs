//! Level-parallel scheduler on a rayon thread pool.

use log::debug;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::{topological_levels, Scheduler, TaskRef};
use crate::error::{GridError, Result};

#[derive(Debug, Default)]
struct Level {
    parallel: Vec<TaskRef>,
    /// Tasks with untracked side effects, run after the parallel batch
    external: Vec<TaskRef>,
}

/// Runs each dependency level as a parallel batch.
///
/// All tasks of a level finish before the next level starts. Tasks in one
/// level never write the same attribute, because multiple writers of an
/// attribute are chained by dependency edges.
pub struct LevelScheduler {
    pool: ThreadPool,
    threads: usize,
    levels: Vec<Level>,
}

impl std::fmt::Debug for LevelScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelScheduler")
            .field("threads", &self.threads)
            .field("levels", &self.levels.len())
            .finish()
    }
}

impl LevelScheduler {
    /// Create a scheduler with `threads` workers. Zero lets rayon choose.
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("gridsim-worker-{}", i))
            .build()
            .map_err(|e| GridError::ThreadPool {
                message: e.to_string(),
            })?;
        Ok(Self {
            threads: pool.current_num_threads(),
            pool,
            levels: Vec::new(),
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Task names per level, parallel batch first.
    pub fn level_names(&self) -> Vec<Vec<&str>> {
        self.levels
            .iter()
            .map(|l| {
                l.parallel
                    .iter()
                    .chain(l.external.iter())
                    .map(|t| t.name())
                    .collect()
            })
            .collect()
    }
}

impl Scheduler for LevelScheduler {
    fn create_schedule(&mut self, tasks: &[TaskRef]) -> Result<()> {
        self.levels = topological_levels(tasks)?
            .into_iter()
            .map(|tasks| {
                let (external, parallel): (Vec<TaskRef>, Vec<TaskRef>) =
                    tasks.into_iter().partition(|t| t.is_external());
                Level { parallel, external }
            })
            .collect();
        debug!(
            "level schedule with {} tasks in {} levels on {} threads",
            tasks.len(),
            self.levels.len(),
            self.threads
        );
        Ok(())
    }

    fn step(&mut self, time: f64, step: u64) -> Result<()> {
        for level in &self.levels {
            match level.parallel.len() {
                0 => {}
                1 => level.parallel[0].execute(time, step)?,
                _ => self.pool.install(|| {
                    level
                        .parallel
                        .par_iter()
                        .try_for_each(|task| task.execute(time, step))
                })?,
            }
            for task in &level.external {
                task.execute(time, step)?;
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "level"
    }
}
