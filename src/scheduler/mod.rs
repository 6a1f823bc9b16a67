//! Dependency-driven task scheduling.
//!
//! Every component and the solver contribute [`Task`]s. A task declares the
//! attributes it reads and the attributes it writes, and the scheduler derives
//! one execution order per step from those declarations:
//!
//! - a task writing attribute `a` runs before every task reading `a`;
//! - several writers of `a` run in declaration order;
//! - a task reading the *previous step's* value of `a` runs before the task
//!   that overwrites `a` in the current step.
//!
//! A cycle in the resulting graph is a modeling error and is reported with
//! [`GridError::DependencyCycle`] when the schedule is built.

mod level;
mod sequential;

pub use level::LevelScheduler;
pub use sequential::SequentialScheduler;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::attribute::{AttributeId, AttributeRef};
use crate::error::{GridError, Result};

/// Boxed task body, called with the simulation time and step number.
pub type TaskAction = Box<dyn Fn(f64, u64) -> Result<()> + Send + Sync>;

/// Shared task handle.
pub type TaskRef = Arc<Task>;

/// A named unit of per-step computation.
pub struct Task {
    name: String,
    dependencies: Vec<AttributeRef>,
    prev_step_dependencies: Vec<AttributeRef>,
    modified: Vec<AttributeRef>,
    action: TaskAction,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("prev_step_dependencies", &self.prev_step_dependencies)
            .field("modified", &self.modified)
            .finish()
    }
}

impl Task {
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(f64, u64) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            prev_step_dependencies: Vec::new(),
            modified: Vec::new(),
            action: Box::new(action),
        }
    }

    /// Declare an attribute read in the current step.
    pub fn with_dependency(mut self, attr: AttributeRef) -> Self {
        self.dependencies.push(attr);
        self
    }

    pub fn with_dependencies(mut self, attrs: impl IntoIterator<Item = AttributeRef>) -> Self {
        self.dependencies.extend(attrs);
        self
    }

    /// Declare an attribute whose value from the previous step is read.
    pub fn with_prev_step_dependency(mut self, attr: AttributeRef) -> Self {
        self.prev_step_dependencies.push(attr);
        self
    }

    pub fn with_prev_step_dependencies(
        mut self,
        attrs: impl IntoIterator<Item = AttributeRef>,
    ) -> Self {
        self.prev_step_dependencies.extend(attrs);
        self
    }

    /// Declare an attribute written by this task.
    pub fn with_modified(mut self, attr: AttributeRef) -> Self {
        self.modified.push(attr);
        self
    }

    pub fn with_modified_attributes(mut self, attrs: impl IntoIterator<Item = AttributeRef>) -> Self {
        self.modified.extend(attrs);
        self
    }

    /// Mark the task as having untracked side effects.
    pub fn with_external_effects(self) -> Self {
        self.with_modified(AttributeRef::external())
    }

    pub fn into_ref(self) -> TaskRef {
        Arc::new(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[AttributeRef] {
        &self.dependencies
    }

    pub fn prev_step_dependencies(&self) -> &[AttributeRef] {
        &self.prev_step_dependencies
    }

    pub fn modified_attributes(&self) -> &[AttributeRef] {
        &self.modified
    }

    /// Whether the task writes the external sentinel.
    pub fn is_external(&self) -> bool {
        self.modified.iter().any(AttributeRef::is_external)
    }

    pub fn execute(&self, time: f64, step: u64) -> Result<()> {
        (self.action)(time, step)
    }
}

/// Strategy executing an ordered task set once per step.
pub trait Scheduler: Send {
    /// Resolve dependencies and prepare the execution order.
    fn create_schedule(&mut self, tasks: &[TaskRef]) -> Result<()>;

    /// Execute every task once.
    fn step(&mut self, time: f64, step: u64) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Scheduler selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerKind {
    /// Strict topological order on the calling thread
    #[default]
    Sequential,
    /// Level-parallel execution on a dedicated thread pool
    Level { threads: usize },
}

impl SchedulerKind {
    pub fn build(self) -> Result<Box<dyn Scheduler>> {
        match self {
            SchedulerKind::Sequential => Ok(Box::new(SequentialScheduler::new())),
            SchedulerKind::Level { threads } => Ok(Box::new(LevelScheduler::new(threads)?)),
        }
    }
}

/// Successor lists of the dependency graph over `tasks`, indexed by position.
pub fn dependency_graph(tasks: &[TaskRef]) -> Vec<Vec<usize>> {
    let mut writers: HashMap<AttributeId, Vec<usize>> = HashMap::new();
    for (idx, task) in tasks.iter().enumerate() {
        for attr in task.modified_attributes() {
            if attr.is_external() {
                continue;
            }
            let entry = writers.entry(attr.id()).or_default();
            if !entry.contains(&idx) {
                entry.push(idx);
            }
        }
    }

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    let mut add_edge = |from: usize, to: usize| {
        if from != to && !successors[from].contains(&to) {
            successors[from].push(to);
        }
    };

    for ids in writers.values() {
        for pair in ids.windows(2) {
            add_edge(pair[0], pair[1]);
        }
    }

    for (idx, task) in tasks.iter().enumerate() {
        for attr in task.dependencies() {
            if let Some(ids) = writers.get(&attr.id()) {
                for &writer in ids {
                    add_edge(writer, idx);
                }
            }
        }
        for attr in task.prev_step_dependencies() {
            if let Some(ids) = writers.get(&attr.id()) {
                for &writer in ids {
                    add_edge(idx, writer);
                }
            }
        }
    }

    successors
}

/// Partition tasks into levels. Every task's predecessors live in earlier
/// levels; within a level tasks keep declaration order.
pub fn topological_levels(tasks: &[TaskRef]) -> Result<Vec<Vec<TaskRef>>> {
    let successors = dependency_graph(tasks);
    let mut in_degree = vec![0usize; tasks.len()];
    for succ in &successors {
        for &s in succ {
            in_degree[s] += 1;
        }
    }

    let mut current: Vec<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut levels = Vec::new();
    let mut visited = 0;

    while !current.is_empty() {
        visited += current.len();
        let mut next = Vec::new();
        for &idx in &current {
            for &s in &successors[idx] {
                in_degree[s] -= 1;
                if in_degree[s] == 0 {
                    next.push(s);
                }
            }
        }
        next.sort_unstable();
        levels.push(current.iter().map(|&i| Arc::clone(&tasks[i])).collect());
        current = next;
    }

    if visited != tasks.len() {
        let stuck: Vec<bool> = in_degree.iter().map(|&d| d > 0).collect();
        let tasks = cycle_members(&successors, &stuck)
            .into_iter()
            .map(|i| tasks[i].name().to_string())
            .collect();
        return Err(GridError::DependencyCycle { tasks });
    }

    Ok(levels)
}

/// Tasks among `stuck` that can reach themselves. Tasks that only sit
/// downstream of a cycle are left out.
fn cycle_members(successors: &[Vec<usize>], stuck: &[bool]) -> Vec<usize> {
    (0..successors.len())
        .filter(|&start| stuck[start])
        .filter(|&start| {
            let mut seen = vec![false; successors.len()];
            let mut stack: Vec<usize> = successors[start].clone();
            while let Some(idx) = stack.pop() {
                if idx == start {
                    return true;
                }
                if !stuck[idx] || seen[idx] {
                    continue;
                }
                seen[idx] = true;
                stack.extend(&successors[idx]);
            }
            false
        })
        .collect()
}

/// Flat topological order.
pub fn topological_order(tasks: &[TaskRef]) -> Result<Vec<TaskRef>> {
    Ok(topological_levels(tasks)?.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AccessFlags, Attribute};

    fn attr(name: &str) -> AttributeRef {
        Attribute::new(name, 0.0_f64, AccessFlags::READ_WRITE).reference()
    }

    fn task(name: &str) -> Task {
        Task::new(name, |_, _| Ok(()))
    }

    fn position(order: &[TaskRef], name: &str) -> usize {
        order.iter().position(|t| t.name() == name).unwrap()
    }

    #[test]
    fn test_writer_runs_before_reader() {
        let x = attr("x");
        let tasks = vec![
            task("reader").with_dependency(x.clone()).into_ref(),
            task("writer").with_modified(x).into_ref(),
        ];
        let order = topological_order(&tasks).unwrap();
        assert!(position(&order, "writer") < position(&order, "reader"));
    }

    #[test]
    fn test_prev_step_reader_runs_before_writer() {
        let v = attr("v_intf");
        let rhs = attr("right_vector");
        let x = attr("left_vector");
        let tasks = vec![
            task("post")
                .with_dependency(x.clone())
                .with_modified(v.clone())
                .into_ref(),
            task("pre")
                .with_prev_step_dependency(v)
                .with_modified(rhs.clone())
                .into_ref(),
            task("solve").with_dependency(rhs).with_modified(x).into_ref(),
        ];
        let order: Vec<String> = topological_order(&tasks)
            .unwrap()
            .iter()
            .map(|t| t.name().to_string())
            .collect();
        assert_eq!(order, vec!["pre", "solve", "post"]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let a = attr("a");
        let b = attr("b");
        let tasks = vec![
            task("t1").with_dependency(a.clone()).with_modified(b.clone()).into_ref(),
            task("t2").with_dependency(b).with_modified(a).into_ref(),
            task("free").into_ref(),
        ];
        match topological_order(&tasks) {
            Err(GridError::DependencyCycle { tasks }) => {
                assert_eq!(tasks, vec!["t1".to_string(), "t2".to_string()]);
            }
            other => panic!("expected cycle, got {:?}", other.map(|o| o.len())),
        }
    }

    #[test]
    fn test_cycle_report_leaves_out_downstream_readers() {
        let a = attr("a");
        let b = attr("b");
        let c = attr("c");
        let tasks = vec![
            task("log").with_dependency(c.clone()).into_ref(),
            task("t1").with_dependency(a.clone()).with_modified(b.clone()).into_ref(),
            task("t2").with_dependency(b.clone()).with_modified(a).into_ref(),
            task("derive").with_dependency(b).with_modified(c).into_ref(),
        ];
        match topological_levels(&tasks) {
            Err(GridError::DependencyCycle { tasks }) => {
                assert_eq!(tasks, vec!["t1".to_string(), "t2".to_string()]);
            }
            other => panic!("expected cycle, got {:?}", other.map(|l| l.len())),
        }
    }

    #[test]
    fn test_multiple_writers_keep_declaration_order() {
        let a = attr("a");
        let tasks = vec![
            task("first").with_modified(a.clone()).into_ref(),
            task("second").with_modified(a.clone()).into_ref(),
            task("reader").with_dependency(a).into_ref(),
        ];
        let levels = topological_levels(&tasks).unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels[0][0].name(), "first");
        assert_eq!(levels[1][0].name(), "second");
    }

    #[test]
    fn test_external_sentinel_does_not_create_edges() {
        let tasks = vec![
            task("log1").with_external_effects().into_ref(),
            task("log2").with_external_effects().into_ref(),
        ];
        let levels = topological_levels(&tasks).unwrap();
        assert_eq!(levels.len(), 1);
        assert!(levels[0].iter().all(|t| t.is_external()));
    }

    #[test]
    fn test_self_dependency_is_not_a_cycle() {
        let a = attr("a");
        let tasks = vec![task("acc").with_dependency(a.clone()).with_modified(a).into_ref()];
        assert_eq!(topological_order(&tasks).unwrap().len(), 1);
    }
}
