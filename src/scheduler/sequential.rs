//! Single-threaded scheduler.

use log::debug;

use super::{topological_order, Scheduler, TaskRef};
use crate::error::Result;

/// Runs tasks strictly in topological order on the calling thread.
#[derive(Debug, Default)]
pub struct SequentialScheduler {
    order: Vec<TaskRef>,
}

impl SequentialScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Task names in execution order.
    pub fn order(&self) -> Vec<&str> {
        self.order.iter().map(|t| t.name()).collect()
    }
}

impl Scheduler for SequentialScheduler {
    fn create_schedule(&mut self, tasks: &[TaskRef]) -> Result<()> {
        self.order = topological_order(tasks)?;
        debug!("sequential schedule with {} tasks", self.order.len());
        Ok(())
    }

    fn step(&mut self, time: f64, step: u64) -> Result<()> {
        for task in &self.order {
            task.execute(time, step)?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sequential"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::attribute::{AccessFlags, Attribute};
    use crate::error::GridError;
    use crate::scheduler::Task;

    #[test]
    fn test_executes_in_dependency_order() {
        let value = Attribute::new("value", 0.0_f64, AccessFlags::READ_WRITE);
        let trace = Arc::new(Mutex::new(Vec::new()));

        let reader_value = value.clone();
        let reader_trace = Arc::clone(&trace);
        let reader = Task::new("reader", move |_, _| {
            let v = reader_value.get()?;
            reader_trace.lock().unwrap().push(format!("read {}", v));
            Ok(())
        })
        .with_dependency(value.reference());

        let writer_value = value.clone();
        let writer_trace = Arc::clone(&trace);
        let writer = Task::new("writer", move |time, _| {
            writer_value.set(time)?;
            writer_trace.lock().unwrap().push("write".to_string());
            Ok(())
        })
        .with_modified(value.reference());

        let mut scheduler = SequentialScheduler::new();
        scheduler
            .create_schedule(&[reader.into_ref(), writer.into_ref()])
            .unwrap();
        assert_eq!(scheduler.order(), vec!["writer", "reader"]);
        scheduler.step(2.0, 1).unwrap();
        assert_eq!(*trace.lock().unwrap(), vec!["write", "read 2"]);
    }

    #[test]
    fn test_task_error_aborts_step() {
        let ran_after = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&ran_after);
        let a = Attribute::new("a", 0.0_f64, AccessFlags::READ_WRITE);
        let failing = Task::new("failing", |_, _| {
            Err(GridError::invalid_simulation_param("boom"))
        })
        .with_modified(a.reference());
        let after = Task::new("after", move |_, _| {
            *flag.lock().unwrap() = true;
            Ok(())
        })
        .with_dependency(a.reference());

        let mut scheduler = SequentialScheduler::new();
        scheduler
            .create_schedule(&[failing.into_ref(), after.into_ref()])
            .unwrap();
        assert!(scheduler.step(0.0, 0).is_err());
        assert!(!*ran_after.lock().unwrap());
    }
}
