//! Depth-first resolution of task dependency trees.
//!
//! Both the description pass and the execution pass walk nested tasks
//! recursively. A stack of the instances currently on the recursion path
//! guards against cycles; diamonds (the same instance reachable along two
//! paths) are fine, since each instance memoizes its description and result.

use crate::config::Project;
use crate::describe::describe_value;
use crate::error::TaskError;
use crate::store::{Format, Store};
use crate::task::Task;
use crate::value::Value;

/// State for a single description walk: computes nested task descriptions
/// without running anything.
pub(crate) struct DescribePass<'a> {
    store: &'a Store,
    stack: Vec<usize>,
}

impl<'a> DescribePass<'a> {
    pub(crate) fn new(store: &'a Store) -> Self {
        Self {
            store,
            stack: Vec::new(),
        }
    }

    /// The canonical description of `task`: its name plus the description of
    /// every input, nested tasks included.
    pub(crate) fn task(&mut self, task: &Task) -> Result<serde_json::Value, TaskError> {
        if let Some(desc) = task.cached_description() {
            return Ok(desc);
        }
        if self.stack.contains(&task.id()) {
            return Err(TaskError::Cycle(task.name()));
        }
        self.stack.push(task.id());

        let mut inputs = serde_json::Map::new();
        for (name, value) in task.descriptors(self.store)? {
            inputs.insert(name, describe_value(&value, self)?);
        }
        self.stack.pop();

        let desc = serde_json::json!({
            "taskname": task.name(),
            "inputs": serde_json::Value::Object(inputs),
        });
        Ok(task.cache_description(desc))
    }
}

/// State for a single execution walk: runs or fetches every task on the
/// dependency path, depth first.
pub(crate) struct ExecutePass<'a> {
    project: &'a Project,
    stack: Vec<usize>,
}

impl<'a> ExecutePass<'a> {
    pub(crate) fn new(project: &'a Project) -> Self {
        Self {
            project,
            stack: Vec::new(),
        }
    }

    pub(crate) fn task(
        &mut self,
        task: &Task,
    ) -> Result<crate::task::OutputMap, TaskError> {
        if self.stack.contains(&task.id()) {
            return Err(TaskError::Cycle(task.name()));
        }
        self.stack.push(task.id());
        let result = task.run_or_fetch(self.project, self);
        self.stack.pop();
        result
    }

    /// Reduces one raw input to the value handed to the computation. Files
    /// load from the input store; nested tasks run (or fetch) and collapse to
    /// their result.
    pub(crate) fn resolve_input(&mut self, value: &Value) -> Result<Value, TaskError> {
        match value {
            Value::File(file) => {
                let relative = self.project.input_store.dereference(&file.filename)?;
                let format = Format::from_ext(relative.extension());
                Ok(self.project.input_store.load(&relative, format)?)
            }
            Value::Task(task) => {
                let outputs = self.task(task)?;
                // A single-output dependency collapses to the bare value.
                match task.spec().outputs() {
                    [only] => Ok(outputs[&only.name].clone()),
                    _ => Ok(Value::Map(outputs.clone())),
                }
            }
            other => Ok(other.clone()),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tempfile::TempDir;

    use super::*;
    use crate::task::{InputType, Outputs, Params, TaskSpec};

    fn temp_project() -> (TempDir, Project) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_str().unwrap();
        let project = Project::open_unrecorded(
            format!("{root}/data"),
            format!("{root}/data/run_dump"),
        )
        .unwrap();
        (dir, project)
    }

    fn counting_source(counter: Arc<AtomicUsize>) -> Arc<TaskSpec> {
        TaskSpec::builder("Source")
            .input("x", &[InputType::Int])
            .output("out", Format::Json)
            .run(move |inputs| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(Outputs::positional([Value::Int(
                    inputs["x"].as_i64().unwrap() + 1,
                )]))
            })
            .finish()
            .unwrap()
    }

    #[test]
    fn test_cycle_guard_reports_self_dependency() {
        let (_dir, project) = temp_project();
        let spec = counting_source(Arc::new(AtomicUsize::new(0)));
        let task = Task::new(&spec, Params::map([("x", Value::Int(1))])).unwrap();

        let mut pass = ExecutePass::new(&project);
        pass.stack.push(task.id());
        let result = pass.task(&task);
        assert!(matches!(result, Err(TaskError::Cycle("Source"))));

        let mut desc_pass = DescribePass::new(&project.input_store);
        desc_pass.stack.push(task.id());
        assert!(matches!(
            desc_pass.task(&task),
            Err(TaskError::Cycle("Source"))
        ));
    }

    #[test]
    fn test_diamond_dependency_runs_shared_task_once() {
        let (_dir, project) = temp_project();
        let calls = Arc::new(AtomicUsize::new(0));
        let source = counting_source(calls.clone());
        let shared = Task::new(&source, Params::map([("x", Value::Int(1))])).unwrap();

        let add = TaskSpec::builder("Add")
            .input("left", &[InputType::Any])
            .input("right", &[InputType::Any])
            .output("sum", Format::Json)
            .run(|inputs| {
                Ok(Outputs::positional([Value::Int(
                    inputs["left"].as_i64().unwrap() + inputs["right"].as_i64().unwrap(),
                )]))
            })
            .finish()
            .unwrap();

        // Both branches hold the same instance of `Source`.
        let top = Task::new(
            &add,
            Params::map([
                ("left", Value::Task(shared.clone())),
                ("right", Value::Task(shared)),
            ]),
        )
        .unwrap();

        let outputs = top.run(&project).unwrap();
        assert_eq!(outputs["sum"], Value::Int(4));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_single_output_dependency_collapses_to_value() {
        let (_dir, project) = temp_project();
        let source = counting_source(Arc::new(AtomicUsize::new(0)));
        let inner = Task::new(&source, Params::map([("x", Value::Int(1))])).unwrap();

        let mut pass = ExecutePass::new(&project);
        let resolved = pass.resolve_input(&Value::Task(inner)).unwrap();
        assert_eq!(resolved, Value::Int(2));
    }
}
