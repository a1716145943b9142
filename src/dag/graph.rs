// src/dag/graph.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;

use crate::config::model::{TaskSpec, TasksFile};
use crate::errors::ConfigError;

/// A named task as the scheduler sees it.
#[derive(Debug)]
pub struct Task {
    pub name: String,
    pub spec: TaskSpec,
}

/// Immutable view of the tasks taking part in a run.
///
/// Acyclicity and reference validity are enforced by `config::validate`
/// before a graph is ever built; here we only keep adjacency information.
/// Iteration order is the declaration order from the tasks file, so the
/// status display and logs are deterministic.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: Vec<Arc<Task>>,
    index: HashMap<String, usize>,
}

impl TaskGraph {
    /// Build the full graph from a validated [`TasksFile`].
    pub fn from_file(file: &TasksFile) -> Self {
        let tasks: Vec<Arc<Task>> = file
            .spec
            .tasks
            .iter()
            .map(|(name, spec)| {
                Arc::new(Task {
                    name: name.to_string(),
                    spec: spec.clone(),
                })
            })
            .collect();

        let index = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        Self { tasks, index }
    }

    /// Restrict the graph to the transitive dependency closure of the
    /// requested tasks. Unknown names are an error.
    pub fn needed_for(&self, requested: &[String]) -> Result<TaskGraph> {
        let mut needed: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = Vec::new();

        for name in requested {
            let task = self
                .get(name)
                .ok_or_else(|| ConfigError::UnknownTask(name.clone()))?;
            stack.push(&task.name);
        }

        while let Some(name) = stack.pop() {
            if !needed.insert(name) {
                continue;
            }
            if let Some(task) = self.get(name) {
                for dep in &task.spec.dependencies {
                    stack.push(dep);
                }
            }
        }

        // Keep declaration order for the surviving tasks.
        let tasks: Vec<Arc<Task>> = self
            .tasks
            .iter()
            .filter(|t| needed.contains(t.name.as_str()))
            .cloned()
            .collect();

        let index = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name.clone(), i))
            .collect();

        Ok(TaskGraph { tasks, index })
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Task>> {
        self.index.get(name).map(|&i| &self.tasks[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Tasks in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks with no in-graph dependencies. These seed execution.
    ///
    /// Dependencies outside the subgraph cannot occur: `needed_for` closes
    /// over the dependency relation.
    pub fn leaves(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.iter().filter(|t| t.spec.dependencies.is_empty())
    }

    /// Tasks whose `dependencies` include `name`.
    pub fn downstream(&self, name: &str) -> impl Iterator<Item = &Arc<Task>> + '_ {
        let name = name.to_string();
        self.tasks
            .iter()
            .filter(move |t| t.spec.dependencies.iter().any(|d| *d == name))
    }

    pub fn all(&self, pred: impl Fn(&Task) -> bool) -> bool {
        self.tasks.iter().all(|t| pred(t))
    }

    pub fn any(&self, pred: impl Fn(&Task) -> bool) -> bool {
        self.tasks.iter().any(|t| pred(t))
    }
}
