// src/config/validate.rs

use anyhow::{Context, Result};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{Probe, TaskSpec, TasksFile};
use crate::errors::ConfigError;
use crate::probe::ProbeParams;

/// Run semantic validation against a loaded tasks file.
///
/// This checks:
/// - the document header (`apiVersion: kit/v1`, `kind: Tasks`, a non-empty
///   `metadata.name`)
/// - each task declares at most one activity kind, and no container-runtime
///   activity (`image` / `manifests`)
/// - all `dependencies` refer to existing tasks
/// - all `semaphore` labels are registered under `spec.semaphores`
/// - probe declarations parse and have non-zero thresholds
/// - the dependency graph has no cycles
pub fn validate_config(file: &TasksFile) -> Result<()> {
    validate_header(file)?;

    for (name, task) in file.spec.tasks.iter() {
        validate_task(file, name, task)?;
    }

    validate_dag(file)?;
    Ok(())
}

fn validate_header(file: &TasksFile) -> Result<()> {
    if file.api_version != "kit/v1" {
        return Err(ConfigError::BadApiVersion.into());
    }
    if file.kind != "Tasks" {
        return Err(ConfigError::BadKind.into());
    }
    if file.metadata.name.is_empty() {
        return Err(ConfigError::MissingName.into());
    }
    Ok(())
}

fn validate_task(file: &TasksFile, name: &str, task: &TaskSpec) -> Result<()> {
    if task.activity_count() > 1 {
        return Err(ConfigError::InvalidTask {
            task: name.to_string(),
            message: "command, sh, image and manifests are mutually exclusive".to_string(),
        }
        .into());
    }

    if task.image.is_some() || !task.manifests.is_empty() {
        return Err(ConfigError::InvalidTask {
            task: name.to_string(),
            message: "image and manifests tasks require a container runtime".to_string(),
        }
        .into());
    }

    for dep in &task.dependencies {
        if !file.spec.tasks.contains(dep) {
            return Err(ConfigError::UnknownDependency {
                task: name.to_string(),
                dependency: dep.clone(),
            }
            .into());
        }
    }

    if let Some(label) = &task.semaphore {
        if !file.spec.semaphores.contains_key(label) {
            return Err(ConfigError::UnknownSemaphore {
                task: name.to_string(),
                semaphore: label.clone(),
            }
            .into());
        }
    }

    validate_probe(name, "livenessProbe", task.liveness_probe.as_ref())?;
    validate_probe(name, "readinessProbe", task.readiness_probe.as_ref())?;

    Ok(())
}

fn validate_probe(task: &str, field: &str, probe: Option<&Probe>) -> Result<()> {
    if let Some(probe) = probe {
        ProbeParams::from_config(probe).with_context(|| format!("task {task:?}: {field}"))?;
    }
    Ok(())
}

fn validate_dag(file: &TasksFile) -> Result<()> {
    // Edge direction: dependency -> dependent. A topological sort fails on
    // the first cycle it finds.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for (name, _) in file.spec.tasks.iter() {
        graph.add_node(name);
    }

    for (name, task) in file.spec.tasks.iter() {
        for dep in &task.dependencies {
            graph.add_edge(dep.as_str(), name, ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => {
            Err(ConfigError::DependencyCycle(cycle.node_id().to_string()).into())
        }
    }
}
