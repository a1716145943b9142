// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! Configuration problems get a structured error type so startup failures
//! print a recognisable message; everything else flows through `anyhow`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid apiVersion, must be 'kit/v1'")]
    BadApiVersion,

    #[error("invalid kind, must be 'Tasks'")]
    BadKind,

    #[error("metadata.name is required")]
    MissingName,

    #[error("tasks file failed strict parsing: {0}")]
    StrictParse(String),

    #[error("task {task:?} has unknown dependency {dependency:?}")]
    UnknownDependency { task: String, dependency: String },

    #[error("task {task:?} references unknown semaphore {semaphore:?}")]
    UnknownSemaphore { task: String, semaphore: String },

    #[error("cycle detected in task dependencies involving {0:?}")]
    DependencyCycle(String),

    #[error("requested task {0:?} does not exist")]
    UnknownTask(String),

    #[error("task {task:?}: {message}")]
    InvalidTask { task: String, message: String },
}

pub use anyhow::{Error, Result};
