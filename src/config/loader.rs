// src/config/loader.rs

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::config::model::TasksFile;
use crate::config::validate::validate_config;
use crate::errors::ConfigError;

/// Load a tasks file from a given path and return the raw [`TasksFile`].
///
/// Parsing is strict: an unrecognized key anywhere in the document is a
/// fatal error, not a silent no-op. This only performs YAML
/// deserialization; it does **not** perform semantic validation
/// (apiVersion, references, cycles). Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<TasksFile> {
    let path = path.as_ref();
    let contents =
        fs::read_to_string(path).with_context(|| format!("reading tasks file at {path:?}"))?;

    let file: TasksFile = serde_yaml::from_str(&contents)
        .map_err(|err| ConfigError::StrictParse(err.to_string()))
        .with_context(|| format!("parsing YAML tasks file from {path:?}"))?;

    Ok(file)
}

/// Load a tasks file from path and run validation.
///
/// This is the entry point for the rest of the application:
///
/// - Reads YAML in strict mode.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks the document header, task references, semaphore labels, probe
///   parameters, and dependency acyclicity.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<TasksFile> {
    let file = load_from_path(&path)?;
    validate_config(&file)?;
    Ok(file)
}
