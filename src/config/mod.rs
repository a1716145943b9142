// src/config/mod.rs

//! Tasks file loading, model, and validation.
//!
//! - [`model`] is the serde mapping of the `kit/v1` YAML document.
//! - [`loader`] reads and parses a file.
//! - [`validate`] enforces the semantic rules (header, references, cycles).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path};
pub use model::{
    EnvVars, HttpGetAction, Metadata, PortSpec, Probe, ProbeSpec, RestartPolicy, Spec, Strings,
    TaskMap, TaskSpec, TaskType, TasksFile, TcpSocketAction,
};
pub use validate::validate_config;
