// src/exec/mod.rs

//! Process execution layer.
//!
//! - [`process`] runs the child for `command`/`sh` activities and handles
//!   group termination with the configured grace period.
//! - [`log`] is the shared ANSI-prefixed output sink.
//! - [`ports`] waits for advertised host ports to come free.
//! - [`targets`] decides whether declared outputs make a run unnecessary.

pub mod log;
pub mod ports;
pub mod process;
pub mod targets;

pub use log::TaskLog;
pub use ports::wait_port_free;
pub use process::run_process;
pub use targets::should_skip;
