// src/watch/mod.rs

//! File watching and change-driven re-runs.
//!
//! One watch loop per dispatched task with a non-empty `watch` list. The
//! loop turns filesystem change bursts into a single re-enqueue of the
//! owning task; it knows nothing about dependencies or scheduling.

pub mod watcher;

pub use watcher::watch_loop;
