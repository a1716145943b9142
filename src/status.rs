// src/status.rs

//! Concurrent task status table.
//!
//! One mutable record per task, created before execution begins and kept for
//! the lifetime of the process. Each task's runner is the only writer of its
//! own record; the terminal renderer and the supervisor's termination checks
//! read snapshots under a short read lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use crate::backoff::Backoff;

/// Lifecycle reason of a task, as shown in the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Waiting,
    Starting,
    Running,
    Success,
    Error,
}

impl Reason {
    /// Terminal for a single run loop: the task will not move again unless it
    /// is re-dispatched.
    pub fn is_terminal(self) -> bool {
        matches!(self, Reason::Success | Reason::Error)
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Reason::Waiting => "waiting",
            Reason::Starting => "starting",
            Reason::Running => "running",
            Reason::Success => "success",
            Reason::Error => "error",
        };
        f.write_str(s)
    }
}

/// Mutable status of a single task.
#[derive(Debug, Clone, Copy)]
pub struct StatusRecord {
    pub reason: Reason,
    pub backoff: Backoff,
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self {
            reason: Reason::Waiting,
            backoff: Backoff::default(),
        }
    }
}

/// Concurrent map from task name to [`StatusRecord`].
#[derive(Debug, Default)]
pub struct StatusTable {
    inner: RwLock<HashMap<String, StatusRecord>>,
}

impl StatusTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the initial `waiting` record for a task.
    pub fn init(&self, name: &str) {
        self.inner
            .write()
            .expect("status table lock poisoned")
            .insert(name.to_string(), StatusRecord::default());
    }

    pub fn get(&self, name: &str) -> Option<StatusRecord> {
        self.inner
            .read()
            .expect("status table lock poisoned")
            .get(name)
            .copied()
    }

    pub fn set_reason(&self, name: &str, reason: Reason) {
        if let Some(rec) = self
            .inner
            .write()
            .expect("status table lock poisoned")
            .get_mut(name)
        {
            rec.reason = reason;
        }
    }

    /// Advance the backoff after a failed run; returns the new value so the
    /// runner can sleep on it.
    pub fn bump_backoff(&self, name: &str) -> Backoff {
        let mut table = self.inner.write().expect("status table lock poisoned");
        match table.get_mut(name) {
            Some(rec) => {
                rec.backoff = rec.backoff.next();
                rec.backoff
            }
            None => Backoff::default(),
        }
    }

    /// Reset the backoff after a successful run.
    pub fn reset_backoff(&self, name: &str) {
        if let Some(rec) = self
            .inner
            .write()
            .expect("status table lock poisoned")
            .get_mut(name)
        {
            rec.backoff = Backoff::default();
        }
    }
}
