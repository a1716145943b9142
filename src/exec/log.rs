// src/exec/log.rs

//! Shared line-oriented output sink.
//!
//! Every task writes through a [`TaskLog`] that prefixes lines with a
//! per-task ANSI color, so interleaved output from parallel tasks stays
//! readable. The color is SGR 30 + (sum of the name's codepoints mod 7).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct TaskLog {
    prefix: String,
    file: Option<Arc<Mutex<File>>>,
}

impl TaskLog {
    /// Build the sink for a task; `log_path`, when set, also receives every
    /// line (without ANSI sequences).
    pub fn new(name: &str, log_path: Option<&Path>) -> Result<Self> {
        let file = match log_path {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("opening log file {path:?}"))?;
                Some(Arc::new(Mutex::new(file)))
            }
            None => None,
        };

        Ok(Self {
            prefix: format!("\x1b[0;{}m[{name}] ", color_code(name)),
            file,
        })
    }

    /// Write one line to stdout (prefixed, colored) and to the optional
    /// per-task file (plain).
    pub fn line(&self, msg: &str) {
        {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{}{}\x1b[0m", self.prefix, msg);
        }
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(file, "{msg}");
            }
        }
    }
}

fn color_code(name: &str) -> u32 {
    30 + name.chars().map(|c| c as u32).sum::<u32>() % 7
}
