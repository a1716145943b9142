// src/exec/targets.rs

//! Target freshness: deciding whether a task can be skipped.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::model::TaskSpec;

/// True when every declared target exists and none is older than the newest
/// watched input, in which case the task's work is already done.
///
/// Tasks without targets never skip. Paths resolve against the task's
/// `workingDir` when set.
pub fn should_skip(spec: &TaskSpec) -> bool {
    if spec.targets.is_empty() {
        return false;
    }

    let base = spec
        .working_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    let mut oldest_target: Option<SystemTime> = None;
    for target in &spec.targets {
        match modified(&base.join(target)) {
            Some(mtime) => {
                oldest_target = Some(match oldest_target {
                    Some(t) => t.min(mtime),
                    None => mtime,
                });
            }
            None => return false,
        }
    }

    let newest_input = spec
        .watch
        .iter()
        .filter_map(|w| newest_mtime(&base.join(w)))
        .max();

    match (oldest_target, newest_input) {
        (Some(target), Some(input)) => target >= input,
        // No inputs to compare against: existing targets suffice.
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Newest modification time under a path, walking directories.
fn newest_mtime(path: &Path) -> Option<SystemTime> {
    let meta = std::fs::metadata(path).ok()?;
    let mut newest = meta.modified().ok();

    if meta.is_dir() {
        if let Ok(entries) = std::fs::read_dir(path) {
            for entry in entries.flatten() {
                if let Some(child) = newest_mtime(&entry.path()) {
                    newest = Some(match newest {
                        Some(t) => t.max(child),
                        None => child,
                    });
                }
            }
        }
    }

    newest
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::thread::sleep;
    use std::time::Duration;

    fn task(dir: &Path, targets: &[&str], watch: &[&str]) -> TaskSpec {
        let mut spec = TaskSpec::default();
        spec.working_dir = Some(dir.to_path_buf());
        spec.targets = targets.iter().map(PathBuf::from).collect();
        spec.watch = watch.iter().map(PathBuf::from).collect();
        spec
    }

    #[test]
    fn no_targets_never_skips() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!should_skip(&task(dir.path(), &[], &[])));
    }

    #[test]
    fn missing_target_never_skips() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!should_skip(&task(dir.path(), &["out.o"], &[])));
    }

    #[test]
    fn existing_target_with_no_inputs_skips() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("out.o"), "obj").unwrap();
        assert!(should_skip(&task(dir.path(), &["out.o"], &[])));
    }

    #[test]
    fn target_newer_than_inputs_skips_and_stale_target_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("main.c"), "int main;").unwrap();

        sleep(Duration::from_millis(50));
        fs::write(dir.path().join("out.o"), "obj").unwrap();
        assert!(should_skip(&task(dir.path(), &["out.o"], &["src"])));

        sleep(Duration::from_millis(50));
        fs::write(src.join("main.c"), "int main(void);").unwrap();
        assert!(!should_skip(&task(dir.path(), &["out.o"], &["src"])));
    }
}
