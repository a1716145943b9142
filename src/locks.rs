// src/locks.rs

//! Named mutexes and named counting semaphores shared between tasks.
//!
//! Tasks that declare the same `mutex` label never run concurrently; tasks
//! that declare the same `semaphore` label run at most `capacity` at a time.
//! The registry is constructed explicitly and threaded through the supervisor
//! so tests can instantiate an isolated one.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, Result};
use tokio::sync::{Mutex, Semaphore};

/// Process-wide registry of named locks.
///
/// Mutexes are created on first access; semaphore capacities are fixed when
/// the registry is built from `spec.semaphores`.
#[derive(Debug)]
pub struct NamedLocks {
    mutexes: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    semaphores: HashMap<String, Arc<Semaphore>>,
}

impl NamedLocks {
    pub fn new(semaphores: &HashMap<String, usize>) -> Self {
        let semaphores = semaphores
            .iter()
            .map(|(label, capacity)| (label.clone(), Arc::new(Semaphore::new(*capacity))))
            .collect();

        Self {
            mutexes: StdMutex::new(HashMap::new()),
            semaphores,
        }
    }

    /// Get-or-create the mutex for a label. Equal labels always yield the
    /// same lock instance.
    pub fn mutex(&self, label: &str) -> Arc<Mutex<()>> {
        let mut mutexes = self.mutexes.lock().expect("mutex registry poisoned");
        mutexes
            .entry(label.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Look up a pre-registered semaphore. Unknown labels are an error; the
    /// config validator rejects them before execution ever gets here.
    pub fn semaphore(&self, label: &str) -> Result<Arc<Semaphore>> {
        self.semaphores
            .get(label)
            .cloned()
            .ok_or_else(|| anyhow!("unknown semaphore {label:?}"))
    }

    pub fn has_semaphore(&self, label: &str) -> bool {
        self.semaphores.contains_key(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_label_yields_same_mutex() {
        let locks = NamedLocks::new(&HashMap::new());
        let a = locks.mutex("migrate");
        let b = locks.mutex("migrate");
        assert!(Arc::ptr_eq(&a, &b));

        let c = locks.mutex("other");
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn semaphore_capacity_is_fixed_at_build() {
        let mut caps = HashMap::new();
        caps.insert("build".to_string(), 2usize);
        let locks = NamedLocks::new(&caps);

        let sem = locks.semaphore("build").unwrap();
        let _a = sem.clone().acquire_owned().await.unwrap();
        let _b = sem.clone().acquire_owned().await.unwrap();
        assert_eq!(sem.available_permits(), 0);

        assert!(locks.semaphore("missing").is_err());
    }
}
