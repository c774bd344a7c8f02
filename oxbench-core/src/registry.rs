//! Run-scoped state storage.
//!
//! Three partitions mirror the three sharing scopes: a process-wide slot per
//! state field, a per-group map, and a per-worker map. The registry only
//! creates and hands out instances; teardown ordering is owned by the stubs.

use crate::lock;
use fxhash::FxHashMap;
use std::any::Any;
use std::sync::{Arc, Mutex};

/// A live state object. Concrete types are recovered by downcasting.
pub type StateInstance = Arc<dyn Any + Send + Sync>;

/// Lookup key for [`StateRegistry::get_or_init`].
#[derive(Debug, Clone, Copy)]
pub enum StateKey<'a> {
    /// One instance per run per state field.
    Benchmark {
        /// Storage slot identifier assigned by the generator.
        field: &'a str,
    },
    /// One instance per (state field, thread group).
    Group {
        /// Storage slot identifier assigned by the generator.
        field: &'a str,
        /// 0-based thread-group id.
        group: usize,
    },
    /// One instance per (state field, worker thread).
    Thread {
        /// Storage slot identifier assigned by the generator.
        field: &'a str,
        /// 0-based worker id.
        worker: usize,
    },
}

/// Storage for all state instances of one benchmark run.
#[derive(Debug)]
pub struct StateRegistry {
    benchmark: Mutex<FxHashMap<String, StateInstance>>,
    group: Mutex<FxHashMap<(String, usize), StateInstance>>,
    thread: Vec<Mutex<FxHashMap<String, StateInstance>>>,
}

impl StateRegistry {
    /// Create a registry for a run with `max_threads` workers.
    pub fn new(max_threads: usize) -> Self {
        Self {
            benchmark: Mutex::new(FxHashMap::default()),
            group: Mutex::new(FxHashMap::default()),
            thread: (0..max_threads)
                .map(|_| Mutex::new(FxHashMap::default()))
                .collect(),
        }
    }

    /// Look up the instance for `key`, creating it with `factory` on first
    /// use. The factory runs under the partition lock, so exactly one caller
    /// constructs and publishes per key; the lock release publishes the
    /// instance to later readers.
    pub fn get_or_init<E>(
        &self,
        key: StateKey<'_>,
        factory: impl FnOnce() -> Result<StateInstance, E>,
    ) -> Result<StateInstance, E> {
        match key {
            StateKey::Benchmark { field } => {
                let mut slot = lock(&self.benchmark);
                if let Some(existing) = slot.get(field) {
                    return Ok(existing.clone());
                }
                let value = factory()?;
                slot.insert(field.to_string(), value.clone());
                Ok(value)
            }
            StateKey::Group { field, group } => {
                let mut slot = lock(&self.group);
                if let Some(existing) = slot.get(&(field.to_string(), group)) {
                    return Ok(existing.clone());
                }
                let value = factory()?;
                slot.insert((field.to_string(), group), value.clone());
                Ok(value)
            }
            StateKey::Thread { field, worker } => {
                let mut slot = lock(&self.thread[worker]);
                if let Some(existing) = slot.get(field) {
                    return Ok(existing.clone());
                }
                let value = factory()?;
                slot.insert(field.to_string(), value.clone());
                Ok(value)
            }
        }
    }

    /// The run-wide instance for a field, if one was created.
    pub fn benchmark_instance(&self, field: &str) -> Option<StateInstance> {
        lock(&self.benchmark).get(field).cloned()
    }

    /// All group instances for a field, ordered by group id.
    pub fn group_instances(&self, field: &str) -> Vec<(usize, StateInstance)> {
        let slot = lock(&self.group);
        let mut found: Vec<(usize, StateInstance)> = slot
            .iter()
            .filter(|((f, _), _)| f == field)
            .map(|((_, g), v)| (*g, v.clone()))
            .collect();
        found.sort_by_key(|(g, _)| *g);
        found
    }

    /// All per-worker instances for a field, ordered by worker id.
    pub fn thread_instances(&self, field: &str) -> Vec<(usize, StateInstance)> {
        let mut found = Vec::new();
        for (worker, slot) in self.thread.iter().enumerate() {
            if let Some(value) = lock(slot).get(field) {
                found.push((worker, value.clone()));
            }
        }
        found
    }
}
