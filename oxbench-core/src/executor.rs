//! Worker-pool strategies.
//!
//! The pool kind is read once at startup and immutable for the run. All
//! owned pools share the same shutdown discipline: stop intake, await
//! quiescence with a bounded wait, warn and retry on timeout, and never
//! return while owned threads remain live. The shared pool is not owned and
//! is never shut down.

use crate::lock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// A unit of work handed to the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Pool construction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutorKind {
    /// Owned pool with one long-lived thread per configured worker (default).
    #[default]
    Fixed,
    /// One fresh thread per submitted job.
    Cached,
    /// Owned work-stealing (rayon) pool sized to the configured workers.
    #[serde(rename = "forkjoin")]
    ForkJoin,
    /// The process-wide rayon pool. Not owned, never shut down. Behavior when
    /// the shared pool is saturated by a concurrent run is undefined; prefer
    /// a per-benchmark pool.
    #[serde(rename = "shared-forkjoin")]
    SharedForkJoin,
}

impl std::str::FromStr for ExecutorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(ExecutorKind::Fixed),
            "cached" => Ok(ExecutorKind::Cached),
            "forkjoin" => Ok(ExecutorKind::ForkJoin),
            "shared-forkjoin" => Ok(ExecutorKind::SharedForkJoin),
            other => Err(format!("unknown executor kind: {other}")),
        }
    }
}

/// Pool construction and submission failures.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The underlying pool could not be built.
    #[error("failed to build {kind:?} pool: {reason}")]
    Build {
        /// Which strategy failed.
        kind: ExecutorKind,
        /// Builder error text.
        reason: String,
    },

    /// A job could not be handed to the pool.
    #[error("failed to submit job to {kind:?} pool: {reason}")]
    Submit {
        /// Which strategy failed.
        kind: ExecutorKind,
        /// Submission error text.
        reason: String,
    },
}

enum Inner {
    Fixed {
        sender: Option<Sender<Job>>,
        handles: Vec<JoinHandle<()>>,
    },
    Cached {
        handles: Mutex<Vec<JoinHandle<()>>>,
        spawned: AtomicUsize,
    },
    ForkJoin {
        pool: Option<rayon::ThreadPool>,
    },
    SharedForkJoin,
}

/// A handle to the configured pool.
pub struct Executor {
    kind: ExecutorKind,
    label: String,
    pending: Arc<AtomicUsize>,
    inner: Inner,
}

impl Executor {
    /// Build a pool of the given kind. `threads` sizes the owned pools;
    /// `label` prefixes worker thread names.
    pub fn new(kind: ExecutorKind, threads: usize, label: &str) -> Result<Self, ExecutorError> {
        let inner = match kind {
            ExecutorKind::Fixed => {
                let (sender, receiver) = channel::<Job>();
                let receiver = Arc::new(Mutex::new(receiver));
                let mut handles = Vec::with_capacity(threads);
                for i in 0..threads {
                    let receiver = Arc::clone(&receiver);
                    let handle = thread::Builder::new()
                        .name(format!("{label}-worker-{i}"))
                        .spawn(move || loop {
                            let job = {
                                let guard = lock(&receiver);
                                guard.recv()
                            };
                            match job {
                                Ok(job) => job(),
                                Err(_) => break,
                            }
                        })
                        .map_err(|e| ExecutorError::Build {
                            kind,
                            reason: e.to_string(),
                        })?;
                    handles.push(handle);
                }
                Inner::Fixed {
                    sender: Some(sender),
                    handles,
                }
            }
            ExecutorKind::Cached => Inner::Cached {
                handles: Mutex::new(Vec::new()),
                spawned: AtomicUsize::new(0),
            },
            ExecutorKind::ForkJoin => {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name({
                        let label = label.to_string();
                        move |i| format!("{label}-worker-{i}")
                    })
                    .build()
                    .map_err(|e| ExecutorError::Build {
                        kind,
                        reason: e.to_string(),
                    })?;
                Inner::ForkJoin { pool: Some(pool) }
            }
            ExecutorKind::SharedForkJoin => Inner::SharedForkJoin,
        };
        Ok(Self {
            kind,
            label: label.to_string(),
            pending: Arc::new(AtomicUsize::new(0)),
            inner,
        })
    }

    /// The configured strategy.
    pub fn kind(&self) -> ExecutorKind {
        self.kind
    }

    /// Jobs submitted but not yet completed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Hand a job to the pool.
    pub fn submit(&self, job: Job) -> Result<(), ExecutorError> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let pending = Arc::clone(&self.pending);
        let wrapped: Job = Box::new(move || {
            job();
            pending.fetch_sub(1, Ordering::AcqRel);
        });
        let submitted = match &self.inner {
            Inner::Fixed { sender, .. } => match sender {
                Some(sender) => sender.send(wrapped).map_err(|e| ExecutorError::Submit {
                    kind: self.kind,
                    reason: e.to_string(),
                }),
                None => Err(ExecutorError::Submit {
                    kind: self.kind,
                    reason: "pool is shut down".to_string(),
                }),
            },
            Inner::Cached { handles, spawned } => {
                let i = spawned.fetch_add(1, Ordering::AcqRel);
                thread::Builder::new()
                    .name(format!("{}-worker-{i}", self.label))
                    .spawn(wrapped)
                    .map(|handle| {
                        let mut handles = lock(handles);
                        handles.retain(|h: &JoinHandle<()>| !h.is_finished());
                        handles.push(handle);
                    })
                    .map_err(|e| ExecutorError::Submit {
                        kind: self.kind,
                        reason: e.to_string(),
                    })
            }
            Inner::ForkJoin { pool } => match pool {
                Some(pool) => {
                    pool.spawn(wrapped);
                    Ok(())
                }
                None => Err(ExecutorError::Submit {
                    kind: self.kind,
                    reason: "pool is shut down".to_string(),
                }),
            },
            Inner::SharedForkJoin => {
                rayon::spawn(wrapped);
                Ok(())
            }
        };
        if submitted.is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
        }
        submitted
    }

    /// Shut the pool down. Retries indefinitely in `wait`-sized windows,
    /// warning on each timeout, so callers never observe live owned threads
    /// after return. No-op for the shared pool.
    pub fn shutdown(&mut self, wait: Duration) {
        match &mut self.inner {
            Inner::Fixed { sender, handles } => {
                sender.take();
                Self::await_handles(&self.label, wait, handles);
            }
            Inner::Cached { handles, .. } => {
                let mut handles = std::mem::take(&mut *lock(handles));
                Self::await_handles(&self.label, wait, &mut handles);
            }
            Inner::ForkJoin { pool } => {
                let pending = &self.pending;
                Self::await_quiescence(&self.label, wait, || {
                    pending.load(Ordering::Acquire) == 0
                });
                pool.take();
            }
            Inner::SharedForkJoin => {
                tracing::debug!(pool = %self.label, "shared pool is not owned; skipping shutdown");
            }
        }
    }

    fn await_handles(label: &str, wait: Duration, handles: &mut Vec<JoinHandle<()>>) {
        Self::await_quiescence(label, wait, || {
            let mut i = 0;
            while i < handles.len() {
                if handles[i].is_finished() {
                    let _ = handles.swap_remove(i).join();
                } else {
                    i += 1;
                }
            }
            handles.is_empty()
        });
    }

    fn await_quiescence(label: &str, wait: Duration, mut done: impl FnMut() -> bool) {
        loop {
            let deadline = Instant::now() + wait;
            while Instant::now() < deadline {
                if done() {
                    return;
                }
                thread::sleep(POLL_INTERVAL);
            }
            if done() {
                return;
            }
            tracing::warn!(
                pool = %label,
                waited = ?wait,
                "executor failed to stop, trying again; check for unaccounted running threads"
            );
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        // Close intake so fixed workers can drain and exit. Never block in
        // drop; an explicit shutdown() owns the waiting.
        if let Inner::Fixed { sender, .. } = &mut self.inner {
            sender.take();
        }
    }
}
