//! Configuration loading from oxbench.toml
//!
//! Benchmark binaries can keep harness defaults in an `oxbench.toml` at the
//! project root; the file is discovered by walking up from the current
//! directory, and command-line flags override it.

use oxbench_core::ExecutorKind;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root of the oxbench.toml file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarnessConfig {
    /// Runner defaults.
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Runner defaults, mirroring the runtime knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Warmup iterations before measurement.
    #[serde(default = "default_warmup_iterations")]
    pub warmup_iterations: usize,
    /// Measured iterations.
    #[serde(default = "default_measurement_iterations")]
    pub measurement_iterations: usize,
    /// Time budget per iteration (e.g. "1s", "500ms").
    #[serde(default = "default_iteration_time")]
    pub iteration_time: String,
    /// Worker thread count.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Thread-group sizes; empty means one group of all threads.
    #[serde(default)]
    pub thread_groups: Vec<usize>,
    /// Invocations per worker in single-shot runs.
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
    /// Stop at the first failed iteration.
    #[serde(default)]
    pub fail_on_error: bool,
    /// Pool strategy: "fixed", "cached", "forkjoin", or "shared-forkjoin".
    #[serde(default)]
    pub executor: ExecutorKind,
    /// Bound for stuck-worker joins and executor shutdown waits.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            warmup_iterations: default_warmup_iterations(),
            measurement_iterations: default_measurement_iterations(),
            iteration_time: default_iteration_time(),
            threads: default_threads(),
            thread_groups: Vec::new(),
            batch_size: default_batch_size(),
            fail_on_error: false,
            executor: ExecutorKind::default(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

fn default_warmup_iterations() -> usize {
    5
}
fn default_measurement_iterations() -> usize {
    5
}
fn default_iteration_time() -> String {
    "1s".to_string()
}
fn default_threads() -> usize {
    1
}
fn default_batch_size() -> u64 {
    1
}
fn default_shutdown_timeout() -> String {
    "10s".to_string()
}

impl HarnessConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from the current
    /// directory.
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join("oxbench.toml");
            if config_path.exists() {
                return Self::load(&config_path).ok();
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Parse a duration string (e.g. "3s", "500ms", "2m").
    pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;

        let nanos_per_unit: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok(Duration::from_nanos((value * nanos_per_unit as f64) as u64))
    }
}
