use std::time::Duration;

use serde::{Deserialize, Serialize};
use sonora_graph::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] EngineError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub sample_rate: u32,
    /// Frames per block. Must be a non-zero multiple of 4.
    pub block_size: usize,
    /// Worker threads used to execute plans; 1 runs on the calling thread.
    pub threads: usize,
    pub output_channels: usize,
    /// Ticks between maintenance passes.
    pub maintenance_interval: u64,
    pub metrics_history: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 1024,
            threads: 1,
            output_channels: 2,
            maintenance_interval: 64,
            metrics_history: 64,
        }
    }
}

impl SimulationConfig {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            ..Self::default()
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Uses one worker per physical core.
    pub fn with_available_parallelism(mut self) -> Self {
        self.threads = num_cpus::get_physical().max(1);
        self
    }

    pub fn with_output_channels(mut self, channels: usize) -> Self {
        self.output_channels = channels;
        self
    }

    pub fn with_maintenance_interval(mut self, ticks: u64) -> Self {
        self.maintenance_interval = ticks;
        self
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.sample_rate == 0 {
            return Err(EngineError::Range("sample rate must be positive".into()));
        }
        if self.block_size == 0 || self.block_size % 4 != 0 {
            return Err(EngineError::Range(format!(
                "block size {} is not a non-zero multiple of 4",
                self.block_size
            )));
        }
        if self.threads == 0 {
            return Err(EngineError::Range("at least one thread is required".into()));
        }
        Ok(())
    }

    /// Real-time length of one block.
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / f64::from(self.sample_rate))
    }
}

/// Look-ahead rendering parameters. Latencies are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixaheadConfig {
    /// Pre-mixed blocks kept in the ring.
    pub blocks: usize,
    pub history_length: usize,
    pub min_latency: f64,
    pub start_latency: f64,
    pub max_latency: f64,
    pub underrun_increment: f64,
}

impl Default for MixaheadConfig {
    fn default() -> Self {
        Self {
            blocks: 4,
            history_length: 32,
            min_latency: 0.0,
            start_latency: 0.02,
            max_latency: 0.2,
            underrun_increment: 0.01,
        }
    }
}

impl MixaheadConfig {
    pub fn with_blocks(mut self, blocks: usize) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_latency_bounds(mut self, min: f64, start: f64, max: f64) -> Self {
        self.min_latency = min;
        self.start_latency = start;
        self.max_latency = max;
        self
    }
}
