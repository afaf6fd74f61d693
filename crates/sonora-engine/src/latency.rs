use std::time::Instant;

use crate::config::MixaheadConfig;

/// Predicts how far ahead rendering must run to avoid underruns, from a
/// sliding window of observed render pass durations.
#[derive(Debug, Clone)]
pub struct LatencyPredictor {
    history: Vec<f64>,
    cursor: usize,
    min_latency: f64,
    max_latency: f64,
    increment: f64,
    last_predicted: f64,
    pass_started: Option<Instant>,
}

impl LatencyPredictor {
    pub fn new(config: &MixaheadConfig) -> Self {
        let length = config.history_length.max(1);
        Self {
            history: vec![config.start_latency; length],
            cursor: 0,
            min_latency: config.min_latency,
            max_latency: config.max_latency.max(config.min_latency),
            increment: config.underrun_increment,
            last_predicted: config.start_latency,
            pass_started: None,
        }
    }

    /// Marks the start of a render pass.
    pub fn begin_pass(&mut self) {
        self.pass_started = Some(Instant::now());
    }

    /// Closes the pass opened by [`LatencyPredictor::begin_pass`].
    pub fn end_pass(&mut self) {
        if let Some(started) = self.pass_started.take() {
            self.record_pass(started.elapsed().as_secs_f64());
        }
    }

    /// Records a pass that took `seconds` to render.
    pub fn record_pass(&mut self, seconds: f64) {
        self.history[self.cursor] = seconds;
        self.cursor = (self.cursor + 1) % self.history.len();
    }

    /// Raises the floor after the consumer ran dry.
    pub fn had_underrun(&mut self) {
        self.min_latency = (self.last_predicted + self.increment).min(self.max_latency);
        tracing::debug!(min_latency = self.min_latency, "latency floor raised after underrun");
    }

    pub fn min_latency(&self) -> f64 {
        self.min_latency
    }

    /// The worst pass in the window, clamped to the configured bounds.
    pub fn predict_latency(&mut self) -> f64 {
        let worst = self.history.iter().copied().fold(f64::MIN, f64::max);
        self.last_predicted = worst.clamp(self.min_latency, self.max_latency);
        self.last_predicted
    }

    /// [`LatencyPredictor::predict_latency`] expressed in whole blocks of
    /// `block_size` frames. Never fewer than two.
    pub fn predict_latency_in_blocks(&mut self, block_size: usize, sample_rate: u32) -> usize {
        let latency = self.predict_latency();
        let block = block_size as f64 / f64::from(sample_rate.max(1));
        if block <= 0.0 {
            return 2;
        }
        let mut blocks = (latency / block).round() as i64;
        if blocks as f64 * block > self.max_latency {
            blocks -= 1;
        } else if (blocks as f64 * block) < self.min_latency {
            blocks += 1;
        }
        blocks.max(2) as usize
    }
}
