//! The simulation: a graph, its planner and the clock that drives them.
//!
//! All mutation goes through [`Scene`], reached with [`Simulation::lock`].
//! Rendering takes the same lock, so a batch of edits made under one guard is
//! applied atomically between two blocks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use sonora_graph::{
    Automator, BlockInfo, EngineError, Graph, NodeId, NodeSpec, NodeState, PlanStats, Planner,
    Property, PropertyValue, Result, Slot,
};
use sonora_rt::{BlockMetrics, BlockTiming};

use crate::config::{ConfigError, SimulationConfig};
use crate::error::{ErrorContext, ErrorRecord};

/// Invoked at the start of every block with the block's simulation time.
pub type BlockCallback = Box<dyn FnMut(f64) + Send>;

pub struct Simulation {
    scene: Mutex<Scene>,
    errors: Arc<ErrorContext>,
    metrics: BlockMetrics,
    budget: Duration,
    config: SimulationConfig,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let errors = Arc::new(ErrorContext::new());
        let scene = Scene::new(&config, Arc::clone(&errors));
        tracing::info!(
            sample_rate = config.sample_rate,
            block_size = config.block_size,
            threads = config.threads,
            "simulation created"
        );
        Ok(Self {
            scene: Mutex::new(scene),
            errors,
            metrics: BlockMetrics::new(config.metrics_history),
            budget: config.block_duration(),
            config,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn block_size(&self) -> usize {
        self.config.block_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    /// Holds off rendering until the guard is dropped.
    pub fn lock(&self) -> MutexGuard<'_, Scene> {
        self.scene.lock()
    }

    /// Applies several edits with no block rendered in between.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut Scene) -> R) -> R {
        f(&mut self.scene.lock())
    }

    /// Renders one block into `out` as interleaved frames of `channels`
    /// samples. Samples past the end of the block are left untouched.
    pub fn get_block(&self, out: &mut [f32], channels: usize) {
        let started = Instant::now();
        self.scene.lock().render(out, channels);
        self.metrics.record_block(started.elapsed(), self.budget);
    }

    pub fn metrics(&self) -> BlockTiming {
        self.metrics.snapshot()
    }

    pub fn drain_metrics(&self) -> Vec<BlockTiming> {
        self.metrics.drain_history()
    }

    /// The last error recorded for the calling thread.
    pub fn last_error(&self) -> Option<ErrorRecord> {
        self.errors.last_error()
    }

    pub fn clear_last_error(&self) {
        self.errors.clear();
    }
}

/// Mutable view of a simulation. Every failing call is also recorded as the
/// calling thread's last error.
pub struct Scene {
    graph: Graph,
    planner: Planner,
    errors: Arc<ErrorContext>,
    sample_rate: u32,
    block_size: usize,
    threads: usize,
    maintenance_interval: u64,
    tick: u64,
    time: f64,
    callback: Option<BlockCallback>,
}

impl Scene {
    fn new(config: &SimulationConfig, errors: Arc<ErrorContext>) -> Self {
        Self {
            graph: Graph::new(config.block_size, config.output_channels),
            planner: Planner::new(),
            errors,
            sample_rate: config.sample_rate,
            block_size: config.block_size,
            threads: config.threads,
            maintenance_interval: config.maintenance_interval,
            tick: 0,
            time: 0.0,
            callback: None,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn planner_stats(&self) -> PlanStats {
        self.planner.stats()
    }

    pub fn output(&self) -> NodeId {
        self.graph.sink()
    }

    /// Simulation time of the next block, in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    #[track_caller]
    pub fn set_threads(&mut self, threads: usize) -> Result<()> {
        let result = if threads == 0 {
            Err(EngineError::Range("at least one thread is required".into()))
        } else {
            self.threads = threads;
            Ok(())
        };
        self.errors.capture(result)
    }

    pub fn set_block_callback(&mut self, callback: Option<BlockCallback>) {
        self.callback = callback;
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> NodeId {
        self.graph.add_node(spec)
    }

    #[track_caller]
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        let result = self.graph.remove_node(id).map(drop);
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn connect(&mut self, from: NodeId, output: usize, to: NodeId, input: usize) -> Result<()> {
        let result = self.graph.connect(from, output, to, input);
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn connect_to_output(&mut self, from: NodeId, output: usize) -> Result<()> {
        let result = self.graph.connect_to_output(from, output);
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn disconnect(&mut self, from: NodeId, output: usize, to: NodeId, input: usize) -> Result<bool> {
        let result = self.graph.disconnect(from, output, to, input);
        self.errors.capture(result)
    }

    /// Adds output connection `output` of `from`, mixed down to mono, to the
    /// per-sample values of property `slot` on `to`.
    #[track_caller]
    pub fn connect_property(&mut self, from: NodeId, output: usize, to: NodeId, slot: Slot) -> Result<()> {
        let result = self.graph.connect_property(from, output, to, slot);
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn disconnect_property(&mut self, from: NodeId, output: usize, to: NodeId, slot: Slot) -> Result<bool> {
        let result = self.graph.disconnect_property(from, output, to, slot);
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn disconnect_output(&mut self, from: NodeId, output: usize) -> Result<usize> {
        let result = self.graph.disconnect_output(from, output);
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn state(&self, id: NodeId) -> Result<NodeState> {
        let result = self.graph.node(id).map(|cell| cell.state());
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn set_state(&mut self, id: NodeId, state: NodeState) -> Result<()> {
        let result = self.graph.set_state(id, state);
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn reset_node(&mut self, id: NodeId) -> Result<()> {
        let result = self.graph.node(id).map(|cell| cell.reset());
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn resize(&mut self, id: NodeId, inputs: usize, outputs: usize) -> Result<()> {
        let result = self.graph.resize(id, inputs, outputs);
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn append_input_connection(&mut self, id: NodeId, start: usize, count: usize) -> Result<usize> {
        let result = self.graph.append_input_connection(id, start, count);
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn append_output_connection(&mut self, id: NodeId, start: usize, count: usize) -> Result<usize> {
        let result = self.graph.append_output_connection(id, start, count);
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn reconfigure_input(
        &mut self,
        id: NodeId,
        index: usize,
        start: usize,
        count: usize,
    ) -> Result<()> {
        let result = self.graph.reconfigure_input(id, index, start, count);
        self.errors.capture(result)
    }

    #[track_caller]
    pub fn reconfigure_output(
        &mut self,
        id: NodeId,
        index: usize,
        start: usize,
        count: usize,
    ) -> Result<()> {
        let result = self.graph.reconfigure_output(id, index, start, count);
        self.errors.capture(result)
    }

    /// Runs `id`'s per-block update hook from now on.
    #[track_caller]
    pub fn register_update_hook(&mut self, id: NodeId) -> Result<()> {
        let result = self.graph.register_update_hook(id);
        self.errors.capture(result)
    }

    pub fn unregister_update_hook(&mut self, id: NodeId) -> bool {
        self.graph.unregister_update_hook(id)
    }

    #[track_caller]
    pub fn set_property(&mut self, id: NodeId, slot: Slot, value: PropertyValue) -> Result<()> {
        let result = self.with_property(id, slot, |property, _| property.set(value));
        self.errors.capture(result)
    }

    /// The plain value of a property, ignoring automation.
    #[track_caller]
    pub fn property(&self, id: NodeId, slot: Slot) -> Result<PropertyValue> {
        let result = self
            .graph
            .node(id)
            .and_then(|cell| cell.with_properties(|table| Ok(table.get(slot)?.value().clone())));
        self.errors.capture(result)
    }

    /// The value a property will take `time` seconds from now, automation
    /// included.
    #[track_caller]
    pub fn property_value(&self, id: NodeId, slot: Slot, time: f64) -> Result<f64> {
        let result = self.absolute(time).and_then(|at| {
            self.graph
                .node(id)?
                .with_properties(|table| Ok(table.get(slot)?.value_at(at)))
        });
        self.errors.capture(result)
    }

    /// Restores the default value and drops any automation.
    #[track_caller]
    pub fn reset_property(&mut self, id: NodeId, slot: Slot) -> Result<()> {
        let result = self.with_property(id, slot, |property, _| {
            property.reset();
            Ok(())
        });
        self.errors.capture(result)
    }

    /// Jumps to `value` `time` seconds from now.
    #[track_caller]
    pub fn schedule_set(&mut self, id: NodeId, slot: Slot, time: f64, value: f64) -> Result<()> {
        let result = self.absolute(time).and_then(|at| {
            self.with_property(id, slot, |property, now| {
                property.schedule(Automator::set(at, value), now)
            })
        });
        self.errors.capture(result)
    }

    /// Ramps linearly from the value in effect to `value`, arriving `time`
    /// seconds from now.
    #[track_caller]
    pub fn schedule_linear_ramp(&mut self, id: NodeId, slot: Slot, time: f64, value: f64) -> Result<()> {
        let result = self.absolute(time).and_then(|at| {
            self.with_property(id, slot, |property, now| {
                property.schedule(Automator::linear_ramp(at, value), now)
            })
        });
        self.errors.capture(result)
    }

    /// Plays `points`, spread evenly over `duration` seconds, starting `time`
    /// seconds from now.
    #[track_caller]
    pub fn schedule_envelope(
        &mut self,
        id: NodeId,
        slot: Slot,
        time: f64,
        duration: f64,
        points: &[f64],
    ) -> Result<()> {
        let result = self.absolute(time).and_then(|at| {
            let automator = Automator::envelope(at, duration, points.to_vec())?;
            self.with_property(id, slot, |property, now| property.schedule(automator, now))
        });
        self.errors.capture(result)
    }

    /// Drops automation from `time` seconds from now onwards, holding the
    /// value in effect at that point.
    #[track_caller]
    pub fn cancel_automators(&mut self, id: NodeId, slot: Slot, time: f64) -> Result<()> {
        let result = self.absolute(time).and_then(|at| {
            self.with_property(id, slot, |property, now| property.cancel_automators(at, now))
        });
        self.errors.capture(result)
    }

    fn absolute(&self, time: f64) -> Result<f64> {
        if time >= 0.0 {
            Ok(self.time + time)
        } else {
            Err(EngineError::Range(format!("time offset {time}s is negative")))
        }
    }

    fn with_property<R>(
        &self,
        id: NodeId,
        slot: Slot,
        f: impl FnOnce(&mut Property, f64) -> Result<R>,
    ) -> Result<R> {
        let now = self.time;
        self.graph
            .node(id)?
            .with_properties(|table| f(table.get_mut(slot)?, now))
    }

    pub(crate) fn render(&mut self, out: &mut [f32], channels: usize) {
        if let Some(callback) = self.callback.as_mut() {
            callback(self.time);
        }
        if let Err(err) = self.graph.set_output_channels(channels) {
            tracing::error!(%err, channels, "failed to reshape the final output");
        }
        let block = BlockInfo {
            tick: self.tick,
            time: self.time,
            sample_rate: self.sample_rate as f32,
            block_size: self.block_size,
        };
        self.graph.run_update_hooks(&block);

        let sink = self.graph.sink();
        match self.planner.execute(&self.graph, sink, self.threads, &block) {
            Ok(()) => match self.graph.node(sink) {
                Ok(cell) => cell.read_outputs(|buffers| interleave(buffers, self.block_size, channels, out)),
                Err(err) => {
                    tracing::error!(%err, "final output missing");
                    silence(out, self.block_size * channels);
                }
            },
            Err(err) => {
                tracing::error!(%err, tick = self.tick, "block rendering failed; emitting silence");
                silence(out, self.block_size * channels);
            }
        }

        self.tick += 1;
        self.time = self.tick as f64 * self.block_size as f64 / f64::from(self.sample_rate);
        if self.maintenance_interval > 0 && self.tick % self.maintenance_interval == 0 {
            self.maintain();
        }
    }

    fn maintain(&mut self) {
        let pruned = self.graph.prune_update_hooks();
        if pruned > 0 {
            tracing::debug!(pruned, tick = self.tick, "stale update hooks pruned");
        }
    }
}

fn interleave(buffers: &[Vec<f32>], frames: usize, channels: usize, out: &mut [f32]) {
    for frame in 0..frames {
        for channel in 0..channels {
            let Some(slot) = out.get_mut(frame * channels + channel) else {
                return;
            };
            *slot = buffers.get(channel).map_or(0.0, |buffer| buffer[frame]);
        }
    }
}

fn silence(out: &mut [f32], samples: usize) {
    let end = samples.min(out.len());
    out[..end].fill(0.0);
}
