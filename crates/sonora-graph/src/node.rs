use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::connection::{mix_into, ConnectionSpan, FeedTarget, LiveFeed};
use crate::error::{EngineError, Result};
use crate::property::{slots, Property, PropertyTable, Slot};

/// Timing of the block being rendered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockInfo {
    pub tick: u64,
    /// Simulation time of the block's first sample, in seconds.
    pub time: f64,
    pub sample_rate: f32,
    pub block_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Skipped by the planner; contributes silence downstream.
    Paused,
    /// Processed while reachable from the root.
    Playing,
    /// Processed every block regardless of reachability.
    AlwaysPlaying,
}

impl NodeState {
    fn to_raw(self) -> u8 {
        match self {
            NodeState::Paused => 0,
            NodeState::Playing => 1,
            NodeState::AlwaysPlaying => 2,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => NodeState::Paused,
            2 => NodeState::AlwaysPlaying,
            _ => NodeState::Playing,
        }
    }
}

/// Execution context delivered to a [`Processor`]. Buffers hold exactly
/// `block.block_size` samples and are only valid for the duration of the call.
pub struct ProcessContext<'a> {
    pub block: BlockInfo,
    pub inputs: &'a [Vec<f32>],
    pub outputs: &'a mut [Vec<f32>],
    pub properties: &'a PropertyTable,
}

impl<'a> ProcessContext<'a> {
    pub fn block_size(&self) -> usize {
        self.block.block_size
    }

    pub fn sample_rate(&self) -> f32 {
        self.block.sample_rate
    }

    pub fn property(&self, slot: Slot) -> Option<&Property> {
        self.properties.get(slot).ok()
    }

    /// Whether any of `slots` changed since the previous block.
    pub fn were_properties_modified(&self, slots: &[Slot]) -> bool {
        self.properties.were_modified(slots)
    }
}

/// The per-block contract every node kind implements.
///
/// `process` must not fail: out-of-range data is clamped and processing
/// continues.
pub trait Processor: Send {
    fn name(&self) -> &'static str;

    /// Properties the node exposes, created once when the node is added.
    fn properties(&self) -> PropertyTable {
        PropertyTable::new()
    }

    fn process(&mut self, context: &mut ProcessContext<'_>);

    /// Return `false` when `process` overwrites every output sample, so the
    /// graph can skip zeroing the output buffers.
    fn zeroes_outputs(&self) -> bool {
        true
    }

    /// Called in plan order before any node in the block runs.
    fn will_execute_dependencies(&mut self, _properties: &PropertyTable) {}

    /// Per-block hook for nodes registered with the graph's update hooks.
    fn update(&mut self, _properties: &mut PropertyTable, _block: &BlockInfo) {}

    fn reset(&mut self) {}
}

/// Description of a node to be added to a graph.
pub struct NodeSpec {
    processor: Box<dyn Processor>,
    inputs: Vec<usize>,
    outputs: Vec<usize>,
    state: NodeState,
}

impl NodeSpec {
    pub fn new(processor: impl Processor + 'static) -> Self {
        Self::boxed(Box::new(processor))
    }

    pub fn boxed(processor: Box<dyn Processor>) -> Self {
        Self {
            processor,
            inputs: Vec::new(),
            outputs: Vec::new(),
            state: NodeState::Playing,
        }
    }

    /// One input connection per entry, each spanning that many channels.
    pub fn inputs(mut self, channels: &[usize]) -> Self {
        self.inputs = channels.to_vec();
        self
    }

    /// One output connection per entry, each spanning that many channels.
    pub fn outputs(mut self, channels: &[usize]) -> Self {
        self.outputs = channels.to_vec();
        self
    }

    pub fn state(mut self, state: NodeState) -> Self {
        self.state = state;
        self
    }

    pub(crate) fn initial_state(&self) -> NodeState {
        self.state
    }
}

fn contiguous_spans(channels: &[usize]) -> (Vec<ConnectionSpan>, usize) {
    let mut start = 0;
    let spans = channels
        .iter()
        .map(|&count| {
            let span = ConnectionSpan::new(start, count);
            start += count;
            span
        })
        .collect();
    (spans, start)
}

struct NodeCore {
    processor: Box<dyn Processor>,
    properties: PropertyTable,
    inputs: Vec<Vec<f32>>,
    input_connections: Vec<ConnectionSpan>,
    /// Mono scratch buffer for signals driving properties.
    downmix: Vec<Vec<f32>>,
    last_tick: Option<u64>,
}

struct OutputSide {
    buffers: Vec<Vec<f32>>,
    connections: Vec<ConnectionSpan>,
}

/// A node's storage. The processor, properties and input buffers are only
/// touched by the node's own job; output buffers are read by dependents in
/// later runs of the plan.
pub struct NodeCell {
    name: &'static str,
    block_size: usize,
    state: AtomicU8,
    core: Mutex<NodeCore>,
    output: RwLock<OutputSide>,
}

impl NodeCell {
    pub(crate) fn new(spec: NodeSpec, block_size: usize) -> Self {
        let NodeSpec {
            processor,
            inputs,
            outputs,
            state,
        } = spec;
        let (input_connections, input_count) = contiguous_spans(&inputs);
        let (output_connections, output_count) = contiguous_spans(&outputs);
        let mut properties = processor.properties();
        if !properties.contains(slots::MUL) {
            properties.insert(slots::MUL, Property::float(1.0).a_rate());
        }
        if !properties.contains(slots::ADD) {
            properties.insert(slots::ADD, Property::float(0.0).a_rate());
        }
        Self {
            name: processor.name(),
            block_size,
            state: AtomicU8::new(state.to_raw()),
            core: Mutex::new(NodeCore {
                processor,
                properties,
                inputs: vec![vec![0.0; block_size]; input_count],
                input_connections,
                downmix: vec![vec![0.0; block_size]],
                last_tick: None,
            }),
            output: RwLock::new(OutputSide {
                buffers: vec![vec![0.0; block_size]; output_count],
                connections: output_connections,
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: NodeState) {
        self.state.store(state.to_raw(), Ordering::Release);
    }

    pub fn with_properties<R>(&self, f: impl FnOnce(&mut PropertyTable) -> R) -> R {
        f(&mut self.core.lock().properties)
    }

    pub fn input_connections(&self) -> Vec<ConnectionSpan> {
        self.core.lock().input_connections.clone()
    }

    pub fn output_connections(&self) -> Vec<ConnectionSpan> {
        self.output.read().connections.clone()
    }

    pub fn input_buffer_count(&self) -> usize {
        self.core.lock().inputs.len()
    }

    pub fn output_buffer_count(&self) -> usize {
        self.output.read().buffers.len()
    }

    /// Reads the output buffers as left by the most recent block.
    pub fn read_outputs<R>(&self, f: impl FnOnce(&[Vec<f32>]) -> R) -> R {
        f(&self.output.read().buffers)
    }

    pub(crate) fn resize(&self, inputs: usize, outputs: usize) {
        let block_size = self.block_size;
        self.core
            .lock()
            .inputs
            .resize_with(inputs, || vec![0.0; block_size]);
        self.output
            .write()
            .buffers
            .resize_with(outputs, || vec![0.0; block_size]);
    }

    pub(crate) fn append_input_connection(&self, span: ConnectionSpan) -> Result<usize> {
        let mut core = self.core.lock();
        check_span(span, core.inputs.len())?;
        core.input_connections.push(span);
        Ok(core.input_connections.len() - 1)
    }

    pub(crate) fn append_output_connection(&self, span: ConnectionSpan) -> Result<usize> {
        let mut output = self.output.write();
        check_span(span, output.buffers.len())?;
        output.connections.push(span);
        Ok(output.connections.len() - 1)
    }

    pub(crate) fn set_input_connection(&self, index: usize, span: ConnectionSpan) -> Result<()> {
        let mut core = self.core.lock();
        check_span(span, core.inputs.len())?;
        let slot = core
            .input_connections
            .get_mut(index)
            .ok_or_else(|| EngineError::range(format!("no input connection {index}")))?;
        *slot = span;
        Ok(())
    }

    pub(crate) fn set_output_connection(&self, index: usize, span: ConnectionSpan) -> Result<()> {
        let mut output = self.output.write();
        check_span(span, output.buffers.len())?;
        let slot = output
            .connections
            .get_mut(index)
            .ok_or_else(|| EngineError::range(format!("no output connection {index}")))?;
        *slot = span;
        Ok(())
    }

    pub(crate) fn has_input_connection(&self, index: usize) -> bool {
        index < self.core.lock().input_connections.len()
    }

    pub(crate) fn has_output_connection(&self, index: usize) -> bool {
        index < self.output.read().connections.len()
    }

    pub fn reset(&self) {
        self.core.lock().processor.reset();
    }

    pub(crate) fn will_execute_dependencies(&self) {
        let mut core = self.core.lock();
        let NodeCore {
            processor,
            properties,
            ..
        } = &mut *core;
        processor.will_execute_dependencies(properties);
    }

    pub(crate) fn update(&self, block: &BlockInfo) {
        let mut core = self.core.lock();
        let NodeCore {
            processor,
            properties,
            ..
        } = &mut *core;
        processor.update(properties, block);
    }

    /// Runs one block: resolves properties, gathers inputs and property
    /// signals from `feeds`, calls the processor and applies the standard
    /// `mul`/`add` properties. A node runs at most once per tick.
    pub(crate) fn process(&self, feeds: &[LiveFeed], block: &BlockInfo) {
        let mut guard = self.core.lock();
        let core = &mut *guard;
        if core.last_tick == Some(block.tick) {
            return;
        }
        core.last_tick = Some(block.tick);
        let mut output = self.output.write();
        if core.processor.zeroes_outputs() {
            for buffer in &mut output.buffers {
                buffer.fill(0.0);
            }
        }
        core.properties.tick(block);
        for buffer in &mut core.inputs {
            buffer.fill(0.0);
        }
        for feed in feeds {
            if feed.source.state() == NodeState::Paused {
                continue;
            }
            let source = feed.source.output.read();
            let Some(src) = source
                .connections
                .get(feed.output)
                .and_then(|from| source.buffers.get(from.range()))
            else {
                continue;
            };
            match feed.target {
                FeedTarget::Input(input) => {
                    let Some(span) = core.input_connections.get(input).copied() else {
                        continue;
                    };
                    if let Some(dst) = core.inputs.get_mut(span.range()) {
                        mix_into(src, dst);
                    }
                }
                FeedTarget::Property(slot) => {
                    let Ok(property) = core.properties.get_mut(slot) else {
                        continue;
                    };
                    for buffer in &mut core.downmix {
                        buffer.fill(0.0);
                    }
                    mix_into(src, &mut core.downmix);
                    property.add_signal(&core.downmix[0]);
                }
            }
        }
        let mut context = ProcessContext {
            block: *block,
            inputs: &core.inputs,
            outputs: &mut output.buffers,
            properties: &core.properties,
        };
        core.processor.process(&mut context);
        apply_mul_add(&core.properties, &mut output.buffers);
    }
}

fn check_span(span: ConnectionSpan, buffers: usize) -> Result<()> {
    if span.end() > buffers {
        return Err(EngineError::range(format!(
            "connection {}..{} exceeds {buffers} buffers",
            span.start,
            span.end()
        )));
    }
    Ok(())
}

fn apply_mul_add(properties: &PropertyTable, outputs: &mut [Vec<f32>]) {
    let (Ok(mul), Ok(add)) = (properties.get(slots::MUL), properties.get(slots::ADD)) else {
        return;
    };
    if mul.needs_a_rate() || add.needs_a_rate() {
        for buffer in outputs.iter_mut() {
            for (index, sample) in buffer.iter_mut().enumerate() {
                *sample = *sample * mul.sample_value(index) as f32 + add.sample_value(index) as f32;
            }
        }
        return;
    }
    let (mul, add) = (mul.as_float(), add.as_float());
    if mul == 1.0 && add == 0.0 {
        return;
    }
    for buffer in outputs.iter_mut() {
        for sample in buffer.iter_mut() {
            *sample = *sample * mul + add;
        }
    }
}
