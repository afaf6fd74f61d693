use std::sync::Arc;

use parking_lot::Mutex;
use sonora_graph::{NodeSpec, NodeState, ProcessContext, Processor};

/// Captured channels shared between a [`Recorder`] and its owner.
#[derive(Clone, Default)]
pub struct RecorderHandle {
    frames: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl RecorderHandle {
    /// Takes everything captured so far, one vector per channel.
    pub fn take(&self) -> Vec<Vec<f32>> {
        let mut frames = self.frames.lock();
        let channels = frames.len();
        std::mem::replace(&mut *frames, vec![Vec::new(); channels])
    }

    pub fn len(&self) -> usize {
        self.frames.lock().first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Captures its input every block, whether or not anything listens to it,
/// and passes it through unchanged.
pub struct Recorder {
    handle: RecorderHandle,
    capacity: usize,
}

impl Recorder {
    /// Records at most `capacity` frames per channel; later blocks are
    /// dropped until the handle is drained.
    pub fn new(channels: usize, capacity: usize) -> (Self, RecorderHandle) {
        let handle = RecorderHandle {
            frames: Arc::new(Mutex::new(vec![Vec::new(); channels])),
        };
        let recorder = Self {
            handle: handle.clone(),
            capacity,
        };
        (recorder, handle)
    }

    pub fn spec(self) -> NodeSpec {
        let channels = self.handle.frames.lock().len();
        NodeSpec::new(self)
            .inputs(&[channels])
            .outputs(&[channels])
            .state(NodeState::AlwaysPlaying)
    }
}

impl Processor for Recorder {
    fn name(&self) -> &'static str {
        "recorder"
    }

    fn process(&mut self, context: &mut ProcessContext<'_>) {
        // Never block the render path on a reader.
        if let Some(mut frames) = self.handle.frames.try_lock() {
            for (captured, input) in frames.iter_mut().zip(context.inputs) {
                let room = self.capacity.saturating_sub(captured.len());
                captured.extend_from_slice(&input[..room.min(input.len())]);
            }
        }
        for (output, input) in context.outputs.iter_mut().zip(context.inputs) {
            output.copy_from_slice(input);
        }
    }

    fn reset(&mut self) {
        for captured in self.handle.frames.lock().iter_mut() {
            captured.clear();
        }
    }
}
