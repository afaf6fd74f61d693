use sonora_graph::{NodeSpec, ProcessContext, Processor};

/// Sums any number of equally wide inputs into one output.
pub struct Mixer {
    inputs: usize,
    channels: usize,
}

impl Mixer {
    pub fn new(inputs: usize, channels: usize) -> Self {
        Self { inputs, channels }
    }

    pub fn spec(self) -> NodeSpec {
        let inputs = vec![self.channels; self.inputs];
        let channels = self.channels;
        NodeSpec::new(self).inputs(&inputs).outputs(&[channels])
    }
}

impl Processor for Mixer {
    fn name(&self) -> &'static str {
        "mixer"
    }

    fn process(&mut self, context: &mut ProcessContext<'_>) {
        let channels = context.outputs.len();
        if channels == 0 {
            return;
        }
        for (index, input) in context.inputs.iter().enumerate() {
            let output = &mut context.outputs[index % channels];
            for (out, sample) in output.iter_mut().zip(input) {
                *out += sample;
            }
        }
    }
}
