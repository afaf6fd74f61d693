use sonora_graph::{NodeSpec, ProcessContext, Processor, Property, PropertyTable, Slot};

/// Scales its input by an automatable gain.
pub struct Gain {
    initial: f32,
}

impl Gain {
    pub const GAIN: Slot = 0;

    pub fn new(initial: f32) -> Self {
        Self { initial }
    }

    pub fn spec(self, channels: usize) -> NodeSpec {
        NodeSpec::new(self).inputs(&[channels]).outputs(&[channels])
    }
}

impl Processor for Gain {
    fn name(&self) -> &'static str {
        "gain"
    }

    fn properties(&self) -> PropertyTable {
        PropertyTable::new().with(Self::GAIN, Property::float(self.initial).a_rate())
    }

    fn process(&mut self, context: &mut ProcessContext<'_>) {
        let properties = context.properties;
        for (output, input) in context.outputs.iter_mut().zip(context.inputs) {
            for (index, (out, sample)) in output.iter_mut().zip(input).enumerate() {
                *out = sample * properties.sample(Self::GAIN, index);
            }
        }
    }
}
