use sonora_graph::{NodeSpec, ProcessContext, Processor, Property, PropertyTable, Slot};

/// Emits an automatable value on every output channel.
pub struct Constant {
    initial: f32,
}

impl Constant {
    pub const VALUE: Slot = 0;

    pub fn new(initial: f32) -> Self {
        Self { initial }
    }

    pub fn spec(self, channels: usize) -> NodeSpec {
        NodeSpec::new(self).outputs(&[channels])
    }
}

impl Processor for Constant {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn properties(&self) -> PropertyTable {
        PropertyTable::new().with(Self::VALUE, Property::float(self.initial).a_rate())
    }

    fn zeroes_outputs(&self) -> bool {
        false
    }

    fn process(&mut self, context: &mut ProcessContext<'_>) {
        let properties = context.properties;
        for buffer in context.outputs.iter_mut() {
            for (index, sample) in buffer.iter_mut().enumerate() {
                *sample = properties.sample(Self::VALUE, index);
            }
        }
    }
}
