//! Node arena, connection edges and topology versioning.
//!
//! Every mutation that can change what the planner would produce bumps
//! [`Graph::version`], which is how cached plans learn they are stale.

use std::collections::HashMap;
use std::sync::Arc;

use crate::arena::{Arena, NodeId};
use crate::connection::{ConnectionSpan, Edge, FeedTarget, PropertyEdge};
use crate::error::{EngineError, Result};
use crate::node::{BlockInfo, NodeCell, NodeSpec, NodeState, ProcessContext, Processor};
use crate::property::{Property, Slot};

/// Root sink. Copies its single input connection to its single output
/// connection, where the driver picks the block up.
struct FinalOutput;

impl Processor for FinalOutput {
    fn name(&self) -> &'static str {
        "final_output"
    }

    fn zeroes_outputs(&self) -> bool {
        false
    }

    fn process(&mut self, context: &mut ProcessContext<'_>) {
        for (index, output) in context.outputs.iter_mut().enumerate() {
            match context.inputs.get(index) {
                Some(input) => output.copy_from_slice(input),
                None => output.fill(0.0),
            }
        }
    }
}

/// Edges arriving at one node.
#[derive(Default)]
struct Incoming {
    edges: Vec<Edge>,
    properties: Vec<PropertyEdge>,
}

impl Incoming {
    fn retain_sources(&mut self, keep: impl Fn(NodeId, usize) -> bool) -> usize {
        let before = self.edges.len() + self.properties.len();
        self.edges.retain(|edge| keep(edge.from, edge.output));
        self.properties.retain(|edge| keep(edge.from, edge.output));
        before - self.edges.len() - self.properties.len()
    }
}

pub struct Graph {
    nodes: Arena<Arc<NodeCell>>,
    incoming: HashMap<NodeId, Incoming>,
    version: u64,
    sink: NodeId,
    hooks: Vec<NodeId>,
    block_size: usize,
}

impl Graph {
    /// Creates a graph whose root sink mixes down to `channels` channels.
    pub fn new(block_size: usize, channels: usize) -> Self {
        let mut nodes = Arena::new();
        let sink = nodes.insert(Arc::new(NodeCell::new(
            NodeSpec::new(FinalOutput)
                .inputs(&[channels])
                .outputs(&[channels]),
            block_size,
        )));
        Self {
            nodes,
            incoming: HashMap::new(),
            version: 0,
            sink,
            hooks: Vec::new(),
            block_size,
        }
    }

    pub fn sink(&self) -> NodeId {
        self.sink
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Number of live nodes, including the sink.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some()
    }

    pub fn node(&self, id: NodeId) -> Result<&Arc<NodeCell>> {
        self.nodes.get(id).ok_or(EngineError::InvalidHandle(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Arc<NodeCell>)> + '_ {
        self.nodes.iter()
    }

    /// Every audio edge, grouped by destination.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> + '_ {
        self.incoming.values().flat_map(|incoming| &incoming.edges)
    }

    /// Every edge driving a property, grouped by destination.
    pub fn property_edges(&self) -> impl Iterator<Item = &PropertyEdge> + '_ {
        self.incoming.values().flat_map(|incoming| &incoming.properties)
    }

    fn touch(&mut self) {
        self.version = self.version.wrapping_add(1);
    }

    pub fn add_node(&mut self, spec: NodeSpec) -> NodeId {
        let state = spec.initial_state();
        let cell = Arc::new(NodeCell::new(spec, self.block_size));
        let name = cell.name();
        let id = self.nodes.insert(cell);
        if state == NodeState::AlwaysPlaying {
            self.touch();
        }
        tracing::debug!(%id, name, ?state, "node added");
        id
    }

    /// Removes a node and every edge touching it. The cell itself is freed
    /// once the last strong reference goes away.
    pub fn remove_node(&mut self, id: NodeId) -> Result<Arc<NodeCell>> {
        if id == self.sink {
            return Err(EngineError::range("the final output cannot be removed"));
        }
        let cell = self.nodes.remove(id).ok_or(EngineError::InvalidHandle(id))?;
        self.incoming.remove(&id);
        for incoming in self.incoming.values_mut() {
            incoming.retain_sources(|from, _| from != id);
        }
        self.touch();
        tracing::debug!(%id, name = cell.name(), "node removed");
        Ok(cell)
    }

    /// Feeds output connection `output` of `from` into input connection
    /// `input` of `to`. Edges that would close a cycle are rejected.
    pub fn connect(&mut self, from: NodeId, output: usize, to: NodeId, input: usize) -> Result<()> {
        let source = self.node(from)?;
        let destination = self.node(to)?;
        if from == self.sink {
            return Err(EngineError::range("the final output cannot feed other nodes"));
        }
        if !source.has_output_connection(output) {
            return Err(EngineError::range(format!("{from} has no output connection {output}")));
        }
        if !destination.has_input_connection(input) {
            return Err(EngineError::range(format!("{to} has no input connection {input}")));
        }
        let edge = Edge {
            from,
            output,
            to,
            input,
        };
        if self
            .incoming
            .get(&to)
            .is_some_and(|incoming| incoming.edges.contains(&edge))
        {
            return Ok(());
        }
        if from == to || self.depends_on(from, to) {
            return Err(EngineError::Cycle { from, to });
        }
        self.incoming.entry(to).or_default().edges.push(edge);
        self.touch();
        Ok(())
    }

    /// Drives property `slot` of `to` from output connection `output` of
    /// `from`. The property must be automatable; edges that would close a
    /// cycle are rejected.
    pub fn connect_property(&mut self, from: NodeId, output: usize, to: NodeId, slot: Slot) -> Result<()> {
        let source = self.node(from)?;
        let destination = self.node(to)?;
        if from == self.sink {
            return Err(EngineError::range("the final output cannot feed other nodes"));
        }
        if !source.has_output_connection(output) {
            return Err(EngineError::range(format!("{from} has no output connection {output}")));
        }
        let automatable = destination
            .with_properties(|properties| properties.get(slot).map(Property::is_automatable))?;
        if !automatable {
            return Err(EngineError::mismatch(format!(
                "property {slot} of {to} cannot be driven by a node"
            )));
        }
        let edge = PropertyEdge {
            from,
            output,
            to,
            slot,
        };
        if self
            .incoming
            .get(&to)
            .is_some_and(|incoming| incoming.properties.contains(&edge))
        {
            return Ok(());
        }
        if from == to || self.depends_on(from, to) {
            return Err(EngineError::Cycle { from, to });
        }
        self.incoming.entry(to).or_default().properties.push(edge);
        self.touch();
        Ok(())
    }

    pub fn disconnect_property(&mut self, from: NodeId, output: usize, to: NodeId, slot: Slot) -> Result<bool> {
        self.node(from)?;
        self.node(to)?;
        let edge = PropertyEdge {
            from,
            output,
            to,
            slot,
        };
        let Some(incoming) = self.incoming.get_mut(&to) else {
            return Ok(false);
        };
        let before = incoming.properties.len();
        incoming.properties.retain(|existing| *existing != edge);
        let removed = incoming.properties.len() != before;
        if removed {
            self.touch();
        }
        Ok(removed)
    }

    pub fn connect_to_output(&mut self, from: NodeId, output: usize) -> Result<()> {
        self.connect(from, output, self.sink, 0)
    }

    pub fn disconnect(&mut self, from: NodeId, output: usize, to: NodeId, input: usize) -> Result<bool> {
        self.node(from)?;
        self.node(to)?;
        let edge = Edge {
            from,
            output,
            to,
            input,
        };
        let Some(incoming) = self.incoming.get_mut(&to) else {
            return Ok(false);
        };
        let before = incoming.edges.len();
        incoming.edges.retain(|existing| *existing != edge);
        let removed = incoming.edges.len() != before;
        if removed {
            self.touch();
        }
        Ok(removed)
    }

    /// Drops every edge leaving output connection `output` of `from`,
    /// including the ones driving properties.
    pub fn disconnect_output(&mut self, from: NodeId, output: usize) -> Result<usize> {
        self.node(from)?;
        let removed = self
            .incoming
            .values_mut()
            .map(|incoming| incoming.retain_sources(|source, index| !(source == from && index == output)))
            .sum::<usize>();
        if removed > 0 {
            self.touch();
        }
        Ok(removed)
    }

    pub fn set_state(&mut self, id: NodeId, state: NodeState) -> Result<()> {
        let cell = self.node(id)?;
        if id == self.sink && state == NodeState::Paused {
            return Err(EngineError::range("the final output cannot be paused"));
        }
        if cell.state() != state {
            cell.set_state(state);
            self.touch();
        }
        Ok(())
    }

    /// Changes the number of input and output channel buffers. Connections
    /// are left as they are; spans past the new counts carry no audio until
    /// reconfigured.
    pub fn resize(&mut self, id: NodeId, inputs: usize, outputs: usize) -> Result<()> {
        self.node(id)?.resize(inputs, outputs);
        self.touch();
        Ok(())
    }

    pub fn append_input_connection(&mut self, id: NodeId, start: usize, count: usize) -> Result<usize> {
        let index = self
            .node(id)?
            .append_input_connection(ConnectionSpan::new(start, count))?;
        self.touch();
        Ok(index)
    }

    pub fn append_output_connection(&mut self, id: NodeId, start: usize, count: usize) -> Result<usize> {
        let index = self
            .node(id)?
            .append_output_connection(ConnectionSpan::new(start, count))?;
        self.touch();
        Ok(index)
    }

    pub fn reconfigure_input(&mut self, id: NodeId, index: usize, start: usize, count: usize) -> Result<()> {
        self.node(id)?
            .set_input_connection(index, ConnectionSpan::new(start, count))?;
        self.touch();
        Ok(())
    }

    pub fn reconfigure_output(&mut self, id: NodeId, index: usize, start: usize, count: usize) -> Result<()> {
        self.node(id)?
            .set_output_connection(index, ConnectionSpan::new(start, count))?;
        self.touch();
        Ok(())
    }

    pub fn output_channels(&self) -> usize {
        self.node(self.sink)
            .map(|sink| sink.output_buffer_count())
            .unwrap_or_default()
    }

    /// Reshapes the sink for a driver asking for `channels` channels.
    pub fn set_output_channels(&mut self, channels: usize) -> Result<()> {
        if channels == self.output_channels() {
            return Ok(());
        }
        let sink = Arc::clone(self.node(self.sink)?);
        sink.resize(channels, channels);
        sink.set_input_connection(0, ConnectionSpan::new(0, channels))?;
        sink.set_output_connection(0, ConnectionSpan::new(0, channels))?;
        self.touch();
        tracing::debug!(channels, "final output reconfigured");
        Ok(())
    }

    /// Direct dependencies of `id` without duplicates: audio sources in edge
    /// order, then the nodes driving its properties. The sink additionally
    /// depends on every always-playing node.
    pub fn dependencies(&self, id: NodeId) -> Vec<NodeId> {
        let mut dependencies = Vec::new();
        for (from, _, _) in self.feeds(id) {
            if !dependencies.contains(&from) {
                dependencies.push(from);
            }
        }
        if id == self.sink {
            for (node, cell) in self.nodes.iter() {
                if node != id
                    && cell.state() == NodeState::AlwaysPlaying
                    && !dependencies.contains(&node)
                {
                    dependencies.push(node);
                }
            }
        }
        dependencies
    }

    /// Everything feeding `id`, as source, source output connection and the
    /// place the signal lands.
    pub fn feeds(&self, id: NodeId) -> impl Iterator<Item = (NodeId, usize, FeedTarget)> + '_ {
        self.incoming.get(&id).into_iter().flat_map(|incoming| {
            let audio = incoming
                .edges
                .iter()
                .map(|edge| (edge.from, edge.output, FeedTarget::Input(edge.input)));
            let properties = incoming
                .properties
                .iter()
                .map(|edge| (edge.from, edge.output, FeedTarget::Property(edge.slot)));
            audio.chain(properties)
        })
    }

    /// Whether `ancestor` is reachable by walking dependencies from `node`.
    pub fn depends_on(&self, node: NodeId, ancestor: NodeId) -> bool {
        let mut stack = vec![node];
        let mut seen = Vec::new();
        while let Some(current) = stack.pop() {
            for dependency in self.dependencies(current) {
                if dependency == ancestor {
                    return true;
                }
                if !seen.contains(&dependency) {
                    seen.push(dependency);
                    stack.push(dependency);
                }
            }
        }
        false
    }

    pub fn register_update_hook(&mut self, id: NodeId) -> Result<()> {
        self.node(id)?;
        if !self.hooks.contains(&id) {
            self.hooks.push(id);
        }
        Ok(())
    }

    pub fn unregister_update_hook(&mut self, id: NodeId) -> bool {
        let before = self.hooks.len();
        self.hooks.retain(|hook| *hook != id);
        before != self.hooks.len()
    }

    /// Live cells registered for per-block updates. Stale handles are
    /// skipped here and dropped by [`Graph::prune_update_hooks`].
    pub fn update_hooks(&self) -> impl Iterator<Item = &Arc<NodeCell>> + '_ {
        self.hooks.iter().filter_map(|id| self.nodes.get(*id))
    }

    /// Gives every registered node its per-block update.
    pub fn run_update_hooks(&self, block: &BlockInfo) {
        for cell in self.update_hooks() {
            cell.update(block);
        }
    }

    pub fn prune_update_hooks(&mut self) -> usize {
        let before = self.hooks.len();
        let nodes = &self.nodes;
        self.hooks.retain(|id| nodes.get(*id).is_some());
        before - self.hooks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Pass;

    impl Processor for Pass {
        fn name(&self) -> &'static str {
            "pass"
        }

        fn process(&mut self, context: &mut ProcessContext<'_>) {
            for (output, input) in context.outputs.iter_mut().zip(context.inputs) {
                output.copy_from_slice(input);
            }
        }
    }

    fn pass() -> NodeSpec {
        NodeSpec::new(Pass).inputs(&[1]).outputs(&[1])
    }

    #[test]
    fn rejects_cycles_and_self_loops() {
        let mut graph = Graph::new(4, 1);
        let a = graph.add_node(pass());
        let b = graph.add_node(pass());
        let c = graph.add_node(pass());
        graph.connect(a, 0, b, 0).unwrap();
        graph.connect(b, 0, c, 0).unwrap();
        assert_eq!(
            graph.connect(c, 0, a, 0),
            Err(EngineError::Cycle { from: c, to: a })
        );
        assert!(matches!(
            graph.connect(a, 0, a, 0),
            Err(EngineError::Cycle { .. })
        ));
        assert!(graph.depends_on(c, a));
        assert!(!graph.depends_on(a, c));
    }

    #[test]
    fn topology_changes_bump_the_version() {
        let mut graph = Graph::new(4, 1);
        let a = graph.add_node(pass());
        let v0 = graph.version();
        graph.connect_to_output(a, 0).unwrap();
        let v1 = graph.version();
        assert!(v1 > v0);
        graph.connect_to_output(a, 0).unwrap();
        assert_eq!(graph.version(), v1);
        graph.set_state(a, NodeState::Paused).unwrap();
        assert!(graph.version() > v1);
    }

    #[test]
    fn removed_nodes_take_their_edges() {
        let mut graph = Graph::new(4, 1);
        let a = graph.add_node(pass());
        graph.connect_to_output(a, 0).unwrap();
        graph.remove_node(a).unwrap();
        assert_eq!(graph.edges().count(), 0);
        assert_eq!(graph.node(a).err(), Some(EngineError::InvalidHandle(a)));
        assert!(graph.remove_node(graph.sink()).is_err());
    }

    #[test]
    fn sink_depends_on_always_playing_nodes() {
        let mut graph = Graph::new(4, 1);
        let a = graph.add_node(pass().state(NodeState::AlwaysPlaying));
        let b = graph.add_node(pass());
        assert_eq!(graph.dependencies(graph.sink()), vec![a]);
        graph.connect_to_output(b, 0).unwrap();
        assert_eq!(graph.dependencies(graph.sink()), vec![b, a]);
    }

    #[test]
    fn property_edges_count_as_dependencies() {
        use crate::property::slots;

        let mut graph = Graph::new(4, 1);
        let a = graph.add_node(pass());
        let b = graph.add_node(pass());
        let c = graph.add_node(pass());
        graph.connect_property(a, 0, b, slots::MUL).unwrap();
        graph.connect(c, 0, b, 0).unwrap();
        assert_eq!(graph.dependencies(b), vec![c, a]);
        assert!(matches!(
            graph.connect(b, 0, a, 0),
            Err(EngineError::Cycle { .. })
        ));
        assert!(matches!(
            graph.connect_property(a, 0, b, 99),
            Err(EngineError::Range(_))
        ));
        assert_eq!(graph.disconnect_output(a, 0).unwrap(), 1);
        assert_eq!(graph.dependencies(b), vec![c]);
    }

    #[test]
    fn only_numeric_properties_take_a_signal() {
        let mut graph = Graph::new(4, 1);
        let a = graph.add_node(pass());
        let b = graph.add_node(pass());
        graph
            .node(b)
            .unwrap()
            .with_properties(|properties| properties.insert(7, Property::int(1)));
        assert!(matches!(
            graph.connect_property(a, 0, b, 7),
            Err(EngineError::TypeMismatch(_))
        ));
        assert_eq!(graph.property_edges().count(), 0);
    }

    #[test]
    fn stale_hooks_are_pruned() {
        let mut graph = Graph::new(4, 1);
        let a = graph.add_node(pass());
        graph.register_update_hook(a).unwrap();
        graph.remove_node(a).unwrap();
        assert_eq!(graph.update_hooks().count(), 0);
        assert_eq!(graph.prune_update_hooks(), 1);
        let b = graph.add_node(pass());
        graph.register_update_hook(b).unwrap();
        assert!(graph.unregister_update_hook(b));
    }
}
