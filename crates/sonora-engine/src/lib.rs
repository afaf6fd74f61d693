//! Simulation driver for the sonora audio engine.
//!
//! [`Simulation`] owns a node graph and renders it block by block, either
//! serially or across a worker pool. [`MixaheadRenderer`] runs a simulation
//! ahead of an audio device on its own thread.

pub mod config;
pub mod error;
pub mod latency;
pub mod mixahead;
pub mod nodes;
pub mod simulation;

pub use config::{ConfigError, MixaheadConfig, SimulationConfig};
pub use error::{ErrorContext, ErrorRecord};
pub use latency::LatencyPredictor;
pub use mixahead::MixaheadRenderer;
pub use simulation::{BlockCallback, Scene, Simulation};

pub use sonora_graph::{
    slots, BlockInfo, EngineError, ErrorKind, NodeId, NodeSpec, NodeState, ProcessContext, Processor,
    Property, PropertyTable, PropertyValue, Result, Slot,
};
