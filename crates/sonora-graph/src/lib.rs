//! Node graph, property automation and dependency planning for sonora.
//!
//! Nodes live in a generational arena owned by [`Graph`]. Each node wraps a
//! [`Processor`] together with its property table and channel buffers. The
//! [`Planner`] turns everything a root depends on into an ordered, cached
//! [`Plan`] and runs it either on the calling thread or across a worker pool.

pub mod arena;
pub mod automation;
pub mod connection;
pub mod error;
pub mod graph;
pub mod node;
pub mod planner;
pub mod property;

pub use arena::NodeId;
pub use automation::{Automator, Curve};
pub use connection::{mix_into, ConnectionSpan, Edge, FeedTarget, PropertyEdge};
pub use error::{EngineError, ErrorKind, Result};
pub use graph::Graph;
pub use node::{BlockInfo, NodeCell, NodeSpec, NodeState, ProcessContext, Processor};
pub use planner::{build_plan, Job, Plan, PlanStats, Planner};
pub use property::{slots, Property, PropertyKind, PropertyTable, PropertyValue, Slot};
