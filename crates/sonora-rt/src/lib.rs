//! Worker pool and real-time primitives shared across the sonora engine.

pub mod metrics;
pub mod pool;
pub mod queue;
pub mod thread;

pub use metrics::{BlockMetrics, BlockTiming};
pub use pool::{JobHandle, PoolError, ThreadPool};
pub use queue::{Full, RtQueue};
pub use thread::{enter_audio_thread, flush_denormals};
