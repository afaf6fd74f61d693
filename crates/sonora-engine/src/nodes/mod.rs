//! Built-in node kinds.

mod constant;
mod gain;
mod mixer;
mod recorder;

pub use constant::Constant;
pub use gain::Gain;
pub use mixer::Mixer;
pub use recorder::{Recorder, RecorderHandle};
