use std::ops::Range;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::arena::NodeId;
use crate::node::NodeCell;
use crate::property::Slot;

/// Contiguous run of channel buffers belonging to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionSpan {
    pub start: usize,
    pub count: usize,
}

impl ConnectionSpan {
    pub fn new(start: usize, count: usize) -> Self {
        Self { start, count }
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.count
    }

    pub fn end(&self) -> usize {
        self.start + self.count
    }
}

/// Directed edge from one node's output connection to another node's input
/// connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub output: usize,
    pub to: NodeId,
    pub input: usize,
}

/// Directed edge from one node's output connection to a property of another
/// node. The source is mixed down to mono and added to the property's
/// per-sample values every block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyEdge {
    pub from: NodeId,
    pub output: usize,
    pub to: NodeId,
    pub slot: Slot,
}

/// Where a feed lands on the consuming node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedTarget {
    Input(usize),
    Property(Slot),
}

/// A feed resolved for one block: the source cell is held strongly until the
/// block completes.
pub(crate) struct LiveFeed {
    pub(crate) source: Arc<NodeCell>,
    pub(crate) output: usize,
    pub(crate) target: FeedTarget,
}

/// Sums `source` channels into `dest`, adapting mismatched channel counts:
/// mono is broadcast, a multichannel source folded into mono is averaged, and
/// otherwise the common channels are added pairwise.
pub fn mix_into(source: &[Vec<f32>], dest: &mut [Vec<f32>]) {
    match (source.len(), dest.len()) {
        (0, _) | (_, 0) => {}
        (1, n) if n > 1 => {
            for channel in dest.iter_mut() {
                accumulate(channel, &source[0], 1.0);
            }
        }
        (n, 1) if n > 1 => {
            let scale = 1.0 / n as f32;
            for channel in source {
                accumulate(&mut dest[0], channel, scale);
            }
        }
        _ => {
            for (channel, input) in dest.iter_mut().zip(source) {
                accumulate(channel, input, 1.0);
            }
        }
    }
}

#[inline]
fn accumulate(dest: &mut [f32], source: &[f32], scale: f32) {
    for (out, sample) in dest.iter_mut().zip(source) {
        *out += sample * scale;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_counts_add_pairwise() {
        let source = vec![vec![1.0, 2.0], vec![3.0, 4.0]];
        let mut dest = vec![vec![1.0, 1.0], vec![0.0, 0.0]];
        mix_into(&source, &mut dest);
        assert_eq!(dest, vec![vec![2.0, 3.0], vec![3.0, 4.0]]);
    }

    #[test]
    fn mono_broadcasts_and_folds() {
        let mono = vec![vec![0.5; 2]];
        let mut stereo = vec![vec![0.0; 2]; 2];
        mix_into(&mono, &mut stereo);
        assert_eq!(stereo, vec![vec![0.5; 2]; 2]);

        let stereo = vec![vec![1.0; 2], vec![0.0; 2]];
        let mut mono = vec![vec![0.0; 2]];
        mix_into(&stereo, &mut mono);
        assert_eq!(mono, vec![vec![0.5; 2]]);
    }

    #[test]
    fn surplus_channels_are_dropped() {
        let source = vec![vec![1.0]; 4];
        let mut dest = vec![vec![0.0]; 2];
        mix_into(&source, &mut dest);
        assert_eq!(dest, vec![vec![1.0]; 2]);
    }
}
