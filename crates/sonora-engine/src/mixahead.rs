//! Look-ahead rendering.
//!
//! A dedicated thread renders blocks from a [`Simulation`] ahead of time into
//! a small ring of buffers. The consumer, typically an audio device callback,
//! reads interleaved frames out of the ring without touching the simulation
//! lock and hands exhausted buffers back for re-use.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use sonora_rt::{enter_audio_thread, RtQueue};

use crate::config::MixaheadConfig;
use crate::latency::LatencyPredictor;
use crate::simulation::Simulation;

struct MixBuffer {
    samples: Vec<f32>,
    /// Frames already handed to the consumer.
    consumed: usize,
}

enum Command {
    Render(MixBuffer),
    Stop,
}

/// Handle to a running look-ahead render thread.
pub struct MixaheadRenderer {
    prepared: RtQueue<MixBuffer>,
    returned: Sender<Command>,
    ready: Receiver<()>,
    primed: bool,
    current: Option<MixBuffer>,
    predictor: Arc<Mutex<LatencyPredictor>>,
    frames: usize,
    channels: usize,
    sample_rate: u32,
    underruns: u64,
    render_thread: Option<JoinHandle<()>>,
}

impl MixaheadRenderer {
    /// Spawns the render thread and starts filling the ring.
    pub fn start(
        simulation: Arc<Simulation>,
        channels: usize,
        config: MixaheadConfig,
    ) -> anyhow::Result<Self> {
        let channels = channels.max(1);
        let frames = simulation.block_size();
        let sample_rate = simulation.sample_rate();
        let blocks = config.blocks.max(1);

        let prepared = RtQueue::with_capacity(blocks);
        let (returned, commands) = crossbeam_channel::bounded(blocks + 1);
        for _ in 0..blocks {
            returned
                .send(Command::Render(MixBuffer {
                    samples: vec![0.0; frames * channels],
                    consumed: 0,
                }))
                .map_err(|_| anyhow!("mixahead command channel closed during setup"))?;
        }
        let (ready_tx, ready) = crossbeam_channel::bounded(1);
        let predictor = Arc::new(Mutex::new(LatencyPredictor::new(&config)));

        let render_thread = thread::Builder::new()
            .name("sonora-mixahead".into())
            .spawn({
                let prepared = prepared.clone();
                let predictor = Arc::clone(&predictor);
                move || render_loop(simulation, prepared, commands, ready_tx, predictor, channels, blocks)
            })
            .context("failed to spawn mixahead render thread")?;

        tracing::info!(blocks, frames, channels, "mixahead renderer started");
        Ok(Self {
            prepared,
            returned,
            ready,
            primed: false,
            current: None,
            predictor,
            frames,
            channels,
            sample_rate,
            underruns: 0,
            render_thread: Some(render_thread),
        })
    }

    /// Blocks until the whole ring has been rendered once. Returns `false` if
    /// the render thread went away first.
    pub fn await_initial_mix(&mut self) -> bool {
        if !self.primed {
            self.primed = self.ready.recv().is_ok();
        }
        self.primed
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Consumer-side underruns so far.
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Blocks of look-ahead the observed render times call for.
    pub fn predicted_blocks(&self) -> usize {
        self.predictor
            .lock()
            .predict_latency_in_blocks(self.frames, self.sample_rate)
    }

    /// Fills `dest` with interleaved frames, continuing part-way through a
    /// block where the previous read stopped. Returns the frames delivered;
    /// anything short of a full read is silenced and counted as an underrun.
    pub fn read(&mut self, dest: &mut [f32]) -> usize {
        let channels = self.channels;
        let wanted = dest.len() / channels;
        let mut written = 0;
        while written < wanted {
            if self.current.is_none() {
                self.current = self.prepared.pop();
            }
            let Some(buffer) = self.current.as_mut() else {
                break;
            };
            let count = (self.frames - buffer.consumed).min(wanted - written);
            let source = &buffer.samples[buffer.consumed * channels..(buffer.consumed + count) * channels];
            dest[written * channels..(written + count) * channels].copy_from_slice(source);
            buffer.consumed += count;
            written += count;
            if buffer.consumed == self.frames {
                if let Some(mut spent) = self.current.take() {
                    spent.consumed = 0;
                    if self.returned.try_send(Command::Render(spent)).is_err() {
                        tracing::error!("mixahead render thread is gone; dropping buffer");
                    }
                }
            }
        }
        if written < wanted {
            dest[written * channels..].fill(0.0);
            self.underruns += 1;
            self.predictor.lock().had_underrun();
            tracing::warn!(wanted, written, "mixahead underrun");
        }
        written
    }

    /// Stops the render thread and waits for it to finish.
    pub fn shutdown(mut self) -> anyhow::Result<()> {
        self.stop()
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        let Some(handle) = self.render_thread.take() else {
            return Ok(());
        };
        // The thread may already have exited on its own.
        let _ = self.returned.send(Command::Stop);
        handle
            .join()
            .map_err(|_| anyhow!("mixahead render thread panicked"))
    }
}

impl Drop for MixaheadRenderer {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::error!(?err, "failed to join mixahead render thread");
        }
    }
}

fn render_loop(
    simulation: Arc<Simulation>,
    prepared: RtQueue<MixBuffer>,
    commands: Receiver<Command>,
    ready: Sender<()>,
    predictor: Arc<Mutex<LatencyPredictor>>,
    channels: usize,
    blocks: usize,
) {
    enter_audio_thread();
    let mut rendered = 0;
    while let Ok(Command::Render(mut buffer)) = commands.recv() {
        predictor.lock().begin_pass();
        simulation.get_block(&mut buffer.samples, channels);
        predictor.lock().end_pass();
        if prepared.push(buffer).is_err() {
            tracing::error!("mixahead ring overflowed; stopping render thread");
            return;
        }
        if rendered < blocks {
            rendered += 1;
            if rendered == blocks {
                let _ = ready.try_send(());
            }
        }
    }
    tracing::debug!("mixahead render thread stopped");
}
