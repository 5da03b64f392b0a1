//! Scheduled-source playback over a cpal output stream.
//!
//! Implements the scheduler's `AudioContext` capability: a sample queue the
//! device callback drains, a frames-rendered counter as the shared clock,
//! and per-source completion signals fired when a source's last sample has
//! been rendered. Like capture, the stream itself lives on a dedicated
//! thread because cpal streams are not `Send`.

use aria_core::scheduler::{AudioContext, SourceId};
use aria_native_utils::audio::{self, AudioBuffer};
use aria_native_utils::device;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use rubato::Resampler;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Samples per device buffer.
const OUTPUT_CHUNK_SIZE: usize = 1024;

struct PendingDone {
    end_frame: u64,
    done: oneshot::Sender<()>,
}

pub struct CpalAudioContext {
    queue: Arc<Mutex<VecDeque<f32>>>,
    pending: Arc<Mutex<Vec<PendingDone>>>,
    clock_frames: Arc<AtomicU64>,
    device_rate: f64,
    resampler: rubato::FastFixedIn<f32>,
    next_id: SourceId,
    ctrl: Option<std::sync::mpsc::Sender<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CpalAudioContext {
    /// Acquires the output device and starts the render thread.
    pub fn open(device_name: Option<String>) -> anyhow::Result<Self> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let pending: Arc<Mutex<Vec<PendingDone>>> = Arc::new(Mutex::new(Vec::new()));
        let clock_frames = Arc::new(AtomicU64::new(0));

        let (ctrl_tx, ctrl_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<anyhow::Result<f64>>();

        {
            let queue = queue.clone();
            let pending = pending.clone();
            let clock_frames = clock_frames.clone();
            std::thread::spawn(move || {
                run_output(device_name, queue, pending, clock_frames, ctrl_rx, ready_tx)
            });
        }

        let device_rate = ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("output thread exited during setup"))??;
        let resampler =
            audio::create_resampler(audio::PLAYBACK_SAMPLE_RATE, device_rate, OUTPUT_CHUNK_SIZE)?;

        Ok(Self {
            queue,
            pending,
            clock_frames,
            device_rate,
            resampler,
            next_id: 0,
            ctrl: Some(ctrl_tx),
        })
    }

    fn resample_to_device(&mut self, buffer: &AudioBuffer) -> Vec<f32> {
        let mono = buffer.to_mono();
        if (buffer.sample_rate() as f64 - self.device_rate).abs() < f64::EPSILON {
            return mono;
        }
        let chunk_size = self.resampler.input_frames_next();
        let mut samples = Vec::new();
        for piece in audio::split_for_chunks(&mono, chunk_size) {
            if let Ok(out) = self.resampler.process(&[piece.as_slice()], None) {
                if let Some(out) = out.first() {
                    samples.extend_from_slice(out);
                }
            }
        }
        samples
    }
}

impl AudioContext for CpalAudioContext {
    fn now(&self) -> f64 {
        self.clock_frames.load(Ordering::SeqCst) as f64 / self.device_rate
    }

    fn start_source(
        &mut self,
        buffer: AudioBuffer,
        start: f64,
    ) -> (SourceId, oneshot::Receiver<()>) {
        self.next_id += 1;
        let id = self.next_id;
        let (done_tx, done_rx) = oneshot::channel();

        let samples = self.resample_to_device(&buffer);

        let mut queue = lock(&self.queue);
        let now_frames = self.clock_frames.load(Ordering::SeqCst);
        let now_secs = now_frames as f64 / self.device_rate;
        // Lead-in silence so this source begins at `start`, minus whatever
        // is already queued ahead of it. For back-to-back buffers the queue
        // backlog covers the whole lead and no silence is inserted.
        let lead_frames = ((start - now_secs).max(0.0) * self.device_rate).round() as u64;
        let backlog = queue.len() as u64;
        if lead_frames > backlog {
            queue.extend(std::iter::repeat(0.0).take((lead_frames - backlog) as usize));
        }
        let end_frame = now_frames + queue.len() as u64 + samples.len() as u64;
        queue.extend(samples);
        drop(queue);

        lock(&self.pending).push(PendingDone {
            end_frame,
            done: done_tx,
        });
        (id, done_rx)
    }

    fn stop_all_sources(&mut self) {
        lock(&self.queue).clear();
        for source in lock(&self.pending).drain(..) {
            let _ = source.done.send(());
        }
    }

    fn close(&mut self) {
        self.stop_all_sources();
        // Dropping the control sender ends the render thread and with it
        // the output stream.
        self.ctrl = None;
    }
}

fn run_output(
    device_name: Option<String>,
    queue: Arc<Mutex<VecDeque<f32>>>,
    pending: Arc<Mutex<Vec<PendingDone>>>,
    clock_frames: Arc<AtomicU64>,
    ctrl: std::sync::mpsc::Receiver<()>,
    ready: std::sync::mpsc::Sender<anyhow::Result<f64>>,
) {
    let build = move || -> anyhow::Result<(cpal::Stream, f64)> {
        let output = device::get_or_default_output(device_name)?;
        tracing::info!("using output device: {:?}", output.name().ok());

        let default_config = output.default_output_config()?;
        let config = StreamConfig {
            channels: default_config.channels(),
            sample_rate: default_config.sample_rate(),
            buffer_size: cpal::BufferSize::Fixed(FrameCount::from(OUTPUT_CHUNK_SIZE as u32)),
        };
        let channel_count = config.channels as usize;
        let device_rate = config.sample_rate.0 as f64;
        tracing::debug!("output stream config: {config:?}");

        let data_fn = move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            {
                let mut queue = lock(&queue);
                // Same mono sample on every channel; silence on underrun.
                for frame in data.chunks_mut(channel_count) {
                    let sample = queue.pop_front().unwrap_or(0.0);
                    for slot in frame.iter_mut() {
                        *slot = sample;
                    }
                }
            }
            let frames_rendered = (data.len() / channel_count) as u64;
            let played = clock_frames.fetch_add(frames_rendered, Ordering::SeqCst) + frames_rendered;

            // Fire completions whose last frame has now been rendered.
            let mut pending = lock(&pending);
            let mut i = 0;
            while i < pending.len() {
                if pending[i].end_frame <= played {
                    let source = pending.swap_remove(i);
                    let _ = source.done.send(());
                } else {
                    i += 1;
                }
            }
        };

        let stream = output.build_output_stream(
            &config,
            data_fn,
            move |err| tracing::error!("output stream error: {err}"),
            None,
        )?;
        stream.play()?;
        Ok((stream, device_rate))
    };

    match build() {
        Ok((stream, device_rate)) => {
            let _ = ready.send(Ok(device_rate));
            // Keep the stream alive until the context is closed.
            let _ = ctrl.recv();
            drop(stream);
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}
