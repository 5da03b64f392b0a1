//! Microphone capture pipeline: device buffers in, encoded frames out.
//!
//! The cpal stream is not `Send`, so each capture runs on its own thread
//! that owns the stream; dropping the control sender releases the device.

use aria_core::peer::{AudioFrame, CaptureError, CaptureSource};
use aria_native_utils::{audio, device};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FrameCount, StreamConfig};
use rubato::Resampler;
use std::collections::VecDeque;
use tokio::sync::mpsc;

/// Samples per device buffer; also the resampler's input chunk size.
const INPUT_CHUNK_SIZE: usize = 1024;
/// Samples per emitted frame at the capture rate.
const FRAME_SIZE: usize = 4096;

pub struct CpalCapture {
    device_name: Option<String>,
    ctrl: Option<std::sync::mpsc::Sender<()>>,
}

impl CpalCapture {
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            ctrl: None,
        }
    }
}

#[async_trait]
impl CaptureSource for CpalCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError> {
        self.stop();

        let device_name = self.device_name.clone();
        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(64);
        let (ctrl_tx, ctrl_rx) = std::sync::mpsc::channel::<()>();
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

        std::thread::spawn(move || run_capture(device_name, frame_tx, ctrl_rx, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => {
                self.ctrl = Some(ctrl_tx);
                Ok(frame_rx)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::Unavailable(
                "capture thread exited during setup".to_string(),
            )),
        }
    }

    fn stop(&mut self) {
        // Dropping the control sender unblocks the capture thread, which
        // drops the stream and releases the device.
        self.ctrl = None;
    }
}

fn run_capture(
    device_name: Option<String>,
    frames: mpsc::Sender<AudioFrame>,
    ctrl: std::sync::mpsc::Receiver<()>,
    ready: tokio::sync::oneshot::Sender<Result<(), CaptureError>>,
) {
    let stream = match build_input_stream(device_name, frames) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = stream.play() {
        let _ = ready.send(Err(CaptureError::Unavailable(e.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));

    // Block until the controller drops its sender, then let the stream drop.
    let _ = ctrl.recv();
}

fn build_input_stream(
    device_name: Option<String>,
    frames: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream, CaptureError> {
    let input = device::get_or_default_input(device_name)
        .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
    tracing::info!("using input device: {:?}", input.name().ok());

    let default_config = input
        .default_input_config()
        .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
    let config = StreamConfig {
        channels: default_config.channels(),
        sample_rate: default_config.sample_rate(),
        buffer_size: cpal::BufferSize::Fixed(FrameCount::from(INPUT_CHUNK_SIZE as u32)),
    };
    let channel_count = config.channels as usize;
    let input_rate = config.sample_rate.0 as f64;
    tracing::debug!("input stream config: {config:?}");

    let mut resampler =
        audio::create_resampler(input_rate, audio::CAPTURE_SAMPLE_RATE, INPUT_CHUNK_SIZE)
            .map_err(|e| CaptureError::Unavailable(e.to_string()))?;
    let mut pending: VecDeque<f32> = VecDeque::with_capacity(INPUT_CHUNK_SIZE * 2);
    let mut resampled: VecDeque<f32> = VecDeque::with_capacity(FRAME_SIZE * 2);

    let data_fn = move |data: &[f32], _: &cpal::InputCallbackInfo| {
        // Mix multichannel input down to mono before resampling.
        if channel_count > 1 {
            pending.extend(
                data.chunks(channel_count)
                    .map(|c| c.iter().sum::<f32>() / channel_count as f32),
            );
        } else {
            pending.extend(data.iter().copied());
        }

        while pending.len() >= INPUT_CHUNK_SIZE {
            let chunk: Vec<f32> = pending.drain(..INPUT_CHUNK_SIZE).collect();
            if let Ok(out) = resampler.process(&[chunk.as_slice()], None) {
                if let Some(out) = out.first() {
                    resampled.extend(out.iter().copied());
                }
            }
        }

        while resampled.len() >= FRAME_SIZE {
            let frame: Vec<f32> = resampled.drain(..FRAME_SIZE).collect();
            let frame = AudioFrame {
                data: audio::encode_f32(&frame),
                mime_type: audio::CAPTURE_MIME_TYPE.to_string(),
            };
            // Frames are produced at device rate; a slow consumer loses
            // frames rather than stalling the device callback.
            if let Err(e) = frames.try_send(frame) {
                tracing::warn!("dropping capture frame: {e}");
            }
        }
    };

    input
        .build_input_stream(
            &config,
            data_fn,
            move |err| tracing::error!("input stream error: {err}"),
            None,
        )
        .map_err(|e| match e {
            // A denied microphone surfaces as an unavailable device.
            cpal::BuildStreamError::DeviceNotAvailable => CaptureError::PermissionDenied,
            other => CaptureError::Unavailable(other.to_string()),
        })
}
