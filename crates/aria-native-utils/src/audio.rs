use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate of microphone audio sent to the realtime service.
pub const CAPTURE_SAMPLE_RATE: f64 = 16000.0;
/// Sample rate of synthesized audio received from the service.
pub const PLAYBACK_SAMPLE_RATE: f64 = 24000.0;
/// Mime type attached to every captured frame.
pub const CAPTURE_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits a slice of samples into fixed-size chunks, zero-padding the last one.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Encodes raw bytes as base64 text safe for the JSON transport.
///
/// Inverse of [`decode`]: `decode(&encode(b)) == b` for any byte sequence.
pub fn encode(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decodes base64 text back into raw bytes.
///
/// Malformed input is logged and yields an empty vector rather than an error,
/// so a single corrupt frame cannot take down the session.
pub fn decode(text: &str) -> Vec<u8> {
    match base64::engine::general_purpose::STANDARD.decode(text) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("failed to decode base64 audio fragment: {e}");
            Vec::new()
        }
    }
}

/// Converts i16 PCM samples to normalized f32 samples in [-1.0, 1.0].
pub fn pcm16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Converts normalized f32 samples to i16 PCM.
///
/// Input outside [-1.0, 1.0] saturates at the i16 range rather than wrapping;
/// NaN maps to 0 via the clamp.
pub fn f32_to_pcm16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

/// A trait for converting audio sample slices to little-endian PCM16 bytes.
pub trait ToPcmBytes {
    fn to_pcm_bytes(&self) -> Vec<u8>;
}

impl ToPcmBytes for [i16] {
    fn to_pcm_bytes(&self) -> Vec<u8> {
        self.iter()
            .flat_map(|&sample| sample.to_le_bytes())
            .collect()
    }
}

impl ToPcmBytes for [f32] {
    fn to_pcm_bytes(&self) -> Vec<u8> {
        self.iter()
            .flat_map(|&sample| {
                let v = (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
                v.to_le_bytes()
            })
            .collect()
    }
}

/// Encodes normalized f32 samples as base64 PCM16, the outbound frame format.
pub fn encode_f32(pcm32: &[f32]) -> String {
    encode(&pcm32.to_pcm_bytes())
}

/// A decoded audio buffer: one normalized f32 plane per channel.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration of the buffer in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn plane(&self, channel: usize) -> &[f32] {
        &self.channels[channel]
    }

    /// Mixes all channels down to a single mono plane.
    pub fn to_mono(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => (0..self.frames())
                .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() / n as f32)
                .collect(),
        }
    }
}

/// Decodes interleaved little-endian PCM16 bytes into a playable buffer.
///
/// De-interleaves into one plane per channel and normalizes to f32.
/// A trailing odd byte is discarded.
pub fn decode_audio_frame(bytes: &[u8], sample_rate: u32, channel_count: usize) -> AudioBuffer {
    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();
    let channel_count = channel_count.max(1);
    let frame_count = samples.len() / channel_count;
    let channels = (0..channel_count)
        .map(|channel| {
            (0..frame_count)
                .map(|i| samples[i * channel_count + channel] as f32 / 32768.0)
                .collect()
        })
        .collect();
    AudioBuffer::new(channels, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn base64_round_trips_arbitrary_bytes() {
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x00],
            vec![0xff, 0x00, 0x7f, 0x80],
            (0..=255u8).collect(),
        ];
        for bytes in cases {
            assert_eq!(decode(&encode(&bytes)), bytes);
        }
    }

    #[test]
    fn decode_rejects_malformed_input() {
        assert!(decode("not base64!!").is_empty());
    }

    #[test]
    fn pcm16_round_trips_within_one_unit() {
        let samples = vec![0i16, 1, -1, 1000, -1000, 16384, i16::MAX, i16::MIN];
        let restored = f32_to_pcm16(&pcm16_to_f32(&samples));
        for (orig, got) in samples.iter().zip(restored.iter()) {
            assert!((*orig as i32 - *got as i32).abs() <= 1, "{orig} vs {got}");
        }
    }

    #[test]
    fn f32_to_pcm16_saturates_out_of_range() {
        let out = f32_to_pcm16(&[2.0, -2.0, f32::INFINITY, f32::NEG_INFINITY]);
        assert_eq!(out, vec![i16::MAX, i16::MIN, i16::MAX, i16::MIN]);
    }

    #[test]
    fn encode_f32_round_trips_through_frame_decoder() {
        let samples = vec![0.0f32, 0.5, -0.5, 0.25];
        let bytes = decode(&encode_f32(&samples));
        let buffer = decode_audio_frame(&bytes, 16000, 1);
        assert_eq!(buffer.frames(), samples.len());
        for (orig, got) in samples.iter().zip(buffer.plane(0).iter()) {
            assert_abs_diff_eq!(*orig, *got, epsilon = 0.001);
        }
    }

    #[test]
    fn decode_audio_frame_deinterleaves_stereo() {
        // Two frames of [left, right]: [0.25, -0.25], [0.5, -0.5].
        let left = f32_to_pcm16(&[0.25, 0.5]);
        let right = f32_to_pcm16(&[-0.25, -0.5]);
        let mut bytes = Vec::new();
        for i in 0..2 {
            bytes.extend(left[i].to_le_bytes());
            bytes.extend(right[i].to_le_bytes());
        }
        let buffer = decode_audio_frame(&bytes, 24000, 2);
        assert_eq!(buffer.channel_count(), 2);
        assert_eq!(buffer.frames(), 2);
        assert_abs_diff_eq!(buffer.plane(0)[0], 0.25, epsilon = 0.001);
        assert_abs_diff_eq!(buffer.plane(1)[1], -0.5, epsilon = 0.001);
    }

    #[test]
    fn decode_audio_frame_drops_trailing_odd_byte() {
        let buffer = decode_audio_frame(&[0x00, 0x40, 0x01], 24000, 1);
        assert_eq!(buffer.frames(), 1);
    }

    #[test]
    fn buffer_duration_follows_sample_rate() {
        let buffer = AudioBuffer::new(vec![vec![0.0; 24000]], 24000);
        assert_abs_diff_eq!(buffer.duration(), 1.0, epsilon = 1e-9);
        let buffer = AudioBuffer::new(vec![vec![0.0; 12000]], 24000);
        assert_abs_diff_eq!(buffer.duration(), 0.5, epsilon = 1e-9);
    }

    #[test]
    fn split_pads_final_chunk() {
        let chunks = split_for_chunks(&[1.0, 2.0, 3.0], 2);
        assert_eq!(chunks, vec![vec![1.0, 2.0], vec![3.0, 0.0]]);
    }

    #[test]
    fn resampler_accepts_protocol_rates() {
        assert!(create_resampler(48000.0, CAPTURE_SAMPLE_RATE, 1024).is_ok());
        assert!(create_resampler(PLAYBACK_SAMPLE_RATE, 44100.0, 1024).is_ok());
    }
}
