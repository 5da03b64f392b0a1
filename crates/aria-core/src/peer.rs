//! Capability traits for the external collaborators of a session.
//!
//! The controller only ever talks to these traits, so the whole state
//! machine runs in tests against fakes with no device or network behind it.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;

/// One fixed-size chunk of encoded captured audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Base64 PCM16 payload.
    pub data: String,
    pub mime_type: String,
}

/// Events a live session surfaces to the controller, already translated out
/// of the wire format.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    /// The service confirmed setup; realtime input is accepted from here on.
    Ready,
    /// Transcription delta for the user's audio.
    InputTranscript(String),
    /// Transcription delta for the model's reply.
    OutputTranscript(String),
    /// Base64 PCM16 audio delta of the model's reply.
    Audio { data: String },
    TurnComplete,
    Interrupted,
    TransportError(String),
    Closed,
}

/// Opens live sessions. At most one session exists at a time; the controller
/// enforces that by owning the returned handle exclusively.
#[async_trait]
pub trait LiveConnector: Send {
    async fn connect(&mut self) -> anyhow::Result<Box<dyn LiveSession>>;
}

/// An open bidirectional session with the conversational service.
#[async_trait]
pub trait LiveSession: Send {
    /// Takes the inbound event stream. May only be called once per session.
    async fn events(&mut self) -> anyhow::Result<mpsc::Receiver<LiveEvent>>;

    async fn send_frame(&mut self, frame: AudioFrame) -> anyhow::Result<()>;

    /// Closes the session and releases its transport. Idempotent.
    async fn close(&mut self);
}

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("microphone access was denied")]
    PermissionDenied,
    #[error("audio capture unavailable: {0}")]
    Unavailable(String),
}

/// The microphone capability: a restartable source of encoded frames.
#[async_trait]
pub trait CaptureSource: Send {
    /// Acquires the capture device and starts emitting frames at device
    /// rate. A failed acquisition leaves nothing running.
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>, CaptureError>;

    /// Releases the capture device. A no-op when never started.
    fn stop(&mut self);
}

/// Turn-based chat peer used when no live session is open.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait ChatModel: Send {
    async fn send(&mut self, text: &str) -> anyhow::Result<String>;
}

/// Speech synthesis peer for text-mode replies.
#[async_trait]
#[cfg_attr(test, automock)]
pub trait SpeechSynthesizer: Send {
    /// Returns the reply audio as base64 PCM16 at the playback rate.
    async fn synthesize(&mut self, text: &str, voice: &str) -> anyhow::Result<String>;
}
