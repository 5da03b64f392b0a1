//! The session controller: one task owning the realtime pipeline and every
//! piece of mutable conversation state.
//!
//! Audio callbacks, protocol tasks, and the UI all talk to the controller
//! through channels; the controller is the only mutator of status, message
//! log, transcript accumulators, and the in-flight playback set. Everything
//! that crosses an await boundary is tagged with the session generation so
//! callbacks of a closed session become no-ops.

use crate::assistant::{AssistantState, AssistantStatus, Message, Snapshot};
use crate::peer::{
    AudioFrame, CaptureError, CaptureSource, ChatModel, LiveConnector, LiveEvent, LiveSession,
    SpeechSynthesizer,
};
use crate::scheduler::{ContextFactory, PlaybackScheduler, SourceId};
use crate::transcript::TranscriptAccumulator;
use aria_native_utils::audio;
use tokio::sync::{mpsc, watch};

/// Commands from the UI layer.
#[derive(Debug)]
pub enum Command {
    ToggleSession,
    SendText(String),
    Shutdown,
}

/// Everything the controller reacts to besides commands.
#[derive(Debug)]
enum Event {
    Live { generation: u64, event: LiveEvent },
    Frame { generation: u64, frame: AudioFrame },
    PlaybackDone { generation: u64, id: SourceId },
}

/// The UI's grip on the controller: a command sender and a snapshot watch.
pub struct SessionHandle {
    pub commands: mpsc::Sender<Command>,
    pub snapshots: watch::Receiver<Snapshot>,
}

pub struct SessionController {
    assistant: AssistantState,
    transcript: TranscriptAccumulator,
    scheduler: PlaybackScheduler,
    connector: Box<dyn LiveConnector>,
    capture: Box<dyn CaptureSource>,
    chat: Box<dyn ChatModel>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    voice: String,
    live: Option<Box<dyn LiveSession>>,
    generation: u64,
    events_tx: mpsc::Sender<Event>,
    events_rx: Option<mpsc::Receiver<Event>>,
    commands_rx: Option<mpsc::Receiver<Command>>,
}

impl SessionController {
    pub fn new(
        connector: Box<dyn LiveConnector>,
        capture: Box<dyn CaptureSource>,
        chat: Box<dyn ChatModel>,
        synthesizer: Box<dyn SpeechSynthesizer>,
        playback: ContextFactory,
        voice: String,
    ) -> (Self, SessionHandle) {
        let (assistant, snapshots) = AssistantState::new();
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (events_tx, events_rx) = mpsc::channel(256);
        let controller = Self {
            assistant,
            transcript: TranscriptAccumulator::new(),
            scheduler: PlaybackScheduler::new(playback),
            connector,
            capture,
            chat,
            synthesizer,
            voice,
            live: None,
            generation: 0,
            events_tx,
            events_rx: Some(events_rx),
            commands_rx: Some(commands_rx),
        };
        let handle = SessionHandle {
            commands: commands_tx,
            snapshots,
        };
        (controller, handle)
    }

    /// Drives the controller until shutdown or until both channels close.
    pub async fn run(mut self) {
        let Some(mut commands) = self.commands_rx.take() else {
            return;
        };
        let Some(mut events) = self.events_rx.take() else {
            return;
        };
        loop {
            tokio::select! {
                Some(command) = commands.recv() => {
                    if matches!(command, Command::Shutdown) {
                        self.teardown_session().await;
                        self.assistant.set_status(AssistantStatus::Idle);
                        break;
                    }
                    self.handle_command(command).await;
                }
                Some(event) = events.recv() => {
                    self.handle_event(event).await;
                }
                else => break,
            }
        }
        tracing::info!("session controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::ToggleSession => self.toggle_session().await,
            Command::SendText(text) => self.send_text(text).await,
            Command::Shutdown => {}
        }
    }

    async fn toggle_session(&mut self) {
        match self.assistant.status() {
            AssistantStatus::Idle | AssistantStatus::Error => self.start_session().await,
            _ => {
                self.teardown_session().await;
                self.assistant.set_status(AssistantStatus::Idle);
            }
        }
    }

    async fn start_session(&mut self) {
        self.assistant.clear_error();
        self.assistant.clear_messages();
        self.assistant.set_status(AssistantStatus::Connecting);

        if let Err(e) = self.scheduler.ensure_context() {
            self.fail_session(format!("Failed to start session: {e}")).await;
            return;
        }

        let mut session = match self.connector.connect().await {
            Ok(session) => session,
            Err(e) => {
                self.fail_session(format!("Failed to start session: {e}")).await;
                return;
            }
        };
        let events = match session.events().await {
            Ok(events) => events,
            Err(e) => {
                session.close().await;
                self.fail_session(format!("Failed to start session: {e}")).await;
                return;
            }
        };

        self.generation += 1;
        let generation = self.generation;
        self.live = Some(session);

        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut events = events;
            while let Some(event) = events.recv().await {
                if events_tx
                    .send(Event::Live { generation, event })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    /// Records the error, then releases whatever the failed start acquired.
    async fn fail_session(&mut self, message: String) {
        self.assistant.record_error(message);
        self.teardown_session().await;
    }

    /// Releases session, capture, and playback resources. Never touches
    /// status or the error surface; callers decide the resulting state.
    /// Idempotent, and safe to run while an open or capture acquisition is
    /// still pending: bumping the generation turns late events into no-ops.
    async fn teardown_session(&mut self) {
        self.generation += 1;
        if let Some(mut live) = self.live.take() {
            live.close().await;
        }
        self.capture.stop();
        self.scheduler.close_context();
        self.transcript.clear();
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Live { generation, event } => {
                if generation != self.generation || self.live.is_none() {
                    tracing::debug!("dropping event for closed session: {event:?}");
                    return;
                }
                self.handle_live_event(event).await;
            }
            Event::Frame { generation, frame } => {
                if generation != self.generation {
                    return;
                }
                let Some(live) = self.live.as_mut() else {
                    return;
                };
                if let Err(e) = live.send_frame(frame).await {
                    tracing::warn!("failed to send capture frame: {e}");
                }
            }
            Event::PlaybackDone { generation, id } => {
                if generation != self.generation {
                    return;
                }
                if self.scheduler.mark_finished(id)
                    && self.assistant.status() == AssistantStatus::Speaking
                    && self.scheduler.is_idle()
                {
                    self.assistant.set_status(AssistantStatus::Listening);
                }
            }
        }
    }

    async fn handle_live_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Ready => self.start_capture().await,
            LiveEvent::InputTranscript(text) => self.transcript.push_input(&text),
            LiveEvent::OutputTranscript(text) => {
                self.transcript.push_output(&text);
                // Transcript text is the earliest signal of a reply.
                self.assistant.set_status(AssistantStatus::Speaking);
            }
            LiveEvent::Audio { data } => self.handle_audio_delta(&data),
            LiveEvent::TurnComplete => {
                for message in self.transcript.flush() {
                    self.assistant.push_message(message);
                }
                if self.scheduler.is_idle() {
                    self.assistant.set_status(AssistantStatus::Listening);
                }
            }
            LiveEvent::Interrupted => {
                // The user talked over the reply: drop queued audio and hand
                // control back immediately.
                self.scheduler.stop_all();
                self.assistant.set_status(AssistantStatus::Listening);
            }
            LiveEvent::TransportError(message) => {
                self.teardown_session().await;
                self.assistant.record_error(format!("Session error: {message}"));
            }
            LiveEvent::Closed => {
                self.teardown_session().await;
                self.assistant.set_status(AssistantStatus::Idle);
            }
        }
    }

    async fn start_capture(&mut self) {
        // The session is confirmed open; it is listening from here even
        // though the microphone is still being acquired.
        self.assistant.set_status(AssistantStatus::Listening);
        match self.capture.start().await {
            Ok(frames) => {
                let generation = self.generation;
                let events_tx = self.events_tx.clone();
                tokio::spawn(async move {
                    let mut frames = frames;
                    while let Some(frame) = frames.recv().await {
                        if events_tx
                            .send(Event::Frame { generation, frame })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                });
            }
            Err(e) => {
                let message = match &e {
                    CaptureError::PermissionDenied => {
                        "Microphone access was denied. Check your system audio permissions."
                            .to_string()
                    }
                    CaptureError::Unavailable(detail) => {
                        format!("Audio capture unavailable: {detail}")
                    }
                };
                self.fail_session(message).await;
            }
        }
    }

    fn handle_audio_delta(&mut self, data: &str) {
        let bytes = audio::decode(data);
        if bytes.is_empty() {
            // Malformed delta: already logged by the decoder, turn continues.
            return;
        }
        let buffer =
            audio::decode_audio_frame(&bytes, audio::PLAYBACK_SAMPLE_RATE as u32, 1);
        match self.scheduler.enqueue(buffer) {
            Ok((id, done)) => {
                self.assistant.set_status(AssistantStatus::Speaking);
                let generation = self.generation;
                let events_tx = self.events_tx.clone();
                tokio::spawn(async move {
                    let _ = done.await;
                    let _ = events_tx.send(Event::PlaybackDone { generation, id }).await;
                });
            }
            Err(e) => tracing::error!("failed to schedule reply audio: {e}"),
        }
    }

    /// Text mode: a synchronous turn against the chat and synthesis peers.
    /// Only accepted while idle; faults leave appended messages intact.
    async fn send_text(&mut self, text: String) {
        if self.assistant.status() != AssistantStatus::Idle {
            tracing::debug!("ignoring text message while not idle");
            return;
        }
        self.assistant.clear_error();
        self.assistant.push_message(Message::user(text.clone()));
        self.assistant.set_status(AssistantStatus::Thinking);

        let reply = match self.chat.send(&text).await {
            Ok(reply) => reply,
            Err(e) => {
                self.assistant
                    .record_error(format!("Failed to get response: {e}"));
                return;
            }
        };
        self.assistant.push_message(Message::assistant(reply.clone()));

        let encoded = match self.synthesizer.synthesize(&reply, &self.voice).await {
            Ok(encoded) => encoded,
            Err(e) => {
                self.assistant
                    .record_error(format!("Failed to get response: {e}"));
                return;
            }
        };
        let bytes = audio::decode(&encoded);
        if bytes.is_empty() {
            self.assistant
                .record_error("Failed to get response: reply audio was not decodable");
            return;
        }
        let buffer =
            audio::decode_audio_frame(&bytes, audio::PLAYBACK_SAMPLE_RATE as u32, 1);
        match self.scheduler.enqueue(buffer) {
            Ok((id, done)) => {
                self.assistant.set_status(AssistantStatus::Speaking);
                let _ = done.await;
                self.scheduler.mark_finished(id);
                self.assistant.set_status(AssistantStatus::Idle);
            }
            Err(e) => {
                self.assistant
                    .record_error(format!("Failed to get response: {e}"));
            }
        }
    }
}
