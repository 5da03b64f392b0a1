//! Adapts the gemini-live client to the controller's capability traits.

use aria_core::peer::{AudioFrame, LiveConnector, LiveEvent, LiveSession};
use async_trait::async_trait;
use gemini_live::types::{Blob, ServerContent};
use gemini_live::{Client, LiveConfig, ServerEvent};
use tokio::sync::broadcast;
use tokio::sync::mpsc;

pub struct GeminiLiveConnector {
    api_key: String,
    config: LiveConfig,
}

impl GeminiLiveConnector {
    pub fn new(api_key: String, model: String, voice: String) -> Self {
        Self {
            api_key,
            config: LiveConfig { model, voice },
        }
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&mut self) -> anyhow::Result<Box<dyn LiveSession>> {
        let client = gemini_live::connect(&self.api_key, self.config.clone()).await?;
        Ok(Box::new(GeminiLiveSession {
            client,
            events_taken: false,
        }))
    }
}

pub struct GeminiLiveSession {
    client: Client,
    events_taken: bool,
}

#[async_trait]
impl LiveSession for GeminiLiveSession {
    async fn events(&mut self) -> anyhow::Result<mpsc::Receiver<LiveEvent>> {
        if self.events_taken {
            anyhow::bail!("event stream already taken");
        }
        self.events_taken = true;

        let mut server_rx = self.client.server_events();
        let (tx, rx) = mpsc::channel(128);
        tokio::spawn(async move {
            loop {
                match server_rx.recv().await {
                    Ok(event) => {
                        for translated in translate(event) {
                            if tx.send(translated).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("dropped {n} server events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(rx)
    }

    async fn send_frame(&mut self, frame: AudioFrame) -> anyhow::Result<()> {
        self.client
            .send_realtime_input(Blob {
                mime_type: frame.mime_type,
                data: frame.data,
            })
            .await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.client.close();
    }
}

fn translate(event: ServerEvent) -> Vec<LiveEvent> {
    match event {
        ServerEvent::Message(msg) => {
            let mut out = Vec::new();
            if msg.setup_complete.is_some() {
                out.push(LiveEvent::Ready);
            }
            if let Some(content) = msg.server_content {
                translate_content(content, &mut out);
            }
            out
        }
        ServerEvent::Error { message } => vec![LiveEvent::TransportError(message)],
        ServerEvent::Close { reason } => {
            tracing::info!("live session closed: {reason:?}");
            vec![LiveEvent::Closed]
        }
    }
}

fn translate_content(content: ServerContent, out: &mut Vec<LiveEvent>) {
    if let Some(transcription) = content.input_transcription {
        out.push(LiveEvent::InputTranscript(transcription.text));
    }
    if let Some(transcription) = content.output_transcription {
        out.push(LiveEvent::OutputTranscript(transcription.text));
    }
    if let Some(turn) = content.model_turn {
        for part in turn.parts {
            if let Some(blob) = part.inline_data {
                out.push(LiveEvent::Audio { data: blob.data });
            }
        }
    }
    if content.interrupted == Some(true) {
        out.push(LiveEvent::Interrupted);
    }
    if content.turn_complete == Some(true) {
        out.push(LiveEvent::TurnComplete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemini_live::types::{InlineBlob, ModelTurn, ServerMessage, ServerPart, Transcription};

    fn content() -> ServerContent {
        ServerContent {
            input_transcription: None,
            output_transcription: None,
            model_turn: None,
            turn_complete: None,
            interrupted: None,
        }
    }

    #[test]
    fn setup_complete_becomes_ready() {
        let events = translate(ServerEvent::Message(ServerMessage {
            setup_complete: Some(serde_json::json!({})),
            server_content: None,
        }));
        assert!(matches!(events.as_slice(), [LiveEvent::Ready]));
    }

    #[test]
    fn transcription_deltas_keep_their_sides() {
        let events = translate(ServerEvent::Message(ServerMessage {
            setup_complete: None,
            server_content: Some(ServerContent {
                input_transcription: Some(Transcription {
                    text: "Hel".to_string(),
                }),
                output_transcription: Some(Transcription {
                    text: "Hi".to_string(),
                }),
                ..content()
            }),
        }));
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], LiveEvent::InputTranscript(t) if t == "Hel"));
        assert!(matches!(&events[1], LiveEvent::OutputTranscript(t) if t == "Hi"));
    }

    #[test]
    fn model_turn_audio_parts_become_audio_events() {
        let events = translate(ServerEvent::Message(ServerMessage {
            setup_complete: None,
            server_content: Some(ServerContent {
                model_turn: Some(ModelTurn {
                    parts: vec![
                        ServerPart {
                            text: Some("ignored".to_string()),
                            inline_data: None,
                        },
                        ServerPart {
                            text: None,
                            inline_data: Some(InlineBlob {
                                mime_type: Some("audio/pcm;rate=24000".to_string()),
                                data: "AAAA".to_string(),
                            }),
                        },
                    ],
                }),
                ..content()
            }),
        }));
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], LiveEvent::Audio { data } if data == "AAAA"));
    }

    #[test]
    fn turn_flags_translate_in_interrupt_first_order() {
        let events = translate(ServerEvent::Message(ServerMessage {
            setup_complete: None,
            server_content: Some(ServerContent {
                turn_complete: Some(true),
                interrupted: Some(true),
                ..content()
            }),
        }));
        assert!(matches!(
            events.as_slice(),
            [LiveEvent::Interrupted, LiveEvent::TurnComplete]
        ));
    }

    #[test]
    fn transport_lifecycle_translates_to_error_and_closed() {
        let errors = translate(ServerEvent::Error {
            message: "stream reset".to_string(),
        });
        assert!(matches!(&errors[0], LiveEvent::TransportError(m) if m == "stream reset"));

        let closes = translate(ServerEvent::Close { reason: None });
        assert!(matches!(closes.as_slice(), [LiveEvent::Closed]));
    }
}
