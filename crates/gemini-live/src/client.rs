use crate::types::{
    Blob, ClientMessage, GenerationConfig, PrebuiltVoiceConfig, RealtimeInput, ResponseModality,
    ServerMessage, Setup, SpeechConfig, TranscriptionConfig, VoiceConfig,
};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub type ClientTx = tokio::sync::mpsc::Sender<ClientMessage>;
type ServerTx = tokio::sync::broadcast::Sender<ServerEvent>;
pub type ServerRx = tokio::sync::broadcast::Receiver<ServerEvent>;

/// Events fanned out to subscribers of [`Client::server_events`].
///
/// `Close` and `Error` are synthesized from the transport so consumers see
/// the connection lifecycle on the same channel as protocol messages.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    Message(ServerMessage),
    Error { message: String },
    Close { reason: Option<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to connect to live endpoint: {0}")]
    Connect(String),
    #[error("session is closed")]
    Closed,
}

/// Session parameters sent in the setup frame.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    pub model: String,
    pub voice: String,
}

/// Handle to a live bidirectional session.
///
/// Owns the outbound channel; the WebSocket halves live in two spawned tasks.
/// Dropping or [`Client::close`]-ing the handle ends the writer task, which
/// sends a close frame on its way out.
pub struct Client {
    c_tx: Option<ClientTx>,
    s_tx: ServerTx,
    // Subscribed before the reader task starts, so the first consumer sees
    // every event including a setupComplete that races the handshake.
    pending_rx: Option<ServerRx>,
}

impl Client {
    /// Subscribes to inbound server events. The first call receives events
    /// from the moment the connection opened.
    pub fn server_events(&mut self) -> ServerRx {
        self.pending_rx
            .take()
            .unwrap_or_else(|| self.s_tx.subscribe())
    }

    /// Streams one captured audio frame to the service.
    pub async fn send_realtime_input(&self, media: Blob) -> Result<(), SessionError> {
        let tx = self.c_tx.as_ref().ok_or(SessionError::Closed)?;
        tx.send(ClientMessage::RealtimeInput(RealtimeInput { media }))
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Closes the session. Safe to call more than once; all sends after the
    /// first close fail with [`SessionError::Closed`].
    pub fn close(&mut self) {
        self.c_tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.c_tx.is_none()
    }
}

/// Connects to the live endpoint and performs the setup handshake.
///
/// The returned client is usable immediately, but the service only starts
/// accepting realtime input once it confirms setup with a `setupComplete`
/// message on the event channel.
pub async fn connect(api_key: &str, config: LiveConfig) -> Result<Client, SessionError> {
    connect_with_capacity(api_key, config, 1024).await
}

pub async fn connect_with_capacity(
    api_key: &str,
    config: LiveConfig,
    capacity: usize,
) -> Result<Client, SessionError> {
    let url = format!("{LIVE_ENDPOINT}?key={api_key}");
    let (ws_stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| SessionError::Connect(e.to_string()))?;
    tracing::info!("connected to live endpoint");

    let (mut write, mut read) = ws_stream.split();
    let (c_tx, mut c_rx) = tokio::sync::mpsc::channel::<ClientMessage>(capacity);
    let (s_tx, pending_rx) = tokio::sync::broadcast::channel(capacity);

    // Writer: serializes outbound messages; a dropped sender ends the task
    // and closes the socket.
    tokio::spawn(async move {
        while let Some(msg) = c_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        tracing::error!("failed to send message: {e}");
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("failed to serialize client message: {e}");
                }
            }
        }
        if let Err(e) = write.send(Message::Close(None)).await {
            tracing::debug!("close frame not delivered: {e}");
        }
    });

    // Reader: parses inbound frames and fans them out. Malformed frames are
    // logged and skipped; transport faults end the session.
    let events = s_tx.clone();
    tokio::spawn(async move {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(msg) => {
                        let _ = events.send(ServerEvent::Message(msg));
                    }
                    Err(e) => {
                        tracing::error!("failed to deserialize server message: {e}");
                    }
                },
                Ok(Message::Binary(bin)) => {
                    tracing::warn!("unexpected binary message of {} bytes", bin.len());
                }
                Ok(Message::Close(frame)) => {
                    tracing::info!("connection closed: {frame:?}");
                    let _ = events.send(ServerEvent::Close {
                        reason: frame.map(|f| f.reason.to_string()),
                    });
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!("failed to read message: {e}");
                    let _ = events.send(ServerEvent::Error {
                        message: e.to_string(),
                    });
                    break;
                }
            }
        }
    });

    let client = Client {
        c_tx: Some(c_tx),
        s_tx,
        pending_rx: Some(pending_rx),
    };
    send_setup(&client, config).await?;
    Ok(client)
}

async fn send_setup(client: &Client, config: LiveConfig) -> Result<(), SessionError> {
    let setup = ClientMessage::Setup(Setup {
        model: format!("models/{}", config.model),
        generation_config: GenerationConfig {
            response_modalities: vec![ResponseModality::Audio],
            speech_config: Some(SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: config.voice,
                    },
                },
            }),
        },
        input_audio_transcription: TranscriptionConfig {},
        output_audio_transcription: TranscriptionConfig {},
    });
    let tx = client.c_tx.as_ref().ok_or(SessionError::Closed)?;
    tx.send(setup).await.map_err(|_| SessionError::Closed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> (Client, tokio::sync::mpsc::Receiver<ClientMessage>) {
        let (c_tx, c_rx) = tokio::sync::mpsc::channel(8);
        let (s_tx, _) = tokio::sync::broadcast::channel(8);
        (
            Client {
                c_tx: Some(c_tx),
                s_tx,
                pending_rx: None,
            },
            c_rx,
        )
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (mut client, _c_rx) = test_client();
        client.close();
        client.close(); // close is idempotent

        let result = client
            .send_realtime_input(Blob {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: String::new(),
            })
            .await;
        assert!(matches!(result, Err(SessionError::Closed)));
        assert!(client.is_closed());
    }

    #[tokio::test]
    async fn realtime_input_reaches_writer_channel() {
        let (client, mut c_rx) = test_client();
        client
            .send_realtime_input(Blob {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: "AAAA".to_string(),
            })
            .await
            .unwrap();

        match c_rx.recv().await.unwrap() {
            ClientMessage::RealtimeInput(input) => assert_eq!(input.media.data, "AAAA"),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscribers_see_broadcast_events() {
        let (mut client, _c_rx) = test_client();
        let mut rx = client.server_events();
        client
            .s_tx
            .send(ServerEvent::Close { reason: None })
            .unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerEvent::Close { reason: None }
        ));
    }
}
