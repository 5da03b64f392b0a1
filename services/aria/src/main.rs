mod capture;
mod config;
mod live_adapter;
mod playback;

use crate::capture::CpalCapture;
use crate::config::Config;
use crate::live_adapter::GeminiLiveConnector;
use crate::playback::CpalAudioContext;
use anyhow::{Context, Result};
use aria_core::chat::GeminiChatClient;
use aria_core::scheduler::{AudioContext, ContextFactory};
use aria_core::speech::GeminiTtsClient;
use aria_core::{AssistantStatus, Command, MessageAuthor, SessionController, Snapshot};
use aria_native_utils::device;
use clap::Parser;
use tokio::io::AsyncBufReadExt;
use tokio::sync::watch;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(name = "aria", about = "Voice and text conversations with a realtime assistant")]
struct Cli {
    /// List audio devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Capture device name (default: the system default input).
    #[arg(long)]
    input_device: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load application configuration")?;

    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let args = Cli::parse();
    if args.list_devices {
        println!("Capture devices:\n{}", device::list_inputs()?);
        println!("Playback devices:\n{}", device::list_outputs()?);
        return Ok(());
    }

    let input_device = args.input_device.or_else(|| config.input_device.clone());

    let connector = GeminiLiveConnector::new(
        config.gemini_api_key.clone(),
        config.live_model.clone(),
        config.voice.clone(),
    );
    let chat = GeminiChatClient::new(config.gemini_api_key.clone(), config.chat_model.clone());
    let tts = GeminiTtsClient::new(config.gemini_api_key.clone(), config.tts_model.clone());
    let playback: ContextFactory = Box::new(move || {
        CpalAudioContext::open(None).map(|ctx| Box::new(ctx) as Box<dyn AudioContext>)
    });

    let (controller, handle) = SessionController::new(
        Box::new(connector),
        Box::new(CpalCapture::new(input_device)),
        Box::new(chat),
        Box::new(tts),
        playback,
        config.voice.clone(),
    );
    let controller_task = tokio::spawn(controller.run());
    let render_task = tokio::spawn(render(handle.snapshots.clone()));

    println!("Type /voice to toggle a live session, /quit to exit, anything else to chat.");

    let commands = handle.commands.clone();
    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line {
                    "/voice" => commands.send(Command::ToggleSession).await?,
                    "/quit" => break,
                    text => commands.send(Command::SendText(text.to_string())).await?,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, shutting down...");
                break;
            }
        }
    }

    let _ = commands.send(Command::Shutdown).await;
    let _ = controller_task.await;
    render_task.abort();
    Ok(())
}

/// Prints conversation state as it changes: status line, new messages, and
/// the current error. Pure rendering; all logic lives in the controller.
async fn render(mut snapshots: watch::Receiver<Snapshot>) {
    let mut printed = 0usize;
    let mut last_status = AssistantStatus::Idle;
    let mut last_error: Option<String> = None;
    loop {
        {
            let snapshot = snapshots.borrow_and_update().clone();
            if snapshot.messages.len() < printed {
                printed = 0;
            }
            for message in &snapshot.messages[printed..] {
                let label = match message.author {
                    MessageAuthor::User => "you",
                    MessageAuthor::Assistant => "aria",
                };
                println!("{label}> {}", message.text);
            }
            printed = snapshot.messages.len();

            if snapshot.status != last_status {
                println!("· {}", status_label(snapshot.status));
                last_status = snapshot.status;
            }
            if snapshot.error != last_error {
                if let Some(error) = &snapshot.error {
                    eprintln!("! {error}");
                }
                last_error = snapshot.error.clone();
            }
        }
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

fn status_label(status: AssistantStatus) -> &'static str {
    match status {
        AssistantStatus::Idle => "idle",
        AssistantStatus::Connecting => "connecting",
        AssistantStatus::Listening => "listening",
        AssistantStatus::Speaking => "speaking",
        AssistantStatus::Thinking => "thinking",
        AssistantStatus::Error => "error",
    }
}
