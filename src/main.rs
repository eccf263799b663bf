use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use geovoice_realtime::config::ClientSettings;
use geovoice_realtime::core::realtime::codec::{read_wav_pcm16, write_wav_pcm16};
use geovoice_realtime::core::realtime::openai::{ContentPart, ItemRole};
use geovoice_realtime::core::realtime::{
    ConversationItem, DEFAULT_SAMPLE_RATE, ItemDelta, RealtimeClient, RealtimeEvent, Subscription,
};

/// Samples per outbound audio chunk (100ms at 24kHz)
const CHUNK_SAMPLES: usize = 2400;

/// geovoice - realtime voice client for the Earth-intelligence assistant
#[derive(Parser, Debug)]
#[command(name = "geovoice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Seconds to wait for the assistant's reply
    #[arg(short = 't', long = "timeout", default_value_t = 60)]
    timeout: u64,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a text message and print the reply
    Say {
        /// Message text
        text: String,
    },

    /// Stream a 24kHz mono PCM16 WAV file and save the spoken reply
    Stream {
        /// Input WAV file
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Where to write the assistant's audio
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration from file or environment
    let settings = if let Some(config_path) = &cli.config {
        info!("Loading configuration from {}", config_path.display());
        ClientSettings::from_file(config_path)?
    } else {
        ClientSettings::from_env()?
    };

    let client = RealtimeClient::new(settings.client_options());
    client.update_session(settings.session_config())?;
    let mut events = client.subscribe();

    client.connect().await?;
    let timeout = Duration::from_secs(cli.timeout);
    tokio::time::timeout(timeout, client.wait_for_session_created())
        .await
        .context("Timed out waiting for session.created")??;
    info!(
        "Session {} ready",
        client.session_id().unwrap_or_default()
    );

    let result = match cli.command {
        Commands::Say { text } => {
            client.send_user_message_content(vec![ContentPart::input_text(text)])?;
            tokio::time::timeout(timeout, print_reply(&mut events))
                .await
                .context("Timed out waiting for the reply")?
                .map(|_| ())
        }
        Commands::Stream { input, output } => {
            stream_file(&client, &mut events, &input, output.as_deref(), timeout).await
        }
    };

    client.disconnect();
    result
}

/// Print streamed text until an assistant message completes.
async fn print_reply(events: &mut Subscription) -> anyhow::Result<ConversationItem> {
    use std::io::Write;

    while let Some(event) = events.recv().await {
        match event {
            RealtimeEvent::ConversationUpdated {
                delta: Some(ItemDelta::Text(delta) | ItemDelta::Transcript(delta)),
                item,
            } if item.role == Some(ItemRole::Assistant) => {
                print!("{}", delta);
                std::io::stdout().flush()?;
            }
            RealtimeEvent::ItemCompleted { item } if item.role == Some(ItemRole::Assistant) => {
                println!();
                return Ok(item);
            }
            RealtimeEvent::Error { error } => {
                warn!("Server error: {}", error.message);
            }
            RealtimeEvent::Protocol { event, .. }
                if event.get("type").and_then(|t| t.as_str()) == Some("socket.closed") =>
            {
                return Err(anyhow!("Connection closed before the reply completed"));
            }
            _ => {}
        }
    }
    Err(anyhow!("Event stream ended"))
}

async fn stream_file(
    client: &RealtimeClient,
    events: &mut Subscription,
    input: &std::path::Path,
    output: Option<&std::path::Path>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let (samples, spec) = read_wav_pcm16(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    if spec.channels != 1 || spec.sample_rate != DEFAULT_SAMPLE_RATE || spec.bits_per_sample != 16
    {
        anyhow::bail!(
            "{} must be mono 16-bit PCM at {} Hz (got {} channels, {} Hz, {} bits)",
            input.display(),
            DEFAULT_SAMPLE_RATE,
            spec.channels,
            spec.sample_rate,
            spec.bits_per_sample
        );
    }

    info!("Streaming {} samples from {}", samples.len(), input.display());
    for chunk in samples.chunks(CHUNK_SAMPLES) {
        client.append_input_audio(chunk)?;
    }

    if client.turn_detection_type().is_none() {
        client.create_response()?;
    } else {
        // Trailing silence lets server VAD close the turn
        client.append_input_audio(&vec![0i16; DEFAULT_SAMPLE_RATE as usize])?;
    }

    let reply = tokio::time::timeout(timeout, print_reply(events))
        .await
        .context("Timed out waiting for the reply")??;

    if let Some(output) = output {
        write_wav_pcm16(output, &reply.formatted.audio)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        info!(
            "Wrote {} samples of assistant audio to {}",
            reply.formatted.audio.len(),
            output.display()
        );
    }
    Ok(())
}
