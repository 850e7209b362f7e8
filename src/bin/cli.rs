//! CLI binary for ava.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use ava::asset::rig_from_config;
use ava::blend::is_viseme_control;
use ava::credentials::{CredentialRef, provider_from_config};
use ava::session::{Role, WebSocketTransport};
use ava::viseme::wav::{analyze_wav, load_wav_mono, segments};
use ava::viseme::MOUTH_OPEN;
use ava::{AudioTap, AvatarConfig, AvatarController, FaceRig, PhonemeTimeline, RuntimeEvent, VoiceSession};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Frame interval of the interactive modes (60 fps).
const FRAME: Duration = Duration::from_micros(16_667);
/// How often mouth weights are printed while talking.
const MOUTH_REPORT_EVERY: u32 = 15;

/// Ava: expressive talking-head avatar core.
#[derive(Parser)]
#[command(name = "ava", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Chat with the offline dialogue table.
    Chat,

    /// Analyse a WAV file and print the mouth-shape track.
    Lipsync {
        /// WAV file to analyse.
        wav: PathBuf,
        /// Print every analysis tick as JSON instead of merged segments.
        #[arg(long)]
        json: bool,
    },

    /// Sample a lip-sync timeline JSON file at a fixed step.
    Timeline {
        /// Lip-sync JSON with aligned `phonemes`.
        file: PathBuf,
        /// Sampling step in milliseconds.
        #[arg(long, default_value_t = 50)]
        step_ms: u64,
    },

    /// Talk to the realtime voice agent.
    Voice {
        /// Drive the mouth from the assistant's audio instead of its text.
        #[arg(long)]
        audio_lipsync: bool,
        /// Send a recorded utterance (mono WAV at the session sample rate)
        /// as microphone input once connected.
        #[arg(long)]
        input_wav: Option<PathBuf>,
    },

    /// Store the API key in the platform keyring and point the config at it.
    SetKey {
        /// Keyring service name.
        #[arg(long, default_value = "ava")]
        service: String,
        /// Keyring account name.
        #[arg(long, default_value = "openai")]
        account: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so command output stays pipeable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("ava=info,tungstenite=warn,reqwest=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone();
    let config = match &config_path {
        Some(path) => AvatarConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => {
            let default = AvatarConfig::default_config_path();
            if default.exists() {
                AvatarConfig::from_file(&default)?
            } else {
                AvatarConfig::default()
            }
        }
    };

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => run_chat(config).await,
        Command::Lipsync { wav, json } => run_lipsync(&config, &wav, json),
        Command::Timeline { file, step_ms } => run_timeline(&file, step_ms),
        Command::Voice {
            audio_lipsync,
            input_wav,
        } => run_voice(config, audio_lipsync, input_wav.as_deref()).await,
        Command::SetKey { service, account } => {
            let path = config_path.unwrap_or_else(AvatarConfig::default_config_path);
            set_key(config, &path, &service, &account)
        }
    }
}

/// Mouth control points above a visible threshold, strongest first.
fn top_mouth(rig: &FaceRig, n: usize) -> Vec<(String, f32)> {
    let mut weights: Vec<(String, f32)> = rig
        .head
        .snapshot()
        .iter()
        .filter(|(name, w)| (is_viseme_control(name) || *name == MOUTH_OPEN) && *w > 0.01)
        .map(|(name, w)| (name.to_owned(), w))
        .collect();
    weights.sort_by(|a, b| b.1.total_cmp(&a.1));
    weights.truncate(n);
    weights
}

fn print_mouth(avatar: &AvatarController) {
    let mouth = top_mouth(avatar.rig(), 3);
    if mouth.is_empty() {
        return;
    }
    let parts: Vec<String> = mouth
        .iter()
        .map(|(name, w)| format!("{name}={w:.2}"))
        .collect();
    println!("    mouth: {}", parts.join(" "));
}

/// Print UI-relevant runtime events.
fn report(event: RuntimeEvent) {
    match event {
        RuntimeEvent::ExpressionChanged(label) => println!("  [{label}]"),
        RuntimeEvent::SpeakingChanged { active: false } => println!("  (done speaking)"),
        RuntimeEvent::SessionStatus(status) => println!("* session {status}"),
        RuntimeEvent::Error(message) => eprintln!("! {message}"),
        RuntimeEvent::Transcripts(entries) => {
            if let Some(last) = entries.last() {
                let who = match last.role {
                    Role::User => "you",
                    Role::Assistant => "ava",
                };
                println!("{who}: {}", last.text);
            }
        }
        RuntimeEvent::TextChanged(_) | RuntimeEvent::SpeakingChanged { active: true } => {}
    }
}

fn drain(events: &mut broadcast::Receiver<RuntimeEvent>) {
    loop {
        match events.try_recv() {
            Ok(event) => report(event),
            Err(broadcast::error::TryRecvError::Lagged(n)) => warn!(skipped = n, "runtime events lagged"),
            Err(_) => break,
        }
    }
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

async fn run_chat(config: AvatarConfig) -> anyhow::Result<()> {
    println!("Ava v{}", env!("CARGO_PKG_VERSION"));
    println!("Type a message (try: hi, how are you?, angry). Ctrl+D to quit.\n");

    let rig = rig_from_config(&config.rig)?;
    let mut avatar = AvatarController::paced(&config, rig);
    let mut events = avatar.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(FRAME);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut frames = 0u32;

    prompt();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match avatar.submit_text(&line)? {
                    Some(reply) => println!("ava: {}", reply.response),
                    None => println!("  (no reply)"),
                }
                drain(&mut events);
            }
            _ = ticker.tick() => {
                avatar.frame();
                frames = frames.wrapping_add(1);
                if avatar.is_speaking() && frames % MOUTH_REPORT_EVERY == 0 {
                    print_mouth(&avatar);
                }
                let was_speaking = avatar.is_speaking();
                drain(&mut events);
                if was_speaking && !avatar.is_speaking() {
                    prompt();
                }
            }
        }
    }
    Ok(())
}

fn run_lipsync(config: &AvatarConfig, wav: &Path, json: bool) -> anyhow::Result<()> {
    let frames = analyze_wav(wav, &config.lipsync)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&frames)?);
        return Ok(());
    }
    let segs = segments(&frames);
    if segs.is_empty() {
        println!("(no mouth movement)");
    }
    for seg in segs {
        println!(
            "{:>8.3} - {:>8.3}  {:<12} peak {:.2}",
            seg.start, seg.end, seg.target, seg.peak
        );
    }
    Ok(())
}

fn run_timeline(file: &Path, step_ms: u64) -> anyhow::Result<()> {
    let timeline = PhonemeTimeline::from_file(file)?;
    let step = step_ms.max(1) as f64 / 1000.0;
    let mut t = 0.0;
    while t <= timeline.end_time() + step {
        let sample = timeline.sample(t);
        match sample.active.as_deref() {
            Some(target) => println!("{t:>8.3}  {target:<12} {:.2}", sample.strength),
            None => println!("{t:>8.3}  -"),
        }
        t += step;
    }
    Ok(())
}

/// Stream a WAV file to the session as PCM16 in 100 ms chunks.
async fn send_wav(session: &VoiceSession, path: &Path, sample_rate: u32) -> anyhow::Result<()> {
    let (samples, rate) = load_wav_mono(path)?;
    if rate != sample_rate {
        anyhow::bail!("{} is {rate} Hz, the session expects {sample_rate} Hz", path.display());
    }
    let pcm: Vec<i16> = samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16)
        .collect();
    let chunk = (sample_rate / 10).max(1) as usize;
    for part in pcm.chunks(chunk) {
        session.send_audio(part).await?;
    }
    info!(samples = pcm.len(), path = %path.display(), "sent recorded input");
    Ok(())
}

async fn run_voice(
    config: AvatarConfig,
    audio_lipsync: bool,
    input_wav: Option<&Path>,
) -> anyhow::Result<()> {
    println!("Ava v{} - Voice Mode", env!("CARGO_PKG_VERSION"));

    let credentials = provider_from_config(&config.voice, &config.credentials)?;
    let session = VoiceSession::new(
        config.voice.clone(),
        credentials,
        Arc::new(WebSocketTransport::new()),
    );
    let rig = rig_from_config(&config.rig)?;
    let mut avatar = AvatarController::paced(&config, rig);
    let mut runtime_events = avatar.subscribe();
    let mut session_events = session.subscribe();

    if audio_lipsync {
        avatar.attach_audio(AudioTap::new(config.voice.sample_rate))?;
    }
    if let Err(e) = session.start().await {
        // Surface the status/error events before giving up.
        while let Ok(event) = session_events.try_recv() {
            avatar.apply_session_event(event)?;
        }
        drain(&mut runtime_events);
        return Err(e.into());
    }
    println!("Type to send a message. Press Ctrl+C to stop.\n");
    if let Some(path) = input_wav {
        send_wav(&session, path, config.voice.sample_rate).await?;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(FRAME);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("received Ctrl+C, shutting down...");
                break;
            }
            event = session_events.recv() => match event {
                Ok(event) => avatar.apply_session_event(event)?,
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "session events lagged"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if let Err(e) = session.send_text(&line).await {
                            eprintln!("! {e}");
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                avatar.frame();
            }
        }
        drain(&mut runtime_events);
    }

    avatar.detach_audio();
    session.stop().await;
    Ok(())
}

fn set_key(
    mut config: AvatarConfig,
    config_path: &Path,
    service: &str,
    account: &str,
) -> anyhow::Result<()> {
    print!("API key: ");
    std::io::stdout().flush()?;
    let mut key = String::new();
    std::io::stdin().read_line(&mut key)?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("no key entered");
    }

    config.credentials.api_key = CredentialRef::store_in_keyring(service, account, key)?;
    config.save_to_file(config_path)?;
    println!("Stored key in keyring ({service}/{account}), config: {}", config_path.display());
    Ok(())
}
