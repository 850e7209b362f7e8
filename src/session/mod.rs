//! Realtime voice session client.
//!
//! [`VoiceSession`] owns one remote conversation: it fetches a credential,
//! opens a transport, keeps the ordered transcript history and republishes
//! everything the avatar needs as [`SessionEvent`]s.
//!
//! `start` while connecting or connected does nothing; `stop` while idle does
//! nothing. Failures land in [`SessionStatus::Error`] and are retried by
//! calling `start` again.

pub mod protocol;
pub mod transport;

pub use protocol::{ClientMessage, ServerEvent};
pub use transport::{Connection, RealtimeTransport, WebSocketTransport};

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::VoiceConfig;
use crate::credentials::{CredentialProvider, credential_kind, validate_session_credential};
use crate::error::{AvatarError, Result};

/// Connection status.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    /// Failed; the message is suitable for display.
    Error(String),
}

impl SessionStatus {
    /// Whether a session is live or on its way.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Who said a transcript line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One line of conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub role: Role,
    pub text: String,
}

impl Transcript {
    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Latest assistant line in `entries`, if any.
#[must_use]
pub fn latest_assistant(entries: &[Transcript]) -> Option<&Transcript> {
    entries.iter().rev().find(|t| t.role == Role::Assistant)
}

/// Events published by a [`VoiceSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Status changed.
    Status(SessionStatus),
    /// Full transcript history after a new line arrived.
    Transcripts(Vec<Transcript>),
    /// Assistant audio samples at the session sample rate.
    AssistantAudio(Vec<f32>),
    /// The assistant finished (or abandoned) a response.
    ResponseDone,
    /// Connection or remote error.
    Error(String),
}

#[derive(Debug, Default)]
struct SessionState {
    status: SessionStatus,
    transcripts: Vec<Transcript>,
    outbound: Option<mpsc::Sender<ClientMessage>>,
    cancel: Option<CancellationToken>,
    session_id: Option<String>,
    /// Bumped by every start and stop; a connect finishing under an older
    /// value is discarded.
    attempt: u64,
}

fn lock(state: &Mutex<SessionState>) -> std::sync::MutexGuard<'_, SessionState> {
    match state.lock() {
        Ok(s) => s,
        Err(p) => p.into_inner(),
    }
}

/// A realtime voice conversation.
pub struct VoiceSession {
    config: VoiceConfig,
    credentials: Arc<dyn CredentialProvider>,
    transport: Arc<dyn RealtimeTransport>,
    state: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("model", &self.config.model)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl VoiceSession {
    /// Create an idle session.
    pub fn new(
        config: VoiceConfig,
        credentials: Arc<dyn CredentialProvider>,
        transport: Arc<dyn RealtimeTransport>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            config,
            credentials,
            transport,
            state: Arc::new(Mutex::new(SessionState::default())),
            events,
        }
    }

    /// Current status.
    pub fn status(&self) -> SessionStatus {
        lock(&self.state).status.clone()
    }

    /// Transcript history, oldest first.
    pub fn transcripts(&self) -> Vec<Transcript> {
        lock(&self.state).transcripts.clone()
    }

    /// Identifier of the live session, used in logs.
    pub fn session_id(&self) -> Option<String> {
        lock(&self.state).session_id.clone()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Connect. A no-op while connecting or connected.
    ///
    /// # Errors
    ///
    /// Returns the credential or connection error after moving to
    /// [`SessionStatus::Error`]. The cached credential is discarded so the
    /// next attempt fetches a fresh one.
    pub async fn start(&self) -> Result<()> {
        let attempt = {
            let mut state = lock(&self.state);
            if state.status.is_active() {
                debug!(status = %state.status, "start ignored, session already active");
                return Ok(());
            }
            // Restarting after an error: drop whatever is left of the old link.
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            state.outbound = None;
            state.transcripts.clear();
            state.status = SessionStatus::Connecting;
            state.attempt += 1;
            state.attempt
        };
        self.publish_status(SessionStatus::Connecting);

        match self.open(attempt).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "voice session failed to start");
                self.credentials.invalidate();
                let message = e.to_string();
                {
                    let mut state = lock(&self.state);
                    if state.attempt != attempt {
                        // Superseded by a stop or a newer start.
                        return Err(e);
                    }
                    state.status = SessionStatus::Error(message.clone());
                }
                self.publish_status(SessionStatus::Error(message.clone()));
                let _ = self.events.send(SessionEvent::Error(message));
                Err(e)
            }
        }
    }

    async fn open(&self, attempt: u64) -> Result<()> {
        let credential = self.credentials.get_credential().await?;
        validate_session_credential(&credential)?;

        let session_id = Uuid::new_v4().to_string();
        info!(
            session_id = %session_id,
            model = %self.config.model,
            credential = credential_kind(&credential),
            "starting voice session"
        );
        let Connection { outbound, inbound } =
            self.transport.connect(&credential, &self.config).await?;

        let token = CancellationToken::new();
        {
            let mut state = lock(&self.state);
            if state.attempt != attempt || state.status != SessionStatus::Connecting {
                debug!(session_id = %session_id, "connect superseded, closing it");
                let _ = outbound.try_send(ClientMessage::Close);
                return Ok(());
            }
            state.status = SessionStatus::Connected;
            state.outbound = Some(outbound);
            state.cancel = Some(token.clone());
            state.session_id = Some(session_id.clone());
        }
        self.publish_status(SessionStatus::Connected);
        info!(session_id = %session_id, "voice session connected");

        tokio::spawn(event_loop(
            inbound,
            Arc::clone(&self.state),
            self.events.clone(),
            token,
            session_id,
        ));
        Ok(())
    }

    /// Disconnect. A no-op while idle.
    pub async fn stop(&self) {
        let outbound = {
            let mut state = lock(&self.state);
            if state.status == SessionStatus::Idle {
                return;
            }
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
            state.status = SessionStatus::Idle;
            state.session_id = None;
            state.attempt += 1;
            state.outbound.take()
        };
        if let Some(tx) = outbound {
            let _ = tx.send(ClientMessage::Close).await;
        }
        info!("voice session stopped");
        self.publish_status(SessionStatus::Idle);
    }

    /// Send a typed user message and ask for a reply.
    ///
    /// # Errors
    ///
    /// Returns [`AvatarError::Session`] when not connected or the
    /// connection is gone.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let outbound = self.connected_outbound()?;
        outbound
            .send(ClientMessage::Text(text.to_owned()))
            .await
            .map_err(|_| AvatarError::Channel("realtime connection closed".into()))?;

        let history = {
            let mut state = lock(&self.state);
            state.transcripts.push(Transcript::user(text));
            state.transcripts.clone()
        };
        let _ = self.events.send(SessionEvent::Transcripts(history));
        Ok(())
    }

    /// Stream microphone audio (PCM16 at the session sample rate).
    ///
    /// # Errors
    ///
    /// Returns [`AvatarError::Session`] when not connected or the
    /// connection is gone.
    pub async fn send_audio(&self, samples: &[i16]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        self.connected_outbound()?
            .send(ClientMessage::Audio(samples.to_vec()))
            .await
            .map_err(|_| AvatarError::Channel("realtime connection closed".into()))
    }

    fn connected_outbound(&self) -> Result<mpsc::Sender<ClientMessage>> {
        let state = lock(&self.state);
        match (&state.status, &state.outbound) {
            (SessionStatus::Connected, Some(tx)) => Ok(tx.clone()),
            (status, _) => Err(AvatarError::Session(format!("session is {status}"))),
        }
    }

    fn publish_status(&self, status: SessionStatus) {
        let _ = self.events.send(SessionEvent::Status(status));
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        if let Some(tx) = state.outbound.take() {
            let _ = tx.try_send(ClientMessage::Close);
        }
    }
}

async fn event_loop(
    mut inbound: mpsc::Receiver<ServerEvent>,
    state: Arc<Mutex<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    token: CancellationToken,
    session_id: String,
) {
    loop {
        let event = tokio::select! {
            () = token.cancelled() => break,
            event = inbound.recv() => event,
        };
        let Some(event) = event else {
            // Remote side went away without us stopping.
            let message = "realtime connection closed".to_owned();
            let mut guard = lock(&state);
            if !token.is_cancelled() {
                warn!(session_id = %session_id, "realtime connection lost");
                guard.status = SessionStatus::Error(message.clone());
                guard.outbound = None;
                drop(guard);
                let _ = events.send(SessionEvent::Status(SessionStatus::Error(message.clone())));
                let _ = events.send(SessionEvent::Error(message));
            }
            break;
        };

        match event {
            ServerEvent::UserTranscript { text } | ServerEvent::AssistantTranscript { text }
                if text.is_empty() => {}
            ServerEvent::UserTranscript { text } => {
                push_transcript(&state, &events, Transcript::user(text));
            }
            ServerEvent::AssistantTranscript { text } => {
                push_transcript(&state, &events, Transcript::assistant(text));
            }
            ServerEvent::AudioDelta(samples) => {
                let _ = events.send(SessionEvent::AssistantAudio(samples));
            }
            ServerEvent::ResponseDone => {
                let _ = events.send(SessionEvent::ResponseDone);
            }
            ServerEvent::Error { message } => {
                error!(session_id = %session_id, error = %message, "realtime error event");
                lock(&state).status = SessionStatus::Error(message.clone());
                let _ = events.send(SessionEvent::Status(SessionStatus::Error(message.clone())));
                let _ = events.send(SessionEvent::Error(message));
            }
            ServerEvent::SessionReady => debug!(session_id = %session_id, "remote session configured"),
            ServerEvent::AssistantTranscriptDelta { .. }
            | ServerEvent::SpeechStarted
            | ServerEvent::SpeechStopped => {}
            ServerEvent::Other(kind) => debug!(session_id = %session_id, kind = %kind, "unhandled server event"),
        }
    }
    debug!(session_id = %session_id, "session event loop terminated");
}

fn push_transcript(
    state: &Mutex<SessionState>,
    events: &broadcast::Sender<SessionEvent>,
    line: Transcript,
) {
    let history = {
        let mut guard = lock(state);
        guard.transcripts.push(line);
        guard.transcripts.clone()
    };
    let _ = events.send(SessionEvent::Transcripts(history));
}
