//! Voice session → avatar integration.
//!
//! Drives a [`VoiceSession`] over an in-memory transport and feeds its
//! events into an [`AvatarController`], checking that transcripts reach the
//! face as expressions, captions and speech.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ava::asset::standard_rig;
use ava::config::{RigConfig, VoiceConfig};
use ava::credentials::{CredentialError, CredentialProvider, StaticCredential};
use ava::session::{ClientMessage, Connection, RealtimeTransport, ServerEvent, protocol};
use ava::{
    AudioTap, AvatarConfig, AvatarController, AvatarError, ExpressionLabel, RuntimeEvent,
    SessionEvent, SessionStatus, Transcript, VoiceSession,
};
use tokio::sync::{broadcast, mpsc};

type FarEnd = (mpsc::Receiver<ClientMessage>, mpsc::Sender<ServerEvent>);

/// Transport whose server side is driven by the test.
#[derive(Default)]
struct ScriptedTransport {
    far_ends: Mutex<Vec<FarEnd>>,
    credentials_seen: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn far_end(&self) -> FarEnd {
        self.far_ends.lock().unwrap().pop().expect("not connected")
    }
}

#[async_trait]
impl RealtimeTransport for ScriptedTransport {
    async fn connect(&self, credential: &str, _config: &VoiceConfig) -> ava::Result<Connection> {
        self.credentials_seen
            .lock()
            .unwrap()
            .push(credential.to_owned());
        let (out_tx, out_rx) = mpsc::channel(32);
        let (in_tx, in_rx) = mpsc::channel(32);
        self.far_ends.lock().unwrap().push((out_rx, in_tx));
        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Transport that always refuses.
struct RefusingTransport;

#[async_trait]
impl RealtimeTransport for RefusingTransport {
    async fn connect(&self, _credential: &str, _config: &VoiceConfig) -> ava::Result<Connection> {
        Err(AvatarError::Session("failed to connect: connection refused".into()))
    }
}

/// Provider that hands out a new token after every invalidation.
#[derive(Default)]
struct RotatingCredential {
    generation: Mutex<u32>,
}

#[async_trait]
impl CredentialProvider for RotatingCredential {
    async fn get_credential(&self) -> Result<String, CredentialError> {
        Ok(format!("ek_rotating_token_{:08}", *self.generation.lock().unwrap()))
    }

    fn invalidate(&self) {
        *self.generation.lock().unwrap() += 1;
    }
}

fn avatar() -> AvatarController {
    AvatarController::paced(&AvatarConfig::default(), standard_rig(&RigConfig::default()))
}

/// Forward session events into the controller until `done` says stop.
async fn pump_until(
    session_rx: &mut broadcast::Receiver<SessionEvent>,
    avatar: &mut AvatarController,
    mut done: impl FnMut(&SessionEvent) -> bool,
) {
    loop {
        let event = session_rx.recv().await.unwrap();
        let stop = done(&event);
        avatar.apply_session_event(event).unwrap();
        if stop {
            break;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn assistant_reply_reaches_the_face() {
    let transport = Arc::new(ScriptedTransport::default());
    let session = VoiceSession::new(
        VoiceConfig::default(),
        Arc::new(StaticCredential::new("sk-test-key")),
        transport.clone(),
    );
    let mut avatar = avatar();
    let mut session_rx = session.subscribe();
    let mut runtime_rx = avatar.subscribe();

    session.start().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Connected);
    let (_out_rx, server) = transport.far_end();

    for frame in [
        r#"{"type":"session.created","session":{}}"#,
        r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"I passed my exam"}"#,
        r#"{"type":"response.output_audio_transcript.done","transcript":"Wow, that is wonderful!"}"#,
    ] {
        server
            .send(protocol::parse_server_event(frame).unwrap())
            .await
            .unwrap();
    }

    pump_until(&mut session_rx, &mut avatar, |e| {
        matches!(e, SessionEvent::Transcripts(t) if t.len() == 2)
    })
    .await;

    assert_eq!(avatar.expression(), ExpressionLabel::Happy);
    assert_eq!(avatar.text(), "Wow, that is wonderful!");
    assert!(avatar.is_speaking());
    assert_eq!(
        avatar.transcripts(),
        &[
            Transcript::user("I passed my exam"),
            Transcript::assistant("Wow, that is wonderful!"),
        ]
    );

    let mut saw_status = false;
    while let Ok(event) = runtime_rx.try_recv() {
        if event == RuntimeEvent::SessionStatus(SessionStatus::Connected) {
            saw_status = true;
        }
    }
    assert!(saw_status);

    session.stop().await;
    assert_eq!(session.status(), SessionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn typed_message_goes_out_as_text() {
    let transport = Arc::new(ScriptedTransport::default());
    let session = VoiceSession::new(
        VoiceConfig::default(),
        Arc::new(StaticCredential::new("sk-test-key")),
        transport.clone(),
    );
    session.start().await.unwrap();
    let (mut outbound, _server) = transport.far_end();

    session.send_text("ආයුබෝවන්").await.unwrap();
    assert_eq!(
        outbound.recv().await,
        Some(ClientMessage::Text("ආයුබෝවන්".into()))
    );
    assert_eq!(transport.credentials_seen.lock().unwrap().as_slice(), ["sk-test-key"]);
}

#[tokio::test(start_paused = true)]
async fn assistant_audio_drives_attached_tap() {
    let transport = Arc::new(ScriptedTransport::default());
    let session = VoiceSession::new(
        VoiceConfig::default(),
        Arc::new(StaticCredential::new("sk-test-key")),
        transport.clone(),
    );
    let mut avatar = avatar();
    let tap = AudioTap::new(24_000);
    avatar.attach_audio(tap.clone()).unwrap();
    let mut session_rx = session.subscribe();

    session.start().await.unwrap();
    let (_out_rx, server) = transport.far_end();
    server
        .send(ServerEvent::AudioDelta(vec![0.25; 1024]))
        .await
        .unwrap();

    pump_until(&mut session_rx, &mut avatar, |e| {
        matches!(e, SessionEvent::AssistantAudio(_))
    })
    .await;
    assert_eq!(tap.len(), 1024);

    avatar.detach_audio();
    assert!(!avatar.is_speaking());
}

#[tokio::test]
async fn failed_connect_rotates_credential_and_allows_retry() {
    let credentials = Arc::new(RotatingCredential::default());
    let session = VoiceSession::new(
        VoiceConfig::default(),
        credentials.clone(),
        Arc::new(RefusingTransport),
    );
    let mut avatar = avatar();
    let mut session_rx = session.subscribe();
    let mut runtime_rx = avatar.subscribe();

    let err = session.start().await.unwrap_err();
    assert!(err.to_string().contains("connection refused"));
    assert!(matches!(session.status(), SessionStatus::Error(_)));
    assert_eq!(*credentials.generation.lock().unwrap(), 1);

    while let Ok(event) = session_rx.try_recv() {
        avatar.apply_session_event(event).unwrap();
    }
    let mut errors = Vec::new();
    while let Ok(event) = runtime_rx.try_recv() {
        if let RuntimeEvent::Error(message) = event {
            errors.push(message);
        }
    }
    assert_eq!(errors.len(), 1);
    // The render side is untouched by a session failure.
    assert_eq!(avatar.expression(), ExpressionLabel::Neutral);
    assert!(!avatar.frame());

    // Error is not an active state, so a retry runs again.
    assert!(session.start().await.is_err());
    assert_eq!(*credentials.generation.lock().unwrap(), 2);
}
