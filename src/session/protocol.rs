//! Realtime wire protocol: client event builders and server event parsing.
//!
//! Only the events the avatar reacts to are decoded. Everything else is
//! reported as [`ServerEvent::Other`] with its type name so callers can log it.

use base64::Engine as _;
use serde_json::{Value, json};

use crate::config::VoiceConfig;
use crate::error::{AvatarError, Result};
use crate::speech::pcm16_from_le_bytes;

/// Messages the session hands to the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Typed user message followed by a response request.
    Text(String),
    /// Microphone PCM16 samples at the session sample rate.
    Audio(Vec<i16>),
    /// Close the connection.
    Close,
}

/// Decoded server events.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// `session.created` / `session.updated`.
    SessionReady,
    /// Final transcription of the user's speech.
    UserTranscript { text: String },
    /// Partial assistant transcript.
    AssistantTranscriptDelta { delta: String },
    /// Completed assistant transcript for one response.
    AssistantTranscript { text: String },
    /// Assistant audio as mono samples in `[-1, 1]`.
    AudioDelta(Vec<f32>),
    /// Server VAD heard the user start talking.
    SpeechStarted,
    /// Server VAD heard the user stop talking.
    SpeechStopped,
    /// A response finished (or was cancelled).
    ResponseDone,
    /// Remote error event.
    Error { message: String },
    /// Any other event type.
    Other(String),
}

/// Build the `session.update` event that configures the remote agent.
#[must_use]
pub fn session_update(config: &VoiceConfig) -> Value {
    json!({
        "type": "session.update",
        "session": {
            "instructions": config.instructions,
            "voice": config.voice,
            "modalities": ["text", "audio"],
            "input_audio_format": config.audio_format,
            "output_audio_format": config.audio_format,
            "input_audio_transcription": {
                "model": config.transcription_model,
            },
            "turn_detection": {
                "type": "server_vad",
                "threshold": 0.5,
                "prefix_padding_ms": 300,
                "silence_duration_ms": 500,
            },
        },
    })
}

/// Events injecting a typed user message and requesting a reply.
#[must_use]
pub fn text_message_events(text: &str) -> [Value; 2] {
    [
        json!({
            "type": "conversation.item.create",
            "item": {
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": text }],
            },
        }),
        json!({ "type": "response.create" }),
    ]
}

/// Event appending microphone audio to the input buffer.
#[must_use]
pub fn audio_append_event(samples: &[i16]) -> Value {
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    json!({
        "type": "input_audio_buffer.append",
        "audio": base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

fn str_field<'a>(event: &'a Value, key: &str) -> &'a str {
    event.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Parse one text frame from the server.
///
/// # Errors
///
/// Returns [`AvatarError::Session`] when the frame is not a JSON object with
/// a `type`, or when an audio delta is not valid base64.
pub fn parse_server_event(text: &str) -> Result<ServerEvent> {
    let event: Value = serde_json::from_str(text)
        .map_err(|e| AvatarError::Session(format!("invalid server event: {e}")))?;
    let Some(kind) = event.get("type").and_then(Value::as_str) else {
        return Err(AvatarError::Session("server event without type".into()));
    };

    let parsed = match kind {
        "session.created" | "session.updated" => ServerEvent::SessionReady,
        "conversation.item.input_audio_transcription.completed" => ServerEvent::UserTranscript {
            text: str_field(&event, "transcript").trim().to_owned(),
        },
        "response.audio_transcript.delta" | "response.output_audio_transcript.delta" => {
            ServerEvent::AssistantTranscriptDelta {
                delta: str_field(&event, "delta").to_owned(),
            }
        }
        "response.audio_transcript.done" | "response.output_audio_transcript.done" => {
            ServerEvent::AssistantTranscript {
                text: str_field(&event, "transcript").trim().to_owned(),
            }
        }
        "response.audio.delta" | "response.output_audio.delta" => {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(str_field(&event, "delta"))
                .map_err(|e| AvatarError::Session(format!("invalid audio delta: {e}")))?;
            ServerEvent::AudioDelta(
                pcm16_from_le_bytes(&bytes)
                    .into_iter()
                    .map(|s| f32::from(s) / 32768.0)
                    .collect(),
            )
        }
        "input_audio_buffer.speech_started" => ServerEvent::SpeechStarted,
        "input_audio_buffer.speech_stopped" => ServerEvent::SpeechStopped,
        "response.done" | "response.cancelled" => ServerEvent::ResponseDone,
        "error" => {
            let message = event
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            ServerEvent::Error {
                message: message.to_owned(),
            }
        }
        other => ServerEvent::Other(other.to_owned()),
    };
    Ok(parsed)
}
