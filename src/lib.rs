//! Ava: expressive talking-head avatar core.
//!
//! This crate animates a 3D character's face from conversation:
//! Text / Voice session → Expression + Speech → Morph weights
//!
//! # Architecture
//!
//! The pieces are independent and meet in [`AvatarController`]:
//! - **Expressions**: Fixed morph-weight targets per [`ExpressionLabel`]
//! - **Visemes**: Mouth shapes from text, live audio (FFT bands) or a timeline
//! - **Blend engine**: Per-frame easing of every morph target toward its goal
//! - **Speech driver**: One sampling task at a time writing the mouth signal
//! - **Dialogue / sentiment**: Canned replies and keyword expression detection
//! - **Voice session**: Realtime WebSocket conversation with ephemeral credentials

pub mod asset;
pub mod blend;
pub mod config;
pub mod controller;
pub mod credentials;
pub mod dialogue;
pub mod error;
pub mod expression;
pub mod morph;
pub mod runtime;
pub mod sentiment;
pub mod session;
pub mod speech;
pub mod viseme;

pub use blend::BlendEngine;
pub use config::AvatarConfig;
pub use controller::AvatarController;
pub use error::{AvatarError, Result};
pub use expression::ExpressionLabel;
pub use morph::{FaceRig, MorphSurface, MorphWeights};
pub use runtime::RuntimeEvent;
pub use session::{SessionEvent, SessionStatus, Transcript, VoiceSession};
pub use speech::{AudioTap, SpeechDriver, SpeechSource};
pub use viseme::{PhonemeTimeline, Viseme, VisemeSignal};
