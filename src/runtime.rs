//! Runtime events emitted by the avatar controller for UI and observability.
//!
//! Payloads stay small so the frame loop never waits on a slow subscriber;
//! a lagging receiver simply misses events.

use crate::expression::ExpressionLabel;
use crate::session::{SessionStatus, Transcript};

/// Events that describe what the avatar is doing "right now".
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeEvent {
    /// The target expression changed.
    ExpressionChanged(ExpressionLabel),
    /// The caption text changed.
    TextChanged(String),
    /// The avatar started or stopped talking.
    SpeakingChanged { active: bool },
    /// Full transcript history from the voice session.
    Transcripts(Vec<Transcript>),
    /// Voice session status.
    SessionStatus(SessionStatus),
    /// A user-visible error (session or speech failure).
    Error(String),
}
