//! The avatar controller.
//!
//! One [`AvatarController`] owns everything a talking head needs between
//! frames: the rig being animated, the expression and caption, whether the
//! avatar is talking, the voice transcript history, and the speech driver
//! writing the mouth signal. Input arrives as typed text, session events or
//! audio; output is the rig's morph weights after each [`frame`] plus
//! [`RuntimeEvent`]s for anything a UI shows.
//!
//! [`frame`]: AvatarController::frame

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::blend::BlendEngine;
use crate::config::AvatarConfig;
use crate::dialogue::{DialogueReply, DialogueTable};
use crate::error::Result;
use crate::expression::ExpressionLabel;
use crate::morph::FaceRig;
use crate::runtime::RuntimeEvent;
use crate::sentiment::detect_expression;
use crate::session::{SessionEvent, Transcript, latest_assistant};
use crate::speech::{AudioTap, DriverEvent, DriverState, PlaybackClock, SpeechDriver, SpeechSource};
use crate::viseme::{PhonemeTimeline, VisemeSignal};

/// Speech source owning the mouth. Later variants outrank earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MouthSource {
    Synthetic,
    Stream,
    Timeline,
}

impl MouthSource {
    fn of(source: &SpeechSource) -> Self {
        match source {
            SpeechSource::Synthetic { .. } => MouthSource::Synthetic,
            SpeechSource::Stream(_) => MouthSource::Stream,
            SpeechSource::Timeline { .. } => MouthSource::Timeline,
        }
    }
}

/// Owns the face, its speech and the conversation state.
pub struct AvatarController {
    rig: FaceRig,
    blend: BlendEngine,
    driver: SpeechDriver,
    driver_events: broadcast::Receiver<DriverEvent>,
    dialogue: DialogueTable,
    text: String,
    speaking: bool,
    transcripts: Vec<Transcript>,
    audio: Option<AudioTap>,
    mouth: Option<MouthSource>,
    /// Last signal handed to the blend engine; decays once the driver lets go.
    signal: VisemeSignal,
    events: broadcast::Sender<RuntimeEvent>,
}

impl std::fmt::Debug for AvatarController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarController")
            .field("expression", &self.expression())
            .field("text", &self.text)
            .field("speaking", &self.speaking)
            .field("audio_attached", &self.audio.is_some())
            .field("mouth", &self.mouth)
            .finish_non_exhaustive()
    }
}

impl AvatarController {
    /// Controller over `rig` using `driver` for speech.
    pub fn new(config: &AvatarConfig, rig: FaceRig, driver: SpeechDriver) -> Self {
        let driver_events = driver.subscribe();
        let (events, _) = broadcast::channel(256);
        let mut blend = BlendEngine::new(config.blend.clone());
        blend.set_expression(ExpressionLabel::Neutral);

        Self {
            rig,
            blend,
            driver,
            driver_events,
            dialogue: DialogueTable::builtin(),
            text: String::new(),
            speaking: false,
            transcripts: Vec::new(),
            audio: None,
            mouth: None,
            signal: VisemeSignal::default(),
            events,
        }
    }

    /// Controller with the silent paced synthesizer.
    pub fn paced(config: &AvatarConfig, rig: FaceRig) -> Self {
        let driver = SpeechDriver::paced(config.speech.clone(), config.lipsync.clone());
        Self::new(config, rig, driver)
    }

    /// Replace the dialogue table used by [`submit_text`](Self::submit_text).
    #[must_use]
    pub fn with_dialogue(mut self, dialogue: DialogueTable) -> Self {
        self.dialogue = dialogue;
        self
    }

    /// Subscribe to runtime events.
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    /// Current target expression.
    pub fn expression(&self) -> ExpressionLabel {
        self.blend.expression()
    }

    /// Caption of the line being spoken or last spoken.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether the avatar is talking.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Voice transcript history, oldest first.
    pub fn transcripts(&self) -> &[Transcript] {
        &self.transcripts
    }

    /// The rig as of the last frame.
    pub fn rig(&self) -> &FaceRig {
        &self.rig
    }

    /// The mouth signal used by the last frame.
    pub fn signal(&self) -> &VisemeSignal {
        &self.signal
    }

    /// The speech driver writing the mouth signal.
    pub fn driver(&self) -> &SpeechDriver {
        &self.driver
    }

    /// Whether every control point sits on its target.
    pub fn is_settled(&self) -> bool {
        self.blend.is_settled(&self.rig, &self.signal)
    }

    /// Set the target expression.
    pub fn set_expression(&mut self, label: ExpressionLabel) {
        if label == self.blend.expression() {
            return;
        }
        self.blend.set_expression(label);
        self.emit(RuntimeEvent::ExpressionChanged(label));
    }

    fn set_text(&mut self, text: &str) {
        if text == self.text {
            return;
        }
        text.clone_into(&mut self.text);
        self.emit(RuntimeEvent::TextChanged(self.text.clone()));
    }

    fn set_speaking(&mut self, active: bool) {
        if active == self.speaking {
            return;
        }
        self.speaking = active;
        self.emit(RuntimeEvent::SpeakingChanged { active });
    }

    fn emit(&self, event: RuntimeEvent) {
        let _ = self.events.send(event);
    }

    /// Source of the utterance the driver is playing, if any.
    fn owner(&self) -> Option<MouthSource> {
        if self.driver.state() == DriverState::Speaking {
            self.mouth
        } else {
            None
        }
    }

    /// Start `source` unless a higher-priority source owns the mouth, in
    /// which case the avatar keeps talking with the current one.
    fn speak(&mut self, source: SpeechSource) -> Result<()> {
        let incoming = MouthSource::of(&source);
        if let Some(owner) = self.owner()
            && owner > incoming
        {
            debug!(?owner, ?incoming, "mouth held by higher-priority source");
            self.set_speaking(true);
            return Ok(());
        }
        match self.driver.speak(source) {
            Ok(()) => {
                self.mouth = Some(incoming);
                self.set_speaking(true);
                Ok(())
            }
            Err(e) => {
                self.emit(RuntimeEvent::Error(e.to_string()));
                Err(e)
            }
        }
    }

    /// Answer typed input from the dialogue table.
    ///
    /// Returns the reply, or `None` (leaving everything untouched) when
    /// nothing matches. Live audio or a timeline keeps the mouth; only the
    /// expression and caption change then.
    ///
    /// # Errors
    ///
    /// Returns the speech driver's error when the reply cannot be spoken.
    pub fn submit_text(&mut self, input: &str) -> Result<Option<DialogueReply>> {
        let Some(reply) = self.dialogue.select(input) else {
            debug!("no dialogue match");
            return Ok(None);
        };
        self.set_expression(reply.expression);
        self.set_text(&reply.response);
        self.speak(SpeechSource::Synthetic {
            text: reply.response.clone(),
        })?;
        Ok(Some(reply))
    }

    /// Take a new transcript history from the voice session.
    ///
    /// The latest assistant line sets the expression and caption and starts
    /// the mouth: from the attached audio when there is some, otherwise
    /// synthetically from the text. A playing timeline keeps the mouth. A
    /// history whose latest assistant line is already showing changes
    /// nothing but the history.
    ///
    /// # Errors
    ///
    /// Returns the speech driver's error when the line cannot be spoken.
    pub fn apply_transcripts(&mut self, entries: Vec<Transcript>) -> Result<()> {
        let latest = latest_assistant(&entries).map(|t| t.text.clone());
        self.transcripts = entries;
        self.emit(RuntimeEvent::Transcripts(self.transcripts.clone()));

        let Some(line) = latest else {
            return Ok(());
        };
        if line == self.text {
            return Ok(());
        }
        let label = detect_expression(&line);
        info!(expression = %label, "assistant line");
        self.set_expression(label);
        self.set_text(&line);

        let source = match self.audio.clone() {
            Some(_) if self.owner() == Some(MouthSource::Stream) => {
                self.set_speaking(true);
                return Ok(());
            }
            Some(tap) => SpeechSource::Stream(tap),
            None => SpeechSource::Synthetic { text: line },
        };
        self.speak(source)
    }

    /// Feed one voice session event.
    ///
    /// # Errors
    ///
    /// Returns the speech driver's error when a new assistant line cannot
    /// be spoken.
    pub fn apply_session_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::Status(status) => {
                self.emit(RuntimeEvent::SessionStatus(status));
                Ok(())
            }
            SessionEvent::Transcripts(entries) => self.apply_transcripts(entries),
            SessionEvent::AssistantAudio(samples) => {
                if let Some(tap) = &self.audio {
                    tap.push(&samples);
                }
                Ok(())
            }
            SessionEvent::ResponseDone => Ok(()),
            SessionEvent::Error(message) => {
                self.emit(RuntimeEvent::Error(message));
                Ok(())
            }
        }
    }

    /// Drive the mouth from live audio until [`detach_audio`](Self::detach_audio).
    ///
    /// A playing timeline keeps the mouth; analysis starts when it ends.
    ///
    /// # Errors
    ///
    /// Returns the speech driver's error when analysis cannot start.
    pub fn attach_audio(&mut self, tap: AudioTap) -> Result<()> {
        self.audio = Some(tap.clone());
        self.speak(SpeechSource::Stream(tap))
    }

    /// Remove the live audio. Analysis stops before this returns.
    pub fn detach_audio(&mut self) {
        let Some(tap) = self.audio.take() else {
            return;
        };
        tap.close();
        if self.owner() == Some(MouthSource::Stream) {
            self.driver.stop();
            self.mouth = None;
            self.signal.clear();
            self.on_speak_end();
        }
    }

    /// Lip-sync a precomputed timeline against `clock`.
    ///
    /// # Errors
    ///
    /// Returns the speech driver's error when playback cannot start.
    pub fn play_timeline(
        &mut self,
        timeline: PhonemeTimeline,
        clock: Arc<dyn PlaybackClock>,
    ) -> Result<()> {
        self.speak(SpeechSource::Timeline { timeline, clock })
    }

    /// Interrupt speech now.
    pub fn stop_speaking(&mut self) {
        if self.driver.stop() {
            self.mouth = None;
            self.on_speak_end();
        }
    }

    /// Speech ended: stop talking and relax to neutral.
    pub fn on_speak_end(&mut self) {
        self.set_speaking(false);
        self.set_expression(ExpressionLabel::Neutral);
    }

    fn drain_driver_events(&mut self) {
        loop {
            match self.driver_events.try_recv() {
                Ok(DriverEvent::Started { .. }) => {}
                Ok(DriverEvent::Finished) => self.utterance_ended(),
                Ok(DriverEvent::Failed(reason)) => {
                    self.emit(RuntimeEvent::Error(reason));
                    self.utterance_ended();
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(skipped = n, "speech events lagged");
                }
                Err(_) => break,
            }
        }
    }

    fn utterance_ended(&mut self) {
        // A newer utterance may already own the driver.
        if self.driver.state() != DriverState::Idle {
            return;
        }
        self.mouth = None;
        match self.audio.clone() {
            Some(tap) if !tap.is_closed() => {
                debug!("resuming live audio lip-sync");
                if self.speak(SpeechSource::Stream(tap)).is_err() {
                    self.on_speak_end();
                }
            }
            _ => self.on_speak_end(),
        }
    }

    /// Advance one rendered frame. Never blocks.
    ///
    /// Returns `true` when any morph weight moved.
    pub fn frame(&mut self) -> bool {
        self.drain_driver_events();

        if self.driver.state() == DriverState::Speaking {
            self.signal = self.driver.signal();
        } else if self.mouth != Some(MouthSource::Timeline) {
            self.blend.decay_signal(&mut self.signal);
        }
        self.blend.tick(&mut self.rig, &self.signal)
    }
}
