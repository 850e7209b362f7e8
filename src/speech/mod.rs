//! Speech driver: the single writer of the face's viseme signal.
//!
//! The driver is `Idle` or `Speaking`. Entering `Speaking` spawns exactly one
//! sampling task for the chosen [`SpeechSource`]; any previous task is
//! cancelled first. Leaving `Speaking` clears the signal. Completion and
//! failure are reported as [`DriverEvent`]s so callers can reset UI state.
//!
//! ```text
//!            speak(source)                 synthesizer done / tap closed /
//!   Idle ───────────────────▶ Speaking ──  timeline exhausted / stop()  ──▶ Idle
//!                               │  ▲
//!                               └──┘ speak(source): cancel, restart
//! ```

pub mod audio;
pub mod clock;
pub mod synth;

pub use audio::{AudioTap, pcm16_from_le_bytes};
pub use clock::{ManualClock, PlaybackClock, WallClock};
pub use synth::{PacedSynthesizer, Synthesizer};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{LipSyncConfig, SpeechConfig};
use crate::error::{AvatarError, Result};
use crate::viseme::text::text_visemes;
use crate::viseme::{FrequencyBandMapper, PhonemeTimeline, Spectrum, VisemeSignal};

/// Lifecycle state of the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// No utterance; the signal is cleared.
    Idle,
    /// A sampling task owns the signal.
    Speaking,
}

/// What feeds the mouth for one utterance.
#[derive(Clone)]
pub enum SpeechSource {
    /// Text spoken by a [`Synthesizer`], with character-stepped visemes.
    Synthetic {
        /// Utterance text.
        text: String,
    },
    /// Live audio analysed by frequency band.
    Stream(AudioTap),
    /// Precomputed intervals sampled against a playback clock.
    Timeline {
        /// Mouth-shape intervals.
        timeline: PhonemeTimeline,
        /// Position of the audio the timeline belongs to.
        clock: Arc<dyn PlaybackClock>,
    },
}

impl SpeechSource {
    fn kind(&self) -> &'static str {
        match self {
            SpeechSource::Synthetic { .. } => "synthetic",
            SpeechSource::Stream(_) => "stream",
            SpeechSource::Timeline { .. } => "timeline",
        }
    }
}

impl std::fmt::Debug for SpeechSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpeechSource::Synthetic { text } => {
                f.debug_struct("Synthetic").field("text", text).finish()
            }
            SpeechSource::Stream(tap) => f.debug_tuple("Stream").field(tap).finish(),
            SpeechSource::Timeline { timeline, .. } => f
                .debug_struct("Timeline")
                .field("intervals", &timeline.len())
                .finish_non_exhaustive(),
        }
    }
}

/// Driver lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// An utterance started.
    Started {
        /// Source kind: `synthetic`, `stream` or `timeline`.
        source: &'static str,
    },
    /// The utterance ended on its own.
    Finished,
    /// The utterance failed; the driver is idle again.
    Failed(String),
}

#[derive(Debug)]
struct Shared {
    state: DriverState,
    signal: VisemeSignal,
    /// Bumped whenever the active utterance changes; stale tasks compare
    /// against it before writing.
    generation: u64,
}

/// Owns the viseme signal and the one task that writes it.
pub struct SpeechDriver {
    shared: Arc<Mutex<Shared>>,
    cancel: Mutex<Option<CancellationToken>>,
    events: broadcast::Sender<DriverEvent>,
    synthesizer: Arc<dyn Synthesizer>,
    speech: SpeechConfig,
    lipsync: LipSyncConfig,
    active_tasks: Arc<AtomicUsize>,
}

impl std::fmt::Debug for SpeechDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechDriver")
            .field("state", &self.state())
            .field("active_tasks", &self.active_tasks())
            .finish_non_exhaustive()
    }
}

/// Decrements the live task count when a sampling task ends, however it ends.
struct TaskGuard(Arc<AtomicUsize>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn lock(shared: &Mutex<Shared>) -> std::sync::MutexGuard<'_, Shared> {
    match shared.lock() {
        Ok(s) => s,
        Err(p) => p.into_inner(),
    }
}

impl SpeechDriver {
    /// Create an idle driver using `synthesizer` for synthetic speech.
    pub fn new(
        speech: SpeechConfig,
        lipsync: LipSyncConfig,
        synthesizer: Arc<dyn Synthesizer>,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            shared: Arc::new(Mutex::new(Shared {
                state: DriverState::Idle,
                signal: VisemeSignal::default(),
                generation: 0,
            })),
            cancel: Mutex::new(None),
            events,
            synthesizer,
            speech,
            lipsync,
            active_tasks: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Driver with the silent [`PacedSynthesizer`].
    pub fn paced(speech: SpeechConfig, lipsync: LipSyncConfig) -> Self {
        let synth = Arc::new(PacedSynthesizer::new(&speech));
        Self::new(speech, lipsync, synth)
    }

    /// Current state.
    pub fn state(&self) -> DriverState {
        lock(&self.shared).state
    }

    /// Snapshot of the viseme signal.
    pub fn signal(&self) -> VisemeSignal {
        lock(&self.shared).signal.clone()
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<DriverEvent> {
        self.events.subscribe()
    }

    /// Number of sampling tasks still running, including ones winding down
    /// after cancellation.
    pub fn active_tasks(&self) -> usize {
        self.active_tasks.load(Ordering::Acquire)
    }

    /// Start an utterance, cancelling any running one first.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AvatarError::Speech`] for empty synthetic text (the driver
    /// is left untouched) or when no runtime is available.
    pub fn speak(&self, source: SpeechSource) -> Result<()> {
        if let SpeechSource::Synthetic { text } = &source
            && text.trim().is_empty()
        {
            return Err(AvatarError::Speech("empty utterance".to_owned()));
        }
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| AvatarError::Speech(format!("no async runtime: {e}")))?;

        self.cancel_task();
        let generation = {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            shared.state = DriverState::Speaking;
            shared.signal.clear();
            shared.generation
        };

        let token = CancellationToken::new();
        {
            let mut slot = match self.cancel.lock() {
                Ok(s) => s,
                Err(p) => p.into_inner(),
            };
            *slot = Some(token.clone());
        }

        let kind = source.kind();
        info!(source = kind, generation, "speech started");
        let _ = self.events.send(DriverEvent::Started { source: kind });

        let task = SamplingTask {
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
            generation,
            token,
        };
        self.active_tasks.fetch_add(1, Ordering::AcqRel);
        let guard = TaskGuard(Arc::clone(&self.active_tasks));

        match source {
            SpeechSource::Synthetic { text } => {
                let synth = Arc::clone(&self.synthesizer);
                let language = self.speech.language.clone();
                let step = Duration::from_millis(self.speech.char_interval_ms.max(1));
                handle.spawn(async move {
                    let _guard = guard;
                    task.run_synthetic(synth, text, language, step).await;
                });
            }
            SpeechSource::Stream(tap) => {
                let lipsync = self.lipsync.clone();
                handle.spawn(async move {
                    let _guard = guard;
                    task.run_stream(tap, lipsync).await;
                });
            }
            SpeechSource::Timeline { timeline, clock } => {
                let step = Duration::from_millis(self.lipsync.analysis_interval_ms.max(1));
                handle.spawn(async move {
                    let _guard = guard;
                    task.run_timeline(timeline, clock, step).await;
                });
            }
        }
        Ok(())
    }

    /// Stop the current utterance. Returns `false` when already idle.
    ///
    /// Takes effect immediately: once this returns the signal is cleared and
    /// the cancelled task can no longer write it. No event is emitted.
    pub fn stop(&self) -> bool {
        {
            let mut shared = lock(&self.shared);
            if shared.state == DriverState::Idle {
                return false;
            }
            shared.generation += 1;
            shared.state = DriverState::Idle;
            shared.signal.clear();
        }
        self.cancel_task();
        info!("speech stopped");
        true
    }

    fn cancel_task(&self) {
        let token = match self.cancel.lock() {
            Ok(mut s) => s.take(),
            Err(p) => p.into_inner().take(),
        };
        if let Some(token) = token {
            token.cancel();
        }
    }
}

impl Drop for SpeechDriver {
    fn drop(&mut self) {
        self.cancel_task();
    }
}

/// State handed to a spawned sampling task.
struct SamplingTask {
    shared: Arc<Mutex<Shared>>,
    events: broadcast::Sender<DriverEvent>,
    generation: u64,
    token: CancellationToken,
}

impl SamplingTask {
    /// Apply `f` to the signal if this task still owns it.
    fn write(&self, f: impl FnOnce(&mut VisemeSignal)) -> bool {
        let mut shared = lock(&self.shared);
        if shared.generation != self.generation {
            return false;
        }
        f(&mut shared.signal);
        true
    }

    /// Return to idle and report `event`, unless superseded.
    fn finish(&self, event: DriverEvent) {
        {
            let mut shared = lock(&self.shared);
            if shared.generation != self.generation {
                return;
            }
            shared.state = DriverState::Idle;
            shared.signal.clear();
        }
        match &event {
            DriverEvent::Failed(reason) => warn!(reason = %reason, "speech failed"),
            _ => info!("speech finished"),
        }
        let _ = self.events.send(event);
    }

    async fn run_synthetic(
        self,
        synth: Arc<dyn Synthesizer>,
        text: String,
        language: String,
        step: Duration,
    ) {
        let steps = text_visemes(&text);
        let utterance = synth.speak(&text, &language);
        tokio::pin!(utterance);

        let mut ticker = tokio::time::interval(step);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut index = 0usize;

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!("synthetic speech cancelled");
                    return;
                }
                result = &mut utterance => {
                    match result {
                        Ok(()) => self.finish(DriverEvent::Finished),
                        Err(e) => self.finish(DriverEvent::Failed(e.to_string())),
                    }
                    return;
                }
                _ = ticker.tick() => {
                    let current = steps.get(index).copied();
                    index += 1;
                    let owned = self.write(|signal| match current.and_then(|s| s.viseme.map(|v| (v, s.strength))) {
                        Some((viseme, strength)) => signal.set(viseme.morph_name(), strength),
                        None => signal.clear(),
                    });
                    if !owned {
                        return;
                    }
                }
            }
        }
    }

    async fn run_stream(self, tap: AudioTap, config: LipSyncConfig) {
        let mut spectrum = Spectrum::from_config(&config);
        let mapper = FrequencyBandMapper::new(&config);
        let mut ticker =
            tokio::time::interval(Duration::from_millis(config.analysis_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!("stream analysis cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if tap.is_closed() {
                        self.finish(DriverEvent::Finished);
                        return;
                    }
                    let window = tap.latest(spectrum.fft_size());
                    let levels = spectrum.levels(&window);
                    if !self.write(|signal| mapper.classify(levels, signal)) {
                        return;
                    }
                }
            }
        }
    }

    async fn run_timeline(
        self,
        timeline: PhonemeTimeline,
        clock: Arc<dyn PlaybackClock>,
        step: Duration,
    ) {
        let mut ticker = tokio::time::interval(step);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.token.cancelled() => {
                    debug!("timeline playback cancelled");
                    return;
                }
                _ = ticker.tick() => {
                    if clock.is_paused() {
                        continue;
                    }
                    let t = clock.position();
                    if timeline.is_finished_at(t) {
                        self.finish(DriverEvent::Finished);
                        return;
                    }
                    let sample = timeline.sample(t);
                    if !self.write(|signal| *signal = sample) {
                        return;
                    }
                }
            }
        }
    }
}
