//! Playback clocks for timeline-driven lip-sync.

use std::sync::Mutex;

use tokio::time::Instant;

/// Position of the audio a timeline is aligned to.
pub trait PlaybackClock: Send + Sync {
    /// Current playback position in seconds.
    fn position(&self) -> f64;

    /// Whether playback is paused. A paused clock freezes the mouth.
    fn is_paused(&self) -> bool;
}

#[derive(Debug)]
struct ManualState {
    position: f64,
    paused: bool,
}

/// Clock moved by hand. Used when a player reports its own position.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// A running clock at position zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                position: 0.0,
                paused: false,
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ManualState) -> R) -> R {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        f(&mut state)
    }

    /// Jump to `seconds`.
    pub fn set_position(&self, seconds: f64) {
        self.with_state(|s| s.position = seconds.max(0.0));
    }

    /// Move forward by `seconds`.
    pub fn advance(&self, seconds: f64) {
        self.with_state(|s| s.position = (s.position + seconds).max(0.0));
    }

    /// Pause playback.
    pub fn pause(&self) {
        self.with_state(|s| s.paused = true);
    }

    /// Resume playback.
    pub fn resume(&self) {
        self.with_state(|s| s.paused = false);
    }
}

impl PlaybackClock for ManualClock {
    fn position(&self) -> f64 {
        self.with_state(|s| s.position)
    }

    fn is_paused(&self) -> bool {
        self.with_state(|s| s.paused)
    }
}

#[derive(Debug)]
struct WallState {
    /// Instant playback (re)started, `None` while paused.
    running_since: Option<Instant>,
    /// Position accumulated before the last pause.
    banked: f64,
}

/// Clock following elapsed runtime time from when it was started.
///
/// Built on `tokio::time::Instant` so paused-time tests advance it.
#[derive(Debug)]
pub struct WallClock {
    state: Mutex<WallState>,
}

impl WallClock {
    /// A clock running from now.
    #[must_use]
    pub fn start() -> Self {
        Self {
            state: Mutex::new(WallState {
                running_since: Some(Instant::now()),
                banked: 0.0,
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut WallState) -> R) -> R {
        let mut state = match self.state.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        f(&mut state)
    }

    /// Pause, keeping the current position.
    pub fn pause(&self) {
        self.with_state(|s| {
            if let Some(since) = s.running_since.take() {
                s.banked += since.elapsed().as_secs_f64();
            }
        });
    }

    /// Resume from the paused position.
    pub fn resume(&self) {
        self.with_state(|s| {
            if s.running_since.is_none() {
                s.running_since = Some(Instant::now());
            }
        });
    }
}

impl PlaybackClock for WallClock {
    fn position(&self) -> f64 {
        self.with_state(|s| {
            s.banked + s.running_since.map_or(0.0, |t| t.elapsed().as_secs_f64())
        })
    }

    fn is_paused(&self) -> bool {
        self.with_state(|s| s.running_since.is_none())
    }
}
