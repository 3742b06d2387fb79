//! Loading indicator shown while a request is in flight.
//!
//! Ultra quality gets a rotating set of phrases and a synthetic progress bar
//! that slows down as it approaches 100% without ever reaching it. Basic
//! quality shows one static phrase. The timers live in a background task that
//! is aborted when the reporter is dropped, so ending the request (or
//! replacing the reporter after a quality change) always stops them.

use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::state::Quality;

pub const ULTRA_PHRASES: [&str; 5] = [
    "Synthesizing 4K Neural Grids...",
    "Calibrating Raytracing Proxies...",
    "Enhancing Textural Fidelity...",
    "Finalizing Ultra HDR Render...",
    "Jahid is perfecting the details...",
];

pub const BASIC_PHRASE: &str = "JAHID IS THINKING...";

pub const PHRASE_INTERVAL: Duration = Duration::from_millis(3500);
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

const PROGRESS_START: f64 = 5.0;
const FAST_LIMIT: f64 = 90.0;
const SLOW_LIMIT: f64 = 98.0;
const SLOW_STEP: f64 = 0.1;
const CEILING: f64 = 99.0;
pub const MAX_FAST_STEP: f64 = 2.5;

/// Decelerating progress value: fast below 90, crawling up to 98, then frozen
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressCurve {
    value: f64,
}

impl ProgressCurve {
    pub fn new() -> Self {
        Self { value: PROGRESS_START }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Advance one step. `jitter` is the fast-phase increment, drawn from
    /// `[0, MAX_FAST_STEP)` by the timer task.
    pub fn step(&mut self, jitter: f64) {
        let increment = if self.value < FAST_LIMIT {
            jitter.clamp(0.0, MAX_FAST_STEP)
        } else if self.value < SLOW_LIMIT {
            SLOW_STEP
        } else {
            0.0
        };
        // A fast step taken just under 90 overshoots into the slow region
        self.value = (self.value + increment).min(CEILING);
    }
}

impl Default for ProgressCurve {
    fn default() -> Self {
        Self::new()
    }
}

/// What the loading indicator should currently display
#[derive(Debug, Clone, PartialEq)]
pub struct LoadingSnapshot {
    pub phrase: &'static str,
    /// Percentage for the ultra progress bar, `None` for basic quality
    pub progress: Option<f64>,
}

impl LoadingSnapshot {
    fn initial(quality: Quality) -> Self {
        match quality {
            Quality::Ultra => Self {
                phrase: ULTRA_PHRASES[0],
                progress: Some(PROGRESS_START),
            },
            Quality::Basic => Self {
                phrase: BASIC_PHRASE,
                progress: None,
            },
        }
    }

    /// Whole percent as displayed to the user
    pub fn percent(&self) -> Option<u8> {
        self.progress.map(|p| p.floor().clamp(0.0, 99.0) as u8)
    }
}

#[derive(Debug)]
pub struct ProgressReporter {
    snapshot: watch::Receiver<LoadingSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Start the indicator for `quality`. Without a tokio runtime the
    /// indicator stays on its first frame.
    pub fn start(quality: Quality) -> Self {
        let initial = LoadingSnapshot::initial(quality);
        let (tx, rx) = watch::channel(initial);

        let task = match (quality, tokio::runtime::Handle::try_current()) {
            (Quality::Ultra, Ok(handle)) => Some(handle.spawn(run_ultra(tx))),
            _ => None,
        };

        Self {
            snapshot: rx,
            task,
        }
    }

    pub fn snapshot(&self) -> LoadingSnapshot {
        self.snapshot.borrow().clone()
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_ultra(tx: watch::Sender<LoadingSnapshot>) {
    let start = Instant::now();
    let mut phrase_timer = interval_at(start + PHRASE_INTERVAL, PHRASE_INTERVAL);
    let mut progress_timer = interval_at(start + PROGRESS_INTERVAL, PROGRESS_INTERVAL);
    phrase_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    progress_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut phrase_idx = 0;
    let mut curve = ProgressCurve::new();

    loop {
        tokio::select! {
            _ = phrase_timer.tick() => {
                phrase_idx = (phrase_idx + 1) % ULTRA_PHRASES.len();
            }
            _ = progress_timer.tick() => {
                let jitter = rand::thread_rng().gen_range(0.0..MAX_FAST_STEP);
                curve.step(jitter);
            }
        }

        let snapshot = LoadingSnapshot {
            phrase: ULTRA_PHRASES[phrase_idx],
            progress: Some(curve.value()),
        };
        if tx.send(snapshot).is_err() {
            break;
        }
    }
}
