//! Per-host scan state and ban feedback
//!
//! Counter transitions happen under one lock and come back as an action for
//! the caller to carry out (pause, root recheck). Pauses run outside the
//! lock in the worker that tripped the threshold, so the rest of the pool
//! keeps going.

use crate::http::response::Response;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Status codes counted towards the throttle threshold.
pub const BAN_STATUSES: [u16; 4] = [403, 429, 502, 503];

/// Consecutive transport failures after which the host is abandoned.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 5;

const TEMPLATE_THRESHOLD: u32 = 4;
const RECHECK_THRESHOLD: u32 = 9;
const QRATOR_MARKER: &str = "Guru meditation:";

/// What the observing worker must do after a counter update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanAction {
    None,
    /// Known anti-bot template recognized: enable delay, pause, resume.
    TemplatePause,
    /// Error burst: re-issue the root probe and feed the result back
    /// through [`ScanState::confirm_root_drift`].
    RootRecheck,
}

/// Outcome of a root recheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootVerdict {
    Unchanged,
    /// The host started rejecting us: enable delay, pause, resume.
    PauseAndDelay,
    /// Second detection after a pause already happened; the scan must abort.
    Fatal,
}

#[derive(Default)]
struct Counters {
    forbidden: u32,
    errors: u32,
}

pub struct ScanState {
    counters: Mutex<Counters>,
    was_banned: AtomicBool,
    abandoned: AtomicBool,
    root_status: u16,
    pause: Duration,
}

impl ScanState {
    pub fn new(root_status: u16) -> Self {
        Self::with_pause(root_status, Duration::from_secs(60))
    }

    /// The pause length is configurable so throttle handling stays testable.
    pub fn with_pause(root_status: u16, pause: Duration) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            was_banned: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            root_status,
            pause,
        }
    }

    pub fn pause(&self) -> Duration {
        self.pause
    }

    pub fn root_status(&self) -> u16 {
        self.root_status
    }

    pub fn was_banned(&self) -> bool {
        self.was_banned.load(Ordering::SeqCst)
    }

    pub fn abandon_host(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    pub fn host_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Account one candidate response and classify the follow-up.
    pub async fn observe_response(&self, response: &Response) -> BanAction {
        if !BAN_STATUSES.contains(&response.status) {
            return BanAction::None;
        }
        let mut counters = self.counters.lock().await;
        counters.forbidden += 1;
        if counters.forbidden > RECHECK_THRESHOLD {
            return BanAction::RootRecheck;
        }
        if counters.forbidden > TEMPLATE_THRESHOLD && matches_ban_template(response) {
            counters.forbidden = 0;
            self.was_banned.store(true, Ordering::SeqCst);
            return BanAction::TemplatePause;
        }
        BanAction::None
    }

    /// Feed back the status of a fresh root probe after [`BanAction::RootRecheck`].
    pub async fn confirm_root_drift(&self, current_root_status: u16) -> RootVerdict {
        if current_root_status == self.root_status {
            return RootVerdict::Unchanged;
        }
        if self.was_banned.load(Ordering::SeqCst) {
            return RootVerdict::Fatal;
        }
        let mut counters = self.counters.lock().await;
        counters.forbidden = 0;
        self.was_banned.store(true, Ordering::SeqCst);
        RootVerdict::PauseAndDelay
    }

    /// Account one transport failure; returns the consecutive failure count.
    pub async fn record_error(&self) -> u32 {
        let mut counters = self.counters.lock().await;
        counters.errors += 1;
        counters.errors
    }

    pub async fn reset_errors(&self) {
        let mut counters = self.counters.lock().await;
        counters.errors = 0;
    }
}

fn matches_ban_template(response: &Response) -> bool {
    // Qrator serves its interstitial as 503 with this literal marker.
    response.status == 503 && response.body_text().contains(QRATOR_MARKER)
}
