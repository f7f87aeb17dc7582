//! Debounce Tracker
//!
//! Turns noisy probe outcomes into a stable online/offline verdict. A device is
//! only reported offline once it has been continuously unreachable for the
//! whole confirmation window.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::probe::ProbeOutcome;

/// Start of an uninterrupted run of failed probes for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureWindow {
    pub device_id: i32,
    pub first_failure_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    ConfirmedOnline,
    PendingOffline,
    ConfirmedOffline,
}

impl fmt::Display for DebounceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebounceState::ConfirmedOnline => write!(f, "confirmed-online"),
            DebounceState::PendingOffline => write!(f, "pending-offline"),
            DebounceState::ConfirmedOffline => write!(f, "confirmed-offline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub is_online: bool,
    pub state: DebounceState,
    pub next_window: Option<FailureWindow>,
}

/// The whole debounce policy. Same inputs always give the same decision.
pub fn decide(
    device_id: i32,
    window: Option<FailureWindow>,
    outcome: &ProbeOutcome,
    now: DateTime<Utc>,
    confirmation_window: Duration,
) -> Decision {
    if outcome.is_reachable() {
        return Decision {
            is_online: true,
            state: DebounceState::ConfirmedOnline,
            next_window: None,
        };
    }

    let Some(window) = window else {
        return Decision {
            is_online: true,
            state: DebounceState::PendingOffline,
            next_window: Some(FailureWindow {
                device_id,
                first_failure_at: now,
            }),
        };
    };

    // A clock that went backwards counts as "not yet elapsed".
    let elapsed = (now - window.first_failure_at).to_std().unwrap_or_default();
    if elapsed >= confirmation_window {
        Decision {
            is_online: false,
            state: DebounceState::ConfirmedOffline,
            next_window: Some(window),
        }
    } else {
        Decision {
            is_online: true,
            state: DebounceState::PendingOffline,
            next_window: Some(window),
        }
    }
}

/// Keyed store of failure windows. The lock spans the whole read-decide-write
/// step, so two observations for the same device never interleave.
pub struct DebounceTracker {
    confirmation_window: Duration,
    windows: Mutex<HashMap<i32, FailureWindow>>,
}

impl DebounceTracker {
    pub fn new(confirmation_window: Duration) -> Self {
        Self {
            confirmation_window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn observe(&self, device_id: i32, outcome: &ProbeOutcome, now: DateTime<Utc>) -> Decision {
        let mut windows = self.windows.lock().unwrap();
        let current = windows.get(&device_id).copied();
        let decision = decide(device_id, current, outcome, now, self.confirmation_window);

        match decision.next_window {
            Some(window) => {
                windows.insert(device_id, window);
            }
            None => {
                windows.remove(&device_id);
            }
        }

        decision
    }

    pub fn window(&self, device_id: i32) -> Option<FailureWindow> {
        self.windows.lock().unwrap().get(&device_id).copied()
    }

    pub fn confirmation_window(&self) -> Duration {
        self.confirmation_window
    }
}
