//! Connection state owned by the driver task.
//!
//! Everything here is synchronous so the reconnection rules can be tested
//! without a runtime. The driver is the only writer; callers only ever see a
//! [`ConnectionSnapshot`].

use std::collections::VecDeque;
use std::time::Duration;

use crate::config::{MIN_RECONNECT_DELAY, ReconnectConfig};

/// Lifecycle phase of a connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// A connect attempt is in flight.
    Connecting,
    /// The link is established and frames go straight to the wire.
    Open,
    /// The link dropped and a reconnect timer is armed.
    ClosedRetrying,
    /// `close()` was called; nothing further will happen.
    ClosedFinal,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::ClosedRetrying => "closed-retrying",
            Self::ClosedFinal => "closed-final",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSnapshot {
    /// Current phase.
    pub phase: ConnectionPhase,
    /// Failed or closed cycles since the last successful open.
    pub attempts: u32,
    /// Frames waiting for the link.
    pub pending: usize,
}

/// Delay before reconnect attempt number `attempt` (1-based).
///
/// `initial_delay * 2^min(attempt - 1, max_exponent)`, capped at `max_delay`
/// and never below [`MIN_RECONNECT_DELAY`].
#[must_use]
pub fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(config.max_exponent);
    let factor = 1_u32.checked_shl(exponent).unwrap_or(u32::MAX);
    config
        .initial_delay
        .saturating_mul(factor)
        .min(config.max_delay)
        .max(MIN_RECONNECT_DELAY)
}

/// Mutable connection state.
#[derive(Debug)]
pub struct ConnectionState {
    phase: ConnectionPhase,
    attempts: u32,
    pending: VecDeque<String>,
    timer_armed: bool,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionState {
    /// Fresh state: connecting, nothing queued.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: ConnectionPhase::Connecting,
            attempts: 0,
            pending: VecDeque::new(),
            timer_armed: false,
        }
    }

    /// Current view.
    #[must_use]
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            phase: self.phase,
            attempts: self.attempts,
            pending: self.pending.len(),
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Failed cycles since the last successful open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Queue a frame behind everything already pending.
    ///
    /// Returns `false` (and drops the frame) once the state is final.
    pub fn enqueue(&mut self, frame: String) -> bool {
        if self.phase == ConnectionPhase::ClosedFinal {
            return false;
        }
        self.pending.push_back(frame);
        true
    }

    /// Enter the connecting phase.
    pub fn begin_connect(&mut self) {
        if self.phase != ConnectionPhase::ClosedFinal {
            self.phase = ConnectionPhase::Connecting;
        }
    }

    /// Record a successful open and hand back the frames to flush, FIFO.
    pub fn mark_open(&mut self) -> VecDeque<String> {
        self.phase = ConnectionPhase::Open;
        self.attempts = 0;
        std::mem::take(&mut self.pending)
    }

    /// Put frames that did not reach the wire back at the head of the queue.
    ///
    /// `unsent` keeps its order and goes in front of anything queued since.
    pub fn restore_unsent(&mut self, unsent: impl IntoIterator<Item = String>) {
        if self.phase == ConnectionPhase::ClosedFinal {
            return;
        }
        let mut restored: VecDeque<String> = unsent.into_iter().collect();
        restored.append(&mut self.pending);
        self.pending = restored;
    }

    /// React to an unplanned close.
    ///
    /// Returns the delay for the new timer, or `None` if a timer is already
    /// armed or the state is final.
    pub fn schedule_reconnect(&mut self, config: &ReconnectConfig) -> Option<Duration> {
        if self.timer_armed || self.phase == ConnectionPhase::ClosedFinal {
            return None;
        }
        self.attempts = self.attempts.saturating_add(1);
        self.timer_armed = true;
        self.phase = ConnectionPhase::ClosedRetrying;
        Some(backoff_delay(self.attempts, config))
    }

    /// The reconnect timer fired.
    pub fn timer_fired(&mut self) {
        self.timer_armed = false;
    }

    /// Enter the final phase. Returns how many pending frames were dropped.
    pub fn close(&mut self) -> usize {
        self.phase = ConnectionPhase::ClosedFinal;
        self.timer_armed = false;
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }
}
