//! De-duplication of repeated broker error logs.
//!
//! During an outage every command fails with the same message. The throttle
//! lets the first occurrence through, counts identical repeats within a
//! window, and reports the count once the window rolls over or the error
//! clears.

use std::time::{Duration, Instant};

/// Window during which identical messages are suppressed.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(30);

/// What the caller should log for an error occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Log the error.
    Emit,
    /// Log the error, noting how many identical ones were suppressed since the last log.
    EmitAfterSuppressed(u64),
    /// Do not log.
    Suppress,
}

#[derive(Debug)]
struct ActiveError {
    message: String,
    window_started: Instant,
    suppressed_in_window: u64,
    suppressed_total: u64,
}

/// Tracks the error currently being reported.
#[derive(Debug)]
pub struct ErrorLogThrottle {
    window: Duration,
    active: Option<ActiveError>,
}

impl ErrorLogThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            active: None,
        }
    }

    /// Record an error occurrence at `now`.
    pub fn record(&mut self, message: &str, now: Instant) -> ThrottleDecision {
        if let Some(active) = self.active.as_mut() {
            if active.message == message {
                if now.saturating_duration_since(active.window_started) < self.window {
                    active.suppressed_in_window += 1;
                    active.suppressed_total += 1;
                    return ThrottleDecision::Suppress;
                }

                let suppressed = std::mem::take(&mut active.suppressed_in_window);
                active.window_started = now;
                return if suppressed == 0 {
                    ThrottleDecision::Emit
                } else {
                    ThrottleDecision::EmitAfterSuppressed(suppressed)
                };
            }
        }

        self.active = Some(ActiveError {
            message: message.to_string(),
            window_started: now,
            suppressed_in_window: 0,
            suppressed_total: 0,
        });
        ThrottleDecision::Emit
    }

    /// Clear the active error after a success.
    ///
    /// Returns the total number of suppressed logs if an error was active.
    pub fn recover(&mut self) -> Option<u64> {
        self.active.take().map(|active| active.suppressed_total)
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }
}

impl Default for ErrorLogThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
