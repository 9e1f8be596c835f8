//! HTTP/2 flow control window tracking (RFC 7540 Section 6.9).

use crate::error::SessionError;

/// Default initial window size (RFC 7540 Section 6.9.2).
pub const DEFAULT_WINDOW_SIZE: i64 = 65_535;

/// Largest legal window (2^31 - 1).
pub const MAX_WINDOW_SIZE: i64 = 0x7fff_ffff;

/// Tracks a send or receive flow control window.
#[derive(Debug, Clone)]
pub struct FlowControl {
    window: i64,
}

impl FlowControl {
    pub fn new(initial: i64) -> Self {
        Self { window: initial }
    }

    /// Current window size (may be negative after SETTINGS change).
    pub fn window(&self) -> i64 {
        self.window
    }

    /// Bytes that may be sent right now; zero while the window is exhausted or negative.
    pub fn available(&self) -> usize {
        self.window.max(0) as usize
    }

    /// Consume `amount` bytes from the window.
    /// Returns error if the window would go below zero.
    pub fn consume(&mut self, amount: u32) -> Result<(), SessionError> {
        let new = self.window - i64::from(amount);
        if new < 0 {
            return Err(SessionError::FlowControl);
        }
        self.window = new;
        Ok(())
    }

    /// Add `increment` to the window (from WINDOW_UPDATE).
    /// Returns error if the window would exceed 2^31 - 1.
    pub fn increase(&mut self, increment: u32) -> Result<(), SessionError> {
        let new = self.window + i64::from(increment);
        if new > MAX_WINDOW_SIZE {
            return Err(SessionError::FlowControl);
        }
        self.window = new;
        Ok(())
    }

    /// Adjust the window after a SETTINGS change to INITIAL_WINDOW_SIZE.
    /// `delta` is (new_initial - old_initial), which can be negative.
    pub fn adjust(&mut self, delta: i64) -> Result<(), SessionError> {
        let new = self.window + delta;
        if new > MAX_WINDOW_SIZE {
            return Err(SessionError::FlowControl);
        }
        self.window = new;
        Ok(())
    }
}

impl Default for FlowControl {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
