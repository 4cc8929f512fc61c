// SPDX-License-Identifier: MIT OR Apache-2.0
//! General purpose clips.

use crate::clip::{Clip, ClipEnd, ClipError};
use std::fmt;

/// Runs an action and ends immediately
pub struct InstantClip {
    action: Box<dyn FnMut()>,
}

impl InstantClip {
    /// Clip running `action` every time it starts
    pub fn new(action: impl FnMut() + 'static) -> Self {
        Self {
            action: Box::new(action),
        }
    }

    /// Clip that does nothing
    pub fn noop() -> Self {
        Self::new(|| {})
    }
}

impl fmt::Debug for InstantClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstantClip").finish_non_exhaustive()
    }
}

impl Clip for InstantClip {
    fn kind(&self) -> &'static str {
        "instant"
    }

    fn on_start(&mut self, end: ClipEnd) {
        (self.action)();
        end.end();
    }
}

/// Ends after a fixed duration
#[derive(Debug)]
pub struct WaitClip {
    /// Seconds to wait
    pub duration: f32,
    elapsed: f32,
    end: Option<ClipEnd>,
}

impl WaitClip {
    /// Wait for `duration` seconds
    pub fn new(duration: f32) -> Self {
        Self {
            duration,
            elapsed: 0.0,
            end: None,
        }
    }
}

impl Clip for WaitClip {
    fn kind(&self) -> &'static str {
        "wait"
    }

    fn on_start(&mut self, end: ClipEnd) {
        self.elapsed = 0.0;
        if self.duration <= 0.0 {
            self.end = None;
            end.end();
        } else {
            self.end = Some(end);
        }
    }

    fn on_tick(&mut self, delta_time: f32) {
        if self.end.is_none() {
            return;
        }
        self.elapsed += delta_time;
        if self.elapsed >= self.duration {
            if let Some(end) = self.end.take() {
                end.end();
            }
        }
    }

    fn on_validate(&mut self) -> Result<(), ClipError> {
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(ClipError::InvalidDuration(self.duration));
        }
        Ok(())
    }
}

/// Writes a message to the log and ends
#[derive(Debug, Clone)]
pub struct LogClip {
    /// Message to log
    pub message: String,
}

impl LogClip {
    /// Log `message` when started
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Clip for LogClip {
    fn kind(&self) -> &'static str {
        "log"
    }

    fn on_start(&mut self, end: ClipEnd) {
        tracing::info!("{}", self.message);
        end.end();
    }

    fn on_validate(&mut self) -> Result<(), ClipError> {
        if self.message.trim().is_empty() {
            return Err(ClipError::Invalid("empty log message".to_string()));
        }
        Ok(())
    }
}
