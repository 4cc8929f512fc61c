// SPDX-License-Identifier: MIT OR Apache-2.0
//! Controller configuration.

use serde::{Deserialize, Serialize};

/// Settings applied by a [`SequenceController`](crate::SequenceController)
/// to every frame it drives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Multiplier applied to every delta time (1.0 = normal speed)
    pub time_scale: f32,
    /// Upper bound for a single scaled delta time, in seconds
    pub max_delta_time: f32,
}

impl ControllerSettings {
    /// Scale and clamp a raw frame delta; non-finite input counts as no time
    pub fn effective_delta(&self, delta_time: f32) -> f32 {
        let scaled = delta_time * self.time_scale;
        if !scaled.is_finite() {
            return 0.0;
        }
        scaled.clamp(0.0, self.max_delta_time.max(0.0))
    }
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            max_delta_time: 0.25,
        }
    }
}
