//! Math types.
//!
//! Players live on a 2D plane; the renderer owns depth.

use serde::{Deserialize, Serialize};

/// A player's last reported location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const ORIGIN: Self = Self { x: 0.0, y: 0.0 };

    /// Where a freshly announced player is drawn until its first report arrives.
    pub const SPAWN: Self = Self { x: 0.0, y: 20.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn lerp(self, to: Self, t: f64) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(self.x + (to.x - self.x) * t, self.y + (to.y - self.y) * t)
    }

    /// True if either axis moved by more than `threshold`.
    pub fn moved_beyond(self, other: Self, threshold: f64) -> bool {
        (self.x - other.x).abs() > threshold || (self.y - other.y).abs() > threshold
    }
}
