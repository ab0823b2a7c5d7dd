//! Position send throttling.
//!
//! The game loop samples the local player every frame, but a position is only
//! worth a network message once it has moved noticeably.

use platformer_shared::math::Position;

#[derive(Debug, Clone)]
pub struct PositionThrottle {
    min_delta: f64,
    last_sent: Option<Position>,
}

impl PositionThrottle {
    pub fn new(min_delta: f64) -> Self {
        Self {
            min_delta,
            last_sent: None,
        }
    }

    /// Returns true (and remembers `pos`) if `pos` should go on the wire.
    pub fn should_send(&mut self, pos: Position) -> bool {
        let send = match self.last_sent {
            None => true,
            Some(last) => pos.moved_beyond(last, self.min_delta),
        };
        if send {
            self.last_sent = Some(pos);
        }
        send
    }

    /// Forgets the last sent position so the next sample always goes out.
    pub fn reset(&mut self) {
        self.last_sent = None;
    }
}
