//! Frame-count throttle for application messages

/// Emits one numbered message every `interval` rendered frames
/// while the channel is connected.
#[derive(Debug, Clone)]
pub struct MessageThrottle {
    interval: u64,
    frames: u64,
    next_message: u64,
}

impl MessageThrottle {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            frames: 0,
            next_message: 0,
        }
    }

    /// Count one rendered frame; returns the payload due on this frame
    pub fn on_frame(&mut self, connected: bool) -> Option<Vec<u8>> {
        self.frames += 1;
        if !connected || self.frames % self.interval != 0 {
            return None;
        }

        let payload = message_payload(self.next_message);
        self.next_message += 1;
        Some(payload)
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Messages handed out so far
    pub fn messages(&self) -> u64 {
        self.next_message
    }
}

/// `"Message #<n>: OpenXR application data"` plus a trailing NUL
pub fn message_payload(n: u64) -> Vec<u8> {
    let mut payload = format!("Message #{}: OpenXR application data", n).into_bytes();
    payload.push(0);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_format() {
        let payload = message_payload(7);
        assert_eq!(payload.last(), Some(&0));
        assert_eq!(&payload[..payload.len() - 1], b"Message #7: OpenXR application data");
    }

    #[test]
    fn test_floor_cadence() {
        for frames in [0u64, 1, 89, 90, 91, 179, 180, 1000] {
            let mut throttle = MessageThrottle::new(90);
            let emitted = (0..frames).filter_map(|_| throttle.on_frame(true)).count() as u64;
            assert_eq!(emitted, frames / 90, "after {} frames", frames);
        }
    }

    #[test]
    fn test_numbers_increase() {
        let mut throttle = MessageThrottle::new(2);
        let messages: Vec<_> = (0..6).filter_map(|_| throttle.on_frame(true)).collect();
        assert_eq!(messages, vec![message_payload(0), message_payload(1), message_payload(2)]);
    }

    #[test]
    fn test_disconnected_frames_skip_their_slot() {
        let mut throttle = MessageThrottle::new(3);
        assert!((0..3).all(|_| throttle.on_frame(false).is_none()));
        assert_eq!(throttle.messages(), 0);

        let sent: Vec<_> = (0..3).filter_map(|_| throttle.on_frame(true)).collect();
        assert_eq!(sent, vec![message_payload(0)]);
        assert_eq!(throttle.frames(), 6);
    }
}
