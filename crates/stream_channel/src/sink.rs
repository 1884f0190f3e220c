//! Consumers of received payloads

use crossbeam_channel::Sender;

/// Receives every payload the receive task pulls off the channel
pub trait PayloadSink: Send + Sync {
    fn deliver(&self, payload: &[u8]);
}

/// Logs the size and the first bytes of each payload
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

/// Bytes shown per logged payload
pub const LOGGED_PREFIX: usize = 16;

impl PayloadSink for LogSink {
    fn deliver(&self, payload: &[u8]) {
        log::info!("Received {} bytes", payload.len());
        log::info!("Data: {}", format_hex_prefix(payload, LOGGED_PREFIX));
    }
}

/// Forwards payloads to another thread
impl PayloadSink for Sender<Vec<u8>> {
    fn deliver(&self, payload: &[u8]) {
        if self.send(payload.to_vec()).is_err() {
            log::debug!("Payload receiver dropped, discarding {} bytes", payload.len());
        }
    }
}

/// First `limit` bytes as space-separated upper-case hex
pub fn format_hex_prefix(payload: &[u8], limit: usize) -> String {
    payload
        .iter()
        .take(limit)
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_prefix() {
        assert_eq!(format_hex_prefix(&[1, 2, 3, 4, 5], 16), "01 02 03 04 05");
        assert_eq!(format_hex_prefix(&[0xab, 0xcd, 0xef], 2), "AB CD");
        assert_eq!(format_hex_prefix(&[], 16), "");

        let long: Vec<u8> = (0..40).collect();
        assert_eq!(format_hex_prefix(&long, LOGGED_PREFIX).split(' ').count(), 16);
    }

    #[test]
    fn test_sender_sink() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.deliver(b"abc");
        assert_eq!(rx.try_recv().unwrap(), b"abc".to_vec());

        drop(rx);
        tx.deliver(b"dropped");
    }
}
