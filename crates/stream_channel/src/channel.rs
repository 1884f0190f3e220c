//! Data channel lifecycle: create, connect, receive, send, shutdown
//!
//! Connecting and receiving run on two dedicated threads. Both poll the
//! runtime and stop cooperatively when the shared phase moves on; shutdown
//! joins them before the handle is shut down, destroyed and cleared.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};

use crate::api::{ChannelApi, ChannelError, ChannelHandle, STREAMING_CHANNEL_GUID};
use crate::sink::PayloadSink;
use crate::status::{ChannelFlags, ChannelPhase, ChannelStatus};

/// Sent once right after the peer connects
pub const HANDSHAKE: [u8; 5] = [0x01, 0x02, 0x03, 0x04, 0x05];

/// Smallest receive buffer the channel runs with
pub const MIN_RECEIVE_BUFFER: usize = 4096;

/// Channel timing
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Give up connecting after this long (absolute from task start)
    pub connect_timeout: Duration,
    /// Status poll cadence while connecting
    pub connect_poll_interval: Duration,
    /// Pause between receive iterations
    pub receive_poll_interval: Duration,
    /// Largest payload the receive task accepts; raised to
    /// [`MIN_RECEIVE_BUFFER`] if smaller
    pub receive_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            connect_poll_interval: Duration::from_millis(100),
            receive_poll_interval: Duration::from_millis(1),
            receive_buffer_size: MIN_RECEIVE_BUFFER,
        }
    }
}

struct Shared {
    api: Arc<dyn ChannelApi>,
    /// Written once at create, cleared once after both tasks are joined
    handle: RwLock<Option<ChannelHandle>>,
    flags: ChannelFlags,
    sink: Arc<dyn PayloadSink>,
    config: ChannelConfig,
    receive_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn send(&self, payload: &[u8]) -> Result<(), ChannelError> {
        // Held across the call so shutdown cannot clear the handle mid-send
        let guard = self.handle.read();
        let handle = (*guard).ok_or(ChannelError::NullHandle)?;

        if !self.flags.is_connected() {
            return Err(ChannelError::NotConnected);
        }

        match self.api.send(handle, payload) {
            Ok(()) => {
                log::debug!("Sent {} bytes", payload.len());
                Ok(())
            }
            Err(e) => {
                log::warn!("Failed to send data: {}", e);
                Err(e)
            }
        }
    }
}

/// The application's end of the opaque data channel
pub struct DataChannel {
    shared: Arc<Shared>,
    connect_thread: Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl DataChannel {
    /// Create the channel with the application's fixed identifier
    pub fn create(
        api: Arc<dyn ChannelApi>,
        mut config: ChannelConfig,
        sink: Arc<dyn PayloadSink>,
    ) -> Result<Self, ChannelError> {
        if config.receive_buffer_size < MIN_RECEIVE_BUFFER {
            log::debug!(
                "Receive buffer raised from {} to {} bytes",
                config.receive_buffer_size,
                MIN_RECEIVE_BUFFER
            );
            config.receive_buffer_size = MIN_RECEIVE_BUFFER;
        }

        let handle = api.create(&STREAMING_CHANNEL_GUID).map_err(|e| {
            log::error!("Failed to create opaque data channel: {}", e);
            e
        })?;
        log::info!("Opaque data channel created ({})", STREAMING_CHANNEL_GUID);

        Ok(Self {
            shared: Arc::new(Shared {
                api,
                handle: RwLock::new(Some(handle)),
                flags: ChannelFlags::new(),
                sink,
                config,
                receive_thread: Mutex::new(None),
            }),
            connect_thread: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Start waiting for the peer on a background thread
    pub fn connect_async(&self) -> Result<(), ChannelError> {
        let mut connect_thread = self.connect_thread.lock();

        // Marked before spawning so a shutdown racing the spawn still stops it
        let flags = &self.shared.flags;
        if !flags.transition(ChannelPhase::Idle, ChannelPhase::Connecting)
            && !flags.transition(ChannelPhase::Disconnected, ChannelPhase::Connecting)
        {
            return Err(ChannelError::AlreadyStarted);
        }

        // A finished earlier attempt
        if let Some(previous) = connect_thread.take() {
            if previous.join().is_err() {
                log::warn!("Previous connect thread panicked");
            }
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("channel-connect".to_string())
            .spawn(move || connect_loop(shared));

        match spawned {
            Ok(handle) => {
                *connect_thread = Some(handle);
                log::info!("Starting async connection to the remote peer...");
                Ok(())
            }
            Err(e) => {
                flags.transition(ChannelPhase::Connecting, ChannelPhase::Idle);
                Err(ChannelError::Spawn("connect", e.to_string()))
            }
        }
    }

    /// Send one payload. Fails without touching the runtime unless connected.
    pub fn send(&self, payload: &[u8]) -> Result<(), ChannelError> {
        self.shared.send(payload)
    }

    pub fn phase(&self) -> ChannelPhase {
        self.shared.flags.phase()
    }

    pub fn is_connecting(&self) -> bool {
        self.shared.flags.is_connecting()
    }

    pub fn is_connected(&self) -> bool {
        self.shared.flags.is_connected()
    }

    pub fn is_running(&self) -> bool {
        self.shared.flags.is_running()
    }

    /// Runtime handle; `None` once shut down
    pub fn handle(&self) -> Option<ChannelHandle> {
        *self.shared.handle.read()
    }

    /// Stop both tasks, join them, then shut down and destroy the channel.
    /// Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let previous = self.shared.flags.begin_shutdown();
        log::info!("Shutting down data channel ({:?})", previous);

        if let Some(handle) = self.connect_thread.lock().take() {
            if handle.join().is_err() {
                log::error!("Connect thread panicked");
            }
        }
        if let Some(handle) = self.shared.receive_thread.lock().take() {
            if handle.join().is_err() {
                log::error!("Receive thread panicked");
            }
        }

        let mut handle = self.shared.handle.write();
        if let Some(channel) = handle.take() {
            if let Err(e) = self.shared.api.shutdown(channel) {
                log::warn!("Channel shutdown failed: {}", e);
            }
            if let Err(e) = self.shared.api.destroy(channel) {
                log::warn!("Channel destroy failed: {}", e);
            }
        }

        log::info!("Data channel shut down");
    }
}

impl Drop for DataChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn connect_loop(shared: Arc<Shared>) {
    let started = Instant::now();
    let Some(handle) = *shared.handle.read() else {
        shared
            .flags
            .transition(ChannelPhase::Connecting, ChannelPhase::Idle);
        return;
    };

    while shared.flags.is_connecting() {
        match shared.api.status(handle) {
            Ok(Some(ChannelStatus::Connected)) => {
                on_connected(&shared);
                break;
            }
            Ok(Some(ChannelStatus::Disconnected)) => {
                log::warn!("Channel disconnected during connection attempt");
                shared
                    .flags
                    .transition(ChannelPhase::Connecting, ChannelPhase::Disconnected);
                break;
            }
            Ok(Some(ChannelStatus::Connecting)) => {}
            Ok(other) => log::debug!("Unexpected channel state {:?}", other),
            Err(e) => {
                log::warn!("Failed to get channel state: {}", e);
                break;
            }
        }

        if started.elapsed() > shared.config.connect_timeout {
            log::warn!(
                "Connection timeout after {:?}",
                shared.config.connect_timeout
            );
            break;
        }

        thread::sleep(shared.config.connect_poll_interval);
    }

    // No-op when the phase already moved on
    shared
        .flags
        .transition(ChannelPhase::Connecting, ChannelPhase::Idle);
    log::info!("Connection thread ended");
}

fn on_connected(shared: &Arc<Shared>) {
    if !shared
        .flags
        .transition(ChannelPhase::Connecting, ChannelPhase::Connected)
    {
        return;
    }
    log::info!("Opaque data channel connected!");

    let receiver = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name("channel-receive".to_string())
        .spawn(move || receive_loop(receiver));

    match spawned {
        Ok(handle) => {
            // An earlier connection's receive task has already left its loop
            if let Some(previous) = shared.receive_thread.lock().replace(handle) {
                if previous.join().is_err() {
                    log::warn!("Previous receive thread panicked");
                }
            }
        }
        Err(e) => {
            log::error!("Failed to spawn receive thread: {}", e);
            shared
                .flags
                .transition(ChannelPhase::Connected, ChannelPhase::Disconnected);
            return;
        }
    }

    if let Err(e) = shared.send(&HANDSHAKE) {
        log::warn!("Handshake not sent: {}", e);
    }
}

fn receive_loop(shared: Arc<Shared>) {
    log::info!("Started opaque data channel receive loop");
    let mut buffer = vec![0u8; shared.config.receive_buffer_size];

    while shared.flags.is_running() {
        let Some(handle) = *shared.handle.read() else {
            break;
        };

        match shared.api.receive(handle, &mut buffer) {
            Ok(0) => {}
            Ok(received) => shared.sink.deliver(&buffer[..received.min(buffer.len())]),
            Err(e) => log::trace!("Receive failed: {}", e),
        }

        if let Ok(Some(ChannelStatus::Disconnected)) = shared.api.status(handle) {
            log::info!("Channel disconnected, stopping receive loop");
            shared
                .flags
                .transition(ChannelPhase::Connected, ChannelPhase::Disconnected);
            break;
        }

        thread::sleep(shared.config.receive_poll_interval);
    }

    log::info!("Opaque data channel receive loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::LogSink;
    use crate::testing::MockChannelApi;

    fn fast() -> ChannelConfig {
        ChannelConfig {
            connect_timeout: Duration::from_millis(500),
            connect_poll_interval: Duration::from_millis(1),
            receive_poll_interval: Duration::from_millis(1),
            receive_buffer_size: 64,
        }
    }

    fn channel(api: &Arc<MockChannelApi>) -> DataChannel {
        let api: Arc<dyn ChannelApi> = api.clone();
        DataChannel::create(api, fast(), Arc::new(LogSink)).unwrap()
    }

    #[test]
    fn test_send_before_connect_skips_runtime() {
        let api = Arc::new(MockChannelApi::new());
        let channel = channel(&api);

        assert!(matches!(channel.send(b"early"), Err(ChannelError::NotConnected)));
        assert!(api.sent().is_empty());
    }

    #[test]
    fn test_create_failure() {
        let api = Arc::new(MockChannelApi::new());
        api.fail_create(true);
        let dyn_api: Arc<dyn ChannelApi> = api.clone();

        assert!(DataChannel::create(dyn_api, fast(), Arc::new(LogSink)).is_err());
        assert_eq!(api.log().lock().clone(), vec!["channel_create"]);
    }

    #[test]
    fn test_shutdown_clears_handle_once() {
        let api = Arc::new(MockChannelApi::new());
        let channel = channel(&api);
        assert!(channel.handle().is_some());

        channel.shutdown();
        channel.shutdown();

        assert!(channel.handle().is_none());
        assert!(matches!(channel.send(b"late"), Err(ChannelError::NullHandle)));
        assert_eq!(
            api.log().lock().clone(),
            vec!["channel_create", "channel_shutdown", "channel_destroy"]
        );
    }

    #[test]
    fn test_connect_twice_rejected() {
        let api = Arc::new(MockChannelApi::new());
        let channel = channel(&api);

        channel.connect_async().unwrap();
        assert!(matches!(channel.connect_async(), Err(ChannelError::AlreadyStarted)));
        channel.shutdown();
        assert!(!channel.is_connecting());
    }

    #[test]
    fn test_small_receive_buffer_is_raised() {
        let api = Arc::new(MockChannelApi::connecting_then_connected(0));
        let (tx, rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let dyn_api: Arc<dyn ChannelApi> = api.clone();
        let channel = DataChannel::create(dyn_api, fast(), Arc::new(tx)).unwrap();
        assert_eq!(channel.shared.config.receive_buffer_size, MIN_RECEIVE_BUFFER);

        api.push_incoming(vec![7u8; 1000]);
        channel.connect_async().unwrap();

        let payload = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(payload, vec![7u8; 1000]);
        channel.shutdown();
    }

    #[test]
    fn test_status_error_ends_connect() {
        let api = Arc::new(MockChannelApi::new());
        api.fail_status(true);
        let channel = channel(&api);

        channel.connect_async().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while channel.is_connecting() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(channel.phase(), ChannelPhase::Idle);
        assert!(!channel.is_connected());
    }
}
