//! Host - one XR session, one optional data channel, one main loop
//!
//! Each [`Host::tick`] drains the runtime's events, runs a frame while the
//! session is running and hands the throttled application message to the
//! channel. Shutdown stops the channel first (joining both of its tasks)
//! and then tears the session down, so the instance goes last.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use stream_channel::{ChannelApi, ChannelConfig, DataChannel, PayloadSink};
use stream_xr::{Renderer, XrRuntime, XrSession};

use crate::config::HostConfig;
use crate::throttle::MessageThrottle;

/// What the outer loop should do after a tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Exit,
}

/// Create the data channel if the runtime exposes it.
///
/// `None` means the host runs rendering-only.
pub fn open_channel(
    api: Option<Arc<dyn ChannelApi>>,
    config: ChannelConfig,
    sink: Arc<dyn PayloadSink>,
) -> Option<DataChannel> {
    let Some(api) = api else {
        log::warn!("Opaque data channel not available, running without it");
        return None;
    };

    match DataChannel::create(api, config, sink) {
        Ok(channel) => Some(channel),
        Err(e) => {
            log::warn!("Failed to initialize opaque data channel: {}", e);
            None
        }
    }
}

/// Owns the session, the renderer and the channel for the process lifetime
pub struct Host<R, D>
where
    R: XrRuntime,
    D: Renderer<R::ViewPair>,
{
    session: XrSession<R>,
    renderer: D,
    channel: Option<DataChannel>,
    throttle: MessageThrottle,
    idle_sleep: Duration,
    ticks: u64,
    shut_down: bool,
}

impl<R, D> Host<R, D>
where
    R: XrRuntime,
    D: Renderer<R::ViewPair>,
{
    pub fn new(
        session: XrSession<R>,
        renderer: D,
        channel: Option<DataChannel>,
        config: &HostConfig,
    ) -> Self {
        Self {
            session,
            renderer,
            channel,
            throttle: MessageThrottle::new(config.host.message_interval_frames),
            idle_sleep: config.idle_sleep(),
            ticks: 0,
            shut_down: false,
        }
    }

    /// Start connecting the channel in the background.
    ///
    /// Returns whether a connect task was spawned.
    pub fn start(&mut self) -> bool {
        let Some(channel) = &self.channel else {
            return false;
        };

        match channel.connect_async() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to start channel connection: {}", e);
                false
            }
        }
    }

    /// One pass of the main loop
    pub fn tick(&mut self) -> TickControl {
        if self.shut_down {
            return TickControl::Exit;
        }
        self.ticks += 1;

        if let Err(e) = self.session.poll_events() {
            log::error!("Event pump failed: {}", e);
        }
        if self.session.exit_requested() {
            return TickControl::Exit;
        }

        if !self.session.is_running() {
            self.idle();
            return TickControl::Continue;
        }

        // Failures are logged and counted by the session
        let _ = self.session.render_frame(&mut self.renderer);
        if !self.session.is_active() {
            self.idle();
        }

        self.send_throttled();

        if self.session.exit_requested() {
            TickControl::Exit
        } else {
            TickControl::Continue
        }
    }

    /// Tick until the session asks to exit
    pub fn run(&mut self) {
        while self.tick() == TickControl::Continue {}
        log::info!("Main loop ended after {} ticks", self.ticks);
    }

    fn send_throttled(&mut self) {
        let connected = self.channel.as_ref().is_some_and(DataChannel::is_connected);
        let Some(payload) = self.throttle.on_frame(connected) else {
            return;
        };
        let Some(channel) = &self.channel else {
            return;
        };

        match channel.send(&payload) {
            Ok(()) => log::debug!("Sent message #{}", self.throttle.messages() - 1),
            Err(e) => log::warn!("Failed to send application message: {}", e),
        }
    }

    fn idle(&self) {
        if !self.idle_sleep.is_zero() {
            thread::sleep(self.idle_sleep);
        }
    }

    /// Stop the channel, then the session. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        log::info!("Shutting down host...");

        // The channel's API may hold the runtime instance
        if let Some(channel) = self.channel.take() {
            channel.shutdown();
        }
        self.session.shutdown();

        log::info!("Host shut down");
    }

    pub fn session(&self) -> &XrSession<R> {
        &self.session
    }

    pub fn channel(&self) -> Option<&DataChannel> {
        self.channel.as_ref()
    }

    pub fn renderer(&self) -> &D {
        &self.renderer
    }

    pub fn throttle(&self) -> &MessageThrottle {
        &self.throttle
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}

impl<R, D> Drop for Host<R, D>
where
    R: XrRuntime,
    D: Renderer<R::ViewPair>,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
