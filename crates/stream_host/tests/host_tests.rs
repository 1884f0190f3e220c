//! Host main loop over the runtime and channel doubles

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use stream_channel::testing::MockChannelApi;
use stream_channel::{
    ChannelApi, ChannelPhase, ChannelStatus, DataChannel, LogSink, HANDSHAKE,
};
use stream_host::{message_payload, open_channel, Host, HostConfig, TickControl};
use stream_xr::prelude::*;
use stream_xr::testing::{MockRenderer, MockRuntime};

type TestHost = Host<MockRuntime, MockRenderer>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_config() -> HostConfig {
    let mut config = HostConfig::default();
    config.xr.idle_sleep_ms = 0;
    config.channel.connect_poll_ms = 1;
    config.channel.connect_timeout_ms = 5_000;
    config
}

/// Runtime that reaches FOCUSED on the first tick
fn focused_runtime(mode: ViewMode) -> MockRuntime {
    let mut runtime = MockRuntime::new(mode);
    for state in [
        SessionState::Idle,
        SessionState::Ready,
        SessionState::Synchronized,
        SessionState::Visible,
        SessionState::Focused,
    ] {
        runtime.schedule(0, RuntimeEvent::SessionStateChanged(state));
    }
    runtime
}

fn channel_for(api: &Arc<MockChannelApi>, config: &HostConfig) -> Option<DataChannel> {
    let dyn_api: Arc<dyn ChannelApi> = api.clone();
    open_channel(Some(dyn_api), config.channel_config(), Arc::new(LogSink))
}

fn host(runtime: MockRuntime, channel: Option<DataChannel>, config: &HostConfig) -> TestHost {
    let session = XrSession::new(runtime, config.session_config());
    Host::new(session, MockRenderer::default(), channel, config)
}

fn wait_for(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Application messages sent so far, without the handshake
fn app_messages(api: &MockChannelApi) -> Vec<Vec<u8>> {
    api.sent().into_iter().filter(|p| p.as_slice() != HANDSHAKE).collect()
}

/// A runtime without the channel extension still renders
#[test]
fn renders_without_channel() {
    init_logging();
    let config = test_config();
    let channel = open_channel(None, config.channel_config(), Arc::new(LogSink));
    assert!(channel.is_none());

    let mut host = host(focused_runtime(ViewMode::Immersive), channel, &config);
    assert!(!host.start());

    for _ in 0..200 {
        assert_eq!(host.tick(), TickControl::Continue);
    }

    let runtime = host.session().runtime();
    assert_eq!(runtime.submitted().len(), 200);
    assert!(runtime.submitted().iter().all(|&views| views == 2));
    assert!(runtime.violations().is_empty());
    assert_eq!(host.throttle().messages(), 0);
}

/// A channel whose create call fails is dropped, not fatal
#[test]
fn failed_channel_create_runs_rendering_only() {
    init_logging();
    let config = test_config();
    let api = Arc::new(MockChannelApi::new());
    api.fail_create(true);

    let channel = channel_for(&api, &config);
    assert!(channel.is_none());

    let mut host = host(focused_runtime(ViewMode::Immersive), channel, &config);
    assert!(!host.start());
    assert_eq!(host.tick(), TickControl::Continue);
    assert_eq!(host.session().frames(), 1);
}

/// Handheld mode submits a single view per frame
#[test]
fn handheld_renders_one_view() {
    init_logging();
    let config = test_config();
    let mut host = host(focused_runtime(ViewMode::Handheld), None, &config);

    for _ in 0..30 {
        host.tick();
    }

    let runtime = host.session().runtime();
    assert_eq!(runtime.swapchain_count(), 1);
    assert!(runtime.submitted().iter().all(|&views| views == 1));
    assert_eq!(host.renderer().draws.len(), 30);
}

/// With the peer connected, one numbered message goes out every 90 frames
#[test]
fn messages_follow_frame_cadence() {
    init_logging();
    let config = test_config();
    let api = Arc::new(MockChannelApi::connecting_then_connected(3));
    let channel = channel_for(&api, &config);

    let mut host = host(focused_runtime(ViewMode::Immersive), channel, &config);
    assert!(host.start());
    assert!(wait_for(|| host.channel().is_some_and(DataChannel::is_connected)));

    for _ in 0..455 {
        assert_eq!(host.tick(), TickControl::Continue);
    }

    assert_eq!(host.throttle().frames(), 455);
    assert_eq!(host.throttle().messages(), 5);

    let sent = app_messages(&api);
    assert_eq!(sent.len(), 5);
    assert_eq!(sent[0], message_payload(0));
    assert_eq!(sent[4], message_payload(4));
    assert!(sent[0].ends_with(b"OpenXR application data\0"));
}

/// The peer drops mid-session: frames keep rendering and no further
/// message reaches the runtime.
#[test]
fn disconnect_keeps_rendering_and_stops_messages() {
    init_logging();
    let config = test_config();
    let api = Arc::new(MockChannelApi::connecting_then_connected(0));
    let channel = channel_for(&api, &config);

    let mut host = host(focused_runtime(ViewMode::Immersive), channel, &config);
    assert!(host.start());
    assert!(wait_for(|| host.channel().is_some_and(DataChannel::is_connected)));

    for _ in 0..500 {
        assert_eq!(host.tick(), TickControl::Continue);
    }
    assert_eq!(app_messages(&api).len(), 5);

    api.set_status(ChannelStatus::Disconnected);
    assert!(wait_for(|| host
        .channel()
        .is_some_and(|c| c.phase() == ChannelPhase::Disconnected)));
    let sent_before = api.sent().len();
    let frames_before = host.session().frames();

    for _ in 0..200 {
        assert_eq!(host.tick(), TickControl::Continue);
    }

    assert_eq!(host.session().frames(), frames_before + 200);
    assert_eq!(host.throttle().frames(), 700);
    assert_eq!(host.throttle().messages(), 5);
    assert_eq!(api.sent().len(), sent_before);
    assert!(host.session().runtime().violations().is_empty());
}

/// Frames rendered before the peer connects produce no messages
#[test]
fn no_messages_while_connecting() {
    init_logging();
    let config = test_config();
    let api = Arc::new(MockChannelApi::new());
    let channel = channel_for(&api, &config);

    let mut host = host(focused_runtime(ViewMode::Immersive), channel, &config);
    assert!(host.start());

    for _ in 0..180 {
        host.tick();
    }

    assert!(host.channel().is_some_and(DataChannel::is_connecting));
    assert!(api.sent().is_empty());
    assert_eq!(host.throttle().messages(), 0);
}

/// Session loss ends the loop; the channel goes down before the session
/// and the instance goes last.
#[test]
fn session_loss_shuts_down_in_order() {
    init_logging();
    let config = test_config();
    let log = Arc::new(Mutex::new(Vec::new()));

    let api = Arc::new(MockChannelApi::connecting_then_connected(0).with_log(log.clone()));
    let channel = channel_for(&api, &config);

    let mut runtime = focused_runtime(ViewMode::Immersive).with_log(log.clone());
    runtime.schedule(300, RuntimeEvent::SessionStateChanged(SessionState::LossPending));

    let mut host = host(runtime, channel, &config);
    assert!(host.start());
    assert!(wait_for(|| host.channel().is_some_and(DataChannel::is_connected)));

    let mut ticks = 0;
    while host.tick() == TickControl::Continue {
        ticks += 1;
        assert!(ticks < 1_000, "loss never ended the loop");
    }
    assert!(host.session().exit_requested());
    assert_eq!(host.session().frames(), 300);

    host.shutdown();
    assert!(host.channel().is_none());

    let log = log.lock();
    let tail: Vec<&str> = log.iter().rev().take(4).rev().map(String::as_str).collect();
    assert_eq!(
        tail,
        ["channel_shutdown", "channel_destroy", "destroy_session", "destroy_instance"]
    );
    assert_eq!(log.iter().filter(|c| *c == "channel_create").count(), 1);
    assert!(api.violations().is_empty());
}

/// Shutdown runs once; later ticks report exit
#[test]
fn shutdown_is_idempotent() {
    init_logging();
    let config = test_config();
    let log = Arc::new(Mutex::new(Vec::new()));
    let api = Arc::new(MockChannelApi::new().with_log(log.clone()));
    let channel = channel_for(&api, &config);
    let runtime = focused_runtime(ViewMode::Immersive).with_log(log.clone());

    let mut host = host(runtime, channel, &config);
    host.start();
    host.tick();

    host.shutdown();
    host.shutdown();
    assert_eq!(host.tick(), TickControl::Exit);
    drop(host);

    let log = log.lock();
    for call in ["channel_shutdown", "channel_destroy", "destroy_session", "destroy_instance"] {
        assert_eq!(log.iter().filter(|c| *c == call).count(), 1, "{}", call);
    }
}

/// Frames keep coming while the session is running but not yet visible
#[test]
fn synchronized_session_submits_empty_frames() {
    init_logging();
    let config = test_config();
    let mut runtime = MockRuntime::new(ViewMode::Immersive);
    for state in [SessionState::Idle, SessionState::Ready, SessionState::Synchronized] {
        runtime.schedule(0, RuntimeEvent::SessionStateChanged(state));
    }

    let mut host = host(runtime, None, &config);
    for _ in 0..5 {
        assert_eq!(host.tick(), TickControl::Continue);
    }

    assert!(host.session().is_running());
    assert!(!host.session().is_active());
    assert_eq!(host.session().runtime().submitted(), &[0, 0, 0, 0, 0]);
    assert!(host.renderer().draws.is_empty());
}
