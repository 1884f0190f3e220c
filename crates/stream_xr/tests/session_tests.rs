//! Session + frame loop behavior over many frames
//!
//! A scripted runtime walks the session through its lifecycle while the
//! loop keeps rendering, the way the host drives it.

use stream_xr::prelude::*;
use stream_xr::testing::{Fault, MockRenderer, MockRuntime};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn state(s: SessionState) -> RuntimeEvent {
    RuntimeEvent::SessionStateChanged(s)
}

/// Schedule the startup walk IDLE -> READY -> SYNCHRONIZED -> VISIBLE -> FOCUSED
fn start(runtime: &mut MockRuntime) {
    use SessionState::*;
    runtime.schedule(0, state(Idle));
    runtime.schedule(0, state(Ready));
    runtime.schedule(1, state(Synchronized));
    runtime.schedule(2, state(Visible));
    runtime.schedule(3, state(Focused));
}

/// One host iteration: pump events, render if running
fn tick(session: &mut XrSession<MockRuntime>, renderer: &mut MockRenderer) -> bool {
    if session.poll_events().is_err() || session.exit_requested() {
        return false;
    }
    if session.is_running() {
        let _ = session.render_frame(renderer);
    }
    true
}

#[test]
fn layers_only_while_visible_or_focused() {
    let mut runtime = MockRuntime::new(ViewMode::Immersive);
    start(&mut runtime);
    let mut session = XrSession::new(runtime, SessionConfig::default());
    let mut renderer = MockRenderer::default();

    for _ in 0..10 {
        assert!(tick(&mut session, &mut renderer));
    }

    // Frames 0 and 1 ran before VISIBLE was reported
    let submitted = session.runtime().submitted().to_vec();
    assert_eq!(submitted.len(), 10);
    assert_eq!(&submitted[..2], &[0, 0]);
    assert!(submitted[2..].iter().all(|&views| views == 2));
    assert_eq!(session.state(), SessionState::Focused);
    assert_eq!(session.unexpected_transitions(), 0);
}

#[test]
fn stop_and_exit_walk() {
    use SessionState::*;
    init_logging();

    let mut runtime = MockRuntime::new(ViewMode::Handheld);
    start(&mut runtime);
    runtime.schedule(20, state(Visible));
    runtime.schedule(21, state(Synchronized));
    runtime.schedule(22, state(Stopping));
    runtime.schedule(22, state(Idle));
    runtime.schedule(22, state(Exiting));
    let mut session = XrSession::new(runtime, SessionConfig::default());
    let mut renderer = MockRenderer::default();

    let mut ticks = 0;
    while tick(&mut session, &mut renderer) {
        ticks += 1;
        assert!(ticks < 100, "loop never exited");
    }

    assert!(session.exit_requested());
    assert!(!session.is_running());
    assert_eq!(session.runtime().frames_ended(), 22);
    assert_eq!(session.unexpected_transitions(), 0);

    let log = session.runtime().log().lock().clone();
    assert_eq!(log.iter().filter(|c| *c == "begin_session").count(), 1);
    assert_eq!(log.iter().filter(|c| *c == "end_session").count(), 1);

    session.shutdown();
    let log = session.runtime().log().lock().clone();
    assert_eq!(&log[log.len() - 2..], &["destroy_session", "destroy_instance"]);
}

#[test]
fn transient_failures_do_not_stop_the_loop() {
    let mut runtime = MockRuntime::new(ViewMode::Immersive);
    start(&mut runtime);
    let mut session = XrSession::new(runtime, SessionConfig::default());
    let mut renderer = MockRenderer::default();

    for frame in 0..300 {
        if frame % 50 == 10 {
            session.runtime_mut().inject(Fault::WaitImage(frame % 2));
        } else {
            session.runtime_mut().clear_faults();
        }
        assert!(tick(&mut session, &mut renderer));
    }

    assert!(!session.exit_requested());
    assert_eq!(session.runtime().outstanding_images(), 0);
    assert!(session.runtime().violations().is_empty());
}

#[test]
fn persistent_failure_surfaces_exit() {
    init_logging();
    let mut runtime = MockRuntime::new(ViewMode::Immersive);
    start(&mut runtime);
    let mut session = XrSession::new(runtime, SessionConfig::default());
    let mut renderer = MockRenderer::default();

    for _ in 0..5 {
        tick(&mut session, &mut renderer);
    }
    session.runtime_mut().inject(Fault::Acquire(0));

    let mut ticks = 0;
    while tick(&mut session, &mut renderer) {
        ticks += 1;
        assert!(ticks <= 90);
    }
    assert_eq!(ticks, 90);
    assert!(session.exit_requested());
    assert!(session.runtime().violations().is_empty());
}

#[test]
fn loss_pending_mid_session() {
    let mut runtime = MockRuntime::new(ViewMode::Immersive);
    start(&mut runtime);
    runtime.schedule(40, state(SessionState::LossPending));
    let mut session = XrSession::new(runtime, SessionConfig::default());
    let mut renderer = MockRenderer::default();

    while tick(&mut session, &mut renderer) {}

    assert_eq!(session.runtime().frames_ended(), 40);
    assert_eq!(session.state(), SessionState::LossPending);
}
