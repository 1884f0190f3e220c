//! XR session lifecycle
//!
//! [`XrSession`] owns a runtime and reacts to its event stream:
//!
//! - `READY`: begin the session, `running = true`
//! - `STOPPING`: `running = false`, end the session
//! - `EXITING` / `LOSS_PENDING`: request host exit
//! - instance loss: request exit and stop draining events
//!
//! `running` holds exactly while the state is SYNCHRONIZED, VISIBLE or FOCUSED
//! (plus the READY tick in which the session was begun).

use crate::frame::{run_frame, FrameReport};
use crate::{Renderer, RuntimeEvent, SessionState, XrError, XrRuntime};

/// Session tuning
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Consecutive failed frames before the session asks the host to exit
    pub max_consecutive_frame_failures: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_consecutive_frame_failures: 90,
        }
    }
}

/// A runtime plus the session state machine driving it
pub struct XrSession<R: XrRuntime> {
    runtime: R,
    config: SessionConfig,
    state: SessionState,
    running: bool,
    exit_requested: bool,
    consecutive_failures: u32,
    frames: u64,
    unexpected_transitions: u32,
    shut_down: bool,
}

impl<R: XrRuntime> XrSession<R> {
    pub fn new(runtime: R, config: SessionConfig) -> Self {
        Self {
            runtime,
            config,
            state: SessionState::Unknown,
            running: false,
            exit_requested: false,
            consecutive_failures: 0,
            frames: 0,
            unexpected_transitions: 0,
            shut_down: false,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut R {
        &mut self.runtime
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The session was begun and not yet stopped
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// The compositor shows our layers
    pub fn is_active(&self) -> bool {
        self.running && self.state.is_active()
    }

    /// A terminal event or repeated frame failure asked the host to exit
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    /// Frames run since creation (including zero-layer frames)
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Transitions the runtime reported that the lifecycle does not allow
    pub fn unexpected_transitions(&self) -> u32 {
        self.unexpected_transitions
    }

    /// Drain every pending event.
    ///
    /// Errors are terminal: a failed poll or a failed `begin_session`
    /// also sets the exit request.
    pub fn poll_events(&mut self) -> Result<(), XrError> {
        loop {
            let event = match self.runtime.poll_event() {
                Ok(Some(event)) => event,
                Ok(None) => return Ok(()),
                Err(e) => {
                    self.exit_requested = true;
                    return Err(e);
                }
            };

            match event {
                RuntimeEvent::SessionStateChanged(state) => {
                    if let Err(e) = self.handle_state_change(state) {
                        self.exit_requested = true;
                        return Err(e);
                    }
                }
                RuntimeEvent::InstanceLossPending => {
                    log::warn!("Instance loss pending!");
                    self.exit_requested = true;
                    return Ok(());
                }
                RuntimeEvent::Other => {}
            }
        }
    }

    /// Apply a state change reported by the runtime
    fn handle_state_change(&mut self, state: SessionState) -> Result<(), XrError> {
        if !self.state.can_transition_to(state) {
            self.unexpected_transitions += 1;
            log::warn!(
                "Unexpected session transition {:?} -> {:?}",
                self.state,
                state
            );
        } else {
            log::info!("Session state changed: {:?} -> {:?}", self.state, state);
        }
        self.state = state;

        match state {
            SessionState::Ready => {
                self.runtime.begin_session()?;
                self.running = true;
                log::info!("Session begun ({})", self.runtime.view_mode());
            }
            SessionState::Stopping => {
                self.running = false;
                if let Err(e) = self.runtime.end_session() {
                    log::warn!("Failed to end session: {}", e);
                }
            }
            SessionState::Exiting | SessionState::LossPending => {
                self.running = false;
                self.exit_requested = true;
            }
            _ => {}
        }

        Ok(())
    }

    /// Run one frame. Failures stay local to the frame; after
    /// `max_consecutive_frame_failures` in a row the session requests exit.
    pub fn render_frame<D>(&mut self, renderer: &mut D) -> Result<FrameReport, XrError>
    where
        D: Renderer<R::ViewPair> + ?Sized,
    {
        let active = self.is_active();
        let result = run_frame(&mut self.runtime, renderer, active);
        self.frames += 1;

        match &result {
            Ok(_) => self.consecutive_failures = 0,
            Err(e) => {
                self.consecutive_failures += 1;
                log::warn!(
                    "Frame {} failed ({} in a row): {}",
                    self.frames,
                    self.consecutive_failures,
                    e
                );
                if self.consecutive_failures >= self.config.max_consecutive_frame_failures {
                    log::error!("Too many consecutive frame failures, requesting exit");
                    self.exit_requested = true;
                }
            }
        }

        result
    }

    /// Destroy the runtime's objects. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.running = false;
        self.runtime.shutdown();
    }
}

impl<R: XrRuntime> Drop for XrSession<R> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
