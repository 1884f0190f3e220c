//! # stream_xr - XR session layer for the StreamingSession host
//!
//! Drives an XR runtime through its session lifecycle and renders one
//! projection layer per frame into per-view swapchains.
//!
//! ## Architecture
//!
//! The session logic is written against the [`XrRuntime`] trait so the
//! state machine and the frame protocol do not depend on a concrete runtime:
//!
//! 1. **[`XrSession`]**: event pump, state machine, running flag, exit signal
//! 2. **[`frame`]**: wait / begin / locate / acquire / wait / draw / release / end
//! 3. **[`graphics`]**: adapter selection and color/depth view pairs
//! 4. **`openxr_backend`**: the real runtime, via the `openxr` crate
//!
//! ## Example
//!
//! ```ignore
//! use stream_xr::prelude::*;
//!
//! let runtime = OpenXrRuntime::<D3D11Binding>::initialize(OpenXrConfig::default())?;
//! let mut session = XrSession::new(runtime, SessionConfig::default());
//!
//! loop {
//!     session.poll_events()?;
//!     if session.exit_requested() {
//!         break;
//!     }
//!     if session.is_running() {
//!         session.render_frame(&mut renderer);
//!     }
//! }
//!
//! session.shutdown();
//! ```
//!
//! ## Features
//!
//! - `openxr-backend`: OpenXR runtime backend (requires an installed OpenXR loader)
//! - `d3d11`: Direct3D 11 graphics binding (Windows)
//! - `testing`: scripted runtime used by the test suites

pub mod frame;
pub mod graphics;
pub mod session;

#[cfg(feature = "openxr-backend")]
pub mod openxr_backend;

#[cfg(all(windows, feature = "d3d11"))]
pub mod d3d11;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use frame::{run_frame, FrameReport};
pub use graphics::{
    select_adapter, AdapterInfo, AdapterLuid, BoundSwapchain, GraphicsBinding, SwapchainTargets,
    TextureDesc, ViewDimension,
};
pub use session::{SessionConfig, XrSession};

#[cfg(feature = "openxr-backend")]
pub use openxr_backend::{OpenXrConfig, OpenXrRuntime, XrGraphicsBinding};

use glam::{Quat, Vec3};
use thiserror::Error;

/// Form factor requested from the runtime
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FormFactor {
    /// Head-mounted display
    HeadMounted,
    /// Handheld display (phone / tablet)
    Handheld,
}

/// View configuration requested from the runtime
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ViewConfiguration {
    /// One view per eye
    PrimaryStereo,
    /// A single view
    PrimaryMono,
}

impl ViewConfiguration {
    /// Number of views the configuration renders
    pub fn view_count(self) -> usize {
        match self {
            Self::PrimaryStereo => 2,
            Self::PrimaryMono => 1,
        }
    }
}

/// Pairing of form factor and view configuration the host runs with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ViewMode {
    /// Head-mounted stereo
    #[default]
    Immersive,
    /// Handheld mono
    Handheld,
}

impl ViewMode {
    pub fn form_factor(self) -> FormFactor {
        match self {
            Self::Immersive => FormFactor::HeadMounted,
            Self::Handheld => FormFactor::Handheld,
        }
    }

    pub fn view_configuration(self) -> ViewConfiguration {
        match self {
            Self::Immersive => ViewConfiguration::PrimaryStereo,
            Self::Handheld => ViewConfiguration::PrimaryMono,
        }
    }

    pub fn view_count(self) -> usize {
        self.view_configuration().view_count()
    }
}

impl core::fmt::Display for ViewMode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Immersive => write!(f, "head-mounted stereo"),
            Self::Handheld => write!(f, "handheld mono"),
        }
    }
}

/// XR session state, as surfaced by the runtime event stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    #[default]
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

impl SessionState {
    /// Terminal states end the session for good
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Exiting | Self::LossPending)
    }

    /// The compositor is showing this application's layers
    pub fn is_active(self) -> bool {
        matches!(self, Self::Visible | Self::Focused)
    }

    /// Whether the runtime may move a session from `self` to `next`.
    ///
    /// Loss can happen from any non-terminal state; everything else follows
    /// the lifecycle `IDLE -> READY -> SYNCHRONIZED <-> VISIBLE <-> FOCUSED`,
    /// `SYNCHRONIZED -> STOPPING -> IDLE -> EXITING`.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;

        if next == LossPending {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Unknown, Idle)
                | (Idle, Ready)
                | (Idle, Exiting)
                | (Ready, Synchronized)
                | (Synchronized, Visible)
                | (Synchronized, Stopping)
                | (Visible, Focused)
                | (Visible, Synchronized)
                | (Focused, Visible)
                | (Stopping, Idle)
        )
    }
}

/// Pose (position + orientation)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    /// Create a new pose
    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self { position, orientation }
    }

    /// Convert to transformation matrix
    pub fn to_matrix(&self) -> glam::Mat4 {
        glam::Mat4::from_rotation_translation(self.orientation, self.position)
    }
}

/// Field of view definition (radians, left/down negative)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fov {
    pub angle_left: f32,
    pub angle_right: f32,
    pub angle_up: f32,
    pub angle_down: f32,
}

impl Default for Fov {
    fn default() -> Self {
        let half_fov = 45.0_f32.to_radians();
        Self {
            angle_left: -half_fov,
            angle_right: half_fov,
            angle_up: half_fov,
            angle_down: -half_fov,
        }
    }
}

/// Swapchain image size in pixels
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

/// Rectangle inside a swapchain image
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImageRect {
    pub offset: [i32; 2],
    pub extent: Extent2D,
}

/// Result of waiting for a frame
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameState {
    /// Predicted display time, runtime clock nanoseconds
    pub predicted_display_time: i64,
    /// The runtime wants pixels for this frame
    pub should_render: bool,
}

/// One located view at the predicted display time
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewLocation {
    pub pose: Pose,
    pub fov: Fov,
}

/// Per-view entry of the submitted projection layer
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectionView {
    pub pose: Pose,
    pub fov: Fov,
    /// Index of the view swapchain this view was rendered into
    pub swapchain: usize,
    pub image_rect: ImageRect,
}

impl ProjectionView {
    /// Full-image projection view for a located view
    pub fn new(location: ViewLocation, swapchain: usize, extent: Extent2D) -> Self {
        Self {
            pose: location.pose,
            fov: location.fov,
            swapchain,
            image_rect: ImageRect {
                offset: [0, 0],
                extent,
            },
        }
    }
}

/// Events the session layer reacts to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuntimeEvent {
    SessionStateChanged(SessionState),
    InstanceLossPending,
    /// Anything else the runtime reports; ignored
    Other,
}

/// Seam between the session logic and an XR runtime.
///
/// Implementations own every runtime handle. Swapchains are addressed by view
/// index; the runtime keeps one swapchain per view of its view configuration.
pub trait XrRuntime {
    /// Color + depth target pair the renderer draws into
    type ViewPair;

    /// View mode the runtime was created with
    fn view_mode(&self) -> ViewMode;

    /// Next pending event, if any
    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>, XrError>;

    /// Begin the session with the configured view configuration
    fn begin_session(&mut self) -> Result<(), XrError>;

    /// End a stopping session
    fn end_session(&mut self) -> Result<(), XrError>;

    /// Block until the runtime wants the next frame
    fn wait_frame(&mut self) -> Result<FrameState, XrError>;

    fn begin_frame(&mut self) -> Result<(), XrError>;

    /// Locate every view against the reference space
    fn locate_views(&mut self, display_time: i64) -> Result<Vec<ViewLocation>, XrError>;

    fn swapchain_count(&self) -> usize;

    fn swapchain_extent(&self, swapchain: usize) -> Extent2D;

    fn acquire_image(&mut self, swapchain: usize) -> Result<u32, XrError>;

    /// Wait for an acquired image with infinite timeout
    fn wait_image(&mut self, swapchain: usize) -> Result<(), XrError>;

    fn release_image(&mut self, swapchain: usize) -> Result<(), XrError>;

    /// Target pair belonging to an image of a swapchain
    fn view_pair(&self, swapchain: usize, image: u32) -> Option<&Self::ViewPair>;

    /// End the frame with no layers (`None`) or one projection layer
    fn end_frame(
        &mut self,
        display_time: i64,
        layer: Option<&[ProjectionView]>,
    ) -> Result<(), XrError>;

    /// Destroy every runtime object; the instance goes last. Idempotent.
    fn shutdown(&mut self);
}

/// Draws one view of the scene.
///
/// Must clear, render, and leave the color target populated.
pub trait Renderer<T: ?Sized> {
    fn draw(&mut self, view: &ProjectionView, target: &T) -> Result<(), XrError>;
}

/// XR error types
#[derive(Debug, Error)]
pub enum XrError {
    #[error("XR runtime not initialized")]
    NotInitialized,

    #[error("Failed to load the OpenXR loader: {0}")]
    Loader(String),

    #[error("Required extension not available: {0}")]
    MissingExtension(String),

    #[error("No graphics adapter matches the runtime's adapter {0}")]
    NoMatchingAdapter(AdapterLuid),

    #[error("Graphics device creation failed: {0}")]
    DeviceCreation(String),

    #[error("Session creation failed: {0}")]
    SessionCreation(String),

    #[error("{call} failed: {code}")]
    Runtime { call: &'static str, code: String },

    #[error("Swapchain {0} has no view pair for the acquired image")]
    MissingViewPair(usize),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Not supported: {0}")]
    Unsupported(String),
}

impl XrError {
    /// Failure of a named runtime call
    pub fn runtime(call: &'static str, code: impl core::fmt::Display) -> Self {
        Self::Runtime {
            call,
            code: code.to_string(),
        }
    }
}

/// Prelude - commonly used types
pub mod prelude {
    pub use crate::{
        AdapterLuid, Extent2D, FormFactor, Fov, FrameReport, FrameState, GraphicsBinding,
        Pose, ProjectionView, Renderer, RuntimeEvent, SessionConfig, SessionState,
        ViewConfiguration, ViewLocation, ViewMode, XrError, XrRuntime, XrSession,
    };

    #[cfg(feature = "openxr-backend")]
    pub use crate::openxr_backend::{OpenXrConfig, OpenXrRuntime, XrGraphicsBinding};

    #[cfg(all(windows, feature = "d3d11"))]
    pub use crate::d3d11::{D3D11Binding, D3D11ViewPair};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_modes() {
        assert_eq!(ViewMode::default(), ViewMode::Immersive);
        assert_eq!(ViewMode::Immersive.form_factor(), FormFactor::HeadMounted);
        assert_eq!(ViewMode::Immersive.view_count(), 2);
        assert_eq!(ViewMode::Handheld.form_factor(), FormFactor::Handheld);
        assert_eq!(
            ViewMode::Handheld.view_configuration(),
            ViewConfiguration::PrimaryMono
        );
        assert_eq!(ViewMode::Handheld.view_count(), 1);
    }

    #[test]
    fn test_lifecycle_transitions() {
        use SessionState::*;

        let lifecycle = [
            Unknown, Idle, Ready, Synchronized, Visible, Focused, Visible, Synchronized,
            Stopping, Idle, Exiting,
        ];
        for pair in lifecycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_backward_transitions_rejected() {
        use SessionState::*;

        assert!(!Focused.can_transition_to(Ready));
        assert!(!Visible.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Unknown));
        assert!(!Ready.can_transition_to(Focused));
        assert!(!Exiting.can_transition_to(Idle));
    }

    #[test]
    fn test_loss_from_any_live_state() {
        use SessionState::*;

        for state in [Unknown, Idle, Ready, Synchronized, Visible, Focused, Stopping] {
            assert!(state.can_transition_to(LossPending));
        }
        assert!(!Exiting.can_transition_to(LossPending));
        assert!(!LossPending.can_transition_to(LossPending));
    }

    #[test]
    fn test_projection_view_covers_full_image() {
        let location = ViewLocation {
            pose: Pose::IDENTITY,
            fov: Fov::default(),
        };
        let extent = Extent2D { width: 1832, height: 1920 };
        let view = ProjectionView::new(location, 1, extent);

        assert_eq!(view.swapchain, 1);
        assert_eq!(view.image_rect.offset, [0, 0]);
        assert_eq!(view.image_rect.extent, extent);
    }
}
