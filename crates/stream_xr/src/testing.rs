//! Scripted in-process runtime
//!
//! [`MockRuntime`] implements [`XrRuntime`] without a loader or a GPU. It
//! records every call as a short label in a shared log, checks the frame
//! protocol (one acquired image per swapchain, everything released before
//! `end_frame`) and replays scheduled events.

use std::collections::VecDeque;
use std::sync::Arc;

use glam::{Quat, Vec3};
use parking_lot::Mutex;

use crate::graphics::{GraphicsBinding, SwapchainTargets, TextureDesc};
use crate::{
    Extent2D, Fov, FrameState, Pose, ProjectionView, Renderer, RuntimeEvent, ViewLocation,
    ViewMode, XrError, XrRuntime,
};

/// Images per mock swapchain
pub const IMAGES_PER_SWAPCHAIN: u32 = 3;

/// Shared, ordered call log
pub type CallLog = Arc<Mutex<Vec<String>>>;

/// A call that should fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    PollEvent,
    BeginSession,
    WaitFrame,
    BeginFrame,
    LocateViews,
    Acquire(usize),
    WaitImage(usize),
    Release(usize),
    EndFrame,
}

/// Target pair handed to the renderer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockViewPair {
    pub swapchain: usize,
    pub image: u32,
    pub color: TextureDesc,
    pub depth: TextureDesc,
}

struct MockBinding;

impl GraphicsBinding for MockBinding {
    type ViewPair = MockViewPair;
    type Image = (usize, u32);

    fn make_view_pair(
        &self,
        image: &(usize, u32),
        desc: &TextureDesc,
    ) -> Result<MockViewPair, XrError> {
        Ok(MockViewPair {
            swapchain: image.0,
            image: image.1,
            color: *desc,
            depth: desc.depth(),
        })
    }
}

/// Runtime double driven by the test
pub struct MockRuntime {
    view_mode: ViewMode,
    log: CallLog,
    events: VecDeque<(u64, RuntimeEvent)>,
    faults: Vec<Fault>,
    targets: Vec<SwapchainTargets<MockViewPair>>,
    acquired: Vec<Option<u32>>,
    next_image: Vec<u32>,
    should_render: bool,
    waited: bool,
    in_frame: bool,
    frames_ended: u64,
    submitted: Vec<usize>,
    violations: Vec<String>,
    shut_down: bool,
}

impl MockRuntime {
    pub fn new(view_mode: ViewMode) -> Self {
        Self::with_extent(view_mode, Extent2D { width: 1440, height: 1600 })
    }

    /// Runtime whose swapchains all have `extent`
    pub fn with_extent(view_mode: ViewMode, extent: Extent2D) -> Self {
        let count = view_mode.view_count();
        let targets = (0..count)
            .map(|swapchain| {
                let images: Vec<_> = (0..IMAGES_PER_SWAPCHAIN).map(|i| (swapchain, i)).collect();
                SwapchainTargets::build(&MockBinding, &images, TextureDesc::color(extent))
            })
            .collect::<Result<Vec<_>, _>>()
            .unwrap_or_default();

        Self {
            view_mode,
            log: Arc::new(Mutex::new(Vec::new())),
            events: VecDeque::new(),
            faults: Vec::new(),
            targets,
            acquired: vec![None; count],
            next_image: vec![0; count],
            should_render: true,
            waited: false,
            in_frame: false,
            frames_ended: 0,
            submitted: Vec::new(),
            violations: Vec::new(),
            shut_down: false,
        }
    }

    /// Record calls into an existing log (shared with other doubles)
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Deliver `event` once `after_frames` frames have been ended
    pub fn schedule(&mut self, after_frames: u64, event: RuntimeEvent) {
        self.events.push_back((after_frames, event));
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Make a call fail until [`clear_faults`](Self::clear_faults)
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push(fault);
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
    }

    pub fn set_should_render(&mut self, should_render: bool) {
        self.should_render = should_render;
    }

    /// Frames ended so far
    pub fn frames_ended(&self) -> u64 {
        self.frames_ended
    }

    /// View count of every submitted frame, 0 for a frame without layers
    pub fn submitted(&self) -> &[usize] {
        &self.submitted
    }

    /// Images acquired and not yet released
    pub fn outstanding_images(&self) -> usize {
        self.acquired.iter().filter(|a| a.is_some()).count()
    }

    /// Frame protocol violations observed so far
    pub fn violations(&self) -> Vec<String> {
        self.violations.clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.log.lock().push(call.into());
    }

    fn violation(&mut self, what: String) {
        log::error!("frame protocol violation: {}", what);
        self.violations.push(what);
    }

    fn check(&self, fault: Fault, call: &'static str) -> Result<(), XrError> {
        if self.faults.contains(&fault) {
            Err(XrError::runtime(call, "XR_ERROR_RUNTIME_FAILURE"))
        } else {
            Ok(())
        }
    }

    fn check_live(&mut self, call: &str) {
        if self.shut_down {
            self.violation(format!("{} after shutdown", call));
        }
    }
}

impl XrRuntime for MockRuntime {
    type ViewPair = MockViewPair;

    fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>, XrError> {
        self.check(Fault::PollEvent, "xrPollEvent")?;
        match self.events.front() {
            Some((after, _)) if *after <= self.frames_ended => {
                Ok(self.events.pop_front().map(|(_, event)| event))
            }
            _ => Ok(None),
        }
    }

    fn begin_session(&mut self) -> Result<(), XrError> {
        self.record("begin_session");
        self.check_live("begin_session");
        self.check(Fault::BeginSession, "xrBeginSession")
    }

    fn end_session(&mut self) -> Result<(), XrError> {
        self.record("end_session");
        Ok(())
    }

    fn wait_frame(&mut self) -> Result<FrameState, XrError> {
        self.record("wait_frame");
        self.check_live("wait_frame");
        if self.in_frame {
            self.violation("wait_frame inside a frame".into());
        }
        self.check(Fault::WaitFrame, "xrWaitFrame")?;
        self.waited = true;

        Ok(FrameState {
            predicted_display_time: (self.frames_ended as i64 + 1) * 11_111_111,
            should_render: self.should_render,
        })
    }

    fn begin_frame(&mut self) -> Result<(), XrError> {
        self.record("begin_frame");
        if !self.waited {
            self.violation("begin_frame without wait_frame".into());
        }
        self.check(Fault::BeginFrame, "xrBeginFrame")?;
        self.waited = false;
        self.in_frame = true;
        Ok(())
    }

    fn locate_views(&mut self, _display_time: i64) -> Result<Vec<ViewLocation>, XrError> {
        self.record("locate_views");
        self.check(Fault::LocateViews, "xrLocateViews")?;

        let count = self.view_mode.view_count();
        Ok((0..count)
            .map(|view| {
                let x = if count == 1 { 0.0 } else { (view as f32 - 0.5) * 0.064 };
                ViewLocation {
                    pose: Pose::new(Vec3::new(x, 1.6, 0.0), Quat::IDENTITY),
                    fov: Fov::default(),
                }
            })
            .collect())
    }

    fn swapchain_count(&self) -> usize {
        self.targets.len()
    }

    fn swapchain_extent(&self, swapchain: usize) -> Extent2D {
        self.targets
            .get(swapchain)
            .map(SwapchainTargets::extent)
            .unwrap_or_default()
    }

    fn acquire_image(&mut self, swapchain: usize) -> Result<u32, XrError> {
        self.record(format!("acquire:{}", swapchain));
        if !self.in_frame {
            self.violation(format!("acquire:{} outside a frame", swapchain));
        }
        self.check(Fault::Acquire(swapchain), "xrAcquireSwapchainImage")?;
        if self.acquired[swapchain].is_some() {
            self.violation(format!("swapchain {} acquired twice", swapchain));
        }

        let image = self.next_image[swapchain];
        self.next_image[swapchain] = (image + 1) % IMAGES_PER_SWAPCHAIN;
        self.acquired[swapchain] = Some(image);
        Ok(image)
    }

    fn wait_image(&mut self, swapchain: usize) -> Result<(), XrError> {
        self.record(format!("wait_image:{}", swapchain));
        if self.acquired[swapchain].is_none() {
            self.violation(format!("wait_image:{} without acquire", swapchain));
        }
        self.check(Fault::WaitImage(swapchain), "xrWaitSwapchainImage")
    }

    fn release_image(&mut self, swapchain: usize) -> Result<(), XrError> {
        self.record(format!("release:{}", swapchain));
        if self.acquired[swapchain].take().is_none() {
            self.violation(format!("release:{} without acquire", swapchain));
        }
        self.check(Fault::Release(swapchain), "xrReleaseSwapchainImage")
    }

    fn view_pair(&self, swapchain: usize, image: u32) -> Option<&MockViewPair> {
        if self.acquired.get(swapchain).copied().flatten() != Some(image) {
            return None;
        }
        self.targets.get(swapchain)?.get(image)
    }

    fn end_frame(
        &mut self,
        _display_time: i64,
        layer: Option<&[ProjectionView]>,
    ) -> Result<(), XrError> {
        let views = layer.map_or(0, <[ProjectionView]>::len);
        self.record(format!("end_frame:{}", views));
        if !self.in_frame {
            self.violation("end_frame without begin_frame".into());
        }
        if self.outstanding_images() > 0 {
            self.violation(format!(
                "end_frame with {} images outstanding",
                self.outstanding_images()
            ));
        }
        self.in_frame = false;
        self.check(Fault::EndFrame, "xrEndFrame")?;

        self.frames_ended += 1;
        self.submitted.push(views);
        Ok(())
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.record("destroy_session");
        self.record("destroy_instance");
    }
}

/// Renderer double
#[derive(Debug, Default)]
pub struct MockRenderer {
    /// Fail when drawing into this swapchain
    pub fail_on_draw: Option<usize>,
    /// Every view drawn, in order
    pub draws: Vec<ProjectionView>,
}

impl Renderer<MockViewPair> for MockRenderer {
    fn draw(&mut self, view: &ProjectionView, target: &MockViewPair) -> Result<(), XrError> {
        if target.swapchain != view.swapchain {
            return Err(XrError::Render(format!(
                "view {} drawn into swapchain {}",
                view.swapchain, target.swapchain
            )));
        }
        if self.fail_on_draw == Some(view.swapchain) {
            return Err(XrError::Render(format!("draw into swapchain {} failed", view.swapchain)));
        }
        self.draws.push(*view);
        Ok(())
    }
}
