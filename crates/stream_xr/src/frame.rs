//! Per-frame protocol
//!
//! One frame is `wait -> begin -> [locate -> per view (acquire -> wait ->
//! draw -> release)] -> end`. Once `begin` succeeded the frame is always
//! ended, with zero layers if anything in between failed, and every acquired
//! image is released before the frame is ended.

use crate::{ProjectionView, Renderer, ViewLocation, XrError, XrRuntime};

/// What a completed frame submitted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub display_time: i64,
    /// Number of projection views in the submitted layer (0 = no layer)
    pub views_submitted: usize,
}

impl FrameReport {
    pub fn submitted_layer(&self) -> bool {
        self.views_submitted > 0
    }
}

/// Run one frame against `runtime`.
///
/// `session_active` gates the projection layer; an inactive session still
/// runs wait/begin/end so the runtime keeps advancing. A failure after
/// `begin_frame` is returned only after the frame was ended with zero layers.
pub fn run_frame<R, D>(
    runtime: &mut R,
    renderer: &mut D,
    session_active: bool,
) -> Result<FrameReport, XrError>
where
    R: XrRuntime,
    D: Renderer<R::ViewPair> + ?Sized,
{
    let frame_state = runtime.wait_frame()?;
    runtime.begin_frame()?;

    let display_time = frame_state.predicted_display_time;

    let layer = if session_active && frame_state.should_render {
        render_layer(runtime, renderer, display_time).map(Some)
    } else {
        Ok(None)
    };

    let views = match &layer {
        Ok(Some(views)) if !views.is_empty() => Some(views.as_slice()),
        _ => None,
    };
    runtime.end_frame(display_time, views)?;

    let views_submitted = views.map_or(0, <[ProjectionView]>::len);
    layer.map(|_| FrameReport {
        display_time,
        views_submitted,
    })
}

/// Render every located view into its swapchain
fn render_layer<R, D>(
    runtime: &mut R,
    renderer: &mut D,
    display_time: i64,
) -> Result<Vec<ProjectionView>, XrError>
where
    R: XrRuntime,
    D: Renderer<R::ViewPair> + ?Sized,
{
    let located = runtime.locate_views(display_time)?;
    let count = located.len().min(runtime.swapchain_count());
    if count < located.len() {
        log::warn!(
            "Runtime located {} views but only {} swapchains exist",
            located.len(),
            count
        );
    }

    let mut views = Vec::with_capacity(count);
    for (index, location) in located.into_iter().take(count).enumerate() {
        let image = runtime.acquire_image(index)?;

        // Release regardless of how the view went
        let drawn = render_view(runtime, renderer, index, image, location);
        let released = runtime.release_image(index);

        views.push(drawn?);
        released?;
    }

    Ok(views)
}

fn render_view<R, D>(
    runtime: &mut R,
    renderer: &mut D,
    index: usize,
    image: u32,
    location: ViewLocation,
) -> Result<ProjectionView, XrError>
where
    R: XrRuntime,
    D: Renderer<R::ViewPair> + ?Sized,
{
    runtime.wait_image(index)?;

    let view = ProjectionView::new(location, index, runtime.swapchain_extent(index));
    let target = runtime
        .view_pair(index, image)
        .ok_or(XrError::MissingViewPair(index))?;
    renderer.draw(&view, target)?;

    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Fault, MockRenderer, MockRuntime};
    use crate::ViewMode;

    fn calls(runtime: &MockRuntime) -> Vec<String> {
        runtime.log().lock().clone()
    }

    #[test]
    fn test_stereo_frame_order() {
        let mut runtime = MockRuntime::new(ViewMode::Immersive);
        let mut renderer = MockRenderer::default();

        let report = run_frame(&mut runtime, &mut renderer, true).unwrap();
        assert_eq!(report.views_submitted, 2);

        assert_eq!(
            calls(&runtime),
            vec![
                "wait_frame",
                "begin_frame",
                "locate_views",
                "acquire:0",
                "wait_image:0",
                "release:0",
                "acquire:1",
                "wait_image:1",
                "release:1",
                "end_frame:2",
            ]
        );
        assert_eq!(renderer.draws.len(), 2);
        assert_eq!(renderer.draws[1].swapchain, 1);
        assert!(runtime.violations().is_empty());
    }

    #[test]
    fn test_inactive_session_submits_no_layer() {
        let mut runtime = MockRuntime::new(ViewMode::Immersive);
        let mut renderer = MockRenderer::default();

        let report = run_frame(&mut runtime, &mut renderer, false).unwrap();
        assert!(!report.submitted_layer());
        assert_eq!(calls(&runtime), vec!["wait_frame", "begin_frame", "end_frame:0"]);
        assert!(renderer.draws.is_empty());
    }

    #[test]
    fn test_should_render_false_skips_layer() {
        let mut runtime = MockRuntime::new(ViewMode::Immersive);
        runtime.set_should_render(false);
        let mut renderer = MockRenderer::default();

        let report = run_frame(&mut runtime, &mut renderer, true).unwrap();
        assert_eq!(report.views_submitted, 0);
        assert!(renderer.draws.is_empty());
    }

    #[test]
    fn test_renderer_failure_still_releases_and_ends() {
        let mut runtime = MockRuntime::new(ViewMode::Immersive);
        let mut renderer = MockRenderer {
            fail_on_draw: Some(0),
            ..Default::default()
        };

        let result = run_frame(&mut runtime, &mut renderer, true);
        assert!(matches!(result, Err(XrError::Render(_))));

        let log = calls(&runtime);
        assert_eq!(
            log,
            vec![
                "wait_frame",
                "begin_frame",
                "locate_views",
                "acquire:0",
                "wait_image:0",
                "release:0",
                "end_frame:0",
            ]
        );
        assert!(runtime.violations().is_empty());
    }

    #[test]
    fn test_wait_image_failure_releases_image() {
        let mut runtime = MockRuntime::new(ViewMode::Immersive);
        runtime.inject(Fault::WaitImage(1));
        let mut renderer = MockRenderer::default();

        assert!(run_frame(&mut runtime, &mut renderer, true).is_err());

        let log = calls(&runtime);
        assert!(log.contains(&"release:1".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("end_frame:0"));
        assert_eq!(runtime.outstanding_images(), 0);
    }

    #[test]
    fn test_acquire_failure_aborts_remaining_views() {
        let mut runtime = MockRuntime::new(ViewMode::Immersive);
        runtime.inject(Fault::Acquire(1));
        let mut renderer = MockRenderer::default();

        assert!(run_frame(&mut runtime, &mut renderer, true).is_err());

        let log = calls(&runtime);
        assert!(!log.contains(&"release:1".to_string()));
        assert!(!log.contains(&"wait_image:1".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("end_frame:0"));
        assert_eq!(runtime.outstanding_images(), 0);
    }

    #[test]
    fn test_locate_failure_ends_frame() {
        let mut runtime = MockRuntime::new(ViewMode::Immersive);
        runtime.inject(Fault::LocateViews);
        let mut renderer = MockRenderer::default();

        assert!(run_frame(&mut runtime, &mut renderer, true).is_err());
        assert_eq!(
            calls(&runtime),
            vec!["wait_frame", "begin_frame", "locate_views", "end_frame:0"]
        );
    }

    #[test]
    fn test_mono_frame_single_view() {
        let mut runtime = MockRuntime::new(ViewMode::Handheld);
        let mut renderer = MockRenderer::default();

        let report = run_frame(&mut runtime, &mut renderer, true).unwrap();
        assert_eq!(report.views_submitted, 1);
        assert_eq!(runtime.swapchain_count(), 1);
    }

    #[test]
    fn test_acquire_release_balance_over_many_frames() {
        let mut runtime = MockRuntime::new(ViewMode::Immersive);
        let mut renderer = MockRenderer::default();

        for frame in 0..200u32 {
            if frame % 7 == 3 {
                renderer.fail_on_draw = Some(frame as usize % 2);
            } else {
                renderer.fail_on_draw = None;
            }
            let _ = run_frame(&mut runtime, &mut renderer, true);
        }

        let log = calls(&runtime);
        for view in 0..2 {
            let acquires = log.iter().filter(|c| **c == format!("acquire:{}", view)).count();
            let releases = log.iter().filter(|c| **c == format!("release:{}", view)).count();
            assert_eq!(acquires, releases, "view {}", view);
        }
        let begins = log.iter().filter(|c| *c == "begin_frame").count();
        let ends = log.iter().filter(|c| c.starts_with("end_frame")).count();
        assert_eq!(begins, 200);
        assert_eq!(ends, 200);
        assert!(runtime.violations().is_empty());
    }
}
