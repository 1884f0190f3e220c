//! OpenXR runtime backend
//!
//! [`OpenXrRuntime`] owns the instance, the session, the reference space and
//! one swapchain per view. The graphics API is supplied by an
//! [`XrGraphicsBinding`], so everything here is API independent:
//!
//! - instance creation with the graphics enable extension (required),
//!   `XR_EXT_debug_utils` and any extra extensions (optional)
//! - system discovery for the configured form factor
//! - session + LOCAL reference space
//! - swapchains at the runtime's recommended size, with a view pair per image
//!
//! Teardown runs in reverse: swapchains, space, session, debug messenger,
//! instance.

use std::ffi::{c_void, CStr};

use glam::{Quat, Vec3};
use openxr as xr;

use crate::graphics::{BoundSwapchain, GraphicsBinding, SwapchainTargets, TextureDesc};
use crate::{
    Extent2D, FormFactor, Fov, FrameState, Pose, ProjectionView, RuntimeEvent, SessionState,
    ViewConfiguration, ViewLocation, ViewMode, XrError, XrRuntime,
};

/// Name of the debug utils extension
pub const DEBUG_UTILS_EXTENSION: &str = "XR_EXT_debug_utils";

/// Configuration for the OpenXR backend
#[derive(Clone, Debug)]
pub struct OpenXrConfig {
    /// Application name for the OpenXR runtime
    pub application_name: String,
    pub application_version: u32,
    pub engine_name: String,
    pub engine_version: u32,
    /// Head-mounted stereo or handheld mono
    pub view_mode: ViewMode,
    pub blend_mode: xr::EnvironmentBlendMode,
    /// Forward runtime diagnostics to the log when `XR_EXT_debug_utils` exists
    pub debug_messenger: bool,
    /// Extensions enabled when the runtime offers them
    pub optional_extensions: Vec<String>,
}

impl Default for OpenXrConfig {
    fn default() -> Self {
        Self {
            application_name: "StreamingSession OpenXR App".to_string(),
            application_version: 1,
            engine_name: "StreamingSession".to_string(),
            engine_version: 1,
            view_mode: ViewMode::Immersive,
            blend_mode: xr::EnvironmentBlendMode::OPAQUE,
            debug_messenger: true,
            optional_extensions: Vec::new(),
        }
    }
}

/// Graphics API glue for [`OpenXrRuntime`]
pub trait XrGraphicsBinding:
    GraphicsBinding<Image = <Self::Api as xr::Graphics>::SwapchainImage> + Sized
{
    /// The `openxr` graphics marker type
    type Api: xr::Graphics;

    /// Name of the graphics enable extension
    const EXTENSION: &'static str;

    /// Enable the graphics extension in `enabled` if `available` has it
    fn enable_extension(available: &xr::ExtensionSet, enabled: &mut xr::ExtensionSet) -> bool;

    /// Create the device on the adapter the runtime requires
    fn create(instance: &xr::Instance, system: xr::SystemId) -> Result<Self, XrError>;

    fn session_create_info(&self) -> <Self::Api as xr::Graphics>::SessionCreateInfo;

    /// Swapchain format, in the API's own format enum
    fn swapchain_format(&self) -> <Self::Api as xr::Graphics>::Format;

    /// Color texture description of one swapchain
    fn texture_desc(&self, view: &xr::ViewConfigurationView) -> TextureDesc {
        TextureDesc {
            sample_count: view.recommended_swapchain_sample_count,
            ..TextureDesc::color(Extent2D {
                width: view.recommended_image_rect_width,
                height: view.recommended_image_rect_height,
            })
        }
    }

    /// Release the device after the session is gone
    fn shutdown(&mut self) {}
}

type ViewSwapchain<B> =
    BoundSwapchain<xr::Swapchain<<B as XrGraphicsBinding>::Api>, <B as GraphicsBinding>::ViewPair>;

/// `XR_EXT_debug_utils` messenger
struct DebugMessenger {
    handle: xr::sys::DebugUtilsMessengerEXT,
    destroy: xr::sys::pfn::DestroyDebugUtilsMessengerEXT,
}

/// OpenXR implementation of [`XrRuntime`]
pub struct OpenXrRuntime<B: XrGraphicsBinding> {
    config: OpenXrConfig,
    view_configuration: xr::ViewConfigurationType,
    enabled_extensions: Vec<String>,
    event_buffer: xr::EventDataBuffer,

    swapchains: Vec<ViewSwapchain<B>>,
    space: Option<xr::Space>,
    frame_stream: Option<xr::FrameStream<B::Api>>,
    frame_waiter: Option<xr::FrameWaiter>,
    session: Option<xr::Session<B::Api>>,
    binding: Option<B>,
    messenger: Option<DebugMessenger>,
    system: Option<xr::SystemId>,
    instance: Option<xr::Instance>,
}

impl<B: XrGraphicsBinding> OpenXrRuntime<B> {
    /// Load the loader and build everything up to the swapchains
    pub fn initialize(config: OpenXrConfig) -> Result<Self, XrError> {
        let view_configuration = view_configuration_type(config.view_mode.view_configuration());

        let mut runtime = Self {
            config,
            view_configuration,
            enabled_extensions: Vec::new(),
            event_buffer: xr::EventDataBuffer::new(),
            swapchains: Vec::new(),
            space: None,
            frame_stream: None,
            frame_waiter: None,
            session: None,
            binding: None,
            messenger: None,
            system: None,
            instance: None,
        };

        // On failure the partially built runtime tears down in order on drop
        runtime.create_instance()?;
        runtime.create_debug_messenger();
        runtime.discover_system()?;
        runtime.create_session()?;
        runtime.create_swapchains()?;

        log::info!(
            "OpenXR initialized: {}, {} swapchain(s)",
            runtime.config.view_mode,
            runtime.swapchains.len()
        );
        Ok(runtime)
    }

    pub fn instance(&self) -> Option<&xr::Instance> {
        self.instance.as_ref()
    }

    pub fn system(&self) -> Option<xr::SystemId> {
        self.system
    }

    pub fn binding(&self) -> Option<&B> {
        self.binding.as_ref()
    }

    /// Whether `name` was enabled on the instance
    pub fn is_extension_enabled(&self, name: &str) -> bool {
        self.enabled_extensions.iter().any(|e| e == name)
    }

    fn create_instance(&mut self) -> Result<(), XrError> {
        let entry = unsafe { xr::Entry::load() }
            .map_err(|e| XrError::Loader(format!("{:?}", e)))?;

        let available = entry
            .enumerate_extensions()
            .map_err(|e| XrError::runtime("xrEnumerateInstanceExtensionProperties", e))?;
        log::debug!("Available OpenXR extensions: {:?}", available);

        let mut enabled = xr::ExtensionSet::default();
        if !B::enable_extension(&available, &mut enabled) {
            return Err(XrError::MissingExtension(B::EXTENSION.to_string()));
        }
        self.enabled_extensions.push(B::EXTENSION.to_string());

        if self.config.debug_messenger && available.ext_debug_utils {
            enabled.ext_debug_utils = true;
            self.enabled_extensions.push(DEBUG_UTILS_EXTENSION.to_string());
        }

        for name in &self.config.optional_extensions {
            if available.other.iter().any(|a| a == name) {
                enabled.other.push(name.clone());
                self.enabled_extensions.push(name.clone());
            } else {
                log::warn!("Optional extension {} not offered by the runtime", name);
            }
        }

        for name in &self.enabled_extensions {
            log::info!("Enabling extension {}", name);
        }

        let instance = entry
            .create_instance(
                &xr::ApplicationInfo {
                    application_name: &self.config.application_name,
                    application_version: self.config.application_version,
                    engine_name: &self.config.engine_name,
                    engine_version: self.config.engine_version,
                },
                &enabled,
                &[],
            )
            .map_err(|e| XrError::runtime("xrCreateInstance", e))?;

        if let Ok(props) = instance.properties() {
            log::info!(
                "OpenXR runtime: {} version {}",
                props.runtime_name,
                props.runtime_version
            );
        }

        self.instance = Some(instance);
        Ok(())
    }

    /// Debug messenger failures only cost diagnostics
    fn create_debug_messenger(&mut self) {
        if !self.is_extension_enabled(DEBUG_UTILS_EXTENSION) {
            return;
        }
        let Some(instance) = self.instance.as_ref() else {
            return;
        };
        let Some(ext) = instance.exts().ext_debug_utils.as_ref() else {
            return;
        };

        let create_info = xr::sys::DebugUtilsMessengerCreateInfoEXT {
            ty: xr::sys::DebugUtilsMessengerCreateInfoEXT::TYPE,
            next: std::ptr::null(),
            message_severities: xr::sys::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | xr::sys::DebugUtilsMessageSeverityFlagsEXT::INFO
                | xr::sys::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | xr::sys::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_types: xr::sys::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | xr::sys::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | xr::sys::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                | xr::sys::DebugUtilsMessageTypeFlagsEXT::CONFORMANCE,
            user_callback: Some(debug_callback),
            user_data: std::ptr::null_mut(),
        };

        let mut handle = xr::sys::DebugUtilsMessengerEXT::NULL;
        let result = unsafe {
            (ext.create_debug_utils_messenger)(instance.as_raw(), &create_info, &mut handle)
        };
        if result.into_raw() < 0 {
            log::warn!("Failed to create debug messenger: {}", result);
            return;
        }

        self.messenger = Some(DebugMessenger {
            handle,
            destroy: ext.destroy_debug_utils_messenger,
        });
    }

    fn discover_system(&mut self) -> Result<(), XrError> {
        let instance = self.instance.as_ref().ok_or(XrError::NotInitialized)?;

        let system = instance
            .system(form_factor(self.config.view_mode.form_factor()))
            .map_err(|e| XrError::runtime("xrGetSystem", e))?;

        if let Ok(props) = instance.system_properties(system) {
            log::info!("XR system: {} (vendor {})", props.system_name, props.vendor_id);
        }

        self.system = Some(system);
        Ok(())
    }

    fn create_session(&mut self) -> Result<(), XrError> {
        let instance = self.instance.as_ref().ok_or(XrError::NotInitialized)?;
        let system = self.system.ok_or(XrError::NotInitialized)?;

        let binding = B::create(instance, system)?;

        let (session, frame_waiter, frame_stream) = unsafe {
            instance.create_session::<B::Api>(system, &binding.session_create_info())
        }
        .map_err(|e| XrError::SessionCreation(e.to_string()))?;

        let space = session
            .create_reference_space(xr::ReferenceSpaceType::LOCAL, xr::Posef::IDENTITY)
            .map_err(|e| XrError::SessionCreation(format!("xrCreateReferenceSpace: {}", e)))?;

        self.binding = Some(binding);
        self.session = Some(session);
        self.frame_waiter = Some(frame_waiter);
        self.frame_stream = Some(frame_stream);
        self.space = Some(space);
        Ok(())
    }

    fn create_swapchains(&mut self) -> Result<(), XrError> {
        let instance = self.instance.as_ref().ok_or(XrError::NotInitialized)?;
        let system = self.system.ok_or(XrError::NotInitialized)?;
        let session = self.session.as_ref().ok_or(XrError::NotInitialized)?;
        let binding = self.binding.as_ref().ok_or(XrError::NotInitialized)?;

        let views = instance
            .enumerate_view_configuration_views(system, self.view_configuration)
            .map_err(|e| XrError::runtime("xrEnumerateViewConfigurationViews", e))?;

        if views.len() != self.config.view_mode.view_count() {
            log::warn!(
                "Runtime reports {} views for {}",
                views.len(),
                self.config.view_mode
            );
        }

        for (index, view) in views.iter().enumerate() {
            let desc = binding.texture_desc(view);

            let handle = session
                .create_swapchain(&xr::SwapchainCreateInfo {
                    create_flags: xr::SwapchainCreateFlags::EMPTY,
                    usage_flags: xr::SwapchainUsageFlags::COLOR_ATTACHMENT
                        | xr::SwapchainUsageFlags::SAMPLED,
                    format: binding.swapchain_format(),
                    sample_count: desc.sample_count,
                    width: desc.width,
                    height: desc.height,
                    face_count: 1,
                    array_size: desc.array_size,
                    mip_count: desc.mip_levels,
                })
                .map_err(|e| XrError::runtime("xrCreateSwapchain", e))?;

            let images = handle
                .enumerate_images()
                .map_err(|e| XrError::runtime("xrEnumerateSwapchainImages", e))?;
            let targets = SwapchainTargets::build(binding, &images, desc)?;

            log::info!(
                "Swapchain {}: {}x{}, {} samples, {} images",
                index,
                desc.width,
                desc.height,
                desc.sample_count,
                targets.len()
            );

            self.swapchains.push(BoundSwapchain::new(handle, targets));
        }

        Ok(())
    }

    fn swapchain_mut(&mut self, index: usize) -> Result<&mut xr::Swapchain<B::Api>, XrError> {
        self.swapchains
            .get_mut(index)
            .map(BoundSwapchain::handle_mut)
            .ok_or(XrError::NotInitialized)
    }
}

impl<B: XrGraphicsBinding> XrRuntime for OpenXrRuntime<B> {
    type ViewPair = B::ViewPair;

    fn view_mode(&self) -> ViewMode {
        self.config.view_mode
    }

    fn poll_event(&mut self) -> Result<Option<RuntimeEvent>, XrError> {
        let instance = self.instance.as_ref().ok_or(XrError::NotInitialized)?;

        let event = instance
            .poll_event(&mut self.event_buffer)
            .map_err(|e| XrError::runtime("xrPollEvent", e))?;

        Ok(event.map(|event| match event {
            xr::Event::SessionStateChanged(change) => {
                RuntimeEvent::SessionStateChanged(session_state(change.state()))
            }
            xr::Event::InstanceLossPending(_) => RuntimeEvent::InstanceLossPending,
            _ => RuntimeEvent::Other,
        }))
    }

    fn begin_session(&mut self) -> Result<(), XrError> {
        let session = self.session.as_ref().ok_or(XrError::NotInitialized)?;
        session
            .begin(self.view_configuration)
            .map_err(|e| XrError::runtime("xrBeginSession", e))?;
        Ok(())
    }

    fn end_session(&mut self) -> Result<(), XrError> {
        let session = self.session.as_ref().ok_or(XrError::NotInitialized)?;
        session.end().map_err(|e| XrError::runtime("xrEndSession", e))?;
        Ok(())
    }

    fn wait_frame(&mut self) -> Result<FrameState, XrError> {
        let frame_waiter = self.frame_waiter.as_mut().ok_or(XrError::NotInitialized)?;
        let state = frame_waiter
            .wait()
            .map_err(|e| XrError::runtime("xrWaitFrame", e))?;

        Ok(FrameState {
            predicted_display_time: state.predicted_display_time.as_nanos(),
            should_render: state.should_render,
        })
    }

    fn begin_frame(&mut self) -> Result<(), XrError> {
        let frame_stream = self.frame_stream.as_mut().ok_or(XrError::NotInitialized)?;
        frame_stream
            .begin()
            .map_err(|e| XrError::runtime("xrBeginFrame", e))?;
        Ok(())
    }

    fn locate_views(&mut self, display_time: i64) -> Result<Vec<ViewLocation>, XrError> {
        let session = self.session.as_ref().ok_or(XrError::NotInitialized)?;
        let space = self.space.as_ref().ok_or(XrError::NotInitialized)?;

        let (_flags, views) = session
            .locate_views(
                self.view_configuration,
                xr::Time::from_nanos(display_time),
                space,
            )
            .map_err(|e| XrError::runtime("xrLocateViews", e))?;

        Ok(views
            .iter()
            .map(|view| ViewLocation {
                pose: pose_from_xr(&view.pose),
                fov: Fov {
                    angle_left: view.fov.angle_left,
                    angle_right: view.fov.angle_right,
                    angle_up: view.fov.angle_up,
                    angle_down: view.fov.angle_down,
                },
            })
            .collect())
    }

    fn swapchain_count(&self) -> usize {
        self.swapchains.len()
    }

    fn swapchain_extent(&self, swapchain: usize) -> Extent2D {
        self.swapchains
            .get(swapchain)
            .map(|s| s.targets().extent())
            .unwrap_or_default()
    }

    fn acquire_image(&mut self, swapchain: usize) -> Result<u32, XrError> {
        self.swapchain_mut(swapchain)?
            .acquire_image()
            .map_err(|e| XrError::runtime("xrAcquireSwapchainImage", e))
    }

    fn wait_image(&mut self, swapchain: usize) -> Result<(), XrError> {
        self.swapchain_mut(swapchain)?
            .wait_image(xr::Duration::INFINITE)
            .map_err(|e| XrError::runtime("xrWaitSwapchainImage", e))
    }

    fn release_image(&mut self, swapchain: usize) -> Result<(), XrError> {
        self.swapchain_mut(swapchain)?
            .release_image()
            .map_err(|e| XrError::runtime("xrReleaseSwapchainImage", e))
    }

    fn view_pair(&self, swapchain: usize, image: u32) -> Option<&B::ViewPair> {
        self.swapchains.get(swapchain)?.targets().get(image)
    }

    fn end_frame(
        &mut self,
        display_time: i64,
        layer: Option<&[ProjectionView]>,
    ) -> Result<(), XrError> {
        let frame_stream = self.frame_stream.as_mut().ok_or(XrError::NotInitialized)?;
        let time = xr::Time::from_nanos(display_time);
        let blend_mode = self.config.blend_mode;

        let (Some(views), Some(space)) = (layer, self.space.as_ref()) else {
            return frame_stream
                .end(time, blend_mode, &[])
                .map_err(|e| XrError::runtime("xrEndFrame", e));
        };

        let mut projection_views = Vec::with_capacity(views.len());
        for view in views {
            let swapchain = self
                .swapchains
                .get(view.swapchain)
                .ok_or(XrError::NotInitialized)?
                .handle();
            let rect = view.image_rect;

            projection_views.push(
                xr::CompositionLayerProjectionView::new()
                    .pose(pose_to_xr(&view.pose))
                    .fov(xr::Fovf {
                        angle_left: view.fov.angle_left,
                        angle_right: view.fov.angle_right,
                        angle_up: view.fov.angle_up,
                        angle_down: view.fov.angle_down,
                    })
                    .sub_image(
                        xr::SwapchainSubImage::new()
                            .swapchain(swapchain)
                            .image_array_index(0)
                            .image_rect(xr::Rect2Di {
                                offset: xr::Offset2Di {
                                    x: rect.offset[0],
                                    y: rect.offset[1],
                                },
                                extent: xr::Extent2Di {
                                    width: rect.extent.width as i32,
                                    height: rect.extent.height as i32,
                                },
                            }),
                    ),
            );
        }

        let projection = xr::CompositionLayerProjection::new()
            .space(space)
            .views(&projection_views);

        frame_stream
            .end(time, blend_mode, &[&projection])
            .map_err(|e| XrError::runtime("xrEndFrame", e))
    }

    fn shutdown(&mut self) {
        if self.instance.is_none() {
            return;
        }
        log::info!("Shutting down OpenXR runtime...");

        for swapchain in self.swapchains.drain(..) {
            swapchain.release();
        }
        self.space = None;
        self.frame_stream = None;
        self.frame_waiter = None;
        self.session = None;

        if let Some(mut binding) = self.binding.take() {
            binding.shutdown();
        }

        if let Some(messenger) = self.messenger.take() {
            unsafe {
                let _ = (messenger.destroy)(messenger.handle);
            }
        }

        self.system = None;
        self.instance = None;

        log::info!("OpenXR runtime shutdown complete");
    }
}

impl<B: XrGraphicsBinding> Drop for OpenXrRuntime<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Forwards runtime diagnostics to `log`
unsafe extern "system" fn debug_callback(
    severity: xr::sys::DebugUtilsMessageSeverityFlagsEXT,
    _types: xr::sys::DebugUtilsMessageTypeFlagsEXT,
    data: *const xr::sys::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> xr::sys::Bool32 {
    if data.is_null() || (*data).message.is_null() {
        return xr::sys::FALSE;
    }
    let message = CStr::from_ptr((*data).message).to_string_lossy();

    if severity.contains(xr::sys::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("[openxr] {}", message);
    } else if severity.contains(xr::sys::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("[openxr] {}", message);
    } else if severity.contains(xr::sys::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::info!("[openxr] {}", message);
    } else {
        log::debug!("[openxr] {}", message);
    }

    xr::sys::FALSE
}

fn form_factor(form_factor: FormFactor) -> xr::FormFactor {
    match form_factor {
        FormFactor::HeadMounted => xr::FormFactor::HEAD_MOUNTED_DISPLAY,
        FormFactor::Handheld => xr::FormFactor::HANDHELD_DISPLAY,
    }
}

fn view_configuration_type(configuration: ViewConfiguration) -> xr::ViewConfigurationType {
    match configuration {
        ViewConfiguration::PrimaryStereo => xr::ViewConfigurationType::PRIMARY_STEREO,
        ViewConfiguration::PrimaryMono => xr::ViewConfigurationType::PRIMARY_MONO,
    }
}

/// Map a runtime session state onto the lifecycle
pub fn session_state(state: xr::SessionState) -> SessionState {
    match state {
        xr::SessionState::IDLE => SessionState::Idle,
        xr::SessionState::READY => SessionState::Ready,
        xr::SessionState::SYNCHRONIZED => SessionState::Synchronized,
        xr::SessionState::VISIBLE => SessionState::Visible,
        xr::SessionState::FOCUSED => SessionState::Focused,
        xr::SessionState::STOPPING => SessionState::Stopping,
        xr::SessionState::LOSS_PENDING => SessionState::LossPending,
        xr::SessionState::EXITING => SessionState::Exiting,
        _ => SessionState::Unknown,
    }
}

fn pose_from_xr(pose: &xr::Posef) -> Pose {
    Pose::new(
        Vec3::new(pose.position.x, pose.position.y, pose.position.z),
        Quat::from_xyzw(
            pose.orientation.x,
            pose.orientation.y,
            pose.orientation.z,
            pose.orientation.w,
        ),
    )
}

fn pose_to_xr(pose: &Pose) -> xr::Posef {
    xr::Posef {
        orientation: xr::Quaternionf {
            x: pose.orientation.x,
            y: pose.orientation.y,
            z: pose.orientation.z,
            w: pose.orientation.w,
        },
        position: xr::Vector3f {
            x: pose.position.x,
            y: pose.position.y,
            z: pose.position.z,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_mapping() {
        assert_eq!(session_state(xr::SessionState::READY), SessionState::Ready);
        assert_eq!(session_state(xr::SessionState::FOCUSED), SessionState::Focused);
        assert_eq!(
            session_state(xr::SessionState::LOSS_PENDING),
            SessionState::LossPending
        );
        assert_eq!(session_state(xr::SessionState::EXITING), SessionState::Exiting);
        assert_eq!(session_state(xr::SessionState::UNKNOWN), SessionState::Unknown);
    }

    #[test]
    fn test_view_mode_mapping() {
        assert_eq!(
            form_factor(ViewMode::Handheld.form_factor()),
            xr::FormFactor::HANDHELD_DISPLAY
        );
        assert_eq!(
            view_configuration_type(ViewMode::Immersive.view_configuration()),
            xr::ViewConfigurationType::PRIMARY_STEREO
        );
        assert_eq!(
            view_configuration_type(ViewMode::Handheld.view_configuration()),
            xr::ViewConfigurationType::PRIMARY_MONO
        );
    }

    #[test]
    fn test_pose_conversion() {
        let pose = Pose::new(
            Vec3::new(0.1, 1.6, -0.3),
            Quat::from_rotation_y(0.5),
        );
        let back = pose_from_xr(&pose_to_xr(&pose));
        assert!((back.position - pose.position).length() < 1e-6);
        assert!(back.orientation.abs_diff_eq(pose.orientation, 1e-6));
    }

    #[test]
    fn test_default_config() {
        let config = OpenXrConfig::default();
        assert_eq!(config.view_mode, ViewMode::Immersive);
        assert!(config.debug_messenger);
        assert!(config.optional_extensions.is_empty());
    }
}
