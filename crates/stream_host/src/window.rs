//! Debug window and the OS event pump
//!
//! The window only shows that the host is alive; closing it ends the
//! process. The XR main loop runs from `about_to_wait`, so the OS message
//! pump and the frame loop share the foreground thread.

use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowAttributes, WindowId};

use stream_xr::{Renderer, XrRuntime};

use crate::config::HostConfig;
use crate::error::HostError;
use crate::host::{Host, TickControl};

/// Line drawn into the window
pub const STATUS_TEXT: &str = "StreamingSession OpenXR App is running";
/// Window background (RGB)
pub const BACKGROUND_RGB: (u8, u8, u8) = (30, 30, 30);
/// Status text color (RGB)
pub const TEXT_RGB: (u8, u8, u8) = (0, 255, 0);

struct DebugWindowApp<R, D>
where
    R: XrRuntime,
    D: Renderer<R::ViewPair>,
{
    host: Host<R, D>,
    attributes: WindowAttributes,
    window: Option<Window>,
}

impl<R, D> ApplicationHandler for DebugWindowApp<R, D>
where
    R: XrRuntime,
    D: Renderer<R::ViewPair>,
{
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        match event_loop.create_window(self.attributes.clone()) {
            Ok(window) => {
                window.request_redraw();
                self.window = Some(window);
            }
            Err(e) => {
                log::error!("Failed to create debug window: {}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Window closed, shutting down...");
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                if let Some(window) = &self.window {
                    paint(window);
                }
            }
            WindowEvent::Resized(_) => {
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.host.tick() == TickControl::Exit {
            log::info!("XR session requested exit");
            event_loop.exit();
        }
    }
}

/// Pump OS events and tick `host` until the window closes or the session
/// exits. The host is handed back, still running, for ordered shutdown.
pub fn run_windowed<R, D>(host: Host<R, D>, config: &HostConfig) -> Result<Host<R, D>, HostError>
where
    R: XrRuntime,
    D: Renderer<R::ViewPair>,
{
    let attributes = WindowAttributes::default()
        .with_title(config.host.window_title.clone())
        .with_inner_size(LogicalSize::new(config.host.window_width, config.host.window_height));

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = DebugWindowApp {
        host,
        attributes,
        window: None,
    };
    event_loop.run_app(&mut app)?;

    app.window = None;
    Ok(app.host)
}

#[cfg(windows)]
fn paint(window: &Window) {
    use windows::core::HSTRING;
    use windows::Win32::Foundation::{COLORREF, HWND, RECT};
    use windows::Win32::Graphics::Gdi::{
        CreateSolidBrush, DeleteObject, FillRect, GetDC, ReleaseDC, SetBkMode, SetTextColor,
        TextOutW, TRANSPARENT,
    };
    use winit::raw_window_handle::{HasWindowHandle, RawWindowHandle};

    let Ok(handle) = window.window_handle() else {
        return;
    };
    let RawWindowHandle::Win32(handle) = handle.as_raw() else {
        return;
    };

    let hwnd = HWND(handle.hwnd.get() as *mut _);
    let size = window.inner_size();
    let rect = RECT {
        left: 0,
        top: 0,
        right: size.width as i32,
        bottom: size.height as i32,
    };
    let text = HSTRING::from(STATUS_TEXT);

    unsafe {
        let hdc = GetDC(Some(hwnd));
        let brush = CreateSolidBrush(colorref(BACKGROUND_RGB));
        FillRect(hdc, &rect, brush);
        let _ = DeleteObject(brush.into());

        SetBkMode(hdc, TRANSPARENT);
        SetTextColor(hdc, colorref(TEXT_RGB));
        let _ = TextOutW(hdc, 10, 10, text.as_wide());
        ReleaseDC(Some(hwnd), hdc);
    }

    fn colorref((r, g, b): (u8, u8, u8)) -> COLORREF {
        COLORREF(r as u32 | (g as u32) << 8 | (b as u32) << 16)
    }
}

#[cfg(not(windows))]
fn paint(_window: &Window) {}
