//! StreamingSession OpenXR App
//!
//! Run with: cargo run --bin streaming-session
//!       or: cargo run --bin streaming-session -- -iOS

use std::process::ExitCode;

use stream_host::{HostConfig, HostError};

fn main() -> ExitCode {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match HostConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::error!("{}", e);
            return ExitCode::from(1);
        }
    };
    config.print_summary();

    match run(&config) {
        Ok(()) => {
            log::info!("Clean shutdown");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            if matches!(e, HostError::Xr(_)) {
                show_startup_error();
            }
            ExitCode::from(1)
        }
    }
}

#[cfg(all(windows, feature = "d3d11"))]
fn run(config: &HostConfig) -> Result<(), HostError> {
    use std::sync::Arc;

    use stream_channel::{ChannelApi, LogSink, XrChannelApi, EXTENSION_NAME};
    use stream_host::d3d11_renderer::CubeRenderer;
    use stream_host::{open_channel, window, Host};
    use stream_xr::prelude::*;

    log::info!("Initializing OpenXR...");
    let runtime = OpenXrRuntime::<D3D11Binding>::initialize(config.openxr_config())?;
    let renderer = CubeRenderer::new(runtime.binding().ok_or(XrError::NotInitialized)?)?;

    let channel_api = if config.channel.enabled && runtime.is_extension_enabled(EXTENSION_NAME) {
        match (runtime.instance(), runtime.system()) {
            (Some(instance), Some(system)) => XrChannelApi::load(instance, system)
                .ok()
                .map(|api| Arc::new(api) as Arc<dyn ChannelApi>),
            _ => None,
        }
    } else {
        None
    };
    let channel = open_channel(channel_api, config.channel_config(), Arc::new(LogSink));

    let session = XrSession::new(runtime, config.session_config());
    let mut host = Host::new(session, renderer, channel, config);
    host.start();

    let mut host = window::run_windowed(host, config)?;
    host.shutdown();
    Ok(())
}

#[cfg(not(all(windows, feature = "d3d11")))]
fn run(_config: &HostConfig) -> Result<(), HostError> {
    Err(stream_xr::XrError::Unsupported(
        "this build has no Direct3D 11 graphics binding (Windows with the d3d11 feature)".into(),
    )
    .into())
}

#[cfg(windows)]
fn show_startup_error() {
    rfd::MessageDialog::new()
        .set_level(rfd::MessageLevel::Error)
        .set_title("Error")
        .set_description("OpenXR initialization failed")
        .set_buttons(rfd::MessageButtons::Ok)
        .show();
}

#[cfg(not(windows))]
fn show_startup_error() {
    eprintln!("OpenXR initialization failed");
}
