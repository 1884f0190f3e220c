//! Host errors

use thiserror::Error;

use stream_channel::ChannelError;
use stream_xr::XrError;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("XR: {0}")]
    Xr(#[from] XrError),

    #[error("Data channel: {0}")]
    Channel(#[from] ChannelError),

    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Window: {0}")]
    Window(String),
}

impl From<winit::error::EventLoopError> for HostError {
    fn from(e: winit::error::EventLoopError) -> Self {
        Self::Window(e.to_string())
    }
}
