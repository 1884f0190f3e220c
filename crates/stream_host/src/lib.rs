//! StreamingSession host
//!
//! Wires an XR session, a cube renderer and the opaque data channel into
//! one main loop:
//!
//! - [`config`]: TOML + command line settings
//! - [`host`]: tick, throttled messages, ordered shutdown
//! - [`window`]: debug window and OS event pump (winit)
//! - [`scene`]: camera and cube math shared by every view
//!
//! Run with: cargo run -p stream_host --bin streaming-session [-- -iOS]

pub mod config;
pub mod error;
pub mod host;
pub mod scene;
pub mod throttle;
pub mod window;

#[cfg(all(windows, feature = "d3d11"))]
pub mod d3d11_renderer;

pub use config::HostConfig;
pub use error::HostError;
pub use host::{open_channel, Host, TickControl};
pub use throttle::{message_payload, MessageThrottle};
