//! Opaque data channel for the StreamingSession host
//!
//! A bidirectional byte channel to the remote streaming peer, carried by
//! the `XR_NVX1_opaque_data_channel` runtime extension.
//!
//! ```text
//!   owner thread          channel-connect           channel-receive
//!   ------------          ---------------           ---------------
//!   create()
//!   connect_async() ----> poll status every 100ms
//!                         CONNECTED -> spawn ---->  receive / deliver
//!                         send HANDSHAKE            poll status
//!   send()                                          DISCONNECTED -> stop
//!   shutdown(): join both, shut down, destroy
//! ```
//!
//! The runtime entrypoints sit behind [`ChannelApi`], so everything above
//! the FFI layer runs against [`testing::MockChannelApi`] in tests.

pub mod api;
pub mod channel;
pub mod sink;
pub mod status;

#[cfg(feature = "openxr")]
pub mod ffi;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use api::{
    describe_result, ChannelApi, ChannelError, ChannelGuid, ChannelHandle,
    STREAMING_CHANNEL_GUID,
};
pub use channel::{ChannelConfig, DataChannel, HANDSHAKE, MIN_RECEIVE_BUFFER};
pub use sink::{LogSink, PayloadSink};
pub use status::{ChannelFlags, ChannelPhase, ChannelStatus};

#[cfg(feature = "openxr")]
pub use ffi::XrChannelApi;

/// Instance extension that provides the channel entrypoints
pub const EXTENSION_NAME: &str = "XR_NVX1_opaque_data_channel";
