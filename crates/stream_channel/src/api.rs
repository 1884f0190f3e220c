//! Runtime seam for the opaque data channel

use thiserror::Error;

use crate::status::ChannelStatus;

/// `XR_ERROR_CHANNEL_ALREADY_CREATED_NV`
pub const ERROR_CHANNEL_ALREADY_CREATED: i32 = -1000500000;
/// `XR_ERROR_CHANNEL_NOT_CONNECTED_NV`
pub const ERROR_CHANNEL_NOT_CONNECTED: i32 = -1000500001;

/// 128-bit channel identifier, laid out as the runtime expects
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelGuid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

/// Identifier the host application creates its channel with
pub const STREAMING_CHANNEL_GUID: ChannelGuid = ChannelGuid {
    data1: 0x1234_5678,
    data2: 0x1234,
    data3: 0x1234,
    data4: [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0],
};

impl core::fmt::Display for ChannelGuid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

/// Runtime handle of a created channel (never null)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChannelHandle(u64);

impl ChannelHandle {
    /// `None` for the null handle
    pub fn from_raw(raw: u64) -> Option<Self> {
        (raw != 0).then_some(Self(raw))
    }

    pub fn into_raw(self) -> u64 {
        self.0
    }
}

/// Entrypoints of the opaque data channel extension.
///
/// Calls may come from the owner and both background tasks at once; the
/// runtime synchronizes internally.
pub trait ChannelApi: Send + Sync {
    /// Create a channel identified by `guid` against the instance's system
    fn create(&self, guid: &ChannelGuid) -> Result<ChannelHandle, ChannelError>;

    /// Current status; `Ok(None)` for a value outside the known set
    fn status(&self, handle: ChannelHandle) -> Result<Option<ChannelStatus>, ChannelError>;

    fn send(&self, handle: ChannelHandle, payload: &[u8]) -> Result<(), ChannelError>;

    /// Copy one pending payload into `buffer`, returning its length (0 = none)
    fn receive(&self, handle: ChannelHandle, buffer: &mut [u8]) -> Result<usize, ChannelError>;

    fn shutdown(&self, handle: ChannelHandle) -> Result<(), ChannelError>;

    fn destroy(&self, handle: ChannelHandle) -> Result<(), ChannelError>;
}

/// Data channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Opaque data channel entrypoints not available: {0}")]
    EntrypointsMissing(String),

    #[error("Channel handle is null")]
    NullHandle,

    #[error("{call} failed: {code}")]
    Runtime { call: &'static str, code: String },

    #[error("Channel is not connected")]
    NotConnected,

    #[error("Payload of {0} bytes exceeds the runtime's length field")]
    PayloadTooLarge(usize),

    #[error("Connect already started")]
    AlreadyStarted,

    #[error("Failed to spawn {0} thread: {1}")]
    Spawn(&'static str, String),
}

impl ChannelError {
    /// Failure of a named runtime call with a raw `XrResult`
    pub fn runtime(call: &'static str, raw: i32) -> Self {
        Self::Runtime {
            call,
            code: describe_result(raw),
        }
    }
}

/// Human-readable name for a raw result code
pub fn describe_result(raw: i32) -> String {
    match raw {
        ERROR_CHANNEL_ALREADY_CREATED => "XR_ERROR_CHANNEL_ALREADY_CREATED_NV".to_string(),
        ERROR_CHANNEL_NOT_CONNECTED => "XR_ERROR_CHANNEL_NOT_CONNECTED_NV".to_string(),
        other => format!("XrResult({})", other),
    }
}
