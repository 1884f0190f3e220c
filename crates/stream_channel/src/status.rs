//! Channel status and the flags shared with the background tasks

use std::sync::atomic::{AtomicU8, Ordering};

/// Status reported by the runtime for a channel
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ChannelStatus {
    Connecting,
    Connected,
    ShuttingDown,
    Disconnected,
}

impl ChannelStatus {
    /// Decode the runtime's raw status value
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(Self::Connecting),
            1 => Some(Self::Connected),
            2 => Some(Self::ShuttingDown),
            3 => Some(Self::Disconnected),
            _ => None,
        }
    }

    pub fn into_raw(self) -> i32 {
        match self {
            Self::Connecting => 0,
            Self::Connected => 1,
            Self::ShuttingDown => 2,
            Self::Disconnected => 3,
        }
    }
}

/// Where the local side of the channel is
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ChannelPhase {
    /// Created, no connect task running
    Idle = 0,
    /// Connect task polling for the peer
    Connecting = 1,
    /// Peer connected, receive task running
    Connected = 2,
    /// Peer went away
    Disconnected = 3,
    /// Shutdown began; terminal
    ShuttingDown = 4,
}

impl ChannelPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Connected,
            3 => Self::Disconnected,
            _ => Self::ShuttingDown,
        }
    }
}

/// Phase shared between the owner, the connect task and the receive task.
///
/// A single atomic tag backs the `connecting` / `connected` / `running`
/// predicates; `connected` and `running` are the same phase. Tasks claim a
/// transition with one compare-exchange.
#[derive(Debug)]
pub struct ChannelFlags {
    phase: AtomicU8,
}

impl Default for ChannelFlags {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelFlags {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(ChannelPhase::Idle as u8),
        }
    }

    pub fn phase(&self) -> ChannelPhase {
        ChannelPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Connect task is (or is about to be) polling
    pub fn is_connecting(&self) -> bool {
        self.phase() == ChannelPhase::Connecting
    }

    /// Peer connected; sends are allowed
    pub fn is_connected(&self) -> bool {
        self.phase() == ChannelPhase::Connected
    }

    /// Receive task should keep polling
    pub fn is_running(&self) -> bool {
        self.phase() == ChannelPhase::Connected
    }

    pub fn is_shutting_down(&self) -> bool {
        self.phase() == ChannelPhase::ShuttingDown
    }

    /// Move `from -> to` if the phase is still `from`
    pub fn transition(&self, from: ChannelPhase, to: ChannelPhase) -> bool {
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Enter the terminal phase, returning the phase it replaced
    pub fn begin_shutdown(&self) -> ChannelPhase {
        ChannelPhase::from_u8(
            self.phase
                .swap(ChannelPhase::ShuttingDown as u8, Ordering::AcqRel),
        )
    }
}
