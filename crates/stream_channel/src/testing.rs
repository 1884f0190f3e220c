//! In-process channel double
//!
//! [`MockChannelApi`] plays the runtime side: a scripted status sequence,
//! an incoming payload queue (optionally fed by loopback of sent payloads)
//! and a shared call log for lifecycle calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::api::{ChannelApi, ChannelError, ChannelGuid, ChannelHandle, STREAMING_CHANNEL_GUID};
use crate::status::ChannelStatus;

/// Shared, ordered call log
pub type CallLog = Arc<Mutex<Vec<String>>>;

const MOCK_HANDLE: u64 = 0x00C0_FFEE;

/// Runtime side of the channel, driven by the test
pub struct MockChannelApi {
    log: Mutex<CallLog>,
    /// Consumed one per status poll; `None` entries are unknown raw values
    script: Mutex<VecDeque<Option<ChannelStatus>>>,
    /// Returned once the script is exhausted
    steady: Mutex<ChannelStatus>,
    status_polls: AtomicUsize,
    /// Poll number (1-based) that first reported CONNECTED
    connected_at_poll: Mutex<Option<usize>>,
    incoming: Mutex<VecDeque<Vec<u8>>>,
    sent: Mutex<Vec<Vec<u8>>>,
    loopback: AtomicBool,
    create_fails: AtomicBool,
    send_fails: AtomicBool,
    status_fails: AtomicBool,
    destroyed: AtomicBool,
    violations: Mutex<Vec<String>>,
}

impl Default for MockChannelApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannelApi {
    /// A peer that never shows up
    pub fn new() -> Self {
        Self {
            log: Mutex::new(Arc::new(Mutex::new(Vec::new()))),
            script: Mutex::new(VecDeque::new()),
            steady: Mutex::new(ChannelStatus::Connecting),
            status_polls: AtomicUsize::new(0),
            connected_at_poll: Mutex::new(None),
            incoming: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            loopback: AtomicBool::new(false),
            create_fails: AtomicBool::new(false),
            send_fails: AtomicBool::new(false),
            status_fails: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            violations: Mutex::new(Vec::new()),
        }
    }

    /// Report CONNECTING for `polls` polls, then CONNECTED
    pub fn connecting_then_connected(polls: usize) -> Self {
        let api = Self::new();
        api.script(std::iter::repeat(ChannelStatus::Connecting).take(polls));
        api.set_steady(ChannelStatus::Connected);
        api
    }

    /// Record lifecycle calls into an existing log
    pub fn with_log(self, log: CallLog) -> Self {
        *self.log.lock() = log;
        self
    }

    pub fn log(&self) -> CallLog {
        Arc::clone(&self.log.lock())
    }

    /// Append statuses to the poll script
    pub fn script(&self, statuses: impl IntoIterator<Item = ChannelStatus>) {
        self.script.lock().extend(statuses.into_iter().map(Some));
    }

    /// Append a status value outside the known set
    pub fn script_unknown(&self) {
        self.script.lock().push_back(None);
    }

    /// Status once the script runs out
    pub fn set_steady(&self, status: ChannelStatus) {
        *self.steady.lock() = status;
    }

    /// Drop the remaining script and report `status` from now on
    pub fn set_status(&self, status: ChannelStatus) {
        self.script.lock().clear();
        self.set_steady(status);
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::Acquire)
    }

    /// Which poll first reported CONNECTED, if any has
    pub fn connected_at_poll(&self) -> Option<usize> {
        *self.connected_at_poll.lock()
    }

    /// Queue a payload for the receive side
    pub fn push_incoming(&self, payload: impl Into<Vec<u8>>) {
        self.incoming.lock().push_back(payload.into());
    }

    /// Echo every successful send back as an incoming payload
    pub fn set_loopback(&self, loopback: bool) {
        self.loopback.store(loopback, Ordering::Release);
    }

    /// Payloads the runtime accepted, in order
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().clone()
    }

    pub fn fail_create(&self, fail: bool) {
        self.create_fails.store(fail, Ordering::Release);
    }

    pub fn fail_send(&self, fail: bool) {
        self.send_fails.store(fail, Ordering::Release);
    }

    pub fn fail_status(&self, fail: bool) {
        self.status_fails.store(fail, Ordering::Release);
    }

    /// Calls made on a destroyed or unknown handle
    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().clone()
    }

    fn record(&self, call: &str) {
        self.log.lock().lock().push(call.to_string());
    }

    fn check_handle(&self, call: &str, handle: ChannelHandle) {
        if handle.into_raw() != MOCK_HANDLE {
            self.violations
                .lock()
                .push(format!("{} on unknown handle {:#x}", call, handle.into_raw()));
        } else if self.destroyed.load(Ordering::Acquire) {
            self.violations.lock().push(format!("{} after destroy", call));
        }
    }
}

impl ChannelApi for MockChannelApi {
    fn create(&self, guid: &ChannelGuid) -> Result<ChannelHandle, ChannelError> {
        self.record("channel_create");
        if *guid != STREAMING_CHANNEL_GUID {
            self.violations.lock().push(format!("unexpected guid {}", guid));
        }
        if self.create_fails.load(Ordering::Acquire) {
            return Err(ChannelError::runtime(
                "xrCreateOpaqueDataChannelNV",
                crate::api::ERROR_CHANNEL_ALREADY_CREATED,
            ));
        }
        ChannelHandle::from_raw(MOCK_HANDLE).ok_or(ChannelError::NullHandle)
    }

    fn status(&self, handle: ChannelHandle) -> Result<Option<ChannelStatus>, ChannelError> {
        self.check_handle("status", handle);
        let poll = self.status_polls.fetch_add(1, Ordering::AcqRel) + 1;
        if self.status_fails.load(Ordering::Acquire) {
            return Err(ChannelError::runtime("xrGetOpaqueDataChannelStateNV", -1));
        }

        let status = match self.script.lock().pop_front() {
            Some(scripted) => scripted,
            None => Some(*self.steady.lock()),
        };
        if status == Some(ChannelStatus::Connected) {
            self.connected_at_poll.lock().get_or_insert(poll);
        }
        Ok(status)
    }

    fn send(&self, handle: ChannelHandle, payload: &[u8]) -> Result<(), ChannelError> {
        self.check_handle("send", handle);
        if self.send_fails.load(Ordering::Acquire) {
            return Err(ChannelError::runtime(
                "xrSendOpaqueDataChannelNV",
                crate::api::ERROR_CHANNEL_NOT_CONNECTED,
            ));
        }

        self.sent.lock().push(payload.to_vec());
        if self.loopback.load(Ordering::Acquire) {
            self.incoming.lock().push_back(payload.to_vec());
        }
        Ok(())
    }

    fn receive(&self, handle: ChannelHandle, buffer: &mut [u8]) -> Result<usize, ChannelError> {
        self.check_handle("receive", handle);
        let Some(payload) = self.incoming.lock().pop_front() else {
            return Ok(0);
        };

        let len = payload.len().min(buffer.len());
        buffer[..len].copy_from_slice(&payload[..len]);
        Ok(len)
    }

    fn shutdown(&self, handle: ChannelHandle) -> Result<(), ChannelError> {
        self.check_handle("shutdown", handle);
        self.record("channel_shutdown");
        Ok(())
    }

    fn destroy(&self, handle: ChannelHandle) -> Result<(), ChannelError> {
        self.check_handle("destroy", handle);
        self.record("channel_destroy");
        self.destroyed.store(true, Ordering::Release);
        Ok(())
    }
}
