//! Runtime entrypoints of `XR_NVX1_opaque_data_channel`
//!
//! The extension is not part of the registry the `openxr` crate is
//! generated from, so its structures and function pointers are declared
//! here and resolved through `xrGetInstanceProcAddr`.

use std::ffi::{c_void, CStr};
use std::ptr;

use openxr as xr;
use openxr::sys;

use crate::api::{ChannelApi, ChannelError, ChannelGuid, ChannelHandle};
use crate::status::ChannelStatus;

const TYPE_CREATE_INFO: i32 = 1000500000;
const TYPE_STATE: i32 = 1000500001;

#[repr(C)]
struct CreateInfo {
    ty: sys::StructureType,
    next: *const c_void,
    system_id: sys::SystemId,
    uuid: ChannelGuid,
}

#[repr(C)]
struct State {
    ty: sys::StructureType,
    next: *mut c_void,
    state: i32,
}

type CreateFn =
    unsafe extern "system" fn(sys::Instance, *const CreateInfo, *mut u64) -> sys::Result;
type DestroyFn = unsafe extern "system" fn(u64) -> sys::Result;
type GetStateFn = unsafe extern "system" fn(u64, *mut State) -> sys::Result;
type ShutdownFn = unsafe extern "system" fn(u64) -> sys::Result;
type SendFn = unsafe extern "system" fn(u64, u32, *const u8) -> sys::Result;
type ReceiveFn = unsafe extern "system" fn(u64, u32, *mut u32, *mut u8) -> sys::Result;

/// Resolved entrypoints
#[derive(Clone, Copy)]
struct OpaqueChannelFns {
    create: CreateFn,
    destroy: DestroyFn,
    get_state: GetStateFn,
    shutdown: ShutdownFn,
    send: SendFn,
    receive: ReceiveFn,
}

impl OpaqueChannelFns {
    fn load(instance: &xr::Instance) -> Result<Self, ChannelError> {
        // SAFETY: each name is paired with the signature the extension declares for it
        unsafe {
            Ok(Self {
                create: std::mem::transmute::<sys::pfn::VoidFunction, CreateFn>(resolve(
                    instance,
                    c"xrCreateOpaqueDataChannelNV",
                )?),
                destroy: std::mem::transmute::<sys::pfn::VoidFunction, DestroyFn>(resolve(
                    instance,
                    c"xrDestroyOpaqueDataChannelNV",
                )?),
                get_state: std::mem::transmute::<sys::pfn::VoidFunction, GetStateFn>(resolve(
                    instance,
                    c"xrGetOpaqueDataChannelStateNV",
                )?),
                shutdown: std::mem::transmute::<sys::pfn::VoidFunction, ShutdownFn>(resolve(
                    instance,
                    c"xrShutdownOpaqueDataChannelNV",
                )?),
                send: std::mem::transmute::<sys::pfn::VoidFunction, SendFn>(resolve(
                    instance,
                    c"xrSendOpaqueDataChannelNV",
                )?),
                receive: std::mem::transmute::<sys::pfn::VoidFunction, ReceiveFn>(resolve(
                    instance,
                    c"xrReceiveOpaqueDataChannelNV",
                )?),
            })
        }
    }
}

fn resolve(instance: &xr::Instance, name: &CStr) -> Result<sys::pfn::VoidFunction, ChannelError> {
    let mut function: Option<sys::pfn::VoidFunction> = None;
    let result = unsafe {
        (instance.entry().fp().get_instance_proc_addr)(
            instance.as_raw(),
            name.as_ptr(),
            &mut function,
        )
    };

    match function {
        Some(function) if result.into_raw() >= 0 => Ok(function),
        _ => Err(ChannelError::EntrypointsMissing(
            name.to_string_lossy().into_owned(),
        )),
    }
}

fn check(call: &'static str, result: sys::Result) -> Result<(), ChannelError> {
    match result.into_raw() {
        raw if raw >= 0 => Ok(()),
        raw => Err(ChannelError::runtime(call, raw)),
    }
}

/// [`ChannelApi`] backed by a live OpenXR instance
///
/// Holds a clone of the instance; drop it before the instance is destroyed.
pub struct XrChannelApi {
    instance: xr::Instance,
    system: xr::SystemId,
    fns: OpaqueChannelFns,
}

impl XrChannelApi {
    /// Resolve all six entrypoints. Fails if any is missing.
    pub fn load(instance: &xr::Instance, system: xr::SystemId) -> Result<Self, ChannelError> {
        let fns = OpaqueChannelFns::load(instance).map_err(|e| {
            log::error!("Failed to load opaque data channel functions: {}", e);
            e
        })?;
        log::info!("Opaque data channel functions loaded");

        Ok(Self {
            instance: instance.clone(),
            system,
            fns,
        })
    }
}

impl ChannelApi for XrChannelApi {
    fn create(&self, guid: &ChannelGuid) -> Result<ChannelHandle, ChannelError> {
        let info = CreateInfo {
            ty: sys::StructureType::from_raw(TYPE_CREATE_INFO),
            next: ptr::null(),
            system_id: self.system,
            uuid: *guid,
        };
        let mut raw = 0u64;

        // SAFETY: `info` and `raw` outlive the call
        let result = unsafe { (self.fns.create)(self.instance.as_raw(), &info, &mut raw) };
        check("xrCreateOpaqueDataChannelNV", result)?;
        ChannelHandle::from_raw(raw).ok_or(ChannelError::NullHandle)
    }

    fn status(&self, handle: ChannelHandle) -> Result<Option<ChannelStatus>, ChannelError> {
        let mut state = State {
            ty: sys::StructureType::from_raw(TYPE_STATE),
            next: ptr::null_mut(),
            state: 0,
        };

        let result = unsafe { (self.fns.get_state)(handle.into_raw(), &mut state) };
        check("xrGetOpaqueDataChannelStateNV", result)?;
        Ok(ChannelStatus::from_raw(state.state))
    }

    fn send(&self, handle: ChannelHandle, payload: &[u8]) -> Result<(), ChannelError> {
        let len = u32::try_from(payload.len())
            .map_err(|_| ChannelError::PayloadTooLarge(payload.len()))?;

        let result = unsafe { (self.fns.send)(handle.into_raw(), len, payload.as_ptr()) };
        check("xrSendOpaqueDataChannelNV", result)
    }

    fn receive(&self, handle: ChannelHandle, buffer: &mut [u8]) -> Result<usize, ChannelError> {
        let capacity = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
        let mut count = 0u32;

        let result = unsafe {
            (self.fns.receive)(handle.into_raw(), capacity, &mut count, buffer.as_mut_ptr())
        };
        check("xrReceiveOpaqueDataChannelNV", result)?;
        Ok((count as usize).min(buffer.len()))
    }

    fn shutdown(&self, handle: ChannelHandle) -> Result<(), ChannelError> {
        let result = unsafe { (self.fns.shutdown)(handle.into_raw()) };
        check("xrShutdownOpaqueDataChannelNV", result)
    }

    fn destroy(&self, handle: ChannelHandle) -> Result<(), ChannelError> {
        let result = unsafe { (self.fns.destroy)(handle.into_raw()) };
        check("xrDestroyOpaqueDataChannelNV", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_layout() {
        // type(4) + pad(4) + next(8) + systemId(8) + guid(16)
        #[cfg(target_pointer_width = "64")]
        assert_eq!(std::mem::size_of::<CreateInfo>(), 40);
        assert_eq!(std::mem::align_of::<ChannelGuid>(), 4);
    }
}
