//! IHostControl implementation that captures the domain manager.
//!
//! The runtime calls `SetAppDomainManager` for each domain whose setup names
//! a domain manager. The bridge records the manager so it can be used as the
//! entry object.

use crate::clr_host::*;
use crate::com::ComPtr;
use dbgbridge_shared::HostCallback;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};
use windows::Win32::Foundation::{E_NOINTERFACE, E_POINTER, S_OK};
use windows::core::{GUID, HRESULT};

/// Domain manager object as reported by the runtime.
pub type DomainManager = ComPtr<RawUnknown>;

#[repr(C)]
pub struct BridgeHostControl {
    vtbl: *const IHostControlVtbl,
    ref_count: AtomicU32,
    callback: HostCallback<DomainManager>,
}

static BRIDGE_HOST_CONTROL_VTBL: IHostControlVtbl = IHostControlVtbl {
    query_interface: host_control_query_interface,
    add_ref: host_control_add_ref,
    release: host_control_release,
    get_host_manager: host_control_get_host_manager,
    set_app_domain_manager: host_control_set_app_domain_manager,
};

impl BridgeHostControl {
    /// Create the COM object with one reference owned by the returned pointer.
    pub fn create(callback: HostCallback<DomainManager>) -> ComPtr<IHostControl> {
        let control = Box::new(BridgeHostControl {
            vtbl: &BRIDGE_HOST_CONTROL_VTBL,
            ref_count: AtomicU32::new(1),
            callback,
        });
        let raw = NonNull::from(Box::leak(control)).cast::<IHostControl>();
        unsafe { ComPtr::from_non_null(raw) }
    }
}

// IUnknown implementation
unsafe extern "system" fn host_control_query_interface(
    this: *mut IHostControl,
    riid: *const GUID,
    ppv_object: *mut *mut c_void,
) -> HRESULT {
    if ppv_object.is_null() || riid.is_null() {
        return E_POINTER;
    }

    let riid = unsafe { &*riid };
    if *riid == IID_IUNKNOWN || *riid == IID_IHOST_CONTROL {
        unsafe {
            *ppv_object = this as *mut c_void;
            host_control_add_ref(this);
        }
        return S_OK;
    }

    unsafe { *ppv_object = std::ptr::null_mut() };
    E_NOINTERFACE
}

unsafe extern "system" fn host_control_add_ref(this: *mut IHostControl) -> u32 {
    let control = unsafe { &*(this as *const BridgeHostControl) };
    control.ref_count.fetch_add(1, Ordering::SeqCst) + 1
}

unsafe extern "system" fn host_control_release(this: *mut IHostControl) -> u32 {
    let control = unsafe { &*(this as *const BridgeHostControl) };
    let count = control.ref_count.fetch_sub(1, Ordering::SeqCst) - 1;
    if count == 0 {
        drop(unsafe { Box::from_raw(this as *mut BridgeHostControl) });
    }
    count
}

// IHostControl implementation
unsafe extern "system" fn host_control_get_host_manager(
    _this: *mut IHostControl,
    _riid: *const GUID,
    ppv_object: *mut *mut c_void,
) -> HRESULT {
    // No host managers are provided; the runtime falls back to its defaults.
    if !ppv_object.is_null() {
        unsafe { *ppv_object = std::ptr::null_mut() };
    }
    E_NOINTERFACE
}

unsafe extern "system" fn host_control_set_app_domain_manager(
    this: *mut IHostControl,
    app_domain_id: u32,
    manager: *mut RawUnknown,
) -> HRESULT {
    let control = unsafe { &*(this as *const BridgeHostControl) };
    match unsafe { ComPtr::from_borrowed(manager) } {
        Some(manager) => {
            control.callback.record(app_domain_id, manager);
            S_OK
        }
        None => E_POINTER,
    }
}
