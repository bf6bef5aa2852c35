//! The process-wide bridge context and the module it lives in.
//!
//! Every exported entry point reaches the bridge through [`bridge`]. The
//! context is created on process attach and released down to its fast
//! teardown path on process detach.

use crate::backend::ClrBackend;
use dbgbridge_shared::{Bridge, BridgeConfig};
use std::ffi::c_void;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use windows::Win32::Foundation::HMODULE;
use windows::Win32::System::LibraryLoader::{
    GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS, GET_MODULE_HANDLE_EX_FLAG_PIN, GetModuleFileNameW,
    GetModuleHandleExW,
};
use windows::core::PCWSTR;

static MODULE: AtomicUsize = AtomicUsize::new(0);
static BRIDGE: OnceLock<Bridge<ClrBackend>> = OnceLock::new();

/// Remember the handle the loader gave us.
pub fn attach(module: *mut c_void) {
    MODULE.store(module as usize, Ordering::Release);
    bridge();
}

/// The bridge, created from `DBGBRIDGE_*` settings on first use.
pub fn bridge() -> &'static Bridge<ClrBackend> {
    BRIDGE.get_or_init(|| Bridge::new(BridgeConfig::from_env()))
}

/// The bridge, if anything ever created it.
pub fn existing_bridge() -> Option<&'static Bridge<ClrBackend>> {
    BRIDGE.get()
}

fn module() -> Option<HMODULE> {
    match MODULE.load(Ordering::Acquire) {
        0 => None,
        raw => Some(HMODULE(raw as *mut c_void)),
    }
}

/// Directory holding this DLL. Relative assembly paths resolve against it.
pub fn module_dir() -> PathBuf {
    let mut buffer = vec![0u16; 260];
    loop {
        let len = unsafe { GetModuleFileNameW(module(), &mut buffer) } as usize;
        if len == 0 {
            tracing::warn!("GetModuleFileNameW failed, using the working directory");
            return std::env::current_dir().unwrap_or_default();
        }
        if len < buffer.len() {
            let path = PathBuf::from(String::from_utf16_lossy(&buffer[..len]));
            return path.parent().map(PathBuf::from).unwrap_or_default();
        }
        // Truncated
        buffer.resize(buffer.len() * 2, 0);
    }
}

/// Keep this DLL mapped for the rest of the process.
///
/// The teardown worker may still be running when the host frees the
/// extension, so its code has to outlive the unload.
pub fn pin_module() {
    let mut handle = HMODULE::default();
    let address = pin_module as *const () as *const u16;
    let pinned = unsafe {
        GetModuleHandleExW(
            GET_MODULE_HANDLE_EX_FLAG_PIN | GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
            PCWSTR(address),
            &mut handle,
        )
    };
    match pinned {
        Ok(()) => tracing::debug!("Module pinned for asynchronous teardown"),
        Err(e) => tracing::warn!("Failed to pin module: {}", e),
    }
}
