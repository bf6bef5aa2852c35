//! Debugger extension DLL that hosts the CLR and forwards commands to a managed extension.
//!
//! The host loads this module, calls `DebugExtensionInitialize` once, then
//! issues `execute`, `interactive`, `interpret` and `openui` commands. Each
//! command's raw argument text is marshaled into the managed entry object.

#[cfg(windows)]
mod backend;
#[cfg(windows)]
mod clr_host;
#[cfg(windows)]
mod com;
#[cfg(windows)]
mod context;
#[cfg(windows)]
mod error_info;
#[cfg(windows)]
mod executor;
#[cfg(windows)]
mod host_control;
#[cfg(windows)]
mod marshal;

#[cfg(windows)]
pub use backend::{ClrBackend, ClrDomain};
#[cfg(windows)]
pub use executor::DispatchEntry;
#[cfg(windows)]
pub use marshal::{Bstr, SafeArrayBuffer};

#[cfg(windows)]
mod exports {
    use crate::backend::ClrBackend;
    use crate::context;
    use dbgbridge_shared::config::{EXTENSION_VERSION_MAJOR, EXTENSION_VERSION_MINOR};
    use dbgbridge_shared::{Bridge, HostClient, Result, Teardown, debug_extension_version, logging};
    use std::ffi::{CStr, c_void};
    use windows::Win32::Foundation::S_OK;
    use windows::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};
    use windows::core::{HRESULT, PCSTR};

    /// DLL entry point for Windows.
    #[unsafe(no_mangle)]
    pub unsafe extern "system" fn DllMain(
        hinst_dll: *mut c_void,
        fdw_reason: u32,
        lpv_reserved: *mut c_void,
    ) -> i32 {
        match fdw_reason {
            DLL_PROCESS_ATTACH => context::attach(hinst_dll),
            // A non-null reserved pointer means the process is exiting and the runtime may already be gone.
            // Managed code must not run under the loader lock, so the entry object is only abandoned.
            DLL_PROCESS_DETACH if lpv_reserved.is_null() => {
                if let Some(bridge) = context::existing_bridge() {
                    bridge.detach();
                }
            }
            _ => {}
        }

        1 // TRUE
    }

    #[unsafe(no_mangle)]
    pub unsafe extern "system" fn DebugExtensionInitialize(
        version: *mut u32,
        flags: *mut u32,
    ) -> HRESULT {
        logging::init("info");

        unsafe {
            if !version.is_null() {
                *version = debug_extension_version(EXTENSION_VERSION_MAJOR, EXTENSION_VERSION_MINOR);
            }
            if !flags.is_null() {
                *flags = 0;
            }
        }

        let bridge = context::bridge();
        let assembly = bridge.config().assembly_path(&context::module_dir());
        tracing::info!("Loading extension assembly {}", assembly.display());

        status(bridge.initialize(ClrBackend::default(), &assembly))
    }

    #[unsafe(no_mangle)]
    pub extern "system" fn DebugExtensionUninitialize() {
        let Some(bridge) = context::existing_bridge() else {
            return;
        };
        if bridge.config().async_teardown {
            context::pin_module();
        }

        match bridge.uninitialize(true) {
            Teardown::Done(failures) if failures.is_empty() => tracing::info!("Bridge torn down"),
            Teardown::Done(failures) => {
                tracing::warn!("Bridge torn down with {} failure(s)", failures.len());
            }
            Teardown::Pending(_) => tracing::info!("Runtime teardown continues in the background"),
        }
    }

    #[unsafe(no_mangle)]
    pub unsafe extern "system" fn execute(client: *mut c_void, args: PCSTR) -> HRESULT {
        unsafe { command(client, args, Bridge::execute) }
    }

    #[unsafe(no_mangle)]
    pub unsafe extern "system" fn interactive(client: *mut c_void, args: PCSTR) -> HRESULT {
        unsafe { command(client, args, Bridge::enter_interactive_mode) }
    }

    #[unsafe(no_mangle)]
    pub unsafe extern "system" fn interpret(client: *mut c_void, args: PCSTR) -> HRESULT {
        unsafe { command(client, args, Bridge::interpret) }
    }

    #[unsafe(no_mangle)]
    pub unsafe extern "system" fn openui(client: *mut c_void, args: PCSTR) -> HRESULT {
        unsafe { command(client, args, Bridge::open_ui) }
    }

    unsafe fn command(
        client: *mut c_void,
        args: PCSTR,
        run: fn(&Bridge<ClrBackend>, HostClient, &str) -> Result<()>,
    ) -> HRESULT {
        let text = if args.is_null() {
            String::new()
        } else {
            unsafe { CStr::from_ptr(args.0 as *const _) }
                .to_string_lossy()
                .into_owned()
        };
        status(run(context::bridge(), HostClient::from_raw(client), &text))
    }

    fn status(result: Result<()>) -> HRESULT {
        match result {
            Ok(()) => S_OK,
            Err(e) => HRESULT(e.status().0),
        }
    }
}
