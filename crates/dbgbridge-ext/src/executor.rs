//! Late-bound entry object.
//!
//! The extension's entry type is reached through IDispatch: member ids are
//! looked up by name once, then every command is an `Invoke` with the
//! arguments in reverse order, as automation expects.

use crate::clr_host::*;
use crate::com::ComPtr;
use crate::error_info::{capture_rich_error, check};
use crate::marshal::{Bstr, SafeArrayBuffer};
use dbgbridge_shared::{
    BoundaryFailure, EntryObject, ErrorKind, HostClient, Result, RichError, Status,
};
use std::ffi::c_void;
use windows::Win32::Foundation::DISP_E_EXCEPTION;
use windows::Win32::System::Variant::{VARIANT, VariantClear};
use windows::core::{GUID, PCWSTR};

const INITIALIZE_CONTEXT: &str = "InitializeContext";
const EXECUTE_SCRIPT: &str = "ExecuteScript";
/// COM name of the single-string `ExecuteScript` overload.
const EXECUTE_SCRIPT_TEXT: &str = "ExecuteScript_2";
const ENTER_INTERACTIVE_MODE: &str = "EnterInteractiveMode";
const INTERPRET: &str = "Interpret";
const OPEN_UI: &str = "OpenUI";

pub struct DispatchEntry {
    dispatch: ComPtr<IDispatch>,
    initialize_context: i32,
    execute_script: i32,
    execute_script_text: i32,
    enter_interactive_mode: i32,
    interpret: i32,
    open_ui: Option<i32>,
}

impl DispatchEntry {
    /// Narrow an instance to the command-dispatch capability.
    pub fn bind(object: &ComPtr<RawUnknown>) -> Result<Self> {
        let dispatch: ComPtr<IDispatch> = object.query(&IID_IDISPATCH).map_err(|hr| {
            ErrorKind::Instantiation.failure(hr.into(), "QueryInterface(IDispatch)")
        })?;

        let id = |name: &str| dispatch_id(&dispatch, name);
        Ok(Self {
            initialize_context: id(INITIALIZE_CONTEXT)?,
            execute_script: id(EXECUTE_SCRIPT)?,
            execute_script_text: id(EXECUTE_SCRIPT_TEXT)?,
            enter_interactive_mode: id(ENTER_INTERACTIVE_MODE)?,
            interpret: id(INTERPRET)?,
            open_ui: id(OPEN_UI).ok(),
            dispatch,
        })
    }

    fn invoke(&self, name: &str, member: i32, args: &mut [RawVariant]) -> Result<()> {
        // Automation passes arguments last to first.
        args.reverse();
        let mut params = DispParams {
            rgvarg: args.as_mut_ptr(),
            rgdispid_named_args: std::ptr::null_mut(),
            c_args: args.len() as u32,
            c_named_args: 0,
        };
        let mut result = RawVariant::empty();
        let mut excep = ExcepInfo::default();
        let mut arg_err = 0u32;

        let raw = self.dispatch.as_ptr();
        let hr = unsafe {
            ((*(*raw).vtbl).invoke)(
                raw,
                member,
                &GUID::zeroed(),
                0,
                DISPATCH_METHOD,
                &mut params,
                &mut result,
                &mut excep,
                &mut arg_err,
            )
        };
        unsafe {
            let _ = VariantClear(&mut result as *mut RawVariant as *mut VARIANT);
        }

        if hr == DISP_E_EXCEPTION {
            return Err(exception_failure(name, &mut excep));
        }
        check(hr, ErrorKind::Invocation, name)
    }
}

fn dispatch_id(dispatch: &ComPtr<IDispatch>, name: &str) -> Result<i32> {
    let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
    let names = [PCWSTR(wide.as_ptr())];
    let mut id = DISPID_UNKNOWN;

    let raw = dispatch.as_ptr();
    let hr = unsafe {
        ((*(*raw).vtbl).get_ids_of_names)(raw, &GUID::zeroed(), names.as_ptr(), 1, 0, &mut id)
    };
    check(hr, ErrorKind::Instantiation, &format!("GetIDsOfNames({})", name))?;
    Ok(id)
}

/// Status and message of a managed exception raised through `Invoke`.
fn exception_failure(name: &str, excep: &mut ExcepInfo) -> dbgbridge_shared::Error {
    if let Some(fill) = excep.pfn_deferred_fill_in {
        unsafe { fill(excep) };
    }

    let status = if excep.scode != 0 {
        Status(excep.scode)
    } else {
        Status::DISP_E_EXCEPTION
    };
    let text = |b: &windows::core::BSTR| Some(b.to_string()).filter(|s| !s.trim().is_empty());

    let rich = merge_exception_info(
        text(&excep.bstr_description),
        text(&excep.bstr_source),
        capture_rich_error(),
    );
    ErrorKind::Invocation.wrap(BoundaryFailure::new(status, name).with_rich(Some(rich)))
}

/// Combine `EXCEPINFO` text with the thread's error object.
///
/// The error object carries `Exception.ToString()`, stack trace included,
/// which beats the bare source name.
fn merge_exception_info(
    description: Option<String>,
    source: Option<String>,
    captured: Option<RichError>,
) -> RichError {
    let captured = captured.unwrap_or_default();
    RichError {
        description: description.or(captured.description),
        details: captured
            .details
            .or_else(|| source.map(|source| format!("Source: {}", source))),
    }
}

impl EntryObject for DispatchEntry {
    type Array = SafeArrayBuffer;
    type Text = Bstr;

    fn initialize_context(&self, client: HostClient) -> Result<()> {
        let mut args = [RawVariant::borrowed(VT_UNKNOWN, client.as_raw())];
        self.invoke(INITIALIZE_CONTEXT, self.initialize_context, &mut args)
    }

    fn execute_script(&self, script: &Bstr, args: &SafeArrayBuffer) -> Result<()> {
        let mut params = [
            script.as_variant(),
            RawVariant::borrowed(VT_ARRAY | VT_BSTR, args.as_ptr() as *mut c_void),
        ];
        self.invoke(EXECUTE_SCRIPT, self.execute_script, &mut params)
    }

    fn execute_script_text(&self, text: &Bstr) -> Result<()> {
        self.invoke(EXECUTE_SCRIPT_TEXT, self.execute_script_text, &mut [text.as_variant()])
    }

    fn enter_interactive_mode(&self, text: &Bstr) -> Result<()> {
        self.invoke(ENTER_INTERACTIVE_MODE, self.enter_interactive_mode, &mut [text.as_variant()])
    }

    fn interpret(&self, code: &Bstr) -> Result<()> {
        self.invoke(INTERPRET, self.interpret, &mut [code.as_variant()])
    }

    fn open_ui(&self, text: &Bstr) -> Result<()> {
        let member = self.open_ui.ok_or_else(|| {
            ErrorKind::Invocation.failure(Status::DISP_E_UNKNOWNNAME, "GetIDsOfNames(OpenUI)")
        })?;
        self.invoke(OPEN_UI, member, &mut [text.as_variant()])
    }
}
