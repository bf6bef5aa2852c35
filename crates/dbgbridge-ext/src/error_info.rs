//! Status checks for boundary calls, with rich error capture.

use crate::clr_host::{Exception, IID_EXCEPTION};
use crate::com::ComPtr;
use dbgbridge_shared::{BoundaryFailure, ErrorKind, Result, RichError, Status};
use std::ffi::c_void;
use windows::Win32::System::Com::IErrorInfo;
use windows::Win32::System::Ole::GetErrorInfo;
use windows::core::{BSTR, HRESULT, Interface};

/// Pick up the thread's error object left by the call that just failed.
pub fn capture_rich_error() -> Option<RichError> {
    let info = unsafe { GetErrorInfo(0) }.ok()?;

    let description = unsafe { info.GetDescription() }
        .ok()
        .map(|d| d.to_string())
        .filter(|d| !d.trim().is_empty());

    Some(RichError {
        description,
        details: exception_text(&info),
    })
}

/// `Exception.ToString()` when the error object is a managed exception.
fn exception_text(info: &IErrorInfo) -> Option<String> {
    let mut raw: *mut c_void = std::ptr::null_mut();
    let hr = unsafe { info.query(&IID_EXCEPTION, &mut raw) };
    if hr.is_err() {
        return None;
    }
    let exception = unsafe { ComPtr::from_raw(raw as *mut Exception) }?;

    let mut text = BSTR::default();
    let hr = unsafe { ((*(*exception.as_ptr()).vtbl).get_to_string)(exception.as_ptr(), &mut text) };
    (hr.is_ok() && !text.is_empty()).then(|| text.to_string())
}

/// Turn a failed HRESULT into a bridge error of `kind`.
pub fn check(hr: HRESULT, kind: ErrorKind, expression: &str) -> Result<()> {
    if hr.is_ok() {
        return Ok(());
    }
    Err(kind.wrap(
        BoundaryFailure::new(Status::from(hr), expression).with_rich(capture_rich_error()),
    ))
}

/// Run a call that returns an interface through an out-parameter.
pub fn acquire<T>(
    kind: ErrorKind,
    expression: &str,
    call: impl FnOnce(*mut *mut c_void) -> HRESULT,
) -> Result<ComPtr<T>> {
    let mut raw: *mut c_void = std::ptr::null_mut();
    check(call(&mut raw), kind, expression)?;
    unsafe { ComPtr::from_raw(raw as *mut T) }.ok_or_else(|| {
        kind.failure(Status::E_POINTER, format!("{} returned a null interface", expression))
    })
}
