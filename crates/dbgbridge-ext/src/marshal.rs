//! SAFEARRAY and BSTR boundary representations.

use crate::clr_host::{RawVariant, VT_BSTR as VT_BSTR_RAW, VT_VARIANT};
use dbgbridge_shared::{BoundaryArray, BoundaryString, ErrorKind, Result, Status};
use std::ffi::c_void;
use std::ptr::NonNull;
use windows::Win32::System::Com::SAFEARRAY;
use windows::Win32::System::Ole::{
    SafeArrayCreateVector, SafeArrayDestroy, SafeArrayGetElement, SafeArrayPutElement,
};
use windows::Win32::System::Variant::{VARENUM, VT_BSTR};
use windows::core::BSTR;

fn array_error(expression: String, e: windows::core::Error) -> dbgbridge_shared::Error {
    ErrorKind::Invocation.failure(Status::from(e.code()), expression)
}

/// One-dimensional, zero-based SAFEARRAY. Dropping it destroys the array and its elements.
pub struct SafeArrayBuffer {
    array: NonNull<SAFEARRAY>,
    len: usize,
}

unsafe impl Send for SafeArrayBuffer {}

impl SafeArrayBuffer {
    fn create(vt: VARENUM, len: usize) -> Result<Self> {
        let count = u32::try_from(len).map_err(|_| {
            ErrorKind::Invocation.failure(Status::E_INVALIDARG, format!("SafeArrayCreateVector({})", len))
        })?;
        let raw = unsafe { SafeArrayCreateVector(vt, 0, count) };
        let array = NonNull::new(raw).ok_or_else(|| {
            ErrorKind::Invocation.failure(Status::E_OUTOFMEMORY, format!("SafeArrayCreateVector({})", len))
        })?;
        Ok(Self { array, len })
    }

    /// A VARIANT array holding one borrowed VARIANT per element, copied in by the array.
    pub fn of_variants(values: &[RawVariant]) -> Result<Self> {
        let array = Self::create(VARENUM(VT_VARIANT), values.len())?;
        for (index, value) in values.iter().enumerate() {
            let slot = index as i32;
            unsafe {
                SafeArrayPutElement(
                    array.as_ptr(),
                    &slot,
                    value as *const RawVariant as *const c_void,
                )
            }
            .map_err(|e| array_error(format!("SafeArrayPutElement[{}]", index), e))?;
        }
        Ok(array)
    }

    pub fn as_ptr(&self) -> *mut SAFEARRAY {
        self.array.as_ptr()
    }

    fn check_index(&self, index: usize) -> Result<i32> {
        if index >= self.len {
            return Err(ErrorKind::Invocation.failure(
                Status::E_INVALIDARG,
                format!("boundary array index {} (length {})", index, self.len),
            ));
        }
        Ok(index as i32)
    }
}

impl BoundaryArray for SafeArrayBuffer {
    fn allocate(len: usize) -> Result<Self> {
        Self::create(VT_BSTR, len)
    }

    fn put(&mut self, index: usize, text: &str) -> Result<()> {
        let slot = self.check_index(index)?;
        let value = BSTR::from(text);
        // The array stores its own copy of the string.
        unsafe { SafeArrayPutElement(self.as_ptr(), &slot, value.as_ptr() as *const c_void) }
            .map_err(|e| array_error(format!("SafeArrayPutElement[{}]", index), e))
    }

    fn get(&self, index: usize) -> Result<String> {
        let slot = self.check_index(index)?;
        let mut value = BSTR::default();
        unsafe {
            SafeArrayGetElement(
                self.as_ptr(),
                &slot,
                &mut value as *mut BSTR as *mut c_void,
            )
        }
        .map_err(|e| array_error(format!("SafeArrayGetElement[{}]", index), e))?;
        Ok(value.to_string())
    }

    fn len(&self) -> usize {
        self.len
    }
}

impl Drop for SafeArrayBuffer {
    fn drop(&mut self) {
        if let Err(e) = unsafe { SafeArrayDestroy(self.as_ptr()) } {
            tracing::warn!("SafeArrayDestroy failed: {}", e);
        }
    }
}

/// Owned BSTR passed as a single string argument.
#[derive(Debug, Default)]
pub struct Bstr(BSTR);

impl Bstr {
    pub fn as_raw(&self) -> *const u16 {
        self.0.as_ptr()
    }

    /// VARIANT that borrows this string.
    pub fn as_variant(&self) -> RawVariant {
        RawVariant::borrowed(VT_BSTR_RAW, self.as_raw() as *mut c_void)
    }
}

impl BoundaryString for Bstr {
    fn from_text(text: &str) -> Result<Self> {
        Ok(Self(BSTR::from(text)))
    }

    fn to_text(&self) -> String {
        self.0.to_string()
    }
}
