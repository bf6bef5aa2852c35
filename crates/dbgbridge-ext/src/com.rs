//! Owning pointer for raw COM interfaces.

use crate::clr_host::{RawUnknown, RawUnknownVtbl};
use std::ffi::c_void;
use std::ptr::NonNull;
use windows::core::{GUID, HRESULT};

/// Holds one reference to a COM object. Dropping it calls `Release`.
///
/// `T` is one of the `#[repr(C)]` interface structs from `clr_host`, all of
/// which start with a vtable whose first three slots are IUnknown's.
pub struct ComPtr<T> {
    ptr: NonNull<T>,
}

// The CLR hosting interfaces and the managed objects behind them are free-threaded.
unsafe impl<T> Send for ComPtr<T> {}

impl<T> ComPtr<T> {
    /// Take ownership of a reference returned through an out-parameter.
    ///
    /// # Safety
    /// `ptr` must be null or a live COM interface pointer whose reference the caller owns.
    pub unsafe fn from_raw(ptr: *mut T) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr })
    }

    /// # Safety
    /// `ptr` must be a live COM interface pointer whose reference the caller owns.
    pub unsafe fn from_non_null(ptr: NonNull<T>) -> Self {
        Self { ptr }
    }

    /// Add a reference to a pointer the caller does not own.
    ///
    /// # Safety
    /// `ptr` must be null or a live COM interface pointer.
    pub unsafe fn from_borrowed(ptr: *mut T) -> Option<Self> {
        let this = unsafe { Self::from_raw(ptr) }?;
        unsafe { ((*this.vtbl()).add_ref)(this.unknown()) };
        Some(this)
    }

    pub fn as_ptr(&self) -> *mut T {
        self.ptr.as_ptr()
    }

    fn unknown(&self) -> *mut RawUnknown {
        self.ptr.as_ptr() as *mut RawUnknown
    }

    fn vtbl(&self) -> *const RawUnknownVtbl {
        unsafe { (*self.unknown()).vtbl }
    }

    /// `QueryInterface` for another interface of the same object.
    pub fn query<U>(&self, iid: &GUID) -> Result<ComPtr<U>, HRESULT> {
        let mut out: *mut c_void = std::ptr::null_mut();
        let hr = unsafe { ((*self.vtbl()).query_interface)(self.unknown(), iid, &mut out) };
        if hr.is_err() {
            return Err(hr);
        }
        unsafe { ComPtr::from_raw(out as *mut U) }.ok_or(windows::Win32::Foundation::E_POINTER)
    }
}

impl<T> Clone for ComPtr<T> {
    fn clone(&self) -> Self {
        unsafe { ((*self.vtbl()).add_ref)(self.unknown()) };
        Self { ptr: self.ptr }
    }
}

impl<T> Drop for ComPtr<T> {
    fn drop(&mut self) {
        unsafe { ((*self.vtbl()).release)(self.unknown()) };
    }
}

impl<T> std::fmt::Debug for ComPtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ComPtr({:p})", self.ptr)
    }
}
