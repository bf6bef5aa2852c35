//! Portable status codes for the native/managed boundary.
//!
//! Every boundary call reports a 32-bit HRESULT. The bridge never remaps these
//! codes: whatever the runtime or the managed extension returns is what the
//! debugger host receives.

use std::fmt;

/// A 32-bit HRESULT status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub i32);

impl Status {
    pub const S_OK: Status = Status(0);
    pub const S_FALSE: Status = Status(1);
    pub const E_FAIL: Status = Status(0x80004005_u32 as i32);
    pub const E_UNEXPECTED: Status = Status(0x8000FFFF_u32 as i32);
    pub const E_POINTER: Status = Status(0x80004003_u32 as i32);
    pub const E_NOINTERFACE: Status = Status(0x80004002_u32 as i32);
    pub const E_INVALIDARG: Status = Status(0x80070057_u32 as i32);
    pub const E_OUTOFMEMORY: Status = Status(0x8007000E_u32 as i32);
    /// `ERROR_FILE_NOT_FOUND` as an HRESULT, raised by the runtime for missing assemblies.
    pub const COR_E_FILENOTFOUND: Status = Status(0x80070002_u32 as i32);
    /// `ERROR_BAD_FORMAT` as an HRESULT, raised for images without a CLR header.
    pub const COR_E_BADIMAGEFORMAT: Status = Status(0x8007000B_u32 as i32);
    /// Generic managed exception.
    pub const COR_E_EXCEPTION: Status = Status(0x80131500_u32 as i32);
    pub const COR_E_TYPELOAD: Status = Status(0x80131522_u32 as i32);
    /// No usable runtime is installed.
    pub const HOST_E_CLRNOTAVAILABLE: Status = Status(0x80131023_u32 as i32);
    pub const DISP_E_UNKNOWNNAME: Status = Status(0x80020006_u32 as i32);
    pub const DISP_E_EXCEPTION: Status = Status(0x80020009_u32 as i32);

    /// Success codes have the severity bit clear.
    pub const fn is_ok(self) -> bool {
        self.0 >= 0
    }

    pub const fn is_err(self) -> bool {
        !self.is_ok()
    }

    /// Raw value as handed to the host.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Facility field of the code (7 = Win32, 19 = CLR).
    pub const fn facility(self) -> u16 {
        ((self.0 as u32 >> 16) & 0x1FFF) as u16
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::S_OK
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

impl From<i32> for Status {
    fn from(code: i32) -> Self {
        Status(code)
    }
}

#[cfg(windows)]
impl From<windows::core::HRESULT> for Status {
    fn from(hr: windows::core::HRESULT) -> Self {
        Status(hr.0)
    }
}

#[cfg(windows)]
impl From<Status> for windows::core::HRESULT {
    fn from(status: Status) -> Self {
        windows::core::HRESULT(status.0)
    }
}
