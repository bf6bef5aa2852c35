//! CLR hosting and reflection interfaces.
//!
//! These interfaces are not included in the windows crate, so we define them manually.
//! In-parameters that take a BSTR are declared as raw `*const u16` so the caller
//! keeps ownership of the string.

#![allow(dead_code)]

use std::ffi::c_void;
use windows::Win32::System::Com::SAFEARRAY;
use windows::core::{BSTR, GUID, HRESULT, PCWSTR};

// GUIDs for CLR hosting
pub const CLSID_CLR_META_HOST: GUID = GUID::from_u128(0x9280188d_0e8e_4867_b30c_7fa83884e8de);
pub const IID_ICLR_META_HOST: GUID = GUID::from_u128(0xD332DB9E_B9B3_4125_8207_A14884F53216);
pub const CLSID_CLR_META_HOST_POLICY: GUID =
    GUID::from_u128(0x2EBCD49A_1B47_4A61_B13A_4A03701E594B);
pub const IID_ICLR_META_HOST_POLICY: GUID =
    GUID::from_u128(0xE2190695_77B2_492e_8E14_C4B3A7FDD593);
pub const IID_ICLR_RUNTIME_INFO: GUID = GUID::from_u128(0xBD39D1D2_BA2F_486a_89B0_B4B0CB466891);
pub const CLSID_COR_RUNTIME_HOST: GUID = GUID::from_u128(0xcb2f6723_ab3a_11d2_9c40_00c04fa30a3e);
pub const IID_ICOR_RUNTIME_HOST: GUID = GUID::from_u128(0xcb2f6722_ab3a_11d2_9c40_00c04fa30a3e);
pub const CLSID_CLR_RUNTIME_HOST: GUID = GUID::from_u128(0x90F1A06E_7712_4762_86B5_7A5EBA6BDB02);
pub const IID_ICLR_RUNTIME_HOST: GUID = GUID::from_u128(0x90F1A06C_7712_4762_86B5_7A5EBA6BDB02);
pub const IID_IHOST_CONTROL: GUID = GUID::from_u128(0x02CA073C_7079_4860_880A_C2F7A449C991);

// GUIDs for mscorlib COM-visible types
pub const IID_APP_DOMAIN: GUID = GUID::from_u128(0x05F696DC_2B29_3663_AD8B_C4389CF2A713);
pub const IID_EXCEPTION: GUID = GUID::from_u128(0xb36b5c63_42ef_38bc_a07e_0b34c98f164a);

// GUIDs for COM base interfaces
pub const IID_IUNKNOWN: GUID = GUID::from_u128(0x00000000_0000_0000_C000_000000000046);
pub const IID_IDISPATCH: GUID = GUID::from_u128(0x00020400_0000_0000_C000_000000000046);

/// `METAHOST_POLICY_HIGHCOMPAT`: pick the highest compatible installed runtime.
pub const METAHOST_POLICY_HIGHCOMPAT: u32 = 0x4;

/// `BindingFlags.InvokeMethod | BindingFlags.Static | BindingFlags.Public`.
pub const BINDING_FLAGS_STATIC_METHOD: i32 = 0x100 | 0x8 | 0x10;

pub const DISPATCH_METHOD: u16 = 0x1;
pub const DISPID_UNKNOWN: i32 = -1;

// VARTYPE values
pub const VT_EMPTY: u16 = 0;
pub const VT_DISPATCH: u16 = 9;
pub const VT_UNKNOWN: u16 = 13;
pub const VT_BSTR: u16 = 8;
pub const VT_VARIANT: u16 = 12;
pub const VT_ARRAY: u16 = 0x2000;

// Function pointer types for mscoree.dll exports
pub type CLRCreateInstanceFn = unsafe extern "system" fn(
    clsid: *const GUID,
    riid: *const GUID,
    ppinterface: *mut *mut c_void,
) -> HRESULT;

/// Any COM object, seen through IUnknown only.
#[repr(C)]
pub struct RawUnknownVtbl {
    pub query_interface:
        unsafe extern "system" fn(*mut RawUnknown, *const GUID, *mut *mut c_void) -> HRESULT,
    pub add_ref: unsafe extern "system" fn(*mut RawUnknown) -> u32,
    pub release: unsafe extern "system" fn(*mut RawUnknown) -> u32,
}

#[repr(C)]
pub struct RawUnknown {
    pub vtbl: *const RawUnknownVtbl,
}

/// VARIANT with the layout of the OLE automation type.
///
/// Only the pointer-sized payloads the bridge uses are named.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawVariant {
    pub vt: u16,
    pub reserved: [u16; 3],
    pub value: RawVariantValue,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union RawVariantValue {
    pub ptr: *mut c_void,
    pub int: i64,
    pub record: [*mut c_void; 2],
}

impl RawVariant {
    pub const fn empty() -> Self {
        Self {
            vt: VT_EMPTY,
            reserved: [0; 3],
            value: RawVariantValue { record: [std::ptr::null_mut(); 2] },
        }
    }

    /// Variant that borrows `ptr`; it must never be passed to `VariantClear`.
    pub const fn borrowed(vt: u16, ptr: *mut c_void) -> Self {
        let mut variant = Self::empty();
        variant.vt = vt;
        variant.value = RawVariantValue { record: [ptr, std::ptr::null_mut()] };
        variant
    }

    pub fn pointer(&self) -> *mut c_void {
        unsafe { self.value.ptr }
    }
}

#[repr(C)]
pub struct DispParams {
    pub rgvarg: *mut RawVariant,
    pub rgdispid_named_args: *mut i32,
    pub c_args: u32,
    pub c_named_args: u32,
}

#[repr(C)]
pub struct ExcepInfo {
    pub w_code: u16,
    pub w_reserved: u16,
    pub bstr_source: BSTR,
    pub bstr_description: BSTR,
    pub bstr_help_file: BSTR,
    pub dw_help_context: u32,
    pub pv_reserved: *mut c_void,
    pub pfn_deferred_fill_in: Option<unsafe extern "system" fn(*mut ExcepInfo) -> HRESULT>,
    pub scode: i32,
}

impl Default for ExcepInfo {
    fn default() -> Self {
        Self {
            w_code: 0,
            w_reserved: 0,
            bstr_source: BSTR::default(),
            bstr_description: BSTR::default(),
            bstr_help_file: BSTR::default(),
            dw_help_context: 0,
            pv_reserved: std::ptr::null_mut(),
            pfn_deferred_fill_in: None,
            scode: 0,
        }
    }
}

// ICLRMetaHost, through EnumerateInstalledRuntimes
#[repr(C)]
pub struct ICLRMetaHostVtbl {
    pub base: RawUnknownVtbl,
    pub get_runtime:
        unsafe extern "system" fn(*mut ICLRMetaHost, PCWSTR, *const GUID, *mut *mut c_void) -> HRESULT,
    pub get_version_from_file:
        unsafe extern "system" fn(*mut ICLRMetaHost, PCWSTR, *mut u16, *mut u32) -> HRESULT,
    pub enumerate_installed_runtimes:
        unsafe extern "system" fn(*mut ICLRMetaHost, *mut *mut IEnumUnknown) -> HRESULT,
}

#[repr(C)]
pub struct ICLRMetaHost {
    pub vtbl: *const ICLRMetaHostVtbl,
}

// ICLRMetaHostPolicy interface
#[repr(C)]
pub struct ICLRMetaHostPolicyVtbl {
    pub base: RawUnknownVtbl,
    // ICLRMetaHostPolicy
    pub get_requested_runtime: unsafe extern "system" fn(
        *mut ICLRMetaHostPolicy,
        u32,           // dwPolicyFlags
        PCWSTR,        // pwzBinary
        *mut c_void,   // pCfgStream
        *mut u16,      // pwzVersion
        *mut u32,      // pcchVersion
        *mut u16,      // pwzImageVersion
        *mut u32,      // pcchImageVersion
        *mut u32,      // pdwConfigFlags
        *const GUID,   // riid
        *mut *mut c_void,
    ) -> HRESULT,
}

#[repr(C)]
pub struct ICLRMetaHostPolicy {
    pub vtbl: *const ICLRMetaHostPolicyVtbl,
}

// IEnumUnknown interface
#[repr(C)]
pub struct IEnumUnknownVtbl {
    pub base: RawUnknownVtbl,
    pub next: unsafe extern "system" fn(
        *mut IEnumUnknown,
        u32,
        *mut *mut RawUnknown,
        *mut u32,
    ) -> HRESULT,
    pub skip: unsafe extern "system" fn(*mut IEnumUnknown, u32) -> HRESULT,
    pub reset: unsafe extern "system" fn(*mut IEnumUnknown) -> HRESULT,
    pub clone: unsafe extern "system" fn(*mut IEnumUnknown, *mut *mut IEnumUnknown) -> HRESULT,
}

#[repr(C)]
pub struct IEnumUnknown {
    pub vtbl: *const IEnumUnknownVtbl,
}

// ICLRRuntimeInfo, through BindAsLegacyV2Runtime
#[repr(C)]
pub struct ICLRRuntimeInfoVtbl {
    pub base: RawUnknownVtbl,
    pub get_version_string:
        unsafe extern "system" fn(*mut ICLRRuntimeInfo, *mut u16, *mut u32) -> HRESULT,
    // GetRuntimeDirectory, IsLoaded, LoadErrorString, LoadLibrary, GetProcAddress
    pub reserved_1: [*const c_void; 5],
    pub get_interface: unsafe extern "system" fn(
        *mut ICLRRuntimeInfo,
        *const GUID, // rclsid
        *const GUID, // riid
        *mut *mut c_void,
    ) -> HRESULT,
    // IsLoadable, SetDefaultStartupFlags, GetDefaultStartupFlags
    pub reserved_2: [*const c_void; 3],
    pub bind_as_legacy_v2_runtime: unsafe extern "system" fn(*mut ICLRRuntimeInfo) -> HRESULT,
}

#[repr(C)]
pub struct ICLRRuntimeInfo {
    pub vtbl: *const ICLRRuntimeInfoVtbl,
}

// ICLRRuntimeHost interface (only the control-channel part is used)
#[repr(C)]
pub struct ICLRRuntimeHostVtbl {
    pub base: RawUnknownVtbl,
    // ICLRRuntimeHost
    pub start: unsafe extern "system" fn(*mut ICLRRuntimeHost) -> HRESULT,
    pub stop: unsafe extern "system" fn(*mut ICLRRuntimeHost) -> HRESULT,
    pub set_host_control:
        unsafe extern "system" fn(*mut ICLRRuntimeHost, *mut IHostControl) -> HRESULT,
    pub get_clr_control:
        unsafe extern "system" fn(*mut ICLRRuntimeHost, *mut *mut c_void) -> HRESULT,
}

#[repr(C)]
pub struct ICLRRuntimeHost {
    pub vtbl: *const ICLRRuntimeHostVtbl,
}

// IHostControl interface (implemented by the bridge)
#[repr(C)]
pub struct IHostControlVtbl {
    // IUnknown
    pub query_interface:
        unsafe extern "system" fn(*mut IHostControl, *const GUID, *mut *mut c_void) -> HRESULT,
    pub add_ref: unsafe extern "system" fn(*mut IHostControl) -> u32,
    pub release: unsafe extern "system" fn(*mut IHostControl) -> u32,
    // IHostControl
    pub get_host_manager:
        unsafe extern "system" fn(*mut IHostControl, *const GUID, *mut *mut c_void) -> HRESULT,
    pub set_app_domain_manager:
        unsafe extern "system" fn(*mut IHostControl, u32, *mut RawUnknown) -> HRESULT,
}

#[repr(C)]
pub struct IHostControl {
    pub vtbl: *const IHostControlVtbl,
}

// ICorRuntimeHost, through UnloadDomain
#[repr(C)]
pub struct ICorRuntimeHostVtbl {
    pub base: RawUnknownVtbl,
    // Logical thread state, MapFile, GetConfiguration
    pub reserved_1: [*const c_void; 7],
    pub start: unsafe extern "system" fn(*mut ICorRuntimeHost) -> HRESULT,
    pub stop: unsafe extern "system" fn(*mut ICorRuntimeHost) -> HRESULT,
    // CreateDomain, GetDefaultDomain and the domain enumerator
    pub reserved_2: [*const c_void; 5],
    pub create_domain_ex: unsafe extern "system" fn(
        *mut ICorRuntimeHost,
        PCWSTR,
        *mut RawUnknown, // setup
        *mut RawUnknown, // evidence
        *mut *mut RawUnknown,
    ) -> HRESULT,
    pub create_domain_setup:
        unsafe extern "system" fn(*mut ICorRuntimeHost, *mut *mut RawUnknown) -> HRESULT,
    pub create_evidence: *const c_void,
    pub unload_domain: unsafe extern "system" fn(*mut ICorRuntimeHost, *mut RawUnknown) -> HRESULT,
}

#[repr(C)]
pub struct ICorRuntimeHost {
    pub vtbl: *const ICorRuntimeHostVtbl,
}

/// IDispatch slots shared by every automation interface.
#[repr(C)]
pub struct IDispatchVtbl {
    pub base: RawUnknownVtbl,
    // IDispatch
    pub get_type_info_count: unsafe extern "system" fn(*mut IDispatch, *mut u32) -> HRESULT,
    pub get_type_info:
        unsafe extern "system" fn(*mut IDispatch, u32, u32, *mut *mut c_void) -> HRESULT,
    pub get_ids_of_names: unsafe extern "system" fn(
        *mut IDispatch,
        *const GUID,
        *const PCWSTR,
        u32,
        u32,
        *mut i32,
    ) -> HRESULT,
    pub invoke: unsafe extern "system" fn(
        *mut IDispatch,
        i32,
        *const GUID,
        u32,
        u16,
        *mut DispParams,
        *mut RawVariant,
        *mut ExcepInfo,
        *mut u32,
    ) -> HRESULT,
}

#[repr(C)]
pub struct IDispatch {
    pub vtbl: *const IDispatchVtbl,
}

// _AppDomain (mscorlib). GetAssemblies sits at slot 57.
#[repr(C)]
pub struct AppDomainVtbl {
    pub base: RawUnknownVtbl,
    pub dispatch: [*const c_void; 4],
    // Object members, events, DefineDynamicAssembly, CreateInstance*, Load*,
    // ExecuteAssembly* and the name/path properties
    pub reserved: [*const c_void; 50],
    pub get_assemblies: unsafe extern "system" fn(*mut AppDomain, *mut *mut SAFEARRAY) -> HRESULT,
}

#[repr(C)]
pub struct AppDomain {
    pub vtbl: *const AppDomainVtbl,
}

// _Assembly (mscorlib), through CreateInstance at slot 41
#[repr(C)]
pub struct AssemblyVtbl {
    pub base: RawUnknownVtbl,
    pub dispatch: [*const c_void; 4],
    // ToString, Equals, GetHashCode, GetType
    pub object: [*const c_void; 4],
    // CodeBase, EscapedCodeBase, GetName, GetName_2
    pub reserved_1: [*const c_void; 4],
    pub get_full_name: unsafe extern "system" fn(*mut Assembly, *mut BSTR) -> HRESULT,
    pub get_entry_point: *const c_void,
    /// `GetType(string name)`
    pub get_type_2:
        unsafe extern "system" fn(*mut Assembly, *const u16, *mut *mut ReflectedType) -> HRESULT,
    // GetType_3 through LoadModule_2
    pub reserved_2: [*const c_void; 23],
    pub create_instance:
        unsafe extern "system" fn(*mut Assembly, *const u16, *mut RawVariant) -> HRESULT,
}

#[repr(C)]
pub struct Assembly {
    pub vtbl: *const AssemblyVtbl,
}

// _Type interface (mscorlib). Only InvokeMember_3 is called; it sits at vtable slot 57.
#[repr(C)]
pub struct ReflectedTypeVtbl {
    pub base: RawUnknownVtbl,
    pub dispatch: [*const c_void; 4],
    // _Type slots 7..57
    pub reserved: [*const c_void; 50],
    pub invoke_member_3: unsafe extern "system" fn(
        *mut ReflectedType,
        *const u16,      // name
        i32,             // BindingFlags
        *mut c_void,     // Binder
        RawVariant,      // target
        *mut SAFEARRAY,  // args
        *mut RawVariant, // return value
    ) -> HRESULT,
}

#[repr(C)]
pub struct ReflectedType {
    pub vtbl: *const ReflectedTypeVtbl,
}

// _Exception interface (mscorlib), up to ToString
#[repr(C)]
pub struct ExceptionVtbl {
    pub base: RawUnknownVtbl,
    pub dispatch: [*const c_void; 4],
    // _Exception
    pub get_to_string: unsafe extern "system" fn(*mut Exception, *mut BSTR) -> HRESULT,
}

#[repr(C)]
pub struct Exception {
    pub vtbl: *const ExceptionVtbl,
}
