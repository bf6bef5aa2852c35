//! CLR-backed runtime: version resolution, start/stop, domains and reflection.

use crate::clr_host::*;
use crate::com::ComPtr;
use crate::error_info::{acquire, check};
use crate::executor::DispatchEntry;
use crate::host_control::{BridgeHostControl, DomainManager};
use crate::marshal::{Bstr, SafeArrayBuffer};
use dbgbridge_shared::{
    BoundaryString, DomainBackend, ErrorKind, HostCallback, Result, RuntimeBackend,
    RuntimeVersion, Status, full_name_matches, select_highest_compatible,
};
use std::ffi::c_void;
use std::os::windows::ffi::OsStrExt;
use std::path::Path;
use windows::Win32::System::Com::SAFEARRAY;
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows::Win32::System::Ole::{
    SafeArrayDestroy, SafeArrayGetElement, SafeArrayGetLBound, SafeArrayGetUBound,
};
use windows::Win32::System::Variant::{VARIANT, VariantClear};
use windows::core::{BSTR, GUID, PCWSTR, s, w};

const MSCORLIB: &str = "mscorlib";
const REFLECTION_ASSEMBLY: &str = "System.Reflection.Assembly";
const LOAD_FROM: &str = "LoadFrom";

fn wide_path(path: &Path) -> Vec<u16> {
    path.as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn wide_text(text: &str) -> Vec<u16> {
    text.encode_utf16().chain(std::iter::once(0)).collect()
}

/// Read a string through a `(buffer, &mut len)` API.
fn read_wide(call: impl Fn(*mut u16, *mut u32) -> windows::core::HRESULT) -> Option<String> {
    let mut buffer = [0u16; 128];
    let mut len = buffer.len() as u32;
    if call(buffer.as_mut_ptr(), &mut len).is_err() {
        return None;
    }
    let end = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
    Some(String::from_utf16_lossy(&buffer[..end]))
}

/// The desktop CLR reached through mscoree.dll.
#[derive(Default)]
pub struct ClrBackend {
    runtime_info: Option<ComPtr<ICLRRuntimeInfo>>,
    cor_host: Option<ComPtr<ICorRuntimeHost>>,
    host_control: Option<ComPtr<IHostControl>>,
}

impl ClrBackend {
    fn create_instance<T>(clsid: &GUID, iid: &GUID, expression: &str) -> Result<ComPtr<T>> {
        let mscoree = unsafe { LoadLibraryW(w!("mscoree.dll")) }.map_err(|e| {
            ErrorKind::VersionResolution.failure(e.code().into(), "LoadLibrary(mscoree.dll)")
        })?;
        let create = unsafe { GetProcAddress(mscoree, s!("CLRCreateInstance")) }.ok_or_else(|| {
            ErrorKind::VersionResolution.failure(
                Status::HOST_E_CLRNOTAVAILABLE,
                "GetProcAddress(CLRCreateInstance)",
            )
        })?;
        let create: CLRCreateInstanceFn = unsafe { std::mem::transmute(create) };

        acquire(ErrorKind::VersionResolution, expression, |out| unsafe {
            create(clsid, iid, out)
        })
    }

    /// Ask the runtime's own policy for the highest compatible runtime.
    fn resolve_with_policy(assembly: &[u16]) -> Result<(RuntimeVersion, ComPtr<ICLRRuntimeInfo>)> {
        let policy: ComPtr<ICLRMetaHostPolicy> = Self::create_instance(
            &CLSID_CLR_META_HOST_POLICY,
            &IID_ICLR_META_HOST_POLICY,
            "CLRCreateInstance(ICLRMetaHostPolicy)",
        )?;

        let mut version = [0u16; 64];
        let mut version_len = version.len() as u32;
        let raw = policy.as_ptr();
        let info: ComPtr<ICLRRuntimeInfo> = acquire(
            ErrorKind::VersionResolution,
            "ICLRMetaHostPolicy::GetRequestedRuntime",
            |out| unsafe {
                ((*(*raw).vtbl).get_requested_runtime)(
                    raw,
                    METAHOST_POLICY_HIGHCOMPAT,
                    PCWSTR(assembly.as_ptr()),
                    std::ptr::null_mut(),
                    version.as_mut_ptr(),
                    &mut version_len,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    &IID_ICLR_RUNTIME_INFO,
                    out,
                )
            },
        )?;

        let end = version.iter().position(|&c| c == 0).unwrap_or(version.len());
        let version: RuntimeVersion = String::from_utf16_lossy(&version[..end]).parse()?;
        Ok((version, info))
    }

    /// Match the assembly's requested version against the installed runtimes.
    fn resolve_with_catalog(assembly: &[u16]) -> Result<(RuntimeVersion, ComPtr<ICLRRuntimeInfo>)> {
        let meta_host: ComPtr<ICLRMetaHost> = Self::create_instance(
            &CLSID_CLR_META_HOST,
            &IID_ICLR_META_HOST,
            "CLRCreateInstance(ICLRMetaHost)",
        )?;
        let raw = meta_host.as_ptr();

        let mut buffer = [0u16; 64];
        let mut len = buffer.len() as u32;
        let hr = unsafe {
            ((*(*raw).vtbl).get_version_from_file)(
                raw,
                PCWSTR(assembly.as_ptr()),
                buffer.as_mut_ptr(),
                &mut len,
            )
        };
        check(hr, ErrorKind::VersionResolution, "ICLRMetaHost::GetVersionFromFile")?;
        let end = buffer.iter().position(|&c| c == 0).unwrap_or(buffer.len());
        let requested: RuntimeVersion = String::from_utf16_lossy(&buffer[..end]).parse()?;

        let runtimes: ComPtr<IEnumUnknown> = acquire(
            ErrorKind::VersionResolution,
            "ICLRMetaHost::EnumerateInstalledRuntimes",
            |out| unsafe {
                ((*(*raw).vtbl).enumerate_installed_runtimes)(raw, out as *mut *mut IEnumUnknown)
            },
        )?;

        let mut installed = Vec::new();
        loop {
            let mut item: *mut RawUnknown = std::ptr::null_mut();
            let mut fetched = 0u32;
            let enumerator = runtimes.as_ptr();
            let hr = unsafe { ((*(*enumerator).vtbl).next)(enumerator, 1, &mut item, &mut fetched) };
            if hr.is_err() || fetched == 0 {
                break;
            }
            let Some(item) = (unsafe { ComPtr::from_raw(item) }) else {
                continue;
            };
            let Ok(info) = item.query::<ICLRRuntimeInfo>(&IID_ICLR_RUNTIME_INFO) else {
                continue;
            };
            let info_raw = info.as_ptr();
            let version = read_wide(|buf, len| unsafe {
                ((*(*info_raw).vtbl).get_version_string)(info_raw, buf, len)
            })
            .and_then(|v| v.parse::<RuntimeVersion>().ok());
            if let Some(version) = version {
                tracing::debug!(%version, "Installed runtime");
                installed.push((version, info));
            }
        }

        let versions: Vec<RuntimeVersion> = installed.iter().map(|(v, _)| *v).collect();
        let chosen = select_highest_compatible(&versions, &requested).ok_or_else(|| {
            ErrorKind::VersionResolution.failure(
                Status::HOST_E_CLRNOTAVAILABLE,
                format!("no installed runtime satisfies {}", requested),
            )
        })?;

        installed
            .into_iter()
            .find(|(v, _)| *v == chosen)
            .ok_or_else(|| {
                ErrorKind::VersionResolution
                    .failure(Status::E_UNEXPECTED, "installed runtime disappeared")
            })
    }

    fn runtime_info(&self, operation: &str) -> Result<&ComPtr<ICLRRuntimeInfo>> {
        self.runtime_info.as_ref().ok_or_else(|| {
            ErrorKind::Start.failure(
                Status::E_UNEXPECTED,
                format!("{}: runtime version not resolved", operation),
            )
        })
    }

    fn cor_host(&self, kind: ErrorKind, operation: &str) -> Result<&ComPtr<ICorRuntimeHost>> {
        self.cor_host.as_ref().ok_or_else(|| {
            kind.failure(
                Status::E_UNEXPECTED,
                format!("{}: runtime not started", operation),
            )
        })
    }
}

impl RuntimeBackend for ClrBackend {
    type Manager = DomainManager;
    type Entry = DispatchEntry;
    type Domain = ClrDomain;

    fn resolve_version(&mut self, assembly: &Path) -> Result<RuntimeVersion> {
        let path = wide_path(assembly);
        let (version, info) = match Self::resolve_with_policy(&path) {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::debug!("Runtime policy unavailable ({}), using installed catalog", e);
                Self::resolve_with_catalog(&path)?
            }
        };
        self.runtime_info = Some(info);
        Ok(version)
    }

    fn install_host_callback(&mut self, callback: HostCallback<DomainManager>) -> Result<()> {
        let info = self.runtime_info("SetHostControl")?.as_ptr();
        let runtime_host: ComPtr<ICLRRuntimeHost> =
            acquire(ErrorKind::Start, "ICLRRuntimeInfo::GetInterface(ICLRRuntimeHost)", |out| unsafe {
                ((*(*info).vtbl).get_interface)(info, &CLSID_CLR_RUNTIME_HOST, &IID_ICLR_RUNTIME_HOST, out)
            })?;

        let control = BridgeHostControl::create(callback);
        let raw = runtime_host.as_ptr();
        let hr = unsafe { ((*(*raw).vtbl).set_host_control)(raw, control.as_ptr()) };
        check(hr, ErrorKind::Start, "ICLRRuntimeHost::SetHostControl")?;

        self.host_control = Some(control);
        Ok(())
    }

    fn start(&mut self, version: &RuntimeVersion) -> Result<()> {
        let info = self.runtime_info("start")?.as_ptr();

        let hr = unsafe { ((*(*info).vtbl).bind_as_legacy_v2_runtime)(info) };
        check(hr, ErrorKind::Start, "ICLRRuntimeInfo::BindAsLegacyV2Runtime")?;

        let cor_host: ComPtr<ICorRuntimeHost> =
            acquire(ErrorKind::Start, "ICLRRuntimeInfo::GetInterface(ICorRuntimeHost)", |out| unsafe {
                ((*(*info).vtbl).get_interface)(info, &CLSID_COR_RUNTIME_HOST, &IID_ICOR_RUNTIME_HOST, out)
            })?;

        let raw = cor_host.as_ptr();
        let hr = unsafe { ((*(*raw).vtbl).start)(raw) };
        check(hr, ErrorKind::Start, "ICorRuntimeHost::Start")?;

        tracing::debug!(%version, "ICorRuntimeHost started");
        self.cor_host = Some(cor_host);
        Ok(())
    }

    fn create_domain(&mut self, name: &str) -> Result<ClrDomain> {
        let raw = self.cor_host(ErrorKind::DomainCreation, "create domain")?.as_ptr();

        let setup: ComPtr<RawUnknown> =
            acquire(ErrorKind::DomainCreation, "ICorRuntimeHost::CreateDomainSetup", |out| unsafe {
                ((*(*raw).vtbl).create_domain_setup)(raw, out as *mut *mut RawUnknown)
            })?;

        let friendly_name = wide_text(name);
        let thunk: ComPtr<RawUnknown> =
            acquire(ErrorKind::DomainCreation, "ICorRuntimeHost::CreateDomainEx", |out| unsafe {
                ((*(*raw).vtbl).create_domain_ex)(
                    raw,
                    PCWSTR(friendly_name.as_ptr()),
                    setup.as_ptr(),
                    std::ptr::null_mut(),
                    out as *mut *mut RawUnknown,
                )
            })?;

        let app_domain: ComPtr<AppDomain> = thunk.query(&IID_APP_DOMAIN).map_err(|hr| {
            ErrorKind::DomainCreation.failure(hr.into(), "QueryInterface(_AppDomain)")
        })?;

        Ok(ClrDomain { thunk, app_domain })
    }

    fn unload_domain(&mut self, domain: &ClrDomain) -> Result<()> {
        let Some(cor_host) = self.cor_host.as_ref() else {
            tracing::debug!("No runtime host, domain already gone");
            return Ok(());
        };
        let raw = cor_host.as_ptr();
        let hr = unsafe { ((*(*raw).vtbl).unload_domain)(raw, domain.thunk.as_ptr()) };
        check(hr, ErrorKind::Teardown, "ICorRuntimeHost::UnloadDomain")
    }

    fn stop(&mut self) -> Result<()> {
        let result = match self.cor_host.take() {
            Some(cor_host) => {
                let raw = cor_host.as_ptr();
                let hr = unsafe { ((*(*raw).vtbl).stop)(raw) };
                check(hr, ErrorKind::Teardown, "ICorRuntimeHost::Stop")
            }
            None => Ok(()),
        };
        self.host_control = None;
        self.runtime_info = None;
        result
    }
}

/// One application domain.
pub struct ClrDomain {
    thunk: ComPtr<RawUnknown>,
    app_domain: ComPtr<AppDomain>,
}

impl ClrDomain {
    /// Find a loaded assembly by short name.
    fn find_assembly(&self, short_name: &str) -> Result<Option<ComPtr<Assembly>>> {
        let raw = self.app_domain.as_ptr();
        let mut array: *mut SAFEARRAY = std::ptr::null_mut();
        let hr = unsafe { ((*(*raw).vtbl).get_assemblies)(raw, &mut array) };
        check(hr, ErrorKind::Load, "_AppDomain::GetAssemblies")?;
        if array.is_null() {
            return Ok(None);
        }

        let found = unsafe { search_assemblies(array, short_name) };
        if let Err(e) = unsafe { SafeArrayDestroy(array) } {
            tracing::warn!("SafeArrayDestroy(assemblies) failed: {}", e);
        }
        Ok(found)
    }

    /// `System.Reflection.Assembly.LoadFrom(path)`, called through mscorlib's reflection.
    fn load_from(&self, path: &Path) -> Result<()> {
        let mscorlib = self.find_assembly(MSCORLIB)?.ok_or_else(|| {
            ErrorKind::Load.failure(Status::COR_E_FILENOTFOUND, "find mscorlib in domain")
        })?;

        let type_name = BSTR::from(REFLECTION_ASSEMBLY);
        let mscorlib_raw = mscorlib.as_ptr();
        let assembly_type: ComPtr<ReflectedType> =
            acquire(ErrorKind::Load, "_Assembly::GetType_2(System.Reflection.Assembly)", |out| unsafe {
                ((*(*mscorlib_raw).vtbl).get_type_2)(
                    mscorlib_raw,
                    type_name.as_ptr(),
                    out as *mut *mut ReflectedType,
                )
            })?;

        let path_text = Bstr::from_text(&path.to_string_lossy())?;
        let args = SafeArrayBuffer::of_variants(&[path_text.as_variant()])?;
        let method = BSTR::from(LOAD_FROM);
        let mut result = RawVariant::empty();

        let raw = assembly_type.as_ptr();
        let hr = unsafe {
            ((*(*raw).vtbl).invoke_member_3)(
                raw,
                method.as_ptr(),
                BINDING_FLAGS_STATIC_METHOD,
                std::ptr::null_mut(),
                RawVariant::empty(),
                args.as_ptr(),
                &mut result,
            )
        };
        unsafe {
            let _ = VariantClear(&mut result as *mut RawVariant as *mut VARIANT);
        }

        let kind = if Status::from(hr) == Status::COR_E_FILENOTFOUND {
            ErrorKind::AssemblyNotFound
        } else {
            ErrorKind::Load
        };
        check(hr, kind, "_Type::InvokeMember_3(LoadFrom)")
    }
}

/// Walk a SAFEARRAY of `_Assembly` pointers for the first matching short name.
unsafe fn search_assemblies(array: *mut SAFEARRAY, short_name: &str) -> Option<ComPtr<Assembly>> {
    let lower = unsafe { SafeArrayGetLBound(array, 1) }.ok()?;
    let upper = unsafe { SafeArrayGetUBound(array, 1) }.ok()?;

    for i in lower..=upper {
        let mut element: *mut Assembly = std::ptr::null_mut();
        let got = unsafe { SafeArrayGetElement(array, &i, &mut element as *mut _ as *mut c_void) };
        if got.is_err() {
            continue;
        }
        let Some(assembly) = (unsafe { ComPtr::from_raw(element) }) else {
            continue;
        };

        let mut full_name = BSTR::default();
        let raw = assembly.as_ptr();
        let hr = unsafe { ((*(*raw).vtbl).get_full_name)(raw, &mut full_name) };
        if hr.is_ok() && full_name_matches(&full_name.to_string(), short_name) {
            return Some(assembly);
        }
    }
    None
}

impl DomainBackend for ClrDomain {
    type Assembly = ComPtr<Assembly>;
    type Entry = DispatchEntry;
    type Manager = DomainManager;

    fn load_assembly(&self, path: &Path, short_name: &str) -> Result<ComPtr<Assembly>> {
        self.load_from(path)?;
        self.find_assembly(short_name)?.ok_or_else(|| {
            ErrorKind::AssemblyNotFound.failure(
                Status::COR_E_FILENOTFOUND,
                format!("find {} in domain after LoadFrom", short_name),
            )
        })
    }

    fn instantiate(&self, assembly: &ComPtr<Assembly>, type_name: &str) -> Result<DispatchEntry> {
        let name = BSTR::from(type_name);
        let mut instance = RawVariant::empty();
        let raw = assembly.as_ptr();
        let hr = unsafe { ((*(*raw).vtbl).create_instance)(raw, name.as_ptr(), &mut instance) };
        check(hr, ErrorKind::Instantiation, "_Assembly::CreateInstance")?;

        let object = match instance.vt {
            VT_UNKNOWN | VT_DISPATCH => unsafe {
                ComPtr::from_raw(instance.pointer() as *mut RawUnknown)
            },
            _ => {
                unsafe {
                    let _ = VariantClear(&mut instance as *mut RawVariant as *mut VARIANT);
                }
                None
            }
        };
        let object = object.ok_or_else(|| {
            ErrorKind::Instantiation.failure(
                Status::COR_E_TYPELOAD,
                format!("_Assembly::CreateInstance({}) returned no object", type_name),
            )
        })?;

        DispatchEntry::bind(&object)
    }

    fn adopt_manager(&self, manager: &DomainManager) -> Option<DispatchEntry> {
        match DispatchEntry::bind(manager) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::debug!("Domain manager is not an entry object: {}", e);
                None
            }
        }
    }
}
