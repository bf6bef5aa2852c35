//! Runtime host and execution domain.
//!
//! The managed runtime is reached through three boundary traits:
//!
//! - [`RuntimeBackend`] - the hosting API (version catalog, start/stop, domains)
//! - [`DomainBackend`] - one isolated domain (assembly load, instantiation)
//! - [`EntryObject`] - the instantiated extension entry type
//!
//! [`RuntimeHost`] and [`ExecutionDomain`] own the handles and enforce the
//! lifecycle rules on top of whichever backend is plugged in.

use crate::marshal::{BoundaryArray, BoundaryString};
use crate::{AssemblyProbe, ErrorKind, HostCallback, Result, RuntimeVersion, Status};
use std::ffi::c_void;
use std::path::Path;

/// Opaque host client handle passed through to the managed side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostClient(usize);

impl HostClient {
    pub const fn null() -> Self {
        Self(0)
    }

    pub fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr as usize)
    }

    pub fn as_raw(self) -> *mut c_void {
        self.0 as *mut c_void
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for HostClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

/// The embeddable runtime's hosting API.
pub trait RuntimeBackend: Send + 'static {
    /// Object the runtime reports through the host callback for a new domain.
    type Manager: Clone + Send + 'static;
    type Entry: EntryObject;
    type Domain: DomainBackend<Entry = Self::Entry, Manager = Self::Manager> + Send + 'static;

    /// Version of the runtime the assembly should run on.
    fn resolve_version(&mut self, assembly: &Path) -> Result<RuntimeVersion>;

    /// Hand the callback to the runtime's control channel. Only valid before `start`.
    fn install_host_callback(&mut self, callback: HostCallback<Self::Manager>) -> Result<()>;

    fn start(&mut self, version: &RuntimeVersion) -> Result<()>;

    fn create_domain(&mut self, name: &str) -> Result<Self::Domain>;

    fn unload_domain(&mut self, domain: &Self::Domain) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn probe_assembly(&self, path: &Path) -> Result<AssemblyProbe> {
        crate::assembly::probe_assembly(path)
    }
}

/// One domain inside a started runtime.
pub trait DomainBackend {
    type Assembly;
    type Entry: EntryObject;
    type Manager;

    /// Load the assembly from `path` and look it up again by `short_name`.
    fn load_assembly(&self, path: &Path, short_name: &str) -> Result<Self::Assembly>;

    fn instantiate(&self, assembly: &Self::Assembly, type_name: &str) -> Result<Self::Entry>;

    /// Narrow a captured domain manager to the entry capability, if it has it.
    fn adopt_manager(&self, manager: &Self::Manager) -> Option<Self::Entry>;
}

/// The extension's entry object. Status codes from these calls reach the host unchanged.
pub trait EntryObject: Send + 'static {
    type Array: BoundaryArray;
    type Text: BoundaryString;

    fn initialize_context(&self, client: HostClient) -> Result<()>;

    fn execute_script(&self, script: &Self::Text, args: &Self::Array) -> Result<()>;

    fn execute_script_text(&self, text: &Self::Text) -> Result<()>;

    fn enter_interactive_mode(&self, text: &Self::Text) -> Result<()>;

    fn interpret(&self, code: &Self::Text) -> Result<()>;

    fn open_ui(&self, text: &Self::Text) -> Result<()>;
}

/// Owns the runtime handle.
pub struct RuntimeHost<B: RuntimeBackend> {
    backend: B,
    version: Option<RuntimeVersion>,
    started: bool,
}

impl<B: RuntimeBackend> RuntimeHost<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            version: None,
            started: false,
        }
    }

    pub fn resolve_version(&mut self, assembly: &Path) -> Result<RuntimeVersion> {
        let version = self.backend.resolve_version(assembly)?;
        tracing::info!(%version, "Resolved runtime version");
        self.version = Some(version);
        Ok(version)
    }

    pub fn install_callback(&mut self, callback: HostCallback<B::Manager>) -> Result<()> {
        if self.started {
            return Err(ErrorKind::Start.failure(
                Status::E_UNEXPECTED,
                "install host callback: runtime already started",
            ));
        }
        self.backend.install_host_callback(callback)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(ErrorKind::Start.failure(
                Status::E_UNEXPECTED,
                "start runtime: already started",
            ));
        }
        let version = self.version.ok_or_else(|| {
            ErrorKind::Start.failure(Status::E_UNEXPECTED, "start runtime: version not resolved")
        })?;

        self.backend.start(&version)?;
        self.started = true;
        tracing::info!(%version, "Runtime started");
        Ok(())
    }

    /// Stop the runtime. A host that never started is left alone.
    pub fn stop(&mut self) -> Result<()> {
        if !self.started {
            tracing::debug!("Runtime not started, nothing to stop");
            return Ok(());
        }
        // A failed stop still leaves the runtime unusable.
        self.started = false;
        self.backend.stop()?;
        tracing::info!("Runtime stopped");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

/// Owns one domain handle created by a started [`RuntimeHost`].
pub struct ExecutionDomain<B: RuntimeBackend> {
    name: String,
    domain: Option<B::Domain>,
}

impl<B: RuntimeBackend> ExecutionDomain<B> {
    pub fn create(host: &mut RuntimeHost<B>, name: &str) -> Result<Self> {
        if !host.is_started() {
            return Err(ErrorKind::DomainCreation.failure(
                Status::E_UNEXPECTED,
                format!("create domain '{}': runtime not started", name),
            ));
        }
        let domain = host.backend.create_domain(name)?;
        tracing::info!(domain = name, "Domain created");
        Ok(Self {
            name: name.to_string(),
            domain: Some(domain),
        })
    }

    pub fn is_loaded(&self) -> bool {
        self.domain.is_some()
    }

    fn live(&self, operation: &str) -> Result<&B::Domain> {
        self.domain.as_ref().ok_or_else(|| {
            ErrorKind::Load.failure(
                Status::E_UNEXPECTED,
                format!("{}: domain '{}' is unloaded", operation, self.name),
            )
        })
    }

    pub fn load_assembly(
        &self,
        probe: &AssemblyProbe,
    ) -> Result<<B::Domain as DomainBackend>::Assembly> {
        let domain = self.live("load assembly")?;
        let assembly = domain.load_assembly(&probe.path, &probe.name)?;
        tracing::info!(assembly = %probe.name, "Assembly loaded");
        Ok(assembly)
    }

    pub fn instantiate(
        &self,
        assembly: &<B::Domain as DomainBackend>::Assembly,
        type_name: &str,
    ) -> Result<B::Entry> {
        let entry = self
            .live("instantiate")
            .map_err(|_| {
                ErrorKind::Instantiation.failure(
                    Status::E_UNEXPECTED,
                    format!("instantiate {}: domain '{}' is unloaded", type_name, self.name),
                )
            })?
            .instantiate(assembly, type_name)?;
        tracing::info!(type_name, "Entry object created");
        Ok(entry)
    }

    /// Use a captured domain manager as the entry object.
    pub fn adopt(&self, manager: &B::Manager) -> Option<B::Entry> {
        self.domain.as_ref()?.adopt_manager(manager)
    }

    /// Unload the domain and release its handle.
    ///
    /// Unloading twice, or after the runtime stopped, is a no-op.
    pub fn unload(&mut self, host: &mut RuntimeHost<B>) -> Result<()> {
        let Some(domain) = self.domain.take() else {
            tracing::debug!(domain = %self.name, "Domain already unloaded");
            return Ok(());
        };
        if !host.is_started() {
            tracing::warn!(domain = %self.name, "Runtime stopped before domain unload");
            return Ok(());
        }
        let result = host.backend.unload_domain(&domain);
        drop(domain);
        result?;
        tracing::info!(domain = %self.name, "Domain unloaded");
        Ok(())
    }
}
