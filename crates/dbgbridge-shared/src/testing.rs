//! In-memory runtime backend used by the unit tests.

use crate::marshal::{unpack, WideArray, WideText};
use crate::runtime::{DomainBackend, EntryObject, HostClient, RuntimeBackend};
use crate::{
    AssemblyProbe, BoundaryFailure, BoundaryString, ErrorKind, HostCallback, Result,
    RuntimeVersion, Status,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Ordered record of every boundary call the fakes see.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    runtimes: Arc<AtomicUsize>,
    runtimes_peak: Arc<AtomicUsize>,
}

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Entries named `name`, with or without a `:detail` suffix.
    pub fn count(&self, name: &str) -> usize {
        self.entries.lock().iter().filter(|e| matches(e, name)).count()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| matches(e, name))
    }

    /// Highest number of managed calls observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Highest number of started runtimes observed at once.
    pub fn peak_runtimes(&self) -> usize {
        self.runtimes_peak.load(Ordering::SeqCst)
    }

    fn runtime_started(&self) {
        let now = self.runtimes.fetch_add(1, Ordering::SeqCst) + 1;
        self.runtimes_peak.fetch_max(now, Ordering::SeqCst);
    }

    fn runtime_stopped(&self) {
        self.runtimes.fetch_sub(1, Ordering::SeqCst);
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn matches(entry: &str, name: &str) -> bool {
    entry == name
        || entry
            .strip_prefix(name)
            .is_some_and(|rest| rest.starts_with(':'))
}

/// Boundary call that should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    None,
    Resolve,
    Callback,
    Start,
    CreateDomain,
    Load,
    Instantiate,
    Bind,
    Invoke,
    Unload,
    Stop,
}

/// Managed exception status used for failing invocations.
pub const SCRIPT_FAILURE: Status = Status::COR_E_EXCEPTION;

pub struct FakeBackend {
    journal: Journal,
    fault: Fault,
    manager: Option<String>,
    start_manager: Option<String>,
    callback: Option<HostCallback<String>>,
    next_domain: u32,
    stop_delay: Duration,
    image_check: bool,
}

impl FakeBackend {
    pub fn new(journal: Journal, fault: Fault) -> Self {
        Self {
            journal,
            fault,
            manager: None,
            start_manager: None,
            callback: None,
            next_domain: 1,
            stop_delay: Duration::ZERO,
            image_check: false,
        }
    }

    /// Report `manager` through the host callback when a domain is created.
    pub fn with_manager(mut self, manager: &str) -> Self {
        self.manager = Some(manager.to_string());
        self
    }

    /// Report `manager` for the default domain while the runtime starts.
    pub fn with_start_manager(mut self, manager: &str) -> Self {
        self.start_manager = Some(manager.to_string());
        self
    }

    /// Make `stop` take `delay` before returning.
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    /// Inspect the assembly image like the real backend does.
    pub fn with_image_check(mut self) -> Self {
        self.image_check = true;
        self
    }

    fn fail(&self, fault: Fault, kind: ErrorKind, status: Status, expression: &str) -> Result<()> {
        if self.fault == fault {
            return Err(kind.failure(status, expression));
        }
        Ok(())
    }
}

impl RuntimeBackend for FakeBackend {
    type Manager = String;
    type Entry = FakeEntry;
    type Domain = FakeDomain;

    fn resolve_version(&mut self, _assembly: &Path) -> Result<RuntimeVersion> {
        self.journal.push("resolve");
        self.fail(
            Fault::Resolve,
            ErrorKind::VersionResolution,
            Status::HOST_E_CLRNOTAVAILABLE,
            "GetRequestedRuntime",
        )?;
        Ok(RuntimeVersion::new(4, 0, 30319))
    }

    fn install_host_callback(&mut self, callback: HostCallback<String>) -> Result<()> {
        self.journal.push("install_callback");
        self.fail(Fault::Callback, ErrorKind::Start, Status::E_FAIL, "SetHostControl")?;
        self.callback = Some(callback);
        Ok(())
    }

    fn start(&mut self, version: &RuntimeVersion) -> Result<()> {
        self.journal.push(format!("start:{}", version));
        self.fail(Fault::Start, ErrorKind::Start, Status::E_FAIL, "ICorRuntimeHost::Start")?;
        self.journal.runtime_started();
        // The default domain always has id 1.
        if let (Some(callback), Some(manager)) = (&self.callback, &self.start_manager) {
            callback.record(1, manager.clone());
        }
        Ok(())
    }

    fn create_domain(&mut self, name: &str) -> Result<FakeDomain> {
        self.journal.push(format!("create_domain:{}", name));
        self.fail(
            Fault::CreateDomain,
            ErrorKind::DomainCreation,
            Status::E_OUTOFMEMORY,
            "CreateDomainEx",
        )?;

        self.next_domain += 1;
        if let (Some(callback), Some(manager)) = (&self.callback, &self.manager) {
            callback.record(self.next_domain, manager.clone());
        }

        Ok(FakeDomain {
            journal: self.journal.clone(),
            fault: self.fault,
        })
    }

    fn unload_domain(&mut self, _domain: &FakeDomain) -> Result<()> {
        self.journal.push("unload");
        self.fail(Fault::Unload, ErrorKind::Teardown, Status::E_FAIL, "UnloadDomain")
    }

    fn stop(&mut self) -> Result<()> {
        std::thread::sleep(self.stop_delay);
        self.journal.push("stop");
        self.journal.runtime_stopped();
        self.fail(Fault::Stop, ErrorKind::Teardown, Status::E_FAIL, "ICorRuntimeHost::Stop")
    }

    fn probe_assembly(&self, path: &Path) -> Result<AssemblyProbe> {
        if self.image_check {
            return crate::assembly::probe_assembly(path);
        }
        crate::assembly::locate(path)
    }
}

pub struct FakeDomain {
    journal: Journal,
    fault: Fault,
}

impl DomainBackend for FakeDomain {
    type Assembly = String;
    type Entry = FakeEntry;
    type Manager = String;

    fn load_assembly(&self, _path: &Path, short_name: &str) -> Result<String> {
        self.journal.push(format!("load:{}", short_name));
        if self.fault == Fault::Load {
            return Err(ErrorKind::Load.failure(Status::COR_E_BADIMAGEFORMAT, "Assembly.LoadFrom"));
        }
        Ok(short_name.to_string())
    }

    fn instantiate(&self, _assembly: &String, type_name: &str) -> Result<FakeEntry> {
        self.journal.push(format!("instantiate:{}", type_name));
        if self.fault == Fault::Instantiate {
            return Err(ErrorKind::Instantiation.failure(Status::E_NOINTERFACE, "CreateInstance"));
        }
        Ok(FakeEntry::new(self.journal.clone(), self.fault))
    }

    fn adopt_manager(&self, manager: &String) -> Option<FakeEntry> {
        self.journal.push(format!("adopt:{}", manager));
        (manager == "executor").then(|| FakeEntry::new(self.journal.clone(), self.fault))
    }
}

impl Drop for FakeDomain {
    fn drop(&mut self) {
        self.journal.push("drop_domain");
    }
}

pub struct FakeEntry {
    journal: Journal,
    fault: Fault,
}

impl FakeEntry {
    fn new(journal: Journal, fault: Fault) -> Self {
        Self { journal, fault }
    }

    fn call(&self, entry: String, operation: &str) -> Result<()> {
        self.journal.enter();
        std::thread::sleep(Duration::from_millis(5));
        self.journal.push(entry);
        self.journal.exit();

        if self.fault == Fault::Invoke {
            return Err(ErrorKind::Invocation.wrap(
                BoundaryFailure::new(SCRIPT_FAILURE, operation)
                    .with_description("script threw an exception"),
            ));
        }
        Ok(())
    }
}

impl EntryObject for FakeEntry {
    type Array = WideArray;
    type Text = WideText;

    fn initialize_context(&self, client: HostClient) -> Result<()> {
        self.journal.push(format!("bind:{}", client));
        if self.fault == Fault::Bind && !client.is_null() {
            return Err(ErrorKind::Invocation.failure(Status::E_POINTER, "InitializeContext"));
        }
        Ok(())
    }

    fn execute_script(&self, script: &WideText, args: &WideArray) -> Result<()> {
        let args = unpack(args)?.join(",");
        self.call(format!("execute:{}:{}", script.to_text(), args), "ExecuteScript")
    }

    fn execute_script_text(&self, text: &WideText) -> Result<()> {
        self.call(format!("execute_text:{}", text.to_text()), "ExecuteScript_2")
    }

    fn enter_interactive_mode(&self, text: &WideText) -> Result<()> {
        self.call(format!("interactive:{}", text.to_text()), "EnterInteractiveMode")
    }

    fn interpret(&self, code: &WideText) -> Result<()> {
        self.call(format!("interpret:{}", code.to_text()), "Interpret")
    }

    fn open_ui(&self, text: &WideText) -> Result<()> {
        self.call(format!("openui:{}", text.to_text()), "OpenUI")
    }
}

impl Drop for FakeEntry {
    fn drop(&mut self) {
        self.journal.push("drop_entry");
    }
}

/// A scratch directory holding an empty `Ext.dll`.
pub fn scratch_assembly() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("Ext.dll");
    std::fs::write(&path, b"MZ").unwrap();
    (dir, path)
}
