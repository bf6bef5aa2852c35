//! Command dispatcher: the bridge surface exposed to the debugger host.
//!
//! `Uninitialized -> Initializing -> Ready -> Invoking -> Ready ... -> Uninitializing -> Uninitialized`
//!
//! One lock serializes every operation, so at most one managed call is in
//! flight per bridge. The state is mirrored in an atomic so it can be read
//! without taking the lock.

use crate::marshal::{pack, pack_single};
use crate::runtime::{EntryObject, ExecutionDomain, HostClient, RuntimeBackend, RuntimeHost};
use crate::{
    BridgeConfig, Error, ErrorKind, ErrorReporter, HostCallback, ReportSink, Result,
    ScriptInvocation, Status,
};
use parking_lot::{Condvar, Mutex};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;

type Text<B> = <<B as RuntimeBackend>::Entry as EntryObject>::Text;
type Array<B> = <<B as RuntimeBackend>::Entry as EntryObject>::Array;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized = 0,
    Initializing = 1,
    Ready = 2,
    Invoking = 3,
    Uninitializing = 4,
}

impl BridgeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => BridgeState::Initializing,
            2 => BridgeState::Ready,
            3 => BridgeState::Invoking,
            4 => BridgeState::Uninitializing,
            _ => BridgeState::Uninitialized,
        }
    }
}

/// Outcome of [`Bridge::uninitialize`].
#[derive(Debug)]
pub enum Teardown {
    /// Teardown finished on the calling thread (or there was nothing to tear down).
    Done(Vec<Error>),
    /// Full teardown is running on a worker thread.
    Pending(JoinHandle<Vec<Error>>),
}

impl Teardown {
    pub fn is_pending(&self) -> bool {
        matches!(self, Teardown::Pending(_))
    }

    /// Block until teardown finishes and return the failures it reported.
    pub fn wait(self) -> Vec<Error> {
        match self {
            Teardown::Done(failures) => failures,
            Teardown::Pending(handle) => handle
                .join()
                .unwrap_or_else(|_| vec![Error::Other("teardown worker panicked".to_string())]),
        }
    }
}

/// Completion flag for a teardown handed to the worker thread.
#[derive(Default)]
struct TeardownGate {
    done: Mutex<bool>,
    finished: Condvar,
}

impl TeardownGate {
    fn open(&self) {
        *self.done.lock() = true;
        self.finished.notify_all();
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.finished.wait(&mut done);
        }
    }
}

/// Opens the gate when dropped, including when the worker panics.
struct GateRelease(Arc<TeardownGate>);

impl Drop for GateRelease {
    fn drop(&mut self) {
        self.0.open();
    }
}

type TeardownWork<B> =
    Arc<Mutex<Option<(Option<RuntimeHost<B>>, Option<ExecutionDomain<B>>, GateRelease)>>>;

struct Session<B: RuntimeBackend> {
    host: Option<RuntimeHost<B>>,
    domain: Option<ExecutionDomain<B>>,
    entry: Option<B::Entry>,
    bound: Option<HostClient>,
    /// Teardown still running on the worker thread, if any.
    teardown: Option<Arc<TeardownGate>>,
}

impl<B: RuntimeBackend> Session<B> {
    fn empty() -> Self {
        Self {
            host: None,
            domain: None,
            entry: None,
            bound: None,
            teardown: None,
        }
    }

    /// Associate `client` with the entry object unless it is already bound.
    fn bind(&mut self, operation: &str, client: HostClient) -> Result<()> {
        if self.bound == Some(client) {
            return Ok(());
        }
        let entry = self
            .entry
            .as_ref()
            .ok_or_else(|| Error::not_initialized(operation))?;
        entry.initialize_context(client)?;
        tracing::debug!(%client, "Host session bound");
        self.bound = Some(client);
        Ok(())
    }
}

/// The hosting bridge: one runtime, one domain, one entry object.
pub struct Bridge<B: RuntimeBackend> {
    config: BridgeConfig,
    reporter: ErrorReporter,
    state: AtomicU8,
    session: Mutex<Session<B>>,
}

impl<B: RuntimeBackend> Bridge<B> {
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_reporter(config, ErrorReporter::default())
    }

    pub fn with_sink(config: BridgeConfig, sink: Arc<dyn ReportSink>) -> Self {
        Self::with_reporter(config, ErrorReporter::new(sink))
    }

    pub fn with_reporter(config: BridgeConfig, reporter: ErrorReporter) -> Self {
        Self {
            config,
            reporter,
            state: AtomicU8::new(BridgeState::Uninitialized as u8),
            session: Mutex::new(Session::empty()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> BridgeState {
        BridgeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Client the entry object is currently bound to.
    pub fn bound_client(&self) -> Option<HostClient> {
        self.session.lock().bound
    }

    fn set_state(&self, state: BridgeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Start the runtime, create the domain and bind the entry object.
    ///
    /// On failure every handle acquired so far is released and the bridge
    /// stays `Uninitialized`. A runtime left running by a fast uninitialize
    /// is reused instead of being started again. A full teardown still
    /// running on the worker thread is waited out first, so two runtimes
    /// never overlap.
    pub fn initialize(&self, backend: B, assembly: &Path) -> Result<()> {
        let mut guard = self.session.lock();
        let session = &mut *guard;
        let _span = tracing::info_span!("initialize", assembly = %assembly.display()).entered();

        if self.state() == BridgeState::Ready {
            tracing::warn!("Bridge already initialized");
            return Ok(());
        }

        if let Some(gate) = session.teardown.take() {
            tracing::info!("Waiting for previous teardown to finish");
            gate.wait();
        }

        self.set_state(BridgeState::Initializing);
        match self.bring_up(session, backend, assembly) {
            Ok(()) => {
                self.set_state(BridgeState::Ready);
                tracing::info!("Bridge ready");
                Ok(())
            }
            Err(e) => {
                self.reporter.report(&e);
                session.entry = None;
                session.bound = None;
                tear_down(session.host.take(), session.domain.take(), &self.reporter);
                self.set_state(BridgeState::Uninitialized);
                Err(e)
            }
        }
    }

    fn bring_up(&self, session: &mut Session<B>, backend: B, assembly: &Path) -> Result<()> {
        let probe = backend.probe_assembly(assembly)?;
        let callback = HostCallback::new();

        if session.host.is_none() {
            let mut host = RuntimeHost::new(backend);
            host.resolve_version(&probe.path)?;
            if self.config.host_callback {
                host.install_callback(callback.clone())?;
            }
            let host = session.host.insert(host);
            host.start()?;
            // Managers reported during start belong to the default domain.
            if let Some((domain_id, _)) = callback.take() {
                tracing::debug!(domain_id, "Ignoring domain manager reported before domain creation");
            }
            session.domain = Some(ExecutionDomain::create(host, &self.config.domain_name)?);
        } else {
            tracing::info!("Reusing runtime left running by a previous uninitialize");
        }

        let domain = session.domain.as_ref().ok_or_else(|| {
            ErrorKind::DomainCreation.failure(Status::E_UNEXPECTED, "initialize: no domain")
        })?;

        let adopted = callback.take().and_then(|(domain_id, manager)| {
            let entry = domain.adopt(&manager);
            if entry.is_some() {
                tracing::info!(domain_id, "Using domain manager as entry object");
            }
            entry
        });

        let entry = match adopted {
            Some(entry) => entry,
            None => {
                let loaded = domain.load_assembly(&probe)?;
                domain.instantiate(&loaded, &self.config.entry_type)?
            }
        };

        session.entry = Some(entry);
        session.bound = None;
        Ok(())
    }

    /// Run one managed call under the dispatch lock.
    fn invoke<F>(&self, operation: &'static str, client: HostClient, call: F) -> Result<()>
    where
        F: FnOnce(&B::Entry) -> Result<()>,
    {
        let mut guard = self.session.lock();
        let session = &mut *guard;
        let _span = tracing::info_span!("command", operation, %client).entered();

        if self.state() != BridgeState::Ready {
            let err = Error::not_initialized(operation);
            self.reporter.report(&err);
            return Err(err);
        }

        self.set_state(BridgeState::Invoking);
        let result = session.bind(operation, client).and_then(|()| {
            let entry = session
                .entry
                .as_ref()
                .ok_or_else(|| Error::not_initialized(operation))?;
            call(entry)
        });
        self.set_state(BridgeState::Ready);

        if let Err(e) = &result {
            self.reporter.report(e);
        }
        result
    }

    /// `execute <script> [args...]`: typed script call with a marshaled argument array.
    pub fn execute(&self, client: HostClient, text: &str) -> Result<()> {
        let invocation = ScriptInvocation::parse(text);
        self.invoke("execute", client, |entry| {
            let script: Text<B> = pack_single(&invocation.script)?;
            let args: Array<B> = pack(&invocation.args)?;
            entry.execute_script(&script, &args)
        })
    }

    /// Forward raw text to the single-string script call.
    pub fn execute_text(&self, client: HostClient, text: &str) -> Result<()> {
        self.invoke("execute_text", client, |entry| {
            let text: Text<B> = pack_single(text)?;
            entry.execute_script_text(&text)
        })
    }

    pub fn enter_interactive_mode(&self, client: HostClient, text: &str) -> Result<()> {
        self.invoke("interactive", client, |entry| {
            let text: Text<B> = pack_single(text)?;
            entry.enter_interactive_mode(&text)
        })
    }

    pub fn interpret(&self, client: HostClient, text: &str) -> Result<()> {
        self.invoke("interpret", client, |entry| {
            let code: Text<B> = pack_single(text)?;
            entry.interpret(&code)
        })
    }

    pub fn open_ui(&self, client: HostClient, text: &str) -> Result<()> {
        tracing::debug!(modal = crate::parse_modal_flag(text), "Opening UI");
        self.invoke("openui", client, |entry| {
            let text: Text<B> = pack_single(text)?;
            entry.open_ui(&text)
        })
    }

    /// Release the entry object and, if `full`, unload the domain and stop the runtime.
    ///
    /// Safe to call in any state and any number of times. With asynchronous
    /// teardown configured, the domain and runtime are handed to a worker
    /// thread and the caller returns immediately.
    pub fn uninitialize(&self, full: bool) -> Teardown {
        let mut guard = self.session.lock();
        let session = &mut *guard;
        let _span = tracing::info_span!("uninitialize", full).entered();

        self.set_state(BridgeState::Uninitializing);

        if let Some(entry) = session.entry.take() {
            if session.bound.is_some_and(|client| !client.is_null()) {
                if let Err(e) = entry.initialize_context(HostClient::null()) {
                    self.reporter.report_nonfatal(&e);
                }
            }
            drop(entry);
            tracing::info!("Entry object released");
        }
        session.bound = None;

        let (host, domain) = if full {
            (session.host.take(), session.domain.take())
        } else {
            (None, None)
        };

        if host.is_none() && domain.is_none() {
            self.set_state(BridgeState::Uninitialized);
            return Teardown::Done(Vec::new());
        }

        if !self.config.async_teardown {
            let failures = tear_down(host, domain, &self.reporter);
            self.set_state(BridgeState::Uninitialized);
            return Teardown::Done(failures);
        }

        let gate = Arc::new(TeardownGate::default());
        session.teardown = Some(Arc::clone(&gate));
        self.set_state(BridgeState::Uninitialized);
        drop(guard);

        let work: TeardownWork<B> = Arc::new(Mutex::new(Some((host, domain, GateRelease(gate)))));
        let worker_work = Arc::clone(&work);
        let worker_reporter = self.reporter.clone();
        let spawned = std::thread::Builder::new()
            .name("dbgbridge-teardown".to_string())
            .spawn(move || run_teardown(&worker_work, &worker_reporter));

        match spawned {
            Ok(handle) => {
                tracing::debug!("Teardown handed to worker thread");
                Teardown::Pending(handle)
            }
            Err(e) => {
                tracing::warn!("Failed to spawn teardown worker, tearing down inline: {}", e);
                Teardown::Done(run_teardown(&work, &self.reporter))
            }
        }
    }

    /// Forget the entry object without calling into the runtime.
    ///
    /// Used on process detach, where managed code must not run under the
    /// loader lock. The entry reference is leaked; the runtime and domain
    /// stay put so a later full uninitialize can still release them.
    pub fn detach(&self) {
        let mut session = self.session.lock();
        if let Some(entry) = session.entry.take() {
            std::mem::forget(entry);
            tracing::info!("Entry object abandoned on detach");
        }
        session.bound = None;
        self.set_state(BridgeState::Uninitialized);
    }
}

fn run_teardown<B: RuntimeBackend>(
    work: &TeardownWork<B>,
    reporter: &ErrorReporter,
) -> Vec<Error> {
    let taken = work.lock().take();
    match taken {
        Some((host, domain, _release)) => tear_down(host, domain, reporter),
        None => Vec::new(),
    }
}

/// Unload the domain, then stop the runtime. Every step runs even if an earlier one failed.
fn tear_down<B: RuntimeBackend>(
    host: Option<RuntimeHost<B>>,
    domain: Option<ExecutionDomain<B>>,
    reporter: &ErrorReporter,
) -> Vec<Error> {
    let mut failures = Vec::new();

    let Some(mut host) = host else {
        drop(domain);
        return failures;
    };

    if let Some(mut domain) = domain {
        if let Err(e) = domain.unload(&mut host) {
            reporter.report_nonfatal(&e);
            failures.push(e);
        }
    }

    if let Err(e) = host.stop() {
        reporter.report_nonfatal(&e);
        failures.push(e);
    }

    drop(host);
    tracing::info!(failures = failures.len(), "Teardown complete");
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scratch_assembly, Fault, FakeBackend, Journal, SCRIPT_FAILURE};
    use crate::{LogLevel, MemorySink};
    use std::time::Duration;

    fn host_client(raw: usize) -> HostClient {
        HostClient::from_raw(raw as *mut std::ffi::c_void)
    }

    fn sync_config() -> BridgeConfig {
        BridgeConfig {
            async_teardown: false,
            ..BridgeConfig::default()
        }
    }

    fn bridge(config: BridgeConfig) -> (Bridge<FakeBackend>, MemorySink) {
        let sink = MemorySink::new();
        (Bridge::with_sink(config, Arc::new(sink.clone())), sink)
    }

    fn ready(fault: Fault) -> (Bridge<FakeBackend>, Journal, MemorySink, tempfile::TempDir) {
        let (dir, path) = scratch_assembly();
        let journal = Journal::default();
        let (bridge, sink) = bridge(sync_config());
        bridge
            .initialize(FakeBackend::new(journal.clone(), fault), &path)
            .unwrap();
        (bridge, journal, sink, dir)
    }

    #[test]
    fn initialize_runs_lifecycle_in_order() {
        let (bridge, journal, _sink, _dir) = ready(Fault::None);
        assert_eq!(bridge.state(), BridgeState::Ready);
        assert_eq!(
            journal.entries(),
            vec![
                "resolve",
                "install_callback",
                "start:v4.0.30319",
                "create_domain:DbgBridge",
                "load:Ext",
                "instantiate:CsDebugScript.Executor",
            ]
        );
    }

    #[test]
    fn host_callback_can_be_disabled() {
        let (_dir, path) = scratch_assembly();
        let journal = Journal::default();
        let (bridge, _sink) = bridge(BridgeConfig {
            host_callback: false,
            ..sync_config()
        });
        bridge
            .initialize(FakeBackend::new(journal.clone(), Fault::None), &path)
            .unwrap();
        assert_eq!(journal.count("install_callback"), 0);
    }

    #[test]
    fn missing_assembly_fails_before_any_boundary_call() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::default();
        let (bridge, sink) = bridge(sync_config());

        let err = bridge
            .initialize(
                FakeBackend::new(journal.clone(), Fault::None),
                &dir.path().join("ext.dll"),
            )
            .unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::AssemblyNotFound));
        assert_eq!(bridge.state(), BridgeState::Uninitialized);
        assert!(journal.entries().is_empty());
        assert!(sink.text(LogLevel::Error).contains("Status: 0x80070002"));
    }

    #[test]
    fn failed_initialize_releases_everything_it_acquired() {
        let cases = [
            (Fault::Resolve, ErrorKind::VersionResolution),
            (Fault::Callback, ErrorKind::Start),
            (Fault::Start, ErrorKind::Start),
            (Fault::CreateDomain, ErrorKind::DomainCreation),
            (Fault::Load, ErrorKind::Load),
            (Fault::Instantiate, ErrorKind::Instantiation),
        ];

        for (fault, kind) in cases {
            let (_dir, path) = scratch_assembly();
            let journal = Journal::default();
            let (bridge, _sink) = bridge(sync_config());

            let err = bridge
                .initialize(FakeBackend::new(journal.clone(), fault), &path)
                .unwrap_err();

            assert_eq!(err.kind(), Some(kind), "{:?}", fault);
            assert_eq!(bridge.state(), BridgeState::Uninitialized, "{:?}", fault);
            let domains = journal.count("create_domain") - usize::from(fault == Fault::CreateDomain);
            assert_eq!(journal.count("drop_domain"), domains, "{:?}", fault);
            let started = usize::from(journal.count("start") > 0 && fault != Fault::Start);
            assert_eq!(journal.count("stop"), started, "{:?}", fault);
        }
    }

    #[test]
    fn rollback_unloads_domain_before_stopping() {
        let (_dir, path) = scratch_assembly();
        let journal = Journal::default();
        let (bridge, _sink) = bridge(sync_config());
        bridge
            .initialize(FakeBackend::new(journal.clone(), Fault::Instantiate), &path)
            .unwrap_err();

        let unload = journal.position("unload").unwrap();
        let stop = journal.position("stop").unwrap();
        assert!(unload < stop);
    }

    #[test]
    fn commands_before_initialize_make_no_boundary_call() {
        let (bridge, sink) = bridge(sync_config());
        let client = host_client(0x10);

        let results = [
            bridge.execute(client, "script.csx"),
            bridge.execute_text(client, "script.csx"),
            bridge.enter_interactive_mode(client, ""),
            bridge.interpret(client, "1 + 1"),
            bridge.open_ui(client, "true"),
        ];

        for result in results {
            let err = result.unwrap_err();
            assert_eq!(err.kind(), Some(ErrorKind::Invocation));
            assert_eq!(err.status(), Status::E_UNEXPECTED);
        }
        assert_eq!(bridge.bound_client(), None);
        assert!(sink.text(LogLevel::Error).contains("bridge is not initialized"));
    }

    #[test]
    fn execute_marshals_script_and_arguments() {
        let (bridge, journal, _sink, _dir) = ready(Fault::None);
        let client = host_client(0x10);

        bridge.execute(client, "myscript.csx 1 two").unwrap();

        assert_eq!(bridge.state(), BridgeState::Ready);
        assert!(journal.entries().contains(&"execute:myscript.csx:1,two".to_string()));
        assert_eq!(bridge.bound_client(), Some(client));
    }

    #[test]
    fn single_string_commands_forward_raw_text() {
        let (bridge, journal, _sink, _dir) = ready(Fault::None);
        let client = host_client(0x10);

        bridge.execute_text(client, "a  b").unwrap();
        bridge.enter_interactive_mode(client, "").unwrap();
        bridge.interpret(client, "var x = 1;").unwrap();
        bridge.open_ui(client, "false").unwrap();

        let entries = journal.entries();
        for expected in [
            "execute_text:a  b",
            "interactive:",
            "interpret:var x = 1;",
            "openui:false",
        ] {
            assert!(entries.contains(&expected.to_string()), "{}", expected);
        }
    }

    #[test]
    fn same_client_binds_once() {
        let (bridge, journal, _sink, _dir) = ready(Fault::None);
        let client = host_client(0x10);

        bridge.execute(client, "a.csx").unwrap();
        bridge.execute(client, "b.csx").unwrap();

        assert_eq!(journal.count("bind"), 1);
        assert_eq!(journal.count("execute"), 2);
    }

    #[test]
    fn different_client_rebinds() {
        let (bridge, journal, _sink, _dir) = ready(Fault::None);

        bridge.interpret(host_client(0x10), "1").unwrap();
        bridge.interpret(host_client(0x20), "2").unwrap();

        assert_eq!(journal.count("bind"), 2);
        assert_eq!(bridge.bound_client(), Some(host_client(0x20)));
    }

    #[test]
    fn failed_bind_skips_the_command() {
        let (bridge, journal, _sink, _dir) = ready(Fault::Bind);
        let err = bridge.interpret(host_client(0x10), "1").unwrap_err();
        assert_eq!(err.status(), Status::E_POINTER);
        assert_eq!(journal.count("interpret"), 0);
        assert_eq!(bridge.bound_client(), None);
        assert_eq!(bridge.state(), BridgeState::Ready);
    }

    #[test]
    fn managed_failure_status_passes_through() {
        let (bridge, _journal, sink, _dir) = ready(Fault::Invoke);

        let err = bridge.interpret(host_client(0x10), "throw").unwrap_err();

        assert_eq!(err.status(), SCRIPT_FAILURE);
        assert_eq!(bridge.state(), BridgeState::Ready);
        let report = sink.text(LogLevel::Error);
        assert!(report.contains("Expression: Interpret"));
        assert!(report.contains("Description: script threw an exception"));
    }

    #[test]
    fn concurrent_commands_are_serialized() {
        let (bridge, journal, _sink, _dir) = ready(Fault::None);
        let bridge = Arc::new(bridge);

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let bridge = Arc::clone(&bridge);
                std::thread::spawn(move || {
                    for _ in 0..3 {
                        bridge.execute(host_client(0x10), &format!("s{}.csx", i)).unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(journal.count("execute"), 12);
        assert_eq!(journal.peak_concurrency(), 1);
    }

    #[test]
    fn fast_uninitialize_releases_entry_only() {
        let (bridge, journal, _sink, _dir) = ready(Fault::None);
        bridge.execute(host_client(0x10), "a.csx").unwrap();

        let failures = bridge.uninitialize(false).wait();

        assert!(failures.is_empty());
        assert_eq!(bridge.state(), BridgeState::Uninitialized);
        assert_eq!(bridge.bound_client(), None);
        assert!(journal.entries().contains(&"bind:0x0".to_string()));
        assert_eq!(journal.count("drop_entry"), 1);
        assert_eq!(journal.count("unload"), 0);
        assert_eq!(journal.count("stop"), 0);

        let err = bridge.execute(host_client(0x10), "a.csx").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Invocation));
    }

    #[test]
    fn unbound_entry_is_not_unbound_again() {
        let (bridge, journal, _sink, _dir) = ready(Fault::None);
        bridge.uninitialize(false).wait();
        assert_eq!(journal.count("bind"), 0);
    }

    #[test]
    fn fast_then_full_uninitialize_completes_teardown() {
        let (bridge, journal, _sink, _dir) = ready(Fault::None);

        bridge.uninitialize(false).wait();
        let failures = bridge.uninitialize(true).wait();

        assert!(failures.is_empty());
        assert_eq!(journal.count("unload"), 1);
        assert_eq!(journal.count("stop"), 1);
        assert_eq!(journal.count("drop_domain"), 1);

        assert!(bridge.uninitialize(true).wait().is_empty());
        assert_eq!(journal.count("stop"), 1);
    }

    #[test]
    fn async_full_uninitialize_runs_on_worker() {
        let (dir, path) = scratch_assembly();
        let journal = Journal::default();
        let (bridge, _sink) = bridge(BridgeConfig::default());
        bridge
            .initialize(FakeBackend::new(journal.clone(), Fault::None), &path)
            .unwrap();

        let teardown = bridge.uninitialize(true);
        assert!(teardown.is_pending());
        assert_eq!(bridge.state(), BridgeState::Uninitialized);

        assert!(teardown.wait().is_empty());
        assert!(journal.position("unload").unwrap() < journal.position("stop").unwrap());
        drop(dir);
    }

    #[test]
    fn teardown_continues_after_unload_failure() {
        let (bridge, journal, sink, _dir) = ready(Fault::Unload);

        let failures = bridge.uninitialize(true).wait();

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].kind(), Some(ErrorKind::Teardown));
        assert_eq!(journal.count("stop"), 1);
        assert_eq!(journal.count("drop_domain"), 1);
        assert!(sink.text(LogLevel::Warning).contains("Expression: UnloadDomain"));
    }

    #[test]
    fn second_initialize_is_a_no_op() {
        let (bridge, journal, _sink, dir) = ready(Fault::None);
        let path = dir.path().join("Ext.dll");

        bridge
            .initialize(FakeBackend::new(journal.clone(), Fault::None), &path)
            .unwrap();

        assert_eq!(journal.count("start"), 1);
        assert_eq!(journal.count("instantiate"), 1);
    }

    #[test]
    fn initialize_after_fast_uninitialize_reuses_runtime() {
        let (bridge, journal, _sink, dir) = ready(Fault::None);
        let path = dir.path().join("Ext.dll");

        bridge.uninitialize(false).wait();
        bridge
            .initialize(FakeBackend::new(journal.clone(), Fault::None), &path)
            .unwrap();

        assert_eq!(bridge.state(), BridgeState::Ready);
        assert_eq!(journal.count("start"), 1);
        assert_eq!(journal.count("create_domain"), 1);
        assert_eq!(journal.count("instantiate"), 2);
    }

    #[test]
    fn captured_domain_manager_becomes_entry_object() {
        let (_dir, path) = scratch_assembly();
        let journal = Journal::default();
        let (bridge, _sink) = bridge(sync_config());
        bridge
            .initialize(
                FakeBackend::new(journal.clone(), Fault::None).with_manager("executor"),
                &path,
            )
            .unwrap();

        assert_eq!(journal.count("adopt"), 1);
        assert_eq!(journal.count("load"), 0);
        bridge.interpret(host_client(0x10), "1").unwrap();
        assert_eq!(journal.count("interpret"), 1);
    }

    #[test]
    fn unrelated_domain_manager_falls_back_to_instantiation() {
        let (_dir, path) = scratch_assembly();
        let journal = Journal::default();
        let (bridge, _sink) = bridge(sync_config());
        bridge
            .initialize(
                FakeBackend::new(journal.clone(), Fault::None).with_manager("other"),
                &path,
            )
            .unwrap();

        assert_eq!(journal.count("adopt"), 1);
        assert_eq!(journal.count("instantiate"), 1);
    }

    #[test]
    fn default_domain_manager_is_not_adopted() {
        let (_dir, path) = scratch_assembly();
        let journal = Journal::default();
        let (bridge, _sink) = bridge(sync_config());
        bridge
            .initialize(
                FakeBackend::new(journal.clone(), Fault::None).with_start_manager("executor"),
                &path,
            )
            .unwrap();

        assert_eq!(journal.count("adopt"), 0);
        assert_eq!(journal.count("load"), 1);
        assert_eq!(journal.count("instantiate"), 1);
    }

    #[test]
    fn reinitialize_waits_for_pending_teardown() {
        let (_dir, path) = scratch_assembly();
        let journal = Journal::default();
        let (bridge, _sink) = bridge(BridgeConfig::default());
        let backend =
            || FakeBackend::new(journal.clone(), Fault::None).with_stop_delay(Duration::from_millis(50));
        bridge.initialize(backend(), &path).unwrap();

        let teardown = bridge.uninitialize(true);
        assert!(teardown.is_pending());
        bridge.initialize(backend(), &path).unwrap();

        assert_eq!(bridge.state(), BridgeState::Ready);
        assert_eq!(journal.peak_runtimes(), 1);
        let entries = journal.entries();
        let second_start = entries.iter().rposition(|e| e.starts_with("start:")).unwrap();
        assert!(journal.position("stop").unwrap() < second_start);
        assert!(teardown.wait().is_empty());
    }

    #[test]
    fn image_without_clr_header_is_rejected_before_start() {
        let (_dir, path) = scratch_assembly();
        let journal = Journal::default();
        let (bridge, sink) = bridge(sync_config());

        let err = bridge
            .initialize(
                FakeBackend::new(journal.clone(), Fault::None).with_image_check(),
                &path,
            )
            .unwrap_err();

        assert_eq!(err.kind(), Some(ErrorKind::Load));
        assert_eq!(err.status(), Status::COR_E_BADIMAGEFORMAT);
        assert_eq!(bridge.state(), BridgeState::Uninitialized);
        assert!(journal.entries().is_empty());
        assert!(sink.text(LogLevel::Error).contains("inspect"));
    }

    #[test]
    fn detach_abandons_entry_without_managed_calls() {
        let (bridge, journal, _sink, _dir) = ready(Fault::None);
        bridge.execute(host_client(0x10), "a.csx").unwrap();

        bridge.detach();

        assert_eq!(bridge.state(), BridgeState::Uninitialized);
        assert_eq!(bridge.bound_client(), None);
        assert_eq!(journal.count("bind"), 1);
        assert_eq!(journal.count("drop_entry"), 0);

        assert!(bridge.uninitialize(true).wait().is_empty());
        assert_eq!(journal.count("unload"), 1);
        assert_eq!(journal.count("stop"), 1);
    }

    #[test]
    fn state_round_trips_through_atomic() {
        for state in [
            BridgeState::Uninitialized,
            BridgeState::Initializing,
            BridgeState::Ready,
            BridgeState::Invoking,
            BridgeState::Uninitializing,
        ] {
            assert_eq!(BridgeState::from_u8(state as u8), state);
        }
    }
}
