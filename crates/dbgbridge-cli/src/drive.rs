//! Runs one command through a freshly initialized bridge.

use crate::Target;
use dbgbridge_shared::{Result, RuntimeVersion};
use std::path::Path;

/// Which bridge command to forward the text to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Execute,
    ExecuteText,
    Interpret,
}

#[cfg(windows)]
pub fn run(target: &Target, command: Command, text: &str) -> Result<()> {
    use dbgbridge::ClrBackend;
    use dbgbridge_shared::{Bridge, BridgeConfig, HostClient};

    let mut config = BridgeConfig::from_env();
    config.async_teardown = false;
    if let Some(assembly) = &target.assembly {
        config.assembly = assembly.clone();
    }
    if let Some(entry_type) = &target.entry_type {
        config.entry_type = entry_type.clone();
    }

    let assembly = config.assembly_path(&std::env::current_dir()?);
    let bridge: Bridge<ClrBackend> = Bridge::new(config);
    bridge.initialize(ClrBackend::default(), &assembly)?;

    let client = HostClient::null();
    let result = match command {
        Command::Execute => bridge.execute(client, text),
        Command::ExecuteText => bridge.execute_text(client, text),
        Command::Interpret => bridge.interpret(client, text),
    };

    let failures = bridge.uninitialize(true).wait();
    if !failures.is_empty() {
        tracing::warn!("Teardown finished with {} failure(s)", failures.len());
    }
    result
}

#[cfg(not(windows))]
pub fn run(_target: &Target, command: Command, _text: &str) -> Result<()> {
    Err(requires_windows(&format!("{:?}", command)))
}

#[cfg(windows)]
pub fn resolve_runtime(assembly: &Path) -> Result<RuntimeVersion> {
    use dbgbridge::ClrBackend;
    use dbgbridge_shared::RuntimeBackend;

    let mut backend = ClrBackend::default();
    backend.resolve_version(assembly)
}

#[cfg(not(windows))]
pub fn resolve_runtime(_assembly: &Path) -> Result<RuntimeVersion> {
    Err(requires_windows("runtime resolution"))
}

#[cfg(not(windows))]
fn requires_windows(what: &str) -> dbgbridge_shared::Error {
    dbgbridge_shared::Error::Other(format!("{} requires Windows", what))
}
