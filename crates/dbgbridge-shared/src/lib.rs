//! Core of the runtime-hosting bridge.
//!
//! The bridge lets a debugger host call into a managed extension assembly:
//!
//! - [`RuntimeHost`] - resolves the runtime version and starts/stops the runtime
//! - [`ExecutionDomain`] - creates the isolated domain, loads the assembly, creates the entry object
//! - [`marshal`] - copies host argument text into boundary-owned arrays and strings
//! - [`ErrorReporter`] - renders boundary failures for the host
//! - [`Bridge`] - the command dispatcher state machine the host talks to
//!
//! Everything here is platform independent. The runtime itself is reached
//! through [`RuntimeBackend`], implemented for the CLR by the extension crate.

pub mod assembly;
pub mod callback;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod marshal;
pub mod report;
pub mod runtime;
pub mod status;
pub mod version;

#[cfg(test)]
mod testing;

pub use assembly::{AssemblyProbe, ImageBitness, full_name_matches, locate, probe_assembly};
pub use callback::HostCallback;
pub use config::{BridgeConfig, debug_extension_version};
pub use dispatch::{Bridge, BridgeState, Teardown};
pub use error::{BoundaryFailure, Error, ErrorKind, Result, RichError};
pub use marshal::{
    BoundaryArray, BoundaryString, ScriptInvocation, WideArray, WideText, parse_modal_flag,
    split_arguments,
};
pub use report::{ErrorReporter, LogLevel, MemorySink, ReportSink, TracingSink};
pub use runtime::{
    DomainBackend, EntryObject, ExecutionDomain, HostClient, RuntimeBackend, RuntimeHost,
};
pub use status::Status;
pub use version::{RuntimeVersion, select_highest_compatible};
