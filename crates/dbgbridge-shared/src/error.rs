//! Error types for the bridge.

use crate::Status;
use std::fmt;
use thiserror::Error;

/// Rich error information surfaced by the managed side of a failed call.
///
/// Either field may be missing; rendering copes with any combination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RichError {
    /// Short description (`IErrorInfo::GetDescription`, exception message).
    pub description: Option<String>,
    /// Stringified error object (`Exception.ToString()`), usually with a stack trace.
    pub details: Option<String>,
}

impl RichError {
    pub fn is_empty(&self) -> bool {
        self.description.is_none() && self.details.is_none()
    }
}

/// A failed boundary call: the status it returned and the operation that returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryFailure {
    pub status: Status,
    pub expression: String,
    pub rich: Option<RichError>,
}

impl BoundaryFailure {
    pub fn new(status: Status, expression: impl Into<String>) -> Self {
        Self {
            status,
            expression: expression.into(),
            rich: None,
        }
    }

    pub fn with_rich(mut self, rich: Option<RichError>) -> Self {
        self.rich = rich.filter(|r| !r.is_empty());
        self
    }

    pub fn with_description(self, description: impl Into<String>) -> Self {
        self.with_rich(Some(RichError {
            description: Some(description.into()),
            details: None,
        }))
    }
}

impl fmt::Display for BoundaryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed with {}", self.expression, self.status)?;
        if let Some(description) = self.rich.as_ref().and_then(|r| r.description.as_deref()) {
            write!(f, ": {}", description)?;
        }
        Ok(())
    }
}

/// Failure category, one per bridge stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    VersionResolution,
    Start,
    DomainCreation,
    AssemblyNotFound,
    Load,
    Instantiation,
    Invocation,
    Teardown,
}

impl ErrorKind {
    pub fn wrap(self, failure: BoundaryFailure) -> Error {
        match self {
            ErrorKind::VersionResolution => Error::VersionResolution(failure),
            ErrorKind::Start => Error::Start(failure),
            ErrorKind::DomainCreation => Error::DomainCreation(failure),
            ErrorKind::AssemblyNotFound => Error::AssemblyNotFound(failure),
            ErrorKind::Load => Error::Load(failure),
            ErrorKind::Instantiation => Error::Instantiation(failure),
            ErrorKind::Invocation => Error::Invocation(failure),
            ErrorKind::Teardown => Error::Teardown(failure),
        }
    }

    pub fn failure(self, status: Status, expression: impl Into<String>) -> Error {
        self.wrap(BoundaryFailure::new(status, expression))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Runtime version resolution failed: {0}")]
    VersionResolution(BoundaryFailure),

    #[error("Runtime start failed: {0}")]
    Start(BoundaryFailure),

    #[error("Domain creation failed: {0}")]
    DomainCreation(BoundaryFailure),

    #[error("Assembly not found: {0}")]
    AssemblyNotFound(BoundaryFailure),

    #[error("Assembly load failed: {0}")]
    Load(BoundaryFailure),

    #[error("Entry type instantiation failed: {0}")]
    Instantiation(BoundaryFailure),

    #[error("Command invocation failed: {0}")]
    Invocation(BoundaryFailure),

    #[error("Teardown failed: {0}")]
    Teardown(BoundaryFailure),

    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsError(#[from] windows::core::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Precondition failure for commands issued outside the `Ready` state.
    pub fn not_initialized(operation: &str) -> Self {
        ErrorKind::Invocation.failure(
            Status::E_UNEXPECTED,
            format!("{}: bridge is not initialized", operation),
        )
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        Some(match self {
            Error::VersionResolution(_) => ErrorKind::VersionResolution,
            Error::Start(_) => ErrorKind::Start,
            Error::DomainCreation(_) => ErrorKind::DomainCreation,
            Error::AssemblyNotFound(_) => ErrorKind::AssemblyNotFound,
            Error::Load(_) => ErrorKind::Load,
            Error::Instantiation(_) => ErrorKind::Instantiation,
            Error::Invocation(_) => ErrorKind::Invocation,
            Error::Teardown(_) => ErrorKind::Teardown,
            _ => return None,
        })
    }

    pub fn failure(&self) -> Option<&BoundaryFailure> {
        match self {
            Error::VersionResolution(f)
            | Error::Start(f)
            | Error::DomainCreation(f)
            | Error::AssemblyNotFound(f)
            | Error::Load(f)
            | Error::Instantiation(f)
            | Error::Invocation(f)
            | Error::Teardown(f) => Some(f),
            _ => None,
        }
    }

    /// Status code handed back to the host, unchanged from the boundary.
    pub fn status(&self) -> Status {
        match self {
            #[cfg(windows)]
            Error::WindowsError(e) => Status(e.code().0),
            Error::IoError(e) => match e.raw_os_error() {
                // HRESULT_FROM_WIN32
                Some(code) if code > 0 => Status(((code as u32 & 0xFFFF) | 0x80070000) as i32),
                _ => Status::E_FAIL,
            },
            Error::Other(_) => Status::E_FAIL,
            _ => self.failure().map(|f| f.status).unwrap_or(Status::E_FAIL),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
