//! Error types for Pathwatch.

use std::io;

use thiserror::Error;

use crate::types::PathKind;

/// Result type alias for Pathwatch operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Pathwatch.
#[derive(Error, Debug)]
pub enum Error {
    // Acquisition errors
    #[error("acquisition error: {0}")]
    Acquire(#[from] AcquireError),

    #[error("no {0} path held")]
    PathNotHeld(PathKind),

    // Binding errors
    #[error("bind error: {0}")]
    Bind(#[from] BindError),

    // Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // General errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Path acquisition failures.
///
/// These surface to consumers as a denial reason string on the relevant status
/// cell, never as a crash; the typed form exists so provider internals stay
/// matchable.
#[derive(Error, Debug)]
pub enum AcquireError {
    #[error("no ssid configured")]
    NoSsidConfigured,

    #[error("interface {0} not found")]
    NoSuchInterface(String),

    #[error("interface {0} is down")]
    InterfaceDown(String),

    #[error("no interface associated with ssid \"{0}\"")]
    SsidNotAssociated(String),

    #[error("no default route")]
    NoDefaultRoute,

    #[error("path acquisition unsupported on this platform: {0}")]
    Unsupported(String),

    #[error("provider failure: {0}")]
    Provider(String),
}

/// Transport binding failures.
///
/// Binding to the wrong path would silently defeat split routing, so every
/// variant here is a hard error for the operation that hit it; there is no
/// fallback to the default route.
#[derive(Error, Debug)]
pub enum BindError {
    #[error("binding to {interface} requires elevated privileges")]
    Permission { interface: String },

    #[error("failed to bind to {interface}: {reason}")]
    InterfaceBind { interface: String, reason: String },

    #[error("interface {interface} has no usable address")]
    NoAddress { interface: String },

    #[error("socket setup failed: {0}")]
    SocketSetup(String),

    #[error("HTTP client construction failed: {0}")]
    HttpClient(String),
}

impl Error {
    /// Check if error is recoverable (worth retrying on a later tick).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Bind(BindError::InterfaceBind { .. } | BindError::SocketSetup(_))
                | Error::Acquire(AcquireError::Provider(_))
        )
    }

    /// Check if error means the operator must grant privileges.
    pub fn is_permission(&self) -> bool {
        matches!(self, Error::Bind(BindError::Permission { .. }))
    }
}
