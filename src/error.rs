//! Error types shared across the daemon.

use thiserror::Error;

/// Errors that abort startup.
#[derive(Error, Debug)]
pub enum StartError {
    #[error("Session channel {name} is already owned by another instance")]
    AlreadyOwned { name: String },

    #[error("Failed to acquire session channel: {0}")]
    SessionAcquisition(String),
}

/// Errors from the lock manager.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ManagerError {
    #[error("Lock manager used before preferences were applied")]
    NotConfigured,
}

/// Errors from the X11 display connection.
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Failed to connect to X display: {0}")]
    Connect(#[from] x11rb::errors::ConnectError),

    #[error("X connection error: {0}")]
    Connection(#[from] x11rb::errors::ConnectionError),

    #[error("X request failed: {0}")]
    Reply(#[from] x11rb::errors::ReplyError),

    #[error("X display has no screen {0}")]
    NoScreen(usize),

    #[error("X server does not support the {0} extension")]
    MissingExtension(&'static str),

    #[error("Display channel not acquired")]
    NotAcquired,
}
