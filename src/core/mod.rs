use std::{
    fmt, io,
    path::{Path, PathBuf},
    result,
};

use thiserror::Error;

/// Error types for the configuration daemon.
///
/// Covers schema loading, per-call value operations on a resource,
/// persistence of override layers and daemon settings.
#[derive(Error, Debug)]
pub enum DConfigError {
    /// The identity does not resolve to a schema under any search root
    #[error("configuration '{resource}' not found in any search root")]
    NotFound {
        /// Canonical key of the identity that was looked up
        resource: String,
    },

    /// A schema or layer document failed validation
    #[error("malformed document '{location}': {details}")]
    Malformed {
        /// File path (or "string") of the offending document
        location: String,
        /// What was wrong with it
        details: String,
    },

    /// The key is not declared by the resource's schema
    #[error("unknown key '{key}' in '{resource}'")]
    UnknownKey {
        /// Resource the key was looked up in
        resource: String,
        /// The undeclared key
        key: String,
    },

    /// A write was attempted on a read-only key
    #[error("key '{key}' in '{resource}' is read-only")]
    ReadOnly {
        /// Resource owning the key
        resource: String,
        /// The protected key
        key: String,
    },

    /// The connection has already been released
    #[error("connection {watcher} to '{resource}' has been released")]
    Released {
        /// Resource the connection was bound to
        resource: String,
        /// Watcher id of the released connection
        watcher: u64,
    },

    /// Application id, file name or subpath is not a valid identity
    #[error("invalid resource identity: {reason}")]
    InvalidIdentity {
        /// Why the identity was rejected
        reason: String,
    },

    /// Writing an override layer to disk failed
    #[error("failed to persist '{path}': {details}")]
    PersistenceError {
        /// Target file of the write
        path: PathBuf,
        /// I/O or serialization error details
        details: String,
    },

    /// A lock guarding shared state was poisoned
    #[error("failed to acquire {lock_type} lock: {details}")]
    LockError {
        /// Which lock failed
        lock_type: &'static str,
        /// Lock error details
        details: String,
    },

    /// Daemon settings file could not be parsed
    #[error("failed to parse settings at '{location}': {details}")]
    SettingsParse {
        /// Location of the settings file
        location: String,
        /// Parse error details
        details: String,
    },

    /// Message bus connection or export failed
    #[error("D-Bus error: {0}")]
    Bus(#[from] zbus::Error),

    /// Standard I/O operation error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A specialized `Result` type for daemon operations.
pub type Result<T> = result::Result<T, DConfigError>;

impl DConfigError {
    /// Creates a malformed-document error with file path context.
    ///
    /// # Arguments
    ///
    /// * `error` - The underlying validation or parse error
    /// * `path` - Optional path to the document, `None` for in-memory input
    pub fn malformed(error: impl fmt::Display, path: Option<&Path>) -> Self {
        let location = match path {
            Some(p) => {
                let clean_path = p.canonicalize().unwrap_or_else(|_| p.to_path_buf());
                clean_path.to_string_lossy().to_string()
            }
            None => "string".to_string(),
        };

        DConfigError::Malformed {
            location,
            details: error.to_string(),
        }
    }

    /// Creates a lock error from a poisoned lock.
    pub fn lock(lock_type: &'static str, error: impl fmt::Display) -> Self {
        DConfigError::LockError {
            lock_type,
            details: error.to_string(),
        }
    }
}
