//! dconfig - shared configuration distribution daemon.
//!
//! Applications describe their settings in schema documents shipped under
//! search roots. The daemon loads each resource once, layers deployment
//! overrides and a per-user cache over the schema defaults, and serves the
//! result to every client through lightweight connections:
//!
//! - Typed values with structural equality and JSON conversion
//! - Schema lookup across ordered roots with subpath fallback
//! - Layered overrides with atomic write-back
//! - Change notification fan-out to all connections of a resource
//! - Reference counting with a grace window before teardown
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dconfig::{center::ConfigCenter, settings::DaemonSettings, value::Value};
//!
//! let settings = DaemonSettings::load(None)?;
//! let center = ConfigCenter::new(&settings)?;
//!
//! let connection = center.open(":1.42", "org.foo.appid", "example", "")?;
//! connection.set_value("canExit", Value::Bool(false))?;
//! println!("{:?}", connection.value("canExit")?);
//! # Ok::<(), dconfig::DConfigError>(())
//! ```

/// Core error types and result aliases.
pub mod core;

/// Dynamically typed configuration values.
pub mod value;

/// Schema documents, identities and lookup.
pub mod schema;

/// Resources, override layers and connections.
pub mod resource;

/// Service to resource reference tracking.
pub mod refs;

/// Registry of live resources.
pub mod center;

/// Daemon settings.
pub mod settings;

/// D-Bus front-end.
pub mod bus;

/// Logging setup.
pub mod tracing_config;

/// Re-exported core types for convenience.
pub use self::core::{DConfigError, Result};
