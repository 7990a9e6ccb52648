//! # zone-compiler
//!
//! Compile a declarative DNS zone description into zone file text, with the
//! per-record-type logic supplied by out-of-process plugins.
//!
//! Each executable in the plugin directory is launched as a subprocess,
//! handshakes with the host, and announces the record types it owns. The
//! compiler then configures, normalizes, validates and renders every record
//! through its owning plugin. SOA records can be stamped with a serial from
//! a per-zone counter that is safe to share between processes.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use zone_compiler::{Config, LaunchOptions, TypeRegistry, ZoneCompiler};
//!
//! let config = Config::new("/usr/lib/zonec/plugins")
//!     .with_generate_serial(true)
//!     .with_serial_index_dir("/var/lib/zonec");
//!
//! // Plugin subprocesses live as long as the registry.
//! let registry = TypeRegistry::load(&config, &LaunchOptions::default())?;
//! let text = ZoneCompiler::from_config(&registry, &config).compile("example.com", &zone)?;
//! ```
//!
//! ## Writing a plugin
//!
//! Implement [`RecordPlugin`] and hand it to [`plugin::serve`] from `main`:
//!
//! ```rust,ignore
//! fn main() {
//!     if let Err(e) = zone_compiler::plugin::serve(&MyPlugin::default()) {
//!         eprintln!("{e}");
//!         std::process::exit(1);
//!     }
//! }
//! ```
//!
//! ## Serials
//!
//! [`SerialManager`] issues `YYYYMMDDnn` serials per zone, persisted under
//! the serial index directory and guarded by an `flock`, so concurrent
//! invocations never reuse a value.

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod compiler;
pub mod config;
pub mod error;
pub mod plugin;
pub mod process;
pub mod registry;
pub mod serial;
pub mod util;
pub mod wire;
pub mod zone;

pub use compiler::ZoneCompiler;
pub use config::Config;
pub use error::{PluginError, Result, ZoneError};
pub use plugin::{PluginType, RecordPlugin};
pub use process::{LaunchOptions, ProcessPlugin};
pub use registry::{RegisteredPlugin, RegistryBuilder, TypeRegistry};
pub use serial::{SerialIndex, SerialManager};
pub use zone::{Class, ResourceRecord, ResourceRecordValue, Ttl, Zone};
