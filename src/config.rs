//! Compilation run configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default directory scanned for plugin executables.
const DEFAULT_PLUGIN_DIR: &str = "plugins";

/// Default directory holding `<zone>.serial` state files.
const DEFAULT_SERIAL_INDEX_DIR: &str = "serials";

/// Settings in effect for one compilation run.
///
/// Built once by the caller and handed by value to every plugin's
/// `Configure` call.
///
/// # Example
///
/// ```
/// use zone_compiler::Config;
///
/// let config = Config::new("/usr/lib/zonec/plugins")
///     .with_generate_serial(true)
///     .with_serial_index_dir("/var/lib/zonec/serials");
///
/// assert!(config.generate_serial);
/// assert!(!config.generate_reverse_zones);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory whose executables are launched as plugins.
    pub plugin_directory: PathBuf,

    /// Stamp SOA records with a serial from the serial manager.
    pub generate_serial: bool,

    /// Where per-zone serial state files live.
    pub serial_index_directory: PathBuf,

    /// Ask plugins to emit reverse (PTR) zones where they support it.
    pub generate_reverse_zones: bool,
}

impl Config {
    /// Creates a config for `plugin_directory` with both toggles off.
    #[must_use]
    pub fn new(plugin_directory: impl Into<PathBuf>) -> Self {
        Self {
            plugin_directory: plugin_directory.into(),
            ..Self::default()
        }
    }

    /// Enables or disables SOA serial generation.
    #[must_use]
    pub const fn with_generate_serial(mut self, enabled: bool) -> Self {
        self.generate_serial = enabled;
        self
    }

    /// Overrides the serial index directory.
    #[must_use]
    pub fn with_serial_index_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.serial_index_directory = dir.into();
        self
    }

    /// Enables or disables reverse zone generation.
    #[must_use]
    pub const fn with_generate_reverse_zones(mut self, enabled: bool) -> Self {
        self.generate_reverse_zones = enabled;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugin_directory: PathBuf::from(DEFAULT_PLUGIN_DIR),
            generate_serial: false,
            serial_index_directory: PathBuf::from(DEFAULT_SERIAL_INDEX_DIR),
            generate_reverse_zones: false,
        }
    }
}
