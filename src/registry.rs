//! Record type to plugin mapping.
//!
//! Plugins are registered once at startup through a [`RegistryBuilder`].
//! [`RegistryBuilder::build`] freezes the result into a [`TypeRegistry`] that
//! only answers lookups.

use crate::config::Config;
use crate::error::{Result, ZoneError};
use crate::plugin::{PluginType, RecordPlugin};
use crate::process::{LaunchOptions, ProcessPlugin, discover};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A plugin that passed registration.
pub struct RegisteredPlugin {
    index: usize,
    name: String,
    version: String,
    types: BTreeSet<PluginType>,
    plugin: Arc<dyn RecordPlugin>,
}

impl RegisteredPlugin {
    /// Position in registration order. Unique per registry.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub const fn types(&self) -> &BTreeSet<PluginType> {
        &self.types
    }

    /// The capability interface behind this entry.
    #[must_use]
    pub fn plugin(&self) -> &dyn RecordPlugin {
        self.plugin.as_ref()
    }
}

impl std::fmt::Debug for RegisteredPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredPlugin")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("types", &self.types)
            .finish_non_exhaustive()
    }
}

/// Collects plugins and rejects conflicting type claims.
#[derive(Default)]
pub struct RegistryBuilder {
    plugins: Vec<RegisteredPlugin>,
    owners: BTreeMap<PluginType, usize>,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks `plugin` for its version and types and records its claims.
    ///
    /// # Errors
    ///
    /// Returns [`ZoneError::Configuration`] if either call fails, the plugin
    /// claims no types, or a type is already owned by an earlier plugin.
    /// Nothing is recorded when registration fails.
    pub fn register(&mut self, name: impl Into<String>, plugin: Arc<dyn RecordPlugin>) -> Result<()> {
        let name = name.into();

        let version = plugin.plugin_version().map_err(|e| {
            ZoneError::Configuration(format!("plugin {name}: PluginVersion failed: {e}"))
        })?;
        let types = plugin.plugin_types().map_err(|e| {
            ZoneError::Configuration(format!("plugin {name}: PluginTypes failed: {e}"))
        })?;
        if types.is_empty() {
            return Err(ZoneError::Configuration(format!(
                "plugin {name} does not handle any record type"
            )));
        }

        for rr_type in &types {
            if let Some(&owner) = self.owners.get(rr_type) {
                return Err(ZoneError::Configuration(format!(
                    "record type {rr_type} is claimed by both plugin {} and plugin {name}",
                    self.plugins[owner].name
                )));
            }
        }

        let index = self.plugins.len();
        for rr_type in &types {
            self.owners.insert(rr_type.clone(), index);
        }
        tracing::info!(
            plugin = %name,
            version = %version,
            types = ?types.iter().map(PluginType::as_str).collect::<Vec<_>>(),
            "Registered plugin"
        );
        self.plugins.push(RegisteredPlugin {
            index,
            name,
            version,
            types,
            plugin,
        });
        Ok(())
    }

    /// Freezes the registry.
    #[must_use]
    pub fn build(self) -> TypeRegistry {
        TypeRegistry {
            plugins: self.plugins,
            owners: self.owners,
        }
    }
}

/// Immutable map from record type to the plugin that owns it.
///
/// Dropping the registry drops every plugin handle; process-backed plugins
/// kill their subprocess at that point.
pub struct TypeRegistry {
    plugins: Vec<RegisteredPlugin>,
    owners: BTreeMap<PluginType, usize>,
}

impl TypeRegistry {
    #[must_use]
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Launches every plugin in `config.plugin_directory` and registers it.
    ///
    /// A plugin that fails its handshake is logged and skipped; the others
    /// still register.
    ///
    /// # Errors
    ///
    /// Returns [`ZoneError::Configuration`] if the directory cannot be read
    /// or any launched plugin fails registration. Plugins launched before
    /// the failure are shut down.
    pub fn load(config: &Config, options: &LaunchOptions) -> Result<Self> {
        let mut builder = RegistryBuilder::new();
        for path in discover(&config.plugin_directory)? {
            let plugin = match ProcessPlugin::launch(&path, options) {
                Ok(plugin) => plugin,
                Err(e @ ZoneError::Handshake { .. }) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping plugin");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let name = plugin.name().to_string();
            builder.register(name, Arc::new(plugin))?;
        }
        Ok(builder.build())
    }

    /// Returns the plugin owning `rr_type` (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns [`ZoneError::UnsupportedType`] if no plugin claims it.
    pub fn resolve(&self, rr_type: &str) -> Result<&RegisteredPlugin> {
        self.owners
            .get(&PluginType::new(rr_type))
            .map(|&index| &self.plugins[index])
            .ok_or_else(|| ZoneError::UnsupportedType {
                rr_type: rr_type.to_string(),
            })
    }

    /// Registered plugins in registration order.
    pub fn plugins(&self) -> impl Iterator<Item = &RegisteredPlugin> {
        self.plugins.iter()
    }

    /// Every claimed type, sorted.
    pub fn types(&self) -> impl Iterator<Item = &PluginType> {
        self.owners.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Drops every plugin, terminating subprocesses now rather than at the
    /// end of the caller's scope.
    pub fn shutdown(self) {
        for entry in &self.plugins {
            tracing::debug!(plugin = %entry.name, "Shutting down plugin");
        }
        drop(self);
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("plugins", &self.plugins)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;
    use crate::zone::{ResourceRecord, Zone};

    /// In-process plugin double with canned answers.
    struct FakePlugin {
        version: std::result::Result<String, PluginError>,
        types: Vec<&'static str>,
    }

    impl FakePlugin {
        fn claiming(types: &[&'static str]) -> Self {
            Self {
                version: Ok("1.0.0".into()),
                types: types.to_vec(),
            }
        }
    }

    impl RecordPlugin for FakePlugin {
        fn plugin_version(&self) -> std::result::Result<String, PluginError> {
            self.version.clone()
        }

        fn plugin_types(&self) -> std::result::Result<BTreeSet<PluginType>, PluginError> {
            Ok(self.types.iter().map(|t| PluginType::new(t)).collect())
        }

        fn configure(&self, _config: &Config) -> std::result::Result<(), PluginError> {
            Ok(())
        }

        fn normalize(
            &self,
            _identifier: &str,
            record: &ResourceRecord,
        ) -> std::result::Result<ResourceRecord, PluginError> {
            Ok(record.clone())
        }

        fn validate_zone(&self, _zone_name: &str, _zone: &Zone) -> std::result::Result<(), PluginError> {
            Ok(())
        }

        fn render(
            &self,
            _identifier: &str,
            record: &ResourceRecord,
        ) -> std::result::Result<String, PluginError> {
            Ok(record.value.clone())
        }
    }

    #[test]
    fn resolve_is_case_insensitive() {
        let mut builder = TypeRegistry::builder();
        builder
            .register("core", Arc::new(FakePlugin::claiming(&["A", "aaaa"])))
            .unwrap();
        builder
            .register("mail", Arc::new(FakePlugin::claiming(&["MX"])))
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.resolve("a").unwrap().name(), "core");
        assert_eq!(registry.resolve("AAAA").unwrap().name(), "core");
        assert_eq!(registry.resolve("mx").unwrap().name(), "mail");
        assert_eq!(registry.resolve("MX").unwrap().version(), "1.0.0");
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.types().map(PluginType::as_str).collect::<Vec<_>>(),
            vec!["A", "AAAA", "MX"]
        );
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let registry = TypeRegistry::builder().build();
        let err = registry.resolve("LOC").unwrap_err();
        assert!(matches!(err, ZoneError::UnsupportedType { ref rr_type } if rr_type == "LOC"));
    }

    #[test]
    fn collision_names_both_plugins_and_type() {
        let mut builder = TypeRegistry::builder();
        builder
            .register("mail-basic", Arc::new(FakePlugin::claiming(&["MX", "TXT"])))
            .unwrap();
        let err = builder
            .register("mail-fancy", Arc::new(FakePlugin::claiming(&["mx"])))
            .unwrap_err();

        let message = err.to_string();
        assert!(matches!(err, ZoneError::Configuration(_)));
        assert!(message.contains("MX"));
        assert!(message.contains("mail-basic"));
        assert!(message.contains("mail-fancy"));

        // The failed plugin left no trace.
        let registry = builder.build();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("TXT").unwrap().name(), "mail-basic");
    }

    #[test]
    fn empty_type_set_is_rejected() {
        let mut builder = TypeRegistry::builder();
        let err = builder
            .register("lazy", Arc::new(FakePlugin::claiming(&[])))
            .unwrap_err();
        assert!(err.to_string().contains("lazy"));
    }

    #[test]
    fn version_failure_is_configuration_error() {
        let mut builder = TypeRegistry::builder();
        let plugin = FakePlugin {
            version: Err(PluginError::Protocol("pipe closed".into())),
            types: vec!["A"],
        };
        let err = builder.register("broken", Arc::new(plugin)).unwrap_err();
        assert!(matches!(err, ZoneError::Configuration(ref m) if m.contains("PluginVersion")));
    }
}
