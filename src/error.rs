//! Error types.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias for compiler, registry and serial operations.
pub type Result<T> = std::result::Result<T, ZoneError>;

/// Errors returned by the compiler pipeline and the serial manager.
#[derive(Debug, Error)]
pub enum ZoneError {
    /// Bad plugin directory, type collision, a plugin with no types, or a
    /// plugin refusing its configuration.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A plugin subprocess failed to start or to complete the handshake.
    #[error("plugin {plugin} failed handshake: {reason}")]
    Handshake {
        /// Plugin binary name.
        plugin: String,
        /// What went wrong.
        reason: String,
    },

    /// Transport failure, timeout or malformed response on a plugin call.
    #[error("plugin {plugin} protocol error: {reason}")]
    PluginProtocol {
        /// Plugin binary name.
        plugin: String,
        /// What went wrong.
        reason: String,
    },

    /// No registered plugin claims the record type.
    #[error("no plugin handles record type {rr_type}")]
    UnsupportedType {
        /// The unclaimed type tag.
        rr_type: String,
    },

    /// A plugin rejected a record or the zone.
    #[error("plugin {plugin} rejected: {message}")]
    Validation {
        /// Plugin that reported the violation.
        plugin: String,
        /// The plugin's message.
        message: String,
    },

    /// Attaches the offending record identifier to a record-scoped failure.
    #[error("record {identifier}: {source}")]
    Record {
        /// Identifier of the record being processed.
        identifier: String,
        /// Underlying failure.
        #[source]
        source: Box<ZoneError>,
    },

    /// Reading, writing or parsing the serial state failed.
    #[error("serial state for zone {zone}: {reason}")]
    SerialPersistence {
        /// Zone whose state was being accessed.
        zone: String,
        /// What went wrong.
        reason: String,
    },

    /// The composed serial does not fit in an unsigned 32-bit integer.
    #[error("serial {serial} for zone {zone} does not fit in 32 bits")]
    SerialFormat {
        /// Zone the serial was generated for.
        zone: String,
        /// The overflowing serial text.
        serial: String,
    },

    /// The serial lock was not obtained within the polling window.
    #[error("timed out after {timeout:?} waiting for lock {path}")]
    LockTimeout {
        /// Lock file path.
        path: PathBuf,
        /// How long we polled.
        timeout: Duration,
    },

    /// A wire message could not be decoded into the zone model.
    #[error("wire decode error: {0}")]
    Wire(String),
}

impl ZoneError {
    /// Wraps `self` with the identifier of the record being processed.
    #[must_use]
    pub fn for_record(self, identifier: &str) -> Self {
        Self::Record {
            identifier: identifier.to_string(),
            source: Box::new(self),
        }
    }

    /// Returns the record identifier attached to this error, if any.
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Record { identifier, .. } => Some(identifier),
            _ => None,
        }
    }

    /// Returns the innermost error, looking through [`ZoneError::Record`].
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Record { source, .. } => source.root(),
            other => other,
        }
    }

    /// Returns `true` if the serial lock could not be acquired in time.
    #[must_use]
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self.root(), Self::LockTimeout { .. })
    }
}

/// Failure reported through the [`RecordPlugin`](crate::plugin::RecordPlugin)
/// capability interface.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginError {
    /// The plugin looked at its input and refused it.
    #[error("{0}")]
    Rejected(String),

    /// The call never produced a usable answer.
    #[error("{0}")]
    Protocol(String),
}

impl PluginError {
    /// Converts a rejection into a [`ZoneError::Validation`] and a transport
    /// failure into a [`ZoneError::PluginProtocol`].
    #[must_use]
    pub fn into_zone_error(self, plugin: &str) -> ZoneError {
        match self {
            Self::Rejected(message) => ZoneError::Validation {
                plugin: plugin.to_string(),
                message,
            },
            Self::Protocol(reason) => ZoneError::PluginProtocol {
                plugin: plugin.to_string(),
                reason,
            },
        }
    }
}
