//! The zone compilation pipeline.
//!
//! [`ZoneCompiler::compile`] runs four phases against the plugins of a
//! [`TypeRegistry`]:
//!
//! 1. **Configure** each distinct plugin owning a type present in the zone,
//!    once.
//! 2. **Normalize** every record, in identifier order.
//! 3. **ValidateZone** once per plugin from phase 1, against the normalized
//!    zone.
//! 4. **Render** every record, in identifier order, stamping SOA records
//!    with a fresh serial when a [`SerialManager`] is attached.
//!
//! The first failure aborts the run; no partial output is returned.

use crate::config::Config;
use crate::error::{PluginError, Result, ZoneError};
use crate::registry::{RegisteredPlugin, TypeRegistry};
use crate::serial::SerialManager;
use crate::zone::{ResourceRecord, Zone};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::ops::Range;

/// Type tag whose records receive the zone serial.
const SOA: &str = "SOA";

/// Position of the serial among the SOA fields (MNAME RNAME SERIAL ...).
const SOA_SERIAL_FIELD: usize = 2;

/// Compiles zones using the plugins of one registry.
///
/// # Example
///
/// ```rust,ignore
/// use zone_compiler::{Config, LaunchOptions, TypeRegistry, ZoneCompiler};
///
/// let registry = TypeRegistry::load(&config, &LaunchOptions::default())?;
/// let text = ZoneCompiler::from_config(&registry, &config).compile("example.com", &zone)?;
/// ```
#[derive(Debug)]
pub struct ZoneCompiler<'r> {
    registry: &'r TypeRegistry,
    serials: Option<SerialManager>,
    serial_date: Option<NaiveDate>,
}

impl<'r> ZoneCompiler<'r> {
    /// A compiler that leaves SOA serials as written.
    #[must_use]
    pub const fn new(registry: &'r TypeRegistry) -> Self {
        Self {
            registry,
            serials: None,
            serial_date: None,
        }
    }

    /// A compiler that stamps serials when `config.generate_serial` is set.
    #[must_use]
    pub fn from_config(registry: &'r TypeRegistry, config: &Config) -> Self {
        let compiler = Self::new(registry);
        if config.generate_serial {
            compiler.with_serials(SerialManager::from_config(config))
        } else {
            compiler
        }
    }

    /// Stamps SOA records with serials from `serials`.
    #[must_use]
    pub fn with_serials(mut self, serials: SerialManager) -> Self {
        self.serials = Some(serials);
        self
    }

    /// Issues serials as if today were `date` instead of the local date.
    #[must_use]
    pub const fn with_serial_date(mut self, date: NaiveDate) -> Self {
        self.serial_date = Some(date);
        self
    }

    /// Compiles `zone` into zone file text.
    ///
    /// # Errors
    ///
    /// Returns the first failure. Record-scoped failures
    /// ([`ZoneError::UnsupportedType`], a rejected Normalize or Render, a
    /// malformed SOA) come wrapped in [`ZoneError::Record`] with the
    /// record identifier. A plugin refusing its configuration is a
    /// [`ZoneError::Configuration`]; a zone-wide rejection is a bare
    /// [`ZoneError::Validation`]. Transport failures surface as
    /// [`ZoneError::PluginProtocol`] and serial failures as the serial
    /// manager reports them.
    pub fn compile(&self, zone_name: &str, zone: &Zone) -> Result<String> {
        let owners = self.owners(zone)?;

        for entry in owners.values() {
            entry
                .plugin()
                .configure(&zone.config)
                .map_err(|e| configure_error(entry, e))?;
        }

        let normalized = self.normalize(zone)?;
        // Build the type index once; the zone does not change from here on.
        normalized.records_by_type();

        for entry in owners.values() {
            entry
                .plugin()
                .validate_zone(zone_name, &normalized)
                .map_err(|e| e.into_zone_error(entry.name()))?;
        }

        let serial = self.issue_serial(zone_name, &normalized)?;
        let output = self.render(&normalized, serial.as_deref())?;

        tracing::info!(
            zone = %zone_name,
            records = normalized.len(),
            plugins = owners.len(),
            serial = serial.as_deref().unwrap_or("-"),
            "Compiled zone"
        );
        Ok(output)
    }

    /// Distinct plugins owning the zone's record types, in registration order.
    fn owners(&self, zone: &Zone) -> Result<BTreeMap<usize, &'r RegisteredPlugin>> {
        let mut owners = BTreeMap::new();
        for (identifier, record) in zone.records() {
            let entry = self
                .registry
                .resolve(&record.rr_type)
                .map_err(|e| e.for_record(identifier))?;
            owners.insert(entry.index(), entry);
        }
        Ok(owners)
    }

    fn normalize(&self, zone: &Zone) -> Result<Zone> {
        let mut records = BTreeMap::new();
        for (identifier, record) in zone.records() {
            let entry = self
                .registry
                .resolve(&record.rr_type)
                .map_err(|e| e.for_record(identifier))?;
            let normalized = entry
                .plugin()
                .normalize(identifier, record)
                .map_err(|e| e.into_zone_error(entry.name()).for_record(identifier))?;

            if !normalized.has_single_form() {
                return Err(ZoneError::Validation {
                    plugin: entry.name().to_string(),
                    message: "normalized record must carry exactly one of value or values".into(),
                }
                .for_record(identifier));
            }
            records.insert(identifier.clone(), normalized);
        }
        Ok(Zone::from_records(
            zone.ttl.clone(),
            records,
            zone.config.clone(),
        ))
    }

    /// One serial per compilation, only if there is an SOA to stamp.
    fn issue_serial(&self, zone_name: &str, zone: &Zone) -> Result<Option<String>> {
        let Some(serials) = &self.serials else {
            return Ok(None);
        };
        if zone.records_of_type(SOA).next().is_none() {
            return Ok(None);
        }
        let serial = match self.serial_date {
            Some(date) => serials.next_serial_on(zone_name, date)?,
            None => serials.get_next(zone_name)?,
        };
        Ok(Some(serial))
    }

    fn render(&self, zone: &Zone, serial: Option<&str>) -> Result<String> {
        let mut output = String::new();
        if let Some(ttl) = zone.ttl.value {
            output.push_str(&format!("$TTL {ttl}"));
            if !zone.ttl.comment.is_empty() {
                output.push_str(&format!(" ; {}", zone.ttl.comment));
            }
            output.push('\n');
        }

        for (identifier, record) in zone.records() {
            let entry = self
                .registry
                .resolve(&record.rr_type)
                .map_err(|e| e.for_record(identifier))?;

            let stamped;
            let record = match serial {
                Some(serial) if record.type_tag() == SOA => {
                    stamped = stamp_serial(record, serial).map_err(|message| {
                        ZoneError::Validation {
                            plugin: entry.name().to_string(),
                            message,
                        }
                        .for_record(identifier)
                    })?;
                    &stamped
                }
                _ => record,
            };

            let text = entry
                .plugin()
                .render(identifier, record)
                .map_err(|e| e.into_zone_error(entry.name()).for_record(identifier))?;
            output.push_str(text.trim_end_matches('\n'));
            output.push('\n');
        }
        Ok(output)
    }
}

fn configure_error(entry: &RegisteredPlugin, error: PluginError) -> ZoneError {
    match error {
        PluginError::Rejected(message) => ZoneError::Configuration(format!(
            "plugin {} refused configuration: {message}",
            entry.name()
        )),
        protocol @ PluginError::Protocol(_) => protocol.into_zone_error(entry.name()),
    }
}

/// Replaces the SERIAL field of an SOA record.
///
/// Single-value records hold all fields in `value`, separated by whitespace
/// and optionally grouped in parentheses; only the serial's bytes change.
/// Multi-value records hold one field per entry.
fn stamp_serial(record: &ResourceRecord, serial: &str) -> std::result::Result<ResourceRecord, String> {
    let mut stamped = record.clone();
    if stamped.values.is_empty() {
        let span = field_span(&record.value, SOA_SERIAL_FIELD).ok_or_else(|| {
            format!("SOA value {:?} has no serial field to stamp", record.value)
        })?;
        stamped.value.replace_range(span, serial);
    } else {
        let count = stamped.values.len();
        let entry = stamped
            .values
            .get_mut(SOA_SERIAL_FIELD)
            .ok_or_else(|| format!("SOA has {count} values, no serial field to stamp"))?;
        entry.value = serial.to_string();
    }
    Ok(stamped)
}

/// Byte range of the `n`th field of an RDATA string. Parentheses group
/// fields across lines and are not fields themselves.
fn field_span(rdata: &str, n: usize) -> Option<Range<usize>> {
    let mut seen = 0;
    let mut start = None;
    let end = std::iter::once((rdata.len(), ' '));
    for (i, c) in rdata.char_indices().chain(end) {
        let separator = c.is_whitespace() || c == '(' || c == ')';
        match (start, separator) {
            (None, false) => start = Some(i),
            (Some(s), true) => {
                if seen == n {
                    return Some(s..i);
                }
                seen += 1;
                start = None;
            }
            _ => {}
        }
    }
    None
}
