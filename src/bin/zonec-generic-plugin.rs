//! Reference plugin for the common record types.
//!
//! Launched by the compiler host; running it by hand only prints a hint.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};
use zone_compiler::plugin::serve;
use zone_compiler::{Config, PluginError, PluginType, RecordPlugin, ResourceRecord, Zone};

const TYPES: &[&str] = &[
    "A", "AAAA", "CAA", "CNAME", "MX", "NS", "PTR", "SOA", "SRV", "TXT",
];

struct GenericPlugin;

impl RecordPlugin for GenericPlugin {
    fn plugin_version(&self) -> Result<String, PluginError> {
        Ok(env!("CARGO_PKG_VERSION").to_string())
    }

    fn plugin_types(&self) -> Result<BTreeSet<PluginType>, PluginError> {
        Ok(TYPES.iter().map(|t| PluginType::new(t)).collect())
    }

    fn configure(&self, config: &Config) -> Result<(), PluginError> {
        tracing::debug!(reverse = config.generate_reverse_zones, "Configured");
        Ok(())
    }

    fn normalize(
        &self,
        identifier: &str,
        record: &ResourceRecord,
    ) -> Result<ResourceRecord, PluginError> {
        let mut record = record.clone();
        record.rr_type = record.type_tag();
        if record.name.trim().is_empty() {
            record.name = "@".into();
        }

        match (record.value.is_empty(), record.values.len()) {
            (true, 0) => {
                return Err(PluginError::Rejected(format!("{identifier} has no value")));
            }
            (false, n) if n > 0 => {
                return Err(PluginError::Rejected(format!(
                    "{identifier} sets both value and values"
                )));
            }
            (true, 1) => {
                let only = record.values.remove(0);
                record.value = only.value;
                if record.comment.is_empty() {
                    record.comment = only.comment;
                }
            }
            _ => {}
        }

        if record.values.is_empty() {
            record.value = record.value.trim().to_string();
            check_address(&record)?;
        }
        Ok(record)
    }

    fn validate_zone(&self, zone_name: &str, zone: &Zone) -> Result<(), PluginError> {
        let soa_count = zone.records_of_type("SOA").count();
        if soa_count > 1 {
            return Err(PluginError::Rejected(format!(
                "{zone_name} has {soa_count} SOA records, expected at most one"
            )));
        }

        let mut by_name: BTreeMap<&str, usize> = BTreeMap::new();
        for record in zone.records().values() {
            *by_name.entry(record.name.as_str()).or_default() += 1;
        }
        for (identifier, cname) in zone.records_of_type("CNAME") {
            if by_name.get(cname.name.as_str()).copied().unwrap_or(0) > 1 {
                return Err(PluginError::Rejected(format!(
                    "CNAME {identifier} shares owner name {} with other records",
                    cname.name
                )));
            }
        }
        Ok(())
    }

    fn render(&self, _identifier: &str, record: &ResourceRecord) -> Result<String, PluginError> {
        let mut line = record.name.clone();
        if let Some(ttl) = record.ttl.value {
            let _ = write!(line, "\t{ttl}");
        }
        let _ = write!(line, "\t{}\t{}", record.class, record.type_tag());

        if record.values.is_empty() {
            let _ = write!(line, "\t{}", record.value);
            push_comment(&mut line, &record.comment);
        } else {
            line.push_str("\t(");
            push_comment(&mut line, &record.comment);
            for value in &record.values {
                let _ = write!(line, "\n\t\t{}", value.value);
                push_comment(&mut line, &value.comment);
            }
            line.push_str("\n\t)");
        }
        Ok(line)
    }
}

fn check_address(record: &ResourceRecord) -> Result<(), PluginError> {
    let valid = match record.rr_type.as_str() {
        "A" => record.value.parse::<Ipv4Addr>().is_ok(),
        "AAAA" => record.value.parse::<Ipv6Addr>().is_ok(),
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        Err(PluginError::Rejected(format!(
            "{:?} is not a valid {} address",
            record.value, record.rr_type
        )))
    }
}

fn push_comment(line: &mut String, comment: &str) {
    if !comment.is_empty() {
        let _ = write!(line, " ; {comment}");
    }
}

fn main() {
    if let Err(e) = serve(&GenericPlugin) {
        eprintln!("zonec-generic-plugin: {e}");
        std::process::exit(1);
    }
}
