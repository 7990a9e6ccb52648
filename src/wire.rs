//! Wire messages exchanged with plugin subprocesses.
//!
//! Model values are converted to plain message structs with [`ToWire`] and
//! back with [`FromWire`]. Messages travel as one JSON document per line.
//! Sub-messages that the model requires are `Option`s on the wire, so a peer
//! that omits one produces a decode error instead of a silently defaulted
//! value.

use crate::config::Config;
use crate::error::{Result, ZoneError};
use crate::zone::{Class, ResourceRecord, ResourceRecordValue, Ttl, Zone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Converts a model value into its wire message.
pub trait ToWire {
    type Message;

    fn to_wire(&self) -> Self::Message;
}

/// Rebuilds a model value from its wire message.
pub trait FromWire: Sized {
    type Message;

    /// # Errors
    ///
    /// Returns [`ZoneError::Wire`] if a required sub-message is missing or a
    /// field holds a value the model cannot represent.
    fn from_wire(message: Self::Message) -> Result<Self>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlMessage {
    pub value: Option<u32>,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMessage {
    pub plugin_directory: String,
    pub generate_serial: bool,
    pub serial_index_directory: String,
    pub generate_reverse_zones: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordValueMessage {
    pub value: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMessage {
    pub name: String,
    pub rr_type: String,
    pub class: String,
    pub ttl: Option<TtlMessage>,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub values: Vec<RecordValueMessage>,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneMessage {
    pub ttl: Option<TtlMessage>,
    #[serde(default)]
    pub records: BTreeMap<String, RecordMessage>,
    pub config: Option<ConfigMessage>,
}

impl ToWire for Ttl {
    type Message = TtlMessage;

    fn to_wire(&self) -> TtlMessage {
        TtlMessage {
            value: self.value,
            comment: self.comment.clone(),
        }
    }
}

impl FromWire for Ttl {
    type Message = TtlMessage;

    fn from_wire(message: TtlMessage) -> Result<Self> {
        Ok(Self {
            value: message.value,
            comment: message.comment,
        })
    }
}

impl ToWire for Config {
    type Message = ConfigMessage;

    // Configs are loaded from YAML, so their paths are valid UTF-8 and the
    // lossy conversion never loses anything.
    fn to_wire(&self) -> ConfigMessage {
        ConfigMessage {
            plugin_directory: self.plugin_directory.to_string_lossy().into_owned(),
            generate_serial: self.generate_serial,
            serial_index_directory: self.serial_index_directory.to_string_lossy().into_owned(),
            generate_reverse_zones: self.generate_reverse_zones,
        }
    }
}

impl FromWire for Config {
    type Message = ConfigMessage;

    fn from_wire(message: ConfigMessage) -> Result<Self> {
        Ok(Self {
            plugin_directory: PathBuf::from(message.plugin_directory),
            generate_serial: message.generate_serial,
            serial_index_directory: PathBuf::from(message.serial_index_directory),
            generate_reverse_zones: message.generate_reverse_zones,
        })
    }
}

impl ToWire for ResourceRecord {
    type Message = RecordMessage;

    fn to_wire(&self) -> RecordMessage {
        RecordMessage {
            name: self.name.clone(),
            rr_type: self.rr_type.clone(),
            class: self.class.mnemonic().to_string(),
            ttl: Some(self.ttl.to_wire()),
            value: self.value.clone(),
            values: self
                .values
                .iter()
                .map(|v| RecordValueMessage {
                    value: v.value.clone(),
                    comment: v.comment.clone(),
                })
                .collect(),
            comment: self.comment.clone(),
        }
    }
}

impl FromWire for ResourceRecord {
    type Message = RecordMessage;

    fn from_wire(message: RecordMessage) -> Result<Self> {
        let class = message.class.parse::<Class>().map_err(ZoneError::Wire)?;
        let ttl = message
            .ttl
            .ok_or_else(|| ZoneError::Wire(format!("record {} has no ttl", message.name)))?;
        Ok(Self {
            name: message.name,
            rr_type: message.rr_type,
            class,
            ttl: Ttl::from_wire(ttl)?,
            value: message.value,
            values: message
                .values
                .into_iter()
                .map(|v| ResourceRecordValue {
                    value: v.value,
                    comment: v.comment,
                })
                .collect(),
            comment: message.comment,
        })
    }
}

impl ToWire for BTreeMap<String, ResourceRecord> {
    type Message = BTreeMap<String, RecordMessage>;

    fn to_wire(&self) -> Self::Message {
        self.iter()
            .map(|(identifier, record)| (identifier.clone(), record.to_wire()))
            .collect()
    }
}

impl FromWire for BTreeMap<String, ResourceRecord> {
    type Message = BTreeMap<String, RecordMessage>;

    fn from_wire(message: Self::Message) -> Result<Self> {
        message
            .into_iter()
            .map(|(identifier, record)| -> Result<(String, ResourceRecord)> {
                let record = ResourceRecord::from_wire(record)
                    .map_err(|e| ZoneError::Wire(format!("record {identifier}: {e}")))?;
                Ok((identifier, record))
            })
            .collect()
    }
}

impl ToWire for Zone {
    type Message = ZoneMessage;

    fn to_wire(&self) -> ZoneMessage {
        ZoneMessage {
            ttl: Some(self.ttl.to_wire()),
            records: self.records().to_wire(),
            config: Some(self.config.to_wire()),
        }
    }
}

impl FromWire for Zone {
    type Message = ZoneMessage;

    fn from_wire(message: ZoneMessage) -> Result<Self> {
        let ttl = message
            .ttl
            .ok_or_else(|| ZoneError::Wire("zone has no ttl".into()))?;
        let config = message
            .config
            .ok_or_else(|| ZoneError::Wire("zone has no config".into()))?;
        Ok(Self::from_records(
            Ttl::from_wire(ttl)?,
            BTreeMap::from_wire(message.records)?,
            Config::from_wire(config)?,
        ))
    }
}

// ---------------------------------------------------------------------------
// RPC envelope
// ---------------------------------------------------------------------------

/// One capability call, tagged by method name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params")]
pub enum Call {
    PluginVersion,
    PluginTypes,
    Configure {
        config: ConfigMessage,
    },
    Normalize {
        identifier: String,
        record: RecordMessage,
    },
    ValidateZone {
        zone_name: String,
        zone: ZoneMessage,
    },
    Render {
        identifier: String,
        record: RecordMessage,
    },
}

impl Call {
    /// Method name as it appears on the wire.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::PluginVersion => "PluginVersion",
            Self::PluginTypes => "PluginTypes",
            Self::Configure { .. } => "Configure",
            Self::Normalize { .. } => "Normalize",
            Self::ValidateZone { .. } => "ValidateZone",
            Self::Render { .. } => "Render",
        }
    }
}

/// Successful answer to a [`Call`]; one variant per method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Version(String),
    Types(Vec<String>),
    Configured,
    Normalized(RecordMessage),
    Validated,
    Rendered(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub call: Call,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Ok(Reply),
    Err(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub outcome: Outcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed_zone() -> Zone {
        Zone::new(
            Ttl {
                value: None,
                comment: "inherit from server".into(),
            },
            Config::new("/plugins").with_generate_serial(true),
        )
        .with_record(
            "txt",
            ResourceRecord::new("@", "TXT", "")
                .with_values(vec![
                    ResourceRecordValue::new("part one", "first"),
                    ResourceRecordValue::new("part two", ""),
                ])
                .with_class(Class::Chaos),
        )
        .with_record(
            "www",
            ResourceRecord::new("www", "A", "192.0.2.1").with_ttl(Ttl::seconds(0)),
        )
    }

    #[test]
    fn zone_survives_json_transport() {
        let zone = mixed_zone();
        let line = serde_json::to_string(&zone.to_wire()).unwrap();
        let decoded = Zone::from_wire(serde_json::from_str(&line).unwrap()).unwrap();

        assert_eq!(decoded, zone);
        // An inherited TTL stays inherited and a zero TTL stays zero.
        assert_eq!(decoded.ttl.value, None);
        assert_eq!(decoded.record("www").unwrap().ttl.value, Some(0));
    }

    #[test]
    fn missing_config_is_a_decode_error() {
        let json = r#"{"ttl":{"value":60},"records":{}}"#;
        let message: ZoneMessage = serde_json::from_str(json).unwrap();
        let err = Zone::from_wire(message).unwrap_err();
        assert!(matches!(err, ZoneError::Wire(ref m) if m.contains("config")));
    }

    #[test]
    fn record_without_ttl_names_identifier() {
        let mut records = BTreeMap::new();
        records.insert(
            "mx".to_string(),
            RecordMessage {
                name: "@".into(),
                rr_type: "MX".into(),
                class: "IN".into(),
                ttl: None,
                value: "10 mail".into(),
                values: Vec::new(),
                comment: String::new(),
            },
        );
        let err = BTreeMap::<String, ResourceRecord>::from_wire(records).unwrap_err();
        assert!(err.to_string().contains("record mx"));
    }

    #[test]
    fn unknown_class_is_rejected() {
        let mut message = ResourceRecord::new("www", "A", "192.0.2.1").to_wire();
        message.class = "ZZ".into();
        assert!(ResourceRecord::from_wire(message).is_err());
    }

    #[test]
    fn envelope_uses_method_tags() {
        let request = Request {
            id: 7,
            call: Call::PluginTypes,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"id":7,"call":{"method":"PluginTypes"}}"#);

        let response: Response =
            serde_json::from_str(r#"{"id":7,"outcome":{"Ok":{"Types":["A","MX"]}}}"#).unwrap();
        assert_eq!(
            response.outcome,
            Outcome::Ok(Reply::Types(vec!["A".into(), "MX".into()]))
        );

        let unit: Response = serde_json::from_str(r#"{"id":8,"outcome":{"Ok":"Configured"}}"#).unwrap();
        assert_eq!(unit.outcome, Outcome::Ok(Reply::Configured));
    }
}
