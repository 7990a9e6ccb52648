//! Zone data model.
//!
//! A [`Zone`] maps unique record identifiers to [`ResourceRecord`]s. Records
//! are kept in a [`BTreeMap`], so iterating a zone always visits identifiers
//! in lexicographic order.

use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Records grouped by uppercase type tag, then by identifier.
pub type TypeIndex = BTreeMap<String, BTreeMap<String, ResourceRecord>>;

/// A time-to-live with an optional value. `None` means "inherit".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ttl {
    /// Seconds, or `None` to inherit from the enclosing scope.
    pub value: Option<u32>,
    /// Free-form comment carried into the rendered output.
    pub comment: String,
}

impl Ttl {
    /// A TTL with an explicit value and no comment.
    #[must_use]
    pub const fn seconds(value: u32) -> Self {
        Self {
            value: Some(value),
            comment: String::new(),
        }
    }

    /// A TTL that inherits the zone default.
    #[must_use]
    pub const fn inherit() -> Self {
        Self {
            value: None,
            comment: String::new(),
        }
    }
}

/// DNS class of a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Class {
    /// `IN`
    #[default]
    #[serde(rename = "IN")]
    Internet,
    /// `CS`
    #[serde(rename = "CS")]
    Csnet,
    /// `CH`
    #[serde(rename = "CH")]
    Chaos,
    /// `HS`
    #[serde(rename = "HS")]
    Hesiod,
}

impl Class {
    /// Zone file mnemonic.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Internet => "IN",
            Self::Csnet => "CS",
            Self::Chaos => "CH",
            Self::Hesiod => "HS",
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for Class {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(Self::Internet),
            "CS" => Ok(Self::Csnet),
            "CH" => Ok(Self::Chaos),
            "HS" => Ok(Self::Hesiod),
            _ => Err(format!("unknown DNS class: {s}")),
        }
    }
}

/// One entry of a multi-value record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRecordValue {
    pub value: String,
    pub comment: String,
}

impl ResourceRecordValue {
    #[must_use]
    pub fn new(value: impl Into<String>, comment: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            comment: comment.into(),
        }
    }
}

/// A single DNS resource record as described by the zone document.
///
/// The payload lives either in [`value`](Self::value) or in
/// [`values`](Self::values). Before normalization both may be set; after
/// normalization exactly one is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceRecord {
    /// Owner name, relative to the zone origin (`@` for the apex).
    pub name: String,
    /// Type tag, e.g. `"MX"`.
    #[serde(rename = "type")]
    pub rr_type: String,
    pub class: Class,
    /// Per-record override; an inheriting TTL uses the zone default.
    pub ttl: Ttl,
    pub value: String,
    pub values: Vec<ResourceRecordValue>,
    pub comment: String,
}

impl ResourceRecord {
    /// Creates an `IN` record with a single value and an inherited TTL.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        rr_type: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            rr_type: rr_type.into(),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Replaces the single value with an ordered list of values.
    #[must_use]
    pub fn with_values(mut self, values: Vec<ResourceRecordValue>) -> Self {
        self.value.clear();
        self.values = values;
        self
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_class(mut self, class: Class) -> Self {
        self.class = class;
        self
    }

    #[must_use]
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// The type tag in its canonical uppercase form.
    #[must_use]
    pub fn type_tag(&self) -> String {
        self.rr_type.to_ascii_uppercase()
    }

    /// `true` if exactly one of `value` and `values` carries the payload.
    #[must_use]
    pub fn has_single_form(&self) -> bool {
        self.value.is_empty() != self.values.is_empty()
    }
}

/// A DNS zone: default TTL, records by identifier, and the run config.
///
/// The type index returned by [`records_by_type`](Self::records_by_type) is
/// computed on first use and dropped by every mutation, so it always matches
/// the record map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Zone {
    /// Default TTL for records that inherit.
    pub ttl: Ttl,
    #[serde(rename = "resource_records")]
    records: BTreeMap<String, ResourceRecord>,
    pub config: Config,
    #[serde(skip)]
    by_type: OnceLock<TypeIndex>,
}

impl Zone {
    /// Creates an empty zone.
    #[must_use]
    pub fn new(ttl: Ttl, config: Config) -> Self {
        Self {
            ttl,
            records: BTreeMap::new(),
            config,
            by_type: OnceLock::new(),
        }
    }

    /// Builds a zone from an existing record map.
    #[must_use]
    pub fn from_records(
        ttl: Ttl,
        records: BTreeMap<String, ResourceRecord>,
        config: Config,
    ) -> Self {
        Self {
            ttl,
            records,
            config,
            by_type: OnceLock::new(),
        }
    }

    /// Adds a record, builder style.
    #[must_use]
    pub fn with_record(mut self, identifier: impl Into<String>, record: ResourceRecord) -> Self {
        self.insert_record(identifier, record);
        self
    }

    /// Inserts or replaces a record. Returns the previous record, if any.
    pub fn insert_record(
        &mut self,
        identifier: impl Into<String>,
        record: ResourceRecord,
    ) -> Option<ResourceRecord> {
        self.by_type = OnceLock::new();
        self.records.insert(identifier.into(), record)
    }

    /// Removes a record. Returns it if it was present.
    pub fn remove_record(&mut self, identifier: &str) -> Option<ResourceRecord> {
        let removed = self.records.remove(identifier);
        if removed.is_some() {
            self.by_type = OnceLock::new();
        }
        removed
    }

    /// All records, ordered by identifier.
    #[must_use]
    pub const fn records(&self) -> &BTreeMap<String, ResourceRecord> {
        &self.records
    }

    /// Looks up one record.
    #[must_use]
    pub fn record(&self, identifier: &str) -> Option<&ResourceRecord> {
        self.records.get(identifier)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records grouped by uppercase type tag, then by identifier.
    pub fn records_by_type(&self) -> &TypeIndex {
        self.by_type.get_or_init(|| {
            let mut index = TypeIndex::new();
            for (identifier, record) in &self.records {
                index
                    .entry(record.type_tag())
                    .or_default()
                    .insert(identifier.clone(), record.clone());
            }
            index
        })
    }

    /// Records of one type, ordered by identifier. Empty if none.
    pub fn records_of_type(&self, rr_type: &str) -> impl Iterator<Item = (&String, &ResourceRecord)> {
        self.records_by_type()
            .get(&rr_type.to_ascii_uppercase())
            .into_iter()
            .flat_map(|records| records.iter())
    }

    /// Consumes the zone and returns its record map.
    #[must_use]
    pub fn into_records(self) -> BTreeMap<String, ResourceRecord> {
        self.records
    }
}

impl PartialEq for Zone {
    fn eq(&self, other: &Self) -> bool {
        self.ttl == other.ttl && self.records == other.records && self.config == other.config
    }
}

impl Eq for Zone {}
