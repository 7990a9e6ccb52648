//! The record plugin capability interface.
//!
//! Every plugin, whether it runs in a subprocess behind a
//! [`ProcessPlugin`](crate::process::ProcessPlugin) proxy or in-process as a
//! test double, implements [`RecordPlugin`]. Plugin binaries hand their
//! implementation to [`serve`], which performs the handshake and answers
//! requests on stdin/stdout.

use crate::config::Config;
use crate::error::{PluginError, Result, ZoneError};
use crate::process::{MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PROTOCOL_VERSION};
use crate::wire::{Call, FromWire, Outcome, Reply, Request, Response, ToWire};
use crate::zone::{ResourceRecord, Zone};
use std::collections::BTreeSet;
use std::fmt;
use std::io::{BufRead, Write};

/// Record type tag claimed by a plugin. Always uppercase.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginType(String);

impl PluginType {
    #[must_use]
    pub fn new(tag: &str) -> Self {
        Self(tag.trim().to_ascii_uppercase())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

/// Validation, normalization and rendering logic for some record types.
///
/// Implementations must be safe to share between threads; the process proxy
/// serializes calls onto its single channel internally.
pub trait RecordPlugin: Send + Sync {
    /// Version string reported at registration.
    fn plugin_version(&self) -> std::result::Result<String, PluginError>;

    /// The record types this plugin owns.
    fn plugin_types(&self) -> std::result::Result<BTreeSet<PluginType>, PluginError>;

    /// Receives the run configuration before any record is processed.
    fn configure(&self, config: &Config) -> std::result::Result<(), PluginError>;

    /// Returns the canonical form of one record.
    fn normalize(
        &self,
        identifier: &str,
        record: &ResourceRecord,
    ) -> std::result::Result<ResourceRecord, PluginError>;

    /// Checks zone-wide rules for the types this plugin owns.
    fn validate_zone(&self, zone_name: &str, zone: &Zone) -> std::result::Result<(), PluginError>;

    /// Renders one normalized record as zone file text.
    fn render(
        &self,
        identifier: &str,
        record: &ResourceRecord,
    ) -> std::result::Result<String, PluginError>;
}

/// Runs `plugin` as a plugin subprocess: handshake on stdout, then one
/// response per request line on stdin until stdin closes.
///
/// # Errors
///
/// Returns [`ZoneError::Handshake`] if the process was not started by a
/// compiler host (missing or wrong magic cookie), and
/// [`ZoneError::PluginProtocol`] if stdin/stdout fail or a request cannot
/// be parsed.
pub fn serve<P: RecordPlugin>(plugin: &P) -> Result<()> {
    let name = std::env::args()
        .next()
        .unwrap_or_else(|| "plugin".to_string());

    if std::env::var(MAGIC_COOKIE_KEY).as_deref() != Ok(MAGIC_COOKIE_VALUE) {
        return Err(ZoneError::Handshake {
            plugin: name,
            reason: "this binary is a zone compiler plugin and must be launched by the compiler"
                .into(),
        });
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout().lock();
    serve_on(plugin, &name, stdin.lock(), &mut stdout)
}

/// Handshake plus request loop over arbitrary streams.
fn serve_on<P, R, W>(plugin: &P, name: &str, input: R, output: &mut W) -> Result<()>
where
    P: RecordPlugin,
    R: BufRead,
    W: Write,
{
    let io_err = |e: std::io::Error| ZoneError::PluginProtocol {
        plugin: name.to_string(),
        reason: e.to_string(),
    };

    writeln!(output, "{PROTOCOL_VERSION}|{MAGIC_COOKIE_VALUE}").map_err(io_err)?;
    output.flush().map_err(io_err)?;

    for line in input.lines() {
        let line = line.map_err(io_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let request: Request =
            serde_json::from_str(&line).map_err(|e| ZoneError::PluginProtocol {
                plugin: name.to_string(),
                reason: format!("malformed request: {e}"),
            })?;

        let outcome = match dispatch(plugin, request.call) {
            Ok(reply) => Outcome::Ok(reply),
            Err(message) => Outcome::Err(message),
        };
        let response = Response {
            id: request.id,
            outcome,
        };
        let encoded = serde_json::to_string(&response).map_err(|e| ZoneError::PluginProtocol {
            plugin: name.to_string(),
            reason: e.to_string(),
        })?;
        writeln!(output, "{encoded}").map_err(io_err)?;
        output.flush().map_err(io_err)?;
    }
    Ok(())
}

fn dispatch<P: RecordPlugin>(plugin: &P, call: Call) -> std::result::Result<Reply, String> {
    let reply = match call {
        Call::PluginVersion => Reply::Version(plugin.plugin_version().map_err(|e| e.to_string())?),
        Call::PluginTypes => Reply::Types(
            plugin
                .plugin_types()
                .map_err(|e| e.to_string())?
                .into_iter()
                .map(|t| t.as_str().to_string())
                .collect(),
        ),
        Call::Configure { config } => {
            let config = Config::from_wire(config).map_err(|e| e.to_string())?;
            plugin.configure(&config).map_err(|e| e.to_string())?;
            Reply::Configured
        }
        Call::Normalize { identifier, record } => {
            let record = ResourceRecord::from_wire(record).map_err(|e| e.to_string())?;
            let normalized = plugin
                .normalize(&identifier, &record)
                .map_err(|e| e.to_string())?;
            Reply::Normalized(normalized.to_wire())
        }
        Call::ValidateZone { zone_name, zone } => {
            let zone = Zone::from_wire(zone).map_err(|e| e.to_string())?;
            plugin
                .validate_zone(&zone_name, &zone)
                .map_err(|e| e.to_string())?;
            Reply::Validated
        }
        Call::Render { identifier, record } => {
            let record = ResourceRecord::from_wire(record).map_err(|e| e.to_string())?;
            Reply::Rendered(plugin.render(&identifier, &record).map_err(|e| e.to_string())?)
        }
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl RecordPlugin for Upper {
        fn plugin_version(&self) -> std::result::Result<String, PluginError> {
            Ok("0.3.1".into())
        }

        fn plugin_types(&self) -> std::result::Result<BTreeSet<PluginType>, PluginError> {
            Ok(["a", "aaaa"].into_iter().map(PluginType::from).collect())
        }

        fn configure(&self, _config: &Config) -> std::result::Result<(), PluginError> {
            Ok(())
        }

        fn normalize(
            &self,
            _identifier: &str,
            record: &ResourceRecord,
        ) -> std::result::Result<ResourceRecord, PluginError> {
            let mut record = record.clone();
            record.name = record.name.to_uppercase();
            Ok(record)
        }

        fn validate_zone(&self, _zone_name: &str, _zone: &Zone) -> std::result::Result<(), PluginError> {
            Err(PluginError::Rejected("no".into()))
        }

        fn render(
            &self,
            _identifier: &str,
            record: &ResourceRecord,
        ) -> std::result::Result<String, PluginError> {
            Ok(format!("{} {}", record.name, record.value))
        }
    }

    fn run(requests: &[Request]) -> Vec<String> {
        let input: String = requests
            .iter()
            .map(|r| serde_json::to_string(r).unwrap() + "\n")
            .collect();
        let mut output = Vec::new();
        serve_on(&Upper, "upper", input.as_bytes(), &mut output).unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn plugin_type_is_uppercased() {
        assert_eq!(PluginType::new(" mx ").as_str(), "MX");
    }

    #[test]
    fn serve_writes_handshake_first() {
        let lines = run(&[]);
        assert_eq!(lines, vec![format!("{PROTOCOL_VERSION}|{MAGIC_COOKIE_VALUE}")]);
    }

    #[test]
    fn serve_answers_requests_in_order() {
        let record = ResourceRecord::new("www", "A", "192.0.2.1");
        let lines = run(&[
            Request {
                id: 1,
                call: Call::PluginTypes,
            },
            Request {
                id: 2,
                call: Call::Normalize {
                    identifier: "www".into(),
                    record: record.to_wire(),
                },
            },
            Request {
                id: 3,
                call: Call::ValidateZone {
                    zone_name: "example.com".into(),
                    zone: Zone::default().to_wire(),
                },
            },
        ]);

        let responses: Vec<Response> = lines[1..]
            .iter()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(responses.len(), 3);
        assert_eq!(
            responses[0].outcome,
            Outcome::Ok(Reply::Types(vec!["A".into(), "AAAA".into()]))
        );
        match &responses[1].outcome {
            Outcome::Ok(Reply::Normalized(message)) => assert_eq!(message.name, "WWW"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(responses[2].id, 3);
        assert_eq!(responses[2].outcome, Outcome::Err("no".into()));
    }

    #[test]
    fn serve_rejects_garbage() {
        let mut output = Vec::new();
        let err = serve_on(&Upper, "upper", "not json\n".as_bytes(), &mut output).unwrap_err();
        assert!(matches!(err, ZoneError::PluginProtocol { .. }));
    }
}
