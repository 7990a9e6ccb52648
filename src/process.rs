//! Plugin subprocess management.
//!
//! Each executable in the plugin directory is started with piped stdio and a
//! magic cookie in its environment. The plugin proves it speaks our protocol
//! by printing `<protocol-version>|<cookie>` as its first line; after that,
//! every call is one JSON request line on its stdin answered by one JSON
//! response line on its stdout.
//!
//! A [`ProcessPlugin`] kills its subprocess when dropped, so every exit path
//! of the code that launched it tears the process down.

use crate::config::Config;
use crate::error::{PluginError, Result, ZoneError};
use crate::plugin::{PluginType, RecordPlugin};
use crate::wire::{Call, FromWire, Outcome, Reply, Request, Response, ToWire};
use crate::zone::{ResourceRecord, Zone};
use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Environment variable carrying the handshake cookie.
pub const MAGIC_COOKIE_KEY: &str = "ZONEC_PLUGIN_MAGIC_COOKIE";

/// Value a plugin must echo back during the handshake.
pub const MAGIC_COOKIE_VALUE: &str = "0c5d7a3e91f44b2a8e6b1f9d2c4a7e58";

/// Wire protocol version spoken by this host.
pub const PROTOCOL_VERSION: u32 = 1;

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeouts applied to plugin subprocesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchOptions {
    /// How long a fresh subprocess has to print its handshake line.
    pub handshake_timeout: Duration,
    /// Upper bound for a single call.
    pub call_timeout: Duration,
    /// Absolute deadline shared by every call, if the host has one.
    pub deadline: Option<Instant>,
}

impl LaunchOptions {
    #[must_use]
    pub const fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Time budget for a call starting now. Zero once the deadline passed.
    fn call_budget(&self) -> Duration {
        self.deadline.map_or(self.call_timeout, |deadline| {
            self.call_timeout
                .min(deadline.saturating_duration_since(Instant::now()))
        })
    }
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            deadline: None,
        }
    }
}

/// Lists the plugin executables in `dir`, sorted by path.
///
/// Hidden files and files without an execute bit are skipped.
///
/// # Errors
///
/// Returns [`ZoneError::Configuration`] if `dir` cannot be read.
pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    let unreadable = |e: std::io::Error| {
        ZoneError::Configuration(format!(
            "cannot read plugin directory {}: {e}",
            dir.display()
        ))
    };

    let mut found = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_none_or(|n| n.starts_with('.'));
        if hidden {
            continue;
        }
        // Follows symlinks, so a link to an executable counts.
        let Ok(meta) = std::fs::metadata(&path) else {
            continue;
        };
        if meta.is_file() && meta.permissions().mode() & 0o111 != 0 {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Live channel to a plugin subprocess.
struct Connection {
    child: Child,
    stdin: Option<ChildStdin>,
    responses: Receiver<std::io::Result<String>>,
    next_id: u64,
    closed: bool,
}

impl Connection {
    /// Closes stdin, kills the process if it is still running and reaps it.
    fn terminate(&mut self, plugin: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stdin.take();

        if matches!(self.child.try_wait(), Ok(None)) {
            if let Err(e) = self.child.kill() {
                tracing::warn!(plugin = %plugin, error = %e, "Failed to kill plugin process");
            }
        }
        match self.child.wait() {
            Ok(status) => tracing::debug!(plugin = %plugin, %status, "Plugin process exited"),
            Err(e) => tracing::warn!(plugin = %plugin, error = %e, "Failed to reap plugin process"),
        }
    }
}

/// RPC proxy for one plugin subprocess.
///
/// Calls are serialized through an internal lock because the subprocess has
/// a single request/response channel.
pub struct ProcessPlugin {
    name: String,
    path: PathBuf,
    pid: u32,
    options: LaunchOptions,
    conn: Mutex<Connection>,
}

impl ProcessPlugin {
    /// Starts the executable at `path` and performs the handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ZoneError::Handshake`] if the process cannot be spawned,
    /// exits before handshaking, stays silent past the handshake timeout, or
    /// answers with the wrong cookie or protocol version. The subprocess is
    /// killed in every failure case.
    pub fn launch(path: &Path, options: &LaunchOptions) -> Result<Self> {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let handshake_err = |reason: String| ZoneError::Handshake {
            plugin: name.clone(),
            reason,
        };

        let mut child = Command::new(path)
            .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| handshake_err(format!("failed to start: {e}")))?;
        let pid = child.id();

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (tx, responses) = mpsc::channel();
        if let Some(stdout) = stdout {
            let spawned = std::thread::Builder::new()
                .name(format!("{name}-stdout"))
                .spawn(move || {
                    for line in BufReader::new(stdout).lines() {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                });
            if let Err(e) = spawned {
                let _ = child.kill();
                let _ = child.wait();
                return Err(handshake_err(format!("cannot start reader thread: {e}")));
            }
        }
        if let Some(stderr) = stderr {
            let plugin = name.clone();
            // Losing plugin log output is not worth failing the launch over.
            let _ = std::thread::Builder::new()
                .name(format!("{name}-stderr"))
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(std::result::Result::ok) {
                        tracing::debug!(plugin = %plugin, "{line}");
                    }
                });
        }

        // From here on, dropping `plugin` kills the subprocess.
        let plugin = Self {
            name: name.clone(),
            path: path.to_path_buf(),
            pid,
            options: *options,
            conn: Mutex::new(Connection {
                child,
                stdin,
                responses,
                next_id: 0,
                closed: false,
            }),
        };

        let first_line = plugin.read_handshake()?;
        check_handshake(&first_line).map_err(handshake_err)?;

        tracing::info!(
            plugin = %plugin.name,
            pid = pid,
            path = %path.display(),
            "Launched plugin"
        );
        Ok(plugin)
    }

    /// Plugin name (the executable's file name).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// OS process id of the subprocess.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// `true` while the subprocess is running and usable.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.conn
            .lock()
            .is_ok_and(|mut conn| !conn.closed && matches!(conn.child.try_wait(), Ok(None)))
    }

    /// Terminates the subprocess. Later calls fail with a protocol error.
    pub fn shutdown(&self) {
        match self.conn.lock() {
            Ok(mut conn) => conn.terminate(&self.name),
            Err(poisoned) => poisoned.into_inner().terminate(&self.name),
        }
    }

    fn read_handshake(&self) -> Result<String> {
        let handshake_err = |reason: String| ZoneError::Handshake {
            plugin: self.name.clone(),
            reason,
        };
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| handshake_err("connection lock poisoned".into()))?;

        match conn.responses.recv_timeout(self.options.handshake_timeout) {
            Ok(Ok(line)) => Ok(line),
            Ok(Err(e)) => Err(handshake_err(format!("reading handshake: {e}"))),
            Err(RecvTimeoutError::Timeout) => Err(handshake_err(format!(
                "no handshake within {:?}",
                self.options.handshake_timeout
            ))),
            // EOF on stdout; the process itself may still be running.
            Err(RecvTimeoutError::Disconnected) => {
                let reason = match conn.child.try_wait() {
                    Ok(Some(status)) => format!("exited before handshake ({status})"),
                    _ => "closed stdout before handshake".to_string(),
                };
                conn.terminate(&self.name);
                Err(handshake_err(reason))
            }
        }
    }

    /// Sends one request and waits for its response.
    ///
    /// Any transport failure kills the subprocess: after a timeout or a
    /// garbled line the channel can no longer be trusted to stay in step.
    fn call(&self, call: Call) -> std::result::Result<Reply, PluginError> {
        let method = call.method();
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| PluginError::Protocol("connection lock poisoned".into()))?;
        if conn.closed {
            return Err(PluginError::Protocol(format!(
                "{method}: plugin process is not running"
            )));
        }

        let budget = self.options.call_budget();
        if budget.is_zero() {
            conn.terminate(&self.name);
            return Err(PluginError::Protocol(format!(
                "{method}: deadline exceeded before the call"
            )));
        }

        conn.next_id += 1;
        let id = conn.next_id;
        let line = serde_json::to_string(&Request { id, call })
            .map_err(|e| PluginError::Protocol(format!("{method}: encoding request: {e}")))?;

        tracing::debug!(plugin = %self.name, method, id, "Calling plugin");

        let sent = match conn.stdin.as_mut() {
            Some(stdin) => writeln!(stdin, "{line}").and_then(|()| stdin.flush()),
            None => Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe)),
        };
        if let Err(e) = sent {
            conn.terminate(&self.name);
            return Err(PluginError::Protocol(format!("{method}: sending request: {e}")));
        }

        let line = match conn.responses.recv_timeout(budget) {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                conn.terminate(&self.name);
                return Err(PluginError::Protocol(format!("{method}: reading response: {e}")));
            }
            Err(RecvTimeoutError::Timeout) => {
                conn.terminate(&self.name);
                return Err(PluginError::Protocol(format!(
                    "{method}: no response within {budget:?}"
                )));
            }
            Err(RecvTimeoutError::Disconnected) => {
                conn.terminate(&self.name);
                return Err(PluginError::Protocol(format!(
                    "{method}: plugin exited before responding"
                )));
            }
        };

        let response: Response = match serde_json::from_str(&line) {
            Ok(response) => response,
            Err(e) => {
                conn.terminate(&self.name);
                return Err(PluginError::Protocol(format!(
                    "{method}: malformed response: {e}"
                )));
            }
        };
        if response.id != id {
            conn.terminate(&self.name);
            return Err(PluginError::Protocol(format!(
                "{method}: response id {} does not match request id {id}",
                response.id
            )));
        }

        match response.outcome {
            Outcome::Ok(reply) => Ok(reply),
            Outcome::Err(message) => Err(PluginError::Rejected(message)),
        }
    }
}

impl Drop for ProcessPlugin {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ProcessPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessPlugin")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Validates `<protocol-version>|<cookie>`.
fn check_handshake(line: &str) -> std::result::Result<(), String> {
    let (version, cookie) = line
        .trim()
        .split_once('|')
        .ok_or_else(|| format!("malformed handshake line {line:?}"))?;
    let version: u32 = version
        .parse()
        .map_err(|_| format!("malformed protocol version {version:?}"))?;
    if version != PROTOCOL_VERSION {
        return Err(format!(
            "protocol version {version} is not supported (expected {PROTOCOL_VERSION})"
        ));
    }
    if cookie != MAGIC_COOKIE_VALUE {
        return Err("magic cookie mismatch".into());
    }
    Ok(())
}

fn unexpected(method: &str, reply: &Reply) -> PluginError {
    PluginError::Protocol(format!("{method}: unexpected reply {reply:?}"))
}

impl RecordPlugin for ProcessPlugin {
    fn plugin_version(&self) -> std::result::Result<String, PluginError> {
        match self.call(Call::PluginVersion)? {
            Reply::Version(version) => Ok(version),
            other => Err(unexpected("PluginVersion", &other)),
        }
    }

    fn plugin_types(&self) -> std::result::Result<BTreeSet<PluginType>, PluginError> {
        match self.call(Call::PluginTypes)? {
            Reply::Types(types) => Ok(types.iter().map(|t| PluginType::new(t)).collect()),
            other => Err(unexpected("PluginTypes", &other)),
        }
    }

    fn configure(&self, config: &Config) -> std::result::Result<(), PluginError> {
        match self.call(Call::Configure {
            config: config.to_wire(),
        })? {
            Reply::Configured => Ok(()),
            other => Err(unexpected("Configure", &other)),
        }
    }

    fn normalize(
        &self,
        identifier: &str,
        record: &ResourceRecord,
    ) -> std::result::Result<ResourceRecord, PluginError> {
        match self.call(Call::Normalize {
            identifier: identifier.to_string(),
            record: record.to_wire(),
        })? {
            Reply::Normalized(message) => ResourceRecord::from_wire(message)
                .map_err(|e| PluginError::Protocol(format!("Normalize: {e}"))),
            other => Err(unexpected("Normalize", &other)),
        }
    }

    fn validate_zone(&self, zone_name: &str, zone: &Zone) -> std::result::Result<(), PluginError> {
        match self.call(Call::ValidateZone {
            zone_name: zone_name.to_string(),
            zone: zone.to_wire(),
        })? {
            Reply::Validated => Ok(()),
            other => Err(unexpected("ValidateZone", &other)),
        }
    }

    fn render(
        &self,
        identifier: &str,
        record: &ResourceRecord,
    ) -> std::result::Result<String, PluginError> {
        match self.call(Call::Render {
            identifier: identifier.to_string(),
            record: record.to_wire(),
        })? {
            Reply::Rendered(text) => Ok(text),
            other => Err(unexpected("Render", &other)),
        }
    }
}
