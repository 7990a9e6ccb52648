//! Per-zone SOA serial numbers.
//!
//! A serial is the day's base (`YYYYMMDD`) followed by a two-digit change
//! index: the first serial issued for a zone on 2025-06-01 is `2025060101`,
//! the next one that day `2025060102`, and the first one on 2025-06-02 is
//! `2025060201` again.
//!
//! State lives in `<dir>/<zone>.serial` as a small YAML document:
//!
//! ```text
//! base_serial_number: 20250601
//! change_index: 2
//! ```
//!
//! Every read-modify-write happens under an exclusive `flock` on
//! `<dir>/<zone>.serial.lock`, so concurrent compiler processes never hand
//! out the same serial. The state file is synced under a temporary name and
//! then renamed into place, so it is never observed half written, even after
//! a crash.

use crate::config::Config;
use crate::error::{Result, ZoneError};
use crate::util::{FileLock, LockFailure};
use chrono::{Datelike, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Persisted serial state for one zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialIndex {
    /// `YYYYMMDD` of the day the index was last reset.
    pub base_serial_number: u32,
    /// Serials issued so far on that day.
    pub change_index: u32,
}

impl SerialIndex {
    /// Fresh index for the day `base`.
    #[must_use]
    pub const fn starting(base: u32) -> Self {
        Self {
            base_serial_number: base,
            change_index: 1,
        }
    }

    /// Parses the on-disk representation.
    ///
    /// # Errors
    ///
    /// Returns the YAML error if a field is missing or not a `u32`.
    pub fn parse(text: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Renders the on-disk representation.
    ///
    /// # Errors
    ///
    /// Returns the YAML error if serialization fails.
    pub fn render(&self) -> std::result::Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// The index to store after issuing one more serial on day `today`.
    ///
    /// Returns `None` if the change index would overflow.
    #[must_use]
    pub fn advance(self, today: u32) -> Option<Self> {
        if self.base_serial_number == today {
            Some(Self {
                base_serial_number: today,
                change_index: self.change_index.checked_add(1)?,
            })
        } else {
            Some(Self::starting(today))
        }
    }

    /// Base digits followed by the zero-padded change index.
    #[must_use]
    pub fn serial_text(&self) -> String {
        format!("{}{:02}", self.base_serial_number, self.change_index)
    }
}

/// `YYYYMMDD` for `date` as a number.
#[must_use]
pub fn base_serial(date: NaiveDate) -> u32 {
    // Years before 1 CE have no YYYYMMDD form; clamp rather than wrap.
    let year = u32::try_from(date.year()).unwrap_or(0);
    year * 10_000 + date.month() * 100 + date.day()
}

/// Issues serials for zones, one state file per zone.
#[derive(Debug, Clone)]
pub struct SerialManager {
    dir: PathBuf,
    lock_timeout: Duration,
    poll_interval: Duration,
}

impl SerialManager {
    /// Manager storing state under `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Manager for `config.serial_index_directory`.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.serial_index_directory)
    }

    /// Overrides how long to wait for the zone lock.
    #[must_use]
    pub const fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Overrides how often a busy lock is retried.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the state file for `zone`.
    #[must_use]
    pub fn state_path(&self, zone: &str) -> PathBuf {
        self.dir.join(format!("{zone}.serial"))
    }

    /// Issues the next serial for `zone` using today's local date.
    ///
    /// # Errors
    ///
    /// See [`next_serial_on`](Self::next_serial_on).
    pub fn get_next(&self, zone: &str) -> Result<String> {
        self.next_serial_on(zone, Local::now().date_naive())
    }

    /// Issues the next serial for `zone` as if today were `date`.
    ///
    /// # Errors
    ///
    /// - [`ZoneError::LockTimeout`] if the zone lock stays busy past the lock
    ///   timeout.
    /// - [`ZoneError::SerialFormat`] if the serial does not fit in a `u32`;
    ///   the stored state is left untouched.
    /// - [`ZoneError::SerialPersistence`] for an invalid zone name, I/O
    ///   failures, or a corrupt state file.
    pub fn next_serial_on(&self, zone: &str, date: NaiveDate) -> Result<String> {
        let _lock = self.lock(zone)?;

        let today = base_serial(date);
        let next = match self.read_state(zone)? {
            None => SerialIndex::starting(today),
            Some(previous) => previous.advance(today).ok_or_else(|| ZoneError::SerialFormat {
                zone: zone.to_string(),
                serial: format!("{}{}", previous.base_serial_number, u64::from(previous.change_index) + 1),
            })?,
        };

        let serial = next.serial_text();
        if serial.parse::<u32>().is_err() {
            return Err(ZoneError::SerialFormat {
                zone: zone.to_string(),
                serial,
            });
        }

        self.write_state(zone, &next)?;
        tracing::info!(zone = %zone, serial = %serial, "Issued zone serial");
        Ok(serial)
    }

    /// Reads the stored index for `zone` without advancing it.
    ///
    /// # Errors
    ///
    /// Same as [`next_serial_on`](Self::next_serial_on), minus the format
    /// check.
    pub fn current(&self, zone: &str) -> Result<Option<SerialIndex>> {
        let _lock = self.lock(zone)?;
        self.read_state(zone)
    }

    fn persistence_err(zone: &str, reason: impl Into<String>) -> ZoneError {
        ZoneError::SerialPersistence {
            zone: zone.to_string(),
            reason: reason.into(),
        }
    }

    /// Validates the zone name, ensures the directory exists and takes the
    /// zone lock.
    fn lock(&self, zone: &str) -> Result<FileLock> {
        if zone.is_empty() || zone.contains(['/', '\\']) || zone.contains("..") {
            return Err(Self::persistence_err(zone, "invalid zone name"));
        }

        std::fs::create_dir_all(&self.dir).map_err(|e| {
            Self::persistence_err(zone, format!("creating {}: {e}", self.dir.display()))
        })?;

        let path = self.dir.join(format!("{zone}.serial.lock"));
        FileLock::acquire(&path, self.lock_timeout, self.poll_interval).map_err(|failure| {
            match failure {
                LockFailure::TimedOut => ZoneError::LockTimeout {
                    path: path.clone(),
                    timeout: self.lock_timeout,
                },
                LockFailure::Io(e) => {
                    Self::persistence_err(zone, format!("locking {}: {e}", path.display()))
                }
            }
        })
    }

    fn read_state(&self, zone: &str) -> Result<Option<SerialIndex>> {
        let path = self.state_path(zone);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Self::persistence_err(
                    zone,
                    format!("reading {}: {e}", path.display()),
                ));
            }
        };
        SerialIndex::parse(&text)
            .map(Some)
            .map_err(|e| Self::persistence_err(zone, format!("parsing {}: {e}", path.display())))
    }

    fn write_state(&self, zone: &str, index: &SerialIndex) -> Result<()> {
        let path = self.state_path(zone);
        let tmp = self.dir.join(format!("{zone}.serial.tmp"));
        let text = index
            .render()
            .map_err(|e| Self::persistence_err(zone, format!("encoding state: {e}")))?;

        let persist = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(text.as_bytes())?;
            file.sync_all()?;
            drop(file);
            std::fs::rename(&tmp, &path)?;
            // The rename is only durable once the directory entry is.
            File::open(&self.dir)?.sync_all()
        };
        persist().map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            Self::persistence_err(zone, format!("writing {}: {e}", path.display()))
        })
    }
}
