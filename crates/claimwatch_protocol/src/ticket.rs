//! Ticket files exchanged through the queue directory.
//!
//! # File name
//!
//! ```text
//! ticket_<kind>_<YYYY-MM-DDTHH-MM-SS[.ffffff]>[_<nonce>].json
//! ```
//!
//! The timestamp is UTC and defines processing order. `kind` is restricted to
//! `[a-z0-9-]` so the `_` separators stay unambiguous. The nonce keeps names
//! unique when two tickets share a timestamp.
//!
//! Legacy producers wrote `wop_ticket_<epoch-seconds>_<n>.txt` with an opaque
//! body; those are still accepted as kind `wop`.
//!
//! # Body
//!
//! A JSON object: `{"id", "kind", "created_at", "metadata"}`.

use crate::error::TicketError;
use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const TICKET_PREFIX: &str = "ticket_";
const TICKET_EXT: &str = ".json";
const LEGACY_PREFIX: &str = "wop_ticket_";
const LEGACY_EXT: &str = ".txt";
const LEGACY_KIND: &str = "wop";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketFormat {
    Json,
    Legacy,
}

/// A parsed ticket file name.
///
/// Ordering is by embedded creation time, then by the full file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketName {
    file_name: String,
    kind: String,
    created_at: DateTime<Utc>,
    format: TicketFormat,
}

impl TicketName {
    /// Whether a directory entry claims to be a ticket.
    ///
    /// Entries that look like tickets but fail [`TicketName::parse`] are
    /// corrupt; everything else (temp files, subdirectories) is ignored.
    pub fn looks_like_ticket(file_name: &str) -> bool {
        (file_name.starts_with(TICKET_PREFIX) && file_name.ends_with(TICKET_EXT))
            || (file_name.starts_with(LEGACY_PREFIX) && file_name.ends_with(LEGACY_EXT))
    }

    pub fn parse(file_name: &str) -> Result<Self, TicketError> {
        let invalid = || TicketError::InvalidName(file_name.to_string());

        if let Some(rest) = file_name
            .strip_prefix(LEGACY_PREFIX)
            .and_then(|r| r.strip_suffix(LEGACY_EXT))
        {
            let epoch = rest.split('_').next().unwrap_or_default();
            let secs: i64 = epoch.parse().map_err(|_| invalid())?;
            let created_at = Utc.timestamp_opt(secs, 0).single().ok_or_else(invalid)?;
            return Ok(Self {
                file_name: file_name.to_string(),
                kind: LEGACY_KIND.to_string(),
                created_at,
                format: TicketFormat::Legacy,
            });
        }

        let rest = file_name
            .strip_prefix(TICKET_PREFIX)
            .and_then(|r| r.strip_suffix(TICKET_EXT))
            .ok_or_else(invalid)?;
        let mut parts = rest.splitn(3, '_');
        let kind = parts.next().unwrap_or_default();
        validate_kind(kind).map_err(|_| invalid())?;
        let stamp = parts.next().ok_or_else(invalid)?;
        let created_at = parse_timestamp(stamp).ok_or_else(invalid)?;
        if let Some(nonce) = parts.next() {
            if nonce.is_empty() || !nonce.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(invalid());
            }
        }

        Ok(Self {
            file_name: file_name.to_string(),
            kind: kind.to_string(),
            created_at,
            format: TicketFormat::Json,
        })
    }

    /// Build a fresh, unique name for a ticket created at `created_at`.
    pub fn generate(kind: &str, created_at: DateTime<Utc>) -> Result<Self, TicketError> {
        validate_kind(kind)?;
        let nonce = Uuid::new_v4().simple().to_string();
        let file_name = format!(
            "{}{}_{}_{}{}",
            TICKET_PREFIX,
            kind,
            format_timestamp(created_at),
            &nonce[..8],
            TICKET_EXT
        );
        Self::parse(&file_name)
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn format(&self) -> TicketFormat {
        self.format
    }
}

impl Ord for TicketName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.file_name.cmp(&other.file_name))
    }
}

impl PartialOrd for TicketName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TicketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file_name)
    }
}

/// One unit of deferred work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Work-item identifier understood by the worker
    pub id: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Ticket {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Decode a ticket body read from the file called `name`.
    pub fn decode(name: &TicketName, bytes: &[u8]) -> Result<Self, TicketError> {
        match name.format {
            TicketFormat::Legacy => {
                let mut metadata = BTreeMap::new();
                let body = String::from_utf8_lossy(bytes).trim().to_string();
                if !body.is_empty() {
                    metadata.insert("legacy_body".to_string(), serde_json::Value::String(body));
                }
                let id = name
                    .file_name
                    .strip_suffix(LEGACY_EXT)
                    .unwrap_or(&name.file_name)
                    .to_string();
                Ok(Self {
                    id,
                    kind: LEGACY_KIND.to_string(),
                    created_at: name.created_at,
                    metadata,
                })
            }
            TicketFormat::Json => {
                let ticket: Ticket =
                    serde_json::from_slice(bytes).map_err(|source| TicketError::MalformedBody {
                        name: name.file_name.clone(),
                        source,
                    })?;
                if ticket.id.trim().is_empty() {
                    return Err(TicketError::EmptyId(name.file_name.clone()));
                }
                if ticket.kind != name.kind {
                    return Err(TicketError::KindMismatch {
                        name: name.file_name.clone(),
                        expected: name.kind.clone(),
                        body: ticket.kind,
                    });
                }
                Ok(ticket)
            }
        }
    }

    pub fn to_json(&self) -> Result<String, TicketError> {
        serde_json::to_string(self).map_err(TicketError::Encode)
    }

    /// Atomically publish this ticket into `queue_dir`.
    ///
    /// The body is written to a hidden temp file in the same directory and
    /// renamed into place, so a consumer never observes a partial file.
    pub fn write_to_queue(&self, queue_dir: &Path) -> Result<PathBuf, TicketError> {
        if self.id.trim().is_empty() {
            return Err(TicketError::EmptyId(self.kind.clone()));
        }
        let name = TicketName::generate(&self.kind, self.created_at)?;
        fs::create_dir_all(queue_dir)?;

        let body = serde_json::to_vec_pretty(self).map_err(TicketError::Encode)?;
        let tmp_path = queue_dir.join(format!(".{}.tmp", name.file_name));
        let final_path = queue_dir.join(&name.file_name);
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&body)?;
            file.sync_all()?;
        }
        if let Err(err) = fs::rename(&tmp_path, &final_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(err.into());
        }
        Ok(final_path)
    }
}

fn validate_kind(kind: &str) -> Result<(), TicketError> {
    let valid = !kind.is_empty()
        && kind
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(TicketError::InvalidKind(kind.to_string()))
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H-%M-%S%.6f").to_string()
}

fn parse_timestamp(stamp: &str) -> Option<DateTime<Utc>> {
    let (base, fraction) = match stamp.split_once('.') {
        Some((base, fraction)) => (base, Some(fraction)),
        None => (stamp, None),
    };
    let naive = NaiveDateTime::parse_from_str(base, TIMESTAMP_FORMAT).ok()?;
    let nanos = match fraction {
        None => 0,
        Some(digits) => {
            if digits.is_empty() || digits.len() > 9 || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let value: u32 = digits.parse().ok()?;
            value * 10u32.pow(9 - digits.len() as u32)
        }
    };
    let naive = naive.with_nanosecond(nanos)?;
    Some(Utc.from_utc_datetime(&naive))
}
