use crate::error::QueueError;
use chrono::{DateTime, Utc};
use claimwatch_protocol::defaults::{CLAIMED_DIR_NAME, FAILED_DIR_NAME, QUARANTINE_DIR_NAME};
use claimwatch_protocol::{Ticket, TicketName};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// A ticket removed from the queue and owned by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedTicket {
    pub name: TicketName,
    pub ticket: Ticket,
}

/// A failed ticket kept for manual re-enqueue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub file_name: String,
    pub ticket: Ticket,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub quarantined: usize,
    pub failed: usize,
}

/// Directory-backed FIFO of ticket files.
///
/// Layout:
/// ```text
/// <dir>/ticket_*.json      unclaimed tickets
/// <dir>/claimed/           claim staging (empty between cycles)
/// <dir>/quarantine/        unparsable tickets
/// <dir>/failed/            dead letters and lost claims
/// ```
#[derive(Debug, Clone)]
pub struct TicketQueue {
    dir: PathBuf,
    claimed_dir: PathBuf,
    quarantine_dir: PathBuf,
    failed_dir: PathBuf,
}

impl TicketQueue {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            claimed_dir: dir.join(CLAIMED_DIR_NAME),
            quarantine_dir: dir.join(QUARANTINE_DIR_NAME),
            failed_dir: dir.join(FAILED_DIR_NAME),
            dir,
        }
    }

    /// Create the queue and its subdirectories if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let queue = Self::new(dir);
        queue.ensure_dirs()?;
        Ok(queue)
    }

    pub fn ensure_dirs(&self) -> Result<(), QueueError> {
        for dir in [&self.dir, &self.claimed_dir, &self.quarantine_dir, &self.failed_dir] {
            fs::create_dir_all(dir).map_err(|e| QueueError::io(dir, e))?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    pub fn failed_dir(&self) -> &Path {
        &self.failed_dir
    }

    /// Unclaimed tickets in processing order.
    pub fn pending(&self) -> Result<Vec<TicketName>, QueueError> {
        let (mut names, _corrupt) = self.scan()?;
        names.sort();
        Ok(names)
    }

    /// Remove and return the earliest ticket, or `None` if the queue is empty.
    ///
    /// The ticket file is deleted before this returns: whatever happens to the
    /// caller afterwards, the ticket is never handed out again.
    pub fn claim_next(&self) -> Result<Option<ClaimedTicket>, QueueError> {
        let (mut names, corrupt) = self.scan()?;
        for file_name in corrupt {
            error!("Ticket {} has an invalid name; quarantining", file_name);
            self.quarantine(&self.dir.join(&file_name), &file_name)?;
        }
        names.sort();

        for name in names {
            let source = self.dir.join(name.file_name());
            let claimed = self.claimed_dir.join(name.file_name());
            match fs::rename(&source, &claimed) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!("Ticket {} claimed elsewhere; trying next", name);
                    continue;
                }
                Err(err) => return Err(QueueError::io(&source, err)),
            }

            let bytes = fs::read(&claimed).map_err(|e| QueueError::io(&claimed, e))?;
            match Ticket::decode(&name, &bytes) {
                Ok(ticket) => {
                    fs::remove_file(&claimed).map_err(|e| QueueError::io(&claimed, e))?;
                    debug!("Claimed ticket {} (id={})", name, ticket.id);
                    return Ok(Some(ClaimedTicket { name, ticket }));
                }
                Err(err) => {
                    error!("Ticket {} is unreadable: {}; quarantining", name, err);
                    self.quarantine(&claimed, name.file_name())?;
                }
            }
        }
        Ok(None)
    }

    /// Move claims orphaned by a crashed dispatcher to `failed/`.
    ///
    /// Their workers may or may not have run, so they are never reprocessed.
    pub fn recover_stale_claims(&self) -> Result<Vec<String>, QueueError> {
        let mut lost = Vec::new();
        for file_name in list_files(&self.claimed_dir)? {
            let source = self.claimed_dir.join(&file_name);
            let target = unused_path(&self.failed_dir, &file_name);
            fs::rename(&source, &target).map_err(|e| QueueError::io(&source, e))?;
            warn!(
                "Ticket {} was claimed by a previous run that did not finish; moved to {}",
                file_name,
                target.display()
            );
            lost.push(file_name);
        }
        Ok(lost)
    }

    /// Persist a failed ticket to `failed/` for manual re-enqueue.
    pub fn write_failure(&self, claimed: &ClaimedTicket, reason: &str) -> Result<PathBuf, QueueError> {
        let record = FailureRecord {
            file_name: claimed.name.file_name().to_string(),
            ticket: claimed.ticket.clone(),
            reason: reason.to_string(),
            failed_at: Utc::now(),
        };
        let stem = claimed
            .name
            .file_name()
            .rsplit_once('.')
            .map_or(claimed.name.file_name(), |(stem, _)| stem);
        let path = self.failed_dir.join(format!("{}.failed.json", stem));
        let body = serde_json::to_vec_pretty(&record)?;
        fs::write(&path, body).map_err(|e| QueueError::io(&path, e))?;
        Ok(path)
    }

    pub fn counts(&self) -> Result<QueueCounts, QueueError> {
        let pending = list_files(&self.dir)?
            .iter()
            .filter(|name| TicketName::looks_like_ticket(name))
            .count();
        Ok(QueueCounts {
            pending,
            quarantined: count_files(&self.quarantine_dir)?,
            failed: count_files(&self.failed_dir)?,
        })
    }

    /// Ticket-like files in the queue directory: parsed names plus the
    /// names that look like tickets but do not parse.
    fn scan(&self) -> Result<(Vec<TicketName>, Vec<String>), QueueError> {
        let mut names = Vec::new();
        let mut corrupt = Vec::new();
        for file_name in list_files(&self.dir)? {
            if !TicketName::looks_like_ticket(&file_name) {
                continue;
            }
            match TicketName::parse(&file_name) {
                Ok(name) => names.push(name),
                Err(_) => corrupt.push(file_name),
            }
        }
        Ok((names, corrupt))
    }

    fn quarantine(&self, source: &Path, file_name: &str) -> Result<(), QueueError> {
        let target = unused_path(&self.quarantine_dir, file_name);
        match fs::rename(source, &target) {
            Ok(()) => Ok(()),
            // Another dispatcher got there first
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(QueueError::io(source, err)),
        }
    }
}

fn list_files(dir: &Path) -> Result<Vec<String>, QueueError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(QueueError::io(dir, err)),
    };
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| QueueError::io(dir, e))?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            files.push(name.to_string());
        }
    }
    Ok(files)
}

/// `dir/file_name`, or a timestamp-suffixed sibling when that name is taken.
fn unused_path(dir: &Path, file_name: &str) -> PathBuf {
    let target = dir.join(file_name);
    if !target.exists() {
        return target;
    }
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
    let mut n = 0u32;
    loop {
        let candidate = if n == 0 {
            dir.join(format!("{}.{}", file_name, stamp))
        } else {
            dir.join(format!("{}.{}-{}", file_name, stamp, n))
        };
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn count_files(dir: &Path) -> Result<usize, QueueError> {
    Ok(list_files(dir)?.len())
}
