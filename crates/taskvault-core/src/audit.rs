//! Audit trail of cache hits, misses, deletions and errors
//!
//! Sinks are fire-and-forget: a failing sink logs through `tracing` and never
//! fails the cache operation that produced the event.

use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// File name of the audit log under the cache root
pub const AUDIT_FILE: &str = "audit.log";

/// Number of digest characters written to the audit log
const DIGEST_PREFIX: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    Hit,
    Miss,
    Delete,
    Error,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Hit => "HIT",
            AuditKind::Miss => "MISS",
            AuditKind::Delete => "DELETE",
            AuditKind::Error => "ERROR",
        }
    }
}

/// One audited cache operation
#[derive(Debug, Clone)]
pub struct AuditEvent<'a> {
    pub kind: AuditKind,
    /// Operation name such as `save`, `get` or `save_error`
    pub operation: &'a str,
    pub task: &'a str,
    pub digest: Option<&'a str>,
    pub error: Option<String>,
}

impl<'a> AuditEvent<'a> {
    pub fn hit(operation: &'a str, task: &'a str, digest: &'a str) -> Self {
        Self {
            kind: AuditKind::Hit,
            operation,
            task,
            digest: Some(digest),
            error: None,
        }
    }

    pub fn miss(operation: &'a str, task: &'a str, digest: &'a str) -> Self {
        Self {
            kind: AuditKind::Miss,
            operation,
            task,
            digest: Some(digest),
            error: None,
        }
    }

    /// Removal of one entry (`digest` set) or of every entry of a task
    pub fn delete(operation: &'a str, task: &'a str, digest: Option<&'a str>) -> Self {
        Self {
            kind: AuditKind::Delete,
            operation,
            task,
            digest,
            error: None,
        }
    }

    pub fn error(operation: &'a str, task: &'a str, error: &dyn std::error::Error) -> Self {
        Self {
            kind: AuditKind::Error,
            operation,
            task,
            digest: None,
            error: Some(error.to_string()),
        }
    }

    /// Render as a single audit log line, without the trailing newline
    pub fn to_line(&self) -> String {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        match self.kind {
            AuditKind::Error => format!(
                "[{}] {} {} task={} error={}",
                timestamp,
                self.kind.as_str(),
                self.operation,
                self.task,
                self.error.as_deref().unwrap_or("unknown")
            ),
            _ => match self.digest {
                Some(digest) => format!(
                    "[{}] {} {} task={} hash={}",
                    timestamp,
                    self.kind.as_str(),
                    self.operation,
                    self.task,
                    truncate_digest(digest)
                ),
                None => format!(
                    "[{}] {} {} task={}",
                    timestamp,
                    self.kind.as_str(),
                    self.operation,
                    self.task
                ),
            },
        }
    }
}

fn truncate_digest(digest: &str) -> String {
    match digest.get(..DIGEST_PREFIX) {
        Some(prefix) if digest.len() > DIGEST_PREFIX => format!("{}...", prefix),
        _ => digest.to_string(),
    }
}

/// Receiver of audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent<'_>);

    /// Flush and release the sink; later events are dropped
    fn close(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Where audit events go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditMode {
    /// `audit.log` in the cache directory
    #[default]
    File,
    /// `tracing` events
    Tracing,
    /// Dropped
    None,
}

impl AuditMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditMode::File => "file",
            AuditMode::Tracing => "tracing",
            AuditMode::None => "none",
        }
    }

    /// Build the sink for this mode
    pub fn open_sink(&self, cache_dir: impl AsRef<Path>) -> io::Result<Arc<dyn AuditSink>> {
        Ok(match self {
            AuditMode::File => Arc::new(FileAuditLog::open(cache_dir)?),
            AuditMode::Tracing => Arc::new(TracingAudit),
            AuditMode::None => Arc::new(NoopAudit),
        })
    }
}

impl std::fmt::Display for AuditMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing an audit mode name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAuditModeError(pub String);

impl std::fmt::Display for ParseAuditModeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown audit mode '{}' (expected file, tracing or none)", self.0)
    }
}

impl std::error::Error for ParseAuditModeError {}

impl FromStr for AuditMode {
    type Err = ParseAuditModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "file" => Ok(AuditMode::File),
            "tracing" => Ok(AuditMode::Tracing),
            "none" => Ok(AuditMode::None),
            _ => Err(ParseAuditModeError(s.to_string())),
        }
    }
}

/// Appends audit lines to `audit.log` in the cache directory
pub struct FileAuditLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileAuditLog {
    /// Open (or create) the audit log under `cache_dir`
    pub fn open(cache_dir: impl AsRef<Path>) -> io::Result<Self> {
        let cache_dir = cache_dir.as_ref();
        std::fs::create_dir_all(cache_dir)?;

        let path = cache_dir.join(AUDIT_FILE);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        info!("Audit log: {:?}", path);
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditLog {
    fn record(&self, event: &AuditEvent<'_>) {
        let mut file = self.file.lock();
        let Some(file) = file.as_mut() else {
            debug!("Audit log closed, dropping {} event", event.operation);
            return;
        };

        if let Err(e) = writeln!(file, "{}", event.to_line()) {
            warn!("Failed to write audit log {:?}: {}", self.path, e);
        }
    }

    fn close(&self) -> io::Result<()> {
        match self.file.lock().take() {
            Some(file) => file.sync_all(),
            None => Ok(()),
        }
    }
}

/// Forwards audit events to `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAudit;

impl AuditSink for TracingAudit {
    fn record(&self, event: &AuditEvent<'_>) {
        match event.kind {
            AuditKind::Error => warn!(
                operation = event.operation,
                task = event.task,
                error = event.error.as_deref().unwrap_or_default(),
                "cache error"
            ),
            kind => debug!(
                operation = event.operation,
                task = event.task,
                digest = event.digest.unwrap_or_default(),
                "cache {}",
                kind.as_str().to_lowercase()
            ),
        }
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudit;

impl AuditSink for NoopAudit {
    fn record(&self, _event: &AuditEvent<'_>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIGEST: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_line_format() {
        let line = AuditEvent::hit("save", "build", DIGEST).to_line();
        assert!(line.starts_with('['));
        assert!(line.ends_with("] HIT save task=build hash=0123456789ab..."), "{line}");

        let line = AuditEvent::miss("get", "build", "abc").to_line();
        assert!(line.ends_with("] MISS get task=build hash=abc"), "{line}");

        let line = AuditEvent::delete("delete", "build", Some(DIGEST)).to_line();
        assert!(line.ends_with("] DELETE delete task=build hash=0123456789ab..."), "{line}");

        let line = AuditEvent::delete("invalidate", "build", None).to_line();
        assert!(line.ends_with("] DELETE invalidate task=build"), "{line}");

        let err = io::Error::other("disk full");
        let line = AuditEvent::error("save_error", "build", &err).to_line();
        assert!(line.ends_with("] ERROR save_error task=build error=disk full"), "{line}");
    }

    #[test]
    fn test_file_audit_log_appends_until_closed() {
        let dir = TempDir::new().unwrap();
        let log = FileAuditLog::open(dir.path()).unwrap();

        log.record(&AuditEvent::hit("save", "build", DIGEST));
        log.record(&AuditEvent::hit("get", "build", DIGEST));
        log.close().unwrap();
        log.record(&AuditEvent::miss("get", "build", DIGEST));

        let contents = std::fs::read_to_string(dir.path().join(AUDIT_FILE)).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("HIT save task=build"));
        assert!(lines[1].contains("HIT get task=build"));

        // Reopening appends
        let log = FileAuditLog::open(dir.path()).unwrap();
        log.record(&AuditEvent::miss("get", "test", DIGEST));
        log.close().unwrap();
        let contents = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn test_audit_mode_parse() {
        assert_eq!("file".parse::<AuditMode>().unwrap(), AuditMode::File);
        assert_eq!("Tracing".parse::<AuditMode>().unwrap(), AuditMode::Tracing);
        assert_eq!("none".parse::<AuditMode>().unwrap(), AuditMode::None);
        assert_eq!(AuditMode::default(), AuditMode::File);
        assert!("syslog".parse::<AuditMode>().is_err());
    }

    #[test]
    fn test_open_sink_per_mode() {
        let dir = TempDir::new().unwrap();

        let sink = AuditMode::Tracing.open_sink(dir.path()).unwrap();
        sink.record(&AuditEvent::hit("get", "build", DIGEST));
        sink.record(&AuditEvent::error("get_error", "build", &io::Error::other("boom")));
        sink.close().unwrap();

        let sink = AuditMode::None.open_sink(dir.path()).unwrap();
        sink.record(&AuditEvent::miss("get", "build", DIGEST));
        assert!(!dir.path().join(AUDIT_FILE).exists());

        let sink = AuditMode::File.open_sink(dir.path()).unwrap();
        sink.record(&AuditEvent::delete("invalidate", "build", None));
        sink.close().unwrap();
        let contents = std::fs::read_to_string(dir.path().join(AUDIT_FILE)).unwrap();
        assert!(contents.contains("DELETE invalidate task=build"));
    }
}
