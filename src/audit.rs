//! Append-only audit trail of record mutations.
//!
//! Each successful create/update/delete emits one JSON line.  Lines go to an
//! optional size-rotated file and, when enabled, to the tracing output.  A
//! failed write is counted and logged; it never fails the request.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::RotationConfig;
use crate::models::DocumentKind;

/// Size-based rotating writer keeping `keep` numbered backups
/// (`<path>.1` newest), optionally gzip-compressing the newest backup.
pub struct RotatingWriter {
    path: PathBuf,
    file: fs::File,
    max_bytes: Option<u64>,
    keep: usize,
    compress: bool,
}

impl RotatingWriter {
    pub fn open(path: &str, rotation: &RotationConfig) -> std::io::Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            path: PathBuf::from(path),
            file,
            max_bytes: rotation.max_bytes,
            keep: rotation.keep,
            compress: rotation.compress,
        })
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        if let Some(limit) = self.max_bytes {
            if self.current_size().map(|len| len >= limit).unwrap_or(false) {
                self.rotate_backups();
                self.compress_latest_backup();
                self.reopen_current()?;
            }
        }
        writeln!(self.file, "{}", line)
    }

    fn current_size(&self) -> Option<u64> {
        self.path.metadata().ok().map(|m| m.len())
    }

    fn backup_path(&self, idx: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", idx));
        PathBuf::from(name)
    }

    fn rotate_backups(&self) {
        if self.keep == 0 {
            return;
        }
        for idx in (1..=self.keep).rev() {
            let old = if idx == 1 {
                self.path.clone()
            } else {
                self.backup_path(idx - 1)
            };
            if old.exists() {
                let _ = fs::rename(&old, self.backup_path(idx));
            }
        }
    }

    fn compress_latest_backup(&self) {
        if !self.compress || self.keep == 0 {
            return;
        }
        let rotated = self.backup_path(1);
        if let Ok(data) = fs::read(&rotated) {
            let mut gz = GzEncoder::new(Vec::new(), Compression::default());
            if gz.write_all(&data).is_ok() {
                if let Ok(buf) = gz.finish() {
                    let mut gz_name = rotated.as_os_str().to_owned();
                    gz_name.push(".gz");
                    if fs::write(PathBuf::from(gz_name), buf).is_ok() {
                        let _ = fs::remove_file(&rotated);
                    }
                }
            }
        }
    }

    fn reopen_current(&mut self) -> std::io::Result<()> {
        self.file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    CreateChat,
}

impl AuditAction {
    fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::CreateChat => "create_chat",
        }
    }
}

pub struct AuditEvent<'a> {
    pub action: AuditAction,
    pub kind: DocumentKind,
    pub id: &'a str,
    /// Hashed id of the acting user.
    pub actor: &'a str,
    pub admin: bool,
}

#[derive(Clone, Default)]
pub struct AuditSink {
    writer: Option<Arc<Mutex<RotatingWriter>>>,
    log_stdout: bool,
    lines_total: Arc<AtomicU64>,
    write_errors_total: Arc<AtomicU64>,
}

impl AuditSink {
    pub fn new(writer: Option<RotatingWriter>, log_stdout: bool) -> Self {
        Self {
            writer: writer.map(|w| Arc::new(Mutex::new(w))),
            log_stdout,
            lines_total: Arc::new(AtomicU64::new(0)),
            write_errors_total: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record(&self, event: &AuditEvent<'_>) {
        let line = serde_json::json!({
            "schemaVersion": 1,
            "ts": chrono::Utc::now().to_rfc3339(),
            "action": event.action.as_str(),
            "kind": event.kind.as_str(),
            "id": event.id,
            "actor": event.actor,
            "admin": event.admin,
        })
        .to_string();

        if let Some(writer) = &self.writer {
            match writer.lock() {
                Ok(mut guard) => match guard.write_line(&line) {
                    Ok(()) => {
                        self.lines_total.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to write audit line");
                        self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                    }
                },
                Err(_) => {
                    tracing::warn!("audit writer lock poisoned");
                    self.write_errors_total.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        if self.log_stdout {
            tracing::info!(
                target: "audit",
                action = event.action.as_str(),
                kind = event.kind.as_str(),
                id = %event.id,
                actor = %event.actor,
                admin = event.admin
            );
        }
    }

    pub fn lines_total(&self) -> u64 {
        self.lines_total.load(Ordering::Relaxed)
    }

    pub fn write_errors_total(&self) -> u64 {
        self.write_errors_total.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str) -> AuditEvent<'_> {
        AuditEvent {
            action: AuditAction::Delete,
            kind: DocumentKind::Extension,
            id,
            actor: "abc",
            admin: false,
        }
    }

    #[test]
    fn writes_one_json_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let writer = RotatingWriter::open(
            path.to_str().unwrap(),
            &RotationConfig {
                max_bytes: None,
                keep: 1,
                compress: false,
            },
        )
        .unwrap();
        let sink = AuditSink::new(Some(writer), false);
        sink.record(&event("e1"));
        sink.record(&event("e2"));

        let content = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["action"], "delete");
        assert_eq!(lines[0]["kind"], "EXTENSION");
        assert_eq!(lines[1]["id"], "e2");
        assert_eq!(sink.lines_total(), 2);
        assert_eq!(sink.write_errors_total(), 0);
    }

    #[test]
    fn rotates_and_compresses_when_limit_reached() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let writer = RotatingWriter::open(
            path.to_str().unwrap(),
            &RotationConfig {
                max_bytes: Some(64),
                keep: 2,
                compress: true,
            },
        )
        .unwrap();
        let sink = AuditSink::new(Some(writer), false);
        for i in 0..6 {
            sink.record(&event(&format!("record-{}", i)));
        }
        assert!(dir.path().join("audit.log.1.gz").exists());
        let current = fs::read_to_string(&path).unwrap();
        assert_eq!(current.lines().count(), 1);
    }

    #[test]
    fn sink_without_writer_is_a_no_op() {
        let sink = AuditSink::default();
        sink.record(&event("e1"));
        assert_eq!(sink.lines_total(), 0);
    }
}
