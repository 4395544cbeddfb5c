//! Append-only query audit log: an in-memory ring of the most recent
//! entries, mirrored to a line-delimited JSON file. File appends never
//! block the request path — a failure is recorded and retried by the
//! background flusher instead of propagating to the caller.

use std::collections::VecDeque;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use common::storage::types::audit_entry::AuditEntry;

/// Filter accepted by `search_queries`; every field is optional and ANDed
/// together.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub patient_id: Option<String>,
    pub success: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub min_confidence: Option<f32>,
}

impl AuditFilter {
    fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(patient_id) = &self.patient_id {
            if &entry.patient_id != patient_id {
                return false;
            }
        }
        if let Some(success) = self.success {
            if entry.success != success {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if entry.timestamp > to {
                return false;
            }
        }
        if let Some(min_confidence) = self.min_confidence {
            if entry.confidence_score < min_confidence {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

/// Aggregate counts surfaced by `statistics`.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AuditStatistics {
    pub total_queries: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub avg_confidence: f32,
    pub avg_time_ms: f64,
}

struct Ring {
    entries: VecDeque<AuditEntry>,
    capacity: usize,
}

impl Ring {
    fn push(&mut self, entry: AuditEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

/// Owns the in-memory ring and the append-only file. One instance per
/// running service.
pub struct AuditLogger {
    ring: Mutex<Ring>,
    log_path: PathBuf,
    pending_writes: Mutex<VecDeque<AuditEntry>>,
}

impl AuditLogger {
    /// Opens (creating if needed) `log_dir/audit.jsonl` and replays its
    /// contents into the in-memory ring, bounded to the last `capacity`
    /// lines in append order.
    pub async fn open(log_dir: &str, capacity: usize) -> Result<Self, common::error::AppError> {
        tokio::fs::create_dir_all(log_dir).await?;
        let log_path = PathBuf::from(log_dir).join("audit.jsonl");

        let replayed = replay_log(&log_path, capacity).await?;
        info!(count = replayed.len(), "replayed audit log from disk");

        Ok(Self {
            ring: Mutex::new(Ring {
                entries: replayed.into(),
                capacity,
            }),
            log_path,
            pending_writes: Mutex::new(VecDeque::new()),
        })
    }

    /// Records exactly one entry per query: pushes to the in-memory ring
    /// immediately, then attempts the file append. An append failure is
    /// queued for the next `flush_pending` call rather than returned.
    #[instrument(level = "info", skip(self, entry), fields(query_id = %entry.query_id))]
    pub async fn log_query(&self, entry: AuditEntry) {
        self.ring.lock().await.push(entry.clone());

        if let Err(err) = append_line(&self.log_path, &entry).await {
            warn!(error = %err, "audit file append failed, queued for retry");
            self.pending_writes.lock().await.push_back(entry);
        }
    }

    /// Retries every queued append; entries that still fail stay queued.
    pub async fn flush_pending(&self) {
        let mut pending = self.pending_writes.lock().await;
        let mut still_pending = VecDeque::new();
        while let Some(entry) = pending.pop_front() {
            if let Err(err) = append_line(&self.log_path, &entry).await {
                error!(error = %err, "audit file append retry failed");
                still_pending.push_back(entry);
            }
        }
        *pending = still_pending;
    }

    pub async fn query_history(&self, patient_id: &str, limit: usize) -> Vec<AuditEntry> {
        let ring = self.ring.lock().await;
        ring.entries
            .iter()
            .rev()
            .filter(|e| e.patient_id == patient_id)
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn search_queries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let ring = self.ring.lock().await;
        ring.entries
            .iter()
            .rev()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    pub async fn export(&self, format: ExportFormat, filter: &AuditFilter) -> Result<String, common::error::AppError> {
        let entries = self.search_queries(filter).await;
        match format {
            ExportFormat::Json => Ok(serde_json::to_string(&entries)?),
            ExportFormat::Csv => Ok(to_csv(&entries)),
        }
    }

    pub async fn statistics(&self) -> AuditStatistics {
        let ring = self.ring.lock().await;
        let total_queries = ring.entries.len();
        if total_queries == 0 {
            return AuditStatistics::default();
        }
        let success_count = ring.entries.iter().filter(|e| e.success).count();
        let sum_confidence: f32 = ring.entries.iter().map(|e| e.confidence_score).sum();
        let sum_time_ms: u64 = ring.entries.iter().map(|e| e.total_time_ms).sum();
        AuditStatistics {
            total_queries,
            success_count,
            failure_count: total_queries - success_count,
            #[allow(clippy::cast_precision_loss)]
            avg_confidence: sum_confidence / total_queries as f32,
            #[allow(clippy::cast_precision_loss)]
            avg_time_ms: sum_time_ms as f64 / total_queries as f64,
        }
    }

    /// Daily retention sweep: drops entries older than `retention_days`,
    /// anonymizes (in place) entries older than `anonymize_after_days` but
    /// still within the retention window. Returns `(deleted, anonymized)`.
    #[instrument(level = "info", skip(self))]
    pub async fn enforce_retention(&self, retention_days: i64, anonymize_after_days: i64) -> (usize, usize) {
        let now = Utc::now();
        let retention_cutoff = now - Duration::days(retention_days);
        let anonymize_cutoff = now - Duration::days(anonymize_after_days);

        let mut ring = self.ring.lock().await;
        let before = ring.entries.len();
        ring.entries.retain(|e| e.timestamp >= retention_cutoff);
        let deleted = before - ring.entries.len();

        let mut anonymized = 0;
        for entry in ring.entries.iter_mut() {
            if entry.timestamp < anonymize_cutoff && entry.query_text != "[redacted]" {
                *entry = entry.anonymized();
                anonymized += 1;
            }
        }
        if deleted > 0 || anonymized > 0 {
            info!(deleted, anonymized, "applied audit retention policy");
        }
        (deleted, anonymized)
    }
}

async fn append_line(path: &PathBuf, entry: &AuditEntry) -> Result<(), common::error::AppError> {
    let mut file: File = OpenOptions::new().create(true).append(true).open(path).await?;
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    Ok(())
}

async fn replay_log(path: &PathBuf, capacity: usize) -> Result<VecDeque<AuditEntry>, common::error::AppError> {
    if !path.exists() {
        return Ok(VecDeque::new());
    }
    let contents = tokio::fs::read_to_string(path).await?;
    let mut replayed: VecDeque<AuditEntry> = contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    while replayed.len() > capacity {
        replayed.pop_front();
    }
    Ok(replayed)
}

fn to_csv(entries: &[AuditEntry]) -> String {
    let mut out = String::from("query_id,timestamp,patient_id,confidence_score,total_time_ms,success\n");
    for entry in entries {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            entry.query_id, entry.timestamp, entry.patient_id, entry.confidence_score, entry.total_time_ms, entry.success
        ));
    }
    out
}
