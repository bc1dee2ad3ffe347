//! Result persistence (spec.md §4.2.3): immediate (semaphore-limited
//! direct writes with overflow/emergency fallback) and buffered
//! (flush-on-threshold) modes. Disk-backed fallback file handling
//! mirrors the teacher's JSONL append-store pattern, adapted to
//! one-file-per-record (spec.md §6 "Persisted artifacts").

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::contracts::{FormError, FormResult};
use crate::error_classifier::classify_detail;
use crate::models::{SubmissionRecord, TaskEnvelope};
use crate::repository::Repository;

pub const DEFAULT_MAX_PARALLEL_DB_WRITES: usize = 5;
pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_BUFFER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    Immediate,
    Buffered,
}

fn overflow_dir() -> PathBuf {
    std::env::temp_dir().join("form_sender_overflow")
}

fn emergency_dir() -> PathBuf {
    std::env::temp_dir().join("form_sender_emergency")
}

fn ensure_parent_dir(path: &Path) -> FormResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(FormError::from)?;
    }
    Ok(())
}

/// Appends a submission record to a disk-backed fallback file; callers
/// choose overflow vs emergency (spec.md §9: "the distinction should
/// be preserved — overflow = expected back-pressure; emergency =
/// everything-else-failed").
fn write_fallback_file(dir: PathBuf, record_id: i64, record: &SubmissionRecord) -> FormResult<PathBuf> {
    let epoch = chrono::Utc::now().timestamp();
    let prefix = if dir.ends_with("form_sender_emergency") { "emergency" } else { "overflow" };
    let path = dir.join(format!("{prefix}_{record_id}_{epoch}.json"));
    ensure_parent_dir(&path)?;
    let body = serde_json::to_vec_pretty(record).map_err(FormError::from)?;
    std::fs::write(&path, body).map_err(FormError::from)?;
    Ok(path)
}

pub fn write_overflow(record_id: i64, record: &SubmissionRecord) -> FormResult<PathBuf> {
    write_fallback_file(overflow_dir(), record_id, record)
}

pub fn write_emergency(record_id: i64, record: &SubmissionRecord) -> FormResult<PathBuf> {
    write_fallback_file(emergency_dir(), record_id, record)
}

/// Replays every fallback file in `dir` into the repository, deleting
/// each on success (spec.md §4.2.4 "Overflow files are replayed to the
/// database on any idle period").
pub async fn replay_fallback_dir(dir: &Path, repo: &dyn Repository) -> FormResult<usize> {
    let mut replayed = 0;
    let Ok(entries) = std::fs::read_dir(dir) else { return Ok(0) };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(bytes) = std::fs::read(&path) else { continue };
        let Ok(record) = serde_json::from_slice::<SubmissionRecord>(&bytes) else { continue };
        if repo.insert_submission(record).await.is_ok() {
            let _ = std::fs::remove_file(&path);
            replayed += 1;
        }
    }
    Ok(replayed)
}

/// Garbage-collects fallback files older than 24h (spec.md §5 "files
/// older than 24 h are garbage-collected").
pub fn garbage_collect_stale(dir: &Path, max_age: std::time::Duration) -> usize {
    let mut removed = 0;
    let Ok(entries) = std::fs::read_dir(dir) else { return 0 };
    for entry in entries.flatten() {
        let path = entry.path();
        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                if modified.elapsed().map(|age| age > max_age).unwrap_or(false) {
                    if std::fs::remove_file(&path).is_ok() {
                        removed += 1;
                    }
                }
            }
        }
    }
    removed
}

/// Attaches `classify_detail` and writes a submission row directly,
/// falling back to overflow then emergency then raising (spec.md
/// §4.2.3). `MAX_PARALLEL_DB_WRITES` is enforced by `write_semaphore`.
pub async fn persist_immediate(
    repo: &dyn Repository,
    write_semaphore: &Semaphore,
    targeting_id: i64,
    company_id: i64,
    success: bool,
    error_message: Option<&str>,
    http_status: Option<u16>,
) -> FormResult<()> {
    let _permit = write_semaphore
        .acquire()
        .await
        .map_err(|e| FormError::internal(format!("write semaphore closed: {e}")))?;

    let record = if success {
        SubmissionRecord::success(targeting_id, company_id)
    } else {
        let detail = classify_detail(error_message.unwrap_or(""), http_status, None, None);
        SubmissionRecord::failure(
            targeting_id,
            company_id,
            detail.code.clone().unwrap_or_else(|| "SYSTEM".to_string()),
            detail,
        )
    };

    if repo.insert_submission(record.clone()).await.is_ok() {
        return Ok(());
    }
    if write_overflow(company_id, &record).is_ok() {
        return Ok(());
    }
    if write_emergency(company_id, &record).is_ok() {
        return Ok(());
    }
    Err(FormError::internal(format!(
        "failed to persist submission for company {company_id}: db, overflow and emergency paths all failed"
    )))
}

/// The in-memory buffer for buffered-mode persistence (spec.md
/// §4.2.3). Guarded by a single mutex per spec.md §5's `buffer_lock`.
#[derive(Default)]
pub struct ResultBuffer {
    items: Mutex<Vec<SubmissionRecord>>,
    last_flush: Mutex<std::time::Instant>,
}

impl ResultBuffer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            items: Mutex::new(Vec::new()),
            last_flush: Mutex::new(std::time::Instant::now()),
        })
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn push(&self, record: SubmissionRecord) {
        self.items.lock().push(record);
    }

    pub fn should_flush(&self, batch_size: usize, buffer_timeout: std::time::Duration) -> bool {
        self.len() >= batch_size || self.last_flush.lock().elapsed() >= buffer_timeout
    }

    pub async fn flush(&self, repo: &dyn Repository, fraction: Option<f64>, max_items: Option<usize>) -> FormResult<usize> {
        let drained: Vec<SubmissionRecord> = {
            let mut items = self.items.lock();
            let take_count = match (fraction, max_items) {
                (Some(f), Some(cap)) => ((items.len() as f64 * f).ceil() as usize).min(cap).min(items.len()),
                _ => items.len(),
            };
            items.drain(0..take_count).collect()
        };
        let mut flushed = 0;
        for record in drained {
            if repo.insert_submission(record.clone()).await.is_ok() {
                flushed += 1;
            } else {
                self.push(record);
            }
        }
        *self.last_flush.lock() = std::time::Instant::now();
        Ok(flushed)
    }
}

/// Never writes the legacy `instruction_valid` flag (spec.md §4.2.3,
/// §9 Open Question); updates `bot_protection_detected` when a result
/// envelope says so.
pub async fn apply_company_flag_updates(
    repo: &dyn Repository,
    record_id: i64,
    bot_protection_detected: bool,
) -> FormResult<()> {
    if bot_protection_detected {
        repo.update_company_flags(record_id, None, Some(true)).await?;
    }
    Ok(())
}

pub fn noop_task_ref(_task: &TaskEnvelope) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::mock::MockRepository;

    #[test]
    fn overflow_and_emergency_write_to_distinct_directories() {
        let record = SubmissionRecord::success(1, 100);
        let overflow_path = write_overflow(100, &record).unwrap();
        let emergency_path = write_emergency(100, &record).unwrap();
        assert!(overflow_path.to_string_lossy().contains("form_sender_overflow"));
        assert!(emergency_path.to_string_lossy().contains("form_sender_emergency"));
        let _ = std::fs::remove_file(overflow_path);
        let _ = std::fs::remove_file(emergency_path);
    }

    #[tokio::test]
    async fn buffer_flush_respects_fraction_and_cap() {
        let buffer = ResultBuffer::new();
        for i in 0..10 {
            buffer.push(SubmissionRecord::success(1, i));
        }
        let repo = MockRepository::new(vec![]);
        let flushed = buffer.flush(&repo, Some(0.3), Some(50)).await.unwrap();
        assert_eq!(flushed, 3);
        assert_eq!(buffer.len(), 7);
    }
}
