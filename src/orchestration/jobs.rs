//! Persistent job records, one JSON file per delegation.
//!
//! Records are rewritten wholesale on each status change and read back
//! leniently on listing (a corrupt record is skipped, not fatal) so a crash
//! mid-write cannot wedge the registry rehydration path.

use std::path::{Path, PathBuf};

use super::types::{JobRecord, JobStatus};
use crate::error::PersistenceError;

pub struct JobStore {
    dir: PathBuf,
    result_truncate_chars: usize,
}

impl JobStore {
    pub fn new(state_dir: &Path, result_truncate_chars: usize) -> Self {
        Self {
            dir: state_dir.join("jobs"),
            result_truncate_chars,
        }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Persist a record, truncating its result text to the configured
    /// ceiling first.
    pub fn save(&self, record: &JobRecord) -> Result<(), PersistenceError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| PersistenceError::Io {
            path: self.dir.clone(),
            source: e,
        })?;

        let mut record = record.clone();
        if let Some(result) = &record.result {
            if result.chars().count() > self.result_truncate_chars {
                record.result = Some(truncate_chars(result, self.result_truncate_chars));
            }
        }

        let json = serde_json::to_string_pretty(&record).map_err(|e| {
            PersistenceError::Encode {
                what: format!("job {}", record.id),
                message: e.to_string(),
            }
        })?;

        let path = self.path_for(&record.id);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes())
            .and_then(|()| std::fs::rename(&tmp, &path))
            .map_err(|e| PersistenceError::Io { path, source: e })
    }

    pub fn get(&self, id: &str) -> Result<JobRecord, PersistenceError> {
        let path = self.path_for(id);
        let raw = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PersistenceError::NotFound(format!("job {id}"))
            } else {
                PersistenceError::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;
        serde_json::from_str(&raw).map_err(|e| PersistenceError::Decode {
            path,
            message: e.to_string(),
        })
    }

    /// All readable records, unordered. Corrupt files are skipped with a
    /// debug log.
    pub fn list(&self) -> Vec<JobRecord> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        entries
            .filter_map(Result::ok)
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|e| {
                let raw = std::fs::read_to_string(e.path()).ok()?;
                match serde_json::from_str::<JobRecord>(&raw) {
                    Ok(record) => Some(record),
                    Err(err) => {
                        tracing::debug!(path = %e.path().display(), error = %err, "Skipping unreadable job record");
                        None
                    }
                }
            })
            .collect()
    }

    /// Find the newest record for a session handle.
    pub fn find_by_handle(&self, handle: &str) -> Option<JobRecord> {
        self.list()
            .into_iter()
            .filter(|r| r.handle == handle)
            .max_by(|a, b| a.created_at.cmp(&b.created_at))
    }

    /// Read-modify-write a single record's status and (optionally) result.
    pub fn mark(
        &self,
        id: &str,
        status: JobStatus,
        result: Option<String>,
    ) -> Result<JobRecord, PersistenceError> {
        let mut record = self.get(id)?;
        record.status = status;
        if result.is_some() {
            record.result = result;
        }
        record.updated_at = chrono::Utc::now().to_rfc3339();
        self.save(&record)?;
        Ok(record)
    }
}

/// Truncate to `max` characters on a char boundary, appending a marker.
fn truncate_chars(s: &str, max: usize) -> String {
    let mut truncated: String = s.chars().take(max).collect();
    truncated.push_str("\n[truncated]");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, handle: &str) -> JobRecord {
        JobRecord {
            id: id.to_string(),
            status: JobStatus::Running,
            role: "builder".to_string(),
            task_summary: "implement login".to_string(),
            handle: handle.to_string(),
            depth: 1,
            created_at: chrono::Utc::now().to_rfc3339(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            result: None,
        }
    }

    #[test]
    fn save_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path(), 1000);

        store.save(&record("j1", "s1")).unwrap();
        let loaded = store.get("j1").unwrap();
        assert_eq!(loaded.id, "j1");
        assert_eq!(loaded.status, JobStatus::Running);
        assert_eq!(loaded.handle, "s1");
    }

    #[test]
    fn get_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path(), 1000);
        assert!(matches!(
            store.get("nope"),
            Err(PersistenceError::NotFound(_))
        ));
    }

    #[test]
    fn mark_updates_status_and_result() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path(), 1000);
        store.save(&record("j1", "s1")).unwrap();

        let updated = store
            .mark("j1", JobStatus::Completed, Some("all done".to_string()))
            .unwrap();
        assert_eq!(updated.status, JobStatus::Completed);
        assert_eq!(updated.result.as_deref(), Some("all done"));

        // Marking without a result keeps the previous result text.
        let updated = store.mark("j1", JobStatus::Aborted, None).unwrap();
        assert_eq!(updated.result.as_deref(), Some("all done"));
    }

    #[test]
    fn result_text_is_truncated_on_save() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path(), 10);

        let mut r = record("j1", "s1");
        r.result = Some("x".repeat(50));
        store.save(&r).unwrap();

        let loaded = store.get("j1").unwrap();
        let result = loaded.result.unwrap();
        assert!(result.starts_with(&"x".repeat(10)));
        assert!(result.ends_with("[truncated]"));
        assert!(result.chars().count() < 30);
    }

    #[test]
    fn list_skips_corrupt_records() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path(), 1000);
        store.save(&record("j1", "s1")).unwrap();
        store.save(&record("j2", "s2")).unwrap();
        std::fs::write(dir.path().join("jobs/broken.json"), "{not json").unwrap();

        let listed = store.list();
        assert_eq!(listed.len(), 2);
    }

    #[test]
    fn find_by_handle_returns_newest() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::new(dir.path(), 1000);

        let mut older = record("j1", "shared");
        older.created_at = "2026-01-01T00:00:00Z".to_string();
        let mut newer = record("j2", "shared");
        newer.created_at = "2026-02-01T00:00:00Z".to_string();
        store.save(&older).unwrap();
        store.save(&newer).unwrap();

        assert_eq!(store.find_by_handle("shared").unwrap().id, "j2");
        assert!(store.find_by_handle("missing").is_none());
    }
}
