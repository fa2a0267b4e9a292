//! Session registry: handle -> pending-completion waiter map.
//!
//! The registry is the rendezvous between the liveness-event consumer and
//! sync-mode delegations. It wraps a `HashMap` behind `Arc<Mutex<..>>` for
//! thread-safe access; critical sections are short and never await.
//!
//! Ordering contract: callers register a handle *before* dispatching the
//! prompt. A completion event that lands between registration and the
//! waiter being awaited is latched by the oneshot channel, so zero-time
//! races lose nothing. `resolve` is idempotent and fire-and-forget -- the
//! event consumer is never blocked by a missing or already-resolved entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use super::types::{JobRecord, JobStatus};
use crate::host::SessionHandle;

struct Entry {
    role: String,
    depth: usize,
    /// Taken by the first `resolve` call.
    tx: Option<oneshot::Sender<()>>,
    /// Taken by the first `wait_for_completion` call.
    rx: Option<oneshot::Receiver<()>>,
    resolved: bool,
}

/// Concurrency-safe registry of in-flight sessions.
///
/// Constructor-injected into the orchestrator (no module-level globals) so
/// tests can run isolated registries side by side.
#[derive(Clone)]
pub struct SessionRegistry {
    entries: Arc<Mutex<HashMap<SessionHandle, Entry>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a session before its prompt is dispatched.
    ///
    /// Re-registering a known handle is a no-op (continued sessions keep
    /// their original role/depth association).
    pub fn register(&self, handle: &str, role: &str, depth: usize) {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(handle.to_string()).or_insert_with(|| {
            let (tx, rx) = oneshot::channel();
            Entry {
                role: role.to_string(),
                depth,
                tx: Some(tx),
                rx: Some(rx),
                resolved: false,
            }
        });
    }

    /// Resolve a handle's waiter. No-op if the handle is unregistered or
    /// already resolved. Never blocks.
    pub fn resolve(&self, handle: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(handle) {
            entry.resolved = true;
            if let Some(tx) = entry.tx.take() {
                // Send failure means the receiver was dropped; nothing to do.
                let _ = tx.send(());
            }
        }
    }

    /// Wait until the handle is resolved by a liveness event.
    ///
    /// Returns `true` once resolved -- including when resolution happened
    /// before this call. Returns `false` if the handle is unknown or its
    /// waiter was already consumed by another call.
    pub async fn wait_for_completion(&self, handle: &str) -> bool {
        let rx = {
            let mut entries = self.entries.lock().unwrap();
            match entries.get_mut(handle) {
                Some(entry) => {
                    if entry.resolved && entry.rx.is_none() {
                        return true;
                    }
                    entry.rx.take()
                }
                None => return false,
            }
        };

        match rx {
            // A send that happened before this await is buffered in the
            // channel, so an already-resolved entry completes immediately.
            Some(rx) => rx.await.is_ok(),
            None => false,
        }
    }

    /// Remove a handle's entry entirely.
    pub fn unregister(&self, handle: &str) {
        self.entries.lock().unwrap().remove(handle);
    }

    pub fn role_of(&self, handle: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        entries.get(handle).map(|e| e.role.clone())
    }

    pub fn depth_of(&self, handle: &str) -> Option<usize> {
        let entries = self.entries.lock().unwrap();
        entries.get(handle).map(|e| e.depth)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Rebuild handle -> role/depth associations from persisted job records
    /// on process start, so in-flight jobs are not silently forgotten.
    /// Only `running` jobs are rehydrated; no waiters are armed.
    pub fn hydrate_from_jobs(&self, jobs: &[JobRecord]) {
        for job in jobs {
            if job.status == JobStatus::Running && !job.handle.is_empty() {
                self.register(&job.handle, &job.role, job.depth);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(handle: &str, status: JobStatus) -> JobRecord {
        JobRecord {
            id: format!("job-{handle}"),
            status,
            role: "builder".to_string(),
            task_summary: "task".to_string(),
            handle: handle.to_string(),
            depth: 2,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            updated_at: "2026-01-01T00:00:00Z".to_string(),
            result: None,
        }
    }

    #[tokio::test]
    async fn wait_then_resolve_completes() {
        let registry = SessionRegistry::new();
        registry.register("s1", "builder", 1);

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.wait_for_completion("s1").await })
        };
        registry.resolve("s1");

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn resolve_before_wait_is_not_lost() {
        let registry = SessionRegistry::new();
        registry.register("s1", "builder", 1);

        // Simulate an instant completion racing registration by zero time.
        registry.resolve("s1");

        assert!(registry.wait_for_completion("s1").await);
    }

    #[tokio::test]
    async fn second_wait_after_resolution_still_reports_resolved() {
        let registry = SessionRegistry::new();
        registry.register("s1", "builder", 1);
        registry.resolve("s1");

        assert!(registry.wait_for_completion("s1").await);
        assert!(registry.wait_for_completion("s1").await);
    }

    #[tokio::test]
    async fn wait_on_unknown_handle_returns_false() {
        let registry = SessionRegistry::new();
        assert!(!registry.wait_for_completion("ghost").await);
    }

    #[test]
    fn resolve_unknown_handle_is_noop() {
        let registry = SessionRegistry::new();
        registry.resolve("ghost");
        assert!(registry.is_empty());
    }

    #[test]
    fn resolve_twice_is_idempotent() {
        let registry = SessionRegistry::new();
        registry.register("s1", "builder", 1);
        registry.resolve("s1");
        registry.resolve("s1");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_is_idempotent_for_known_handles() {
        let registry = SessionRegistry::new();
        registry.register("s1", "builder", 1);
        registry.register("s1", "checker", 9);

        assert_eq!(registry.role_of("s1").as_deref(), Some("builder"));
        assert_eq!(registry.depth_of("s1"), Some(1));
    }

    #[test]
    fn unregister_removes_associations() {
        let registry = SessionRegistry::new();
        registry.register("s1", "builder", 1);
        registry.unregister("s1");
        assert_eq!(registry.role_of("s1"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn hydrate_restores_running_jobs_only() {
        let registry = SessionRegistry::new();
        registry.hydrate_from_jobs(&[
            record("s1", JobStatus::Running),
            record("s2", JobStatus::Completed),
            record("s3", JobStatus::Aborted),
        ]);

        assert_eq!(registry.role_of("s1").as_deref(), Some("builder"));
        assert_eq!(registry.depth_of("s1"), Some(2));
        assert_eq!(registry.role_of("s2"), None);
        assert_eq!(registry.role_of("s3"), None);
    }
}
