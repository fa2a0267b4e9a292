//! The delegation orchestrator.
//!
//! `delegate` runs the full spawn procedure: guard checks, session
//! creation, registry registration *before* prompt dispatch (dispatching
//! first would open a window where an instant completion has no waiter to
//! land on), team-directory bookkeeping, and either an immediate job-id
//! return (async mode) or a wait race (sync mode).
//!
//! The sync wait races three futures: the registry waiter resolved by an
//! external liveness event, a fixed-interval polling fallback, and the
//! caller's cancellation token. Event delivery from the host is not
//! reliable under all conditions, so neither push nor pull alone is
//! trusted. An idle report is then run through a completion-confirmation
//! pass before the transcript is harvested.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::jobs::JobStore;
use super::registry::SessionRegistry;
use super::roles::RoleRegistry;
use super::types::{
    CallerContext, DelegateOutcome, DelegateRequest, JobRecord, JobStatus, RoleKind,
};
use crate::config::AppConfig;
use crate::error::DelegationError;
use crate::host::{HostPlatform, Liveness, SessionHandle, Transcript};
use crate::ledger::{doc_kind_from_path, DocKind, LedgerStore, Phase, TransitionSource};
use crate::team::{TeamStore, TeammateStatus};

/// Delegation tuning extracted from the app config.
#[derive(Clone, Debug)]
pub struct DelegationTuning {
    pub max_depth: usize,
    pub sync_wait: Duration,
    pub poll_interval: Duration,
    /// Re-check delays for the false-idle confirmation pass.
    pub idle_recheck_delays: Vec<Duration>,
    pub default_model: Option<String>,
}

impl DelegationTuning {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            sync_wait: Duration::from_secs(config.sync_wait_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            idle_recheck_delays: config
                .idle_recheck_delays_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            default_model: if config.model.is_empty() {
                None
            } else {
                Some(config.model.clone())
            },
        }
    }
}

enum WaitResult {
    /// Liveness was observed and confirmed; the transcript (possibly a
    /// fragment) is ready to harvest.
    Settled(Option<Transcript>),
    TimedOut,
    Cancelled,
}

pub struct Orchestrator {
    host: Arc<dyn HostPlatform>,
    registry: SessionRegistry,
    roles: RoleRegistry,
    jobs: JobStore,
    team: TeamStore,
    ledger: LedgerStore,
    tuning: DelegationTuning,
}

impl Orchestrator {
    /// Build an orchestrator over a host platform. The registry is injected
    /// rather than global so isolated instances can coexist (tests, tools).
    pub fn new(
        config: &AppConfig,
        host: Arc<dyn HostPlatform>,
        roles: RoleRegistry,
        registry: SessionRegistry,
    ) -> Self {
        let state_dir = config.state_dir();
        Self {
            host,
            registry,
            roles,
            jobs: JobStore::new(&state_dir, config.result_truncate_chars),
            team: TeamStore::new(&state_dir),
            ledger: LedgerStore::new(&state_dir, config.history_cap, config.max_features),
            tuning: DelegationTuning::from_app(config),
        }
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn team(&self) -> &TeamStore {
        &self.team
    }

    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Rebuild registry associations from persisted job records. Call once
    /// on process start so in-flight jobs are not orphaned.
    pub fn hydrate(&self) {
        let jobs = self.jobs.list();
        self.registry.hydrate_from_jobs(&jobs);
    }

    /// Entry point for the external liveness-event consumer. Fire and
    /// forget: resolves whatever waiter is registered, never blocks.
    pub fn notify_session_event(&self, handle: &str) {
        self.registry.resolve(handle);
    }

    /// Delegate a task to a role.
    ///
    /// See the module docs for the spawn procedure. `cancel` aborts a sync
    /// wait; partial results are still captured before cleanup.
    pub async fn delegate(
        &self,
        req: DelegateRequest,
        caller: CallerContext,
        cancel: CancellationToken,
    ) -> Result<DelegateOutcome, DelegationError> {
        // 1. Abort target first: standalone or combined with a fresh
        //    delegation.
        if let Some(abort_handle) = req.abort_session.clone() {
            let (job_id, partial) = self.abort_session(&abort_handle).await;
            if req.role.is_none() && req.task.is_none() {
                return Ok(DelegateOutcome::Aborted {
                    handle: abort_handle,
                    job_id,
                    partial,
                });
            }
        }

        // 2. Resolve the target role, recovering it from the prior session
        //    when continuing.
        let role_name = match &req.role {
            Some(role) => role.clone(),
            None => {
                let recovered = req.continue_session.as_deref().and_then(|handle| {
                    self.registry
                        .role_of(handle)
                        .or_else(|| self.jobs.find_by_handle(handle).map(|j| j.role))
                });
                recovered.ok_or(DelegationError::EmptyRequest)?
            }
        };

        let spec = self
            .roles
            .get(&role_name)
            .ok_or_else(|| DelegationError::RoleNotFound {
                role: role_name.clone(),
            })?
            .clone();

        // 3. Self-delegation guards, before any session exists.
        if let Some(caller_role) = &caller.role {
            if caller_role == &role_name {
                return Err(DelegationError::SelfDelegation { role: role_name });
            }
            if let Some(caller_spec) = self.roles.get(caller_role) {
                if caller_spec.kind == RoleKind::Orchestrator && spec.kind == RoleKind::Orchestrator
                {
                    return Err(DelegationError::OrchestratorChain {
                        from: caller_role.clone(),
                        to: role_name,
                    });
                }
            }
        }

        // 4. Depth guard: depth is threaded through the registry, not the
        //    call stack.
        let caller_depth = caller
            .session
            .as_deref()
            .and_then(|handle| self.registry.depth_of(handle))
            .unwrap_or(0);
        if caller_depth >= self.tuning.max_depth {
            return Err(DelegationError::DepthExceeded {
                depth: caller_depth,
                max: self.tuning.max_depth,
            });
        }
        let depth = caller_depth + 1;

        let task = req.task.clone().unwrap_or_default();
        if task.trim().is_empty() {
            return Err(DelegationError::EmptyRequest);
        }

        // 5. Session: reuse on continue, create otherwise.
        let handle: SessionHandle = match &req.continue_session {
            Some(handle) => handle.clone(),
            None => self
                .host
                .create_session(caller.session.as_deref(), &summarize(&task))
                .await
                .map_err(|e| DelegationError::SessionCreateFailed(e.to_string()))?,
        };

        // 6. Register before dispatch.
        self.registry.register(&handle, &role_name, depth);

        // 7. Teammate enters `spawning`; job record is persisted up front so
        //    a crash mid-dispatch leaves a resumable trail.
        let job_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now().to_rfc3339();
        let record = JobRecord {
            id: job_id.clone(),
            status: JobStatus::Running,
            role: role_name.clone(),
            task_summary: summarize(&task),
            handle: handle.clone(),
            depth,
            created_at: now.clone(),
            updated_at: now,
            result: None,
        };
        self.jobs.save(&record)?;

        let mut team = self.team.load();
        let teammate = team.respawn(&role_name, &role_name);
        teammate.task = Some(task.clone());
        teammate.job_id = Some(job_id.clone());
        teammate.session = Some(handle.clone());
        if let Err(e) = self.team.save(&team) {
            tracing::debug!(error = %e, "Team directory write failed");
        }

        // 8. Dispatch. Failure rolls back everything this call created.
        let model = req
            .model
            .clone()
            .or(spec.model.clone())
            .or(self.tuning.default_model.clone());
        if let Err(e) = self
            .host
            .dispatch_prompt(&handle, &role_name, &task, model.as_deref())
            .await
        {
            self.registry.unregister(&handle);
            let mut team = self.team.load();
            team.set_status(&role_name, TeammateStatus::Failed);
            if let Err(save_err) = self.team.save(&team) {
                tracing::debug!(error = %save_err, "Team directory write failed");
            }
            if let Err(mark_err) =
                self.jobs
                    .mark(&job_id, JobStatus::Failed, Some(format!("dispatch failed: {e}")))
            {
                tracing::debug!(error = %mark_err, "Job record write failed");
            }
            return Err(DelegationError::DispatchFailed {
                handle,
                message: e.to_string(),
            });
        }

        // Dispatch acked: the teammate is now working. Even instantaneous
        // completions pass through this state.
        let mut team = self.team.load();
        team.set_status(&role_name, TeammateStatus::Working);
        if let Err(e) = self.team.save(&team) {
            tracing::debug!(error = %e, "Team directory write failed");
        }

        tracing::info!(role = %role_name, handle = %handle, job = %job_id, depth, background = req.background, "Delegated");

        // 9. Async mode returns immediately.
        if req.background {
            return Ok(DelegateOutcome::Background {
                handle,
                job_id,
                timed_out: false,
            });
        }

        // 10. Sync mode: race the waiter, the poll fallback, and the
        //     caller's cancellation.
        match self.wait_for_result(&handle, &cancel).await {
            WaitResult::Settled(transcript) => {
                let text = transcript
                    .as_ref()
                    .and_then(|t| t.last_assistant_text())
                    .unwrap_or_default()
                    .to_string();
                self.finish(&job_id, &role_name, &handle, JobStatus::Completed, Some(text.clone()));
                Ok(DelegateOutcome::Completed {
                    handle,
                    job_id,
                    result: text,
                })
            }
            WaitResult::TimedOut => {
                // No work is lost: the job record stays `running` and the
                // session keeps going; the caller polls the job id instead.
                tracing::warn!(job = %job_id, handle = %handle, "Sync wait ceiling reached, degrading to background job");
                Ok(DelegateOutcome::Background {
                    handle,
                    job_id,
                    timed_out: true,
                })
            }
            WaitResult::Cancelled => {
                let partial = self.capture_partial(&handle).await;
                if let Err(e) = self.host.abort(&handle).await {
                    tracing::debug!(handle = %handle, error = %e, "Abort after cancellation failed");
                }
                self.finish(&job_id, &role_name, &handle, JobStatus::Aborted, partial.clone());
                Ok(DelegateOutcome::Aborted {
                    handle,
                    job_id: Some(job_id),
                    partial,
                })
            }
        }
    }

    /// Look up a job by id, harvesting it first if its session has gone
    /// idle since the last check.
    pub async fn job_status(&self, id: &str) -> Result<JobRecord, DelegationError> {
        let record = self.jobs.get(id)?;
        if record.status != JobStatus::Running {
            return Ok(record);
        }

        match self.host.poll_liveness(&[record.handle.clone()]).await {
            Ok(liveness) if liveness.get(&record.handle).copied() == Some(Liveness::Idle) => {
                let transcript = self.confirm_completion(&record.handle).await;
                let text = transcript
                    .as_ref()
                    .and_then(|t| t.last_assistant_text())
                    .unwrap_or_default()
                    .to_string();
                self.finish(id, &record.role, &record.handle, JobStatus::Completed, Some(text));
                Ok(self.jobs.get(id)?)
            }
            Ok(_) => Ok(record),
            Err(e) => {
                tracing::debug!(job = %id, error = %e, "Liveness check failed, reporting last known status");
                Ok(record)
            }
        }
    }

    /// Explicit phase-update operation for external document-writing logic.
    /// This is the primary phase signal; file-write detection is the backup.
    pub fn record_phase(
        &self,
        feature: Option<&str>,
        phase: Phase,
        doc: Option<(DocKind, &str)>,
        force: bool,
    ) -> Result<Option<String>, DelegationError> {
        let mut ledger = self.ledger.load()?;
        let resolved =
            ledger.apply_phase_transition(feature, phase, TransitionSource::Manual { force });
        if let Some((kind, path)) = doc {
            let target = resolved.clone().or_else(|| feature.map(str::to_string));
            ledger.apply_document(target.as_deref(), kind, path);
        }
        self.ledger.save(&mut ledger)?;
        Ok(resolved)
    }

    /// Best-effort automated phase signal derived from a document write
    /// matching the folder conventions. The document path is recorded even
    /// when the phase proposal is a rejected regression.
    pub fn note_document_write(
        &self,
        path: &str,
        feature: Option<&str>,
    ) -> Result<Option<String>, DelegationError> {
        let Some(kind) = doc_kind_from_path(path) else {
            return Ok(None);
        };
        let mut ledger = self.ledger.load()?;
        let resolved = ledger.apply_document(feature, kind, path);
        ledger.apply_phase_transition(resolved.as_deref(), kind.phase(), TransitionSource::Automated);
        self.ledger.save(&mut ledger)?;
        Ok(resolved)
    }

    // -- internals ----------------------------------------------------------

    /// Race the registry waiter, the polling fallback, the cancellation
    /// token, and the overall ceiling. First settled wins; the losers are
    /// dropped (cancelled).
    async fn wait_for_result(&self, handle: &str, cancel: &CancellationToken) -> WaitResult {
        let ceiling = tokio::time::sleep(self.tuning.sync_wait);
        tokio::pin!(ceiling);

        tokio::select! {
            _ = self.registry.wait_for_completion(handle) => {}
            _ = self.poll_until_idle(handle) => {}
            _ = cancel.cancelled() => return WaitResult::Cancelled,
            _ = &mut ceiling => return WaitResult::TimedOut,
        }

        // Liveness observed; the confirmation pass still runs under the
        // ceiling and the cancellation token.
        tokio::select! {
            transcript = self.confirm_completion(handle) => WaitResult::Settled(transcript),
            _ = cancel.cancelled() => WaitResult::Cancelled,
            _ = &mut ceiling => WaitResult::TimedOut,
        }
    }

    /// Poll liveness on the configured interval until the session reports
    /// idle. Poll errors are logged and retried; the overall ceiling in
    /// `wait_for_result` bounds this loop.
    async fn poll_until_idle(&self, handle: &str) {
        loop {
            tokio::time::sleep(self.tuning.poll_interval).await;
            match self.host.poll_liveness(&[handle.to_string()]).await {
                Ok(liveness) => {
                    if liveness.get(handle).copied() == Some(Liveness::Idle) {
                        return;
                    }
                }
                Err(e) => {
                    tracing::debug!(handle = %handle, error = %e, "Liveness poll failed");
                }
            }
        }
    }

    /// Completion-confirmation pass. An idle report is trusted only when
    /// the transcript carries a terminal finish marker after the last user
    /// turn; otherwise a bounded sequence of re-checks rules out a
    /// transient false idle, after which the fragment is accepted as-is.
    async fn confirm_completion(&self, handle: &str) -> Option<Transcript> {
        let mut transcript = self.host.fetch_transcript(handle).await.ok();
        if transcript.as_ref().is_some_and(Transcript::confirmed_complete) {
            return transcript;
        }
        let mut baseline = transcript.as_ref().map_or(0, Transcript::len);

        for delay in &self.tuning.idle_recheck_delays {
            tokio::time::sleep(*delay).await;
            match self.host.fetch_transcript(handle).await {
                Ok(fresh) => {
                    if fresh.confirmed_complete() {
                        return Some(fresh);
                    }
                    if fresh.len() != baseline {
                        tracing::debug!(handle = %handle, "False idle: transcript still growing");
                        baseline = fresh.len();
                    }
                    transcript = Some(fresh);
                }
                Err(e) => {
                    tracing::debug!(handle = %handle, error = %e, "Transcript re-check failed");
                }
            }
        }

        tracing::debug!(handle = %handle, "Re-checks exhausted, accepting transcript fragment");
        transcript
    }

    /// Best-effort partial transcript capture; failures are swallowed.
    async fn capture_partial(&self, handle: &str) -> Option<String> {
        match self.host.fetch_transcript(handle).await {
            Ok(transcript) => transcript.last_assistant_text().map(str::to_string),
            Err(e) => {
                tracing::debug!(handle = %handle, error = %e, "Partial capture failed");
                None
            }
        }
    }

    /// Abort a session: capture what it produced, issue the abort, persist
    /// the partial against the job record, and drop registry/team entries.
    async fn abort_session(&self, handle: &str) -> (Option<String>, Option<String>) {
        let partial = self.capture_partial(handle).await;
        if let Err(e) = self.host.abort(handle).await {
            tracing::debug!(handle = %handle, error = %e, "Session abort failed");
        }

        let job_id = self.jobs.find_by_handle(handle).map(|j| j.id);
        if let Some(id) = &job_id {
            if let Err(e) = self.jobs.mark(id, JobStatus::Aborted, partial.clone()) {
                tracing::debug!(job = %id, error = %e, "Job record write failed");
            }
        }

        let mut team = self.team.load();
        let name = team
            .teammates
            .values()
            .find(|t| t.session.as_deref() == Some(handle))
            .map(|t| t.name.clone());
        if let Some(name) = name {
            team.set_status(&name, TeammateStatus::Aborted);
            if let Err(e) = self.team.save(&team) {
                tracing::debug!(error = %e, "Team directory write failed");
            }
        }

        self.registry.unregister(handle);
        tracing::info!(handle = %handle, job = ?job_id, "Session aborted");
        (job_id, partial)
    }

    /// Terminal bookkeeping shared by sync completion, harvest-on-lookup,
    /// and cancellation. All of it is secondary to the outcome already in
    /// hand, so write failures are logged and swallowed.
    fn finish(
        &self,
        job_id: &str,
        role: &str,
        handle: &str,
        status: JobStatus,
        result: Option<String>,
    ) {
        self.registry.resolve(handle);
        self.registry.unregister(handle);

        if let Err(e) = self.jobs.mark(job_id, status, result) {
            tracing::debug!(job = %job_id, error = %e, "Job record write failed");
        }

        let teammate_status = match status {
            JobStatus::Completed => TeammateStatus::Completed,
            JobStatus::Failed => TeammateStatus::Failed,
            JobStatus::Aborted => TeammateStatus::Aborted,
            JobStatus::Running => return,
        };
        let mut team = self.team.load();
        team.set_status(role, teammate_status);
        if let Err(e) = self.team.save(&team) {
            tracing::debug!(error = %e, "Team directory write failed");
        }
    }
}

/// First line of a task, truncated for titles and summaries.
fn summarize(task: &str) -> String {
    let first_line = task.lines().next().unwrap_or_default();
    let mut summary: String = first_line.chars().take(120).collect();
    if first_line.chars().count() > 120 {
        summary.push_str("...");
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HostError;
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Host that panics on any use: guard failures must reject a
    /// delegation before the host is ever touched.
    struct UnreachableHost;

    #[async_trait]
    impl HostPlatform for UnreachableHost {
        async fn create_session(
            &self,
            _parent: Option<&str>,
            _title: &str,
        ) -> Result<SessionHandle, HostError> {
            panic!("guard should have rejected before session creation");
        }

        async fn dispatch_prompt(
            &self,
            _handle: &str,
            _role: &str,
            _content: &str,
            _model: Option<&str>,
        ) -> Result<(), HostError> {
            panic!("guard should have rejected before dispatch");
        }

        async fn fetch_transcript(&self, _handle: &str) -> Result<Transcript, HostError> {
            panic!("guard should have rejected before transcript fetch");
        }

        async fn poll_liveness(
            &self,
            _handles: &[SessionHandle],
        ) -> Result<HashMap<SessionHandle, Liveness>, HostError> {
            panic!("guard should have rejected before liveness poll");
        }

        async fn abort(&self, _handle: &str) -> Result<(), HostError> {
            panic!("guard should have rejected before abort");
        }
    }

    fn orchestrator(dir: &std::path::Path) -> Orchestrator {
        let config = crate::config::PartialConfig {
            workspace: Some(dir.to_path_buf()),
            ..Default::default()
        }
        .finalize();
        Orchestrator::new(
            &config,
            Arc::new(UnreachableHost),
            RoleRegistry::builtin(),
            SessionRegistry::new(),
        )
    }

    fn request(role: &str) -> DelegateRequest {
        DelegateRequest {
            role: Some(role.to_string()),
            task: Some("do something".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());

        let result = orch
            .delegate(request("wizard"), CallerContext::default(), CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(DelegationError::RoleNotFound { role }) if role == "wizard"
        ));
    }

    #[tokio::test]
    async fn self_delegation_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());

        let caller = CallerContext {
            role: Some("builder".to_string()),
            session: None,
        };
        let result = orch
            .delegate(request("builder"), caller, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DelegationError::SelfDelegation { .. })));
    }

    #[tokio::test]
    async fn orchestrator_chain_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());

        let caller = CallerContext {
            role: Some("coordinator".to_string()),
            session: None,
        };
        // coordinator is the built-in orchestrator role; delegating to
        // itself is self-delegation, so use a second orchestrator role via
        // a custom registry.
        let mut result = orch
            .delegate(request("coordinator"), caller, CancellationToken::new())
            .await;
        assert!(matches!(result, Err(DelegationError::SelfDelegation { .. })));

        let config = crate::config::PartialConfig {
            workspace: Some(dir.path().to_path_buf()),
            ..Default::default()
        }
        .finalize();
        let ws = tempfile::tempdir().unwrap();
        std::fs::write(
            ws.path().join("roles.toml"),
            "[[role]]\nname = \"overseer\"\nkind = \"orchestrator\"\n",
        )
        .unwrap();
        let roles = RoleRegistry::load(ws.path()).unwrap();
        let orch = Orchestrator::new(
            &config,
            Arc::new(UnreachableHost),
            roles,
            SessionRegistry::new(),
        );
        result = orch
            .delegate(
                request("overseer"),
                CallerContext {
                    role: Some("coordinator".to_string()),
                    session: None,
                },
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(
            result,
            Err(DelegationError::OrchestratorChain { from, to }) if from == "coordinator" && to == "overseer"
        ));
    }

    #[tokio::test]
    async fn depth_at_maximum_is_rejected_before_session_creation() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());

        // The caller's own session sits at the configured maximum depth.
        orch.registry().register("parent", "coordinator", 3);

        let caller = CallerContext {
            role: Some("coordinator".to_string()),
            session: Some("parent".to_string()),
        };
        let result = orch
            .delegate(request("builder"), caller, CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(DelegationError::DepthExceeded { depth: 3, max: 3 })
        ));

        // Nothing was registered and no teammate was added.
        assert_eq!(orch.registry().len(), 1);
        assert!(orch.team().load().teammates.is_empty());
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(dir.path());

        let result = orch
            .delegate(
                DelegateRequest::default(),
                CallerContext::default(),
                CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(DelegationError::EmptyRequest)));
    }

    #[test]
    fn summarize_truncates_to_first_line() {
        assert_eq!(summarize("short task\nwith detail"), "short task");
        let long = "x".repeat(200);
        let summary = summarize(&long);
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), 123);
    }
}
