use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use foreman::cli;
use foreman::config;
use foreman::host::http::HttpHost;
use foreman::ledger::{DocKind, Phase};
use foreman::orchestration::{
    CallerContext, DelegateOutcome, DelegateRequest, Orchestrator, RoleRegistry, SessionRegistry,
};
use foreman::team::MailboxStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = cli::Cli::parse();
    let config = config::load_config(&cli)?;
    tracing::debug!(workspace = %config.workspace.display(), "Config loaded");

    let roles = RoleRegistry::load(&config.workspace)?;
    let host = Arc::new(HttpHost::new(
        &config.host_base_url,
        config.host_request_timeout_secs,
    ));
    let registry = SessionRegistry::new();
    let orchestrator = Orchestrator::new(&config, host, roles, registry);
    orchestrator.hydrate();

    match cli.command {
        cli::Commands::Delegate {
            role,
            task,
            background,
            continue_session,
            abort_session,
            as_role,
            from_session,
        } => {
            let request = DelegateRequest {
                role,
                task,
                background,
                model: None,
                continue_session,
                abort_session,
            };
            let caller = CallerContext {
                role: as_role,
                session: from_session,
            };

            let cancel = CancellationToken::new();
            let outcome = orchestrator.delegate(request, caller, cancel).await?;
            match outcome {
                DelegateOutcome::Completed { handle, job_id, result } => {
                    println!("completed (job {job_id}, session {handle})\n{result}");
                }
                DelegateOutcome::Background { handle, job_id, timed_out } => {
                    if timed_out {
                        println!("still running after wait ceiling; degraded to background job {job_id} (session {handle})");
                    } else {
                        println!("running as background job {job_id} (session {handle})");
                    }
                }
                DelegateOutcome::Aborted { handle, job_id, partial } => {
                    println!("aborted session {handle}; resume with --continue-session {handle}");
                    if let Some(job_id) = job_id {
                        println!("partial result saved on job {job_id}");
                    }
                    if let Some(partial) = partial {
                        println!("--- partial ---\n{partial}");
                    }
                }
            }
        }
        cli::Commands::Abort { session } => {
            let outcome = orchestrator
                .delegate(
                    DelegateRequest {
                        abort_session: Some(session),
                        ..Default::default()
                    },
                    CallerContext::default(),
                    CancellationToken::new(),
                )
                .await?;
            if let DelegateOutcome::Aborted { handle, job_id, partial } = outcome {
                println!("aborted session {handle}; resume with delegate --continue-session {handle}");
                if let Some(job_id) = job_id {
                    println!("partial result saved on job {job_id}");
                }
                if let Some(partial) = partial {
                    println!("--- partial ---\n{partial}");
                }
            }
        }
        cli::Commands::Job { id } => {
            let record = orchestrator.job_status(&id).await?;
            println!(
                "{} [{}] role={} session={}",
                record.id,
                serde_json::to_string(&record.status)?.trim_matches('"'),
                record.role,
                record.handle
            );
            println!("task: {}", record.task_summary);
            if let Some(result) = record.result {
                println!("--- result ---\n{result}");
            }
        }
        cli::Commands::Phase { feature, phase, doc, force } => {
            let phase = Phase::parse(&phase)
                .ok_or_else(|| anyhow::anyhow!("unknown phase: {phase}"))?;
            let doc = match &doc {
                Some(spec) => Some(parse_doc_spec(spec)?),
                None => None,
            };
            let resolved = orchestrator.record_phase(
                feature.as_deref(),
                phase,
                doc.as_ref().map(|(kind, path)| (*kind, path.as_str())),
                force,
            )?;
            match resolved {
                Some(name) => println!("{name} -> {phase}"),
                None => println!("no feature could be resolved; pass --feature"),
            }
        }
        cli::Commands::Status => {
            let team = orchestrator.team().load();
            println!("teammates:");
            for teammate in team.teammates.values() {
                println!(
                    "  {} [{}] {}",
                    teammate.name,
                    serde_json::to_string(&teammate.status)?.trim_matches('"'),
                    teammate.task.as_deref().unwrap_or("-")
                );
            }

            println!("jobs:");
            let mut jobs = orchestrator.jobs().list();
            jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            for job in jobs {
                println!(
                    "  {} [{}] {} ({})",
                    job.id,
                    serde_json::to_string(&job.status)?.trim_matches('"'),
                    job.task_summary,
                    job.role
                );
            }

            println!("mailboxes:");
            let mailbox = MailboxStore::new(&config.state_dir());
            for (recipient, summary) in mailbox.list_summary() {
                println!("  {recipient}: {} unread / {} total", summary.unread, summary.total);
            }

            let ledger = orchestrator.ledger().load()?;
            println!("features:");
            for name in &ledger.active {
                if let Some(feature) = ledger.features.get(name) {
                    let marker = if ledger.primary.as_deref() == Some(name.as_str()) {
                        "*"
                    } else {
                        " "
                    };
                    println!("  {marker} {} [{}]", feature.name, feature.phase);
                }
            }
        }
    }

    Ok(())
}

/// Parse a `kind=path` document argument.
fn parse_doc_spec(spec: &str) -> anyhow::Result<(DocKind, String)> {
    let (kind, path) = spec
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected kind=path, got: {spec}"))?;
    let kind = DocKind::parse(kind)
        .ok_or_else(|| anyhow::anyhow!("unknown document kind: {kind}"))?;
    Ok((kind, path.to_string()))
}
