use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "foreman", version, about = "PDCA delegation and coordination engine")]
pub struct Cli {
    /// Workspace directory (holds foreman.toml, roles.toml, and .foreman/ state)
    #[arg(short, long, global = true)]
    pub workspace: Option<PathBuf>,

    /// Default model for delegated sessions
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Maximum delegation depth
    #[arg(long, global = true)]
    pub max_depth: Option<usize>,

    /// Session host base URL
    #[arg(long, global = true)]
    pub host: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Delegate a task to a role
    Delegate {
        /// Target role name
        #[arg(short, long)]
        role: Option<String>,

        /// Task text to dispatch
        #[arg(short, long)]
        task: Option<String>,

        /// Return a job id immediately instead of waiting
        #[arg(short, long)]
        background: bool,

        /// Continue an existing session instead of creating one
        #[arg(long)]
        continue_session: Option<String>,

        /// Abort this session first (alone, or combined with a new task)
        #[arg(long)]
        abort_session: Option<String>,

        /// Role issuing this delegation (for the self-delegation guard)
        #[arg(long)]
        as_role: Option<String>,

        /// Session handle of the caller (for the depth guard)
        #[arg(long)]
        from_session: Option<String>,
    },
    /// Abort a running session, preserving any partial result
    Abort {
        /// Session handle to abort
        session: String,
    },
    /// Look up a background job by id
    Job {
        id: String,
    },
    /// Record a phase transition for a feature
    Phase {
        /// Feature name (omit to use the primary feature)
        #[arg(short, long)]
        feature: Option<String>,

        /// Target phase (research, plan, design, do, check, act, completed, archived)
        phase: String,

        /// Document to attach, as kind=path (e.g. plan=docs/plans/login.md)
        #[arg(short, long)]
        doc: Option<String>,

        /// Allow a multi-rank forward jump
        #[arg(long)]
        force: bool,
    },
    /// Show team, job, and mailbox status
    Status,
}
