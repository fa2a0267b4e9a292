//! Team directory and per-role mailboxes.

pub mod directory;
pub mod mailbox;

pub use directory::{TeamState, TeamStore, Teammate, TeammateStatus};
pub use mailbox::{MailboxStore, MailboxSummary, Message};
