//! The known-role registry.
//!
//! Roles are defined in `roles.toml` inside the workspace and merged over a
//! built-in default roster. The loader is strict: a malformed entry fails
//! the whole load rather than being silently dropped.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use super::types::{RoleKind, RoleSpec};
use crate::error::ConfigError;

/// The TOML file structure for roles.toml.
#[derive(Debug, Default, Deserialize)]
struct RolesFile {
    #[serde(default, rename = "role")]
    roles: Vec<RoleSpec>,
}

/// Registry of roles a delegation may target.
#[derive(Clone, Debug)]
pub struct RoleRegistry {
    roles: BTreeMap<String, RoleSpec>,
}

impl RoleRegistry {
    /// The built-in roster used when no roles.toml overrides it.
    pub fn builtin() -> Self {
        let mut registry = Self {
            roles: BTreeMap::new(),
        };
        for (name, kind, description) in [
            (
                "coordinator",
                RoleKind::Orchestrator,
                "Coordinates the team and receives task-board notifications",
            ),
            ("researcher", RoleKind::Specialist, "Gathers background for a feature"),
            ("planner", RoleKind::Specialist, "Writes the phase plan"),
            ("designer", RoleKind::Specialist, "Produces the design document"),
            ("builder", RoleKind::Specialist, "Implements the planned work"),
            ("checker", RoleKind::Specialist, "Evaluates implementation against the plan"),
        ] {
            registry.roles.insert(
                name.to_string(),
                RoleSpec {
                    name: name.to_string(),
                    kind,
                    description: description.to_string(),
                    model: None,
                },
            );
        }
        registry
    }

    /// Load `workspace/roles.toml` over the built-in roster.
    ///
    /// A missing file yields the builtins; a malformed file or entry is a
    /// load-time error.
    pub fn load(workspace: &Path) -> Result<Self, ConfigError> {
        let path = workspace.join("roles.toml");
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No roles.toml, using built-in roster");
                return Ok(Self::builtin());
            }
            Err(e) => return Err(ConfigError::IoError(e)),
        };

        let file: RolesFile =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let mut registry = Self::builtin();
        for spec in file.roles {
            if spec.name.trim().is_empty() {
                return Err(ConfigError::InvalidRole {
                    role: spec.name,
                    message: "role name must not be empty".to_string(),
                });
            }
            if spec.name.trim() != spec.name {
                return Err(ConfigError::InvalidRole {
                    role: spec.name,
                    message: "role name must not have surrounding whitespace".to_string(),
                });
            }
            registry.roles.insert(spec.name.clone(), spec);
        }
        tracing::info!(roles = registry.roles.len(), "Role registry loaded");
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&RoleSpec> {
        self.roles.get(name)
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }
}
