//! Signing workflow configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use fwsign_core::{TrustPolicy, ALL_PERMISSIONS};

use crate::error::AuthorityError;

/// Roles that approve a production sign request
pub const STANDARD_APPROVAL_ROLES: [&str; 3] = ["reviewer", "manager", "security"];

/// Authority configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Signing project on the authority; selects which key signs
    pub project: Option<String>,

    /// Directory for drafts and request records
    pub work_dir: PathBuf,

    /// Debug signing uses the debug approval roles
    pub debug: bool,

    pub approval_roles: Vec<String>,

    /// Roles for debug signing (reviewer slots can be remapped per user)
    pub debug_approval_roles: Vec<String>,

    /// Permission bits given to a new code-signing key when none is specified
    pub default_permission: u32,

    /// Cancellation id given to a new code-signing key when none is specified
    pub default_cancel_id: u32,

    /// Revocation rules applied when verifying finalized containers
    #[serde(default)]
    pub trust_policy: TrustPolicy,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            project: None,
            work_dir: Self::default_work_dir(),
            debug: false,
            approval_roles: STANDARD_APPROVAL_ROLES.iter().map(|r| r.to_string()).collect(),
            debug_approval_roles: debug_roles_with(|var| std::env::var(var).ok()),
            default_permission: ALL_PERMISSIONS,
            default_cancel_id: 0,
            trust_policy: TrustPolicy::default(),
        }
    }
}

impl AuthorityConfig {
    fn default_work_dir() -> PathBuf {
        std::env::temp_dir().join("fwsign")
    }

    /// Project name, which must be set before anything is submitted
    pub fn project(&self) -> crate::Result<&str> {
        self.project
            .as_deref()
            .ok_or_else(|| AuthorityError::Config("signing project not set".into()))
    }

    /// Roles accepted by `approve` in the current mode
    pub fn active_roles(&self) -> &[String] {
        if self.debug {
            &self.debug_approval_roles
        } else {
            &self.approval_roles
        }
    }

    pub fn is_valid_role(&self, role: &str) -> bool {
        self.active_roles().iter().any(|r| r == role)
    }

    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &std::path::Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> crate::Result<()> {
        std::fs::create_dir_all(&self.work_dir)?;
        Ok(())
    }
}

/// Debug roles, with reviewer slots taken from `REVIEWER`, `REVIEWER2` and
/// `REVIEWER3` when `lookup` provides them
pub fn debug_roles_with(lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut roles = vec!["manager".to_string(), "security".to_string()];
    for (var, fallback) in [
        ("REVIEWER", "reviewer"),
        ("REVIEWER2", "reviewer2"),
        ("REVIEWER3", "reviewer3"),
    ] {
        roles.push(lookup(var).unwrap_or_else(|| fallback.to_string()));
    }
    roles
}
