use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    Owner,
    Staff,
}

impl std::str::FromStr for StaffRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "owner" => Ok(StaffRole::Owner),
            "staff" => Ok(StaffRole::Staff),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Who a bearer token belongs to. Every staff request is scoped to this workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaffIdentity {
    pub workspace_id: Ulid,
    pub role: StaffRole,
}

impl StaffIdentity {
    pub fn is_owner(&self) -> bool {
        self.role == StaffRole::Owner
    }
}

/// Resolves a bearer token to a staff identity. Session management lives
/// outside this service; this is the seam it plugs into.
#[async_trait]
pub trait StaffAuthSource: Send + Sync {
    async fn resolve(&self, token: &str) -> Option<StaffIdentity>;
}

/// Fixed token table, loaded from configuration.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenAuth {
    tokens: HashMap<String, StaffIdentity>,
}

impl StaticTokenAuth {
    pub fn new(tokens: HashMap<String, StaffIdentity>) -> Self {
        Self { tokens }
    }

    /// Parse `token=workspaceId:role` pairs separated by commas.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut tokens = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (token, identity) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected token=workspaceId:role, got {entry:?}"))?;
            let (workspace, role) = identity
                .split_once(':')
                .ok_or_else(|| format!("expected workspaceId:role, got {identity:?}"))?;
            let workspace_id = Ulid::from_string(workspace.trim())
                .map_err(|e| format!("bad workspace id {workspace:?}: {e}"))?;
            let token = token.trim();
            if token.is_empty() {
                return Err("empty token".into());
            }
            tokens.insert(
                token.to_string(),
                StaffIdentity { workspace_id, role: role.parse()? },
            );
        }
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl StaffAuthSource for StaticTokenAuth {
    async fn resolve(&self, token: &str) -> Option<StaffIdentity> {
        self.tokens.get(token).copied()
    }
}
