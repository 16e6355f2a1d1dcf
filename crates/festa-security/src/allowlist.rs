//! Single-principal authorization for destructive commands.
//!
//! The configured admin is either a numeric Telegram user id or a username
//! (with or without the leading `@`). Exactly one identity is privileged;
//! everybody else gets a generic refusal.

use festa_core::config::RetractionConfig;
use festa_core::error::{FestaError, Result};
use festa_core::types::Principal;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AdminIdentity {
    UserId(i64),
    Username(String),
    /// Nothing configured: every request is refused.
    Nobody,
}

/// Gate for retraction commands.
#[derive(Debug, Clone)]
pub struct PrincipalGuard {
    admin: AdminIdentity,
}

impl PrincipalGuard {
    /// Build from the retraction config's `admin` field.
    pub fn new(config: &RetractionConfig) -> Self {
        Self::from_identifier(&config.admin)
    }

    pub fn from_identifier(identifier: &str) -> Self {
        let trimmed = identifier.trim();
        let admin = if trimmed.is_empty() {
            tracing::warn!("⚠️ No retraction admin configured — delete commands are disabled");
            AdminIdentity::Nobody
        } else if let Ok(id) = trimmed.parse::<i64>() {
            AdminIdentity::UserId(id)
        } else {
            AdminIdentity::Username(trimmed.trim_start_matches('@').to_lowercase())
        };
        Self { admin }
    }

    /// Check whether a principal is the privileged one.
    pub fn is_authorized(&self, principal: &Principal) -> bool {
        match &self.admin {
            AdminIdentity::UserId(id) => principal.user_id == *id,
            AdminIdentity::Username(name) => principal
                .username
                .as_deref()
                .is_some_and(|u| u.trim_start_matches('@').to_lowercase() == *name),
            AdminIdentity::Nobody => false,
        }
    }

    /// Same as [`is_authorized`](Self::is_authorized) but as a `Result` for `?`.
    pub fn authorize(&self, principal: &Principal) -> Result<()> {
        if self.is_authorized(principal) {
            Ok(())
        } else {
            tracing::info!("🚫 Refused privileged command from user {}", principal.user_id);
            Err(FestaError::Unauthorized)
        }
    }
}
