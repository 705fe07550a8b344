use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::authorizer::Role;
use super::profile::{Profile, ProfileStore, SetOptions};
use super::session::SessionState;
use crate::error::{AppError, AppResult};

const TARGET: &str = "filmoteca::admin";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub total: usize,
    pub active: usize,
    pub admins: usize,
}

/// Administrative user management over the profile store.
///
/// Every call is checked against the acting session: it must be settled and carry the
/// `admin` role. Writes are merge-writes of a single field, so they compose with the
/// bootstrapper's own last-login refreshes.
pub struct UserAdmin {
    profiles: Arc<dyn ProfileStore>,
}

impl UserAdmin {
    pub fn new(profiles: Arc<dyn ProfileStore>) -> Self { Self { profiles } }

    pub async fn list_users(&self, actor: &SessionState) -> AppResult<Vec<(String, Profile)>> {
        require_admin(actor)?;
        let mut users = self.profiles.list().await?;
        users.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(users)
    }

    pub async fn update_role(&self, actor: &SessionState, user_id: &str, role: Role) -> AppResult<()> {
        let admin_id = require_admin(actor)?;
        if role == Role::Guest {
            return Err(AppError::user("invalid_role", "guest is not an assignable role"));
        }
        self.require_exists(user_id).await?;
        self.profiles.set(user_id, &Profile::role_patch(role), SetOptions::MERGE).await?;
        info!(target: TARGET, "role change user={} role={} by={}", user_id, role, admin_id);
        Ok(())
    }

    /// Toggle account access. Takes effect at the user's next identity resolution.
    pub async fn set_active(&self, actor: &SessionState, user_id: &str, active: bool) -> AppResult<()> {
        let admin_id = require_admin(actor)?;
        if !active && admin_id == user_id {
            return Err(AppError::forbidden("self_deactivation", "administrators cannot deactivate their own account"));
        }
        self.require_exists(user_id).await?;
        self.profiles.set(user_id, &Profile::activation_patch(active), SetOptions::MERGE).await?;
        info!(target: TARGET, "activation change user={} active={} by={}", user_id, active, admin_id);
        Ok(())
    }

    pub async fn user_stats(&self, actor: &SessionState) -> AppResult<UserStats> {
        require_admin(actor)?;
        let users = self.profiles.list().await?;
        let mut stats = UserStats { total: users.len(), ..Default::default() };
        for (_, p) in &users {
            if p.is_active() { stats.active += 1; }
            if p.role() == Role::Admin { stats.admins += 1; }
        }
        Ok(stats)
    }

    async fn require_exists(&self, user_id: &str) -> AppResult<()> {
        match self.profiles.get(user_id).await? {
            Some(_) => Ok(()),
            None => Err(AppError::not_found("user_not_found".to_string(), format!("no profile for user '{}'", user_id))),
        }
    }
}

fn require_admin(actor: &SessionState) -> AppResult<&str> {
    if actor.loading {
        return Err(AppError::forbidden("session_loading", "session is still resolving"));
    }
    match (&actor.identity, actor.role) {
        (Some(identity), Some(Role::Admin)) => Ok(identity.id.as_str()),
        _ => Err(AppError::forbidden("admin_required", "administrator role required")),
    }
}
