use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::authorizer::Role;
use super::principal::Identity;
use crate::error::StoreError;

/// Profile document keyed by `Identity::id`.
///
/// Every field is optional because documents are merge-written: a last-login refresh
/// carries only `last_login`, an admin role change only `role`. Readers go through
/// `role()` and `is_active()` rather than the raw fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

impl Profile {
    /// Fresh member document: role `user`, active, both timestamps at `now`.
    pub fn new_member(identity: &Identity, display_name: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            uid: Some(identity.id.clone()),
            email: Some(identity.email.clone()),
            display_name: display_name.or_else(|| identity.display_name.clone()),
            photo_url: identity.photo_url.clone(),
            role: Some(Role::User),
            is_active: Some(true),
            created_at: Some(now),
            last_login: Some(now),
        }
    }

    pub fn last_login_patch(now: DateTime<Utc>) -> Self {
        Self { last_login: Some(now), ..Default::default() }
    }

    pub fn role_patch(role: Role) -> Self {
        Self { role: Some(role), ..Default::default() }
    }

    pub fn activation_patch(active: bool) -> Self {
        Self { is_active: Some(active), ..Default::default() }
    }

    /// Effective role of a signed-in member. Documents written without a role predate
    /// roles and count as plain users; `guest` is reserved for having no identity.
    pub fn role(&self) -> Role {
        match self.role {
            Some(Role::Admin) => Role::Admin,
            _ => Role::User,
        }
    }

    /// A missing flag is treated as revoked access.
    pub fn is_active(&self) -> bool { self.is_active.unwrap_or(false) }

    /// Overlay every present field of `patch` onto `self`.
    pub fn merge(&mut self, patch: &Profile) {
        fn take<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
            if let Some(v) = src { *dst = Some(v.clone()); }
        }
        take(&mut self.uid, &patch.uid);
        take(&mut self.email, &patch.email);
        take(&mut self.display_name, &patch.display_name);
        take(&mut self.photo_url, &patch.photo_url);
        take(&mut self.role, &patch.role);
        take(&mut self.is_active, &patch.is_active);
        take(&mut self.created_at, &patch.created_at);
        take(&mut self.last_login, &patch.last_login);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub merge: bool,
}

impl SetOptions {
    pub const REPLACE: SetOptions = SetOptions { merge: false };
    pub const MERGE: SetOptions = SetOptions { merge: true };
}

/// Hosted document store holding one profile per identity.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// `Ok(None)` is the not-found case; errors carry a typed kind.
    async fn get(&self, id: &str) -> Result<Option<Profile>, StoreError>;

    async fn set(&self, id: &str, profile: &Profile, options: SetOptions) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<(String, Profile)>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_field_names() {
        let now = Utc::now();
        let p = Profile::new_member(&Identity::new("u1", "a@b.c"), Some("Ana".into()), now);
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["uid"], "u1");
        assert_eq!(v["displayName"], "Ana");
        assert_eq!(v["role"], "user");
        assert_eq!(v["isActive"], true);
        assert!(v.get("photoURL").is_none());
        assert!(v.get("lastLogin").is_some());
    }

    #[test]
    fn defaults_for_sparse_documents() {
        let p: Profile = serde_json::from_str(r#"{"displayName":"x"}"#).unwrap();
        assert_eq!(p.role(), Role::User);
        assert!(!p.is_active());
        let p: Profile = serde_json::from_str(r#"{"role":"admin","isActive":true}"#).unwrap();
        assert_eq!(p.role(), Role::Admin);
        assert!(p.is_active());
        // a signed-in member is never a guest
        let p: Profile = serde_json::from_str(r#"{"role":"guest","isActive":true}"#).unwrap();
        assert_eq!(p.role(), Role::User);
    }

    #[test]
    fn merge_keeps_absent_fields() {
        let now = Utc::now();
        let mut p = Profile::new_member(&Identity::new("u1", "a@b.c"), Some("Ana".into()), now);
        p.merge(&Profile::role_patch(Role::Admin));
        p.merge(&Profile::activation_patch(false));
        assert_eq!(p.role(), Role::Admin);
        assert!(!p.is_active());
        assert_eq!(p.display_name.as_deref(), Some("Ana"));
        assert_eq!(p.created_at, Some(now));
    }
}
