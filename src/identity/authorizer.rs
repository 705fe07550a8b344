use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::session::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Guest => "guest",
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guest" => Ok(Role::Guest),
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Access class of a navigation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    Public,
    /// Only reachable while signed out (sign-in / sign-up forms).
    GuestOnly,
    Protected,
    AdminOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Session still resolving; render a spinner and decide later.
    Wait,
    Allow,
    Redirect(&'static str),
}

pub const HOME_PATH: &str = "/";
pub const AUTH_PATH: &str = "/auth";

/// Route gate over a published session state. Role-dependent decisions are deferred while loading.
pub fn guard(state: &SessionState, access: RouteAccess) -> RouteDecision {
    if access == RouteAccess::Public {
        return RouteDecision::Allow;
    }
    if state.loading {
        return RouteDecision::Wait;
    }
    let signed_in = state.identity.is_some();
    match access {
        RouteAccess::Public => RouteDecision::Allow,
        RouteAccess::GuestOnly if signed_in => RouteDecision::Redirect(HOME_PATH),
        RouteAccess::GuestOnly => RouteDecision::Allow,
        RouteAccess::Protected if signed_in => RouteDecision::Allow,
        RouteAccess::Protected => RouteDecision::Redirect(AUTH_PATH),
        RouteAccess::AdminOnly if signed_in && state.role == Some(Role::Admin) => RouteDecision::Allow,
        RouteAccess::AdminOnly => RouteDecision::Redirect(HOME_PATH),
    }
}

pub fn shows_admin_link(state: &SessionState) -> bool {
    !state.loading && state.role == Some(Role::Admin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    fn signed_in(role: Role) -> SessionState {
        SessionState::resolved(Identity::new("u1", "u1@example.com"), role)
    }

    #[test]
    fn role_parse_and_display() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" user ".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(Role::Guest.to_string(), "guest");
        assert_eq!(serde_json::to_value(Role::Admin).unwrap(), "admin");
    }

    #[test]
    fn loading_defers_everything_but_public() {
        let s = SessionState::initial();
        assert_eq!(guard(&s, RouteAccess::Public), RouteDecision::Allow);
        assert_eq!(guard(&s, RouteAccess::Protected), RouteDecision::Wait);
        assert_eq!(guard(&s, RouteAccess::AdminOnly), RouteDecision::Wait);
        assert_eq!(guard(&s, RouteAccess::GuestOnly), RouteDecision::Wait);
        assert!(!shows_admin_link(&s));
    }

    #[test]
    fn guest_redirects() {
        let s = SessionState::signed_out();
        assert_eq!(guard(&s, RouteAccess::Protected), RouteDecision::Redirect(AUTH_PATH));
        assert_eq!(guard(&s, RouteAccess::AdminOnly), RouteDecision::Redirect(HOME_PATH));
        assert_eq!(guard(&s, RouteAccess::GuestOnly), RouteDecision::Allow);
    }

    #[test]
    fn user_and_admin() {
        let u = signed_in(Role::User);
        assert_eq!(guard(&u, RouteAccess::Protected), RouteDecision::Allow);
        assert_eq!(guard(&u, RouteAccess::AdminOnly), RouteDecision::Redirect(HOME_PATH));
        assert_eq!(guard(&u, RouteAccess::GuestOnly), RouteDecision::Redirect(HOME_PATH));
        assert!(!shows_admin_link(&u));

        let a = signed_in(Role::Admin);
        assert_eq!(guard(&a, RouteAccess::AdminOnly), RouteDecision::Allow);
        assert!(shows_admin_link(&a));
    }
}
