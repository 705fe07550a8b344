//! Unified application error model.
//! Collaborator errors (`StoreError`, `AuthError`) are typed at the store boundary;
//! `AppError` is what leaves the session core, and `user_message` is the banner text
//! published in the session state.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub const MSG_ACCOUNT_DEACTIVATED: &str = "account deactivated";
pub const MSG_CONNECTION_ERROR: &str = "connection error";
pub const MSG_LOAD_FAILED: &str = "failed to load user data";
pub const MSG_PROFILE_CREATE_FAILED: &str = "failed to create user profile";

/// Failure classes surfaced by the profile store client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    Unavailable,
    DeadlineExceeded,
    ResourceExhausted,
    /// Stream or connection dropped underneath the client.
    Transport,
    PermissionDenied,
    InvalidArgument,
    Internal,
}

impl StoreErrorKind {
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            StoreErrorKind::Unavailable
                | StoreErrorKind::DeadlineExceeded
                | StoreErrorKind::ResourceExhausted
                | StoreErrorKind::Transport
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn unavailable(message: impl Into<String>) -> Self { Self::new(StoreErrorKind::Unavailable, message) }

    pub fn is_transient(&self) -> bool { self.kind.is_transient() }
}

/// Categories reported by the session (identity) provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorCode {
    InvalidCredentials,
    EmailInUse,
    WeakPassword,
    ProviderMisconfigured,
    TooManyAttempts,
    PermissionDenied,
    Other,
}

impl AuthErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthErrorCode::InvalidCredentials => "invalid_credentials",
            AuthErrorCode::EmailInUse => "email_in_use",
            AuthErrorCode::WeakPassword => "weak_password",
            AuthErrorCode::ProviderMisconfigured => "provider_misconfigured",
            AuthErrorCode::TooManyAttempts => "too_many_attempts",
            AuthErrorCode::PermissionDenied => "permission_denied",
            AuthErrorCode::Other => "auth_failure",
        }
    }

    pub fn user_message(self) -> &'static str {
        match self {
            AuthErrorCode::InvalidCredentials => "invalid email or password",
            AuthErrorCode::EmailInUse => "email already in use",
            AuthErrorCode::WeakPassword => "password is too weak (minimum 6 characters)",
            AuthErrorCode::ProviderMisconfigured => "authentication provider is misconfigured, contact the administrator",
            AuthErrorCode::TooManyAttempts => "too many failed attempts, try again later",
            AuthErrorCode::PermissionDenied => "permission denied",
            AuthErrorCode::Other => "authentication failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}: {message}", .code.as_str())]
pub struct AuthError {
    pub code: AuthErrorCode,
    pub message: String,
}

impl AuthError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    Auth { code: String, message: String },
    Deactivated { code: String, message: String },
    Connection { code: String, message: String },
    Store { code: String, message: String },
    Forbidden { code: String, message: String },
    NotFound { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::Auth { code, .. }
            | AppError::Deactivated { code, .. }
            | AppError::Connection { code, .. }
            | AppError::Store { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::Auth { message, .. }
            | AppError::Deactivated { message, .. }
            | AppError::Connection { message, .. }
            | AppError::Store { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn auth<S: Into<String>>(code: S, msg: S) -> Self { AppError::Auth { code: code.into(), message: msg.into() } }
    pub fn deactivated() -> Self { AppError::Deactivated { code: "account_deactivated".into(), message: MSG_ACCOUNT_DEACTIVATED.into() } }
    pub fn connection<S: Into<String>>(msg: S) -> Self { AppError::Connection { code: "connection_error".into(), message: msg.into() } }
    pub fn store<S: Into<String>>(code: S, msg: S) -> Self { AppError::Store { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Human-readable text for the session state's error banner.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Auth { code, message } => auth_code_from_str(code)
                .map(|c| c.user_message().to_string())
                .unwrap_or_else(|| message.clone()),
            AppError::Deactivated { .. } => MSG_ACCOUNT_DEACTIVATED.to_string(),
            AppError::Connection { .. } => MSG_CONNECTION_ERROR.to_string(),
            AppError::Store { .. } => MSG_LOAD_FAILED.to_string(),
            AppError::UserInput { .. }
            | AppError::Forbidden { .. }
            | AppError::NotFound { .. }
            | AppError::Internal { .. } => self.message().to_string(),
        }
    }
}

fn auth_code_from_str(code: &str) -> Option<AuthErrorCode> {
    [
        AuthErrorCode::InvalidCredentials,
        AuthErrorCode::EmailInUse,
        AuthErrorCode::WeakPassword,
        AuthErrorCode::ProviderMisconfigured,
        AuthErrorCode::TooManyAttempts,
        AuthErrorCode::PermissionDenied,
        AuthErrorCode::Other,
    ]
    .into_iter()
    .find(|c| c.as_str() == code)
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth { code: err.code.as_str().into(), message: err.message }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        if err.is_transient() {
            AppError::Connection { code: "connection_error".into(), message: err.message }
        } else {
            AppError::Store { code: "store_error".into(), message: err.message }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal { code: "internal".into(), message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(StoreErrorKind::Unavailable.is_transient());
        assert!(StoreErrorKind::DeadlineExceeded.is_transient());
        assert!(StoreErrorKind::ResourceExhausted.is_transient());
        assert!(StoreErrorKind::Transport.is_transient());
        assert!(!StoreErrorKind::PermissionDenied.is_transient());
        assert!(!StoreErrorKind::InvalidArgument.is_transient());
        assert!(!StoreErrorKind::Internal.is_transient());
    }

    #[test]
    fn auth_errors_map_to_banner_text() {
        let e: AppError = AuthError::new(AuthErrorCode::EmailInUse, "provider said so").into();
        assert_eq!(e.code_str(), "email_in_use");
        assert_eq!(e.message(), "provider said so");
        assert_eq!(e.user_message(), "email already in use");

        let e: AppError = AuthError::new(AuthErrorCode::TooManyAttempts, "x").into();
        assert_eq!(e.user_message(), "too many failed attempts, try again later");

        // unknown codes fall back to the raw message
        let e = AppError::auth("weird", "raw text");
        assert_eq!(e.user_message(), "raw text");
    }

    #[test]
    fn store_errors_split_on_transience() {
        let e: AppError = StoreError::unavailable("offline").into();
        assert!(matches!(e, AppError::Connection { .. }));
        assert_eq!(e.user_message(), MSG_CONNECTION_ERROR);

        let e: AppError = StoreError::new(StoreErrorKind::PermissionDenied, "rules").into();
        assert!(matches!(e, AppError::Store { .. }));
        assert_eq!(e.user_message(), MSG_LOAD_FAILED);
    }

    #[test]
    fn display_and_serde_tag() {
        let e = AppError::deactivated();
        assert_eq!(e.to_string(), "account_deactivated: account deactivated");
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "deactivated");
    }
}
