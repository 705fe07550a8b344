use std::sync::Arc;

use async_trait::async_trait;

use super::principal::Identity;
use crate::error::AuthError;

#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self { email: email.into(), password: password.into() }
    }
}

/// Callback invoked on every sign-in / sign-out transition.
pub type IdentityListener = Arc<dyn Fn(Option<Identity>) + Send + Sync>;

/// Live listener registration. Dropping it unsubscribes.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self { cancel: Some(Box::new(cancel)) }
    }

    pub fn unsubscribe(mut self) {
        if let Some(f) = self.cancel.take() { f(); }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(f) = self.cancel.take() { f(); }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("active", &self.cancel.is_some()).finish()
    }
}

/// Hosted identity provider: issues identities and reports session transitions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_account(&self, req: &LoginRequest) -> Result<Identity, AuthError>;

    async fn authenticate(&self, req: &LoginRequest) -> Result<Identity, AuthError>;

    /// Listeners hear about the transition before this returns. Signing out without a
    /// session notifies nobody.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Register `listener` for identity transitions until the returned handle is dropped.
    fn on_change(&self, listener: IdentityListener) -> Subscription;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn subscription_cancels_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = Subscription::new(move || { h.fetch_add(1, Ordering::SeqCst); });
        sub.unsubscribe();
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let h = hits.clone();
        {
            let _sub = Subscription::new(move || { h.fetch_add(1, Ordering::SeqCst); });
        }
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
