use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::authorizer::Role;
use super::principal::Identity;
use crate::error::MSG_ACCOUNT_DEACTIVATED;

/// The published `(identity, role, loading, error)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub identity: Option<Identity>,
    pub role: Option<Role>,
    pub loading: bool,
    pub error: Option<String>,
}

impl SessionState {
    /// Before the session store has reported anything.
    pub fn initial() -> Self {
        Self { identity: None, role: None, loading: true, error: None }
    }

    pub fn signed_out() -> Self {
        Self { identity: None, role: Some(Role::Guest), loading: false, error: None }
    }

    pub fn resolved(identity: Identity, role: Role) -> Self {
        Self { identity: Some(identity), role: Some(role), loading: false, error: None }
    }

    pub fn deactivated() -> Self {
        Self { identity: None, role: None, loading: false, error: Some(MSG_ACCOUNT_DEACTIVATED.to_string()) }
    }

    pub fn failed(identity: Option<Identity>, message: impl Into<String>) -> Self {
        Self { identity, role: None, loading: false, error: Some(message.into()) }
    }

    pub fn identity_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.id.as_str())
    }
}

impl Default for SessionState {
    fn default() -> Self { Self::initial() }
}

/// Single writer side of the session state. Only the bootstrapper owns one.
#[derive(Debug)]
pub(crate) struct SessionPublisher {
    tx: watch::Sender<SessionState>,
}

impl SessionPublisher {
    pub(crate) fn new(initial: SessionState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Whole-tuple replacement; readers never observe a half-written state.
    pub(crate) fn publish(&self, state: SessionState) {
        self.tx.send_replace(state);
    }

    pub(crate) fn set_loading(&self) {
        self.tx.send_if_modified(|s| {
            let changed = !s.loading;
            s.loading = true;
            changed
        });
    }

    /// Raise the loading flag and drop any stale banner (explicit sign-in / sign-up).
    pub(crate) fn begin_request(&self) {
        self.tx.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
    }

    pub(crate) fn clear_error(&self) {
        self.tx.send_if_modified(|s| s.error.take().is_some());
    }

    pub(crate) fn snapshot(&self) -> SessionState {
        self.tx.borrow().clone()
    }

    pub(crate) fn view(&self) -> SessionView {
        SessionView { rx: self.tx.subscribe() }
    }
}

/// Read-only observer of the published session state.
#[derive(Debug, Clone)]
pub struct SessionView {
    rx: watch::Receiver<SessionState>,
}

impl SessionView {
    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    /// Wait for the next publish. `None` once the bootstrapper is gone.
    pub async fn changed(&mut self) -> Option<SessionState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until a state with `loading == false` is published (or is already current).
    pub async fn settled(&mut self) -> Option<SessionState> {
        self.rx.wait_for(|s| !s.loading).await.ok().map(|s| s.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_hold_the_guest_invariant() {
        let s = SessionState::signed_out();
        assert!(s.identity.is_none());
        assert_eq!(s.role, Some(Role::Guest));
        assert!(!s.loading);

        let s = SessionState::resolved(Identity::new("u2", "x@y.z"), Role::Admin);
        assert_eq!(s.identity_id(), Some("u2"));
        assert_eq!(s.role, Some(Role::Admin));

        let s = SessionState::deactivated();
        assert_eq!(s.identity, None);
        assert_eq!(s.role, None);
        assert_eq!(s.error.as_deref(), Some("account deactivated"));
    }

    #[tokio::test]
    async fn view_sees_publishes_in_order() {
        let publisher = SessionPublisher::new(SessionState::initial());
        let mut view = publisher.view();
        assert!(view.current().loading);

        publisher.publish(SessionState::signed_out());
        let s = view.changed().await.unwrap();
        assert_eq!(s, SessionState::signed_out());

        publisher.set_loading();
        assert!(view.changed().await.unwrap().loading);
        publisher.publish(SessionState::failed(None, "boom"));
        let s = view.settled().await.unwrap();
        assert_eq!(s.error.as_deref(), Some("boom"));

        publisher.clear_error();
        assert_eq!(publisher.snapshot().error, None);
    }

    #[tokio::test]
    async fn view_ends_with_publisher() {
        let publisher = SessionPublisher::new(SessionState::initial());
        let mut view = publisher.view();
        drop(publisher);
        assert!(view.changed().await.is_none());
    }
}
