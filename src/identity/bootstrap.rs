//! Session bootstrapper: turns identity-provider notifications into one consistent,
//! published session state.
//!
//! Each notification starts a new generation. Resolution work tagged with an older
//! generation may finish, but it never publishes, never creates a profile and never
//! signs anybody out. Publishing happens under the same lock that advances the
//! generation, so a stale result cannot land after a newer one.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::authorizer::Role;
use super::machine::{self, Action, Failure, FetchOutcome, Phase};
use super::principal::Identity;
use super::profile::{Profile, ProfileStore, SetOptions};
use super::provider::{IdentityListener, LoginRequest, SessionStore, Subscription};
use super::retry::{Clock, RetryPolicy};
use super::session::{SessionPublisher, SessionState, SessionView};
use crate::error::{AppError, AppResult, MSG_PROFILE_CREATE_FAILED};

const TARGET: &str = "filmoteca::session";

/// Generation stamp of one identity-change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    pub fn generation(self) -> u64 { self.0 }
}

/// How a single identity-change event ended, from the bootstrapper's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(Role),
    Deactivated,
    Failed(Failure),
    SignedOut,
    /// A sign-out notification caused by our own forced sign-out; state left as published.
    Absorbed,
    /// A newer event took over; nothing was published.
    Superseded,
    /// Torn down while backing off.
    Cancelled,
}

#[derive(Debug, Default)]
struct Epoch {
    generation: u64,
    /// Armed for the duration of a forced sign-out so the store's null notification keeps
    /// the deactivated banner instead of resetting to guest.
    absorb_sign_out: bool,
}

pub struct SessionBootstrapper {
    session: Arc<dyn SessionStore>,
    profiles: Arc<dyn ProfileStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    publisher: SessionPublisher,
    epoch: Mutex<Epoch>,
    shutdown: watch::Sender<bool>,
}

impl SessionBootstrapper {
    pub fn new(
        session: Arc<dyn SessionStore>,
        profiles: Arc<dyn ProfileStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            session,
            profiles,
            clock,
            policy,
            publisher: SessionPublisher::new(SessionState::initial()),
            epoch: Mutex::new(Epoch::default()),
            shutdown,
        }
    }

    pub fn state(&self) -> SessionState { self.publisher.snapshot() }

    pub fn subscribe(&self) -> SessionView { self.publisher.view() }

    pub fn policy(&self) -> &RetryPolicy { &self.policy }

    pub fn clear_error(&self) { self.publisher.clear_error(); }

    /// Register with the session store. Every notification begins a new generation on
    /// the spot and resolves on the current Tokio runtime.
    pub fn attach(self: &Arc<Self>) -> AppResult<Attachment> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| AppError::internal("no_runtime".to_string(), e.to_string()))?;
        let weak = Arc::downgrade(self);
        let listener: IdentityListener = Arc::new(move |identity: Option<Identity>| {
            let Some(this) = weak.upgrade() else { return };
            match identity {
                None => { this.begin_signed_out(); }
                Some(identity) => {
                    let ticket = this.begin_identity(&identity);
                    handle.spawn(async move {
                        this.resolve(ticket, identity).await;
                    });
                }
            }
        });
        let subscription = self.session.on_change(listener);
        info!(target: TARGET, "attached to session store");
        Ok(Attachment { subscription: Some(subscription), bootstrapper: Arc::clone(self) })
    }

    /// Handle one identity transition to completion.
    pub async fn on_identity_change(&self, identity: Option<Identity>) -> Resolution {
        match identity {
            None => {
                if self.begin_signed_out() { Resolution::SignedOut } else { Resolution::Absorbed }
            }
            Some(identity) => {
                let ticket = self.begin_identity(&identity);
                self.resolve(ticket, identity).await
            }
        }
    }

    /// Create credentials, then write the member profile. No retries.
    pub async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> AppResult<()> {
        self.publisher.begin_request();
        let identity = match self.session.create_account(&LoginRequest::new(email, password)).await {
            Ok(identity) => identity,
            Err(e) => return Err(self.fail_request(e.into())),
        };
        // supersede the resolution the store's own notification may have started
        let ticket = self.begin_identity(&identity);
        let profile = Profile::new_member(&identity, Some(display_name.to_string()), self.clock.wall_clock());
        match self.profiles.set(&identity.id, &profile, SetOptions::REPLACE).await {
            Ok(()) => {
                info!(target: TARGET, "sign_up user={} gen={}", identity.id, ticket.generation());
                self.publish_if_current(ticket, SessionState::resolved(identity, Role::User));
                Ok(())
            }
            Err(e) => {
                warn!(target: TARGET, "sign_up profile write failed user={}: {}", identity.id, e);
                self.publish_if_current(ticket, SessionState::failed(Some(identity), MSG_PROFILE_CREATE_FAILED));
                Err(AppError::store("create_failed".to_string(), e.to_string()))
            }
        }
    }

    /// Authenticate, then resolve the profile exactly like an identity change would.
    /// The last-login refresh afterwards is best-effort.
    pub async fn sign_in(&self, email: &str, password: &str) -> AppResult<Role> {
        self.publisher.begin_request();
        let identity = match self.session.authenticate(&LoginRequest::new(email, password)).await {
            Ok(identity) => identity,
            Err(e) => return Err(self.fail_request(e.into())),
        };
        let id = identity.id.clone();
        let ticket = self.begin_identity(&identity);
        let outcome = match self.resolve(ticket, identity).await {
            Resolution::Superseded => self.settled_outcome(&id).await,
            other => other,
        };
        match outcome {
            Resolution::Resolved(role) => {
                let patch = Profile::last_login_patch(self.clock.wall_clock());
                if let Err(e) = self.profiles.set(&id, &patch, SetOptions::MERGE).await {
                    warn!(target: TARGET, "last-login refresh failed user={}: {}", id, e);
                }
                Ok(role)
            }
            Resolution::Deactivated => Err(AppError::deactivated()),
            Resolution::Failed(f) => Err(f.to_error()),
            Resolution::Cancelled => Err(AppError::internal("cancelled".to_string(), "session bootstrapper shut down".to_string())),
            Resolution::SignedOut | Resolution::Absorbed | Resolution::Superseded => {
                Err(AppError::auth("signed_out".to_string(), "signed out while signing in".to_string()))
            }
        }
    }

    /// Sign out at the store; local state always ends signed out.
    pub async fn sign_out(&self) -> AppResult<()> {
        self.publisher.begin_request();
        let result = self.session.sign_out().await;
        {
            let mut epoch = self.epoch.lock();
            epoch.generation += 1;
            epoch.absorb_sign_out = false;
            self.publisher.publish(SessionState::signed_out());
        }
        match result {
            Ok(()) => {
                info!(target: TARGET, "sign_out");
                Ok(())
            }
            Err(e) => {
                warn!(target: TARGET, "sign_out at store failed, local session cleared anyway: {}", e);
                Err(e.into())
            }
        }
    }

    /// Stop pending backoff waits. Resolutions in flight end as `Cancelled`.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    fn begin_identity(&self, identity: &Identity) -> Ticket {
        let mut epoch = self.epoch.lock();
        epoch.generation += 1;
        epoch.absorb_sign_out = false;
        self.publisher.set_loading();
        debug!(target: TARGET, "identity change user={} gen={}", identity.id, epoch.generation);
        Ticket(epoch.generation)
    }

    /// Returns false when the notification was the echo of our own forced sign-out.
    fn begin_signed_out(&self) -> bool {
        let mut epoch = self.epoch.lock();
        if epoch.absorb_sign_out {
            epoch.absorb_sign_out = false;
            debug!(target: TARGET, "absorbed sign-out notification after forced sign-out");
            return false;
        }
        epoch.generation += 1;
        self.publisher.publish(SessionState::signed_out());
        debug!(target: TARGET, "identity change user=<none> gen={}", epoch.generation);
        true
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        self.epoch.lock().generation == ticket.0
    }

    fn publish_if_current(&self, ticket: Ticket, state: SessionState) -> bool {
        let epoch = self.epoch.lock();
        if epoch.generation != ticket.0 {
            debug!(target: TARGET, "discarding stale result gen={} current={}", ticket.0, epoch.generation);
            return false;
        }
        self.publisher.publish(state);
        true
    }

    fn fail_request(&self, err: AppError) -> AppError {
        let message = err.user_message();
        warn!(target: TARGET, "request failed: {}", err);
        let _epoch = self.epoch.lock();
        self.publisher.publish(SessionState { loading: false, error: Some(message), ..self.publisher.snapshot() });
        err
    }

    async fn resolve(&self, ticket: Ticket, identity: Identity) -> Resolution {
        let mut phase = machine::begin(self.clock.now());
        let mut stop = self.shutdown.subscribe();
        loop {
            if !self.is_current(ticket) {
                debug!(target: TARGET, "superseded before fetch user={} gen={}", identity.id, ticket.0);
                return Resolution::Superseded;
            }
            let outcome = FetchOutcome::from(self.profiles.get(&identity.id).await);
            if let FetchOutcome::Error(e) = &outcome {
                warn!(target: TARGET, "profile fetch failed user={} transient={}: {}", identity.id, e.is_transient(), e);
            }
            let jitter = self.policy.sample_jitter();
            let (next, mut action) = machine::on_fetch(&phase, outcome, &self.policy, self.clock.now(), jitter);
            phase = next;

            if action == Action::CreateProfile {
                if !self.is_current(ticket) {
                    return Resolution::Superseded;
                }
                // merge-write: a sign-up that overtook us may already have written the full document
                let profile = Profile::new_member(&identity, None, self.clock.wall_clock());
                let created = self.profiles.set(&identity.id, &profile, SetOptions::MERGE).await;
                match &created {
                    Ok(()) => info!(target: TARGET, "created profile user={}", identity.id),
                    Err(e) => warn!(target: TARGET, "profile create failed user={}: {}", identity.id, e),
                }
                (phase, action) = machine::on_created(&phase, created);
            }

            match action {
                Action::Wait(delay) => {
                    if let Phase::Resolving { attempt, .. } = phase {
                        info!(target: TARGET, "retrying profile fetch user={} attempt={} delay_ms={}", identity.id, attempt, delay.as_millis());
                    }
                    if *stop.borrow() {
                        return Resolution::Cancelled;
                    }
                    tokio::select! {
                        _ = self.clock.sleep(delay) => {}
                        _ = stop.wait_for(|down| *down) => {
                            debug!(target: TARGET, "backoff cancelled user={}", identity.id);
                            return Resolution::Cancelled;
                        }
                    }
                }
                Action::Publish(role) => {
                    if !self.publish_if_current(ticket, SessionState::resolved(identity.clone(), role)) {
                        return Resolution::Superseded;
                    }
                    info!(target: TARGET, "resolved user={} role={}", identity.id, role);
                    return Resolution::Resolved(role);
                }
                Action::ForceSignOut => return self.force_sign_out(ticket, &identity).await,
                Action::Fail(failure) => {
                    if !self.publish_if_current(ticket, SessionState::failed(Some(identity.clone()), failure.message())) {
                        return Resolution::Superseded;
                    }
                    warn!(target: TARGET, "resolution failed user={}: {}", identity.id, failure.message());
                    return Resolution::Failed(failure);
                }
                Action::CreateProfile | Action::Noop => {
                    warn!(target: TARGET, "resolution stalled user={} phase={:?}", identity.id, phase);
                    self.publish_if_current(ticket, SessionState::failed(Some(identity.clone()), Failure::LoadFailed.message()));
                    return Resolution::Failed(Failure::LoadFailed);
                }
            }
        }
    }

    async fn force_sign_out(&self, ticket: Ticket, identity: &Identity) -> Resolution {
        {
            let mut epoch = self.epoch.lock();
            if epoch.generation != ticket.0 {
                return Resolution::Superseded;
            }
            self.publisher.publish(SessionState::deactivated());
            epoch.absorb_sign_out = true;
        }
        warn!(target: TARGET, "account deactivated, forcing sign-out user={}", identity.id);
        let result = self.session.sign_out().await;
        {
            // the echo, if any, was delivered during the call; never swallow a later event
            let mut epoch = self.epoch.lock();
            if epoch.generation == ticket.0 && epoch.absorb_sign_out {
                debug!(target: TARGET, "no sign-out notification for forced sign-out user={}", identity.id);
                epoch.absorb_sign_out = false;
            }
        }
        if let Err(e) = result {
            warn!(target: TARGET, "forced sign-out failed user={}: {}", identity.id, e);
        }
        Resolution::Deactivated
    }

    /// Outcome of whichever newer resolution superseded ours, read off the published state.
    async fn settled_outcome(&self, id: &str) -> Resolution {
        let mut view = self.subscribe();
        let Some(state) = view.settled().await else { return Resolution::Cancelled };
        match (&state.identity, state.role, state.error.as_deref()) {
            (Some(i), Some(role), None) if i.id == id => Resolution::Resolved(role),
            (None, None, Some(msg)) if msg == crate::error::MSG_ACCOUNT_DEACTIVATED => Resolution::Deactivated,
            (Some(i), None, Some(msg)) if i.id == id => Resolution::Failed(match msg {
                crate::error::MSG_CONNECTION_ERROR => Failure::Connection,
                MSG_PROFILE_CREATE_FAILED => Failure::CreateFailed,
                _ => Failure::LoadFailed,
            }),
            (None, _, _) => Resolution::SignedOut,
            _ => Resolution::Superseded,
        }
    }
}

/// Live link between a bootstrapper and its session store. Dropping it unsubscribes and
/// cancels pending backoff waits.
pub struct Attachment {
    subscription: Option<Subscription>,
    bootstrapper: Arc<SessionBootstrapper>,
}

impl Attachment {
    pub fn bootstrapper(&self) -> &Arc<SessionBootstrapper> { &self.bootstrapper }

    pub fn detach(self) {}
}

impl Drop for Attachment {
    fn drop(&mut self) {
        if let Some(sub) = self.subscription.take() {
            sub.unsubscribe();
        }
        self.bootstrapper.shutdown();
        debug!(target: TARGET, "detached from session store");
    }
}
