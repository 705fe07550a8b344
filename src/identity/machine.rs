//! Profile resolution as an explicit state machine.
//!
//! `Idle -> Resolving{attempt, started_at} -> Resolved | Deactivated | Failed`.
//! The functions here are pure: they take the current phase, what the store said and
//! the current instant, and return the next phase plus the single action the driver
//! must perform. No I/O, no timers; the bootstrapper executes the actions.

use std::time::{Duration, Instant};

use super::authorizer::Role;
use super::profile::Profile;
use super::retry::{BackoffPolicy, RetryPolicy};
use crate::error::{AppError, StoreError, MSG_CONNECTION_ERROR, MSG_LOAD_FAILED, MSG_PROFILE_CREATE_FAILED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Transient store failures outlasted the attempt cap or the time budget.
    Connection,
    /// Non-transient fetch error.
    LoadFailed,
    CreateFailed,
}

impl Failure {
    pub fn message(self) -> &'static str {
        match self {
            Failure::Connection => MSG_CONNECTION_ERROR,
            Failure::LoadFailed => MSG_LOAD_FAILED,
            Failure::CreateFailed => MSG_PROFILE_CREATE_FAILED,
        }
    }

    pub fn to_error(self) -> AppError {
        match self {
            Failure::Connection => AppError::connection(MSG_CONNECTION_ERROR),
            Failure::LoadFailed => AppError::store("load_failed", MSG_LOAD_FAILED),
            Failure::CreateFailed => AppError::store("create_failed", MSG_PROFILE_CREATE_FAILED),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    /// `attempt` counts failed fetches so far.
    Resolving { attempt: u32, started_at: Instant },
    Resolved(Role),
    Deactivated,
    Failed(Failure),
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Resolved(_) | Phase::Deactivated | Phase::Failed(_))
    }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Found(Profile),
    NotFound,
    Error(StoreError),
}

impl From<Result<Option<Profile>, StoreError>> for FetchOutcome {
    fn from(res: Result<Option<Profile>, StoreError>) -> Self {
        match res {
            Ok(Some(p)) => FetchOutcome::Found(p),
            Ok(None) => FetchOutcome::NotFound,
            Err(e) => FetchOutcome::Error(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Back off for the given delay, then fetch again.
    Wait(Duration),
    /// No document yet: write a fresh member profile, then report via `on_created`.
    CreateProfile,
    /// Access revoked: publish the deactivated state and sign out at the session store.
    ForceSignOut,
    Publish(Role),
    Fail(Failure),
    /// Event did not apply to the current phase.
    Noop,
}

pub fn begin(now: Instant) -> Phase {
    Phase::Resolving { attempt: 0, started_at: now }
}

/// Feed the result of one profile fetch.
pub fn on_fetch(phase: &Phase, outcome: FetchOutcome, policy: &RetryPolicy, now: Instant, jitter: Duration) -> (Phase, Action) {
    let Phase::Resolving { attempt, started_at } = *phase else {
        return (phase.clone(), Action::Noop);
    };
    match outcome {
        FetchOutcome::Found(profile) if profile.is_active() => {
            let role = profile.role();
            (Phase::Resolved(role), Action::Publish(role))
        }
        FetchOutcome::Found(_) => (Phase::Deactivated, Action::ForceSignOut),
        FetchOutcome::NotFound => (phase.clone(), Action::CreateProfile),
        FetchOutcome::Error(err) if err.is_transient() => {
            let failures = attempt.saturating_add(1);
            let elapsed = now.saturating_duration_since(started_at);
            if failures >= policy.max_attempts || elapsed >= policy.budget {
                return (Phase::Failed(Failure::Connection), Action::Fail(Failure::Connection));
            }
            // never sleep past the budget
            let remaining = policy.budget - elapsed;
            let delay = policy.delay_for_attempt(failures, jitter).min(remaining);
            (Phase::Resolving { attempt: failures, started_at }, Action::Wait(delay))
        }
        FetchOutcome::Error(_) => (Phase::Failed(Failure::LoadFailed), Action::Fail(Failure::LoadFailed)),
    }
}

/// Feed the result of the profile creation requested by `Action::CreateProfile`.
pub fn on_created(phase: &Phase, result: Result<(), StoreError>) -> (Phase, Action) {
    if !matches!(phase, Phase::Resolving { .. }) {
        return (phase.clone(), Action::Noop);
    }
    match result {
        Ok(()) => (Phase::Resolved(Role::User), Action::Publish(Role::User)),
        Err(_) => (Phase::Failed(Failure::CreateFailed), Action::Fail(Failure::CreateFailed)),
    }
}
