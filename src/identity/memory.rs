//! In-process stand-ins for the hosted identity provider and profile document store.
//! Used by the demo binary and the test suites; both support fault injection.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use argon2::{Algorithm, Argon2, Params, PasswordHasher, PasswordVerifier, Version};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use password_hash::{PasswordHash, SaltString};
use tracing::debug;

use super::principal::Identity;
use super::profile::{Profile, ProfileStore, SetOptions};
use super::provider::{IdentityListener, LoginRequest, SessionStore, Subscription};
use crate::error::{AuthError, AuthErrorCode, StoreError};
use crate::tprintln;

const TARGET: &str = "filmoteca::memory";

pub const MIN_PASSWORD_LEN: usize = 6;
pub const MAX_FAILED_LOGINS: u32 = 5;

fn gen_token() -> Result<String, AuthError> {
    // 256-bit random token, base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| AuthError::new(AuthErrorCode::Other, e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

// Light parameters: this store backs demos and tests, not real credentials.
fn hasher() -> Argon2<'static> {
    let params = Params::new(1024, 1, 1, None).unwrap_or_default();
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| AuthError::new(AuthErrorCode::Other, e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::new(AuthErrorCode::Other, e.to_string()))?;
    let phc = hasher()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::new(AuthErrorCode::Other, e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        hasher().verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

#[derive(Debug)]
struct Account {
    identity: Identity,
    password_hash: String,
    failed_logins: u32,
}

#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub token: String,
    pub identity: Identity,
    pub issued_at: DateTime<Utc>,
}

type ListenerMap = RwLock<HashMap<u64, IdentityListener>>;

/// Identity provider keeping accounts and the single current session in memory.
///
/// Listeners are notified synchronously on every transition, and once on registration
/// with the current identity.
pub struct MemorySessionStore {
    accounts: RwLock<HashMap<String, Account>>,
    current: RwLock<Option<ActiveSession>>,
    listeners: Arc<ListenerMap>,
    next_listener: AtomicU64,
    sign_out_calls: AtomicUsize,
    misconfigured: Mutex<bool>,
    sign_out_failure: Mutex<Option<AuthError>>,
    authenticate_failure: Mutex<Option<AuthError>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self { Self::new() }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            current: RwLock::new(None),
            listeners: Arc::new(RwLock::new(HashMap::new())),
            next_listener: AtomicU64::new(1),
            sign_out_calls: AtomicUsize::new(0),
            misconfigured: Mutex::new(false),
            sign_out_failure: Mutex::new(None),
            authenticate_failure: Mutex::new(None),
        }
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.current.read().as_ref().map(|s| s.identity.clone())
    }

    pub fn current_session(&self) -> Option<ActiveSession> { self.current.read().clone() }

    pub fn sign_out_calls(&self) -> usize { self.sign_out_calls.load(Ordering::SeqCst) }

    pub fn listener_count(&self) -> usize { self.listeners.read().len() }

    /// Simulate a provider with password sign-in disabled.
    pub fn set_misconfigured(&self, on: bool) { *self.misconfigured.lock() = on; }

    /// Make the next `sign_out` call fail (after clearing the session locally).
    pub fn fail_next_sign_out(&self, err: AuthError) { *self.sign_out_failure.lock() = Some(err); }

    /// Make the next `authenticate` call fail before credentials are checked, e.g. a
    /// provider rule rejecting the request.
    pub fn fail_next_authenticate(&self, err: AuthError) { *self.authenticate_failure.lock() = Some(err); }

    /// Push an arbitrary transition to listeners, e.g. a token refresh that changed identity.
    pub fn emit(&self, identity: Option<Identity>) { self.notify(identity); }

    fn notify(&self, identity: Option<Identity>) {
        let listeners: Vec<IdentityListener> = self.listeners.read().values().cloned().collect();
        debug!(target: TARGET, "notify listeners={} user={}", listeners.len(), identity.as_ref().map(|i| i.id.as_str()).unwrap_or("<none>"));
        for l in listeners {
            l(identity.clone());
        }
    }

    fn check_configured(&self) -> Result<(), AuthError> {
        if *self.misconfigured.lock() {
            return Err(AuthError::new(AuthErrorCode::ProviderMisconfigured, "email/password sign-in is not enabled"));
        }
        Ok(())
    }

    fn open_session(&self, identity: Identity) -> Result<Identity, AuthError> {
        let session = ActiveSession { token: gen_token()?, identity: identity.clone(), issued_at: Utc::now() };
        tprintln!("memory.session.issue user={} token_len={}", identity.id, session.token.len());
        *self.current.write() = Some(session);
        self.notify(Some(identity.clone()));
        Ok(identity)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_account(&self, req: &LoginRequest) -> Result<Identity, AuthError> {
        self.check_configured()?;
        if req.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::new(AuthErrorCode::WeakPassword, format!("password must have at least {} characters", MIN_PASSWORD_LEN)));
        }
        let key = req.email.trim().to_lowercase();
        let identity = {
            let mut accounts = self.accounts.write();
            if accounts.contains_key(&key) {
                return Err(AuthError::new(AuthErrorCode::EmailInUse, format!("account exists for '{}'", key)));
            }
            let identity = Identity::new(uuid::Uuid::new_v4().simple().to_string(), key.clone());
            let password_hash = hash_password(&req.password)?;
            accounts.insert(key, Account { identity: identity.clone(), password_hash, failed_logins: 0 });
            identity
        };
        debug!(target: TARGET, "account created user={}", identity.id);
        self.open_session(identity)
    }

    async fn authenticate(&self, req: &LoginRequest) -> Result<Identity, AuthError> {
        self.check_configured()?;
        if let Some(err) = self.authenticate_failure.lock().take() {
            return Err(err);
        }
        let key = req.email.trim().to_lowercase();
        let identity = {
            let mut accounts = self.accounts.write();
            let Some(account) = accounts.get_mut(&key) else {
                return Err(AuthError::new(AuthErrorCode::InvalidCredentials, "unknown account"));
            };
            if account.failed_logins >= MAX_FAILED_LOGINS {
                return Err(AuthError::new(AuthErrorCode::TooManyAttempts, "account temporarily locked"));
            }
            if !verify_password(&account.password_hash, &req.password) {
                account.failed_logins += 1;
                return Err(AuthError::new(AuthErrorCode::InvalidCredentials, "wrong password"));
            }
            account.failed_logins = 0;
            account.identity.clone()
        };
        self.open_session(identity)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        let previous = self.current.write().take();
        if let Some(s) = &previous {
            tprintln!("memory.session.revoke user={}", s.identity.id);
            self.notify(None);
        }
        match self.sign_out_failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn on_change(&self, listener: IdentityListener) -> Subscription {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().insert(id, listener.clone());
        listener(self.current_identity());
        let weak: Weak<ListenerMap> = Arc::downgrade(&self.listeners);
        Subscription::new(move || {
            if let Some(map) = weak.upgrade() {
                map.write().remove(&id);
            }
        })
    }
}

/// Profile documents keyed by identity id, with scripted failures.
#[derive(Default)]
pub struct MemoryProfileStore {
    docs: RwLock<HashMap<String, Profile>>,
    get_failures: Mutex<VecDeque<StoreError>>,
    set_failures: Mutex<VecDeque<StoreError>>,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl MemoryProfileStore {
    pub fn new() -> Self { Self::default() }

    pub fn insert(&self, id: &str, profile: Profile) {
        self.docs.write().insert(id.to_string(), profile);
    }

    pub fn profile(&self, id: &str) -> Option<Profile> { self.docs.read().get(id).cloned() }

    pub fn len(&self) -> usize { self.docs.read().len() }

    pub fn is_empty(&self) -> bool { self.docs.read().is_empty() }

    /// Queue errors returned by the next `get` calls, one per call.
    pub fn fail_next_gets<I: IntoIterator<Item = StoreError>>(&self, errors: I) {
        self.get_failures.lock().extend(errors);
    }

    pub fn fail_next_sets<I: IntoIterator<Item = StoreError>>(&self, errors: I) {
        self.set_failures.lock().extend(errors);
    }

    pub fn get_calls(&self) -> usize { self.gets.load(Ordering::SeqCst) }

    pub fn set_calls(&self) -> usize { self.sets.load(Ordering::SeqCst) }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, id: &str) -> Result<Option<Profile>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.get_failures.lock().pop_front() {
            return Err(err);
        }
        Ok(self.docs.read().get(id).cloned())
    }

    async fn set(&self, id: &str, profile: &Profile, options: SetOptions) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.set_failures.lock().pop_front() {
            return Err(err);
        }
        let mut docs = self.docs.write();
        match docs.get_mut(id) {
            Some(existing) if options.merge => existing.merge(profile),
            _ => { docs.insert(id.to_string(), profile.clone()); }
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<(String, Profile)>, StoreError> {
        Ok(self.docs.read().iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreErrorKind;
    use crate::identity::Role;

    #[test]
    fn password_hash_roundtrip() {
        let phc = hash_password("secret-1").unwrap();
        assert!(verify_password(&phc, "secret-1"));
        assert!(!verify_password(&phc, "secret-2"));
        assert!(!verify_password("not a phc string", "secret-1"));
    }

    #[tokio::test]
    async fn account_lifecycle_and_errors() {
        let store = MemorySessionStore::new();
        let err = store.create_account(&LoginRequest::new("a@b.c", "123")).await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::WeakPassword);

        let id = store.create_account(&LoginRequest::new("A@b.c", "123456")).await.unwrap();
        assert_eq!(id.email, "a@b.c");
        assert_eq!(store.current_identity(), Some(id.clone()));
        assert!(!store.current_session().unwrap().token.is_empty());

        let err = store.create_account(&LoginRequest::new("a@b.c", "abcdef")).await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::EmailInUse);

        store.sign_out().await.unwrap();
        assert_eq!(store.current_identity(), None);

        let err = store.authenticate(&LoginRequest::new("nobody@b.c", "123456")).await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::InvalidCredentials);
        let again = store.authenticate(&LoginRequest::new("a@b.c", "123456")).await.unwrap();
        assert_eq!(again.id, id.id);

        store.set_misconfigured(true);
        let err = store.authenticate(&LoginRequest::new("a@b.c", "123456")).await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::ProviderMisconfigured);
    }

    #[tokio::test]
    async fn lockout_after_repeated_failures() {
        let store = MemorySessionStore::new();
        store.create_account(&LoginRequest::new("a@b.c", "123456")).await.unwrap();
        for _ in 0..MAX_FAILED_LOGINS {
            let err = store.authenticate(&LoginRequest::new("a@b.c", "wrong!")).await.unwrap_err();
            assert_eq!(err.code, AuthErrorCode::InvalidCredentials);
        }
        let err = store.authenticate(&LoginRequest::new("a@b.c", "123456")).await.unwrap_err();
        assert_eq!(err.code, AuthErrorCode::TooManyAttempts);
    }

    #[tokio::test]
    async fn listeners_get_current_then_transitions() {
        let store = MemorySessionStore::new();
        let seen: Arc<Mutex<Vec<Option<String>>>> = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let sub = store.on_change(Arc::new(move |i: Option<Identity>| s.lock().push(i.map(|i| i.id))));
        let id = store.create_account(&LoginRequest::new("a@b.c", "123456")).await.unwrap();
        store.sign_out().await.unwrap();
        // signing out while signed out notifies nobody
        store.sign_out().await.unwrap();
        assert_eq!(*seen.lock(), vec![None, Some(id.id.clone()), None]);
        assert_eq!(store.sign_out_calls(), 2);

        drop(sub);
        assert_eq!(store.listener_count(), 0);
        store.emit(None);
        assert_eq!(seen.lock().len(), 3);
    }

    #[tokio::test]
    async fn profile_store_merge_and_faults() {
        let store = MemoryProfileStore::new();
        store.fail_next_gets([StoreError::unavailable("down")]);
        assert_eq!(store.get("u1").await.unwrap_err().kind, StoreErrorKind::Unavailable);
        assert_eq!(store.get("u1").await.unwrap(), None);
        assert_eq!(store.get_calls(), 2);

        let base = Profile { role: Some(Role::User), is_active: Some(true), ..Default::default() };
        store.set("u1", &base, SetOptions::REPLACE).await.unwrap();
        store.set("u1", &Profile::role_patch(Role::Admin), SetOptions::MERGE).await.unwrap();
        let p = store.get("u1").await.unwrap().unwrap();
        assert_eq!(p.role(), Role::Admin);
        assert!(p.is_active());

        store.set("u1", &Profile::role_patch(Role::User), SetOptions::REPLACE).await.unwrap();
        assert_eq!(store.profile("u1").unwrap().is_active, None);

        store.fail_next_sets([StoreError::new(StoreErrorKind::PermissionDenied, "rules")]);
        assert!(store.set("u2", &base, SetOptions::REPLACE).await.is_err());
        assert_eq!(store.len(), 1);
        assert_eq!(store.set_calls(), 4);
    }
}
