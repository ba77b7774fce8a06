use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gobet_common::config::IdentityConfig;
use gobet_common::error::AuthError;
use gobet_common::{Principal, Session, SessionEvent};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Credential verification and session issuance.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    async fn sign_in(&self, identifier: &str, secret: &str) -> Result<Session, AuthError>;

    /// Registers a new identity without touching the caller's session.
    async fn sign_up(&self, identifier: &str, secret: &str) -> Result<Principal, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn current_session(&self) -> Result<Option<Session>, AuthError>;

    async fn refresh_session(&self) -> Result<Session, AuthError>;

    /// Removes a registered identity; unknown ids are a no-op.
    async fn delete_identity(&self, principal_id: &str) -> Result<(), AuthError>;

    /// Every session transition, in the order the provider makes them.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent>;
}

fn session_ttl(secs: u64) -> Option<chrono::Duration> {
    let ttl = i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds);
    if ttl.is_none() {
        warn!(session_ttl_secs = secs, "session lifetime out of range, sessions will not expire");
    }
    ttl
}

struct Credential {
    principal_id: String,
    salt: String,
    digest: String,
}

fn digest(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Default)]
struct State {
    credentials: HashMap<String, Credential>,
    session: Option<Session>,
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
}

impl State {
    fn emit(&mut self, event: SessionEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// In-process identity provider holding salted secret digests.
pub struct MemoryIdentityProvider {
    state: Mutex<State>,
    /// `None` when the configured lifetime is beyond what a timestamp can hold.
    session_ttl: Option<chrono::Duration>,
    offline: AtomicBool,
}

impl MemoryIdentityProvider {
    pub fn new(config: &IdentityConfig) -> Self {
        Self {
            state: Mutex::new(State::default()),
            session_ttl: session_ttl(config.session_ttl_secs),
            offline: AtomicBool::new(false),
        }
    }

    /// Simulates the provider becoming unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Synchronous registration, used for seeding.
    pub fn register(&self, identifier: &str, secret: &str) -> Result<Principal, AuthError> {
        let identifier = identifier.to_lowercase();
        let mut state = self.lock()?;
        if state.credentials.contains_key(&identifier) {
            return Err(AuthError::IdentifierTaken(identifier));
        }
        let salt = Uuid::new_v4().simple().to_string();
        let credential = Credential {
            principal_id: Uuid::new_v4().to_string(),
            digest: digest(&salt, secret),
            salt,
        };
        let principal = Principal {
            id: credential.principal_id.clone(),
            identifier: identifier.clone(),
        };
        state.credentials.insert(identifier, credential);
        info!(identifier = %principal.identifier, principal_id = %principal.id, "identity registered");
        Ok(principal)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, AuthError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AuthError::Unreachable("identity provider offline".into()));
        }
        self.state
            .lock()
            .map_err(|_| AuthError::Unreachable("identity state poisoned".into()))
    }

    fn issue(&self, principal: Principal) -> Session {
        Session {
            principal,
            access_token: Uuid::new_v4().simple().to_string(),
            expires_at: self
                .session_ttl
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_in(&self, identifier: &str, secret: &str) -> Result<Session, AuthError> {
        let identifier = identifier.to_lowercase();
        let mut state = self.lock()?;
        let principal_id = match state.credentials.get(&identifier) {
            Some(credential) if digest(&credential.salt, secret) == credential.digest => {
                credential.principal_id.clone()
            }
            _ => {
                debug!(%identifier, "sign-in rejected");
                return Err(AuthError::InvalidCredentials);
            }
        };
        let session = self.issue(Principal {
            id: principal_id,
            identifier,
        });
        state.session = Some(session.clone());
        state.emit(SessionEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, identifier: &str, secret: &str) -> Result<Principal, AuthError> {
        self.register(identifier, secret)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let mut state = self.lock()?;
        if state.session.take().is_some() {
            state.emit(SessionEvent::SignedOut);
        }
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let mut state = self.lock()?;
        match &state.session {
            Some(session) if !session.is_valid_at(Utc::now()) => {
                debug!(principal_id = %session.principal.id, "session expired");
                state.session = None;
                state.emit(SessionEvent::SignedOut);
                Ok(None)
            }
            session => Ok(session.clone()),
        }
    }

    async fn refresh_session(&self) -> Result<Session, AuthError> {
        let mut state = self.lock()?;
        let principal = match &state.session {
            Some(session) if session.is_valid_at(Utc::now()) => session.principal.clone(),
            _ => return Err(AuthError::NoSession),
        };
        let session = self.issue(principal);
        state.session = Some(session.clone());
        state.emit(SessionEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn delete_identity(&self, principal_id: &str) -> Result<(), AuthError> {
        let mut state = self.lock()?;
        let before = state.credentials.len();
        state
            .credentials
            .retain(|_, credential| credential.principal_id != principal_id);
        if state.credentials.len() < before {
            info!(%principal_id, "identity removed");
        }
        if state
            .session
            .as_ref()
            .is_some_and(|session| session.principal.id == principal_id)
        {
            state.session = None;
            state.emit(SessionEvent::SignedOut);
        }
        Ok(())
    }

    fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self.state.lock() {
            Ok(mut state) => state.subscribers.push(tx),
            // a poisoned provider never emits again; the closed channel says so
            Err(_) => drop(tx),
        }
        rx
    }
}
