//! Turns session transitions into the user/capability snapshot the rest of
//! the client reads from.
//!
//! Every transition gets a sequence number when it is observed. Profile
//! resolutions run concurrently, and a finished resolution is published only
//! if no later transition has been observed since; older ones are dropped.

use crate::session::{SessionManager, Subscription};
use gobet_common::config::IdentityConfig;
use gobet_common::error::AuthError;
use gobet_common::{login_identifier, Capabilities, Session, User};
use gobet_server::{ProfileResolver, Store};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSnapshot {
    /// Sequence number of the transition this snapshot answers.
    pub seq: u64,
    pub session: Option<Session>,
    pub user: Option<User>,
    pub capabilities: Capabilities,
    /// Set when a session was dropped because its profile could not be resolved.
    pub notice: Option<String>,
}

impl SessionSnapshot {
    fn signed_in(seq: u64, session: Session, user: User) -> Self {
        Self {
            seq,
            capabilities: Capabilities::for_user(Some(&user)),
            session: Some(session),
            user: Some(user),
            notice: None,
        }
    }

    fn signed_out(seq: u64, notice: Option<String>) -> Self {
        Self {
            seq,
            notice,
            ..Self::default()
        }
    }
}

/// Cloneable read handle over the current session snapshot. Consumers take
/// it as an explicit argument.
#[derive(Clone)]
pub struct SessionContext {
    state: Arc<watch::Sender<Arc<SessionSnapshot>>>,
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionContext {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Arc::new(SessionSnapshot::default()));
        Self {
            state: Arc::new(state),
        }
    }

    pub fn snapshot(&self) -> Arc<SessionSnapshot> {
        self.state.borrow().clone()
    }

    pub fn current_user(&self) -> Option<User> {
        self.state.borrow().user.clone()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.state.borrow().capabilities
    }

    /// Resolves once the snapshot satisfies `ready`, checking the current one first.
    pub async fn wait_for(
        &self,
        mut ready: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Arc<SessionSnapshot> {
        let mut rx = self.state.subscribe();
        let found = match rx.wait_for(|snapshot| ready(snapshot)).await {
            Ok(snapshot) => Some(Arc::clone(&snapshot)),
            // the sender lives as long as self
            Err(_) => None,
        };
        found.unwrap_or_else(|| self.snapshot())
    }

    /// Replaces the snapshot with one carrying `balance`, when `user_id` is
    /// the signed-in user. Returns whether anything changed.
    pub fn update_balance(&self, user_id: &str, balance: u64) -> bool {
        self.state.send_if_modified(|current| match &current.user {
            Some(user) if user.id == user_id && user.balance != balance => {
                let mut user = user.clone();
                user.balance = balance;
                *current = Arc::new(SessionSnapshot {
                    user: Some(user),
                    ..(**current).clone()
                });
                true
            }
            _ => false,
        })
    }

    #[cfg(test)]
    pub(crate) fn signed_in_as(user: User) -> Self {
        let context = Self::new();
        let session = Session {
            principal: gobet_common::Principal {
                id: user.id.clone(),
                identifier: format!("{}@gobet.local", user.username),
            },
            access_token: "test".into(),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
        };
        context.publish_if_latest(&AtomicU64::new(1), SessionSnapshot::signed_in(1, session, user));
        context
    }

    /// Publishes `next` unless a later transition has been observed.
    fn publish_if_latest(&self, latest: &AtomicU64, next: SessionSnapshot) -> bool {
        self.state.send_if_modified(|current| {
            if latest.load(Ordering::SeqCst) != next.seq || next.seq < current.seq {
                return false;
            }
            *current = Arc::new(next);
            true
        })
    }
}

struct Shared<S: Store> {
    sessions: Arc<SessionManager>,
    resolver: Arc<ProfileResolver<S>>,
    context: SessionContext,
    latest: Arc<AtomicU64>,
}

impl<S: Store> Shared<S> {
    fn next_seq(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn resolve(self: Arc<Self>, seq: u64, session: Option<Session>) {
        let Some(session) = session else {
            let notice = self.context.snapshot().notice.clone();
            self.context
                .publish_if_latest(&self.latest, SessionSnapshot::signed_out(seq, notice));
            return;
        };

        let outcome = self.resolver.resolve_or_provision(&session.principal).await;
        match outcome {
            Ok(user) => {
                let user_id = user.id.clone();
                if self
                    .context
                    .publish_if_latest(&self.latest, SessionSnapshot::signed_in(seq, session, user))
                {
                    info!(seq, %user_id, "session resolved");
                } else {
                    debug!(seq, "discarding stale profile resolution");
                }
            }
            Err(e) => {
                error!(seq, principal_id = %session.principal.id, error = %e, "profile resolution failed, signing out");
                let notice = Some(format!("Sign-in could not be completed: {e}"));
                if self
                    .context
                    .publish_if_latest(&self.latest, SessionSnapshot::signed_out(seq, notice))
                {
                    self.sessions.sign_out().await;
                }
            }
        }
    }
}

/// Owns the session subscription and keeps a [`SessionContext`] current.
pub struct SessionController<S: Store> {
    shared: Arc<Shared<S>>,
    login_domain: String,
    _subscription: Subscription,
    worker: JoinHandle<()>,
}

impl<S: Store> SessionController<S> {
    /// Subscribes to session transitions, then resolves whatever session the
    /// provider already holds.
    pub async fn start(
        sessions: Arc<SessionManager>,
        resolver: Arc<ProfileResolver<S>>,
        identity: &IdentityConfig,
    ) -> Self {
        let shared = Arc::new(Shared {
            sessions,
            resolver,
            context: SessionContext::new(),
            latest: Arc::new(AtomicU64::new(0)),
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<(u64, Option<Session>)>();
        // taken before subscribing so any observed transition supersedes it
        let initial_seq = shared.next_seq();

        let subscription = {
            let latest = shared.latest.clone();
            let tx = tx.clone();
            shared.sessions.on_session_change(move |event| {
                let seq = latest.fetch_add(1, Ordering::SeqCst) + 1;
                let _ = tx.send((seq, event.session().cloned()));
            })
        };

        let worker_shared = shared.clone();
        let worker = tokio::spawn(async move {
            while let Some((seq, session)) = rx.recv().await {
                tokio::spawn(worker_shared.clone().resolve(seq, session));
            }
        });

        let initial = match shared.sessions.current_session().await {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "initial session check failed");
                None
            }
        };
        let _ = tx.send((initial_seq, initial));

        Self {
            shared,
            login_domain: identity.login_domain.clone(),
            _subscription: subscription,
            worker,
        }
    }

    pub fn context(&self) -> SessionContext {
        self.shared.context.clone()
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.shared.sessions
    }

    /// Signs in by username. A rejected attempt changes nothing.
    pub async fn sign_in(&self, username: &str, secret: &str) -> Result<Session, AuthError> {
        let identifier = login_identifier(username, &self.login_domain);
        self.shared.sessions.sign_in(&identifier, secret).await
    }

    /// Clears the user immediately; the provider's transition follows.
    pub async fn logout(&self) {
        let seq = self.shared.next_seq();
        self.shared
            .context
            .publish_if_latest(&self.shared.latest, SessionSnapshot::signed_out(seq, None));
        self.shared.sessions.sign_out().await;
    }
}

impl<S: Store> Drop for SessionController<S> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gobet_common::Role;

    fn user(id: &str, balance: u64) -> User {
        User {
            id: id.into(),
            username: "alice".into(),
            role: Role::User,
            balance,
            created_at: Utc::now(),
        }
    }

    fn session(id: &str) -> Session {
        Session {
            principal: gobet_common::Principal {
                id: id.into(),
                identifier: "alice@gobet.local".into(),
            },
            access_token: "t".into(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn stale_snapshots_are_not_published() {
        let context = SessionContext::new();
        let latest = AtomicU64::new(2);

        assert!(!context.publish_if_latest(
            &latest,
            SessionSnapshot::signed_in(1, session("u1"), user("u1", 5))
        ));
        assert_eq!(context.current_user(), None);

        assert!(context.publish_if_latest(&latest, SessionSnapshot::signed_out(2, None)));
        assert_eq!(context.snapshot().seq, 2);
    }

    #[test]
    fn balance_update_replaces_snapshot() {
        let context = SessionContext::new();
        let latest = AtomicU64::new(1);
        context.publish_if_latest(
            &latest,
            SessionSnapshot::signed_in(1, session("u1"), user("u1", 100)),
        );
        let before = context.snapshot();

        assert!(!context.update_balance("someone-else", 5));
        assert!(context.update_balance("u1", 70));

        let after = context.snapshot();
        assert_eq!(before.user.as_ref().map(|u| u.balance), Some(100));
        assert_eq!(after.user.as_ref().map(|u| u.balance), Some(70));
        assert_eq!(after.capabilities, before.capabilities);
    }

    #[test]
    fn capabilities_are_derived_with_the_user() {
        let snapshot = SessionSnapshot::signed_in(1, session("u1"), user("u1", 0));
        assert!(snapshot.capabilities.can_wager);
        assert!(!snapshot.capabilities.can_manage_accounts);
        assert_eq!(
            SessionSnapshot::signed_out(2, None).capabilities,
            Capabilities::default()
        );
    }
}
