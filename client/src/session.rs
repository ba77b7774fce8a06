use gobet_common::error::AuthError;
use gobet_common::{Session, SessionEvent};
use gobet_server::IdentityProvider;
use std::sync::{Arc, Mutex, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

#[derive(Default)]
struct Handlers {
    next_id: u64,
    entries: Vec<(u64, Handler)>,
}

/// Wraps the identity provider and fans its session transitions out to
/// registered handlers, one event at a time in emission order.
pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    handlers: Arc<Mutex<Handlers>>,
    pump: JoinHandle<()>,
}

impl SessionManager {
    /// Must be called inside a tokio runtime.
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        let handlers = Arc::new(Mutex::new(Handlers::default()));
        let mut events = provider.subscribe();
        let pump_handlers = handlers.clone();

        let pump = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                // snapshot so handlers may (un)subscribe while being called
                let current: Vec<Handler> = pump_handlers
                    .lock()
                    .map(|handlers| handlers.entries.iter().map(|(_, h)| h.clone()).collect())
                    .unwrap_or_default();
                debug!(?event, handlers = current.len(), "dispatching session event");
                for handler in current {
                    handler(&event);
                }
            }
            debug!("identity provider closed its event stream");
        });

        Self {
            provider,
            handlers,
            pump,
        }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    pub async fn sign_in(&self, identifier: &str, secret: &str) -> Result<Session, AuthError> {
        self.provider.sign_in(identifier, secret).await
    }

    /// Always succeeds locally. Callers clear their own profile state.
    pub async fn sign_out(&self) {
        if let Err(e) = self.provider.sign_out().await {
            warn!(error = %e, "provider sign-out failed, session dropped locally");
        }
    }

    pub async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        self.provider.current_session().await
    }

    pub fn on_session_change(
        &self,
        handler: impl Fn(&SessionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = match self.handlers.lock() {
            Ok(mut handlers) => {
                handlers.next_id += 1;
                let id = handlers.next_id;
                handlers.entries.push((id, Arc::new(handler)));
                id
            }
            Err(_) => 0,
        };
        Subscription {
            id,
            handlers: Arc::downgrade(&self.handlers),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// Keeps a handler registered until unsubscribed or dropped.
#[must_use = "dropping a subscription unregisters its handler"]
pub struct Subscription {
    id: u64,
    handlers: Weak<Mutex<Handlers>>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(handlers) = self.handlers.upgrade() {
            if let Ok(mut handlers) = handlers.lock() {
                handlers.entries.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gobet_common::config::IdentityConfig;
    use gobet_server::MemoryIdentityProvider;
    use tokio::sync::mpsc;

    fn provider() -> Arc<MemoryIdentityProvider> {
        let provider = Arc::new(MemoryIdentityProvider::new(&IdentityConfig::default()));
        provider.register("alice@gobet.local", "pw").unwrap();
        provider
    }

    #[tokio::test]
    async fn handlers_see_transitions_in_order() {
        let manager = SessionManager::new(provider());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = manager.on_session_change(move |event| {
            let _ = tx.send(event.clone());
        });

        let session = manager.sign_in("alice@gobet.local", "pw").await.unwrap();
        manager.sign_out().await;
        let again = manager.sign_in("alice@gobet.local", "pw").await.unwrap();

        assert_eq!(rx.recv().await, Some(SessionEvent::SignedIn(session)));
        assert_eq!(rx.recv().await, Some(SessionEvent::SignedOut));
        assert_eq!(rx.recv().await, Some(SessionEvent::SignedIn(again)));
    }

    #[tokio::test]
    async fn unsubscribed_handler_is_not_called() {
        let manager = SessionManager::new(provider());
        let (kept_tx, mut kept) = mpsc::unbounded_channel();
        let (gone_tx, mut gone) = mpsc::unbounded_channel();
        let _kept = manager.on_session_change(move |event| {
            let _ = kept_tx.send(event.clone());
        });
        let removed = manager.on_session_change(move |event| {
            let _ = gone_tx.send(event.clone());
        });
        removed.unsubscribe();

        manager.sign_in("alice@gobet.local", "pw").await.unwrap();
        assert!(kept.recv().await.is_some());
        // the dropped handler took its sender with it
        assert_eq!(gone.recv().await, None);
    }

    #[tokio::test]
    async fn bad_credentials_emit_nothing() {
        let manager = SessionManager::new(provider());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _subscription = manager.on_session_change(move |event| {
            let _ = tx.send(event.clone());
        });

        assert_eq!(
            manager.sign_in("alice@gobet.local", "nope").await,
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(manager.current_session().await.unwrap(), None);
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }
}
