//! Single-flight credential refresh.
//!
//! The first caller that needs a refresh spawns the network call on its own
//! task; everyone arriving while it runs attaches to the same outcome. The
//! spawned task is owned by the coordinator, so dropping any one waiter never
//! aborts a refresh the other waiters depend on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::auth::{AuthApi, Credential, CredentialStore};
use crate::error::{Error, Result};

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success(Credential),
    /// Transient failure. The credential is left in place.
    Failure(Error),
    SessionExpired,
}

/// Broadcast once per expired session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionExpired {
    pub reason: String,
}

type InFlight = watch::Receiver<Option<RefreshOutcome>>;

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn CredentialStore>,
    auth: Arc<dyn AuthApi>,
    in_flight: Mutex<Option<InFlight>>,
    expired: AtomicBool,
    events: broadcast::Sender<SessionExpired>,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<dyn CredentialStore>, auth: Arc<dyn AuthApi>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                store,
                auth,
                in_flight: Mutex::new(None),
                expired: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionExpired> {
        self.inner.events.subscribe()
    }

    /// Installs a credential obtained by signing in and re-arms the expiry
    /// broadcast for the new session.
    pub fn install(&self, credential: Credential) {
        let _slot = self.inner.in_flight.lock();
        self.inner.store.replace(credential);
        self.inner.expired.store(false, Ordering::SeqCst);
    }

    /// Ends the session without broadcasting an expiry.
    pub fn sign_out(&self) {
        let _slot = self.inner.in_flight.lock();
        self.inner.store.clear();
        self.inner.expired.store(true, Ordering::SeqCst);
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.in_flight.lock().is_some()
    }

    /// Obtains a fresh credential after `failed_access_token` was rejected.
    ///
    /// If the store already holds a different access token, that credential is
    /// returned without a network call. Passing `None` forces a refresh of
    /// whatever is current.
    pub async fn refresh(&self, failed_access_token: Option<&str>) -> RefreshOutcome {
        let mut rx = {
            let mut slot = self.inner.in_flight.lock();
            let current = match self.inner.store.current() {
                Some(current) => current,
                None => return self.inner.expire("no credential available"),
            };
            if let Some(failed) = failed_access_token {
                if current.access_token != failed {
                    debug!("credential already refreshed by another request");
                    return RefreshOutcome::Success(current);
                }
            }
            match slot.as_ref() {
                Some(rx) => {
                    debug!("joining in-flight credential refresh");
                    rx.clone()
                }
                None => {
                    if !current.can_refresh() {
                        return self.inner.expire("no refresh token available");
                    }
                    let rx = self.start(current);
                    *slot = Some(rx.clone());
                    rx
                }
            }
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(outcome) => match &*outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    RefreshOutcome::Failure(Error::Network("refresh produced no outcome".into()))
                }
            },
            Err(_) => RefreshOutcome::Failure(Error::Network("refresh task ended early".into())),
        };
        outcome
    }

    fn start(&self, current: Credential) -> InFlight {
        let (tx, rx) = watch::channel(None);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            info!("refreshing access credential");
            let result = inner.auth.refresh(&current).await;
            let outcome = {
                let mut slot = inner.in_flight.lock();
                let outcome = inner.settle(&current, result);
                slot.take();
                outcome
            };
            let _ = tx.send(Some(outcome));
        });
        rx
    }
}

impl Inner {
    /// Applies a finished refresh. Runs under the in-flight lock so sign-in and
    /// sign-out cannot interleave with the store update. The result only
    /// counts if the store still holds the credential that was refreshed.
    fn settle(&self, attempted: &Credential, result: Result<Credential>) -> RefreshOutcome {
        match self.store.current() {
            Some(live) if live.access_token == attempted.access_token => {}
            Some(live) => {
                debug!("session changed while refreshing, keeping newer credential");
                return RefreshOutcome::Success(live);
            }
            None => return RefreshOutcome::SessionExpired,
        }

        match result {
            Ok(fresh) => {
                self.store.replace(fresh.clone());
                debug!("credential refresh succeeded");
                RefreshOutcome::Success(fresh)
            }
            Err(Error::AuthFailure(reason)) => self.expire(&reason),
            Err(err) => {
                warn!(error = %err, "credential refresh failed");
                RefreshOutcome::Failure(err)
            }
        }
    }

    fn expire(&self, reason: &str) -> RefreshOutcome {
        self.store.clear();
        if !self.expired.swap(true, Ordering::SeqCst) {
            warn!(reason, "session expired");
            let _ = self.events.send(SessionExpired {
                reason: reason.to_string(),
            });
        }
        RefreshOutcome::SessionExpired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryCredentialStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingAuth {
        calls: AtomicUsize,
        delay: Duration,
        result: Result<Credential>,
    }

    impl CountingAuth {
        fn new(result: Result<Credential>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                result,
            })
        }
    }

    #[async_trait]
    impl AuthApi for CountingAuth {
        async fn login(&self, _username: &str, _password: &str) -> Result<Credential> {
            self.result.clone()
        }

        async fn refresh(&self, _current: &Credential) -> Result<Credential> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.result.clone()
        }
    }

    fn coordinator(
        credential: Option<Credential>,
        auth: Arc<CountingAuth>,
    ) -> (RefreshCoordinator, Arc<MemoryCredentialStore>) {
        let store = Arc::new(match credential {
            Some(credential) => MemoryCredentialStore::with_credential(credential),
            None => MemoryCredentialStore::new(),
        });
        (RefreshCoordinator::new(store.clone(), auth), store)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_callers_share_one_refresh() {
        let auth = CountingAuth::new(Ok(Credential::new("b", "rb")));
        let (coordinator, store) = coordinator(Some(Credential::new("a", "ra")), auth.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(
                async move { coordinator.refresh(Some("a")).await },
            ));
        }
        for handle in handles {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome, RefreshOutcome::Success(Credential::new("b", "rb")));
        }
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.current().unwrap().access_token, "b");
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn stale_token_returns_current_without_network() {
        let auth = CountingAuth::new(Ok(Credential::new("c", "rc")));
        let (coordinator, _store) = coordinator(Some(Credential::new("b", "rb")), auth.clone());
        let outcome = coordinator.refresh(Some("a")).await;
        assert_eq!(outcome, RefreshOutcome::Success(Credential::new("b", "rb")));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejected_refresh_expires_session_once() {
        let auth = CountingAuth::new(Err(Error::AuthFailure("revoked".into())));
        let (coordinator, store) = coordinator(Some(Credential::new("a", "ra")), auth.clone());
        let mut events = coordinator.subscribe();

        let (first, second) = tokio::join!(
            coordinator.refresh(Some("a")),
            coordinator.refresh(Some("a"))
        );
        assert_eq!(first, RefreshOutcome::SessionExpired);
        assert_eq!(second, RefreshOutcome::SessionExpired);
        assert!(store.current().is_none());

        // Later failures after expiry do not broadcast again.
        assert_eq!(coordinator.refresh(Some("a")).await, RefreshOutcome::SessionExpired);
        assert_eq!(events.recv().await.unwrap().reason, "revoked");
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failure_keeps_credential() {
        let auth = CountingAuth::new(Err(Error::Network("timeout".into())));
        let (coordinator, store) = coordinator(Some(Credential::new("a", "ra")), auth);
        let mut events = coordinator.subscribe();
        let outcome = coordinator.refresh(Some("a")).await;
        assert_eq!(outcome, RefreshOutcome::Failure(Error::Network("timeout".into())));
        assert_eq!(store.current().unwrap().access_token, "a");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_refresh_token_expires_without_network() {
        let auth = CountingAuth::new(Ok(Credential::new("b", "rb")));
        let (coordinator, _store) = coordinator(Some(Credential::new("a", "")), auth.clone());
        let mut events = coordinator.subscribe();
        assert_eq!(coordinator.refresh(Some("a")).await, RefreshOutcome::SessionExpired);
        assert!(events.try_recv().is_ok());
        assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn install_rearms_expiry_broadcast() {
        let auth = CountingAuth::new(Err(Error::AuthFailure("revoked".into())));
        let (coordinator, _store) = coordinator(Some(Credential::new("a", "ra")), auth);
        let mut events = coordinator.subscribe();

        coordinator.refresh(Some("a")).await;
        coordinator.install(Credential::new("x", "rx"));
        coordinator.refresh(Some("x")).await;

        assert!(events.recv().await.is_ok());
        assert!(events.recv().await.is_ok());
    }

    #[tokio::test]
    async fn sign_in_during_rejected_refresh_keeps_new_session() {
        let auth = CountingAuth::new(Err(Error::AuthFailure("revoked".into())));
        let (coordinator, store) = coordinator(Some(Credential::new("a", "ra")), auth.clone());
        let mut events = coordinator.subscribe();

        let pending = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh(Some("a")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.is_refreshing());
        coordinator.install(Credential::new("x", "rx"));

        let outcome = pending.await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Success(Credential::new("x", "rx")));
        assert_eq!(store.current().unwrap().access_token, "x");
        assert!(events.try_recv().is_err());
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancelled_waiter_does_not_abort_refresh() {
        let auth = CountingAuth::new(Ok(Credential::new("b", "rb")));
        let (coordinator, store) = coordinator(Some(Credential::new("a", "ra")), auth.clone());

        let abandoned = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.refresh(Some("a")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        abandoned.abort();

        let outcome = coordinator.refresh(Some("a")).await;
        assert_eq!(outcome, RefreshOutcome::Success(Credential::new("b", "rb")));
        assert_eq!(store.current().unwrap().access_token, "b");
        assert_eq!(auth.calls.load(Ordering::SeqCst), 1);
    }
}
