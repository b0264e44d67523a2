use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::info;

use crate::auth::{AuthApi, Credential, CredentialStore};
use crate::error::Result;
use crate::model::UserId;
use crate::refresh::{RefreshCoordinator, SessionExpired};

/// Sign-in, resume and sign-out for the single active session.
pub struct Manager {
    store: Arc<dyn CredentialStore>,
    auth: Arc<dyn AuthApi>,
    coordinator: RefreshCoordinator,
    user: RwLock<Option<UserId>>,
}

impl Manager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        auth: Arc<dyn AuthApi>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            store,
            auth,
            coordinator,
            user: RwLock::new(None),
        }
    }

    pub async fn sign_in(&self, username: &str, password: &str) -> Result<UserId> {
        let credential = self.auth.login(username, password).await?;
        let user = UserId::from(username.trim());
        self.resume(user.clone(), credential);
        info!(user = %user, "signed in");
        Ok(user)
    }

    /// Installs a credential obtained elsewhere (e.g. restored at startup).
    pub fn resume(&self, user: UserId, credential: Credential) {
        self.coordinator.install(credential);
        *self.user.write() = Some(user);
    }

    pub fn sign_out(&self) {
        self.coordinator.sign_out();
        self.user.write().take();
    }

    pub fn is_signed_in(&self) -> bool {
        self.store.current().is_some()
    }

    pub fn active_user(&self) -> Option<UserId> {
        self.user.read().clone()
    }

    pub fn subscribe_expired(&self) -> broadcast::Receiver<SessionExpired> {
        self.coordinator.subscribe()
    }
}
