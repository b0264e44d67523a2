use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::{ApiRequest, ApiResponse, Transport};
use crate::auth::CredentialStore;
use crate::error::{Error, Result};
use crate::refresh::{RefreshCoordinator, RefreshOutcome};

/// Sends authenticated requests, recovering from one 401 per request by
/// refreshing the credential and retrying once.
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    coordinator: RefreshCoordinator,
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            transport,
            store,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Executes `request` and returns the 2xx response.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        if !request.is_authenticated() {
            return self.transport.send(&request, None).await?.error_for_status();
        }

        let attached = match self.store.access_token() {
            Some(token) => token,
            None => return Err(Error::SessionExpired),
        };
        let resp = self.transport.send(&request, Some(&attached)).await?;
        if !resp.is_unauthorized() {
            return resp.error_for_status();
        }

        let retry_token = match self.store.access_token() {
            Some(current) if current != attached => {
                debug!(path = %request.path, "retrying with credential refreshed elsewhere");
                current
            }
            _ => match self.coordinator.refresh(Some(&attached)).await {
                RefreshOutcome::Success(credential) => credential.access_token,
                RefreshOutcome::Failure(err) => return Err(err),
                RefreshOutcome::SessionExpired => return Err(Error::SessionExpired),
            },
        };

        let resp = self.transport.send(&request, Some(&retry_token)).await?;
        if resp.is_unauthorized() {
            warn!(path = %request.path, "request still unauthorized after refresh");
            return Err(Error::AuthFailure(
                "request rejected again after credential refresh".into(),
            ));
        }
        resp.error_for_status()
    }
}
