//! Travis CI webhook routing.
//!
//! The raw `payload` string is verified against a freshly fetched key before
//! any field of it is trusted. Once verified, the caller always gets a success
//! envelope, whether or not the build triggered a deploy.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::actions::{deploy_and_report, ActionInvoker};
use crate::envelope::ResponseEnvelope;
use crate::error::DispatchError;
use crate::keys::{ProviderVariant, PublicKeySource};
use crate::request::{peek_build_url, BuildState, CiBuildEvent, InboundRequest};
use crate::signature::verify_signature;

/// Header carrying the base64 payload signature.
pub const SIGNATURE_HEADER: &str = "Signature";

/// Which verified builds trigger a deploy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildFilter {
    /// Repository owner that must match exactly.
    pub owner: String,
    /// Repository name that must match exactly.
    pub repository: String,
    /// Only deploy builds whose state is `passed`.
    pub require_passed: bool,
    /// Only deploy builds of this branch, when set.
    pub branch: Option<String>,
}

impl BuildFilter {
    /// Whether `event` should trigger a deploy.
    #[must_use]
    pub fn matches(&self, event: &CiBuildEvent) -> bool {
        event.owner_name == self.owner
            && event.repository_name == self.repository
            && (!self.require_passed || event.state == BuildState::Passed)
            && self
                .branch
                .as_deref()
                .map_or(true, |branch| event.branch == branch)
    }
}

/// What a verified notification led to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiOutcome {
    /// The build matched the filter and a deploy ran.
    Deployed,
    /// The build was logged and ignored.
    Ignored,
}

/// Routes Travis CI build notifications.
pub struct CiRouter {
    filter: BuildFilter,
    default_provider: ProviderVariant,
    keys: Arc<dyn PublicKeySource>,
    actions: Arc<dyn ActionInvoker>,
}

impl CiRouter {
    /// Create a router with its collaborators.
    #[must_use]
    pub fn new(
        filter: BuildFilter,
        default_provider: ProviderVariant,
        keys: Arc<dyn PublicKeySource>,
        actions: Arc<dyn ActionInvoker>,
    ) -> Self {
        Self {
            filter,
            default_provider,
            keys,
            actions,
        }
    }

    /// Handle one invocation. Warm-up invocations produce no response at all.
    pub async fn handle(&self, request: &InboundRequest) -> Option<ResponseEnvelope> {
        if request.is_warmup() {
            debug!("Skipping scheduled warm-up invocation");
            return None;
        }

        let envelope = match self.process(request).await {
            Ok(_) => ResponseEnvelope::success(&json!({ "status": "OK" })),
            Err(e) => ResponseEnvelope::failure(&e),
        };
        Some(envelope)
    }

    /// Authenticate and act on a (non warm-up) request.
    pub async fn process(&self, request: &InboundRequest) -> Result<CiOutcome, DispatchError> {
        let form = request.form();
        let Some(payload) = form.get("payload") else {
            warn!("Travis CI request without payload");
            return Err(DispatchError::MalformedRequest);
        };
        let Some(signature) = request.header(SIGNATURE_HEADER) else {
            warn!("Travis CI request without Signature header");
            return Err(DispatchError::Unauthorized);
        };

        let variant = self.provider_for(payload);

        let public_key = self.keys.fetch(variant).await.map_err(|e| {
            error!(provider = variant.as_str(), error = %e, "Failed to retrieve Travis CI public key");
            DispatchError::from(&e)
        })?;

        verify_signature(&public_key, payload.as_bytes(), signature).map_err(|e| {
            warn!(provider = variant.as_str(), "Travis CI signature verification failed");
            DispatchError::from(e)
        })?;

        let event = CiBuildEvent::from_payload(payload)
            .inspect_err(|_| warn!("Verified Travis CI payload could not be decoded"))?;

        info!(
            build = %event.build_number,
            branch = %event.branch,
            owner = %event.owner_name,
            repository = %event.repository_name,
            state = %event.state,
            "Authorized request received from Travis CI"
        );

        if !self.filter.matches(&event) {
            info!(
                build = %event.build_number,
                owner = %event.owner_name,
                repository = %event.repository_name,
                state = %event.state,
                "Event ignored"
            );
            return Ok(CiOutcome::Ignored);
        }

        // Deploy and alert complete before Travis gets its answer.
        let trigger = format!(
            "Travis CI build #{} of {}/{}@{}",
            event.build_number, event.owner_name, event.repository_name, event.branch
        );
        deploy_and_report(Arc::clone(&self.actions), trigger).await;

        Ok(CiOutcome::Deployed)
    }

    fn provider_for(&self, payload: &str) -> ProviderVariant {
        match peek_build_url(payload).as_deref().and_then(ProviderVariant::from_build_url) {
            Some(variant) => variant,
            None => {
                warn!(
                    default = self.default_provider.as_str(),
                    "The build url is unknown, using default Travis CI provider"
                );
                self.default_provider
            }
        }
    }
}
