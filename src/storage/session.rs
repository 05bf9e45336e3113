//! Account authorization and the shared session cache
//!
//! The key pair is exchanged for a short-lived `AuthorizationContext`.
//! The context has no expiry the server tells us about; it is dropped from
//! the cache as soon as any call reports an expired token.

use std::fmt;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::retry::RetryPolicy;
use super::wire::{ApiFailure, AuthorizeAccountResponse};
use super::{Credentials, StorageError};
use crate::metrics::{STORAGE_AUTHORIZATIONS_TOTAL, STORAGE_REQUEST_DURATION_SECONDS};

const AUTHORIZE_OPERATION: &str = "b2_authorize_account";

/// Short-lived credential bundle returned by `b2_authorize_account`
#[derive(Clone, PartialEq, Eq)]
pub struct AuthorizationContext {
    pub token: String,
    /// Base URL for control-plane calls
    pub api_base_url: String,
    /// Base URL for `/file/<bucket>/<key>` downloads
    pub download_base_url: String,
    pub account_id: String,
}

impl fmt::Debug for AuthorizationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizationContext")
            .field("token", &"<redacted>")
            .field("api_base_url", &self.api_base_url)
            .field("download_base_url", &self.download_base_url)
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Exchanges the key pair for an `AuthorizationContext`
#[derive(Clone)]
pub struct SessionAuthorizer {
    http_client: reqwest::Client,
    /// Service root, e.g. "https://api.backblazeb2.com"
    service_url: String,
    retry: RetryPolicy,
}

impl SessionAuthorizer {
    pub fn new(http_client: reqwest::Client, service_url: &str, retry: RetryPolicy) -> Self {
        Self {
            http_client,
            service_url: service_url.trim_end_matches('/').to_string(),
            retry,
        }
    }

    /// Authorize the account.
    ///
    /// Rejected credentials fail immediately with `AuthFailure`. Outages are
    /// retried with backoff and, once attempts run out, also reported as
    /// `AuthFailure` carrying the last status or network error.
    pub async fn authorize(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthorizationContext, StorageError> {
        let result = self
            .retry
            .run(AUTHORIZE_OPERATION, || self.authorize_once(credentials))
            .await;

        let result = match result {
            Err(StorageError::ServiceUnavailable {
                status, message, ..
            }) => Err(StorageError::AuthFailure {
                status: Some(status),
                message,
            }),
            Err(StorageError::Transport { message, .. }) => Err(StorageError::AuthFailure {
                status: None,
                message,
            }),
            other => other,
        };

        match &result {
            Ok(context) => {
                STORAGE_AUTHORIZATIONS_TOTAL
                    .with_label_values(&["success"])
                    .inc();
                tracing::info!(
                    key_id = %credentials.key_id(),
                    api_url = %context.api_base_url,
                    "Storage account authorized"
                );
            }
            Err(error) => {
                STORAGE_AUTHORIZATIONS_TOTAL
                    .with_label_values(&["failure"])
                    .inc();
                tracing::error!(
                    key_id = %credentials.key_id(),
                    kind = error.kind(),
                    %error,
                    "Storage account authorization failed"
                );
            }
        }

        result
    }

    async fn authorize_once(
        &self,
        credentials: &Credentials,
    ) -> Result<AuthorizationContext, StorageError> {
        let _timer = STORAGE_REQUEST_DURATION_SECONDS
            .with_label_values(&[AUTHORIZE_OPERATION])
            .start_timer();

        let url = format!("{}/b2api/v2/{}", self.service_url, AUTHORIZE_OPERATION);
        let response = self
            .http_client
            .get(&url)
            .header(http::header::AUTHORIZATION, credentials.basic_auth_header())
            .send()
            .await
            .map_err(|e| StorageError::from_transport(AUTHORIZE_OPERATION, e))?;

        if !response.status().is_success() {
            let failure = ApiFailure::from_response(response).await;
            if failure.is_transient() {
                return Err(StorageError::ServiceUnavailable {
                    operation: AUTHORIZE_OPERATION,
                    status: failure.status.as_u16(),
                    message: failure.detail(),
                });
            }
            return Err(StorageError::AuthFailure {
                status: Some(failure.status.as_u16()),
                message: failure.detail(),
            });
        }

        let body: AuthorizeAccountResponse =
            response
                .json()
                .await
                .map_err(|e| StorageError::InvalidResponse {
                    operation: AUTHORIZE_OPERATION,
                    message: e.without_url().to_string(),
                })?;

        Ok(AuthorizationContext {
            token: body.authorization_token,
            api_base_url: body.api_url,
            download_base_url: body.download_url,
            account_id: body.account_id,
        })
    }
}

/// Slot holding the current authorization context
///
/// Readers get a cloned `Arc`; writers replace the whole slot, so a reader
/// never sees a half-updated context.
#[derive(Default)]
pub struct SessionCache {
    slot: RwLock<Option<Arc<AuthorizationContext>>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Option<Arc<AuthorizationContext>> {
        self.slot.read().await.clone()
    }

    /// Replace the cached context and return the shared handle to it.
    pub async fn install(&self, context: AuthorizationContext) -> Arc<AuthorizationContext> {
        let context = Arc::new(context);
        *self.slot.write().await = Some(context.clone());
        context
    }

    /// Drop `stale` from the cache.
    ///
    /// Returns false when the slot already holds a different context, which
    /// happens when a concurrent caller re-authorized first.
    pub async fn invalidate(&self, stale: &Arc<AuthorizationContext>) -> bool {
        let mut slot = self.slot.write().await;
        match slot.as_ref() {
            Some(current) if Arc::ptr_eq(current, stale) => {
                *slot = None;
                tracing::debug!("Invalidated cached storage authorization");
                true
            }
            _ => false,
        }
    }

    pub async fn clear(&self) {
        *self.slot.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(token: &str) -> AuthorizationContext {
        AuthorizationContext {
            token: token.to_string(),
            api_base_url: "https://api005.backblazeb2.com".to_string(),
            download_base_url: "https://f005.backblazeb2.com".to_string(),
            account_id: "acct".to_string(),
        }
    }

    #[test]
    fn debug_redacts_token() {
        let printed = format!("{:?}", context("4_secret_token"));
        assert!(!printed.contains("4_secret_token"));
        assert!(printed.contains("api005"));
    }

    #[tokio::test]
    async fn install_then_read_returns_same_context() {
        let cache = SessionCache::new();
        assert!(cache.current().await.is_none());

        let installed = cache.install(context("t1")).await;
        let current = cache.current().await.expect("context cached");
        assert!(Arc::ptr_eq(&installed, &current));
    }

    #[tokio::test]
    async fn invalidate_only_clears_matching_context() {
        let cache = SessionCache::new();
        let first = cache.install(context("t1")).await;
        let second = cache.install(context("t2")).await;

        // A caller still holding the first context must not evict the second.
        assert!(!cache.invalidate(&first).await);
        assert_eq!(cache.current().await.unwrap().token, "t2");

        assert!(cache.invalidate(&second).await);
        assert!(cache.current().await.is_none());
    }

    #[tokio::test]
    async fn clear_empties_slot() {
        let cache = SessionCache::new();
        cache.install(context("t1")).await;
        cache.clear().await;
        assert!(cache.current().await.is_none());
    }
}
