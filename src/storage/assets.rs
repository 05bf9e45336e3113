//! Asset storage on Backblaze B2
//!
//! Entry point for product images, AR models and company logos. Drives
//! authorize → negotiate → upload and hands back a `StoredObjectReference`
//! for the catalog layer to persist.
//!
//! # Per-call state machine
//!
//! ```text
//! Unauthenticated ─▶ Authorizing ─▶ Authenticated ─▶ Negotiating ─▶ Ticketed ─▶ Uploading ─▶ Stored
//!        │                ▲                                                                 │
//!        └────────────────┴──── Failed(AuthExpired), at most once per call ◀────────────────┘
//! ```
//!
//! Any other failure ends the call in `Failed(kind)`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::download::DownloadAuthorizer;
use super::negotiator::{UploadNegotiator, UploadTicket};
use super::session::{AuthorizationContext, SessionAuthorizer, SessionCache};
use super::uploader::ContentUploader;
use super::{
    Credentials, KeyStyle, ObjectKey, ReferenceMode, StorageError, StoredObjectReference,
};
use crate::config::StorageConfig;
use crate::error::AppError;
use crate::metrics::{STORAGE_REAUTHORIZATIONS_TOTAL, UPLOAD_BYTES_TOTAL, UPLOADS_TOTAL};

/// Step of a single `store()` call, used in traces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Unauthenticated,
    Authorizing,
    Authenticated,
    Negotiating,
    Ticketed,
    Uploading,
    Stored,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadPhase::Unauthenticated => "unauthenticated",
            UploadPhase::Authorizing => "authorizing",
            UploadPhase::Authenticated => "authenticated",
            UploadPhase::Negotiating => "negotiating",
            UploadPhase::Ticketed => "ticketed",
            UploadPhase::Uploading => "uploading",
            UploadPhase::Stored => "stored",
        };
        f.write_str(name)
    }
}

/// Asset storage service
///
/// Owns the authorization cache; clone the surrounding `Arc` to share it
/// between request handlers.
pub struct AssetStorage {
    key_id: Option<String>,
    application_key: Option<String>,
    bucket_name: String,
    /// Configured bucket id; skips `b2_list_buckets` for restricted keys
    bucket_id: Option<String>,
    key_style: KeyStyle,
    reference_mode: ReferenceMode,
    authorizer: SessionAuthorizer,
    negotiator: UploadNegotiator,
    uploader: ContentUploader,
    downloads: DownloadAuthorizer,
    sessions: SessionCache,
}

impl AssetStorage {
    /// Create the storage service from configuration.
    ///
    /// Credentials are not checked here; a missing key id or secret is
    /// reported by the first call that needs them.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &StorageConfig) -> Result<Self, AppError> {
        let http_client = super::build_http_client(config.request_timeout())?;
        let retry = config.retry.policy();

        Ok(Self {
            key_id: config.key_id.clone(),
            application_key: config.application_key.clone(),
            bucket_name: config.bucket_name.clone(),
            bucket_id: config
                .bucket_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string),
            key_style: config.key_style,
            reference_mode: config.reference_mode,
            authorizer: SessionAuthorizer::new(
                http_client.clone(),
                &config.service_url,
                retry.clone(),
            ),
            negotiator: UploadNegotiator::new(http_client.clone(), retry.clone()),
            uploader: ContentUploader::new(http_client.clone(), config.upload_timeout()),
            downloads: DownloadAuthorizer::new(http_client, retry),
            sessions: SessionCache::new(),
        })
    }

    pub fn bucket_name(&self) -> &str {
        &self.bucket_name
    }

    pub fn reference_mode(&self) -> ReferenceMode {
        self.reference_mode
    }

    /// Whether an authorization context is currently cached
    pub async fn is_authorized(&self) -> bool {
        self.sessions.current().await.is_some()
    }

    /// Forget the cached authorization context.
    pub async fn reset_session(&self) {
        self.sessions.clear().await;
    }

    /// Upload `data` under a fresh key in `folder`.
    ///
    /// # Arguments
    /// * `data` - File contents; content type and size are checked by the caller
    /// * `file_name` - Original file name, used for the extension
    /// * `content_type` - MIME type sent to the storage service
    /// * `folder` - Logical folder, e.g. "products", "ar-models", "logos"
    ///
    /// # Errors
    /// Any `StorageError` except `AuthExpired`, which is recovered once
    /// internally and surfaces as `AuthFailure` if it repeats.
    pub async fn store(
        &self,
        data: Bytes,
        file_name: &str,
        content_type: &str,
        folder: &str,
    ) -> Result<StoredObjectReference, StorageError> {
        let size = data.len();
        let data = &data;
        let result = self
            .with_session("store", |session| {
                self.store_attempt(session, data, file_name, content_type, folder)
            })
            .await;

        match &result {
            Ok(reference) => {
                UPLOADS_TOTAL.with_label_values(&["success"]).inc();
                UPLOAD_BYTES_TOTAL.inc_by(size as f64);
                tracing::info!(
                    bucket = %self.bucket_name,
                    key = %reference.key(),
                    bytes = size,
                    "Asset stored"
                );
            }
            Err(error) => {
                UPLOADS_TOTAL.with_label_values(&["failure"]).inc();
                tracing::error!(
                    bucket = %self.bucket_name,
                    folder = %folder,
                    kind = error.kind(),
                    %error,
                    "Asset upload failed"
                );
            }
        }

        result
    }

    /// Same as [`store`](Self::store) but gives up after `deadline`.
    ///
    /// The in-flight request is dropped and `Timeout` is returned; nothing is
    /// retried.
    pub async fn store_within(
        &self,
        deadline: Duration,
        data: Bytes,
        file_name: &str,
        content_type: &str,
        folder: &str,
    ) -> Result<StoredObjectReference, StorageError> {
        match tokio::time::timeout(deadline, self.store(data, file_name, content_type, folder))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                UPLOADS_TOTAL.with_label_values(&["timeout"]).inc();
                tracing::warn!(
                    bucket = %self.bucket_name,
                    deadline_ms = deadline.as_millis() as u64,
                    "Asset upload exceeded caller deadline"
                );
                Err(StorageError::Timeout { operation: "store" })
            }
        }
    }

    /// Time-limited download URL for a stored key.
    pub async fn signed_url(
        &self,
        key: &ObjectKey,
        valid_for: Duration,
    ) -> Result<String, StorageError> {
        self.with_session("signed_url", |session| async move {
            let bucket_id = self.bucket_id_for(&session).await?;
            self.downloads
                .signed_url(&session, &self.bucket_name, &bucket_id, key, valid_for)
                .await
        })
        .await
    }

    /// Run `attempt` with a valid session, re-authorizing once on expiry.
    async fn with_session<T, F, Fut>(
        &self,
        operation: &'static str,
        mut attempt: F,
    ) -> Result<T, StorageError>
    where
        F: FnMut(Arc<AuthorizationContext>) -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut reauthorized = false;

        loop {
            let session = self.session().await?;
            match attempt(session.clone()).await {
                Err(StorageError::AuthExpired) => {
                    self.sessions.invalidate(&session).await;
                    if reauthorized {
                        tracing::error!(
                            operation,
                            "Storage authorization expired again right after re-authorizing"
                        );
                        return Err(StorageError::AuthFailure {
                            status: Some(401),
                            message: "authorization expired again after re-authorizing"
                                .to_string(),
                        });
                    }
                    reauthorized = true;
                    STORAGE_REAUTHORIZATIONS_TOTAL.inc();
                    tracing::info!(operation, "Storage authorization expired, re-authorizing");
                }
                other => return other,
            }
        }
    }

    /// Cached context, or a fresh one from the authorizer.
    async fn session(&self) -> Result<Arc<AuthorizationContext>, StorageError> {
        if let Some(session) = self.sessions.current().await {
            return Ok(session);
        }

        trace_phase(UploadPhase::Unauthenticated, &self.bucket_name);
        let credentials = Credentials::from_parts(
            self.key_id.as_deref(),
            self.application_key.as_deref(),
        )?;

        trace_phase(UploadPhase::Authorizing, &self.bucket_name);
        let context = self.authorizer.authorize(&credentials).await?;
        trace_phase(UploadPhase::Authenticated, &self.bucket_name);
        Ok(self.sessions.install(context).await)
    }

    async fn store_attempt(
        &self,
        session: Arc<AuthorizationContext>,
        data: &Bytes,
        file_name: &str,
        content_type: &str,
        folder: &str,
    ) -> Result<StoredObjectReference, StorageError> {
        let key = ObjectKey::generate(folder, file_name, self.key_style);

        trace_phase(UploadPhase::Negotiating, &key);
        let ticket = self
            .ticket(&session)
            .await
            .inspect_err(|error| trace_failure(UploadPhase::Negotiating, &key, error))?;

        trace_phase(UploadPhase::Ticketed, &key);
        trace_phase(UploadPhase::Uploading, &key);
        let confirmation = self
            .uploader
            .upload(ticket, &key, data.clone(), content_type)
            .await
            .inspect_err(|error| trace_failure(UploadPhase::Uploading, &key, error))?;

        trace_phase(UploadPhase::Stored, &key);
        Ok(StoredObjectReference::new(
            &session.download_base_url,
            &self.bucket_name,
            key,
            confirmation.file_id,
            confirmation.content_sha1,
            confirmation.content_length,
        ))
    }

    async fn ticket(&self, session: &AuthorizationContext) -> Result<UploadTicket, StorageError> {
        match &self.bucket_id {
            Some(bucket_id) => {
                self.negotiator
                    .request_ticket(session, &self.bucket_name, bucket_id)
                    .await
            }
            None => self.negotiator.negotiate(session, &self.bucket_name).await,
        }
    }

    async fn bucket_id_for(&self, session: &AuthorizationContext) -> Result<String, StorageError> {
        match &self.bucket_id {
            Some(bucket_id) => Ok(bucket_id.clone()),
            None => {
                self.negotiator
                    .resolve_container(session, &self.bucket_name)
                    .await
            }
        }
    }
}

fn trace_phase(phase: UploadPhase, subject: &dyn fmt::Display) {
    tracing::debug!(%phase, subject = %subject, "Storage phase");
}

fn trace_failure(phase: UploadPhase, key: &ObjectKey, error: &StorageError) {
    if matches!(error, StorageError::AuthExpired) {
        tracing::debug!(%phase, key = %key, "Storage token expired");
    } else {
        tracing::warn!(%phase, key = %key, kind = error.kind(), %error, "Storage step failed");
    }
}
