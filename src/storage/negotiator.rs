//! Upload endpoint negotiation
//!
//! Resolves a bucket name to its id with an exact-name `b2_list_buckets`
//! query, then asks for a single-use upload URL. A restricted key that may
//! not list buckets gets `InsufficientPermission` straight away; nothing is
//! guessed and nothing is retried.

use super::retry::RetryPolicy;
use super::session::AuthorizationContext;
use super::wire::{
    GetUploadUrlRequest, GetUploadUrlResponse, ListBucketsRequest, ListBucketsResponse, call_api,
    control_plane_error,
};
use super::StorageError;

const LIST_BUCKETS: &str = "b2_list_buckets";
const GET_UPLOAD_URL: &str = "b2_get_upload_url";

/// Single-use upload endpoint
///
/// Consumed by value by the uploader and never cached.
pub struct UploadTicket {
    pub container_id: String,
    pub upload_url: String,
    pub upload_auth_token: String,
}

impl std::fmt::Debug for UploadTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTicket")
            .field("container_id", &self.container_id)
            .field("upload_url", &self.upload_url)
            .field("upload_auth_token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct UploadNegotiator {
    http_client: reqwest::Client,
    retry: RetryPolicy,
}

impl UploadNegotiator {
    pub fn new(http_client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { http_client, retry }
    }

    /// Resolve `container_name` and request an upload ticket for it.
    pub async fn negotiate(
        &self,
        context: &AuthorizationContext,
        container_name: &str,
    ) -> Result<UploadTicket, StorageError> {
        let container_id = self.resolve_container(context, container_name).await?;
        self.request_ticket(context, container_name, &container_id)
            .await
    }

    /// Look up the bucket id for an exact bucket name.
    pub async fn resolve_container(
        &self,
        context: &AuthorizationContext,
        container_name: &str,
    ) -> Result<String, StorageError> {
        let request = ListBucketsRequest {
            account_id: &context.account_id,
            bucket_name: container_name,
        };

        let listing: ListBucketsResponse = self
            .retry
            .run(LIST_BUCKETS, || async {
                call_api(
                    &self.http_client,
                    &context.api_base_url,
                    &context.token,
                    LIST_BUCKETS,
                    &request,
                )
                .await?
                .map_err(|failure| {
                    control_plane_error(failure, LIST_BUCKETS, container_name, "listBuckets")
                })
            })
            .await?;

        let bucket = listing
            .buckets
            .into_iter()
            .find(|bucket| bucket.bucket_name == container_name)
            .ok_or_else(|| StorageError::ContainerNotFound {
                container: container_name.to_string(),
            })?;

        tracing::debug!(
            bucket = %container_name,
            bucket_id = %bucket.bucket_id,
            "Resolved bucket id"
        );
        Ok(bucket.bucket_id)
    }

    /// Request a fresh upload URL for an already known bucket id.
    pub async fn request_ticket(
        &self,
        context: &AuthorizationContext,
        container_name: &str,
        container_id: &str,
    ) -> Result<UploadTicket, StorageError> {
        let request = GetUploadUrlRequest {
            bucket_id: container_id,
        };

        let response: GetUploadUrlResponse = self
            .retry
            .run(GET_UPLOAD_URL, || async {
                call_api(
                    &self.http_client,
                    &context.api_base_url,
                    &context.token,
                    GET_UPLOAD_URL,
                    &request,
                )
                .await?
                .map_err(|failure| {
                    control_plane_error(failure, GET_UPLOAD_URL, container_name, "writeFiles")
                })
            })
            .await?;

        Ok(UploadTicket {
            container_id: response.bucket_id,
            upload_url: response.upload_url,
            upload_auth_token: response.authorization_token,
        })
    }
}
