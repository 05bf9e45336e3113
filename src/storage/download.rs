//! Download authorization for private buckets
//!
//! Deployments that persist bare keys turn them into time-limited URLs with
//! `b2_get_download_authorization`.

use std::time::Duration;

use super::retry::RetryPolicy;
use super::session::AuthorizationContext;
use super::wire::{
    GetDownloadAuthorizationRequest, GetDownloadAuthorizationResponse, call_api,
    control_plane_error,
};
use super::{ObjectKey, StorageError};

const GET_DOWNLOAD_AUTHORIZATION: &str = "b2_get_download_authorization";

/// Shortest validity B2 accepts
pub const MIN_SIGNED_URL_VALIDITY: Duration = Duration::from_secs(1);
/// Longest validity B2 accepts (one week)
pub const MAX_SIGNED_URL_VALIDITY: Duration = Duration::from_secs(604_800);

#[derive(Clone)]
pub struct DownloadAuthorizer {
    http_client: reqwest::Client,
    retry: RetryPolicy,
}

impl DownloadAuthorizer {
    pub fn new(http_client: reqwest::Client, retry: RetryPolicy) -> Self {
        Self { http_client, retry }
    }

    /// Build a URL granting read access to `key` for `valid_for`.
    ///
    /// `valid_for` is clamped to what the service accepts.
    pub async fn signed_url(
        &self,
        context: &AuthorizationContext,
        container_name: &str,
        container_id: &str,
        key: &ObjectKey,
        valid_for: Duration,
    ) -> Result<String, StorageError> {
        let valid_for = valid_for.clamp(MIN_SIGNED_URL_VALIDITY, MAX_SIGNED_URL_VALIDITY);
        let request = GetDownloadAuthorizationRequest {
            bucket_id: container_id,
            file_name_prefix: key.as_str(),
            valid_duration_in_seconds: valid_for.as_secs(),
        };

        let response: GetDownloadAuthorizationResponse = self
            .retry
            .run(GET_DOWNLOAD_AUTHORIZATION, || async {
                call_api(
                    &self.http_client,
                    &context.api_base_url,
                    &context.token,
                    GET_DOWNLOAD_AUTHORIZATION,
                    &request,
                )
                .await?
                .map_err(|failure| {
                    control_plane_error(
                        failure,
                        GET_DOWNLOAD_AUTHORIZATION,
                        container_name,
                        "shareFiles",
                    )
                })
            })
            .await?;

        Ok(format!(
            "{}/file/{}/{}?Authorization={}",
            context.download_base_url.trim_end_matches('/'),
            container_name,
            key.url_encoded(),
            urlencoding::encode(&response.authorization_token)
        ))
    }
}
