//! B2 native API wire types
//!
//! Request and response bodies for the handful of `b2api/v2` calls the
//! upload pipeline makes, plus decoding of the JSON error envelope.

use http::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::StorageError;
use crate::metrics::STORAGE_REQUEST_DURATION_SECONDS;

/// Error codes B2 returns with 401 when the token itself is stale.
const EXPIRED_TOKEN_CODES: [&str; 2] = ["expired_auth_token", "bad_auth_token"];

/// Upper bound on remote error text kept in errors and logs.
const MAX_ERROR_MESSAGE_LEN: usize = 512;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AuthorizeAccountResponse {
    pub account_id: String,
    pub authorization_token: String,
    pub api_url: String,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListBucketsRequest<'a> {
    pub account_id: &'a str,
    pub bucket_name: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListBucketsResponse {
    pub buckets: Vec<BucketInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BucketInfo {
    pub bucket_id: String,
    pub bucket_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetUploadUrlRequest<'a> {
    pub bucket_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetUploadUrlResponse {
    pub bucket_id: String,
    pub upload_url: String,
    pub authorization_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadFileResponse {
    pub file_id: String,
    pub file_name: String,
    #[serde(default)]
    pub content_length: u64,
    #[serde(default)]
    pub content_sha1: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetDownloadAuthorizationRequest<'a> {
    pub bucket_id: &'a str,
    pub file_name_prefix: &'a str,
    pub valid_duration_in_seconds: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GetDownloadAuthorizationResponse {
    pub authorization_token: String,
}

/// B2 error envelope: `{"status": 401, "code": "...", "message": "..."}`
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// Non-2xx answer from a B2 endpoint
#[derive(Debug, Clone)]
pub(crate) struct ApiFailure {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiFailure {
    /// Drain a failed response into an `ApiFailure`.
    ///
    /// Bodies that are not the JSON envelope are kept as plain text.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Self::from_parts(status, &text)
    }

    pub fn from_parts(status: StatusCode, body: &str) -> Self {
        let parsed = serde_json::from_str::<ErrorBody>(body).unwrap_or_default();
        let message = if parsed.code.is_empty() && parsed.message.is_empty() {
            body.trim().to_string()
        } else {
            parsed.message
        };

        Self {
            status,
            code: parsed.code,
            message: truncate(message),
        }
    }

    /// 401 caused by a stale token rather than by missing rights
    pub fn is_expired_token(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
            && EXPIRED_TOKEN_CODES.contains(&self.code.as_str())
    }

    pub fn is_permission_denied(&self) -> bool {
        (self.status == StatusCode::UNAUTHORIZED || self.status == StatusCode::FORBIDDEN)
            && !self.is_expired_token()
    }

    /// Worth retrying with backoff on an idempotent call
    pub fn is_transient(&self) -> bool {
        self.status.is_server_error()
            || self.status == StatusCode::TOO_MANY_REQUESTS
            || self.status == StatusCode::REQUEST_TIMEOUT
    }

    /// `code: message`, or whichever of the two is present
    pub fn detail(&self) -> String {
        match (self.code.is_empty(), self.message.is_empty()) {
            (false, false) => format!("{}: {}", self.code, self.message),
            (false, true) => self.code.clone(),
            (true, false) => self.message.clone(),
            (true, true) => self
                .status
                .canonical_reason()
                .unwrap_or("no response body")
                .to_string(),
        }
    }
}

/// POST a JSON body to `<api_base_url>/b2api/v2/<endpoint>` with the
/// account token.
///
/// Transport failures come back as the outer error; non-2xx answers as the
/// inner `ApiFailure` so each caller can classify them.
pub(crate) async fn call_api<B, R>(
    client: &reqwest::Client,
    api_base_url: &str,
    token: &str,
    endpoint: &'static str,
    body: &B,
) -> Result<Result<R, ApiFailure>, StorageError>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let url = format!("{}/b2api/v2/{}", api_base_url.trim_end_matches('/'), endpoint);
    let _timer = STORAGE_REQUEST_DURATION_SECONDS
        .with_label_values(&[endpoint])
        .start_timer();
    let response = client
        .post(&url)
        .header(http::header::AUTHORIZATION, token)
        .json(body)
        .send()
        .await
        .map_err(|e| StorageError::from_transport(endpoint, e))?;

    if !response.status().is_success() {
        return Ok(Err(ApiFailure::from_response(response).await));
    }

    let decoded = response
        .json::<R>()
        .await
        .map_err(|e| StorageError::InvalidResponse {
            operation: endpoint,
            message: e.without_url().to_string(),
        })?;
    Ok(Ok(decoded))
}

/// Classify a failed control-plane call made on behalf of `container`.
pub(crate) fn control_plane_error(
    failure: ApiFailure,
    operation: &'static str,
    container: &str,
    capability: &'static str,
) -> StorageError {
    if failure.is_expired_token() {
        StorageError::AuthExpired
    } else if failure.is_permission_denied() {
        StorageError::InsufficientPermission {
            container: container.to_string(),
            capability,
            detail: failure.detail(),
        }
    } else if failure.code == "bad_bucket_id" {
        StorageError::ContainerNotFound {
            container: container.to_string(),
        }
    } else if failure.is_transient() {
        StorageError::ServiceUnavailable {
            operation,
            status: failure.status.as_u16(),
            message: failure.detail(),
        }
    } else {
        StorageError::InvalidResponse {
            operation,
            message: format!("HTTP {}: {}", failure.status.as_u16(), failure.detail()),
        }
    }
}

fn truncate(mut message: String) -> String {
    if message.len() > MAX_ERROR_MESSAGE_LEN {
        let mut cut = MAX_ERROR_MESSAGE_LEN;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        message.truncate(cut);
        message.push('…');
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_b2_error_envelope() {
        let failure = ApiFailure::from_parts(
            StatusCode::UNAUTHORIZED,
            r#"{"status":401,"code":"expired_auth_token","message":"Authorization token has expired"}"#,
        );
        assert_eq!(failure.code, "expired_auth_token");
        assert!(failure.is_expired_token());
        assert!(!failure.is_permission_denied());
        assert_eq!(
            failure.detail(),
            "expired_auth_token: Authorization token has expired"
        );
    }

    #[test]
    fn unauthorized_without_token_code_is_permission_denied() {
        let failure = ApiFailure::from_parts(
            StatusCode::UNAUTHORIZED,
            r#"{"status":401,"code":"unauthorized","message":"not entitled"}"#,
        );
        assert!(failure.is_permission_denied());
        assert!(!failure.is_expired_token());
        assert!(!failure.is_transient());
    }

    #[test]
    fn plain_text_body_is_kept_as_message() {
        let failure = ApiFailure::from_parts(StatusCode::SERVICE_UNAVAILABLE, " try later \n");
        assert_eq!(failure.code, "");
        assert_eq!(failure.message, "try later");
        assert!(failure.is_transient());
    }

    #[test]
    fn empty_body_falls_back_to_reason_phrase() {
        let failure = ApiFailure::from_parts(StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(failure.detail(), "Too Many Requests");
        assert!(failure.is_transient());
    }

    #[test]
    fn control_plane_classification() {
        let expired = ApiFailure::from_parts(
            StatusCode::UNAUTHORIZED,
            r#"{"code":"bad_auth_token","message":"Invalid authorization token"}"#,
        );
        assert!(matches!(
            control_plane_error(expired, "b2_list_buckets", "assets", "listBuckets"),
            StorageError::AuthExpired
        ));

        let denied = ApiFailure::from_parts(
            StatusCode::UNAUTHORIZED,
            r#"{"code":"unauthorized","message":"not entitled"}"#,
        );
        assert!(matches!(
            control_plane_error(denied, "b2_list_buckets", "assets", "listBuckets"),
            StorageError::InsufficientPermission { container, capability: "listBuckets", .. }
                if container == "assets"
        ));

        let bad_bucket = ApiFailure::from_parts(
            StatusCode::BAD_REQUEST,
            r#"{"code":"bad_bucket_id","message":"Invalid bucketId"}"#,
        );
        assert!(matches!(
            control_plane_error(bad_bucket, "b2_get_upload_url", "assets", "writeFiles"),
            StorageError::ContainerNotFound { .. }
        ));

        let busy = ApiFailure::from_parts(StatusCode::SERVICE_UNAVAILABLE, "");
        assert!(matches!(
            control_plane_error(busy, "b2_get_upload_url", "assets", "writeFiles"),
            StorageError::ServiceUnavailable { status: 503, .. }
        ));
    }

    #[test]
    fn long_messages_are_truncated() {
        let body = "x".repeat(MAX_ERROR_MESSAGE_LEN * 2);
        let failure = ApiFailure::from_parts(StatusCode::BAD_REQUEST, &body);
        assert!(failure.message.len() <= MAX_ERROR_MESSAGE_LEN + '…'.len_utf8());
    }
}
