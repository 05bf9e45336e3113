//! Content upload
//!
//! Sends the whole payload in one request (Content-Length comes from the
//! body) together with its SHA-1 so the storage service can verify
//! integrity. A digest mismatch is detected server side and comes back as
//! an ordinary rejection.

use std::time::Duration;

use bytes::Bytes;
use sha1::{Digest, Sha1};

use super::wire::{ApiFailure, UploadFileResponse};
use super::{ObjectKey, StorageError, UploadTicket};
use crate::metrics::STORAGE_REQUEST_DURATION_SECONDS;

const UPLOAD_OPERATION: &str = "b2_upload_file";

/// Hex-encoded SHA-1 of `data`
pub fn content_sha1(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// What the storage service reports for an accepted upload
#[derive(Debug, Clone)]
pub struct UploadConfirmation {
    pub file_id: String,
    pub file_name: String,
    pub content_length: u64,
    pub content_sha1: String,
}

#[derive(Clone)]
pub struct ContentUploader {
    http_client: reqwest::Client,
    /// Per-request timeout for the upload body
    timeout: Duration,
}

impl ContentUploader {
    pub fn new(http_client: reqwest::Client, timeout: Duration) -> Self {
        Self {
            http_client,
            timeout,
        }
    }

    /// Upload `data` under `key` using a single-use `ticket`.
    pub async fn upload(
        &self,
        ticket: UploadTicket,
        key: &ObjectKey,
        data: Bytes,
        content_type: &str,
    ) -> Result<UploadConfirmation, StorageError> {
        let _timer = STORAGE_REQUEST_DURATION_SECONDS
            .with_label_values(&[UPLOAD_OPERATION])
            .start_timer();

        let sha1 = content_sha1(&data);
        let content_length = data.len() as u64;

        let response = self
            .http_client
            .post(&ticket.upload_url)
            .timeout(self.timeout)
            .header(http::header::AUTHORIZATION, &ticket.upload_auth_token)
            .header("X-Bz-File-Name", key.url_encoded())
            .header(http::header::CONTENT_TYPE, content_type)
            .header("X-Bz-Content-Sha1", &sha1)
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::from_transport(UPLOAD_OPERATION, e))?;

        if !response.status().is_success() {
            let failure = ApiFailure::from_response(response).await;
            if failure.is_expired_token() {
                return Err(StorageError::AuthExpired);
            }
            return Err(StorageError::UploadRejected {
                status: failure.status.as_u16(),
                message: failure.detail(),
            });
        }

        let body: UploadFileResponse =
            response
                .json()
                .await
                .map_err(|e| StorageError::InvalidResponse {
                    operation: UPLOAD_OPERATION,
                    message: e.without_url().to_string(),
                })?;

        tracing::debug!(
            key = %key,
            file_id = %body.file_id,
            bytes = content_length,
            "Upload accepted"
        );

        Ok(UploadConfirmation {
            file_id: body.file_id,
            file_name: body.file_name,
            content_length: if body.content_length > 0 {
                body.content_length
            } else {
                content_length
            },
            content_sha1: if body.content_sha1.is_empty() {
                sha1
            } else {
                body.content_sha1
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha1_of_known_inputs() {
        assert_eq!(
            content_sha1(b""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
        assert_eq!(
            content_sha1(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn digest_is_deterministic() {
        let payload: Vec<u8> = (0..12 * 1024).map(|i| (i % 251) as u8).collect();
        let first = content_sha1(&payload);
        let second = content_sha1(&payload.clone());
        assert_eq!(first, second);
        assert_eq!(first.len(), 40);
    }
}
