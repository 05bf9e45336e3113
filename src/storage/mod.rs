//! Backblaze B2 asset storage module
//!
//! Handles:
//! - Account authorization with a cached, invalidatable session
//! - Bucket resolution and single-use upload URLs
//! - SHA-1 verified uploads of product images, AR models and logos
//! - Signed download URLs for key-mode deployments

mod assets;
mod credentials;
mod download;
mod error;
mod negotiator;
mod object_key;
mod reference;
mod retry;
mod session;
mod uploader;
mod wire;

pub use assets::{AssetStorage, UploadPhase};
pub use credentials::Credentials;
pub use download::{DownloadAuthorizer, MAX_SIGNED_URL_VALIDITY, MIN_SIGNED_URL_VALIDITY};
pub use error::StorageError;
pub use negotiator::{UploadNegotiator, UploadTicket};
pub use object_key::{KeyStyle, ObjectKey};
pub use reference::{ReferenceMode, StoredObjectReference};
pub use retry::RetryPolicy;
pub use session::{AuthorizationContext, SessionAuthorizer, SessionCache};
pub use uploader::{ContentUploader, UploadConfirmation, content_sha1};

use std::time::Duration;

use crate::error::AppError;

/// HTTP client shared by every storage call
pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    reqwest::Client::builder()
        .user_agent(concat!("Furniar/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(e.into()))
}
