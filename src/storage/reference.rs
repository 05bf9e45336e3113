//! Locator returned for a stored object

use serde::{Deserialize, Serialize};

use super::ObjectKey;

/// Which form of the reference a deployment persists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceMode {
    /// Fully qualified download URL usable by a browser
    #[default]
    Url,
    /// Bare object key, resolved later through a signed URL
    Key,
}

/// Immutable result of a successful upload
#[derive(Debug, Clone, Serialize)]
pub struct StoredObjectReference {
    download_base_url: String,
    container_name: String,
    key: ObjectKey,
    /// B2 file id of this version
    pub file_id: String,
    pub content_sha1: String,
    pub content_length: u64,
}

impl StoredObjectReference {
    pub(crate) fn new(
        download_base_url: &str,
        container_name: &str,
        key: ObjectKey,
        file_id: String,
        content_sha1: String,
        content_length: u64,
    ) -> Self {
        Self {
            download_base_url: download_base_url.trim_end_matches('/').to_string(),
            container_name: container_name.to_string(),
            key,
            file_id,
            content_sha1,
            content_length,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    /// `<download base>/file/<container>/<key>`
    pub fn url(&self) -> String {
        format!(
            "{}/file/{}/{}",
            self.download_base_url,
            self.container_name,
            self.key.url_encoded()
        )
    }

    /// Value to store against the owning entity for `mode`
    pub fn persisted_value(&self, mode: ReferenceMode) -> String {
        match mode {
            ReferenceMode::Url => self.url(),
            ReferenceMode::Key => self.key.as_str().to_string(),
        }
    }
}
