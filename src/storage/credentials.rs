//! Long-lived account key pair

use std::fmt;

use base64::Engine;

use super::StorageError;

/// B2 application key id and secret
///
/// `Debug` never prints the secret.
#[derive(Clone)]
pub struct Credentials {
    key_id: String,
    application_key: String,
}

impl Credentials {
    pub fn new(key_id: impl Into<String>, application_key: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into(),
            application_key: application_key.into(),
        }
    }

    /// Build from optional configured values.
    ///
    /// Missing or blank values are reported when the storage is first used,
    /// not when the configuration is loaded.
    pub fn from_parts(
        key_id: Option<&str>,
        application_key: Option<&str>,
    ) -> Result<Self, StorageError> {
        let key_id = non_blank(key_id).ok_or(StorageError::MissingCredentials {
            missing: "storage.key_id",
        })?;
        let application_key = non_blank(application_key).ok_or(
            StorageError::MissingCredentials {
                missing: "storage.application_key",
            },
        )?;
        Ok(Self::new(key_id, application_key))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// `Basic base64(key_id:application_key)`
    pub(crate) fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.key_id, self.application_key);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("application_key", &"<redacted>")
            .finish()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
