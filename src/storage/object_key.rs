//! Object key synthesis
//!
//! Keys look like `products/1718000000000-k3j9x0a1b2c3d.png`. Wall-clock
//! milliseconds plus a random suffix make collisions practically
//! impossible; no existence check is made against the bucket.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

const RANDOM_SUFFIX_LEN: usize = 13;
const RANDOM_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const MAX_EXTENSION_LEN: usize = 10;

/// How the file-name part of a key is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStyle {
    /// `<folder>/<timestamp>-<random>.<ext>`
    #[default]
    Random,
    /// `<folder>/<timestamp>-<original file name>`
    OriginalName,
}

/// Path-like identifier of a stored object within its bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Generate a fresh key for `file_name` under `folder`.
    pub fn generate(folder: &str, file_name: &str, style: KeyStyle) -> Self {
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let random = random_suffix(&mut rand::thread_rng());
        Self::compose(folder, file_name, style, timestamp_ms, &random)
    }

    fn compose(
        folder: &str,
        file_name: &str,
        style: KeyStyle,
        timestamp_ms: i64,
        random: &str,
    ) -> Self {
        let leaf = match style {
            KeyStyle::Random => match extension(file_name) {
                Some(ext) => format!("{timestamp_ms}-{random}.{ext}"),
                None => format!("{timestamp_ms}-{random}"),
            },
            KeyStyle::OriginalName => {
                format!("{timestamp_ms}-{}", sanitize_file_name(file_name))
            }
        };

        let folder = normalize_folder(folder);
        if folder.is_empty() {
            Self(leaf)
        } else {
            Self(format!("{folder}/{leaf}"))
        }
    }

    /// Wrap a key that was generated earlier and persisted.
    ///
    /// Returns `None` unless the key names a single object: an empty key
    /// or one ending in `/` would act as a prefix over many files.
    pub fn existing(key: &str) -> Option<Self> {
        let key = key.trim().trim_start_matches('/');
        if key.is_empty() || key.ends_with('/') {
            return None;
        }
        Some(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Percent-encode each path segment, keeping `/` separators.
    ///
    /// Used for the `X-Bz-File-Name` header and download URLs.
    pub fn url_encoded(&self) -> String {
        self.0
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn random_suffix<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..RANDOM_SUFFIX_LEN)
        .map(|_| RANDOM_ALPHABET[rng.gen_range(0..RANDOM_ALPHABET.len())] as char)
        .collect()
}

/// Lower-cased extension of the last path component, if it looks like one.
fn extension(file_name: &str) -> Option<String> {
    let base = base_name(file_name);
    let (stem, ext) = base.rsplit_once('.')?;
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn base_name(file_name: &str) -> &str {
    file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name)
        .trim()
}

fn sanitize_file_name(file_name: &str) -> String {
    let cleaned: String = base_name(file_name)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

fn normalize_folder(folder: &str) -> String {
    folder
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect::<Vec<_>>()
        .join("/")
}
