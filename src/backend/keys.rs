//! Content key retrieval seam
//!
//! Licence acquisition is not part of this crate. The embedding application supplies a
//! [`KeyProvider`]; without one, encrypted items fail with `Error::NotSupported` while
//! clear content keeps downloading.

use crate::catalog::LicenseInfo;
use crate::process::ContentKey;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Turns licence information into decryption keys
///
/// # Examples
///
/// ```
/// use vod_dl::backend::{KeyProvider, NoOpKeyProvider};
/// use vod_dl::catalog::LicenseInfo;
/// use std::collections::BTreeMap;
///
/// # #[tokio::main]
/// # async fn main() {
/// let license = LicenseInfo {
///     license_uri: "https://license.example/wv".to_string(),
///     request_properties: BTreeMap::new(),
/// };
/// let keys = NoOpKeyProvider
///     .content_keys(&license, "https://cdn.example/a.mpd", &BTreeMap::new())
///     .await;
/// assert!(keys.is_err());
/// # }
/// ```
#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Keys for one manifest
    ///
    /// # Arguments
    ///
    /// * `license` - Licence URL and request properties from the streaming document
    /// * `manifest_url` - Manifest the keys are for
    /// * `headers` - Headers the manifest must be fetched with
    async fn content_keys(
        &self,
        license: &LicenseInfo,
        manifest_url: &str,
        headers: &BTreeMap<String, String>,
    ) -> crate::Result<Vec<ContentKey>>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// Key provider used when none is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpKeyProvider;

#[async_trait]
impl KeyProvider for NoOpKeyProvider {
    async fn content_keys(
        &self,
        _license: &LicenseInfo,
        _manifest_url: &str,
        _headers: &BTreeMap<String, String>,
    ) -> crate::Result<Vec<ContentKey>> {
        Err(crate::Error::NotSupported(
            "Encrypted content requires a key provider. \
             Pass one to VodDownloader::with_collaborators."
                .into(),
        ))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Key provider returning a fixed key set
#[derive(Debug, Clone, Default)]
pub struct StaticKeyProvider {
    keys: Vec<ContentKey>,
}

impl StaticKeyProvider {
    /// Provider answering every request with `keys`
    pub fn new(keys: Vec<ContentKey>) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl KeyProvider for StaticKeyProvider {
    async fn content_keys(
        &self,
        _license: &LicenseInfo,
        _manifest_url: &str,
        _headers: &BTreeMap<String, String>,
    ) -> crate::Result<Vec<ContentKey>> {
        Ok(self.keys.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn license() -> LicenseInfo {
        LicenseInfo {
            license_uri: "https://license.example/wv".to_string(),
            request_properties: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn noop_provider_reports_not_supported() {
        let result = NoOpKeyProvider
            .content_keys(&license(), "https://cdn.example/a.mpd", &BTreeMap::new())
            .await;
        assert!(matches!(result, Err(crate::Error::NotSupported(_))));
        assert_eq!(NoOpKeyProvider.name(), "noop");
    }

    #[tokio::test]
    async fn static_provider_returns_its_keys() {
        let key = ContentKey::parse("00ff:11ee").unwrap();
        let provider = StaticKeyProvider::new(vec![key.clone()]);
        let keys = provider
            .content_keys(&license(), "https://cdn.example/a.mpd", &BTreeMap::new())
            .await
            .unwrap();
        assert_eq!(keys, vec![key]);
    }
}
