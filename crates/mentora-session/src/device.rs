//! Device identity: a stable per-install identifier.
//!
//! The id is resolved once and cached in local storage under
//! [`DEVICE_ID_KEY`]. On first launch the platform's own unique id is
//! persisted there, so every later launch reads it back. A reinstall
//! wipes local storage and therefore yields a new id.

use std::future::Future;
use std::sync::Arc;

use mentora_protocol::{DeviceId, DeviceInfo};
use mentora_store::LocalStorage;
use rand::Rng;

use crate::SessionError;

/// Local storage key for the cached device id.
pub const DEVICE_ID_KEY: &str = "device_id";

/// What the host OS can tell us about the device.
pub trait DevicePlatform: Send + Sync + 'static {
    /// The platform's own stable identifier, if it has one.
    fn unique_id(&self) -> impl Future<Output = Result<String, SessionError>> + Send;

    /// Current device/app metadata, stamped with `device_id`.
    fn device_info(&self, device_id: &DeviceId) -> DeviceInfo;
}

// ---------------------------------------------------------------------------
// StaticPlatform
// ---------------------------------------------------------------------------

/// A [`DevicePlatform`] with fixed metadata. Used in tests and demos.
#[derive(Debug, Clone)]
pub struct StaticPlatform {
    unique_id: Option<String>,
    platform: String,
    os_version: String,
    app_version: String,
    brand: String,
    model: String,
}

impl StaticPlatform {
    pub fn new(platform: impl Into<String>, app_version: impl Into<String>) -> Self {
        Self {
            unique_id: Some(generate_id()),
            platform: platform.into(),
            os_version: "unknown".into(),
            app_version: app_version.into(),
            brand: "unknown".into(),
            model: "unknown".into(),
        }
    }

    /// Uses `id` as the platform's unique id.
    pub fn with_unique_id(mut self, id: impl Into<String>) -> Self {
        self.unique_id = Some(id.into());
        self
    }

    /// Simulates a platform that can't report a unique id.
    pub fn without_unique_id(mut self) -> Self {
        self.unique_id = None;
        self
    }

    pub fn with_hardware(
        mut self,
        brand: impl Into<String>,
        model: impl Into<String>,
        os_version: impl Into<String>,
    ) -> Self {
        self.brand = brand.into();
        self.model = model.into();
        self.os_version = os_version.into();
        self
    }
}

impl DevicePlatform for StaticPlatform {
    async fn unique_id(&self) -> Result<String, SessionError> {
        self.unique_id.clone().ok_or_else(|| {
            SessionError::IdentityUnavailable("platform has no unique id".into())
        })
    }

    fn device_info(&self, device_id: &DeviceId) -> DeviceInfo {
        DeviceInfo {
            device_id: device_id.clone(),
            platform: self.platform.clone(),
            os_version: self.os_version.clone(),
            app_version: self.app_version.clone(),
            brand: self.brand.clone(),
            model: self.model.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// DeviceIdentity
// ---------------------------------------------------------------------------

/// Resolves and caches this install's [`DeviceId`].
pub struct DeviceIdentity<L, P> {
    storage: Arc<L>,
    platform: Arc<P>,
}

impl<L: LocalStorage, P: DevicePlatform> DeviceIdentity<L, P> {
    pub fn new(storage: Arc<L>, platform: Arc<P>) -> Self {
        Self { storage, platform }
    }

    /// Returns the cached device id, creating and persisting one on first
    /// call.
    ///
    /// # Errors
    /// [`SessionError::IdentityUnavailable`] if local storage can't be read
    /// or written, or the platform has no id to offer. The caller must
    /// treat this as fatal to initialization.
    pub async fn get_or_create_device_id(&self) -> Result<DeviceId, SessionError> {
        let cached = self
            .storage
            .get(DEVICE_ID_KEY)
            .await
            .map_err(|e| SessionError::IdentityUnavailable(e.to_string()))?;
        if let Some(id) = cached.filter(|id| !id.is_empty()) {
            return Ok(DeviceId::new(id));
        }

        let id = self.platform.unique_id().await?;
        if id.is_empty() {
            return Err(SessionError::IdentityUnavailable(
                "platform returned an empty id".into(),
            ));
        }

        self.storage
            .set_many(&[(DEVICE_ID_KEY, id.clone())])
            .await
            .map_err(|e| SessionError::IdentityUnavailable(e.to_string()))?;

        tracing::info!(device_id = %id, "device id created");
        Ok(DeviceId::new(id))
    }
}

/// Generates a random 128-bit id, hex-encoded.
fn generate_id() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use mentora_store::MemoryLocalStorage;

    use super::*;

    fn identity(platform: StaticPlatform) -> (Arc<MemoryLocalStorage>, DeviceIdentity<MemoryLocalStorage, StaticPlatform>) {
        let storage = Arc::new(MemoryLocalStorage::new());
        let identity = DeviceIdentity::new(Arc::clone(&storage), Arc::new(platform));
        (storage, identity)
    }

    #[tokio::test]
    async fn test_get_or_create_uses_platform_id_and_persists() {
        let (storage, identity) =
            identity(StaticPlatform::new("android", "1.0.0").with_unique_id("hw-123"));

        let id = identity.get_or_create_device_id().await.unwrap();

        assert_eq!(id.as_str(), "hw-123");
        assert_eq!(storage.peek(DEVICE_ID_KEY), Some("hw-123".into()));
    }

    #[tokio::test]
    async fn test_get_or_create_is_stable_across_calls() {
        let (_storage, identity) = identity(StaticPlatform::new("ios", "1.0.0"));

        let first = identity.get_or_create_device_id().await.unwrap();
        let second = identity.get_or_create_device_id().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.as_str().len(), 32);
    }

    #[tokio::test]
    async fn test_get_or_create_prefers_cached_value() {
        let (storage, identity) =
            identity(StaticPlatform::new("android", "1.0.0").with_unique_id("hw-new"));
        storage
            .set_many(&[(DEVICE_ID_KEY, "cached-id".into())])
            .await
            .unwrap();

        let id = identity.get_or_create_device_id().await.unwrap();
        assert_eq!(id.as_str(), "cached-id");
    }

    #[tokio::test]
    async fn test_get_or_create_platform_without_id_returns_identity_unavailable() {
        let (storage, identity) =
            identity(StaticPlatform::new("android", "1.0.0").without_unique_id());

        let err = identity.get_or_create_device_id().await.unwrap_err();
        assert!(matches!(err, SessionError::IdentityUnavailable(_)));
        assert_eq!(storage.peek(DEVICE_ID_KEY), None);
    }

    #[tokio::test]
    async fn test_get_or_create_storage_failure_returns_identity_unavailable() {
        let (storage, identity) = identity(StaticPlatform::new("android", "1.0.0"));
        storage.set_failing(true);

        let err = identity.get_or_create_device_id().await.unwrap_err();
        assert!(matches!(err, SessionError::IdentityUnavailable(_)));
    }

    #[test]
    fn test_generate_id_is_32_hex_chars() {
        let id = generate_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
