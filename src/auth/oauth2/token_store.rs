//! Persistence of OAuth2 credentials.
//!
//! Everything lives in one JSON blob stored under a fixed service/account
//! pair. Inside the blob, entries are keyed by collection uid, token URL and
//! credentials id. A single async mutex serialises load-modify-store.

use crate::base::neterror::NetError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub const SECRET_SERVICE: &str = "probenet";
pub const SECRET_ACCOUNT: &str = "oauth2-credentials";

/// A token endpoint response plus the time it was stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_u64",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Any other fields the server returned (`id_token`, `error`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoredCredentials {
    /// No access token counts as expired; a token without lifetime data never expires.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        if self.access_token.as_deref().map_or(true, str::is_empty) {
            return true;
        }
        match (self.expires_in, self.created_at) {
            (Some(expires_in), Some(created_at)) if expires_in > 0 => {
                now_ms > created_at + (expires_in as i64) * 1000
            }
            _ => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_millis())
    }

    pub fn error(&self) -> Option<&Value> {
        self.extra.get("error")
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

pub(crate) fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Entry {
    url: String,
    credentials_id: String,
    credentials: StoredCredentials,
}

type Blob = BTreeMap<String, Vec<Entry>>;

/// Where the blob lives.
#[async_trait]
pub trait SecretBackend: Send + Sync {
    async fn read(&self) -> Result<Option<String>, NetError>;
    async fn write(&self, blob: &str) -> Result<(), NetError>;
    async fn delete(&self) -> Result<(), NetError>;
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    blob: StdMutex<Option<String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretBackend for MemoryBackend {
    async fn read(&self) -> Result<Option<String>, NetError> {
        Ok(self.blob.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn write(&self, blob: &str) -> Result<(), NetError> {
        *self.blob.lock().unwrap_or_else(|e| e.into_inner()) = Some(blob.to_string());
        Ok(())
    }

    async fn delete(&self) -> Result<(), NetError> {
        *self.blob.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Plain JSON file. For hosts without a keyring, and for tests.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SecretBackend for FileBackend {
    async fn read(&self) -> Result<Option<String>, NetError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(NetError::SecretStore(e.to_string())),
        }
    }

    async fn write(&self, blob: &str) -> Result<(), NetError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| NetError::SecretStore(e.to_string()))?;
        }
        tokio::fs::write(&self.path, blob)
            .await
            .map_err(|e| NetError::SecretStore(e.to_string()))
    }

    async fn delete(&self) -> Result<(), NetError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(NetError::SecretStore(e.to_string())),
        }
    }
}

/// Secret Service (GNOME Keyring / KWallet) item under
/// [`SECRET_SERVICE`] / [`SECRET_ACCOUNT`].
#[cfg(target_os = "linux")]
#[derive(Debug, Default)]
pub struct KeyringBackend;

#[cfg(target_os = "linux")]
impl KeyringBackend {
    pub fn new() -> Self {
        Self
    }

    fn attributes() -> std::collections::HashMap<&'static str, &'static str> {
        let mut attrs = std::collections::HashMap::new();
        attrs.insert("service", SECRET_SERVICE);
        attrs.insert("account", SECRET_ACCOUNT);
        attrs
    }
}

#[cfg(target_os = "linux")]
fn keyring_err(e: secret_service::Error) -> NetError {
    NetError::SecretStore(e.to_string())
}

#[cfg(target_os = "linux")]
#[async_trait]
impl SecretBackend for KeyringBackend {
    async fn read(&self) -> Result<Option<String>, NetError> {
        use secret_service::{EncryptionType, SecretService};

        let ss = SecretService::connect(EncryptionType::Dh)
            .await
            .map_err(keyring_err)?;
        let found = ss
            .search_items(Self::attributes())
            .await
            .map_err(keyring_err)?;

        let Some(item) = found.unlocked.first().or_else(|| found.locked.first()) else {
            return Ok(None);
        };
        if found.unlocked.is_empty() {
            item.unlock().await.map_err(keyring_err)?;
        }
        let secret = item.get_secret().await.map_err(keyring_err)?;
        String::from_utf8(secret)
            .map(Some)
            .map_err(|_| NetError::SecretStore("stored secret is not UTF-8".into()))
    }

    async fn write(&self, blob: &str) -> Result<(), NetError> {
        use secret_service::{EncryptionType, SecretService};

        let ss = SecretService::connect(EncryptionType::Dh)
            .await
            .map_err(keyring_err)?;
        let collection = ss.get_default_collection().await.map_err(keyring_err)?;
        if collection.is_locked().await.map_err(keyring_err)? {
            collection.unlock().await.map_err(keyring_err)?;
        }
        collection
            .create_item(
                "probenet OAuth2 credentials",
                Self::attributes(),
                blob.as_bytes(),
                true,
                "application/json",
            )
            .await
            .map_err(keyring_err)?;
        Ok(())
    }

    async fn delete(&self) -> Result<(), NetError> {
        use secret_service::{EncryptionType, SecretService};

        let ss = SecretService::connect(EncryptionType::Dh)
            .await
            .map_err(keyring_err)?;
        let found = ss
            .search_items(Self::attributes())
            .await
            .map_err(keyring_err)?;
        for item in found.unlocked.iter().chain(found.locked.iter()) {
            item.delete().await.map_err(keyring_err)?;
        }
        Ok(())
    }
}

/// Credential store shared by every request of an engine.
pub struct TokenStore {
    backend: Box<dyn SecretBackend>,
    lock: Mutex<()>,
    /// One lock per credential, held across get, fetch and save.
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl TokenStore {
    pub fn new(backend: impl SecretBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            lock: Mutex::new(()),
            inflight: DashMap::new(),
        }
    }

    /// Exclusive access to one credential while it is resolved, so
    /// concurrent requests share a single token fetch.
    pub async fn lock_credential(
        &self,
        collection_uid: &str,
        url: &str,
        credentials_id: &str,
    ) -> OwnedMutexGuard<()> {
        let key = format!("{}\n{}\n{}", collection_uid, url, credentials_id);
        let slot = Arc::clone(&*self.inflight.entry(key).or_default());
        slot.lock_owned().await
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    async fn load(&self) -> Result<Blob, NetError> {
        match self.backend.read().await? {
            Some(raw) if !raw.trim().is_empty() => {
                // A corrupt blob is discarded rather than blocking every request.
                Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
                    tracing::warn!("Discarding unreadable OAuth2 credential store: {}", e);
                    Blob::new()
                }))
            }
            _ => Ok(Blob::new()),
        }
    }

    async fn store(&self, blob: &Blob) -> Result<(), NetError> {
        if blob.is_empty() {
            return self.backend.delete().await;
        }
        let raw = serde_json::to_string(blob).map_err(|e| NetError::SecretStore(e.to_string()))?;
        self.backend.write(&raw).await
    }

    /// Store `credentials`, stamping `created_at`. Responses carrying an
    /// `error` or lacking an access token are not stored.
    pub async fn save(
        &self,
        collection_uid: &str,
        url: &str,
        credentials_id: &str,
        credentials: &StoredCredentials,
    ) -> Result<Option<StoredCredentials>, NetError> {
        if credentials.error().is_some()
            || credentials.access_token.as_deref().map_or(true, str::is_empty)
        {
            return Ok(None);
        }
        let mut stamped = credentials.clone();
        stamped.created_at = Some(now_millis());

        let _guard = self.lock.lock().await;
        let mut blob = self.load().await?;
        let entries = blob.entry(collection_uid.to_string()).or_default();
        entries.retain(|e| !(e.url == url && e.credentials_id == credentials_id));
        entries.push(Entry {
            url: url.to_string(),
            credentials_id: credentials_id.to_string(),
            credentials: stamped.clone(),
        });
        self.store(&blob).await?;
        Ok(Some(stamped))
    }

    pub async fn get(
        &self,
        collection_uid: &str,
        url: &str,
        credentials_id: &str,
    ) -> Result<Option<StoredCredentials>, NetError> {
        let _guard = self.lock.lock().await;
        let blob = self.load().await?;
        Ok(blob.get(collection_uid).and_then(|entries| {
            entries
                .iter()
                .find(|e| e.url == url && e.credentials_id == credentials_id)
                .map(|e| e.credentials.clone())
        }))
    }

    pub async fn clear(
        &self,
        collection_uid: &str,
        url: &str,
        credentials_id: &str,
    ) -> Result<(), NetError> {
        let _guard = self.lock.lock().await;
        let mut blob = self.load().await?;
        if let Some(entries) = blob.get_mut(collection_uid) {
            entries.retain(|e| !(e.url == url && e.credentials_id == credentials_id));
            if entries.is_empty() {
                blob.remove(collection_uid);
            }
        }
        self.store(&blob).await
    }

    /// Every stored entry of a collection as `(url, credentials_id, credentials)`.
    pub async fn credentials_for_collection(
        &self,
        collection_uid: &str,
    ) -> Result<Vec<(String, String, StoredCredentials)>, NetError> {
        let _guard = self.lock.lock().await;
        let blob = self.load().await?;
        Ok(blob
            .get(collection_uid)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| (e.url.clone(), e.credentials_id.clone(), e.credentials.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
