use std::sync::Arc;

use anyhow::Result;
use axum::http::HeaderMap;
use base64::Engine as _;
use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::error::ApiError;
use crate::core::types::ApiKeyRecord;
use crate::store::JobStore;

pub const KEY_PREFIX: &str = "wh_";
const DISPLAY_PREFIX_LEN: usize = 8;

/// SHA-256 of `key + salt`, hex-encoded. Only the hash is persisted.
pub fn hash_api_key(api_key: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hasher.update(salt.as_bytes());
    hex::encode(hasher.finalize())
}

/// `wh_` + base64url of 32 random bytes.
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    format!(
        "{KEY_PREFIX}{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    )
}

/// Validate the `Authorization` header: Bearer scheme, `wh_` prefix, hash
/// lookup, active and unexpired. Touches usage bookkeeping on success.
pub async fn authorize(
    store: &Arc<dyn JobStore>,
    salt: &str,
    headers: &HeaderMap,
) -> Result<ApiKeyRecord, ApiError> {
    let authorization = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    let api_key = authorization
        .strip_prefix("Bearer ")
        .map(str::trim)
        .ok_or(ApiError::Unauthorized)?;
    if api_key.is_empty() || !api_key.starts_with(KEY_PREFIX) {
        warn!("rejected API key with bad format");
        return Err(ApiError::Unauthorized);
    }

    let key_hash = hash_api_key(api_key, salt);
    let record = store
        .find_api_key_by_hash(&key_hash)
        .await
        .map_err(|e| ApiError::Store(e.to_string()))?
        .ok_or(ApiError::Unauthorized)?;

    if !record.active {
        return Err(ApiError::Unauthorized);
    }
    if let Some(expires_at) = record.expires_at {
        if expires_at <= Utc::now() {
            return Err(ApiError::Unauthorized);
        }
    }

    if let Err(e) = store.touch_api_key(record.id).await {
        warn!("failed to touch api key usage: {e}");
    }
    Ok(record)
}

/// First-run convenience: when the store holds no keys at all, mint one and
/// log it once so the operator can start calling the API.
pub async fn bootstrap_default_key(store: &Arc<dyn JobStore>, salt: &str) -> Result<()> {
    if store.count_api_keys().await? > 0 {
        return Ok(());
    }
    let raw = generate_api_key();
    let record = ApiKeyRecord {
        id: Uuid::new_v4(),
        name: "default".to_string(),
        key_hash: hash_api_key(&raw, salt),
        key_prefix: raw.chars().take(DISPLAY_PREFIX_LEN).collect(),
        permissions: vec!["read".to_string(), "write".to_string()],
        active: true,
        expires_at: None,
        last_used_at: None,
        usage_count: 0,
        rate_limit_per_minute: 60,
        created_at: Utc::now(),
    };
    store.insert_api_key(record).await?;
    info!("no API keys found; generated default key (shown once): {raw}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut map = HeaderMap::new();
        map.insert("authorization", HeaderValue::from_str(value).unwrap());
        map
    }

    async fn seeded_store(salt: &str) -> (Arc<dyn JobStore>, String) {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let raw = generate_api_key();
        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            name: "test".into(),
            key_hash: hash_api_key(&raw, salt),
            key_prefix: raw.chars().take(DISPLAY_PREFIX_LEN).collect(),
            permissions: vec!["read".into(), "write".into()],
            active: true,
            expires_at: None,
            last_used_at: None,
            usage_count: 0,
            rate_limit_per_minute: 60,
            created_at: Utc::now(),
        };
        store.insert_api_key(record).await.unwrap();
        (store, raw)
    }

    #[test]
    fn generated_keys_have_the_right_shape() {
        let key = generate_api_key();
        assert!(key.starts_with(KEY_PREFIX));
        // 32 bytes of base64url without padding is 43 chars.
        assert_eq!(key.len(), KEY_PREFIX.len() + 43);
        assert_ne!(key, generate_api_key());
    }

    #[test]
    fn hashing_is_salted() {
        let a = hash_api_key("wh_abc", "salt1");
        let b = hash_api_key("wh_abc", "salt2");
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[tokio::test]
    async fn valid_key_authorizes_and_touches_usage() {
        let (store, raw) = seeded_store("s").await;
        let record = authorize(&store, "s", &headers(&format!("Bearer {raw}")))
            .await
            .unwrap();
        assert_eq!(record.name, "test");
        let touched = store
            .find_api_key_by_hash(&hash_api_key(&raw, "s"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(touched.usage_count, 1);
    }

    #[tokio::test]
    async fn missing_header_wrong_scheme_and_bad_prefix_fail() {
        let (store, raw) = seeded_store("s").await;
        assert!(authorize(&store, "s", &HeaderMap::new()).await.is_err());
        assert!(authorize(&store, "s", &headers(&raw)).await.is_err());
        assert!(authorize(&store, "s", &headers("Bearer nope_123"))
            .await
            .is_err());
        assert!(authorize(&store, "s", &headers("Bearer wh_unknown"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn inactive_and_expired_keys_fail() {
        let salt = "s";
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let raw = generate_api_key();
        let mut record = ApiKeyRecord {
            id: Uuid::new_v4(),
            name: "inactive".into(),
            key_hash: hash_api_key(&raw, salt),
            key_prefix: "wh_xxxxx".into(),
            permissions: vec![],
            active: false,
            expires_at: None,
            last_used_at: None,
            usage_count: 0,
            rate_limit_per_minute: 60,
            created_at: Utc::now(),
        };
        store.insert_api_key(record.clone()).await.unwrap();
        assert!(authorize(&store, salt, &headers(&format!("Bearer {raw}")))
            .await
            .is_err());

        let raw2 = generate_api_key();
        record.id = Uuid::new_v4();
        record.key_hash = hash_api_key(&raw2, salt);
        record.active = true;
        record.expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.insert_api_key(record).await.unwrap();
        assert!(authorize(&store, salt, &headers(&format!("Bearer {raw2}")))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn bootstrap_only_runs_once() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        bootstrap_default_key(&store, "s").await.unwrap();
        bootstrap_default_key(&store, "s").await.unwrap();
        assert_eq!(store.count_api_keys().await.unwrap(), 1);
    }
}
