//! C2 — Auth service. JWT verification to `TokenInfo{group, expires_at,
//! issued_at}`, a secret provider with TTL-cached secret and fingerprint
//! logging, and a token registry persisted via [`crate::storage::Storage`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};

use crate::error::{DocError, DocResult};
use crate::model::{Group, TokenInfo, TokenRecord};
use crate::storage::Storage;

pub const EXPECTED_AUDIENCE: &str = "gofr-api";

/// Supplies the current JWT-signing secret. Spec §4.2 frames the real
/// secret store as an external collaborator; this trait is the seam —
/// `EnvSecretProvider` is the file/env-backed stand-in used when no real
/// secret-store integration is configured.
#[async_trait::async_trait]
pub trait SecretSource: Send + Sync {
    async fn fetch_secret(&self) -> DocResult<Vec<u8>>;
}

/// Reads the signing secret from an environment variable. Documented in
/// DESIGN.md as an explicit simplification standing in for a real
/// secret-store client.
pub struct EnvSecretSource {
    var_name: String,
}

impl EnvSecretSource {
    pub fn new(var_name: impl Into<String>) -> Self {
        EnvSecretSource { var_name: var_name.into() }
    }
}

#[async_trait::async_trait]
impl SecretSource for EnvSecretSource {
    async fn fetch_secret(&self) -> DocResult<Vec<u8>> {
        std::env::var(&self.var_name)
            .map(|s| s.into_bytes())
            .map_err(|_| DocError::internal(format!("secret env var {} is unset", self.var_name)))
    }
}

struct SecretCache {
    secret: Vec<u8>,
    fingerprint: String,
    fetched_at: Instant,
}

fn fingerprint(secret: &[u8]) -> String {
    let digest = Sha256::digest(secret);
    format!("{digest:x}")
}

/// TTL-cached secret provider. Reads are thread-safe; `invalidate()` forces
/// a re-read on next access. Logs at WARN when the fingerprint changes.
pub struct SecretProvider {
    source: Arc<dyn SecretSource>,
    ttl: Duration,
    cache: RwLock<Option<SecretCache>>,
    refresh_lock: Mutex<()>,
}

impl SecretProvider {
    pub fn new(source: Arc<dyn SecretSource>) -> Self {
        SecretProvider {
            source,
            ttl: Duration::from_secs(5 * 60),
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn is_stale(cache: &Option<SecretCache>, ttl: Duration) -> bool {
        match cache {
            None => true,
            Some(c) => c.fetched_at.elapsed() >= ttl,
        }
    }

    pub async fn invalidate(&self) {
        *self.cache.write().await = None;
    }

    /// Returns the current secret, refreshing it (once, with a single
    /// immediate retry on transient failure) if stale.
    pub async fn current_secret(&self) -> DocResult<Vec<u8>> {
        {
            let cache = self.cache.read().await;
            if !Self::is_stale(&cache, self.ttl) {
                return Ok(cache.as_ref().unwrap().secret.clone());
            }
        }

        let _guard = self.refresh_lock.lock().await;
        {
            let cache = self.cache.read().await;
            if !Self::is_stale(&cache, self.ttl) {
                return Ok(cache.as_ref().unwrap().secret.clone());
            }
        }

        let secret = match self.source.fetch_secret().await {
            Ok(s) => s,
            Err(first_err) => {
                tracing::warn!(error = %first_err, "secret refresh failed, retrying once");
                self.source.fetch_secret().await.map_err(|_| first_err)?
            }
        };
        let new_fp = fingerprint(&secret);

        let mut cache = self.cache.write().await;
        if let Some(old) = cache.as_ref() {
            if old.fingerprint != new_fp {
                tracing::warn!(old_fingerprint = %old.fingerprint, new_fingerprint = %new_fp, "signing secret fingerprint changed");
            }
        }
        *cache = Some(SecretCache {
            secret: secret.clone(),
            fingerprint: new_fp,
            fetched_at: Instant::now(),
        });
        Ok(secret)
    }
}

/// Persistent token registry, backed by the storage backend's JSON index
/// convention but addressed directly at `<data_root>/auth/tokens.json`
/// rather than through the group-partitioned blob API.
pub struct TokenRegistry {
    path: std::path::PathBuf,
    lock: Mutex<()>,
}

impl TokenRegistry {
    pub fn new(auth_dir: impl Into<std::path::PathBuf>) -> Self {
        TokenRegistry {
            path: auth_dir.into().join("tokens.json"),
            lock: Mutex::new(()),
        }
    }

    async fn read_all(&self) -> DocResult<Vec<TokenRecord>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes).unwrap_or_default()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, records: &[TokenRecord]) -> DocResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn create(&self, token: String, group: Group, ttl: Duration) -> DocResult<TokenRecord> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let now = chrono::Utc::now();
        let record = TokenRecord {
            token: token.clone(),
            group,
            issued_at: now,
            expires_at: now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(1)),
            revoked: false,
        };
        records.push(record.clone());
        self.write_all(&records).await?;
        Ok(record)
    }

    pub async fn list(&self, group: Option<&str>) -> DocResult<Vec<TokenRecord>> {
        let records = self.read_all().await?;
        Ok(match group {
            Some(g) => records.into_iter().filter(|r| r.group == g).collect(),
            None => records,
        })
    }

    pub async fn revoke(&self, token: &str) -> DocResult<()> {
        let _guard = self.lock.lock().await;
        let mut records = self.read_all().await?;
        let mut found = false;
        for r in records.iter_mut() {
            if r.token == token {
                r.revoked = true;
                found = true;
            }
        }
        if !found {
            return Err(DocError::NotFound("token".into()));
        }
        self.write_all(&records).await
    }

    /// Whether `token` has a registry record marking it revoked. Tokens
    /// with no registry record (e.g. minted outside `create`) are treated
    /// as not revoked.
    pub async fn is_revoked(&self, token: &str) -> DocResult<bool> {
        let records = self.read_all().await?;
        Ok(records.iter().any(|r| r.token == token && r.revoked))
    }
}

/// Verifies bearer tokens and resolves them to a [`TokenInfo`]. Holds the
/// token registry so revocation (spec §3 Lifecycle) is enforced on every
/// verification, not just checked in isolation by the CLI.
pub struct AuthService {
    secrets: SecretProvider,
    algorithm: Algorithm,
    tokens: Arc<TokenRegistry>,
}

impl AuthService {
    pub fn new(secrets: SecretProvider, tokens: Arc<TokenRegistry>) -> Self {
        AuthService {
            secrets,
            algorithm: Algorithm::HS256,
            tokens,
        }
    }

    pub async fn verify(&self, token: &str) -> DocResult<TokenInfo> {
        let secret = self.secrets.current_secret().await?;
        let mut validation = Validation::new(self.algorithm);
        validation.set_audience(&[EXPECTED_AUDIENCE]);
        let data = decode::<serde_json::Value>(token, &DecodingKey::from_secret(&secret), &validation)
            .map_err(|e| DocError::AuthFailed(e.to_string()))?;

        if self.tokens.is_revoked(token).await? {
            return Err(DocError::AuthFailed("token has been revoked".into()));
        }

        let claims = data.claims;
        let group = claims["group"]
            .as_str()
            .ok_or_else(|| DocError::AuthFailed("token is missing the group claim".into()))?
            .to_string();
        let expires_at = claims["exp"]
            .as_i64()
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .ok_or_else(|| DocError::AuthFailed("token is missing a valid exp claim".into()))?;
        let issued_at = claims["iat"]
            .as_i64()
            .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(chrono::Utc::now);

        Ok(TokenInfo { group, issued_at, expires_at })
    }
}

/// Tools that bypass authentication entirely (spec §4.7).
pub const TOKEN_OPTIONAL_TOOLS: &[&str] = &[
    "ping",
    "help",
    "list_templates",
    "get_template_details",
    "list_template_fragments",
    "get_fragment_details",
    "list_styles",
    "list_themes",
    "list_handlers",
];

/// Resolve the token to use for a tool call, per the precedence in §4.2:
/// `auth_token` argument, else legacy `token` argument, else the
/// `Authorization: Bearer ...` header.
pub fn resolve_token<'a>(
    args: &'a serde_json::Map<String, serde_json::Value>,
    bearer_header: Option<&'a str>,
) -> Option<&'a str> {
    args.get("auth_token")
        .and_then(|v| v.as_str())
        .or_else(|| args.get("token").and_then(|v| v.as_str()))
        .or(bearer_header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    struct StaticSecret(Vec<u8>);
    #[async_trait::async_trait]
    impl SecretSource for StaticSecret {
        async fn fetch_secret(&self) -> DocResult<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    fn mint_token(secret: &[u8], group: &str) -> String {
        let now = chrono::Utc::now();
        let claims = serde_json::json!({
            "group": group,
            "aud": EXPECTED_AUDIENCE,
            "iat": now.timestamp(),
            "exp": (now + chrono::Duration::hours(1)).timestamp(),
        });
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    #[tokio::test]
    async fn verify_resolves_group() {
        let secret = b"top-secret".to_vec();
        let provider = SecretProvider::new(Arc::new(StaticSecret(secret.clone())));
        let dir = tempfile::tempdir().unwrap();
        let auth = AuthService::new(provider, Arc::new(TokenRegistry::new(dir.path())));
        let token = mint_token(&secret, "engineering");
        let info = auth.verify(&token).await.unwrap();
        assert_eq!(info.group, "engineering");
    }

    #[tokio::test]
    async fn verify_rejects_bad_signature() {
        let provider = SecretProvider::new(Arc::new(StaticSecret(b"right".to_vec())));
        let dir = tempfile::tempdir().unwrap();
        let auth = AuthService::new(provider, Arc::new(TokenRegistry::new(dir.path())));
        let token = mint_token(b"wrong", "engineering");
        assert!(auth.verify(&token).await.is_err());
    }

    #[tokio::test]
    async fn verify_rejects_revoked_token() {
        let secret = b"top-secret".to_vec();
        let provider = SecretProvider::new(Arc::new(StaticSecret(secret.clone())));
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(TokenRegistry::new(dir.path()));
        let token = mint_token(&secret, "engineering");
        registry.create(token.clone(), "engineering".into(), Duration::from_secs(3600)).await.unwrap();
        registry.revoke(&token).await.unwrap();

        let auth = AuthService::new(provider, registry);
        assert!(auth.verify(&token).await.is_err());
    }

    #[test]
    fn resolution_policy_prefers_auth_token() {
        let mut args = serde_json::Map::new();
        args.insert("auth_token".into(), serde_json::json!("a"));
        args.insert("token".into(), serde_json::json!("b"));
        assert_eq!(resolve_token(&args, Some("c")), Some("a"));
    }

    #[test]
    fn resolution_policy_falls_back_to_header() {
        let args = serde_json::Map::new();
        assert_eq!(resolve_token(&args, Some("header-token")), Some("header-token"));
    }

    #[tokio::test]
    async fn token_registry_create_list_revoke() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TokenRegistry::new(dir.path());
        let record = registry
            .create("tok-1".into(), "acme".into(), Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(!record.revoked);
        let listed = registry.list(Some("acme")).await.unwrap();
        assert_eq!(listed.len(), 1);
        registry.revoke("tok-1").await.unwrap();
        let listed = registry.list(Some("acme")).await.unwrap();
        assert!(listed[0].revoked);
    }
}
