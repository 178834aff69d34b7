//! Access token provisioning and refresh.
//!
//! Each node holds one access token per token client on disk under
//! `tokens/<client>/access_token`. The `TokenManager` provisions missing
//! tokens at start, then periodically refreshes every token that is about
//! to expire. Tokens are JWTs; only their payload claims are read here,
//! signatures are never verified.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use ensim_core::{NodeLifecycle, Settings, TOKEN_CLIENTS};

use crate::error::{TokenError, TokenResult};

/// Token client whose token also determines the node's tenant.
pub const TENANT_TOKEN_CLIENT: &str = "node-agent";

/// Claims read from a token payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default)]
    pub realm_access: RealmAccess,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub raw: String,
    pub expires_at: DateTime<Utc>,
}

/// Decode the payload claims of a JWT without verifying it.
pub fn token_claims(token: &str) -> TokenResult<TokenClaims> {
    let mut parts = token.trim().split('.');
    let payload = match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => return Err(TokenError::Malformed("expected three dot-separated parts".into())),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| TokenError::Malformed(format!("payload is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| TokenError::Malformed(format!("payload is not valid claims JSON: {e}")))
}

pub fn token_expiry(token: &str) -> TokenResult<DateTime<Utc>> {
    let claims = token_claims(token)?;
    DateTime::<Utc>::from_timestamp(claims.exp, 0)
        .ok_or_else(|| TokenError::Malformed(format!("exp {} out of range", claims.exp)))
}

/// Tenant UUID carried in the token's realm roles as `<tenant>_<role>`.
pub fn tenant_id_from_token(token: &str) -> TokenResult<String> {
    let claims = token_claims(token)?;
    let mut tenants: Vec<String> = Vec::new();
    for role in &claims.realm_access.roles {
        let Some((prefix, _)) = role.split_once('_') else {
            continue;
        };
        if prefix.len() != 36 || uuid::Uuid::try_parse(prefix).is_err() {
            continue;
        }
        if !tenants.iter().any(|t| t == prefix) {
            tenants.push(prefix.to_string());
        }
    }
    match tenants.len() {
        0 => Err(TokenError::NoTenant),
        1 => Ok(tenants.remove(0)),
        _ => Err(TokenError::MultipleTenants(tenants)),
    }
}

/// Create the tenant-ID file from `token` unless it already exists.
///
/// Returns `false` when the file was already present.
pub async fn create_tenant_id_file(path: &Path, token: &str) -> TokenResult<bool> {
    let io_err = |source| TokenError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(io_err(e)),
    };

    let written = match tenant_id_from_token(token) {
        Ok(tenant) => file
            .write_all(format!("TENANT_ID={tenant}").as_bytes())
            .await
            .map_err(io_err),
        Err(e) => Err(e),
    };
    if let Err(e) = written {
        drop(file);
        if let Err(rm) = tokio::fs::remove_file(path).await {
            warn!(path = %path.display(), error = %rm, "failed to remove partial tenant file");
        }
        return Err(e);
    }
    Ok(true)
}

/// Mint an unsigned JWT with the given subject, roles and expiry.
pub fn mint_unsigned_token(subject: &str, roles: Vec<String>, expires_at: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let claims = TokenClaims {
        exp: expires_at.timestamp(),
        iat: Some(Utc::now().timestamp()),
        sub: Some(subject.to_string()),
        realm_access: RealmAccess { roles },
    };
    let payload = serde_json::to_vec(&claims).unwrap_or_default();
    format!("{header}.{}.", URL_SAFE_NO_PAD.encode(payload))
}

// ── Providers ──────────────────────────────────────────────────

/// Source of fresh access tokens for a node's token clients.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn issue(&self, settings: &Settings, client: &str) -> TokenResult<String>;
}

/// Issues unsigned tokens for one tenant without any identity provider.
#[derive(Debug, Clone)]
pub struct LocalTokenProvider {
    tenant_id: String,
    lifetime: Duration,
}

impl LocalTokenProvider {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            lifetime: Duration::from_secs(3600),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

#[async_trait]
impl TokenProvider for LocalTokenProvider {
    async fn issue(&self, settings: &Settings, client: &str) -> TokenResult<String> {
        let lifetime = TimeDelta::from_std(self.lifetime).map_err(|e| TokenError::Provider {
            client: client.to_string(),
            reason: e.to_string(),
        })?;
        let roles = vec![
            format!("{}_{client}-read-write-role", self.tenant_id),
            "default-roles-master".to_string(),
        ];
        Ok(mint_unsigned_token(
            &format!("{}:{client}", settings.uuid),
            roles,
            Utc::now() + lifetime,
        ))
    }
}

// ── Manager ────────────────────────────────────────────────────

pub struct TokenManager {
    settings: Arc<Settings>,
    provider: Arc<dyn TokenProvider>,
    tokens: RwLock<HashMap<String, AccessToken>>,
}

impl TokenManager {
    pub fn new(settings: Arc<Settings>, provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            settings,
            provider,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    /// Load tokens already on disk, provision or refresh every client, and
    /// spawn the periodic refresh loop.
    pub async fn start(self: &Arc<Self>, lifecycle: &NodeLifecycle) -> TokenResult<()> {
        let loaded = self.load_existing().await?;
        let refreshed = self.refresh_due().await?;
        info!(loaded, refreshed, "token manager started");

        let tm = Arc::clone(self);
        let cancel = lifecycle.token();
        let every = self.settings.timings.token_refresh_check;
        lifecycle.spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match tm.refresh_due().await {
                            Ok(0) => {}
                            Ok(n) => debug!(refreshed = n, "tokens refreshed"),
                            Err(e) => warn!(error = %e, "token refresh failed"),
                        }
                    }
                }
            }
            debug!("token refresh loop stopped");
        });
        Ok(())
    }

    async fn load_existing(&self) -> TokenResult<usize> {
        let paths = self.settings.paths();
        let mut tokens = self.tokens.write().await;
        for client in TOKEN_CLIENTS {
            let path = paths.token(client);
            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => raw.trim().to_string(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => return Err(TokenError::Io { path, source }),
            };
            if raw.is_empty() {
                continue;
            }
            let expires_at = token_expiry(&raw)?;
            tokens.insert(client.to_string(), AccessToken { raw, expires_at });
        }
        Ok(tokens.len())
    }

    /// Issue a token for every client that has none or whose token expires
    /// within the refresh margin. Returns how many were issued.
    pub async fn refresh_due(&self) -> TokenResult<usize> {
        let margin = TimeDelta::from_std(self.settings.timings.token_refresh_margin)
            .unwrap_or(TimeDelta::MAX);
        let now = Utc::now();
        let mut refreshed = 0;

        for client in TOKEN_CLIENTS {
            let due = match self.tokens.read().await.get(client) {
                None => true,
                Some(t) => t.expires_at - now <= margin,
            };
            if !due {
                continue;
            }

            let raw = self.provider.issue(&self.settings, client).await?;
            let expires_at = token_expiry(&raw)?;
            self.persist(client, &raw).await?;
            self.tokens
                .write()
                .await
                .insert(client.to_string(), AccessToken { raw, expires_at });
            refreshed += 1;
            debug!(%client, %expires_at, "token issued");
        }

        if let Some(token) = self.token(TENANT_TOKEN_CLIENT).await {
            if create_tenant_id_file(&self.settings.paths().tenant_id(), &token.raw).await? {
                info!("tenant ID file created");
            }
        }
        Ok(refreshed)
    }

    async fn persist(&self, client: &str, raw: &str) -> TokenResult<()> {
        let paths = self.settings.paths();
        let dir = paths.token_dir(client);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| TokenError::Io { path: dir, source })?;
        let path = paths.token(client);
        tokio::fs::write(&path, raw)
            .await
            .map_err(|source| TokenError::Io { path, source })
    }

    pub async fn token(&self, client: &str) -> Option<AccessToken> {
        self.tokens.read().await.get(client).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TENANT: &str = "1b3e6a60-2f7c-4a1e-9c7d-0a1b2c3d4e5f";

    fn settings(dir: &Path) -> Arc<Settings> {
        Arc::new(Settings::new("9a8b7c6d-0000-4000-8000-00000000abcd", dir))
    }

    #[test]
    fn minted_token_roundtrips_claims() {
        let exp = Utc::now() + TimeDelta::hours(1);
        let token = mint_unsigned_token("node", vec![format!("{TENANT}_admin")], exp);
        assert_eq!(token.split('.').count(), 3);
        assert_eq!(token_expiry(&token).unwrap().timestamp(), exp.timestamp());
        assert_eq!(tenant_id_from_token(&token).unwrap(), TENANT);
    }

    #[test]
    fn tenant_extraction_rules() {
        let exp = Utc::now();
        let none = mint_unsigned_token("n", vec!["default-roles".into(), "not-a-uuid_role".into()], exp);
        assert!(matches!(tenant_id_from_token(&none), Err(TokenError::NoTenant)));

        let other = "2c4f7b71-3a8d-4b2f-8d8e-1b2c3d4e5f60";
        let many = mint_unsigned_token(
            "n",
            vec![format!("{TENANT}_a"), format!("{TENANT}_b"), format!("{other}_c")],
            exp,
        );
        match tenant_id_from_token(&many) {
            Err(TokenError::MultipleTenants(ids)) => assert_eq!(ids.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(token_claims("not-a-jwt").is_err());
        assert!(token_claims("a.!!!.c").is_err());
        let junk = format!("a.{}.c", URL_SAFE_NO_PAD.encode("[1,2]"));
        assert!(token_claims(&junk).is_err());
    }

    #[tokio::test]
    async fn tenant_file_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenantId");
        let token = mint_unsigned_token("n", vec![format!("{TENANT}_r")], Utc::now());

        assert!(create_tenant_id_file(&path, &token).await.unwrap());
        assert!(!create_tenant_id_file(&path, "garbage").await.unwrap());
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, format!("TENANT_ID={TENANT}"));
    }

    #[tokio::test]
    async fn tenant_file_removed_on_bad_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tenantId");
        assert!(create_tenant_id_file(&path, "garbage").await.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn start_provisions_every_client() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let tm = Arc::new(TokenManager::new(
            settings.clone(),
            Arc::new(LocalTokenProvider::new(TENANT)),
        ));
        let lifecycle = NodeLifecycle::new(&settings.uuid);

        tm.start(&lifecycle).await.unwrap();

        let paths = settings.paths();
        for client in TOKEN_CLIENTS {
            let raw = std::fs::read_to_string(paths.token(client)).unwrap();
            assert!(token_expiry(&raw).unwrap() > Utc::now());
        }
        let tenant = std::fs::read_to_string(paths.tenant_id()).unwrap();
        assert_eq!(tenant, format!("TENANT_ID={TENANT}"));

        // Fresh tokens are not re-issued.
        assert_eq!(tm.refresh_due().await.unwrap(), 0);
        lifecycle.shutdown().await;
    }

    #[tokio::test]
    async fn expiring_tokens_are_refreshed() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        // Lifetime below the 10 minute margin: every check refreshes.
        let provider = LocalTokenProvider::new(TENANT).with_lifetime(Duration::from_secs(60));
        let tm = TokenManager::new(settings, Arc::new(provider));

        assert_eq!(tm.refresh_due().await.unwrap(), TOKEN_CLIENTS.len());
        assert_eq!(tm.refresh_due().await.unwrap(), TOKEN_CLIENTS.len());
    }

    #[tokio::test]
    async fn existing_tokens_are_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let paths = settings.paths();
        let exp = Utc::now() + TimeDelta::hours(2);
        let token = mint_unsigned_token("n", vec![format!("{TENANT}_r")], exp);
        std::fs::create_dir_all(paths.token_dir("prometheus")).unwrap();
        std::fs::write(paths.token("prometheus"), format!("{token}\n")).unwrap();

        let tm = TokenManager::new(settings, Arc::new(LocalTokenProvider::new(TENANT)));
        assert_eq!(tm.load_existing().await.unwrap(), 1);
        assert_eq!(tm.refresh_due().await.unwrap(), TOKEN_CLIENTS.len() - 1);
        assert_eq!(tm.token("prometheus").await.unwrap().raw, token);
    }

    #[tokio::test]
    async fn unparsable_token_on_disk_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let paths = settings.paths();
        std::fs::create_dir_all(paths.token_dir("node-agent")).unwrap();
        std::fs::write(paths.token("node-agent"), "garbage").unwrap();

        let tm = Arc::new(TokenManager::new(
            settings.clone(),
            Arc::new(LocalTokenProvider::new(TENANT)),
        ));
        let lifecycle = NodeLifecycle::new(&settings.uuid);
        assert!(tm.start(&lifecycle).await.is_err());
        assert_eq!(lifecycle.running_tasks(), 0);
    }
}
