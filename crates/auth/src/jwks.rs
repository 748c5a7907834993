//! JWKS-backed token validator.
//!
//! Flow per token:
//! 1. Decode the header, require a `kid` and an allowed `alg`.
//! 2. Look the `kid` up in the cached key set; refetch on a stale cache or an
//!    unknown `kid` (at most once per [`MIN_REFETCH_INTERVAL`]).
//! 3. Verify signature and `exp` (plus `iss` / `aud` when configured).
//! 4. Return the `sub` claim.

use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey, Validation, decode, decode_header,
    errors::ErrorKind,
    jwk::{Jwk, JwkSet, PublicKeyUse},
};
use promptgate_config::AuthConfig;
use promptgate_types::{AuthError, GatewayError, TokenValidator};
use serde::Deserialize;
use std::{
    str::FromStr as _,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

/// Unknown key ids never trigger refetches more often than this.
const MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(10);

/// Validator settings, resolved from [`AuthConfig`].
#[derive(Debug, Clone)]
pub struct JwksSettings {
    pub jwks_url: String,
    pub cache_ttl: Duration,
    pub algorithms: Vec<Algorithm>,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

impl JwksSettings {
    /// Resolves settings from the `auth` config section.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Config`] if no key set URL is configured or an
    /// algorithm name is unknown.
    pub fn from_config(config: &AuthConfig) -> Result<Self, GatewayError> {
        let jwks_url = config
            .jwks_url
            .clone()
            .ok_or_else(|| GatewayError::Config("auth.jwks_url is not set".into()))?;
        let algorithms = config
            .algorithms
            .iter()
            .map(|name| {
                Algorithm::from_str(name)
                    .map_err(|_| GatewayError::Config(format!("unknown JWT algorithm: {name}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            jwks_url,
            cache_ttl: Duration::from_secs(config.jwks_cache_secs),
            algorithms,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
        })
    }
}

struct CachedKeys {
    keys: JwkSet,
    fetched_at: Instant,
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
}

/// Validates bearer tokens against a remote signing-key set.
pub struct JwksValidator {
    http: reqwest::Client,
    settings: JwksSettings,
    cache: RwLock<Option<CachedKeys>>,
}

impl JwksValidator {
    #[must_use]
    pub fn new(http: reqwest::Client, settings: JwksSettings) -> Self {
        Self {
            http,
            settings,
            cache: RwLock::new(None),
        }
    }

    async fn fetch_keys(&self) -> Result<JwkSet, AuthError> {
        let url = &self.settings.jwks_url;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| AuthError::KeySourceUnreachable(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AuthError::KeySourceUnreachable(format!(
                "{url} answered {status}"
            )));
        }
        let keys: JwkSet = resp
            .json()
            .await
            .map_err(|e| AuthError::KeySourceUnreachable(format!("invalid key set: {e}")))?;
        tracing::debug!(url = %url, keys = keys.keys.len(), "fetched signing keys");
        Ok(keys)
    }

    /// Finds the signing key for `kid`, refreshing the cache when needed.
    async fn signing_key(&self, kid: &str) -> Result<Jwk, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                let age = cached.fetched_at.elapsed();
                if age < self.settings.cache_ttl {
                    if let Some(jwk) = find_signing_key(&cached.keys, kid) {
                        return Ok(jwk.clone());
                    }
                    if age < MIN_REFETCH_INTERVAL {
                        return Err(AuthError::KeyNotFound(kid.to_string()));
                    }
                }
            }
        }

        let keys = self.fetch_keys().await?;
        let found = find_signing_key(&keys, kid).cloned();
        *self.cache.write().await = Some(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });
        found.ok_or_else(|| AuthError::KeyNotFound(kid.to_string()))
    }

    fn validation(&self, alg: Algorithm) -> Validation {
        let mut validation = Validation::new(alg);
        validation.set_required_spec_claims(&["exp"]);
        if let Some(iss) = &self.settings.issuer {
            validation.set_issuer(&[iss]);
        }
        match &self.settings.audience {
            Some(aud) => validation.set_audience(&[aud]),
            None => validation.validate_aud = false,
        }
        validation
    }
}

#[async_trait]
impl TokenValidator for JwksValidator {
    async fn validate(&self, token: &str) -> Result<String, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::Malformed(e.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Malformed("token header has no key id".into()))?;
        if !self.settings.algorithms.contains(&header.alg) {
            return Err(AuthError::Malformed(format!(
                "algorithm {:?} is not accepted",
                header.alg
            )));
        }

        let jwk = self.signing_key(&kid).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| AuthError::InvalidSignature(format!("unusable key {kid}: {e}")))?;

        let data = decode::<Claims>(token, &key, &self.validation(header.alg))
            .map_err(map_jwt_error)?;
        data.claims
            .sub
            .ok_or_else(|| AuthError::Malformed("token has no subject".into()))
    }
}

/// Placeholder validator used when no key set is configured: every token is
/// refused as if the key source were down.
pub struct NoKeySource;

#[async_trait]
impl TokenValidator for NoKeySource {
    async fn validate(&self, _token: &str) -> Result<String, AuthError> {
        Err(AuthError::KeySourceUnreachable(
            "no signing key set configured".into(),
        ))
    }
}

fn find_signing_key<'a>(keys: &'a JwkSet, kid: &str) -> Option<&'a Jwk> {
    keys.keys.iter().find(|jwk| {
        jwk.common.key_id.as_deref() == Some(kid)
            && matches!(
                jwk.common.public_key_use,
                None | Some(PublicKeyUse::Signature)
            )
    })
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> AuthError {
    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::ImmatureSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidKeyFormat => AuthError::InvalidSignature(e.to_string()),
        _ => AuthError::Malformed(e.to_string()),
    }
}
