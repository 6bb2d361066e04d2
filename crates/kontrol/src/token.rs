//! Token minting and verification.
//!
//! A token is `base64url(msgpack(claims)).base64url(signature)`. The signer
//! is a trait so deployments can swap the algorithm; [`Ed25519Signer`] is
//! the default.
use std::fmt;
use std::time::Duration;

use data_encoding::{BASE64URL_NOPAD, HEXLOWER};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::TokenError;
use crate::types::now_secs;

/// Audience of every kite key.
pub const KITE_KEY_AUDIENCE: &str = "/";

/// Claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Scope the token is valid for (see [`Query::audience`](crate::Query::audience)).
    pub aud: String,
    /// User the token was issued to.
    pub sub: String,
    /// Registry that issued it.
    pub iss: String,
    /// Issued at (Unix seconds, backdated by the configured leeway).
    pub iat: u64,
    /// Expiry (Unix seconds). `None` for kite keys, which do not expire.
    pub exp: Option<u64>,
    /// Unique token id.
    pub jti: String,
}

impl TokenClaims {
    /// Claims for a short-lived token issued now.
    pub fn new(
        aud: impl Into<String>,
        sub: impl Into<String>,
        iss: impl Into<String>,
        ttl: Duration,
        leeway: Duration,
    ) -> Self {
        let now = now_secs();
        Self {
            aud: aud.into(),
            sub: sub.into(),
            iss: iss.into(),
            iat: now.saturating_sub(leeway.as_secs()),
            exp: Some(now + ttl.as_secs()),
            jti: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Claims for a kite key: audience `/`, no expiry.
    pub fn kite_key(sub: impl Into<String>, iss: impl Into<String>) -> Self {
        Self {
            aud: KITE_KEY_AUDIENCE.to_string(),
            sub: sub.into(),
            iss: iss.into(),
            iat: now_secs(),
            exp: None,
            jti: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Whether the token is past its expiry at `now` (Unix seconds).
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.exp.is_some_and(|exp| now >= exp)
    }
}

/// Pluggable token signer.
pub trait TokenSigner: Send + Sync {
    /// Sign `claims` into an opaque token string.
    fn sign(&self, claims: &TokenClaims) -> Result<String, TokenError>;

    /// Check the signature and expiry of `token` and return its claims.
    fn verify(&self, token: &str) -> Result<TokenClaims, TokenError>;
}

/// Ed25519 token signer.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Signer from a 32-byte secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Signer with a freshly generated key.
    pub fn generate() -> Self {
        let seed: [u8; 32] = rand::random();
        Self::from_seed(&seed)
    }

    /// Secret seed, for persisting the key.
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("public_key", &HEXLOWER.encode(&self.public_key()))
            .finish()
    }
}

impl TokenSigner for Ed25519Signer {
    fn sign(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        let payload = BASE64URL_NOPAD.encode(&rmp_serde::to_vec(claims)?);
        let signature = self.signing_key.sign(payload.as_bytes());
        Ok(format!(
            "{payload}.{}",
            BASE64URL_NOPAD.encode(&signature.to_bytes())
        ))
    }

    fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let (payload, signature) = token
            .split_once('.')
            .ok_or_else(|| TokenError::Malformed("missing signature segment".into()))?;

        let sig_bytes: [u8; 64] = BASE64URL_NOPAD
            .decode(signature.as_bytes())
            .map_err(|e| TokenError::Malformed(format!("signature encoding: {e}")))?
            .try_into()
            .map_err(|_| TokenError::Malformed("signature must be 64 bytes".into()))?;
        let signature = ed25519_dalek::Signature::from_bytes(&sig_bytes);
        self.verifying_key()
            .verify_strict(payload.as_bytes(), &signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let raw = BASE64URL_NOPAD
            .decode(payload.as_bytes())
            .map_err(|e| TokenError::Malformed(format!("payload encoding: {e}")))?;
        let claims: TokenClaims = rmp_serde::from_slice(&raw)?;

        if claims.is_expired_at(now_secs()) {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}
