//! The kite registry.
//!
//! Ties the pieces together:
//! - `register` validates the kite key, persists the record, starts a
//!   [`Refresher`] and arms a lease in the [`LeaseTracker`]
//! - `heartbeat` renews the lease, in memory only
//! - `get_kites` / `get_token` resolve queries and mint one signed token per call
//! - `machine` issues kite keys after an optional external auth hook
use std::sync::Arc;

use crate::config::KontrolConfig;
use crate::error::{ConfigError, KontrolError};
use crate::lease::LeaseTracker;
use crate::query::Query;
use crate::refresher::Refresher;
use crate::storage::Storage;
use crate::token::{TokenClaims, TokenSigner, KITE_KEY_AUDIENCE};
use crate::types::{
    attach_token, Auth, AuthType, GetKitesResult, HeartbeatReply, MachineRequest, RegisterRequest,
    RegisterResult, RegisterValue,
};

/// External hook consulted before a machine receives a kite key.
#[async_trait::async_trait]
pub trait MachineAuthenticator: Send + Sync {
    /// Accept or reject the request. The error text is logged, never returned.
    async fn authenticate(&self, request: &MachineRequest) -> Result<(), String>;
}

pub struct Kontrol {
    config: KontrolConfig,
    storage: Arc<dyn Storage>,
    signer: Arc<dyn TokenSigner>,
    leases: LeaseTracker,
    machine_auth: Option<Arc<dyn MachineAuthenticator>>,
}

impl Kontrol {
    /// Build a registry. Fails if `config` breaks the TTL invariants.
    pub fn new(
        config: KontrolConfig,
        storage: Arc<dyn Storage>,
        signer: Arc<dyn TokenSigner>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let leases = LeaseTracker::new(config.lease_duration());
        Ok(Self {
            config,
            storage,
            signer,
            leases,
            machine_auth: None,
        })
    }

    /// Require `auth` to approve every machine registration.
    pub fn with_machine_authenticator(mut self, auth: Arc<dyn MachineAuthenticator>) -> Self {
        self.machine_auth = Some(auth);
        self
    }

    pub fn config(&self) -> &KontrolConfig {
        &self.config
    }

    pub fn leases(&self) -> &LeaseTracker {
        &self.leases
    }

    /// Register a kite reachable at `request.url`.
    pub async fn register(&self, request: RegisterRequest) -> Result<RegisterResult, KontrolError> {
        let RegisterRequest { kite, url, auth } = request;
        tracing::info!("register request from: {kite}");

        if url.trim().is_empty() {
            return Err(KontrolError::validation("empty url"));
        }
        if kite.id.is_empty() || kite.username.is_empty() {
            return Err(KontrolError::validation("kite id and username are required"));
        }
        if kite.fields().iter().any(|f| f.contains('/')) {
            return Err(KontrolError::validation("kite fields must not contain '/'"));
        }

        // Only kite keys: tokens for this kite are later minted on its behalf.
        let username = self.authenticate(&auth)?;
        if username != kite.username {
            return Err(KontrolError::auth("kite key does not belong to this user"));
        }

        let value = RegisterValue { url: url.clone() };
        if let Err(e) = self.storage.upsert(&kite, &value).await {
            tracing::error!("storage add '{kite}' error: {e}");
            return Err(KontrolError::Internal {
                context: "register",
            });
        }

        let refresher = Refresher::spawn(
            Arc::clone(&self.storage),
            kite.clone(),
            value,
            self.config.update_interval,
        );
        tracing::info!("kite registered: {kite}");
        self.leases.install(kite, refresher);

        Ok(RegisterResult {
            url,
            heartbeat_interval: self.config.heartbeat_interval.as_secs(),
        })
    }

    /// Renew the lease of kite `id`.
    ///
    /// Unknown ids (registry restarted, lease already lost) are told to
    /// register again rather than treated as errors.
    pub fn heartbeat(&self, id: &str) -> HeartbeatReply {
        if self.leases.renew(id) {
            HeartbeatReply::Pong
        } else {
            tracing::debug!("heartbeat from unknown kite {id}, asking it to register again");
            HeartbeatReply::RegisterAgain
        }
    }

    /// Kites matching `query`, each carrying the same token for `requester`.
    pub async fn get_kites(
        &self,
        query: &Query,
        requester: &str,
    ) -> Result<GetKitesResult, KontrolError> {
        query.validate()?;

        // One token for every kite returned; signing is the slow part.
        let token = self.sign_for(query.audience(), requester)?;

        let mut kites = self.storage.get(query).await.map_err(|e| {
            tracing::error!("storage get '{query:?}' error: {e}");
            KontrolError::Internal {
                context: "get kites",
            }
        })?;
        attach_token(&mut kites, &token);

        Ok(GetKitesResult { kites })
    }

    /// Token for the single kite matching `query`, scoped to that kite's key.
    pub async fn get_token(&self, query: &Query, requester: &str) -> Result<String, KontrolError> {
        query.validate()?;

        let kites = self.storage.get(query).await.map_err(|e| {
            tracing::error!("storage get '{query:?}' error: {e}");
            KontrolError::Internal {
                context: "get token",
            }
        })?;

        match kites.as_slice() {
            [] => Err(KontrolError::validation("no kite matches the query")),
            [only] => self.sign_for(only.kite.key(), requester),
            _ => Err(KontrolError::AmbiguousQuery {
                matches: kites.len(),
            }),
        }
    }

    /// Issue a kite key for a machine, after the external hook (if any) approves.
    pub async fn machine(&self, request: MachineRequest) -> Result<String, KontrolError> {
        if let Some(auth) = &self.machine_auth {
            if let Err(e) = auth.authenticate(&request).await {
                tracing::warn!("machine authentication for '{}' failed: {e}", request.username);
                return Err(KontrolError::auth("cannot authenticate user"));
            }
        }
        self.issue_kite_key(&request.username)
    }

    /// Sign a non-expiring kite key for `username`.
    pub fn issue_kite_key(&self, username: &str) -> Result<String, KontrolError> {
        if username.trim().is_empty() {
            return Err(KontrolError::validation("empty username"));
        }
        let claims = TokenClaims::kite_key(username, &self.config.issuer);
        let key = self.signer.sign(&claims)?;
        tracing::info!("issued kite key for {username}");
        Ok(key)
    }

    /// Tear down every lease. Records expire through their TTL.
    pub fn close(&self) {
        let released = self.leases.close();
        tracing::info!("kontrol closed, released {released} leases");
    }

    fn sign_for(&self, audience: String, requester: &str) -> Result<String, KontrolError> {
        if requester.is_empty() {
            return Err(KontrolError::auth("anonymous requests cannot receive tokens"));
        }
        let claims = TokenClaims::new(
            audience,
            requester,
            &self.config.issuer,
            self.config.token_ttl,
            self.config.token_leeway,
        );
        Ok(self.signer.sign(&claims)?)
    }

    /// Check a caller's credential and return the username it speaks for.
    ///
    /// Only kite keys issued by this registry are accepted. Discovery tokens
    /// are refused even though the same key signs them.
    pub fn authenticate(&self, auth: &Auth) -> Result<String, KontrolError> {
        if auth.auth_type != AuthType::KiteKey {
            return Err(KontrolError::auth(format!(
                "unexpected authentication type: {}",
                auth.auth_type
            )));
        }
        let claims = self
            .signer
            .verify(&auth.key)
            .map_err(|e| KontrolError::auth(format!("invalid kite key: {e}")))?;

        if claims.iss != self.config.issuer {
            return Err(KontrolError::auth("kite key was issued by another registry"));
        }
        if claims.aud != KITE_KEY_AUDIENCE || claims.exp.is_some() {
            return Err(KontrolError::auth("credential is not a kite key"));
        }
        if claims.sub.is_empty() {
            return Err(KontrolError::auth("kite key has no subject"));
        }
        Ok(claims.sub)
    }
}
