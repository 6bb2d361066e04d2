use std::fmt;

use serde::{Deserialize, Serialize};

use crate::query::Query;

/// Identity of a registered kite.
///
/// Issued by the authentication layer and never mutated by the registry.
/// `id` is unique per running instance; the remaining fields describe it and
/// are what discovery queries filter on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KiteId {
    pub username: String,
    pub environment: String,
    pub name: String,
    pub version: String,
    pub region: String,
    pub hostname: String,
    pub id: String,
}

impl KiteId {
    /// Field values in key order: username, environment, name, version,
    /// region, hostname, id.
    pub fn fields(&self) -> [&str; 7] {
        [
            &self.username,
            &self.environment,
            &self.name,
            &self.version,
            &self.region,
            &self.hostname,
            &self.id,
        ]
    }

    /// Storage key: `/username/environment/name/version/region/hostname/id`.
    pub fn key(&self) -> String {
        let mut key = String::new();
        for field in self.fields() {
            key.push('/');
            key.push_str(field);
        }
        key
    }
}

impl fmt::Display for KiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Value persisted for a registered kite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterValue {
    pub url: String,
}

/// A registration record as returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KiteRecord {
    pub kite: KiteId,
    pub url: String,
    /// Token the consumer presents to the kite itself. Set by discovery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Attach the same token to every record.
pub fn attach_token(records: &mut [KiteRecord], token: &str) {
    for record in records {
        record.token = Some(token.to_string());
    }
}

/// Kind of credential a request was authenticated with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthType {
    /// Kite key issued by this registry. The only type accepted for registration.
    KiteKey,
    /// Short-lived token minted by discovery.
    Token,
    /// Username/password or other session credential.
    Password,
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthType::KiteKey => "kiteKey",
            AuthType::Token => "token",
            AuthType::Password => "password",
        };
        f.write_str(s)
    }
}

/// Credential presented with a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    #[serde(rename = "type")]
    pub auth_type: AuthType,
    pub key: String,
}

/// Register request from a kite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub kite: KiteId,
    pub url: String,
    pub auth: Auth,
}

/// Register response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResult {
    pub url: String,
    /// Seconds between heartbeats the kite must honor.
    pub heartbeat_interval: u64,
}

/// Machine registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineRequest {
    pub username: String,
    /// Opaque credential handed to the machine-authentication hook.
    #[serde(default)]
    pub credential: String,
}

/// Heartbeat answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatReply {
    /// Lease reset.
    Pong,
    /// No lease known; the kite must call register again.
    RegisterAgain,
}

impl HeartbeatReply {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatReply::Pong => "pong",
            HeartbeatReply::RegisterAgain => "registeragain",
        }
    }
}

impl fmt::Display for HeartbeatReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discovery response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetKitesResult {
    pub kites: Vec<KiteRecord>,
}

/// Discovery or token request: a query plus the caller's kite key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: Query,
    pub auth: Auth,
}

/// Answer to a token request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResult {
    pub token: String,
}

/// Answer to a machine registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KiteKeyResult {
    pub kite_key: String,
}

/// Current Unix time in seconds.
pub fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
