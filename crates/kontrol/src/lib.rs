//! Kontrol: a registry for a mesh of kites.
//!
//! Kites register the URL they are reachable at, keep a lease alive with
//! heartbeats, and find each other through queries that come back with a
//! signed token scoped to the query's audience.
//!
//! Liveness lives in memory (leases); durability lives in the storage
//! backend (records with a TTL, kept fresh by a background refresher).
//! Tokens: Ed25519 over MessagePack claims by default.

pub mod config;
pub mod error;
pub mod lease;
pub mod query;
pub mod refresher;
pub mod registry;
pub mod storage;
pub mod token;
pub mod types;

pub use config::KontrolConfig;
pub use error::{ConfigError, KontrolError, StorageError, TokenError};
pub use lease::{LeaseEvent, LeaseTracker};
pub use query::Query;
pub use refresher::Refresher;
pub use registry::{Kontrol, MachineAuthenticator};
pub use storage::{MemoryStorage, Storage};
pub use token::{Ed25519Signer, TokenClaims, TokenSigner, KITE_KEY_AUDIENCE};
pub use types::{
    attach_token, now_secs, Auth, AuthType, GetKitesResult, HeartbeatReply, KiteId, KiteKeyResult,
    KiteRecord, MachineRequest, QueryRequest, RegisterRequest, RegisterResult, RegisterValue,
    TokenResult,
};
