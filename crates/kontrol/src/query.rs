//! Discovery queries.
//!
//! A query filters on the fields of [`KiteId`]. Empty fields and the literal
//! `*` match anything; set fields must match exactly.
use serde::{Deserialize, Serialize};

use crate::error::KontrolError;
use crate::types::KiteId;

/// Value treated as "match anything" in addition to the empty string.
pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Query {
    pub username: String,
    pub environment: String,
    pub name: String,
    pub version: String,
    pub region: String,
    pub hostname: String,
    pub id: String,
}

fn is_set(value: &str) -> bool {
    !value.is_empty() && value != WILDCARD
}

impl Query {
    /// Query matching a single kite by id.
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Field values in key order, same as [`KiteId::fields`].
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

    /// Reject queries that would match the whole registry or carry
    /// unusable values.
    pub fn validate(&self) -> Result<(), KontrolError> {
        let fields = self.fields();
        if !fields.iter().any(|f| is_set(f)) {
            return Err(KontrolError::InvalidQuery {
                reason: "empty query is not allowed".into(),
            });
        }
        if fields.iter().any(|f| f.contains('/')) {
            return Err(KontrolError::InvalidQuery {
                reason: "query fields must not contain '/'".into(),
            });
        }
        Ok(())
    }

    /// Whether `kite` satisfies every set field of this query.
    pub fn matches(&self, kite: &KiteId) -> bool {
        self.fields()
            .iter()
            .zip(kite.fields())
            .all(|(want, have)| !is_set(want) || *want == have)
    }

    /// Scope a token minted for this query is valid for.
    ///
    /// The key path `/<username>/<environment>/<name>/<version>/<region>/<hostname>/<id>`
    /// cut after the most specific set field; unset segments before it
    /// render as `*`. An id query therefore scopes to that one kite.
    /// Only an empty query, which never passes [`validate`](Self::validate),
    /// yields `/*`.
    pub fn audience(&self) -> String {
        let scope = self.fields();
        let Some(last) = scope.iter().rposition(|f| is_set(f)) else {
            return format!("/{WILDCARD}");
        };

        let mut audience = String::new();
        for field in &scope[..=last] {
            audience.push('/');
            if is_set(field) {
                audience.push_str(field);
            } else {
                audience.push_str(WILDCARD);
            }
        }
        audience
    }
}
