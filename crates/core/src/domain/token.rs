use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Memory,
    PersistentCache,
    Authenticated,
}

impl TokenSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::PersistentCache => "persistent_cache",
            Self::Authenticated => "authenticated",
        }
    }
}

/// Bearer token handed to provider adapters.
#[derive(Clone, Debug)]
pub struct AccessToken {
    pub value: SecretString,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub source: TokenSource,
}

impl AccessToken {
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// A token is usable only while more than `safety_margin` of its lifetime remains.
    pub fn is_usable(&self, now: DateTime<Utc>, safety_margin: Duration) -> bool {
        self.remaining(now) > safety_margin
    }

    pub fn needs_renewal(&self, now: DateTime<Utc>, renewal_window: Duration) -> bool {
        self.remaining(now) < renewal_window
    }

    pub fn same_value(&self, other: &AccessToken) -> bool {
        self.value.expose_secret() == other.value.expose_secret()
    }

    pub fn with_source(mut self, source: TokenSource) -> Self {
        self.source = source;
        self
    }

    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.value.expose_secret())
    }
}

/// Token as returned by a provider's credential endpoint.
#[derive(Clone, Debug)]
pub struct IssuedToken {
    pub access_token: SecretString,
    pub expires_in_secs: i64,
}

impl IssuedToken {
    /// `None` when `now + expires_in_secs` falls outside the timestamp range.
    pub fn into_access_token(self, now: DateTime<Utc>) -> Option<AccessToken> {
        let expires_at = Duration::try_seconds(self.expires_in_secs)
            .and_then(|lifetime| now.checked_add_signed(lifetime))?;
        Some(AccessToken {
            value: self.access_token,
            issued_at: now,
            expires_at,
            source: TokenSource::Authenticated,
        })
    }
}

/// Row of the persistent token cache.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedTokenRecord {
    pub id: String,
    pub cache_key: CacheKey,
    #[serde(skip_serializing)]
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub hit_count: u32,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl CachedTokenRecord {
    pub fn into_access_token(self) -> AccessToken {
        AccessToken {
            value: self.token.into(),
            issued_at: self.created_at,
            expires_at: self.expires_at,
            source: TokenSource::PersistentCache,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCacheSummary {
    pub active_rows: u32,
    pub inactive_rows: u32,
    pub total_hits: u64,
    pub active_expires_at: Option<DateTime<Utc>>,
}
