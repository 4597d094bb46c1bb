//! JWKS fetching and caching
//!
//! One cache per process, keyed by issuer URL. Entries live for a TTL;
//! a token whose key id is unknown flushes the issuer's entry and
//! refetches once to pick up rotated keys. A second miss is a hard
//! [`AuthError::UnknownKey`].

use crate::error::AuthError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ragvault_core::traits::clock::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// One RSA public key from a JWKS document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    /// Base64url modulus.
    #[serde(default)]
    pub n: String,
    /// Base64url public exponent.
    #[serde(default)]
    pub e: String,
}

/// A `/.well-known/jwks.json` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

/// Fetches the JWKS document for an issuer.
#[async_trait]
pub trait JwksFetcher: Send + Sync {
    async fn fetch(&self, issuer: &str) -> Result<JwkSet, AuthError>;
}

/// Production fetcher hitting `<issuer>/.well-known/jwks.json`.
#[derive(Debug, Clone)]
pub struct HttpJwksFetcher {
    client: reqwest::Client,
}

impl HttpJwksFetcher {
    /// # Errors
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new() -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::KeyFetch {
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JwksFetcher for HttpJwksFetcher {
    async fn fetch(&self, issuer: &str) -> Result<JwkSet, AuthError> {
        let uri = format!("{}/.well-known/jwks.json", issuer.trim_end_matches('/'));
        let response = self
            .client
            .get(&uri)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                error!(issuer, error = %e, "JWKS fetch failed");
                AuthError::KeyFetch {
                    message: e.to_string(),
                }
            })?;
        response.json::<JwkSet>().await.map_err(|e| {
            error!(issuer, error = %e, "JWKS body was not valid JSON");
            AuthError::KeyFetch {
                message: e.to_string(),
            }
        })
    }
}

/// Per-issuer cache diagnostics for operator inspection.
#[derive(Debug, Clone, Serialize)]
pub struct JwksCacheStats {
    pub age_seconds: i64,
    pub ttl_remaining: i64,
    pub key_count: usize,
}

struct CachedSet {
    set: JwkSet,
    fetched_at: DateTime<Utc>,
}

/// Process-wide JWKS cache. Created once at startup and shared by
/// reference; writes only happen on fetch-on-miss.
pub struct JwksCache {
    store: DashMap<String, CachedSet>,
    fetcher: Arc<dyn JwksFetcher>,
    clock: Arc<dyn Clock>,
    ttl: chrono::Duration,
}

impl JwksCache {
    #[must_use]
    pub fn new(fetcher: Arc<dyn JwksFetcher>, clock: Arc<dyn Clock>, ttl_secs: u64) -> Self {
        Self {
            store: DashMap::new(),
            fetcher,
            clock,
            ttl: chrono::Duration::seconds(i64::try_from(ttl_secs).unwrap_or(3600)),
        }
    }

    /// Resolve the key for `kid` under `issuer`.
    ///
    /// # Errors
    /// [`AuthError::UnknownKey`] when the key id is absent even after a
    /// forced refresh; [`AuthError::KeyFetch`] when the endpoint cannot
    /// be reached.
    pub async fn signing_key(&self, issuer: &str, kid: &str) -> Result<Jwk, AuthError> {
        for attempt in 0..2 {
            if attempt == 1 {
                // Force a refresh: the key may have rotated since the
                // cached document was fetched.
                self.store.remove(issuer);
            }

            let set = self.fetch_cached(issuer).await?;
            if let Some(key) = set.keys.iter().find(|k| k.kid.as_deref() == Some(kid)) {
                return Ok(key.clone());
            }
        }

        Err(AuthError::UnknownKey {
            kid: kid.to_string(),
        })
    }

    async fn fetch_cached(&self, issuer: &str) -> Result<JwkSet, AuthError> {
        let now = self.clock.now();

        if let Some(entry) = self.store.get(issuer) {
            if now - entry.fetched_at < self.ttl {
                return Ok(entry.set.clone());
            }
        }

        let set = self.fetcher.fetch(issuer).await?;
        debug!(issuer, keys = set.keys.len(), "JWKS refreshed");
        self.store.insert(
            issuer.to_string(),
            CachedSet {
                set: set.clone(),
                fetched_at: now,
            },
        );
        Ok(set)
    }

    /// Flush the entire cache.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Per-issuer age and remaining TTL.
    #[must_use]
    pub fn stats(&self) -> HashMap<String, JwksCacheStats> {
        let now = self.clock.now();
        self.store
            .iter()
            .map(|entry| {
                let age = (now - entry.fetched_at).num_seconds();
                (
                    entry.key().clone(),
                    JwksCacheStats {
                        age_seconds: age,
                        ttl_remaining: (self.ttl.num_seconds() - age).max(0),
                        key_count: entry.set.keys.len(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl FakeClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Utc::now()),
            })
        }

        fn advance(&self, secs: i64) {
            *self.now.lock() += chrono::Duration::seconds(secs);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock()
        }
    }

    fn key(kid: &str) -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            kid: Some(kid.to_string()),
            alg: Some("RS256".to_string()),
            n: "AQAB".to_string(),
            e: "AQAB".to_string(),
        }
    }

    /// Fetcher serving a sequence of documents, one per fetch.
    struct SequenceFetcher {
        documents: Vec<Result<JwkSet, String>>,
        calls: AtomicUsize,
    }

    impl SequenceFetcher {
        fn new(documents: Vec<Result<JwkSet, String>>) -> Arc<Self> {
            Arc::new(Self {
                documents,
                calls: AtomicUsize::new(0),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl JwksFetcher for SequenceFetcher {
        async fn fetch(&self, _issuer: &str) -> Result<JwkSet, AuthError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            let doc = self
                .documents
                .get(idx.min(self.documents.len() - 1))
                .cloned()
                .unwrap_or_else(|| Ok(JwkSet::default()));
            doc.map_err(|message| AuthError::KeyFetch { message })
        }
    }

    #[tokio::test]
    async fn cached_document_is_reused_within_ttl() {
        let fetcher = SequenceFetcher::new(vec![Ok(JwkSet {
            keys: vec![key("k1")],
        })]);
        let cache = JwksCache::new(fetcher.clone(), FakeClock::new(), 3600);

        cache.signing_key("https://iss", "k1").await.unwrap();
        cache.signing_key("https://iss", "k1").await.unwrap();
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let clock = FakeClock::new();
        let fetcher = SequenceFetcher::new(vec![
            Ok(JwkSet {
                keys: vec![key("k1")],
            }),
            Ok(JwkSet {
                keys: vec![key("k1")],
            }),
        ]);
        let cache = JwksCache::new(fetcher.clone(), clock.clone(), 3600);

        cache.signing_key("https://iss", "k1").await.unwrap();
        clock.advance(3601);
        cache.signing_key("https://iss", "k1").await.unwrap();
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn unknown_kid_triggers_exactly_one_refetch() {
        // First document misses the kid, second (post-rotation) has it.
        let fetcher = SequenceFetcher::new(vec![
            Ok(JwkSet {
                keys: vec![key("old")],
            }),
            Ok(JwkSet {
                keys: vec![key("old"), key("rotated")],
            }),
        ]);
        let cache = JwksCache::new(fetcher.clone(), FakeClock::new(), 3600);

        let found = cache.signing_key("https://iss", "rotated").await.unwrap();
        assert_eq!(found.kid.as_deref(), Some("rotated"));
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn second_miss_is_unknown_key() {
        let fetcher = SequenceFetcher::new(vec![
            Ok(JwkSet {
                keys: vec![key("old")],
            }),
            Ok(JwkSet {
                keys: vec![key("old")],
            }),
        ]);
        let cache = JwksCache::new(fetcher.clone(), FakeClock::new(), 3600);

        let err = cache
            .signing_key("https://iss", "missing")
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UnknownKey { kid } if kid == "missing"));
        assert_eq!(fetcher.call_count(), 2);
    }

    #[tokio::test]
    async fn fetch_failure_maps_to_key_fetch_error() {
        let fetcher = SequenceFetcher::new(vec![Err("connection refused".to_string())]);
        let cache = JwksCache::new(fetcher, FakeClock::new(), 3600);

        let err = cache.signing_key("https://iss", "k1").await.unwrap_err();
        assert!(matches!(err, AuthError::KeyFetch { .. }));
    }

    #[tokio::test]
    async fn stats_reports_age_and_remaining_ttl() {
        let clock = FakeClock::new();
        let fetcher = SequenceFetcher::new(vec![Ok(JwkSet {
            keys: vec![key("k1"), key("k2")],
        })]);
        let cache = JwksCache::new(fetcher, clock.clone(), 3600);

        cache.signing_key("https://iss", "k1").await.unwrap();
        clock.advance(100);

        let stats = cache.stats();
        let issuer_stats = &stats["https://iss"];
        assert_eq!(issuer_stats.age_seconds, 100);
        assert_eq!(issuer_stats.ttl_remaining, 3500);
        assert_eq!(issuer_stats.key_count, 2);

        cache.clear();
        assert!(cache.stats().is_empty());
    }
}
