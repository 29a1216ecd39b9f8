//! # External Metadata Enrichment
//!
//! Paired bot trades need a display symbol/name for their token before they
//! can be emitted. This module resolves them through an external lookup
//! service behind a bounded worker pool: a semaphore caps simultaneous
//! in-flight calls across all pairing groups of a page, and each call gets a
//! small number of attempts with exponential backoff. Only transport-class
//! failures are retried; a well-formed rejection or a response missing the
//! required fields drops the group for this cycle.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::EnrichmentConfig;
use crate::errors::{LookupError, SyncError};
use crate::metrics::LOOKUP_OUTCOMES;

/// Display metadata for a token, as resolved by the lookup service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenMetadata {
    pub symbol: String,
    pub name: String,
}

/// A standardized interface for any metadata lookup backend.
#[async_trait]
pub trait MetadataLookup: Send + Sync + fmt::Debug {
    async fn token_metadata(&self, token_address: &str) -> Result<TokenMetadata, LookupError>;

    /// Returns the name of the lookup implementation.
    fn name(&self) -> &'static str;
}

//================================================================================================//
//                                    HTTP IMPLEMENTATION                                         //
//================================================================================================//

#[derive(Deserialize)]
struct LookupReply {
    token: Option<TokenEnvelope>,
}

#[derive(Deserialize)]
struct TokenEnvelope {
    metadata: Option<MetadataFields>,
}

#[derive(Deserialize)]
struct MetadataFields {
    symbol: Option<String>,
    name: Option<String>,
}

/// Coin-info service client: `GET {base_url}/{token_address}/0`.
#[derive(Debug, Clone)]
pub struct HttpMetadataLookup {
    client: Client,
    base_url: String,
}

impl HttpMetadataLookup {
    pub fn new(config: &EnrichmentConfig) -> Result<Self, SyncError> {
        if config.base_url.trim().is_empty() {
            return Err(SyncError::Config(
                "COIN_INFO_API_URL must be set for enrichment streams".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MetadataLookup for HttpMetadataLookup {
    async fn token_metadata(&self, token_address: &str) -> Result<TokenMetadata, LookupError> {
        let url = format!("{}/{}/0", self.base_url, token_address);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LookupError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(LookupError::Transient(format!("status {}", status)));
        }
        if !status.is_success() {
            return Err(LookupError::Permanent(status.as_u16()));
        }

        let reply: LookupReply = response
            .json()
            .await
            .map_err(|e| LookupError::Transient(e.to_string()))?;

        let metadata = reply
            .token
            .and_then(|t| t.metadata)
            .ok_or(LookupError::MissingMetadata)?;
        match (metadata.symbol, metadata.name) {
            (Some(symbol), Some(name)) if !symbol.is_empty() && !name.is_empty() => {
                Ok(TokenMetadata { symbol, name })
            }
            _ => Err(LookupError::MissingMetadata),
        }
    }

    fn name(&self) -> &'static str {
        "coin-info-http"
    }
}

//================================================================================================//
//                                      FETCHER                                                   //
//================================================================================================//

/// Bounded, retrying front-end over a [`MetadataLookup`].
#[derive(Debug)]
pub struct EnrichmentFetcher<L> {
    lookup: Arc<L>,
    permits: Arc<Semaphore>,
    max_attempts: u32,
    base_delay: std::time::Duration,
}

// Manual impl: `L` itself does not need to be `Clone` behind the `Arc`.
impl<L> Clone for EnrichmentFetcher<L> {
    fn clone(&self) -> Self {
        Self {
            lookup: Arc::clone(&self.lookup),
            permits: Arc::clone(&self.permits),
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
        }
    }
}

impl<L> EnrichmentFetcher<L>
where
    L: MetadataLookup + 'static,
{
    pub fn new(lookup: Arc<L>, config: &EnrichmentConfig) -> Self {
        Self {
            lookup,
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay,
        }
    }

    /// Resolve one token with retries. `None` means the token's pairing
    /// group must be dropped for this cycle.
    pub async fn fetch(&self, token_address: &str) -> Option<TokenMetadata> {
        let mut delay = self.base_delay;

        for attempt in 1..=self.max_attempts {
            match self.lookup.token_metadata(token_address).await {
                Ok(metadata) => {
                    LOOKUP_OUTCOMES.with_label_values(&["ok"]).inc();
                    return Some(metadata);
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    debug!(
                        token = token_address,
                        attempt,
                        max = self.max_attempts,
                        %err,
                        "Transient lookup failure, backing off"
                    );
                    sleep(delay).await;
                    delay *= 2;
                }
                Err(err) => {
                    let outcome = match &err {
                        LookupError::Transient(_) => "transient",
                        LookupError::Permanent(_) => "permanent",
                        LookupError::MissingMetadata => "missing",
                    };
                    LOOKUP_OUTCOMES.with_label_values(&[outcome]).inc();
                    warn!(
                        token = token_address,
                        source = self.lookup.name(),
                        %err,
                        "Metadata lookup failed; dropping group for this cycle"
                    );
                    return None;
                }
            }
        }
        None
    }

    /// Resolve many tokens concurrently under the configured permit cap.
    /// Tokens that fail are simply absent from the returned map.
    pub async fn fetch_many(
        &self,
        tokens: Vec<String>,
    ) -> Result<HashMap<String, TokenMetadata>, SyncError> {
        let mut handles = Vec::with_capacity(tokens.len());

        for token in tokens {
            let fetcher = self.clone();
            let permits = Arc::clone(&self.permits);
            handles.push(tokio::spawn(async move {
                // Closed only on shutdown; treat as a failed lookup.
                let Ok(_permit) = permits.acquire().await else {
                    return (token, None);
                };
                let metadata = fetcher.fetch(&token).await;
                (token, metadata)
            }));
        }

        let mut resolved = HashMap::new();
        for handle in handles {
            let (token, metadata) = handle.await?;
            if let Some(metadata) = metadata {
                resolved.insert(token, metadata);
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    fn test_config(concurrency: usize, attempts: u32) -> EnrichmentConfig {
        EnrichmentConfig {
            base_url: "http://localhost".to_string(),
            concurrency,
            max_attempts: attempts,
            base_delay: Duration::from_millis(1),
            http_timeout: Duration::from_secs(1),
        }
    }

    /// Fails with a transient error a fixed number of times, then succeeds.
    #[derive(Debug)]
    struct FlakyLookup {
        failures: AtomicU32,
    }

    #[async_trait]
    impl MetadataLookup for FlakyLookup {
        async fn token_metadata(&self, token: &str) -> Result<TokenMetadata, LookupError> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                (f > 0).then(|| f - 1)
            }).is_ok()
            {
                return Err(LookupError::Transient("connection reset".into()));
            }
            Ok(TokenMetadata {
                symbol: format!("SYM-{}", token),
                name: format!("Name {}", token),
            })
        }

        fn name(&self) -> &'static str {
            "flaky-stub"
        }
    }

    /// Tracks the peak number of concurrent calls.
    #[derive(Debug, Default)]
    struct ConcurrencyProbe {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl MetadataLookup for ConcurrencyProbe {
        async fn token_metadata(&self, token: &str) -> Result<TokenMetadata, LookupError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(TokenMetadata {
                symbol: token.to_string(),
                name: token.to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "concurrency-probe"
        }
    }

    #[derive(Debug)]
    struct AlwaysPermanent;

    #[async_trait]
    impl MetadataLookup for AlwaysPermanent {
        async fn token_metadata(&self, _token: &str) -> Result<TokenMetadata, LookupError> {
            Err(LookupError::Permanent(404))
        }

        fn name(&self) -> &'static str {
            "always-404"
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let lookup = Arc::new(FlakyLookup {
            failures: AtomicU32::new(2),
        });
        let fetcher = EnrichmentFetcher::new(lookup, &test_config(4, 3));
        let metadata = fetcher.fetch("mint1").await;
        assert_eq!(metadata.unwrap().symbol, "SYM-mint1");
    }

    #[tokio::test]
    async fn retries_exhaust_to_none() {
        let lookup = Arc::new(FlakyLookup {
            failures: AtomicU32::new(10),
        });
        let fetcher = EnrichmentFetcher::new(lookup.clone(), &test_config(4, 3));
        assert!(fetcher.fetch("mint1").await.is_none());
        // Exactly three attempts were spent.
        assert_eq!(lookup.failures.load(Ordering::SeqCst), 7);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let probe = Arc::new(AlwaysPermanent);
        let fetcher = EnrichmentFetcher::new(probe, &test_config(4, 3));
        assert!(fetcher.fetch("mint1").await.is_none());
    }

    #[tokio::test]
    async fn fetch_many_caps_concurrency() {
        let probe = Arc::new(ConcurrencyProbe::default());
        let fetcher = EnrichmentFetcher::new(Arc::clone(&probe), &test_config(3, 1));
        let tokens: Vec<String> = (0..20).map(|i| format!("mint{}", i)).collect();
        let resolved = fetcher.fetch_many(tokens).await.unwrap();
        assert_eq!(resolved.len(), 20);
        assert!(
            probe.peak.load(Ordering::SeqCst) <= 3,
            "peak concurrency {} exceeded permit cap",
            probe.peak.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn fetch_many_isolates_failures() {
        #[derive(Debug)]
        struct FailOne;

        #[async_trait]
        impl MetadataLookup for FailOne {
            async fn token_metadata(&self, token: &str) -> Result<TokenMetadata, LookupError> {
                if token == "bad" {
                    return Err(LookupError::MissingMetadata);
                }
                Ok(TokenMetadata {
                    symbol: token.to_string(),
                    name: token.to_string(),
                })
            }

            fn name(&self) -> &'static str {
                "fail-one"
            }
        }

        let fetcher = EnrichmentFetcher::new(Arc::new(FailOne), &test_config(2, 2));
        let resolved = fetcher
            .fetch_many(vec!["good".into(), "bad".into(), "fine".into()])
            .await
            .unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved.contains_key("good"));
        assert!(!resolved.contains_key("bad"));
    }
}
