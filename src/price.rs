//! USD price lookups with a TTL cache and stale fallback.

use crate::config::{EngineConfig, PriceSourceKind};
use crate::errors::{EngineError, EngineResult, PriceError};
use crate::games::types::Currency;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Upstream price provider
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_usd(&self, currency: Currency) -> Result<f64, PriceError>;

    fn name(&self) -> &'static str;
}

/// CoinGecko `simple/price` endpoint
pub struct CoinGeckoSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    usd: f64,
}

impl CoinGeckoSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PriceSource for CoinGeckoSource {
    async fn fetch_usd(&self, currency: Currency) -> Result<f64, PriceError> {
        let coin = currency.coin_id();
        let body: HashMap<String, UsdQuote> = self
            .client
            .get(format!("{}/simple/price", self.base_url))
            .query(&[("ids", coin), ("vs_currencies", "usd")])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        body.get(coin)
            .map(|quote| quote.usd)
            .ok_or_else(|| PriceError::Malformed(format!("missing {} in response", coin)))
    }

    fn name(&self) -> &'static str {
        "coingecko"
    }
}

/// Static price table for tests and offline runs
#[derive(Debug, Default)]
pub struct FixedPriceSource {
    prices: DashMap<Currency, f64>,
    offline: AtomicBool,
}

impl FixedPriceSource {
    pub fn new(btc_usd: f64, eth_usd: f64) -> Self {
        let source = Self::default();
        source.set_price(Currency::Btc, btc_usd);
        source.set_price(Currency::Eth, eth_usd);
        source
    }

    pub fn set_price(&self, currency: Currency, usd: f64) {
        self.prices.insert(currency, usd);
    }

    /// Make every fetch fail until switched back
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    async fn fetch_usd(&self, currency: Currency) -> Result<f64, PriceError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PriceError::Http("fixed price source is offline".to_string()));
        }
        self.prices
            .get(&currency)
            .map(|p| *p)
            .ok_or_else(|| PriceError::Malformed(format!("no fixed price for {}", currency)))
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    usd: f64,
    fetched_at: Instant,
}

/// A price and whether it came from an expired cache entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quote {
    pub currency: Currency,
    pub usd: f64,
    pub stale: bool,
}

pub struct PriceOracle {
    source: Arc<dyn PriceSource>,
    cache: DashMap<Currency, CachedPrice>,
    ttl: Duration,
    timeout: Duration,
}

impl PriceOracle {
    pub fn new(source: Arc<dyn PriceSource>, ttl: Duration, timeout: Duration) -> Self {
        Self {
            source,
            cache: DashMap::new(),
            ttl,
            timeout,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let source: Arc<dyn PriceSource> = match config.price.source {
            PriceSourceKind::CoinGecko => Arc::new(CoinGeckoSource::new(config.price.base_url.clone())),
            PriceSourceKind::Fixed => Arc::new(FixedPriceSource::new(
                config.price.fixed_btc_usd,
                config.price.fixed_eth_usd,
            )),
        };
        Self::new(source, config.price_ttl(), config.price_timeout())
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub async fn get_price(&self, currency: Currency) -> EngineResult<f64> {
        self.quote(currency).await.map(|q| q.usd)
    }

    /// Fresh cache hit, else upstream, else the last cached value however old
    pub async fn quote(&self, currency: Currency) -> EngineResult<Quote> {
        let cached = self.cache.get(&currency).map(|c| *c);

        if let Some(entry) = cached {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(Quote {
                    currency,
                    usd: entry.usd,
                    stale: false,
                });
            }
        }

        match self.fetch(currency).await {
            Ok(usd) => {
                self.cache.insert(
                    currency,
                    CachedPrice {
                        usd,
                        fetched_at: Instant::now(),
                    },
                );
                debug!(%currency, usd, source = self.source.name(), "Price refreshed");
                Ok(Quote {
                    currency,
                    usd,
                    stale: false,
                })
            }
            Err(e) => match cached {
                Some(entry) => {
                    warn!(%currency, error = %e, "Price upstream failed, using stale cached price");
                    Ok(Quote {
                        currency,
                        usd: entry.usd,
                        stale: true,
                    })
                }
                None => {
                    warn!(%currency, error = %e, "Price upstream failed with nothing cached");
                    Err(EngineError::PriceUnavailable(currency.to_string()))
                }
            },
        }
    }

    async fn fetch(&self, currency: Currency) -> Result<f64, PriceError> {
        let usd = tokio::time::timeout(self.timeout, self.source.fetch_usd(currency))
            .await
            .map_err(|_| PriceError::Timeout(self.timeout))??;

        if usd.is_finite() && usd > 0.0 {
            Ok(usd)
        } else {
            Err(PriceError::Malformed(format!("non-positive price {}", usd)))
        }
    }
}
