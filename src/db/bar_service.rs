//! Bar service combining the SQLite cache with venue backfill

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::BarCache;
use crate::clients::ExecutionGateway;
use crate::core::indicators::average_true_range;
use crate::core::market_data::{AtrSource, BarSource};
use crate::core::types::{Bar, CandleQuery, Granularity};
use crate::error::TradingResult;

/// Serves bar windows from the cache, fetching only what is missing
pub struct BarService {
    cache: BarCache,
    gateway: Arc<dyn ExecutionGateway>,
}

impl BarService {
    pub fn new(cache: BarCache, gateway: Arc<dyn ExecutionGateway>) -> Self {
        BarService { cache, gateway }
    }

    pub fn cache(&self) -> &BarCache {
        &self.cache
    }

    async fn backfill(
        &self,
        instrument: &str,
        granularity: Granularity,
        query: CandleQuery,
    ) -> TradingResult<usize> {
        let bars = self.gateway.candles(instrument, granularity, query).await?;
        debug!("⬇️  {} {} bars fetched for {} ({:?})", bars.len(), granularity, instrument, query);
        self.cache.upsert_bars(instrument, granularity, &bars)
    }
}

#[async_trait]
impl BarSource for BarService {
    /// Empty cache: fetch the latest `count`. Stale (last bar's period has
    /// elapsed): fetch forward from the last cached bar. Short: fetch only the
    /// older bars before the earliest cached one.
    async fn fetch_bars(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
    ) -> TradingResult<Vec<Bar>> {
        let cached = self.cache.count(instrument, granularity)?;

        if cached == 0 {
            self.backfill(instrument, granularity, CandleQuery::Latest { count })
                .await?;
        } else {
            if let Some(latest) = self.cache.latest_time(instrument, granularity)? {
                if latest + granularity.duration() <= Utc::now() {
                    self.backfill(instrument, granularity, CandleQuery::Since { from: latest })
                        .await?;
                }
            }

            if cached < count {
                if let Some(earliest) = self.cache.earliest_time(instrument, granularity)? {
                    let missing = count - cached;
                    self.backfill(
                        instrument,
                        granularity,
                        CandleQuery::Before { to: earliest, count: missing },
                    )
                    .await?;
                }
            }
        }

        self.cache.window(instrument, granularity, count)
    }
}

#[async_trait]
impl AtrSource for BarService {
    async fn recent_atr(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
        length: usize,
    ) -> TradingResult<f64> {
        let bars = self.fetch_bars(instrument, granularity, count).await?;
        let atr = average_true_range(&bars, length)?;
        debug!("📏 Recent ATR for {}: {:.6}", instrument, atr);
        Ok(atr)
    }
}
