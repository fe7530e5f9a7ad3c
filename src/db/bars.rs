//! Bar cache keyed by (instrument, granularity, time)

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Row};

use super::Database;
use crate::core::types::{Bar, Granularity};
use crate::error::{TradingError, TradingResult};

const LATEST_TIME_SQL: &str =
    "SELECT MAX(time) FROM bars WHERE instrument_name = ?1 AND granularity_name = ?2";
const EARLIEST_TIME_SQL: &str =
    "SELECT MIN(time) FROM bars WHERE instrument_name = ?1 AND granularity_name = ?2";

#[derive(Clone)]
pub struct BarCache {
    db: Database,
}

/// Fixed-width UTC text so string order matches time order
fn time_key(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_key(text: &str) -> TradingResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| TradingError::DatabaseQuery(format!("bad bar time {}: {}", text, e)))
}

impl BarCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn from_row(row: &Row) -> rusqlite::Result<(String, Bar)> {
        let time: String = row.get(0)?;
        Ok((
            time,
            Bar {
                time: DateTime::<Utc>::MIN_UTC,
                open: row.get(1)?,
                high: row.get(2)?,
                low: row.get(3)?,
                close: row.get(4)?,
                volume: row.get(5)?,
                complete: row.get::<_, i32>(6)? == 1,
            },
        ))
    }

    /// Insert bars, replacing any already cached at the same time
    pub fn upsert_bars(&self, instrument: &str, granularity: Granularity, bars: &[Bar]) -> TradingResult<usize> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO bars (instrument_name, granularity_name, time, open, high, low, close, volume, complete)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(instrument_name, granularity_name, time) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    complete = excluded.complete",
            )?;

            for bar in bars {
                stmt.execute(params![
                    instrument,
                    granularity.as_str(),
                    time_key(&bar.time),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    if bar.complete { 1 } else { 0 },
                ])?;
            }
        }

        tx.commit()?;
        Ok(bars.len())
    }

    fn boundary_time(&self, sql: &str, instrument: &str, granularity: Granularity) -> TradingResult<Option<DateTime<Utc>>> {
        let conn = self.db.lock()?;
        let text: Option<String> =
            conn.query_row(sql, params![instrument, granularity.as_str()], |row| row.get(0))?;
        text.map(|t| parse_key(&t)).transpose()
    }

    pub fn latest_time(&self, instrument: &str, granularity: Granularity) -> TradingResult<Option<DateTime<Utc>>> {
        self.boundary_time(LATEST_TIME_SQL, instrument, granularity)
    }

    pub fn earliest_time(&self, instrument: &str, granularity: Granularity) -> TradingResult<Option<DateTime<Utc>>> {
        self.boundary_time(EARLIEST_TIME_SQL, instrument, granularity)
    }

    pub fn count(&self, instrument: &str, granularity: Granularity) -> TradingResult<usize> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM bars WHERE instrument_name = ?1 AND granularity_name = ?2",
            params![instrument, granularity.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// The most recent `count` bars, oldest first
    pub fn window(&self, instrument: &str, granularity: Granularity, count: usize) -> TradingResult<Vec<Bar>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT time, open, high, low, close, volume, complete FROM bars
             WHERE instrument_name = ?1 AND granularity_name = ?2
             ORDER BY time DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![instrument, granularity.as_str(), count as i64], Self::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut bars = rows
            .into_iter()
            .map(|(time, mut bar)| {
                bar.time = parse_key(&time)?;
                Ok(bar)
            })
            .collect::<TradingResult<Vec<Bar>>>()?;
        bars.reverse();
        Ok(bars)
    }
}
