//! Instrument metadata store

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};

use super::Database;
use crate::core::types::{Instrument, InstrumentAttribute, InstrumentRecord};
use crate::error::{TradingError, TradingResult};

const SELECT_COLUMNS: &str = "SELECT name, type, display_name, pip_location, display_precision,
        trade_units_precision, minimum_trade_size, maximum_trailing_stop_distance,
        minimum_trailing_stop_distance, maximum_position_size, maximum_order_units,
        margin_rate, guaranteed_stop_loss_order_mode
    FROM instruments";

#[derive(Clone)]
pub struct InstrumentStore {
    db: Database,
}

impl InstrumentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Parse a row from the database
    fn from_row(row: &Row) -> rusqlite::Result<InstrumentRecord> {
        Ok(InstrumentRecord {
            name: row.get(0)?,
            kind: row.get(1)?,
            display_name: row.get(2)?,
            pip_location: row.get(3)?,
            display_precision: row.get(4)?,
            trade_units_precision: row.get(5)?,
            minimum_trade_size: row.get(6)?,
            maximum_trailing_stop_distance: row.get(7)?,
            minimum_trailing_stop_distance: row.get(8)?,
            maximum_position_size: row.get(9)?,
            maximum_order_units: row.get(10)?,
            margin_rate: row.get(11)?,
            guaranteed_stop_loss_order_mode: row.get(12)?,
        })
    }

    /// Insert or refresh instruments keyed by symbol
    pub fn upsert_instruments(&self, records: &[InstrumentRecord]) -> TradingResult<usize> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO instruments (
                    name, type, display_name, pip_location, display_precision,
                    trade_units_precision, minimum_trade_size, maximum_trailing_stop_distance,
                    minimum_trailing_stop_distance, maximum_position_size, maximum_order_units,
                    margin_rate, guaranteed_stop_loss_order_mode, last_updated
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                ON CONFLICT(name) DO UPDATE SET
                    type = excluded.type,
                    display_name = excluded.display_name,
                    pip_location = excluded.pip_location,
                    display_precision = excluded.display_precision,
                    trade_units_precision = excluded.trade_units_precision,
                    minimum_trade_size = excluded.minimum_trade_size,
                    maximum_trailing_stop_distance = excluded.maximum_trailing_stop_distance,
                    minimum_trailing_stop_distance = excluded.minimum_trailing_stop_distance,
                    maximum_position_size = excluded.maximum_position_size,
                    maximum_order_units = excluded.maximum_order_units,
                    margin_rate = excluded.margin_rate,
                    guaranteed_stop_loss_order_mode = excluded.guaranteed_stop_loss_order_mode,
                    last_updated = excluded.last_updated",
            )?;

            for r in records {
                stmt.execute(params![
                    r.name,
                    r.kind,
                    r.display_name,
                    r.pip_location,
                    r.display_precision,
                    r.trade_units_precision,
                    r.minimum_trade_size,
                    r.maximum_trailing_stop_distance,
                    r.minimum_trailing_stop_distance,
                    r.maximum_position_size,
                    r.maximum_order_units,
                    r.margin_rate,
                    r.guaranteed_stop_loss_order_mode,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(records.len())
    }

    pub fn find(&self, symbol: &str) -> TradingResult<Option<InstrumentRecord>> {
        let conn = self.db.lock()?;
        let record = conn
            .query_row(
                &format!("{} WHERE name = ?1", SELECT_COLUMNS),
                params![symbol],
                Self::from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// One numeric attribute, resolved through the record rather than SQL text
    pub fn attribute(&self, symbol: &str, attribute: InstrumentAttribute) -> TradingResult<Option<f64>> {
        Ok(self.find(symbol)?.and_then(|r| r.get(attribute)))
    }

    /// Pricing metadata for a grid engine
    pub fn instrument(&self, symbol: &str) -> TradingResult<Instrument> {
        let record = self.find(symbol)?.ok_or_else(|| {
            TradingError::Configuration(format!("instrument {} not in the metadata store", symbol))
        })?;
        Instrument::from_record(record)
    }

    /// All known symbols in name order
    pub fn list_symbols(&self) -> TradingResult<Vec<String>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare("SELECT name FROM instruments ORDER BY name")?;
        let symbols = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(symbols)
    }

    pub fn count(&self) -> TradingResult<usize> {
        let conn = self.db.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM instruments", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
