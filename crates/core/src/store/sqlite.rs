//! SQLite-backed store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{Instrument, Store, StoreError};
use crate::backfill::{Granularity, ResolvedInstrument};
use crate::source::Bar;

/// Value of the `source` column for bars written by the backfill.
const BAR_SOURCE: &str = "backfill";

/// SQLite-backed instrument master and bar store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            -- Instrument master (one row per broker instrument token)
            CREATE TABLE IF NOT EXISTS instruments (
                instrument_token INTEGER PRIMARY KEY,
                exchange_token INTEGER NOT NULL,
                tradingsymbol TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                exchange TEXT NOT NULL,
                segment TEXT NOT NULL,
                instrument_type TEXT NOT NULL,
                tick_size REAL NOT NULL,
                lot_size INTEGER NOT NULL,
                expiry TEXT,
                strike REAL,
                last_price REAL NOT NULL DEFAULT 0,
                last_updated TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_instruments_symbol ON instruments(exchange, tradingsymbol);

            -- OHLCV bars, upserted on (exchange, symbol, bar_timestamp, timeframe)
            CREATE TABLE IF NOT EXISTS intraday_bars (
                bar_id INTEGER PRIMARY KEY AUTOINCREMENT,
                exchange TEXT NOT NULL,
                symbol TEXT NOT NULL,
                instrument_token INTEGER NOT NULL,
                bar_timestamp TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume INTEGER NOT NULL,
                oi INTEGER,
                source TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE(exchange, symbol, bar_timestamp, timeframe)
            );

            CREATE INDEX IF NOT EXISTS idx_intraday_bars_symbol ON intraday_bars(symbol, timeframe, bar_timestamp);
            "#,
        )?;

        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Database(format!("connection lock poisoned: {}", e)))
    }

    /// Insert or update instrument master rows. Returns the number of rows touched.
    pub fn upsert_instruments(&self, instruments: &[Instrument]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut written = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO instruments (
                    instrument_token, exchange_token, tradingsymbol, name, exchange, segment,
                    instrument_type, tick_size, lot_size, expiry, strike, last_price, last_updated
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(instrument_token) DO UPDATE SET
                    exchange_token = excluded.exchange_token,
                    tradingsymbol = excluded.tradingsymbol,
                    name = excluded.name,
                    exchange = excluded.exchange,
                    segment = excluded.segment,
                    instrument_type = excluded.instrument_type,
                    tick_size = excluded.tick_size,
                    lot_size = excluded.lot_size,
                    expiry = excluded.expiry,
                    strike = excluded.strike,
                    last_price = excluded.last_price,
                    last_updated = excluded.last_updated",
            )?;

            for inst in instruments {
                written += stmt.execute(params![
                    inst.instrument_token,
                    inst.exchange_token,
                    inst.tradingsymbol,
                    inst.name,
                    inst.exchange,
                    inst.segment,
                    inst.instrument_type,
                    inst.tick_size,
                    inst.lot_size,
                    inst.expiry.map(|d| d.format("%Y-%m-%d").to_string()),
                    inst.strike,
                    inst.last_price,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(written)
    }

    /// Number of stored bars for a symbol at a granularity.
    pub fn count_bars(&self, symbol: &str, granularity: Granularity) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM intraday_bars WHERE symbol = ?1 AND timeframe = ?2",
            params![symbol, granularity.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Stored bars for a symbol within `[from, to]`, oldest first.
    pub fn bars(
        &self,
        symbol: &str,
        granularity: Granularity,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Bar>, StoreError> {
        let conn = self.lock()?;
        let lower = from
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().to_rfc3339())
            .unwrap_or_default();
        let upper = to
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().to_rfc3339())
            .unwrap_or_default();

        let mut stmt = conn.prepare(
            "SELECT bar_timestamp, open, high, low, close, volume, oi
             FROM intraday_bars
             WHERE symbol = ?1 AND timeframe = ?2 AND bar_timestamp >= ?3 AND bar_timestamp <= ?4
             ORDER BY bar_timestamp ASC",
        )?;

        let rows = stmt.query_map(params![symbol, granularity.as_str(), lower, upper], |row| {
            let ts: String = row.get(0)?;
            Ok((
                ts,
                row.get::<_, f64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, Option<i64>>(6)?,
            ))
        })?;

        let mut bars = Vec::new();
        for row in rows {
            let (ts, open, high, low, close, volume, oi) = row?;
            let timestamp = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| StoreError::InvalidData(format!("bad bar_timestamp '{}': {}", ts, e)))?
                .with_timezone(&Utc);
            bars.push(Bar {
                timestamp,
                open,
                high,
                low,
                close,
                volume,
                oi,
            });
        }
        Ok(bars)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn lookup_instrument(&self, symbol: &str, venue: &str) -> Result<Option<i64>, StoreError> {
        let conn = self.lock()?;
        let token = conn
            .query_row(
                "SELECT instrument_token FROM instruments
                 WHERE exchange = ?1 AND tradingsymbol = ?2
                 ORDER BY last_updated DESC
                 LIMIT 1",
                params![venue, symbol],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(token)
    }

    async fn write_series(
        &self,
        instrument: &ResolvedInstrument,
        granularity: Granularity,
        bars: &[Bar],
    ) -> Result<usize, StoreError> {
        if bars.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut written = 0;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO intraday_bars (
                    exchange, symbol, instrument_token, bar_timestamp, timeframe,
                    open, high, low, close, volume, oi, source, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(exchange, symbol, bar_timestamp, timeframe) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    oi = excluded.oi",
            )?;

            for bar in bars {
                written += stmt.execute(params![
                    instrument.venue,
                    instrument.symbol,
                    instrument.instrument_id,
                    bar.timestamp.to_rfc3339(),
                    granularity.as_str(),
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume,
                    bar.oi,
                    BAR_SOURCE,
                    now,
                ])?;
            }
        }

        tx.commit()?;
        Ok(written)
    }
}
