//! SQLite persistence layer for candles, coins, EMA snapshots and scan history.
//!
//! Instants are stored as integer milliseconds since the Unix epoch (UTC) and
//! analysis dates as `YYYY-MM-DD` text. The schema is created idempotently on
//! open.

use super::store::{CandleStore, MetadataStore};
use crate::error::{AppError, Result};
use crate::types::time::from_millis;
use crate::types::{
    Candle, CandleCoverage, Coin, DatabaseStats, EmaAnalysis, ScanRecord, SymbolResolution,
    Timeframe,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

/// Maximum rows per multi-row INSERT statement.
pub const UPSERT_CHUNK_SIZE: usize = 1000;

const CANDLE_COLUMNS: &str = "symbol, timeframe, time, open, high, low, close, volume, ema50";
const ANALYSIS_COLUMNS: &str =
    "symbol, timeframe, current_price, ema50, pct_from_ema50, above_ema50, analysis_date, candle_time";
const COIN_COLUMNS: &str = "symbol, name, market_cap_rank, market_cap, current_price, \
                            binance_symbol, data_source, last_updated";

/// SQLite store for market data.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        // WAL keeps API reads from blocking on scanner writes
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("SQLite connection lock poisoned".to_string()))
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS candles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                time INTEGER NOT NULL,
                open REAL NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                close REAL NOT NULL,
                volume REAL NOT NULL,
                ema50 REAL,
                UNIQUE(symbol, timeframe, time)
            );

            CREATE TABLE IF NOT EXISTS coins (
                symbol TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                market_cap_rank INTEGER,
                market_cap REAL,
                current_price REAL,
                binance_symbol TEXT,
                data_source TEXT,
                last_updated INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ema_analysis (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                current_price REAL NOT NULL,
                ema50 REAL NOT NULL,
                pct_from_ema50 REAL NOT NULL,
                above_ema50 INTEGER NOT NULL,
                analysis_date TEXT NOT NULL,
                candle_time INTEGER NOT NULL,
                UNIQUE(symbol, timeframe, analysis_date)
            );

            CREATE TABLE IF NOT EXISTS scan_history (
                scan_id TEXT PRIMARY KEY,
                scan_date INTEGER NOT NULL,
                timeframes TEXT NOT NULL,
                pairs_attempted INTEGER NOT NULL,
                pairs_updated INTEGER NOT NULL,
                pairs_unavailable INTEGER NOT NULL,
                pairs_failed INTEGER NOT NULL,
                coins_above_weekly INTEGER NOT NULL,
                coins_below_weekly INTEGER NOT NULL,
                coins_above_daily INTEGER NOT NULL,
                coins_below_daily INTEGER NOT NULL,
                scan_duration_seconds INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_candles_symbol_tf_time
                ON candles(symbol, timeframe, time DESC);
            CREATE INDEX IF NOT EXISTS idx_analysis_tf_date
                ON ema_analysis(timeframe, analysis_date DESC);
            CREATE INDEX IF NOT EXISTS idx_coins_rank ON coins(market_cap_rank);
            CREATE INDEX IF NOT EXISTS idx_scan_history_date ON scan_history(scan_date DESC);",
        )?;

        debug!("SQLite schema initialized");
        Ok(())
    }
}

// ========== Row mapping ==========

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    from_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms))
}

fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let ms: Option<i64> = row.get(idx)?;
    ms.map(|ms| from_millis(ms).ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, ms)))
        .transpose()
}

fn timeframe_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timeframe> {
    let key: String = row.get(idx)?;
    Timeframe::from_key(&key)
        .ok_or_else(|| rusqlite::Error::InvalidColumnType(idx, "timeframe".to_string(), Type::Text))
}

fn candle_from_row(row: &Row<'_>) -> rusqlite::Result<Candle> {
    Ok(Candle {
        symbol: row.get(0)?,
        timeframe: timeframe_at(row, 1)?,
        time: time_at(row, 2)?,
        open: row.get(3)?,
        high: row.get(4)?,
        low: row.get(5)?,
        close: row.get(6)?,
        volume: row.get(7)?,
        ema50: row.get(8)?,
    })
}

fn analysis_from_row(row: &Row<'_>) -> rusqlite::Result<EmaAnalysis> {
    let date: String = row.get(6)?;
    let analysis_date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|_| rusqlite::Error::InvalidColumnType(6, "analysis_date".to_string(), Type::Text))?;

    Ok(EmaAnalysis {
        symbol: row.get(0)?,
        timeframe: timeframe_at(row, 1)?,
        current_price: row.get(2)?,
        ema50: row.get(3)?,
        pct_from_ema50: row.get(4)?,
        above_ema50: row.get(5)?,
        analysis_date,
        candle_time: time_at(row, 7)?,
    })
}

fn coin_from_row(row: &Row<'_>) -> rusqlite::Result<Coin> {
    Ok(Coin {
        symbol: row.get(0)?,
        name: row.get(1)?,
        market_cap_rank: row.get(2)?,
        market_cap: row.get(3)?,
        current_price: row.get(4)?,
        binance_symbol: row.get(5)?,
        data_source: row.get(6)?,
        last_updated: time_at(row, 7)?,
    })
}

fn scan_from_row(row: &Row<'_>) -> rusqlite::Result<ScanRecord> {
    let count = |idx: usize| -> rusqlite::Result<usize> { Ok(row.get::<_, i64>(idx)?.max(0) as usize) };
    Ok(ScanRecord {
        scan_id: row.get(0)?,
        scan_date: time_at(row, 1)?,
        timeframes: row.get(2)?,
        pairs_attempted: count(3)?,
        pairs_updated: count(4)?,
        pairs_unavailable: count(5)?,
        pairs_failed: count(6)?,
        coins_above_weekly: count(7)?,
        coins_below_weekly: count(8)?,
        coins_above_daily: count(9)?,
        coins_below_daily: count(10)?,
        scan_duration_seconds: row.get(11)?,
    })
}

fn sort_by_timeframe(rows: &mut [EmaAnalysis]) {
    rows.sort_by_key(|a| a.timeframe);
}

// ========== Candles ==========

impl CandleStore for SqliteStore {
    fn upsert_candles(&self, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;

        for chunk in candles.chunks(UPSERT_CHUNK_SIZE) {
            let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
            let sql = format!(
                "INSERT INTO candles ({CANDLE_COLUMNS}) VALUES {placeholders}
                 ON CONFLICT(symbol, timeframe, time) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume,
                    ema50 = COALESCE(excluded.ema50, candles.ema50)"
            );

            let mut values: Vec<Value> = Vec::with_capacity(chunk.len() * 9);
            for c in chunk {
                values.push(Value::Text(c.symbol.to_uppercase()));
                values.push(Value::Text(c.timeframe.key().to_string()));
                values.push(Value::Integer(c.time.timestamp_millis()));
                values.push(Value::Real(c.open));
                values.push(Value::Real(c.high));
                values.push(Value::Real(c.low));
                values.push(Value::Real(c.close));
                values.push(Value::Real(c.volume));
                values.push(c.ema50.map(Value::Real).unwrap_or(Value::Null));
            }

            written += tx.execute(&sql, params_from_iter(values))?;
        }

        tx.commit()?;
        debug!("Upserted {} candles", written);
        Ok(written)
    }

    fn latest_time(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let ms: Option<i64> = conn.query_row(
            "SELECT MAX(time) FROM candles WHERE symbol = ?1 AND timeframe = ?2",
            params![symbol.to_uppercase(), timeframe.key()],
            |row| row.get(0),
        )?;
        Ok(ms.and_then(from_millis))
    }

    fn read_closes(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<(DateTime<Utc>, f64)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT time, close FROM candles
             WHERE symbol = ?1 AND timeframe = ?2
             ORDER BY time ASC",
        )?;
        let rows = stmt
            .query_map(params![symbol.to_uppercase(), timeframe.key()], |row| {
                Ok((time_at(row, 0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn write_ema(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        time: DateTime<Utc>,
        value: f64,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE candles SET ema50 = ?1 WHERE symbol = ?2 AND timeframe = ?3 AND time = ?4",
            params![value, symbol.to_uppercase(), timeframe.key(), time.timestamp_millis()],
        )?;
        Ok(())
    }

    fn write_ema_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        series: &[(DateTime<Utc>, f64)],
    ) -> Result<()> {
        let symbol = symbol.to_uppercase();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "UPDATE candles SET ema50 = ?1 WHERE symbol = ?2 AND timeframe = ?3 AND time = ?4",
            )?;
            for (time, value) in series {
                stmt.execute(params![value, symbol, timeframe.key(), time.timestamp_millis()])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn latest_candle(&self, symbol: &str, timeframe: Timeframe) -> Result<Option<Candle>> {
        let conn = self.conn()?;
        let candle = conn
            .query_row(
                &format!(
                    "SELECT {CANDLE_COLUMNS} FROM candles
                     WHERE symbol = ?1 AND timeframe = ?2
                     ORDER BY time DESC LIMIT 1"
                ),
                params![symbol.to_uppercase(), timeframe.key()],
                candle_from_row,
            )
            .optional()?;
        Ok(candle)
    }

    fn recent_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CANDLE_COLUMNS} FROM candles
             WHERE symbol = ?1 AND timeframe = ?2
             ORDER BY time DESC LIMIT ?3"
        ))?;
        let mut candles = stmt
            .query_map(
                params![symbol.to_uppercase(), timeframe.key(), limit as i64],
                candle_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        candles.reverse();
        Ok(candles)
    }

    fn coverage(&self, symbol: &str) -> Result<Vec<CandleCoverage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timeframe, COUNT(*), MIN(time), MAX(time) FROM candles
             WHERE symbol = ?1 GROUP BY timeframe",
        )?;
        let mut rows = stmt
            .query_map(params![symbol.to_uppercase()], |row| {
                Ok(CandleCoverage {
                    timeframe: timeframe_at(row, 0)?,
                    candle_count: row.get::<_, i64>(1)?.max(0) as usize,
                    earliest: opt_time_at(row, 2)?,
                    latest: opt_time_at(row, 3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.sort_by_key(|c| c.timeframe);
        Ok(rows)
    }

    fn price_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: Option<DateTime<Utc>>,
    ) -> Result<Option<(f64, f64)>> {
        let conn = self.conn()?;
        let since_ms = since.map_or(i64::MIN, |t| t.timestamp_millis());
        let (low, high): (Option<f64>, Option<f64>) = conn.query_row(
            "SELECT MIN(low), MAX(high) FROM candles
             WHERE symbol = ?1 AND timeframe = ?2 AND time >= ?3",
            params![symbol.to_uppercase(), timeframe.key(), since_ms],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(low.zip(high))
    }
}

// ========== Coins, analysis, scans ==========

impl MetadataStore for SqliteStore {
    fn upsert_coins(&self, coins: &[Coin]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut written = 0;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO coins ({COIN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(symbol) DO UPDATE SET
                    name = excluded.name,
                    market_cap_rank = excluded.market_cap_rank,
                    market_cap = excluded.market_cap,
                    current_price = excluded.current_price,
                    binance_symbol = COALESCE(excluded.binance_symbol, coins.binance_symbol),
                    data_source = COALESCE(excluded.data_source, coins.data_source),
                    last_updated = excluded.last_updated"
            ))?;
            for coin in coins {
                written += stmt.execute(params![
                    coin.symbol.to_uppercase(),
                    coin.name,
                    coin.market_cap_rank,
                    coin.market_cap,
                    coin.current_price,
                    coin.binance_symbol,
                    coin.data_source,
                    coin.last_updated.timestamp_millis(),
                ])?;
            }
        }
        tx.commit()?;
        debug!("Upserted {} coins", written);
        Ok(written)
    }

    fn list_coins(&self, limit: Option<usize>) -> Result<Vec<Coin>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COIN_COLUMNS} FROM coins
             ORDER BY market_cap_rank IS NULL, market_cap_rank ASC, symbol ASC
             LIMIT ?1"
        ))?;
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let coins = stmt
            .query_map(params![limit], coin_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(coins)
    }

    fn get_coin(&self, symbol: &str) -> Result<Option<Coin>> {
        let conn = self.conn()?;
        let coin = conn
            .query_row(
                &format!("SELECT {COIN_COLUMNS} FROM coins WHERE symbol = ?1"),
                params![symbol.to_uppercase()],
                coin_from_row,
            )
            .optional()?;
        Ok(coin)
    }

    fn save_resolution(&self, resolution: &SymbolResolution) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO coins (symbol, name, binance_symbol, data_source, last_updated)
             VALUES (?1, ?1, ?2, ?3, ?4)
             ON CONFLICT(symbol) DO UPDATE SET
                binance_symbol = excluded.binance_symbol,
                data_source = excluded.data_source",
            params![
                resolution.symbol.to_uppercase(),
                resolution.provider_symbol,
                resolution.market.label(),
                Utc::now().timestamp_millis(),
            ],
        )?;
        debug!(
            "Saved resolution {} -> {} ({})",
            resolution.symbol, resolution.provider_symbol, resolution.market
        );
        Ok(())
    }

    fn get_resolution(&self, symbol: &str) -> Result<Option<SymbolResolution>> {
        Ok(self.get_coin(symbol)?.and_then(|coin| coin.resolution()))
    }

    fn upsert_analysis(&self, analysis: &EmaAnalysis) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO ema_analysis ({ANALYSIS_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(symbol, timeframe, analysis_date) DO UPDATE SET
                    current_price = excluded.current_price,
                    ema50 = excluded.ema50,
                    pct_from_ema50 = excluded.pct_from_ema50,
                    above_ema50 = excluded.above_ema50,
                    candle_time = excluded.candle_time"
            ),
            params![
                analysis.symbol.to_uppercase(),
                analysis.timeframe.key(),
                analysis.current_price,
                analysis.ema50,
                analysis.pct_from_ema50,
                analysis.above_ema50,
                analysis.analysis_date.format("%Y-%m-%d").to_string(),
                analysis.candle_time.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn latest_analysis(&self, timeframe: Timeframe) -> Result<Vec<EmaAnalysis>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ANALYSIS_COLUMNS} FROM ema_analysis a
             WHERE a.timeframe = ?1
               AND a.analysis_date = (
                   SELECT MAX(b.analysis_date) FROM ema_analysis b
                   WHERE b.symbol = a.symbol AND b.timeframe = a.timeframe
               )
             ORDER BY a.symbol ASC"
        ))?;
        let rows = stmt
            .query_map(params![timeframe.key()], analysis_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn analysis_for_symbol(&self, symbol: &str) -> Result<Vec<EmaAnalysis>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ANALYSIS_COLUMNS} FROM ema_analysis a
             WHERE a.symbol = ?1
               AND a.analysis_date = (
                   SELECT MAX(b.analysis_date) FROM ema_analysis b
                   WHERE b.symbol = a.symbol AND b.timeframe = a.timeframe
               )"
        ))?;
        let mut rows = stmt
            .query_map(params![symbol.to_uppercase()], analysis_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        sort_by_timeframe(&mut rows);
        Ok(rows)
    }

    fn record_scan(&self, record: &ScanRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO scan_history (
                scan_id, scan_date, timeframes, pairs_attempted, pairs_updated,
                pairs_unavailable, pairs_failed, coins_above_weekly, coins_below_weekly,
                coins_above_daily, coins_below_daily, scan_duration_seconds
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.scan_id,
                record.scan_date.timestamp_millis(),
                record.timeframes,
                record.pairs_attempted as i64,
                record.pairs_updated as i64,
                record.pairs_unavailable as i64,
                record.pairs_failed as i64,
                record.coins_above_weekly as i64,
                record.coins_below_weekly as i64,
                record.coins_above_daily as i64,
                record.coins_below_daily as i64,
                record.scan_duration_seconds,
            ],
        )?;
        Ok(())
    }

    fn scan_history(&self, limit: usize) -> Result<Vec<ScanRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT scan_id, scan_date, timeframes, pairs_attempted, pairs_updated,
                    pairs_unavailable, pairs_failed, coins_above_weekly, coins_below_weekly,
                    coins_above_daily, coins_below_daily, scan_duration_seconds
             FROM scan_history ORDER BY scan_date DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], scan_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn database_stats(&self) -> Result<DatabaseStats> {
        let conn = self.conn()?;
        let count = |table: &str| -> rusqlite::Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        };

        let latest_scan: Option<i64> =
            conn.query_row("SELECT MAX(scan_date) FROM scan_history", [], |row| row.get(0))?;
        let oldest_candle: Option<i64> =
            conn.query_row("SELECT MIN(time) FROM candles", [], |row| row.get(0))?;

        Ok(DatabaseStats {
            candles: count("candles")?,
            coins: count("coins")?,
            ema_analysis: count("ema_analysis")?,
            scans: count("scan_history")?,
            latest_scan: latest_scan.and_then(from_millis),
            oldest_candle: oldest_candle.and_then(from_millis),
        })
    }
}
