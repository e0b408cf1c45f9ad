//! SQLite persistence for the registry snapshot and trade history.
//!
//! Stores everything needed to resume after restart:
//! - Engine state (credential token)
//! - Tracked positions with their gauge state
//! - Closed trades
//!
//! Prices are stored as TEXT so decimals round-trip exactly.

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::debug;

use super::{ConfigStore, TradeJournal};
use crate::error::StoreError;
use crate::models::{ClosedTrade, ExitOutcome, RegistrySnapshot, StopLossPosition, StopMode};

/// SQLite-backed snapshot store and trade journal.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Stored position row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredPosition {
    symbol: String,
    quantity: i64,
    entry_price: String,
    stop_mode: String,
    stop_parameter: String,
    high_water_mark: String,
    stop_price: String,
    failed_exit_attempts: i64,
    triggered_at: Option<String>,
    registered_at: String,
}

/// Stored closed trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
struct StoredClosedTrade {
    id: String,
    symbol: String,
    quantity: i64,
    entry_price: String,
    high_water_mark: String,
    stop_price: String,
    observed_price: String,
    order_id: Option<String>,
    outcome: String,
    closed_at: String,
}

fn corrupt(field: &str, value: &str) -> StoreError {
    StoreError::Corrupt(format!("bad {} '{}'", field, value))
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(value).map_err(|_| corrupt(field, value))
}

fn parse_time(field: &str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| corrupt(field, value))
}

fn parse_quantity(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| corrupt("quantity", &value.to_string()))
}

fn to_sql_quantity(value: u64) -> Result<i64, StoreError> {
    i64::try_from(value).map_err(|_| StoreError::WriteError(format!("quantity {} out of range", value)))
}

impl TryFrom<StoredPosition> for StopLossPosition {
    type Error = StoreError;

    fn try_from(row: StoredPosition) -> Result<Self, Self::Error> {
        Ok(StopLossPosition {
            quantity: parse_quantity(row.quantity)?,
            entry_price: parse_decimal("entry_price", &row.entry_price)?,
            stop_mode: StopMode::from_str(&row.stop_mode).map_err(|_| corrupt("stop_mode", &row.stop_mode))?,
            stop_parameter: parse_decimal("stop_parameter", &row.stop_parameter)?,
            high_water_mark: parse_decimal("high_water_mark", &row.high_water_mark)?,
            stop_price: parse_decimal("stop_price", &row.stop_price)?,
            failed_exit_attempts: u32::try_from(row.failed_exit_attempts).unwrap_or(u32::MAX),
            triggered_at: row
                .triggered_at
                .as_deref()
                .map(|t| parse_time("triggered_at", t))
                .transpose()?,
            registered_at: parse_time("registered_at", &row.registered_at)?,
            symbol: row.symbol,
        })
    }
}

impl TryFrom<StoredClosedTrade> for ClosedTrade {
    type Error = StoreError;

    fn try_from(row: StoredClosedTrade) -> Result<Self, Self::Error> {
        Ok(ClosedTrade {
            quantity: parse_quantity(row.quantity)?,
            entry_price: parse_decimal("entry_price", &row.entry_price)?,
            high_water_mark: parse_decimal("high_water_mark", &row.high_water_mark)?,
            stop_price: parse_decimal("stop_price", &row.stop_price)?,
            observed_price: parse_decimal("observed_price", &row.observed_price)?,
            outcome: ExitOutcome::from_str(&row.outcome).map_err(|_| corrupt("outcome", &row.outcome))?,
            closed_at: parse_time("closed_at", &row.closed_at)?,
            id: row.id,
            symbol: row.symbol,
            order_id: row.order_id,
        })
    }
}

impl SqliteStore {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS engine_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                credential_token TEXT,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tracked_positions (
                symbol TEXT PRIMARY KEY,
                quantity INTEGER NOT NULL,
                entry_price TEXT NOT NULL,
                stop_mode TEXT NOT NULL,
                stop_parameter TEXT NOT NULL,
                high_water_mark TEXT NOT NULL,
                stop_price TEXT NOT NULL,
                failed_exit_attempts INTEGER NOT NULL DEFAULT 0,
                triggered_at TEXT,
                registered_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS closed_trades (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                entry_price TEXT NOT NULL,
                high_water_mark TEXT NOT NULL,
                stop_price TEXT NOT NULL,
                observed_price TEXT NOT NULL,
                order_id TEXT,
                outcome TEXT NOT NULL,
                closed_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_closed_trades_time ON closed_trades(closed_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl ConfigStore for SqliteStore {
    async fn load(&self) -> Result<RegistrySnapshot, StoreError> {
        let state: Option<(Option<String>,)> =
            sqlx::query_as("SELECT credential_token FROM engine_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let rows = sqlx::query_as::<_, StoredPosition>("SELECT * FROM tracked_positions ORDER BY symbol")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        if state.is_none() && rows.is_empty() {
            return Err(StoreError::NotFound);
        }

        let positions = rows
            .into_iter()
            .map(StopLossPosition::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(positions = positions.len(), "Loaded snapshot from database");

        Ok(RegistrySnapshot {
            credential_token: state.and_then(|(token,)| token),
            positions,
        })
    }

    async fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), StoreError> {
        let write_err = |e: sqlx::Error| StoreError::WriteError(e.to_string());

        let mut tx = self.pool.begin().await.map_err(write_err)?;

        sqlx::query(
            r#"
            INSERT INTO engine_state (id, credential_token, updated_at)
            VALUES (1, ?, datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                credential_token = excluded.credential_token,
                updated_at = datetime('now')
            "#,
        )
        .bind(snapshot.credential_token.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(write_err)?;

        sqlx::query("DELETE FROM tracked_positions")
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;

        for pos in &snapshot.positions {
            sqlx::query(
                r#"
                INSERT INTO tracked_positions (
                    symbol, quantity, entry_price, stop_mode, stop_parameter,
                    high_water_mark, stop_price, failed_exit_attempts, triggered_at, registered_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&pos.symbol)
            .bind(to_sql_quantity(pos.quantity)?)
            .bind(pos.entry_price.to_string())
            .bind(pos.stop_mode.as_str())
            .bind(pos.stop_parameter.to_string())
            .bind(pos.high_water_mark.to_string())
            .bind(pos.stop_price.to_string())
            .bind(i64::from(pos.failed_exit_attempts))
            .bind(pos.triggered_at.map(|t| t.to_rfc3339()))
            .bind(pos.registered_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(write_err)?;
        }

        tx.commit().await.map_err(write_err)?;

        debug!(positions = snapshot.positions.len(), "Saved snapshot to database");
        Ok(())
    }
}

#[async_trait]
impl TradeJournal for SqliteStore {
    async fn record_exit(&self, trade: &ClosedTrade) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO closed_trades (
                id, symbol, quantity, entry_price, high_water_mark, stop_price,
                observed_price, order_id, outcome, closed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trade.id)
        .bind(&trade.symbol)
        .bind(to_sql_quantity(trade.quantity)?)
        .bind(trade.entry_price.to_string())
        .bind(trade.high_water_mark.to_string())
        .bind(trade.stop_price.to_string())
        .bind(trade.observed_price.to_string())
        .bind(trade.order_id.as_deref())
        .bind(trade.outcome.as_str())
        .bind(trade.closed_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::WriteError(e.to_string()))?;

        Ok(())
    }

    async fn recent_exits(&self, limit: usize) -> Result<Vec<ClosedTrade>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, StoredClosedTrade>(
            "SELECT * FROM closed_trades ORDER BY closed_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        rows.into_iter().map(ClosedTrade::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> SqliteStore {
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("autotrail.db").display());
        SqliteStore::new(&url).await.unwrap()
    }

    #[tokio::test]
    async fn test_empty_database_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        assert_eq!(store.load().await, Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip_and_replace() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let mut infy = StopLossPosition::new("INFY", 12, dec!(1500.5), StopMode::Percentage, dec!(2.5)).unwrap();
        infy.high_water_mark = dec!(1580.25);
        infy.stop_price = dec!(1540.74375);
        infy.failed_exit_attempts = 2;
        infy.triggered_at = Some(Utc::now());
        let tcs = StopLossPosition::new("TCS", 3, dec!(3900), StopMode::Fixed, dec!(45)).unwrap();

        let snapshot = RegistrySnapshot {
            credential_token: Some("access-123".to_string()),
            positions: vec![infy.clone(), tcs],
        };
        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), snapshot);

        // A later save replaces the position set entirely.
        let smaller = RegistrySnapshot {
            credential_token: None,
            positions: vec![infy],
        };
        store.save(&smaller).await.unwrap();
        assert_eq!(store.load().await.unwrap(), smaller);
    }

    #[tokio::test]
    async fn test_journal_orders_most_recent_first() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let pos = StopLossPosition::new("SYM", 10, dec!(100), StopMode::Percentage, dec!(2)).unwrap();
        let mut first = ClosedTrade::from_position(&pos, dec!(97), Some("1".into()), ExitOutcome::Executed);
        first.closed_at = Utc::now() - chrono::Duration::minutes(5);
        let second = ClosedTrade::from_position(&pos, dec!(95), None, ExitOutcome::Abandoned);

        store.record_exit(&first).await.unwrap();
        store.record_exit(&second).await.unwrap();

        let exits = store.recent_exits(10).await.unwrap();
        assert_eq!(exits, vec![second, first]);
        assert_eq!(store.recent_exits(1).await.unwrap().len(), 1);
    }
}
