//! Append-only audit sink backed by SQLite.
//!
//! Two tables: `trades` holds completed round-trips, `cycles` holds
//! per-cycle diagnostic rows (price, signal booleans, deciding condition
//! values) written by the live runner. Rows are inserted as they happen;
//! nothing is ever updated or deleted.

use sqlx::SqlitePool;

use common::{Result, TradeRecord};

use crate::cycle::{CycleOutcome, PairCycleOutcome};

pub struct AuditLog {
    db: SqlitePool,
}

impl AuditLog {
    /// Open the audit log, creating the schema when missing.
    pub async fn new(db: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                strategy     TEXT NOT NULL,
                symbol       TEXT NOT NULL,
                entry_time   TEXT NOT NULL,
                exit_time    TEXT NOT NULL,
                entry_price  REAL NOT NULL,
                exit_price   REAL NOT NULL,
                quantity     REAL NOT NULL,
                realized_pnl REAL NOT NULL,
                return_pct   REAL NOT NULL,
                exit_reason  TEXT NOT NULL
            )
            "#,
        )
        .execute(&db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cycles (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                strategy   TEXT NOT NULL,
                symbol     TEXT NOT NULL,
                timestamp  TEXT NOT NULL,
                close      REAL NOT NULL,
                buy        INTEGER NOT NULL,
                sell       INTEGER NOT NULL,
                status     TEXT NOT NULL,
                conditions TEXT NOT NULL,
                indicators TEXT NOT NULL,
                z_score    REAL,
                unrealized REAL
            )
            "#,
        )
        .execute(&db)
        .await?;

        Ok(Self { db })
    }

    pub async fn record_trade(&self, strategy: &str, trade: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (strategy, symbol, entry_time, exit_time, entry_price,
                                exit_price, quantity, realized_pnl, return_pct, exit_reason)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(strategy)
        .bind(&trade.symbol)
        .bind(trade.entry_time.to_rfc3339())
        .bind(trade.exit_time.to_rfc3339())
        .bind(trade.entry_price)
        .bind(trade.exit_price)
        .bind(trade.quantity)
        .bind(trade.realized_pnl)
        .bind(trade.return_pct)
        .bind(trade.exit_reason.to_string())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Persist a whole backtest ledger in one pass at the end of the run.
    pub async fn record_ledger(&self, strategy: &str, trades: &[TradeRecord]) -> Result<()> {
        for trade in trades {
            self.record_trade(strategy, trade).await?;
        }
        Ok(())
    }

    pub async fn record_cycle(&self, strategy: &str, symbol: &str, outcome: &CycleOutcome) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cycles (strategy, symbol, timestamp, close, buy, sell, status,
                                conditions, indicators)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(strategy)
        .bind(symbol)
        .bind(outcome.timestamp.to_rfc3339())
        .bind(outcome.close)
        .bind(outcome.signal.buy)
        .bind(outcome.signal.sell)
        .bind(outcome.status)
        .bind(outcome.signal.describe())
        .bind(&outcome.indicators)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn record_pair_cycle(&self, strategy: &str, outcome: &PairCycleOutcome) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cycles (strategy, symbol, timestamp, close, buy, sell, status,
                                conditions, indicators, z_score, unrealized)
            VALUES (?1, ?2, ?3, ?4, 0, 0, ?5, '', '', ?6, ?7)
            "#,
        )
        .bind(strategy)
        .bind(format!("{:.2}/{:.2}", outcome.close_a, outcome.close_b))
        .bind(outcome.timestamp.to_rfc3339())
        .bind(outcome.close_a - outcome.close_b)
        .bind(outcome.status)
        .bind(outcome.z)
        .bind(outcome.unrealized)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
