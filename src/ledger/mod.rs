// =============================================================================
// Ledger — persistent account, positions, and order log (SQLite)
// =============================================================================
//
// The ledger is the single source of truth for cash and holdings. Mutations
// to `account`, `positions`, and `orders` go exclusively through the writer
// task in `writer.rs`; everything else reads through the typed queries here.
// The performance tracker owns the remaining tables (`routing_decisions`,
// `trade_tracking`, `strategy_metrics`) and writes them through the same
// shared connection.
// =============================================================================

pub mod writer;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::error::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS account (
    id           INTEGER PRIMARY KEY CHECK (id = 1),
    cash         REAL NOT NULL,
    last_updated TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS positions (
    symbol        TEXT PRIMARY KEY,
    strategy      TEXT NOT NULL,
    quantity      INTEGER NOT NULL CHECK (quantity > 0),
    entry_price   REAL NOT NULL CHECK (entry_price > 0),
    entry_time    TEXT NOT NULL,
    stop_loss     REAL NOT NULL,
    profit_target REAL NOT NULL,
    last_updated  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS orders (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol    TEXT NOT NULL,
    side      TEXT NOT NULL CHECK (side IN ('BUY', 'SELL')),
    quantity  INTEGER NOT NULL,
    price     REAL NOT NULL,
    timestamp TEXT NOT NULL,
    strategy  TEXT NOT NULL,
    reason    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS routing_decisions (
    decision_id       TEXT PRIMARY KEY,
    symbol            TEXT NOT NULL,
    selected_strategy TEXT NOT NULL,
    classification    TEXT NOT NULL,
    confidence        REAL NOT NULL,
    reason            TEXT NOT NULL,
    timestamp         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS trade_tracking (
    trade_id           TEXT PRIMARY KEY,
    symbol             TEXT NOT NULL,
    strategy           TEXT NOT NULL,
    classification     TEXT NOT NULL,
    entry_time         TEXT NOT NULL,
    entry_price        REAL NOT NULL,
    quantity           INTEGER NOT NULL,
    routing_confidence REAL NOT NULL,
    exit_time          TEXT,
    exit_price         REAL,
    exit_reason        TEXT,
    pnl                REAL,
    pnl_pct            REAL,
    hold_days          REAL,
    was_profitable     INTEGER
);

CREATE TABLE IF NOT EXISTS strategy_metrics (
    strategy           TEXT NOT NULL,
    stock_type         TEXT NOT NULL,
    period_start       TEXT NOT NULL,
    period_end         TEXT NOT NULL,
    total_trades       INTEGER NOT NULL,
    winning_trades     INTEGER NOT NULL,
    losing_trades      INTEGER NOT NULL,
    win_rate           REAL NOT NULL,
    avg_profit_pct     REAL NOT NULL,
    avg_winner_pct     REAL NOT NULL,
    avg_loser_pct      REAL NOT NULL,
    total_return_pct   REAL NOT NULL,
    max_drawdown_pct   REAL NOT NULL,
    avg_hold_days      REAL NOT NULL,
    sharpe             REAL NOT NULL,
    confidence_accuracy REAL NOT NULL,
    updated_at         TEXT NOT NULL,
    UNIQUE (strategy, stock_type, period_start, period_end)
);
";

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// The singleton account row.
#[derive(Debug, Clone)]
pub struct Account {
    pub cash: f64,
    pub last_updated: String,
}

/// An open position. One row per symbol; exactly one strategy owns it.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub strategy: String,
    pub quantity: i64,
    pub entry_price: f64,
    pub entry_time: String,
    pub stop_loss: f64,
    pub profit_target: f64,
    pub last_updated: String,
}

impl Position {
    /// Cost basis of the open position.
    pub fn notional(&self) -> f64 {
        self.entry_price * self.quantity as f64
    }
}

/// A row of the append-only order log.
#[derive(Debug, Clone)]
pub struct Order {
    pub id: i64,
    pub symbol: String,
    pub side: String,
    pub quantity: i64,
    pub price: f64,
    pub timestamp: String,
    pub strategy: String,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Ledger handle
// ---------------------------------------------------------------------------

/// Shared handle over the SQLite connection. Cheap to clone; all access is
/// serialized through the inner mutex.
#[derive(Clone)]
pub struct Ledger {
    conn: Arc<Mutex<Connection>>,
}

impl Ledger {
    /// Open (or create) the ledger at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.as_ref().display(), "ledger opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory ledger for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Lock the underlying connection. Crate-internal; the writer task and
    /// the performance tracker are the only mutating callers.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock()
    }

    /// Create the account row with `starting_cash` if it does not exist yet.
    pub fn seed_account(&self, starting_cash: f64) -> Result<()> {
        let conn = self.lock();
        let existing: Option<f64> = conn
            .query_row("SELECT cash FROM account WHERE id = 1", [], |r| r.get(0))
            .optional()?;

        match existing {
            Some(cash) => {
                info!(cash, "account already seeded");
            }
            None => {
                conn.execute(
                    "INSERT INTO account (id, cash, last_updated) VALUES (1, ?1, ?2)",
                    params![starting_cash, Utc::now().to_rfc3339()],
                )?;
                info!(cash = starting_cash, "account seeded");
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Read the account row.
    pub fn account(&self) -> Result<Account> {
        let conn = self.lock();
        let account = conn.query_row(
            "SELECT cash, last_updated FROM account WHERE id = 1",
            [],
            |r| {
                Ok(Account {
                    cash: r.get(0)?,
                    last_updated: r.get(1)?,
                })
            },
        )?;
        Ok(account)
    }

    /// All open positions, ordered by symbol.
    pub fn open_positions(&self) -> Result<Vec<Position>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT symbol, strategy, quantity, entry_price, entry_time,
                    stop_loss, profit_target, last_updated
             FROM positions ORDER BY symbol",
        )?;
        let rows = stmt
            .query_map([], Self::map_position)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// The open position for `symbol`, if any.
    pub fn position(&self, symbol: &str) -> Result<Option<Position>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT symbol, strategy, quantity, entry_price, entry_time,
                        stop_loss, profit_target, last_updated
                 FROM positions WHERE symbol = ?1",
                params![symbol],
                Self::map_position,
            )
            .optional()?;
        Ok(row)
    }

    /// Number of executed orders with a timestamp on the given UTC day
    /// (`YYYY-MM-DD`).
    pub fn orders_on_day(&self, day: &str) -> Result<u32> {
        let conn = self.lock();
        let count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE substr(timestamp, 1, 10) = ?1",
            params![day],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// Cost basis currently allocated to `strategy` across open positions.
    pub fn allocation(&self, strategy: &str) -> Result<f64> {
        let conn = self.lock();
        let total: f64 = conn.query_row(
            "SELECT COALESCE(SUM(entry_price * quantity), 0.0)
             FROM positions WHERE strategy = ?1",
            params![strategy],
            |r| r.get(0),
        )?;
        Ok(total)
    }

    /// Derived portfolio value: cash plus the cost basis of open positions.
    /// Never persisted; recomputed on demand.
    pub fn portfolio_value(&self) -> Result<f64> {
        let conn = self.lock();
        let value: f64 = conn.query_row(
            "SELECT (SELECT cash FROM account WHERE id = 1)
                  + COALESCE((SELECT SUM(entry_price * quantity) FROM positions), 0.0)",
            [],
            |r| r.get(0),
        )?;
        Ok(value)
    }

    /// Most recent orders, newest first (debugging / reporting).
    pub fn recent_orders(&self, limit: u32) -> Result<Vec<Order>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, symbol, side, quantity, price, timestamp, strategy, reason
             FROM orders ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |r| {
                Ok(Order {
                    id: r.get(0)?,
                    symbol: r.get(1)?,
                    side: r.get(2)?,
                    quantity: r.get(3)?,
                    price: r.get(4)?,
                    timestamp: r.get(5)?,
                    strategy: r.get(6)?,
                    reason: r.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn map_position(r: &rusqlite::Row<'_>) -> rusqlite::Result<Position> {
        Ok(Position {
            symbol: r.get(0)?,
            strategy: r.get(1)?,
            quantity: r.get(2)?,
            entry_price: r.get(3)?,
            entry_time: r.get(4)?,
            stop_loss: r.get(5)?,
            profit_target: r.get(6)?,
            last_updated: r.get(7)?,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_account_is_idempotent() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.seed_account(100_000.0).unwrap();
        ledger.seed_account(50_000.0).unwrap(); // second seed must not reset cash

        let account = ledger.account().unwrap();
        assert!((account.cash - 100_000.0).abs() < 1e-9);
    }

    #[test]
    fn empty_ledger_has_no_positions() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.seed_account(10_000.0).unwrap();
        assert!(ledger.open_positions().unwrap().is_empty());
        assert!(ledger.position("SPY").unwrap().is_none());
        assert_eq!(ledger.orders_on_day("2026-01-05").unwrap(), 0);
        assert!((ledger.allocation("rsi_mean_reversion").unwrap()).abs() < 1e-12);
    }

    #[test]
    fn portfolio_value_is_cash_when_flat() {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.seed_account(42_000.0).unwrap();
        assert!((ledger.portfolio_value().unwrap() - 42_000.0).abs() < 1e-9);
    }

    #[test]
    fn opens_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let ledger = Ledger::open(&path).unwrap();
            ledger.seed_account(1_000.0).unwrap();
        }
        // Reopen and confirm persistence.
        let ledger = Ledger::open(&path).unwrap();
        assert!((ledger.account().unwrap().cash - 1_000.0).abs() < 1e-9);
    }
}
