// =============================================================================
// Ledger Writer — single-writer task serializing all ledger mutations
// =============================================================================
//
// Every mutation of `account`, `positions`, and `orders` is submitted as a
// command over an mpsc channel and executed in FIFO order, one SQLite
// transaction per command. The writer runs on the blocking pool; callers
// await a oneshot reply carrying the commit result.
//
// Shutdown is implicit: when the last command sender is dropped the loop
// drains remaining commands and exits, so in-flight transactions always
// complete before the process stops.
// =============================================================================

use chrono::Utc;
use rusqlite::OptionalExtension;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::ledger::Ledger;

/// Commands accepted by the writer.
pub enum LedgerCommand {
    /// Insert a BUY order, create the position, and debit cash atomically.
    ExecuteBuy {
        symbol: String,
        strategy: String,
        quantity: i64,
        price: f64,
        stop_loss: f64,
        profit_target: f64,
        reason: String,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Insert a SELL order, delete the position, and credit cash atomically.
    ExecuteSell {
        symbol: String,
        strategy: String,
        price: f64,
        reason: String,
        reply: oneshot::Sender<Result<()>>,
    },
    /// Ratchet the stored stop for an open position (trailing stops).
    UpdateStop {
        symbol: String,
        stop_loss: f64,
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable sender side of the writer channel.
#[derive(Clone)]
pub struct LedgerHandle {
    tx: mpsc::Sender<LedgerCommand>,
}

impl LedgerHandle {
    pub async fn execute_buy(
        &self,
        symbol: &str,
        strategy: &str,
        quantity: i64,
        price: f64,
        stop_loss: f64,
        profit_target: f64,
        reason: &str,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LedgerCommand::ExecuteBuy {
                symbol: symbol.to_string(),
                strategy: strategy.to_string(),
                quantity,
                price,
                stop_loss,
                profit_target,
                reason: reason.to_string(),
                reply,
            })
            .await
            .map_err(|_| Error::Cancelled)?;
        rx.await.map_err(|_| Error::Cancelled)?
    }

    pub async fn execute_sell(
        &self,
        symbol: &str,
        strategy: &str,
        price: f64,
        reason: &str,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LedgerCommand::ExecuteSell {
                symbol: symbol.to_string(),
                strategy: strategy.to_string(),
                price,
                reason: reason.to_string(),
                reply,
            })
            .await
            .map_err(|_| Error::Cancelled)?;
        rx.await.map_err(|_| Error::Cancelled)?
    }

    pub async fn update_stop(&self, symbol: &str, stop_loss: f64) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(LedgerCommand::UpdateStop {
                symbol: symbol.to_string(),
                stop_loss,
                reply,
            })
            .await
            .map_err(|_| Error::Cancelled)?;
        rx.await.map_err(|_| Error::Cancelled)?
    }
}

/// Spawn the writer task over `ledger`. Returns the command handle and the
/// join handle awaited at shutdown.
pub fn spawn(ledger: Ledger, queue_depth: usize) -> (LedgerHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<LedgerCommand>(queue_depth);

    let task = tokio::task::spawn_blocking(move || {
        info!("ledger writer started");
        while let Some(command) = rx.blocking_recv() {
            apply(&ledger, command);
        }
        info!("ledger writer drained and stopped");
    });

    (LedgerHandle { tx }, task)
}

/// Execute one command inside one transaction and deliver the reply.
fn apply(ledger: &Ledger, command: LedgerCommand) {
    match command {
        LedgerCommand::ExecuteBuy {
            symbol,
            strategy,
            quantity,
            price,
            stop_loss,
            profit_target,
            reason,
            reply,
        } => {
            let result = execute_buy(
                ledger,
                &symbol,
                &strategy,
                quantity,
                price,
                stop_loss,
                profit_target,
                &reason,
            );
            if let Err(e) = &result {
                warn!(symbol = %symbol, error = %e, "buy commit failed");
            }
            let _ = reply.send(result);
        }
        LedgerCommand::ExecuteSell {
            symbol,
            strategy,
            price,
            reason,
            reply,
        } => {
            let result = execute_sell(ledger, &symbol, &strategy, price, &reason);
            if let Err(e) = &result {
                warn!(symbol = %symbol, error = %e, "sell commit failed");
            }
            let _ = reply.send(result);
        }
        LedgerCommand::UpdateStop {
            symbol,
            stop_loss,
            reply,
        } => {
            let result = update_stop(ledger, &symbol, stop_loss);
            let _ = reply.send(result);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn execute_buy(
    ledger: &Ledger,
    symbol: &str,
    strategy: &str,
    quantity: i64,
    price: f64,
    stop_loss: f64,
    profit_target: f64,
    reason: &str,
) -> Result<()> {
    if quantity <= 0 || price <= 0.0 {
        return Err(Error::TransactionFailed(format!(
            "invalid buy for {symbol}: quantity={quantity} price={price}"
        )));
    }

    let mut conn = ledger.lock();
    let tx = conn.transaction().map_err(map_sql)?;
    let now = Utc::now().to_rfc3339();

    let cash: f64 = tx
        .query_row("SELECT cash FROM account WHERE id = 1", [], |r| r.get(0))
        .map_err(map_sql)?;

    let cost = quantity as f64 * price;
    if cost > cash {
        return Err(Error::TransactionFailed(format!(
            "insufficient cash for {symbol}: need {cost:.2}, have {cash:.2}"
        )));
    }

    tx.execute(
        "INSERT INTO orders (symbol, side, quantity, price, timestamp, strategy, reason)
         VALUES (?1, 'BUY', ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![symbol, quantity, price, now, strategy, reason],
    )
    .map_err(map_sql)?;

    // Plain INSERT: the symbol PK enforces the one-position-per-symbol
    // invariant even if a gate check raced.
    tx.execute(
        "INSERT INTO positions
             (symbol, strategy, quantity, entry_price, entry_time,
              stop_loss, profit_target, last_updated)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?5)",
        rusqlite::params![symbol, strategy, quantity, price, now, stop_loss, profit_target],
    )
    .map_err(map_sql)?;

    tx.execute(
        "UPDATE account SET cash = cash - ?1, last_updated = ?2 WHERE id = 1",
        rusqlite::params![cost, now],
    )
    .map_err(map_sql)?;

    tx.commit().map_err(map_sql)?;
    debug!(symbol, strategy, quantity, price, "buy committed");
    Ok(())
}

fn execute_sell(
    ledger: &Ledger,
    symbol: &str,
    strategy: &str,
    price: f64,
    reason: &str,
) -> Result<()> {
    let mut conn = ledger.lock();
    let tx = conn.transaction().map_err(map_sql)?;
    let now = Utc::now().to_rfc3339();

    let row: Option<(String, i64)> = tx
        .query_row(
            "SELECT strategy, quantity FROM positions WHERE symbol = ?1",
            rusqlite::params![symbol],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(map_sql)?;

    let (owner, quantity) = row.ok_or_else(|| {
        Error::TransactionFailed(format!("no open position for {symbol}"))
    })?;

    if owner != strategy {
        return Err(Error::TransactionFailed(format!(
            "position for {symbol} is owned by {owner}, not {strategy}"
        )));
    }

    tx.execute(
        "INSERT INTO orders (symbol, side, quantity, price, timestamp, strategy, reason)
         VALUES (?1, 'SELL', ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![symbol, quantity, price, now, strategy, reason],
    )
    .map_err(map_sql)?;

    tx.execute(
        "DELETE FROM positions WHERE symbol = ?1",
        rusqlite::params![symbol],
    )
    .map_err(map_sql)?;

    tx.execute(
        "UPDATE account SET cash = cash + ?1, last_updated = ?2 WHERE id = 1",
        rusqlite::params![quantity as f64 * price, now],
    )
    .map_err(map_sql)?;

    tx.commit().map_err(map_sql)?;
    debug!(symbol, strategy, quantity, price, "sell committed");
    Ok(())
}

fn update_stop(ledger: &Ledger, symbol: &str, stop_loss: f64) -> Result<()> {
    let conn = ledger.lock();
    let changed = conn
        .execute(
            "UPDATE positions SET stop_loss = ?1, last_updated = ?2 WHERE symbol = ?3",
            rusqlite::params![stop_loss, Utc::now().to_rfc3339(), symbol],
        )
        .map_err(map_sql)?;

    if changed == 0 {
        return Err(Error::TransactionFailed(format!(
            "no open position for {symbol} to update"
        )));
    }
    Ok(())
}

fn map_sql(e: rusqlite::Error) -> Error {
    Error::TransactionFailed(e.to_string())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_ledger(cash: f64) -> Ledger {
        let ledger = Ledger::open_in_memory().unwrap();
        ledger.seed_account(cash).unwrap();
        ledger
    }

    #[tokio::test]
    async fn buy_then_sell_preserves_cash_identity() {
        let ledger = seeded_ledger(10_000.0);
        let (handle, _task) = spawn(ledger.clone(), 16);

        handle
            .execute_buy("SPY", "rsi_mean_reversion", 4, 545.0, 517.75, 558.63, "rsi entry")
            .await
            .unwrap();

        let account = ledger.account().unwrap();
        assert!((account.cash - (10_000.0 - 4.0 * 545.0)).abs() < 1e-9);
        let pos = ledger.position("SPY").unwrap().unwrap();
        assert_eq!(pos.quantity, 4);
        assert!((ledger.portfolio_value().unwrap() - 10_000.0).abs() < 1e-9);

        handle
            .execute_sell("SPY", "rsi_mean_reversion", 558.9, "profit target")
            .await
            .unwrap();

        let account = ledger.account().unwrap();
        let expected = 10_000.0 - 4.0 * 545.0 + 4.0 * 558.9;
        assert!((account.cash - expected).abs() < 1e-9);
        assert!(ledger.position("SPY").unwrap().is_none());

        // Entry and exit orders both present, exit after entry.
        let orders = ledger.recent_orders(10).unwrap();
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].side, "SELL");
        assert_eq!(orders[1].side, "BUY");
    }

    #[tokio::test]
    async fn buy_rejected_when_cash_insufficient() {
        let ledger = seeded_ledger(100.0);
        let (handle, _task) = spawn(ledger.clone(), 16);

        let err = handle
            .execute_buy("SPY", "rsi_mean_reversion", 1, 545.0, 517.75, 558.63, "rsi entry")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransactionFailed(_)));

        // Nothing committed.
        assert!((ledger.account().unwrap().cash - 100.0).abs() < 1e-9);
        assert!(ledger.open_positions().unwrap().is_empty());
        assert!(ledger.recent_orders(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_position_rejected_and_rolled_back() {
        let ledger = seeded_ledger(100_000.0);
        let (handle, _task) = spawn(ledger.clone(), 16);

        handle
            .execute_buy("MU", "momentum_breakout", 10, 95.5, 87.86, 103.14, "breakout")
            .await
            .unwrap();
        let cash_after_first = ledger.account().unwrap().cash;

        let err = handle
            .execute_buy("MU", "rsi_mean_reversion", 5, 95.5, 90.0, 100.0, "rsi entry")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransactionFailed(_)));

        // The failed buy left no orphan order and no cash movement.
        assert!((ledger.account().unwrap().cash - cash_after_first).abs() < 1e-9);
        assert_eq!(ledger.recent_orders(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sell_without_position_fails() {
        let ledger = seeded_ledger(1_000.0);
        let (handle, _task) = spawn(ledger.clone(), 16);

        let err = handle
            .execute_sell("SPY", "rsi_mean_reversion", 550.0, "target")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::TransactionFailed(_)));
    }

    #[tokio::test]
    async fn update_stop_ratchets() {
        let ledger = seeded_ledger(10_000.0);
        let (handle, _task) = spawn(ledger.clone(), 16);

        handle
            .execute_buy("MU", "momentum_breakout", 10, 95.5, 87.86, 103.14, "breakout")
            .await
            .unwrap();
        handle.update_stop("MU", 89.1).await.unwrap();

        let pos = ledger.position("MU").unwrap().unwrap();
        assert!((pos.stop_loss - 89.1).abs() < 1e-9);

        assert!(handle.update_stop("GONE", 1.0).await.is_err());
    }

    #[tokio::test]
    async fn invalid_quantity_rejected() {
        let ledger = seeded_ledger(10_000.0);
        let (handle, _task) = spawn(ledger.clone(), 16);

        assert!(handle
            .execute_buy("SPY", "rsi_mean_reversion", 0, 545.0, 517.75, 558.63, "rsi entry")
            .await
            .is_err());
    }
}
