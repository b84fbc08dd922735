//! Open-trade and closed-trade operations for the repository.

use crate::domain::{AccountId, ClosedTrade, MagicNumber, OpenTrade, Side, Ticket};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::HashSet;
use tracing::warn;

use super::Repository;

impl Repository {
    /// Replace the account's open trades in a single transaction.
    ///
    /// Existing rows are deleted first; nothing is diffed.
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn replace_open_trades_atomic(
        &self,
        account: AccountId,
        trades: &[OpenTrade],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM open_trades WHERE account_id = ?")
            .bind(account.as_i64())
            .execute(&mut *tx)
            .await?;

        for trade in trades {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO open_trades (
                    account_id, ticket, symbol, side, volume, open_price, open_time,
                    stop_loss, take_profit, profit, swap, magic_number, comment
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(account.as_i64())
            .bind(trade.ticket.as_i64())
            .bind(&trade.symbol)
            .bind(trade.side.as_str())
            .bind(trade.volume)
            .bind(trade.open_price)
            .bind(&trade.open_time)
            .bind(trade.stop_loss)
            .bind(trade.take_profit)
            .bind(trade.profit)
            .bind(trade.swap)
            .bind(trade.magic_number.as_i64())
            .bind(trade.comment.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Open trades of one account in ticket order.
    pub async fn query_open_trades(&self, account: AccountId) -> Result<Vec<OpenTrade>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT ticket, symbol, side, volume, open_price, open_time, stop_loss,
                   take_profit, profit, swap, magic_number, comment
            FROM open_trades
            WHERE account_id = ?
            ORDER BY ticket ASC
            "#,
        )
        .bind(account.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| OpenTrade {
                ticket: Ticket::new(row.get("ticket")),
                symbol: row.get("symbol"),
                side: side_from_row(row, account),
                volume: row.get("volume"),
                open_price: row.get("open_price"),
                open_time: row.get("open_time"),
                stop_loss: row.get("stop_loss"),
                take_profit: row.get("take_profit"),
                profit: row.get("profit"),
                swap: row.get("swap"),
                magic_number: MagicNumber::new(row.get("magic_number")),
                comment: row.get("comment"),
                sync_status: None,
            })
            .collect())
    }

    /// Insert multiple closed trades in a single transaction.
    ///
    /// Returns the number of newly inserted rows (excludes duplicates).
    ///
    /// # Errors
    /// Returns an error if the transaction fails.
    pub async fn insert_closed_trades_batch(
        &self,
        account: AccountId,
        trades: &[ClosedTrade],
    ) -> Result<usize, sqlx::Error> {
        if trades.is_empty() {
            return Ok(0);
        }

        let mut total_inserted = 0usize;
        let mut tx = self.pool.begin().await?;

        for trade in trades {
            let result = sqlx::query(
                r#"
                INSERT INTO closed_trades (
                    account_id, ticket, symbol, side, volume, open_price, close_price,
                    open_time, close_time, stop_loss, take_profit, profit, swap,
                    commission, magic_number, comment
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(account_id, ticket) DO NOTHING
                "#,
            )
            .bind(account.as_i64())
            .bind(trade.ticket.as_i64())
            .bind(&trade.symbol)
            .bind(trade.side.as_str())
            .bind(trade.volume)
            .bind(trade.open_price)
            .bind(trade.close_price)
            .bind(trade.open_time.as_deref())
            .bind(trade.close_time.as_deref())
            .bind(trade.stop_loss)
            .bind(trade.take_profit)
            .bind(trade.profit)
            .bind(trade.swap)
            .bind(trade.commission)
            .bind(trade.magic_number.as_i64())
            .bind(trade.comment.as_deref())
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() > 0 {
                total_inserted += 1;
            }
        }

        tx.commit().await?;
        Ok(total_inserted)
    }

    /// Closed trades of one account in insertion order.
    pub async fn query_closed_trades(
        &self,
        account: AccountId,
    ) -> Result<Vec<ClosedTrade>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT ticket, symbol, side, volume, open_price, close_price, open_time,
                   close_time, stop_loss, take_profit, profit, swap, commission,
                   magic_number, comment
            FROM closed_trades
            WHERE account_id = ?
            ORDER BY id ASC
            "#,
        )
        .bind(account.as_i64())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ClosedTrade {
                ticket: Ticket::new(row.get("ticket")),
                symbol: row.get("symbol"),
                side: side_from_row(row, account),
                volume: row.get("volume"),
                open_price: row.get("open_price"),
                close_price: row.get("close_price"),
                open_time: row.get("open_time"),
                close_time: row.get("close_time"),
                stop_loss: row.get("stop_loss"),
                take_profit: row.get("take_profit"),
                profit: row.get("profit"),
                swap: row.get("swap"),
                commission: row.get("commission"),
                magic_number: MagicNumber::new(row.get("magic_number")),
                comment: row.get("comment"),
            })
            .collect())
    }

    /// Tickets already recorded in the account's closed history.
    pub async fn query_closed_tickets(
        &self,
        account: AccountId,
    ) -> Result<HashSet<Ticket>, sqlx::Error> {
        let rows = sqlx::query("SELECT ticket FROM closed_trades WHERE account_id = ?")
            .bind(account.as_i64())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| Ticket::new(row.get("ticket")))
            .collect())
    }
}

fn side_from_row(row: &SqliteRow, account: AccountId) -> Side {
    let side_str: String = row.get("side");
    side_str.parse().unwrap_or_else(|e| {
        warn!(account_id = %account, side = %side_str, error = %e, "Failed to parse trade side, using BUY");
        Side::Buy
    })
}
