//! Monitored SQLite transactions
//!
//! Wraps `pool.begin()` so acquisition wait and hold time are logged for
//! every merge and proposal transaction.

use brandreg_common::Result;
use sqlx::{Sqlite, SqliteConnection, Transaction};
use std::time::Instant;

/// Logs the hold time when a transaction ends without commit or rollback
struct HoldTimer {
    caller: &'static str,
    acquired_at: Instant,
    released: bool,
}

impl HoldTimer {
    fn release(&mut self, how: &'static str) {
        self.released = true;
        let held_ms = self.acquired_at.elapsed().as_millis();
        if held_ms > 2000 {
            tracing::warn!(
                caller = self.caller,
                held_ms,
                how,
                "Long transaction, connection held for an extended period"
            );
        } else {
            tracing::debug!(caller = self.caller, held_ms, how, "Connection released");
        }
    }
}

impl Drop for HoldTimer {
    fn drop(&mut self) {
        if !self.released {
            let held_ms = self.acquired_at.elapsed().as_millis();
            tracing::debug!(
                caller = self.caller,
                held_ms,
                "Transaction dropped without commit, rolled back"
            );
        }
    }
}

/// Transaction wrapper that logs acquisition and release timing
pub struct MonitoredTransaction<'c> {
    tx: Transaction<'c, Sqlite>,
    timer: HoldTimer,
}

impl<'c> MonitoredTransaction<'c> {
    pub async fn commit(self) -> Result<()> {
        let MonitoredTransaction { tx, mut timer } = self;
        tx.commit().await?;
        timer.release("commit");
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        let MonitoredTransaction { tx, mut timer } = self;
        tx.rollback().await?;
        timer.release("rollback");
        Ok(())
    }

    /// Connection to run statements on inside the transaction
    pub fn conn(&mut self) -> &mut SqliteConnection {
        &mut *self.tx
    }

    pub fn caller(&self) -> &'static str {
        self.timer.caller
    }
}

/// Begin a monitored transaction
///
/// Slow acquisition (>500 ms) is reported at INFO, >1 s at WARN; it means
/// every pooled connection is held elsewhere.
pub async fn begin_monitored<'c>(
    pool: &'c sqlx::SqlitePool,
    caller: &'static str,
) -> Result<MonitoredTransaction<'c>> {
    let start = Instant::now();
    let tx = pool.begin().await?;

    let wait_ms = start.elapsed().as_millis();
    if wait_ms > 1000 {
        tracing::warn!(caller, wait_ms, "Slow connection acquisition, pool may be saturated");
    } else if wait_ms > 500 {
        tracing::info!(caller, wait_ms, "Connection acquisition slower than expected");
    } else {
        tracing::debug!(caller, wait_ms, "Connection acquired");
    }

    Ok(MonitoredTransaction {
        tx,
        timer: HoldTimer {
            caller,
            acquired_at: Instant::now(),
            released: false,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use brandreg_common::db::init_memory_database;

    #[tokio::test]
    async fn test_commit_persists_writes() {
        let pool = init_memory_database().await.unwrap();

        let mut tx = begin_monitored(&pool, "test::commit").await.unwrap();
        sqlx::query("INSERT INTO settings (key, value) VALUES ('k', 'v')")
            .execute(tx.conn())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let pool = init_memory_database().await.unwrap();

        {
            let mut tx = begin_monitored(&pool, "test::drop").await.unwrap();
            sqlx::query("INSERT INTO settings (key, value) VALUES ('k', 'v')")
                .execute(tx.conn())
                .await
                .unwrap();
            assert_eq!(tx.caller(), "test::drop");
        }

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM settings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
