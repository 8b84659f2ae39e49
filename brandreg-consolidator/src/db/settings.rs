//! Settings database operations
//!
//! Key-value accessors for the runtime tier of configuration.

use brandreg_common::{Error, Result};
use sqlx::{Pool, Sqlite};

pub const MAX_BLOCK_SIZE_KEY: &str = "dedup_max_block_size";
pub const AUTO_APPLY_KEY: &str = "dedup_auto_apply";
pub const MERGE_LOCK_WAIT_KEY: &str = "dedup_merge_lock_wait_ms";
pub const LEARNING_INTERVAL_KEY: &str = "learning_interval_secs";

/// Read a setting, initializing it from `default` when missing
pub async fn get_or_init<T>(db: &Pool<Sqlite>, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    match get_setting::<T>(db, key).await? {
        Some(value) => Ok(value),
        None => {
            set_setting(db, key, &default).await?;
            tracing::debug!(key, value = %default, "Initialized setting from bootstrap config");
            Ok(default)
        }
    }
}

/// Generic setting getter
pub async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting {} failed: {}", key, e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
