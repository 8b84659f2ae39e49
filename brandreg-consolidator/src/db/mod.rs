//! Record-store queries for the consolidation engine
//!
//! Schema creation lives in `brandreg_common::db`; this module holds the
//! statements the services run against it.

pub mod brands;
pub mod learning;
pub mod proposals;
pub mod records;
pub mod settings;
pub mod thresholds;

use brandreg_common::config::TomlConfig;
use brandreg_common::Result;
use sqlx::SqlitePool;

/// Open the configured database and seed the threshold table
pub async fn init_database_pool(config: &TomlConfig) -> Result<SqlitePool> {
    let pool = brandreg_common::db::init_database(
        &config.database_path,
        brandreg_common::db::DEFAULT_BUSY_TIMEOUT_MS,
    )
    .await?;
    thresholds::seed_defaults(&pool).await?;
    Ok(pool)
}
