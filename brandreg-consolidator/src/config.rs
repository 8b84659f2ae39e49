//! Configuration resolution for brandreg-consolidator
//!
//! Two tiers: the TOML bootstrap file supplies every knob, and the
//! `settings` table overrides a few of them at runtime. Missing runtime
//! keys are initialized from the TOML values so operators can see and edit
//! them in the database.

use brandreg_common::config::{DetectionConfig, LearningConfig, MergeConfig, TomlConfig};
use brandreg_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use tracing::info;

use crate::db::settings::{
    get_or_init, AUTO_APPLY_KEY, LEARNING_INTERVAL_KEY, MAX_BLOCK_SIZE_KEY, MERGE_LOCK_WAIT_KEY,
};

/// Effective engine configuration after both tiers are applied
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub detection: DetectionConfig,
    pub learning: LearningConfig,
    pub merge: MergeConfig,
}

impl EngineConfig {
    /// TOML values only, for tests and one-shot tools
    pub fn from_toml(toml_config: &TomlConfig) -> Self {
        Self {
            detection: toml_config.detection.clone(),
            learning: toml_config.learning.clone(),
            merge: toml_config.merge.clone(),
        }
    }

    /// Apply database overrides on top of the TOML bootstrap values
    pub async fn resolve(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<Self> {
        let mut config = Self::from_toml(toml_config);

        config.detection.max_block_size =
            get_or_init(db, MAX_BLOCK_SIZE_KEY, config.detection.max_block_size).await?;
        config.detection.auto_apply =
            get_or_init(db, AUTO_APPLY_KEY, config.detection.auto_apply).await?;
        config.merge.lock_wait_ms =
            get_or_init(db, MERGE_LOCK_WAIT_KEY, config.merge.lock_wait_ms).await?;
        config.learning.interval_secs =
            get_or_init(db, LEARNING_INTERVAL_KEY, config.learning.interval_secs).await?;

        if config.detection.max_block_size < 2 {
            return Err(Error::Config(format!(
                "{} must be at least 2 (got {})",
                MAX_BLOCK_SIZE_KEY, config.detection.max_block_size
            )));
        }
        if config.learning.interval_secs == 0 {
            return Err(Error::Config(format!("{} must be positive", LEARNING_INTERVAL_KEY)));
        }

        info!(
            max_block_size = config.detection.max_block_size,
            auto_apply = config.detection.auto_apply,
            merge_lock_wait_ms = config.merge.lock_wait_ms,
            learning_interval_secs = config.learning.interval_secs,
            "Runtime settings resolved"
        );

        Ok(config)
    }

    /// Worker count for classification, resolving 0 to available parallelism
    pub fn workers(&self) -> usize {
        match self.detection.workers {
            0 => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            n => n,
        }
    }
}
