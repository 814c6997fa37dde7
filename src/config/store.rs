use arc_swap::ArcSwap;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::AppConfig;
use crate::error::{AppError, Result};

const CONFIG_KEY: &str = "gateway_config";

/// Configuration store backed by SQLite
///
/// The whole [`AppConfig`] is kept as a single JSON row, created with
/// defaults on first start. Reads go through an `ArcSwap` cache and never
/// touch the database.
#[derive(Clone)]
pub struct ConfigStore {
    cache: Arc<ArcSwap<AppConfig>>,
}

impl ConfigStore {
    /// Open (or create) the store at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(&db_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let config = Self::load_config(&pool).await?;
        pool.close().await;

        Ok(Self {
            cache: Arc::new(ArcSwap::from_pointee(config)),
        })
    }

    async fn load_config(pool: &Pool<Sqlite>) -> Result<AppConfig> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?1")
            .bind(CONFIG_KEY)
            .fetch_optional(pool)
            .await?;

        match row {
            Some((json,)) => {
                serde_json::from_str(&json).map_err(|e| AppError::Config(e.to_string()))
            }
            None => {
                let config = AppConfig::default();
                Self::save_config_to_db(pool, &config).await?;
                Ok(config)
            }
        }
    }

    async fn save_config_to_db(pool: &Pool<Sqlite>, config: &AppConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;

        sqlx::query(
            r#"
            INSERT INTO config (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
        )
        .bind(CONFIG_KEY)
        .bind(&json)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Current configuration (lock-free)
    pub fn get(&self) -> Arc<AppConfig> {
        self.cache.load_full()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_config_store_loads_saved_row() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("config.db");

        let store = ConfigStore::new(&db_path).await.unwrap();
        assert_eq!(store.get().web.http_port, 8000);
        assert!(store.get().video.mirror);

        let mut config = (*store.get()).clone();
        config.web.http_port = 9000;
        config.video.mirror = false;
        config.robot.network_interface = "enp2s0".to_string();
        let pool = SqlitePoolOptions::new()
            .connect(&format!("sqlite:{}", db_path.display()))
            .await
            .unwrap();
        ConfigStore::save_config_to_db(&pool, &config).await.unwrap();
        pool.close().await;

        let store2 = ConfigStore::new(&db_path).await.unwrap();
        let config = store2.get();
        assert_eq!(config.web.http_port, 9000);
        assert!(!config.video.mirror);
        assert_eq!(config.robot.network_interface, "enp2s0");
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"video":{"device":"/dev/video0"}}"#).unwrap();
        assert_eq!(config.video.device, "/dev/video0");
        assert_eq!(config.video.width, 640);
        assert_eq!(config.executables.pool_size, 4);
    }
}
