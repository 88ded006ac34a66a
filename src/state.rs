use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

use crate::auth::password;
use crate::config::AppConfig;
use crate::store::{MemStore, PgStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
    pub http: reqwest::Client,
}

impl AppState {
    /// Startup wiring. The store backend is decided exactly once, here: if
    /// the database cannot be reached within the connect timeout the process
    /// runs on the in-memory store instead of crashing, and never fails over
    /// in either direction afterwards.
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        let connect = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&config.database_url)
            .await;

        let store: Arc<dyn UserStore> = match connect {
            Ok(pool) => {
                if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                    warn!(error = %e, "migration failed; continuing with the existing schema");
                }
                info!("connected to postgres");
                Arc::new(PgStore::new(pool))
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "database unreachable; falling back to the in-memory user store \
                     (all data will be lost on restart)"
                );
                let hash = password::hash_password(&config.admin_password)?;
                let store = MemStore::with_bootstrap_admin(&config.admin_email, hash);
                info!(email = %config.admin_email, "bootstrap admin seeded in memory");
                Arc::new(store)
            }
        };

        Ok(Self {
            store,
            config,
            http,
        })
    }

    pub fn from_parts(
        store: Arc<dyn UserStore>,
        config: Arc<AppConfig>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            store,
            config,
            http,
        }
    }

    /// Empty in-memory store and fixed config; no network, no database.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            store: Arc::new(MemStore::new()),
            config: Arc::new(AppConfig::for_tests()),
            http: reqwest::Client::new(),
        }
    }
}
