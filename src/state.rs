use crate::auth::jwt::JwtKeys;
use crate::config::{AppConfig, StoreBackend};
use crate::db;
use crate::users::{
    memory::MemoryUserStore,
    repo::{PgUserStore, UserStore},
};
use anyhow::Context;
use std::sync::Arc;
use tracing::warn;

/// Everything a request handler needs. Built once at startup and cloned
/// per request; nothing in here is mutated after construction.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn UserStore>,
    pub config: Arc<AppConfig>,
    pub keys: JwtKeys,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store = match config.store_backend {
            StoreBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL must be set")?;
                let pool = db::connect(url, config.max_connections).await?;
                db::run_migrations(&pool).await;
                Arc::new(PgUserStore::new(pool)) as Arc<dyn UserStore>
            }
            StoreBackend::Memory => {
                warn!("using in-memory user store; data is lost on shutdown");
                Arc::new(MemoryUserStore::new()) as Arc<dyn UserStore>
            }
        };

        Ok(Self::from_parts(store, config))
    }

    pub fn from_parts(store: Arc<dyn UserStore>, config: Arc<AppConfig>) -> Self {
        let keys = JwtKeys::from_secret(&config.jwt.secret);
        Self {
            store,
            config,
            keys,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        let config = Arc::new(AppConfig {
            store_backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 1,
            host: "127.0.0.1".into(),
            port: 0,
            jwt: crate::config::JwtConfig {
                secret: "test-secret".into(),
            },
        });
        Self::from_parts(Arc::new(MemoryUserStore::new()), config)
    }
}
