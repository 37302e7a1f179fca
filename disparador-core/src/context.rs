use std::sync::Arc;

use crate::config::Config;
use crate::db::{create_pool as create_db_pool, run_migrations};
use crate::feed::{ChangeFeed, RedisFeed};
use crate::redis::create_pool as create_redis_pool;
use crate::store::{DispatchStore, PgStore};

/// Shared handles every operation receives explicitly.
#[derive(Clone)]
pub struct DispatchContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn DispatchStore>,
    pub feed: Arc<dyn ChangeFeed>,
}

impl DispatchContext {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        if config.database.run_migrations {
            run_migrations(&config.database).await?;
        }

        let db_pool = create_db_pool(&config.database).await?;
        let redis_pool = create_redis_pool(&config.redis).await?;

        Ok(DispatchContext {
            config: Arc::new(config),
            store: Arc::new(PgStore::new(db_pool)),
            feed: Arc::new(RedisFeed::new(redis_pool)),
        })
    }

    pub fn from_parts(
        config: Config,
        store: Arc<dyn DispatchStore>,
        feed: Arc<dyn ChangeFeed>,
    ) -> Self {
        DispatchContext {
            config: Arc::new(config),
            store,
            feed,
        }
    }
}
