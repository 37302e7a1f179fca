use anyhow::{anyhow, Result};
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::Client;
use tracing;

use crate::config::RedisConfig;

/// Redis handles for the change feed.
///
/// Publishers share one reconnecting `ConnectionManager`. A blocking XREAD
/// holds its connection until it returns, so every subscriber opens its own.
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
    shared: ConnectionManager,
}

pub type RedisConnection = MultiplexedConnection;

impl RedisPool {
    /// Shared connection for short commands. Cloning is cheap.
    pub fn shared(&self) -> ConnectionManager {
        self.shared.clone()
    }

    /// Fresh connection owned by a single blocking reader.
    pub async fn dedicated(&self) -> Result<RedisConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| anyhow!("Failed to open Redis connection: {}", e))
    }
}

pub async fn create_pool(config: &RedisConfig) -> Result<RedisPool> {
    tracing::info!("Connecting to Redis at {}", mask_redis_url(&config.url));

    let client = Client::open(config.url.as_str())
        .map_err(|e| anyhow!("Failed to create Redis client: {}", e))?;

    let mut shared = ConnectionManager::new(client.clone())
        .await
        .map_err(|e| anyhow!("Failed to connect to Redis: {}", e))?;

    let _: String = redis::cmd("PING")
        .query_async(&mut shared)
        .await
        .map_err(|e| anyhow!("Failed to ping Redis: {}", e))?;

    tracing::info!("Redis connection manager ready");

    Ok(RedisPool { client, shared })
}

fn mask_redis_url(url: &str) -> String {
    match url.rfind('@') {
        Some(at_pos) => {
            let (before_at, after_at) = url.split_at(at_pos);
            let scheme_end = before_at.find("://").map(|p| p + 3).unwrap_or(0);
            match before_at[scheme_end..].find(':') {
                Some(colon) => format!("{}:****{}", &before_at[..scheme_end + colon], after_at),
                None => format!("{}****{}", &before_at[..scheme_end], after_at),
            }
        }
        None => url.to_string(),
    }
}
