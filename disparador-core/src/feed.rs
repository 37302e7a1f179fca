//! Change notifications for contact result rows, scoped by dispatch.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use redis::streams::{StreamRangeReply, StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tracing;
use uuid::Uuid;

use crate::redis::{RedisConnection, RedisPool};
use crate::types::ContactChange;

pub type ChangeStream = BoxStream<'static, ContactChange>;

/// Max entries kept per dispatch stream. Subscribers never replay, so this only
/// bounds memory.
const STREAM_MAX_LEN: usize = 1000;
/// Idle streams disappear after this long; every publish pushes it back.
pub const STREAM_TTL_SECS: i64 = 60 * 60;
const XREAD_BLOCK_MS: usize = 1000;

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn publish(&self, change: &ContactChange) -> Result<()>;

    /// Publish several changes in order.
    async fn publish_all(&self, changes: &[ContactChange]) -> Result<()> {
        for change in changes {
            self.publish(change).await?;
        }
        Ok(())
    }

    /// Changes for one dispatch from now on. Events published before the call
    /// are not delivered.
    async fn subscribe(&self, dispatch_id: Uuid) -> Result<ChangeStream>;
}

pub fn stream_key(dispatch_id: Uuid) -> String {
    format!("STREAM:DISPATCH:{}", dispatch_id)
}

/// XADD each change to its dispatch stream and refresh the stream's expiry,
/// all in one round trip.
fn publish_pipeline(changes: &[ContactChange]) -> Result<redis::Pipeline> {
    let mut pipe = redis::pipe();
    for change in changes {
        let key = stream_key(change.row.dispatch_id);
        pipe.cmd("XADD")
            .arg(&key)
            .arg("MAXLEN")
            .arg("~")
            .arg(STREAM_MAX_LEN)
            .arg("*")
            .arg("data")
            .arg(serde_json::to_string(change)?)
            .ignore()
            .cmd("EXPIRE")
            .arg(&key)
            .arg(STREAM_TTL_SECS)
            .ignore();
    }
    Ok(pipe)
}

/// Redis stream per dispatch, read with blocking XREAD.
pub struct RedisFeed {
    pool: RedisPool,
}

impl RedisFeed {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }
}

struct ReadState {
    pool: RedisPool,
    conn: Option<RedisConnection>,
    key: String,
    last_id: String,
}

async fn read_batch(mut state: ReadState) -> (Vec<ContactChange>, ReadState) {
    let mut conn = match state.conn.take() {
        Some(c) => c,
        None => match state.pool.dedicated().await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("Failed to get Redis connection: {}", e);
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                return (Vec::new(), state);
            }
        },
    };

    let options = StreamReadOptions::default().block(XREAD_BLOCK_MS).count(100);
    let result: redis::RedisResult<Option<StreamReadReply>> = conn
        .xread_options(&[state.key.as_str()], &[state.last_id.as_str()], &options)
        .await;

    let mut changes = Vec::new();
    match result {
        Ok(Some(reply)) => {
            for stream_key in reply.keys {
                for entry in stream_key.ids {
                    state.last_id = entry.id.clone();
                    let Some(data) = entry.get::<String>("data") else {
                        continue;
                    };
                    match serde_json::from_str::<ContactChange>(&data) {
                        Ok(change) => changes.push(change),
                        Err(e) => tracing::warn!("Dropping malformed change on {}: {}", state.key, e),
                    }
                }
            }
            state.conn = Some(conn);
        }
        // Block timeout, nothing new
        Ok(None) => {
            state.conn = Some(conn);
        }
        Err(e) => {
            tracing::error!("Redis stream read error on {}: {}", state.key, e);
            tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
        }
    }

    (changes, state)
}

#[async_trait]
impl ChangeFeed for RedisFeed {
    async fn publish(&self, change: &ContactChange) -> Result<()> {
        self.publish_all(std::slice::from_ref(change)).await
    }

    async fn publish_all(&self, changes: &[ContactChange]) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.shared();
        let _: () = publish_pipeline(changes)?
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow!("Failed to publish {} change(s): {}", changes.len(), e))?;

        Ok(())
    }

    async fn subscribe(&self, dispatch_id: Uuid) -> Result<ChangeStream> {
        let mut shared = self.pool.shared();
        let key = stream_key(dispatch_id);

        // Pin the starting point now so nothing published after this call is missed.
        let newest: StreamRangeReply = redis::cmd("XREVRANGE")
            .arg(&key)
            .arg("+")
            .arg("-")
            .arg("COUNT")
            .arg(1)
            .query_async(&mut shared)
            .await
            .map_err(|e| anyhow!("Failed to read tail of {}: {}", key, e))?;
        let last_id = newest
            .ids
            .into_iter()
            .next()
            .map(|entry| entry.id)
            .unwrap_or_else(|| "0-0".to_string());

        let state = ReadState {
            pool: self.pool.clone(),
            conn: Some(self.pool.dedicated().await?),
            key,
            last_id,
        };

        let changes = stream::unfold(state, |state| async move {
            let (batch, state) = read_batch(state).await;
            Some((stream::iter(batch), state))
        })
        .flatten();

        Ok(changes.boxed())
    }
}

/// In-process feed over a broadcast channel.
pub struct MemoryFeed {
    sender: broadcast::Sender<ContactChange>,
}

impl MemoryFeed {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn publish(&self, change: &ContactChange) -> Result<()> {
        // No receivers is not an error
        let _ = self.sender.send(change.clone());
        Ok(())
    }

    async fn subscribe(&self, dispatch_id: Uuid) -> Result<ChangeStream> {
        let receiver = self.sender.subscribe();

        let changes = stream::unfold(receiver, move |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(change) if change.row.dispatch_id == dispatch_id => {
                        return Some((change, receiver));
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Subscriber for dispatch {} lagged by {} changes", dispatch_id, skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(changes.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChangeKind, ContactResult, ContactStatus};
    use chrono::Utc;

    fn change(dispatch_id: Uuid, phone: &str) -> ContactChange {
        ContactChange {
            kind: ChangeKind::Update,
            row: ContactResult {
                id: Uuid::new_v4(),
                dispatch_id,
                contact_name: "Ana".to_string(),
                contact_phone: phone.to_string(),
                status: ContactStatus::Success,
                error_message: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    #[test]
    fn test_stream_key() {
        let id = Uuid::nil();
        assert_eq!(
            stream_key(id),
            "STREAM:DISPATCH:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_publish_pipeline_adds_and_expires_each_change() {
        let dispatch_id = Uuid::new_v4();
        let changes = vec![change(dispatch_id, "1"), change(dispatch_id, "2")];

        let packed = String::from_utf8(publish_pipeline(&changes).unwrap().get_packed_pipeline()).unwrap();

        assert_eq!(packed.matches("XADD").count(), 2);
        assert_eq!(packed.matches("EXPIRE").count(), 2);
        assert_eq!(packed.matches(&stream_key(dispatch_id)).count(), 4);
        assert!(packed.contains(&STREAM_TTL_SECS.to_string()));
    }

    #[tokio::test]
    async fn test_publish_all_keeps_order() {
        let feed = MemoryFeed::default();
        let watched = Uuid::new_v4();
        let mut stream = feed.subscribe(watched).await.unwrap();

        feed.publish_all(&[change(watched, "1"), change(watched, "2")])
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().row.contact_phone, "1");
        assert_eq!(stream.next().await.unwrap().row.contact_phone, "2");
    }

    #[tokio::test]
    async fn test_memory_feed_filters_by_dispatch() {
        let feed = MemoryFeed::default();
        let watched = Uuid::new_v4();
        let mut stream = feed.subscribe(watched).await.unwrap();

        feed.publish(&change(Uuid::new_v4(), "1")).await.unwrap();
        feed.publish(&change(watched, "2")).await.unwrap();

        let received = stream.next().await.unwrap();
        assert_eq!(received.row.dispatch_id, watched);
        assert_eq!(received.row.contact_phone, "2");
    }

    #[tokio::test]
    async fn test_memory_feed_does_not_replay() {
        let feed = MemoryFeed::default();
        let watched = Uuid::new_v4();
        feed.publish(&change(watched, "early")).await.unwrap();

        let mut stream = feed.subscribe(watched).await.unwrap();
        feed.publish(&change(watched, "late")).await.unwrap();

        assert_eq!(stream.next().await.unwrap().row.contact_phone, "late");
    }
}
