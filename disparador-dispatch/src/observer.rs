use disparador_core::types::ContactChange;
use disparador_core::{ChangeStream, DispatchError, DispatchResult};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing;
use uuid::Uuid;

use crate::service::{Actor, DispatchService};

/// Live subscription to one dispatch's row changes. Dropping it tears the
/// subscription down; missed events are never replayed.
pub struct Subscription {
    dispatch_id: Uuid,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn dispatch_id(&self) -> Uuid {
        self.dispatch_id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
        tracing::debug!("Subscription to dispatch {} closed", self.dispatch_id);
    }
}

impl DispatchService {
    /// Raw change stream for a dispatch the actor may see.
    pub async fn changes(&self, actor: &Actor, dispatch_id: Uuid) -> DispatchResult<ChangeStream> {
        self.authorized_dispatch(actor, dispatch_id).await?;
        self.ctx
            .feed
            .subscribe(dispatch_id)
            .await
            .map_err(DispatchError::store)
    }

    /// Invoke `handler` for every insert, update or delete on the dispatch's rows.
    pub async fn watch<F>(&self, actor: &Actor, dispatch_id: Uuid, mut handler: F) -> DispatchResult<Subscription>
    where
        F: FnMut(ContactChange) + Send + 'static,
    {
        let mut changes = self.changes(actor, dispatch_id).await?;

        let task = tokio::spawn(async move {
            while let Some(change) = changes.next().await {
                handler(change);
            }
            tracing::debug!("Change stream for dispatch {} ended", dispatch_id);
        });

        tracing::debug!("User {} subscribed to dispatch {}", actor.user_id, dispatch_id);

        Ok(Subscription { dispatch_id, task })
    }
}
