use std::sync::Arc;

use disparador_core::types::{ChangeKind, ContactChange, ContactResult, Dispatch};
use disparador_core::{DispatchContext, DispatchError, DispatchResult};
use serde::{Deserialize, Serialize};
use tracing;
use uuid::Uuid;

use crate::relay::RelayClient;

/// The identity a request acts as, resolved server-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl Actor {
    pub fn can_view(&self, owner_id: Uuid) -> bool {
        self.is_admin || self.user_id == owner_id
    }
}

#[derive(Clone)]
pub struct DispatchService {
    pub(crate) ctx: DispatchContext,
    pub(crate) relay: Arc<dyn RelayClient>,
}

impl DispatchService {
    pub fn new(ctx: DispatchContext, relay: Arc<dyn RelayClient>) -> Self {
        Self { ctx, relay }
    }

    pub fn context(&self) -> &DispatchContext {
        &self.ctx
    }

    /// Load a dispatch the actor is allowed to see.
    pub async fn authorized_dispatch(&self, actor: &Actor, dispatch_id: Uuid) -> DispatchResult<Dispatch> {
        let dispatch = self
            .ctx
            .store
            .dispatch(dispatch_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("dispatch {}", dispatch_id)))?;

        if !actor.can_view(dispatch.user_id) {
            tracing::warn!("User {} denied access to dispatch {}", actor.user_id, dispatch_id);
            return Err(DispatchError::Unauthorized(format!(
                "dispatch {} belongs to another user",
                dispatch_id
            )));
        }

        Ok(dispatch)
    }

    /// Full state of one dispatch, used to resynchronise after a reconnect.
    pub async fn dispatch_detail(
        &self,
        actor: &Actor,
        dispatch_id: Uuid,
    ) -> DispatchResult<(Dispatch, Vec<ContactResult>)> {
        let dispatch = self.authorized_dispatch(actor, dispatch_id).await?;
        let contacts = self.ctx.store.contact_results(dispatch_id).await?;
        Ok((dispatch, contacts))
    }

    /// Hard-delete a dispatch and all of its contact rows.
    pub async fn delete_dispatch(&self, actor: &Actor, dispatch_id: Uuid) -> DispatchResult<usize> {
        self.authorized_dispatch(actor, dispatch_id).await?;

        let removed = self.ctx.store.delete_dispatch(dispatch_id).await?;
        tracing::info!("Deleted dispatch {} with {} contact rows", dispatch_id, removed.len());

        self.notify(ChangeKind::Delete, &removed).await;

        Ok(removed.len())
    }

    /// Publish row changes. The rows are already committed, so failures are only logged.
    pub(crate) async fn notify(&self, kind: ChangeKind, rows: &[ContactResult]) {
        let changes: Vec<ContactChange> = rows
            .iter()
            .map(|row| ContactChange {
                kind,
                row: row.clone(),
            })
            .collect();

        if let Err(e) = self.ctx.feed.publish_all(&changes).await {
            tracing::warn!(
                "Failed to publish {} {:?} change(s): {}",
                changes.len(),
                kind,
                e
            );
        }
    }
}
