use disparador_core::types::{ChangeKind, Counters, DeliveryStatus, StatusUpdate};
use disparador_core::{DispatchError, DispatchResult};
use serde::{Deserialize, Serialize};
use tracing;
use uuid::Uuid;

use crate::service::{Actor, DispatchService};

/// Boundary schema for a delivery report from the relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub dispatch_id: Uuid,
    pub phone: String,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusAck {
    pub success: bool,
    pub success_count: i32,
    pub error_count: i32,
}

impl From<Counters> for StatusAck {
    fn from(counters: Counters) -> Self {
        StatusAck {
            success: true,
            success_count: counters.success_count,
            error_count: counters.error_count,
        }
    }
}

impl DispatchService {
    /// Record one contact's delivery outcome and return the recomputed counters.
    /// `caller` is the profile resolved from the relay's `x-unique-id`; it must own
    /// the dispatch.
    pub async fn update_contact_status(
        &self,
        caller: &Actor,
        report: StatusReport,
    ) -> DispatchResult<StatusAck> {
        let dispatch = self
            .ctx
            .store
            .dispatch(report.dispatch_id)
            .await?
            .ok_or_else(|| {
                tracing::warn!("Status update for unknown dispatch {}", report.dispatch_id);
                DispatchError::NotFound(format!("dispatch {}", report.dispatch_id))
            })?;

        if dispatch.user_id != caller.user_id {
            tracing::warn!(
                "Relay token of user {} used for dispatch {} owned by {}",
                caller.user_id,
                dispatch.id,
                dispatch.user_id
            );
            return Err(DispatchError::Unauthorized(format!(
                "dispatch {} belongs to another user",
                dispatch.id
            )));
        }

        let error = match report.status {
            DeliveryStatus::Error => report.error.filter(|e| !e.trim().is_empty()),
            DeliveryStatus::Success => None,
        };
        let update = StatusUpdate {
            dispatch_id: dispatch.id,
            phone: report.phone.trim().to_string(),
            status: report.status,
            error,
        };

        let (dispatch, row) = match self.ctx.store.record_contact_status(&update).await {
            Ok(result) => result,
            Err(DispatchError::NotFound(what)) => {
                tracing::warn!("Ignoring status update: {}", what);
                return Err(DispatchError::NotFound(what));
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            "Dispatch {} contact {} -> {} (success: {}, error: {}, total: {})",
            dispatch.id,
            row.contact_phone,
            row.status,
            dispatch.success_count,
            dispatch.error_count,
            dispatch.total_contacts
        );

        self.notify(ChangeKind::Update, std::slice::from_ref(&row)).await;

        Ok(StatusAck::from(dispatch.counters()))
    }
}
