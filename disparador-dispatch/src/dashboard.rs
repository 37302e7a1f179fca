use disparador_core::types::{ContactResult, Dispatch};
use disparador_core::{DispatchError, DispatchResult};
use serde::{Deserialize, Serialize};
use tracing;
use uuid::Uuid;

use crate::service::{Actor, DispatchService};

pub const RECENT_DISPATCH_LIMIT: i64 = 5;

/// Dashboards poll on a fixed cadence instead of subscribing.
pub const DASHBOARD_POLL_INTERVAL_SECS: u64 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardView {
    pub effective_user_id: Uuid,
    pub latest: Option<Dispatch>,
    pub recent: Vec<Dispatch>,
    pub contacts: Vec<ContactResult>,
    pub poll_interval_secs: u64,
}

/// Decide whose data the actor reads. Only admins may look at someone else.
pub fn effective_user(actor: &Actor, selected_user_id: Option<Uuid>) -> DispatchResult<Uuid> {
    match selected_user_id {
        None => Ok(actor.user_id),
        Some(id) if id == actor.user_id || actor.is_admin => Ok(id),
        Some(id) => Err(DispatchError::Unauthorized(format!(
            "user {} may not view user {}",
            actor.user_id, id
        ))),
    }
}

impl DispatchService {
    pub async fn dashboard(
        &self,
        actor: &Actor,
        selected_user_id: Option<Uuid>,
    ) -> DispatchResult<DashboardView> {
        let effective_user_id = effective_user(actor, selected_user_id).map_err(|e| {
            tracing::warn!("Dashboard access denied: {}", e);
            e
        })?;

        if effective_user_id != actor.user_id {
            tracing::debug!("Admin {} viewing dashboard of {}", actor.user_id, effective_user_id);
        }

        let recent = self
            .ctx
            .store
            .recent_dispatches(effective_user_id, RECENT_DISPATCH_LIMIT)
            .await?;
        let latest = recent.first().cloned();
        let contacts = match &latest {
            Some(dispatch) => self.ctx.store.contact_results(dispatch.id).await?,
            None => Vec::new(),
        };

        Ok(DashboardView {
            effective_user_id,
            latest,
            recent,
            contacts,
            poll_interval_secs: DASHBOARD_POLL_INTERVAL_SECS,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initiator::CreateDispatch;
    use crate::testing::Fixture;

    #[test]
    fn test_effective_user_rules() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let user = Actor { user_id: me, is_admin: false };
        let admin = Actor { user_id: me, is_admin: true };

        assert_eq!(effective_user(&user, None).unwrap(), me);
        assert_eq!(effective_user(&user, Some(me)).unwrap(), me);
        assert!(matches!(
            effective_user(&user, Some(other)),
            Err(DispatchError::Unauthorized(_))
        ));
        assert_eq!(effective_user(&admin, Some(other)).unwrap(), other);
    }

    #[tokio::test]
    async fn test_dashboard_latest_and_recent() {
        let fx = Fixture::new().await;
        let mut last = None;
        for i in 0..6 {
            let phones: Vec<String> = (0..=i).map(|n| n.to_string()).collect();
            let phones: Vec<&str> = phones.iter().map(String::as_str).collect();
            last = Some(
                fx.service
                    .create_dispatch(&fx.owner, CreateDispatch::plain(fx.instance_id, &phones))
                    .await
                    .unwrap(),
            );
        }

        let view = fx.service.dashboard(&fx.owner, None).await.unwrap();
        assert_eq!(view.effective_user_id, fx.owner.user_id);
        assert_eq!(view.recent.len(), 5);
        assert_eq!(view.latest.as_ref().map(|d| d.id), last);
        assert_eq!(view.contacts.len(), 6);
        assert_eq!(view.poll_interval_secs, 3);
    }

    #[tokio::test]
    async fn test_dashboard_impersonation() {
        let fx = Fixture::new().await;
        fx.service
            .create_dispatch(&fx.owner, CreateDispatch::plain(fx.instance_id, &["1"]))
            .await
            .unwrap();

        let denied = fx.service.dashboard(&fx.stranger, Some(fx.owner.user_id)).await;
        assert!(matches!(denied, Err(DispatchError::Unauthorized(_))));

        let view = fx.service.dashboard(&fx.admin, Some(fx.owner.user_id)).await.unwrap();
        assert_eq!(view.effective_user_id, fx.owner.user_id);
        assert_eq!(view.recent.len(), 1);

        let own = fx.service.dashboard(&fx.stranger, None).await.unwrap();
        assert!(own.latest.is_none());
        assert!(own.contacts.is_empty());
    }
}
