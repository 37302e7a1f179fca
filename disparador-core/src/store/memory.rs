use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::error::{DispatchError, DispatchResult};
use crate::store::DispatchStore;
use crate::types::{
    tally, ContactResult, ContactStatus, Dispatch, NewDispatch, Profile, StatusUpdate,
    WhatsAppInstance,
};

#[derive(Default)]
struct Tables {
    profiles: HashMap<Uuid, Profile>,
    instances: HashMap<Uuid, WhatsAppInstance>,
    // insertion order doubles as a tie-breaker for equal timestamps
    dispatches: Vec<Dispatch>,
    contacts: Vec<ContactResult>,
}

/// Process-local store. Every operation holds one lock, so the
/// update-and-recompute sequence is serialised the same way the
/// Postgres row lock serialises it.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> DispatchResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| DispatchError::TransientStore("memory store lock poisoned".to_string()))
    }

    pub fn insert_profile(&self, profile: Profile) -> DispatchResult<()> {
        self.lock()?.profiles.insert(profile.id, profile);
        Ok(())
    }

    pub fn insert_instance(&self, instance: WhatsAppInstance) -> DispatchResult<()> {
        self.lock()?.instances.insert(instance.id, instance);
        Ok(())
    }
}

#[async_trait]
impl DispatchStore for MemoryStore {
    async fn profile(&self, user_id: Uuid) -> DispatchResult<Option<Profile>> {
        Ok(self.lock()?.profiles.get(&user_id).cloned())
    }

    async fn profile_by_unique_id(&self, unique_id: &str) -> DispatchResult<Option<Profile>> {
        Ok(self
            .lock()?
            .profiles
            .values()
            .find(|p| p.unique_id == unique_id)
            .cloned())
    }

    async fn instance(&self, instance_id: Uuid) -> DispatchResult<Option<WhatsAppInstance>> {
        Ok(self.lock()?.instances.get(&instance_id).cloned())
    }

    async fn create_dispatch(
        &self,
        new_dispatch: &NewDispatch,
    ) -> DispatchResult<(Dispatch, Vec<ContactResult>)> {
        let now = Utc::now();
        let dispatch = Dispatch {
            id: Uuid::new_v4(),
            user_id: new_dispatch.user_id,
            instance_id: new_dispatch.instance_id,
            total_contacts: new_dispatch.contacts.len() as i32,
            is_ai_dispatch: new_dispatch.is_ai_dispatch,
            initial_message: new_dispatch.initial_message.clone(),
            ai_context: new_dispatch.ai_context.clone(),
            success_count: 0,
            error_count: 0,
            created_at: now,
            updated_at: now,
        };
        let rows: Vec<ContactResult> = new_dispatch
            .contacts
            .iter()
            .map(|contact| ContactResult {
                id: Uuid::new_v4(),
                dispatch_id: dispatch.id,
                contact_name: contact.name.clone(),
                contact_phone: contact.phone.clone(),
                status: ContactStatus::Pending,
                error_message: None,
                created_at: now,
                updated_at: now,
            })
            .collect();

        let mut tables = self.lock()?;
        tables.dispatches.push(dispatch.clone());
        tables.contacts.extend(rows.iter().cloned());

        Ok((dispatch, rows))
    }

    async fn dispatch(&self, dispatch_id: Uuid) -> DispatchResult<Option<Dispatch>> {
        Ok(self
            .lock()?
            .dispatches
            .iter()
            .find(|d| d.id == dispatch_id)
            .cloned())
    }

    async fn contact_results(&self, dispatch_id: Uuid) -> DispatchResult<Vec<ContactResult>> {
        Ok(self
            .lock()?
            .contacts
            .iter()
            .filter(|c| c.dispatch_id == dispatch_id)
            .cloned()
            .collect())
    }

    async fn recent_dispatches(&self, user_id: Uuid, limit: i64) -> DispatchResult<Vec<Dispatch>> {
        let tables = self.lock()?;
        let mut recent: Vec<Dispatch> = tables
            .dispatches
            .iter()
            .rev()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        recent.truncate(limit.max(0) as usize);
        Ok(recent)
    }

    async fn record_contact_status(
        &self,
        update: &StatusUpdate,
    ) -> DispatchResult<(Dispatch, ContactResult)> {
        let mut tables = self.lock()?;
        let now = Utc::now();

        let dispatch_index = tables
            .dispatches
            .iter()
            .position(|d| d.id == update.dispatch_id)
            .ok_or_else(|| DispatchError::NotFound(format!("dispatch {}", update.dispatch_id)))?;

        let contact = tables
            .contacts
            .iter_mut()
            .find(|c| c.dispatch_id == update.dispatch_id && c.contact_phone == update.phone)
            .ok_or_else(|| {
                DispatchError::NotFound(format!(
                    "no contact with phone {} in dispatch {}",
                    update.phone, update.dispatch_id
                ))
            })?;
        contact.status = update.status.into();
        contact.error_message = update.error.clone();
        contact.updated_at = now;
        let contact = contact.clone();

        let counters = tally(
            tables
                .contacts
                .iter()
                .filter(|c| c.dispatch_id == update.dispatch_id)
                .map(|c| &c.status),
        );

        let dispatch = &mut tables.dispatches[dispatch_index];
        dispatch.success_count = counters.success_count;
        dispatch.error_count = counters.error_count;
        dispatch.updated_at = now;

        Ok((dispatch.clone(), contact))
    }

    async fn delete_dispatch(&self, dispatch_id: Uuid) -> DispatchResult<Vec<ContactResult>> {
        let mut tables = self.lock()?;

        if !tables.dispatches.iter().any(|d| d.id == dispatch_id) {
            return Err(DispatchError::NotFound(format!("dispatch {}", dispatch_id)));
        }

        let (removed, kept): (Vec<ContactResult>, Vec<ContactResult>) = tables
            .contacts
            .drain(..)
            .partition(|c| c.dispatch_id == dispatch_id);
        tables.contacts = kept;
        tables.dispatches.retain(|d| d.id != dispatch_id);

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContactInput, DeliveryStatus};

    fn new_dispatch(user_id: Uuid, phones: &[&str]) -> NewDispatch {
        NewDispatch {
            user_id,
            instance_id: Uuid::new_v4(),
            is_ai_dispatch: false,
            initial_message: "Hello".to_string(),
            ai_context: None,
            contacts: phones
                .iter()
                .enumerate()
                .map(|(i, phone)| ContactInput {
                    name: format!("Contact {}", i + 1),
                    phone: phone.to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_record_status_recomputes_counters() {
        let store = MemoryStore::new();
        let (dispatch, rows) = store
            .create_dispatch(&new_dispatch(Uuid::new_v4(), &["1", "2", "3"]))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.status == ContactStatus::Pending));

        let (updated, row) = store
            .record_contact_status(&StatusUpdate {
                dispatch_id: dispatch.id,
                phone: "2".to_string(),
                status: DeliveryStatus::Error,
                error: Some("timeout".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(updated.error_count, 1);
        assert_eq!(updated.success_count, 0);
        assert_eq!(row.error_message.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_unknown_phone_leaves_counters() {
        let store = MemoryStore::new();
        let (dispatch, _) = store
            .create_dispatch(&new_dispatch(Uuid::new_v4(), &["1"]))
            .await
            .unwrap();

        let err = store
            .record_contact_status(&StatusUpdate {
                dispatch_id: dispatch.id,
                phone: "999".to_string(),
                status: DeliveryStatus::Success,
                error: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::NotFound(_)));

        let stored = store.dispatch(dispatch.id).await.unwrap().unwrap();
        assert_eq!(stored.counters(), dispatch.counters());
    }

    #[tokio::test]
    async fn test_delete_removes_rows_of_that_dispatch_only() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let (first, _) = store.create_dispatch(&new_dispatch(user, &["1", "2"])).await.unwrap();
        let (second, _) = store.create_dispatch(&new_dispatch(user, &["3"])).await.unwrap();

        let removed = store.delete_dispatch(first.id).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(store.dispatch(first.id).await.unwrap().is_none());
        assert_eq!(store.contact_results(second.id).await.unwrap().len(), 1);
        assert!(matches!(
            store.delete_dispatch(first.id).await,
            Err(DispatchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_recent_dispatches_newest_first() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let mut ids = Vec::new();
        for _ in 0..7 {
            let (d, _) = store.create_dispatch(&new_dispatch(user, &["1"])).await.unwrap();
            ids.push(d.id);
        }
        store.create_dispatch(&new_dispatch(Uuid::new_v4(), &["1"])).await.unwrap();

        let recent = store.recent_dispatches(user, 5).await.unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].id, ids[6]);
        assert!(recent.iter().all(|d| d.user_id == user));
    }
}
