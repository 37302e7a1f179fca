//! Persistence interface for dispatches and their contact result rows.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DispatchResult;
use crate::types::{
    ContactResult, Dispatch, NewDispatch, Profile, StatusUpdate, WhatsAppInstance,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait DispatchStore: Send + Sync {
    async fn profile(&self, user_id: Uuid) -> DispatchResult<Option<Profile>>;

    async fn profile_by_unique_id(&self, unique_id: &str) -> DispatchResult<Option<Profile>>;

    async fn instance(&self, instance_id: Uuid) -> DispatchResult<Option<WhatsAppInstance>>;

    /// Insert the dispatch record and one `pending` row per contact as a single unit.
    async fn create_dispatch(
        &self,
        new_dispatch: &NewDispatch,
    ) -> DispatchResult<(Dispatch, Vec<ContactResult>)>;

    async fn dispatch(&self, dispatch_id: Uuid) -> DispatchResult<Option<Dispatch>>;

    async fn contact_results(&self, dispatch_id: Uuid) -> DispatchResult<Vec<ContactResult>>;

    /// Most recent dispatches of a user, newest first.
    async fn recent_dispatches(&self, user_id: Uuid, limit: i64) -> DispatchResult<Vec<Dispatch>>;

    /// Update the row matching `(dispatch_id, phone)` and rewrite the dispatch counters
    /// from the full row set. Serialised per dispatch. Fails with `NotFound` when no row
    /// matches, leaving the counters untouched.
    async fn record_contact_status(
        &self,
        update: &StatusUpdate,
    ) -> DispatchResult<(Dispatch, ContactResult)>;

    /// Remove every contact row of the dispatch, then the dispatch itself.
    /// Returns the removed rows.
    async fn delete_dispatch(&self, dispatch_id: Uuid) -> DispatchResult<Vec<ContactResult>>;
}
