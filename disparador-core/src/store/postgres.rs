use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use std::sync::Arc;
use tracing;
use uuid::Uuid;

use crate::db::{DbConnection, DbPool};
use crate::error::{DispatchError, DispatchResult};
use crate::schema::{dispatch_contacts, dispatches, profiles, whatsapp_instances};
use crate::store::DispatchStore;
use crate::types::{
    tally, ContactResult, ContactStatus, Dispatch, NewDispatch, Profile, StatusUpdate,
    WhatsAppInstance,
};

#[derive(Queryable, Selectable)]
#[diesel(table_name = profiles)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ProfileRow {
    id: Uuid,
    email: String,
    is_admin: bool,
    unique_id: String,
    webhook_url: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Profile {
            id: row.id,
            email: row.email,
            is_admin: row.is_admin,
            unique_id: row.unique_id,
            webhook_url: row.webhook_url,
            created_at: row.created_at,
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = whatsapp_instances)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct InstanceRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InstanceRow> for WhatsAppInstance {
    type Error = DispatchError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        Ok(WhatsAppInstance {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            status: row.status.parse().map_err(DispatchError::store)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = dispatches)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct DispatchRow {
    id: Uuid,
    user_id: Uuid,
    instance_id: Uuid,
    total_contacts: i32,
    is_ai_dispatch: bool,
    initial_message: String,
    ai_context: Option<String>,
    success_count: i32,
    error_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<DispatchRow> for Dispatch {
    fn from(row: DispatchRow) -> Self {
        Dispatch {
            id: row.id,
            user_id: row.user_id,
            instance_id: row.instance_id,
            total_contacts: row.total_contacts,
            is_ai_dispatch: row.is_ai_dispatch,
            initial_message: row.initial_message,
            ai_context: row.ai_context,
            success_count: row.success_count,
            error_count: row.error_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = dispatches)]
struct NewDispatchRow<'a> {
    id: Uuid,
    user_id: Uuid,
    instance_id: Uuid,
    total_contacts: i32,
    is_ai_dispatch: bool,
    initial_message: &'a str,
    ai_context: Option<&'a str>,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = dispatch_contacts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ContactRow {
    id: Uuid,
    dispatch_id: Uuid,
    contact_name: String,
    contact_phone: String,
    status: String,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ContactRow> for ContactResult {
    type Error = DispatchError;

    fn try_from(row: ContactRow) -> Result<Self, Self::Error> {
        Ok(ContactResult {
            id: row.id,
            dispatch_id: row.dispatch_id,
            contact_name: row.contact_name,
            contact_phone: row.contact_phone,
            status: row.status.parse().map_err(DispatchError::store)?,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = dispatch_contacts)]
struct NewContactRow<'a> {
    id: Uuid,
    dispatch_id: Uuid,
    contact_name: &'a str,
    contact_phone: &'a str,
    status: &'a str,
}

/// Postgres rejects statements with more bind parameters than this.
const MAX_BIND_PARAMS: usize = u16::MAX as usize;
/// Bind parameters per `NewContactRow`.
const CONTACT_ROW_BINDS: usize = 5;
const CONTACT_INSERT_CHUNK: usize = 1000;

/// Split contact rows into multi-row INSERTs that stay under the bind limit.
fn contact_chunks<'r, 'a>(rows: &'r [NewContactRow<'a>]) -> std::slice::Chunks<'r, NewContactRow<'a>> {
    rows.chunks(CONTACT_INSERT_CHUNK)
}

fn into_results(rows: Vec<ContactRow>) -> DispatchResult<Vec<ContactResult>> {
    rows.into_iter().map(ContactResult::try_from).collect()
}

/// Postgres-backed store over the shared diesel-async pool.
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<DbPool>,
}

impl PgStore {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> DispatchResult<DbConnection> {
        self.pool.get().await.map_err(|e| {
            tracing::error!("Failed to get DB connection: {}", e);
            DispatchError::store(e)
        })
    }
}

#[async_trait]
impl DispatchStore for PgStore {
    async fn profile(&self, user_id: Uuid) -> DispatchResult<Option<Profile>> {
        let mut conn = self.conn().await?;
        let row: Option<ProfileRow> = profiles::table
            .find(user_id)
            .select(ProfileRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(DispatchError::store)?;
        Ok(row.map(Profile::from))
    }

    async fn profile_by_unique_id(&self, unique_id: &str) -> DispatchResult<Option<Profile>> {
        let mut conn = self.conn().await?;
        let row: Option<ProfileRow> = profiles::table
            .filter(profiles::unique_id.eq(unique_id))
            .select(ProfileRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(DispatchError::store)?;
        Ok(row.map(Profile::from))
    }

    async fn instance(&self, instance_id: Uuid) -> DispatchResult<Option<WhatsAppInstance>> {
        let mut conn = self.conn().await?;
        let row: Option<InstanceRow> = whatsapp_instances::table
            .find(instance_id)
            .select(InstanceRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(DispatchError::store)?;
        row.map(WhatsAppInstance::try_from).transpose()
    }

    async fn create_dispatch(
        &self,
        new_dispatch: &NewDispatch,
    ) -> DispatchResult<(Dispatch, Vec<ContactResult>)> {
        let mut conn = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut conn;

        let dispatch_id = Uuid::new_v4();
        let dispatch_row = NewDispatchRow {
            id: dispatch_id,
            user_id: new_dispatch.user_id,
            instance_id: new_dispatch.instance_id,
            total_contacts: new_dispatch.contacts.len() as i32,
            is_ai_dispatch: new_dispatch.is_ai_dispatch,
            initial_message: &new_dispatch.initial_message,
            ai_context: new_dispatch.ai_context.as_deref(),
        };
        let contact_rows: Vec<NewContactRow> = new_dispatch
            .contacts
            .iter()
            .map(|contact| NewContactRow {
                id: Uuid::new_v4(),
                dispatch_id,
                contact_name: &contact.name,
                contact_phone: &contact.phone,
                status: ContactStatus::Pending.as_str(),
            })
            .collect();

        let (dispatch, contacts) = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    let dispatch: DispatchRow = diesel::insert_into(dispatches::table)
                        .values(&dispatch_row)
                        .returning(DispatchRow::as_returning())
                        .get_result(conn)
                        .await?;

                    let mut contacts: Vec<ContactRow> = Vec::with_capacity(contact_rows.len());
                    for chunk in contact_chunks(&contact_rows) {
                        let inserted: Vec<ContactRow> = diesel::insert_into(dispatch_contacts::table)
                            .values(chunk)
                            .returning(ContactRow::as_returning())
                            .get_results(conn)
                            .await?;
                        contacts.extend(inserted);
                    }

                    Ok((dispatch, contacts))
                }
                .scope_boxed()
            })
            .await
            .map_err(|e| {
                tracing::error!("Failed to create dispatch: {}", e);
                DispatchError::store(e)
            })?;

        Ok((Dispatch::from(dispatch), into_results(contacts)?))
    }

    async fn dispatch(&self, dispatch_id: Uuid) -> DispatchResult<Option<Dispatch>> {
        let mut conn = self.conn().await?;
        let row: Option<DispatchRow> = dispatches::table
            .find(dispatch_id)
            .select(DispatchRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(DispatchError::store)?;
        Ok(row.map(Dispatch::from))
    }

    async fn contact_results(&self, dispatch_id: Uuid) -> DispatchResult<Vec<ContactResult>> {
        let mut conn = self.conn().await?;
        let rows: Vec<ContactRow> = dispatch_contacts::table
            .filter(dispatch_contacts::dispatch_id.eq(dispatch_id))
            .order(dispatch_contacts::created_at.asc())
            .select(ContactRow::as_select())
            .load(&mut conn)
            .await
            .map_err(DispatchError::store)?;
        into_results(rows)
    }

    async fn recent_dispatches(&self, user_id: Uuid, limit: i64) -> DispatchResult<Vec<Dispatch>> {
        let mut conn = self.conn().await?;
        let rows: Vec<DispatchRow> = dispatches::table
            .filter(dispatches::user_id.eq(user_id))
            .order(dispatches::created_at.desc())
            .limit(limit)
            .select(DispatchRow::as_select())
            .load(&mut conn)
            .await
            .map_err(DispatchError::store)?;
        Ok(rows.into_iter().map(Dispatch::from).collect())
    }

    async fn record_contact_status(
        &self,
        update: &StatusUpdate,
    ) -> DispatchResult<(Dispatch, ContactResult)> {
        let mut conn = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut conn;

        let dispatch_id = update.dispatch_id;
        let phone = update.phone.as_str();
        let status = ContactStatus::from(update.status).as_str();
        let error_message = update.error.as_deref();
        let now = Utc::now();

        let result = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    // Row lock on the dispatch serialises concurrent recomputes.
                    let _locked: Uuid = dispatches::table
                        .find(dispatch_id)
                        .select(dispatches::id)
                        .for_update()
                        .get_result(conn)
                        .await?;

                    let contact: ContactRow = diesel::update(
                        dispatch_contacts::table
                            .filter(dispatch_contacts::dispatch_id.eq(dispatch_id))
                            .filter(dispatch_contacts::contact_phone.eq(phone)),
                    )
                    .set((
                        dispatch_contacts::status.eq(status),
                        dispatch_contacts::error_message.eq(error_message),
                        dispatch_contacts::updated_at.eq(now),
                    ))
                    .returning(ContactRow::as_returning())
                    .get_result(conn)
                    .await?;

                    let statuses: Vec<String> = dispatch_contacts::table
                        .filter(dispatch_contacts::dispatch_id.eq(dispatch_id))
                        .select(dispatch_contacts::status)
                        .load(conn)
                        .await?;
                    let parsed: Vec<ContactStatus> =
                        statuses.iter().filter_map(|s| s.parse().ok()).collect();
                    let counters = tally(&parsed);

                    let dispatch: DispatchRow = diesel::update(dispatches::table.find(dispatch_id))
                        .set((
                            dispatches::success_count.eq(counters.success_count),
                            dispatches::error_count.eq(counters.error_count),
                            dispatches::updated_at.eq(now),
                        ))
                        .returning(DispatchRow::as_returning())
                        .get_result(conn)
                        .await?;

                    Ok((dispatch, contact))
                }
                .scope_boxed()
            })
            .await;

        match result {
            Ok((dispatch, contact)) => {
                Ok((Dispatch::from(dispatch), ContactResult::try_from(contact)?))
            }
            Err(diesel::result::Error::NotFound) => Err(DispatchError::NotFound(format!(
                "no contact with phone {} in dispatch {}",
                update.phone, dispatch_id
            ))),
            Err(e) => {
                tracing::error!("Failed to record contact status for dispatch {}: {}", dispatch_id, e);
                Err(DispatchError::store(e))
            }
        }
    }

    async fn delete_dispatch(&self, dispatch_id: Uuid) -> DispatchResult<Vec<ContactResult>> {
        let mut conn = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut conn;

        let result = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    let _locked: Uuid = dispatches::table
                        .find(dispatch_id)
                        .select(dispatches::id)
                        .for_update()
                        .get_result(conn)
                        .await?;

                    let removed: Vec<ContactRow> = diesel::delete(
                        dispatch_contacts::table
                            .filter(dispatch_contacts::dispatch_id.eq(dispatch_id)),
                    )
                    .returning(ContactRow::as_returning())
                    .get_results(conn)
                    .await?;

                    diesel::delete(dispatches::table.find(dispatch_id))
                        .execute(conn)
                        .await?;

                    Ok(removed)
                }
                .scope_boxed()
            })
            .await;

        match result {
            Ok(removed) => into_results(removed),
            Err(diesel::result::Error::NotFound) => {
                Err(DispatchError::NotFound(format!("dispatch {}", dispatch_id)))
            }
            Err(e) => {
                tracing::error!("Failed to delete dispatch {}: {}", dispatch_id, e);
                Err(DispatchError::store(e))
            }
        }
    }
}
