use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use disparador_core::types::{ContactInput, InstanceStatus, Profile, WhatsAppInstance};
use disparador_core::{Config, DispatchContext, MemoryFeed, MemoryStore};
use uuid::Uuid;

use crate::initiator::CreateDispatch;
use crate::relay::{RelayClient, RelayJob};
use crate::service::{Actor, DispatchService};

#[derive(Default)]
pub struct RecordingRelay {
    jobs: Mutex<Vec<RelayJob>>,
    fail: bool,
}

impl RecordingRelay {
    pub fn failing() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn jobs(&self) -> Vec<RelayJob> {
        self.jobs.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelayClient for RecordingRelay {
    async fn forward(&self, job: &RelayJob) -> Result<()> {
        self.jobs.lock().unwrap().push(job.clone());
        if self.fail {
            return Err(anyhow!("relay unreachable"));
        }
        Ok(())
    }
}

pub fn profile(with_webhook: bool) -> Profile {
    let id = Uuid::new_v4();
    Profile {
        id,
        email: format!("{}@example.com", id),
        is_admin: false,
        unique_id: format!("uid-{}", id),
        webhook_url: with_webhook.then(|| "https://agent.example.com/hook".to_string()),
        created_at: Utc::now(),
    }
}

fn instance(user_id: Uuid, status: InstanceStatus) -> WhatsAppInstance {
    WhatsAppInstance {
        id: Uuid::new_v4(),
        user_id,
        name: "Principal".to_string(),
        status,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

impl CreateDispatch {
    pub fn plain(instance_id: Uuid, phones: &[&str]) -> Self {
        CreateDispatch {
            message: "Olá, temos novidades!".to_string(),
            instance_id: instance_id.to_string(),
            is_ai_dispatch: false,
            ai_context: None,
            contacts: phones
                .iter()
                .enumerate()
                .map(|(i, phone)| ContactInput {
                    name: format!("Contato {}", i + 1),
                    phone: phone.to_string(),
                })
                .collect(),
        }
    }
}

pub struct Fixture {
    pub service: DispatchService,
    pub store: Arc<MemoryStore>,
    pub relay: Arc<RecordingRelay>,
    pub owner: Actor,
    pub owner_unique_id: String,
    pub stranger: Actor,
    pub admin: Actor,
    pub instance_id: Uuid,
    pub offline_instance_id: Uuid,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::build(RecordingRelay::default())
    }

    pub async fn with_failing_relay() -> Self {
        Self::build(RecordingRelay::failing())
    }

    fn build(relay: RecordingRelay) -> Self {
        let store = Arc::new(MemoryStore::new());
        let relay = Arc::new(relay);

        let owner = profile(true);
        let stranger = profile(false);
        let mut admin = profile(false);
        admin.is_admin = true;

        let online = instance(owner.id, InstanceStatus::Connected);
        let offline = instance(owner.id, InstanceStatus::Disconnected);

        let fixture = Fixture {
            service: DispatchService::new(
                DispatchContext::from_parts(
                    Config::from_env(),
                    store.clone(),
                    Arc::new(MemoryFeed::default()),
                ),
                relay.clone(),
            ),
            store: store.clone(),
            relay,
            owner: Actor { user_id: owner.id, is_admin: false },
            owner_unique_id: owner.unique_id.clone(),
            stranger: Actor { user_id: stranger.id, is_admin: false },
            admin: Actor { user_id: admin.id, is_admin: true },
            instance_id: online.id,
            offline_instance_id: offline.id,
        };

        for p in [owner, stranger, admin] {
            store.insert_profile(p).unwrap();
        }
        store.insert_instance(online).unwrap();
        store.insert_instance(offline).unwrap();

        fixture
    }
}
