use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Delivery state of one contact inside a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Pending,
    Success,
    Error,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Pending => "pending",
            ContactStatus::Success => "success",
            ContactStatus::Error => "error",
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ContactStatus::Pending),
            "success" => Ok(ContactStatus::Success),
            "error" => Ok(ContactStatus::Error),
            other => Err(format!("unknown contact status: {}", other)),
        }
    }
}

/// Status the relay is allowed to report. `pending` is never accepted from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Error,
}

impl From<DeliveryStatus> for ContactStatus {
    fn from(status: DeliveryStatus) -> Self {
        match status {
            DeliveryStatus::Success => ContactStatus::Success,
            DeliveryStatus::Error => ContactStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Connected,
    Connecting,
    Disconnected,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Connected => "connected",
            InstanceStatus::Connecting => "connecting",
            InstanceStatus::Disconnected => "disconnected",
        }
    }
}

impl FromStr for InstanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(InstanceStatus::Connected),
            "connecting" => Ok(InstanceStatus::Connecting),
            "disconnected" => Ok(InstanceStatus::Disconnected),
            other => Err(format!("unknown instance status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub is_admin: bool,
    /// Opaque token the relay presents in `x-unique-id`
    pub unique_id: String,
    pub webhook_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppInstance {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub status: InstanceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispatch {
    pub id: Uuid,
    pub user_id: Uuid,
    pub instance_id: Uuid,
    pub total_contacts: i32,
    pub is_ai_dispatch: bool,
    pub initial_message: String,
    pub ai_context: Option<String>,
    pub success_count: i32,
    pub error_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Dispatch {
    pub fn counters(&self) -> Counters {
        Counters {
            success_count: self.success_count,
            error_count: self.error_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactResult {
    pub id: Uuid,
    pub dispatch_id: Uuid,
    pub contact_name: String,
    pub contact_phone: String,
    pub status: ContactStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A contact as it arrives from the uploaded list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInput {
    pub name: String,
    pub phone: String,
}

#[derive(Debug, Clone)]
pub struct NewDispatch {
    pub user_id: Uuid,
    pub instance_id: Uuid,
    pub is_ai_dispatch: bool,
    pub initial_message: String,
    pub ai_context: Option<String>,
    pub contacts: Vec<ContactInput>,
}

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub dispatch_id: Uuid,
    pub phone: String,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub success_count: i32,
    pub error_count: i32,
}

/// Recompute dispatch counters from the full set of its contact rows.
pub fn tally<'a, I>(statuses: I) -> Counters
where
    I: IntoIterator<Item = &'a ContactStatus>,
{
    statuses
        .into_iter()
        .fold(Counters::default(), |mut acc, status| {
            match status {
                ContactStatus::Success => acc.success_count += 1,
                ContactStatus::Error => acc.error_count += 1,
                ContactStatus::Pending => {}
            }
            acc
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Row-level change notification for one contact result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactChange {
    pub kind: ChangeKind,
    pub row: ContactResult,
}
