use std::collections::HashSet;

use disparador_core::types::{
    ChangeKind, ContactInput, InstanceStatus, NewDispatch, Profile, WhatsAppInstance,
};
use disparador_core::{DispatchError, DispatchResult, Violation};
use serde::{Deserialize, Serialize};
use tracing;
use uuid::Uuid;

use crate::relay::RelayJob;
use crate::service::{Actor, DispatchService};

/// Boundary schema for starting a dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDispatch {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub is_ai_dispatch: bool,
    #[serde(default)]
    pub ai_context: Option<String>,
    #[serde(default)]
    pub contacts: Vec<ContactInput>,
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

/// Collect every violated precondition. `instance` is the looked-up target,
/// `None` when the id is missing, malformed or unknown.
pub fn validate(
    request: &CreateDispatch,
    profile: &Profile,
    instance: Option<&WhatsAppInstance>,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    let instance_id = request.instance_id.trim();
    if instance_id.is_empty() {
        violations.push(Violation::MissingInstance);
    } else {
        match instance {
            Some(instance) if instance.user_id == profile.id => {
                if instance.status != InstanceStatus::Connected {
                    violations.push(Violation::InstanceNotConnected {
                        instance_id: instance_id.to_string(),
                    });
                }
            }
            _ => violations.push(Violation::InstanceNotFound {
                instance_id: instance_id.to_string(),
            }),
        }
    }

    if request.message.trim().is_empty() {
        violations.push(Violation::EmptyMessage);
    }

    if request.is_ai_dispatch {
        if is_blank(request.ai_context.as_deref()) {
            violations.push(Violation::MissingAiContext);
        }
        if is_blank(profile.webhook_url.as_deref()) {
            violations.push(Violation::MissingWebhookUrl);
        }
    }

    if request.contacts.is_empty() {
        violations.push(Violation::NoContacts);
    }

    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for (index, contact) in request.contacts.iter().enumerate() {
        let phone = contact.phone.trim();
        if phone.is_empty() {
            violations.push(Violation::BlankPhone { index: index + 1 });
            continue;
        }
        if !seen.insert(phone) && reported.insert(phone) {
            violations.push(Violation::DuplicatePhone {
                phone: phone.to_string(),
            });
        }
    }

    violations
}

impl DispatchService {
    /// Create the dispatch record and its pending contact rows, then hand AI
    /// dispatches to the relay. A relay failure leaves the dispatch in place and
    /// is reported as `Upstream` carrying its id.
    pub async fn create_dispatch(&self, actor: &Actor, request: CreateDispatch) -> DispatchResult<Uuid> {
        let store = &self.ctx.store;

        let profile = store
            .profile(actor.user_id)
            .await?
            .ok_or_else(|| DispatchError::Unauthorized(format!("unknown user {}", actor.user_id)))?;

        let instance_id = Uuid::parse_str(request.instance_id.trim()).ok();
        let instance = match instance_id {
            Some(id) => store.instance(id).await?,
            None => None,
        };

        let violations = validate(&request, &profile, instance.as_ref());
        if !violations.is_empty() {
            tracing::debug!(
                "Rejected dispatch for user {}: {} violation(s)",
                actor.user_id,
                violations.len()
            );
            return Err(DispatchError::Validation(violations));
        }

        let instance_id = match instance {
            Some(instance) => instance.id,
            None => return Err(DispatchError::NotFound("instance".to_string())),
        };

        let contacts: Vec<ContactInput> = request
            .contacts
            .iter()
            .map(|c| ContactInput {
                name: c.name.trim().to_string(),
                phone: c.phone.trim().to_string(),
            })
            .collect();
        let ai_context = if request.is_ai_dispatch {
            request.ai_context.clone()
        } else {
            None
        };

        let new_dispatch = NewDispatch {
            user_id: profile.id,
            instance_id,
            is_ai_dispatch: request.is_ai_dispatch,
            initial_message: request.message.clone(),
            ai_context: ai_context.clone(),
            contacts,
        };

        let (dispatch, rows) = store.create_dispatch(&new_dispatch).await?;
        tracing::info!(
            "Created dispatch {} for user {} with {} contacts (ai: {})",
            dispatch.id,
            profile.id,
            dispatch.total_contacts,
            dispatch.is_ai_dispatch
        );

        self.notify(ChangeKind::Insert, &rows).await;

        if dispatch.is_ai_dispatch {
            let job = RelayJob {
                dispatch_id: dispatch.id,
                unique_id: profile.unique_id.clone(),
                message: dispatch.initial_message.clone(),
                context: ai_context,
                contacts: new_dispatch.contacts,
            };

            if let Err(e) = self.relay.forward(&job).await {
                tracing::error!("Failed to forward dispatch {} to relay: {}", dispatch.id, e);
                return Err(DispatchError::Upstream {
                    dispatch_id: dispatch.id,
                    reason: e.to_string(),
                });
            }

            tracing::info!("Forwarded dispatch {} to relay", dispatch.id);
        }

        Ok(dispatch.id)
    }
}
