use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// A single failed precondition on a dispatch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Violation {
    #[error("instance id is required")]
    MissingInstance,
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("AI context is required for AI dispatches")]
    MissingAiContext,
    #[error("a webhook URL must be configured before starting an AI dispatch")]
    MissingWebhookUrl,
    #[error("at least one contact is required")]
    NoContacts,
    #[error("contact #{index} has no phone number")]
    BlankPhone { index: usize },
    #[error("phone {phone} appears more than once in the contact list")]
    DuplicatePhone { phone: String },
    #[error("instance {instance_id} was not found")]
    InstanceNotFound { instance_id: String },
    #[error("instance {instance_id} is not connected")]
    InstanceNotConnected { instance_id: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("validation failed: {}", join_violations(.0))]
    Validation(Vec<Violation>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The dispatch was persisted but forwarding it to the relay failed.
    #[error("dispatch {dispatch_id} was created but relay forwarding failed: {reason}")]
    Upstream { dispatch_id: Uuid, reason: String },

    #[error("store unavailable: {0}")]
    TransientStore(String),
}

impl DispatchError {
    pub fn store<E: std::fmt::Display>(err: E) -> Self {
        DispatchError::TransientStore(err.to_string())
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type DispatchResult<T> = Result<T, DispatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_every_violation() {
        let err = DispatchError::Validation(vec![
            Violation::MissingInstance,
            Violation::EmptyMessage,
        ]);
        let message = err.to_string();
        assert!(message.contains("instance id is required"));
        assert!(message.contains("message must not be empty"));
    }

    #[test]
    fn test_violation_serializes_with_rule_tag() {
        let value = serde_json::to_value(Violation::DuplicatePhone {
            phone: "5511999990000".to_string(),
        })
        .unwrap();
        assert_eq!(value["rule"], "duplicate_phone");
        assert_eq!(value["phone"], "5511999990000");
    }
}
