use serde::{Deserialize, Serialize};

use crate::types::{ChangeKind, ContactChange, ContactInput, ContactStatus};

/// A contact as the dispatching client tracks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone: String,
    pub status: ContactStatus,
    pub error: Option<String>,
}

impl From<ContactInput> for Contact {
    fn from(input: ContactInput) -> Self {
        Contact {
            name: input.name.trim().to_string(),
            phone: input.phone.trim().to_string(),
            status: ContactStatus::Pending,
            error: None,
        }
    }
}

/// Client-side list of contacts for the dispatch currently on screen.
/// Statuses are re-derived from change notifications, joined on phone.
#[derive(Debug, Clone, Default)]
pub struct ContactBook {
    contacts: Vec<Contact>,
}

impl ContactBook {
    pub fn new(inputs: impl IntoIterator<Item = ContactInput>) -> Self {
        Self {
            contacts: inputs.into_iter().map(Contact::from).collect(),
        }
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Apply a row change. Returns how many contacts were touched.
    pub fn apply(&mut self, change: &ContactChange) -> usize {
        let mut touched = 0;
        for contact in self
            .contacts
            .iter_mut()
            .filter(|c| c.phone == change.row.contact_phone)
        {
            match change.kind {
                ChangeKind::Insert | ChangeKind::Update => {
                    contact.status = change.row.status;
                    contact.error = change.row.error_message.clone();
                }
                ChangeKind::Delete => {
                    contact.status = ContactStatus::Pending;
                    contact.error = None;
                }
            }
            touched += 1;
        }
        touched
    }

    pub fn count(&self, status: ContactStatus) -> usize {
        self.contacts.iter().filter(|c| c.status == status).count()
    }

    pub fn reset(&mut self) {
        for contact in &mut self.contacts {
            contact.status = ContactStatus::Pending;
            contact.error = None;
        }
    }
}
