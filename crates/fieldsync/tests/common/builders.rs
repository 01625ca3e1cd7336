//! Builders for test registrations.

#![allow(dead_code)]

use fieldsync::{Attachment, Attachments, FormRecord, Promoter, RegistrationDraft};

/// A minimal record keyed by DNI.
pub fn record(dni: &str) -> FormRecord {
    FormRecord::new()
        .with("dni", dni)
        .with("nombres", "Participante")
        .with("nivel", "Primaria")
}

pub fn id_document(file_name: &str) -> Attachment {
    Attachment::new(file_name, vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10])
}

pub fn contract(file_name: &str) -> Attachment {
    Attachment::new(file_name, vec![0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A])
}

pub fn both_attachments() -> Attachments {
    Attachments::none()
        .with_identity_document(id_document("dni.jpg"))
        .with_contract(contract("contrato.png"))
}

/// Builder for a valid `RegistrationDraft`.
pub struct DraftBuilder {
    draft: RegistrationDraft,
}

impl DraftBuilder {
    pub fn new(dni: &str) -> Self {
        Self {
            draft: RegistrationDraft {
                paternal_surname: "Huamán".to_string(),
                maternal_surname: "Torres".to_string(),
                given_names: "Luis".to_string(),
                dni: dni.to_string(),
                mobile: "912345678".to_string(),
                school: "IE 2050".to_string(),
                ugel: "UGEL 01".to_string(),
                topics: vec!["Comprensión Lectora".to_string()],
                ..RegistrationDraft::default()
            },
        }
    }

    pub fn topic(mut self, topic: &str) -> Self {
        self.draft.topics.push(topic.to_string());
        self
    }

    pub fn payment(mut self, monthly: &str, installments: &str) -> Self {
        self.draft.monthly_amount = monthly.to_string();
        self.draft.installments = installments.to_string();
        self
    }

    pub fn build(self) -> RegistrationDraft {
        self.draft
    }
}

pub fn promoter() -> Promoter {
    Promoter {
        email: "promotor@example.com".to_string(),
        name: "Carla".to_string(),
    }
}
