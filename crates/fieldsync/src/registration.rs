//! Registration form state and its conversion into a [`FormRecord`].

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::model::FormRecord;

static RE_DNI: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{8}$").unwrap());
static RE_MOBILE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{9}$").unwrap());

const NOT_EMPLOYED_STATUS: &str = "Sin Vínculo";
const NOT_EMPLOYED_PLACEHOLDER: &str = "Ninguno";
const INITIAL_RECORD_STATUS: &str = "pendiente";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("DNI must have exactly 8 digits, got '{0}'")]
    InvalidDni(String),

    #[error("Mobile number must have exactly 9 digits, got '{0}'")]
    InvalidMobile(String),

    #[error("Select at least one program topic")]
    NoTopics,
}

/// The field agent capturing the registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promoter {
    pub email: String,
    pub name: String,
}

impl Default for Promoter {
    fn default() -> Self {
        Self {
            email: "anonimo".to_string(),
            name: "Promotor".to_string(),
        }
    }
}

/// Form state as the agent typed it. Serializes to the remote column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationDraft {
    #[serde(rename = "apellido_paterno")]
    pub paternal_surname: String,
    #[serde(rename = "apellido_materno")]
    pub maternal_surname: String,
    #[serde(rename = "nombres")]
    pub given_names: String,
    pub dni: String,
    #[serde(rename = "celular")]
    pub mobile: String,
    pub whatsapp: String,
    #[serde(rename = "correo")]
    pub email: String,
    #[serde(rename = "direccion")]
    pub address: String,
    #[serde(rename = "nivel")]
    pub level: String,
    pub ugel: String,
    #[serde(rename = "ie")]
    pub school: String,
    #[serde(rename = "condicion_laboral")]
    pub employment_status: String,
    #[serde(rename = "modalidad_pago")]
    pub payment_mode: String,
    #[serde(rename = "observaciones")]
    pub notes: String,
    #[serde(rename = "tipo_registro")]
    pub registration_type: String,
    #[serde(rename = "modalidad_estudio")]
    pub study_mode: String,
    #[serde(rename = "monto_mensual")]
    pub monthly_amount: String,
    #[serde(rename = "num_cuotas")]
    pub installments: String,
    #[serde(rename = "total_pagar")]
    pub total_amount: String,
    #[serde(rename = "numero_ficha_fisica")]
    pub paper_form_number: String,
    #[serde(rename = "ciudad")]
    pub city: String,

    /// Selected catalog entry names, in the order they were picked.
    #[serde(skip)]
    pub topics: Vec<String>,
    /// The participant does not currently work at a school.
    #[serde(skip)]
    pub not_employed: bool,
}

impl Default for RegistrationDraft {
    fn default() -> Self {
        Self {
            paternal_surname: String::new(),
            maternal_surname: String::new(),
            given_names: String::new(),
            dni: String::new(),
            mobile: String::new(),
            whatsapp: String::new(),
            email: String::new(),
            address: String::new(),
            level: "Primaria".to_string(),
            ugel: String::new(),
            school: String::new(),
            employment_status: "Contratado".to_string(),
            payment_mode: "Pago a Cuenta".to_string(),
            notes: String::new(),
            registration_type: "Diplomado".to_string(),
            study_mode: "Programa Completo".to_string(),
            monthly_amount: String::new(),
            installments: "1".to_string(),
            total_amount: String::new(),
            paper_form_number: String::new(),
            city: String::new(),
            topics: Vec::new(),
            not_employed: false,
        }
    }
}

impl RegistrationDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !RE_DNI.is_match(self.dni.trim()) {
            return Err(ValidationError::InvalidDni(self.dni.clone()));
        }
        if !RE_MOBILE.is_match(self.mobile.trim()) {
            return Err(ValidationError::InvalidMobile(self.mobile.clone()));
        }
        if self.topics.is_empty() {
            return Err(ValidationError::NoTopics);
        }
        Ok(())
    }

    /// Monthly amount times installments with two decimals, when both are
    /// positive. Otherwise whatever total the agent typed.
    pub fn computed_total(&self) -> String {
        let monthly = self.monthly_amount.trim().parse::<f64>().unwrap_or(0.0);
        let installments = self.installments.trim().parse::<u32>().unwrap_or(0);
        if monthly > 0.0 && installments > 0 {
            format!("{:.2}", monthly * f64::from(installments))
        } else {
            self.total_amount.clone()
        }
    }

    /// "Paternal Maternal, Given".
    pub fn full_name(&self) -> String {
        format!(
            "{} {}, {}",
            self.paternal_surname.trim(),
            self.maternal_surname.trim(),
            self.given_names.trim()
        )
    }

    /// Validates the draft and builds the record handed to the queue.
    pub fn into_form_record(self, promoter: &Promoter) -> Result<FormRecord, ValidationError> {
        self.validate()?;

        let mut draft = self;
        draft.dni = draft.dni.trim().to_string();
        draft.mobile = draft.mobile.trim().to_string();
        draft.total_amount = draft.computed_total();
        if draft.not_employed {
            draft.school = NOT_EMPLOYED_PLACEHOLDER.to_string();
            draft.ugel = NOT_EMPLOYED_PLACEHOLDER.to_string();
            draft.employment_status = NOT_EMPLOYED_STATUS.to_string();
        }

        let name = draft.full_name();
        let program = draft.topics.join(", ");
        let school = draft.school.clone();

        // A struct of plain strings always serializes to an object.
        let mut record: FormRecord = match serde_json::to_value(&draft) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => FormRecord::new(),
        };
        record.insert("nombre", name);
        record.insert("programa", program);
        record.insert("institucion", school);
        record.insert("promotor_email", promoter.email.clone());
        record.insert("promotor_nombre", promoter.name.clone());
        record.insert("estado_ficha", INITIAL_RECORD_STATUS);
        Ok(record)
    }
}
