use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==============================================================================
// CATALOG MODELS (as served by the availability/calendar API)
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doctor {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub specialty: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentType {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    #[serde(rename = "_id")]
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(rename = "type", default)]
    pub appointment_type: Option<String>,
    #[serde(default)]
    pub is_available: bool,
}

impl Slot {
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    /// "HH:MM - HH:MM" in the given timezone.
    pub fn time_range(&self, tz: &Tz) -> String {
        format!(
            "{} - {}",
            self.start_time.with_timezone(tz).format("%H:%M"),
            self.end_time.with_timezone(tz).format("%H:%M")
        )
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct DoctorsEnvelope {
    #[serde(default)]
    pub doctors: Vec<Doctor>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AvailabilityBody {
    #[serde(default)]
    pub appointment_types: Vec<AppointmentType>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AvailabilityEnvelope {
    #[serde(default)]
    pub availability: Option<AvailabilityBody>,
}

/// Slots stay raw here so one malformed entry does not sink the whole day.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SlotsEnvelope {
    #[serde(default)]
    pub slots: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BookingEnvelope {
    pub appointment: Value,
}

// ==============================================================================
// BOOKING
// ==============================================================================

/// Body of `POST /calendar/book-slot`. Variant-specific extra fields are
/// flattened next to the standard ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSlotRequest {
    pub slot_id: String,
    pub patient_name: String,
    pub patient_email: String,
    pub patient_phone: String,
    pub reason_for_visit: String,
    pub notes: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// The appointment created by a successful booking: its id plus the raw
/// payload handed to the host's completion hook.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedAppointment {
    pub id: String,
    pub raw: Value,
}

impl CreatedAppointment {
    pub fn from_payload(raw: Value) -> Option<Self> {
        let id = match raw.get("_id")? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(Self { id, raw })
    }
}

// ==============================================================================
// PATIENT FORM
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FormField {
    Name,
    Email,
    Phone,
    Reason,
    Notes,
    /// A variant-defined field, by key.
    Extra(String),
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormField::Name => write!(f, "name"),
            FormField::Email => write!(f, "email"),
            FormField::Phone => write!(f, "phone"),
            FormField::Reason => write!(f, "reason"),
            FormField::Notes => write!(f, "notes"),
            FormField::Extra(key) => write!(f, "{}", key),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientFormData {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub reason: String,
    pub notes: String,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl PatientFormData {
    pub fn new(name: &str, email: &str, phone: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            phone: phone.to_string(),
            reason: reason.to_string(),
            ..Self::default()
        }
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = notes.to_string();
        self
    }

    pub fn with_extra(mut self, key: &str, value: &str) -> Self {
        self.extra.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get(&self, field: &FormField) -> Option<&str> {
        match field {
            FormField::Name => Some(&self.name),
            FormField::Email => Some(&self.email),
            FormField::Phone => Some(&self.phone),
            FormField::Reason => Some(&self.reason),
            FormField::Notes => Some(&self.notes),
            FormField::Extra(key) => self.extra.get(key).map(String::as_str),
        }
    }

    pub fn set(&mut self, field: FormField, value: String) {
        match field {
            FormField::Name => self.name = value,
            FormField::Email => self.email = value,
            FormField::Phone => self.phone = value,
            FormField::Reason => self.reason = value,
            FormField::Notes => self.notes = value,
            FormField::Extra(key) => {
                self.extra.insert(key, value);
            }
        }
    }

    /// Mandatory fields that are empty or whitespace. `required_extra` are the
    /// variant's required extra keys.
    pub fn missing_fields(&self, required_extra: &[String]) -> Vec<FormField> {
        let mut missing: Vec<FormField> = [
            FormField::Name,
            FormField::Email,
            FormField::Phone,
            FormField::Reason,
        ]
        .into_iter()
        .filter(|f| is_blank(self.get(f)))
        .collect();

        missing.extend(
            required_extra
                .iter()
                .map(|key| FormField::Extra(key.clone()))
                .filter(|f| is_blank(self.get(f))),
        );

        missing
    }

    pub(crate) fn to_booking_request(
        &self,
        slot_id: &str,
        extra_keys: &[String],
    ) -> BookSlotRequest {
        let extra = extra_keys
            .iter()
            .filter_map(|key| {
                self.extra
                    .get(key)
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (key.clone(), v.trim().to_string()))
            })
            .collect();

        BookSlotRequest {
            slot_id: slot_id.to_string(),
            patient_name: self.name.trim().to_string(),
            patient_email: self.email.trim().to_string(),
            patient_phone: self.phone.trim().to_string(),
            reason_for_visit: self.reason.trim().to_string(),
            notes: self.notes.trim().to_string(),
            extra,
        }
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

// ==============================================================================
// FLOW
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FlowStep {
    SelectingProvider,
    SelectingSlot,
    EnteringDetails,
    Confirmed,
}

impl FlowStep {
    pub fn ordinal(self) -> u8 {
        match self {
            FlowStep::SelectingProvider => 1,
            FlowStep::SelectingSlot => 2,
            FlowStep::EnteringDetails => 3,
            FlowStep::Confirmed => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == FlowStep::Confirmed
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowStep::SelectingProvider => write!(f, "selecting_provider"),
            FlowStep::SelectingSlot => write!(f, "selecting_slot"),
            FlowStep::EnteringDetails => write!(f, "entering_details"),
            FlowStep::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// Snapshot shown on the confirmation step.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationResult {
    pub appointment_id: String,
    pub doctor: Doctor,
    pub date: NaiveDate,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub time_range: String,
    pub appointment_type: Option<String>,
    pub patient: PatientFormData,
}

impl ConfirmationResult {
    pub(crate) fn new(
        created: &CreatedAppointment,
        doctor: &Doctor,
        slot: &Slot,
        patient: &PatientFormData,
        tz: &Tz,
    ) -> Self {
        Self {
            appointment_id: created.id.clone(),
            doctor: doctor.clone(),
            date: slot.start_time.with_timezone(tz).date_naive(),
            starts_at: slot.start_time,
            ends_at: slot.end_time,
            time_range: slot.time_range(tz),
            appointment_type: slot.appointment_type.clone(),
            patient: patient.clone(),
        }
    }

    /// Short booking reference: first eight characters of the id, uppercased.
    pub fn reference(&self) -> String {
        self.appointment_id.chars().take(8).collect::<String>().to_uppercase()
    }
}

/// What happened to a response when it reached the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOutcome {
    Applied,
    /// The call failed; an error notice was set.
    Failed,
    /// The response no longer matched the current selection and was dropped.
    Discarded,
}
