use thiserror::Error;

use shared_models::AppError;

use crate::models::{FlowStep, FormField};

/// Rejections raised by the flow controller. Network failures are not in
/// here: they are absorbed into the flow's error notice.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BookingFlowError {
    #[error("Cannot {action} while {step}")]
    InvalidTransition { step: FlowStep, action: &'static str },

    #[error("Doctor not found in loaded list: {0}")]
    UnknownDoctor(String),

    #[error("Appointment type not offered by the selected doctor: {0}")]
    UnknownAppointmentType(String),

    #[error("Slot is not in the current available set: {0}")]
    UnknownSlot(String),

    #[error("No doctor selected")]
    NoDoctorSelected,

    #[error("Appointment types are still loading")]
    TypesLoading,

    #[error("No date selected")]
    NoDateSelected,

    #[error("No slot selected")]
    NoSlotSelected,

    #[error("Missing required fields: {}", .0.iter().map(|f| f.to_string()).collect::<Vec<_>>().join(", "))]
    MissingFields(Vec<FormField>),

    #[error("Unknown form field: {0}")]
    UnknownField(String),

    #[error("A booking request is already in flight")]
    SubmissionPending,

    #[error("Booking is confirmed; restart to book again")]
    Terminal,

    #[error("Service error: {0}")]
    Service(#[from] AppError),
}
