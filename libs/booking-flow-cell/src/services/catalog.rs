use async_trait::async_trait;
use tracing::{debug, info, warn};

use shared_api_client::{encode_path_segment, ApiClient};
use shared_config::AppConfig;
use shared_models::AppError;

use crate::models::{
    AppointmentType, AvailabilityEnvelope, BookSlotRequest, BookingEnvelope, CreatedAppointment,
    Doctor, DoctorsEnvelope, Slot, SlotsEnvelope,
};
use crate::services::slots::SlotQuery;

/// The four calls the booking flow makes against the availability/calendar
/// service. Implementations return the service's data unfiltered.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AvailabilityApi: Send + Sync {
    async fn list_doctors(&self) -> Result<Vec<Doctor>, AppError>;

    async fn appointment_types(&self, doctor_id: &str) -> Result<Vec<AppointmentType>, AppError>;

    async fn list_slots(&self, query: &SlotQuery) -> Result<Vec<Slot>, AppError>;

    async fn book_slot(&self, request: &BookSlotRequest) -> Result<CreatedAppointment, AppError>;
}

/// HTTP implementation of [`AvailabilityApi`].
#[derive(Debug, Clone)]
pub struct AvailabilityClient {
    api: ApiClient,
}

impl AvailabilityClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        Ok(Self {
            api: ApiClient::new(config)?,
        })
    }

    pub fn from_client(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl AvailabilityApi for AvailabilityClient {
    async fn list_doctors(&self) -> Result<Vec<Doctor>, AppError> {
        debug!("Fetching doctor list");
        let envelope: DoctorsEnvelope = self.api.get("/availability/doctors", &[]).await?;
        Ok(envelope.doctors)
    }

    async fn appointment_types(&self, doctor_id: &str) -> Result<Vec<AppointmentType>, AppError> {
        debug!("Fetching availability for doctor: {}", doctor_id);
        let path = format!("/availability/{}", encode_path_segment(doctor_id));
        let envelope: AvailabilityEnvelope = self.api.get(&path, &[]).await?;
        Ok(envelope
            .availability
            .map(|a| a.appointment_types)
            .unwrap_or_default())
    }

    async fn list_slots(&self, query: &SlotQuery) -> Result<Vec<Slot>, AppError> {
        debug!(
            "Fetching slots for doctor {} on {} ({:?})",
            query.doctor_id, query.date, query.type_name
        );
        let envelope: SlotsEnvelope = self
            .api
            .get("/calendar/slots", &query.query_pairs())
            .await?;
        let received = envelope.slots.len();
        let slots: Vec<Slot> = envelope
            .slots
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<Slot>(raw) {
                Ok(slot) => Some(slot),
                Err(e) => {
                    warn!("Skipping malformed slot for doctor {}: {}", query.doctor_id, e);
                    None
                }
            })
            .collect();
        debug!("Received {} slots, {} usable", received, slots.len());
        Ok(slots)
    }

    async fn book_slot(&self, request: &BookSlotRequest) -> Result<CreatedAppointment, AppError> {
        debug!("Booking slot: {}", request.slot_id);
        let envelope: BookingEnvelope = self.api.post("/calendar/book-slot", request).await?;
        let created = CreatedAppointment::from_payload(envelope.appointment).ok_or_else(|| {
            AppError::Decode("booking response has no appointment id".to_string())
        })?;
        info!("Appointment {} created for slot {}", created.id, request.slot_id);
        Ok(created)
    }
}
