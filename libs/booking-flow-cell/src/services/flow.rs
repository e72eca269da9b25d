// libs/booking-flow-cell/src/services/flow.rs
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_models::AppError;

use crate::error::BookingFlowError;
use crate::models::{
    AppointmentType, BookSlotRequest, ConfirmationResult, CreatedAppointment, Doctor, FlowStep,
    FormField, PatientFormData, ResponseOutcome, Slot,
};
use crate::services::calendar;
use crate::services::catalog::{AvailabilityApi, AvailabilityClient};
use crate::services::slots::{SelectionKey, SlotQuery};

pub const PROVIDERS_LOAD_FAILED: &str = "Failed to load doctors";
pub const TYPES_LOAD_FAILED: &str = "Failed to load appointment types";
pub const SLOTS_LOAD_FAILED: &str = "Failed to load available slots";
pub const BOOKING_FAILED: &str = "Failed to book appointment";

// ==============================================================================
// STATE
// ==============================================================================

/// Everything the presentation layer renders from. Selections are stored as
/// ids into the loaded lists.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowState {
    pub step: FlowStep,
    pub loading: bool,
    pub error: Option<String>,
    pub doctors: Vec<Doctor>,
    pub selected_doctor_id: Option<String>,
    pub appointment_types: Vec<AppointmentType>,
    pub selected_type_id: Option<String>,
    pub selected_date: Option<NaiveDate>,
    /// First day of the month the calendar is showing.
    pub visible_month: NaiveDate,
    pub available_slots: Vec<Slot>,
    /// The latest slot fetch for the current selection failed.
    pub slots_failed: bool,
    pub selected_slot_id: Option<String>,
    pub form: PatientFormData,
    pub confirmation: Option<ConfirmationResult>,
}

impl FlowState {
    fn new(today: NaiveDate) -> Self {
        Self {
            step: FlowStep::SelectingProvider,
            loading: false,
            error: None,
            doctors: Vec::new(),
            selected_doctor_id: None,
            appointment_types: Vec::new(),
            selected_type_id: None,
            selected_date: None,
            visible_month: calendar::month_start(today),
            available_slots: Vec::new(),
            slots_failed: false,
            selected_slot_id: None,
            form: PatientFormData::default(),
            confirmation: None,
        }
    }

    fn clear_schedule(&mut self) {
        self.appointment_types.clear();
        self.selected_type_id = None;
        self.selected_date = None;
        self.available_slots.clear();
        self.slots_failed = false;
        self.selected_slot_id = None;
    }
}

// ==============================================================================
// REQUEST TICKETS
// ==============================================================================

/// Handed out when a request starts and handed back with its result. A ticket
/// whose sequence number is no longer the latest of its kind is stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidersRequest {
    seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypesRequest {
    seq: u64,
    pub doctor_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotsRequest {
    seq: u64,
    pub query: SlotQuery,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    seq: u64,
    pub payload: BookSlotRequest,
}

#[derive(Debug, Default, Clone)]
struct InFlight {
    providers: Option<u64>,
    types: Option<u64>,
    slots: Option<u64>,
    booking: Option<u64>,
}

impl InFlight {
    fn any(&self) -> bool {
        self.providers.is_some()
            || self.types.is_some()
            || self.slots.is_some()
            || self.booking.is_some()
    }
}

// ==============================================================================
// CONTROLLER
// ==============================================================================

/// Four-step booking state machine: provider, slot, details, confirmation.
///
/// Each network-backed operation comes in two halves, `begin_*` (validates,
/// mutates selection, returns a ticket) and `apply_*` (feeds the result
/// back). The async methods run both halves around the API call. Hosts with
/// their own event loop can call the halves directly and let responses land
/// in any order; stale ones are discarded.
pub struct BookingFlowController<A: AvailabilityApi + ?Sized = AvailabilityClient> {
    config: AppConfig,
    api: Arc<A>,
    state: FlowState,
    in_flight: InFlight,
    next_seq: u64,
    today_override: Option<NaiveDate>,
}

impl BookingFlowController<AvailabilityClient> {
    /// Controller talking HTTP to `config.api_url`.
    pub fn connect(config: AppConfig) -> Result<Self, BookingFlowError> {
        let api = AvailabilityClient::new(&config)?;
        Ok(Self::new(config, Arc::new(api)))
    }
}

impl<A: AvailabilityApi + ?Sized> BookingFlowController<A> {
    pub fn new(config: AppConfig, api: Arc<A>) -> Self {
        let today = Utc::now().with_timezone(&config.timezone).date_naive();
        Self {
            config,
            api,
            state: FlowState::new(today),
            in_flight: InFlight::default(),
            next_seq: 0,
            today_override: None,
        }
    }

    /// Pins "today" instead of reading the clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today_override = Some(today);
        self.state.visible_month = calendar::month_start(today);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn state(&self) -> &FlowState {
        &self.state
    }

    pub fn step(&self) -> FlowStep {
        self.state.step
    }

    pub fn step_label(&self) -> &str {
        self.config
            .variant
            .step_label(self.state.step.ordinal())
            .unwrap_or_default()
    }

    pub fn is_loading(&self) -> bool {
        self.state.loading
    }

    pub fn is_submitting(&self) -> bool {
        self.in_flight.booking.is_some()
    }

    pub fn error(&self) -> Option<&str> {
        self.state.error.as_deref()
    }

    pub fn dismiss_error(&mut self) {
        self.state.error = None;
    }

    pub fn doctors(&self) -> &[Doctor] {
        &self.state.doctors
    }

    pub fn selected_doctor(&self) -> Option<&Doctor> {
        let id = self.state.selected_doctor_id.as_deref()?;
        self.state.doctors.iter().find(|d| d.id == id)
    }

    pub fn appointment_types(&self) -> &[AppointmentType] {
        &self.state.appointment_types
    }

    pub fn selected_type(&self) -> Option<&AppointmentType> {
        let id = self.state.selected_type_id.as_deref()?;
        self.state.appointment_types.iter().find(|t| t.id == id)
    }

    pub fn available_slots(&self) -> &[Slot] {
        &self.state.available_slots
    }

    pub fn selected_slot(&self) -> Option<&Slot> {
        let id = self.state.selected_slot_id.as_deref()?;
        self.state.available_slots.iter().find(|s| s.id == id)
    }

    pub fn confirmation(&self) -> Option<&ConfirmationResult> {
        self.state.confirmation.as_ref()
    }

    /// A date is chosen, its slots have arrived and none are bookable. A
    /// failed fetch is reported through the error notice instead.
    pub fn has_no_slots(&self) -> bool {
        self.state.selected_date.is_some()
            && self.in_flight.slots.is_none()
            && !self.state.slots_failed
            && self.state.available_slots.is_empty()
    }

    // --------------------------------------------------------------------------
    // Calendar
    // --------------------------------------------------------------------------

    pub fn today(&self) -> NaiveDate {
        self.today_override
            .unwrap_or_else(|| Utc::now().with_timezone(&self.config.timezone).date_naive())
    }

    /// Past days are not offered. The controller itself accepts any date.
    pub fn is_date_selectable(&self, date: NaiveDate) -> bool {
        calendar::is_selectable(date, self.today())
    }

    pub fn is_today(&self, date: NaiveDate) -> bool {
        calendar::is_today(date, self.today())
    }

    pub fn change_month(&mut self, offset: i32) {
        self.state.visible_month = calendar::shift_month(self.state.visible_month, offset);
    }

    pub fn month_grid(&self) -> Vec<Option<NaiveDate>> {
        calendar::month_grid(self.state.visible_month)
    }

    pub fn month_label(&self) -> String {
        calendar::month_label(self.state.visible_month)
    }

    // --------------------------------------------------------------------------
    // Providers
    // --------------------------------------------------------------------------

    pub fn begin_load_providers(&mut self) -> Result<ProvidersRequest, BookingFlowError> {
        if self.state.step != FlowStep::SelectingProvider {
            return Err(self.invalid("load providers"));
        }
        Ok(self.issue_providers_request())
    }

    fn issue_providers_request(&mut self) -> ProvidersRequest {
        let seq = self.issue();
        self.in_flight.providers = Some(seq);
        self.state.error = None;
        self.refresh_loading();
        debug!("Loading doctors (request {})", seq);
        ProvidersRequest { seq }
    }

    pub fn apply_providers(
        &mut self,
        request: ProvidersRequest,
        result: Result<Vec<Doctor>, AppError>,
    ) -> ResponseOutcome {
        if self.in_flight.providers != Some(request.seq) {
            debug!("Discarding stale doctor list (request {})", request.seq);
            return ResponseOutcome::Discarded;
        }
        self.in_flight.providers = None;

        let outcome = match result {
            Ok(doctors) => {
                info!("Loaded {} doctors", doctors.len());
                self.state.doctors = doctors;
                if self.selected_doctor().is_none() && self.state.selected_doctor_id.is_some() {
                    self.state.selected_doctor_id = None;
                    self.in_flight.types = None;
                }
                ResponseOutcome::Applied
            }
            Err(e) => {
                warn!("Error loading doctors: {}", e);
                self.state.doctors.clear();
                self.state.error = Some(PROVIDERS_LOAD_FAILED.to_string());
                ResponseOutcome::Failed
            }
        };
        self.refresh_loading();
        outcome
    }

    /// Fetches the doctor list. Failures end up in the error notice. If a
    /// default doctor is configured and listed, it is selected afterwards.
    pub async fn load_providers(&mut self) -> Result<ResponseOutcome, BookingFlowError> {
        let request = self.begin_load_providers()?;
        Ok(self.finish_load_providers(request).await)
    }

    async fn finish_load_providers(&mut self, request: ProvidersRequest) -> ResponseOutcome {
        let result = self.api.list_doctors().await;
        let outcome = self.apply_providers(request, result);

        if outcome == ResponseOutcome::Applied {
            if let Some(doctor_id) = self.default_provider() {
                info!("Selecting default doctor {}", doctor_id);
                if let Err(e) = self.select_provider(&doctor_id).await {
                    warn!("Could not select default doctor {}: {}", doctor_id, e);
                }
            }
        }
        outcome
    }

    /// The configured default doctor, when it should be picked now.
    pub fn default_provider(&self) -> Option<String> {
        let wanted = self.config.default_doctor_id.as_deref()?;
        let idle = self.state.step == FlowStep::SelectingProvider
            && self.state.selected_doctor_id.is_none()
            && self.in_flight.types.is_none();
        (idle && self.state.doctors.iter().any(|d| d.id == wanted)).then(|| wanted.to_string())
    }

    // --------------------------------------------------------------------------
    // Provider selection
    // --------------------------------------------------------------------------

    pub fn begin_select_provider(&mut self, doctor_id: &str) -> Result<TypesRequest, BookingFlowError> {
        match self.state.step {
            FlowStep::SelectingProvider | FlowStep::SelectingSlot => {}
            FlowStep::Confirmed => return Err(BookingFlowError::Terminal),
            FlowStep::EnteringDetails => return Err(self.invalid("select a doctor")),
        }
        if !self.state.doctors.iter().any(|d| d.id == doctor_id) {
            return Err(BookingFlowError::UnknownDoctor(doctor_id.to_string()));
        }

        self.state.selected_doctor_id = Some(doctor_id.to_string());
        self.state.clear_schedule();
        self.in_flight.slots = None;

        let seq = self.issue();
        self.in_flight.types = Some(seq);
        self.state.error = None;
        self.refresh_loading();
        debug!("Loading appointment types for doctor {} (request {})", doctor_id, seq);

        Ok(TypesRequest {
            seq,
            doctor_id: doctor_id.to_string(),
        })
    }

    /// Applies a doctor's appointment types and moves on to slot selection.
    /// A failed fetch still moves on, with an empty type list.
    pub fn apply_appointment_types(
        &mut self,
        request: TypesRequest,
        result: Result<Vec<AppointmentType>, AppError>,
    ) -> ResponseOutcome {
        let current = self.in_flight.types == Some(request.seq)
            && self.state.selected_doctor_id.as_deref() == Some(request.doctor_id.as_str());
        if !current {
            debug!(
                "Discarding stale appointment types for doctor {} (request {})",
                request.doctor_id, request.seq
            );
            return ResponseOutcome::Discarded;
        }
        self.in_flight.types = None;

        let outcome = match result {
            Ok(types) => {
                self.state.selected_type_id = types.first().map(|t| t.id.clone());
                self.state.appointment_types = types;
                ResponseOutcome::Applied
            }
            Err(e) => {
                warn!("Error loading availability for doctor {}: {}", request.doctor_id, e);
                self.state.appointment_types.clear();
                self.state.selected_type_id = None;
                self.state.error = Some(TYPES_LOAD_FAILED.to_string());
                ResponseOutcome::Failed
            }
        };

        if self.state.step == FlowStep::SelectingProvider {
            self.state.step = FlowStep::SelectingSlot;
            info!("Doctor {} selected, choosing a slot", request.doctor_id);
        }
        self.refresh_loading();
        outcome
    }

    pub async fn select_provider(&mut self, doctor_id: &str) -> Result<ResponseOutcome, BookingFlowError> {
        let request = self.begin_select_provider(doctor_id)?;
        let result = self.api.appointment_types(&request.doctor_id).await;
        Ok(self.apply_appointment_types(request, result))
    }

    // --------------------------------------------------------------------------
    // Appointment type, date and slot
    // --------------------------------------------------------------------------

    /// Switches the appointment type. Returns a slot request when a date is
    /// already selected.
    pub fn begin_select_appointment_type(
        &mut self,
        type_id: &str,
    ) -> Result<Option<SlotsRequest>, BookingFlowError> {
        self.ensure_selecting_slot("change the appointment type")?;
        if self.in_flight.types.is_some() {
            return Err(BookingFlowError::TypesLoading);
        }
        if !self.state.appointment_types.iter().any(|t| t.id == type_id) {
            return Err(BookingFlowError::UnknownAppointmentType(type_id.to_string()));
        }

        self.state.selected_type_id = Some(type_id.to_string());
        self.state.selected_slot_id = None;

        if self.state.selected_date.is_some() {
            self.issue_slots_request().map(Some)
        } else {
            Ok(None)
        }
    }

    pub async fn select_appointment_type(
        &mut self,
        type_id: &str,
    ) -> Result<Option<ResponseOutcome>, BookingFlowError> {
        match self.begin_select_appointment_type(type_id)? {
            Some(request) => Ok(Some(self.finish_slots(request).await)),
            None => Ok(None),
        }
    }

    /// Selects a date and starts loading its slots. Always clears the selected
    /// slot, even when the same date is chosen again.
    pub fn begin_select_date(&mut self, date: NaiveDate) -> Result<SlotsRequest, BookingFlowError> {
        self.ensure_selecting_slot("select a date")?;
        if self.in_flight.types.is_some() {
            return Err(BookingFlowError::TypesLoading);
        }

        self.state.selected_date = Some(date);
        self.state.selected_slot_id = None;
        self.state.visible_month = calendar::month_start(date);
        self.issue_slots_request()
    }

    pub async fn select_date(&mut self, date: NaiveDate) -> Result<ResponseOutcome, BookingFlowError> {
        let request = self.begin_select_date(date)?;
        Ok(self.finish_slots(request).await)
    }

    /// Refetches slots for the current selection.
    pub async fn load_slots(&mut self) -> Result<ResponseOutcome, BookingFlowError> {
        self.ensure_selecting_slot("load slots")?;
        let request = self.issue_slots_request()?;
        Ok(self.finish_slots(request).await)
    }

    async fn finish_slots(&mut self, request: SlotsRequest) -> ResponseOutcome {
        let result = self.api.list_slots(&request.query).await;
        self.apply_slots(request, result)
    }

    fn issue_slots_request(&mut self) -> Result<SlotsRequest, BookingFlowError> {
        let doctor_id = self
            .state
            .selected_doctor_id
            .clone()
            .ok_or(BookingFlowError::NoDoctorSelected)?;
        let date = self.state.selected_date.ok_or(BookingFlowError::NoDateSelected)?;
        let query = SlotQuery::new(
            &doctor_id,
            date,
            self.selected_type().map(|t| (t.id.as_str(), t.name.as_str())),
            &self.config.timezone,
        );

        self.state.available_slots.clear();
        self.state.slots_failed = false;
        self.state.selected_slot_id = None;

        let seq = self.issue();
        self.in_flight.slots = Some(seq);
        self.state.error = None;
        self.refresh_loading();
        debug!(
            "Loading slots for doctor {} on {} type {:?} (request {})",
            query.doctor_id, query.date, query.type_name, seq
        );

        Ok(SlotsRequest { seq, query })
    }

    fn selection_key(&self) -> Option<SelectionKey> {
        Some(SelectionKey {
            doctor_id: self.state.selected_doctor_id.clone()?,
            date: self.state.selected_date?,
            type_id: self.state.selected_type_id.clone(),
        })
    }

    /// Applies a slot list if it answers the latest request for the current
    /// (doctor, date, type). Anything else is dropped.
    pub fn apply_slots(
        &mut self,
        request: SlotsRequest,
        result: Result<Vec<Slot>, AppError>,
    ) -> ResponseOutcome {
        let current = self.in_flight.slots == Some(request.seq)
            && self.selection_key().as_ref() == Some(&request.query.key());
        if !current {
            debug!(
                "Discarding stale slots for doctor {} on {} (request {})",
                request.query.doctor_id, request.query.date, request.seq
            );
            return ResponseOutcome::Discarded;
        }
        self.in_flight.slots = None;

        let outcome = match result {
            Ok(slots) => {
                let received = slots.len();
                self.state.available_slots = request.query.candidates(slots);
                debug!(
                    "Kept {} of {} slots for {}",
                    self.state.available_slots.len(),
                    received,
                    request.query.date
                );
                if self.selected_slot().is_none() {
                    self.state.selected_slot_id = None;
                }
                ResponseOutcome::Applied
            }
            Err(e) => {
                warn!("Error loading slots: {}", e);
                self.state.available_slots.clear();
                self.state.slots_failed = true;
                self.state.selected_slot_id = None;
                self.state.error = Some(SLOTS_LOAD_FAILED.to_string());
                ResponseOutcome::Failed
            }
        };
        self.refresh_loading();
        outcome
    }

    /// Selects a slot from the most recently loaded set, replacing any prior
    /// selection.
    pub fn select_slot(&mut self, slot_id: &str) -> Result<(), BookingFlowError> {
        self.ensure_selecting_slot("select a slot")?;
        if self.state.selected_date.is_none() {
            return Err(BookingFlowError::NoDateSelected);
        }
        if !self.state.available_slots.iter().any(|s| s.id == slot_id) {
            return Err(BookingFlowError::UnknownSlot(slot_id.to_string()));
        }
        self.state.selected_slot_id = Some(slot_id.to_string());
        Ok(())
    }

    // --------------------------------------------------------------------------
    // Patient details
    // --------------------------------------------------------------------------

    pub fn set_field(&mut self, field: FormField, value: impl Into<String>) -> Result<(), BookingFlowError> {
        self.ensure_form_editable()?;
        if let FormField::Extra(key) = &field {
            if self.config.variant.extra_field(key).is_none() {
                return Err(BookingFlowError::UnknownField(key.clone()));
            }
        }
        self.state.form.set(field, value.into());
        Ok(())
    }

    pub fn set_form(&mut self, form: PatientFormData) -> Result<(), BookingFlowError> {
        self.ensure_form_editable()?;
        if let Some(key) = form
            .extra
            .keys()
            .find(|key| self.config.variant.extra_field(key).is_none())
        {
            return Err(BookingFlowError::UnknownField(key.clone()));
        }
        self.state.form = form;
        Ok(())
    }

    fn ensure_form_editable(&self) -> Result<(), BookingFlowError> {
        if self.state.step.is_terminal() {
            return Err(BookingFlowError::Terminal);
        }
        if self.is_submitting() {
            return Err(BookingFlowError::SubmissionPending);
        }
        Ok(())
    }

    fn required_extra_keys(&self) -> Vec<String> {
        self.config
            .variant
            .required_extra_fields()
            .map(|f| f.key.clone())
            .collect()
    }

    // --------------------------------------------------------------------------
    // Advancing
    // --------------------------------------------------------------------------

    /// The one guard behind both the "next" affordance and the transitions
    /// out of steps 2 and 3.
    pub fn advance_guard(&self) -> Result<(), BookingFlowError> {
        match self.state.step {
            FlowStep::SelectingProvider => Err(self.invalid("advance")),
            FlowStep::SelectingSlot => {
                if self.state.selected_date.is_none() {
                    return Err(BookingFlowError::NoDateSelected);
                }
                if self.selected_slot().is_none() {
                    return Err(BookingFlowError::NoSlotSelected);
                }
                Ok(())
            }
            FlowStep::EnteringDetails => {
                if self.is_submitting() {
                    return Err(BookingFlowError::SubmissionPending);
                }
                if self.selected_slot().is_none() {
                    return Err(BookingFlowError::NoSlotSelected);
                }
                let missing = self.state.form.missing_fields(&self.required_extra_keys());
                if !missing.is_empty() {
                    return Err(BookingFlowError::MissingFields(missing));
                }
                Ok(())
            }
            FlowStep::Confirmed => Err(BookingFlowError::Terminal),
        }
    }

    pub fn can_advance(&self) -> bool {
        self.advance_guard().is_ok()
    }

    /// Step 2 -> 3.
    pub fn advance_to_details(&mut self) -> Result<(), BookingFlowError> {
        self.ensure_selecting_slot("advance to details")?;
        self.advance_guard()?;
        self.state.step = FlowStep::EnteringDetails;
        info!("Slot selected, entering patient details");
        Ok(())
    }

    /// Advances from the current step: 2 -> 3 directly, 3 -> 4 by submitting
    /// the booking. Returns the step the flow ends up in.
    pub async fn advance(&mut self) -> Result<FlowStep, BookingFlowError> {
        match self.state.step {
            FlowStep::SelectingSlot => {
                self.advance_to_details()?;
            }
            FlowStep::EnteringDetails => {
                self.submit_current().await?;
            }
            FlowStep::SelectingProvider | FlowStep::Confirmed => {
                self.advance_guard()?;
                return Err(self.invalid("advance"));
            }
        }
        Ok(self.state.step)
    }

    // --------------------------------------------------------------------------
    // Booking
    // --------------------------------------------------------------------------

    /// The payload a submission would send right now.
    pub fn booking_request(&self) -> Result<BookSlotRequest, BookingFlowError> {
        if self.state.step != FlowStep::EnteringDetails {
            return Err(match self.state.step {
                FlowStep::Confirmed => BookingFlowError::Terminal,
                _ => self.invalid("submit a booking"),
            });
        }
        self.advance_guard()?;
        let slot = self.selected_slot().ok_or(BookingFlowError::NoSlotSelected)?;
        let extra_keys: Vec<String> = self
            .config
            .variant
            .extra_fields
            .iter()
            .map(|f| f.key.clone())
            .collect();
        Ok(self.state.form.to_booking_request(&slot.id, &extra_keys))
    }

    pub fn begin_submission(&mut self) -> Result<BookingRequest, BookingFlowError> {
        let payload = self.booking_request()?;
        let seq = self.issue();
        self.in_flight.booking = Some(seq);
        self.state.error = None;
        self.refresh_loading();
        info!("Submitting booking for slot {}", payload.slot_id);
        Ok(BookingRequest { seq, payload })
    }

    /// On success the flow is confirmed and the completion hook fires. On
    /// failure the user stays on the details step with the service's message.
    pub fn apply_submission(
        &mut self,
        request: BookingRequest,
        result: Result<CreatedAppointment, AppError>,
    ) -> ResponseOutcome {
        if self.in_flight.booking != Some(request.seq) || self.state.step != FlowStep::EnteringDetails {
            debug!("Discarding stale booking response for slot {}", request.payload.slot_id);
            return ResponseOutcome::Discarded;
        }
        self.in_flight.booking = None;

        let outcome = match result {
            Ok(created) => match (self.selected_doctor().cloned(), self.selected_slot().cloned()) {
                (Some(doctor), Some(slot)) => {
                    let confirmation = ConfirmationResult::new(
                        &created,
                        &doctor,
                        &slot,
                        &self.state.form,
                        &self.config.timezone,
                    );
                    info!(
                        "Booking confirmed: {} with {} at {}",
                        confirmation.reference(),
                        doctor.name,
                        confirmation.time_range
                    );
                    self.state.confirmation = Some(confirmation);
                    self.state.step = FlowStep::Confirmed;
                    if let Some(hook) = &self.config.on_booking_complete {
                        hook(&created.raw);
                    }
                    ResponseOutcome::Applied
                }
                _ => {
                    warn!("Booking {} succeeded but the selection is gone", created.id);
                    self.state.error = Some(BOOKING_FAILED.to_string());
                    ResponseOutcome::Failed
                }
            },
            Err(e) => {
                warn!("Booking failed: {}", e);
                let message = e.service_message().unwrap_or(BOOKING_FAILED);
                self.state.error = Some(message.to_string());
                ResponseOutcome::Failed
            }
        };
        self.refresh_loading();
        outcome
    }

    /// Replaces the form with `form` and submits it.
    pub async fn submit_booking(&mut self, form: PatientFormData) -> Result<ResponseOutcome, BookingFlowError> {
        self.set_form(form)?;
        self.submit_current().await
    }

    async fn submit_current(&mut self) -> Result<ResponseOutcome, BookingFlowError> {
        let request = self.begin_submission()?;
        let result = self.api.book_slot(&request.payload).await;
        Ok(self.apply_submission(request, result))
    }

    // --------------------------------------------------------------------------
    // Restart
    // --------------------------------------------------------------------------

    /// Drops all selection state and every in-flight request, back to step 1.
    pub fn begin_restart(&mut self) -> ProvidersRequest {
        info!("Restarting booking flow");
        self.state = FlowState::new(self.today());
        self.in_flight = InFlight::default();
        self.issue_providers_request()
    }

    pub async fn restart(&mut self) -> ResponseOutcome {
        let request = self.begin_restart();
        self.finish_load_providers(request).await
    }

    // --------------------------------------------------------------------------
    // Helpers
    // --------------------------------------------------------------------------

    fn issue(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn refresh_loading(&mut self) {
        self.state.loading = self.in_flight.any();
    }

    fn invalid(&self, action: &'static str) -> BookingFlowError {
        BookingFlowError::InvalidTransition {
            step: self.state.step,
            action,
        }
    }

    fn ensure_selecting_slot(&self, action: &'static str) -> Result<(), BookingFlowError> {
        match self.state.step {
            FlowStep::SelectingSlot => Ok(()),
            FlowStep::Confirmed => Err(BookingFlowError::Terminal),
            _ => Err(self.invalid(action)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::MockAvailabilityApi;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Mutex;

    fn doctors() -> Vec<Doctor> {
        vec![
            Doctor { id: "d1".into(), name: "Ada Lovelace".into(), specialty: Some("Cardiology".into()) },
            Doctor { id: "d2".into(), name: "Alan Turing".into(), specialty: None },
        ]
    }

    fn types() -> Vec<AppointmentType> {
        vec![
            AppointmentType { id: "t-a".into(), name: "Consultation".into() },
            AppointmentType { id: "t-b".into(), name: "Follow-up".into() },
        ]
    }

    fn slot(id: &str, hour: u32, kind: &str) -> Slot {
        Slot {
            id: id.into(),
            start_time: Utc.with_ymd_and_hms(2024, 6, 10, hour, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2024, 6, 10, hour, 30, 0).unwrap(),
            appointment_type: Some(kind.into()),
            is_available: true,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
    }

    fn controller(mock: MockAvailabilityApi) -> BookingFlowController<MockAvailabilityApi> {
        BookingFlowController::new(AppConfig::default(), Arc::new(mock)).with_today(date())
    }

    fn catalog_mock() -> MockAvailabilityApi {
        let mut mock = MockAvailabilityApi::new();
        mock.expect_list_doctors().returning(|| Ok(doctors()));
        mock.expect_appointment_types().returning(|_| Ok(types()));
        mock.expect_list_slots()
            .returning(|_| Ok(vec![slot("s-10", 10, "Consultation"), slot("s-09", 9, "Consultation")]));
        mock
    }

    #[tokio::test]
    async fn test_select_provider_loads_types_and_defaults_first() {
        let mut flow = controller(catalog_mock());
        assert_eq!(flow.load_providers().await.unwrap(), ResponseOutcome::Applied);
        assert_eq!(flow.step(), FlowStep::SelectingProvider);
        assert!(!flow.can_advance());

        flow.select_provider("d1").await.unwrap();

        assert_eq!(flow.step(), FlowStep::SelectingSlot);
        assert_eq!(flow.selected_type().map(|t| t.id.as_str()), Some("t-a"));
        assert!(!flow.is_loading());
    }

    #[tokio::test]
    async fn test_unknown_doctor_rejected() {
        let mut flow = controller(catalog_mock());
        flow.load_providers().await.unwrap();

        let err = flow.select_provider("nope").await.unwrap_err();
        assert_matches!(err, BookingFlowError::UnknownDoctor(id) if id == "nope");
        assert_eq!(flow.step(), FlowStep::SelectingProvider);
    }

    #[tokio::test]
    async fn test_failed_type_fetch_still_advances_with_empty_types() {
        let mut mock = MockAvailabilityApi::new();
        mock.expect_list_doctors().returning(|| Ok(doctors()));
        mock.expect_appointment_types()
            .returning(|_| Err(AppError::ExternalService("connection refused".into())));
        mock.expect_list_slots()
            .withf(|query| query.type_name.is_none())
            .returning(|_| Ok(vec![slot("s-09", 9, "Consultation")]));

        let mut flow = controller(mock);
        flow.load_providers().await.unwrap();
        assert_eq!(flow.select_provider("d1").await.unwrap(), ResponseOutcome::Failed);

        assert_eq!(flow.step(), FlowStep::SelectingSlot);
        assert!(flow.appointment_types().is_empty());
        assert_eq!(flow.error(), Some(TYPES_LOAD_FAILED));

        flow.select_date(date()).await.unwrap();
        assert_eq!(flow.available_slots().len(), 1);
        assert!(flow.error().is_none());
    }

    #[tokio::test]
    async fn test_slots_sorted_and_selection_replaced() {
        let mut flow = controller(catalog_mock());
        flow.load_providers().await.unwrap();
        flow.select_provider("d1").await.unwrap();
        flow.select_date(date()).await.unwrap();

        let ids: Vec<&str> = flow.available_slots().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s-09", "s-10"]);

        flow.select_slot("s-09").unwrap();
        flow.select_slot("s-10").unwrap();
        assert_eq!(flow.selected_slot().map(|s| s.id.as_str()), Some("s-10"));
    }

    #[tokio::test]
    async fn test_type_change_refetches_with_new_name() {
        let mut mock = MockAvailabilityApi::new();
        mock.expect_list_doctors().returning(|| Ok(doctors()));
        mock.expect_appointment_types().returning(|_| Ok(types()));
        mock.expect_list_slots()
            .withf(|q| q.type_name.as_deref() == Some("Consultation"))
            .times(1)
            .returning(|_| Ok(vec![slot("s-09", 9, "Consultation")]));
        mock.expect_list_slots()
            .withf(|q| q.type_name.as_deref() == Some("Follow-up"))
            .times(1)
            .returning(|_| Ok(vec![slot("s-11", 11, "Follow-up"), slot("s-09", 9, "Consultation")]));

        let mut flow = controller(mock);
        flow.load_providers().await.unwrap();
        flow.select_provider("d1").await.unwrap();
        flow.select_date(date()).await.unwrap();
        flow.select_slot("s-09").unwrap();

        let outcome = flow.select_appointment_type("t-b").await.unwrap();
        assert_eq!(outcome, Some(ResponseOutcome::Applied));
        assert!(flow.selected_slot().is_none());
        let ids: Vec<&str> = flow.available_slots().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s-11"]);
    }

    #[tokio::test]
    async fn test_type_change_without_date_does_not_fetch() {
        let mut mock = MockAvailabilityApi::new();
        mock.expect_list_doctors().returning(|| Ok(doctors()));
        mock.expect_appointment_types().returning(|_| Ok(types()));
        mock.expect_list_slots().never();

        let mut flow = controller(mock);
        flow.load_providers().await.unwrap();
        flow.select_provider("d1").await.unwrap();

        assert_eq!(flow.select_appointment_type("t-b").await.unwrap(), None);
        assert_eq!(flow.selected_type().map(|t| t.name.as_str()), Some("Follow-up"));
        assert_matches!(
            flow.select_appointment_type("t-z").await,
            Err(BookingFlowError::UnknownAppointmentType(_))
        );
    }

    #[tokio::test]
    async fn test_date_selection_blocked_while_types_load() {
        let mut flow = controller(catalog_mock());
        flow.load_providers().await.unwrap();
        flow.select_provider("d1").await.unwrap();

        let _pending = flow.begin_select_provider("d2").unwrap();
        assert_matches!(flow.begin_select_date(date()), Err(BookingFlowError::TypesLoading));
        assert!(flow.is_loading());
    }

    #[tokio::test]
    async fn test_booking_failure_keeps_details_step() {
        let mut mock = catalog_mock();
        mock.expect_book_slot()
            .times(1)
            .returning(|_| Err(AppError::Conflict("Slot already booked".into())));
        mock.expect_book_slot()
            .returning(|_| Err(AppError::Api { status: 500, message: None }));

        let mut flow = controller(mock);
        flow.load_providers().await.unwrap();
        flow.select_provider("d1").await.unwrap();
        flow.select_date(date()).await.unwrap();
        flow.select_slot("s-09").unwrap();
        assert_eq!(flow.advance().await.unwrap(), FlowStep::EnteringDetails);

        let form = PatientFormData::new("Jane Doe", "jane@x.com", "+15551234567", "checkup");
        assert_eq!(flow.submit_booking(form.clone()).await.unwrap(), ResponseOutcome::Failed);
        assert_eq!(flow.step(), FlowStep::EnteringDetails);
        assert_eq!(flow.error(), Some("Slot already booked"));

        assert_eq!(flow.submit_booking(form).await.unwrap(), ResponseOutcome::Failed);
        assert_eq!(flow.error(), Some(BOOKING_FAILED));
        assert!(flow.can_advance());
        flow.set_field(FormField::Notes, "after failure").unwrap();
    }

    #[tokio::test]
    async fn test_completion_hook_receives_raw_payload() {
        let seen: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let config = AppConfig::default().with_completion_hook(move |raw| {
            sink.lock().unwrap().push(raw.clone());
        });

        let mut mock = catalog_mock();
        mock.expect_book_slot().times(1).returning(|_| {
            Ok(CreatedAppointment::from_payload(json!({ "_id": "abc12345ffff", "status": "booked" })).unwrap())
        });

        let mut flow = BookingFlowController::new(config, Arc::new(mock)).with_today(date());
        flow.load_providers().await.unwrap();
        flow.select_provider("d1").await.unwrap();
        flow.select_date(date()).await.unwrap();
        flow.select_slot("s-09").unwrap();
        flow.advance_to_details().unwrap();
        flow.submit_booking(PatientFormData::new("Jane", "j@x.com", "1", "checkup"))
            .await
            .unwrap();

        assert_eq!(flow.step(), FlowStep::Confirmed);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["status"], "booked");
    }

    #[tokio::test]
    async fn test_default_doctor_selected_after_load() {
        let config = AppConfig::default().with_default_doctor("d2");
        let mut flow = BookingFlowController::new(config, Arc::new(catalog_mock())).with_today(date());

        flow.load_providers().await.unwrap();

        assert_eq!(flow.step(), FlowStep::SelectingSlot);
        assert_eq!(flow.selected_doctor().map(|d| d.id.as_str()), Some("d2"));
    }

    #[tokio::test]
    async fn test_unlisted_default_doctor_ignored() {
        let config = AppConfig::default().with_default_doctor("d9");
        let mut flow = BookingFlowController::new(config, Arc::new(catalog_mock())).with_today(date());

        flow.load_providers().await.unwrap();

        assert_eq!(flow.step(), FlowStep::SelectingProvider);
        assert!(flow.default_provider().is_none());
    }

    #[test]
    fn test_unknown_extra_field_rejected() {
        let mut flow = controller(MockAvailabilityApi::new());
        assert_matches!(
            flow.set_field(FormField::Extra("company".into()), "Acme"),
            Err(BookingFlowError::UnknownField(_))
        );

        let config = AppConfig::default().with_variant(shared_config::FlowVariant::lead_capture());
        let mut flow = BookingFlowController::new(config, Arc::new(MockAvailabilityApi::new()));
        flow.set_field(FormField::Extra("company".into()), "Acme").unwrap();
        assert_eq!(flow.state().form.extra.get("company").map(String::as_str), Some("Acme"));
    }

    #[test]
    fn test_calendar_navigation() {
        let mut flow = controller(MockAvailabilityApi::new());
        assert_eq!(flow.month_label(), "June 2024");
        assert!(!flow.is_date_selectable(NaiveDate::from_ymd_opt(2024, 6, 9).unwrap()));
        assert!(flow.is_date_selectable(date()));

        flow.change_month(1);
        assert_eq!(flow.month_label(), "July 2024");
        assert_eq!(flow.month_grid().iter().flatten().count(), 31);
    }

    #[tokio::test]
    async fn test_slot_requires_doctor_and_date() {
        let mut flow = controller(catalog_mock());
        flow.load_providers().await.unwrap();

        assert_matches!(
            flow.select_slot("s-09"),
            Err(BookingFlowError::InvalidTransition { step: FlowStep::SelectingProvider, .. })
        );
        assert!(flow.selected_slot().is_none());

        flow.select_provider("d1").await.unwrap();
        assert!(flow.selected_type().is_some());
        assert_matches!(flow.select_slot("s-09"), Err(BookingFlowError::NoDateSelected));
        assert!(flow.selected_slot().is_none());
        assert!(!flow.can_advance());

        flow.select_date(date()).await.unwrap();
        flow.select_slot("s-09").unwrap();
        assert!(flow.can_advance());
    }

    #[tokio::test]
    async fn test_failed_slot_load_is_not_an_empty_day() {
        let mut mock = MockAvailabilityApi::new();
        mock.expect_list_doctors().returning(|| Ok(doctors()));
        mock.expect_appointment_types().returning(|_| Ok(types()));
        mock.expect_list_slots()
            .times(1)
            .returning(|_| Err(AppError::Timeout("5s".into())));
        mock.expect_list_slots().returning(|_| Ok(Vec::new()));

        let mut flow = controller(mock);
        flow.load_providers().await.unwrap();
        flow.select_provider("d1").await.unwrap();

        assert_eq!(flow.select_date(date()).await.unwrap(), ResponseOutcome::Failed);
        assert_eq!(flow.error(), Some(SLOTS_LOAD_FAILED));
        assert!(!flow.has_no_slots());

        flow.dismiss_error();
        assert!(!flow.has_no_slots());

        assert_eq!(flow.load_slots().await.unwrap(), ResponseOutcome::Applied);
        assert!(flow.has_no_slots());
    }

    #[test]
    fn test_is_today_uses_pinned_date() {
        let flow = controller(MockAvailabilityApi::new());
        assert!(flow.is_today(date()));
        assert!(!flow.is_today(NaiveDate::from_ymd_opt(2024, 6, 11).unwrap()));
    }

    #[test]
    fn test_step_label_follows_variant() {
        let flow = controller(MockAvailabilityApi::new());
        assert_eq!(flow.step_label(), "Select Doctor");
    }
}
