use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::AppConfig;

/// Installs a test-writer tracing subscriber once per process. Respects
/// `RUST_LOG`, defaults to `debug`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

pub struct TestConfig {
    pub api_url: String,
    pub timeout: Duration,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:5000/api".to_string(),
            timeout: Duration::from_secs(2),
        }
    }
}

impl TestConfig {
    /// Points the API base at a wiremock server, under `/api` like the real
    /// deployment.
    pub fn for_server(server: &MockServer) -> Self {
        Self {
            api_url: format!("{}/api", server.uri()),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig::new(self.api_url.clone()).with_timeout(self.timeout)
    }
}

pub struct TestSlot {
    pub id: String,
    pub start: DateTime<Utc>,
    pub minutes: i64,
    pub kind: String,
    pub available: bool,
}

impl TestSlot {
    pub fn new(date: NaiveDate, hour: u32, minute: u32, kind: &str) -> Self {
        let start = Utc.from_utc_datetime(&date.and_hms_opt(hour, minute, 0).unwrap_or_default());
        Self {
            id: Uuid::new_v4().to_string(),
            start,
            minutes: 30,
            kind: kind.to_string(),
            available: true,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn booked(mut self) -> Self {
        self.available = false;
        self
    }

    pub fn to_json(&self) -> Value {
        let end = self.start + chrono::Duration::minutes(self.minutes);
        json!({
            "_id": self.id,
            "doctorId": "ignored-by-client",
            "startTime": self.start.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "endTime": end.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "type": self.kind,
            "isAvailable": self.available
        })
    }
}

/// Canned bodies in the shapes the availability/calendar service returns.
pub struct MockApiResponses;

impl MockApiResponses {
    pub fn doctor(id: &str, name: &str, specialty: &str) -> Value {
        json!({ "_id": id, "name": name, "specialty": specialty })
    }

    pub fn doctors_response(doctors: Vec<Value>) -> Value {
        json!({ "doctors": doctors })
    }

    pub fn appointment_type(id: &str, name: &str) -> Value {
        json!({ "_id": id, "name": name, "duration": 30 })
    }

    pub fn availability_response(doctor_id: &str, types: Vec<Value>) -> Value {
        json!({
            "availability": {
                "doctorId": doctor_id,
                "appointmentTypes": types,
                "weeklySchedule": []
            }
        })
    }

    pub fn slots_response(slots: &[TestSlot]) -> Value {
        let slots: Vec<Value> = slots.iter().map(TestSlot::to_json).collect();
        json!({ "slots": slots, "count": slots.len(), "rules": {} })
    }

    pub fn booking_response(appointment_id: &str, slot_id: &str) -> Value {
        json!({
            "message": "Appointment booked successfully",
            "appointment": {
                "_id": appointment_id,
                "slotId": slot_id,
                "status": "scheduled"
            }
        })
    }

    pub fn error_response(message: &str) -> Value {
        json!({ "message": message })
    }
}

/// Mounts the doctor list and one doctor's availability on `server`.
pub async fn mount_catalog(server: &MockServer, doctors: Vec<Value>, doctor_id: &str, types: Vec<Value>) {
    Mock::given(method("GET"))
        .and(path("/api/availability/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockApiResponses::doctors_response(doctors)))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("/api/availability/{}", doctor_id)))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(MockApiResponses::availability_response(doctor_id, types)),
        )
        .mount(server)
        .await;
}

/// Mounts a slot listing for one doctor, optionally only for one type name.
pub async fn mount_slots(server: &MockServer, doctor_id: &str, type_name: Option<&str>, slots: &[TestSlot]) {
    let mut mock = Mock::given(method("GET"))
        .and(path("/api/calendar/slots"))
        .and(query_param("doctorId", doctor_id));
    if let Some(name) = type_name {
        mock = mock.and(query_param("appointmentType", name));
    }
    mock.respond_with(ResponseTemplate::new(200).set_body_json(MockApiResponses::slots_response(slots)))
        .mount(server)
        .await;
}
