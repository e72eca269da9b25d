use assert_matches::assert_matches;
use chrono::NaiveDate;
use chrono_tz::Tz;
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use booking_flow_cell::{AvailabilityApi, AvailabilityClient, BookSlotRequest, SlotQuery};
use shared_models::AppError;
use shared_utils::test_utils::{MockApiResponses, TestConfig, TestSlot};

fn june_10() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()
}

fn client_for(server: &MockServer) -> AvailabilityClient {
    AvailabilityClient::new(&TestConfig::for_server(server).to_app_config()).unwrap()
}

#[tokio::test]
async fn test_list_doctors() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/availability/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockApiResponses::doctors_response(vec![
            MockApiResponses::doctor("d1", "Ada Lovelace", "Cardiology"),
            json!({ "_id": "d2", "name": "Alan Turing" }),
        ])))
        .mount(&mock_server)
        .await;

    let doctors = client_for(&mock_server).list_doctors().await.unwrap();

    assert_eq!(doctors.len(), 2);
    assert_eq!(doctors[0].specialty.as_deref(), Some("Cardiology"));
    assert!(doctors[1].specialty.is_none());
}

#[tokio::test]
async fn test_missing_doctors_key_is_empty_list() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/availability/doctors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&mock_server)
        .await;

    let doctors = client_for(&mock_server).list_doctors().await.unwrap();
    assert!(doctors.is_empty());
}

#[tokio::test]
async fn test_appointment_types_for_doctor() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/availability/d1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockApiResponses::availability_response(
            "d1",
            vec![
                MockApiResponses::appointment_type("t-a", "Consultation"),
                MockApiResponses::appointment_type("t-b", "Follow-up"),
            ],
        )))
        .mount(&mock_server)
        .await;

    let types = client_for(&mock_server).appointment_types("d1").await.unwrap();

    let names: Vec<&str> = types.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Consultation", "Follow-up"]);
}

#[tokio::test]
async fn test_no_availability_means_no_types() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/availability/d1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "availability": null })))
        .mount(&mock_server)
        .await;

    let types = client_for(&mock_server).appointment_types("d1").await.unwrap();
    assert!(types.is_empty());
}

#[tokio::test]
async fn test_list_slots_sends_day_window_and_type() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/calendar/slots"))
        .and(query_param("doctorId", "d1"))
        .and(query_param("startDate", "2024-06-10T00:00:00.000Z"))
        .and(query_param("endDate", "2024-06-10T23:59:59.999Z"))
        .and(query_param("appointmentType", "Follow-up visit"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockApiResponses::slots_response(&[
            TestSlot::new(june_10(), 9, 0, "Follow-up visit").with_id("s1"),
            TestSlot::new(june_10(), 9, 30, "Follow-up visit").with_id("s2").booked(),
        ])))
        .expect(1)
        .mount(&mock_server)
        .await;

    let query = SlotQuery::new("d1", june_10(), Some(("t-b", "Follow-up visit")), &Tz::UTC);
    let slots = client_for(&mock_server).list_slots(&query).await.unwrap();

    // The client returns what the service sent; filtering is the flow's job.
    assert_eq!(slots.len(), 2);
    assert_eq!(query.candidates(slots).len(), 1);
}

#[tokio::test]
async fn test_malformed_slot_is_skipped() {
    let mock_server = MockServer::start().await;

    let good = TestSlot::new(june_10(), 9, 0, "Consultation").with_id("good").to_json();
    let missing_end = json!({
        "_id": "no-end",
        "startTime": "2024-06-10T10:00:00.000Z",
        "type": "Consultation",
        "isAvailable": true
    });
    let bad_time = json!({
        "_id": "bad-time",
        "startTime": "tomorrow-ish",
        "endTime": "2024-06-10T11:30:00.000Z",
        "isAvailable": true
    });

    Mock::given(method("GET"))
        .and(path("/api/calendar/slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "slots": [missing_end, good, bad_time]
        })))
        .mount(&mock_server)
        .await;

    let query = SlotQuery::new("d1", june_10(), None, &Tz::UTC);
    let slots = client_for(&mock_server).list_slots(&query).await.unwrap();

    let ids: Vec<&str> = slots.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["good"]);
}

#[tokio::test]
async fn test_doctor_id_is_path_encoded() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/availability/dr%2F7%20x"))
        .respond_with(ResponseTemplate::new(200).set_body_json(MockApiResponses::availability_response(
            "dr/7 x",
            vec![MockApiResponses::appointment_type("t-a", "Consultation")],
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    let types = client_for(&mock_server).appointment_types("dr/7 x").await.unwrap();
    assert_eq!(types.len(), 1);
}

#[tokio::test]
async fn test_book_slot_posts_contract_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/calendar/book-slot"))
        .and(body_json(json!({
            "slotId": "s1",
            "patientName": "Jane Doe",
            "patientEmail": "jane@x.com",
            "patientPhone": "+15551234567",
            "reasonForVisit": "checkup",
            "notes": ""
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(MockApiResponses::booking_response("abc12345", "s1")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let request = BookSlotRequest {
        slot_id: "s1".into(),
        patient_name: "Jane Doe".into(),
        patient_email: "jane@x.com".into(),
        patient_phone: "+15551234567".into(),
        reason_for_visit: "checkup".into(),
        notes: String::new(),
        extra: Default::default(),
    };
    let created = client_for(&mock_server).book_slot(&request).await.unwrap();

    assert_eq!(created.id, "abc12345");
    assert_eq!(created.raw["status"], "scheduled");
}

#[tokio::test]
async fn test_book_slot_without_id_is_decode_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/calendar/book-slot"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "appointment": { "status": "scheduled" } })))
        .mount(&mock_server)
        .await;

    let request = BookSlotRequest {
        slot_id: "s1".into(),
        patient_name: "Jane".into(),
        patient_email: "j@x.com".into(),
        patient_phone: "1".into(),
        reason_for_visit: "r".into(),
        notes: String::new(),
        extra: Default::default(),
    };
    let err = client_for(&mock_server).book_slot(&request).await.unwrap_err();

    assert_matches!(err, AppError::Decode(_));
}

#[tokio::test]
async fn test_book_slot_rejection_surfaces_message() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/calendar/book-slot"))
        .respond_with(ResponseTemplate::new(400).set_body_json(MockApiResponses::error_response("Slot is no longer available")))
        .mount(&mock_server)
        .await;

    let request = BookSlotRequest {
        slot_id: "s1".into(),
        patient_name: "Jane".into(),
        patient_email: "j@x.com".into(),
        patient_phone: "1".into(),
        reason_for_visit: "r".into(),
        notes: String::new(),
        extra: Default::default(),
    };
    let err = client_for(&mock_server).book_slot(&request).await.unwrap_err();

    assert_eq!(err.service_message(), Some("Slot is no longer available"));
}
