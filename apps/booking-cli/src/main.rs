use std::process::ExitCode;

use chrono::NaiveDate;
use dotenv::dotenv;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use booking_flow_cell::{BookingFlowController, BookingFlowError, PatientFormData, ResponseOutcome};
use shared_config::AppConfig;

const USAGE: &str = "usage:
  booking-cli doctors
  booking-cli slots <doctor-id> <YYYY-MM-DD> [type-id]
  booking-cli book <doctor-id> <YYYY-MM-DD> <slot-id> <name> <email> <phone> <reason> [notes]";

#[tokio::main]
async fn main() -> ExitCode {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env();
    info!("Using booking API at {} ({:?})", config.api_url, config.timezone);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(config, &args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("{}", message);
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: AppConfig, args: &[String]) -> Result<(), String> {
    let mut flow = BookingFlowController::connect(config).map_err(|e| e.to_string())?;

    match args.first().map(String::as_str) {
        Some("doctors") => {
            load_doctors(&mut flow).await?;
            for doctor in flow.doctors() {
                println!(
                    "{}\t{}\t{}",
                    doctor.id,
                    doctor.name,
                    doctor.specialty.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Some("slots") if args.len() >= 3 => {
            open_day(&mut flow, &args[1], &args[2], args.get(3).map(String::as_str)).await?;
            if flow.has_no_slots() {
                println!("No available slots");
            }
            let tz = flow.config().timezone;
            for slot in flow.available_slots() {
                println!(
                    "{}\t{}\t{}",
                    slot.id,
                    slot.time_range(&tz),
                    slot.appointment_type.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
        Some("book") if args.len() >= 8 => {
            open_day(&mut flow, &args[1], &args[2], None).await?;
            flow.select_slot(&args[3]).map_err(describe)?;
            flow.advance().await.map_err(describe)?;

            let mut form = PatientFormData::new(&args[4], &args[5], &args[6], &args[7]);
            if let Some(notes) = args.get(8) {
                form = form.with_notes(notes);
            }
            let outcome = flow_outcome(flow.submit_booking(form).await)?;
            expect_applied(&flow, outcome)?;

            let confirmation = flow
                .confirmation()
                .ok_or_else(|| "Booking finished without a confirmation".to_string())?;
            println!("Booking reference: {}", confirmation.reference());
            println!("Doctor: {}", confirmation.doctor.name);
            println!("Date: {}", confirmation.date.format("%A, %B %-d, %Y"));
            println!("Time: {}", confirmation.time_range);
            Ok(())
        }
        _ => Err(USAGE.to_string()),
    }
}

async fn load_doctors(flow: &mut BookingFlowController) -> Result<(), String> {
    let outcome = flow_outcome(flow.load_providers().await)?;
    expect_applied(flow, outcome)
}

/// Walks the flow to the slot list of one doctor on one day.
async fn open_day(
    flow: &mut BookingFlowController,
    doctor_id: &str,
    date: &str,
    type_id: Option<&str>,
) -> Result<(), String> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| format!("Invalid date {}: {}", date, e))?;

    load_doctors(flow).await?;
    if flow.selected_doctor().map(|d| d.id.as_str()) != Some(doctor_id) {
        flow.select_provider(doctor_id).await.map_err(describe)?;
    }
    if let Some(type_id) = type_id {
        flow.select_appointment_type(type_id).await.map_err(describe)?;
    }

    let outcome = flow_outcome(flow.select_date(date).await)?;
    expect_applied(flow, outcome)
}

fn flow_outcome(result: Result<ResponseOutcome, BookingFlowError>) -> Result<ResponseOutcome, String> {
    result.map_err(describe)
}

fn expect_applied(flow: &BookingFlowController, outcome: ResponseOutcome) -> Result<(), String> {
    match outcome {
        ResponseOutcome::Applied => Ok(()),
        _ => Err(flow.error().unwrap_or("Request was not applied").to_string()),
    }
}

fn describe(error: BookingFlowError) -> String {
    error.to_string()
}
