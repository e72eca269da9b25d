use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

use crate::models::Slot;

/// One calendar day in the configured timezone, from local midnight to
/// 23:59:59.999, expressed as UTC instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn for_date(date: NaiveDate, tz: &Tz) -> Self {
        let start = local_instant(tz, date, NaiveTime::MIN);
        let next_midnight = date
            .succ_opt()
            .map(|next| local_instant(tz, next, NaiveTime::MIN))
            .unwrap_or(start + Duration::days(1));

        Self {
            start,
            end: next_midnight - Duration::milliseconds(1),
        }
    }

    /// ISO-8601 with millisecond precision and a `Z` suffix.
    pub fn start_param(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn end_param(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

/// Resolves a wall-clock time to UTC. A midnight skipped by a DST jump moves
/// to the first instant after the gap.
fn local_instant(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            let mut probe = naive;
            for _ in 0..4 {
                probe += Duration::minutes(30);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    return dt.with_timezone(&Utc);
                }
            }
            Utc.from_utc_datetime(&naive)
        }
    }
}

/// The (doctor, date, type) selection a slot request targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SelectionKey {
    pub doctor_id: String,
    pub date: NaiveDate,
    pub type_id: Option<String>,
}

/// Everything needed to issue `GET /calendar/slots` for one selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotQuery {
    pub doctor_id: String,
    pub date: NaiveDate,
    pub type_id: Option<String>,
    pub type_name: Option<String>,
    pub window: DayWindow,
}

impl SlotQuery {
    pub fn new(
        doctor_id: &str,
        date: NaiveDate,
        appointment_type: Option<(&str, &str)>,
        tz: &Tz,
    ) -> Self {
        Self {
            doctor_id: doctor_id.to_string(),
            date,
            type_id: appointment_type.map(|(id, _)| id.to_string()),
            type_name: appointment_type.map(|(_, name)| name.to_string()),
            window: DayWindow::for_date(date, tz),
        }
    }

    pub fn key(&self) -> SelectionKey {
        SelectionKey {
            doctor_id: self.doctor_id.clone(),
            date: self.date,
            type_id: self.type_id.clone(),
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("doctorId", self.doctor_id.clone()),
            ("startDate", self.window.start_param()),
            ("endDate", self.window.end_param()),
        ];
        if let Some(name) = &self.type_name {
            pairs.push(("appointmentType", name.clone()));
        }
        pairs
    }

    /// Keeps available slots and, when a type is resolved, only slots of
    /// exactly that type. Result is ordered by start time.
    pub fn candidates(&self, slots: Vec<Slot>) -> Vec<Slot> {
        let mut kept: Vec<Slot> = slots
            .into_iter()
            .filter(|slot| slot.is_available)
            .filter(|slot| match &self.type_name {
                Some(name) => slot.appointment_type.as_deref() == Some(name.as_str()),
                None => true,
            })
            .collect();
        kept.sort_by_key(|slot| slot.start_time);
        kept
    }
}
