use chrono::{Datelike, Months, NaiveDate};

/// First day of the month containing `date`.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Moves a month cursor by `offset` months, clamped to the first of the month.
pub fn shift_month(month: NaiveDate, offset: i32) -> NaiveDate {
    let start = month_start(month);
    let shifted = if offset >= 0 {
        start.checked_add_months(Months::new(offset.unsigned_abs()))
    } else {
        start.checked_sub_months(Months::new(offset.unsigned_abs()))
    };
    shifted.unwrap_or(start)
}

/// Days of the month laid out for a Sunday-first week grid. Leading cells
/// before the 1st are `None`.
pub fn month_grid(month: NaiveDate) -> Vec<Option<NaiveDate>> {
    let first = month_start(month);
    let leading = first.weekday().num_days_from_sunday() as usize;

    let mut days = vec![None; leading];
    let mut day = Some(first);
    while let Some(current) = day {
        if current.month() != first.month() {
            break;
        }
        days.push(Some(current));
        day = current.succ_opt();
    }
    days
}

pub fn days_in_month(month: NaiveDate) -> u32 {
    month_grid(month).iter().flatten().count() as u32
}

pub fn is_today(day: NaiveDate, today: NaiveDate) -> bool {
    day == today
}

/// Past days are shown but not selectable.
pub fn is_past(day: NaiveDate, today: NaiveDate) -> bool {
    day < today
}

pub fn is_selectable(day: NaiveDate, today: NaiveDate) -> bool {
    !is_past(day, today)
}

/// e.g. "June 2024".
pub fn month_label(month: NaiveDate) -> String {
    month.format("%B %Y").to_string()
}
