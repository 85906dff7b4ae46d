use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::model::*;

// ── Slot generation ───────────────────────────────────────────────

/// Turn the weekly rules of a booking type into the concrete candidate
/// slots of one local calendar `date`, ordered by start.
///
/// Each rule matching the date's weekday is cut into back-to-back slots of
/// exactly the booking type's duration, from the rule start up to the last
/// slot that still ends by the rule end. The stride always equals the
/// duration; there is no finer granularity.
///
/// Rules on the same day are unioned without merging, so overlapping rules
/// can yield overlapping candidates. Only exact duplicates are collapsed.
///
/// Candidates that do not start strictly after `now` are dropped. A local
/// start that falls into a DST gap produces no slot; an ambiguous one takes
/// the earlier instant. Within one rule, a grid point that would start before
/// the previous slot ends (the slot after a gap) is skipped.
pub fn generate_slots(
    booking_type: &BookingType,
    date: NaiveDate,
    rules: &[AvailabilityRule],
    tz: Tz,
    now: DateTime<Utc>,
) -> Vec<Span> {
    let step = booking_type.duration();
    if step <= Duration::zero() {
        return Vec::new();
    }
    let weekday = day_of_week(date);

    let mut slots = Vec::new();
    for rule in rules.iter().filter(|r| r.day_of_week == weekday) {
        let window_end = date.and_time(rule.end_time);
        let mut cursor = date.and_time(rule.start_time);
        // The cursor walks wall-clock time; across a spring-forward gap the
        // next grid point can start before the previous slot has ended.
        let mut prev_end: Option<DateTime<Utc>> = None;
        while cursor + step <= window_end {
            if let Some(start) = resolve_local(tz, cursor)
                && prev_end.is_none_or(|end| start >= end)
            {
                let slot = Span::new(start, start + step);
                prev_end = Some(slot.end);
                if slot.start > now {
                    slots.push(slot);
                }
            }
            cursor += step;
        }
    }

    slots.sort();
    slots.dedup();
    slots
}

/// Sunday = 0 … Saturday = 6.
pub fn day_of_week(date: NaiveDate) -> u8 {
    // num_days_from_sunday is always < 7.
    date.weekday().num_days_from_sunday() as u8
}

/// Local wall-clock time to a UTC instant; `None` inside a DST gap.
pub fn resolve_local(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// The calendar date an instant falls on in `tz`.
pub fn local_date(tz: Tz, instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// `[start of date, start of next date)` in `tz`, as UTC instants.
pub fn local_day_span(tz: Tz, date: NaiveDate) -> Span {
    let start = start_of_day(tz, date);
    let end = date
        .succ_opt()
        .map(|next| start_of_day(tz, next))
        .unwrap_or(start + Duration::days(1));
    Span::new(start, end)
}

fn start_of_day(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    // Some zones skip midnight on DST day; the first existing hour stands in for it.
    (0..3)
        .filter_map(|h| NaiveTime::from_hms_opt(h, 0, 0))
        .find_map(|t| resolve_local(tz, date.and_time(t)))
        .unwrap_or_else(|| Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}

/// The window a list of sorted candidates spans, for fetching existing bookings.
pub fn covering_span(sorted: &[Span]) -> Option<Span> {
    let first = sorted.first()?;
    let end = sorted.iter().map(|s| s.end).max()?;
    Some(Span::new(first.start, end))
}
