use crate::model::*;

use super::EngineError;

/// Fails with `SlotConflict` naming the first active booking that overlaps `span`.
/// Cancelled and no-show bookings never conflict.
pub(crate) fn check_no_conflict<'a>(
    existing: impl IntoIterator<Item = &'a Booking>,
    span: &Span,
) -> Result<(), EngineError> {
    for booking in existing {
        if booking.status.blocks_schedule() && booking.span().overlaps(span) {
            return Err(EngineError::SlotConflict { booking_id: Some(booking.id) });
        }
    }
    Ok(())
}

/// Drop every candidate overlapping an active booking. `candidates` must be
/// sorted by start; the result keeps their order.
pub fn filter_conflicts(candidates: Vec<Span>, existing: &[Booking]) -> Vec<Span> {
    let mut occupied: Vec<Span> = existing
        .iter()
        .filter(|b| b.status.blocks_schedule())
        .map(Booking::span)
        .collect();
    if occupied.is_empty() {
        return candidates;
    }
    occupied.sort_by_key(|s| s.start);
    let occupied = merge_overlapping(&occupied);

    let mut oi = 0;
    candidates
        .into_iter()
        .filter(|candidate| {
            // Occupied spans ending at or before this start cannot touch any later candidate.
            while oi < occupied.len() && occupied[oi].end <= candidate.start {
                oi += 1;
            }
            !(oi < occupied.len() && occupied[oi].start < candidate.end)
        })
        .collect()
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}
