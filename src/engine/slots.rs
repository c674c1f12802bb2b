use chrono::{Datelike, NaiveDate};
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

// ── Slot Algorithm ────────────────────────────────────────────────

/// Back-to-back candidate slots of `duration` inside `window`, minus any that
/// overlap a booked span.
///
/// Slots starting before `now` are kept and flagged `past` so a caller can
/// backfill. Non-past slots on today's date that start within `min_advance` of
/// `now` are dropped. A tail shorter than `duration` produces no slot.
pub fn compute_slots(
    window: Span,
    duration: Ms,
    booked: &[Span],
    now: Ms,
    min_advance: Ms,
) -> Vec<Slot> {
    if duration <= 0 {
        return Vec::new();
    }
    let mut sorted = booked.to_vec();
    sorted.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&sorted);
    let today = date_of(now);

    let mut slots = Vec::new();
    let mut bi = 0;
    let mut cursor = window.start;
    while cursor + duration <= window.end {
        let candidate = Span::new(cursor, cursor + duration);
        cursor += duration;

        while bi < busy.len() && busy[bi].end <= candidate.start {
            bi += 1;
        }
        if bi < busy.len() && busy[bi].overlaps(&candidate) {
            continue;
        }

        let past = candidate.start < now;
        if !past
            && min_advance > 0
            && candidate.start < now + min_advance
            && date_of(candidate.start) == today
        {
            continue;
        }
        slots.push(Slot {
            start: candidate.start,
            past,
        });
    }
    slots
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

impl Engine {
    /// Offerable start times for `service` with `professional` on `date`.
    ///
    /// Advisory only: the binding overlap check happens in `create_booking`.
    pub async fn list_slots(
        &self,
        ctx: &RequestContext,
        professional_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Slot>, EngineError> {
        let service = self.get_service(&service_id)?;
        let cal = self
            .get_calendar(&professional_id)
            .ok_or(EngineError::NotFound(professional_id))?;
        let guard = cal.read().await;
        if !guard.professional.offers(&service_id) {
            return Err(EngineError::validation(format!(
                "service {service_id} is not offered by professional {professional_id}"
            )));
        }

        let Some(window) = guard.professional.hours.window(date.weekday()) else {
            return Ok(Vec::new());
        };
        let window = window.on(date);
        let booked = guard.booked_spans(&window);
        drop(guard);

        Ok(compute_slots(
            window,
            service.duration_ms(),
            &booked,
            ctx.now,
            self.policy.min_advance_minutes as Ms * MINUTE_MS,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: Ms = 3_600_000;
    const M: Ms = 60_000;

    fn day() -> Ms {
        day_start(NaiveDate::from_ymd_opt(2026, 10, 19).unwrap())
    }

    fn labels(slots: &[Slot]) -> Vec<String> {
        slots.iter().map(Slot::label).collect()
    }

    #[test]
    fn empty_day_yields_back_to_back_slots() {
        let d = day();
        let slots = compute_slots(Span::new(d + 9 * H, d + 13 * H), H, &[], d - DAY_MS, 0);
        assert_eq!(labels(&slots), vec!["09:00", "10:00", "11:00", "12:00"]);
    }

    #[test]
    fn booked_interval_removes_its_slot() {
        let d = day();
        let booked = [Span::new(d + 10 * H, d + 11 * H)];
        let slots = compute_slots(Span::new(d + 9 * H, d + 13 * H), H, &booked, d - DAY_MS, 0);
        assert_eq!(labels(&slots), vec!["09:00", "11:00", "12:00"]);
    }

    #[test]
    fn partial_overlap_rejects_candidate() {
        let d = day();
        let booked = [Span::new(d + 10 * H + 30 * M, d + 11 * H + 15 * M)];
        let slots = compute_slots(Span::new(d + 9 * H, d + 13 * H), H, &booked, d - DAY_MS, 0);
        assert_eq!(labels(&slots), vec!["09:00", "12:00"]);
    }

    #[test]
    fn short_tail_produces_no_slot() {
        let d = day();
        let slots = compute_slots(Span::new(d + 9 * H, d + 11 * H), 45 * M, &[], d - DAY_MS, 0);
        assert_eq!(labels(&slots), vec!["09:00", "09:45"]);
    }

    #[test]
    fn duration_longer_than_window_yields_nothing() {
        let d = day();
        let slots = compute_slots(Span::new(d + 9 * H, d + 10 * H), 2 * H, &[], d - DAY_MS, 0);
        assert!(slots.is_empty());
    }

    #[test]
    fn slots_before_now_are_flagged_not_dropped() {
        let d = day();
        let now = d + 10 * H + 15 * M;
        let slots = compute_slots(Span::new(d + 9 * H, d + 13 * H), H, &[], now, 0);
        assert_eq!(labels(&slots), vec!["PAST:09:00", "PAST:10:00", "11:00", "12:00"]);
    }

    #[test]
    fn past_date_marks_everything_past() {
        let d = day();
        let slots = compute_slots(Span::new(d + 9 * H, d + 11 * H), H, &[], d + 3 * DAY_MS, 0);
        assert!(slots.iter().all(|s| s.past));
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn min_advance_hides_imminent_slots() {
        let d = day();
        let now = d + 8 * H + 30 * M;
        let slots = compute_slots(Span::new(d + 9 * H, d + 13 * H), H, &[], now, 2 * H);
        assert_eq!(labels(&slots), vec!["11:00", "12:00"]);
    }

    #[test]
    fn min_advance_ignores_other_days() {
        let d = day();
        let now = d - 30 * M; // 23:30 the previous day
        let slots = compute_slots(Span::new(d, d + 2 * H), H, &[], now, 2 * H);
        assert_eq!(labels(&slots), vec!["00:00", "01:00"]);
    }

    #[test]
    fn overlapping_bookings_are_merged() {
        let d = day();
        let booked = [
            Span::new(d + 9 * H + 30 * M, d + 10 * H + 30 * M),
            Span::new(d + 9 * H, d + 10 * H),
        ];
        let slots = compute_slots(Span::new(d + 9 * H, d + 12 * H), H, &booked, d - DAY_MS, 0);
        assert_eq!(labels(&slots), vec!["11:00"]);
    }

    #[test]
    fn merge_overlapping_adjacent() {
        let merged = merge_overlapping(&[Span::new(100, 200), Span::new(200, 300), Span::new(400, 500)]);
        assert_eq!(merged, vec![Span::new(100, 300), Span::new(400, 500)]);
    }
}
