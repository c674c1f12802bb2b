use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// A booked interval on a professional's calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub booking_id: Ulid,
    pub span: Span,
}

/// Per-professional calendar: the professional's profile plus every
/// non-cancelled booked interval, sorted by `span.start`.
#[derive(Debug, Clone)]
pub struct ProfessionalCalendar {
    pub professional: Professional,
    pub intervals: Vec<Interval>,
}

impl ProfessionalCalendar {
    pub fn new(professional: Professional) -> Self {
        Self {
            professional,
            intervals: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.professional.id
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    pub fn remove_interval(&mut self, booking_id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.booking_id == booking_id)?;
        Some(self.intervals.remove(pos))
    }

    /// Intervals whose span overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    /// Booked spans overlapping `query`, in start order.
    pub fn booked_spans(&self, query: &Span) -> Vec<Span> {
        self.overlapping(query).map(|i| i.span).collect()
    }
}

pub(crate) fn validate_instant(at: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&at) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start >= span.end {
        return Err(EngineError::validation("interval must end after it starts"));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

/// Authoritative overlap check. Must run under the calendar's write guard,
/// in the same critical section as the insert.
pub(crate) fn check_no_conflict(cal: &ProfessionalCalendar, span: &Span) -> Result<(), EngineError> {
    match cal.overlapping(span).next() {
        Some(existing) => Err(EngineError::SlotConflict {
            booking: existing.booking_id,
            span: existing.span,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calendar() -> ProfessionalCalendar {
        ProfessionalCalendar::new(Professional {
            id: Ulid::new(),
            name: None,
            hours: WorkingHours::new(),
            services: vec![],
        })
    }

    fn booked(cal: &mut ProfessionalCalendar, start: Ms, end: Ms) -> Ulid {
        let id = Ulid::new();
        cal.insert_interval(Interval {
            booking_id: id,
            span: Span::new(start, end),
        });
        id
    }

    #[test]
    fn intervals_stay_sorted() {
        let mut cal = calendar();
        booked(&mut cal, 300, 400);
        booked(&mut cal, 100, 200);
        booked(&mut cal, 200, 300);
        let starts: Vec<Ms> = cal.intervals.iter().map(|i| i.span.start).collect();
        assert_eq!(starts, vec![100, 200, 300]);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut cal = calendar();
        booked(&mut cal, 100, 200);
        booked(&mut cal, 450, 600);
        booked(&mut cal, 1000, 1100);
        let hits: Vec<_> = cal.overlapping(&Span::new(500, 800)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].span, Span::new(450, 600));
    }

    #[test]
    fn adjacent_interval_is_not_a_conflict() {
        let mut cal = calendar();
        booked(&mut cal, 100, 200);
        assert!(check_no_conflict(&cal, &Span::new(200, 300)).is_ok());
        assert!(check_no_conflict(&cal, &Span::new(0, 100)).is_ok());
    }

    #[test]
    fn single_ms_overlap_conflicts() {
        let mut cal = calendar();
        let id = booked(&mut cal, 100, 201);
        match check_no_conflict(&cal, &Span::new(200, 300)) {
            Err(EngineError::SlotConflict { booking, .. }) => assert_eq!(booking, id),
            other => panic!("expected SlotConflict, got {other:?}"),
        }
    }

    #[test]
    fn long_interval_spanning_query_conflicts() {
        let mut cal = calendar();
        booked(&mut cal, 0, 10_000);
        assert!(check_no_conflict(&cal, &Span::new(500, 600)).is_err());
    }

    #[test]
    fn remove_releases_interval() {
        let mut cal = calendar();
        let id = booked(&mut cal, 100, 200);
        assert!(cal.remove_interval(Ulid::new()).is_none());
        assert_eq!(cal.remove_interval(id).map(|i| i.booking_id), Some(id));
        assert!(check_no_conflict(&cal, &Span::new(100, 200)).is_ok());
    }

    #[test]
    fn validate_span_bounds() {
        assert!(validate_span(&Span { start: 10, end: 10 }).is_err());
        assert!(matches!(
            validate_span(&Span::new(0, 1000)),
            Err(EngineError::LimitExceeded(_))
        ));
        let start = MIN_VALID_TIMESTAMP_MS + DAY_MS;
        assert!(validate_span(&Span::new(start, start + 1000)).is_ok());
    }

    #[test]
    fn validate_instant_bounds() {
        assert!(validate_instant(MIN_VALID_TIMESTAMP_MS).is_ok());
        assert!(validate_instant(MAX_VALID_TIMESTAMP_MS).is_ok());
        assert!(matches!(validate_instant(i64::MAX - 1000), Err(EngineError::LimitExceeded(_))));
        assert!(matches!(validate_instant(i64::MIN), Err(EngineError::LimitExceeded(_))));
    }
}
