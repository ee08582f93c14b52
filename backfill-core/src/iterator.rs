//! Period iterator: the shared driver behind every period strategy.
//!
//! Protocol:
//! - `peek()` reports the end boundary of the period the next `advance()` would
//!   produce. It never mutates anything and may be called any number of times.
//! - `advance()` produces the next period's `ParameterBundle`, or `Ok(None)`
//!   once `iteration_count` periods have been produced. Exhaustion is sticky
//!   and performs no mutation.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;

use crate::bundle::{Padding, ParameterBundle};
use crate::calendar::{parse_date, DateRange, YearMonth};
use crate::fiscal::{FiscalCalendar, FiscalError};
use crate::period::{Direction, PeriodKind, Position};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeriodError {
    #[error("invalid date '{input}': {reason}")]
    InvalidDate { input: String, reason: String },

    #[error("multi-day chunk size must be at least 1 day")]
    ZeroChunkSize,

    #[error("date arithmetic left the representable calendar range")]
    DateOutOfRange,

    #[error("fiscal period strategy requires a fiscal calendar")]
    MissingFiscalCalendar,

    #[error(transparent)]
    Fiscal(#[from] FiscalError),
}

/// Builder for [`PeriodIterator`]. Defaults: backward, padding (1, 1),
/// no snapping, logging on.
pub struct PeriodIteratorBuilder {
    kind: PeriodKind,
    start: NaiveDate,
    iterations: u32,
    direction: Direction,
    padding: Padding,
    complete_periods: bool,
    logging: bool,
    fiscal: Option<Arc<dyn FiscalCalendar>>,
}

impl PeriodIteratorBuilder {
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn padding(mut self, padding: impl Into<Padding>) -> Self {
        self.padding = padding.into();
        self
    }

    /// Skip the partial period containing the start date (backward only).
    pub fn complete_periods(mut self, complete: bool) -> Self {
        self.complete_periods = complete;
        self
    }

    pub fn logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    pub fn fiscal_calendar(mut self, calendar: Arc<dyn FiscalCalendar>) -> Self {
        self.fiscal = Some(calendar);
        self
    }

    pub fn build(self) -> Result<PeriodIterator, PeriodError> {
        if let PeriodKind::MultiDay { days: 0 } = self.kind {
            return Err(PeriodError::ZeroChunkSize);
        }
        if self.kind.is_fiscal() && self.fiscal.is_none() {
            return Err(PeriodError::MissingFiscalCalendar);
        }

        let position = self
            .kind
            .initial_position(self.start, self.direction, self.iterations)?;
        let mut iter = PeriodIterator {
            kind: self.kind,
            direction: self.direction,
            iteration_count: self.iterations,
            completed_count: 0,
            position,
            current: None,
            padding: self.padding,
            logging: self.logging,
            fiscal: self.fiscal,
        };

        if self.complete_periods && self.direction == Direction::Backward && self.iterations > 0 {
            iter.fast_forward_to_period_boundary(self.start)?;
        }
        Ok(iter)
    }
}

/// A stateful, bidirectional sequence of period boundaries.
pub struct PeriodIterator {
    kind: PeriodKind,
    direction: Direction,
    iteration_count: u32,
    completed_count: u32,
    position: Position,
    current: Option<DateRange>,
    padding: Padding,
    logging: bool,
    fiscal: Option<Arc<dyn FiscalCalendar>>,
}

impl PeriodIterator {
    pub fn builder(kind: PeriodKind, start: NaiveDate, iterations: u32) -> PeriodIteratorBuilder {
        PeriodIteratorBuilder {
            kind,
            start,
            iterations,
            direction: Direction::default(),
            padding: Padding::default(),
            complete_periods: false,
            logging: true,
            fiscal: None,
        }
    }

    /// Same as [`PeriodIterator::builder`] with an ISO `YYYY-MM-DD` start date.
    pub fn builder_from_str(
        kind: PeriodKind,
        start: &str,
        iterations: u32,
    ) -> Result<PeriodIteratorBuilder, PeriodError> {
        let start = parse_date(start).map_err(|e| PeriodError::InvalidDate {
            input: start.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::builder(kind, start, iterations))
    }

    /// End boundary of the period the next `advance` would produce.
    pub fn peek(&self) -> Result<NaiveDate, PeriodError> {
        Ok(self.kind.bounds(&self.position, self.fiscal.as_deref())?.end)
    }

    /// Produce the next period, or `Ok(None)` when exhausted.
    pub fn advance(&mut self) -> Result<Option<ParameterBundle>, PeriodError> {
        if self.is_exhausted() {
            return Ok(None);
        }

        let range = self.kind.bounds(&self.position, self.fiscal.as_deref())?;
        let labels = self.kind.labels(&self.position);
        let bundle = ParameterBundle::build(range, self.padding, self.kind.tag(), labels)
            .ok_or(PeriodError::DateOutOfRange)?;

        // Step on a copy so a failed step leaves the iterator untouched.
        let mut next = self.position;
        self.kind.step(&mut next, self.direction)?;

        self.position = next;
        self.current = Some(range);
        self.completed_count += 1;

        if self.logging {
            tracing::info!(
                period_tag = self.kind.tag(),
                iteration = self.completed_count,
                of = self.iteration_count,
                "{} | {} | range {}",
                bundle.year_month,
                bundle.month_name,
                range
            );
        }
        Ok(Some(bundle))
    }

    /// Step backward until the next period ends on or before `start`, so a
    /// traversal beginning mid-period only yields whole periods. Does not
    /// count toward `iteration_count`.
    fn fast_forward_to_period_boundary(&mut self, start: NaiveDate) -> Result<(), PeriodError> {
        let mut skipped = 0u32;
        while start < self.peek()? {
            self.kind.step(&mut self.position, self.direction)?;
            skipped += 1;
        }
        if skipped > 0 {
            tracing::debug!(
                period_tag = self.kind.tag(),
                skipped,
                "skipped partial period(s) before {start}"
            );
        }
        Ok(())
    }

    pub fn kind(&self) -> PeriodKind {
        self.kind
    }

    pub fn period_tag(&self) -> &'static str {
        self.kind.tag()
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn iteration_count(&self) -> u32 {
        self.iteration_count
    }

    pub fn completed_count(&self) -> u32 {
        self.completed_count
    }

    pub fn remaining(&self) -> u32 {
        self.iteration_count - self.completed_count
    }

    pub fn is_exhausted(&self) -> bool {
        self.completed_count >= self.iteration_count
    }

    /// Date anchoring the next period.
    pub fn cursor(&self) -> NaiveDate {
        self.position.cursor
    }

    /// Fiscal year-month of the next period (fiscal strategies only).
    pub fn fiscal_anchor(&self) -> Option<YearMonth> {
        self.position.fiscal_anchor
    }

    /// Boundaries of the last produced period.
    pub fn current(&self) -> Option<DateRange> {
        self.current
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    pub fn logging(&self) -> bool {
        self.logging
    }

    pub fn set_logging(&mut self, logging: bool) {
        self.logging = logging;
    }
}

impl fmt::Debug for PeriodIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodIterator")
            .field("kind", &self.kind)
            .field("direction", &self.direction)
            .field("iteration_count", &self.iteration_count)
            .field("completed_count", &self.completed_count)
            .field("cursor", &self.position.cursor)
            .field("fiscal_anchor", &self.position.fiscal_anchor)
            .field("current", &self.current)
            .field("padding", &self.padding)
            .field("fiscal", &self.fiscal.as_ref().map(|c| c.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn zero_iterations_is_exhausted_without_mutation() {
        let mut it = PeriodIterator::builder(PeriodKind::CalendarMonth, d(2023, 5, 17), 0)
            .build()
            .unwrap();
        assert!(it.advance().unwrap().is_none());
        assert_eq!(it.cursor(), d(2023, 5, 17));
        assert_eq!(it.completed_count(), 0);
        assert!(it.current().is_none());
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let err = PeriodIterator::builder(PeriodKind::MultiDay { days: 0 }, d(2023, 5, 17), 3)
            .build()
            .unwrap_err();
        assert_eq!(err, PeriodError::ZeroChunkSize);
    }

    #[test]
    fn fiscal_kind_requires_calendar() {
        let err = PeriodIterator::builder(PeriodKind::FiscalMonth, d(2023, 5, 17), 3)
            .build()
            .unwrap_err();
        assert_eq!(err, PeriodError::MissingFiscalCalendar);
    }

    #[test]
    fn builder_from_str_parses_iso() {
        let it = PeriodIterator::builder_from_str(PeriodKind::Daily, "2023-06-01", 1)
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(it.cursor(), d(2023, 6, 1));

        let err = PeriodIterator::builder_from_str(PeriodKind::Daily, "June 1st", 1)
            .err()
            .unwrap();
        assert!(matches!(err, PeriodError::InvalidDate { .. }));
    }

    #[test]
    fn current_tracks_last_produced_period() {
        let mut it = PeriodIterator::builder(PeriodKind::CalendarMonth, d(2023, 5, 17), 2)
            .direction(Direction::Forward)
            .logging(false)
            .build()
            .unwrap();
        it.advance().unwrap();
        assert_eq!(it.current(), Some(DateRange::new(d(2023, 5, 1), d(2023, 5, 31))));
        assert_eq!(it.cursor(), d(2023, 6, 1));
        assert_eq!(it.remaining(), 1);
    }

    #[test]
    fn complete_periods_skips_partial_month_backward() {
        let mut it = PeriodIterator::builder(PeriodKind::CalendarMonth, d(2023, 6, 15), 2)
            .complete_periods(true)
            .logging(false)
            .build()
            .unwrap();
        assert_eq!(it.completed_count(), 0);
        let first = it.advance().unwrap().unwrap();
        assert_eq!(first.start_date, d(2023, 5, 1));
        assert_eq!(first.end_date, d(2023, 5, 31));
    }

    #[test]
    fn complete_periods_keeps_month_ending_on_start() {
        let mut it = PeriodIterator::builder(PeriodKind::CalendarMonth, d(2023, 6, 30), 1)
            .complete_periods(true)
            .logging(false)
            .build()
            .unwrap();
        assert_eq!(it.advance().unwrap().unwrap().start_date, d(2023, 6, 1));
    }

    #[test]
    fn complete_periods_ignored_forward() {
        let mut it = PeriodIterator::builder(PeriodKind::CalendarMonth, d(2023, 6, 15), 1)
            .direction(Direction::Forward)
            .complete_periods(true)
            .logging(false)
            .build()
            .unwrap();
        assert_eq!(it.advance().unwrap().unwrap().start_date, d(2023, 6, 1));
    }

    #[test]
    fn complete_periods_with_zero_iterations_terminates() {
        let it = PeriodIterator::builder(PeriodKind::BillCycle, d(2023, 6, 15), 0)
            .complete_periods(true)
            .build()
            .unwrap();
        assert!(it.is_exhausted());
        assert_eq!(it.cursor(), d(2023, 6, 15));
    }

    #[test]
    fn zero_iteration_multi_day_skips_date_arithmetic() {
        // Pre-shifting a backward chunk from the first representable date
        // would leave the calendar.
        for complete in [false, true] {
            let kind = PeriodKind::MultiDay { days: 7 };
            let mut it = PeriodIterator::builder(kind, NaiveDate::MIN, 0)
                .direction(Direction::Backward)
                .complete_periods(complete)
                .logging(false)
                .build()
                .unwrap();
            assert_eq!(it.cursor(), NaiveDate::MIN);
            assert!(it.advance().unwrap().is_none());
            assert_eq!(it.completed_count(), 0);
        }
    }
}
