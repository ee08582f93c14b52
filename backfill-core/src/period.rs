//! Period strategies: how each kind of period derives its boundaries and
//! moves its cursor.
//!
//! A strategy contributes exactly two things to the shared driver in
//! `iterator.rs`: the `(start, end)` rule for the current position and the
//! one-period step. Everything else (counters, bundles, logging) is shared.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::bundle::LabelOverride;
use crate::calendar::{first_of_month, last_of_month, shift_days, shift_months, DateRange, YearMonth};
use crate::fiscal::{FiscalCalendar, FiscalPeriod};
use crate::iterator::PeriodError;

/// Traversal direction through time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    #[default]
    Backward,
}

impl Direction {
    /// +1 for forward, -1 for backward.
    pub fn sign(self) -> i32 {
        match self {
            Direction::Forward => 1,
            Direction::Backward => -1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, "forward"),
            Direction::Backward => write!(f, "backward"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" | "forwards" => Ok(Direction::Forward),
            "backward" | "backwards" => Ok(Direction::Backward),
            other => Err(format!("unknown direction '{other}' (expected forward or backward)")),
        }
    }
}

/// The six period strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeriodKind {
    /// First through last day of a calendar month.
    CalendarMonth,
    /// First of a month through the 28th of the following month.
    BillCycle,
    /// Fiscal start through fiscal end, as reported by the fiscal calendar.
    FiscalMonth,
    /// Fiscal start through the last calendar day of the fiscal end's month.
    FiscalCalendarMonth,
    /// A single day.
    Daily,
    /// A run of `days` consecutive days.
    MultiDay { days: u32 },
}

impl PeriodKind {
    /// Diagnostic label, also emitted as the `period_tag` parameter.
    pub fn tag(&self) -> &'static str {
        match self {
            PeriodKind::CalendarMonth => "cal",
            PeriodKind::BillCycle => "bill-cycle",
            PeriodKind::FiscalMonth => "fis",
            PeriodKind::FiscalCalendarMonth => "date-range",
            PeriodKind::Daily => "daily",
            PeriodKind::MultiDay { .. } => "multi-day",
        }
    }

    pub fn is_fiscal(&self) -> bool {
        matches!(self, PeriodKind::FiscalMonth | PeriodKind::FiscalCalendarMonth)
    }

    /// Boundaries of the period at `pos`.
    pub(crate) fn bounds(
        &self,
        pos: &Position,
        fiscal: Option<&dyn FiscalCalendar>,
    ) -> Result<DateRange, PeriodError> {
        match *self {
            PeriodKind::CalendarMonth => {
                let start = first_of_month(pos.cursor);
                let end = last_of_month(start).ok_or(PeriodError::DateOutOfRange)?;
                Ok(DateRange::new(start, end))
            }
            PeriodKind::BillCycle => {
                let start = first_of_month(pos.cursor);
                let end = shift_months(start, 1)
                    .and_then(|next| next.with_day(28))
                    .ok_or(PeriodError::DateOutOfRange)?;
                Ok(DateRange::new(start, end))
            }
            PeriodKind::FiscalMonth => {
                let period = lookup(pos, fiscal)?;
                Ok(DateRange::new(period.fiscal_start, period.fiscal_end))
            }
            PeriodKind::FiscalCalendarMonth => {
                let period = lookup(pos, fiscal)?;
                let end = last_of_month(period.fiscal_end).ok_or(PeriodError::DateOutOfRange)?;
                Ok(DateRange::new(period.fiscal_start, end))
            }
            PeriodKind::Daily => Ok(DateRange::new(pos.cursor, pos.cursor)),
            PeriodKind::MultiDay { days } => {
                let end = shift_days(pos.cursor, i64::from(days) - 1)
                    .ok_or(PeriodError::DateOutOfRange)?;
                Ok(DateRange::new(pos.cursor, end))
            }
        }
    }

    /// Move `pos` one period in `direction`.
    pub(crate) fn step(&self, pos: &mut Position, direction: Direction) -> Result<(), PeriodError> {
        let sign = direction.sign();
        match *self {
            PeriodKind::CalendarMonth | PeriodKind::BillCycle => {
                pos.cursor = shift_months(first_of_month(pos.cursor), sign)
                    .ok_or(PeriodError::DateOutOfRange)?;
            }
            PeriodKind::FiscalMonth | PeriodKind::FiscalCalendarMonth => {
                let anchor = pos.fiscal_anchor.unwrap_or_else(|| YearMonth::of(pos.cursor));
                pos.fiscal_anchor = Some(anchor.shift(sign).ok_or(PeriodError::DateOutOfRange)?);
            }
            PeriodKind::Daily => {
                pos.cursor =
                    shift_days(pos.cursor, i64::from(sign)).ok_or(PeriodError::DateOutOfRange)?;
            }
            PeriodKind::MultiDay { days } => {
                pos.cursor = shift_days(pos.cursor, i64::from(sign) * i64::from(days))
                    .ok_or(PeriodError::DateOutOfRange)?;
            }
        }
        Ok(())
    }

    /// Month labels for the bundle when they differ from `start_date`'s month.
    pub(crate) fn labels(&self, pos: &Position) -> Option<LabelOverride> {
        if !self.is_fiscal() {
            return None;
        }
        let anchor = pos.fiscal_anchor?;
        Some(LabelOverride {
            month_name: anchor.month_name(),
            year_month: anchor.to_string(),
        })
    }

    /// Position for a traversal of `iterations` periods starting at `start`.
    /// An empty traversal keeps `start` as is.
    pub(crate) fn initial_position(
        &self,
        start: NaiveDate,
        direction: Direction,
        iterations: u32,
    ) -> Result<Position, PeriodError> {
        let cursor = match (*self, direction) {
            // The first backward chunk still ends on the requested start date.
            (PeriodKind::MultiDay { days }, Direction::Backward) if iterations > 0 => {
                shift_days(start, -(i64::from(days) - 1)).ok_or(PeriodError::DateOutOfRange)?
            }
            _ => start,
        };
        let fiscal_anchor = self.is_fiscal().then(|| YearMonth::of(cursor));
        Ok(Position {
            cursor,
            fiscal_anchor,
        })
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodKind::MultiDay { days } => write!(f, "multi-day({days})"),
            other => write!(f, "{}", other.tag()),
        }
    }
}

/// Mutable traversal state of one iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Position {
    pub cursor: NaiveDate,
    /// Fiscal strategies only; stepped independently of `cursor`.
    pub fiscal_anchor: Option<YearMonth>,
}

fn lookup(pos: &Position, fiscal: Option<&dyn FiscalCalendar>) -> Result<FiscalPeriod, PeriodError> {
    let calendar = fiscal.ok_or(PeriodError::MissingFiscalCalendar)?;
    let anchor = pos.fiscal_anchor.unwrap_or_else(|| YearMonth::of(pos.cursor));
    Ok(calendar.lookup(anchor)?)
}
