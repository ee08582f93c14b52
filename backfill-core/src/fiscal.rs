//! Fiscal calendar boundary: the oracle consulted by the fiscal strategies.
//!
//! The core never computes fiscal boundaries itself. It asks a
//! `FiscalCalendar` for the period that belongs to a calendar year-month and
//! propagates any failure unchanged. Lookups must be pure: the fiscal
//! strategies ask for the same year-month from `peek` and again from the
//! following `advance`.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::YearMonth;

/// Fiscal period boundaries for one fiscal month (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalPeriod {
    pub fiscal_start: NaiveDate,
    pub fiscal_end: NaiveDate,
}

impl FiscalPeriod {
    pub fn new(fiscal_start: NaiveDate, fiscal_end: NaiveDate) -> Result<Self, FiscalError> {
        if fiscal_end < fiscal_start {
            return Err(FiscalError::InvalidPeriod {
                fiscal_start,
                fiscal_end,
            });
        }
        Ok(Self {
            fiscal_start,
            fiscal_end,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FiscalError {
    #[error("no fiscal period known for {0}")]
    Unknown(YearMonth),

    #[error("fiscal period ends ({fiscal_end}) before it starts ({fiscal_start})")]
    InvalidPeriod {
        fiscal_start: NaiveDate,
        fiscal_end: NaiveDate,
    },

    #[error("duplicate fiscal period for {0}")]
    Duplicate(YearMonth),

    #[error("fiscal calendar error: {0}")]
    Other(String),
}

/// Maps a calendar year-month to the fiscal period that represents it.
pub trait FiscalCalendar: Send + Sync {
    /// Human-readable name used in diagnostics.
    fn name(&self) -> &str {
        "custom"
    }

    fn lookup(&self, period: YearMonth) -> Result<FiscalPeriod, FiscalError>;
}

impl<F> FiscalCalendar for F
where
    F: Fn(YearMonth) -> Result<FiscalPeriod, FiscalError> + Send + Sync,
{
    fn lookup(&self, period: YearMonth) -> Result<FiscalPeriod, FiscalError> {
        self(period)
    }
}

/// In-memory fiscal calendar keyed by year-month.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FiscalTable {
    periods: BTreeMap<YearMonth, FiscalPeriod>,
}

impl FiscalTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a period. Each year-month may be registered once.
    pub fn insert(&mut self, month: YearMonth, period: FiscalPeriod) -> Result<(), FiscalError> {
        if self.periods.contains_key(&month) {
            return Err(FiscalError::Duplicate(month));
        }
        self.periods.insert(month, period);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// First and last year-month covered, if any.
    pub fn coverage(&self) -> Option<(YearMonth, YearMonth)> {
        let first = self.periods.keys().next()?;
        let last = self.periods.keys().next_back()?;
        Some((*first, *last))
    }
}

impl FromIterator<(YearMonth, FiscalPeriod)> for FiscalTable {
    /// Later entries replace earlier ones for the same year-month.
    fn from_iter<I: IntoIterator<Item = (YearMonth, FiscalPeriod)>>(iter: I) -> Self {
        Self {
            periods: iter.into_iter().collect(),
        }
    }
}

impl FiscalCalendar for FiscalTable {
    fn name(&self) -> &str {
        "table"
    }

    fn lookup(&self, period: YearMonth) -> Result<FiscalPeriod, FiscalError> {
        self.periods
            .get(&period)
            .copied()
            .ok_or(FiscalError::Unknown(period))
    }
}

impl fmt::Display for FiscalPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fiscal [{}, {}]", self.fiscal_start, self.fiscal_end)
    }
}
