//! Parameter bundles: the date-derived values emitted per produced period.
//!
//! A bundle is typed while it lives in the core. Downstream consumers see it
//! flattened into a `Params` map (dates rendered `YYYY-MM-DD`) merged over the
//! caller's base parameters.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::calendar::{first_of_month, shift_days, shift_months, DateRange, DATE_FORMAT};

/// Execution parameters handed to query templates. Sorted for stable logs.
pub type Params = BTreeMap<String, String>;

pub const START_DATE: &str = "start_date";
pub const END_DATE: &str = "end_date";
pub const START_DATE_EXPANDED: &str = "start_date_expanded";
pub const END_DATE_EXPANDED: &str = "end_date_expanded";
pub const MONTH_NAME: &str = "month_name";
pub const YEAR_MONTH: &str = "year_month";
pub const BILL_CYCLE_START_DATE: &str = "bill_cycle_start_date";
pub const BILL_CYCLE_END_DATE: &str = "bill_cycle_end_date";
pub const PERIOD_TAG: &str = "period_tag";

/// Every key a bundle writes, in emission order.
pub const BUNDLE_KEYS: [&str; 9] = [
    START_DATE,
    END_DATE,
    START_DATE_EXPANDED,
    END_DATE_EXPANDED,
    MONTH_NAME,
    YEAR_MONTH,
    BILL_CYCLE_START_DATE,
    BILL_CYCLE_END_DATE,
    PERIOD_TAG,
];

/// Days of lookback/lookahead added around each period for the expanded window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Padding {
    pub before: u32,
    pub after: u32,
}

impl Padding {
    pub const NONE: Padding = Padding {
        before: 0,
        after: 0,
    };

    pub const fn new(before: u32, after: u32) -> Self {
        Self { before, after }
    }
}

impl Default for Padding {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl From<(u32, u32)> for Padding {
    fn from((before, after): (u32, u32)) -> Self {
        Self::new(before, after)
    }
}

/// Label overrides for strategies whose month identity differs from the
/// calendar month of `start_date` (the fiscal strategies).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelOverride {
    pub month_name: String,
    pub year_month: String,
}

/// Date parameters for one produced period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterBundle {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_date_expanded: NaiveDate,
    pub end_date_expanded: NaiveDate,
    pub month_name: String,
    pub year_month: String,
    /// First of the month before `start_date`.
    pub bill_cycle_start_date: NaiveDate,
    /// First of the month containing `end_date`.
    pub bill_cycle_end_date: NaiveDate,
    pub period_tag: String,
}

impl ParameterBundle {
    /// Derive the full bundle for `range`. Returns `None` only when a derived
    /// date falls outside chrono's representable range.
    pub fn build(
        range: DateRange,
        padding: Padding,
        period_tag: &str,
        labels: Option<LabelOverride>,
    ) -> Option<Self> {
        let DateRange { start, end } = range;
        let labels = labels.unwrap_or_else(|| LabelOverride {
            month_name: start.format("%B").to_string(),
            year_month: start.format("%Y-%m").to_string(),
        });

        Some(Self {
            start_date: start,
            end_date: end,
            start_date_expanded: shift_days(start, -i64::from(padding.before))?,
            end_date_expanded: shift_days(end, i64::from(padding.after))?,
            month_name: labels.month_name,
            year_month: labels.year_month,
            bill_cycle_start_date: first_of_month(shift_months(start, -1)?),
            bill_cycle_end_date: first_of_month(end),
            period_tag: period_tag.to_string(),
        })
    }

    pub fn range(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }

    /// Flatten into string parameters.
    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        self.merge_into(&mut params);
        params
    }

    /// Write every bundle key into `params`, replacing existing values.
    pub fn merge_into(&self, params: &mut Params) {
        let date = |d: NaiveDate| d.format(DATE_FORMAT).to_string();
        params.insert(START_DATE.into(), date(self.start_date));
        params.insert(END_DATE.into(), date(self.end_date));
        params.insert(START_DATE_EXPANDED.into(), date(self.start_date_expanded));
        params.insert(END_DATE_EXPANDED.into(), date(self.end_date_expanded));
        params.insert(MONTH_NAME.into(), self.month_name.clone());
        params.insert(YEAR_MONTH.into(), self.year_month.clone());
        params.insert(
            BILL_CYCLE_START_DATE.into(),
            date(self.bill_cycle_start_date),
        );
        params.insert(BILL_CYCLE_END_DATE.into(), date(self.bill_cycle_end_date));
        params.insert(PERIOD_TAG.into(), self.period_tag.clone());
    }
}
