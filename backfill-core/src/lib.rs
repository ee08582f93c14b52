//! Backfill Core: period iterators and the round coordinator.
//!
//! This crate contains the date machinery behind a backfill:
//! - Calendar arithmetic and the `YearMonth` / `DateRange` value types
//! - The fiscal calendar boundary (`FiscalCalendar`) and an in-memory table
//! - Parameter bundles emitted once per produced period
//! - A single period-iterator driver with six strategies (calendar month,
//!   bill cycle, fiscal month, fiscal calendar month, daily, multi-day)
//! - The round coordinator that steps several iterators in lockstep

pub mod bundle;
pub mod calendar;
pub mod coordinator;
pub mod fiscal;
pub mod iterator;
pub mod period;

pub use bundle::{Padding, ParameterBundle, Params, BUNDLE_KEYS};
pub use calendar::{parse_date, DateRange, YearMonth};
pub use coordinator::{CoordinatorError, EmptyIteratorList, PeriodSink, RoundCoordinator, RunSummary};
pub use fiscal::{FiscalCalendar, FiscalError, FiscalPeriod, FiscalTable};
pub use iterator::{PeriodError, PeriodIterator, PeriodIteratorBuilder};
pub use period::{Direction, PeriodKind};
