//! Backfill Runner: configuration, query templates, executors, run history.
//!
//! This crate builds on `backfill-core` to provide:
//! - TOML configuration with content-hashed run ids
//! - Brace-placeholder query templates loaded inline or from versioned files
//! - The query executor boundary with dry-run and file-writing executors
//! - A runner that acts as the round coordinator's sink
//! - JSONL run history and resume planning
//! - Fiscal calendars loaded from CSV

pub mod config;
pub mod executor;
pub mod fiscal_csv;
pub mod history;
pub mod query;
pub mod runner;
pub mod template;

pub use config::{BackfillConfig, ConfigError, IteratorConfig, QueryConfig, RunId, SCRIPT_VERSION_ENV};
pub use executor::{DryRunExecutor, ExecutorError, FileExecutor, QueryExecutor};
pub use fiscal_csv::{load_fiscal_csv, read_fiscal_csv, FiscalCsvError};
pub use history::{HistoryEntry, ResumePlan, RunHistory};
pub use query::{Query, QueryError, QueryFile, QuerySource, QueryTarget, Statement};
pub use runner::{BackfillRunner, Elapsed, RunError};
pub use template::{QueryTemplate, TemplateError};
