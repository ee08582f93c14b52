//! Backfill configuration loaded from TOML.
//!
//! A config file names the base parameters, the period iterators, the queries
//! to run for each period, and where query files, the fiscal calendar and the
//! run history live. Relative paths resolve against the config file's
//! directory.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use backfill_core::{
    Direction, FiscalCalendar, Padding, Params, PeriodError, PeriodIterator, PeriodKind,
};

use crate::fiscal_csv::{load_fiscal_csv, FiscalCsvError};
use crate::query::{Query, QueryError, QuerySource};

/// Environment variable that overrides `backfill.script_version`.
pub const SCRIPT_VERSION_ENV: &str = "SCRIPT_VERSION";

/// Content hash identifying a backfill configuration.
pub type RunId = String;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config defines no queries")]
    NoQueries,

    #[error("iterator {index}: multi_day needs days >= 1")]
    ZeroChunkSize { index: usize },

    #[error("iterator {index} ({kind}) needs a [fiscal] calendar")]
    MissingFiscal { index: usize, kind: PeriodKind },

    #[error("iterator {index}: {source}")]
    Iterator {
        index: usize,
        #[source]
        source: PeriodError,
    },

    #[error(transparent)]
    Fiscal(#[from] FiscalCsvError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Top-level config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackfillConfig {
    #[serde(default)]
    pub backfill: BackfillSection,

    /// Base parameters available to every query.
    #[serde(default)]
    pub params: Params,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fiscal: Option<FiscalSection>,

    #[serde(default)]
    pub iterators: Vec<IteratorConfig>,

    #[serde(default)]
    pub queries: Vec<QueryConfig>,

    #[serde(default)]
    pub runner: RunnerSection,

    /// Directory relative paths resolve against.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// `[backfill]`: defaults shared by every iterator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillSection {
    /// Defaults to the caller-supplied "today".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,

    #[serde(default)]
    pub direction: Direction,

    #[serde(default)]
    pub complete_periods: bool,

    #[serde(default = "default_true")]
    pub log_periods: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_version: Option<String>,
}

impl Default for BackfillSection {
    fn default() -> Self {
        Self {
            start_date: None,
            direction: Direction::default(),
            complete_periods: false,
            log_periods: true,
            script_version: None,
        }
    }
}

/// `[fiscal]`: CSV with columns `year,month,fiscal_start,fiscal_end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiscalSection {
    pub calendar: PathBuf,
}

/// One `[[iterators]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IteratorConfig {
    #[serde(flatten)]
    pub kind: PeriodKind,

    pub iterations: u32,

    #[serde(default)]
    pub padding: Padding,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_periods: Option<bool>,
}

/// One `[[queries]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(flatten)]
    pub source: QuerySource,

    #[serde(default)]
    pub temp: bool,
}

/// `[runner]`: file locations and overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSection {
    #[serde(default = "default_query_dir")]
    pub query_dir: PathBuf,

    /// Overrides every query's `temp` flag when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_temp: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<PathBuf>,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            query_dir: default_query_dir(),
            force_temp: None,
            history: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_query_dir() -> PathBuf {
    PathBuf::from("hql")
}

impl BackfillConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(config)
    }

    /// Parse and validate. Relative paths resolve against the working directory.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queries.is_empty() {
            return Err(ConfigError::NoQueries);
        }
        for (index, iter) in self.iterators.iter().enumerate() {
            if let PeriodKind::MultiDay { days: 0 } = iter.kind {
                return Err(ConfigError::ZeroChunkSize { index });
            }
            if iter.kind.is_fiscal() && self.fiscal.is_none() {
                return Err(ConfigError::MissingFiscal {
                    index,
                    kind: iter.kind,
                });
            }
        }
        Ok(())
    }

    /// BLAKE3 hash of the canonical JSON form. Two identical configs share a
    /// run id, so their history entries line up for resuming.
    pub fn run_id(&self) -> Result<RunId, ConfigError> {
        let json = serde_json::to_string(self)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }

    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Script version to append to query file names. `env_override`
    /// (normally the `SCRIPT_VERSION` variable) wins over the file.
    pub fn script_version(&self, env_override: Option<String>) -> Option<String> {
        env_override
            .filter(|v| !v.is_empty())
            .or_else(|| self.backfill.script_version.clone())
    }

    pub fn history_path(&self) -> Option<PathBuf> {
        self.runner.history.as_deref().map(|p| self.resolve_path(p))
    }

    /// Load the fiscal calendar, if one is configured.
    pub fn load_fiscal(&self) -> Result<Option<Arc<dyn FiscalCalendar>>, ConfigError> {
        let Some(section) = &self.fiscal else {
            return Ok(None);
        };
        let table = load_fiscal_csv(&self.resolve_path(&section.calendar))?;
        Ok(Some(Arc::new(table)))
    }

    /// Load every query, applying `runner.force_temp`.
    pub fn load_queries(&self, script_version: Option<&str>) -> Result<Vec<Query>, ConfigError> {
        let query_dir = self.resolve_path(&self.runner.query_dir);
        self.queries
            .iter()
            .map(|q| {
                let temp = self.runner.force_temp.unwrap_or(q.temp);
                Ok(q.source.load(&query_dir, script_version)?.with_temp(temp))
            })
            .collect()
    }

    /// Effective start date of iterator `index`.
    pub fn start_date(&self, index: usize, today: NaiveDate) -> NaiveDate {
        self.iterators
            .get(index)
            .and_then(|i| i.start_date)
            .or(self.backfill.start_date)
            .unwrap_or(today)
    }

    /// Build the configured iterators. `today` fills in any missing start date.
    pub fn build_iterators(
        &self,
        today: NaiveDate,
        fiscal: Option<Arc<dyn FiscalCalendar>>,
    ) -> Result<Vec<PeriodIterator>, ConfigError> {
        self.iterators
            .iter()
            .enumerate()
            .map(|(index, cfg)| {
                let mut builder =
                    PeriodIterator::builder(cfg.kind, self.start_date(index, today), cfg.iterations)
                        .direction(cfg.direction.unwrap_or(self.backfill.direction))
                        .padding(cfg.padding)
                        .complete_periods(
                            cfg.complete_periods
                                .unwrap_or(self.backfill.complete_periods),
                        )
                        .logging(self.backfill.log_periods);
                if let Some(calendar) = &fiscal {
                    builder = builder.fiscal_calendar(Arc::clone(calendar));
                }
                builder
                    .build()
                    .map_err(|source| ConfigError::Iterator { index, source })
            })
            .collect()
    }
}
