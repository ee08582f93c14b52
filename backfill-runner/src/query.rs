//! Queries and where they come from.
//!
//! A query is either inline SQL with an explicit table name, or a file under
//! the query directory. File names are resolved as
//! `<query_dir>/<name>[-<script_version>].<ext>` with `hql` as the default
//! extension; the table name is the last path segment of the name without
//! its extension (`monthly/churn.hql` writes table `churn`).

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use backfill_core::{DateRange, Params};

use crate::template::{QueryTemplate, TemplateError};

/// Extension assumed when a query file name has none.
pub const DEFAULT_EXTENSION: &str = "hql";

/// Parameter naming the scratch schema for temp-table queries.
pub const TMP_ENV: &str = "tmp_env";

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("read query file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("query '{table}': {source}")]
    Template {
        table: String,
        #[source]
        source: TemplateError,
    },

    #[error("query '{table}' writes a temp table but no 'tmp_env' parameter is set")]
    MissingTmpEnv { table: String },

    #[error("query file name '{0}' has no file stem")]
    InvalidName(String),
}

/// Where a query's text comes from, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QuerySource {
    Inline { name: String, sql: String },
    File { file: String },
}

impl QuerySource {
    pub fn load(&self, query_dir: &Path, script_version: Option<&str>) -> Result<Query, QueryError> {
        match self {
            QuerySource::Inline { name, sql } => Query::inline(name.clone(), sql.clone()),
            QuerySource::File { file } => {
                Query::from_file(&QueryFile::resolve(file, query_dir, script_version)?)
            }
        }
    }
}

/// A query file name resolved against the query directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFile {
    pub path: PathBuf,
    pub table_name: String,
    pub script_version: Option<String>,
}

impl QueryFile {
    pub fn resolve(
        name: &str,
        query_dir: &Path,
        script_version: Option<&str>,
    ) -> Result<Self, QueryError> {
        let relative = Path::new(name);
        let stem = relative
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| QueryError::InvalidName(name.to_string()))?;
        let ext = relative
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or(DEFAULT_EXTENSION);

        let file_name = match script_version {
            Some(version) => format!("{stem}-{version}.{ext}"),
            None => format!("{stem}.{ext}"),
        };
        let dir = match relative.parent() {
            Some(parent) => query_dir.join(parent),
            None => query_dir.to_path_buf(),
        };

        Ok(Self {
            path: dir.join(file_name),
            table_name: stem.to_string(),
            script_version: script_version.map(str::to_string),
        })
    }

    pub fn read(&self) -> Result<String, QueryError> {
        fs::read_to_string(&self.path).map_err(|source| QueryError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// Where a rendered statement's result goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum QueryTarget {
    /// The statement manages its own output.
    Direct,
    /// The result is saved as `<tmp_env>.<table>`, replacing any previous copy.
    Temp { qualified: String },
}

impl fmt::Display for QueryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryTarget::Direct => write!(f, "direct"),
            QueryTarget::Temp { qualified } => write!(f, "temp table {qualified}"),
        }
    }
}

/// A fully rendered query, ready for an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub table: String,
    pub sql: String,
    pub target: QueryTarget,
    /// Period the statement was rendered for; `None` for one-off runs.
    pub period: Option<DateRange>,
}

impl Statement {
    /// BLAKE3 hex digest of the rendered SQL.
    pub fn hash(&self) -> String {
        blake3::hash(self.sql.as_bytes()).to_hex().to_string()
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    template: QueryTemplate,
    table_name: String,
    temp: bool,
}

impl Query {
    pub fn inline(table_name: impl Into<String>, sql: impl Into<String>) -> Result<Self, QueryError> {
        let table_name = table_name.into();
        let template = QueryTemplate::parse(sql).map_err(|source| QueryError::Template {
            table: table_name.clone(),
            source,
        })?;
        Ok(Self {
            template,
            table_name,
            temp: false,
        })
    }

    pub fn from_file(file: &QueryFile) -> Result<Self, QueryError> {
        let sql = file.read()?;
        tracing::debug!(path = %file.path.display(), table = %file.table_name, "loaded query file");
        Self::inline(file.table_name.clone(), sql)
    }

    pub fn with_temp(mut self, temp: bool) -> Self {
        self.temp = temp;
        self
    }

    pub fn set_temp(&mut self, temp: bool) {
        self.temp = temp;
    }

    pub fn temp(&self) -> bool {
        self.temp
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn template(&self) -> &QueryTemplate {
        &self.template
    }

    pub fn target(&self, params: &Params) -> Result<QueryTarget, QueryError> {
        if !self.temp {
            return Ok(QueryTarget::Direct);
        }
        let env = params.get(TMP_ENV).ok_or_else(|| QueryError::MissingTmpEnv {
            table: self.table_name.clone(),
        })?;
        Ok(QueryTarget::Temp {
            qualified: format!("{env}.{}", self.table_name),
        })
    }

    pub fn render(&self, params: &Params, period: Option<DateRange>) -> Result<Statement, QueryError> {
        let sql = self
            .template
            .render(params)
            .map_err(|source| QueryError::Template {
                table: self.table_name.clone(),
                source,
            })?;
        Ok(Statement {
            table: self.table_name.clone(),
            sql,
            target: self.target(params)?,
            period,
        })
    }
}
