//! Query executors: the boundary to whatever actually runs SQL.
//!
//! The runner hands every rendered [`Statement`] to a [`QueryExecutor`].
//! Two implementations ship with the crate:
//! - [`DryRunExecutor`] records statements and logs them, touching nothing.
//! - [`FileExecutor`] writes each statement to
//!   `<root>/<table>/<start>_<end>.sql` for review or hand-off to another tool.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::query::{QueryTarget, Statement};

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("execution of '{table}' failed: {reason}")]
    Failed { table: String, reason: String },
}

/// Runs rendered statements. A failure aborts the backfill.
pub trait QueryExecutor {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn execute(&mut self, statement: &Statement) -> Result<(), ExecutorError>;
}

impl<E: QueryExecutor + ?Sized> QueryExecutor for Box<E> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn execute(&mut self, statement: &Statement) -> Result<(), ExecutorError> {
        (**self).execute(statement)
    }
}

/// Records statements without running them.
#[derive(Debug, Default)]
pub struct DryRunExecutor {
    statements: Vec<Statement>,
}

impl DryRunExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<Statement> {
        self.statements
    }
}

impl QueryExecutor for DryRunExecutor {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn execute(&mut self, statement: &Statement) -> Result<(), ExecutorError> {
        tracing::info!(table = %statement.table, target = %statement.target, "dry run, not executed");
        tracing::debug!("{}", statement.sql);
        self.statements.push(statement.clone());
        Ok(())
    }
}

/// Writes one `.sql` file per statement.
#[derive(Debug)]
pub struct FileExecutor {
    root: PathBuf,
    written: Vec<PathBuf>,
}

impl FileExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            written: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Files written so far, in execution order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Destination for `statement`. One-off statements land in `once.sql`.
    pub fn path_for(&self, statement: &Statement) -> PathBuf {
        let file = match statement.period {
            Some(range) => format!("{}_{}.sql", range.start, range.end),
            None => "once.sql".to_string(),
        };
        self.root.join(&statement.table).join(file)
    }
}

impl QueryExecutor for FileExecutor {
    fn name(&self) -> &str {
        "files"
    }

    fn execute(&mut self, statement: &Statement) -> Result<(), ExecutorError> {
        let path = self.path_for(statement);
        let io_err = |source| ExecutorError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let mut body = String::new();
        if let QueryTarget::Temp { qualified } = &statement.target {
            body.push_str(&format!("-- target: {qualified}\n"));
        }
        body.push_str(&statement.sql);
        if !body.ends_with('\n') {
            body.push('\n');
        }
        fs::write(&path, body).map_err(io_err)?;

        tracing::info!(table = %statement.table, path = %path.display(), "statement written");
        self.written.push(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backfill_core::DateRange;
    use chrono::NaiveDate;

    fn statement(target: QueryTarget, period: Option<DateRange>) -> Statement {
        Statement {
            table: "churn".into(),
            sql: "select 1".into(),
            target,
            period,
        }
    }

    #[test]
    fn dry_run_records_in_order() {
        let mut exec = DryRunExecutor::new();
        exec.execute(&statement(QueryTarget::Direct, None)).unwrap();
        exec.execute(&statement(QueryTarget::Direct, None)).unwrap();
        assert_eq!(exec.statements().len(), 2);
        assert_eq!(exec.name(), "dry-run");
    }

    #[test]
    fn file_executor_names_by_period() {
        let dir = tempfile::tempdir().unwrap();
        let mut exec = FileExecutor::new(dir.path());
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 6, 30).unwrap(),
        );
        exec.execute(&statement(
            QueryTarget::Temp {
                qualified: "scratch.churn".into(),
            },
            Some(range),
        ))
        .unwrap();

        let path = dir.path().join("churn").join("2023-06-01_2023-06-30.sql");
        assert_eq!(exec.written(), &[path.clone()]);
        let body = fs::read_to_string(path).unwrap();
        assert_eq!(body, "-- target: scratch.churn\nselect 1\n");
    }

    #[test]
    fn one_off_statement_goes_to_once_file() {
        let exec = FileExecutor::new("out");
        let path = exec.path_for(&statement(QueryTarget::Direct, None));
        assert_eq!(path, PathBuf::from("out/churn/once.sql"));
    }

    #[test]
    fn boxed_executor_delegates() {
        let mut exec: Box<dyn QueryExecutor> = Box::new(DryRunExecutor::new());
        assert_eq!(exec.name(), "dry-run");
        exec.execute(&statement(QueryTarget::Direct, None)).unwrap();
    }
}
