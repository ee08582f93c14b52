//! Backfill runner: renders queries against period parameters and executes
//! them in order.
//!
//! Without iterators, [`BackfillRunner::run_once`] executes each query once
//! against the base parameters. With a [`RoundCoordinator`],
//! [`BackfillRunner::run`] acts as the coordinator's sink: every dispatched
//! period runs the full query chain before the next period is produced.

use std::io;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;

use backfill_core::{
    CoordinatorError, ParameterBundle, Params, PeriodError, PeriodSink, RoundCoordinator,
    RunSummary,
};

use crate::config::RunId;
use crate::executor::{ExecutorError, QueryExecutor};
use crate::history::{HistoryEntry, RunHistory};
use crate::query::{Query, QueryError, QueryTarget};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("write run history: {0}")]
    History(#[from] io::Error),

    #[error("period iterator {index} failed: {source}")]
    Period {
        index: usize,
        #[source]
        source: PeriodError,
    },
}

impl From<CoordinatorError<RunError>> for RunError {
    fn from(err: CoordinatorError<RunError>) -> Self {
        match err {
            CoordinatorError::Period { index, source } => RunError::Period { index, source },
            CoordinatorError::Sink { source, .. } => source,
        }
    }
}

/// Wall time of one execution, rounded to milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Elapsed {
    pub seconds: f64,
    pub minutes: f64,
}

impl From<Duration> for Elapsed {
    fn from(d: Duration) -> Self {
        let round3 = |x: f64| (x * 1000.0).round() / 1000.0;
        Self {
            seconds: round3(d.as_secs_f64()),
            minutes: round3(d.as_secs_f64() / 60.0),
        }
    }
}

/// Owns the query chain and the executor that runs it.
pub struct BackfillRunner<X> {
    queries: Vec<Query>,
    executor: X,
    history: Option<(RunHistory, RunId)>,
    executed: u64,
}

impl<X: QueryExecutor> BackfillRunner<X> {
    pub fn new(queries: Vec<Query>, executor: X) -> Self {
        Self {
            queries,
            executor,
            history: None,
            executed: 0,
        }
    }

    /// Journal every successful period execution under `run_id`.
    pub fn with_history(mut self, history: RunHistory, run_id: RunId) -> Self {
        self.history = Some((history, run_id));
        self
    }

    /// Override every query's temp flag.
    pub fn force_temp(&mut self, temp: bool) {
        for query in &mut self.queries {
            query.set_temp(temp);
        }
    }

    pub fn queries(&self) -> &[Query] {
        &self.queries
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    pub fn into_executor(self) -> X {
        self.executor
    }

    /// Statements executed so far.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Execute every query once against `params`.
    pub fn run_once(&mut self, params: &Params) -> Result<(), RunError> {
        self.execute_chain(params, None)
    }

    /// Drive `coordinator` to completion, running the query chain per period.
    /// The base parameters end up holding the last period's values.
    pub fn run(
        &mut self,
        params: &mut Params,
        coordinator: &mut RoundCoordinator,
    ) -> Result<RunSummary, RunError> {
        let summary = coordinator.run(params, std::slice::from_mut(self))?;
        tracing::info!(
            rounds = summary.rounds,
            statements = self.executed,
            executor = self.executor.name(),
            "backfill finished"
        );
        Ok(summary)
    }

    /// `period` carries the producing iterator's index alongside its bundle.
    fn execute_chain(
        &mut self,
        params: &Params,
        period: Option<(usize, &ParameterBundle)>,
    ) -> Result<(), RunError> {
        let range = period.map(|(_, bundle)| bundle.range());
        for query in &self.queries {
            let statement = query.render(params, range)?;
            match &statement.target {
                QueryTarget::Temp { qualified } => {
                    tracing::info!(table = %statement.table, "executing TEMP query into {qualified}")
                }
                QueryTarget::Direct => tracing::info!(table = %statement.table, "executing query"),
            }
            tracing::debug!("{}", statement.sql);

            let started = Instant::now();
            self.executor.execute(&statement)?;
            let duration = started.elapsed();
            let elapsed = Elapsed::from(duration);
            self.executed += 1;
            tracing::info!(
                table = %statement.table,
                "finished in {:.3} seconds [{:.3} minutes]",
                elapsed.seconds,
                elapsed.minutes
            );

            if let (Some((history, run_id)), Some((iterator, bundle))) = (&self.history, period) {
                history.append(&HistoryEntry {
                    run_id: run_id.clone(),
                    iterator,
                    table: statement.table.clone(),
                    period_tag: bundle.period_tag.clone(),
                    start_date: bundle.start_date,
                    end_date: bundle.end_date,
                    year_month: bundle.year_month.clone(),
                    statement_hash: statement.hash(),
                    elapsed_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
                    completed_at: Utc::now(),
                })?;
            }
        }
        Ok(())
    }
}

impl<X: QueryExecutor> PeriodSink for BackfillRunner<X> {
    type Error = RunError;

    fn on_period(
        &mut self,
        index: usize,
        params: &Params,
        bundle: &ParameterBundle,
    ) -> Result<(), RunError> {
        self.execute_chain(params, Some((index, bundle)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::DryRunExecutor;

    #[test]
    fn elapsed_rounds_to_three_places() {
        let e = Elapsed::from(Duration::from_millis(90_123));
        assert_eq!(e.seconds, 90.123);
        assert_eq!(e.minutes, 1.502);
    }

    #[test]
    fn run_once_executes_each_query_in_order() {
        let queries = vec![
            Query::inline("a", "select '{x}'").unwrap(),
            Query::inline("b", "select '{x}', 2").unwrap(),
        ];
        let mut runner = BackfillRunner::new(queries, DryRunExecutor::new());
        let mut params = Params::new();
        params.insert("x".into(), "1".into());
        runner.run_once(&params).unwrap();

        let tables: Vec<&str> = runner
            .executor()
            .statements()
            .iter()
            .map(|s| s.table.as_str())
            .collect();
        assert_eq!(tables, vec!["a", "b"]);
        assert_eq!(runner.executed(), 2);
        assert!(runner.executor().statements()[0].period.is_none());
    }

    #[test]
    fn force_temp_overrides_queries() {
        let queries = vec![Query::inline("a", "select 1").unwrap()];
        let mut runner = BackfillRunner::new(queries, DryRunExecutor::new());
        runner.force_temp(true);
        let err = runner.run_once(&Params::new()).unwrap_err();
        assert!(matches!(err, RunError::Query(QueryError::MissingTmpEnv { .. })));
        assert_eq!(runner.executed(), 0);
    }

    #[test]
    fn coordinator_sink_error_is_unwrapped() {
        let err: RunError = CoordinatorError::Sink {
            index: 2,
            source: RunError::Executor(ExecutorError::Failed {
                table: "t".into(),
                reason: "boom".into(),
            }),
        }
        .into();
        assert!(matches!(err, RunError::Executor(_)));
    }
}
