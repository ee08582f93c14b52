//! Round coordinator: drives several period iterators in lockstep.
//!
//! One round walks the iterator list in order. Each live iterator is advanced
//! once; its bundle is merged over the base parameters and handed to every
//! sink. The first iterator that turns out to be exhausted is marked and the
//! rest of that round is abandoned, so iterators later in the list sit that
//! round out. Marked iterators are skipped in later rounds. The run ends once
//! every iterator is marked.
//!
//! The abandoned-round behavior is long-standing: backfills have been planned
//! around it, so it is kept as is even though it means an iterator after an
//! exhausted one can lag a round behind its neighbours.

use thiserror::Error;

use crate::bundle::{ParameterBundle, Params};
use crate::iterator::{PeriodError, PeriodIterator};

/// Returned by [`RoundCoordinator::new`] for an empty iterator list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("coordinator needs at least one period iterator")]
pub struct EmptyIteratorList;

#[derive(Debug, Error)]
pub enum CoordinatorError<E>
where
    E: std::error::Error + 'static,
{
    #[error("period iterator {index} failed: {source}")]
    Period {
        index: usize,
        #[source]
        source: PeriodError,
    },

    #[error("sink failed on iterator {index}: {source}")]
    Sink {
        index: usize,
        #[source]
        source: E,
    },
}

/// Downstream consumer of merged parameters (e.g. a query runner).
pub trait PeriodSink {
    type Error: std::error::Error + 'static;

    /// `index` is the producing iterator's position in the coordinator's list.
    fn on_period(
        &mut self,
        index: usize,
        params: &Params,
        bundle: &ParameterBundle,
    ) -> Result<(), Self::Error>;
}

impl<F, E> PeriodSink for F
where
    F: FnMut(usize, &Params, &ParameterBundle) -> Result<(), E>,
    E: std::error::Error + 'static,
{
    type Error = E;

    fn on_period(
        &mut self,
        index: usize,
        params: &Params,
        bundle: &ParameterBundle,
    ) -> Result<(), E> {
        self(index, params, bundle)
    }
}

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunSummary {
    /// Rounds started, including the final one that only discovered exhaustion.
    pub rounds: u32,
    /// Produced periods per iterator, in list order.
    pub advances: Vec<u32>,
    /// Sink invocations across all sinks.
    pub dispatches: u64,
}

#[derive(Debug)]
pub struct RoundCoordinator {
    iterators: Vec<PeriodIterator>,
    exhausted: Vec<bool>,
}

impl RoundCoordinator {
    /// Takes ownership of the iterators and silences their own per-period
    /// logging; the coordinator logs each dispatch instead.
    pub fn new(mut iterators: Vec<PeriodIterator>) -> Result<Self, EmptyIteratorList> {
        if iterators.is_empty() {
            return Err(EmptyIteratorList);
        }
        for iter in &mut iterators {
            iter.set_logging(false);
        }
        let exhausted = vec![false; iterators.len()];
        Ok(Self {
            iterators,
            exhausted,
        })
    }

    pub fn iterators(&self) -> &[PeriodIterator] {
        &self.iterators
    }

    pub fn is_finished(&self) -> bool {
        self.exhausted.iter().all(|&done| done)
    }

    /// Run rounds until every iterator is exhausted.
    ///
    /// Sink and iterator failures abort the run immediately. Iterators already
    /// advanced in the failing round stay advanced.
    pub fn run<S: PeriodSink>(
        &mut self,
        base: &mut Params,
        sinks: &mut [S],
    ) -> Result<RunSummary, CoordinatorError<S::Error>> {
        let mut summary = RunSummary {
            advances: vec![0; self.iterators.len()],
            ..RunSummary::default()
        };

        while !self.is_finished() {
            summary.rounds += 1;
            self.round(base, sinks, &mut summary)?;
        }

        tracing::info!(
            rounds = summary.rounds,
            dispatches = summary.dispatches,
            "backfill rounds complete"
        );
        Ok(summary)
    }

    fn round<S: PeriodSink>(
        &mut self,
        base: &mut Params,
        sinks: &mut [S],
        summary: &mut RunSummary,
    ) -> Result<(), CoordinatorError<S::Error>> {
        for (index, iter) in self.iterators.iter_mut().enumerate() {
            if self.exhausted[index] {
                continue;
            }

            let bundle = match iter
                .advance()
                .map_err(|source| CoordinatorError::Period { index, source })?
            {
                Some(bundle) => bundle,
                None => {
                    self.exhausted[index] = true;
                    tracing::debug!(
                        index,
                        period_tag = iter.period_tag(),
                        round = summary.rounds,
                        "iterator exhausted, ending round"
                    );
                    return Ok(());
                }
            };
            summary.advances[index] += 1;

            bundle.merge_into(base);
            tracing::info!(
                index,
                period_tag = %bundle.period_tag,
                "executing date range ({}, {})",
                bundle.start_date,
                bundle.end_date
            );
            tracing::debug!(params = ?base, "merged parameters");

            for sink in sinks.iter_mut() {
                sink.on_period(index, base, &bundle)
                    .map_err(|source| CoordinatorError::Sink { index, source })?;
                summary.dispatches += 1;
            }
        }
        Ok(())
    }
}
