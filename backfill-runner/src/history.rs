//! Run history: JSONL append-only journal of completed query executions.
//!
//! One JSON object per line, appended after every successful execution.
//! A backfill that dies halfway leaves a journal from which a [`ResumePlan`]
//! can work out where to pick up again.

use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use backfill_core::{Direction, PeriodKind, YearMonth};

/// One successful query execution for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Hash of the configuration that produced the run.
    pub run_id: String,
    /// Position of the producing iterator in the configured list.
    pub iterator: usize,
    pub table: String,
    pub period_tag: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub year_month: String,
    /// BLAKE3 hex digest of the rendered statement.
    pub statement_hash: String,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// JSONL history file manager.
#[derive(Debug, Clone)]
pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &HistoryEntry) -> io::Result<()> {
        let json = serde_json::to_string(entry)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        file.flush()
    }

    /// Read every entry. A missing file is an empty history; malformed lines
    /// are skipped with a warning.
    pub fn read_all(&self) -> io::Result<Vec<HistoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        let mut entries = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    "skipping malformed history line: {e}"
                ),
            }
        }
        Ok(entries)
    }

    /// Entries belonging to one run.
    pub fn read_run(&self, run_id: &str) -> io::Result<Vec<HistoryEntry>> {
        let mut entries = self.read_all()?;
        entries.retain(|e| e.run_id == run_id);
        Ok(entries)
    }
}

/// Where to restart an interrupted backfill of one iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePlan {
    /// Anchor date of the first period not yet completed. Build the resumed
    /// iterator with `complete_periods` off so this period is not skipped.
    pub next_start: NaiveDate,
    pub completed: u32,
    pub remaining: u32,
}

impl ResumePlan {
    /// Derive a plan from journal entries.
    ///
    /// Only entries journaled by iterator `iterator` count. A period counts as
    /// completed once `last_table` (the final query of the chain) has finished
    /// it. Returns `None` when nothing has completed yet.
    pub fn from_history(
        entries: &[HistoryEntry],
        run_id: &str,
        iterator: usize,
        kind: PeriodKind,
        direction: Direction,
        last_table: &str,
        total: u32,
    ) -> Option<Self> {
        let done: BTreeSet<(NaiveDate, NaiveDate, &str)> = entries
            .iter()
            .filter(|e| {
                e.run_id == run_id
                    && e.iterator == iterator
                    && e.period_tag == kind.tag()
                    && e.table == last_table
            })
            .map(|e| (e.start_date, e.end_date, e.year_month.as_str()))
            .collect();

        let last = match direction {
            Direction::Forward => done.iter().next_back()?,
            Direction::Backward => done.iter().next()?,
        };
        let next_start = next_start(kind, direction, last.0, last.1, last.2)?;
        let completed = u32::try_from(done.len()).unwrap_or(u32::MAX);

        Some(Self {
            next_start,
            completed,
            remaining: total.saturating_sub(completed),
        })
    }
}

fn next_start(
    kind: PeriodKind,
    direction: Direction,
    start: NaiveDate,
    end: NaiveDate,
    year_month: &str,
) -> Option<NaiveDate> {
    let sign = direction.sign();
    match kind {
        PeriodKind::CalendarMonth | PeriodKind::BillCycle => {
            YearMonth::of(start).shift(sign)?.first_day()
        }
        PeriodKind::FiscalMonth | PeriodKind::FiscalCalendarMonth => {
            year_month.parse::<YearMonth>().ok()?.shift(sign)?.first_day()
        }
        PeriodKind::Daily | PeriodKind::MultiDay { .. } => match direction {
            Direction::Forward => end.succ_opt(),
            Direction::Backward => start.pred_opt(),
        },
    }
}
