//! Fiscal calendar loaded from CSV.
//!
//! Expected header: `year,month,fiscal_start,fiscal_end`, dates as
//! `YYYY-MM-DD`. Whitespace around fields is ignored.

use std::fs::File;
use std::io;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

use backfill_core::{FiscalError, FiscalPeriod, FiscalTable, YearMonth};

#[derive(Debug, Error)]
pub enum FiscalCsvError {
    #[error("open fiscal calendar {}: {source}", path.display())]
    Open {
        path: std::path::PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("fiscal calendar row {row}: {source}")]
    Csv {
        row: usize,
        #[source]
        source: csv::Error,
    },

    #[error("fiscal calendar row {row}: month {month} is not in 1..=12")]
    InvalidMonth { row: usize, month: u32 },

    #[error("fiscal calendar row {row}: {source}")]
    Period {
        row: usize,
        #[source]
        source: FiscalError,
    },
}

#[derive(Debug, Deserialize)]
struct FiscalRow {
    year: i32,
    month: u32,
    fiscal_start: NaiveDate,
    fiscal_end: NaiveDate,
}

pub fn load_fiscal_csv(path: &Path) -> Result<FiscalTable, FiscalCsvError> {
    let file = File::open(path).map_err(|source| FiscalCsvError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let table = read_fiscal_csv(file)?;
    tracing::info!(
        path = %path.display(),
        periods = table.len(),
        "loaded fiscal calendar"
    );
    Ok(table)
}

pub fn read_fiscal_csv<R: io::Read>(reader: R) -> Result<FiscalTable, FiscalCsvError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut table = FiscalTable::new();
    // Row numbers count the header as row 1.
    for (index, record) in reader.deserialize::<FiscalRow>().enumerate() {
        let row = index + 2;
        let record = record.map_err(|source| FiscalCsvError::Csv { row, source })?;
        let month = YearMonth::new(record.year, record.month).ok_or(FiscalCsvError::InvalidMonth {
            row,
            month: record.month,
        })?;
        let period = FiscalPeriod::new(record.fiscal_start, record.fiscal_end)
            .map_err(|source| FiscalCsvError::Period { row, source })?;
        table
            .insert(month, period)
            .map_err(|source| FiscalCsvError::Period { row, source })?;
    }
    Ok(table)
}
