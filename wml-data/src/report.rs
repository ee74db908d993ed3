//! Daily summary report files.
//!
//! Each date present at flush time gets two files in the output directory
//! holding the same rows:
//!
//! - `report_<YYYY-MM-DD>.json`: array of row objects
//! - `report_<YYYY-MM-DD>.csv`: `date,reservoir_id,observation_count,mean,min,max`
//!
//! The two writes are independent; one failing does not stop the other.

use crate::aggregator::SummaryRow;
use chrono::NaiveDate;
use log::{error, info};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use thiserror::Error;
use wml_core::dates::format_date;

#[derive(Error, Debug)]
pub enum ReportWriteError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize JSON report {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize CSV report {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Result of writing both artifacts for one date.
#[derive(Debug)]
pub struct ReportOutcome {
    pub date: NaiveDate,
    pub json: Result<PathBuf, ReportWriteError>,
    pub csv: Result<PathBuf, ReportWriteError>,
}

impl ReportOutcome {
    pub fn is_ok(&self) -> bool {
        self.json.is_ok() && self.csv.is_ok()
    }
}

/// Column order shared by the CSV header and the `SummaryRow` fields.
pub const CSV_HEADER: [&str; 6] = ["date", "reservoir_id", "observation_count", "mean", "min", "max"];

pub fn json_path(outdir: &Path, date: &NaiveDate) -> PathBuf {
    outdir.join(format!("report_{}.json", format_date(date)))
}

pub fn csv_path(outdir: &Path, date: &NaiveDate) -> PathBuf {
    outdir.join(format!("report_{}.csv", format_date(date)))
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ReportWriteError + '_ {
    move |source| ReportWriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn write_json(rows: &[&SummaryRow], path: PathBuf) -> Result<PathBuf, ReportWriteError> {
    let file = File::create(&path).map_err(io_error(&path))?;
    let mut writer = BufWriter::new(file);
    if let Err(source) = serde_json::to_writer_pretty(&mut writer, rows) {
        return Err(ReportWriteError::Json { path, source });
    }
    writer.flush().map_err(io_error(&path))?;
    Ok(path)
}

fn write_csv(rows: &[&SummaryRow], path: PathBuf) -> Result<PathBuf, ReportWriteError> {
    let mut writer = match csv::Writer::from_path(&path) {
        Ok(writer) => writer,
        Err(source) => return Err(ReportWriteError::Csv { path, source }),
    };
    // serialize() only emits the header alongside the first row.
    if rows.is_empty() {
        if let Err(source) = writer.write_record(CSV_HEADER) {
            return Err(ReportWriteError::Csv { path, source });
        }
    }
    for row in rows {
        if let Err(source) = writer.serialize(row) {
            return Err(ReportWriteError::Csv { path, source });
        }
    }
    writer.flush().map_err(io_error(&path))?;
    Ok(path)
}

/// Write the JSON and CSV reports for `date`, using only the rows dated
/// `date`. Failures are reported per artifact.
pub fn write(rows: &[SummaryRow], date: NaiveDate, outdir: &Path) -> ReportOutcome {
    let rows: Vec<&SummaryRow> = rows.iter().filter(|row| row.date == date).collect();
    let json = write_json(&rows, json_path(outdir, &date));
    let csv = write_csv(&rows, csv_path(outdir, &date));
    ReportOutcome { date, json, csv }
}

/// Write one report pair per date found in `rows`, creating `outdir` first.
///
/// Every failure is logged individually and never stops the remaining dates.
pub fn write_all(rows: &[SummaryRow], outdir: &Path) -> Vec<ReportOutcome> {
    if let Err(e) = std::fs::create_dir_all(outdir) {
        error!("Failed to create report directory {}: {}", outdir.display(), e);
    }

    let mut per_date: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for row in rows {
        *per_date.entry(row.date).or_default() += 1;
    }

    let mut outcomes = Vec::with_capacity(per_date.len());
    for (date, count) in per_date {
        let outcome = write(rows, date, outdir);
        match (&outcome.json, &outcome.csv) {
            (Ok(json), Ok(csv)) => info!(
                "Wrote report for {} ({} rows): {}, {}",
                date,
                count,
                json.display(),
                csv.display()
            ),
            (json, csv) => {
                for e in [json.as_ref().err(), csv.as_ref().err()].into_iter().flatten() {
                    error!("Report for {} incomplete: {}", date, e);
                }
            }
        }
        outcomes.push(outcome);
    }
    outcomes
}
