//! Tolerance-based verification of computed results against ground truth.

use crate::error::{FleetError, Result};
use crate::records::{format_float, read_records, write_record, Record};
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Significant digits compared by [`compare_results`].
pub const DEFAULT_PRECISION: i32 = 6;
pub const DEFAULT_SCALE: f64 = 1.0;

const REPORT_HEADER: [&str; 2] = ["number", "data"];

/// Leading `precision` significant digits of `|value|`, as a float.
pub fn mantissa(value: f64, precision: i32) -> f64 {
    if value == 0.0 {
        return 0.0;
    }
    let abs = value.abs();
    let exp = abs.log10().floor() as i32;
    abs / 10f64.powi(exp - precision + 1)
}

pub fn significant_digits_match(a: f64, b: f64, precision: i32, scale: f64) -> bool {
    (mantissa(a, precision) - mantissa(b, precision)).abs() <= scale
}

/// Compares `truth_csv` (header + `number,value` rows) against the computed
/// values in `computed_txt`, one per line, and writes `report_csv`. Returns the
/// number of rows that did not match.
pub fn compare_results(
    truth_csv: &Path,
    computed_txt: &Path,
    report_csv: &Path,
    scale: f64,
) -> Result<usize> {
    let truth = read_records(truth_csv)?;
    let computed = read_computed_values(computed_txt)?;
    let rows = truth.len().saturating_sub(1);
    if computed.len() < rows {
        return Err(FleetError::format(
            computed_txt,
            computed.len(),
            format!(
                "computed result has {} values but ground truth has {} rows",
                computed.len(),
                rows
            ),
        ));
    }

    let file = fs::File::create(report_csv).map_err(|e| FleetError::io(report_csv, e))?;
    let mut out = BufWriter::new(file);
    write_report_row(&mut out, report_csv, REPORT_HEADER.map(String::from).as_slice())?;

    let mut mismatches = 0;
    for (i, record) in truth.iter().enumerate().skip(1) {
        let (number, expected) = truth_row(truth_csv, i + 1, record)?;
        let actual = computed[i - 1];
        let verdict = if significant_digits_match(expected, actual, DEFAULT_PRECISION, scale) {
            "true".to_string()
        } else {
            mismatches += 1;
            format_float(actual)
        };
        write_report_row(&mut out, report_csv, &[number.to_string(), verdict])?;
    }
    out.flush().map_err(|e| FleetError::io(report_csv, e))?;
    debug!(rows, mismatches, scale, "compared results");
    Ok(mismatches)
}

/// Numbers the computed lines `1..` into a `number,data` table without checking them.
pub fn convert_results(computed_txt: &Path, report_csv: &Path) -> Result<usize> {
    let input = fs::File::open(computed_txt).map_err(|e| FleetError::io(computed_txt, e))?;
    let file = fs::File::create(report_csv).map_err(|e| FleetError::io(report_csv, e))?;
    let mut out = BufWriter::new(file);
    writeln!(out, "{}", REPORT_HEADER.join(",")).map_err(|e| FleetError::io(report_csv, e))?;

    let mut written = 0;
    for line in BufReader::new(input).lines() {
        let line = line.map_err(|e| FleetError::io(computed_txt, e))?;
        written += 1;
        writeln!(out, "{},{}", written, line).map_err(|e| FleetError::io(report_csv, e))?;
    }
    out.flush().map_err(|e| FleetError::io(report_csv, e))?;
    Ok(written)
}

/// Replaces the value column of a `number,value` table with its natural log, in place.
pub fn log_transform(csv_path: &Path) -> Result<usize> {
    let mut records = read_records(csv_path)?;
    for (i, record) in records.iter_mut().enumerate().skip(1) {
        let (_, value) = truth_row(csv_path, i + 1, record)?;
        record[1] = format_float(value.ln());
    }

    let mut bytes = Vec::new();
    for record in &records {
        write_record(&mut bytes, record).map_err(|e| FleetError::io(csv_path, e))?;
    }
    atomic_write(csv_path, &bytes)?;
    Ok(records.len().saturating_sub(1))
}

fn read_computed_values(path: &Path) -> Result<Vec<f64>> {
    let raw = fs::read_to_string(path).map_err(|e| FleetError::io(path, e))?;
    let mut values = Vec::new();
    for (i, line) in raw.split('\n').enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value = line.parse::<f64>().map_err(|e| {
            FleetError::format(path, i + 1, format!("invalid number '{}': {}", line, e))
        })?;
        values.push(value);
    }
    Ok(values)
}

fn truth_row<'a>(path: &Path, line: usize, record: &'a Record) -> Result<(&'a str, f64)> {
    if record.len() < 2 {
        return Err(FleetError::format(path, line, "expected number,value columns"));
    }
    let raw = record[1].trim();
    let value = raw
        .parse::<f64>()
        .map_err(|e| FleetError::format(path, line, format!("invalid number '{}': {}", raw, e)))?;
    Ok((record[0].as_str(), value))
}

fn write_report_row<W: Write>(out: &mut W, path: &Path, row: &[String]) -> Result<()> {
    write_record(out, row).map_err(|e| FleetError::io(path, e))
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}", name, std::process::id()));
    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|e| {
        let _ = fs::remove_file(&tmp);
        FleetError::io(path, e)
    })
}
