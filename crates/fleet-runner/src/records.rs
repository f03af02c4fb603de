//! Minimal RFC 4180 reader/writer for the small numeric tables workers consume.

use crate::error::{FleetError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

pub type Record = Vec<String>;

/// Reads every record of `path`. All records must have the field count of the first one.
pub fn read_records(path: &Path) -> Result<Vec<Record>> {
    let raw = fs::read_to_string(path).map_err(|e| FleetError::io(path, e))?;
    parse_records(&raw).map_err(|(line, message)| FleetError::format(path, line, message))
}

fn parse_records(raw: &str) -> std::result::Result<Vec<Record>, (usize, String)> {
    let mut records = Vec::new();
    let mut field = String::new();
    let mut record: Record = Vec::new();
    let mut in_quotes = false;
    let mut quoted_field = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                '\n' => {
                    line += 1;
                    field.push(c);
                }
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() && !quoted_field => {
                in_quotes = true;
                quoted_field = true;
            }
            '"' => return Err((line, "bare \" in non-quoted field".to_string())),
            ',' => {
                record.push(std::mem::take(&mut field));
                quoted_field = false;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                finish_record(&mut records, &mut record, &mut field, quoted_field, record_line)?;
                quoted_field = false;
                line += 1;
                record_line = line;
            }
            _ if quoted_field => {
                return Err((line, "extraneous character after quoted field".to_string()))
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err((record_line, "unterminated quoted field".to_string()));
    }
    if !field.is_empty() || !record.is_empty() || quoted_field {
        finish_record(&mut records, &mut record, &mut field, quoted_field, record_line)?;
    }
    Ok(records)
}

fn finish_record(
    records: &mut Vec<Record>,
    record: &mut Record,
    field: &mut String,
    quoted: bool,
    line: usize,
) -> std::result::Result<(), (usize, String)> {
    if record.is_empty() && field.is_empty() && !quoted {
        // blank line
        return Ok(());
    }
    record.push(std::mem::take(field));
    let current = std::mem::take(record);
    if let Some(first) = records.first() {
        if first.len() != current.len() {
            return Err((
                line,
                format!(
                    "wrong number of fields: expected {}, found {}",
                    first.len(),
                    current.len()
                ),
            ));
        }
    }
    records.push(current);
    Ok(())
}

pub fn write_record<W: Write>(out: &mut W, record: &[String]) -> std::io::Result<()> {
    let line = record
        .iter()
        .map(|f| quote_field(f))
        .collect::<Vec<_>>()
        .join(",");
    writeln!(out, "{}", line)
}

fn quote_field(field: &str) -> String {
    let needs_quotes = field.starts_with(' ')
        || field.starts_with('\t')
        || field.contains([',', '"', '\n', '\r']);
    if needs_quotes {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Renders a float the way the worker programs and downstream consumers expect
/// (`%g` with shortest round-trip digits).
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "+Inf" } else { "-Inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let sci = format!("{:e}", value);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => return sci,
    };
    // %g switches to exponent form below 1e-4 and from 1e6 upwards
    if exp < -4 || exp >= 6 {
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exp.abs())
    } else {
        format!("{}", value)
    }
}
