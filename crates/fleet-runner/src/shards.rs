//! Row-balanced splitting of input tables and in-order merging of shard results.

use crate::error::{FleetError, Result};
use crate::records::{read_records, write_record};
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File name of a per-shard artifact; `None` is the unsharded file itself.
pub fn shard_file_name(shard: Option<usize>, file_name: &str) -> String {
    match shard {
        Some(index) => format!("{}{}", index, file_name),
        None => file_name.to_string(),
    }
}

/// Rows per shard under ceiling division; the tail shards absorb the shortfall.
pub fn shard_row_counts(total_rows: usize, parts: usize) -> Vec<usize> {
    let per_part = total_rows.div_ceil(parts.max(1));
    (0..parts)
        .map(|i| {
            let start = (i * per_part).min(total_rows);
            let end = (start + per_part).min(total_rows);
            end - start
        })
        .collect()
}

/// Splits `dir/file_name` into `parts` files named `{index}{file_name}`, each
/// starting with the source header. Returns the data-row count of every shard.
pub fn split_csv(dir: &Path, file_name: &str, parts: usize) -> Result<Vec<usize>> {
    if parts == 0 {
        return Err(FleetError::InvalidParameters(
            "shard count must be at least 1".to_string(),
        ));
    }
    let source = dir.join(file_name);
    let mut records = read_records(&source)?.into_iter();
    let header = records
        .next()
        .ok_or_else(|| FleetError::format(&source, 1, "missing header row"))?;
    let rows: Vec<_> = records.collect();

    let counts = shard_row_counts(rows.len(), parts);
    let mut start = 0;
    for (index, count) in counts.iter().enumerate() {
        let path = dir.join(shard_file_name(Some(index), file_name));
        let file = fs::File::create(&path).map_err(|e| FleetError::io(&path, e))?;
        let mut out = BufWriter::new(file);
        write_record(&mut out, &header).map_err(|e| FleetError::io(&path, e))?;
        for row in &rows[start..start + count] {
            write_record(&mut out, row).map_err(|e| FleetError::io(&path, e))?;
        }
        out.flush().map_err(|e| FleetError::io(&path, e))?;
        start += count;
    }
    debug!(source = %source.display(), parts, rows = rows.len(), "split input");
    Ok(counts)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeSummary {
    pub output: PathBuf,
    pub lines_per_shard: Vec<usize>,
    pub missing_shards: Vec<usize>,
}

/// Concatenates `{index}{file_name}` for every shard, in index order, into
/// `dir/file_name`. Missing shard files contribute no lines.
pub fn merge_shards(dir: &Path, file_name: &str, parts: usize) -> Result<MergeSummary> {
    let output = dir.join(file_name);
    let file = fs::File::create(&output).map_err(|e| FleetError::io(&output, e))?;
    let mut out = BufWriter::new(file);
    let mut summary = MergeSummary {
        output: output.clone(),
        ..MergeSummary::default()
    };

    for index in 0..parts {
        let path = dir.join(shard_file_name(Some(index), file_name));
        let shard = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(shard = index, path = %path.display(), "shard result missing, merged as empty");
                summary.missing_shards.push(index);
                summary.lines_per_shard.push(0);
                continue;
            }
            Err(e) => return Err(FleetError::io(&path, e)),
        };
        let mut lines = 0;
        for line in BufReader::new(shard).lines() {
            let line = line.map_err(|e| FleetError::io(&path, e))?;
            writeln!(out, "{}", line).map_err(|e| FleetError::io(&output, e))?;
            lines += 1;
        }
        summary.lines_per_shard.push(lines);
    }
    out.flush().map_err(|e| FleetError::io(&output, e))?;
    Ok(summary)
}
