// Combine monthly CSV extracts into the single file the dashboard reads.
use crate::error::Result;
use crate::types::columns;
use crate::util::zero_pad_cnes;
use csv::StringRecord;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Solver diagnostics column present in some extracts.
const ERROR_COLUMN: &str = "Erro";

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub files_read: usize,
    pub files_skipped: Vec<PathBuf>,
    pub rows_written: usize,
    pub columns: Vec<String>,
    /// `false` when no input could be read and no output was produced.
    pub written: bool,
}

struct Extract {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

fn read_extract(path: &Path) -> Result<Extract> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_path(path)?;
    let headers = rdr.headers()?.clone();
    let rows = rdr.records().collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(Extract { headers, rows })
}

/// Merge `inputs` into `output`. Unreadable inputs are skipped with a
/// warning. Columns are the union of every header in first-seen order.
pub fn merge_csv_files(inputs: &[PathBuf], output: &Path) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    let mut extracts = Vec::new();

    for path in inputs {
        match read_extract(path) {
            Ok(extract) => {
                info!(path = %path.display(), rows = extract.rows.len(), "read extract");
                extracts.push(extract);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable extract");
                report.files_skipped.push(path.clone());
            }
        }
    }
    report.files_read = extracts.len();
    if extracts.is_empty() {
        warn!("no extract could be read; nothing written");
        return Ok(report);
    }

    let mut header_union: Vec<String> = Vec::new();
    for extract in &extracts {
        for h in extract.headers.iter() {
            if h != ERROR_COLUMN && !header_union.iter().any(|c| c == h) {
                header_union.push(h.to_string());
            }
        }
    }

    let mut wtr = csv::Writer::from_path(output)?;
    wtr.write_record(&header_union)?;
    for extract in &extracts {
        let positions: Vec<Option<usize>> = header_union
            .iter()
            .map(|c| extract.headers.iter().position(|h| h == c))
            .collect();
        for row in &extract.rows {
            let out: Vec<String> = header_union
                .iter()
                .zip(&positions)
                .map(|(column, pos)| {
                    let cell = pos.and_then(|i| row.get(i)).unwrap_or("");
                    if column == columns::CNES && !cell.trim().is_empty() {
                        zero_pad_cnes(cell)
                    } else {
                        cell.to_string()
                    }
                })
                .collect();
            wtr.write_record(&out)?;
            report.rows_written += 1;
        }
    }
    wtr.flush()?;

    report.columns = header_union;
    report.written = true;
    info!(
        output = %output.display(),
        files = report.files_read,
        rows = report.rows_written,
        "merged extracts"
    );
    Ok(report)
}
