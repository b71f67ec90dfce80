//! Routing request sheet, exported as CSV.
//!
//! Column C holds the peer (an attachment id for VPC-to-VPC requests, free
//! text for on-prem ones) and column E the subject attachment. The first row
//! is the header.

use tracing::debug;

use crate::error::ReconcileError;

const PEER_COLUMN: usize = 2;
const SUBJECT_COLUMN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    /// 1-based line in the sheet, header included.
    pub line: usize,
    pub peer: String,
    pub subject: String,
}

/// Parse the sheet body. A sheet that cannot reach column E is rejected
/// before any row is looked at.
pub fn read_sheet(raw: &[u8]) -> Result<Vec<SheetRow>, ReconcileError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(raw);

    let columns = reader.headers()?.len();
    let required = SUBJECT_COLUMN + 1;
    if columns < required {
        return Err(ReconcileError::InsufficientColumns {
            found: columns,
            required,
        });
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        rows.push(SheetRow {
            line: idx + 2,
            peer: record.get(PEER_COLUMN).unwrap_or_default().to_string(),
            subject: record.get(SUBJECT_COLUMN).unwrap_or_default().to_string(),
        });
    }
    debug!(rows = rows.len(), columns, "read sheet");
    Ok(rows)
}

/// Sheets are addressed by file name and live under `<tenant>/settingsheets/`.
pub fn sheet_key(tenant: &str, name: &str) -> String {
    let name = name.trim_start_matches('/');
    if name.starts_with(&format!("{tenant}/")) {
        name.to_string()
    } else {
        format!("{tenant}/settingsheets/{name}")
    }
}
