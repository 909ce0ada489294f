use crate::matching::clean_institution_name;
use crate::models::ExternalAccreditationRecord;
use serde::Deserialize;
use std::io::Read;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("dataset is empty")]
    EmptyDataset,
    #[error("missing required columns: {0}")]
    MissingColumns(String),
    #[error("failed to read dataset: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse dataset: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to fetch dataset from {url}: {source}")]
    Fetch {
        url: String,
        source: reqwest::Error,
    },
}

const REQUIRED_COLUMNS: [&str; 4] = ["University", "Program", "Latest_Status", "Maturity_Date"];

/// Parsed dataset plus the rows that had to be dropped along the way, so the
/// run report can list them instead of silently shrinking the input.
#[derive(Debug)]
pub struct Dataset {
    pub records: Vec<ExternalAccreditationRecord>,
    pub skipped: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "University")]
    university: String,
    #[serde(rename = "Program")]
    program: String,
    #[serde(rename = "Latest_Status")]
    status: String,
    #[serde(rename = "Maturity_Date")]
    maturity_date: String,
    #[serde(rename = "Faculty", default)]
    faculty: Option<String>,
}

/// Parse the authority dataset from any reader. Quoted fields containing the
/// delimiter are handled by the csv crate; header validation happens up front
/// so a malformed file fails as a single top-level error. Past the header,
/// failures are row-level: a ragged or undecodable row is skipped and
/// reported, never fatal.
pub fn parse_csv<R: Read>(reader: R) -> Result<Dataset, IngestError> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h.trim() == **col))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(IngestError::MissingColumns(missing.join(", ")));
    }

    let mut records = Vec::new();
    let mut skipped = Vec::new();
    for (index, row) in csv_reader.deserialize::<RawRow>().enumerate() {
        // Line 1 is the header row.
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                skipped.push(format!("Skipping row {}: {}", index + 2, e));
                continue;
            }
        };
        records.push(ExternalAccreditationRecord {
            institution: clean_institution_name(&row.university),
            program: row.program.trim().to_string(),
            status: row.status.trim().to_string(),
            maturity_year: row.maturity_date.trim().parse::<i32>().ok(),
            faculty: row
                .faculty
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
        });
    }

    if records.is_empty() {
        return Err(IngestError::EmptyDataset);
    }
    Ok(Dataset { records, skipped })
}

pub fn read_csv_file(path: &str) -> Result<Dataset, IngestError> {
    let file = std::fs::File::open(path)?;
    parse_csv(file)
}

/// Fetch the dataset over HTTP, the counterpart of reading a local file.
pub async fn fetch_csv_url(
    client: &reqwest::Client,
    url: &str,
) -> Result<Dataset, IngestError> {
    let response = client
        .get(url)
        .timeout(std::time::Duration::from_secs(30))
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|source| IngestError::Fetch {
            url: url.to_string(),
            source,
        })?;

    let content = response.text().await.map_err(|source| IngestError::Fetch {
        url: url.to_string(),
        source,
    })?;
    parse_csv(content.as_bytes())
}
