//! Loading the published results sheet.
//!
//! The sheet is a CSV export fetched over HTTP, or a local file when running without one. Loads
//! are cached for a short TTL so the dashboard can be refreshed freely.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::leaderboard::{parse_stage, parse_timestamp};
use crate::model::LogRow;

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("no results sheet is configured (set SHEET_CSV_URL)")]
    NotConfigured,
    #[error("could not build HTTP client: {0}")]
    Client(reqwest::Error),
    #[error("could not fetch the results sheet: {0}")]
    Fetch(String),
    #[error("results sheet returned HTTP {0}")]
    Status(u16),
    #[error("could not read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse the results sheet: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    Http(String),
    File(PathBuf),
}

impl LogSource {
    /// `http://` and `https://` locations are fetched; anything else is a file path.
    pub fn parse(location: &str) -> Self {
        let location = location.trim();
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            LogSource::Http(location.to_string())
        } else {
            LogSource::File(PathBuf::from(location))
        }
    }
}

/// Parses the sheet's CSV export. Columns are matched by header name; absent columns and short
/// rows yield empty cells.
pub fn parse_log_csv(data: &[u8]) -> Result<Vec<LogRow>, SheetError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(data);

    let headers: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_ascii_lowercase())
        .collect();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let group_name = column("group_name");
    let classroom = column("classroom");
    let stage = column("stage");
    let answer = column("answer");
    let result = column("result");
    let time_used = column("time_used");
    let timestamp = column("timestamp");

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let cell = |index: Option<usize>| -> String {
            index
                .and_then(|i| record.get(i))
                .unwrap_or_default()
                .to_string()
        };
        rows.push(LogRow {
            group_name: cell(group_name),
            classroom: cell(classroom),
            stage: parse_stage(&cell(stage)),
            answer: cell(answer),
            result: cell(result),
            time_used: cell(time_used),
            timestamp: parse_timestamp(&cell(timestamp)),
        });
    }
    Ok(rows)
}

struct CachedLoad {
    loaded_at: Instant,
    rows: Arc<Vec<LogRow>>,
}

/// The last successful load of the sheet, reused until it is older than the TTL.
pub struct SheetCache {
    source: Option<LogSource>,
    ttl: Duration,
    client: Client,
    cached: Mutex<Option<CachedLoad>>,
}

impl SheetCache {
    pub fn new(source: Option<LogSource>, ttl: Duration) -> Result<Self, SheetError> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(SheetError::Client)?;
        Ok(Self {
            source,
            ttl,
            client,
            cached: Mutex::new(None),
        })
    }

    /// Returns the cached rows, reloading first when the cache is empty or stale. A failed load
    /// leaves the previous cache in place and returns the error.
    pub async fn rows(&self) -> Result<Arc<Vec<LogRow>>, SheetError> {
        let mut cached = self.cached.lock().await;
        if let Some(load) = cached.as_ref() {
            if load.loaded_at.elapsed() < self.ttl {
                return Ok(load.rows.clone());
            }
        }

        let rows = Arc::new(self.load().await?);
        *cached = Some(CachedLoad {
            loaded_at: Instant::now(),
            rows: rows.clone(),
        });
        Ok(rows)
    }

    /// Drops the cached load so the next read goes to the source.
    pub async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }

    async fn load(&self) -> Result<Vec<LogRow>, SheetError> {
        let bytes = match self.source.as_ref().ok_or(SheetError::NotConfigured)? {
            LogSource::Http(url) => {
                let response = self
                    .client
                    .get(url)
                    .send()
                    .await
                    .map_err(|e| SheetError::Fetch(e.to_string()))?;
                if response.status() != StatusCode::OK {
                    return Err(SheetError::Status(response.status().as_u16()));
                }
                response
                    .bytes()
                    .await
                    .map_err(|e| SheetError::Fetch(e.to_string()))?
                    .to_vec()
            }
            LogSource::File(path) => tokio::fs::read(path)
                .await
                .map_err(|source| SheetError::Io {
                    path: path.clone(),
                    source,
                })?,
        };
        parse_log_csv(&bytes)
    }
}
