//! Task source: loads sellers from the input dataset into a shared work queue
//!
//! Sellers already present in a previous output with a company name and at
//! least one registry id are skipped, so an interrupted run can be restarted
//! over the same files.

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::seller::{output_schema, WorkItem, LOGIN_COLUMN};

const BOM: char = '\u{feff}';

#[derive(Error, Debug)]
pub enum DataSourceError {
    #[error("Input dataset not found: {0}")]
    InputMissing(PathBuf),

    #[error("Failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed dataset {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Dataset {path} has no '{column}' column")]
    MissingColumn { path: PathBuf, column: &'static str },
}

/// Pop-only queue shared by all workers. Items are never returned to it.
#[derive(Debug, Default)]
pub struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
}

impl WorkQueue {
    pub fn new(items: impl IntoIterator<Item = WorkItem>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
        }
    }

    /// Take the next item, `None` once the queue is drained
    pub fn pop(&self) -> Option<WorkItem> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Logins still queued, in order (dry runs and diagnostics)
    pub fn logins(&self) -> Vec<String> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|item| item.login().to_string())
            .collect()
    }
}

/// A previously written output row, reduced to what decides completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionRecord {
    pub login: String,
    pub company_name: String,
    pub nip: String,
    pub regon: String,
    pub krs: String,
}

impl CompletionRecord {
    /// Complete when the company is named and at least one registry id is known
    pub fn is_complete(&self) -> bool {
        !self.company_name.trim().is_empty()
            && [&self.nip, &self.regon, &self.krs]
                .iter()
                .any(|id| !id.trim().is_empty())
    }
}

/// Counters describing how the input was filtered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub input_rows: usize,
    pub already_complete: usize,
    pub duplicates: usize,
    pub missing_login: usize,
}

/// Result of loading the input dataset
#[derive(Debug)]
pub struct TaskSource {
    pub queue: WorkQueue,
    /// Input header, in input order
    pub input_columns: Vec<String>,
    /// Output header: input columns plus enrichment columns
    pub schema: Vec<String>,
    pub stats: LoadStats,
}

/// Load the input dataset, skipping sellers already complete in `output`
pub fn load(input: &Path, output: &Path) -> Result<TaskSource, DataSourceError> {
    let complete = completed_logins(output)?;
    info!("{} sellers already complete in {}", complete.len(), output.display());

    if !input.exists() {
        return Err(DataSourceError::InputMissing(input.to_path_buf()));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(open(input)?);

    let input_columns = normalized_headers(&mut reader, input)?;
    let login_idx = input_columns
        .iter()
        .position(|h| h == LOGIN_COLUMN)
        .ok_or_else(|| DataSourceError::MissingColumn {
            path: input.to_path_buf(),
            column: LOGIN_COLUMN,
        })?;

    let mut stats = LoadStats::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut items = Vec::new();

    for result in reader.records() {
        let record = result.map_err(|source| DataSourceError::Malformed {
            path: input.to_path_buf(),
            source,
        })?;
        stats.input_rows += 1;

        let login = record.get(login_idx).unwrap_or_default().trim().to_string();
        if login.is_empty() {
            stats.missing_login += 1;
            continue;
        }
        if complete.contains(&login) {
            stats.already_complete += 1;
            continue;
        }
        if !seen.insert(login.clone()) {
            debug!("Duplicate login in input skipped: {}", login);
            stats.duplicates += 1;
            continue;
        }

        let fields = input_columns
            .iter()
            .cloned()
            .zip(record.iter().map(str::to_string))
            .collect();
        items.push(WorkItem::new(login, fields));
    }

    info!(
        "Loaded {} rows from {}: {} queued, {} complete, {} duplicate, {} without login",
        stats.input_rows,
        input.display(),
        items.len(),
        stats.already_complete,
        stats.duplicates,
        stats.missing_login
    );

    let schema = output_schema(&input_columns);
    Ok(TaskSource {
        queue: WorkQueue::new(items),
        input_columns,
        schema,
        stats,
    })
}

/// Logins whose previous output row satisfies the completion predicate.
/// A missing output file yields an empty set; unreadable rows are skipped.
pub fn completed_logins(output: &Path) -> Result<HashSet<String>, DataSourceError> {
    let mut complete = HashSet::new();
    if !output.exists() {
        return Ok(complete);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(open(output)?);

    let headers = normalized_headers(&mut reader, output)?;
    if headers.iter().all(|h| h.is_empty()) {
        return Ok(complete);
    }

    let column = |name: &str| headers.iter().position(|h| h == name);
    let login_idx = column(LOGIN_COLUMN).ok_or_else(|| DataSourceError::MissingColumn {
        path: output.to_path_buf(),
        column: LOGIN_COLUMN,
    })?;
    let company_idx = column("company_name");
    let nip_idx = column("nip");
    let regon_idx = column("regon");
    let krs_idx = column("krs");

    let mut skipped = 0usize;
    for (line, result) in reader.records().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                skipped += 1;
                if skipped <= 3 {
                    warn!("Skipping unreadable row {} in {}: {}", line + 2, output.display(), e);
                }
                continue;
            }
        };

        let get = |idx: Option<usize>| {
            idx.and_then(|i| record.get(i))
                .unwrap_or_default()
                .to_string()
        };
        let row = CompletionRecord {
            login: get(Some(login_idx)).trim().to_string(),
            company_name: get(company_idx),
            nip: get(nip_idx),
            regon: get(regon_idx),
            krs: get(krs_idx),
        };

        if !row.login.is_empty() && row.is_complete() {
            complete.insert(row.login);
        }
    }

    if skipped > 3 {
        warn!("{} unreadable rows skipped in {}", skipped, output.display());
    }

    Ok(complete)
}

/// Header names with a leading byte-order mark and surrounding whitespace removed
pub fn normalized_headers<R: std::io::Read>(
    reader: &mut csv::Reader<R>,
    path: &Path,
) -> Result<Vec<String>, DataSourceError> {
    let headers = reader.headers().map_err(|source| DataSourceError::Malformed {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(headers
        .iter()
        .map(|h| h.trim_start_matches(BOM).trim().to_string())
        .collect())
}

fn open(path: &Path) -> Result<File, DataSourceError> {
    File::open(path).map_err(|source| DataSourceError::Io {
        path: path.to_path_buf(),
        source,
    })
}
