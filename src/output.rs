//! Append-only CSV output shared by all workers
//!
//! Every record is flushed and synced before `write` returns, so a crash loses
//! at most the record in flight. The file is opened in append mode and never
//! rewritten; a new file starts with a UTF-8 byte-order mark and the header.
//! Rows are encoded in memory first, and a failed append is truncated away so
//! a partial row never prefixes the next one.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::seller::EnrichedRecord;
use crate::task_source::normalized_headers;

const BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to open output {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output {path} has columns {found:?}, expected {expected:?}")]
    SchemaMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Failed to read existing output header: {0}")]
    Header(String),

    #[error("Failed to encode row: {0}")]
    Encode(#[source] csv::Error),

    #[error("Failed to write record for '{login}': {message}")]
    Write { login: String, message: String },
}

pub struct OutputSink {
    file: Mutex<File>,
    schema: Vec<String>,
    path: PathBuf,
    written: AtomicUsize,
}

impl OutputSink {
    /// Open `path` for appending rows with the given header.
    ///
    /// A missing or empty file gets a BOM and the header. An existing file
    /// must carry exactly `schema` as its header.
    pub fn initialize(path: &Path, schema: Vec<String>) -> Result<Self, SinkError> {
        let open_err = |source: io::Error| SinkError::Open {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }

        let existing_len = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        if existing_len > 0 {
            let found = read_header(path)?;
            if found != schema {
                return Err(SinkError::SchemaMismatch {
                    path: path.to_path_buf(),
                    expected: schema,
                    found,
                });
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_err)?;

        if existing_len == 0 {
            let mut header = BOM.to_vec();
            header.extend(encode_row(&schema).map_err(SinkError::Encode)?);
            append_durably(&mut file, &header).map_err(open_err)?;
            info!("Created output {} with {} columns", path.display(), schema.len());
        } else {
            info!("Appending to existing output {}", path.display());
        }

        Ok(Self {
            file: Mutex::new(file),
            schema,
            path: path.to_path_buf(),
            written: AtomicUsize::new(0),
        })
    }

    /// Append one record and make it durable before returning
    pub fn write(&self, record: &EnrichedRecord) -> Result<(), SinkError> {
        let write_err = |message: String| SinkError::Write {
            login: record.login().to_string(),
            message,
        };

        let row = encode_row(&record.to_row(&self.schema)).map_err(SinkError::Encode)?;
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = append_durably(&mut *file, &row) {
            warn!("Append to {} failed: {}", self.path.display(), e);
            return Err(write_err(e.to_string()));
        }
        drop(file);

        self.written.fetch_add(1, Ordering::Relaxed);
        debug!("Wrote record for {}", record.login());
        Ok(())
    }

    /// Records written through this sink
    pub fn count(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }
}

/// One CSV line, quoted and terminated the same way for header and rows
fn encode_row<S: AsRef<[u8]>>(fields: &[S]) -> Result<Vec<u8>, csv::Error> {
    let mut encoder = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    encoder.write_record(fields)?;
    encoder
        .into_inner()
        .map_err(|e| csv::Error::from(io::Error::other(e.to_string())))
}

/// Append-only file that can be synced and cut back to an earlier length
trait AppendTarget: Write {
    fn current_len(&self) -> io::Result<u64>;
    fn truncate_to(&self, len: u64) -> io::Result<()>;
    fn sync(&self) -> io::Result<()>;
}

impl AppendTarget for File {
    fn current_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate_to(&self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Write `bytes` at the end and sync. On failure the target is truncated back
/// to its previous length.
fn append_durably<T: AppendTarget>(target: &mut T, bytes: &[u8]) -> io::Result<()> {
    let before = target.current_len()?;
    let result = target
        .write_all(bytes)
        .and_then(|_| target.flush())
        .and_then(|_| target.sync());

    if let Err(e) = result {
        if let Err(rollback) = target.truncate_to(before) {
            warn!("Could not discard partial row: {}", rollback);
        }
        return Err(e);
    }
    Ok(())
}

fn read_header(path: &Path) -> Result<Vec<String>, SinkError> {
    let file = File::open(path).map_err(|source| SinkError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(file);
    normalized_headers(&mut reader, path).map_err(|e| SinkError::Header(e.to_string()))
}
