use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::OutputRow;

pub const CSV_HEADER: &str = "repository,url,stars,uses_typescript,uses_react,uses_jest,test_libraries,react_dependency,frontend_test_library";

/// Append-only CSV output with per-run dedup.
///
/// Keys seen during this run are kept in memory only; rows already in the
/// file from earlier runs are never read back.
pub struct CsvSink {
    path: PathBuf,
    file: File,
    seen: HashSet<String>,
    written: usize,
}

impl CsvSink {
    /// Open `path` for appending, writing the header if the file is new or empty.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let needs_header = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        if needs_header {
            file.write_all(CSV_HEADER.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await?;
            info!("Created {} with header", path.display());
        }

        Ok(Self {
            path,
            file,
            seen: HashSet::new(),
            written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Write `row` unless `key` was already written this run.
    pub async fn append_if_new(&mut self, key: &str, row: &OutputRow) -> Result<bool> {
        if !self.seen.insert(key.to_lowercase()) {
            debug!("Skipping duplicate row for {}", key);
            return Ok(false);
        }

        let line = format_row(row);
        self.file.write_all(line.as_bytes()).await?;
        self.file.write_all(b"\n").await?;
        self.file.flush().await?;
        self.written += 1;
        Ok(true)
    }
}

pub fn format_row(row: &OutputRow) -> String {
    [
        escape_csv(&row.repository),
        escape_csv(&row.url),
        row.stars.to_string(),
        row.language.to_string(),
        row.framework.to_string(),
        row.test_runner.to_string(),
        escape_csv(&row.test_libraries.join(";")),
        row.framework_dependency.to_string(),
        row.frontend_test_library.to_string(),
    ]
    .join(",")
}

/// Quote fields containing separators, quotes or newlines.
fn escape_csv(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}
