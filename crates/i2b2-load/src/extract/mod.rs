//! Delimited extract files.
//!
//! An extract is a header line followed by data rows, split on a single
//! fixed delimiter (TAB unless configured otherwise). Rows are streamed,
//! never loaded whole.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::debug;

use crate::error::Result;

/// Default field delimiter for extracts.
pub const DEFAULT_DELIMITER: char = '\t';

/// An extract file with its parsed header.
#[derive(Debug, Clone)]
pub struct DelimitedFile {
    path: PathBuf,
    headers: Vec<String>,
}

impl DelimitedFile {
    /// Open `path` and read its header line.
    ///
    /// An empty file has an empty header list.
    pub async fn open(path: impl AsRef<Path>, delimiter: char) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let mut lines = BufReader::new(file).lines();

        let headers = match lines.next_line().await? {
            Some(line) => parse_header(&line, delimiter),
            None => Vec::new(),
        };
        debug!("{}: {} header columns", path.display(), headers.len());

        Ok(Self { path, headers })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Header names, trimmed and lower-cased, empty names dropped.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Stream the data lines, header excluded.
    pub async fn rows(&self) -> Result<ExtractRows> {
        let file = File::open(&self.path).await?;
        let mut lines = BufReader::new(file).lines();
        // header
        lines.next_line().await?;

        Ok(ExtractRows {
            lines,
            line_number: 1,
        })
    }
}

/// Lazily read data lines of an extract.
pub struct ExtractRows {
    lines: Lines<BufReader<File>>,
    line_number: usize,
}

/// One raw data line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractLine {
    /// 1-based line number in the file (the header is line 1).
    pub number: usize,
    pub text: String,
}

impl ExtractLine {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    pub fn is_comment(&self, prefix: Option<&str>) -> bool {
        match prefix {
            Some(p) if !p.is_empty() => self.text.trim_start().starts_with(p),
            _ => false,
        }
    }
}

impl ExtractRows {
    /// Next line, or `None` at end of file.
    pub async fn next_line(&mut self) -> Result<Option<ExtractLine>> {
        let Some(text) = self.lines.next_line().await? else {
            return Ok(None);
        };
        self.line_number += 1;
        Ok(Some(ExtractLine {
            number: self.line_number,
            text,
        }))
    }
}

/// Split a data line into raw fields. Fields are not trimmed here.
pub fn split_fields(line: &str, delimiter: char) -> Vec<&str> {
    line.split(delimiter).collect()
}

/// Parse a header line into column names.
pub fn parse_header(line: &str, delimiter: char) -> Vec<String> {
    line.split(delimiter)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Regular files directly under `dir`, sorted by file name.
///
/// A directory that cannot be read is an error, not an empty list.
pub async fn list_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir.as_ref()).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
