//! Parsed tabular data
//!
//! A [`Dataset`] is an ordered list of [`Row`]s under a [`Schema`]. Rows keep
//! whatever field count the file had: ragged rows are reported by the
//! validator, never dropped here.

use crate::validator::sniff::{sniff, SniffError};
use std::collections::{HashSet, VecDeque};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Markers read as a missing value, in addition to blank fields
pub const MISSING_MARKERS: [&str; 6] = ["NA", "N/A", "NULL", "null", "NaN", "nan"];

/// Whether a raw field counts as missing
pub fn is_missing(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.is_empty() || MISSING_MARKERS.contains(&trimmed)
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("header row is empty")]
    Empty,

    #[error("column {0} has a blank name")]
    BlankName(usize),

    #[error("column '{0}' appears more than once")]
    Duplicate(String),
}

/// Ordered, unique column names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    columns: Vec<String>,
}

impl Schema {
    /// Build a schema from header names; names are trimmed
    pub fn new<I, S>(columns: I) -> Result<Self, SchemaError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns: Vec<String> = columns
            .into_iter()
            .map(|c| c.as_ref().trim().to_string())
            .collect();

        if columns.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut seen = HashSet::with_capacity(columns.len());
        for (index, name) in columns.iter().enumerate() {
            if name.is_empty() {
                return Err(SchemaError::BlankName(index + 1));
            }
            if !seen.insert(name.as_str()) {
                return Err(SchemaError::Duplicate(name.clone()));
            }
        }

        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn position_ignore_case(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }
}

/// One data record and the source line it started on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 1-based line number in the source file
    pub line: u64,
    /// Field values; `None` for missing values
    pub values: Vec<Option<String>>,
}

impl Row {
    pub fn new(line: u64, values: Vec<Option<String>>) -> Self {
        Self { line, values }
    }

    /// Build a row from raw fields, mapping missing markers to `None`
    pub fn from_raw<I, S>(line: u64, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = fields
            .into_iter()
            .map(Into::into)
            .map(|field: String| if is_missing(&field) { None } else { Some(field) })
            .collect();
        Self { line, values }
    }
}

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unreadable record at line {line}: {message}")]
    Record { line: u64, message: String },

    #[error("file has no header row")]
    NoHeader,

    #[error("invalid header: {0}")]
    Schema(#[from] SchemaError),
}

impl From<csv::Error> for DatasetError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line()).unwrap_or(0);
        match err.into_kind() {
            csv::ErrorKind::Io(io) => DatasetError::Io(io),
            csv::ErrorKind::Utf8 { err, .. } => DatasetError::Record {
                line,
                message: format!("invalid UTF-8 in field {}", err.field() + 1),
            },
            other => DatasetError::Record {
                line,
                message: format!("{:?}", other),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LineBreak {
    offset: u64,
    /// Offset of the last byte before this break that was not a line terminator
    last_content: Option<u64>,
}

/// Records where line breaks fall in the bytes handed to the csv parser
///
/// csv positions a record at the end of the previous one, so blank lines it
/// skipped would otherwise be missing from the line count.
struct LineTracker<R> {
    inner: R,
    offset: u64,
    last_content: Option<u64>,
    breaks: VecDeque<LineBreak>,
}

impl<R> LineTracker<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            last_content: None,
            breaks: VecDeque::new(),
        }
    }
}

impl<R: Read> Read for LineTracker<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        for (i, &byte) in buf[..n].iter().enumerate() {
            let offset = self.offset + i as u64;
            match byte {
                b'\n' => self.breaks.push_back(LineBreak {
                    offset,
                    last_content: self.last_content,
                }),
                b'\r' => {},
                _ => self.last_content = Some(offset),
            }
        }
        self.offset += n as u64;
        Ok(n)
    }
}

/// Chunked reader over delimited text
///
/// The first record is the header; everything after it comes back in chunks
/// so large files never sit in memory whole.
pub struct DatasetReader<R> {
    inner: csv::Reader<LineTracker<R>>,
    record: csv::StringRecord,
    lines_before: u64,
}

impl<R: Read> DatasetReader<R> {
    pub fn new(reader: R, delimiter: u8) -> Self {
        let inner = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(LineTracker::new(reader));

        Self {
            inner,
            record: csv::StringRecord::new(),
            lines_before: 0,
        }
    }

    /// Read the header record; `None` when the input has no records at all
    pub fn read_header(&mut self) -> Result<Option<Vec<String>>, DatasetError> {
        if !self.inner.read_record(&mut self.record)? {
            return Ok(None);
        }
        self.current_line();
        Ok(Some(self.record.iter().map(str::to_string).collect()))
    }

    /// 1-based line the last read record starts on
    ///
    /// Every break before the record's start offset counts, and so does every
    /// break reached from there without passing any content (skipped blank
    /// lines and the tail of a CRLF terminator).
    fn current_line(&mut self) -> u64 {
        let start = self.record.position().map(|p| p.byte()).unwrap_or(0);
        let breaks = &mut self.inner.get_mut().breaks;

        while let Some(&next) = breaks.front() {
            let blank_since_start = next.last_content.map_or(true, |c| c < start);
            if next.offset >= start && !blank_since_start {
                break;
            }
            breaks.pop_front();
            self.lines_before += 1;
        }

        self.lines_before + 1
    }

    /// Read up to `max` rows; an empty chunk means end of input
    pub fn next_chunk(&mut self, max: usize) -> Result<Vec<Row>, DatasetError> {
        let mut rows = Vec::with_capacity(max.min(1024));
        while rows.len() < max {
            if !self.inner.read_record(&mut self.record)? {
                break;
            }
            let line = self.current_line();
            rows.push(Row::from_raw(line, self.record.iter()));
        }
        Ok(rows)
    }
}

/// A fully materialised dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    pub schema: Schema,
    pub rows: Vec<Row>,
}

impl Dataset {
    /// Parse all of `reader` with the given delimiter
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self, DatasetError> {
        let mut reader = DatasetReader::new(reader, delimiter);
        let header = reader.read_header()?.ok_or(DatasetError::NoHeader)?;
        let schema = Schema::new(header)?;

        let mut rows = Vec::new();
        loop {
            let chunk = reader.next_chunk(1024)?;
            if chunk.is_empty() {
                break;
            }
            rows.extend(chunk);
        }

        Ok(Self { schema, rows })
    }

    pub fn from_bytes(bytes: &[u8], delimiter: u8) -> Result<Self, DatasetError> {
        Self::from_reader(bytes, delimiter)
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// A file picked up from the inbox, before parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingFile {
    pub path: PathBuf,
    /// Size in bytes when inspected
    pub size: u64,
    /// Delimiter sniffed from the leading bytes
    pub delimiter: Result<u8, SniffError>,
}

impl IncomingFile {
    /// Stat the file and sniff its delimiter from the first `sniff_bytes` bytes
    pub fn inspect(path: impl AsRef<Path>, sniff_bytes: usize) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let size = file.metadata()?.len();

        let mut prefix = Vec::with_capacity(sniff_bytes);
        file.take(sniff_bytes as u64).read_to_end(&mut prefix)?;

        let truncated = size > prefix.len() as u64;
        Ok(Self {
            path: path.to_path_buf(),
            size,
            delimiter: sniff(&prefix, truncated),
        })
    }

    /// Same as [`IncomingFile::inspect`] for data already in memory
    pub fn from_bytes(path: impl Into<PathBuf>, bytes: &[u8], sniff_bytes: usize) -> Self {
        let prefix = &bytes[..bytes.len().min(sniff_bytes)];
        Self {
            path: path.into(),
            size: bytes.len() as u64,
            delimiter: sniff(prefix, prefix.len() < bytes.len()),
        }
    }

    /// Final path component, lossily converted
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
