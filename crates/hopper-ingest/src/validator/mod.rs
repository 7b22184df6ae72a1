//! File validation
//!
//! One [`Validator`] holds the compiled rules and runs the canonical check
//! list over either a streamed file ([`Validator::validate_path`]) or an
//! in-memory [`Dataset`] ([`Validator::validate`]). Both paths feed the same
//! check pass, so ordering and halting behave identically.
//!
//! Checks run in the order of [`CheckKind::ALL`]. The first failing blocking
//! check halts the run and every later check is reported as skipped.

pub mod report;
pub mod sniff;

pub use report::{CheckKind, CheckResult, CheckStatus, ColumnMissing, ValidationReport};
pub use sniff::SniffError;

use crate::dataset::{Dataset, DatasetError, DatasetReader, IncomingFile, Row, Schema};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{BufReader, Read};
use std::path::Path;
use thiserror::Error;

/// Pattern for the default `email` format rule
pub const DEFAULT_EMAIL_PATTERN: &str = r"^[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9-.]+$";

/// Messages kept per check; the rest are counted
const MAX_MESSAGES: usize = 10;

const SKIPPED_AFTER_FAILURE: &str = "not run: an earlier blocking check failed";

/// A column whose non-null values must match a pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatRule {
    /// Column name, matched case-insensitively
    pub column: String,
    pub pattern: String,
}

impl Default for FormatRule {
    fn default() -> Self {
        Self {
            column: "email".to_string(),
            pattern: DEFAULT_EMAIL_PATTERN.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    pub expected_delimiter: u8,
    pub mandatory_columns: Vec<String>,
    /// Missing share (0-1) above which a column gets a warning
    pub missing_threshold: f64,
    /// Numeric share (0-1) above which a column must be fully numeric
    pub numeric_majority: f64,
    /// `None` disables the format check
    pub format: Option<FormatRule>,
    pub chunk_size: usize,
    pub sniff_bytes: usize,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            expected_delimiter: b',',
            mandatory_columns: Vec::new(),
            missing_threshold: 0.3,
            numeric_majority: 0.5,
            format: Some(FormatRule::default()),
            chunk_size: 100,
            sniff_bytes: 1024,
        }
    }
}

#[derive(Error, Debug)]
pub enum ValidatorError {
    #[error("invalid format pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("chunk size must be greater than 0")]
    ChunkSize,
}

#[derive(Debug)]
struct CompiledFormat {
    column: String,
    regex: Regex,
}

/// Compiled validation rules; cheap to share behind an `Arc`
#[derive(Debug)]
pub struct Validator {
    config: ValidationConfig,
    format: Option<CompiledFormat>,
}

impl Validator {
    pub fn new(config: ValidationConfig) -> Result<Self, ValidatorError> {
        if config.chunk_size == 0 {
            return Err(ValidatorError::ChunkSize);
        }

        let format = match &config.format {
            Some(rule) => Some(CompiledFormat {
                column: rule.column.clone(),
                regex: Regex::new(&rule.pattern).map_err(|source| ValidatorError::Pattern {
                    pattern: rule.pattern.clone(),
                    source,
                })?,
            }),
            None => None,
        };

        Ok(Self { config, format })
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Validate an already parsed dataset
    pub fn validate(&self, file: &IncomingFile, dataset: &Dataset) -> ValidationReport {
        let mut run = ValidationRun::new(self);
        if run.delimiter(&file.delimiter).is_some() {
            run.schema(dataset.schema.clone());
            for chunk in dataset.rows.chunks(self.config.chunk_size) {
                if run.halted() {
                    break;
                }
                run.chunk(chunk);
            }
        }
        run.finish()
    }

    /// Validate a file on disk, streaming it in chunks
    pub fn validate_path(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<(IncomingFile, ValidationReport), DatasetError> {
        let path = path.as_ref();
        let file = IncomingFile::inspect(path, self.config.sniff_bytes)?;
        let reader = BufReader::new(std::fs::File::open(path)?);
        let report = self.validate_reader(&file, reader)?;
        Ok((file, report))
    }

    /// Validate raw bytes
    pub fn validate_bytes(&self, bytes: &[u8]) -> Result<ValidationReport, DatasetError> {
        let file = IncomingFile::from_bytes("<memory>", bytes, self.config.sniff_bytes);
        self.validate_reader(&file, bytes)
    }

    /// Validate the content of `reader`, described by `file`
    ///
    /// Only I/O errors are returned; unreadable records fail the column-count
    /// check instead.
    pub fn validate_reader<R: Read>(
        &self,
        file: &IncomingFile,
        reader: R,
    ) -> Result<ValidationReport, DatasetError> {
        let mut run = ValidationRun::new(self);
        let Some(delimiter) = run.delimiter(&file.delimiter) else {
            return Ok(run.finish());
        };

        let mut records = DatasetReader::new(reader, delimiter);
        match records.read_header() {
            Ok(Some(header)) => match Schema::new(header) {
                Ok(schema) => run.schema(schema),
                Err(err) => run.fail(CheckKind::ColumnCount, format!("invalid header: {}", err)),
            },
            Ok(None) => run.fail(CheckKind::ColumnCount, DatasetError::NoHeader.to_string()),
            Err(DatasetError::Io(err)) => return Err(DatasetError::Io(err)),
            Err(err) => run.fail(CheckKind::ColumnCount, err.to_string()),
        }

        while !run.halted() {
            match records.next_chunk(self.config.chunk_size) {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(chunk) => run.chunk(&chunk),
                Err(DatasetError::Io(err)) => return Err(DatasetError::Io(err)),
                Err(err) => run.fail(CheckKind::ColumnCount, err.to_string()),
            }
        }

        Ok(run.finish())
    }
}

#[derive(Debug, Default, Clone)]
struct NumericStats {
    non_null: u64,
    numeric: u64,
    non_numeric: u64,
    first_non_numeric: Option<(u64, String)>,
}

/// State of one validation pass
struct ValidationRun<'a> {
    validator: &'a Validator,
    checks: Vec<CheckResult>,
    overflow: Vec<usize>,
    halted: bool,
    delimiter: Option<u8>,
    schema: Option<Schema>,
    format_index: Option<usize>,
    rows: u64,
    missing: Vec<u64>,
    seen: HashMap<[u8; 32], u64>,
    numeric: Vec<NumericStats>,
}

impl<'a> ValidationRun<'a> {
    fn new(validator: &'a Validator) -> Self {
        Self {
            validator,
            checks: CheckKind::ALL.iter().map(|&k| CheckResult::pending(k)).collect(),
            overflow: vec![0; CheckKind::ALL.len()],
            halted: false,
            delimiter: None,
            schema: None,
            format_index: None,
            rows: 0,
            missing: Vec::new(),
            seen: HashMap::new(),
            numeric: Vec::new(),
        }
    }

    fn halted(&self) -> bool {
        self.halted
    }

    fn note(&mut self, kind: CheckKind, message: String) {
        let check = &mut self.checks[kind.index()];
        if check.messages.len() < MAX_MESSAGES {
            check.messages.push(message);
        } else {
            self.overflow[kind.index()] += 1;
        }
    }

    fn fail(&mut self, kind: CheckKind, message: String) {
        self.note(kind, message);
        self.checks[kind.index()].status = CheckStatus::Failed;
        if kind.is_blocking() {
            self.halted = true;
        }
    }

    fn skip(&mut self, kind: CheckKind, message: impl Into<String>) {
        let check = &mut self.checks[kind.index()];
        check.status = CheckStatus::Skipped;
        check.messages.push(message.into());
    }

    /// Delimiter check; returns the delimiter to parse with when it passed
    fn delimiter(&mut self, sniffed: &Result<u8, SniffError>) -> Option<u8> {
        let expected = self.validator.config.expected_delimiter;
        match sniffed {
            Err(err) => self.fail(CheckKind::Delimiter, err.to_string()),
            Ok(found) if *found != expected => {
                self.delimiter = Some(*found);
                self.fail(
                    CheckKind::Delimiter,
                    format!(
                        "detected delimiter {:?} but expected {:?}",
                        *found as char, expected as char
                    ),
                );
            },
            Ok(found) => self.delimiter = Some(*found),
        }
        if self.halted {
            None
        } else {
            self.delimiter
        }
    }

    /// Header is known; resolve column-dependent checks
    fn schema(&mut self, schema: Schema) {
        let validator = self.validator;
        let config = &validator.config;

        if config.mandatory_columns.is_empty() {
            self.skip(CheckKind::MandatoryHeaders, "no mandatory columns configured");
        } else {
            let absent: Vec<&str> = config
                .mandatory_columns
                .iter()
                .filter(|c| !schema.contains(c))
                .map(String::as_str)
                .collect();
            if !absent.is_empty() {
                let message = format!("missing mandatory columns: {}", absent.join(", "));
                self.fail(CheckKind::MandatoryHeaders, message);
            }
        }

        match &validator.format {
            None => self.skip(CheckKind::Format, "format check disabled"),
            Some(format) => {
                self.format_index = schema.position_ignore_case(&format.column);
                if self.format_index.is_none() {
                    let message = format!("column '{}' not present", format.column);
                    self.skip(CheckKind::Format, message);
                }
            },
        }

        self.missing = vec![0; schema.len()];
        self.numeric = vec![NumericStats::default(); schema.len()];
        self.schema = Some(schema);
    }

    fn chunk(&mut self, rows: &[Row]) {
        let Some(schema) = self.schema.take() else {
            return;
        };
        self.rows += rows.len() as u64;

        self.check_column_count(&schema, rows);
        if !self.halted {
            self.count_missing(rows);
            self.check_duplicates(rows);
        }
        if !self.halted {
            self.check_embedded_delimiter(&schema, rows);
        }
        if !self.halted {
            self.check_format(&schema, rows);
        }
        if !self.halted {
            self.collect_numeric(rows);
        }

        self.schema = Some(schema);
    }

    fn check_column_count(&mut self, schema: &Schema, rows: &[Row]) {
        let mut failed = false;
        for row in rows.iter().filter(|r| r.values.len() != schema.len()) {
            let message = format!(
                "line {}: expected {} fields, found {}",
                row.line,
                schema.len(),
                row.values.len()
            );
            self.note(CheckKind::ColumnCount, message);
            failed = true;
        }
        if failed {
            self.checks[CheckKind::ColumnCount.index()].status = CheckStatus::Failed;
            self.halted = true;
        }
    }

    fn count_missing(&mut self, rows: &[Row]) {
        for row in rows {
            for (count, value) in self.missing.iter_mut().zip(&row.values) {
                if value.is_none() {
                    *count += 1;
                }
            }
        }
    }

    fn check_duplicates(&mut self, rows: &[Row]) {
        let mut failed = false;
        for row in rows {
            let digest = row_digest(row);
            match self.seen.get(&digest) {
                Some(&first) => {
                    let message = format!("line {} duplicates line {}", row.line, first);
                    self.note(CheckKind::Duplicates, message);
                    failed = true;
                },
                None => {
                    self.seen.insert(digest, row.line);
                },
            }
        }
        if failed {
            self.checks[CheckKind::Duplicates.index()].status = CheckStatus::Failed;
            self.halted = true;
        }
    }

    fn check_embedded_delimiter(&mut self, schema: &Schema, rows: &[Row]) {
        let Some(delimiter) = self.delimiter else {
            return;
        };
        let doubled = [delimiter, delimiter];

        let mut failed = false;
        for row in rows {
            for (column, value) in schema.columns().iter().zip(&row.values) {
                let Some(value) = value else { continue };
                if value.as_bytes().windows(2).any(|w| w == doubled) {
                    let message = format!(
                        "line {}, column '{}': field contains consecutive delimiters",
                        row.line, column
                    );
                    self.note(CheckKind::EmbeddedDelimiter, message);
                    failed = true;
                }
            }
        }
        if failed {
            self.checks[CheckKind::EmbeddedDelimiter.index()].status = CheckStatus::Failed;
            self.halted = true;
        }
    }

    fn check_format(&mut self, schema: &Schema, rows: &[Row]) {
        let validator = self.validator;
        let (Some(index), Some(format)) = (self.format_index, validator.format.as_ref()) else {
            return;
        };
        let column = &schema.columns()[index];

        let mut failed = false;
        for row in rows {
            let Some(Some(value)) = row.values.get(index) else {
                continue;
            };
            if !format.regex.is_match(value) {
                let message = format!(
                    "line {}: '{}' in column '{}' does not match the expected format",
                    row.line, value, column
                );
                self.note(CheckKind::Format, message);
                failed = true;
            }
        }
        if failed {
            self.checks[CheckKind::Format.index()].status = CheckStatus::Failed;
            self.halted = true;
        }
    }

    fn collect_numeric(&mut self, rows: &[Row]) {
        for row in rows {
            for (stats, value) in self.numeric.iter_mut().zip(&row.values) {
                let Some(value) = value else { continue };
                stats.non_null += 1;
                if value.trim().parse::<f64>().is_ok() {
                    stats.numeric += 1;
                } else {
                    stats.non_numeric += 1;
                    if stats.first_non_numeric.is_none() {
                        stats.first_non_numeric = Some((row.line, value.clone()));
                    }
                }
            }
        }
    }

    fn conclude_missing(&mut self) -> Vec<ColumnMissing> {
        let Some(schema) = self.schema.take() else {
            return Vec::new();
        };
        let threshold = self.validator.config.missing_threshold * self.rows as f64;

        let counts = std::mem::take(&mut self.missing);
        let mut stats = Vec::with_capacity(schema.len());
        for (column, &missing) in schema.columns().iter().zip(&counts) {
            let percent = if self.rows == 0 {
                0.0
            } else {
                missing as f64 * 100.0 / self.rows as f64
            };
            if missing as f64 > threshold {
                let message = format!("column '{}' is {:.1}% missing", column, percent);
                self.note(CheckKind::MissingValues, message);
                self.checks[CheckKind::MissingValues.index()].status = CheckStatus::Warning;
            }
            stats.push(ColumnMissing {
                column: column.clone(),
                missing,
                percent,
            });
        }

        self.missing = counts;
        self.schema = Some(schema);
        stats
    }

    fn conclude_types(&mut self) {
        let Some(schema) = self.schema.take() else {
            return;
        };
        let majority = self.validator.config.numeric_majority;

        let numeric = std::mem::take(&mut self.numeric);
        let mut failed = false;
        for (column, stats) in schema.columns().iter().zip(&numeric) {
            let predominantly_numeric =
                stats.non_null > 0 && stats.numeric as f64 > majority * stats.non_null as f64;
            if !predominantly_numeric || stats.non_numeric == 0 {
                continue;
            }
            if let Some((line, value)) = &stats.first_non_numeric {
                let message = format!(
                    "column '{}' is numeric but line {} has '{}' ({} non-numeric value(s))",
                    column, line, value, stats.non_numeric
                );
                self.note(CheckKind::TypeConsistency, message);
                failed = true;
            }
        }
        if failed {
            self.checks[CheckKind::TypeConsistency.index()].status = CheckStatus::Failed;
            self.halted = true;
        }

        self.numeric = numeric;
        self.schema = Some(schema);
    }

    fn finish(mut self) -> ValidationReport {
        let failed_at = self
            .checks
            .iter()
            .position(|c| c.blocking && c.is_failed());

        let reached_missing = failed_at.map_or(true, |i| i > CheckKind::MissingValues.index());
        let missing = if reached_missing && self.schema.is_some() {
            self.conclude_missing()
        } else {
            Vec::new()
        };

        if failed_at.is_none() && self.schema.is_some() {
            self.conclude_types();
        }

        if let Some(index) = failed_at {
            for check in self.checks.iter_mut().skip(index + 1) {
                check.status = CheckStatus::Skipped;
                check.messages = vec![SKIPPED_AFTER_FAILURE.to_string()];
            }
        }

        for (check, extra) in self.checks.iter_mut().zip(&self.overflow) {
            if *extra > 0 {
                check.messages.push(format!("... and {} more", extra));
            }
        }

        ValidationReport {
            delimiter: self.delimiter.map(char::from),
            columns: self
                .schema
                .as_ref()
                .map(|s| s.columns().to_vec())
                .unwrap_or_default(),
            rows: self.rows,
            checks: self.checks,
            missing,
        }
    }
}

/// SHA-256 over the row's values, with missing values distinct from any text
fn row_digest(row: &Row) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for value in &row.values {
        match value {
            Some(text) => {
                hasher.update([1u8]);
                hasher.update((text.len() as u64).to_le_bytes());
                hasher.update(text.as_bytes());
            },
            None => hasher.update([0u8]),
        }
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&hasher.finalize());
    digest
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn validator() -> Validator {
        Validator::new(ValidationConfig::default()).unwrap()
    }

    fn validate(data: &str) -> ValidationReport {
        validator().validate_bytes(data.as_bytes()).unwrap()
    }

    #[test]
    fn test_clean_file_passes() {
        let report = validate("id,email,amount\n1,a@b.com,10\n2,c@d.org,20.5\n");

        assert!(report.is_valid(), "{}", report);
        assert_eq!(report.rows, 2);
        assert_eq!(report.delimiter, Some(','));
        assert_eq!(report.columns, ["id", "email", "amount"]);
        assert_eq!(report.status(CheckKind::MandatoryHeaders), Some(CheckStatus::Skipped));
        assert_eq!(report.status(CheckKind::Format), Some(CheckStatus::Passed));
        assert_eq!(report.status(CheckKind::TypeConsistency), Some(CheckStatus::Passed));
    }

    #[test]
    fn test_ragged_row_fails_column_count() {
        let report = validate("id,name,city\n1,a,x\n2,b\n3,c,z\n");

        assert!(!report.is_valid());
        let check = report.check(CheckKind::ColumnCount).unwrap();
        assert_eq!(check.status, CheckStatus::Failed);
        assert_eq!(check.messages, ["line 3: expected 3 fields, found 2"]);
        assert_eq!(report.status(CheckKind::Duplicates), Some(CheckStatus::Skipped));
    }

    #[test]
    fn test_duplicate_fails_before_format() {
        let report = validate("id,email,amount\n1,a@b.com,10\n2,bad-email,20\n1,a@b.com,10\n");

        assert!(!report.is_valid());
        assert_eq!(report.first_failure().unwrap().kind, CheckKind::Duplicates);
        assert_eq!(report.status(CheckKind::Format), Some(CheckStatus::Skipped));
        assert_eq!(report.status(CheckKind::TypeConsistency), Some(CheckStatus::Skipped));
        assert_eq!(
            report.check(CheckKind::Duplicates).unwrap().messages,
            ["line 4 duplicates line 2"]
        );
    }

    #[test]
    fn test_blank_lines_count_towards_line_numbers() {
        let report = validate("id,name\n1,a\n\n\n1,a\n");
        assert_eq!(
            report.check(CheckKind::Duplicates).unwrap().messages,
            ["line 5 duplicates line 2"]
        );
    }

    #[test]
    fn test_duplicates_across_chunks() {
        let config = ValidationConfig {
            chunk_size: 2,
            ..ValidationConfig::default()
        };
        let validator = Validator::new(config).unwrap();
        let report = validator
            .validate_bytes(b"id,name\n1,a\n2,b\n3,c\n1,a\n")
            .unwrap();

        assert_eq!(report.first_failure().unwrap().kind, CheckKind::Duplicates);
    }

    #[test]
    fn test_non_numeric_value_in_numeric_column() {
        let report = validate("id,amount\n1,10\n2,12a\n3,30\n");

        let failure = report.first_failure().unwrap();
        assert_eq!(failure.kind, CheckKind::TypeConsistency);
        assert!(failure.messages[0].contains("'12a'"), "{:?}", failure.messages);
    }

    #[test]
    fn test_mostly_text_column_is_not_numeric() {
        let report = validate("id,code\n1,A1\n2,B2\n3,7\n");
        assert!(report.is_valid(), "{}", report);
    }

    #[test]
    fn test_empty_file_skips_everything_after_delimiter() {
        let report = validate("");

        assert!(!report.is_valid());
        assert_eq!(report.first_failure().unwrap().kind, CheckKind::Delimiter);
        for check in &report.checks[1..] {
            assert_eq!(check.status, CheckStatus::Skipped, "{:?}", check.kind);
        }
    }

    #[test]
    fn test_unexpected_delimiter() {
        let report = validate("a;b\n1;2\n");

        assert_eq!(report.delimiter, Some(';'));
        assert_eq!(report.first_failure().unwrap().kind, CheckKind::Delimiter);
    }

    #[test]
    fn test_missing_values_are_advisory() {
        let report = validate("id,note\n1,NA\n2,\n3,x\n");

        assert!(report.is_valid(), "{}", report);
        assert_eq!(report.status(CheckKind::MissingValues), Some(CheckStatus::Warning));
        let note = &report.missing[1];
        assert_eq!(note.column, "note");
        assert_eq!(note.missing, 2);
        assert!((note.percent - 66.666).abs() < 0.01);
    }

    #[test]
    fn test_embedded_double_delimiter() {
        let report = validate("id,text\n1,\"a,,b\"\n");
        assert_eq!(report.first_failure().unwrap().kind, CheckKind::EmbeddedDelimiter);
    }

    #[test]
    fn test_format_column_matched_case_insensitively() {
        let report = validate("id,EMAIL\n1,not-an-address\n");
        assert_eq!(report.first_failure().unwrap().kind, CheckKind::Format);
    }

    #[test]
    fn test_format_check_disabled() {
        let config = ValidationConfig {
            format: None,
            ..ValidationConfig::default()
        };
        let report = Validator::new(config)
            .unwrap()
            .validate_bytes(b"id,email\n1,not-an-address\n")
            .unwrap();

        assert!(report.is_valid());
        assert_eq!(report.status(CheckKind::Format), Some(CheckStatus::Skipped));
    }

    #[test]
    fn test_mandatory_columns() {
        let config = ValidationConfig {
            mandatory_columns: vec!["id".to_string(), "email".to_string()],
            ..ValidationConfig::default()
        };
        let report = Validator::new(config)
            .unwrap()
            .validate_bytes(b"id,name\n1,a\n")
            .unwrap();

        let failure = report.first_failure().unwrap();
        assert_eq!(failure.kind, CheckKind::MandatoryHeaders);
        assert_eq!(failure.messages, ["missing mandatory columns: email"]);
    }

    #[test]
    fn test_duplicate_header_fails_column_count() {
        let report = validate("id,id\n1,2\n");
        assert_eq!(report.first_failure().unwrap().kind, CheckKind::ColumnCount);
        assert_eq!(report.status(CheckKind::MandatoryHeaders), Some(CheckStatus::Skipped));
    }

    #[test]
    fn test_message_cap() {
        let mut data = String::from("id,name,city\n");
        for i in 0..25 {
            data.push_str(&format!("{},x\n", i));
        }
        let report = validate(&data);

        let messages = &report.check(CheckKind::ColumnCount).unwrap().messages;
        assert_eq!(messages.len(), MAX_MESSAGES + 1);
        assert_eq!(messages.last().unwrap(), "... and 15 more");
    }

    #[test]
    fn test_report_is_deterministic() {
        let data = "id,email,amount\n1,a@b.com,10\n2,,NA\n";
        assert_eq!(validate(data), validate(data));
    }

    #[test]
    fn test_in_memory_and_streaming_agree() {
        let data = b"id,email,amount\n1,a@b.com,10\n2,bad-email,20\n";
        let validator = validator();

        let file = IncomingFile::from_bytes("x.csv", data, 1024);
        let dataset = Dataset::from_bytes(data, b',').unwrap();

        assert_eq!(
            validator.validate(&file, &dataset),
            validator.validate_bytes(data).unwrap()
        );
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        let config = ValidationConfig {
            format: Some(FormatRule {
                column: "email".to_string(),
                pattern: "([".to_string(),
            }),
            ..ValidationConfig::default()
        };
        assert!(matches!(
            Validator::new(config),
            Err(ValidatorError::Pattern { .. })
        ));
    }
}
