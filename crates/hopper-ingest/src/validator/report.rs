use serde::Serialize;

/// The validation checks, in the order they run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Delimiter,
    ColumnCount,
    MandatoryHeaders,
    MissingValues,
    Duplicates,
    EmbeddedDelimiter,
    Format,
    TypeConsistency,
}

impl CheckKind {
    /// Canonical order
    pub const ALL: [CheckKind; 8] = [
        CheckKind::Delimiter,
        CheckKind::ColumnCount,
        CheckKind::MandatoryHeaders,
        CheckKind::MissingValues,
        CheckKind::Duplicates,
        CheckKind::EmbeddedDelimiter,
        CheckKind::Format,
        CheckKind::TypeConsistency,
    ];

    /// Whether a failure of this check invalidates the file
    pub fn is_blocking(self) -> bool {
        !matches!(self, CheckKind::MissingValues)
    }

    pub fn label(self) -> &'static str {
        match self {
            CheckKind::Delimiter => "delimiter",
            CheckKind::ColumnCount => "column_count",
            CheckKind::MandatoryHeaders => "mandatory_headers",
            CheckKind::MissingValues => "missing_values",
            CheckKind::Duplicates => "duplicates",
            CheckKind::EmbeddedDelimiter => "embedded_delimiter",
            CheckKind::Format => "format",
            CheckKind::TypeConsistency => "type_consistency",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Passed,
    Warning,
    Failed,
    Skipped,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Passed => "passed",
            CheckStatus::Warning => "warning",
            CheckStatus::Failed => "failed",
            CheckStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub kind: CheckKind,
    pub blocking: bool,
    pub status: CheckStatus,
    pub messages: Vec<String>,
}

impl CheckResult {
    pub(crate) fn pending(kind: CheckKind) -> Self {
        Self {
            kind,
            blocking: kind.is_blocking(),
            status: CheckStatus::Passed,
            messages: Vec::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == CheckStatus::Failed
    }
}

/// Missing-value statistic for one column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMissing {
    pub column: String,
    pub missing: u64,
    /// Share of rows, 0-100
    pub percent: f64,
}

/// Outcome of validating one file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    /// Sniffed delimiter, if any
    pub delimiter: Option<char>,
    pub columns: Vec<String>,
    /// Data rows read (header excluded)
    pub rows: u64,
    /// One entry per [`CheckKind`], in canonical order
    pub checks: Vec<CheckResult>,
    pub missing: Vec<ColumnMissing>,
}

impl ValidationReport {
    /// True when no blocking check failed
    pub fn is_valid(&self) -> bool {
        !self.checks.iter().any(|c| c.blocking && c.is_failed())
    }

    pub fn check(&self, kind: CheckKind) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.kind == kind)
    }

    pub fn status(&self, kind: CheckKind) -> Option<CheckStatus> {
        self.check(kind).map(|c| c.status)
    }

    pub fn first_failure(&self) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.blocking && c.is_failed())
    }

    /// One-line description of the first blocking failure
    pub fn failure_summary(&self) -> Option<String> {
        self.first_failure().map(|check| match check.messages.first() {
            Some(message) => format!("{} check failed: {}", check.kind, message),
            None => format!("{} check failed", check.kind),
        })
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Warning)
    }
}

impl std::fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let delimiter = match self.delimiter {
            Some('\t') => "\\t".to_string(),
            Some(d) => d.to_string(),
            None => "-".to_string(),
        };
        writeln!(
            f,
            "verdict: {}  rows: {}  columns: {}  delimiter: {}",
            if self.is_valid() { "valid" } else { "invalid" },
            self.rows,
            self.columns.len(),
            delimiter
        )?;

        for check in &self.checks {
            writeln!(
                f,
                "  {:<20} {:<8}{}",
                check.kind.label(),
                check.status.as_str(),
                if check.blocking { "" } else { " (advisory)" }
            )?;
            for message in &check.messages {
                writeln!(f, "      {}", message)?;
            }
        }

        Ok(())
    }
}
