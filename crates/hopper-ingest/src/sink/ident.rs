//! SQL identifier quoting
//!
//! Column and table names come straight from file headers and file names, so
//! they are never spliced into SQL unquoted.

use thiserror::Error;

/// Longest identifier Postgres keeps without truncating
pub const MAX_IDENT_BYTES: usize = 63;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentError {
    #[error("identifier is empty")]
    Empty,

    #[error("identifier {0:?} contains a NUL byte")]
    Nul(String),

    #[error("identifier '{0}' is longer than {max} bytes", max = MAX_IDENT_BYTES)]
    TooLong(String),
}

/// A validated identifier and its double-quoted SQL form
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuotedIdent {
    raw: String,
    quoted: String,
}

impl QuotedIdent {
    pub fn new(name: impl Into<String>) -> Result<Self, IdentError> {
        let raw = name.into();
        if raw.is_empty() {
            return Err(IdentError::Empty);
        }
        if raw.contains('\0') {
            return Err(IdentError::Nul(raw));
        }
        if raw.len() > MAX_IDENT_BYTES {
            return Err(IdentError::TooLong(raw));
        }

        let quoted = format!("\"{}\"", raw.replace('"', "\"\""));
        Ok(Self { raw, quoted })
    }

    /// The name as given
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The name ready to splice into SQL
    pub fn quoted(&self) -> &str {
        &self.quoted
    }
}

impl std::fmt::Display for QuotedIdent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.quoted)
    }
}

/// Turn a file stem into a lowercase table name
///
/// Runs of anything but ASCII letters and digits become one underscore, a
/// leading digit gets a `t_` prefix, and the result is cut to
/// [`MAX_IDENT_BYTES`]. Returns `None` when nothing usable is left.
pub fn table_name_from_stem(stem: &str) -> Option<String> {
    let mut name = String::with_capacity(stem.len());
    for c in stem.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('_') {
            name.push('_');
        }
    }

    let name = name.trim_matches('_');
    if name.is_empty() {
        return None;
    }

    let mut name = if name.starts_with(|c: char| c.is_ascii_digit()) {
        format!("t_{}", name)
    } else {
        name.to_string()
    };
    name.truncate(MAX_IDENT_BYTES);
    Some(name.trim_end_matches('_').to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_quoting() {
        assert_eq!(QuotedIdent::new("email").unwrap().quoted(), "\"email\"");
        assert_eq!(
            QuotedIdent::new("say \"hi\"").unwrap().quoted(),
            "\"say \"\"hi\"\"\""
        );
        assert_eq!(
            QuotedIdent::new("x\"; DROP TABLE t; --").unwrap().to_string(),
            "\"x\"\"; DROP TABLE t; --\""
        );
    }

    #[test]
    fn test_rejections() {
        assert_eq!(QuotedIdent::new(""), Err(IdentError::Empty));
        assert!(matches!(QuotedIdent::new("a\0b"), Err(IdentError::Nul(_))));

        let long = "x".repeat(MAX_IDENT_BYTES + 1);
        assert!(matches!(QuotedIdent::new(long), Err(IdentError::TooLong(_))));
        assert!(QuotedIdent::new("x".repeat(MAX_IDENT_BYTES)).is_ok());
    }

    #[test]
    fn test_too_long_counts_bytes() {
        // 32 two-byte characters: 32 chars but 64 bytes
        let name = "é".repeat(32);
        assert!(matches!(QuotedIdent::new(name), Err(IdentError::TooLong(_))));
    }

    #[test]
    fn test_table_name_from_stem() {
        assert_eq!(table_name_from_stem("Orders 2024-Q1").as_deref(), Some("orders_2024_q1"));
        assert_eq!(table_name_from_stem("2024_sales").as_deref(), Some("t_2024_sales"));
        assert_eq!(table_name_from_stem("--data--").as_deref(), Some("data"));
        assert_eq!(table_name_from_stem("ünïcode"), Some("n_code".to_string()));
        assert_eq!(table_name_from_stem("..."), None);

        let long = table_name_from_stem(&"a".repeat(100)).unwrap();
        assert_eq!(long.len(), MAX_IDENT_BYTES);
    }
}
