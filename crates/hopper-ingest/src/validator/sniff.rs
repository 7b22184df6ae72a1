//! Delimiter detection from a byte prefix
//!
//! A candidate wins when the same number of occurrences shows up on (nearly)
//! every record of the sample. Text inside double quotes is ignored, and a
//! quoted field may span lines.

use thiserror::Error;

/// Delimiters tried, in order of preference on ties
pub const CANDIDATES: [u8; 5] = [b',', b'\t', b';', b'|', b':'];

/// Share of records that must agree on the modal count
const CONSISTENCY: f64 = 0.9;

/// Share of records that must match the header when no candidate is consistent
const HEADER_MAJORITY: f64 = 0.5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SniffError {
    #[error("file is empty")]
    Empty,

    #[error("could not determine a consistent delimiter")]
    Undetermined,
}

/// Detect the delimiter of `sample`
///
/// `truncated` tells whether the sample is a prefix of a longer file, in which
/// case the trailing partial record is ignored.
pub fn sniff(sample: &[u8], truncated: bool) -> Result<u8, SniffError> {
    if sample.iter().all(u8::is_ascii_whitespace) {
        return Err(SniffError::Empty);
    }

    let records = record_counts(sample, truncated);
    if records.is_empty() {
        return Err(SniffError::Undetermined);
    }

    let mut best: Option<(u8, f64)> = None;
    for (index, &candidate) in CANDIDATES.iter().enumerate() {
        let counts: Vec<usize> = records.iter().map(|r| r[index]).collect();
        let (mode, frequency) = modal_count(&counts);
        if mode == 0 {
            continue;
        }

        let share = frequency as f64 / records.len() as f64;
        if share < CONSISTENCY {
            continue;
        }

        match best {
            Some((_, best_share)) if best_share >= share => {},
            _ => best = Some((candidate, share)),
        }
    }

    best.or_else(|| header_fallback(&records))
        .map(|(delimiter, _)| delimiter)
        .ok_or(SniffError::Undetermined)
}

/// Candidate present in the header whose count most records repeat
///
/// Lets a file with a few ragged rows keep its delimiter so the field count
/// check can point at the rows that disagree.
fn header_fallback(records: &[[usize; CANDIDATES.len()]]) -> Option<(u8, f64)> {
    let header = records.first()?;

    let mut best: Option<(u8, f64)> = None;
    for (index, &candidate) in CANDIDATES.iter().enumerate() {
        let expected = header[index];
        if expected == 0 {
            continue;
        }

        let agreeing = records.iter().filter(|r| r[index] == expected).count();
        let share = agreeing as f64 / records.len() as f64;
        if share < HEADER_MAJORITY {
            continue;
        }

        match best {
            Some((_, best_share)) if best_share >= share => {},
            _ => best = Some((candidate, share)),
        }
    }

    best
}

/// Per-record occurrence counts of every candidate, quoted text excluded
fn record_counts(sample: &[u8], truncated: bool) -> Vec<[usize; CANDIDATES.len()]> {
    let mut records = Vec::new();
    let mut current = [0usize; CANDIDATES.len()];
    let mut has_content = false;
    let mut in_quotes = false;

    for &byte in sample {
        match byte {
            b'"' => {
                in_quotes = !in_quotes;
                has_content = true;
            },
            b'\n' if !in_quotes => {
                if has_content {
                    records.push(current);
                }
                current = [0; CANDIDATES.len()];
                has_content = false;
            },
            _ if in_quotes => {},
            _ => {
                if let Some(index) = CANDIDATES.iter().position(|&c| c == byte) {
                    current[index] += 1;
                }
                if !byte.is_ascii_whitespace() {
                    has_content = true;
                }
            },
        }
    }

    // A cut-off last record would skew the counts, unless it is all we have.
    if has_content && (!truncated || records.is_empty()) {
        records.push(current);
    }

    records
}

/// Most frequent value and its frequency; ties go to the larger value
fn modal_count(counts: &[usize]) -> (usize, usize) {
    let mut frequencies: std::collections::BTreeMap<usize, usize> = Default::default();
    for &count in counts {
        *frequencies.entry(count).or_default() += 1;
    }

    frequencies
        .into_iter()
        .fold((0, 0), |(mode, freq), (value, n)| {
            if n >= freq {
                (value, n)
            } else {
                (mode, freq)
            }
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_comma_file() {
        let sample = b"id,email,amount\n1,a@b.com,10\n2,c@d.com,20\n";
        assert_eq!(sniff(sample, false), Ok(b','));
    }

    #[test]
    fn test_semicolon_with_commas_in_quotes() {
        let sample = b"name;note\n\"Doe, Jane\";\"a, b, c\"\nSmith;plain\n";
        assert_eq!(sniff(sample, false), Ok(b';'));
    }

    #[test]
    fn test_tab_separated() {
        let sample = b"a\tb\tc\n1\t2\t3\n";
        assert_eq!(sniff(sample, false), Ok(b'\t'));
    }

    #[test]
    fn test_empty_and_blank_input() {
        assert_eq!(sniff(b"", false), Err(SniffError::Empty));
        assert_eq!(sniff(b"  \n\r\n", false), Err(SniffError::Empty));
    }

    #[test]
    fn test_single_column_is_undetermined() {
        assert_eq!(sniff(b"id\n1\n2\n", false), Err(SniffError::Undetermined));
    }

    #[test]
    fn test_truncated_partial_record_is_ignored() {
        // The last record was cut off mid-way and only has one comma.
        let sample = b"a,b,c\n1,2,3\n4,5,6\n7,8,9\n10,11,12\n13,14,15\n16,17,18\n19,20,21\n22,23,24\n25,26";
        assert_eq!(sniff(sample, true), Ok(b','));
    }

    #[test]
    fn test_inconsistent_counts_are_rejected() {
        let sample = b"a,b\n1,2,3,4\n5\n6,7,8\n";
        assert_eq!(sniff(sample, false), Err(SniffError::Undetermined));
    }

    #[test]
    fn test_one_ragged_row_keeps_header_delimiter() {
        let sample = b"id,name,city\n1,a,x\n2,b\n3,c,z\n";
        assert_eq!(sniff(sample, false), Ok(b','));
    }

    #[test]
    fn test_tie_prefers_earlier_candidate() {
        assert_eq!(sniff(b"a,b:c\n", false), Ok(b','));
    }

    #[test]
    fn test_crlf_line_endings() {
        let sample = b"id|name\r\n1|x\r\n2|y\r\n";
        assert_eq!(sniff(sample, false), Ok(b'|'));
    }
}
