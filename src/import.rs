use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::error::ImportError;

/// One CSV row keyed by normalized header.
pub type RawRecord = HashMap<String, String>;

#[derive(Debug, Default)]
pub struct ParsedCsv {
    pub records: Vec<RawRecord>,
    pub row_errors: usize,
}

static HEADER_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\s_-]+").expect("static header pattern"));

/// `" User-Email "` and `"user email"` both become `user_email`.
pub fn normalize_header(header: &str) -> String {
    let lowered = header.trim().to_lowercase();
    HEADER_SEPARATORS.replace_all(&lowered, "_").into_owned()
}

pub fn read_csv(path: &Path) -> Result<ParsedCsv, ImportError> {
    let bytes = std::fs::read(path)?;
    parse_csv(&bytes)
}

/// Parses CSV bytes with a header row into raw records.
///
/// Rows that fail to decode are counted in `row_errors`. The whole input is
/// rejected only when it is empty, has no header, or every row failed.
pub fn parse_csv(bytes: &[u8]) -> Result<ParsedCsv, ImportError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(ImportError::EmptyInput);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers: Vec<String> = reader
        .headers()
        .map_err(ImportError::Header)?
        .iter()
        .map(normalize_header)
        .collect();

    if headers.iter().all(String::is_empty) {
        return Err(ImportError::MissingHeader);
    }

    let mut parsed = ParsedCsv::default();

    for (line, result) in reader.records().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                warn!(row = line + 1, error = %err, "skipping unreadable CSV row");
                parsed.row_errors += 1;
                continue;
            }
        };

        let record: RawRecord = headers
            .iter()
            .zip(row.iter())
            .filter(|(header, _)| !header.is_empty())
            .map(|(header, value)| (header.clone(), value.to_string()))
            .collect();
        parsed.records.push(record);
    }

    if parsed.records.is_empty() && parsed.row_errors > 0 {
        return Err(ImportError::Unparseable {
            errors: parsed.row_errors,
        });
    }

    debug!(
        rows = parsed.records.len(),
        row_errors = parsed.row_errors,
        "parsed CSV input"
    );
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_collapse_separators() {
        assert_eq!(normalize_header(" User Email "), "user_email");
        assert_eq!(normalize_header("user-email"), "user_email");
        assert_eq!(normalize_header("Opens__Count"), "opens_count");
        assert_eq!(normalize_header("Signup - Date"), "signup_date");
    }

    #[test]
    fn parses_rows_with_normalized_headers() {
        let csv = "User Email,Subscription Status,Opens Count\nA@x.com,Paid,12\nb@x.com,free,3\n";
        let parsed = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(parsed.row_errors, 0);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0]["user_email"], "A@x.com");
        assert_eq!(parsed.records[0]["subscription_status"], "Paid");
        assert_eq!(parsed.records[1]["opens_count"], "3");
    }

    #[test]
    fn skips_blank_lines_and_tolerates_ragged_rows() {
        let csv = "email,name,tier\n\na@x.com\nb@x.com,Bee,annual,extra\n";
        let parsed = parse_csv(csv.as_bytes()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert!(!parsed.records[0].contains_key("name"));
        assert_eq!(parsed.records[1]["tier"], "annual");
        assert_eq!(parsed.records[1].len(), 3);
    }

    #[test]
    fn header_only_is_zero_row_success() {
        let parsed = parse_csv(b"email,name\n").unwrap();
        assert!(parsed.records.is_empty());
        assert_eq!(parsed.row_errors, 0);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(parse_csv(b""), Err(ImportError::EmptyInput)));
        assert!(matches!(parse_csv(b" \n\t\n"), Err(ImportError::EmptyInput)));
    }

    #[test]
    fn all_rows_invalid_is_rejected() {
        let mut bytes = b"email\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        assert!(matches!(
            parse_csv(&bytes),
            Err(ImportError::Unparseable { errors: 1 })
        ));
    }

    #[test]
    fn some_invalid_rows_are_counted_not_fatal() {
        let mut bytes = b"email\na@x.com\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        let parsed = parse_csv(&bytes).unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.row_errors, 1);
    }
}
