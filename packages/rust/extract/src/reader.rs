//! Resilient CSV reading.
//!
//! Mirrors of the source data do not agree on a dialect, so parsing falls
//! back through three tiers:
//!
//! 1. **Strict**: comma delimiter, UTF-8 (BOM stripped), equal-width rows.
//! 2. **Sniffed**: delimiter detected among `,` `;` tab `|`, permissive
//!    quoting, lossy UTF-8.
//! 3. **Tolerant**: ragged or undecodable rows are discarded and counted.
//!
//! Falling past tier 1 is logged, never returned as an error.

use std::path::Path;

use csv::{ByteRecord, ReaderBuilder};
use salesetl_shared::{PipelineError, Result, Table, Value};
use tracing::{debug, warn};

/// Delimiters considered by the sniffer, in preference order.
pub const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Lines sampled when sniffing the delimiter.
const SNIFF_LINES: usize = 20;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Which fallback tier produced a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseTier {
    Strict,
    Sniffed,
    Tolerant,
}

/// How a file was parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcome {
    pub tier: ParseTier,
    pub delimiter: u8,
    /// Rows discarded by the tolerant tier.
    pub dropped_rows: usize,
}

impl ParseOutcome {
    /// True when parsing had to relax the strict dialect.
    pub fn is_degraded(&self) -> bool {
        self.tier != ParseTier::Strict || self.dropped_rows > 0
    }
}

/// Header plus raw text records, before type inference.
struct RawGrid {
    header: Vec<String>,
    records: Vec<Vec<String>>,
}

/// Read a CSV file through the three-tier fallback.
pub fn read_csv_robust(path: &Path) -> Result<(Table, ParseOutcome)> {
    let bytes = std::fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    let (table, outcome) = parse_csv_bytes(&bytes)
        .map_err(|e| PipelineError::parse(format!("{}: {e}", path.display())))?;

    if outcome.is_degraded() {
        warn!(
            path = %path.display(),
            tier = ?outcome.tier,
            delimiter = %char::from(outcome.delimiter).escape_default(),
            dropped_rows = outcome.dropped_rows,
            "CSV parsed with relaxed rules"
        );
    } else {
        debug!(path = %path.display(), rows = table.len(), "CSV parsed strictly");
    }
    Ok((table, outcome))
}

/// Parse CSV bytes through the three-tier fallback.
pub fn parse_csv_bytes(bytes: &[u8]) -> Result<(Table, ParseOutcome)> {
    let data = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let sniffed = sniff_delimiter(data);

    match parse_strict(data) {
        // A lone column under a comma reading usually means the file uses another delimiter.
        Ok(grid) if grid.header.len() == 1 && sniffed.is_some_and(|d| d != b',') => {
            debug!("strict parse produced a single column, retrying with sniffed delimiter");
        }
        Ok(grid) => {
            let outcome = ParseOutcome {
                tier: ParseTier::Strict,
                delimiter: b',',
                dropped_rows: 0,
            };
            return Ok((into_table(grid)?, outcome));
        }
        Err(e) => debug!(error = %e, "strict CSV parse failed"),
    }

    let delimiter = sniffed.unwrap_or(b',');
    match parse_permissive(data, delimiter) {
        Ok(grid) => {
            let outcome = ParseOutcome {
                tier: ParseTier::Sniffed,
                delimiter,
                dropped_rows: 0,
            };
            return Ok((into_table(grid)?, outcome));
        }
        Err(e) => debug!(error = %e, "permissive CSV parse failed"),
    }

    let (grid, dropped_rows) = parse_tolerant(data, delimiter)?;
    let outcome = ParseOutcome {
        tier: ParseTier::Tolerant,
        delimiter,
        dropped_rows,
    };
    Ok((into_table(grid)?, outcome))
}

fn parse_strict(data: &[u8]) -> std::result::Result<RawGrid, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b',')
        .has_headers(true)
        .flexible(false)
        .from_reader(data);

    let header = reader.headers()?.iter().map(|h| h.trim().to_string()).collect();
    let mut records = Vec::new();
    for record in reader.records() {
        records.push(record?.iter().map(str::to_string).collect());
    }
    Ok(RawGrid { header, records })
}

fn parse_permissive(data: &[u8], delimiter: u8) -> std::result::Result<RawGrid, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(false)
        .double_quote(true)
        .escape(Some(b'\\'))
        .from_reader(data);

    let header = decode_record(reader.byte_headers()?, true);
    let mut records = Vec::new();
    for record in reader.byte_records() {
        records.push(decode_record(&record?, false));
    }
    Ok(RawGrid { header, records })
}

fn parse_tolerant(data: &[u8], delimiter: u8) -> Result<(RawGrid, usize)> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(data);

    let header = decode_record(
        reader
            .byte_headers()
            .map_err(|e| PipelineError::parse(format!("unreadable header: {e}")))?,
        true,
    );

    let mut records = Vec::new();
    let mut dropped = 0;
    for record in reader.byte_records() {
        match record {
            Ok(r) if r.len() == header.len() => records.push(decode_record(&r, false)),
            _ => dropped += 1,
        }
    }
    Ok((RawGrid { header, records }, dropped))
}

fn decode_record(record: &ByteRecord, trim: bool) -> Vec<String> {
    record
        .iter()
        .map(|field| {
            let text = String::from_utf8_lossy(field);
            if trim { text.trim().to_string() } else { text.into_owned() }
        })
        .collect()
}

/// Guess the delimiter from the first lines of `data`.
///
/// A candidate that appears the same non-zero number of times on every
/// sampled line wins; ties go to the higher count, then to candidate order.
/// Without a consistent candidate, the one most frequent on the header line
/// is used.
pub fn sniff_delimiter(data: &[u8]) -> Option<u8> {
    let text = String::from_utf8_lossy(data);
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();
    let header = lines.first()?;

    let mut best: Option<(u8, usize)> = None;
    for &candidate in &CANDIDATE_DELIMITERS {
        let counts: Vec<usize> = lines.iter().map(|l| count_unquoted(l, candidate)).collect();
        let first = counts[0];
        if first > 0 && counts.iter().all(|&c| c == first) && best.is_none_or(|(_, n)| first > n) {
            best = Some((candidate, first));
        }
    }
    if let Some((delimiter, _)) = best {
        return Some(delimiter);
    }

    CANDIDATE_DELIMITERS
        .iter()
        .map(|&d| (d, count_unquoted(header, d)))
        .filter(|&(_, n)| n > 0)
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(d, _)| d)
}

fn count_unquoted(line: &str, delimiter: u8) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for b in line.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
        } else if b == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Type each column: all-integer → Int, all-numeric → Float, otherwise text.
/// Null tokens stay null in every kind.
fn into_table(grid: RawGrid) -> Result<Table> {
    let width = grid.header.len();
    let mut parsed: Vec<Vec<Value>> = grid
        .records
        .iter()
        .map(|record| record.iter().map(|cell| Value::parse_cell(cell)).collect())
        .collect();

    for col in 0..width {
        let mut all_int = true;
        let mut all_numeric = true;
        for row in &parsed {
            match &row[col] {
                Value::Int(_) | Value::Null => {}
                Value::Float(_) => all_int = false,
                _ => {
                    all_int = false;
                    all_numeric = false;
                }
            }
        }

        if all_int {
            continue;
        }
        for (row, record) in parsed.iter_mut().zip(&grid.records) {
            let cell = &mut row[col];
            *cell = match cell {
                Value::Null => Value::Null,
                Value::Int(i) if all_numeric => Value::Float(*i as f64),
                Value::Float(f) if all_numeric => Value::Float(*f),
                _ => Value::Str(record[col].clone()),
            };
        }
    }

    Table::from_rows(grid.header, parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_parse_strips_bom_and_types_columns() {
        let data = b"\xEF\xBB\xBFOrderID,CustomerID,Freight\n10248,VINET,32.38\n10249,TOMSP,11\n";
        let (table, outcome) = parse_csv_bytes(data).unwrap();

        assert_eq!(outcome.tier, ParseTier::Strict);
        assert!(!outcome.is_degraded());
        assert_eq!(table.columns(), &["OrderID", "CustomerID", "Freight"]);
        assert_eq!(table.rows()[0][0], Value::Int(10248));
        assert_eq!(table.rows()[0][1], Value::Str("VINET".into()));
        assert_eq!(table.rows()[1][2], Value::Float(11.0));
    }

    #[test]
    fn null_tokens_and_text_columns() {
        let data = b"id,qty\n1,5\n2,NULL\n3,abc\n";
        let (table, _) = parse_csv_bytes(data).unwrap();

        assert_eq!(table.rows()[0][1], Value::Str("5".into()));
        assert_eq!(table.rows()[1][1], Value::Null);
        assert_eq!(table.rows()[2][1], Value::Str("abc".into()));
    }

    #[test]
    fn semicolon_file_is_sniffed() {
        let data = b"CustomerID;CompanyName;Country\nALFKI;Alfreds Futterkiste;Germany\nANATR;Ana Trujillo;Mexico\n";
        let (table, outcome) = parse_csv_bytes(data).unwrap();

        assert_eq!(outcome.tier, ParseTier::Sniffed);
        assert_eq!(outcome.delimiter, b';');
        assert_eq!(table.columns().len(), 3);
        assert_eq!(table.rows()[1][2], Value::Str("Mexico".into()));
    }

    #[test]
    fn tab_and_pipe_files_are_sniffed() {
        let (tab, outcome) = parse_csv_bytes(b"a\tb\n1\t2\n").unwrap();
        assert_eq!(outcome.delimiter, b'\t');
        assert_eq!(tab.rows()[0][1], Value::Int(2));

        let (pipe, outcome) = parse_csv_bytes(b"a|b|c\n1|2|3\n").unwrap();
        assert_eq!(outcome.delimiter, b'|');
        assert_eq!(pipe.columns().len(), 3);
    }

    #[test]
    fn ragged_rows_are_dropped_by_tolerant_tier() {
        let data = b"OrderID,ProductID,Quantity\n1,11,12\n2,42,10,oops\n3,72,5\n";
        let (table, outcome) = parse_csv_bytes(data).unwrap();

        assert_eq!(outcome.tier, ParseTier::Tolerant);
        assert_eq!(outcome.dropped_rows, 1);
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[1][0], Value::Int(3));
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let data = b"CustomerID,CompanyName\nALFKI,Caf\xe9 Nord\n";
        let (table, outcome) = parse_csv_bytes(data).unwrap();

        assert_eq!(outcome.tier, ParseTier::Sniffed);
        let name = table.rows()[0][1].as_str().unwrap();
        assert!(name.starts_with("Caf"));
    }

    #[test]
    fn sniffer_ignores_quoted_delimiters() {
        let data = b"\"a;b\",c\n\"d;e\",f\n";
        assert_eq!(sniff_delimiter(data), Some(b','));
        assert_eq!(sniff_delimiter(b"single\nvalue\n"), None);
    }

    #[test]
    fn quoted_fields_keep_embedded_commas() {
        let data = b"CustomerID,CompanyName\nBONAP,\"Bon app, Paris\"\n";
        let (table, outcome) = parse_csv_bytes(data).unwrap();
        assert_eq!(outcome.tier, ParseTier::Strict);
        assert_eq!(table.rows()[0][1], Value::Str("Bon app, Paris".into()));
    }

    #[test]
    fn reads_fixture_file() {
        let path = Path::new("../../../fixtures/csv/customers.csv");
        let (table, outcome) = read_csv_robust(path).unwrap();
        assert_eq!(outcome.tier, ParseTier::Strict);
        assert_eq!(table.columns()[0], "customerID");
        assert_eq!(table.len(), 3);
    }
}
