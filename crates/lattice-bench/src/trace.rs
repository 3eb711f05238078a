//! Workload trace parsing.
//!
//! A trace holds one operation per line:
//!
//! ```text
//! query(PUT("user401","value"))
//! query(GET("user401"))
//! query(SCAN("user401","25"))
//! ```
//!
//! Key prefixes are padded with `*` to the configured key size, and every
//! stored value is a fixed `*` string of the configured value size, so a
//! trace drives identical byte volumes through each index kind. Blank
//! lines are ignored; anything else that does not match one of the three
//! patterns fails the parse with its line number.

use lattice_common::{LatticeError, Result};
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One operation from a trace file, with the key already padded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceOp {
    Put { key: String, value: String },
    Get { key: String },
    Scan { key: String, count: usize },
}

/// Parses trace files into operation tapes for a fixed key/value geometry.
pub struct TraceParser {
    get: Regex,
    put: Regex,
    scan: Regex,
    key_size: usize,
    value: String,
}

impl TraceParser {
    pub fn new(key_size: usize, value_size: usize) -> Self {
        Self {
            get: Regex::new(r#"^query\(GET\("([^"]+)"\)\)$"#).expect("hard-coded pattern"),
            put: Regex::new(r#"^query\(PUT\("([^"]+)","([^"]+)"\)\)$"#)
                .expect("hard-coded pattern"),
            scan: Regex::new(r#"^query\(SCAN\("([^"]+)","(\d+)"\)\)$"#)
                .expect("hard-coded pattern"),
            key_size,
            value: "*".repeat(value_size),
        }
    }

    /// Pads a trace prefix with `*` up to the key size. A prefix already
    /// longer than the key size is kept whole.
    fn pad_key(&self, prefix: &str) -> String {
        let mut key = String::with_capacity(self.key_size.max(prefix.len()));
        key.push_str(prefix);
        while key.len() < self.key_size {
            key.push('*');
        }
        key
    }

    /// Parses one line; `None` for blank lines.
    fn parse_line(&self, line: &str, number: usize) -> Result<Option<TraceOp>> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(None);
        }

        if let Some(caps) = self.put.captures(line) {
            // the trace's value operand is ignored: stored values are the
            // fixed-size padding string
            return Ok(Some(TraceOp::Put {
                key: self.pad_key(&caps[1]),
                value: self.value.clone(),
            }));
        }
        if let Some(caps) = self.get.captures(line) {
            return Ok(Some(TraceOp::Get {
                key: self.pad_key(&caps[1]),
            }));
        }
        if let Some(caps) = self.scan.captures(line) {
            let count = caps[2]
                .parse()
                .map_err(|_| LatticeError::MalformedTrace {
                    line: number,
                    text: line.to_string(),
                })?;
            return Ok(Some(TraceOp::Scan {
                key: self.pad_key(&caps[1]),
                count,
            }));
        }

        Err(LatticeError::MalformedTrace {
            line: number,
            text: line.to_string(),
        })
    }

    /// Parses a whole trace file into an operation tape.
    pub fn parse_file(&self, path: &Path) -> Result<Vec<TraceOp>> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        let mut operations = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if let Some(op) = self.parse_line(&line, idx + 1)? {
                operations.push(op);
            }
        }
        Ok(operations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_trace(lines: &[&str]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_parse_put_pads_key_and_fixes_value() {
        let parser = TraceParser::new(8, 4);
        let op = parser
            .parse_line(r#"query(PUT("user1","whatever"))"#, 1)
            .unwrap()
            .unwrap();
        assert_eq!(
            op,
            TraceOp::Put {
                key: "user1***".to_string(),
                value: "****".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_get_and_scan() {
        let parser = TraceParser::new(6, 2);
        assert_eq!(
            parser.parse_line(r#"query(GET("ab"))"#, 1).unwrap().unwrap(),
            TraceOp::Get {
                key: "ab****".to_string()
            }
        );
        assert_eq!(
            parser
                .parse_line(r#"query(SCAN("ab","25"))"#, 2)
                .unwrap()
                .unwrap(),
            TraceOp::Scan {
                key: "ab****".to_string(),
                count: 25,
            }
        );
    }

    #[test]
    fn test_long_prefix_is_kept_whole() {
        let parser = TraceParser::new(4, 1);
        let op = parser
            .parse_line(r#"query(GET("longerthan4"))"#, 1)
            .unwrap()
            .unwrap();
        assert_eq!(
            op,
            TraceOp::Get {
                key: "longerthan4".to_string()
            }
        );
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let parser = TraceParser::new(4, 1);
        assert_eq!(parser.parse_line("", 1).unwrap(), None);
        assert_eq!(parser.parse_line("   ", 2).unwrap(), None);
    }

    #[test]
    fn test_malformed_line_reports_position() {
        let parser = TraceParser::new(4, 1);
        let err = parser.parse_line(r#"query(DEL("a"))"#, 7).unwrap_err();
        match err {
            LatticeError::MalformedTrace { line, text } => {
                assert_eq!(line, 7);
                assert!(text.contains("DEL"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_scan_with_non_numeric_count_is_malformed() {
        let parser = TraceParser::new(4, 1);
        assert!(parser
            .parse_line(r#"query(SCAN("a","lots"))"#, 1)
            .is_err());
    }

    #[test]
    fn test_parse_file_roundtrip() {
        let file = write_trace(&[
            r#"query(PUT("a","v"))"#,
            "",
            r#"query(GET("a"))"#,
            r#"query(SCAN("a","3"))"#,
        ]);
        let parser = TraceParser::new(4, 2);
        let ops = parser.parse_file(file.path()).unwrap();
        assert_eq!(ops.len(), 3);
        assert!(matches!(ops[0], TraceOp::Put { .. }));
        assert!(matches!(ops[1], TraceOp::Get { .. }));
        assert!(matches!(ops[2], TraceOp::Scan { count: 3, .. }));
    }

    #[test]
    fn test_parse_file_fails_on_garbage() {
        let file = write_trace(&[r#"query(PUT("a","v"))"#, "garbage line"]);
        let parser = TraceParser::new(4, 2);
        let err = parser.parse_file(file.path()).unwrap_err();
        assert!(matches!(
            err,
            LatticeError::MalformedTrace { line: 2, .. }
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let parser = TraceParser::new(4, 2);
        let err = parser
            .parse_file(Path::new("/nonexistent/trace.txt"))
            .unwrap_err();
        assert!(matches!(err, LatticeError::Io(_)));
    }
}
