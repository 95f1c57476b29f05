//! Simple sample files
//!
//! The engine's plain sample format: a header line `<N> <nInputs> [nOutputs]`
//! followed by one whitespace-separated row per sample. Text after `%` is a
//! comment. Discrete scenario rows carry their probability as a trailing
//! column.

use crate::codegen::sci;
use crate::error::{OuuError, ValidationError};
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleHeader {
    pub n_samples: usize,
    pub n_inputs: usize,
    pub n_outputs: usize,
}

/// A fully loaded sample file
#[derive(Debug, Clone, PartialEq)]
pub struct SampleFile {
    pub header: SampleHeader,
    pub rows: Vec<Vec<f64>>,
}

impl SampleFile {
    pub fn read(path: &Path) -> Result<Self, OuuError> {
        let text = std::fs::read_to_string(path)?;
        Ok(parse_sample(path, &text)?)
    }

    /// Input coordinates of every row, trailing columns dropped
    pub fn inputs(&self) -> Vec<Vec<f64>> {
        self.rows
            .iter()
            .map(|r| r[..self.header.n_inputs].to_vec())
            .collect()
    }
}

/// Read only the header line
pub fn read_header(path: &Path) -> Result<SampleHeader, OuuError> {
    let text = std::fs::read_to_string(path)?;
    let line = data_lines(&text)
        .next()
        .ok_or_else(|| malformed(path, "empty file"))?;
    Ok(parse_header(path, line)?)
}

/// Write rows under a `<N> <nInputs>` header
pub fn write_sample(path: &Path, n_inputs: usize, rows: &[Vec<f64>]) -> Result<(), OuuError> {
    let mut out = String::new();
    let _ = writeln!(out, "{} {}", rows.len(), n_inputs);
    for row in rows {
        let line: Vec<String> = row.iter().map(|&x| sci(x)).collect();
        let _ = writeln!(out, "{}", line.join(" "));
    }
    std::fs::write(path, out)?;
    tracing::debug!(path = %path.display(), rows = rows.len(), "wrote sample file");
    Ok(())
}

fn data_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .filter(|l| !l.starts_with('%'))
        .map(|l| l.split('%').next().unwrap_or("").trim())
        .filter(|l| !l.is_empty())
}

fn malformed(path: &Path, reason: impl Into<String>) -> ValidationError {
    ValidationError::MalformedSampleFile {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

fn parse_header(path: &Path, line: &str) -> Result<SampleHeader, ValidationError> {
    let nums: Result<Vec<usize>, _> = line.split_whitespace().map(str::parse).collect();
    let nums = nums.map_err(|e| malformed(path, format!("bad header `{}`: {}", line, e)))?;
    match nums.as_slice() {
        [n, m] => Ok(SampleHeader {
            n_samples: *n,
            n_inputs: *m,
            n_outputs: 0,
        }),
        [n, m, k] => Ok(SampleHeader {
            n_samples: *n,
            n_inputs: *m,
            n_outputs: *k,
        }),
        _ => Err(malformed(path, format!("bad header `{}`", line))),
    }
}

fn parse_sample(path: &Path, text: &str) -> Result<SampleFile, ValidationError> {
    let mut lines = data_lines(text);
    let header_line = lines.next().ok_or_else(|| malformed(path, "empty file"))?;
    let header = parse_header(path, header_line)?;

    let mut rows = Vec::with_capacity(header.n_samples);
    for (i, line) in lines.take(header.n_samples).enumerate() {
        let row: Result<Vec<f64>, _> = line.split_whitespace().map(str::parse).collect();
        let row = row.map_err(|e| malformed(path, format!("row {}: {}", i + 1, e)))?;
        if row.len() < header.n_inputs {
            return Err(malformed(
                path,
                format!("row {} has {} columns, expected {}", i + 1, row.len(), header.n_inputs),
            ));
        }
        rows.push(row);
    }
    if rows.len() < header.n_samples {
        return Err(malformed(
            path,
            format!("header declares {} samples, found {}", header.n_samples, rows.len()),
        ));
    }

    Ok(SampleFile { header, rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_with_comments_and_outputs() {
        let text = "% generated\n3 2 1\n0.1 0.2 5.0\n0.3 0.4 6.0 % inline\n\n0.5 0.6 7.0\n";
        let s = parse_sample(Path::new("x.smp"), text).unwrap();
        assert_eq!(
            s.header,
            SampleHeader {
                n_samples: 3,
                n_inputs: 2,
                n_outputs: 1
            }
        );
        assert_eq!(s.inputs()[1], vec![0.3, 0.4]);
        assert_eq!(s.rows[2].len(), 3);
    }

    #[test]
    fn test_short_file_is_malformed() {
        let err = parse_sample(Path::new("x.smp"), "4 1\n0.1\n0.2\n").unwrap_err();
        assert!(matches!(err, ValidationError::MalformedSampleFile { .. }));
        let err = parse_sample(Path::new("x.smp"), "abc\n").unwrap_err();
        assert!(matches!(err, ValidationError::MalformedSampleFile { .. }));
    }

    #[test]
    fn test_write_then_read_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("z3.smp");
        let rows = vec![vec![1.0, 2.0, 0.25], vec![3.0, 4.0, 0.75]];
        write_sample(&path, 2, &rows).unwrap();

        let header = read_header(&path).unwrap();
        assert_eq!((header.n_samples, header.n_inputs), (2, 2));
        let back = SampleFile::read(&path).unwrap();
        assert_eq!(back.rows, rows);
    }
}
