//! Persisted vector files.
//!
//! ```text
//! eqsys vector real
//! dimension: 3
//! ----
//! 1e0
//! -2.5e0
//! 3e-1
//! ----
//! ```
//!
//! Complex vectors use the `complex` tag and hold `re im` on every line.
//! Values are written in the shortest form that parses back to the same
//! `f64`, so a write/read cycle reproduces the vector exactly.

use std::fs;
use std::path::Path;

use crate::core::traits::{NumericKind, Scalar};
use crate::error::EqError;
use crate::io::{LineReader, kind_tag, parse_kind_tag, write_file};

pub(crate) const SEPARATOR: &str = "----";

/// One value in its persisted form.
pub(crate) fn format_value<T: Scalar>(v: T) -> String {
    if T::KIND == NumericKind::Complex {
        format!("{:e} {:e}", v.re(), v.im())
    } else {
        format!("{:e}", v.re())
    }
}

/// Parses one value written by [`format_value`].
pub(crate) fn parse_value<T: Scalar>(reader: &LineReader, fields: &[&str]) -> Result<T, EqError> {
    let complex = T::KIND == NumericKind::Complex;
    let expected = if complex { 2 } else { 1 };
    if fields.len() != expected {
        let found = fields.len();
        return Err(reader.error(format!("expected {expected} value field(s), found {found}")));
    }
    let re = reader.number::<f64>(fields[0])?;
    let im = if complex { reader.number::<f64>(fields[1])? } else { 0.0 };
    Ok(T::from_parts(re, im))
}

/// Writes `v` to `path`, replacing any existing file.
pub fn write_vector<T: Scalar>(path: &Path, v: &[T]) -> Result<(), EqError> {
    let mut out = String::with_capacity(32 * (v.len() + 4));
    out.push_str(&format!("eqsys vector {}\n", kind_tag::<T>()));
    out.push_str(&format!("dimension: {}\n", v.len()));
    out.push_str(SEPARATOR);
    out.push('\n');
    for &x in v {
        out.push_str(&format_value(x));
        out.push('\n');
    }
    out.push_str(SEPARATOR);
    out.push('\n');
    write_file(path, &out)
}

/// Reads a vector file. With `expected_dim`, a different declared
/// dimension is a format error.
pub fn read_vector<T: Scalar>(path: &Path, expected_dim: Option<usize>) -> Result<Vec<T>, EqError> {
    let text = read_file(path)?;
    let mut reader = LineReader::new(path, &text);

    let header = reader.next_fields()?;
    if header.len() != 3 || header[0] != "eqsys" || header[1] != "vector" {
        return Err(reader.error("not an eqsys vector file"));
    }
    parse_kind_tag::<T>(&reader, header[2])?;

    let n = reader.keyed::<usize>("dimension")?;
    if let Some(expected) = expected_dim {
        if n != expected {
            return Err(reader.error(format!("dimension {n} does not match expected {expected}")));
        }
    }
    reader.expect_line(SEPARATOR)?;
    // The declared dimension is untrusted; a short file ends in a format error.
    let mut v = Vec::new();
    for _ in 0..n {
        let fields = reader.next_fields()?;
        v.push(parse_value(&reader, &fields)?);
    }
    reader.expect_line(SEPARATOR)?;
    Ok(v)
}

pub(crate) fn read_file(path: &Path) -> Result<String, EqError> {
    fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => EqError::FileNotFound(path.display().to_string()),
        _ => EqError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;

    #[test]
    fn real_vector_survives_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("real.vec");
        let v = vec![1.0, -2.5, 1.0 / 3.0, 6.02e23, 0.0];
        write_vector(&path, &v).unwrap();
        let back: Vec<f64> = read_vector(&path, Some(5)).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn complex_vector_survives_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("complex.vec");
        let v = vec![Complex64::new(0.1, -0.2), Complex64::new(-3.0, 1e-9)];
        write_vector(&path, &v).unwrap();
        let back: Vec<Complex64> = read_vector(&path, None).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn reading_reports_distinct_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.vec");
        assert!(matches!(
            read_vector::<f64>(&missing, None),
            Err(EqError::FileNotFound(_))
        ));

        let path = dir.path().join("dims.vec");
        write_vector(&path, &[1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(
            read_vector::<f64>(&path, Some(4)),
            Err(EqError::Format { line: 2, .. })
        ));
        assert!(matches!(
            read_vector::<Complex64>(&path, None),
            Err(EqError::FileTypeMismatch { .. })
        ));

        fs::write(&path, "eqsys vector real\ndimension: 3\n----\n1e0\n2e0\n").unwrap();
        assert!(matches!(read_vector::<f64>(&path, None), Err(EqError::Format { .. })));
    }

    #[test]
    fn huge_declared_dimension_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.vec");
        let text = format!("eqsys vector real\ndimension: {}\n----\n1e0\n", usize::MAX);
        fs::write(&path, text).unwrap();
        assert!(matches!(read_vector::<f64>(&path, None), Err(EqError::Format { .. })));
    }
}
