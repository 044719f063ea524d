//! Persisted linear-system files.
//!
//! ```text
//! eqsys system real
//! dimension: N
//! rhs: K
//! entries: M
//! row col value          (M lines; complex files hold "row col re im")
//! rhs 0
//! value                  (N lines, repeated for every right-hand side)
//! [elimination]          optional auxiliary sections
//! count: C
//! row priority
//! [metadata]
//! count: C
//! key = value
//! [tv]
//! entries: M2
//! row col value
//! [sr]
//! value                  (N lines)
//! [sc]
//! value                  (N lines)
//! end
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use crate::core::traits::Scalar;
use crate::error::EqError;
use crate::io::vector_file::{format_value, parse_value, read_file};
use crate::io::{LineReader, kind_tag, parse_kind_tag, write_file};
use crate::matrix::{MatrixBuilder, SparseMatrix};

/// Optional sections describing how the system was assembled.
#[derive(Debug, Clone, PartialEq)]
pub struct Auxiliary<T> {
    /// Flagged rows with their elimination priority.
    pub elimination: Vec<(usize, i32)>,
    pub metadata: BTreeMap<String, String>,
    pub tv: Option<SparseMatrix<T>>,
    pub sr: Option<Vec<T>>,
    pub sc: Option<Vec<T>>,
}

impl<T> Default for Auxiliary<T> {
    fn default() -> Self {
        Self {
            elimination: Vec::new(),
            metadata: BTreeMap::new(),
            tv: None,
            sr: None,
            sc: None,
        }
    }
}

/// Contents of a system file.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemFile<T> {
    pub matrix: SparseMatrix<T>,
    pub rhs: Vec<Vec<T>>,
    pub auxiliary: Option<Auxiliary<T>>,
}

fn push_entries<T: Scalar>(out: &mut String, m: &SparseMatrix<T>) {
    let entries: Vec<(usize, usize, T)> = (0..m.dim())
        .flat_map(|i| m.row_with_diagonal(i).map(move |(j, v)| (i, j, v)))
        .filter(|&(_, _, v)| v != T::zero())
        .collect();
    out.push_str(&format!("entries: {}\n", entries.len()));
    for (i, j, v) in entries {
        out.push_str(&format!("{i} {j} {}\n", format_value(v)));
    }
}

fn push_values<T: Scalar>(out: &mut String, v: &[T]) {
    for &x in v {
        out.push_str(&format_value(x));
        out.push('\n');
    }
}

/// Writes `system` to `path`, replacing any existing file.
pub fn write_system<T: Scalar>(path: &Path, system: &SystemFile<T>) -> Result<(), EqError> {
    let n = system.matrix.dim();
    for b in &system.rhs {
        EqError::dims(n, b.len())?;
    }
    let mut out = String::new();
    out.push_str(&format!("eqsys system {}\n", kind_tag::<T>()));
    out.push_str(&format!("dimension: {n}\n"));
    out.push_str(&format!("rhs: {}\n", system.rhs.len()));
    push_entries(&mut out, &system.matrix);
    for (k, b) in system.rhs.iter().enumerate() {
        out.push_str(&format!("rhs {k}\n"));
        push_values(&mut out, b);
    }

    if let Some(aux) = &system.auxiliary {
        if !aux.elimination.is_empty() {
            out.push_str("[elimination]\n");
            out.push_str(&format!("count: {}\n", aux.elimination.len()));
            for (row, priority) in &aux.elimination {
                out.push_str(&format!("{row} {priority}\n"));
            }
        }
        if !aux.metadata.is_empty() {
            out.push_str("[metadata]\n");
            out.push_str(&format!("count: {}\n", aux.metadata.len()));
            for (key, value) in &aux.metadata {
                out.push_str(&format!("{key} = {value}\n"));
            }
        }
        if let Some(tv) = &aux.tv {
            EqError::dims(n, tv.dim())?;
            out.push_str("[tv]\n");
            push_entries(&mut out, tv);
        }
        for (tag, v) in [("[sr]", &aux.sr), ("[sc]", &aux.sc)] {
            if let Some(v) = v {
                EqError::dims(n, v.len())?;
                out.push_str(tag);
                out.push('\n');
                push_values(&mut out, v);
            }
        }
    }
    out.push_str("end\n");
    write_file(path, &out)
}

fn read_entries<T: Scalar>(
    reader: &mut LineReader<'_>,
    n: usize,
) -> Result<SparseMatrix<T>, EqError> {
    let count = reader.keyed::<usize>("entries")?;
    let mut builder = MatrixBuilder::new(n);
    for _ in 0..count {
        let fields = reader.next_fields()?;
        if fields.len() < 3 {
            return Err(reader.error("expected \"row col value\""));
        }
        let row: usize = reader.number(fields[0])?;
        let col: usize = reader.number(fields[1])?;
        if row >= n || col >= n {
            return Err(reader.error(format!("entry ({row}, {col}) outside dimension {n}")));
        }
        let value = parse_value(reader, &fields[2..])?;
        builder.add(row, col, value)?;
    }
    Ok(builder.compile())
}

fn read_values<T: Scalar>(reader: &mut LineReader<'_>, n: usize) -> Result<Vec<T>, EqError> {
    let mut v = Vec::new();
    for _ in 0..n {
        let fields = reader.next_fields()?;
        v.push(parse_value(reader, &fields)?);
    }
    Ok(v)
}

/// Reads a system file written by [`write_system`].
pub fn read_system<T: Scalar>(path: &Path) -> Result<SystemFile<T>, EqError> {
    let text = read_file(path)?;
    let mut reader = LineReader::new(path, &text);

    let header = reader.next_fields()?;
    if header.len() != 3 || header[0] != "eqsys" || header[1] != "system" {
        return Err(reader.error("not an eqsys system file"));
    }
    parse_kind_tag::<T>(&reader, header[2])?;
    let n = reader.keyed::<usize>("dimension")?;
    if n > u32::MAX as usize {
        return Err(reader.error(format!("dimension {n} exceeds the 32-bit index range")));
    }
    let k = reader.keyed::<usize>("rhs")?;
    let matrix = read_entries(&mut reader, n)?;

    let mut rhs = Vec::new();
    for j in 0..k {
        reader.expect_line(&format!("rhs {j}"))?;
        rhs.push(read_values(&mut reader, n)?);
    }

    let mut aux = Auxiliary::default();
    let mut has_aux = false;
    loop {
        let line = reader.next_line()?;
        match line {
            "end" => break,
            "[elimination]" => {
                let count = reader.keyed::<usize>("count")?;
                for _ in 0..count {
                    let fields = reader.next_fields()?;
                    if fields.len() != 2 {
                        return Err(reader.error("expected \"row priority\""));
                    }
                    let row: usize = reader.number(fields[0])?;
                    if row >= n {
                        return Err(reader.error(format!("row {row} outside dimension {n}")));
                    }
                    aux.elimination.push((row, reader.number(fields[1])?));
                }
            }
            "[metadata]" => {
                let count = reader.keyed::<usize>("count")?;
                for _ in 0..count {
                    let line = reader.next_line()?;
                    let (key, value) = line
                        .split_once('=')
                        .ok_or_else(|| reader.error("expected \"key = value\""))?;
                    aux.metadata.insert(key.trim().to_string(), value.trim().to_string());
                }
            }
            "[tv]" => aux.tv = Some(read_entries(&mut reader, n)?),
            "[sr]" => aux.sr = Some(read_values(&mut reader, n)?),
            "[sc]" => aux.sc = Some(read_values(&mut reader, n)?),
            other => return Err(reader.error(format!("unknown section {other:?}"))),
        }
        has_aux = true;
    }
    if let Some(extra) = reader.peek_line() {
        return Err(reader.error(format!("unexpected content after end: {extra:?}")));
    }

    Ok(SystemFile {
        matrix,
        rhs,
        auxiliary: has_aux.then_some(aux),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64;
    use std::fs;

    fn sample() -> SystemFile<f64> {
        let matrix = SparseMatrix::from_triplets(
            3,
            vec![(0, 0, -2.0), (0, 2, 0.25), (1, 1, -3.0), (2, 0, 1.5), (2, 2, -2.0)],
        )
        .unwrap();
        let mut metadata = BTreeMap::new();
        metadata.insert(String::from("quantity"), String::from("potential"));
        SystemFile {
            matrix,
            rhs: vec![vec![1.0, 2.0, 3.0], vec![0.0, -1.0, 0.5]],
            auxiliary: Some(Auxiliary {
                elimination: vec![(2, 5)],
                metadata,
                tv: Some(SparseMatrix::identity(3)),
                sr: Some(vec![1.0, 0.5, 2.0]),
                sc: None,
            }),
        }
    }

    #[test]
    fn system_with_auxiliary_sections_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("aux.sys");
        let sys = sample();
        write_system(&path, &sys).unwrap();
        let back: SystemFile<f64> = read_system(&path).unwrap();
        assert_eq!(back, sys);
    }

    #[test]
    fn complex_system_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("complex.sys");
        let i = Complex64::new(0.0, 1.0);
        let sys = SystemFile {
            matrix: SparseMatrix::from_triplets(
                2,
                vec![(0, 0, i), (0, 1, Complex64::new(1.0, 0.5)), (1, 1, -i)],
            )
            .unwrap(),
            rhs: vec![vec![Complex64::new(1.0, -1.0), Complex64::new(0.0, 2.0)]],
            auxiliary: None,
        };
        write_system(&path, &sys).unwrap();
        assert_eq!(read_system::<Complex64>(&path).unwrap(), sys);
        assert!(matches!(
            read_system::<f64>(&path),
            Err(EqError::FileTypeMismatch { .. })
        ));
    }

    #[test]
    fn truncated_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.sys");
        write_system(&path, &sample()).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let cut: String = text.lines().take(6).map(|l| format!("{l}\n")).collect();
        fs::write(&path, cut).unwrap();
        assert!(matches!(read_system::<f64>(&path), Err(EqError::Format { .. })));
    }

    #[test]
    fn huge_declared_sizes_are_format_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.sys");
        let text =
            format!("eqsys system real\ndimension: {}\nrhs: 1\nentries: 0\n", usize::MAX);
        fs::write(&path, text).unwrap();
        assert!(matches!(
            read_system::<f64>(&path),
            Err(EqError::Format { line: 2, .. })
        ));

        let text = format!(
            "eqsys system real\ndimension: 2\nrhs: {}\nentries: 0\nrhs 0\n1e0\n",
            usize::MAX
        );
        fs::write(&path, text).unwrap();
        assert!(matches!(read_system::<f64>(&path), Err(EqError::Format { .. })));
    }
}
