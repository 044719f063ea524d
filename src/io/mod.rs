//! Persisted vector and system files.
//!
//! Both formats are line-oriented text starting with a header line that
//! names the producer, the file type and the numeric kind.

pub mod system_file;
pub mod vector_file;

pub use system_file::{Auxiliary, SystemFile, read_system, write_system};
pub use vector_file::{read_vector, write_vector};

use std::fs;
use std::iter::Peekable;
use std::path::Path;
use std::str::{FromStr, Lines};

use crate::core::traits::{NumericKind, Scalar};
use crate::error::EqError;

pub(crate) fn kind_tag<T: Scalar>() -> &'static str {
    match T::KIND {
        NumericKind::Real => "real",
        NumericKind::Complex => "complex",
    }
}

/// Checks the numeric-kind tag of a header against `T`.
pub(crate) fn parse_kind_tag<T: Scalar>(reader: &LineReader<'_>, tag: &str) -> Result<(), EqError> {
    let found = match tag {
        "real" => NumericKind::Real,
        "complex" => NumericKind::Complex,
        other => return Err(reader.error(format!("unknown numeric kind {other:?}"))),
    };
    if found != T::KIND {
        return Err(EqError::FileTypeMismatch {
            path: reader.path.clone(),
            found,
            expected: T::KIND,
        });
    }
    Ok(())
}

pub(crate) fn write_file(path: &Path, contents: &str) -> Result<(), EqError> {
    let io_err = |e: std::io::Error| EqError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    fs::write(path, contents).map_err(io_err)
}

/// Line cursor that remembers the current line number for error reports.
/// Blank lines are skipped.
pub(crate) struct LineReader<'a> {
    path: String,
    lines: Peekable<Lines<'a>>,
    line: usize,
}

impl<'a> LineReader<'a> {
    pub(crate) fn new(path: &Path, text: &'a str) -> Self {
        Self {
            path: path.display().to_string(),
            lines: text.lines().peekable(),
            line: 0,
        }
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> EqError {
        EqError::Format {
            path: self.path.clone(),
            line: self.line,
            message: message.into(),
        }
    }

    fn skip_blank(&mut self) {
        while self.lines.peek().is_some_and(|l| l.trim().is_empty()) {
            self.lines.next();
            self.line += 1;
        }
    }

    pub(crate) fn next_line(&mut self) -> Result<&'a str, EqError> {
        self.skip_blank();
        match self.lines.next() {
            Some(l) => {
                self.line += 1;
                Ok(l.trim())
            }
            None => Err(self.error("unexpected end of file")),
        }
    }

    /// The next non-blank line without consuming it.
    pub(crate) fn peek_line(&mut self) -> Option<&'a str> {
        self.skip_blank();
        self.lines.peek().map(|l| l.trim())
    }

    pub(crate) fn next_fields(&mut self) -> Result<Vec<&'a str>, EqError> {
        Ok(self.next_line()?.split_whitespace().collect())
    }

    pub(crate) fn number<V: FromStr>(&self, field: &str) -> Result<V, EqError> {
        field
            .parse()
            .map_err(|_| self.error(format!("cannot parse {field:?}")))
    }

    /// Reads a `key: value` line.
    pub(crate) fn keyed<V: FromStr>(&mut self, key: &str) -> Result<V, EqError> {
        let line = self.next_line()?;
        let value = line
            .strip_prefix(key)
            .and_then(|rest| rest.trim_start().strip_prefix(':'))
            .ok_or_else(|| self.error(format!("expected \"{key}: ...\"")))?;
        self.number(value.trim())
    }

    pub(crate) fn expect_line(&mut self, expected: &str) -> Result<(), EqError> {
        let line = self.next_line()?;
        if line != expected {
            return Err(self.error(format!("expected {expected:?}, found {line:?}")));
        }
        Ok(())
    }
}
