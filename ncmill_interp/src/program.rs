//! Program storage and the seekable line cursor.
//!
//! A `Program` is the ordered, immutable sequence of source lines loaded
//! for one run. The `Cursor` supplies one line at a time, lazily, and can
//! be redirected (subroutine calls, loops) or rewound (program restart).
//! Line numbers are 1-based throughout and preserved for diagnostics.

use std::path::Path;

use ncmill_common::error::{NcError, NcResult};

/// An NC program: ordered source lines, immutable once loaded.
#[derive(Debug, Clone)]
pub struct Program {
    lines: Vec<String>,
    name: String,
}

impl Program {
    /// Load a program from in-memory text.
    pub fn from_text(name: impl Into<String>, text: &str) -> Self {
        Self {
            lines: text.lines().map(|l| l.to_string()).collect(),
            name: name.into(),
        }
    }

    /// Load a program from a file.
    pub fn from_file(path: &Path) -> NcResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| NcError::ProgramLoad(format!("{}: {e}", path.display())))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_text(name, &text))
    }

    /// Program name (file name or caller-supplied label).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of source lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// True if the program has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Source text of a 1-based line, if it exists.
    pub fn line(&self, lineno: u32) -> Option<&str> {
        if lineno == 0 {
            return None;
        }
        self.lines.get(lineno as usize - 1).map(String::as_str)
    }

    /// A cursor positioned at the first line, taking ownership.
    pub fn into_cursor(self) -> Cursor {
        Cursor {
            program: self,
            next: 1,
        }
    }

    /// A cursor positioned at the first line (program is cloned).
    pub fn cursor(&self) -> Cursor {
        self.clone().into_cursor()
    }
}

/// Lazy, seekable line supply over a [`Program`].
#[derive(Debug, Clone)]
pub struct Cursor {
    program: Program,
    /// 1-based number of the next line to be returned.
    next: u32,
}

impl Cursor {
    /// The program being read.
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// The next line together with its 1-based line number, advancing the
    /// cursor. `None` at end of program.
    pub fn next_line(&mut self) -> Option<(u32, &str)> {
        let lineno = self.next;
        let text = self.program.line(lineno)?;
        self.next += 1;
        Some((lineno, text))
    }

    /// 1-based number of the next line to be returned.
    pub fn position(&self) -> u32 {
        self.next
    }

    /// Redirect the cursor so that `lineno` is returned next.
    pub fn seek(&mut self, lineno: u32) {
        self.next = lineno.max(1);
    }

    /// Rewind to the first line (program restart).
    pub fn rewind(&mut self) {
        self.next = 1;
    }

    /// True once every line has been consumed.
    pub fn at_end(&self) -> bool {
        self.next as usize > self.program.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn lines_come_back_in_order() {
        let p = Program::from_text("t", "G0 X1\nG1 X2 F100\nM2");
        let mut c = p.cursor();
        assert_eq!(c.next_line(), Some((1, "G0 X1")));
        assert_eq!(c.next_line(), Some((2, "G1 X2 F100")));
        assert_eq!(c.next_line(), Some((3, "M2")));
        assert_eq!(c.next_line(), None);
        assert!(c.at_end());
    }

    #[test]
    fn seek_and_rewind() {
        let p = Program::from_text("t", "a\nb\nc\nd");
        let mut c = p.cursor();
        c.next_line();
        c.seek(4);
        assert_eq!(c.next_line(), Some((4, "d")));
        c.rewind();
        assert_eq!(c.next_line(), Some((1, "a")));
    }

    #[test]
    fn seek_clamps_to_first_line() {
        let p = Program::from_text("t", "a");
        let mut c = p.cursor();
        c.seek(0);
        assert_eq!(c.next_line(), Some((1, "a")));
    }

    #[test]
    fn load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "G21\nG0 X0").unwrap();
        let p = Program::from_file(f.path()).unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.line(1), Some("G21"));
    }

    #[test]
    fn missing_file_is_program_load_error() {
        let err = Program::from_file(Path::new("/no/such/file.ngc")).unwrap_err();
        assert!(matches!(err, NcError::ProgramLoad(_)));
    }
}
