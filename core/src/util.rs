//! Small shared utilities: source spans and diagnostic snippet rendering.

use serde::Serialize;
use std::fmt::{self, Formatter};

/// A region of the source code. Spans are measured in bytes for slicing and
/// in 1-based line/column pairs for display. Every token, AST node, and
/// diagnostic carries one of these.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Span {
    /// Byte offset of the first character
    pub offset: usize,
    /// Length in bytes
    pub length: usize,
    pub start_line: usize,
    pub start_col: usize,
    pub end_line: usize,
    pub end_col: usize,
}

impl Span {
    /// A span covering a single point, used for end-of-input diagnostics.
    pub fn point(offset: usize, line: usize, col: usize) -> Self {
        Self {
            offset,
            length: 0,
            start_line: line,
            start_col: col,
            end_line: line,
            end_col: col,
        }
    }

    /// Combine two spans into one covering both. The inputs do not need to
    /// be ordered.
    pub fn merge(self, other: Span) -> Span {
        let (first, last) = if self.offset <= other.offset {
            (self, other)
        } else {
            (other, self)
        };
        Span {
            offset: first.offset,
            length: (last.offset + last.length).saturating_sub(first.offset),
            start_line: first.start_line,
            start_col: first.start_col,
            end_line: last.end_line,
            end_col: last.end_col,
        }
    }

    /// Get the slice of the source that this span corresponds to.
    pub fn get_source_slice<'a>(&self, src: &'a str) -> &'a str {
        let end = (self.offset + self.length).min(src.len());
        let start = self.offset.min(end);
        &src[start..end]
    }
}

/// Write the source line containing the start of `span`, followed by a
/// caret line underlining the spanned region. Used by the alternate
/// formatter of diagnostics.
pub fn fmt_src_highlight(
    f: &mut Formatter<'_>,
    span: &Span,
    src: &str,
) -> fmt::Result {
    let line = match src.lines().nth(span.start_line.saturating_sub(1)) {
        Some(line) => line,
        // Out-of-range spans (e.g. EOF) have nothing to show
        None => return Ok(()),
    };
    writeln!(f)?;
    writeln!(f, "  {}", line)?;
    let col = span.start_col.max(1).min(line.len() + 1);
    let width = span.length.max(1).min(line.len() + 1 - col);
    write!(f, "  {}{}", " ".repeat(col - 1), "^".repeat(width.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_ordered() {
        let a = Span {
            offset: 0,
            length: 3,
            start_line: 1,
            start_col: 1,
            end_line: 1,
            end_col: 4,
        };
        let b = Span {
            offset: 8,
            length: 2,
            start_line: 2,
            start_col: 3,
            end_line: 2,
            end_col: 5,
        };
        let merged = a.merge(b);
        assert_eq!(merged.offset, 0);
        assert_eq!(merged.length, 10);
        assert_eq!(merged.start_line, 1);
        assert_eq!(merged.end_line, 2);
        // Merging is symmetric
        assert_eq!(b.merge(a), merged);
    }

    #[test]
    fn test_source_slice() {
        let src = "int main() {}";
        let span = Span {
            offset: 4,
            length: 4,
            start_line: 1,
            start_col: 5,
            end_line: 1,
            end_col: 9,
        };
        assert_eq!(span.get_source_slice(src), "main");
    }
}
