//! All diagnostic types produced by the compiler.
//!
//! Recoverable problems in the user's program become [CompileError]s,
//! collected and wrapped with their source via [WithSource]. Broken
//! internal invariants are compiler bugs and always panic; the CLI maps
//! such panics to a distinct exit code.

use crate::util::{self, Span};
use serde::Serialize;
use std::fmt::{self, Debug, Display, Formatter};
use thiserror::Error;

/// A trait for any error that originates in source code. [SourceError]s rely
/// on having source code present in order to display themselves.
pub trait SourceError: 'static + Send + Sync + Debug + Serialize {
    /// A short label for the error category, e.g. `"Syntax"` or `"Type"`.
    fn type_label(&self) -> &'static str;

    /// Format this error into a simple message. `spanned_src` is the slice
    /// of the source code that corresponds to this error's [Span].
    fn fmt_msg(&self, f: &mut Formatter<'_>, spanned_src: &str) -> fmt::Result;
}

/// An error that occurs while compiling a translation unit. Each variant is
/// one of the user-visible diagnostic kinds; the payload is the already
/// rendered message (or, for syntax errors, the name of the expected
/// element).
#[derive(Clone, Debug, Serialize)]
pub enum CompileError {
    /// The lexer rejected the raw source (unterminated literal, invalid
    /// escape, stray character).
    Lex { message: String },
    /// The parser found an unexpected token. `expected` names the kind of
    /// element that should have appeared at the error position.
    Syntax { expected: &'static str },
    /// Name lookup failed or was ambiguous.
    Lookup { message: String },
    /// Operands or conversions with incompatible types.
    Type { message: String },
    /// Template deduction or pattern matching failed outside an immediate
    /// (SFINAE) context.
    Template { message: String },
    /// A constant expression could not be evaluated: non-constant
    /// subexpression, arithmetic fault, heap violation, or a blown
    /// step/recursion budget.
    Constexpr { message: String },
}

impl CompileError {
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::Lookup {
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type {
            message: message.into(),
        }
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    pub fn constexpr(message: impl Into<String>) -> Self {
        Self::Constexpr {
            message: message.into(),
        }
    }
}

impl SourceError for CompileError {
    fn type_label(&self) -> &'static str {
        match self {
            Self::Lex { .. } => "Lex",
            Self::Syntax { .. } => "Syntax",
            Self::Lookup { .. } => "Lookup",
            Self::Type { .. } => "Type",
            Self::Template { .. } => "Template",
            Self::Constexpr { .. } => "Constexpr",
        }
    }

    fn fmt_msg(&self, f: &mut Formatter<'_>, spanned_src: &str) -> fmt::Result {
        match self {
            Self::Lex { message } => write!(f, "{}", message),
            Self::Syntax { expected } => {
                if spanned_src.is_empty() {
                    write!(f, "Expected {}", expected)
                } else {
                    write!(f, "Expected {}, found `{}`", expected, spanned_src)
                }
            }
            Self::Lookup { message }
            | Self::Type { message }
            | Self::Template { message }
            | Self::Constexpr { message } => write!(f, "{}", message),
        }
    }
}

/// A wrapper around a [SourceError] that holds some extra data:
/// - the [Span] of the source code that caused the error,
/// - the offending chunk of source code itself,
/// - optional notes chained below the primary message (e.g. the
///   instantiation stack of a template error).
///
/// This type on its own can be formatted, without any external data.
#[derive(Clone, Debug, Error, Serialize)]
pub struct SourceErrorWrapper<E: SourceError> {
    error: E,
    span: Span,
    spanned_source: String,
    notes: Vec<String>,
}

impl<E: SourceError> SourceErrorWrapper<E> {
    pub fn new(error: E, span: Span, src: &str) -> Self {
        Self {
            error,
            span,
            spanned_source: span.get_source_slice(src).into(),
            notes: Vec::new(),
        }
    }

    /// Attach a note, e.g. `in instantiation of template `pair<int>``.
    /// Notes print indented below the primary diagnostic.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn error(&self) -> &E {
        &self.error
    }
}

impl<E: SourceError> Display for SourceErrorWrapper<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} error at {}:{}: ",
            self.error.type_label(),
            self.span.start_line,
            self.span.start_col,
        )?;
        self.error.fmt_msg(f, &self.spanned_source)?;
        for note in &self.notes {
            write!(f, "\n  note: {}", note)?;
        }
        Ok(())
    }
}

/// A collection of errors bundled with the source code and file name they
/// came from, so each can be rendered with a `file:line:col:` prefix and a
/// caret snippet (alternate mode).
#[derive(Clone, Debug, Error, Serialize)]
pub struct WithSource<E: SourceError> {
    errors: Vec<SourceErrorWrapper<E>>,
    #[serde(skip)]
    source_code: String,
    file_name: String,
}

impl<E: SourceError> WithSource<E> {
    /// Wrap a collection of errors with their source code.
    pub(crate) fn new(
        errors: impl IntoIterator<Item = SourceErrorWrapper<E>>,
        source: String,
        file_name: String,
    ) -> Self {
        Self {
            errors: errors.into_iter().collect(),
            source_code: source,
            file_name,
        }
    }

    /// Get a reference to the errors wrapped by this type.
    pub fn errors(&self) -> &[SourceErrorWrapper<E>] {
        &self.errors
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }
}

impl<E: SourceError> Display for WithSource<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, error) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}:{}", self.file_name, error)?;
            if f.alternate() {
                util::fmt_src_highlight(f, &error.span, &self.source_code)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_file_and_notes() {
        let src = "int x = y;";
        let span = Span {
            offset: 8,
            length: 1,
            start_line: 1,
            start_col: 9,
            end_line: 1,
            end_col: 10,
        };
        let wrapped = SourceErrorWrapper::new(
            CompileError::lookup("use of undeclared identifier `y`"),
            span,
            src,
        )
        .with_note("in initializer of `x`");
        let with_source =
            WithSource::new([wrapped], src.into(), "main.cpp".into());
        assert_eq!(
            with_source.to_string(),
            "main.cpp:Lookup error at 1:9: use of undeclared identifier \
             `y`\n  note: in initializer of `x`"
        );
    }

    #[test]
    fn test_alternate_mode_renders_caret() {
        let src = "return $;";
        let span = Span {
            offset: 7,
            length: 1,
            start_line: 1,
            start_col: 8,
            end_line: 1,
            end_col: 9,
        };
        let wrapped = SourceErrorWrapper::new(
            CompileError::Lex {
                message: "stray `$` in program".into(),
            },
            span,
            src,
        );
        let with_source =
            WithSource::new([wrapped], src.into(), "t.cpp".into());
        let rendered = format!("{:#}", with_source);
        assert!(rendered.contains("return $;"));
        assert!(rendered.ends_with("       ^"));
    }
}
