//! Character-level lexer: source text to the token stream of
//! [crate::token].
//!
//! Preprocessing proper (macro expansion, `#include`, conditionals) is out
//! of scope; directive lines are skipped wholesale, honoring backslash
//! continuations. Comments and whitespace are consumed here, so the parser
//! only ever sees significant tokens terminated by a single `Eof`.

use crate::{
    error::{CompileError, SourceErrorWrapper},
    token::{Keyword, Punct, Token, TokenKind},
    util::Span,
};
use log::trace;

pub struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    col: usize,
    file: u16,
}

type LexResult<T> = Result<T, (CompileError, Span)>;

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            col: 1,
            file: 0,
        }
    }

    /// Lex the whole input. The returned stream always ends with exactly
    /// one `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, SourceErrorWrapper<CompileError>> {
        match self.run() {
            Ok(tokens) => {
                trace!("lexed {} tokens", tokens.len());
                Ok(tokens)
            }
            Err((error, span)) => {
                Err(SourceErrorWrapper::new(error, span, self.src))
            }
        }
    }

    fn run(&mut self) -> LexResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let (line, col, start) = (self.line, self.col, self.pos);
            let Some(c) = self.peek() else {
                tokens.push(Token {
                    kind: TokenKind::Eof,
                    offset: start,
                    length: 0,
                    line,
                    col,
                    file: self.file,
                });
                return Ok(tokens);
            };
            let kind = match c {
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_word(),
                b'0'..=b'9' => self.lex_number()?,
                b'.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                    self.lex_number()?
                }
                b'"' => self.lex_string()?,
                b'\'' => self.lex_char()?,
                _ => self.lex_punct()?,
            };
            tokens.push(Token {
                kind,
                offset: start,
                length: self.pos - start,
                line,
                col,
                file: self.file,
            });
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.bytes.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn eat(&mut self, c: u8) -> bool {
        if self.peek() == Some(c) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn here(&self) -> Span {
        Span::point(self.pos, self.line, self.col)
    }

    /// Skip whitespace, comments, and preprocessor directive lines.
    fn skip_trivia(&mut self) -> LexResult<()> {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r' | b'\n' | 0x0b | 0x0c) => {
                    self.bump();
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let open = self.here();
                    self.bump();
                    self.bump();
                    loop {
                        match self.peek() {
                            Some(b'*') if self.peek_at(1) == Some(b'/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            Some(_) => {
                                self.bump();
                            }
                            None => {
                                return Err((
                                    CompileError::Lex {
                                        message: "unterminated block comment"
                                            .into(),
                                    },
                                    open,
                                ))
                            }
                        }
                    }
                }
                // Directive line: consume to end of line, continuing over
                // backslash-newline splices. Only legal at line start, but
                // we are lenient since we do not preprocess.
                Some(b'#') => {
                    while let Some(c) = self.peek() {
                        if c == b'\\' && self.peek_at(1) == Some(b'\n') {
                            self.bump();
                            self.bump();
                            continue;
                        }
                        if c == b'\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn lex_word(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == b'_' {
                self.bump();
            } else {
                break;
            }
        }
        let lexeme = &self.src[start..self.pos];
        if let Some(punct) = Punct::from_alternate(lexeme) {
            TokenKind::Punct(punct)
        } else if let Some(kw) = Keyword::from_lexeme(lexeme) {
            TokenKind::Keyword(kw)
        } else {
            TokenKind::Ident
        }
    }

    fn lex_number(&mut self) -> LexResult<TokenKind> {
        let span = self.here();
        let start = self.pos;
        let mut is_float = false;

        let radix = if self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'x' | b'X'))
        {
            self.bump();
            self.bump();
            16
        } else if self.peek() == Some(b'0')
            && matches!(self.peek_at(1), Some(b'b' | b'B'))
        {
            self.bump();
            self.bump();
            2
        } else {
            10
        };

        let digits_start = self.pos;
        self.eat_digits(radix);
        if radix == 10 {
            if self.peek() == Some(b'.') {
                is_float = true;
                self.bump();
                self.eat_digits(10);
            }
            if matches!(self.peek(), Some(b'e' | b'E')) {
                is_float = true;
                self.bump();
                if matches!(self.peek(), Some(b'+' | b'-')) {
                    self.bump();
                }
                self.eat_digits(10);
            }
        }

        let digits: String = self.src[digits_start..self.pos]
            .chars()
            .filter(|&c| c != '\'')
            .collect();

        if is_float {
            let mut is_double = true;
            if matches!(self.peek(), Some(b'f' | b'F')) {
                self.bump();
                is_double = false;
            } else if matches!(self.peek(), Some(b'l' | b'L')) {
                // long double is treated as double
                self.bump();
            }
            let value = digits.parse::<f64>().map_err(|_| {
                (
                    CompileError::Lex {
                        message: format!("invalid float literal `{}`", digits),
                    },
                    span,
                )
            })?;
            return Ok(TokenKind::FloatLit { value, is_double });
        }

        // Octal without the 0x/0b prefixes: leading zero, all digits octal
        let (digits, radix) = if radix == 10
            && digits.len() > 1
            && digits.starts_with('0')
        {
            (digits[1..].to_string(), 8)
        } else {
            (digits, radix)
        };

        let value = u64::from_str_radix(&digits, radix).map_err(|_| {
            (
                CompileError::Lex {
                    message: format!(
                        "integer literal `{}` out of range",
                        &self.src[start..self.pos]
                    ),
                },
                span,
            )
        })?;

        // Suffix: any order of u/U and l/L/ll/LL
        let mut unsigned = false;
        let mut long = false;
        loop {
            match self.peek() {
                Some(b'u' | b'U') if !unsigned => {
                    self.bump();
                    unsigned = true;
                }
                Some(b'l' | b'L') if !long => {
                    self.bump();
                    if matches!(self.peek(), Some(b'l' | b'L')) {
                        self.bump();
                    }
                    long = true;
                }
                _ => break,
            }
        }
        // Unsuffixed literals that do not fit in 32 bits widen, as do
        // explicit `l`/`ll` suffixes.
        let width = if long || value > u32::MAX as u64 {
            64
        } else {
            32
        };
        Ok(TokenKind::IntLit {
            value,
            unsigned,
            width,
        })
    }

    fn eat_digits(&mut self, radix: u32) {
        while let Some(c) = self.peek() {
            let ok = match radix {
                16 => c.is_ascii_hexdigit(),
                2 => matches!(c, b'0' | b'1'),
                _ => c.is_ascii_digit(),
            };
            // Digit separators are dropped during collection
            if ok || c == b'\'' {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn lex_escape(&mut self) -> LexResult<i64> {
        let span = self.here();
        let c = self.bump().ok_or_else(|| {
            (
                CompileError::Lex {
                    message: "unterminated escape sequence".into(),
                },
                span,
            )
        })?;
        Ok(match c {
            b'n' => b'\n' as i64,
            b't' => b'\t' as i64,
            b'r' => b'\r' as i64,
            b'0' => 0,
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'\\' => b'\\' as i64,
            b'\'' => b'\'' as i64,
            b'"' => b'"' as i64,
            b'?' => b'?' as i64,
            b'x' => {
                let mut value: i64 = 0;
                let mut any = false;
                while let Some(h) = self.peek() {
                    if let Some(d) = (h as char).to_digit(16) {
                        value = (value << 4) | d as i64;
                        any = true;
                        self.bump();
                    } else {
                        break;
                    }
                }
                if !any {
                    return Err((
                        CompileError::Lex {
                            message: "\\x used with no following hex digits"
                                .into(),
                        },
                        span,
                    ));
                }
                value
            }
            other => {
                return Err((
                    CompileError::Lex {
                        message: format!(
                            "invalid escape sequence `\\{}`",
                            other as char
                        ),
                    },
                    span,
                ))
            }
        })
    }

    fn lex_string(&mut self) -> LexResult<TokenKind> {
        let open = self.here();
        self.bump(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                Some(b'"') => {
                    self.bump();
                    return Ok(TokenKind::StrLit { value });
                }
                Some(b'\\') => {
                    self.bump();
                    let c = self.lex_escape()?;
                    value.push(c as u8 as char);
                }
                Some(b'\n') | None => {
                    return Err((
                        CompileError::Lex {
                            message: "unterminated string literal".into(),
                        },
                        open,
                    ))
                }
                Some(c) => {
                    self.bump();
                    value.push(c as char);
                }
            }
        }
    }

    fn lex_char(&mut self) -> LexResult<TokenKind> {
        let open = self.here();
        self.bump(); // opening quote
        let value = match self.peek() {
            Some(b'\\') => {
                self.bump();
                self.lex_escape()?
            }
            Some(b'\'') | Some(b'\n') | None => {
                return Err((
                    CompileError::Lex {
                        message: "empty or unterminated character literal"
                            .into(),
                    },
                    open,
                ))
            }
            Some(c) => {
                self.bump();
                c as i64
            }
        };
        if !self.eat(b'\'') {
            return Err((
                CompileError::Lex {
                    message: "unterminated character literal".into(),
                },
                open,
            ));
        }
        Ok(TokenKind::CharLit { value })
    }

    fn lex_punct(&mut self) -> LexResult<TokenKind> {
        use Punct::*;
        let span = self.here();
        let c = self.bump().expect("lex_punct called at end of input");
        let punct = match c {
            b'(' => LParen,
            b')' => RParen,
            b'{' => LBrace,
            b'}' => RBrace,
            b'[' => LBracket,
            b']' => RBracket,
            b';' => Semi,
            b',' => Comma,
            b'?' => Question,
            b'~' => Tilde,
            b'.' => {
                if self.peek() == Some(b'.') && self.peek_at(1) == Some(b'.') {
                    self.bump();
                    self.bump();
                    Ellipsis
                } else if self.eat(b'*') {
                    DotStar
                } else {
                    Dot
                }
            }
            b':' => {
                if self.eat(b':') {
                    ColonColon
                } else {
                    Colon
                }
            }
            b'+' => {
                if self.eat(b'+') {
                    PlusPlus
                } else if self.eat(b'=') {
                    PlusAssign
                } else {
                    Plus
                }
            }
            b'-' => {
                if self.eat(b'-') {
                    MinusMinus
                } else if self.eat(b'=') {
                    MinusAssign
                } else if self.eat(b'>') {
                    if self.eat(b'*') {
                        ArrowStar
                    } else {
                        Arrow
                    }
                } else {
                    Minus
                }
            }
            b'*' => {
                if self.eat(b'=') {
                    StarAssign
                } else {
                    Star
                }
            }
            b'/' => {
                if self.eat(b'=') {
                    SlashAssign
                } else {
                    Slash
                }
            }
            b'%' => {
                if self.eat(b'=') {
                    PercentAssign
                } else {
                    Percent
                }
            }
            b'&' => {
                if self.eat(b'&') {
                    AmpAmp
                } else if self.eat(b'=') {
                    AmpAssign
                } else {
                    Amp
                }
            }
            b'|' => {
                if self.eat(b'|') {
                    PipePipe
                } else if self.eat(b'=') {
                    PipeAssign
                } else {
                    Pipe
                }
            }
            b'^' => {
                if self.eat(b'=') {
                    CaretAssign
                } else {
                    Caret
                }
            }
            b'!' => {
                if self.eat(b'=') {
                    NotEq
                } else {
                    Bang
                }
            }
            b'=' => {
                if self.eat(b'=') {
                    EqEq
                } else {
                    Assign
                }
            }
            b'<' => {
                if self.peek() == Some(b'=') && self.peek_at(1) == Some(b'>') {
                    self.bump();
                    self.bump();
                    Spaceship
                } else if self.eat(b'=') {
                    LessEq
                } else if self.eat(b'<') {
                    if self.eat(b'=') {
                        ShlAssign
                    } else {
                        Shl
                    }
                } else {
                    Less
                }
            }
            b'>' => {
                if self.eat(b'=') {
                    GreaterEq
                } else if self.eat(b'>') {
                    if self.eat(b'=') {
                        ShrAssign
                    } else {
                        Shr
                    }
                } else {
                    Greater
                }
            }
            other => {
                return Err((
                    CompileError::Lex {
                        message: format!(
                            "stray `{}` in program",
                            other as char
                        ),
                    },
                    span,
                ))
            }
        };
        Ok(TokenKind::Punct(punct))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_idents_and_keywords() {
        assert_eq!(
            kinds("int main"),
            vec![
                TokenKind::Keyword(Keyword::Int),
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_multichar_puncts() {
        assert_eq!(
            kinds("<=> ->* <<= :: ..."),
            vec![
                TokenKind::Punct(Punct::Spaceship),
                TokenKind::Punct(Punct::ArrowStar),
                TokenKind::Punct(Punct::ShlAssign),
                TokenKind::Punct(Punct::ColonColon),
                TokenKind::Punct(Punct::Ellipsis),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_alternate_spellings() {
        assert_eq!(
            kinds("a and b or not c"),
            vec![
                TokenKind::Ident,
                TokenKind::Punct(Punct::AmpAmp),
                TokenKind::Ident,
                TokenKind::Punct(Punct::PipePipe),
                TokenKind::Punct(Punct::Bang),
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_int_literals() {
        assert_eq!(
            kinds("42 0x2a 0b101010 052 10'000"),
            vec![
                TokenKind::IntLit {
                    value: 42,
                    unsigned: false,
                    width: 32
                },
                TokenKind::IntLit {
                    value: 42,
                    unsigned: false,
                    width: 32
                },
                TokenKind::IntLit {
                    value: 42,
                    unsigned: false,
                    width: 32
                },
                TokenKind::IntLit {
                    value: 42,
                    unsigned: false,
                    width: 32
                },
                TokenKind::IntLit {
                    value: 10_000,
                    unsigned: false,
                    width: 32
                },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_int_suffixes() {
        assert_eq!(
            kinds("1u 2ul 3ll 5000000000"),
            vec![
                TokenKind::IntLit {
                    value: 1,
                    unsigned: true,
                    width: 32
                },
                TokenKind::IntLit {
                    value: 2,
                    unsigned: true,
                    width: 64
                },
                TokenKind::IntLit {
                    value: 3,
                    unsigned: false,
                    width: 64
                },
                TokenKind::IntLit {
                    value: 5_000_000_000,
                    unsigned: false,
                    width: 64
                },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_float_literals() {
        assert_eq!(
            kinds("1.5 2.0f 1e3"),
            vec![
                TokenKind::FloatLit {
                    value: 1.5,
                    is_double: true
                },
                TokenKind::FloatLit {
                    value: 2.0,
                    is_double: false
                },
                TokenKind::FloatLit {
                    value: 1000.0,
                    is_double: true
                },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_string_and_char() {
        assert_eq!(
            kinds(r#""hi\n" 'a' '\x41'"#),
            vec![
                TokenKind::StrLit {
                    value: "hi\n".into()
                },
                TokenKind::CharLit { value: 97 },
                TokenKind::CharLit { value: 65 },
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_comments_and_directives_skipped() {
        assert_eq!(
            kinds("#include <iostream>\n// line\nint /* block */ x;"),
            vec![
                TokenKind::Keyword(Keyword::Int),
                TokenKind::Ident,
                TokenKind::Punct(Punct::Semi),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let err = Lexer::new("\"oops").tokenize().unwrap_err();
        assert_eq!(err.to_string(), "Lex error at 1:1: unterminated string literal");
    }

    #[test]
    fn test_line_col_tracking() {
        let tokens = Lexer::new("int\n  x;").tokenize().unwrap();
        assert_eq!((tokens[0].line, tokens[0].col), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].col), (2, 3));
        assert_eq!((tokens[2].line, tokens[2].col), (2, 4));
    }
}
