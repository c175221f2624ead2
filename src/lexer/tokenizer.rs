use thiserror::Error;
use weave_utils::{Diagnostic, DiagnosticSeverity};

use super::token::{Span, Token, TokenKind};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexerError {
    #[error("tabs are not allowed for indentation (line {line}, column {column})")]
    TabsNotAllowed {
        line: usize,
        column: usize,
        span: Span,
    },
    #[error("indentation mismatch: expected {expected} spaces, found {found} (line {line})")]
    IndentationMismatch {
        line: usize,
        expected: usize,
        found: usize,
        span: Span,
    },
    #[error("unterminated string literal (line {line}, column {column})")]
    UnterminatedString {
        line: usize,
        column: usize,
        span: Span,
    },
    #[error("unknown escape sequence `\\{ch}` (line {line}, column {column})")]
    InvalidEscape {
        ch: char,
        line: usize,
        column: usize,
        span: Span,
    },
    #[error("unexpected character `{ch}` (line {line}, column {column})")]
    UnexpectedCharacter {
        ch: char,
        line: usize,
        column: usize,
        span: Span,
    },
}

impl LexerError {
    pub fn span(&self) -> Span {
        match self {
            LexerError::TabsNotAllowed { span, .. }
            | LexerError::IndentationMismatch { span, .. }
            | LexerError::UnterminatedString { span, .. }
            | LexerError::InvalidEscape { span, .. }
            | LexerError::UnexpectedCharacter { span, .. } => *span,
        }
    }

    pub fn to_diagnostic(&self, source_id: &str) -> Diagnostic {
        let diagnostic = Diagnostic::new(
            DiagnosticSeverity::Error,
            source_id,
            Some(self.span()),
            self.to_string(),
        );
        match self {
            LexerError::TabsNotAllowed { .. } => {
                diagnostic.with_help("indent with spaces; four per level is conventional")
            }
            LexerError::InvalidEscape { .. } => {
                diagnostic.with_help("supported escapes are \\\" \\\\ \\n and \\t")
            }
            _ => diagnostic,
        }
    }
}

pub type LexResult<T> = Result<T, Vec<LexerError>>;

fn is_identifier_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_identifier_continue(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'.'
}

fn single(byte: u8) -> Option<TokenKind> {
    let kind = match byte {
        b',' => TokenKind::Comma,
        b'(' => TokenKind::LParen,
        b')' => TokenKind::RParen,
        b'<' => TokenKind::Lt,
        b'>' => TokenKind::Gt,
        b'[' => TokenKind::LBracket,
        b']' => TokenKind::RBracket,
        b'/' => TokenKind::Slash,
        b'@' => TokenKind::At,
        _ => return None,
    };
    Some(kind)
}

pub fn tokenize(source: &str) -> LexResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut indent_stack = vec![0usize];
    let mut errors = Vec::new();
    let mut offset = 0usize;

    for (line_idx, chunk) in source.split_inclusive('\n').enumerate() {
        let line_number = line_idx + 1;
        let line = chunk.strip_suffix('\n').unwrap_or(chunk);
        let line = line.strip_suffix('\r').unwrap_or(line);
        let bytes = line.as_bytes();
        let line_offset = offset;

        let mut idx = 0usize;
        let mut indent_width = 0usize;

        while idx < bytes.len() {
            match bytes[idx] {
                b' ' => {
                    indent_width += 1;
                    idx += 1;
                }
                b'\t' => {
                    errors.push(LexerError::TabsNotAllowed {
                        line: line_number,
                        column: idx + 1,
                        span: Span::new(line_offset + idx, line_offset + idx + 1),
                    });
                    idx += 1;
                }
                _ => break,
            }
        }

        let rest = &line[idx..];
        if rest.trim().is_empty() || rest.starts_with('#') {
            offset += chunk.len();
            continue;
        }

        let last_indent = indent_stack.last().copied().unwrap_or(0);
        if indent_width > last_indent {
            indent_stack.push(indent_width);
            let span = Span::new(line_offset + last_indent, line_offset + indent_width);
            tokens.push(Token::new(TokenKind::Indent, span));
        } else if indent_width < last_indent {
            while let Some(&top) = indent_stack.last() {
                if indent_width >= top {
                    break;
                }
                indent_stack.pop();
                let span = Span::new(line_offset + indent_width, line_offset + top);
                tokens.push(Token::new(TokenKind::Dedent, span));
            }
            let expected = indent_stack.last().copied().unwrap_or(0);
            if indent_width != expected {
                errors.push(LexerError::IndentationMismatch {
                    line: line_number,
                    expected,
                    found: indent_width,
                    span: Span::new(line_offset + indent_width, line_offset + indent_width + 1),
                });
            }
        }

        let mut i = idx;
        while i < bytes.len() {
            let ch = bytes[i];
            let start = line_offset + i;

            match ch {
                b' ' | b'\t' => i += 1,
                b'#' => break,
                b':' => {
                    if bytes.get(i + 1) == Some(&b':') {
                        tokens.push(Token::new(TokenKind::DoubleColon, Span::new(start, start + 2)));
                        i += 2;
                    } else {
                        tokens.push(Token::new(TokenKind::Colon, Span::new(start, start + 1)));
                        i += 1;
                    }
                }
                b'-' => {
                    if bytes.get(i + 1) == Some(&b'>') {
                        tokens.push(Token::new(TokenKind::Arrow, Span::new(start, start + 2)));
                        i += 2;
                    } else {
                        tokens.push(Token::new(TokenKind::Minus, Span::new(start, start + 1)));
                        i += 1;
                    }
                }
                b'"' => {
                    let literal_start = i;
                    let mut value = String::new();
                    let mut terminated = false;
                    i += 1;
                    while i < bytes.len() {
                        match bytes[i] {
                            b'"' => {
                                terminated = true;
                                i += 1;
                                break;
                            }
                            b'\\' => {
                                let escaped = line[i + 1..].chars().next();
                                match escaped {
                                    Some('"') => value.push('"'),
                                    Some('\\') => value.push('\\'),
                                    Some('n') => value.push('\n'),
                                    Some('t') => value.push('\t'),
                                    Some(other) => errors.push(LexerError::InvalidEscape {
                                        ch: other,
                                        line: line_number,
                                        column: i + 1,
                                        span: Span::new(
                                            line_offset + i,
                                            line_offset + i + 1 + other.len_utf8(),
                                        ),
                                    }),
                                    None => break,
                                }
                                i += 1 + escaped.map_or(0, char::len_utf8);
                            }
                            _ => {
                                let Some(next) = line[i..].chars().next() else {
                                    break;
                                };
                                value.push(next);
                                i += next.len_utf8();
                            }
                        }
                    }
                    if !terminated {
                        errors.push(LexerError::UnterminatedString {
                            line: line_number,
                            column: literal_start + 1,
                            span: Span::new(line_offset + literal_start, line_offset + bytes.len()),
                        });
                        break;
                    }
                    tokens.push(Token::new(
                        TokenKind::StringLiteral(value),
                        Span::new(line_offset + literal_start, line_offset + i),
                    ));
                }
                ch if ch.is_ascii_digit() => {
                    let number_start = i;
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                    if i + 1 < bytes.len() && bytes[i] == b'.' && bytes[i + 1].is_ascii_digit() {
                        i += 1;
                        while i < bytes.len() && bytes[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                    if matches!(bytes.get(i), Some(b'e' | b'E')) {
                        let digits_at = match bytes.get(i + 1) {
                            Some(b'+' | b'-') => i + 2,
                            _ => i + 1,
                        };
                        if bytes.get(digits_at).is_some_and(u8::is_ascii_digit) {
                            i = digits_at;
                            while i < bytes.len() && bytes[i].is_ascii_digit() {
                                i += 1;
                            }
                        }
                    }
                    tokens.push(Token::new(
                        TokenKind::Number(line[number_start..i].to_string()),
                        Span::new(line_offset + number_start, line_offset + i),
                    ));
                }
                ch if is_identifier_start(ch) => {
                    let word_start = i;
                    i += 1;
                    while i < bytes.len() && is_identifier_continue(bytes[i]) {
                        i += 1;
                    }
                    let word = &line[word_start..i];
                    let kind = TokenKind::keyword(word)
                        .unwrap_or_else(|| TokenKind::Identifier(word.to_string()));
                    tokens.push(Token::new(
                        kind,
                        Span::new(line_offset + word_start, line_offset + i),
                    ));
                }
                ch => {
                    if let Some(kind) = single(ch) {
                        tokens.push(Token::new(kind, Span::new(start, start + 1)));
                        i += 1;
                        continue;
                    }
                    let other = line[i..].chars().next().unwrap_or(char::REPLACEMENT_CHARACTER);
                    errors.push(LexerError::UnexpectedCharacter {
                        ch: other,
                        line: line_number,
                        column: i + 1,
                        span: Span::new(start, start + other.len_utf8()),
                    });
                    i += other.len_utf8();
                }
            }
        }

        tokens.push(Token::new(
            TokenKind::Newline,
            Span::new(line_offset + line.len(), line_offset + line.len() + 1),
        ));

        offset += chunk.len();
    }

    while indent_stack.len() > 1 {
        indent_stack.pop();
        tokens.push(Token::new(TokenKind::Dedent, Span::new(offset, offset)));
    }

    let eof_span = tokens
        .last()
        .map(|token| token.span)
        .unwrap_or_else(|| Span::new(offset, offset));
    tokens.push(Token::new(TokenKind::Eof, eof_span));

    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .expect("tokenize should succeed")
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    fn ident(name: &str) -> TokenKind {
        TokenKind::Identifier(name.to_string())
    }

    #[test]
    fn dotted_names_are_single_identifiers() {
        assert_eq!(
            kinds("call Cache.CacheProvider::get_Provider\n"),
            vec![
                ident("call"),
                ident("Cache.CacheProvider"),
                TokenKind::DoubleColon,
                ident("get_Provider"),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers_and_negative_literals() {
        assert_eq!(
            kinds("ldc.r8 -3.14"),
            vec![
                ident("ldc.r8"),
                TokenKind::Minus,
                TokenKind::Number("3.14".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn exponent_floats_lex_as_one_number() {
        assert_eq!(kinds("ldc.r8 1e-7")[1], TokenKind::Number("1e-7".into()));
    }

    #[test]
    fn indentation_produces_indent_and_dedent() {
        let source = "type A:\n    method f() -> void:\n        ret\nreference Cache\n";
        let kinds = kinds(source);
        let indents = kinds.iter().filter(|k| **k == TokenKind::Indent).count();
        let dedents = kinds.iter().filter(|k| **k == TokenKind::Dedent).count();
        assert_eq!(indents, 2);
        assert_eq!(dedents, 2);
        assert!(kinds.contains(&TokenKind::Reference));
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        assert_eq!(
            kinds("# header\n\nret # trailing\n"),
            vec![ident("ret"), TokenKind::Newline, TokenKind::Eof]
        );
    }

    #[test]
    fn string_escapes_are_decoded() {
        assert_eq!(
            kinds(r#"ldstr "a\"b\\c\n""#)[1],
            TokenKind::StringLiteral("a\"b\\c\n".into())
        );
    }

    #[test]
    fn tabs_are_rejected() {
        let errors = tokenize("type A:\n\tret\n").expect_err("tabs should fail");
        assert!(matches!(errors[0], LexerError::TabsNotAllowed { line: 2, .. }));
    }

    #[test]
    fn unterminated_string_reports_span() {
        let errors = tokenize("ldstr \"open").expect_err("unterminated string should fail");
        match &errors[0] {
            LexerError::UnterminatedString { span, .. } => {
                assert_eq!((span.start(), span.end()), (6, 11));
            }
            other => panic!("expected unterminated string, got {other:?}"),
        }
    }

    #[test]
    fn inconsistent_dedent_is_an_error() {
        let errors = tokenize("a:\n    b\n  c\n").expect_err("bad dedent should fail");
        assert!(matches!(
            errors[0],
            LexerError::IndentationMismatch { expected: 0, found: 2, .. }
        ));
    }
}
