use super::token::{Span, Token, TokenKind};
use jqexec_utils::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LexerError {
    #[error("unterminated string literal (line {line}, column {column})")]
    UnterminatedString {
        line: usize,
        column: usize,
        span: Span,
    },
    #[error("invalid escape sequence `\\{sequence}` (line {line}, column {column})")]
    InvalidEscape {
        sequence: String,
        line: usize,
        column: usize,
        span: Span,
    },
    #[error("malformed number `{text}` (line {line}, column {column})")]
    MalformedNumber {
        text: String,
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
    #[error("expression nests deeper than {limit} levels (line {line}, column {column})")]
    NestingTooDeep {
        limit: usize,
        line: usize,
        column: usize,
        span: Span,
    },
}

impl LexerError {
    pub fn span(&self) -> Span {
        match self {
            LexerError::UnterminatedString { span, .. }
            | LexerError::InvalidEscape { span, .. }
            | LexerError::MalformedNumber { span, .. }
            | LexerError::UnexpectedCharacter { span, .. }
            | LexerError::NestingTooDeep { span, .. } => *span,
        }
    }

    pub fn to_diagnostic(&self, source_id: &str) -> Diagnostic {
        let diagnostic = Diagnostic::error(source_id, self.span(), self.to_string());
        match self {
            LexerError::UnexpectedCharacter { ch: '=', .. } => diagnostic
                .with_label("assignment is not supported")
                .with_help("use `==` to compare values"),
            LexerError::UnexpectedCharacter { ch: '\'', .. } => diagnostic
                .with_label("single-quoted strings are not supported")
                .with_help("wrap string literals in double quotes"),
            LexerError::UnterminatedString { .. } => {
                diagnostic.with_label("string starts here")
            }
            _ => diagnostic,
        }
    }
}

pub type LexResult<T> = Result<T, Vec<LexerError>>;

/// Deepest bracket, `if` and prefix-operator nesting a filter may use.
pub const MAX_NESTING: usize = 64;

struct Cursor<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.source[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.source[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&predicate) {
            self.bump();
        }
        &self.source[start..self.pos]
    }

    fn line_col(&self, offset: usize) -> (usize, usize) {
        let before = &self.source[..offset];
        let line = before.matches('\n').count() + 1;
        let column = before
            .rfind('\n')
            .map_or(before.chars().count(), |nl| before[nl + 1..].chars().count())
            + 1;
        (line, column)
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

pub fn tokenize(source: &str) -> LexResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut errors = Vec::new();
    let mut cursor = Cursor::new(source);
    let mut depth = 0usize;
    let mut prefix_run = 0usize;
    let mut too_deep = false;

    while let Some(ch) = cursor.peek() {
        let start = cursor.pos;

        if ch.is_whitespace() {
            cursor.bump();
            continue;
        }

        if ch == '#' {
            cursor.eat_while(|c| c != '\n');
            continue;
        }

        let kind = match ch {
            '.' => {
                cursor.bump();
                match cursor.peek() {
                    Some('.') => {
                        cursor.bump();
                        TokenKind::DoubleDot
                    }
                    Some(next) if is_ident_start(next) => {
                        TokenKind::Field(cursor.eat_while(is_ident_continue).to_string())
                    }
                    _ => TokenKind::Dot,
                }
            }
            '$' => {
                cursor.bump();
                if cursor.peek().is_some_and(is_ident_start) {
                    TokenKind::Variable(cursor.eat_while(is_ident_continue).to_string())
                } else {
                    let (line, column) = cursor.line_col(start);
                    errors.push(LexerError::UnexpectedCharacter {
                        ch,
                        line,
                        column,
                        span: Span::new(start, cursor.pos),
                    });
                    continue;
                }
            }
            '"' => match lex_string(&mut cursor) {
                Ok(value) => TokenKind::StringLiteral(value),
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            },
            '[' => single(&mut cursor, TokenKind::LBracket),
            ']' => single(&mut cursor, TokenKind::RBracket),
            '{' => single(&mut cursor, TokenKind::LBrace),
            '}' => single(&mut cursor, TokenKind::RBrace),
            '(' => single(&mut cursor, TokenKind::LParen),
            ')' => single(&mut cursor, TokenKind::RParen),
            '|' => single(&mut cursor, TokenKind::Pipe),
            ',' => single(&mut cursor, TokenKind::Comma),
            ':' => single(&mut cursor, TokenKind::Colon),
            ';' => single(&mut cursor, TokenKind::Semicolon),
            '?' => single(&mut cursor, TokenKind::Question),
            '+' => single(&mut cursor, TokenKind::Plus),
            '-' => single(&mut cursor, TokenKind::Minus),
            '*' => single(&mut cursor, TokenKind::Star),
            '%' => single(&mut cursor, TokenKind::Percent),
            '/' => pair(&mut cursor, '/', TokenKind::Alternative, TokenKind::Slash),
            '<' => pair(&mut cursor, '=', TokenKind::LtEq, TokenKind::Lt),
            '>' => pair(&mut cursor, '=', TokenKind::GtEq, TokenKind::Gt),
            '=' if cursor.peek_nth(1) == Some('=') => {
                cursor.bump();
                cursor.bump();
                TokenKind::EqEq
            }
            '!' if cursor.peek_nth(1) == Some('=') => {
                cursor.bump();
                cursor.bump();
                TokenKind::Neq
            }
            ch if ch.is_ascii_digit() => match lex_number(&mut cursor) {
                Ok(text) => TokenKind::Number(text),
                Err(err) => {
                    errors.push(err);
                    continue;
                }
            },
            ch if is_ident_start(ch) => {
                let word = cursor.eat_while(is_ident_continue);
                TokenKind::keyword(word).unwrap_or_else(|| TokenKind::Identifier(word.to_string()))
            }
            other => {
                cursor.bump();
                let (line, column) = cursor.line_col(start);
                errors.push(LexerError::UnexpectedCharacter {
                    ch: other,
                    line,
                    column,
                    span: Span::new(start, cursor.pos),
                });
                continue;
            }
        };

        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace | TokenKind::If => {
                depth += 1;
                prefix_run = 0;
            }
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace | TokenKind::End => {
                depth = depth.saturating_sub(1);
                prefix_run = 0;
            }
            // `try try ...` and `- - ...` nest without a closing token.
            TokenKind::Try | TokenKind::Minus => prefix_run += 1,
            _ => prefix_run = 0,
        }
        if depth + prefix_run > MAX_NESTING && !too_deep {
            too_deep = true;
            let (line, column) = cursor.line_col(start);
            errors.push(LexerError::NestingTooDeep {
                limit: MAX_NESTING,
                line,
                column,
                span: Span::new(start, cursor.pos),
            });
        }

        tokens.push(Token::new(kind, Span::new(start, cursor.pos)));
    }

    tokens.push(Token::new(TokenKind::Eof, Span::point(source.len())));

    if errors.is_empty() {
        Ok(tokens)
    } else {
        Err(errors)
    }
}

fn single(cursor: &mut Cursor<'_>, kind: TokenKind) -> TokenKind {
    cursor.bump();
    kind
}

fn pair(cursor: &mut Cursor<'_>, second: char, joined: TokenKind, alone: TokenKind) -> TokenKind {
    cursor.bump();
    if cursor.peek() == Some(second) {
        cursor.bump();
        joined
    } else {
        alone
    }
}

fn lex_number(cursor: &mut Cursor<'_>) -> Result<String, LexerError> {
    let start = cursor.pos;
    cursor.eat_while(|c| c.is_ascii_digit());
    if cursor.peek() == Some('.') && cursor.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
        cursor.bump();
        cursor.eat_while(|c| c.is_ascii_digit());
    }
    if matches!(cursor.peek(), Some('e' | 'E')) {
        cursor.bump();
        if matches!(cursor.peek(), Some('+' | '-')) {
            cursor.bump();
        }
        if cursor.eat_while(|c| c.is_ascii_digit()).is_empty() {
            let (line, column) = cursor.line_col(start);
            return Err(LexerError::MalformedNumber {
                text: cursor.source[start..cursor.pos].to_string(),
                line,
                column,
                span: Span::new(start, cursor.pos),
            });
        }
    }
    if cursor.peek().is_some_and(is_ident_start) {
        cursor.eat_while(is_ident_continue);
        let (line, column) = cursor.line_col(start);
        return Err(LexerError::MalformedNumber {
            text: cursor.source[start..cursor.pos].to_string(),
            line,
            column,
            span: Span::new(start, cursor.pos),
        });
    }
    Ok(cursor.source[start..cursor.pos].to_string())
}

fn lex_string(cursor: &mut Cursor<'_>) -> Result<String, LexerError> {
    let start = cursor.pos;
    cursor.bump();
    let mut value = String::new();

    loop {
        let Some(ch) = cursor.bump() else {
            let (line, column) = cursor.line_col(start);
            return Err(LexerError::UnterminatedString {
                line,
                column,
                span: Span::new(start, cursor.pos),
            });
        };

        match ch {
            '"' => return Ok(value),
            '\\' => {
                let escape_start = cursor.pos - 1;
                let decoded = match cursor.bump() {
                    Some('"') => Some('"'),
                    Some('\\') => Some('\\'),
                    Some('/') => Some('/'),
                    Some('n') => Some('\n'),
                    Some('t') => Some('\t'),
                    Some('r') => Some('\r'),
                    Some('b') => Some('\u{8}'),
                    Some('f') => Some('\u{c}'),
                    Some('u') => lex_unicode_escape(cursor),
                    _ => None,
                };
                match decoded {
                    Some(decoded) => value.push(decoded),
                    None => {
                        let (line, column) = cursor.line_col(escape_start);
                        // Skip to the closing quote so one bad escape reports once.
                        cursor.eat_while(|c| c != '"');
                        cursor.bump();
                        return Err(LexerError::InvalidEscape {
                            sequence: cursor.source[escape_start + 1..cursor.pos]
                                .trim_end_matches('"')
                                .chars()
                                .take(5)
                                .collect(),
                            line,
                            column,
                            span: Span::new(escape_start, cursor.pos),
                        });
                    }
                }
            }
            other => value.push(other),
        }
    }
}

fn lex_unicode_escape(cursor: &mut Cursor<'_>) -> Option<char> {
    let read_hex = |cursor: &mut Cursor<'_>| -> Option<u32> {
        let digits = cursor.source.get(cursor.pos..cursor.pos + 4)?;
        let code = u32::from_str_radix(digits, 16).ok()?;
        cursor.pos += 4;
        Some(code)
    };

    let high = read_hex(cursor)?;
    if (0xD800..0xDC00).contains(&high) {
        if cursor.peek() != Some('\\') || cursor.peek_nth(1) != Some('u') {
            return None;
        }
        cursor.pos += 2;
        let low = read_hex(cursor)?;
        if !(0xDC00..0xE000).contains(&low) {
            return None;
        }
        let combined = 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00);
        return char::from_u32(combined);
    }
    char::from_u32(high)
}
