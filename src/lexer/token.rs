use std::fmt;

pub use jqexec_span::Span;

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TokenKind {
    If,
    Then,
    Elif,
    Else,
    End,
    As,
    Def,
    Reduce,
    Try,
    Catch,
    And,
    Or,
    True,
    False,
    Null,
    Identifier(String),
    /// `.name` written without a space.
    Field(String),
    /// `$name`
    Variable(String),
    Number(String),
    StringLiteral(String),
    Dot,
    DoubleDot,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LParen,
    RParen,
    Pipe,
    Comma,
    Colon,
    Semicolon,
    Question,
    Alternative,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    EqEq,
    Neq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Eof,
}

impl TokenKind {
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::If => "if",
            TokenKind::Then => "then",
            TokenKind::Elif => "elif",
            TokenKind::Else => "else",
            TokenKind::End => "end",
            TokenKind::As => "as",
            TokenKind::Def => "def",
            TokenKind::Reduce => "reduce",
            TokenKind::Try => "try",
            TokenKind::Catch => "catch",
            TokenKind::And => "and",
            TokenKind::Or => "or",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Null => "null",
            TokenKind::Identifier(_) => "identifier",
            TokenKind::Field(_) => "field",
            TokenKind::Variable(_) => "variable",
            TokenKind::Number(_) => "number",
            TokenKind::StringLiteral(_) => "string",
            TokenKind::Dot => ".",
            TokenKind::DoubleDot => "..",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::Pipe => "|",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Semicolon => ";",
            TokenKind::Question => "?",
            TokenKind::Alternative => "//",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::EqEq => "==",
            TokenKind::Neq => "!=",
            TokenKind::Lt => "<",
            TokenKind::LtEq => "<=",
            TokenKind::Gt => ">",
            TokenKind::GtEq => ">=",
            TokenKind::Eof => "eof",
        }
    }

    /// Keyword lookup for a bare word.
    pub fn keyword(word: &str) -> Option<Self> {
        let kind = match word {
            "if" => TokenKind::If,
            "then" => TokenKind::Then,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "end" => TokenKind::End,
            "as" => TokenKind::As,
            "def" => TokenKind::Def,
            "reduce" => TokenKind::Reduce,
            "try" => TokenKind::Try,
            "catch" => TokenKind::Catch,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "true" => TokenKind::True,
            "false" => TokenKind::False,
            "null" => TokenKind::Null,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Debug for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier(name) => write!(f, "Identifier({name})"),
            TokenKind::Field(name) => write!(f, "Field({name})"),
            TokenKind::Variable(name) => write!(f, "Variable(${name})"),
            TokenKind::Number(number) => write!(f, "Number({number})"),
            TokenKind::StringLiteral(value) => write!(f, "StringLiteral({value:?})"),
            kind => f.write_str(kind.name()),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier(name) => write!(f, "`{name}`"),
            TokenKind::Field(name) => write!(f, "`.{name}`"),
            TokenKind::Variable(name) => write!(f, "`${name}`"),
            TokenKind::Number(number) => write!(f, "`{number}`"),
            TokenKind::StringLiteral(value) => write!(f, "{value:?}"),
            TokenKind::Eof => f.write_str("end of filter"),
            kind => write!(f, "`{}`", kind.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}
