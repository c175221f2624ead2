use std::fmt;

pub use weave_span::Span;

#[derive(Clone, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Module,
    Assembly,
    Reference,
    Type,
    Extends,
    Field,
    Property,
    Method,
    Locals,
    Identifier(String),
    Number(String),
    StringLiteral(String),
    Colon,
    DoubleColon,
    Arrow,
    Comma,
    LParen,
    RParen,
    Lt,
    Gt,
    LBracket,
    RBracket,
    Slash,
    Minus,
    At,
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl TokenKind {
    pub fn name(&self) -> &'static str {
        match self {
            TokenKind::Module => "module",
            TokenKind::Assembly => "assembly",
            TokenKind::Reference => "reference",
            TokenKind::Type => "type",
            TokenKind::Extends => "extends",
            TokenKind::Field => "field",
            TokenKind::Property => "property",
            TokenKind::Method => "method",
            TokenKind::Locals => "locals",
            TokenKind::Identifier(_) => "identifier",
            TokenKind::Number(_) => "number",
            TokenKind::StringLiteral(_) => "string",
            TokenKind::Colon => ":",
            TokenKind::DoubleColon => "::",
            TokenKind::Arrow => "->",
            TokenKind::Comma => ",",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Slash => "/",
            TokenKind::Minus => "-",
            TokenKind::At => "@",
            TokenKind::Newline => "newline",
            TokenKind::Indent => "indent",
            TokenKind::Dedent => "dedent",
            TokenKind::Eof => "eof",
        }
    }

    pub(crate) fn keyword(word: &str) -> Option<Self> {
        let kind = match word {
            "module" => TokenKind::Module,
            "assembly" => TokenKind::Assembly,
            "reference" => TokenKind::Reference,
            "type" => TokenKind::Type,
            "extends" => TokenKind::Extends,
            "field" => TokenKind::Field,
            "property" => TokenKind::Property,
            "method" => TokenKind::Method,
            "locals" => TokenKind::Locals,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Debug for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier(name) => write!(f, "Identifier({name})"),
            TokenKind::Number(number) => write!(f, "Number({number})"),
            TokenKind::StringLiteral(value) => write!(f, "StringLiteral(\"{value}\")"),
            kind => f.write_str(kind.name()),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier(name) => write!(f, "`{name}`"),
            TokenKind::Number(number) => write!(f, "`{number}`"),
            TokenKind::StringLiteral(value) => write!(f, "\"{value}\""),
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
