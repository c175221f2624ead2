//! Surface syntax produced by the grammar, before names are resolved.

use weave_span::Span;

use crate::module::Annotation;

#[derive(Debug, Clone, PartialEq)]
pub struct Word {
    pub text: String,
    pub span: Span,
}

/// `name` followed by any number of `[]` suffixes.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub name: String,
    pub array_depth: usize,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Int(i64),
    Float(f64),
    Str(String),
    Type(TypeExpr),
    Member {
        owner: String,
        name: String,
        arity: Option<u16>,
        generic_args: Vec<TypeExpr>,
    },
}

impl Operand {
    pub fn describe(&self) -> &'static str {
        match self {
            Operand::Int(_) => "integer",
            Operand::Float(_) => "float",
            Operand::Str(_) => "string",
            Operand::Type(_) => "name",
            Operand::Member { .. } => "member reference",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Local {
    pub name: String,
    pub ty: TypeExpr,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BodyLine {
    Locals(Vec<Local>),
    Label(Word),
    Instruction {
        opcode: Word,
        operands: Vec<(Operand, Span)>,
        span: Span,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodSyntax {
    pub name: String,
    pub generics: Vec<String>,
    pub params: Vec<Param>,
    pub return_type: TypeExpr,
    pub words: Vec<Word>,
    pub annotations: Vec<Annotation>,
    pub body: Option<Vec<BodyLine>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldSyntax {
    pub name: String,
    pub ty: TypeExpr,
    pub words: Vec<Word>,
    pub annotations: Vec<Annotation>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertySyntax {
    pub name: String,
    pub ty: TypeExpr,
    pub words: Vec<Word>,
    pub annotations: Vec<Annotation>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Member {
    Field(FieldSyntax),
    Property(PropertySyntax),
    Method(MethodSyntax),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeSyntax {
    pub name: String,
    pub base: Option<String>,
    pub words: Vec<Word>,
    pub annotations: Vec<Annotation>,
    pub members: Vec<Member>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Module {
        name: String,
        annotations: Vec<Annotation>,
        span: Span,
    },
    Assembly {
        name: String,
        annotations: Vec<Annotation>,
        span: Span,
    },
    Reference {
        name: String,
        span: Span,
    },
    Type(TypeSyntax),
}
