use std::fmt;

use serde::{Deserialize, Serialize};
use weave_span::Span;

pub const CACHE_MARKER: &str = "Cache";
pub const NO_CACHE_MARKER: &str = "NoCache";
pub const COMPILER_GENERATED: &str = "CompilerGenerated";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
}

impl Literal {
    pub fn kind(&self) -> &'static str {
        match self {
            Literal::Bool(_) => "bool",
            Literal::Int(_) => "integer",
            Literal::Float(_) => "float",
            Literal::Str(_) => "string",
            Literal::Ident(_) => "identifier",
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(value) => write!(f, "{value}"),
            Literal::Int(value) => write!(f, "{value}"),
            Literal::Float(value) => write!(f, "{value:?}"),
            Literal::Str(value) => write!(f, "\"{}\"", escape(value)),
            Literal::Ident(value) => f.write_str(value),
        }
    }
}

pub(crate) fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '"' => escaped.push_str("\\\""),
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\t' => escaped.push_str("\\t"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationArg {
    pub name: String,
    pub value: Literal,
}

/// A marker attached to a module, assembly, type or member, optionally
/// carrying named arguments: `@Cache(duration: 60)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<AnnotationArg>,
    #[serde(skip)]
    pub span: Option<Span>,
}

impl Annotation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            span: None,
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: Literal) -> Self {
        self.args.push(AnnotationArg {
            name: name.into(),
            value,
        });
        self
    }

    pub fn arg(&self, name: &str) -> Option<&Literal> {
        self.args
            .iter()
            .find(|arg| arg.name == name)
            .map(|arg| &arg.value)
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        if self.args.is_empty() {
            return Ok(());
        }
        f.write_str("(")?;
        for (index, arg) in self.args.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", arg.name, arg.value)?;
        }
        f.write_str(")")
    }
}

/// Anything that can carry annotations.
pub trait Annotated {
    fn annotations(&self) -> &[Annotation];

    fn annotations_mut(&mut self) -> &mut Vec<Annotation>;

    fn has_annotation(&self, name: &str) -> bool {
        self.annotations().iter().any(|annotation| annotation.name == name)
    }

    fn find_annotation(&self, name: &str) -> Option<&Annotation> {
        self.annotations()
            .iter()
            .find(|annotation| annotation.name == name)
    }

    /// Remove every annotation called `name`, returning how many were removed.
    fn strip_annotation(&mut self, name: &str) -> usize {
        let annotations = self.annotations_mut();
        let before = annotations.len();
        annotations.retain(|annotation| annotation.name != name);
        before - annotations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_renders_arguments() {
        let annotation = Annotation::new(CACHE_MARKER)
            .with_arg("duration", Literal::Int(60))
            .with_arg("eviction", Literal::Str("sliding".into()));
        assert_eq!(
            annotation.to_string(),
            r#"@Cache(duration: 60, eviction: "sliding")"#
        );
    }

    #[test]
    fn floats_keep_a_decimal_point() {
        assert_eq!(Literal::Float(2.0).to_string(), "2.0");
    }
}
