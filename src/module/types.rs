use std::fmt;

use serde::{Deserialize, Serialize};

/// A type as it appears in signatures, locals and instruction operands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRef {
    Void,
    Bool,
    I32,
    I64,
    F64,
    String,
    Object,
    Named(String),
    GenericParam(String),
    Array(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(path: impl Into<String>) -> Self {
        TypeRef::Named(path.into())
    }

    pub fn array(element: TypeRef) -> Self {
        TypeRef::Array(Box::new(element))
    }

    /// Resolve a primitive keyword such as `i32` or `string`.
    pub fn primitive(name: &str) -> Option<Self> {
        let ty = match name {
            "void" => TypeRef::Void,
            "bool" => TypeRef::Bool,
            "i32" => TypeRef::I32,
            "i64" => TypeRef::I64,
            "f64" => TypeRef::F64,
            "string" => TypeRef::String,
            "object" => TypeRef::Object,
            _ => return None,
        };
        Some(ty)
    }

    pub fn is_void(&self) -> bool {
        matches!(self, TypeRef::Void)
    }

    pub fn is_value_type(&self) -> bool {
        matches!(
            self,
            TypeRef::Bool | TypeRef::I32 | TypeRef::I64 | TypeRef::F64
        )
    }

    /// Value types and generic parameters must be boxed before being
    /// stored in an `object` slot.
    pub fn needs_box(&self) -> bool {
        self.is_value_type() || matches!(self, TypeRef::GenericParam(_))
    }

    /// Replace generic parameters named in `params` by the matching `args`.
    pub fn substitute(&self, params: &[String], args: &[TypeRef]) -> TypeRef {
        match self {
            TypeRef::GenericParam(name) => params
                .iter()
                .position(|param| param == name)
                .and_then(|index| args.get(index))
                .cloned()
                .unwrap_or_else(|| self.clone()),
            TypeRef::Array(element) => TypeRef::array(element.substitute(params, args)),
            other => other.clone(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Void => f.write_str("void"),
            TypeRef::Bool => f.write_str("bool"),
            TypeRef::I32 => f.write_str("i32"),
            TypeRef::I64 => f.write_str("i64"),
            TypeRef::F64 => f.write_str("f64"),
            TypeRef::String => f.write_str("string"),
            TypeRef::Object => f.write_str("object"),
            TypeRef::Named(path) => f.write_str(path),
            TypeRef::GenericParam(name) => f.write_str(name),
            TypeRef::Array(element) => write!(f, "{element}[]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boxing_rules() {
        assert!(TypeRef::I32.needs_box());
        assert!(TypeRef::GenericParam("T".into()).needs_box());
        assert!(!TypeRef::String.needs_box());
        assert!(!TypeRef::named("Sample.User").needs_box());
    }

    #[test]
    fn substitute_replaces_generic_params_inside_arrays() {
        let ty = TypeRef::array(TypeRef::GenericParam("T".into()));
        let resolved = ty.substitute(&["T".to_string()], &[TypeRef::F64]);
        assert_eq!(resolved, TypeRef::array(TypeRef::F64));
        assert_eq!(resolved.to_string(), "f64[]");
    }
}
