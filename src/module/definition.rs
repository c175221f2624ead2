use serde::{Deserialize, Serialize};
use thiserror::Error;
use weave_span::Span;

use super::annotation::{Annotated, Annotation};
use super::body::{BodyError, MethodBody};
use super::types::TypeRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    #[default]
    Class,
    Interface,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    #[default]
    Normal,
    Constructor,
    Getter,
    Setter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId {
    pub ty: TypeId,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId {
    pub ty: TypeId,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub ty: TypeRef,
}

impl ParamDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            is_static: false,
            visibility: Visibility::Public,
            annotations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub name: String,
    pub ty: TypeRef,
    /// Index of the getter in the owning type's `methods`.
    #[serde(default)]
    pub getter: Option<usize>,
    #[serde(default)]
    pub setter: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(skip)]
    pub span: Option<Span>,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            getter: None,
            setter: None,
            annotations: Vec::new(),
            span: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    #[serde(default)]
    pub kind: MethodKind,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generic_params: Vec<String>,
    #[serde(default)]
    pub params: Vec<ParamDef>,
    pub return_type: TypeRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub body: Option<MethodBody>,
    #[serde(skip)]
    pub span: Option<Span>,
}

impl MethodDef {
    pub fn new(name: impl Into<String>, return_type: TypeRef) -> Self {
        Self {
            name: name.into(),
            kind: MethodKind::Normal,
            is_static: false,
            is_abstract: false,
            visibility: Visibility::Public,
            generic_params: Vec::new(),
            params: Vec::new(),
            return_type,
            annotations: Vec::new(),
            body: None,
            span: None,
        }
    }

    pub fn is_constructor(&self) -> bool {
        self.kind == MethodKind::Constructor
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self.kind, MethodKind::Getter | MethodKind::Setter)
    }

    /// Argument slot holding parameter `index`; slot 0 is `this` for
    /// instance methods.
    pub fn arg_slot(&self, index: usize) -> u16 {
        let slot = if self.is_static { index } else { index + 1 };
        slot as u16
    }

    /// Parameter types, e.g. `(i32,string)`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|param| param.ty.to_string()).collect();
        format!("({})", params.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub kind: TypeKind,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub properties: Vec<PropertyDef>,
    #[serde(default)]
    pub methods: Vec<MethodDef>,
    #[serde(skip)]
    pub span: Option<Span>,
}

impl TypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            kind: TypeKind::Class,
            is_abstract: false,
            visibility: Visibility::Public,
            annotations: Vec::new(),
            fields: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
            span: None,
        }
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    pub fn find_method(&self, name: &str) -> Option<usize> {
        self.methods.iter().position(|method| method.name == name)
    }

    pub fn find_property(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|property| property.name == name)
    }

    pub fn find_field(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|field| field.name == name)
    }

    /// Every overload called `name`.
    pub fn methods_named<'a, 'n>(
        &'a self,
        name: &'n str,
    ) -> impl Iterator<Item = &'a MethodDef> + use<'a, 'n> {
        self.methods.iter().filter(move |method| method.name == name)
    }

    pub fn add_method(&mut self, method: MethodDef) -> usize {
        self.methods.push(method);
        self.methods.len() - 1
    }

    pub fn add_property(&mut self, property: PropertyDef) -> usize {
        self.properties.push(property);
        self.properties.len() - 1
    }

    pub fn add_field(&mut self, field: FieldDef) -> usize {
        self.fields.push(field);
        self.fields.len() - 1
    }

    pub fn getter_of(&self, property: usize) -> Option<&MethodDef> {
        let index = self.properties.get(property)?.getter?;
        self.methods.get(index)
    }

    pub fn setter_of(&self, property: usize) -> Option<&MethodDef> {
        let index = self.properties.get(property)?.setter?;
        self.methods.get(index)
    }

    /// The property whose getter or setter is method `index`.
    pub fn property_of_accessor(&self, index: usize) -> Option<usize> {
        self.properties.iter().position(|property| {
            property.getter == Some(index) || property.setter == Some(index)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssemblyDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

/// A compiled module: the unit the weaver rewrites in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleDef {
    pub name: String,
    pub assembly: AssemblyDef,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub types: Vec<TypeDef>,
}

impl ModuleDef {
    pub fn new(name: impl Into<String>, assembly: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            assembly: AssemblyDef {
                name: assembly.into(),
                annotations: Vec::new(),
            },
            references: Vec::new(),
            annotations: Vec::new(),
            types: Vec::new(),
        }
    }

    pub fn has_reference(&self, name: &str) -> bool {
        self.references.iter().any(|reference| reference == name)
    }

    pub fn find_type(&self, name: &str) -> Option<TypeId> {
        self.types.iter().position(|ty| ty.name == name).map(TypeId)
    }

    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> {
        (0..self.types.len()).map(TypeId)
    }

    pub fn type_def(&self, id: TypeId) -> &TypeDef {
        &self.types[id.0]
    }

    pub fn type_mut(&mut self, id: TypeId) -> &mut TypeDef {
        &mut self.types[id.0]
    }

    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.types[id.ty.0].methods[id.index]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut MethodDef {
        &mut self.types[id.ty.0].methods[id.index]
    }

    pub fn property(&self, id: PropertyId) -> &PropertyDef {
        &self.types[id.ty.0].properties[id.index]
    }

    /// Check the indices a module carries when it was not built by the
    /// parser: property accessors and block layouts must name existing
    /// entries.
    pub fn check_structure(&self) -> Result<(), StructureError> {
        for ty in &self.types {
            for property in &ty.properties {
                for index in [property.getter, property.setter].into_iter().flatten() {
                    if index >= ty.methods.len() {
                        return Err(StructureError::AccessorOutOfRange {
                            property: format!("{}.{}", ty.name, property.name),
                            index,
                            count: ty.methods.len(),
                        });
                    }
                }
            }
            for method in &ty.methods {
                if let Some(body) = &method.body {
                    body.check_layout().map_err(|source| StructureError::Body {
                        method: format!("{}::{}", ty.name, method.name),
                        source,
                    })?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureError {
    #[error("property `{property}` refers to method #{index}, but its type has {count}")]
    AccessorOutOfRange {
        property: String,
        index: usize,
        count: usize,
    },
    #[error("body of `{method}` is malformed: {source}")]
    Body { method: String, source: BodyError },
}

macro_rules! impl_annotated {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Annotated for $ty {
                fn annotations(&self) -> &[Annotation] {
                    &self.annotations
                }

                fn annotations_mut(&mut self) -> &mut Vec<Annotation> {
                    &mut self.annotations
                }
            }
        )*
    };
}

impl_annotated!(ModuleDef, AssemblyDef, TypeDef, FieldDef, PropertyDef, MethodDef);
