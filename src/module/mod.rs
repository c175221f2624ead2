//! In-memory model of a compiled module.

pub mod annotation;
pub mod body;
pub mod definition;
pub mod instruction;
pub mod io;
pub mod printer;
pub mod types;

pub use annotation::{
    Annotated, Annotation, AnnotationArg, CACHE_MARKER, COMPILER_GENERATED, Literal,
    NO_CACHE_MARKER,
};
pub use body::{Block, BlockId, BodyError, LocalDef, LocalId, MethodBody};
pub use definition::{
    AssemblyDef, FieldDef, MethodDef, MethodId, MethodKind, ModuleDef, ParamDef, PropertyDef,
    PropertyId, StructureError, TypeDef, TypeId, TypeKind, Visibility,
};
pub use instruction::{FieldRef, Instruction, MNEMONICS, MethodRef};
pub use io::{DecodeError, ModuleFormat, decode_module, encode_module, read_module, write_module};
pub use printer::print_module;
pub use types::TypeRef;
