//! Text format front end: tokens to syntax to [`ModuleDef`].

pub mod grammar;
pub mod lower;
pub mod syntax;

pub use grammar::{ParserError, parse};
pub use lower::lower;

use thiserror::Error;
use weave_utils::Diagnostic;

use crate::lexer::{LexerError, tokenize};
use crate::module::ModuleDef;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("lexing failed")]
    Lex(Vec<LexerError>),
    #[error("parsing failed")]
    Parse(Vec<ParserError>),
}

impl SourceError {
    pub fn diagnostics(&self, source_id: &str) -> Vec<Diagnostic> {
        match self {
            SourceError::Lex(errors) => errors
                .iter()
                .map(|error| error.to_diagnostic(source_id))
                .collect(),
            SourceError::Parse(errors) => errors
                .iter()
                .map(|error| error.to_diagnostic(source_id))
                .collect(),
        }
    }
}

/// Read a module from its text form.
pub fn parse_module(source: &str) -> Result<ModuleDef, SourceError> {
    let tokens = tokenize(source).map_err(SourceError::Lex)?;
    let items = parse(&tokens).map_err(SourceError::Parse)?;
    lower(items).map_err(SourceError::Parse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{BlockId, Instruction, LocalId, MethodKind, TypeRef};

    const SAMPLE: &str = "\
module Sample.Lib
assembly Sample
reference Cache

type Sample.Calculator extends System.Object @Cache(duration: 60):
    field hits: i32 static
    method Max(a: i32, b: i32) -> i32 static:
        locals best: i32
        ldarg a
        ldarg b
        cgt
        brfalse second
        ldarg a
        ret
        second:
        ldarg 1
        stloc best
        ldloc best
        ret
    property Cache: Cache.ICacheProvider get get_Cache
    method get_Cache() -> Cache.ICacheProvider:
        call Cache.CacheProvider::get_Provider
        ret
";

    fn parse_ok(source: &str) -> ModuleDef {
        parse_module(source).expect("module should parse")
    }

    fn parse_errors(source: &str) -> Vec<ParserError> {
        match parse_module(source) {
            Err(SourceError::Parse(errors)) => errors,
            other => panic!("expected parse errors, got {other:?}"),
        }
    }

    #[test]
    fn lowers_sample_module() {
        let module = parse_ok(SAMPLE);
        assert_eq!(module.name, "Sample.Lib");
        assert_eq!(module.assembly.name, "Sample");
        assert!(module.has_reference("Cache"));

        let ty = &module.types[0];
        assert_eq!(ty.base.as_deref(), Some("System.Object"));
        assert!(ty.fields[0].is_static);

        let max = &ty.methods[0];
        let body = max.body.as_ref().expect("Max has a body");
        assert_eq!(body.layout().len(), 2);
        assert_eq!(body.block(BlockId(0)).instructions[3], Instruction::BrFalse(BlockId(1)));
        assert_eq!(body.block(BlockId(1)).instructions[0], Instruction::Ldarg(1));
        assert_eq!(body.block(BlockId(1)).instructions[1], Instruction::Stloc(LocalId(0)));
        assert_eq!(body.return_sites().len(), 2);
    }

    #[test]
    fn property_links_accessor_declared_later() {
        let module = parse_ok(SAMPLE);
        let ty = &module.types[0];
        let property = &ty.properties[0];
        let getter = property.getter.expect("getter linked");
        assert_eq!(ty.methods[getter].name, "get_Cache");
        assert_eq!(ty.methods[getter].kind, MethodKind::Getter);
        assert_eq!(property.ty, TypeRef::named("Cache.ICacheProvider"));
    }

    #[test]
    fn instance_arguments_start_after_this() {
        let module = parse_ok(
            "module M\ntype A:\n    method f(x: i32) -> i32:\n        ldarg this\n        pop\n        ldarg x\n        ret\n",
        );
        let body = module.types[0].methods[0].body.as_ref().unwrap();
        let instructions = &body.block(BlockId(0)).instructions;
        assert_eq!(instructions[0], Instruction::Ldarg(0));
        assert_eq!(instructions[2], Instruction::Ldarg(1));
    }

    #[test]
    fn generic_params_resolve_in_signatures_and_operands() {
        let module = parse_ok(
            "module M\ntype A:\n    method Get<T>(id: i32) -> T static:\n        ldtoken T\n        pop\n        ldnull\n        unbox.any T\n        ret\n",
        );
        let method = &module.types[0].methods[0];
        assert_eq!(method.return_type, TypeRef::GenericParam("T".into()));
        let body = method.body.as_ref().unwrap();
        assert_eq!(
            body.block(BlockId(0)).instructions[0],
            Instruction::LdToken(TypeRef::GenericParam("T".into()))
        );
    }

    #[test]
    fn unknown_opcode_suggests_closest_mnemonic() {
        let errors = parse_errors("module M\ntype A:\n    method f() -> i32:\n        ldc.i5 1\n        ret\n");
        assert_eq!(errors[0].message, "unknown instruction `ldc.i5`");
        assert_eq!(errors[0].help.as_deref(), Some("did you mean `ldc.i4`?"));
    }

    #[test]
    fn unknown_label_is_reported() {
        let errors = parse_errors("module M\ntype A:\n    method f() -> void:\n        br nowhere\n");
        assert_eq!(errors[0].message, "unknown label `nowhere`");
    }

    #[test]
    fn body_falling_off_the_end_is_rejected() {
        let errors = parse_errors("module M\ntype A:\n    method f() -> i32:\n        ldc.i4 1\n");
        assert!(errors[0].message.contains("falls off the end"), "{}", errors[0].message);
    }

    #[test]
    fn missing_module_declaration() {
        let errors = parse_errors("reference Cache\n");
        assert_eq!(errors[0].message, "missing `module` declaration");
    }

    #[test]
    fn lex_errors_surface_as_lex_variant() {
        let error = parse_module("module M\n\ttype A\n").expect_err("tab should fail");
        assert!(matches!(error, SourceError::Lex(_)));
        assert_eq!(error.to_string(), "lexing failed");
        assert_eq!(error.diagnostics("m.cwil").len(), 1);
    }
}
