use crate::module::{Block, Instruction, MethodDef, TypeRef};

use super::accessor::CacheAccessor;
use super::capability::ProviderCapabilities;
use super::key::KeyTemplate;
use super::references::HostReferences;
use super::transform::{KEY_LOCAL, TransformError};

pub fn check(setter: &MethodDef) -> Result<(), TransformError> {
    let body = setter.body.as_ref().ok_or(TransformError::NoBody)?;
    body.validate()?;
    Ok(())
}

/// Make `setter` evict its property's key before running the original body.
pub fn invalidate_setter(
    setter: &mut MethodDef,
    key: &KeyTemplate,
    accessor: &CacheAccessor,
    capabilities: &ProviderCapabilities,
    refs: &HostReferences,
    trace: bool,
) -> Result<(), TransformError> {
    check(setter)?;
    let body = setter.body.as_mut().ok_or(TransformError::NoBody)?;
    let key_local = body.add_local(Some(KEY_LOCAL.into()), TypeRef::String);

    let mut code = vec![
        Instruction::Ldstr(key.as_str().to_string()),
        Instruction::Stloc(key_local),
    ];
    if trace {
        code.extend(refs.trace_key("cache key created: {0}", key_local));
    }
    code.extend(accessor.load());
    code.extend([
        Instruction::Ldloc(key_local),
        Instruction::CallVirt(capabilities.remove()),
    ]);
    // Falls through into the untouched original entry.
    body.insert_block_front(Block::new(code));
    body.validate()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{MethodBody, MethodRef, ModuleDef, ParamDef};
    use crate::weaver::capability::validate;

    #[test]
    fn remove_runs_before_the_original_body() {
        let mut module = ModuleDef::new("Sample", "Sample");
        module.references.push("Cache".into());

        let mut setter = MethodDef::new("set_Name", TypeRef::Void);
        setter.params = vec![ParamDef::new("value", TypeRef::String)];
        setter.body = Some(MethodBody::from_instructions(vec![Instruction::Ret]));
        let original_entry = setter.body.as_ref().unwrap().entry().unwrap();

        let accessor = CacheAccessor {
            getter: MethodRef::new("Sample.User", "get_Cache").with_arity(0),
            setter: None,
            provider_type: "Cache.ICacheProvider".into(),
            is_static: false,
        };
        let capabilities = validate(&module, "Cache.ICacheProvider").unwrap();
        let refs = HostReferences::resolve(&module).unwrap();
        let key = KeyTemplate::for_property("Sample.User", "Name");

        invalidate_setter(&mut setter, &key, &accessor, &capabilities, &refs, false).unwrap();

        let body = setter.body.as_ref().unwrap();
        assert_eq!(body.layout()[1], original_entry);
        let prologue = &body.block(body.layout()[0]).instructions;
        assert_eq!(prologue[0], Instruction::Ldstr("Sample.User.Name".into()));
        assert_eq!(prologue[2], Instruction::Ldarg(0));
        assert!(matches!(prologue.last(), Some(Instruction::CallVirt(m)) if m.name == "Remove"));
        assert_eq!(body.locals.len(), 1);
    }

    #[test]
    fn bodiless_setters_are_rejected() {
        let setter = MethodDef::new("set_Name", TypeRef::Void);
        assert_eq!(check(&setter), Err(TransformError::NoBody));
    }
}
