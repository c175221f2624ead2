use thiserror::Error;

use crate::module::{
    Annotation, COMPILER_GENERATED, FieldDef, Instruction, MethodBody, MethodKind, MethodRef,
    ModuleDef, PropertyDef, TypeId, TypeRef, Visibility,
};

use super::references::{
    PROVIDER_INTERFACE, accessor_method, backing_field_name, static_getter_body,
    static_setter_body,
};

/// How woven code reaches its cache provider.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheAccessor {
    pub getter: MethodRef,
    /// Present only for synthesized accessors; used to bind the provider.
    pub setter: Option<MethodRef>,
    pub provider_type: String,
    pub is_static: bool,
}

impl CacheAccessor {
    /// Instructions that push the provider instance.
    pub fn load(&self) -> Vec<Instruction> {
        if self.is_static {
            vec![Instruction::Call(self.getter.clone())]
        } else {
            vec![Instruction::Ldarg(0), Instruction::Call(self.getter.clone())]
        }
    }
}

/// Result of looking up the accessor for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessorPlan {
    Existing(CacheAccessor),
    /// The static candidate's type has no accessor; one will be synthesized
    /// once the candidate passes validation.
    Synthesize { ty: TypeId },
}

impl AccessorPlan {
    pub fn provider_type(&self) -> &str {
        match self {
            AccessorPlan::Existing(accessor) => &accessor.provider_type,
            AccessorPlan::Synthesize { .. } => PROVIDER_INTERFACE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessorError {
    #[error("no `{accessor}` accessor on `{ty}` or its base types")]
    NotFound { ty: String, accessor: String },
    /// The only accessor found is private to a base type.
    #[error("`{accessor}` accessor inherited by `{ty}` from `{owner}` is private")]
    NotAccessible { ty: String, owner: String, accessor: String },
    /// A static member found an instance accessor it cannot call.
    #[error("`{ty}.{accessor}` is an instance accessor and cannot serve static members")]
    InstanceOnly { ty: String, accessor: String },
    #[error("`{owner}.{accessor}` returns `{found}`, not a cache provider")]
    NotAProvider { owner: String, accessor: String, found: String },
}

/// Find the accessor for a member of `ty`.
pub fn resolve(
    module: &ModuleDef,
    ty: TypeId,
    is_static: bool,
    accessor: &str,
) -> Result<AccessorPlan, AccessorError> {
    let declaring = module.type_def(ty);
    if is_static {
        return match lookup(module, &declaring.name, accessor, false)? {
            Some(found) if found.is_static => Ok(AccessorPlan::Existing(found)),
            Some(_) => Err(AccessorError::InstanceOnly {
                ty: declaring.name.clone(),
                accessor: accessor.to_string(),
            }),
            None => Ok(AccessorPlan::Synthesize { ty }),
        };
    }

    if let Some(found) = lookup(module, &declaring.name, accessor, false)? {
        return Ok(AccessorPlan::Existing(found));
    }

    let mut private_owner = None;
    let mut visited = vec![declaring.name.clone()];
    let mut next = declaring.base.clone();
    while let Some(base) = next.take() {
        if visited.contains(&base) {
            break;
        }
        let Some(base_id) = module.find_type(&base) else {
            break;
        };
        match lookup(module, &base, accessor, true)? {
            Some(found) => return Ok(AccessorPlan::Existing(found)),
            None => {
                let base_def = module.type_def(base_id);
                if private_owner.is_none() && has_private_accessor(module, base_id, accessor) {
                    private_owner = Some(base_def.name.clone());
                }
                next = base_def.base.clone();
            }
        }
        visited.push(base);
    }

    Err(match private_owner {
        Some(owner) => AccessorError::NotAccessible {
            ty: declaring.name.clone(),
            owner,
            accessor: accessor.to_string(),
        },
        None => AccessorError::NotFound {
            ty: declaring.name.clone(),
            accessor: accessor.to_string(),
        },
    })
}

fn lookup(
    module: &ModuleDef,
    owner: &str,
    accessor: &str,
    inherited: bool,
) -> Result<Option<CacheAccessor>, AccessorError> {
    let Some(id) = module.find_type(owner) else {
        return Ok(None);
    };
    let ty = module.type_def(id);
    let Some(index) = ty.find_property(accessor) else {
        return Ok(None);
    };
    let Some(getter) = ty.getter_of(index) else {
        return Ok(None);
    };
    if inherited && getter.visibility == Visibility::Private {
        return Ok(None);
    }
    let provider_type = match &getter.return_type {
        TypeRef::Named(name) => name.clone(),
        other => {
            return Err(AccessorError::NotAProvider {
                owner: ty.name.clone(),
                accessor: accessor.to_string(),
                found: other.to_string(),
            });
        }
    };
    Ok(Some(CacheAccessor {
        getter: MethodRef::new(&ty.name, &getter.name).with_arity(0),
        setter: None,
        provider_type,
        is_static: getter.is_static,
    }))
}

fn has_private_accessor(module: &ModuleDef, id: TypeId, accessor: &str) -> bool {
    let ty = module.type_def(id);
    ty.find_property(accessor)
        .and_then(|index| ty.getter_of(index))
        .is_some_and(|getter| getter.visibility == Visibility::Private)
}

/// Add a private static backing field plus public static getter and setter
/// to `ty`, returning the new accessor.
pub fn synthesize(module: &mut ModuleDef, ty: TypeId, accessor: &str) -> CacheAccessor {
    let provider = TypeRef::named(PROVIDER_INTERFACE);
    let generated = || vec![Annotation::new(COMPILER_GENERATED)];
    let target = module.type_mut(ty);
    let owner = target.name.clone();

    let mut field = FieldDef::new(backing_field_name(accessor), provider.clone());
    field.is_static = true;
    field.visibility = Visibility::Private;
    field.annotations = generated();
    target.add_field(field);

    let getter_name = format!("get_{accessor}");
    let mut getter = accessor_method(getter_name.clone(), MethodKind::Getter, provider.clone());
    getter.annotations = generated();
    getter.body = Some(MethodBody::from_instructions(static_getter_body(&owner, accessor)));
    let getter_index = target.add_method(getter);

    let setter_name = format!("set_{accessor}");
    let mut setter = accessor_method(setter_name.clone(), MethodKind::Setter, TypeRef::Void);
    setter.params = vec![crate::module::ParamDef::new("value", provider.clone())];
    setter.annotations = generated();
    setter.body = Some(MethodBody::from_instructions(static_setter_body(&owner, accessor)));
    let setter_index = target.add_method(setter);

    let mut property = PropertyDef::new(accessor, provider);
    property.getter = Some(getter_index);
    property.setter = Some(setter_index);
    target.add_property(property);

    CacheAccessor {
        getter: MethodRef::new(&owner, getter_name).with_arity(0),
        setter: Some(MethodRef::new(&owner, setter_name).with_arity(1)),
        provider_type: PROVIDER_INTERFACE.to_string(),
        is_static: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    const SOURCE: &str = r#"module Sample
assembly Sample
reference Cache

type Sample.Base:
    property Cache: Cache.ICacheProvider get get_Cache
    method get_Cache() -> Cache.ICacheProvider getter:
        ldnull
        ret

type Sample.Hidden:
    property Cache: Cache.ICacheProvider get get_Cache
    method get_Cache() -> Cache.ICacheProvider getter private:
        ldnull
        ret

type Sample.Derived extends Sample.Base:
    method Calc() -> i32:
        ldc.i4 1
        ret

type Sample.Orphan extends Sample.Hidden:
    method Calc() -> i32:
        ldc.i4 1
        ret

type Sample.Statics:
    method Calc() -> i32 static:
        ldc.i4 1
        ret
"#;

    fn module() -> ModuleDef {
        parse_module(SOURCE).expect("fixture parses")
    }

    #[test]
    fn instance_accessor_is_inherited() {
        let module = module();
        let derived = module.find_type("Sample.Derived").unwrap();
        match resolve(&module, derived, false, "Cache").unwrap() {
            AccessorPlan::Existing(accessor) => {
                assert_eq!(accessor.getter.to_string(), "Sample.Base::get_Cache/0");
                assert_eq!(accessor.load().len(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn private_base_accessor_is_rejected() {
        let module = module();
        let orphan = module.find_type("Sample.Orphan").unwrap();
        assert!(matches!(
            resolve(&module, orphan, false, "Cache"),
            Err(AccessorError::NotAccessible { .. })
        ));
    }

    #[test]
    fn static_members_synthesize_once() {
        let mut module = module();
        let statics = module.find_type("Sample.Statics").unwrap();
        assert_eq!(
            resolve(&module, statics, true, "Cache").unwrap(),
            AccessorPlan::Synthesize { ty: statics }
        );

        let accessor = synthesize(&mut module, statics, "Cache");
        assert!(accessor.setter.is_some());
        let ty = module.type_def(statics);
        assert!(ty.find_field("Cache__BackingField").is_some());
        assert!(ty.find_property("Cache").is_some());

        match resolve(&module, statics, true, "Cache").unwrap() {
            AccessorPlan::Existing(found) => assert!(found.is_static && found.setter.is_none()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn instance_accessor_cannot_serve_static_members() {
        let module = module();
        let base = module.find_type("Sample.Base").unwrap();
        let error = resolve(&module, base, true, "Cache").unwrap_err();
        assert!(matches!(error, AccessorError::InstanceOnly { .. }));
        assert_eq!(
            error.to_string(),
            "`Sample.Base.Cache` is an instance accessor and cannot serve static members"
        );
    }
}
