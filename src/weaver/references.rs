use crate::module::{
    FieldRef, Instruction, MethodDef, MethodKind, MethodRef, ModuleDef, ParamDef, TypeDef,
    TypeKind, TypeRef,
};

/// Assembly every woven module must reference.
pub const CACHE_ASSEMBLY: &str = "Cache";
pub const PROVIDER_INTERFACE: &str = "Cache.ICacheProvider";
pub const PROVIDER_REGISTRY: &str = "Cache.CacheProvider";
pub const GET_PROVIDER: &str = "get_Provider";

pub const STRING_TYPE: &str = "System.String";
pub const TYPE_TYPE: &str = "System.Type";
pub const DICTIONARY_TYPE: &str = "System.Collections.Generic.Dictionary";
pub const DEBUG_TYPE: &str = "System.Diagnostics.Debug";

pub const CONTAINS: &str = "Contains";
pub const RETRIEVE: &str = "Retrieve";
pub const STORE: &str = "Store";
pub const REMOVE: &str = "Remove";
pub const CLEAR: &str = "Clear";
pub const KEYS: &str = "Keys";

/// The host library calls woven code is allowed to make.
#[derive(Debug, Clone)]
pub struct HostReferences {
    pub string_format: MethodRef,
    pub get_type_from_handle: MethodRef,
    pub dictionary_new: MethodRef,
    pub dictionary_add: MethodRef,
    pub debug_write_line: MethodRef,
    pub get_provider: MethodRef,
}

impl HostReferences {
    /// Resolve the host library for `module`, failing when the cache
    /// runtime assembly is not referenced.
    pub fn resolve(module: &ModuleDef) -> Result<Self, String> {
        if !module.has_reference(CACHE_ASSEMBLY) {
            return Err(format!(
                "module `{}` does not reference the `{CACHE_ASSEMBLY}` assembly",
                module.name
            ));
        }
        Ok(Self::host())
    }

    fn host() -> Self {
        Self {
            string_format: MethodRef::new(STRING_TYPE, "Format").with_arity(2),
            get_type_from_handle: MethodRef::new(TYPE_TYPE, "GetTypeFromHandle").with_arity(1),
            dictionary_new: MethodRef::new(DICTIONARY_TYPE, "new").with_arity(0),
            dictionary_add: MethodRef::new(DICTIONARY_TYPE, "Add").with_arity(2),
            debug_write_line: MethodRef::new(DEBUG_TYPE, "WriteLine").with_arity(1),
            get_provider: MethodRef::new(PROVIDER_REGISTRY, GET_PROVIDER).with_arity(0),
        }
    }

    /// Instructions that format `message` with the key local and write it to
    /// the debug trace.
    pub fn trace_key(&self, message: &str, key: crate::module::LocalId) -> Vec<Instruction> {
        vec![
            Instruction::Ldstr(message.to_string()),
            Instruction::LdcI4(1),
            Instruction::NewArr(TypeRef::Object),
            Instruction::Dup,
            Instruction::LdcI4(0),
            Instruction::Ldloc(key),
            Instruction::Stelem,
            Instruction::Call(self.string_format.clone()),
            Instruction::Call(self.debug_write_line.clone()),
        ]
    }

    pub fn trace(&self, message: &str) -> Vec<Instruction> {
        vec![
            Instruction::Ldstr(message.to_string()),
            Instruction::Call(self.debug_write_line.clone()),
        ]
    }
}

/// The provider interface shipped with the cache runtime assembly.
pub fn host_provider_interface() -> TypeDef {
    let mut interface = TypeDef::new(PROVIDER_INTERFACE);
    interface.kind = TypeKind::Interface;
    interface.is_abstract = true;

    let key = || ParamDef::new("key", TypeRef::String);
    let mut add = |name: &str, params: Vec<ParamDef>, generics: &[&str], ret: TypeRef| {
        let mut method = MethodDef::new(name, ret);
        method.is_abstract = true;
        method.params = params;
        method.generic_params = generics.iter().map(|g| (*g).to_string()).collect();
        interface.add_method(method);
    };

    add(CONTAINS, vec![key()], &[], TypeRef::Bool);
    add(RETRIEVE, vec![key()], &["T"], TypeRef::GenericParam("T".into()));
    add(
        STORE,
        vec![
            key(),
            ParamDef::new("data", TypeRef::Object),
            ParamDef::new("parameters", TypeRef::named(DICTIONARY_TYPE)),
        ],
        &[],
        TypeRef::Void,
    );
    add(REMOVE, vec![key()], &[], TypeRef::Void);
    add(CLEAR, Vec::new(), &[], TypeRef::Void);
    add(
        KEYS,
        vec![ParamDef::new("predicate", TypeRef::Object)],
        &[],
        TypeRef::array(TypeRef::String),
    );
    interface
}

/// Members synthesized for a static accessor: backing field, getter and
/// setter, all marked compiler generated.
pub(crate) fn backing_field_name(accessor: &str) -> String {
    format!("{accessor}__BackingField")
}

pub(crate) fn static_getter_body(owner: &str, accessor: &str) -> Vec<Instruction> {
    vec![
        Instruction::Ldsfld(FieldRef::new(owner, backing_field_name(accessor))),
        Instruction::Ret,
    ]
}

pub(crate) fn static_setter_body(owner: &str, accessor: &str) -> Vec<Instruction> {
    vec![
        Instruction::Ldarg(0),
        Instruction::Stsfld(FieldRef::new(owner, backing_field_name(accessor))),
        Instruction::Ret,
    ]
}

pub(crate) fn accessor_method(name: String, kind: MethodKind, ret: TypeRef) -> MethodDef {
    let mut method = MethodDef::new(name, ret);
    method.kind = kind;
    method.is_static = true;
    method
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cache_reference_is_reported() {
        let module = ModuleDef::new("Sample", "Sample");
        let err = HostReferences::resolve(&module).unwrap_err();
        assert!(err.contains("`Cache`"));

        let mut module = module;
        module.references.push(CACHE_ASSEMBLY.into());
        let refs = HostReferences::resolve(&module).unwrap();
        assert_eq!(refs.string_format.to_string(), "System.String::Format/2");
    }

    #[test]
    fn host_interface_exposes_full_contract() {
        let interface = host_provider_interface();
        assert!(interface.is_interface());
        for name in [CONTAINS, RETRIEVE, STORE, REMOVE, CLEAR, KEYS] {
            assert!(interface.find_method(name).is_some(), "missing {name}");
        }
        let store = &interface.methods[interface.find_method(STORE).unwrap()];
        assert_eq!(store.params.len(), 3);
    }
}
