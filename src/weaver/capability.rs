use std::fmt;

use thiserror::Error;

use crate::module::{MethodDef, MethodRef, ModuleDef, TypeDef, TypeRef};

use super::references::{CONTAINS, PROVIDER_INTERFACE, REMOVE, RETRIEVE, STORE, host_provider_interface};

/// One operation of the provider contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Contains,
    Retrieve,
    Store,
    Remove,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Contains,
        Operation::Retrieve,
        Operation::Store,
        Operation::Remove,
    ];

    pub fn method_name(self) -> &'static str {
        match self {
            Operation::Contains => CONTAINS,
            Operation::Retrieve => RETRIEVE,
            Operation::Store => STORE,
            Operation::Remove => REMOVE,
        }
    }

    fn accepts(self, method: &MethodDef) -> bool {
        if method.name != self.method_name() || method.is_static {
            return false;
        }
        match self {
            Operation::Contains | Operation::Remove => method.params.len() == 1,
            Operation::Retrieve => method.params.len() == 1 && method.generic_params.len() == 1,
            Operation::Store => matches!(method.params.len(), 2 | 3),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method_name())
    }
}

/// A provider type that satisfies the contract, with the call targets woven
/// code uses against it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCapabilities {
    pub provider: String,
    /// Parameter count of the chosen `Store` overload; 3 means it takes an
    /// options map.
    pub store_arity: u16,
}

impl ProviderCapabilities {
    pub fn contains(&self) -> MethodRef {
        MethodRef::new(&self.provider, CONTAINS).with_arity(1)
    }

    pub fn retrieve(&self, ty: &TypeRef) -> MethodRef {
        MethodRef::new(&self.provider, RETRIEVE)
            .with_arity(1)
            .with_generic_args(vec![ty.clone()])
    }

    pub fn store(&self) -> MethodRef {
        MethodRef::new(&self.provider, STORE).with_arity(self.store_arity)
    }

    pub fn remove(&self) -> MethodRef {
        MethodRef::new(&self.provider, REMOVE).with_arity(1)
    }

    pub fn accepts_options(&self) -> bool {
        self.store_arity == 3
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapabilityError {
    /// Neither the module nor the host library defines the type.
    #[error("cache provider type `{0}` cannot be resolved")]
    Unresolved(String),
    #[error("`{provider}` is missing {}", operation_names(.operations))]
    Missing {
        provider: String,
        operations: Vec<Operation>,
    },
}

fn operation_names(operations: &[Operation]) -> String {
    let names: Vec<&str> = operations.iter().map(|op| op.method_name()).collect();
    names.join(", ")
}

/// Check that `provider` resolves and implements every contract operation,
/// searching its base types as well.
pub fn validate(module: &ModuleDef, provider: &str) -> Result<ProviderCapabilities, CapabilityError> {
    let host = host_provider_interface();
    let chain = type_chain(module, provider, &host);
    if chain.is_empty() {
        return Err(CapabilityError::Unresolved(provider.to_string()));
    }

    let methods = || chain.iter().flat_map(|ty| ty.methods.iter());
    let missing: Vec<Operation> = Operation::ALL
        .into_iter()
        .filter(|op| !methods().any(|method| op.accepts(method)))
        .collect();
    if !missing.is_empty() {
        return Err(CapabilityError::Missing {
            provider: provider.to_string(),
            operations: missing,
        });
    }

    // Prefer the overload that takes options.
    let store_arity = methods()
        .filter(|method| Operation::Store.accepts(method))
        .map(|method| method.params.len() as u16)
        .max()
        .unwrap_or(2);

    Ok(ProviderCapabilities {
        provider: provider.to_string(),
        store_arity,
    })
}

fn type_chain<'a>(module: &'a ModuleDef, name: &str, host: &'a TypeDef) -> Vec<&'a TypeDef> {
    let mut chain = Vec::new();
    let mut next = Some(name.to_string());
    while let Some(current) = next.take() {
        let ty = match module.find_type(&current) {
            Some(id) => module.type_def(id),
            None if current == PROVIDER_INTERFACE => host,
            None => break,
        };
        if chain.iter().any(|seen: &&TypeDef| seen.name == ty.name) {
            break;
        }
        chain.push(ty);
        next = ty.base.clone();
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::ParamDef;

    fn method(name: &str, params: usize, generics: usize) -> MethodDef {
        let mut method = MethodDef::new(name, TypeRef::Void);
        method.params = (0..params).map(|i| ParamDef::new(format!("p{i}"), TypeRef::Object)).collect();
        method.generic_params = (0..generics).map(|i| format!("T{i}")).collect();
        method
    }

    #[test]
    fn host_interface_satisfies_contract() {
        let module = ModuleDef::new("Sample", "Sample");
        let caps = validate(&module, PROVIDER_INTERFACE).unwrap();
        assert!(caps.accepts_options());
        assert_eq!(caps.contains().to_string(), "Cache.ICacheProvider::Contains/1");
        assert_eq!(
            caps.retrieve(&TypeRef::F64).to_string(),
            "Cache.ICacheProvider::Retrieve/1<f64>"
        );
    }

    #[test]
    fn reports_every_missing_operation() {
        let mut module = ModuleDef::new("Sample", "Sample");
        let mut ty = TypeDef::new("Sample.HalfCache");
        ty.add_method(method("Contains", 1, 0));
        ty.add_method(method("Store", 2, 0));
        module.types.push(ty);

        let error = validate(&module, "Sample.HalfCache").unwrap_err();
        match &error {
            CapabilityError::Missing { operations, .. } => {
                assert_eq!(operations, &[Operation::Retrieve, Operation::Remove]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(error.to_string(), "`Sample.HalfCache` is missing Retrieve, Remove");
    }

    #[test]
    fn operations_inherited_from_base_types_count() {
        let mut module = ModuleDef::new("Sample", "Sample");
        let mut base = TypeDef::new("Sample.BaseCache");
        base.add_method(method("Contains", 1, 0));
        base.add_method(method("Retrieve", 1, 1));
        base.add_method(method("Remove", 1, 0));
        let mut derived = TypeDef::new("Sample.TwoArgCache");
        derived.base = Some("Sample.BaseCache".into());
        derived.add_method(method("Store", 2, 0));
        module.types.push(base);
        module.types.push(derived);

        let caps = validate(&module, "Sample.TwoArgCache").unwrap();
        assert_eq!(caps.store_arity, 2);
        assert!(!caps.accepts_options());
    }

    #[test]
    fn unknown_types_do_not_resolve() {
        let module = ModuleDef::new("Sample", "Sample");
        let error = validate(&module, "Nowhere.Cache").unwrap_err();
        assert_eq!(error, CapabilityError::Unresolved("Nowhere.Cache".into()));
        assert_eq!(error.to_string(), "cache provider type `Nowhere.Cache` cannot be resolved");
    }
}
