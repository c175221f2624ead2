//! Host library calls available to module code: string formatting, type
//! tokens, option dictionaries, debug tracing and the cache provider.

use weave_cache::{CacheProvider, ProviderRegistry};

use crate::module::{MethodRef, TypeRef};
use crate::weaver::references::{
    CLEAR, CONTAINS, DEBUG_TYPE, DICTIONARY_TYPE, GET_PROVIDER, KEYS, PROVIDER_REGISTRY, REMOVE,
    RETRIEVE, STORE, STRING_TYPE, TYPE_TYPE,
};

use super::error::{RuntimeError, RuntimeResult};
use super::format::format_template;
use super::value::Value;

/// Target under which `Debug.WriteLine` output is logged.
pub const TRACE_TARGET: &str = "cacheweave::trace";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostMethod {
    Format,
    GetTypeFromHandle,
    WriteLine,
    GetProvider,
    DictionaryNew,
    DictionaryAdd,
}

impl HostMethod {
    pub fn lookup(method: &MethodRef) -> Option<Self> {
        let host = match (method.owner.as_str(), method.name.as_str()) {
            (STRING_TYPE, "Format") => HostMethod::Format,
            (TYPE_TYPE, "GetTypeFromHandle") => HostMethod::GetTypeFromHandle,
            (DEBUG_TYPE, "WriteLine") => HostMethod::WriteLine,
            (PROVIDER_REGISTRY, GET_PROVIDER) => HostMethod::GetProvider,
            (DICTIONARY_TYPE, "new" | "init") => HostMethod::DictionaryNew,
            (DICTIONARY_TYPE, "Add") => HostMethod::DictionaryAdd,
            _ => return None,
        };
        Some(host)
    }

    /// Parameter count, excluding the receiver.
    pub fn arity(self) -> usize {
        match self {
            HostMethod::GetProvider | HostMethod::DictionaryNew => 0,
            HostMethod::GetTypeFromHandle | HostMethod::WriteLine => 1,
            HostMethod::Format | HostMethod::DictionaryAdd => 2,
        }
    }

    pub fn has_receiver(self) -> bool {
        matches!(self, HostMethod::DictionaryAdd)
    }

    pub fn returns_value(self) -> bool {
        !matches!(self, HostMethod::WriteLine | HostMethod::DictionaryAdd)
    }
}

/// Run a host method. `args` excludes the receiver, which is passed
/// separately for instance methods.
pub fn call_host(
    host: HostMethod,
    receiver: Option<Value>,
    args: Vec<Value>,
    registry: &ProviderRegistry,
    trace: &mut dyn FnMut(String),
) -> RuntimeResult<Option<Value>> {
    let mut args = args.into_iter();
    let mut next = || args.next().unwrap_or_default();
    match host {
        HostMethod::Format => {
            let template = next();
            let values = match next() {
                Value::Array(items) => items.read().clone(),
                Value::Null => Vec::new(),
                single => vec![single],
            };
            let text = format_template(template.as_str()?, &values)?;
            Ok(Some(Value::string(text)))
        }
        HostMethod::GetTypeFromHandle => match next() {
            token @ Value::Type(_) => Ok(Some(token)),
            other => Err(RuntimeError::mismatch("type token", other.type_name())),
        },
        HostMethod::WriteLine => {
            let line = next().to_string();
            tracing::debug!(target: TRACE_TARGET, "{line}");
            trace(line);
            Ok(None)
        }
        HostMethod::GetProvider => Ok(Some(Value::Provider(registry.provider()?))),
        HostMethod::DictionaryNew => Ok(Some(Value::empty_map())),
        HostMethod::DictionaryAdd => {
            let map = match receiver {
                Some(Value::Map(map)) => map,
                other => {
                    let found = other.as_ref().map_or("null", Value::type_name);
                    return Err(RuntimeError::mismatch("options map", found));
                }
            };
            let key = next();
            let value = next();
            map.write().insert(key.as_str()?.to_string(), value);
            Ok(None)
        }
    }
}

/// One provider contract operation, dispatched on a provider receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderOp {
    Contains,
    Retrieve,
    Store,
    Remove,
    Clear,
    Keys,
}

impl ProviderOp {
    pub fn lookup(name: &str) -> Option<Self> {
        let op = match name {
            CONTAINS => ProviderOp::Contains,
            RETRIEVE => ProviderOp::Retrieve,
            STORE => ProviderOp::Store,
            REMOVE => ProviderOp::Remove,
            CLEAR => ProviderOp::Clear,
            KEYS => ProviderOp::Keys,
            _ => return None,
        };
        Some(op)
    }

    /// Default parameter count when the call site does not spell one out.
    pub fn default_arity(self) -> usize {
        match self {
            ProviderOp::Clear => 0,
            ProviderOp::Store => 3,
            _ => 1,
        }
    }

    pub fn returns_value(self) -> bool {
        matches!(self, ProviderOp::Contains | ProviderOp::Retrieve | ProviderOp::Keys)
    }
}

/// Run `op` against `provider`. `result_type` is the resolved generic
/// argument of `Retrieve<T>`.
pub fn call_provider(
    provider: &dyn CacheProvider,
    op: ProviderOp,
    result_type: Option<&TypeRef>,
    args: Vec<Value>,
) -> RuntimeResult<Option<Value>> {
    let mut args = args.into_iter();
    let mut next = || args.next().unwrap_or_default();
    match op {
        ProviderOp::Contains => {
            let key = next();
            Ok(Some(Value::Bool(provider.contains(key.as_str()?))))
        }
        ProviderOp::Retrieve => {
            let key = next();
            let ty = result_type.cloned().unwrap_or(TypeRef::Object);
            let value = match provider.retrieve(key.as_str()?) {
                Some(cached) => Value::from_cache_value(cached).convert(&ty)?,
                None => Value::default_for(&ty),
            };
            Ok(Some(value))
        }
        ProviderOp::Store => {
            let key = next();
            let data = next().to_cache_value()?;
            let options = next().to_store_options()?;
            provider.store(key.as_str()?, data, &options);
            Ok(None)
        }
        ProviderOp::Remove => {
            let key = next();
            provider.remove(key.as_str()?);
            Ok(None)
        }
        ProviderOp::Clear => {
            provider.clear();
            Ok(None)
        }
        ProviderOp::Keys => {
            let keys = match next() {
                Value::Null => provider.keys(&|_: &str| true),
                Value::Str(prefix) => provider.keys(&|key: &str| key.starts_with(prefix.as_ref())),
                other => return Err(RuntimeError::mismatch("key prefix", other.type_name())),
            };
            Ok(Some(Value::array(keys.into_iter().map(Value::string).collect())))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use weave_cache::RuntimeCache;

    use super::*;

    fn run(host: HostMethod, receiver: Option<Value>, args: Vec<Value>) -> Option<Value> {
        let registry = ProviderRegistry::with_provider(Arc::new(RuntimeCache::new()));
        call_host(host, receiver, args, &registry, &mut |_| {}).unwrap()
    }

    #[test]
    fn formats_with_argument_array() {
        let args = Value::array(vec![Value::I32(4), Value::string("x")]);
        let text = run(HostMethod::Format, None, vec![Value::string("K_{0}_{1}"), args]);
        assert_eq!(text, Some(Value::string("K_4_x")));
    }

    #[test]
    fn dictionary_add_fills_the_receiver() {
        let map = run(HostMethod::DictionaryNew, None, Vec::new()).unwrap();
        run(
            HostMethod::DictionaryAdd,
            Some(map.clone()),
            vec![Value::string("Duration"), Value::I32(5)],
        );
        assert_eq!(map.to_store_options().unwrap().len(), 1);
    }

    #[test]
    fn missing_provider_is_reported() {
        let registry = ProviderRegistry::new();
        let error = call_host(HostMethod::GetProvider, None, Vec::new(), &registry, &mut |_| {})
            .unwrap_err();
        assert!(matches!(error, RuntimeError::NoProviderConfigured));
    }

    #[test]
    fn retrieve_converts_and_defaults() {
        let cache = RuntimeCache::new();
        call_provider(
            &cache,
            ProviderOp::Store,
            None,
            vec![Value::string("k"), Value::I32(9)],
        )
        .unwrap();

        let hit = call_provider(&cache, ProviderOp::Retrieve, Some(&TypeRef::I64), vec![Value::string("k")]);
        assert_eq!(hit.unwrap(), Some(Value::I64(9)));
        let miss = call_provider(&cache, ProviderOp::Retrieve, Some(&TypeRef::I32), vec![Value::string("x")]);
        assert_eq!(miss.unwrap(), Some(Value::I32(0)));
    }

    #[test]
    fn keys_filter_by_prefix() {
        let cache = RuntimeCache::new();
        for key in ["A.x", "A.y", "B.z"] {
            call_provider(&cache, ProviderOp::Store, None, vec![Value::string(key), Value::Null]).unwrap();
        }
        let keys = call_provider(&cache, ProviderOp::Keys, None, vec![Value::string("A.")])
            .unwrap()
            .unwrap();
        match keys {
            Value::Array(items) => assert_eq!(items.read().len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
