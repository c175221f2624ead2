use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use weave_cache::{CacheProvider, CacheValue, StoreOptions};

use crate::module::TypeRef;

use super::error::{RuntimeError, RuntimeResult};

/// An object instance; fields are shared between clones of the handle.
#[derive(Debug)]
pub struct Object {
    pub class: String,
    fields: RwLock<HashMap<String, Value>>,
}

impl Object {
    pub fn new(class: impl Into<String>, fields: HashMap<String, Value>) -> Self {
        Self {
            class: class.into(),
            fields: RwLock::new(fields),
        }
    }

    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    pub fn set_field(&self, name: impl Into<String>, value: Value) {
        self.fields.write().insert(name.into(), value);
    }
}

/// A value on the interpreter's evaluation stack.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(Arc<str>),
    /// A runtime type token.
    Type(String),
    Array(Arc<RwLock<Vec<Value>>>),
    Object(Arc<Object>),
    /// Options map built by woven code for `Store`.
    Map(Arc<RwLock<BTreeMap<String, Value>>>),
    Provider(Arc<dyn CacheProvider>),
}

impl Value {
    pub fn string(text: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(text.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    pub fn empty_map() -> Self {
        Value::Map(Arc::new(RwLock::new(BTreeMap::new())))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::F64(_) => "f64",
            Value::Str(_) => "string",
            Value::Type(_) => "type",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Map(_) => "map",
            Value::Provider(_) => "provider",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truth test used by `brtrue`/`brfalse`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(value) => *value,
            Value::I32(value) => *value != 0,
            Value::I64(value) => *value != 0,
            Value::F64(value) => *value != 0.0,
            _ => true,
        }
    }

    pub fn as_i32(&self) -> RuntimeResult<i32> {
        match self {
            Value::I32(value) => Ok(*value),
            Value::Bool(value) => Ok(i32::from(*value)),
            other => Err(RuntimeError::mismatch("i32", other.type_name())),
        }
    }

    pub fn as_str(&self) -> RuntimeResult<&str> {
        match self {
            Value::Str(text) => Ok(text.as_ref()),
            other => Err(RuntimeError::mismatch("string", other.type_name())),
        }
    }

    /// The zero value of `ty`.
    pub fn default_for(ty: &TypeRef) -> Self {
        match ty {
            TypeRef::Bool => Value::Bool(false),
            TypeRef::I32 => Value::I32(0),
            TypeRef::I64 => Value::I64(0),
            TypeRef::F64 => Value::F64(0.0),
            _ => Value::Null,
        }
    }

    /// Coerce to `ty`, as `unbox.any` and `Retrieve<T>` do.
    pub fn convert(self, ty: &TypeRef) -> RuntimeResult<Self> {
        let mismatch = |value: &Value| RuntimeError::mismatch(ty.to_string(), value.type_name());
        match (ty, self) {
            (TypeRef::Bool, Value::Bool(value)) => Ok(Value::Bool(value)),
            (TypeRef::I32, Value::I32(value)) => Ok(Value::I32(value)),
            (TypeRef::I32, Value::I64(value)) => i32::try_from(value)
                .map(Value::I32)
                .map_err(|_| mismatch(&Value::I64(value))),
            (TypeRef::I64, Value::I32(value)) => Ok(Value::I64(i64::from(value))),
            (TypeRef::I64, Value::I64(value)) => Ok(Value::I64(value)),
            (TypeRef::F64, Value::F64(value)) => Ok(Value::F64(value)),
            (TypeRef::F64, Value::I32(value)) => Ok(Value::F64(f64::from(value))),
            (TypeRef::F64, Value::I64(value)) => Ok(Value::F64(value as f64)),
            (TypeRef::String, value @ (Value::Str(_) | Value::Null)) => Ok(value),
            (ty, Value::Null) if ty.is_value_type() => Ok(Value::default_for(ty)),
            (TypeRef::Bool | TypeRef::I32 | TypeRef::I64 | TypeRef::F64 | TypeRef::String, value) => {
                Err(mismatch(&value))
            }
            (_, value) => Ok(value),
        }
    }

    /// Parse a command-line argument as a value of `ty`.
    pub fn parse_as(text: &str, ty: &TypeRef) -> RuntimeResult<Self> {
        let invalid = || RuntimeError::InvalidLiteral {
            text: text.to_string(),
            ty: ty.to_string(),
        };
        match ty {
            TypeRef::Bool => text.parse().map(Value::Bool).map_err(|_| invalid()),
            TypeRef::I32 => text.parse().map(Value::I32).map_err(|_| invalid()),
            TypeRef::I64 => text.parse().map(Value::I64).map_err(|_| invalid()),
            TypeRef::F64 => text.parse().map(Value::F64).map_err(|_| invalid()),
            _ if text == "null" => Ok(Value::Null),
            _ => Ok(Value::string(text)),
        }
    }

    pub fn to_cache_value(&self) -> RuntimeResult<CacheValue> {
        Ok(match self {
            Value::Null => CacheValue::Null,
            Value::Bool(value) => CacheValue::Bool(*value),
            Value::I32(value) => CacheValue::I32(*value),
            Value::I64(value) => CacheValue::I64(*value),
            Value::F64(value) => CacheValue::F64(*value),
            Value::Str(text) => CacheValue::Str(text.to_string()),
            Value::Type(name) => CacheValue::Type(name.clone()),
            Value::Array(items) => CacheValue::List(
                items
                    .read()
                    .iter()
                    .map(Value::to_cache_value)
                    .collect::<RuntimeResult<_>>()?,
            ),
            other => return Err(RuntimeError::Uncacheable(other.type_name().to_string())),
        })
    }

    pub fn from_cache_value(value: CacheValue) -> Self {
        match value {
            CacheValue::Null => Value::Null,
            CacheValue::Bool(value) => Value::Bool(value),
            CacheValue::I32(value) => Value::I32(value),
            CacheValue::I64(value) => Value::I64(value),
            CacheValue::F64(value) => Value::F64(value),
            CacheValue::Str(text) => Value::string(text),
            CacheValue::Type(name) => Value::Type(name),
            CacheValue::List(items) => {
                Value::array(items.into_iter().map(Value::from_cache_value).collect())
            }
        }
    }

    /// Convert an options map into provider store options.
    pub fn to_store_options(&self) -> RuntimeResult<StoreOptions> {
        let mut options = StoreOptions::new();
        match self {
            Value::Null => {}
            Value::Map(map) => {
                for (name, value) in map.read().iter() {
                    options.insert(name.clone(), value.to_cache_value()?);
                }
            }
            other => return Err(RuntimeError::mismatch("options map", other.type_name())),
        }
        Ok(options)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::I32(a), Value::I64(b)) | (Value::I64(b), Value::I32(a)) => i64::from(*a) == *b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Provider(a), Value::Provider(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(value) => write!(f, "Bool({value})"),
            Value::I32(value) => write!(f, "I32({value})"),
            Value::I64(value) => write!(f, "I64({value})"),
            Value::F64(value) => write!(f, "F64({value})"),
            Value::Str(text) => write!(f, "Str({text:?})"),
            Value::Type(name) => write!(f, "Type({name})"),
            Value::Array(items) => f.debug_tuple("Array").field(&*items.read()).finish(),
            Value::Object(object) => write!(f, "Object({})", object.class),
            Value::Map(map) => f.debug_tuple("Map").field(&*map.read()).finish(),
            Value::Provider(provider) => write!(f, "Provider({})", provider.name()),
        }
    }
}

/// Renders values the way `String.Format` does.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::I32(value) => write!(f, "{value}"),
            Value::I64(value) => write!(f, "{value}"),
            Value::F64(value) => write!(f, "{value}"),
            Value::Str(text) => f.write_str(text),
            Value::Type(name) => f.write_str(name),
            Value::Array(_) => f.write_str("System.Object[]"),
            Value::Object(object) => f.write_str(&object.class),
            Value::Map(_) => f.write_str(crate::weaver::references::DICTIONARY_TYPE),
            Value::Provider(provider) => f.write_str(provider.name()),
        }
    }
}
