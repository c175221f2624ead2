use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DURATION_OPTION: &str = "Duration";
pub const EVICTION_OPTION: &str = "Eviction";

/// A value held by a cache provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CacheValue {
    Null,
    Bool(bool),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
    List(Vec<CacheValue>),
    Type(String),
}

impl CacheValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            CacheValue::Null => "null",
            CacheValue::Bool(_) => "bool",
            CacheValue::I32(_) => "i32",
            CacheValue::I64(_) => "i64",
            CacheValue::F64(_) => "f64",
            CacheValue::Str(_) => "string",
            CacheValue::List(_) => "list",
            CacheValue::Type(_) => "type",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CacheValue::I32(value) => Some(i64::from(*value)),
            CacheValue::I64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheValue::Str(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheValue::Null => f.write_str("null"),
            CacheValue::Bool(value) => write!(f, "{value}"),
            CacheValue::I32(value) => write!(f, "{value}"),
            CacheValue::I64(value) => write!(f, "{value}"),
            CacheValue::F64(value) => write!(f, "{value}"),
            CacheValue::Str(value) => f.write_str(value),
            CacheValue::Type(name) => f.write_str(name),
            CacheValue::List(items) => {
                f.write_str("[")?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionMode {
    #[default]
    Absolute,
    Sliding,
}

/// Options passed along with a `store` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreOptions(BTreeMap<String, CacheValue>);

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duration(seconds: u32) -> Self {
        let mut options = Self::new();
        options.insert(DURATION_OPTION, CacheValue::I32(seconds as i32));
        options
    }

    pub fn insert(&mut self, name: impl Into<String>, value: CacheValue) -> Option<CacheValue> {
        self.0.insert(name.into(), value)
    }

    pub fn get(&self, name: &str) -> Option<&CacheValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CacheValue)> {
        self.0.iter()
    }

    /// Entry lifetime; absent or non-positive durations mean "never expires".
    pub fn duration(&self) -> Option<Duration> {
        let seconds = self.get(DURATION_OPTION)?.as_i64()?;
        (seconds > 0).then(|| Duration::from_secs(seconds as u64))
    }

    pub fn eviction(&self) -> EvictionMode {
        match self.get(EVICTION_OPTION).and_then(CacheValue::as_str) {
            Some(mode) if mode.eq_ignore_ascii_case("sliding") => EvictionMode::Sliding,
            _ => EvictionMode::Absolute,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ignores_non_positive_values() {
        assert_eq!(StoreOptions::with_duration(30).duration(), Some(Duration::from_secs(30)));
        assert_eq!(StoreOptions::with_duration(0).duration(), None);

        let mut options = StoreOptions::new();
        options.insert(DURATION_OPTION, CacheValue::Str("soon".into()));
        assert_eq!(options.duration(), None);
    }

    #[test]
    fn eviction_defaults_to_absolute() {
        let mut options = StoreOptions::new();
        assert_eq!(options.eviction(), EvictionMode::Absolute);
        options.insert(EVICTION_OPTION, CacheValue::Str("Sliding".into()));
        assert_eq!(options.eviction(), EvictionMode::Sliding);
    }

    #[test]
    fn values_serialize_with_kind_tags() {
        let json = serde_json::to_string(&CacheValue::F64(2.75)).unwrap();
        assert_eq!(json, r#"{"kind":"f64","value":2.75}"#);
        let back: CacheValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CacheValue::F64(2.75));
    }
}
