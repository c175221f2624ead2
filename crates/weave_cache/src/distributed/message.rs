use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::provider::ProviderError;
use crate::value::{CacheValue, StoreOptions};

/// Messages older than this many seconds are ignored by receivers.
pub const STALENESS_WINDOW_SECS: i64 = 600;

const IS_BATCH: &str = "IsBatch";
const DATA_TYPE: &str = "DataType";
const DATA: &str = "Data";
const PARAMETERS: &str = "Parameters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheAction {
    Remove,
    UpdateExpire,
    Store,
}

/// Invalidation broadcast exchanged between distributed cache nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CacheSyncMsg {
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub cache_key: Option<String>,
    pub action: CacheAction,
    #[serde(default)]
    pub duration: u32,
    #[serde(default)]
    pub options: Map<String, Value>,
    pub sender: Uuid,
}

impl CacheSyncMsg {
    fn new(sender: Uuid, action: CacheAction, key: Option<&str>) -> Self {
        Self {
            created_at: Utc::now(),
            cache_key: key.map(str::to_string),
            action,
            duration: 0,
            options: Map::new(),
            sender,
        }
    }

    pub fn remove(sender: Uuid, key: &str) -> Self {
        Self::new(sender, CacheAction::Remove, Some(key))
    }

    pub fn remove_batch(sender: Uuid, prefix: &str) -> Self {
        let mut msg = Self::new(sender, CacheAction::Remove, Some(prefix));
        msg.options.insert(IS_BATCH.into(), Value::Bool(true));
        msg
    }

    /// A batch remove with no key: receivers drop everything.
    pub fn clear(sender: Uuid) -> Self {
        let mut msg = Self::new(sender, CacheAction::Remove, None);
        msg.options.insert(IS_BATCH.into(), Value::Bool(true));
        msg
    }

    pub fn update_expire(sender: Uuid, key: &str, seconds: u32) -> Self {
        let mut msg = Self::new(sender, CacheAction::UpdateExpire, Some(key));
        msg.duration = seconds;
        msg
    }

    pub fn store(
        sender: Uuid,
        key: &str,
        value: &CacheValue,
        options: &StoreOptions,
    ) -> Result<Self, ProviderError> {
        let mut msg = Self::new(sender, CacheAction::Store, Some(key));
        msg.options
            .insert(PARAMETERS.into(), serde_json::to_value(options)?);
        if matches!(value, CacheValue::Null) {
            msg.options.insert(DATA.into(), Value::String(String::new()));
        } else {
            msg.options
                .insert(DATA_TYPE.into(), Value::String(value.type_name().into()));
            let encoded = BASE64.encode(serde_json::to_vec(value)?);
            msg.options.insert(DATA.into(), Value::String(encoded));
        }
        Ok(msg)
    }

    pub fn is_batch(&self) -> bool {
        self.options
            .get(IS_BATCH)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at).num_seconds() > STALENESS_WINDOW_SECS
    }

    /// Decode the value and options carried by a store message.
    ///
    /// Returns `Ok(None)` for a store of a null value, which receivers skip.
    pub fn payload(&self) -> Result<Option<(CacheValue, StoreOptions)>, ProviderError> {
        let Some(data_type) = self.options.get(DATA_TYPE).and_then(Value::as_str) else {
            return Ok(None);
        };
        let data = self
            .options
            .get(DATA)
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Payload("store message without Data".into()))?;
        let bytes = BASE64
            .decode(data)
            .map_err(|err| ProviderError::Payload(err.to_string()))?;
        let value: CacheValue = serde_json::from_slice(&bytes)?;
        if value.type_name() != data_type {
            return Err(ProviderError::Payload(format!(
                "DataType `{data_type}` does not match decoded `{}`",
                value.type_name()
            )));
        }
        let options = match self.options.get(PARAMETERS) {
            Some(Value::Null) | None => StoreOptions::new(),
            Some(parameters) => serde_json::from_value(parameters.clone())?,
        };
        Ok(Some((value, options)))
    }

    pub fn to_json(&self) -> Result<String, ProviderError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> Result<Self, ProviderError> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_format_uses_pascal_case_fields() {
        let msg = CacheSyncMsg::remove_batch(Uuid::nil(), "Calc.");
        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(json["CacheKey"], "Calc.");
        assert_eq!(json["Action"], "Remove");
        assert_eq!(json["Options"]["IsBatch"], true);
        assert!(json.get("CreatedAt").is_some());
        assert!(json.get("Sender").is_some());
    }

    #[test]
    fn clear_is_a_keyless_batch_remove() {
        let msg = CacheSyncMsg::clear(Uuid::new_v4());
        assert_eq!(msg.action, CacheAction::Remove);
        assert!(msg.is_batch());
        assert_eq!(msg.cache_key, None);
    }

    #[test]
    fn store_payload_decodes_value_and_parameters() {
        let value = CacheValue::List(vec![CacheValue::I32(1), CacheValue::Str("x".into())]);
        let msg = CacheSyncMsg::store(Uuid::nil(), "k", &value, &StoreOptions::with_duration(30))
            .expect("store message should encode");
        let wire = CacheSyncMsg::from_json(&msg.to_json().unwrap()).unwrap();

        let (decoded, options) = wire
            .payload()
            .expect("payload should decode")
            .expect("non-null payload");
        assert_eq!(decoded, value);
        assert_eq!(options.duration(), Some(std::time::Duration::from_secs(30)));
    }

    #[test]
    fn null_store_has_no_payload() {
        let msg = CacheSyncMsg::store(Uuid::nil(), "k", &CacheValue::Null, &StoreOptions::new())
            .unwrap();
        assert!(msg.payload().unwrap().is_none());
    }

    #[test]
    fn corrupt_data_is_rejected() {
        let mut msg =
            CacheSyncMsg::store(Uuid::nil(), "k", &CacheValue::I32(4), &StoreOptions::new())
                .unwrap();
        msg.options
            .insert(DATA.into(), Value::String("not base64!".into()));
        assert!(matches!(msg.payload(), Err(ProviderError::Payload(_))));
    }

    #[test]
    fn staleness_uses_the_ten_minute_window() {
        let mut msg = CacheSyncMsg::remove(Uuid::nil(), "k");
        let now = msg.created_at;
        assert!(!msg.is_stale(now));

        msg.created_at = now - chrono::Duration::seconds(STALENESS_WINDOW_SECS + 1);
        assert!(msg.is_stale(now));
    }
}
