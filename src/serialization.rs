//! Pluggable text codec for cached values and sync messages.
//!
//! Codecs work over the `serde_json::Value` data model so they stay object safe
//! and can be swapped at runtime behind a `dyn TextSerialize`.
//! Typed values are converted to and from that model at the edges by
//! [`encode`] and [`decode`].

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};

/// Marshal/unmarshal contract between objects and their stored text form.
///
/// # Example
///
/// ```
/// use dcache::serialization::{JsonSerialize, TextSerialize};
///
/// let text = JsonSerialize.marshal(&serde_json::json!({"name": "a"})).unwrap();
/// assert_eq!(text, r#"{"name":"a"}"#);
/// ```
pub trait TextSerialize: Send + Sync {
    /// Render a value as text.
    fn marshal(&self, value: &Value) -> Result<String>;

    /// Parse text produced by [`marshal`](TextSerialize::marshal).
    fn unmarshal(&self, text: &str) -> Result<Value>;
}

/// Compact JSON, the default codec.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerialize;

impl TextSerialize for JsonSerialize {
    fn marshal(&self, value: &Value) -> Result<String> {
        serde_json::to_string(value).map_err(|e| Error::SerializationError(e.to_string()))
    }

    fn unmarshal(&self, text: &str) -> Result<Value> {
        serde_json::from_str(text).map_err(|e| Error::DeserializationError(e.to_string()))
    }
}

/// Serialize `value` through `codec`.
pub fn encode<T: Serialize + ?Sized>(codec: &dyn TextSerialize, value: &T) -> Result<String> {
    let value = serde_json::to_value(value).map_err(|e| Error::SerializationError(e.to_string()))?;
    codec.marshal(&value)
}

/// Deserialize `text` through `codec` into `T`.
pub fn decode<T: DeserializeOwned>(codec: &dyn TextSerialize, text: &str) -> Result<T> {
    let value = codec.unmarshal(text)?;
    serde_json::from_value(value).map_err(|e| Error::DeserializationError(e.to_string()))
}

/// Codec slot shared by the facade and its sync listener.
#[derive(Clone)]
pub(crate) struct SharedSerializer {
    slot: Arc<RwLock<Arc<dyn TextSerialize>>>,
}

impl SharedSerializer {
    pub(crate) fn new(codec: Arc<dyn TextSerialize>) -> Self {
        SharedSerializer {
            slot: Arc::new(RwLock::new(codec)),
        }
    }

    /// The codec active right now; callers keep it for the whole operation.
    pub(crate) fn current(&self) -> Arc<dyn TextSerialize> {
        // The slot only ever holds a complete Arc, so a poisoned lock is still consistent.
        Arc::clone(&self.slot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn replace(&self, codec: Arc<dyn TextSerialize>) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = codec;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct User {
        name: String,
    }

    struct UpperSerialize;

    impl TextSerialize for UpperSerialize {
        fn marshal(&self, value: &Value) -> Result<String> {
            Ok(JsonSerialize.marshal(value)?.to_uppercase())
        }

        fn unmarshal(&self, text: &str) -> Result<Value> {
            JsonSerialize.unmarshal(&text.to_lowercase())
        }
    }

    #[test]
    fn test_encode_decode_json() {
        let user = User {
            name: "a".to_string(),
        };

        let text = encode(&JsonSerialize, &user).expect("Failed to encode");
        assert_eq!(text, r#"{"name":"a"}"#);

        let decoded: User = decode(&JsonSerialize, &text).expect("Failed to decode");
        assert_eq!(decoded, user);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let result: Result<User> = decode(&JsonSerialize, "not json");
        assert!(matches!(result, Err(Error::DeserializationError(_))));

        let result: Result<User> = decode(&JsonSerialize, r#"{"other":1}"#);
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[test]
    fn test_shared_serializer_replace() {
        let shared = SharedSerializer::new(Arc::new(JsonSerialize));
        let before = encode(shared.current().as_ref(), "x").expect("Failed to encode");
        assert_eq!(before, r#""x""#);

        shared.replace(Arc::new(UpperSerialize));
        let after = encode(shared.current().as_ref(), "x").expect("Failed to encode");
        assert_eq!(after, r#""X""#);
    }
}
