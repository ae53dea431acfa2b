//! Body codecs and `Accept`-based negotiation.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{codec}: {message}")]
    Unsupported { codec: &'static str, message: String },
}

/// Serializes envelope values for one content subtype.
pub trait Codec: Send + Sync {
    /// Content subtype this codec answers to, e.g. `json`.
    fn name(&self) -> &'static str;

    /// Full `Content-Type` value written with encoded bodies.
    fn content_type(&self) -> &'static str;

    fn marshal(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn marshal(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(value)?)
    }
}

/// Registered codecs keyed by subtype. JSON is always present.
#[derive(Clone)]
pub struct CodecRegistry {
    codecs: Vec<Arc<dyn Codec>>,
    json: Arc<dyn Codec>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        let json: Arc<dyn Codec> = Arc::new(JsonCodec);
        Self {
            codecs: vec![json.clone()],
            json,
        }
    }

    /// Add a codec. A later codec with the same name replaces the earlier one.
    pub fn register(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codecs.retain(|c| c.name() != codec.name());
        self.codecs.push(codec);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Codec>> {
        self.codecs
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .cloned()
    }

    /// First `Accept` media range with a registered codec, else JSON.
    pub fn for_request(&self, headers: &HeaderMap) -> Arc<dyn Codec> {
        headers
            .get_all(header::ACCEPT)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .filter_map(content_subtype)
            .find_map(|subtype| self.get(subtype))
            .unwrap_or_else(|| self.json.clone())
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `application/vnd.api+json; q=0.9` → `json`.
fn content_subtype(media_range: &str) -> Option<&str> {
    let media = media_range.split(';').next()?.trim();
    let (_, subtype) = media.split_once('/')?;
    let subtype = subtype.rsplit('+').next()?;
    (!subtype.is_empty() && subtype != "*").then_some(subtype)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    struct TextCodec;

    impl Codec for TextCodec {
        fn name(&self) -> &'static str {
            "plain"
        }

        fn content_type(&self) -> &'static str {
            "text/plain"
        }

        fn marshal(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
            Ok(value.to_string().into_bytes())
        }
    }

    fn accept(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_content_subtype() {
        assert_eq!(content_subtype("application/json"), Some("json"));
        assert_eq!(content_subtype(" application/json; charset=utf-8"), Some("json"));
        assert_eq!(content_subtype("application/vnd.api+json"), Some("json"));
        assert_eq!(content_subtype("*/*"), None);
        assert_eq!(content_subtype("garbage"), None);
    }

    #[test]
    fn test_json_is_fallback() {
        let registry = CodecRegistry::new();
        assert_eq!(registry.for_request(&HeaderMap::new()).name(), "json");
        assert_eq!(registry.for_request(&accept("application/xml")).name(), "json");
        assert_eq!(registry.for_request(&accept("*/*")).name(), "json");
    }

    #[test]
    fn test_negotiates_registered_codec() {
        let registry = CodecRegistry::new().register(Arc::new(TextCodec));
        let codec = registry.for_request(&accept("application/xml, text/plain;q=0.5"));
        assert_eq!(codec.name(), "plain");
        assert_eq!(codec.content_type(), "text/plain");
    }

    #[test]
    fn test_register_replaces_same_name() {
        let registry = CodecRegistry::new().register(Arc::new(JsonCodec));
        assert_eq!(registry.codecs.len(), 1);
    }

    #[test]
    fn test_json_marshal() {
        let bytes = JsonCodec.marshal(&serde_json::json!({"code": 200})).unwrap();
        assert_eq!(bytes, br#"{"code":200}"#);
    }
}
