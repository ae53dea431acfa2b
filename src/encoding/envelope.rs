//! Response envelopes.
//!
//! Every response body is `{"code":..,"message":..,"data":..}`. Error
//! envelopes carry only `code`, and the HTTP status stays `200 OK`: the
//! envelope code is the only failure signal a client sees.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::schema::ResponseConfig;
use crate::encoding::codec::{CodecError, CodecRegistry};
use crate::encoding::resolver::ErrorCodeResolver;
use crate::error::ServiceError;
use crate::rpc::Payload;

/// Body written when an envelope cannot be encoded.
pub const FALLBACK_BODY: &str = r#"{"code":500}"#;

const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub code: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn success(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: Some(message.into()),
            data,
        }
    }

    /// Envelope with nothing but a code.
    pub fn code_only(code: i32) -> Self {
        Self {
            code,
            message: None,
            data: None,
        }
    }
}

/// An encoded body ready to be written by the transport.
#[derive(Debug, Clone)]
pub struct EncodedResponse {
    pub status: StatusCode,
    pub content_type: HeaderValue,
    pub body: Bytes,
}

impl EncodedResponse {
    pub fn new(status: StatusCode, content_type: &'static str, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: HeaderValue::from_static(content_type),
            body: body.into(),
        }
    }

    /// The literal fallback body with status 200.
    pub fn fallback() -> Self {
        Self::new(StatusCode::OK, JSON_CONTENT_TYPE, Bytes::from_static(FALLBACK_BODY.as_bytes()))
    }
}

impl IntoResponse for EncodedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        response.headers_mut().insert(header::CONTENT_TYPE, self.content_type);
        response
    }
}

/// Encodes handler results into envelopes using the negotiated codec.
#[derive(Clone)]
pub struct ResponseEncoder {
    codecs: Arc<CodecRegistry>,
    resolver: ErrorCodeResolver,
    success_code: i32,
    success_message: String,
}

impl ResponseEncoder {
    pub fn new(config: &ResponseConfig) -> Self {
        Self {
            codecs: Arc::new(CodecRegistry::new()),
            resolver: ErrorCodeResolver::new(config.fallback_error_code),
            success_code: config.success_code,
            success_message: config.success_message.clone(),
        }
    }

    pub fn with_resolver(mut self, resolver: ErrorCodeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = Arc::new(codecs);
        self
    }

    pub fn resolver(&self) -> &ErrorCodeResolver {
        &self.resolver
    }

    /// Wrap a handler reply. Payloads without a wire form produce no `data`.
    pub fn encode_success(
        &self,
        request_headers: &HeaderMap,
        reply: &dyn Payload,
    ) -> EncodedResponse {
        let data = match reply.as_message().map(|m| m.to_json_value()).transpose() {
            Ok(data) => data,
            Err(e) => {
                tracing::error!(error = %e, "Failed to marshal reply data");
                return EncodedResponse::fallback();
            }
        };
        let envelope = Envelope::success(self.success_code, self.success_message.clone(), data);
        self.encode(request_headers, &envelope)
    }

    /// Encode an error as a code-only envelope with status 200.
    pub fn encode_error(&self, request_headers: &HeaderMap, err: &ServiceError) -> EncodedResponse {
        let envelope = Envelope::code_only(self.resolver.resolve(Some(err)));
        self.encode(request_headers, &envelope)
    }

    fn encode(&self, request_headers: &HeaderMap, envelope: &Envelope) -> EncodedResponse {
        let codec = self.codecs.for_request(request_headers);
        let encoded = serde_json::to_value(envelope)
            .map_err(CodecError::from)
            .and_then(|value| codec.marshal(&value));
        match encoded {
            Ok(body) => EncodedResponse::new(StatusCode::OK, codec.content_type(), body),
            Err(e) => {
                tracing::error!(
                    codec = codec.name(),
                    error = %e,
                    "Failed to encode response envelope"
                );
                EncodedResponse::fallback()
            }
        }
    }
}

impl Default for ResponseEncoder {
    fn default() -> Self {
        Self::new(&ResponseConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::codec::Codec;
    use crate::rpc::Structured;
    use serde::ser::Error as _;
    use serde_json::json;

    #[derive(Debug)]
    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("refusing to serialize"))
        }
    }

    struct BrokenCodec;

    impl Codec for BrokenCodec {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn content_type(&self) -> &'static str {
            "application/broken"
        }

        fn marshal(&self, _: &Value) -> Result<Vec<u8>, CodecError> {
            Err(CodecError::Unsupported {
                codec: "broken",
                message: "always fails".to_string(),
            })
        }
    }

    fn body(resp: &EncodedResponse) -> &str {
        std::str::from_utf8(&resp.body).unwrap()
    }

    #[test]
    fn test_success_envelope() {
        let encoder = ResponseEncoder::default();
        let reply = Structured(json!({"id": 7}));
        let resp = encoder.encode_success(&HeaderMap::new(), &reply);
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.content_type, "application/json");
        assert_eq!(body(&resp), r#"{"code":200,"message":"success","data":{"id":7}}"#);
    }

    #[test]
    fn test_success_without_wire_form_omits_data() {
        let resp = ResponseEncoder::default().encode_success(&HeaderMap::new(), &());
        assert_eq!(body(&resp), r#"{"code":200,"message":"success"}"#);
    }

    #[test]
    fn test_success_uses_configured_code_and_message() {
        let config = ResponseConfig {
            success_code: 0,
            success_message: "ok".to_string(),
            ..ResponseConfig::default()
        };
        let resp = ResponseEncoder::new(&config).encode_success(&HeaderMap::new(), &json!(null));
        assert_eq!(body(&resp), r#"{"code":0,"message":"ok","data":null}"#);
    }

    #[test]
    fn test_error_envelope_is_code_only() {
        let encoder = ResponseEncoder::default();
        let err = ServiceError::new(40001, "INVALID_ARGUMENT", "name must not be empty");
        let resp = encoder.encode_error(&HeaderMap::new(), &err);
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(body(&resp), r#"{"code":40001}"#);
        assert!(!body(&resp).contains("name must not be empty"));
        assert!(!body(&resp).contains("INVALID_ARGUMENT"));
    }

    #[test]
    fn test_error_with_zero_code_uses_fallback() {
        let err = ServiceError::new(0, "", "boom");
        let resp = ResponseEncoder::default().encode_error(&HeaderMap::new(), &err);
        assert_eq!(body(&resp), r#"{"code":500}"#);
    }

    #[test]
    fn test_error_uses_mapper() {
        let resolver = ErrorCodeResolver::default().with_mapper(|_| 123456);
        let encoder = ResponseEncoder::default().with_resolver(resolver);
        let resp = encoder.encode_error(&HeaderMap::new(), &ServiceError::internal("X", "x"));
        assert_eq!(body(&resp), r#"{"code":123456}"#);
    }

    #[test]
    fn test_unserializable_reply_falls_back() {
        let reply = Structured(Unserializable);
        let resp = ResponseEncoder::default().encode_success(&HeaderMap::new(), &reply);
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(body(&resp), FALLBACK_BODY);
    }

    #[test]
    fn test_codec_failure_falls_back() {
        let codecs = CodecRegistry::new().register(Arc::new(BrokenCodec));
        let encoder = ResponseEncoder::default().with_codecs(codecs);
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/broken"));
        let resp = encoder.encode_error(&headers, &ServiceError::bad_request("BAD", "bad"));
        assert_eq!(body(&resp), FALLBACK_BODY);
        assert_eq!(resp.content_type, "application/json");
    }

    #[test]
    fn test_into_response() {
        let resp = EncodedResponse::fallback().into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
    }
}
