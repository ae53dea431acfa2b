//! Loggable renderings of payloads and headers.
//!
//! Nothing here can fail: encoding errors and oversized bodies turn into short
//! placeholder strings so that logging never aborts a request or floods the
//! log pipeline.

use std::collections::BTreeMap;

use axum::http::HeaderMap;

use crate::rpc::payload::Payload;

/// Default upper bound for a logged body (1 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Replacement text for redacted header values.
pub const REDACTED: &str = "[REDACTED]";

/// Headers whose values never reach the logs by default.
pub const DEFAULT_REDACTED_HEADERS: &[&str] = &[
    "authorization",
    "proxy-authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
];

/// Render `payload` as a loggable string of at most `max_bytes` bytes of content.
///
/// Structured payloads are JSON-encoded. Other payloads use their `Debug`
/// form. An encoding failure or an oversized rendering yields a placeholder
/// instead of the content.
pub fn to_loggable_string(payload: &dyn Payload, max_bytes: usize) -> String {
    match payload.as_message() {
        Some(msg) => match msg.to_json_bytes() {
            Ok(body) if body.len() > max_bytes => too_large(body.len()),
            Ok(body) => String::from_utf8_lossy(&body).into_owned(),
            Err(e) => format!("<failed to marshal body: {e}>"),
        },
        None => {
            let text = format!("{payload:?}");
            if text.len() > max_bytes {
                too_large(text.len())
            } else {
                text
            }
        }
    }
}

/// Like [`to_loggable_string`], for a reply that may be absent.
pub fn optional_to_loggable_string(payload: Option<&dyn Payload>, max_bytes: usize) -> String {
    match payload {
        Some(p) => to_loggable_string(p, max_bytes),
        None => "<none>".to_string(),
    }
}

/// Encoded wire size of a structured payload, if it is one and it encodes.
pub fn wire_size(payload: &dyn Payload) -> Option<usize> {
    payload
        .as_message()
        .and_then(|msg| msg.to_json_bytes().ok())
        .map(|body| body.len())
}

/// Render headers for logging, with sensitive values replaced.
///
/// `redact` entries are compared case-insensitively. Repeated headers are
/// joined with `, `. Non-text values are shown as `<binary>`.
pub fn loggable_headers(headers: &HeaderMap, redact: &[String]) -> String {
    let mut out: BTreeMap<&str, String> = BTreeMap::new();
    for (name, value) in headers {
        let key = name.as_str();
        let rendered = if redact.iter().any(|r| r.eq_ignore_ascii_case(key)) {
            REDACTED.to_string()
        } else {
            value.to_str().map(str::to_string).unwrap_or_else(|_| "<binary>".to_string())
        };
        out.entry(key)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&rendered);
            })
            .or_insert(rendered);
    }
    format!("{out:?}")
}

fn too_large(size: usize) -> String {
    format!("<body too large, size: {size} bytes>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::payload::Structured;
    use axum::http::HeaderValue;
    use serde::ser::Error as _;
    use serde::Serialize;

    #[derive(Debug, Serialize)]
    struct Greeting {
        message: String,
    }

    #[derive(Debug)]
    struct Broken;

    impl Serialize for Broken {
        fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("unsupported value"))
        }
    }

    fn redact_defaults() -> Vec<String> {
        DEFAULT_REDACTED_HEADERS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_structured_within_limit() {
        let p = Structured(Greeting { message: "hi".into() });
        assert_eq!(to_loggable_string(&p, DEFAULT_MAX_BODY_BYTES), r#"{"message":"hi"}"#);
    }

    #[test]
    fn test_structured_over_limit() {
        let p = Structured(Greeting { message: "x".repeat(64) });
        let size = serde_json::to_vec(&p.0).unwrap().len();
        let out = to_loggable_string(&p, 16);
        assert_eq!(out, format!("<body too large, size: {size} bytes>"));
        assert!(!out.contains("xxxx"));
    }

    #[test]
    fn test_exact_limit_is_kept() {
        let p = Structured(Greeting { message: "hi".into() });
        let size = serde_json::to_vec(&p.0).unwrap().len();
        assert_eq!(to_loggable_string(&p, size), r#"{"message":"hi"}"#);
    }

    #[test]
    fn test_marshal_failure_placeholder() {
        let out = to_loggable_string(&Structured(Broken), DEFAULT_MAX_BODY_BYTES);
        assert!(out.starts_with("<failed to marshal body:"));
        assert!(out.contains("unsupported value"));
    }

    #[test]
    fn test_plain_payload_debug() {
        let p = String::from("plain");
        assert_eq!(to_loggable_string(&p, DEFAULT_MAX_BODY_BYTES), "\"plain\"");
    }

    #[test]
    fn test_plain_payload_over_limit() {
        let p = "y".repeat(100);
        assert_eq!(to_loggable_string(&p, 10), "<body too large, size: 102 bytes>");
    }

    #[test]
    fn test_absent_reply() {
        assert_eq!(optional_to_loggable_string(None, 10), "<none>");
    }

    #[test]
    fn test_wire_size() {
        let p = Structured(Greeting { message: "hi".into() });
        assert_eq!(wire_size(&p), Some(16));
        assert_eq!(wire_size(&String::from("plain")), None);
        assert_eq!(wire_size(&Structured(Broken)), None);
    }

    #[test]
    fn test_headers_redacted() {
        let mut h = HeaderMap::new();
        h.insert("authorization", HeaderValue::from_static("Bearer secret-token"));
        h.insert("x-request-id", HeaderValue::from_static("abc"));
        let out = loggable_headers(&h, &redact_defaults());
        assert!(!out.contains("secret-token"));
        assert!(out.contains(REDACTED));
        assert!(out.contains("abc"));
    }

    #[test]
    fn test_headers_redaction_case_insensitive() {
        let mut h = HeaderMap::new();
        h.insert("x-api-key", HeaderValue::from_static("k"));
        let out = loggable_headers(&h, &["X-API-KEY".to_string()]);
        assert_eq!(out, format!("{{\"x-api-key\": \"{REDACTED}\"}}"));
    }

    #[test]
    fn test_repeated_headers_joined() {
        let mut h = HeaderMap::new();
        h.append("accept", HeaderValue::from_static("a"));
        h.append("accept", HeaderValue::from_static("b"));
        assert_eq!(loggable_headers(&h, &[]), "{\"accept\": \"a, b\"}");
    }
}
