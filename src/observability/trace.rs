//! Distributed trace context propagation.
//!
//! Reads W3C Trace Context (`traceparent`, `tracestate`) and W3C Baggage from
//! inbound headers into the [`ExecutionContext`], and reports the bound
//! identity for response headers. A context that already carries a valid
//! span is never overwritten.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::{HeaderMap, HeaderValue};

use crate::rpc::context::ExecutionContext;

/// W3C Trace Context header name
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// W3C Trace State header name
pub const TRACESTATE_HEADER: &str = "tracestate";
/// W3C Baggage header name
pub const BAGGAGE_HEADER: &str = "baggage";
/// Response header carrying the trace id
pub const TRACE_ID_HEADER: &str = "trace-id";
/// Response header carrying the span id
pub const SPAN_ID_HEADER: &str = "span-id";
/// Placeholder for ids when no valid span is bound
pub const NONE: &str = "none";

const MAX_BAGGAGE_MEMBERS: usize = 180;
const MAX_BAGGAGE_BYTES: usize = 8192;

/// Span context received from a remote caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanContext {
    trace_id: String,
    span_id: String,
    trace_flags: u8,
    trace_state: Option<String>,
    remote: bool,
}

impl SpanContext {
    /// Parse a `traceparent` header value.
    ///
    /// Format: `version-trace_id-parent_id-flags`, lowercase hex. Version `ff`
    /// and all-zero ids are invalid. Version `00` allows exactly four fields;
    /// later versions may append more.
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.trim().split('-').collect();
        if parts.len() < 4 {
            return None;
        }

        let version = parts[0];
        if version.len() != 2 || !is_lower_hex(version) || version == "ff" {
            return None;
        }
        if version == "00" && parts.len() != 4 {
            return None;
        }

        let trace_id = parts[1];
        let span_id = parts[2];
        let flags = parts[3];

        if trace_id.len() != 32 || span_id.len() != 16 || flags.len() != 2 {
            return None;
        }
        if !is_lower_hex(trace_id) || !is_lower_hex(span_id) || !is_lower_hex(flags) {
            return None;
        }
        if is_all_zero(trace_id) || is_all_zero(span_id) {
            return None;
        }

        let trace_flags = u8::from_str_radix(flags, 16).ok()?;

        Some(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            trace_flags,
            trace_state: None,
            remote: true,
        })
    }

    pub fn with_trace_state(mut self, state: Option<String>) -> Self {
        self.trace_state = state.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn trace_state(&self) -> Option<&str> {
        self.trace_state.as_deref()
    }

    pub fn is_sampled(&self) -> bool {
        self.trace_flags & 0x01 != 0
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    /// Both ids present, well-formed and non-zero.
    pub fn is_valid(&self) -> bool {
        self.trace_id.len() == 32
            && self.span_id.len() == 16
            && is_lower_hex(&self.trace_id)
            && is_lower_hex(&self.span_id)
            && !is_all_zero(&self.trace_id)
            && !is_all_zero(&self.span_id)
    }

    /// Format as a `traceparent` header value.
    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, self.span_id, self.trace_flags)
    }
}

/// Trace and span ids reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceIdentity {
    pub trace_id: String,
    pub span_id: String,
}

impl TraceIdentity {
    pub fn none() -> Self {
        Self {
            trace_id: NONE.to_string(),
            span_id: NONE.to_string(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.trace_id == NONE && self.span_id == NONE
    }
}

impl fmt::Display for TraceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "trace_id={} span_id={}", self.trace_id, self.span_id)
    }
}

/// Bind the trace context found in `headers` to `ctx`.
///
/// Returns `ctx` unchanged when it already carries a valid span, or when the
/// headers hold no usable `traceparent`. Baggage is bound independently and
/// only when the context has none.
pub fn extract(ctx: ExecutionContext, headers: &HeaderMap) -> ExecutionContext {
    if ctx.has_valid_span() {
        return ctx;
    }

    let mut ctx = ctx;
    let parent = header_str(headers, TRACEPARENT_HEADER).and_then(SpanContext::from_traceparent);
    if let Some(span) = parent {
        let state = header_str(headers, TRACESTATE_HEADER).map(str::to_string);
        ctx = ctx.with_span_context(span.with_trace_state(state));
    }

    let baggage = parse_baggage(headers);
    if !baggage.is_empty() {
        ctx = ctx.with_baggage(baggage);
    }
    ctx
}

/// Ids of the span bound to `ctx`, or `none`/`none`.
pub fn identity(ctx: &ExecutionContext) -> TraceIdentity {
    match ctx.span_context() {
        Some(span) if span.is_valid() => TraceIdentity {
            trace_id: span.trace_id().to_string(),
            span_id: span.span_id().to_string(),
        },
        _ => TraceIdentity::none(),
    }
}

/// Write the bound trace context into outbound request headers.
pub fn inject(ctx: &ExecutionContext, headers: &mut HeaderMap) {
    if let Some(span) = ctx.span_context().filter(|s| s.is_valid()) {
        if let Ok(v) = HeaderValue::from_str(&span.to_traceparent()) {
            headers.insert(TRACEPARENT_HEADER, v);
        }
        if let Some(state) = span.trace_state().and_then(|s| HeaderValue::from_str(s).ok()) {
            headers.insert(TRACESTATE_HEADER, state);
        }
    }
    if !ctx.baggage().is_empty() {
        let value = ctx
            .baggage()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(BAGGAGE_HEADER, v);
        }
    }
}

/// Client address from forwarding headers.
///
/// `X-Forwarded-For` wins over `X-Real-IP`; the value is returned verbatim.
pub fn client_ip(headers: &HeaderMap) -> String {
    ["x-forwarded-for", "x-real-ip"]
        .iter()
        .filter_map(|key| header_str(headers, key))
        .find(|ip| !ip.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| "unknown".to_string())
}

fn parse_baggage(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let mut total = 0usize;
    for value in headers.get_all(BAGGAGE_HEADER) {
        let Ok(value) = value.to_str() else { continue };
        total += value.len();
        if total > MAX_BAGGAGE_BYTES {
            break;
        }
        for member in value.split(',') {
            if out.len() >= MAX_BAGGAGE_MEMBERS {
                return out;
            }
            // Properties after ';' are not kept.
            let kv = member.split(';').next().unwrap_or_default();
            let Some((k, v)) = kv.split_once('=') else { continue };
            let (k, v) = (k.trim(), v.trim());
            if k.is_empty() {
                continue;
            }
            out.insert(k.to_string(), v.to_string());
        }
    }
    out
}

fn header_str<'a>(headers: &'a HeaderMap, key: &str) -> Option<&'a str> {
    headers.get(key).and_then(|v| v.to_str().ok()).map(str::trim)
}

fn is_lower_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn is_all_zero(s: &str) -> bool {
    s.bytes().all(|b| b == b'0')
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN: &str = "00f067aa0ba902b7";

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.append(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    fn traceparent() -> String {
        format!("00-{TRACE}-{SPAN}-01")
    }

    #[test]
    fn test_from_traceparent_valid() {
        let span = SpanContext::from_traceparent(&traceparent()).unwrap();
        assert_eq!(span.trace_id(), TRACE);
        assert_eq!(span.span_id(), SPAN);
        assert!(span.is_sampled());
        assert!(span.is_remote());
        assert!(span.is_valid());
    }

    #[test]
    fn test_from_traceparent_not_sampled() {
        let span = SpanContext::from_traceparent(&format!("00-{TRACE}-{SPAN}-00")).unwrap();
        assert!(!span.is_sampled());
    }

    #[test]
    fn test_from_traceparent_rejects_malformed() {
        let cases = [
            String::new(),
            "garbage".to_string(),
            format!("ff-{TRACE}-{SPAN}-01"),
            format!("00-{TRACE}-{SPAN}-01-extra"),
            format!("00-{}-{SPAN}-01", TRACE.to_uppercase()),
            format!("00-{}-{SPAN}-01", "0".repeat(32)),
            format!("00-{TRACE}-{}-01", "0".repeat(16)),
            format!("00-{TRACE}-{SPAN}-zz"),
            format!("00-{}-{SPAN}-01", &TRACE[..30]),
        ];
        for case in cases {
            assert!(SpanContext::from_traceparent(&case).is_none(), "accepted {case:?}");
        }
    }

    #[test]
    fn test_from_traceparent_future_version_extra_fields() {
        let span = SpanContext::from_traceparent(&format!("01-{TRACE}-{SPAN}-01-what")).unwrap();
        assert_eq!(span.trace_id(), TRACE);
    }

    #[test]
    fn test_to_traceparent() {
        let span = SpanContext::from_traceparent(&traceparent()).unwrap();
        assert_eq!(span.to_traceparent(), traceparent());
    }

    #[test]
    fn test_extract_binds_identity() {
        let ctx = extract(ExecutionContext::new(), &headers(&[("traceparent", &traceparent())]));
        let id = identity(&ctx);
        assert_eq!(id.trace_id, TRACE);
        assert_eq!(id.span_id, SPAN);
    }

    #[test]
    fn test_extract_trace_state() {
        let ctx = extract(
            ExecutionContext::new(),
            &headers(&[("traceparent", &traceparent()), ("tracestate", "congo=t61rcWkgMzE")]),
        );
        assert_eq!(ctx.span_context().unwrap().trace_state(), Some("congo=t61rcWkgMzE"));
    }

    #[test]
    fn test_extract_without_header_is_none() {
        let ctx = extract(ExecutionContext::new(), &HeaderMap::new());
        assert!(identity(&ctx).is_none());
    }

    #[test]
    fn test_extract_malformed_is_none() {
        let ctx = extract(ExecutionContext::new(), &headers(&[("traceparent", "00-abc-def-01")]));
        assert_eq!(identity(&ctx), TraceIdentity::none());
    }

    #[test]
    fn test_extract_is_idempotent() {
        let first = extract(ExecutionContext::new(), &headers(&[("traceparent", &traceparent())]));
        let before = identity(&first);
        let other = format!("00-{}-{}-01", "a".repeat(32), "b".repeat(16));
        let second = extract(first, &headers(&[("traceparent", &other)]));
        assert_eq!(identity(&second), before);
        let third = extract(second, &HeaderMap::new());
        assert_eq!(identity(&third), before);
    }

    #[test]
    fn test_extract_baggage() {
        let ctx = extract(
            ExecutionContext::new(),
            &headers(&[("baggage", "userId=alice, region = eu;prop=1"), ("baggage", "tier=gold")]),
        );
        let baggage = ctx.baggage();
        assert_eq!(baggage.get("userId").map(String::as_str), Some("alice"));
        assert_eq!(baggage.get("region").map(String::as_str), Some("eu"));
        assert_eq!(baggage.get("tier").map(String::as_str), Some("gold"));
    }

    #[test]
    fn test_baggage_member_limit() {
        let value = (0..300).map(|i| format!("k{i}=v")).collect::<Vec<_>>().join(",");
        let ctx = extract(ExecutionContext::new(), &headers(&[("baggage", &value)]));
        assert_eq!(ctx.baggage().len(), MAX_BAGGAGE_MEMBERS);
    }

    #[test]
    fn test_inject_round_trip() {
        let ctx = extract(
            ExecutionContext::new(),
            &headers(&[("traceparent", &traceparent()), ("baggage", "a=1")]),
        );
        let mut out = HeaderMap::new();
        inject(&ctx, &mut out);
        assert_eq!(out.get("traceparent").unwrap(), traceparent().as_str());
        assert_eq!(out.get("baggage").unwrap(), "a=1");
    }

    #[test]
    fn test_inject_without_span_writes_nothing() {
        let mut out = HeaderMap::new();
        inject(&ExecutionContext::new(), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_client_ip_precedence() {
        let h = headers(&[("x-real-ip", "10.0.0.2"), ("x-forwarded-for", "203.0.113.9, 10.0.0.1")]);
        assert_eq!(client_ip(&h), "203.0.113.9, 10.0.0.1");
    }

    #[test]
    fn test_client_ip_real_ip() {
        assert_eq!(client_ip(&headers(&[("x-real-ip", "10.0.0.2")])), "10.0.0.2");
    }

    #[test]
    fn test_client_ip_empty_forwarded_falls_through() {
        let h = headers(&[("x-forwarded-for", ""), ("x-real-ip", "10.0.0.2")]);
        assert_eq!(client_ip(&h), "10.0.0.2");
    }

    #[test]
    fn test_client_ip_unknown() {
        assert_eq!(client_ip(&HeaderMap::new()), "unknown");
    }

    #[test]
    fn test_identity_display() {
        assert_eq!(TraceIdentity::none().to_string(), "trace_id=none span_id=none");
    }
}
