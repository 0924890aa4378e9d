//! Trace context carried by the trace-propagation headers.
//!
//! Callers instrumented with Elastic APM send `Elastic-Apm-Traceparent`;
//! others send the W3C `traceparent`. Both carry the same value format.

use std::fmt;

/// W3C trace-propagation header
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Elastic APM trace-propagation header
pub const ELASTIC_TRACEPARENT_HEADER: &str = "elastic-apm-traceparent";

/// Propagation headers in the order they are consulted
pub const TRACE_HEADERS: [&str; 2] = [ELASTIC_TRACEPARENT_HEADER, TRACEPARENT_HEADER];

/// Trace identity of one call. The trace id is empty when the caller sent
/// no usable trace context.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    /// Context without a trace id
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.trace_id.is_empty()
    }

    /// Parse a `traceparent` value (`version-traceid-parentid-flags`).
    ///
    /// Returns `None` for anything that is not a well-formed value.
    pub fn parse_traceparent(value: &str) -> Option<Self> {
        let fields: Vec<&str> = value.trim().split('-').collect();
        if fields.len() < 4 {
            return None;
        }

        let version = decode_hex(fields[0], 1)?;
        // 0xff is reserved as invalid; version 00 has exactly four fields
        if version[0] == 0xff || (version[0] == 0 && fields.len() != 4) {
            return None;
        }

        let trace_id = decode_hex(fields[1], 16)?;
        let span_id = decode_hex(fields[2], 8)?;
        decode_hex(fields[3], 1)?;
        if trace_id.iter().all(|b| *b == 0) || span_id.iter().all(|b| *b == 0) {
            return None;
        }

        Some(Self {
            trace_id: hex::encode(trace_id),
        })
    }

    /// Trace id from every value a request carried for the header.
    ///
    /// Exactly one well-formed value yields its trace id; zero values,
    /// several values, or a malformed value yield an empty context.
    pub fn from_header_values<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut values = values.into_iter();
        match (values.next(), values.next()) {
            (Some(value), None) => Self::parse_traceparent(value).unwrap_or_default(),
            _ => Self::empty(),
        }
    }
}

fn decode_hex(field: &str, len: usize) -> Option<Vec<u8>> {
    if field.len() != len * 2 {
        return None;
    }
    hex::decode(field).ok()
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.trace_id)
    }
}
