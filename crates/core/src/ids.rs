use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IdKind, Result, TraceHouseError};

/// Width of a 64-bit trace id rendered as hex.
pub const SHORT_TRACE_ID_LEN: usize = 16;
/// Width of a 128-bit trace id rendered as hex.
pub const TRACE_ID_LEN: usize = 32;

/// 128-bit trace identifier.
///
/// Parses 1 to 32 hex characters. Renders as 16 characters when the high half
/// is zero and as 32 otherwise, so ids minted by 64-bit tracers keep their
/// short form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TraceId {
    high: u64,
    low: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpanId(u64);

impl TraceId {
    pub fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || TraceHouseError::invalid_id(IdKind::Trace, input);
        if input.is_empty() || input.len() > TRACE_ID_LEN {
            return Err(invalid());
        }
        let split = input.len().saturating_sub(SHORT_TRACE_ID_LEN);
        let (high, low) = input.split_at(split);
        let high = if high.is_empty() {
            0
        } else {
            parse_hex_u64(high).ok_or_else(invalid)?
        };
        let low = parse_hex_u64(low).ok_or_else(invalid)?;
        Ok(Self { high, low })
    }

    /// Always 32 characters, regardless of the high half.
    pub fn to_padded(&self) -> String {
        format!("{:016x}{:016x}", self.high, self.low)
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high == 0 {
            write!(f, "{:016x}", self.low)
        } else {
            write!(f, "{:016x}{:016x}", self.high, self.low)
        }
    }
}

impl TryFrom<String> for TraceId {
    type Error = TraceHouseError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TraceId> for String {
    fn from(value: TraceId) -> Self {
        value.to_string()
    }
}

impl SpanId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn parse(input: &str) -> Result<Self> {
        Self::parse_as(input, IdKind::Span)
    }

    pub fn parse_as(input: &str, kind: IdKind) -> Result<Self> {
        if input.len() > SHORT_TRACE_ID_LEN {
            return Err(TraceHouseError::invalid_id(kind, input));
        }
        parse_hex_u64(input)
            .map(Self)
            .ok_or_else(|| TraceHouseError::invalid_id(kind, input))
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl TryFrom<String> for SpanId {
    type Error = TraceHouseError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SpanId> for String {
    fn from(value: SpanId) -> Self {
        value.to_string()
    }
}

fn parse_hex_u64(input: &str) -> Option<u64> {
    // from_str_radix tolerates a leading '+', the wire format does not
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u64::from_str_radix(input, 16).ok()
}

/// Canonicalizes trace ids to the width the span table stores them in.
///
/// Deployments whose tables only ever held 64-bit ids turn padding off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceIdNormalizer {
    pad: bool,
}

impl TraceIdNormalizer {
    pub fn new(pad: bool) -> Self {
        Self { pad }
    }

    pub fn normalize(&self, id: &str) -> String {
        if self.pad && id.len() == SHORT_TRACE_ID_LEN {
            format!("{id:0>width$}", width = TRACE_ID_LEN)
        } else {
            id.to_string()
        }
    }

    pub fn normalize_all<S: AsRef<str>>(&self, ids: &[S]) -> Vec<String> {
        ids.iter().map(|id| self.normalize(id.as_ref())).collect()
    }
}

impl Default for TraceIdNormalizer {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ids() {
        let trace = TraceId::parse("4bf92f3577b34da6a3ce929d0e0e4736").unwrap();
        let span = SpanId::parse("00f067aa0ba902b7").unwrap();
        assert_eq!(trace.to_string(), "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(span.to_string(), "00f067aa0ba902b7");
    }

    #[test]
    fn short_and_padded_forms_are_the_same_id() {
        let short = TraceId::parse("c91fd0eb7e1193f8").unwrap();
        let padded = TraceId::parse("0000000000000000c91fd0eb7e1193f8").unwrap();
        assert_eq!(short, padded);
        assert_eq!(padded.to_string(), "c91fd0eb7e1193f8");
        assert_eq!(short.to_padded(), "0000000000000000c91fd0eb7e1193f8");
    }

    #[test]
    fn rejects_bad_ids() {
        assert!(TraceId::parse("").is_err());
        assert!(TraceId::parse("xyz").is_err());
        assert!(TraceId::parse("+abc").is_err());
        assert!(TraceId::parse(&"a".repeat(33)).is_err());
        assert!(SpanId::parse("zzzzzzzzzzzzzzzz").is_err());
        assert!(SpanId::parse("").is_err());
        assert!(matches!(
            SpanId::parse_as("nope", IdKind::ParentSpan),
            Err(TraceHouseError::InvalidIdentifier {
                kind: IdKind::ParentSpan,
                ..
            })
        ));
    }

    #[test]
    fn ids_serialize_as_hex_strings() {
        let trace = TraceId::new(1, 2);
        let json = serde_json::to_string(&trace).unwrap();
        assert_eq!(json, "\"00000000000000010000000000000002\"");
        let back: TraceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trace);
        assert!(serde_json::from_str::<SpanId>("\"not-hex\"").is_err());
    }

    #[test]
    fn normalizer_pads_short_ids_once() {
        let normalizer = TraceIdNormalizer::new(true);
        let padded = normalizer.normalize("c91fd0eb7e1193f8");
        assert_eq!(padded, "0000000000000000c91fd0eb7e1193f8");
        assert_eq!(normalizer.normalize(&padded), padded);
        assert_eq!(
            normalizer.normalize_all(&["c91fd0eb7e1193f8", "c91fd0eb7e1193f9"]),
            vec![
                "0000000000000000c91fd0eb7e1193f8".to_string(),
                "0000000000000000c91fd0eb7e1193f9".to_string()
            ]
        );
    }

    #[test]
    fn normalizer_leaves_other_widths_alone() {
        let normalizer = TraceIdNormalizer::new(true);
        assert_eq!(normalizer.normalize("abc"), "abc");
        let full = "843bc5b94cbaa733844dfe41f33167ad";
        assert_eq!(normalizer.normalize(full), full);

        let disabled = TraceIdNormalizer::new(false);
        assert_eq!(disabled.normalize("c91fd0eb7e1193f8"), "c91fd0eb7e1193f8");
    }
}
