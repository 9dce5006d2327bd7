//! Query-parameter smuggling through an internal path rewrite.
//!
//! An internal rewrite hands the origin a different path while the browser
//! keeps its URL. Query parameters the page needs (audience, region, search
//! term) are carried across by encoding them into a reserved final path
//! segment:
//!
//! ```text
//! /pricing?audience=enterprise   ->   /en-us/pricing/~~~audience%3Denterprise~~~
//! ```
//!
//! The whole format lives behind [`QueryCodec::encode`] and
//! [`QueryCodec::decode`]; nothing else in the crate knows the marker.

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};

use crate::constants::SMUGGLE_MARKER;

/// Decoded smuggled parameters, ordered by name.
pub type SmuggledParams = BTreeMap<String, String>;

/// Whitelist- and length-bounded codec for the smuggled path segment.
#[derive(Debug, Clone)]
pub struct QueryCodec {
    whitelist: HashSet<String>,
    max_length: usize,
}

impl QueryCodec {
    pub fn new<I, S>(whitelist: I, max_length: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whitelist: whitelist.into_iter().map(Into::into).collect(),
            max_length,
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn is_whitelisted(&self, name: &str) -> bool {
        self.whitelist.contains(name)
    }

    /// Encode the whitelisted subset of `params` into a marker-wrapped segment.
    ///
    /// Returns `None` when no whitelisted parameter is present or when the
    /// encoded body is longer than `max_length`. Oversized sets are dropped
    /// whole, never truncated.
    pub fn encode<'a, I>(&self, params: I) -> Option<String>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let filtered: SmuggledParams = params
            .into_iter()
            .filter(|(name, _)| self.whitelist.contains(*name))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();

        if filtered.is_empty() {
            return None;
        }

        let query = filtered
            .iter()
            .map(|(name, value)| format!("{}={}", escape(name), escape(value)))
            .collect::<Vec<_>>()
            .join("&");
        let body = escape(&query);

        if body.len() > self.max_length {
            tracing::debug!(
                encoded_length = body.len(),
                max_length = self.max_length,
                "Dropping smuggled query parameters over length bound"
            );
            return None;
        }

        Some(format!("{SMUGGLE_MARKER}{body}{SMUGGLE_MARKER}"))
    }

    /// Append an encoded segment as the last path segment.
    pub fn append_to_path(path: &str, encoded: Option<&str>) -> String {
        match encoded {
            None => path.to_string(),
            Some(segment) if path.ends_with('/') => format!("{}{}", path, segment),
            Some(segment) => format!("{}/{}", path, segment),
        }
    }

    /// Decode a path segment produced by [`QueryCodec::encode`].
    ///
    /// Returns `None` unless the segment starts and ends with the marker.
    /// Pairs that do not split into exactly one name and one value are
    /// skipped.
    pub fn decode(segment: &str) -> Option<SmuggledParams> {
        if segment.len() < 2 * SMUGGLE_MARKER.len()
            || !segment.starts_with(SMUGGLE_MARKER)
            || !segment.ends_with(SMUGGLE_MARKER)
        {
            return None;
        }

        let body = &segment[SMUGGLE_MARKER.len()..segment.len() - SMUGGLE_MARKER.len()];
        let query = urlencoding::decode(body).ok()?;

        let mut params = SmuggledParams::new();
        for pair in query.split('&') {
            let parts: Vec<&str> = pair.split('=').collect();
            if parts.len() != 2 {
                continue;
            }
            let (Ok(name), Ok(value)) = (urlencoding::decode(parts[0]), urlencoding::decode(parts[1]))
            else {
                continue;
            };
            params.insert(name.into_owned(), value.into_owned());
        }
        Some(params)
    }

    /// Split a smuggled segment off the end of `path`.
    ///
    /// Used by page-data loaders on the consuming side of a rewrite. Paths
    /// without a well-formed trailing segment come back unchanged.
    pub fn split_smuggled(path: &str) -> (String, Option<SmuggledParams>) {
        let trimmed = path.trim_end_matches('/');
        let (head, last) = match trimmed.rsplit_once('/') {
            Some(split) => split,
            None => return (path.to_string(), None),
        };

        match Self::decode(last) {
            Some(params) => {
                let clean = if head.is_empty() { "/" } else { head };
                (clean.to_string(), Some(params))
            }
            None => (path.to_string(), None),
        }
    }
}

/// Percent-encode everything outside the unreserved set, including `~`, so the
/// marker can never appear inside an encoded body.
fn escape(input: &str) -> String {
    match urlencoding::encode(input) {
        Cow::Borrowed(s) if !s.contains('~') => s.to_string(),
        encoded => encoded.replace('~', "%7E"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> QueryCodec {
        QueryCodec::new(["audience", "region", "q"], 512)
    }

    #[test]
    fn test_encode_keeps_only_whitelisted_params() {
        let encoded = codec()
            .encode([("audience", "enterprise"), ("utm_source", "x")])
            .unwrap();
        let decoded = QueryCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded["audience"], "enterprise");
    }

    #[test]
    fn test_encode_returns_none_without_whitelisted_params() {
        assert_eq!(codec().encode([("utm_source", "x")]), None);
        assert_eq!(codec().encode(std::iter::empty()), None);
    }

    #[test]
    fn test_round_trip_preserves_awkward_values() {
        let values = [
            ("q", "a&b=c"),
            ("region", "~~~"),
            ("audience", "größe / 50% + more"),
        ];
        let encoded = codec().encode(values).unwrap();
        let decoded = QueryCodec::decode(&encoded).unwrap();

        assert_eq!(decoded["q"], "a&b=c");
        assert_eq!(decoded["region"], "~~~");
        assert_eq!(decoded["audience"], "größe / 50% + more");
    }

    #[test]
    fn test_round_trip_is_order_independent() {
        let a = codec().encode([("q", "1"), ("region", "emea")]).unwrap();
        let b = codec().encode([("region", "emea"), ("q", "1")]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_encoded_body_never_contains_marker() {
        let encoded = codec().encode([("q", "~~~~~~~~~")]).unwrap();
        let body = &encoded[3..encoded.len() - 3];
        assert!(!body.contains('~'));
    }

    #[test]
    fn test_oversize_params_are_dropped_not_truncated() {
        let small = QueryCodec::new(["q"], 16);
        assert!(small.encode([("q", "short")]).is_some());
        assert_eq!(small.encode([("q", "this value is far too long")]), None);
        assert_eq!(
            QueryCodec::append_to_path("/search", small.encode([("q", "x".repeat(64).as_str())]).as_deref()),
            "/search"
        );
    }

    #[test]
    fn test_append_to_path() {
        assert_eq!(QueryCodec::append_to_path("/pricing", Some("~~~a~~~")), "/pricing/~~~a~~~");
        assert_eq!(QueryCodec::append_to_path("/pricing/", Some("~~~a~~~")), "/pricing/~~~a~~~");
        assert_eq!(QueryCodec::append_to_path("/", Some("~~~a~~~")), "/~~~a~~~");
        assert_eq!(QueryCodec::append_to_path("/pricing", None), "/pricing");
    }

    #[test]
    fn test_decode_rejects_unmarked_segments() {
        assert_eq!(QueryCodec::decode("pricing"), None);
        assert_eq!(QueryCodec::decode("~~~a%3Db"), None);
        assert_eq!(QueryCodec::decode("a%3Db~~~"), None);
        assert_eq!(QueryCodec::decode("~~~~"), None);
    }

    #[test]
    fn test_decode_skips_malformed_pairs() {
        // "a=1&b&c=2=3&d=4"
        let segment = "~~~a%3D1%26b%26c%3D2%3D3%26d%3D4~~~";
        let decoded = QueryCodec::decode(segment).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded["a"], "1");
        assert_eq!(decoded["d"], "4");
    }

    #[test]
    fn test_decode_empty_body_is_empty_map() {
        assert_eq!(QueryCodec::decode("~~~~~~"), Some(SmuggledParams::new()));
    }

    #[test]
    fn test_split_smuggled() {
        let encoded = codec().encode([("audience", "smb")]).unwrap();
        let path = QueryCodec::append_to_path("/en-us/pricing", Some(&encoded));

        let (clean, params) = QueryCodec::split_smuggled(&path);
        assert_eq!(clean, "/en-us/pricing");
        assert_eq!(params.unwrap()["audience"], "smb");

        let (clean, params) = QueryCodec::split_smuggled("/en-us/pricing");
        assert_eq!(clean, "/en-us/pricing");
        assert!(params.is_none());

        let root = QueryCodec::append_to_path("/", Some(&encoded));
        assert_eq!(QueryCodec::split_smuggled(&root).0, "/");
    }
}
