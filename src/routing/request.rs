//! The slice of an HTTP request the routing pipeline reads.

use std::borrow::Cow;

/// Path and query of an incoming request.
///
/// `path` stays exactly as received (still percent-encoded); query
/// parameters are decoded once here so stages compare plain strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRequest {
    path: String,
    query: Option<String>,
    params: Vec<(String, String)>,
}

impl EdgeRequest {
    /// Parse a request target such as `/pricing?audience=enterprise`.
    ///
    /// Fragments are dropped, an empty path becomes `/`.
    pub fn parse(path_and_query: &str) -> Self {
        let without_fragment = match path_and_query.split_once('#') {
            Some((head, _)) => head,
            None => path_and_query,
        };
        let (path, query) = match without_fragment.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (without_fragment, None),
        };
        Self::from_parts(path, query)
    }

    pub fn from_uri(uri: &http::Uri) -> Self {
        Self::from_parts(uri.path(), uri.query())
    }

    fn from_parts(path: &str, query: Option<&str>) -> Self {
        let path = if path.is_empty() { "/" } else { path };
        let query = query.filter(|q| !q.is_empty());
        Self {
            path: path.to_string(),
            query: query.map(str::to_string),
            params: query.map(parse_query).unwrap_or_default(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// First value of a query parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.iter().any(|(key, _)| key == name)
    }

    /// Decoded query parameters in request order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The raw query string with every `name` parameter removed.
    ///
    /// Other pairs keep their original encoding and order.
    pub fn query_without(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        let kept: Vec<&str> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter(|pair| {
                let key = pair.split_once('=').map_or(*pair, |(key, _)| key);
                decode_component(key) != name
            })
            .collect();
        if kept.is_empty() {
            None
        } else {
            Some(kept.join("&"))
        }
    }

    /// Path and query joined back into a request target.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (decode_component(key), decode_component(value)),
            None => (decode_component(pair), String::new()),
        })
        .collect()
}

/// Form-decode one component: `+` is a space, malformed escapes stay raw.
fn decode_component(raw: &str) -> String {
    let spaced: Cow<'_, str> = if raw.contains('+') {
        Cow::Owned(raw.replace('+', " "))
    } else {
        Cow::Borrowed(raw)
    };
    let decoded = urlencoding::decode(&spaced).map(Cow::into_owned);
    decoded.unwrap_or_else(|_| spaced.into_owned())
}
