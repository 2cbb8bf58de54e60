//! Flat request parameters.

use std::str::FromStr;

use crate::error::{ConnectorError, ConnectorResult};

/// Ordered key/value pairs. Array parameters repeat their key, either
/// bare or in the `name[]` form.
#[derive(Debug, Clone, Default)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an `application/x-www-form-urlencoded` query string.
    pub fn from_query(query: &str) -> Self {
        Self {
            pairs: url::form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(key, value);
        self
    }

    /// First non-empty value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.as_str())
    }

    pub fn require(&self, key: &str) -> ConnectorResult<&str> {
        self.get(key).ok_or_else(|| ConnectorError::params(key))
    }

    /// Every value given as `key` or `key[]`.
    pub fn list(&self, key: &str) -> Vec<&str> {
        let array_key = format!("{key}[]");
        self.pairs
            .iter()
            .filter(|(k, _)| k == key || *k == array_key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// True for `1` or `true`.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("1" | "true"))
    }

    /// Parse an optional numeric parameter.
    pub fn number<T: FromStr>(&self, key: &str) -> ConnectorResult<Option<T>> {
        self.get(key)
            .map(|v| v.trim().parse::<T>().map_err(|_| ConnectorError::params(key)))
            .transpose()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_arrays_and_flags() {
        let params = Params::from_query("cmd=rm&targets%5B%5D=v0_a&targets%5B%5D=v0_b&init=1&tree=0");
        assert_eq!(params.get("cmd"), Some("rm"));
        assert_eq!(params.list("targets"), vec!["v0_a", "v0_b"]);
        assert!(params.flag("init"));
        assert!(!params.flag("tree"));
        assert!(!params.flag("missing"));
    }

    #[test]
    fn test_require_and_number() {
        let params: Params = [("width", "640"), ("height", "x"), ("name", "")].into_iter().collect();
        assert_eq!(params.number::<u32>("width").unwrap(), Some(640));
        assert!(params.number::<u32>("height").is_err());
        assert_eq!(params.number::<u32>("depth").unwrap(), None);
        assert!(params.require("name").is_err());
    }
}
