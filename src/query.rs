//! Query string handling shared by the URL signer, the signature verifier and
//! the upload namer.
//!
//! The canonical encoding is `application/x-www-form-urlencoded` (spaces become
//! `+`), with pairs stable-sorted by key. Repeated keys keep the order in which
//! they appeared in the request. Signers must produce the digest over exactly
//! this encoding.

use url::form_urlencoded;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPairs {
    pairs: Vec<(String, String)>,
}

impl QueryPairs {
    /// Parse a raw (still percent-encoded) query string.
    pub fn parse(raw: Option<&str>) -> Self {
        let pairs = raw
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        Self { pairs }
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            pairs: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    /// First value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty value for `key`.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// A copy with every pair whose key is in `keys` removed.
    pub fn without(&self, keys: &[&str]) -> Self {
        Self {
            pairs: self
                .pairs
                .iter()
                .filter(|(k, _)| !keys.contains(&k.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Pairs in request order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Canonical encoding: form-urlencoded, pairs sorted by key.
    pub fn canonical(&self) -> String {
        let mut sorted: Vec<(&str, &str)> = self.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0));

        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (k, v) in sorted {
            serializer.append_pair(k, v);
        }
        serializer.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_sorts_by_key() {
        let q = QueryPairs::parse(Some("width=300&height=200&type=jpeg"));
        assert_eq!(q.canonical(), "height=200&type=jpeg&width=300");
    }

    #[test]
    fn test_canonical_keeps_repeated_key_order() {
        let q = QueryPairs::parse(Some("b=1&a=z&a=y"));
        assert_eq!(q.canonical(), "a=z&a=y&b=1");
    }

    #[test]
    fn test_canonical_reencodes_values() {
        let q = QueryPairs::parse(Some("text=hello%20world&font=sans+12"));
        assert_eq!(q.canonical(), "font=sans+12&text=hello+world");
    }

    #[test]
    fn test_without_removes_all_occurrences() {
        let q = QueryPairs::parse(Some("sign=a&width=1&sign=b"));
        let stripped = q.without(&["sign"]);
        assert_eq!(stripped.canonical(), "width=1");
        assert_eq!(q.get("sign"), Some("a"));
    }

    #[test]
    fn test_iter_keeps_request_order() {
        let q = QueryPairs::parse(Some("width=1&height=2&width=3"));
        let pairs: Vec<_> = q.iter().collect();
        assert_eq!(pairs, vec![("width", "1"), ("height", "2"), ("width", "3")]);
    }

    #[test]
    fn test_missing_query_is_empty() {
        let q = QueryPairs::parse(None);
        assert!(q.is_empty());
        assert_eq!(q.canonical(), "");
    }
}
