//! Ordered query-string multimap and the sensitive-parameter mask.

use url::form_urlencoded;

/// Parameters whose values never reach the logs in plaintext.
pub const SENSITIVE_PARAMS: [&str; 3] = ["u", "token", "p"];

/// Replacement value for masked parameters.
pub const MASKED_VALUE: &str = "hidden";

/// Decoded query parameters in their original order. Keys may repeat.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    /// Decode an `application/x-www-form-urlencoded` string (with or without
    /// the leading `?`).
    pub fn parse(raw: &str) -> Self {
        let raw = raw.strip_prefix('?').unwrap_or(raw);
        let pairs = form_urlencoded::parse(raw.as_bytes())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        Self { pairs }
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// True when there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Iterate pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Re-encode, preserving order and repeats.
    pub fn encode(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.iter())
            .finish()
    }

    /// Encode with every [`SENSITIVE_PARAMS`] value replaced by [`MASKED_VALUE`].
    ///
    /// This is the hook used by access logging; outbound requests always
    /// carry the real values.
    pub fn masked(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in self.iter() {
            if SENSITIVE_PARAMS.contains(&key) {
                serializer.append_pair(key, MASKED_VALUE);
            } else {
                serializer.append_pair(key, value);
            }
        }
        serializer.finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for QueryParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            pairs: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Mask a path and optional raw query string for logging.
pub fn mask_path_and_query(path: &str, query: Option<&str>) -> String {
    match query {
        Some(raw) if !raw.is_empty() => {
            format!("{}?{}", path, QueryParams::parse(raw).masked())
        }
        _ => path.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn keeps_order_and_repeats() {
        let params = QueryParams::parse("db=a&tag=x&tag=y&q=SELECT+1");
        let pairs: Vec<_> = params.iter().collect();
        assert_eq!(
            pairs,
            [("db", "a"), ("tag", "x"), ("tag", "y"), ("q", "SELECT 1")]
        );
        assert_eq!(params.get("tag"), Some("x"));
        assert_eq!(params.encode(), "db=a&tag=x&tag=y&q=SELECT+1");
    }

    #[test]
    fn masks_credentials() {
        let params = QueryParams::parse("?db=mydb&u=admin&p=s3cret&token=abc&precision=ns");
        assert_eq!(
            params.masked(),
            "db=mydb&u=hidden&p=hidden&token=hidden&precision=ns"
        );
        // The unmasked encoding still carries the real values.
        assert!(params.encode().contains("p=s3cret"));
    }

    #[test]
    fn masks_uri_for_logs() {
        assert_eq!(mask_path_and_query("/ping", None), "/ping");
        assert_eq!(mask_path_and_query("/ping", Some("")), "/ping");
        assert_eq!(
            mask_path_and_query("/query", Some("q=SHOW+DATABASES&u=root&p=root")),
            "/query?q=SHOW+DATABASES&u=hidden&p=hidden"
        );
    }

    #[test]
    fn collects_from_pairs() {
        let params: QueryParams = [("db", "telemetry"), ("p", "pw"), ("q", "SHOW MEASUREMENTS")]
            .into_iter()
            .collect();
        assert_eq!(params, QueryParams::parse("db=telemetry&p=pw&q=SHOW+MEASUREMENTS"));
        assert_eq!(params.masked(), "db=telemetry&p=hidden&q=SHOW+MEASUREMENTS");
    }

    #[test]
    fn empty_query() {
        let params = QueryParams::parse("");
        assert!(params.is_empty());
        assert_eq!(params.encode(), "");
    }

    proptest! {
        #[test]
        fn masked_output_never_contains_secrets(secret in "[a-zA-Z0-9]{8,16}") {
            let raw = format!("u=user&p={secret}&token={secret}&db=x");
            let masked = QueryParams::parse(&raw).masked();
            prop_assert!(!masked.contains(&secret));
            prop_assert!(masked.contains("db=x"));
        }
    }
}
