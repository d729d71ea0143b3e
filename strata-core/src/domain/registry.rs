//! The ordered, immutable set of configured backends.

use std::collections::HashSet;
use std::sync::Arc;

use url::Url;

use crate::domain::backend::{Backend, BackendDescriptor, BackendId, SharedBackend};
use crate::error::RegistryError;

/// Ordered collection of backends, built once at startup.
///
/// Registry order matters: the mutation broadcaster walks backends in this
/// order and takes its representative response from index 0. Nothing mutates
/// the registry after construction, so it is shared freely without locks.
#[derive(Debug, Default)]
pub struct BackendRegistry {
    backends: Vec<SharedBackend>,
}

impl BackendRegistry {
    /// Validate descriptors and assign ids in the order given.
    pub fn new<I>(descriptors: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = BackendDescriptor>,
    {
        let mut seen = HashSet::new();
        let mut backends = Vec::new();

        for descriptor in descriptors {
            let url = normalize(&descriptor.url)?;
            if !seen.insert(url.clone()) {
                return Err(RegistryError::Duplicate(url));
            }
            let id = BackendId(backends.len() as u32);
            let token = descriptor.token.filter(|t| !t.is_empty());
            backends.push(Arc::new(Backend::new(id, url, token)));
        }

        Ok(Self { backends })
    }

    /// Number of configured backends.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// True when no backend is configured.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Backend at a registry index.
    pub fn get(&self, index: usize) -> Option<&SharedBackend> {
        self.backends.get(index)
    }

    /// Iterate backends in registry order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &SharedBackend> {
        self.backends.iter()
    }
}

/// A shared reference to the registry.
pub type SharedRegistry = Arc<BackendRegistry>;

fn normalize(raw: &str) -> Result<String, RegistryError> {
    let trimmed = raw.trim();
    let parsed = Url::parse(trimmed).map_err(|source| RegistryError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;

    if parsed.scheme() != "http" {
        return Err(RegistryError::UnsupportedScheme {
            url: raw.to_string(),
            scheme: parsed.scheme().to_string(),
        });
    }
    if parsed.host_str().is_none() {
        return Err(RegistryError::InvalidUrl {
            url: raw.to_string(),
            source: url::ParseError::EmptyHost,
        });
    }

    Ok(trimmed.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_configuration_order() {
        let registry = BackendRegistry::new(vec![
            BackendDescriptor::new("http://a:8086"),
            BackendDescriptor::new("http://b:8086/").with_token("secret"),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        let urls: Vec<_> = registry.iter().map(|b| b.url().to_string()).collect();
        assert_eq!(urls, ["http://a:8086", "http://b:8086"]);
        assert_eq!(registry.get(1).unwrap().id, BackendId(1));
        assert_eq!(registry.get(1).unwrap().token(), Some("secret"));
    }

    #[test]
    fn duplicates_are_rejected_after_normalization() {
        let err = BackendRegistry::new(vec![
            BackendDescriptor::new("http://a:8086"),
            BackendDescriptor::new("http://a:8086/"),
        ])
        .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(url) if url == "http://a:8086"));
    }

    #[test]
    fn rejects_bad_urls() {
        assert!(matches!(
            BackendRegistry::new(vec![BackendDescriptor::new("not a url")]),
            Err(RegistryError::InvalidUrl { .. })
        ));
        assert!(matches!(
            BackendRegistry::new(vec![BackendDescriptor::new("https://a:8086")]),
            Err(RegistryError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn empty_token_means_no_credential() {
        let registry =
            BackendRegistry::new(vec![BackendDescriptor::new("http://a:8086").with_token("")])
                .unwrap();
        assert_eq!(registry.get(0).unwrap().token(), None);
    }

    #[test]
    fn empty_registry_is_allowed() {
        let registry = BackendRegistry::new(Vec::new()).unwrap();
        assert!(registry.is_empty());
        assert!(registry.get(0).is_none());
    }
}
