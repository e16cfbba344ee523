//! Choosing where a key is fetched from and which rows it is cached under.

use common::{KeyError, KeyType};
use hyper::Uri;

/// Resolved fetch location for one lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTarget {
    /// URI the key endpoint is fetched from.
    pub uri: String,
    /// Coordinator scope rows are stored and queried under.
    pub coordinator_url: Option<String>,
    /// Whether the caller's coordinator matched the allow-list.
    pub from_allowlist: bool,
}

impl FetchTarget {
    pub fn scope(&self) -> Option<&str> {
        self.coordinator_url.as_deref()
    }
}

/// Maps a key type and optional caller-supplied coordinator to a target.
pub trait CoordinatorResolver: Send + Sync + std::fmt::Debug {
    /// # Errors
    ///
    /// Returns [`KeyError::NoFetchUriConfigured`] when nothing serves `key_type`.
    fn resolve(&self, key_type: KeyType, coordinator_url: Option<&str>)
        -> Result<FetchTarget, KeyError>;
}

/// Per-type default fetch URIs.
#[derive(Debug, Clone)]
pub struct DefaultUris {
    pub auction: String,
    pub join: String,
}

impl DefaultUris {
    fn get(&self, key_type: KeyType) -> Result<&str, KeyError> {
        let uri = match key_type {
            KeyType::Auction => self.auction.trim(),
            KeyType::Join => self.join.trim(),
        };
        if uri.is_empty() {
            return Err(KeyError::NoFetchUriConfigured(key_type));
        }
        Ok(uri)
    }
}

/// Always fetches the per-type default; rows carry no coordinator.
#[derive(Debug, Clone)]
pub struct SingleCoordinator {
    defaults: DefaultUris,
}

impl SingleCoordinator {
    pub fn new(defaults: DefaultUris) -> Self {
        Self { defaults }
    }
}

impl CoordinatorResolver for SingleCoordinator {
    fn resolve(
        &self,
        key_type: KeyType,
        _coordinator_url: Option<&str>,
    ) -> Result<FetchTarget, KeyError> {
        Ok(FetchTarget {
            uri: self.defaults.get(key_type)?.to_owned(),
            coordinator_url: None,
            from_allowlist: false,
        })
    }
}

/// Fetches from the allow-list entry whose host matches the caller's
/// coordinator, else from the default. Rows are stored under the URI they
/// were fetched from.
#[derive(Debug, Clone)]
pub struct MultiCoordinator {
    defaults: DefaultUris,
    allowlist: Vec<String>,
}

impl MultiCoordinator {
    pub fn new(defaults: DefaultUris, allowlist: Vec<String>) -> Self {
        Self {
            defaults,
            allowlist,
        }
    }

    /// An exact entry wins over a host match.
    fn allowed(&self, coordinator_url: &str) -> Option<&str> {
        let requested = coordinator_url.trim();
        if let Some(entry) = self.allowlist.iter().find(|entry| entry.trim() == requested) {
            return Some(entry.as_str());
        }
        let wanted = host_of(requested)?;
        self.allowlist
            .iter()
            .find(|entry| host_of(entry).is_some_and(|h| h.eq_ignore_ascii_case(&wanted)))
            .map(String::as_str)
    }
}

impl CoordinatorResolver for MultiCoordinator {
    fn resolve(
        &self,
        key_type: KeyType,
        coordinator_url: Option<&str>,
    ) -> Result<FetchTarget, KeyError> {
        if let Some(entry) = coordinator_url.and_then(|c| self.allowed(c)) {
            return Ok(FetchTarget {
                uri: entry.to_owned(),
                coordinator_url: Some(entry.to_owned()),
                from_allowlist: true,
            });
        }
        let uri = self.defaults.get(key_type)?;
        Ok(FetchTarget {
            uri: uri.to_owned(),
            coordinator_url: Some(uri.to_owned()),
            from_allowlist: false,
        })
    }
}

/// Host of a URL, or of a bare host name.
fn host_of(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    match url.parse::<Uri>() {
        Ok(uri) => uri.host().map(str::to_owned),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> DefaultUris {
        DefaultUris {
            auction: "https://auction.default.test/keys".into(),
            join: "https://join.default.test/keys".into(),
        }
    }

    #[test]
    fn single_coordinator_ignores_caller() {
        let r = SingleCoordinator::new(defaults());
        let t = r.resolve(KeyType::Auction, Some("https://other.test")).unwrap();
        assert_eq!(t.uri, "https://auction.default.test/keys");
        assert!(t.coordinator_url.is_none());
        assert!(!t.from_allowlist);
    }

    #[test]
    fn missing_default_is_reported() {
        let mut d = defaults();
        d.join = String::new();
        let r = SingleCoordinator::new(d);
        assert_eq!(
            r.resolve(KeyType::Join, None).unwrap_err(),
            KeyError::NoFetchUriConfigured(KeyType::Join)
        );
    }

    #[test]
    fn multi_coordinator_matches_host_and_targets_entry() {
        let r = MultiCoordinator::new(
            defaults(),
            vec!["https://coord-a.test/v1/public-keys".into()],
        );
        let t = r
            .resolve(KeyType::Auction, Some("https://COORD-A.test/anything"))
            .unwrap();
        assert_eq!(t.uri, "https://coord-a.test/v1/public-keys");
        assert_eq!(t.scope(), Some("https://coord-a.test/v1/public-keys"));
        assert!(t.from_allowlist);
    }

    #[test]
    fn multi_coordinator_falls_back_to_default() {
        let r = MultiCoordinator::new(defaults(), vec!["https://coord-a.test/keys".into()]);
        for requested in [None, Some("https://evil.test/keys"), Some("not a url")] {
            let t = r.resolve(KeyType::Auction, requested).unwrap();
            assert_eq!(t.uri, "https://auction.default.test/keys");
            assert_eq!(t.scope(), Some("https://auction.default.test/keys"));
            assert!(!t.from_allowlist);
        }
    }

    #[test]
    fn bare_host_matches() {
        let r = MultiCoordinator::new(defaults(), vec!["https://coord-a.test/keys".into()]);
        let t = r.resolve(KeyType::Join, Some("coord-a.test")).unwrap();
        assert_eq!(t.uri, "https://coord-a.test/keys");
    }

    #[test]
    fn exact_entry_preferred_over_shared_host() {
        let r = MultiCoordinator::new(
            defaults(),
            vec!["https://h.test/a".into(), "https://h.test/b".into()],
        );
        for entry in ["https://h.test/a", "https://h.test/b"] {
            let t = r.resolve(KeyType::Auction, Some(entry)).unwrap();
            assert_eq!(t.uri, entry);
            assert!(t.from_allowlist);
        }
        let t = r.resolve(KeyType::Auction, Some("https://h.test/c")).unwrap();
        assert_eq!(t.uri, "https://h.test/a");
    }
}
