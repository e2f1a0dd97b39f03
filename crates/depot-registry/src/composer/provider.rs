use std::{collections::BTreeMap, rc::Rc, thread, time::Duration};

use depot_dl::FetchRequest;
use depot_events::MetadataStage;
use depot_utils::hash::verify_sha256;
use serde_json::Value;
use tracing::{debug, warn};

use super::ComposerRepository;
use crate::{
    cache::{include_key, provider_key},
    error::{RegistryError, Result},
    repository::{accept_candidates, AlreadyLoaded, LoadResult, NameRequest},
    root::{ProviderHash, RootDescriptor},
    stability::StabilityPolicy,
};

const HASH_ATTEMPTS: usize = 3;
const HASH_RETRY_DELAY: Duration = Duration::from_millis(100);

fn swap_scheme(url: &str) -> Option<String> {
    if let Some(rest) = url.strip_prefix("https://") {
        Some(format!("http://{rest}"))
    } else {
        url.strip_prefix("http://")
            .map(|rest| format!("https://{rest}"))
    }
}

impl ComposerRepository {
    /// The provider map, with every `provider-includes` file merged in.
    pub(super) fn provider_listing(
        &self,
        root: &RootDescriptor,
    ) -> Result<Rc<BTreeMap<String, ProviderHash>>> {
        if let Some(listing) = &self.state.borrow().providers {
            return Ok(Rc::clone(listing));
        }

        let mut listing: BTreeMap<String, ProviderHash> = root
            .providers
            .iter()
            .flatten()
            .map(|(name, hash)| (name.to_lowercase(), hash.clone()))
            .collect();

        for (include, hash) in root.provider_includes.iter().flatten() {
            let url = self.canonicalize_url(&include.replace("%hash%", &hash.sha256))?;
            let document = self.fetch_verified(&include_key(include), &url, &hash.sha256)?;
            let Some(providers) = document.get("providers") else {
                continue;
            };
            let providers: BTreeMap<String, ProviderHash> =
                serde_json::from_value(providers.clone())?;
            listing.extend(
                providers
                    .into_iter()
                    .map(|(name, hash)| (name.to_lowercase(), hash)),
            );
        }

        debug!(repository = %self.config.name, "provider listing has {} names", listing.len());
        let listing = Rc::new(listing);
        self.state.borrow_mut().providers = Some(Rc::clone(&listing));
        Ok(listing)
    }

    /// Loads names through hash-addressed provider files.
    pub(super) fn load_from_providers(
        &self,
        root: &RootDescriptor,
        names: &[NameRequest<'_>],
        policy: &StabilityPolicy,
        already_loaded: &AlreadyLoaded,
        result: &mut LoadResult,
    ) -> Result<()> {
        let Some(template) = root.providers_url.as_deref() else {
            return Ok(());
        };
        let listing = self.provider_listing(root)?;

        for (name, constraint) in names {
            let Some(hash) = listing.get(*name) else {
                continue;
            };
            let url = self.canonicalize_url(
                &template
                    .replace("%package%", name)
                    .replace("%hash%", &hash.sha256),
            )?;
            let document = self.fetch_verified(&provider_key(name), &url, &hash.sha256)?;

            let entries: Vec<Value> = match document
                .get("packages")
                .and_then(|p| p.get(*name))
            {
                Some(Value::Object(by_version)) => by_version.values().cloned().collect(),
                Some(Value::Array(list)) => list.clone(),
                _ => Vec::new(),
            };

            result.names_found.insert(name.to_string());
            let candidates = self.parse_entries(name, &entries)?;
            result.packages.extend(accept_candidates(
                candidates,
                *constraint,
                policy,
                already_loaded.get(*name),
            ));
        }
        Ok(())
    }

    /// Returns the document at `url` whose bytes hash to `sha256`.
    ///
    /// A cached copy with a matching hash is used without any request. A
    /// mismatching download is retried, then tried once over the other
    /// scheme when the repository allows it, before failing with
    /// [`RegistryError::Security`].
    pub(super) fn fetch_verified(&self, key: &str, url: &str, sha256: &str) -> Result<Value> {
        let cached = self.cache.read(key);
        if let Some(bytes) = &cached {
            if verify_sha256(bytes, sha256) {
                if let Ok(value) = serde_json::from_slice(bytes) {
                    self.stage(key, MetadataStage::CacheHit);
                    return Ok(value);
                }
            } else if self.is_degraded() {
                self.stage(key, MetadataStage::StaleCache);
                return Ok(serde_json::from_slice(bytes)?);
            }
        }

        let mut urls = vec![url.to_string(); HASH_ATTEMPTS];
        if self.config.scheme_fallback() {
            urls.extend(swap_scheme(url));
        }

        for (attempt, candidate) in urls.iter().enumerate() {
            if attempt > 0 {
                thread::sleep(HASH_RETRY_DELAY);
            }
            self.stage(key, MetadataStage::Fetching);
            let request = self.request(FetchRequest::get(candidate.as_str()));

            let response = match self.event_loop.http().get(request) {
                Ok(response) => response,
                Err(err) if err.is_retryable() => {
                    let Some(bytes) = &cached else {
                        return Err(err.into());
                    };
                    self.enter_degraded(&err.to_string());
                    self.stage(key, MetadataStage::StaleCache);
                    return Ok(serde_json::from_slice(bytes)?);
                }
                Err(err) => return Err(err.into()),
            };

            if !verify_sha256(&response.body, sha256) {
                debug!(
                    repository = %self.config.name,
                    attempt = attempt + 1,
                    "hash mismatch for {}", candidate
                );
                continue;
            }

            if let Err(err) = self.cache.write(key, &response.body) {
                warn!(repository = %self.config.name, "failed to cache {}: {}", key, err);
            }
            self.stage(key, MetadataStage::Stored);
            return Ok(serde_json::from_slice(&response.body)?);
        }

        Err(RegistryError::Security {
            url: url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use depot_config::repository::RepositoryConfig;
    use depot_events::null_sink;
    use depot_utils::hash::sha256_hex;
    use serde_json::json;
    use tempfile::tempdir;

    use super::{super::test_support::*, *};
    use crate::repository::Repository;

    const ROOT: &str = "https://x/packages.json";

    fn repo_with(transport: &Arc<FakeTransport>, dir: &std::path::Path, fallback: bool) -> ComposerRepository {
        let mut config = RepositoryConfig::new("x", "https://x");
        config.scheme_fallback = Some(fallback);
        ComposerRepository::new(config, event_loop(Arc::clone(transport)), dir, null_sink()).unwrap()
    }

    /// Routes a provider repository hosting acme/foo; returns the file hash.
    fn provider_repo(transport: &FakeTransport) -> String {
        let file = json!({
            "packages": {"acme/foo": {
                "1.0.0": {"name": "acme/foo", "version": "1.0.0"},
                "dev-main": {"name": "acme/foo", "version": "dev-main"},
            }}
        })
        .to_string();
        let hash = sha256_hex(file.as_bytes());
        transport.route(
            ROOT,
            200,
            json!({
                "providers-url": "/p/%package%$%hash%.json",
                "providers": {"acme/foo": {"sha256": hash}},
            })
            .to_string(),
        );
        transport.route(&format!("https://x/p/acme/foo${hash}.json"), 200, file);
        hash
    }

    #[test]
    fn test_provider_files_load() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        provider_repo(&transport);

        let repo = repo_with(&transport, dir.path(), false);
        let found = repo.find_packages("acme/foo", None).unwrap();
        assert_eq!(found.len(), 2);
        assert!(repo.find_packages("acme/other", None).unwrap().is_empty());
        assert_eq!(repo.get_packages().unwrap().len(), 2);
    }

    #[test]
    fn test_hash_matching_cache_makes_no_calls() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        let hash = provider_repo(&transport);

        repo_with(&transport, dir.path(), false)
            .find_packages("acme/foo", None)
            .unwrap();

        let repo = repo_with(&transport, dir.path(), false);
        repo.root().unwrap();
        let calls = transport.calls();
        let found = repo.find_packages("acme/foo", None).unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(transport.calls(), calls);
        assert!(!transport
            .urls()
            .iter()
            .skip(calls)
            .any(|u| u.contains(&hash)));
    }

    #[test]
    fn test_hash_mismatch_retries_then_fails() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        let expected = "0".repeat(64);
        transport.route(
            ROOT,
            200,
            json!({
                "providers-url": "/p/%package%$%hash%.json",
                "providers": {"acme/foo": {"sha256": expected}},
            })
            .to_string(),
        );
        let url = format!("https://x/p/acme/foo${expected}.json");
        transport.route(&url, 200, "{\"tampered\":true}");

        let err = repo_with(&transport, dir.path(), false)
            .find_packages("acme/foo", None)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Security { .. }));
        assert_eq!(transport.urls().iter().filter(|u| **u == url).count(), 3);
    }

    #[test]
    fn test_scheme_fallback() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        let file = json!({"packages": {"acme/foo": [{"name": "acme/foo", "version": "1.0.0"}]}}).to_string();
        let hash = sha256_hex(file.as_bytes());
        transport.route(
            ROOT,
            200,
            json!({
                "providers-url": "/p/%package%$%hash%.json",
                "providers": {"acme/foo": {"sha256": hash}},
            })
            .to_string(),
        );
        let https = format!("https://x/p/acme/foo${hash}.json");
        let http = format!("http://x/p/acme/foo${hash}.json");
        transport.route(&https, 200, "{}");
        transport.route(&http, 200, file);

        let found = repo_with(&transport, dir.path(), true)
            .find_packages("acme/foo", None)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(transport.urls().iter().filter(|u| **u == https).count(), 3);
        assert_eq!(transport.urls().iter().filter(|u| **u == http).count(), 1);

        let err = repo_with(&transport, tempdir().unwrap().path(), false)
            .find_packages("acme/foo", None)
            .unwrap_err();
        assert!(matches!(err, RegistryError::Security { .. }));
    }

    #[test]
    fn test_provider_includes() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        let file = json!({"packages": {"acme/bar": [{"name": "acme/bar", "version": "2.0.0"}]}}).to_string();
        let file_hash = sha256_hex(file.as_bytes());
        let include = json!({"providers": {"acme/bar": {"sha256": file_hash}}}).to_string();
        let include_hash = sha256_hex(include.as_bytes());

        transport.route(
            ROOT,
            200,
            json!({
                "providers-url": "/p/%package%$%hash%.json",
                "provider-includes": {"p/provider-all$%hash%.json": {"sha256": include_hash}},
            })
            .to_string(),
        );
        transport.route(&format!("https://x/p/provider-all${include_hash}.json"), 200, include);
        transport.route(&format!("https://x/p/acme/bar${file_hash}.json"), 200, file);

        let repo = repo_with(&transport, dir.path(), false);
        let found = repo.find_packages("acme/bar", None).unwrap();
        assert_eq!(found.len(), 1);
        assert!(repo.cache().read("p-p-provider-all.json").is_some());
    }

    #[test]
    fn test_transport_error_uses_stale_provider_file() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        provider_repo(&transport);
        repo_with(&transport, dir.path(), false)
            .find_packages("acme/foo", None)
            .unwrap();

        // corrupt the hash so the cached copy no longer verifies
        let repo = repo_with(&transport, dir.path(), false);
        repo.cache().write(&provider_key("acme/foo"), b"{\"packages\":{}}").unwrap();
        transport.go_offline();

        let found = repo.find_packages("acme/foo", None).unwrap();
        assert!(found.is_empty());
        assert!(repo.is_degraded());
    }
}
