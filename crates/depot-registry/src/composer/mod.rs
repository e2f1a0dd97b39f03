//! Composer-style remote repositories.
//!
//! A repository is described by its root `packages.json`. Package metadata
//! is then served either per name through a `metadata-url` template (the
//! lazy protocol), or through hash-addressed provider listing files.

mod advisories;
mod fetch;
mod listing;
mod provider;

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    path::Path,
    rc::Rc,
    sync::Arc,
};

use depot_config::repository::RepositoryConfig;
use depot_dl::{FetchRequest, Loop};
use depot_events::{DepotEvent, EventSinkHandle};
use depot_utils::pattern::NamePatterns;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

pub use listing::SearchResult;

use self::fetch::Fetched;
use crate::{
    advisory::AdvisoryProvider,
    cache::{lazy_key, RepoCache},
    constraint::Constraint,
    error::{RegistryError, Result},
    minify,
    package::Package,
    repository::{
        accept_candidates, AlreadyLoaded, LoadResult, NameRequest, ProviderInfo, Repository,
    },
    root::{ProviderHash, RootDescriptor},
    stability::StabilityPolicy,
};

/// Cache key of the root descriptor.
const ROOT_KEY: &str = "packages.json";

/// Names a repository declares it hosts.
#[derive(Debug)]
struct AvailableFilter {
    names: BTreeSet<String>,
    patterns: Option<NamePatterns>,
}

impl AvailableFilter {
    fn from_root(root: &RootDescriptor) -> Result<Option<Self>> {
        if !root.has_available_list() {
            return Ok(None);
        }
        let names = root
            .available_packages
            .iter()
            .flatten()
            .map(|name| name.to_lowercase())
            .collect();
        let patterns = match &root.available_package_patterns {
            Some(patterns) if !patterns.is_empty() => Some(NamePatterns::new(patterns)?),
            _ => None,
        };
        Ok(Some(Self {
            names,
            patterns,
        }))
    }

    fn contains(&self, name: &str) -> bool {
        self.names.contains(name) || self.patterns.as_ref().is_some_and(|p| p.is_match(name))
    }
}

/// Root descriptor plus what is derived from it once.
#[derive(Debug)]
struct LoadedRoot {
    descriptor: RootDescriptor,
    inline: BTreeMap<String, Vec<Value>>,
    available: Option<AvailableFilter>,
}

#[derive(Debug, Default)]
struct RepoState {
    root: Option<Rc<LoadedRoot>>,
    providers: Option<Rc<BTreeMap<String, ProviderHash>>>,
    /// Cache keys confirmed absent by a 404.
    absent: BTreeSet<String>,
    /// Cache keys fetched or revalidated during this run.
    fresh: BTreeSet<String>,
    degraded: bool,
}

pub struct ComposerRepository {
    config: RepositoryConfig,
    base_url: String,
    root_url: String,
    event_loop: Rc<Loop>,
    cache: RepoCache,
    events: EventSinkHandle,
    state: RefCell<RepoState>,
}

impl ComposerRepository {
    /// Creates a repository for `config`, caching below `cache_root`.
    ///
    /// Nothing is fetched until metadata is first needed.
    pub fn new(
        config: RepositoryConfig,
        event_loop: Rc<Loop>,
        cache_root: &Path,
        events: EventSinkHandle,
    ) -> Result<Self> {
        let url = config.url.trim().trim_end_matches('/').to_string();
        let parsed = Url::parse(&url).map_err(|err| RegistryError::InvalidUrl(format!("{url}: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https" | "file") {
            return Err(RegistryError::InvalidUrl(format!(
                "{url}: unsupported scheme '{}'",
                parsed.scheme()
            )));
        }

        let (base_url, root_url) = if url.ends_with(".json") {
            let base = url
                .rsplit_once('/')
                .map(|(base, _)| base.to_string())
                .unwrap_or_else(|| url.clone());
            (base, url.clone())
        } else {
            (url.clone(), format!("{url}/{ROOT_KEY}"))
        };

        Ok(Self {
            cache: RepoCache::new(cache_root, &url),
            config,
            base_url,
            root_url,
            event_loop,
            events,
            state: RefCell::new(RepoState::default()),
        })
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    pub fn cache(&self) -> &RepoCache {
        &self.cache
    }

    /// Whether a transport failure made this repository fall back to
    /// cached metadata.
    pub fn is_degraded(&self) -> bool {
        self.state.borrow().degraded
    }

    pub fn root(&self) -> Result<RootDescriptor> {
        Ok(self.load_root()?.descriptor.clone())
    }

    /// Resolves a URL from the root descriptor against the repository.
    fn canonicalize_url(&self, url: &str) -> Result<String> {
        if url.contains("://") {
            return Ok(url.to_string());
        }
        if url.starts_with('/') {
            let base = Url::parse(&self.base_url)
                .map_err(|err| RegistryError::InvalidUrl(format!("{}: {err}", self.base_url)))?;
            return base
                .join(url)
                .map(String::from)
                .map_err(|err| RegistryError::InvalidUrl(format!("{url}: {err}")));
        }
        Ok(format!("{}/{}", self.base_url, url))
    }

    /// Applies the repository's headers and transport options.
    fn request(&self, mut request: FetchRequest) -> FetchRequest {
        for (name, value) in self.config.headers.iter().flatten() {
            if request.header_value(name).is_none() {
                request.set_header(name, value.clone());
            }
        }
        request.options.retry_auth_failure = true;
        request.options.allow_self_signed = self.config.allow_self_signed();
        request
    }

    fn load_root(&self) -> Result<Rc<LoadedRoot>> {
        if let Some(root) = &self.state.borrow().root {
            return Ok(Rc::clone(root));
        }

        debug!(repository = %self.config.name, url = %self.root_url, "loading repository root");
        let document = match self.fetch(ROOT_KEY, &self.root_url)? {
            Fetched::Fresh(value) | Fetched::Cached(value) => value,
            Fetched::Absent => {
                return Err(RegistryError::InvalidRoot {
                    url: self.root_url.clone(),
                    reason: "not found".into(),
                });
            }
        };
        let descriptor: RootDescriptor =
            serde_json::from_value(document).map_err(|err| RegistryError::InvalidRoot {
                url: self.root_url.clone(),
                reason: err.to_string(),
            })?;

        for message in descriptor.warnings.iter().flatten() {
            warn!("{}: {}", self.config.name, message.message);
        }
        if let Some(message) = &descriptor.info {
            info!("{}: {}", self.config.name, message.message);
        }

        let root = Rc::new(LoadedRoot {
            inline: descriptor.inline_entries(),
            available: AvailableFilter::from_root(&descriptor)?,
            descriptor,
        });
        self.state.borrow_mut().root = Some(Rc::clone(&root));
        Ok(root)
    }

    fn parse_entries(&self, name: &str, entries: &[Value]) -> Result<Vec<Arc<Package>>> {
        let mut packages = Vec::with_capacity(entries.len());
        for entry in entries {
            let package = match Package::from_json(entry, &self.config.name) {
                Ok(package) => package,
                Err(err) => {
                    debug!(repository = %self.config.name, "skipping malformed entry of {}: {}", name, err);
                    continue;
                }
            };
            if package.name != name {
                return Err(RegistryError::NameMismatch {
                    repository: self.config.name.clone(),
                    expected: name.to_string(),
                    found: package.name,
                });
            }
            packages.push(Arc::new(package));
        }
        Ok(packages)
    }

    /// Version entries for `name` in a lazy metadata document.
    fn lazy_entries(&self, name: &str, document: &Value) -> Result<Vec<Value>> {
        let Some(packages) = document.get("packages").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };
        let versions = match packages.iter().find(|(key, _)| key.eq_ignore_ascii_case(name)) {
            Some((_, versions)) => versions,
            None => {
                return match packages.keys().next() {
                    Some(found) => {
                        Err(RegistryError::NameMismatch {
                            repository: self.config.name.clone(),
                            expected: name.to_string(),
                            found: found.clone(),
                        })
                    }
                    None => Ok(Vec::new()),
                };
            }
        };

        let list: Vec<Value> = match versions {
            Value::Array(list) => list.clone(),
            Value::Object(by_version) => by_version.values().cloned().collect(),
            _ => Vec::new(),
        };
        Ok(if minify::is_minified(document) {
            minify::expand(&list)
        } else {
            list
        })
    }

    fn lazy_url(&self, root: &RootDescriptor, name: &str) -> Result<Option<String>> {
        root.metadata_url
            .as_deref()
            .map(|template| self.canonicalize_url(&template.replace("%package%", name)))
            .transpose()
    }

    /// Loads names through the `metadata-url` protocol, fetching every file
    /// of the batch concurrently.
    fn load_lazy(
        &self,
        root: &RootDescriptor,
        names: &[NameRequest<'_>],
        policy: &StabilityPolicy,
        already_loaded: &AlreadyLoaded,
        result: &mut LoadResult,
    ) -> Result<()> {
        let mut requests = Vec::new();
        for (name, _) in names {
            if let Some(url) = self.lazy_url(root, name)? {
                requests.push((lazy_key(name), url));
            }
            if policy.allows_dev(name) {
                let dev = format!("{name}~dev");
                if let Some(url) = self.lazy_url(root, &dev)? {
                    requests.push((lazy_key(&dev), url));
                }
            }
        }

        let mut fetched: BTreeMap<String, Fetched> = BTreeMap::new();
        for ((key, _), outcome) in requests.iter().zip(self.fetch_all(&requests)) {
            fetched.insert(key.clone(), outcome?);
        }

        for (name, constraint) in names {
            let mut entries = Vec::new();
            let mut hosted = false;
            for key in [lazy_key(name), lazy_key(&format!("{name}~dev"))] {
                if let Some(Fetched::Fresh(document) | Fetched::Cached(document)) = fetched.get(&key) {
                    hosted = true;
                    entries.extend(self.lazy_entries(name, document)?);
                }
            }
            if !hosted {
                continue;
            }

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

    fn load_inline(
        &self,
        name: &str,
        entries: &[Value],
        constraint: Option<&dyn Constraint>,
        policy: &StabilityPolicy,
        already_loaded: &AlreadyLoaded,
        result: &mut LoadResult,
    ) -> Result<()> {
        result.names_found.insert(name.to_string());
        let candidates = self.parse_entries(name, entries)?;
        result.packages.extend(accept_candidates(
            candidates,
            constraint,
            policy,
            already_loaded.get(name),
        ));
        Ok(())
    }

    /// Names this repository can enumerate, or `None` when it only answers
    /// per-name lookups.
    fn enumerable_names(&self, root: &LoadedRoot) -> Result<Option<BTreeSet<String>>> {
        let mut names: BTreeSet<String> = root.inline.keys().cloned().collect();
        let descriptor = &root.descriptor;

        if descriptor.is_lazy() {
            match (&descriptor.available_packages, &descriptor.available_package_patterns) {
                (Some(available), None) => {
                    names.extend(available.iter().map(|n| n.to_lowercase()));
                }
                _ => return Ok(None),
            }
        } else if descriptor.has_provider_listing() {
            names.extend(self.provider_listing(descriptor)?.keys().cloned());
        }
        Ok(Some(names))
    }
}

impl Repository for ComposerRepository {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn load_packages(
        &self,
        names: &[NameRequest<'_>],
        policy: &StabilityPolicy,
        already_loaded: &AlreadyLoaded,
    ) -> Result<LoadResult> {
        let root = self.load_root()?;
        let mut result = LoadResult::default();

        let lowered: Vec<(String, Option<&dyn Constraint>)> = names
            .iter()
            .map(|(name, constraint)| (name.to_lowercase(), *constraint))
            .collect();

        let mut remote: Vec<NameRequest<'_>> = Vec::new();
        for (name, constraint) in &lowered {
            if let Some(entries) = root.inline.get(name) {
                self.load_inline(name, entries, *constraint, policy, already_loaded, &mut result)?;
                continue;
            }
            if let Some(available) = &root.available {
                if !available.contains(name) {
                    continue;
                }
            }
            remote.push((name.as_str(), *constraint));
        }

        if remote.is_empty() {
            return Ok(result);
        }
        if root.descriptor.is_lazy() {
            self.load_lazy(&root.descriptor, &remote, policy, already_loaded, &mut result)?;
        } else if root.descriptor.has_provider_listing() {
            self.load_from_providers(&root.descriptor, &remote, policy, already_loaded, &mut result)?;
        }
        Ok(result)
    }

    fn get_packages(&self) -> Result<Vec<Arc<Package>>> {
        let root = self.load_root()?;
        let names = self
            .enumerable_names(&root)?
            .ok_or_else(|| RegistryError::Unenumerable(self.config.name.clone()))?;

        let requests: Vec<NameRequest<'_>> = names.iter().map(|n| (n.as_str(), None)).collect();
        let result = self.load_packages(&requests, &StabilityPolicy::any(), &AlreadyLoaded::new())?;
        Ok(result.packages)
    }

    fn get_providers(&self, name: &str) -> Result<Vec<ProviderInfo>> {
        self.providers_of(name)
    }

    fn advisories(&self) -> Option<&dyn AdvisoryProvider> {
        Some(self)
    }
}

impl std::fmt::Debug for ComposerRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComposerRepository")
            .field("name", &self.config.name)
            .field("url", &self.base_url)
            .finish()
    }
}

impl ComposerRepository {
    fn emit(&self, event: DepotEvent) {
        self.events.emit(event);
    }
}
