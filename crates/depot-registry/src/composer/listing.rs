use std::{collections::BTreeSet, sync::Arc};

use depot_dl::FetchRequest;
use depot_utils::pattern::NamePatterns;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::ComposerRepository;
use crate::{
    error::{RegistryError, Result},
    package::Package,
    repository::{ProviderInfo, Repository},
    root::Mirror,
};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SearchResult {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    package_names: Vec<String>,
}

#[derive(Deserialize)]
struct ProviderEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct ProvidersResponse {
    #[serde(default)]
    providers: Vec<ProviderEntry>,
}

impl ComposerRepository {
    fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .event_loop
            .http()
            .get(self.request(FetchRequest::get(url)))?;
        Ok(response.json()?)
    }

    /// Names of every package this repository hosts, optionally limited to
    /// names matching the wildcard `filter`.
    pub fn get_package_names(&self, filter: Option<&str>) -> Result<Vec<String>> {
        let root = self.load_root()?;
        let patterns = filter.map(|f| NamePatterns::new(&[f])).transpose()?;
        let keep = |name: &String| patterns.as_ref().is_none_or(|p| p.is_match(name));

        if let Some(list) = &root.descriptor.list {
            let mut url = self.canonicalize_url(list)?;
            if let Some(filter) = filter {
                url.push_str(&format!(
                    "?filter={}",
                    utf8_percent_encode(filter, NON_ALPHANUMERIC)
                ));
            }
            let listed: ListResponse = serde_json::from_value(self.get_json(&url)?)?;
            let mut names: Vec<String> = root.inline.keys().cloned().collect();
            names.extend(listed.package_names.into_iter().map(|n| n.to_lowercase()));
            names.retain(|n| keep(n));
            names.sort();
            names.dedup();
            return Ok(names);
        }

        let names = self
            .enumerable_names(&root)?
            .ok_or_else(|| RegistryError::Unenumerable(self.config.name.clone()))?;
        Ok(names.into_iter().filter(|n| keep(n)).collect())
    }

    /// Searches the repository's search endpoint, or its enumerable names
    /// when it has none.
    pub fn search(&self, query: &str) -> Result<Vec<SearchResult>> {
        let root = self.load_root()?;

        if let Some(template) = &root.descriptor.search {
            let url = self.canonicalize_url(
                &template
                    .replace("%query%", &utf8_percent_encode(query, NON_ALPHANUMERIC).to_string())
                    .replace("%type%", ""),
            )?;
            let response: SearchResponse = serde_json::from_value(self.get_json(&url)?)?;
            return Ok(response.results);
        }

        let needle = query.to_lowercase();
        let Some(names) = self.enumerable_names(&root)? else {
            debug!(repository = %self.config.name, "search unsupported");
            return Ok(Vec::new());
        };
        Ok(names
            .into_iter()
            .filter(|name| name.contains(&needle))
            .map(|name| {
                SearchResult {
                    name,
                    description: None,
                    url: None,
                }
            })
            .collect())
    }

    /// Packages providing the virtual package `name`.
    pub(super) fn providers_of(&self, name: &str) -> Result<Vec<ProviderInfo>> {
        let root = self.load_root()?;
        let name = name.to_lowercase();

        if let Some(template) = &root.descriptor.providers_api {
            let url = self.canonicalize_url(&template.replace("%package%", &name))?;
            let response: ProvidersResponse = serde_json::from_value(self.get_json(&url)?)?;
            return Ok(response
                .providers
                .into_iter()
                .map(|p| {
                    ProviderInfo {
                        name: p.name,
                        description: p.description,
                        kind: p.kind,
                    }
                })
                .collect());
        }

        if self.enumerable_names(&root)?.is_none() {
            return Ok(Vec::new());
        }
        let mut seen = BTreeSet::new();
        Ok(self
            .get_packages()?
            .iter()
            .filter(|p| !p.is_alias() && p.provides.contains_key(&name))
            .filter(|p| seen.insert(p.name.clone()))
            .map(|p| {
                ProviderInfo {
                    name: p.pretty_name.clone(),
                    description: p.description.clone(),
                    kind: p.kind.clone(),
                }
            })
            .collect())
    }

    /// Reports installed packages to the repository's `notify-batch`
    /// endpoint. Repositories without one are silently skipped.
    pub fn notify_installs(&self, packages: &[Arc<Package>]) -> Result<()> {
        let root = self.load_root()?;
        let Some(endpoint) = &root.descriptor.notify_batch else {
            return Ok(());
        };
        if packages.is_empty() {
            return Ok(());
        }

        let downloads: Vec<Value> = packages
            .iter()
            .map(|p| json!({"name": p.pretty_name, "version": p.version}))
            .collect();
        let body = serde_json::to_vec(&json!({ "downloads": downloads }))?;

        let url = self.canonicalize_url(endpoint)?;
        let request = self.request(
            FetchRequest::post(url, body).header("Content-Type", "application/json"),
        );
        self.event_loop.http().get(request)?;
        debug!(repository = %self.config.name, "reported {} installs", packages.len());
        Ok(())
    }

    /// Dist mirrors declared by the repository.
    pub fn dist_mirrors(&self) -> Result<Vec<Mirror>> {
        let root = self.load_root()?;
        Ok(root
            .descriptor
            .mirrors
            .iter()
            .flatten()
            .filter(|m| m.dist_url.is_some())
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use depot_config::repository::RepositoryConfig;
    use depot_events::null_sink;
    use serde_json::json;
    use tempfile::tempdir;

    use super::{super::test_support::*, *};

    const ROOT: &str = "https://x/packages.json";

    fn repo(transport: &Arc<FakeTransport>, dir: &std::path::Path) -> ComposerRepository {
        ComposerRepository::new(
            RepositoryConfig::new("x", "https://x"),
            event_loop(Arc::clone(transport)),
            dir,
            null_sink(),
        )
        .unwrap()
    }

    #[test]
    fn test_names_from_available_list() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route(
            ROOT,
            200,
            json!({
                "metadata-url": "/p2/%package%.json",
                "available-packages": ["acme/foo", "acme/bar", "other/baz"],
            })
            .to_string(),
        );

        let repo = repo(&transport, dir.path());
        assert_eq!(repo.get_package_names(Some("acme/*")).unwrap(), vec!["acme/bar", "acme/foo"]);
        assert_eq!(repo.get_package_names(None).unwrap().len(), 3);
    }

    #[test]
    fn test_names_from_list_endpoint() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route(
            ROOT,
            200,
            json!({"metadata-url": "/p2/%package%.json", "list": "/packages/list.json"}).to_string(),
        );
        transport.route(
            "https://x/packages/list.json?filter=acme%2F%2A",
            200,
            json!({"packageNames": ["acme/foo", "Acme/Bar"]}).to_string(),
        );

        let names = repo(&transport, dir.path()).get_package_names(Some("acme/*")).unwrap();
        assert_eq!(names, vec!["acme/bar", "acme/foo"]);
    }

    #[test]
    fn test_search_endpoint() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route(
            ROOT,
            200,
            json!({"search": "/search.json?q=%query%&type=%type%"}).to_string(),
        );
        transport.route(
            "https://x/search.json?q=http%20client&type=",
            200,
            json!({"results": [{"name": "acme/http", "description": "HTTP client"}]}).to_string(),
        );

        let results = repo(&transport, dir.path()).search("http client").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].description.as_deref(), Some("HTTP client"));
    }

    #[test]
    fn test_search_without_endpoint() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route(
            ROOT,
            200,
            json!({"packages": {
                "acme/http": [{"name": "acme/http", "version": "1.0.0"}],
                "acme/log": [{"name": "acme/log", "version": "1.0.0"}],
            }})
            .to_string(),
        );

        let results = repo(&transport, dir.path()).search("HTTP").unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "acme/http");
    }

    #[test]
    fn test_providers_api() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route(
            ROOT,
            200,
            json!({"metadata-url": "/p2/%package%.json", "providers-api": "/providers/%package%.json"})
                .to_string(),
        );
        transport.route(
            "https://x/providers/psr/log-implementation.json",
            200,
            json!({"providers": [{"name": "monolog/monolog", "description": "Logging", "type": "library"}]})
                .to_string(),
        );

        let providers = repo(&transport, dir.path())
            .get_providers("psr/log-implementation")
            .unwrap();
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].kind.as_deref(), Some("library"));
    }

    #[test]
    fn test_providers_from_inline_packages() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route(
            ROOT,
            200,
            json!({"packages": {"acme/log": [
                {"name": "acme/log", "version": "1.0.0", "provide": {"psr/log-implementation": "1.0"}},
            ]}})
            .to_string(),
        );

        let providers = repo(&transport, dir.path())
            .get_providers("psr/log-implementation")
            .unwrap();
        assert_eq!(providers[0].name, "acme/log");
    }

    #[test]
    fn test_notify_installs() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route(ROOT, 200, json!({"notify-batch": "/downloads/"}).to_string());
        transport.route("https://x/downloads/", 200, "{}");

        let package = Package::from_json(&json!({"name": "Acme/Foo", "version": "1.0.0"}), "x").unwrap();
        repo(&transport, dir.path())
            .notify_installs(&[Arc::new(package)])
            .unwrap();

        let requests = transport.requests.lock().unwrap();
        let post = requests.iter().find(|r| r.url == "https://x/downloads/").unwrap();
        let body: Value = serde_json::from_slice(post.body.as_deref().unwrap()).unwrap();
        assert_eq!(body, json!({"downloads": [{"name": "Acme/Foo", "version": "1.0.0"}]}));
        assert_eq!(post.header_value("content-type"), Some("application/json"));
    }

    #[test]
    fn test_dist_mirrors() {
        let dir = tempdir().unwrap();
        let transport = FakeTransport::new();
        transport.route(
            ROOT,
            200,
            json!({"mirrors": [
                {"dist-url": "https://mirror.test/%package%/%reference%.%type%", "preferred": true},
                {"git-url": "https://git.test/%package%/"},
            ]})
            .to_string(),
        );

        let mirrors = repo(&transport, dir.path()).dist_mirrors().unwrap();
        assert_eq!(mirrors.len(), 1);
        assert!(mirrors[0].preferred);
    }
}
