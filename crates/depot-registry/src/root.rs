use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// Hash of a provider listing or include file.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ProviderHash {
    pub sha256: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct AdvisoryConfig {
    #[serde(default)]
    pub metadata: bool,
    pub api_url: Option<String>,
    #[serde(default)]
    pub query_all: bool,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Mirror {
    pub dist_url: Option<String>,
    pub git_url: Option<String>,
    pub hg_url: Option<String>,
    #[serde(default)]
    pub preferred: bool,
}

/// Message a repository wants shown to its users, optionally limited to
/// client versions.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct RootMessage {
    pub message: String,
    pub versions: Option<String>,
}

/// The repository's `packages.json`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RootDescriptor {
    /// Inline packages, `{name: {version: entry}}` or `{name: [entry]}`.
    #[serde(default)]
    pub packages: Option<Value>,
    pub providers_url: Option<String>,
    pub providers: Option<BTreeMap<String, ProviderHash>>,
    pub provider_includes: Option<BTreeMap<String, ProviderHash>>,
    pub metadata_url: Option<String>,
    pub available_packages: Option<Vec<String>>,
    pub available_package_patterns: Option<Vec<String>>,
    pub notify: Option<String>,
    pub notify_batch: Option<String>,
    pub search: Option<String>,
    pub list: Option<String>,
    pub providers_api: Option<String>,
    pub mirrors: Option<Vec<Mirror>>,
    pub security_advisories: Option<AdvisoryConfig>,
    pub warnings: Option<Vec<RootMessage>>,
    pub info: Option<RootMessage>,
}

impl RootDescriptor {
    pub fn is_lazy(&self) -> bool {
        self.metadata_url.is_some()
    }

    pub fn has_provider_listing(&self) -> bool {
        !self.is_lazy()
            && self.providers_url.is_some()
            && (self.providers.is_some() || self.provider_includes.is_some())
    }

    pub fn has_available_list(&self) -> bool {
        self.available_packages.is_some() || self.available_package_patterns.is_some()
    }

    /// Inline entries grouped by lowercase package name.
    pub fn inline_entries(&self) -> BTreeMap<String, Vec<Value>> {
        let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        let Some(Value::Object(packages)) = &self.packages else {
            return grouped;
        };

        for (name, versions) in packages {
            let entries = grouped.entry(name.to_lowercase()).or_default();
            match versions {
                Value::Object(by_version) => entries.extend(by_version.values().cloned()),
                Value::Array(list) => entries.extend(list.iter().cloned()),
                _ => {}
            }
        }
        grouped
    }

    /// Every message the repository asked to surface.
    pub fn messages(&self) -> Vec<&RootMessage> {
        self.warnings
            .iter()
            .flatten()
            .chain(self.info.iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_lazy_root() {
        let root: RootDescriptor = serde_json::from_value(json!({
            "metadata-url": "/p2/%package%.json",
            "available-packages": ["acme/foo"],
            "security-advisories": {"metadata": true, "api-url": "https://x/api/security-advisories/"},
            "mirrors": [{"dist-url": "https://mirror.test/%package%/%version%.%type%", "preferred": true}],
            "packages": []
        }))
        .unwrap();

        assert!(root.is_lazy());
        assert!(!root.has_provider_listing());
        assert!(root.has_available_list());
        let adv = root.security_advisories.unwrap();
        assert!(adv.metadata);
        assert!(!adv.query_all);
        assert!(root.mirrors.unwrap()[0].preferred);
    }

    #[test]
    fn test_provider_root() {
        let root: RootDescriptor = serde_json::from_value(json!({
            "providers-url": "/p/%package%$%hash%.json",
            "provider-includes": {"p/include$%hash%.json": {"sha256": "abc"}}
        }))
        .unwrap();
        assert!(root.has_provider_listing());
    }

    #[test]
    fn test_inline_entries_both_shapes() {
        let root: RootDescriptor = serde_json::from_value(json!({
            "packages": {
                "Acme/Foo": {"1.0.0": {"name": "acme/foo", "version": "1.0.0"}},
                "acme/bar": [{"name": "acme/bar", "version": "2.0.0"}]
            }
        }))
        .unwrap();
        let inline = root.inline_entries();
        assert_eq!(inline["acme/foo"].len(), 1);
        assert_eq!(inline["acme/bar"].len(), 1);
    }

    #[test]
    fn test_messages() {
        let root: RootDescriptor = serde_json::from_value(json!({
            "warnings": [{"message": "deprecated", "versions": "<2"}],
            "info": {"message": "hello"}
        }))
        .unwrap();
        let messages: Vec<_> = root.messages().iter().map(|m| m.message.clone()).collect();
        assert_eq!(messages, vec!["deprecated", "hello"]);
    }
}
