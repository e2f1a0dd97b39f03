use depot_dl::FetchRequest;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde_json::Value;
use tracing::debug;

use super::ComposerRepository;
use crate::{
    advisory::{collect_advisories, AdvisoryProvider, AdvisoryResult, ConstraintMap},
    cache::lazy_key,
    error::Result,
};

const ADVISORIES_KEY: &str = "security-advisories";

/// Form body `packages[]=a&packages[]=b`.
fn form_body(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("packages%5B%5D={}", utf8_percent_encode(name, NON_ALPHANUMERIC)))
        .collect::<Vec<_>>()
        .join("&")
}

impl ComposerRepository {
    /// Reads advisories embedded in lazy metadata files, fetched in one
    /// concurrent batch.
    fn metadata_advisories(
        &self,
        names: &[&str],
        packages: &ConstraintMap,
        allow_partial: bool,
        result: &mut AdvisoryResult,
    ) -> Result<()> {
        let root = self.load_root()?;
        let mut requests = Vec::with_capacity(names.len());
        for name in names {
            if let Some(url) = self.lazy_url(&root.descriptor, name)? {
                requests.push((lazy_key(name), url));
            }
        }

        let fetched = self.fetch_all(&requests);
        for (name, outcome) in names.iter().zip(fetched) {
            let Some(document) = outcome?.into_value() else {
                continue;
            };
            let Some(entries) = document.get(ADVISORIES_KEY).and_then(Value::as_array) else {
                continue;
            };
            let Some(constraint) = packages.get(*name) else {
                continue;
            };

            result.names_found.push(name.to_string());
            let found =
                collect_advisories(entries, name, constraint.as_ref(), &self.config.name, allow_partial)?;
            if !found.is_empty() {
                result.advisories.insert(name.to_string(), found);
            }
        }
        Ok(())
    }

    fn api_advisories(
        &self,
        api_url: &str,
        names: &[&str],
        packages: &ConstraintMap,
        allow_partial: bool,
        result: &mut AdvisoryResult,
    ) -> Result<()> {
        let url = self.canonicalize_url(api_url)?;
        debug!(repository = %self.config.name, "querying advisories for {} packages", names.len());

        let request = self.request(
            FetchRequest::post(url, form_body(names))
                .header("Content-Type", "application/x-www-form-urlencoded"),
        );
        let response = self.event_loop.http().get(request)?;
        let document: Value = response.json()?;

        // an empty result may be encoded as a list
        let Some(by_name) = document.get("advisories").and_then(Value::as_object) else {
            return Ok(());
        };
        for (name, entries) in by_name {
            let name = name.to_lowercase();
            let (Some(constraint), Some(entries)) = (packages.get(&name), entries.as_array())
            else {
                continue;
            };

            if !result.names_found.contains(&name) {
                result.names_found.push(name.clone());
            }
            let found =
                collect_advisories(entries, &name, constraint.as_ref(), &self.config.name, allow_partial)?;
            if !found.is_empty() {
                result.advisories.entry(name).or_default().extend(found);
            }
        }
        Ok(())
    }
}

impl AdvisoryProvider for ComposerRepository {
    /// Metadata-embedded advisories are only consulted when partial results
    /// are acceptable or no API is available, since they may be incomplete.
    /// Names answered from metadata are not sent to the API.
    fn get_security_advisories(
        &self,
        packages: &ConstraintMap,
        allow_partial: bool,
    ) -> Result<AdvisoryResult> {
        let root = self.load_root()?;
        let mut result = AdvisoryResult::default();
        let Some(config) = &root.descriptor.security_advisories else {
            return Ok(result);
        };

        let mut names: Vec<&str> = packages
            .keys()
            .map(String::as_str)
            .filter(|name| {
                config.query_all
                    || root
                        .available
                        .as_ref()
                        .is_none_or(|available| available.contains(name))
            })
            .collect();

        if config.metadata
            && root.descriptor.is_lazy()
            && (allow_partial || config.api_url.is_none())
        {
            self.metadata_advisories(&names, packages, allow_partial, &mut result)?;
            names.retain(|name| !result.names_found.iter().any(|found| found == name));
        }

        if let Some(api_url) = &config.api_url {
            if !names.is_empty() {
                self.api_advisories(api_url, &names, packages, allow_partial, &mut result)?;
            }
        }
        Ok(result)
    }
}
