//! Package metadata repositories for depot.
//!
//! This crate turns remote Composer-style repositories into typed package
//! lists. It handles:
//! - The root `packages.json` descriptor and its optional capabilities
//! - Per-package lazy metadata with conditional refresh and a 404 cache
//! - Hash-verified provider listing files
//! - Degraded operation from the on-disk cache when the network fails
//! - Security advisories from metadata files or an advisory API
//!
//! # Example
//!
//! ```no_run
//! use std::{path::Path, rc::Rc};
//!
//! use depot_config::{config::Config, repository::RepositoryConfig};
//! use depot_dl::{HttpDownloader, Loop};
//! use depot_events::null_sink;
//! use depot_registry::{ComposerRepository, Repository};
//!
//! fn show(config: &Config) -> depot_registry::Result<()> {
//!     let http = Rc::new(HttpDownloader::new(config, null_sink()));
//!     let event_loop = Rc::new(Loop::new(http, None));
//!     let repo = ComposerRepository::new(
//!         RepositoryConfig::new("packagist", "https://repo.packagist.org"),
//!         event_loop,
//!         Path::new("/tmp/depot-cache"),
//!         null_sink(),
//!     )?;
//!     for package in repo.find_packages("monolog/monolog", None)? {
//!         println!("{package}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod advisory;
pub mod cache;
pub mod composer;
pub mod constraint;
pub mod error;
pub mod minify;
pub mod package;
pub mod repository;
pub mod root;
pub mod stability;
pub mod version;

pub use advisory::{
    Advisory, AdvisoryMap, AdvisoryProvider, AdvisoryResult, ConstraintMap,
    PartialSecurityAdvisory, SecurityAdvisory,
};
pub use composer::{ComposerRepository, SearchResult};
pub use constraint::{parse_constraint, AnyVersion, Constraint, ExactVersion};
pub use error::{ErrorContext, RegistryError, Result};
pub use package::{Dist, Package};
pub use repository::{
    AlreadyLoaded, ArrayRepository, InstalledRepository, LoadResult, NameRequest, ProviderInfo,
    Repository,
};
pub use root::RootDescriptor;
pub use stability::{Stability, StabilityPolicy};
