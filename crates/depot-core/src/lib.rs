//! Repository aggregation for depot.
//!
//! [`RepositorySet`] queries an ordered list of repositories as one source,
//! applying shadowing and stability rules, and builds the [`Pool`] of
//! candidate package versions a solver works on.

pub mod error;
pub mod pool;
pub mod pool_builder;
pub mod repository_set;
pub mod request;

pub use error::{CoreError, Result};
pub use pool::{PackageId, Pool};
pub use pool_builder::{PoolBuilder, PoolContext, RequirementPoolBuilder, RootAlias};
pub use repository_set::{FindFlags, RepositorySet};
pub use request::Request;
