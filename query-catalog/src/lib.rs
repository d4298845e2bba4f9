//! Describes which SQL to run against a database server, depending on its version, and how the
//! columns of the results map onto exported metrics.
//!
//! A [`MetricCatalog`] is an ordered set of [`QueryInstance`]s. Each instance holds one or more
//! [`QueryDefinition`]s, of which the first enabled one whose [`VersionRange`] accepts the
//! server's version is run, and a list of [`Column`]s saying which result columns are labels and
//! which are samples.
//!
//! Catalogs are built from the [built-in defaults](default_catalog) merged with instances
//! [loaded from YAML](load_queries), and are immutable once built.

pub mod catalog;
pub mod column;
pub mod config;
pub mod defaults;
pub mod error;
pub mod query;
pub mod version;

pub use semver::Version;

pub use crate::catalog::MetricCatalog;
pub use crate::column::{Column, ColumnUsage};
pub use crate::config::{load_queries, parse_queries, LoadedQueries, QueryFile, ValidationPolicy};
pub use crate::defaults::default_catalog;
pub use crate::error::{CatalogError, ValidationError};
pub use crate::query::{QueryDefinition, QueryInstance, Status};
pub use crate::version::{parse_server_version, VersionParseError, VersionRange};
