use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A query instance that can't be admitted into a catalog
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error(
        "query instance `{instance}` has invalid status '{status}', expected 'enabled' or \
         'disabled'"
    )]
    InstanceStatus { instance: String, status: String },

    #[error(
        "query #{index} of query instance `{instance}` has invalid status '{status}', expected \
         'enabled' or 'disabled'"
    )]
    QueryStatus {
        instance: String,
        index: usize,
        status: String,
    },

    #[error(
        "column `{column}` of query instance `{instance}` has invalid usage '{usage}', expected \
         one of 'discard', 'label', 'gauge' or 'counter'"
    )]
    ColumnUsage {
        instance: String,
        column: String,
        usage: String,
    },
}

/// Errors that can occur while loading query configuration from disk
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read query config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse query config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml_ng::Error,
    },

    #[error("invalid query in {}: {source}", path.display())]
    Validation {
        path: PathBuf,
        #[source]
        source: ValidationError,
    },
}
