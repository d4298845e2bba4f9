use database_utils::error::DatabaseError;
use query_catalog::{CatalogError, VersionParseError};
use thiserror::Error;

/// A target could not be connected to. Counts towards the `up` metric.
#[derive(Debug, Error)]
#[error("Failed to connect to {target}: {source}")]
pub struct ConnectionError {
    /// The redacted target
    pub target: String,
    #[source]
    pub source: DatabaseError,
}

/// Something went wrong while scraping a connected target. Counts towards the
/// `last_scrape_error` metric, but never stops the rest of the scrape.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Query instance `{instance}` failed: {source}")]
    Query {
        instance: String,
        #[source]
        source: DatabaseError,
    },

    #[error("Failed to read server settings: {0}")]
    Settings(#[source] DatabaseError),
}

/// The server's version couldn't be determined. Never fatal: the server keeps the catalog it
/// already has.
#[derive(Debug, Error)]
pub enum VersionProbeError {
    #[error("Failed to query server version: {0}")]
    Query(#[from] DatabaseError),

    #[error(transparent)]
    Parse(#[from] VersionParseError),
}

/// The outcome of a failed scrape of one target
#[derive(Debug, Error)]
pub enum TargetError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("{} error(s) scraping {target}", errors.len())]
    Scrape {
        target: String,
        errors: Vec<ScrapeError>,
    },
}

impl TargetError {
    pub fn is_connection_error(&self) -> bool {
        matches!(self, TargetError::Connection(_))
    }
}

/// Errors that prevent the exporter from starting
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("No targets were configured")]
    NoTargets,

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}
