//! A Prometheus exporter that runs versioned SQL queries against one or more database servers.
//!
//! Each scrape cycle the [`Exporter`] resolves the set of targets (optionally discovering every
//! database on each configured server), then scrapes each target in turn: it probes the server's
//! version, assigns the [`MetricCatalog`](query_catalog::MetricCatalog) to use if the version
//! changed, and runs every enabled query instance of that catalog. The health of all targets is
//! aggregated into the exporter's own `up` and `last_scrape_error` metrics.

pub mod connection;
pub mod error;
pub mod exporter;
pub mod http_router;
pub mod metrics;
pub mod options;
pub mod pool;
pub mod server;

pub use crate::connection::{Connector, DatabaseConnector, Session};
pub use crate::exporter::{
    aggregate, load_catalog, Exporter, ExporterConfig, Health, ResolvedTarget,
};
pub use crate::metrics::{Collector, Descriptor, MetricKind, Sample};
pub use crate::pool::ServerPool;
pub use crate::server::{ScrapeConfig, ServerState};
