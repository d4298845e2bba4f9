//! The scrape orchestrator: resolves the set of targets, scrapes each of them in turn, and
//! aggregates their health into the exporter's own metrics

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use database_utils::redacted::redact_target;
use indexmap::IndexMap;
use query_catalog::{load_queries, CatalogError, MetricCatalog, QueryFile, ValidationPolicy};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::connection::Connector;
use crate::error::{ExporterError, TargetError};
use crate::metrics::{self, Collector, Descriptor, Sample};
use crate::pool::ServerPool;
use crate::server::ScrapeConfig;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExporterConfig {
    /// Connection URLs of the configured servers
    pub targets: Vec<String>,
    /// Also scrape every other database on each configured server
    pub auto_discover_databases: bool,
    /// Databases never scraped by auto-discovery
    pub exclude_databases: Vec<String>,
    pub scrape: ScrapeConfig,
}

impl ExporterConfig {
    pub fn new<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_auto_discovery(mut self, auto_discover_databases: bool) -> Self {
        self.auto_discover_databases = auto_discover_databases;
        self
    }

    pub fn with_excluded_databases<I, S>(mut self, databases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_databases = databases.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.scrape.namespace = namespace.into();
        self
    }

    pub fn with_disable_cache(mut self, disable_cache: bool) -> Self {
        self.scrape.disable_cache = disable_cache;
        self
    }

    pub fn with_disable_settings_metrics(mut self, disable_settings_metrics: bool) -> Self {
        self.scrape.disable_settings_metrics = disable_settings_metrics;
        self
    }

    pub fn with_constant_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.scrape.constant_labels.push((key.into(), value.into()));
        self
    }
}

/// Builds the catalog the exporter runs with: `defaults`, overridden by any query instances
/// loaded from `config_path`
pub fn load_catalog(
    defaults: MetricCatalog,
    config_path: Option<&Path>,
    policy: ValidationPolicy,
) -> Result<(MetricCatalog, Vec<QueryFile>), CatalogError> {
    let Some(path) = config_path else {
        return Ok((defaults, vec![]));
    };
    let loaded = load_queries(path, policy)?;
    Ok((defaults.merged(loaded.instances), loaded.files))
}

/// One target to scrape in a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub target: String,
    /// Whether this target reports the server version. Only configured targets are primary;
    /// targets found by auto-discovery are not.
    pub primary: bool,
}

/// The health of a whole scrape cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Health {
    /// False if every target failed to connect
    pub up: bool,
    /// True if any target failed in any way
    pub error: bool,
}

/// Aggregates the outcome of scraping each target in a cycle
pub fn aggregate<'a, I>(outcomes: I) -> Health
where
    I: IntoIterator<Item = &'a Result<(), TargetError>>,
{
    let mut targets = 0;
    let mut connection_errors = 0;
    let mut failures = 0;
    for outcome in outcomes {
        targets += 1;
        if let Err(error) = outcome {
            failures += 1;
            if error.is_connection_error() {
                connection_errors += 1;
            }
        }
    }
    Health {
        up: connection_errors < targets,
        error: failures > 0,
    }
}

/// Returns `target` with its database replaced by `database`, or `None` if `target` isn't a URL
/// with a path
fn derive_target(target: &str, database: &str) -> Option<String> {
    let mut url = Url::parse(target).ok()?;
    if url.cannot_be_a_base() {
        return None;
    }
    url.set_path(&format!("/{database}"));
    Some(url.to_string())
}

#[derive(Default)]
struct CycleState {
    scrapes: u64,
    last_collection: Option<Vec<Sample>>,
}

/// Scrapes a set of database servers
pub struct Exporter {
    config: ExporterConfig,
    default_catalog: Arc<MetricCatalog>,
    query_files: Vec<QueryFile>,
    pool: ServerPool,
    /// Held for the whole of a cycle, so cycles never overlap
    cycle: tokio::sync::Mutex<CycleState>,
}

impl Exporter {
    pub fn new(
        config: ExporterConfig,
        catalog: MetricCatalog,
        query_files: Vec<QueryFile>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ExporterError> {
        if config.targets.is_empty() {
            return Err(ExporterError::NoTargets);
        }
        Ok(Self {
            config,
            default_catalog: Arc::new(catalog),
            query_files,
            pool: ServerPool::new(connector),
            cycle: Default::default(),
        })
    }

    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    /// The catalog assigned to every server whose version is (re)discovered
    pub fn default_catalog(&self) -> &Arc<MetricCatalog> {
        &self.default_catalog
    }

    pub fn pool(&self) -> &ServerPool {
        &self.pool
    }

    /// Determines which targets to scrape this cycle.
    ///
    /// Without auto-discovery these are the configured targets. With it, each configured target
    /// is followed by a target for each other database on the same server, except excluded ones,
    /// and configured targets that aren't URLs are dropped. Targets are de-duplicated by their
    /// exact string.
    pub async fn resolve_targets(&self) -> Vec<ResolvedTarget> {
        let mut resolved: IndexMap<String, bool> = IndexMap::new();
        for target in &self.config.targets {
            if !self.config.auto_discover_databases {
                *resolved.entry(target.clone()).or_default() = true;
                continue;
            }
            if let Err(error) = Url::parse(target) {
                warn!(
                    server = %redact_target(target),
                    %error,
                    "Skipping target that isn't a valid URL"
                );
                continue;
            }
            *resolved.entry(target.clone()).or_default() = true;

            let server = match self.pool.get_server(target).await {
                Ok(server) => server,
                Err(error) => {
                    warn!(%error, "Skipping database discovery");
                    continue;
                }
            };
            let databases = match server.discover().await {
                Ok(databases) => databases,
                Err(error) => {
                    warn!(
                        server = %server.redacted_target(),
                        %error,
                        "Failed to list databases"
                    );
                    continue;
                }
            };
            for database in databases {
                if self.config.exclude_databases.contains(&database) {
                    debug!(%database, "Skipping excluded database");
                    continue;
                }
                match derive_target(target, &database) {
                    Some(derived) => {
                        resolved.entry(derived).or_insert(false);
                    }
                    None => warn!(
                        server = %server.redacted_target(),
                        %database,
                        "Can't derive a target for discovered database"
                    ),
                }
            }
        }
        resolved
            .into_iter()
            .map(|(target, primary)| ResolvedTarget { target, primary })
            .collect()
    }

    /// Scrapes one target, appending its samples to `out`
    #[instrument(level = "debug", skip_all, fields(server = %redact_target(&target.target)))]
    pub async fn scrape_target(
        &self,
        target: &ResolvedTarget,
        out: &mut Vec<Sample>,
    ) -> Result<(), TargetError> {
        let server = self.pool.get_server(&target.target).await?;
        server.set_primary(target.primary);

        // The version sample is only emitted for a version probed in this cycle
        match server.refresh_version(&self.default_catalog).await {
            Ok(_) if server.is_primary() => out.extend(server.version_sample(&self.config.scrape)),
            Ok(_) => {}
            Err(error) => {
                warn!(%error, "Failed to determine server version, keeping the current catalog")
            }
        }

        let errors = server.scrape(&self.config.scrape, out).await;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(TargetError::Scrape {
                target: server.redacted_target().to_owned(),
                errors,
            })
        }
    }

    fn self_metrics(&self, duration: Duration, scrapes: u64, health: Health) -> Vec<Sample> {
        let ns = &self.config.scrape.namespace;
        let labels = &self.config.scrape.constant_labels;
        let flag = |b: bool| if b { 1.0 } else { 0.0 };

        let mut samples = vec![
            Sample::gauge(
                &format!("{ns}_exporter_last_scrape_duration_seconds"),
                "Duration of the last scrape of metrics from the database servers",
                duration.as_secs_f64(),
            ),
            Sample::counter(
                &format!("{ns}_exporter_scrapes_total"),
                "Total number of times the database servers were scraped for metrics",
                scrapes as f64,
            ),
            Sample::gauge(
                &format!("{ns}_exporter_last_scrape_error"),
                "Whether the last scrape of metrics resulted in an error (1 for error, 0 for \
                 success)",
                flag(health.error),
            ),
            Sample::gauge(
                &format!("{ns}_up"),
                "Whether the last scrape was able to connect to a server (1 for yes, 0 for no)",
                flag(health.up),
            ),
        ];
        samples.extend(self.query_files.iter().map(|file| {
            Sample::gauge(
                &format!("{ns}_exporter_user_queries_load_error"),
                "Whether the user queries file was loaded and parsed successfully (1 for error, \
                 0 for success)",
                flag(!file.loaded()),
            )
            .with_label("filename", file.file_name())
            .with_label("hashsum", file.checksum.clone())
        }));
        samples
            .into_iter()
            .map(|sample| sample.with_labels(labels))
            .collect()
    }

    async fn run_cycle(&self, state: &mut CycleState) -> Vec<Sample> {
        let started = Instant::now();
        let targets = self.resolve_targets().await;

        let mut samples = vec![];
        let mut outcomes = Vec::with_capacity(targets.len());
        for target in &targets {
            let outcome = self.scrape_target(target, &mut samples).await;
            if let Err(error) = &outcome {
                warn!(%error, "Scrape failed");
            }
            outcomes.push(outcome);
        }

        let health = aggregate(&outcomes);
        state.scrapes += 1;
        let duration = started.elapsed();
        info!(
            targets = targets.len(),
            samples = samples.len(),
            up = health.up,
            error = health.error,
            ?duration,
            "Finished scrape"
        );
        samples.extend(self.self_metrics(duration, state.scrapes, health));
        samples
    }

    /// Collects and renders all metrics in the Prometheus text format
    pub async fn render(&self) -> String {
        metrics::render(&self.collect().await)
    }

    /// Closes every server connection. Waits for any running cycle to finish first.
    pub async fn close(&self) {
        let _cycle = self.cycle.lock().await;
        self.pool.close().await;
    }
}

#[async_trait]
impl Collector for Exporter {
    /// Derived from the last collection, running one first if there hasn't been one
    async fn describe(&self) -> Vec<Descriptor> {
        let last_collection = self.cycle.lock().await.last_collection.clone();
        match last_collection {
            Some(samples) => metrics::describe(&samples),
            None => metrics::describe(&self.collect().await),
        }
    }

    async fn collect(&self) -> Vec<Sample> {
        let mut state = self.cycle.lock().await;
        let samples = self.run_cycle(&mut state).await;
        state.last_collection = Some(samples.clone());
        samples
    }
}
