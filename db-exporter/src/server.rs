//! Per-target state: the connection, the catalog in effect for the server's version, and cached
//! query results

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use database_utils::error::DatabaseError;
use database_utils::redacted::{redact_target, server_label};
use database_utils::{ResultSet, Setting, Value};
use parking_lot::{Mutex, RwLock};
use query_catalog::{parse_server_version, ColumnUsage, MetricCatalog, QueryInstance, Version};
use tracing::{debug, info, warn};

use crate::connection::{Connector, Session};
use crate::error::{ConnectionError, ScrapeError, VersionProbeError};
use crate::metrics::{MetricKind, Sample};

/// Settings shared by every scrape
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeConfig {
    /// Prefix of every metric name
    pub namespace: String,
    /// Ignore query instance TTLs and run every query on every scrape
    pub disable_cache: bool,
    /// Don't export server settings
    pub disable_settings_metrics: bool,
    /// Labels added to every sample
    pub constant_labels: Vec<(String, String)>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            namespace: "pg".to_owned(),
            disable_cache: false,
            disable_settings_metrics: false,
            constant_labels: vec![],
        }
    }
}

/// The catalog assigned to a server, and the version it was assigned for
#[derive(Debug, Default)]
struct AssignedCatalog {
    catalog: Option<Arc<MetricCatalog>>,
    version: Option<Version>,
    version_string: String,
}

struct CachedResult {
    collected_at: Instant,
    samples: Vec<Sample>,
}

/// Everything known about one target
pub struct ServerState {
    target: String,
    redacted_target: String,
    server_label: String,
    primary: AtomicBool,
    session: tokio::sync::Mutex<Box<dyn Session>>,
    /// Only written by [`ServerState::refresh_version`]; the version compare and the catalog swap
    /// happen under the same write lock
    assigned: RwLock<AssignedCatalog>,
    /// Keyed by lowercased query instance name. Cleared whenever the catalog is swapped.
    cache: Mutex<HashMap<String, CachedResult>>,
}

impl ServerState {
    pub fn new(target: impl Into<String>, session: Box<dyn Session>) -> Self {
        let target = target.into();
        Self {
            redacted_target: redact_target(&target),
            server_label: server_label(&target),
            target,
            primary: AtomicBool::new(false),
            session: tokio::sync::Mutex::new(session),
            assigned: RwLock::new(AssignedCatalog::default()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// The target with its password masked
    pub fn redacted_target(&self) -> &str {
        &self.redacted_target
    }

    /// `host:port` of the server, attached to every sample as the `server` label
    pub fn server_label(&self) -> &str {
        &self.server_label
    }

    pub fn is_primary(&self) -> bool {
        self.primary.load(Ordering::Relaxed)
    }

    pub fn set_primary(&self, primary: bool) {
        self.primary.store(primary, Ordering::Relaxed)
    }

    /// The catalog currently assigned to this server, if its version has ever been determined
    pub fn catalog(&self) -> Option<Arc<MetricCatalog>> {
        self.assigned.read().catalog.clone()
    }

    /// The server's version as of the last successful probe
    pub fn version(&self) -> Option<Version> {
        self.assigned.read().version.clone()
    }

    /// The full version string reported by the server as of the last successful probe
    pub fn version_string(&self) -> String {
        self.assigned.read().version_string.clone()
    }

    /// Replaces the session if it is known to have been closed
    pub async fn reconnect_if_closed(
        &self,
        connector: &dyn Connector,
    ) -> Result<(), ConnectionError> {
        let mut session = self.session.lock().await;
        if !session.is_closed() {
            return Ok(());
        }
        info!(server = %self.redacted_target, "Connection was closed, reconnecting");
        *session = connector
            .connect(&self.target)
            .await
            .map_err(|source| ConnectionError {
                target: self.redacted_target.clone(),
                source,
            })?;
        Ok(())
    }

    /// Lists the other databases on this server
    pub async fn discover(&self) -> Result<Vec<String>, DatabaseError> {
        self.session.lock().await.databases().await
    }

    /// Probes the server's version, and assigns `default_catalog` if no catalog has been
    /// assigned yet or the version has changed. Returns true if the catalog was swapped.
    ///
    /// On failure the current catalog, if any, is kept.
    pub async fn refresh_version(
        &self,
        default_catalog: &Arc<MetricCatalog>,
    ) -> Result<bool, VersionProbeError> {
        let version_string = self.session.lock().await.version().await?;
        let version = parse_server_version(&version_string)?;

        let mut assigned = self.assigned.write();
        if assigned.catalog.is_some() && assigned.version.as_ref() == Some(&version) {
            return Ok(false);
        }
        info!(
            server = %self.redacted_target,
            %version,
            previous = ?assigned.version.as_ref().map(|v| v.to_string()),
            "Assigning metric catalog for server version"
        );
        assigned.catalog = Some(Arc::clone(default_catalog));
        assigned.version = Some(version);
        assigned.version_string = version_string;
        self.cache.lock().clear();
        Ok(true)
    }

    fn base_labels(&self, config: &ScrapeConfig) -> Vec<(String, String)> {
        let mut labels = config.constant_labels.clone();
        labels.push(("server".to_owned(), self.server_label.clone()));
        labels
    }

    /// The sample describing the server's version, if it is known
    pub fn version_sample(&self, config: &ScrapeConfig) -> Option<Sample> {
        let assigned = self.assigned.read();
        let version = assigned.version.as_ref()?;
        Some(
            Sample::gauge(
                &format!("{}_static", config.namespace),
                "Version string as reported by the server",
                1.0,
            )
            .with_labels(&self.base_labels(config))
            .with_label("version", assigned.version_string.clone())
            .with_label("short_version", version.to_string()),
        )
    }

    /// Runs every enabled query instance of the assigned catalog, plus the settings query unless
    /// disabled, appending the resulting samples to `out`.
    ///
    /// Failures are collected and returned; one failing query never stops the others.
    pub async fn scrape(&self, config: &ScrapeConfig, out: &mut Vec<Sample>) -> Vec<ScrapeError> {
        let mut errors = vec![];
        let base_labels = self.base_labels(config);

        if !config.disable_settings_metrics {
            let settings = self.session.lock().await.settings().await;
            match settings {
                Ok(settings) => out.extend(
                    settings
                        .iter()
                        .filter_map(|s| setting_sample(&config.namespace, s, &base_labels)),
                ),
                Err(error) => errors.push(ScrapeError::Settings(error)),
            }
        }

        let (catalog, version) = {
            let assigned = self.assigned.read();
            (assigned.catalog.clone(), assigned.version.clone())
        };
        let (Some(catalog), Some(version)) = (catalog, version) else {
            debug!(server = %self.redacted_target, "No catalog assigned, skipping queries");
            return errors;
        };

        for instance in catalog.enabled() {
            match self
                .scrape_instance(instance, &version, config, &base_labels)
                .await
            {
                Ok(samples) => out.extend(samples),
                Err(error) => {
                    warn!(server = %self.redacted_target, %error, "Query instance failed");
                    errors.push(error);
                }
            }
        }
        errors
    }

    async fn scrape_instance(
        &self,
        instance: &QueryInstance,
        version: &Version,
        config: &ScrapeConfig,
        base_labels: &[(String, String)],
    ) -> Result<Vec<Sample>, ScrapeError> {
        let cache_key = instance.name.to_ascii_lowercase();
        let ttl = instance.cache_ttl().filter(|_| !config.disable_cache);
        if let Some(ttl) = ttl {
            if let Some(cached) = self.cache.lock().get(&cache_key) {
                if cached.collected_at.elapsed() < ttl {
                    debug!(instance = %instance.name, "Using cached results");
                    return Ok(cached.samples.clone());
                }
            }
        }

        let Some(query) = instance.select_query(version) else {
            debug!(instance = %instance.name, %version, "No query supports this server version");
            return Ok(vec![]);
        };

        let results = self
            .session
            .lock()
            .await
            .query(&query.sql, instance.deadline_for(query))
            .await
            .map_err(|source| ScrapeError::Query {
                instance: instance.name.clone(),
                source,
            })?;
        let samples = instance_samples(&config.namespace, instance, &results, base_labels);

        if ttl.is_some() {
            self.cache.lock().insert(
                cache_key,
                CachedResult {
                    collected_at: Instant::now(),
                    samples: samples.clone(),
                },
            );
        }
        Ok(samples)
    }

    /// Closes the connection to the server
    pub async fn close(self) {
        if let Err(error) = self.session.into_inner().close().await {
            warn!(server = %self.redacted_target, %error, "Error closing connection");
        }
    }
}

/// Maps the rows returned for `instance` onto samples.
///
/// Every label column of a row is attached to every gauge or counter column of the same row.
/// Result columns the instance doesn't declare are ignored. NULL values are exported as NaN, and
/// values that aren't numbers are skipped.
///
/// A label column whose name is already taken by `base_labels`, or by an earlier column of the
/// row, is dropped so that no sample carries the same label twice.
pub fn instance_samples(
    namespace: &str,
    instance: &QueryInstance,
    results: &ResultSet,
    base_labels: &[(String, String)],
) -> Vec<Sample> {
    let is_base_label = |name: &str| base_labels.iter().any(|(key, _)| key == name);
    for column in instance
        .columns
        .iter()
        .filter(|c| c.usage == ColumnUsage::Label && is_base_label(c.name.as_str()))
    {
        warn!(
            instance = %instance.name,
            column = %column.name,
            "Label column clashes with a label every sample carries, ignoring it"
        );
    }

    let mut samples = vec![];
    for row in results.rows() {
        let mut labels = base_labels.to_vec();
        for (name, value) in row.iter() {
            let Some(column) = instance
                .column(name)
                .filter(|c| c.usage == ColumnUsage::Label)
            else {
                continue;
            };
            if labels.iter().any(|(key, _)| *key == column.name) {
                continue;
            }
            labels.push((column.name.clone(), value.to_string()));
        }

        for (name, value) in row.iter() {
            let Some(column) = instance.column(name) else {
                continue;
            };
            let kind = match column.usage {
                ColumnUsage::Gauge => MetricKind::Gauge,
                ColumnUsage::Counter => MetricKind::Counter,
                _ => continue,
            };
            let value = match value {
                Value::Null => f64::NAN,
                value => match value.as_f64() {
                    Some(v) => v,
                    None => {
                        warn!(
                            instance = %instance.name,
                            column = %column.name,
                            %value,
                            "Skipping non-numeric value"
                        );
                        continue;
                    }
                },
            };
            let help = if column.description.is_empty() {
                &instance.description
            } else {
                &column.description
            };
            samples.push(Sample {
                labels: labels.clone(),
                ..Sample::new(
                    &format!("{namespace}_{}_{}", instance.name, column.name),
                    help.clone(),
                    kind,
                    value,
                )
            });
        }
    }
    samples
}

/// Converts a PostgreSQL setting unit (eg `ms`, `8kB`) into the multiplier and divisor that
/// convert values in that unit to seconds or bytes, along with the name suffix for the converted
/// unit.
fn unit_conversion(unit: &str) -> Option<(f64, f64, &'static str)> {
    let split = unit
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unit.len());
    let (multiple, base) = unit.split_at(split);
    let multiple: f64 = if multiple.is_empty() {
        1.0
    } else {
        multiple.parse().ok()?
    };
    let (factor, divisor, suffix) = match base {
        "us" => (1.0, 1e6, "seconds"),
        "ms" => (1.0, 1e3, "seconds"),
        "s" => (1.0, 1.0, "seconds"),
        "min" => (60.0, 1.0, "seconds"),
        "h" => (3600.0, 1.0, "seconds"),
        "d" => (86400.0, 1.0, "seconds"),
        "B" => (1.0, 1.0, "bytes"),
        "kB" => (1024.0, 1.0, "bytes"),
        "MB" => (1024.0 * 1024.0, 1.0, "bytes"),
        "GB" => (1024.0 * 1024.0 * 1024.0, 1.0, "bytes"),
        "TB" => (1024.0 * 1024.0 * 1024.0 * 1024.0, 1.0, "bytes"),
        _ => return None,
    };
    Some((multiple * factor, divisor, suffix))
}

/// Maps one server setting onto a gauge named `<namespace>_settings_<name>`, converting
/// durations to seconds and sizes to bytes.
pub fn setting_sample(
    namespace: &str,
    setting: &Setting,
    base_labels: &[(String, String)],
) -> Option<Sample> {
    let Some(mut value) = Value::from(setting.value.as_str()).as_f64() else {
        debug!(setting = %setting.name, value = %setting.value, "Skipping non-numeric setting");
        return None;
    };
    let mut name = format!("{namespace}_settings_{}", setting.name);
    let mut help = setting.description.clone();

    if let Some(unit) = setting.unit.as_deref() {
        let Some((factor, divisor, suffix)) = unit_conversion(unit) else {
            debug!(setting = %setting.name, %unit, "Skipping setting with unknown unit");
            return None;
        };
        // -1 conventionally means "disabled", and stays -1 whatever the unit
        if value != -1.0 {
            value = value * factor / divisor;
        }
        if !name.ends_with(suffix) {
            name = format!("{name}_{suffix}");
        }
        help = format!("{help} [Units converted to {suffix}.]");
    }

    Some(Sample::gauge(&name, help, value).with_labels(base_labels))
}
