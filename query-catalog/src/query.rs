//! Query definitions and the named query instances that group them

use std::fmt::{self, Display};
use std::time::Duration;

use chrono::TimeDelta;
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::column::{Column, ColumnUsage};
use crate::error::ValidationError;
use crate::version::VersionRange;

/// Whether a query instance or definition should be run.
///
/// An empty status means enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    #[default]
    Enabled,
    Disabled,
    Unrecognized(String),
}

impl Status {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Status::Enabled)
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Status::Unrecognized(_))
    }
}

impl From<&str> for Status {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "enable" | "enabled" => Status::Enabled,
            "disable" | "disabled" => Status::Disabled,
            _ => Status::Unrecognized(s.to_owned()),
        }
    }
}

impl From<String> for Status {
    fn from(s: String) -> Self {
        Status::from(s.as_str())
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.to_string()
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Enabled => f.write_str("enable"),
            Status::Disabled => f.write_str("disable"),
            Status::Unrecognized(s) => f.write_str(s),
        }
    }
}

/// Converts a number of seconds to a signed duration, preserving sub-second precision
fn signed_seconds(seconds: f64) -> TimeDelta {
    TimeDelta::nanoseconds((seconds * 1e9) as i64)
}

/// Converts a number of seconds to a deadline. Negative values mean there's no deadline.
fn deadline_from_seconds(seconds: f64) -> Option<Duration> {
    if seconds.is_nan() || seconds < 0.0 {
        None
    } else {
        Some(Duration::from_secs_f64(seconds.min(u32::MAX as f64)))
    }
}

/// One SQL text, applicable to a range of server versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub sql: String,

    #[serde(
        default,
        rename = "version",
        alias = "supported_versions",
        alias = "supported_version_range"
    )]
    pub supported_versions: VersionRange,

    #[serde(default)]
    pub status: Status,

    /// Overrides the owning instance's timeout, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
}

impl QueryDefinition {
    /// A definition that is enabled for every server version
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            supported_versions: VersionRange::any(),
            status: Status::Enabled,
            timeout: None,
        }
    }

    pub fn with_versions(mut self, supported_versions: VersionRange) -> Self {
        self.supported_versions = supported_versions;
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.status.is_enabled()
    }

    /// Returns true if this definition is enabled and can run against `version`
    pub fn supports(&self, version: &Version) -> bool {
        self.is_enabled() && self.supported_versions.matches(version)
    }

    /// The timeout override as a signed duration, if there is one
    pub fn timeout_duration(&self) -> Option<TimeDelta> {
        self.timeout.map(signed_seconds)
    }
}

fn no_timeout() -> f64 {
    -1.0
}

/// A named metric family source: version-dependent SQL texts plus the mapping of their result
/// columns onto metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInstance {
    /// Unique within a catalog, compared case-insensitively. Becomes the middle segment of every
    /// metric name this instance produces.
    #[serde(default)]
    pub name: String,

    #[serde(default, alias = "desc")]
    pub description: String,

    /// Tried in declaration order; the first enabled one that supports the server's version wins
    #[serde(default, alias = "query")]
    pub queries: Vec<QueryDefinition>,

    #[serde(default, alias = "metrics")]
    pub columns: Vec<Column>,

    #[serde(default)]
    pub status: Status,

    /// How long, in seconds, results may be served from cache. Zero or less disables caching.
    #[serde(default)]
    pub ttl: f64,

    /// Query timeout in seconds. Negative means no deadline.
    #[serde(default = "no_timeout")]
    pub timeout: f64,

    /// Carried through from configuration; currently doesn't affect scheduling
    #[serde(default)]
    pub priority: i32,
}

impl QueryInstance {
    /// An enabled instance with no queries, no columns, no caching and no timeout
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            queries: vec![],
            columns: vec![],
            status: Status::Enabled,
            ttl: 0.0,
            timeout: no_timeout(),
            priority: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_query(mut self, query: QueryDefinition) -> Self {
        self.queries.push(query);
        self
    }

    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = status;
        self
    }

    pub fn with_ttl(mut self, seconds: f64) -> Self {
        self.ttl = seconds;
        self
    }

    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.status.is_enabled()
    }

    /// Validates the status of this instance and of each of its queries, and the usage of each
    /// of its columns. Nothing else is checked.
    pub fn check(&self) -> Result<(), ValidationError> {
        if let Status::Unrecognized(status) = &self.status {
            return Err(ValidationError::InstanceStatus {
                instance: self.name.clone(),
                status: status.clone(),
            });
        }
        for (index, query) in self.queries.iter().enumerate() {
            if let Status::Unrecognized(status) = &query.status {
                return Err(ValidationError::QueryStatus {
                    instance: self.name.clone(),
                    index,
                    status: status.clone(),
                });
            }
        }
        for column in &self.columns {
            if let ColumnUsage::Unrecognized(usage) = &column.usage {
                return Err(ValidationError::ColumnUsage {
                    instance: self.name.clone(),
                    column: column.name.clone(),
                    usage: usage.clone(),
                });
            }
        }
        Ok(())
    }

    /// The instance timeout as a signed duration; negative values are preserved
    pub fn timeout_duration(&self) -> TimeDelta {
        signed_seconds(self.timeout)
    }

    /// The instance timeout as a query deadline, or `None` if queries should run unbounded
    pub fn deadline(&self) -> Option<Duration> {
        deadline_from_seconds(self.timeout)
    }

    /// The deadline for running `query`, which may override the instance timeout
    pub fn deadline_for(&self, query: &QueryDefinition) -> Option<Duration> {
        deadline_from_seconds(query.timeout.unwrap_or(self.timeout))
    }

    /// How long results may be reused for, if at all
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.ttl > 0.0).then(|| Duration::from_secs_f64(self.ttl.min(u32::MAX as f64)))
    }

    /// Returns the first query, in declaration order, that is enabled and supports `version`
    pub fn select_query(&self, version: &Version) -> Option<&QueryDefinition> {
        self.queries.iter().find(|q| q.supports(version))
    }

    /// Looks up a column by name, case-insensitively. The first declared column wins.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Drops every column whose name duplicates an earlier one, returning the names dropped
    pub fn dedup_columns(&mut self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::with_capacity(self.columns.len());
        let mut dropped = vec![];
        self.columns.retain(|c| {
            let key = c.name.to_ascii_lowercase();
            if seen.contains(&key) {
                dropped.push(c.name.clone());
                false
            } else {
                seen.push(key);
                true
            }
        });
        dropped
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use test_strategy::proptest;

    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn replication() -> QueryInstance {
        QueryInstance::new("pg_replication")
            .with_query(
                QueryDefinition::new("select 'old'")
                    .with_versions("<10.0.0".parse().unwrap()),
            )
            .with_query(
                QueryDefinition::new("select 'new, disabled'")
                    .with_versions(">=10.0.0".parse().unwrap())
                    .with_status(Status::Disabled),
            )
            .with_query(
                QueryDefinition::new("select 'new'").with_versions(">=10.0.0".parse().unwrap()),
            )
            .with_query(QueryDefinition::new("select 'anything'"))
    }

    #[test]
    fn status_parsing() {
        assert_eq!(Status::from(""), Status::Enabled);
        assert_eq!(Status::from("enable"), Status::Enabled);
        assert_eq!(Status::from("Enabled"), Status::Enabled);
        assert_eq!(Status::from("DISABLE"), Status::Disabled);
        assert_eq!(Status::from("disabled"), Status::Disabled);
        assert_eq!(Status::from("maybe"), Status::Unrecognized("maybe".into()));
    }

    #[test]
    fn selects_first_enabled_supporting_query() {
        let instance = replication();
        assert_eq!(instance.select_query(&v("9.6.0")).unwrap().sql, "select 'old'");
        assert_eq!(instance.select_query(&v("12.1.0")).unwrap().sql, "select 'new'");
    }

    #[test]
    fn no_query_for_version() {
        let instance = QueryInstance::new("x").with_query(
            QueryDefinition::new("select 1").with_versions(">=13.0.0".parse().unwrap()),
        );
        assert!(instance.select_query(&v("12.0.0")).is_none());
    }

    #[test]
    fn check_reports_unrecognized_values() {
        let good = replication().with_column(Column::gauge("lag", ""));
        assert_eq!(good.check(), Ok(()));

        let bad_status = replication().with_status(Status::from("on"));
        assert!(matches!(
            bad_status.check(),
            Err(ValidationError::InstanceStatus { .. })
        ));

        let bad_query = replication()
            .with_query(QueryDefinition::new("select 1").with_status(Status::from("sometimes")));
        assert_eq!(
            bad_query.check(),
            Err(ValidationError::QueryStatus {
                instance: "pg_replication".into(),
                index: 4,
                status: "sometimes".into(),
            })
        );

        let bad_usage =
            replication().with_column(Column::new("lag", ColumnUsage::from("histogram")));
        assert!(matches!(
            bad_usage.check(),
            Err(ValidationError::ColumnUsage { column, .. }) if column == "lag"
        ));
    }

    #[test]
    fn negative_ttl_passes_check_but_disables_caching() {
        let instance = QueryInstance::new("x").with_ttl(-5.0);
        assert_eq!(instance.check(), Ok(()));
        assert_eq!(instance.cache_ttl(), None);
        assert_eq!(
            QueryInstance::new("x").with_ttl(1.5).cache_ttl(),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn timeouts() {
        let instance = QueryInstance::new("x").with_timeout(-1.0);
        assert_eq!(instance.timeout_duration(), TimeDelta::seconds(-1));
        assert_eq!(instance.deadline(), None);

        let instance = QueryInstance::new("x").with_timeout(0.1);
        assert_eq!(instance.timeout_duration(), TimeDelta::milliseconds(100));
        assert_eq!(instance.deadline(), Some(Duration::from_millis(100)));

        let query = QueryDefinition::new("select 1").with_timeout(2.0);
        assert_eq!(instance.deadline_for(&query), Some(Duration::from_secs(2)));
        assert_eq!(
            instance.deadline_for(&QueryDefinition::new("select 1")),
            Some(Duration::from_millis(100))
        );
    }

    #[proptest]
    fn timeout_duration_is_linear(#[strategy(-1_000_000.0f64..1_000_000.0)] seconds: f64) {
        let instance = QueryInstance::new("x").with_timeout(seconds);
        let nanos = instance.timeout_duration().num_nanoseconds().unwrap();
        assert!((nanos as f64 / 1e9 - seconds).abs() < 1e-6);
    }

    #[proptest]
    fn check_fails_iff_something_is_unrecognized(
        #[strategy("(enable|disable|bogus|ENABLED)")] instance_status: String,
        #[strategy("(enabled|DISABLED|bogus)")] query_status: String,
        #[strategy("(label|GAUGE|counter|discard|bogus)")] usage: String,
    ) {
        let instance = QueryInstance::new("x")
            .with_status(Status::from(instance_status.as_str()))
            .with_query(QueryDefinition::new("select 1").with_status(query_status.as_str().into()))
            .with_column(Column::new("c", usage.as_str().into()));
        let any_bogus = [&instance_status, &query_status, &usage]
            .iter()
            .any(|s| s.as_str() == "bogus");
        assert_eq!(instance.check().is_err(), any_bogus);
    }

    #[test]
    fn column_lookup_is_case_insensitive() {
        let instance = QueryInstance::new("x")
            .with_column(Column::label("DatName", "first"))
            .with_column(Column::gauge("datname", "second"));
        assert_eq!(instance.column("DATNAME").unwrap().description, "first");
        assert!(instance.column("missing").is_none());
    }

    #[test]
    fn dedup_keeps_first_column() {
        let mut instance = QueryInstance::new("x")
            .with_column(Column::label("a", "first"))
            .with_column(Column::gauge("b", ""))
            .with_column(Column::gauge("A", "second"));
        assert_eq!(instance.dedup_columns(), vec!["A".to_owned()]);
        assert_eq!(instance.columns.len(), 2);
        assert_eq!(instance.column("a").unwrap().description, "first");
    }
}
