//! Loading query instances from YAML files.
//!
//! A file holds either a list of query instances or a map from instance name to instance. When
//! the map form is used the `name` field may be omitted. Several field names are accepted for
//! compatibility with older configuration: `desc` for `description`, `query` for `queries` and
//! `metrics` for `columns`.
//!
//! ```yaml
//! pg_lock:
//!   desc: Lock counts per database and mode
//!   query:
//!     - sql: SELECT datname, mode, count(*) AS count FROM pg_locks ...
//!       version: ">=9.0.0"
//!   metrics:
//!     - name: datname
//!       usage: LABEL
//!     - name: count
//!       usage: GAUGE
//!   ttl: 30
//!   timeout: 1
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_yaml_ng::Value;
use tracing::{debug, info, warn};

use crate::error::CatalogError;
use crate::query::QueryInstance;

/// What to do with a query instance that fails [`QueryInstance::check`], or a file that can't be
/// read or parsed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationPolicy {
    /// Log a warning, leave it out and keep loading
    #[default]
    Skip,
    /// Abort the whole load
    FailFast,
}

/// The outcome of loading one query config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFile {
    pub path: PathBuf,
    /// Hex md5 of the file contents, or empty if the file couldn't be read
    pub checksum: String,
    /// Set if the file couldn't be read or parsed, or if any instance in it was rejected
    pub error: Option<String>,
}

impl QueryFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn loaded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct LoadedQueries {
    /// Every valid instance, in file then declaration order
    pub instances: Vec<QueryInstance>,
    pub files: Vec<QueryFile>,
}

/// Parses the query instances declared in a single YAML document
pub fn parse_queries(yaml: &str) -> Result<Vec<QueryInstance>, serde_yaml_ng::Error> {
    if yaml.trim().is_empty() {
        return Ok(vec![]);
    }
    let document: Value = serde_yaml_ng::from_str(yaml)?;
    match document {
        Value::Null => Ok(vec![]),
        Value::Sequence(_) => serde_yaml_ng::from_value(document),
        _ => {
            let by_name: IndexMap<String, QueryInstance> = serde_yaml_ng::from_value(document)?;
            Ok(by_name
                .into_iter()
                .map(|(name, mut instance)| {
                    if instance.name.trim().is_empty() {
                        instance.name = name;
                    }
                    instance
                })
                .collect())
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
}

fn config_files(path: &Path) -> Result<Vec<PathBuf>, CatalogError> {
    let io_err = |source| CatalogError::Io {
        path: path.to_owned(),
        source,
    };
    if !fs::metadata(path).map_err(io_err)?.is_dir() {
        return Ok(vec![path.to_owned()]);
    }
    let mut files = fs::read_dir(path)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    files.retain(|p| p.is_file() && is_yaml(p));
    files.sort();
    Ok(files)
}

fn admit(
    file: &mut QueryFile,
    instances: Vec<QueryInstance>,
    policy: ValidationPolicy,
    admitted: &mut Vec<QueryInstance>,
) -> Result<(), CatalogError> {
    for mut instance in instances {
        if instance.name.trim().is_empty() {
            warn!(path = %file.path.display(), "Skipping query instance with no name");
            continue;
        }
        for column in instance.dedup_columns() {
            warn!(
                path = %file.path.display(),
                instance = %instance.name,
                %column,
                "Ignoring duplicate column"
            );
        }
        match instance.check() {
            Ok(()) => admitted.push(instance),
            Err(source) if policy == ValidationPolicy::FailFast => {
                return Err(CatalogError::Validation {
                    path: file.path.clone(),
                    source,
                })
            }
            Err(error) => {
                warn!(path = %file.path.display(), %error, "Skipping invalid query instance");
                file.error.get_or_insert_with(|| error.to_string());
            }
        }
    }
    Ok(())
}

/// Loads query instances from `path`, which is either a single YAML file or a directory whose
/// `.yaml`/`.yml` files are read in name order.
///
/// A missing `path` is always an error. What happens to unreadable files, unparseable files and
/// invalid instances is determined by `policy`.
pub fn load_queries(path: &Path, policy: ValidationPolicy) -> Result<LoadedQueries, CatalogError> {
    let mut loaded = LoadedQueries::default();
    for path in config_files(path)? {
        let mut file = QueryFile {
            path: path.clone(),
            checksum: String::new(),
            error: None,
        };

        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(source) if policy == ValidationPolicy::FailFast => {
                return Err(CatalogError::Io { path, source })
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "Failed to read query config");
                file.error = Some(error.to_string());
                loaded.files.push(file);
                continue;
            }
        };
        file.checksum = format!("{:x}", md5::compute(&contents));

        match parse_queries(&String::from_utf8_lossy(&contents)) {
            Ok(instances) => {
                let before = loaded.instances.len();
                admit(&mut file, instances, policy, &mut loaded.instances)?;
                info!(
                    path = %path.display(),
                    checksum = %file.checksum,
                    instances = loaded.instances.len() - before,
                    "Loaded query config"
                );
            }
            Err(source) if policy == ValidationPolicy::FailFast => {
                return Err(CatalogError::Parse { path, source })
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "Failed to parse query config");
                file.error = Some(error.to_string());
            }
        }
        loaded.files.push(file);
    }
    debug!(files = loaded.files.len(), "Finished loading query configs");
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::column::ColumnUsage;
    use crate::query::Status;

    #[test]
    fn parse_map_form() {
        let instances = parse_queries(
            r#"
pg_lock:
  desc: locks
  query:
    - sql: "SELECT 1"
      version: ">=9.0.0"
      timeout: 2
  metrics:
    - name: datname
      usage: LABEL
    - name: count
      usage: gauge
      description: Number of locks
  ttl: 30
  priority: 3
"#,
        )
        .unwrap();
        assert_eq!(instances.len(), 1);
        let lock = &instances[0];
        assert_eq!(lock.name, "pg_lock");
        assert_eq!(lock.description, "locks");
        assert_eq!(lock.queries[0].timeout, Some(2.0));
        assert_eq!(lock.queries[0].supported_versions.to_string(), ">=9.0.0");
        assert_eq!(lock.columns[1].usage, ColumnUsage::Gauge);
        assert_eq!(lock.ttl, 30.0);
        assert_eq!(lock.timeout, -1.0);
        assert_eq!(lock.priority, 3);
        assert_eq!(lock.status, Status::Enabled);
    }

    #[test]
    fn parse_list_form() {
        let instances = parse_queries(
            r#"
- name: a
  queries:
    - sql: "SELECT 1"
  columns:
    - name: x
      usage: COUNTER
  status: disable
- name: b
"#,
        )
        .unwrap();
        assert_eq!(
            instances.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(instances[0].status, Status::Disabled);
    }

    #[test]
    fn parse_empty_document() {
        assert!(parse_queries("").unwrap().is_empty());
        assert!(parse_queries("# nothing here\n").unwrap().is_empty());
    }

    #[test]
    fn parse_bad_version_range() {
        assert!(parse_queries("a:\n  query:\n    - sql: x\n      version: '>=nope'\n").is_err());
    }
}
