#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use database_utils::error::DatabaseError;
use database_utils::redacted::server_label;
use database_utils::{ResultSet, Setting};
use db_exporter::{Connector, Sample, Session};

/// Which of the queries every server answers currently fail
#[derive(Debug, Default)]
struct Failures {
    version: bool,
    databases: bool,
    settings: bool,
}

/// An in-memory database server
#[derive(Clone, Default)]
pub struct MockServer {
    version: Arc<Mutex<String>>,
    databases: Vec<String>,
    settings: Vec<Setting>,
    results: HashMap<String, ResultSet>,
    executed: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<Failures>>,
}

impl MockServer {
    pub fn new(version: &str) -> Self {
        Self {
            version: Arc::new(Mutex::new(version.to_owned())),
            ..Default::default()
        }
    }

    pub fn with_result(mut self, sql: &str, results: ResultSet) -> Self {
        self.results.insert(sql.to_owned(), results);
        self
    }

    pub fn with_databases(mut self, databases: &[&str]) -> Self {
        self.databases = databases.iter().map(|d| d.to_string()).collect();
        self
    }

    pub fn with_setting(mut self, name: &str, value: &str, unit: Option<&str>) -> Self {
        self.settings.push(Setting {
            name: name.to_owned(),
            value: value.to_owned(),
            unit: unit.map(ToOwned::to_owned),
            description: format!("{name} setting"),
        });
        self
    }

    pub fn set_version(&self, version: &str) {
        *self.version.lock().unwrap() = version.to_owned();
    }

    pub fn fail_version(&self, fail: bool) {
        self.failures.lock().unwrap().version = fail;
    }

    pub fn fail_databases(&self, fail: bool) {
        self.failures.lock().unwrap().databases = fail;
    }

    pub fn fail_settings(&self, fail: bool) {
        self.failures.lock().unwrap().settings = fail;
    }

    fn check(&self, failing: impl Fn(&Failures) -> bool, what: &str) -> Result<(), DatabaseError> {
        if failing(&self.failures.lock().unwrap()) {
            return Err(DatabaseError::Io(io::Error::other(format!("{what} query failed"))));
        }
        Ok(())
    }

    /// Every query run against this server so far, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

pub struct MockSession {
    server: MockServer,
}

#[async_trait]
impl Session for MockSession {
    async fn version(&mut self) -> Result<String, DatabaseError> {
        self.server.check(|f| f.version, "version")?;
        Ok(self.server.version.lock().unwrap().clone())
    }

    async fn databases(&mut self) -> Result<Vec<String>, DatabaseError> {
        self.server.check(|f| f.databases, "databases")?;
        Ok(self.server.databases.clone())
    }

    async fn settings(&mut self) -> Result<Vec<Setting>, DatabaseError> {
        self.server.check(|f| f.settings, "settings")?;
        Ok(self.server.settings.clone())
    }

    async fn query(
        &mut self,
        sql: &str,
        _deadline: Option<Duration>,
    ) -> Result<ResultSet, DatabaseError> {
        self.server.executed.lock().unwrap().push(sql.to_owned());
        self.server
            .results
            .get(sql)
            .cloned()
            .ok_or_else(|| DatabaseError::EmptyResult(sql.to_owned()))
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        Ok(())
    }
}

/// Connects to [`MockServer`]s by `host:port`, so every database on a server is reachable.
/// Connecting to any other server is refused.
#[derive(Default)]
pub struct MockConnector {
    servers: HashMap<String, MockServer>,
}

impl MockConnector {
    pub fn with_server(mut self, host_port: &str, server: MockServer) -> Self {
        self.servers.insert(host_port.to_owned(), server);
        self
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &str) -> Result<Box<dyn Session>, DatabaseError> {
        match self.servers.get(&server_label(target)) {
            Some(server) => Ok(Box::new(MockSession {
                server: server.clone(),
            })),
            None => Err(DatabaseError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            ))),
        }
    }
}

pub fn find<'a>(samples: &'a [Sample], name: &str) -> Vec<&'a Sample> {
    samples.iter().filter(|s| s.name == name).collect()
}

pub fn value_of(samples: &[Sample], name: &str) -> f64 {
    match find(samples, name).as_slice() {
        [sample] => sample.value,
        other => panic!("expected exactly one {name} sample, found {}", other.len()),
    }
}
