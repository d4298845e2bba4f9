//! The seam between the exporter and the databases it scrapes

use std::time::Duration;

use async_trait::async_trait;
use database_utils::error::DatabaseError;
use database_utils::{DatabaseConnection, DatabaseURL, ResultSet, Setting, TlsOptions};

/// An open connection to one target
#[async_trait]
pub trait Session: Send {
    /// The server's full version string
    async fn version(&mut self) -> Result<String, DatabaseError>;

    /// Names of the databases on the same server that can be connected to
    async fn databases(&mut self) -> Result<Vec<String>, DatabaseError>;

    /// Numeric and boolean server settings
    async fn settings(&mut self) -> Result<Vec<Setting>, DatabaseError>;

    /// Runs `sql`, failing if `deadline` is set and elapses first
    async fn query(
        &mut self,
        sql: &str,
        deadline: Option<Duration>,
    ) -> Result<ResultSet, DatabaseError>;

    /// Returns true if the session can no longer be used and must be replaced
    fn is_closed(&self) -> bool {
        false
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// Opens [`Session`]s to targets
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &str) -> Result<Box<dyn Session>, DatabaseError>;
}

/// Connects to MySQL or PostgreSQL targets given as URLs
#[derive(Debug, Clone, Default)]
pub struct DatabaseConnector {
    tls: TlsOptions,
}

impl DatabaseConnector {
    pub fn new(tls: TlsOptions) -> Self {
        Self { tls }
    }
}

#[async_trait]
impl Connector for DatabaseConnector {
    async fn connect(&self, target: &str) -> Result<Box<dyn Session>, DatabaseError> {
        let url: DatabaseURL = target.parse()?;
        let connection = url.connect(&self.tls).await?;
        Ok(Box::new(connection))
    }
}

#[async_trait]
impl Session for DatabaseConnection {
    async fn version(&mut self) -> Result<String, DatabaseError> {
        DatabaseConnection::version(self).await
    }

    async fn databases(&mut self) -> Result<Vec<String>, DatabaseError> {
        DatabaseConnection::databases(self).await
    }

    async fn settings(&mut self) -> Result<Vec<Setting>, DatabaseError> {
        DatabaseConnection::settings(self).await
    }

    async fn query(
        &mut self,
        sql: &str,
        deadline: Option<Duration>,
    ) -> Result<ResultSet, DatabaseError> {
        DatabaseConnection::query(self, sql, deadline).await
    }

    fn is_closed(&self) -> bool {
        DatabaseConnection::is_closed(self)
    }

    async fn close(self: Box<Self>) -> Result<(), DatabaseError> {
        DatabaseConnection::close(*self).await
    }
}
