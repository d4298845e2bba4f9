//! Connections to the databases an exporter scrapes.
//!
//! This crate is the execution layer: it knows how to open a connection from a URL, run a query
//! under an optional deadline, and turn whatever the driver returns into a typed [`ResultSet`]. It
//! knows nothing about metrics.

use std::str::FromStr;

use mysql_async::OptsBuilder;
use {mysql_async as mysql, tokio_postgres as pgsql};

use crate::error::{DatabaseError, DatabaseURLParseError};

mod connection;
pub mod error;
pub mod redacted;
mod results;
mod tls;

pub use connection::DatabaseConnection;
pub use results::{ResultSet, Row, Setting, Value};
pub use tls::TlsOptions;

/// A parsed connection target, from which a [`DatabaseConnection`] is opened with
/// [`connect`](Self::connect)
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum DatabaseURL {
    MySQL(mysql_async::Opts),
    PostgreSQL(pgsql::Config),
}

/// Parses URLs starting with either `"mysql://"`, `"postgresql://"` or `"postgres://"`.
///
/// # Examples
///
/// ```
/// use database_utils::DatabaseURL;
///
/// let url: DatabaseURL = "postgres://postgres@localhost:5432/postgres".parse().unwrap();
/// assert!(matches!(url, DatabaseURL::PostgreSQL(_)));
/// assert!("sqlite://local.db".parse::<DatabaseURL>().is_err());
/// ```
impl FromStr for DatabaseURL {
    type Err = DatabaseURLParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with("mysql://") {
            Ok(Self::MySQL(mysql::Opts::from_url(s)?))
        } else if s.starts_with("postgresql://") || s.starts_with("postgres://") {
            Ok(Self::PostgreSQL(pgsql::Config::from_str(s)?))
        } else {
            Err(DatabaseURLParseError::InvalidFormat)
        }
    }
}

impl DatabaseURL {
    /// Create a new [`DatabaseConnection`] by connecting to the database at this database URL
    pub async fn connect(&self, tls: &TlsOptions) -> Result<DatabaseConnection, DatabaseError> {
        match self {
            DatabaseURL::MySQL(opts) => {
                let opts = OptsBuilder::from_opts(opts.clone())
                    .ssl_opts(tls.mysql_ssl_opts(opts.ssl_opts()));
                Ok(DatabaseConnection::MySQL(mysql::Conn::new(opts).await?))
            }
            DatabaseURL::PostgreSQL(config) => {
                let (client, connection) = config.connect(tls.postgres_connector()?).await?;
                let connection_handle = tokio::spawn(connection);
                Ok(DatabaseConnection::PostgreSQL(client, connection_handle))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mysql() {
        let url: DatabaseURL = "mysql://root:password@db:3306/mysql".parse().unwrap();
        let DatabaseURL::MySQL(opts) = url else {
            panic!("expected a MySQL URL");
        };
        assert_eq!(opts.ip_or_hostname(), "db");
        assert_eq!(opts.db_name(), Some("mysql"));
    }

    #[test]
    fn parse_postgres_either_scheme() {
        for target in ["postgres://postgres@localhost/app", "postgresql://localhost/app"] {
            let url: DatabaseURL = target.parse().unwrap();
            let DatabaseURL::PostgreSQL(config) = url else {
                panic!("expected a PostgreSQL URL for {target}");
            };
            assert_eq!(config.get_dbname(), Some("app"));
        }
    }

    #[test]
    fn invalid_scheme() {
        assert!(matches!(
            "sqlite://foo".parse::<DatabaseURL>(),
            Err(DatabaseURLParseError::InvalidFormat)
        ));
    }
}
