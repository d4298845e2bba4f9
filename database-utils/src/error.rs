use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when parsing a [`DatabaseURL`](crate::DatabaseURL)
#[derive(Debug, Error)]
pub enum DatabaseURLParseError {
    #[error(
        "Invalid database URL format; database URLs must start with either mysql:// or \
         postgresql://"
    )]
    InvalidFormat,

    #[error(transparent)]
    MySQL(#[from] mysql_async::UrlError),

    #[error(transparent)]
    PostgreSQL(#[from] tokio_postgres::Error),
}

/// Errors returned while connecting to, or running queries against, a target database
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Error parsing database URL: {0}")]
    URLParse(#[from] DatabaseURLParseError),

    #[error("MySQL error: {0}")]
    MySQL(#[from] mysql_async::Error),

    #[error("PostgreSQL error: {0}")]
    PostgreSQL(#[from] tokio_postgres::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Query did not complete within {0:?}")]
    Timeout(Duration),

    #[error("Query `{0}` returned no rows")]
    EmptyResult(String),
}
