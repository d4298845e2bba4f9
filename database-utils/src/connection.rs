use std::future::Future;
use std::time::Duration;

use mysql_async::prelude::Queryable;
use tokio::task::JoinHandle;
use tokio_postgres::SimpleQueryMessage;
use tracing::debug;
use {mysql_async as mysql, tokio_postgres as pgsql};

use crate::error::DatabaseError;
use crate::{ResultSet, Setting, Value};

const VERSION_QUERY: &str = "SELECT version()";

const PG_DATABASES_QUERY: &str =
    "SELECT datname FROM pg_database WHERE datallowconn = true AND datistemplate = false";
const MYSQL_DATABASES_QUERY: &str = "SHOW DATABASES";

const PG_SETTINGS_QUERY: &str = "SELECT name, setting, COALESCE(unit, ''), short_desc \
                                 FROM pg_settings WHERE vartype IN ('bool', 'integer', 'real')";
const MYSQL_SETTINGS_QUERY: &str = "SHOW GLOBAL VARIABLES";

/// An enum wrapper around either a MySQL or PostgreSQL connection.
pub enum DatabaseConnection {
    /// A MySQL database connection.
    MySQL(mysql_async::Conn),
    /// A PostgreSQL database connection, along with the handle of the task driving it.
    PostgreSQL(
        tokio_postgres::Client,
        JoinHandle<Result<(), tokio_postgres::Error>>,
    ),
}

async fn with_deadline<F, T>(deadline: Option<Duration>, fut: F) -> Result<T, DatabaseError>
where
    F: Future<Output = Result<T, DatabaseError>>,
{
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| DatabaseError::Timeout(deadline))?,
        None => fut.await,
    }
}

async fn mysql_results(conn: &mut mysql::Conn, query: &str) -> Result<ResultSet, DatabaseError> {
    let mut results = conn.query_iter(query).await?;
    let columns: Vec<String> = results
        .columns()
        .map(|columns| {
            columns
                .iter()
                .map(|c| c.name_str().into_owned())
                .collect()
        })
        .unwrap_or_default();
    let rows = results
        .collect::<mysql::Row>()
        .await?
        .into_iter()
        .map(|mut row| {
            (0..row.len())
                .map(|c| row.take::<mysql::Value, _>(c).map(Value::from).unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    // Any further result sets (multi-statement queries) are discarded
    results.drop_result().await?;
    Ok(ResultSet::new(columns, rows))
}

async fn pgsql_results(client: &pgsql::Client, query: &str) -> Result<ResultSet, DatabaseError> {
    let mut columns: Option<Vec<String>> = None;
    let mut rows = Vec::new();
    for message in client.simple_query(query).await? {
        if let SimpleQueryMessage::Row(row) = message {
            // Only the first statement that returns rows is used
            let names = columns.get_or_insert_with(|| {
                row.columns().iter().map(|c| c.name().to_owned()).collect()
            });
            if names.len() != row.len() {
                break;
            }
            rows.push(
                (0..row.len())
                    .map(|c| row.try_get(c).map(Value::from))
                    .collect::<Result<Vec<_>, _>>()?,
            );
        }
    }
    Ok(ResultSet::new(columns.unwrap_or_default(), rows))
}

impl DatabaseConnection {
    /// Runs `query` and returns its rows, failing with [`DatabaseError::Timeout`] if `deadline` is
    /// set and elapses first.
    pub async fn query(
        &mut self,
        query: &str,
        deadline: Option<Duration>,
    ) -> Result<ResultSet, DatabaseError> {
        match self {
            DatabaseConnection::MySQL(conn) => {
                with_deadline(deadline, mysql_results(conn, query)).await
            }
            DatabaseConnection::PostgreSQL(client, _jh) => {
                with_deadline(deadline, pgsql_results(client, query)).await
            }
        }
    }

    /// Returns the server's full version string
    pub async fn version(&mut self) -> Result<String, DatabaseError> {
        let results = self.query(VERSION_QUERY, None).await?;
        match results.first_value() {
            Some(value) if !value.is_null() => Ok(value.to_string()),
            _ => Err(DatabaseError::EmptyResult(VERSION_QUERY.to_owned())),
        }
    }

    /// Lists the names of the databases reachable through this connection
    pub async fn databases(&mut self) -> Result<Vec<String>, DatabaseError> {
        let query = match self {
            DatabaseConnection::MySQL(_) => MYSQL_DATABASES_QUERY,
            DatabaseConnection::PostgreSQL(..) => PG_DATABASES_QUERY,
        };
        let results = self.query(query, None).await?;
        Ok(results
            .rows()
            .filter_map(|row| row.get_index(0).filter(|v| !v.is_null()))
            .map(|v| v.to_string())
            .collect())
    }

    /// Lists the server's configuration settings that have a numeric or boolean value
    pub async fn settings(&mut self) -> Result<Vec<Setting>, DatabaseError> {
        let is_mysql = matches!(self, DatabaseConnection::MySQL(_));
        let query = if is_mysql {
            MYSQL_SETTINGS_QUERY
        } else {
            PG_SETTINGS_QUERY
        };
        let results = self.query(query, None).await?;
        let settings = results
            .rows()
            .filter_map(|row| {
                let text = |idx| row.get_index(idx).map(|v: &Value| v.to_string());
                let setting = Setting {
                    name: text(0)?,
                    value: text(1)?,
                    unit: text(2).filter(|u| !u.is_empty()),
                    description: text(3).unwrap_or_default(),
                };
                // SHOW GLOBAL VARIABLES isn't typed, so drop anything that isn't a number or flag
                if is_mysql && Value::from(setting.value.as_str()).as_f64().is_none() {
                    return None;
                }
                Some(setting)
            })
            .collect();
        Ok(settings)
    }

    /// Closes the connection, waiting for the server to acknowledge if it supports that
    pub async fn close(self) -> Result<(), DatabaseError> {
        match self {
            DatabaseConnection::MySQL(conn) => Ok(conn.disconnect().await?),
            DatabaseConnection::PostgreSQL(client, jh) => {
                drop(client);
                if let Ok(Err(error)) = jh.await {
                    debug!(%error, "PostgreSQL connection closed with error");
                }
                Ok(())
            }
        }
    }

    /// Returns true if the connection is known to have been closed, eg by the server going away.
    /// MySQL connections only find out on their next query.
    pub fn is_closed(&self) -> bool {
        match self {
            DatabaseConnection::MySQL(_) => false,
            DatabaseConnection::PostgreSQL(client, _jh) => client.is_closed(),
        }
    }
}
