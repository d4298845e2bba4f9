//! The query instances every server is scraped with unless configuration overrides them

use crate::catalog::MetricCatalog;
use crate::column::Column;
use crate::query::{QueryDefinition, QueryInstance};
use crate::version::VersionRange;

#[allow(clippy::unwrap_used)] // only called with literal ranges covered by tests
fn range(s: &str) -> VersionRange {
    s.parse().unwrap()
}

fn pg_database() -> QueryInstance {
    QueryInstance::new("pg_database")
        .with_description("Disk space used by each database")
        .with_query(QueryDefinition::new(
            "SELECT datname, pg_database_size(datname) AS size_bytes \
             FROM pg_database WHERE datallowconn = true AND datistemplate = false",
        ))
        .with_column(Column::label("datname", "Name of the database"))
        .with_column(Column::gauge("size_bytes", "Disk space used by the database"))
        .with_ttl(60.0)
        .with_timeout(5.0)
}

fn pg_stat_database() -> QueryInstance {
    QueryInstance::new("pg_stat_database")
        .with_description("Per database activity statistics")
        .with_query(QueryDefinition::new(
            "SELECT datname, numbackends, xact_commit, xact_rollback, blks_read, blks_hit, \
             tup_returned, tup_fetched, tup_inserted, tup_updated, tup_deleted, deadlocks \
             FROM pg_stat_database WHERE datname IS NOT NULL",
        ))
        .with_column(Column::label("datname", "Name of the database"))
        .with_column(Column::gauge(
            "numbackends",
            "Number of backends currently connected to this database",
        ))
        .with_column(Column::counter(
            "xact_commit",
            "Number of transactions in this database that have been committed",
        ))
        .with_column(Column::counter(
            "xact_rollback",
            "Number of transactions in this database that have been rolled back",
        ))
        .with_column(Column::counter(
            "blks_read",
            "Number of disk blocks read in this database",
        ))
        .with_column(Column::counter(
            "blks_hit",
            "Number of times disk blocks were found already in the buffer cache",
        ))
        .with_column(Column::counter(
            "tup_returned",
            "Number of rows returned by queries in this database",
        ))
        .with_column(Column::counter(
            "tup_fetched",
            "Number of rows fetched by queries in this database",
        ))
        .with_column(Column::counter(
            "tup_inserted",
            "Number of rows inserted by queries in this database",
        ))
        .with_column(Column::counter(
            "tup_updated",
            "Number of rows updated by queries in this database",
        ))
        .with_column(Column::counter(
            "tup_deleted",
            "Number of rows deleted by queries in this database",
        ))
        .with_column(Column::counter(
            "deadlocks",
            "Number of deadlocks detected in this database",
        ))
        .with_timeout(5.0)
}

fn pg_locks() -> QueryInstance {
    QueryInstance::new("pg_locks")
        .with_description("Locks held, by database and lock mode")
        .with_query(QueryDefinition::new(
            "SELECT pg_database.datname, pg_locks.mode, count(*) AS count \
             FROM pg_locks JOIN pg_database ON pg_locks.database = pg_database.oid \
             GROUP BY pg_database.datname, pg_locks.mode",
        ))
        .with_column(Column::label("datname", "Name of the database"))
        .with_column(Column::label("mode", "Type of lock"))
        .with_column(Column::gauge("count", "Number of locks"))
        .with_timeout(5.0)
}

fn pg_stat_activity() -> QueryInstance {
    QueryInstance::new("pg_stat_activity")
        .with_description("Connections by database and state")
        .with_query(QueryDefinition::new(
            "SELECT datname, state, count(*) AS count, \
             COALESCE(max(EXTRACT(EPOCH FROM now() - xact_start)), 0) AS max_tx_duration \
             FROM pg_stat_activity WHERE datname IS NOT NULL GROUP BY datname, state",
        ))
        .with_column(Column::label("datname", "Name of the database"))
        .with_column(Column::label("state", "Connection state"))
        .with_column(Column::gauge("count", "Number of connections in this state"))
        .with_column(Column::gauge(
            "max_tx_duration",
            "Age in seconds of the oldest transaction in this state",
        ))
        .with_timeout(5.0)
}

fn pg_stat_replication() -> QueryInstance {
    QueryInstance::new("pg_stat_replication")
        .with_description("Replication lag of each standby, as seen from the primary")
        .with_query(
            QueryDefinition::new(
                "SELECT application_name, client_addr::text AS client_addr, state, \
                 pg_wal_lsn_diff(pg_current_wal_lsn(), replay_lsn) AS lag_bytes \
                 FROM pg_stat_replication",
            )
            .with_versions(range(">=10.0.0")),
        )
        .with_query(
            QueryDefinition::new(
                "SELECT application_name, client_addr::text AS client_addr, state, \
                 pg_xlog_location_diff(pg_current_xlog_location(), replay_location) \
                 AS lag_bytes FROM pg_stat_replication",
            )
            .with_versions(range("<10.0.0")),
        )
        .with_column(Column::label("application_name", "Name of the standby"))
        .with_column(Column::label("client_addr", "Address of the standby"))
        .with_column(Column::label("state", "Replication state"))
        .with_column(Column::gauge(
            "lag_bytes",
            "Bytes of WAL the standby has yet to replay",
        ))
        .with_timeout(5.0)
}

fn pg_postmaster() -> QueryInstance {
    QueryInstance::new("pg_postmaster")
        .with_description("Server process information")
        .with_query(QueryDefinition::new(
            "SELECT EXTRACT(EPOCH FROM pg_postmaster_start_time()) AS start_time_seconds",
        ))
        .with_column(Column::gauge(
            "start_time_seconds",
            "Time at which the server started, in seconds since the epoch",
        ))
        .with_ttl(300.0)
        .with_timeout(5.0)
}

/// Builds the built-in catalog
pub fn default_catalog() -> MetricCatalog {
    [
        pg_database(),
        pg_stat_database(),
        pg_locks(),
        pg_stat_activity(),
        pg_stat_replication(),
        pg_postmaster(),
    ]
    .into_iter()
    .collect()
}

#[cfg(test)]
mod tests {
    use semver::Version;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let catalog = default_catalog();
        assert_eq!(catalog.len(), 6);
        for instance in catalog.iter() {
            instance.check().unwrap();
            assert!(!instance.queries.is_empty(), "{} has no queries", instance.name);
            assert!(
                instance.columns.iter().any(|c| c.usage.is_metric()),
                "{} has no metric columns",
                instance.name
            );
        }
    }

    #[test]
    fn replication_query_depends_on_version() {
        let catalog = default_catalog();
        let replication = catalog.get("pg_stat_replication").unwrap();
        let new = replication.select_query(&Version::new(14, 2, 0)).unwrap();
        assert!(new.sql.contains("pg_wal_lsn_diff"));
        let old = replication.select_query(&Version::new(9, 6, 0)).unwrap();
        assert!(old.sql.contains("pg_xlog_location_diff"));
        // openGauss reports its own version
        let gauss = replication.select_query(&Version::new(2, 0, 0)).unwrap();
        assert!(gauss.sql.contains("pg_xlog_location_diff"));
    }
}
