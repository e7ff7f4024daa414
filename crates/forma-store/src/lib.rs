//! The repository: executes planned reads and transactional writes over the
//! dual storage model, on a pool of Postgres connections.

use forma_models::{CoerceError, RowId, SchemaId};
use forma_registry::Registry;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod bootstrap;
mod read;
mod records;
mod search;
mod write;

pub use bootstrap::{ensure_tables, load_registry};
pub use search::SearchHit;
pub use write::{BatchFailure, BatchOutcome};

/// The failure taxonomy surfaced to callers. Wrapper layers encode these
/// however they like; messages already name the offending attribute path and
/// operator where one exists.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unknown schema {0:?}")]
    SchemaUnknown(String),
    #[error("unknown attribute {path:?}")]
    AttributeUnknown { path: String },
    #[error("attribute {path:?}: {source}")]
    TypeCoercion {
        path: String,
        #[source]
        source: CoerceError,
    },
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
    #[error("record {row_id} not found in schema {schema_id}")]
    NotFound { schema_id: SchemaId, row_id: RowId },
    #[error("record {row_id} already exists in schema {schema_id}")]
    AlreadyExists { schema_id: SchemaId, row_id: RowId },
    #[error("concurrent write conflict")]
    Conflict(#[source] sqlx::Error),
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Internal(anyhow::Error),
}

impl From<forma_registry::Error> for Error {
    fn from(err: forma_registry::Error) -> Self {
        use forma_registry::Error as E;
        match err {
            E::SchemaUnknown(name) => Error::SchemaUnknown(name),
            E::SchemaIdUnknown(id) => Error::SchemaUnknown(id.to_string()),
            other @ (E::AttributeIdConflict { .. }
            | E::AttributeIdReused { .. }
            | E::DuplicatePath { .. }
            | E::ColumnReused { .. }
            | E::BoundInsideArray { .. }
            | E::IncompatibleBinding { .. }
            | E::DuplicateSchemaName(_)
            | E::DuplicateSchemaId(_)) => Error::ConstraintViolation(other.to_string()),
            other => Error::Internal(anyhow::Error::new(other)),
        }
    }
}

impl From<forma_transform::Error> for Error {
    fn from(err: forma_transform::Error) -> Self {
        use forma_transform::Error as E;
        match err {
            E::UnknownAttribute { path } => Error::AttributeUnknown { path },
            E::Coerce { path, err } => Error::TypeCoercion { path, source: err },
            other @ (E::BoundUnderArray { .. } | E::Column { .. }) => {
                Error::ConstraintViolation(other.to_string())
            }
            E::RootNotObject => Error::BadRequest(E::RootNotObject.to_string()),
        }
    }
}

impl From<forma_query::Error> for Error {
    fn from(err: forma_query::Error) -> Self {
        use forma_query::Error as E;
        match err {
            E::UnknownAttribute { path } => Error::AttributeUnknown { path },
            E::Literal { path, err } => Error::TypeCoercion { path, source: err },
            other => Error::BadRequest(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => Error::ResourceExhausted(
                "timed out waiting for a database connection".to_string(),
            ),
            sqlx::Error::Database(db) => {
                let code = db.code().map(|code| code.into_owned());
                match code.as_deref() {
                    // serialization_failure and deadlock_detected.
                    Some("40001") | Some("40P01") => Error::Conflict(sqlx::Error::Database(db)),
                    _ => Error::Internal(anyhow::Error::new(sqlx::Error::Database(db))),
                }
            }
            other => Error::Internal(anyhow::Error::new(other)),
        }
    }
}

/// Physical table names, overridable per deployment.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub entity: String,
    pub eav: String,
    pub registry: String,
    pub change_log: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            entity: "entity_main".to_string(),
            eav: "eav_data".to_string(),
            registry: "schema_registry".to_string(),
            change_log: "change_log".to_string(),
        }
    }
}

impl TableNames {
    pub fn query_tables(&self) -> forma_query::Tables {
        forma_query::Tables {
            entity: self.entity.clone(),
            eav: self.eav.clone(),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    #[serde(default = "Config::default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "Config::default_acquire_timeout", with = "humantime_serde")]
    pub acquire_timeout: Duration,
    #[serde(default)]
    pub tables: TableNames,
    #[serde(default = "Config::default_max_page_size")]
    pub max_page_size: u32,
    #[serde(default)]
    pub schema_dir: Option<std::path::PathBuf>,
}

impl Config {
    fn default_max_connections() -> u32 {
        8
    }
    fn default_acquire_timeout() -> Duration {
        Duration::from_secs(5)
    }
    fn default_max_page_size() -> u32 {
        100
    }

    /// Environment bootstrap: `DATABASE_URL`, `SCHEMA_DIR`, and
    /// `FORMA_*_TABLE` name overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let database_url =
            std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let mut tables = TableNames::default();
        if let Ok(name) = std::env::var("FORMA_ENTITY_TABLE") {
            tables.entity = name;
        }
        if let Ok(name) = std::env::var("FORMA_EAV_TABLE") {
            tables.eav = name;
        }
        if let Ok(name) = std::env::var("FORMA_REGISTRY_TABLE") {
            tables.registry = name;
        }
        if let Ok(name) = std::env::var("FORMA_CHANGE_LOG_TABLE") {
            tables.change_log = name;
        }

        Ok(Self {
            database_url,
            max_connections: Self::default_max_connections(),
            acquire_timeout: Self::default_acquire_timeout(),
            tables,
            max_page_size: Self::default_max_page_size(),
            schema_dir: std::env::var_os("SCHEMA_DIR").map(Into::into),
        })
    }
}

/// Store is the repository handle: a connection pool, the registry snapshot
/// handle, and the physical table names. One instance serves the whole
/// process; each operation acquires one pooled connection for its duration.
pub struct Store {
    pool: sqlx::PgPool,
    registry: Arc<Registry>,
    tables: TableNames,
    max_page_size: u32,
}

impl Store {
    pub async fn connect(config: &Config, registry: Arc<Registry>) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await?;
        Ok(Self::new(pool, registry, config))
    }

    pub fn new(pool: sqlx::PgPool, registry: Arc<Registry>, config: &Config) -> Self {
        Self {
            pool,
            registry,
            tables: config.tables.clone(),
            max_page_size: config.max_page_size,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    pub(crate) fn tables(&self) -> &TableNames {
        &self.tables
    }

    pub(crate) fn max_page_size(&self) -> u32 {
        self.max_page_size
    }
}

// Race an operation against its cancellation handle. The dropped future
// aborts the in-flight statement and rolls back its transaction.
pub(crate) async fn guarded<T, F>(cancel: &CancellationToken, operation: F) -> Result<T, Error>
where
    F: std::future::Future<Output = Result<T, Error>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        out = operation => out,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn table_names_default_to_the_physical_contract() {
        let names = TableNames::default();
        assert_eq!(names.entity, "entity_main");
        assert_eq!(names.eav, "eav_data");
        assert_eq!(names.registry, "schema_registry");
        assert_eq!(names.change_log, "change_log");
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"database_url": "postgresql://localhost/forma", "acquire_timeout": "2s"}"#,
        )
        .unwrap();
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.acquire_timeout, Duration::from_secs(2));
        assert_eq!(config.max_page_size, 100);
        assert_eq!(config.tables, TableNames::default());
    }

    #[test]
    fn query_errors_map_to_the_taxonomy() {
        let err: Error = forma_query::Error::UnknownAttribute {
            path: "ghost".to_string(),
        }
        .into();
        assert!(matches!(err, Error::AttributeUnknown { path } if path == "ghost"));

        let err: Error = forma_query::Error::EmptyComposite.into();
        assert!(matches!(err, Error::BadRequest(_)));

        let err: Error = forma_transform::Error::RootNotObject.into();
        assert!(matches!(err, Error::BadRequest(_)));

        let err: Error = forma_registry::Error::SchemaUnknown("x".to_string()).into();
        assert!(matches!(err, Error::SchemaUnknown(_)));

        let err: Error = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, Error::ResourceExhausted(_)));
    }

    #[tokio::test]
    async fn cancellation_wins_the_race() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = guarded(&cancel, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(outcome, Err(Error::Cancelled)));
    }
}
