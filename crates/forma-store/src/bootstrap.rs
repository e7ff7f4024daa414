//! Deployment bootstrap: create the physical tables, and build the registry
//! from the persisted `(schema_name, schema_id)` mapping plus the schema
//! documents in `SCHEMA_DIR`.

use crate::{Error, TableNames};
use forma_models::{ColumnFamily, HotColumn, SchemaId};
use forma_registry::{AttributeCache, Registry, Snapshot};
use sqlx::PgPool;
use std::path::Path;

fn family_sql_type(family: ColumnFamily) -> &'static str {
    match family {
        ColumnFamily::Text => "TEXT",
        ColumnFamily::Smallint => "SMALLINT",
        ColumnFamily::Integer => "INTEGER",
        ColumnFamily::Bigint => "BIGINT",
        ColumnFamily::Double => "DOUBLE PRECISION",
        ColumnFamily::Uuid => "UUID",
    }
}

/// Create the physical tables and the EAV partial indexes if they do not
/// exist yet. Safe to run on every startup.
pub async fn ensure_tables(pool: &PgPool, tables: &TableNames) -> Result<(), Error> {
    let hot_columns = HotColumn::ALL
        .iter()
        .map(|c| format!("{} {}", c.name(), family_sql_type(c.family())))
        .collect::<Vec<_>>()
        .join(", ");

    let statements = vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} \
             (schema_name TEXT PRIMARY KEY, schema_id SMALLINT NOT NULL UNIQUE)",
            tables.registry
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} \
             (schema_id SMALLINT NOT NULL, row_id UUID NOT NULL, \
             ltbase_created_at BIGINT NOT NULL, ltbase_updated_at BIGINT NOT NULL, \
             ltbase_deleted_at BIGINT, {hot_columns}, PRIMARY KEY (schema_id, row_id))",
            tables.entity
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} \
             (schema_id SMALLINT NOT NULL, row_id UUID NOT NULL, attr_id SMALLINT NOT NULL, \
             array_indices TEXT NOT NULL DEFAULT '', value_text TEXT, \
             value_numeric DOUBLE PRECISION, \
             PRIMARY KEY (schema_id, row_id, attr_id, array_indices))",
            tables.eav
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} \
             (schema_id SMALLINT NOT NULL, row_id UUID NOT NULL, changed_at BIGINT NOT NULL, \
             deleted_at BIGINT, flushed_at BIGINT)",
            tables.change_log
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {eav}_numeric_idx ON {eav} \
             (schema_id, attr_id, value_numeric, row_id) WHERE value_numeric IS NOT NULL",
            eav = tables.eav
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {eav}_text_idx ON {eav} \
             (schema_id, attr_id, value_text, row_id) WHERE value_text IS NOT NULL",
            eav = tables.eav
        ),
    ];

    for statement in statements {
        sqlx::query(&statement).execute(pool).await?;
    }
    Ok(())
}

/// Build the registry: `(schema_name, schema_id)` pairs come from the
/// persisted mapping table, schema documents and allocation ledgers from the
/// schema directory.
pub async fn load_registry(
    pool: &PgPool,
    tables: &TableNames,
    schema_dir: &Path,
) -> Result<Registry, Error> {
    let sql = format!(
        "SELECT schema_name, schema_id FROM {} ORDER BY schema_name",
        tables.registry
    );
    let rows: Vec<(String, SchemaId)> = sqlx::query_as(&sql).fetch_all(pool).await?;

    let mut snapshot = Snapshot::default();
    for (name, schema_id) in rows {
        let (doc, allocation) = forma_registry::fs::load_documents(schema_dir, &name)?;
        if doc.name != name {
            return Err(Error::ConstraintViolation(format!(
                "schema document for {name:?} names itself {:?}",
                doc.name
            )));
        }
        snapshot.insert(AttributeCache::build(schema_id, &doc, &allocation)?)?;
    }

    tracing::info!(schemas = snapshot.len(), "registry loaded");
    Ok(Registry::new(snapshot))
}
