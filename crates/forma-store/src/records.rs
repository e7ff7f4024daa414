//! Low-level row operations over the physical tables. Every function takes
//! the executor it should run on, so callers decide the transaction scope.

use crate::TableNames;
use forma_models::{ColumnFamily, EavTuple, HotColumn, HotValue, HotValues, RowId, SchemaId};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, Postgres, Row};

pub(crate) fn bind_hot<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: HotValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        HotValue::Text(v) => query.bind(v),
        HotValue::Smallint(v) => query.bind(v),
        HotValue::Integer(v) => query.bind(v),
        HotValue::Bigint(v) => query.bind(v),
        HotValue::Double(v) => query.bind(v),
        HotValue::Uuid(v) => query.bind(v),
    }
}

/// Insert the hot row of a new record. A duplicate `(schema_id, row_id)`
/// surfaces as the database's unique-violation error, mapped by the caller.
pub(crate) async fn insert_entity(
    conn: &mut PgConnection,
    tables: &TableNames,
    schema_id: SchemaId,
    row_id: RowId,
    now_ms: i64,
    hot: &HotValues,
) -> Result<(), sqlx::Error> {
    let mut columns =
        "schema_id, row_id, ltbase_created_at, ltbase_updated_at".to_string();
    let mut placeholders = "$1, $2, $3, $4".to_string();
    let cells: Vec<(HotColumn, HotValue)> = hot.iter().collect();
    for (position, (column, _)) in cells.iter().enumerate() {
        columns.push_str(&format!(", {}", column.name()));
        placeholders.push_str(&format!(", ${}", position + 5));
    }

    let sql = format!(
        "INSERT INTO {} ({columns}) VALUES ({placeholders})",
        tables.entity
    );
    let mut query = sqlx::query(&sql)
        .bind(schema_id)
        .bind(row_id)
        .bind(now_ms)
        .bind(now_ms);
    for (_, value) in cells {
        query = bind_hot(query, value);
    }
    query.execute(conn).await?;
    Ok(())
}

/// Update the hot row: exactly the provided cells are SET, others are left
/// untouched. Returns the row's `ltbase_created_at`, or None when the row is
/// missing or soft-deleted.
pub(crate) async fn update_entity(
    conn: &mut PgConnection,
    tables: &TableNames,
    schema_id: SchemaId,
    row_id: RowId,
    now_ms: i64,
    hot: &HotValues,
) -> Result<Option<i64>, sqlx::Error> {
    let mut sets = "ltbase_updated_at = $3".to_string();
    let cells: Vec<(HotColumn, HotValue)> = hot.iter().collect();
    for (position, (column, _)) in cells.iter().enumerate() {
        sets.push_str(&format!(", {} = ${}", column.name(), position + 4));
    }

    let sql = format!(
        "UPDATE {} SET {sets} WHERE schema_id = $1 AND row_id = $2 \
         AND ltbase_deleted_at IS NULL RETURNING ltbase_created_at",
        tables.entity
    );
    let mut query = sqlx::query(&sql).bind(schema_id).bind(row_id).bind(now_ms);
    for (_, value) in cells {
        query = bind_hot(query, value);
    }
    let row = query.fetch_optional(conn).await?;
    row.map(|r| r.try_get::<i64, _>("ltbase_created_at"))
        .transpose()
}

/// Soft-delete the hot row. Returns false when there was nothing to delete.
pub(crate) async fn soft_delete_entity(
    conn: &mut PgConnection,
    tables: &TableNames,
    schema_id: SchemaId,
    row_id: RowId,
    now_ms: i64,
) -> Result<bool, sqlx::Error> {
    let sql = format!(
        "UPDATE {} SET ltbase_deleted_at = $3, ltbase_updated_at = $3 \
         WHERE schema_id = $1 AND row_id = $2 AND ltbase_deleted_at IS NULL",
        tables.entity
    );
    let done = sqlx::query(&sql)
        .bind(schema_id)
        .bind(row_id)
        .bind(now_ms)
        .execute(conn)
        .await?;
    Ok(done.rows_affected() > 0)
}

pub(crate) async fn delete_eav(
    conn: &mut PgConnection,
    tables: &TableNames,
    schema_id: SchemaId,
    row_id: RowId,
) -> Result<u64, sqlx::Error> {
    let sql = format!(
        "DELETE FROM {} WHERE schema_id = $1 AND row_id = $2",
        tables.eav
    );
    let done = sqlx::query(&sql)
        .bind(schema_id)
        .bind(row_id)
        .execute(conn)
        .await?;
    Ok(done.rows_affected())
}

/// Bulk-insert EAV tuples through UNNEST over parallel arrays, one round
/// trip regardless of tuple count.
pub(crate) async fn insert_eav(
    conn: &mut PgConnection,
    tables: &TableNames,
    schema_id: SchemaId,
    row_id: RowId,
    tuples: &[EavTuple],
) -> Result<(), sqlx::Error> {
    if tuples.is_empty() {
        return Ok(());
    }

    let mut attr_ids = Vec::with_capacity(tuples.len());
    let mut indices = Vec::with_capacity(tuples.len());
    let mut texts = Vec::with_capacity(tuples.len());
    let mut numerics = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        attr_ids.push(tuple.attr_id.as_i16());
        indices.push(tuple.array_indices.clone());
        texts.push(tuple.value_text.clone());
        numerics.push(tuple.value_numeric);
    }

    let sql = format!(
        "INSERT INTO {} (schema_id, row_id, attr_id, array_indices, value_text, value_numeric) \
         SELECT $1, $2, u.attr_id, u.array_indices, u.value_text, u.value_numeric \
         FROM UNNEST($3::smallint[], $4::text[], $5::text[], $6::float8[]) \
         AS u(attr_id, array_indices, value_text, value_numeric)",
        tables.eav
    );
    sqlx::query(&sql)
        .bind(schema_id)
        .bind(row_id)
        .bind(attr_ids)
        .bind(indices)
        .bind(texts)
        .bind(numerics)
        .execute(conn)
        .await?;
    Ok(())
}

/// Append one change-log entry. The exporter consumes and stamps
/// `flushed_at`; the core only ever appends.
pub(crate) async fn append_change_log(
    conn: &mut PgConnection,
    tables: &TableNames,
    schema_id: SchemaId,
    row_id: RowId,
    changed_at: i64,
    deleted_at: Option<i64>,
) -> Result<(), sqlx::Error> {
    let sql = format!(
        "INSERT INTO {} (schema_id, row_id, changed_at, deleted_at) VALUES ($1, $2, $3, $4)",
        tables.change_log
    );
    sqlx::query(&sql)
        .bind(schema_id)
        .bind(row_id)
        .bind(changed_at)
        .bind(deleted_at)
        .execute(conn)
        .await?;
    Ok(())
}

pub(crate) struct EntityRow {
    pub created_at: i64,
    pub updated_at: i64,
    pub hot: HotValues,
}

pub(crate) async fn fetch_entity(
    exec: impl sqlx::Executor<'_, Database = Postgres>,
    tables: &TableNames,
    schema_id: SchemaId,
    row_id: RowId,
) -> Result<Option<EntityRow>, sqlx::Error> {
    let hot_columns = HotColumn::ALL
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT ltbase_created_at, ltbase_updated_at, {hot_columns} FROM {} \
         WHERE schema_id = $1 AND row_id = $2 AND ltbase_deleted_at IS NULL",
        tables.entity
    );
    let Some(row) = sqlx::query(&sql)
        .bind(schema_id)
        .bind(row_id)
        .fetch_optional(exec)
        .await?
    else {
        return Ok(None);
    };

    Ok(Some(EntityRow {
        created_at: row.try_get("ltbase_created_at")?,
        updated_at: row.try_get("ltbase_updated_at")?,
        hot: decode_hot(&row)?,
    }))
}

pub(crate) async fn fetch_eav(
    exec: impl sqlx::Executor<'_, Database = Postgres>,
    tables: &TableNames,
    schema_id: SchemaId,
    row_id: RowId,
) -> Result<Vec<EavTuple>, sqlx::Error> {
    let sql = format!(
        "SELECT attr_id, array_indices, value_text, value_numeric FROM {} \
         WHERE schema_id = $1 AND row_id = $2",
        tables.eav
    );
    let rows = sqlx::query(&sql)
        .bind(schema_id)
        .bind(row_id)
        .fetch_all(exec)
        .await?;
    rows.iter()
        .map(|row| {
            Ok(EavTuple {
                attr_id: row.try_get("attr_id")?,
                array_indices: row.try_get("array_indices")?,
                value_text: row.try_get("value_text")?,
                value_numeric: row.try_get("value_numeric")?,
            })
        })
        .collect()
}

/// Decode every hot-column cell present on a fetched row.
pub(crate) fn decode_hot(row: &PgRow) -> Result<HotValues, sqlx::Error> {
    let mut hot = HotValues::default();
    for &column in HotColumn::ALL {
        let slot = match column.family() {
            ColumnFamily::Text => row
                .try_get::<Option<String>, _>(column.name())?
                .map(HotValue::Text),
            ColumnFamily::Smallint => row
                .try_get::<Option<i16>, _>(column.name())?
                .map(HotValue::Smallint),
            ColumnFamily::Integer => row
                .try_get::<Option<i32>, _>(column.name())?
                .map(HotValue::Integer),
            ColumnFamily::Bigint => row
                .try_get::<Option<i64>, _>(column.name())?
                .map(HotValue::Bigint),
            ColumnFamily::Double => row
                .try_get::<Option<f64>, _>(column.name())?
                .map(HotValue::Double),
            ColumnFamily::Uuid => row
                .try_get::<Option<uuid::Uuid>, _>(column.name())?
                .map(HotValue::Uuid),
        };
        if let Some(value) = slot {
            hot.set(column, value)
                .map_err(|err| sqlx::Error::Decode(Box::new(err)))?;
        }
    }
    Ok(hot)
}
