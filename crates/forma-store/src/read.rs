//! Planned-read execution: stream result rows, group them back into records,
//! and reconstruct each record's JSON document.

use crate::records::decode_hot;
use crate::Error;
use forma_models::{EavTuple, HotValues, RowId, SchemaId, StoredRecord};
use forma_query::{Plan, SqlParam};
use forma_registry::AttributeCache;
use futures::TryStreamExt;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use std::sync::Arc;

/// One decoded result row: the hot row repeated per EAV tuple by the plan's
/// reassembly join, plus at most one tuple.
pub(crate) struct DecodedRow {
    pub schema_id: SchemaId,
    pub row_id: RowId,
    pub created_at: i64,
    pub updated_at: i64,
    pub hot: HotValues,
    pub tuple: Option<EavTuple>,
}

pub(crate) fn decode_row(row: &PgRow) -> Result<DecodedRow, sqlx::Error> {
    let tuple = match row.try_get::<Option<i16>, _>("attr_id")? {
        Some(_) => Some(EavTuple {
            attr_id: row.try_get("attr_id")?,
            array_indices: row
                .try_get::<Option<String>, _>("array_indices")?
                .unwrap_or_default(),
            value_text: row.try_get("value_text")?,
            value_numeric: row.try_get("value_numeric")?,
        }),
        None => None,
    };

    Ok(DecodedRow {
        schema_id: row.try_get("schema_id")?,
        row_id: row.try_get("row_id")?,
        created_at: row.try_get("ltbase_created_at")?,
        updated_at: row.try_get("ltbase_updated_at")?,
        hot: decode_hot(row)?,
        tuple: tuple.filter(|t| t.value_text.is_some() || t.value_numeric.is_some()),
    })
}

/// The identity and hot half of a grouped record.
pub(crate) struct RecordHead {
    pub schema_id: SchemaId,
    pub row_id: RowId,
    pub created_at: i64,
    pub updated_at: i64,
    pub hot: HotValues,
}

/// Groups a row stream, which the plan orders with all rows of a record
/// adjacent, back into one (head, tuples) pair per record.
pub(crate) struct Assembler {
    current: Option<(RecordHead, Vec<EavTuple>)>,
}

impl Assembler {
    pub(crate) fn new() -> Self {
        Self { current: None }
    }

    /// Feed the next row; returns the previous record when this row starts a
    /// new one.
    pub(crate) fn push(&mut self, row: DecodedRow) -> Option<(RecordHead, Vec<EavTuple>)> {
        let starts_new = !matches!(
            &self.current,
            Some((head, _)) if head.schema_id == row.schema_id && head.row_id == row.row_id
        );

        let mut completed = None;
        if starts_new {
            completed = self.current.take();
            self.current = Some((
                RecordHead {
                    schema_id: row.schema_id,
                    row_id: row.row_id,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                    hot: row.hot,
                },
                Vec::new(),
            ));
        }
        if let (Some((_, tuples)), Some(tuple)) = (&mut self.current, row.tuple) {
            tuples.push(tuple);
        }
        completed
    }

    pub(crate) fn finish(self) -> Option<(RecordHead, Vec<EavTuple>)> {
        self.current
    }
}

pub(crate) fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &'q [SqlParam],
) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            SqlParam::Smallint(v) => query.bind(*v),
            SqlParam::Integer(v) => query.bind(*v),
            SqlParam::Bigint(v) => query.bind(*v),
            SqlParam::Double(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.as_str()),
            SqlParam::Uuid(v) => query.bind(*v),
        };
    }
    query
}

/// Run a plan and reconstruct one StoredRecord per grouped row_id, resolving
/// each record's schema through `lookup` (a fixed cache for single-schema
/// lists, a snapshot lookup for cross-schema search).
pub(crate) async fn execute_plan<F>(
    pool: &PgPool,
    plan: &Plan,
    lookup: F,
) -> Result<Vec<StoredRecord>, Error>
where
    F: Fn(SchemaId) -> Option<Arc<AttributeCache>>,
{
    let mut rows = bind_params(sqlx::query(&plan.sql), &plan.params).fetch(pool);
    let mut assembler = Assembler::new();
    let mut records = Vec::new();

    while let Some(row) = rows.try_next().await.map_err(Error::from)? {
        let decoded = decode_row(&row).map_err(Error::from)?;
        if let Some(group) = assembler.push(decoded) {
            reconstruct(&lookup, group, &mut records)?;
        }
    }
    if let Some(group) = assembler.finish() {
        reconstruct(&lookup, group, &mut records)?;
    }
    Ok(records)
}

fn reconstruct<F>(
    lookup: &F,
    (head, tuples): (RecordHead, Vec<EavTuple>),
    records: &mut Vec<StoredRecord>,
) -> Result<(), Error>
where
    F: Fn(SchemaId) -> Option<Arc<AttributeCache>>,
{
    let Some(cache) = lookup(head.schema_id) else {
        tracing::warn!(
            schema_id = head.schema_id.as_i16(),
            row_id = %head.row_id,
            "dropping result row for unknown schema id"
        );
        return Ok(());
    };
    let document = forma_transform::from_rows(&cache, &head.hot, &tuples)?;
    records.push(StoredRecord {
        schema_id: head.schema_id,
        row_id: head.row_id,
        created_at: head.created_at,
        updated_at: head.updated_at,
        document,
    });
    Ok(())
}

impl crate::Store {
    /// Fetch one record by id. Soft-deleted and missing rows are both
    /// `not_found`.
    #[tracing::instrument(err, level = "debug", skip(self, cancel))]
    pub async fn get(
        &self,
        schema: &str,
        row_id: RowId,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<StoredRecord, Error> {
        let cache = self.registry().get_by_name(schema)?;
        crate::guarded(cancel, async {
            let entity = crate::records::fetch_entity(
                self.pool(),
                self.tables(),
                cache.schema_id(),
                row_id,
            )
            .await?
            .ok_or(Error::NotFound {
                schema_id: cache.schema_id(),
                row_id,
            })?;
            let tuples =
                crate::records::fetch_eav(self.pool(), self.tables(), cache.schema_id(), row_id)
                    .await?;
            let document = forma_transform::from_rows(&cache, &entity.hot, &tuples)?;
            Ok(StoredRecord {
                schema_id: cache.schema_id(),
                row_id,
                created_at: entity.created_at,
                updated_at: entity.updated_at,
                document,
            })
        })
        .await
    }

    /// Run a filtered, sorted, paginated list over one schema.
    #[tracing::instrument(err, level = "debug", skip(self, filter, sort, cancel))]
    pub async fn query(
        &self,
        schema: &str,
        filter: Option<&forma_query::ConditionNode>,
        sort: &[forma_query::SortKey],
        page: forma_query::Pagination,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<Vec<StoredRecord>, Error> {
        let cache = self.registry().get_by_name(schema)?;
        let predicate = filter
            .map(|node| forma_query::normalize(&cache, node))
            .transpose()?;
        let sort = forma_query::resolve_sort(&cache, sort)?;
        let plan = forma_query::plan_list(
            &self.tables().query_tables(),
            cache.schema_id(),
            predicate.as_ref(),
            &sort,
            &page.window(self.max_page_size()),
        )?;
        tracing::debug!(schema, sql = %plan.sql, "planned list query");

        crate::guarded(
            cancel,
            execute_plan(self.pool(), &plan, |_| Some(cache.clone())),
        )
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use forma_models::AttrId;

    fn row(schema: i16, row_id: RowId, tuple: Option<&str>) -> DecodedRow {
        DecodedRow {
            schema_id: SchemaId::new(schema).unwrap(),
            row_id,
            created_at: 1,
            updated_at: 2,
            hot: HotValues::default(),
            tuple: tuple.map(|text| EavTuple {
                attr_id: AttrId::new(0).unwrap(),
                array_indices: String::new(),
                value_text: Some(text.to_string()),
                value_numeric: None,
            }),
        }
    }

    #[test]
    fn assembler_groups_adjacent_rows() {
        let a = RowId::generate();
        let b = RowId::generate();

        let mut assembler = Assembler::new();
        assert!(assembler.push(row(1, a, Some("x"))).is_none());
        assert!(assembler.push(row(1, a, Some("y"))).is_none());

        let (head, tuples) = assembler.push(row(1, b, None)).unwrap();
        assert_eq!(head.row_id, a);
        assert_eq!(tuples.len(), 2);

        let (head, tuples) = assembler.finish().unwrap();
        assert_eq!(head.row_id, b);
        assert!(tuples.is_empty(), "left join padding carries no tuple");
    }

    #[test]
    fn assembler_splits_same_row_id_across_schemas() {
        let shared = RowId::generate();
        let mut assembler = Assembler::new();
        assert!(assembler.push(row(1, shared, Some("x"))).is_none());
        let completed = assembler.push(row(2, shared, Some("y")));
        assert!(completed.is_some());
    }

    #[test]
    fn empty_input_produces_nothing() {
        let assembler = Assembler::new();
        assert!(assembler.finish().is_none());
    }
}
