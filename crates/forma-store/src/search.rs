//! Cross-schema text search: one UNION ALL statement over per-schema plans,
//! each arm a `contains` filter across that schema's text attributes.

use crate::read::execute_plan;
use crate::{guarded, Error, Store};
use forma_models::StoredRecord;
use forma_query::{plan_search, search_predicate, Pagination, Predicate};
use tokio_util::sync::CancellationToken;

/// One search result row, labelled with the schema it came from.
#[derive(Debug, serde::Serialize)]
pub struct SearchHit {
    pub schema: String,
    pub record: StoredRecord,
}

impl Store {
    /// Search `needle` across `schemas` (all registered schemas when None),
    /// optionally restricted to the named text attributes. Schemas exposing
    /// none of the candidate attributes are skipped.
    #[tracing::instrument(err, level = "debug", skip(self, cancel))]
    pub async fn search(
        &self,
        needle: &str,
        schemas: Option<&[String]>,
        attributes: Option<&[String]>,
        page: Pagination,
        cancel: &CancellationToken,
    ) -> Result<Vec<SearchHit>, Error> {
        let snapshot = self.registry().snapshot();

        let names: Vec<String> = match schemas {
            Some(names) => names.to_vec(),
            None => snapshot.schema_names().map(str::to_string).collect(),
        };

        let mut arms: Vec<(forma_models::SchemaId, Predicate)> = Vec::new();
        for name in &names {
            let cache = snapshot.get_by_name(name)?;
            if let Some(predicate) = search_predicate(&cache, needle, attributes)? {
                arms.push((cache.schema_id(), predicate));
            }
        }
        if arms.is_empty() {
            return Ok(Vec::new());
        }

        let plan = plan_search(
            &self.tables().query_tables(),
            &arms,
            &page.window(self.max_page_size()),
        )?;
        tracing::debug!(arms = arms.len(), sql = %plan.sql, "planned cross-schema search");

        let records = guarded(
            cancel,
            execute_plan(self.pool(), &plan, |schema_id| {
                snapshot.get_by_id(schema_id).ok()
            }),
        )
        .await?;

        Ok(records
            .into_iter()
            .filter_map(|record| {
                let schema = snapshot.get_by_id(record.schema_id).ok()?;
                Some(SearchHit {
                    schema: schema.name().to_string(),
                    record,
                })
            })
            .collect())
    }
}
