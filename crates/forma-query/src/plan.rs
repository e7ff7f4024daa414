use crate::dsl::PageWindow;
use crate::predicate::{CmpOp, Fallback, Leaf, Pattern, Predicate, ResolvedSort, Storage};
use crate::Error;
use forma_models::{CoerceError, ColumnBinding, HotColumn, HotValue, Scalar, SchemaId, ValueType};

/// Half-width of the BETWEEN range that equality over a double column is
/// rewritten into.
pub const NUMERIC_EPSILON: f64 = 1e-5;

/// Physical table names, overridable through configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tables {
    pub entity: String,
    pub eav: String,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            entity: "entity_main".to_string(),
            eav: "eav_data".to_string(),
        }
    }
}

/// One bound statement parameter, in `$N` order.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Smallint(i16),
    Integer(i32),
    Bigint(i64),
    Double(f64),
    Text(String),
    Uuid(uuid::Uuid),
}

/// A planned statement: byte-identical SQL and parameters for identical
/// inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

/// Plan a filtered, sorted, paginated list over one schema.
///
/// The statement is main-driven: the anchor CTE scans the entity table under
/// the filter, the sorted CTE applies ORDER BY / LIMIT / OFFSET, and the
/// outer query re-joins the hot row and fans out EAV tuples. `row_id ASC`
/// always trails the sort keys, which makes ordering total and pagination
/// stable under ties.
pub fn plan_list(
    tables: &Tables,
    schema_id: SchemaId,
    filter: Option<&Predicate>,
    sort: &[ResolvedSort],
    window: &PageWindow,
) -> Result<Plan, Error> {
    let mut planner = Planner::new(tables);
    let sid = planner.push(SqlParam::Smallint(schema_id.as_i16()));
    let sql = planner.list_statement(sid, filter, sort, window)?;
    Ok(Plan {
        sql,
        params: planner.params,
    })
}

/// Plan a cross-schema search: one full per-schema plan per arm, glued with
/// UNION ALL, ordered by `row_id` alone.
pub fn plan_search(
    tables: &Tables,
    arms: &[(SchemaId, Predicate)],
    window: &PageWindow,
) -> Result<Plan, Error> {
    if arms.is_empty() {
        return Err(Error::EmptySearch);
    }

    let mut planner = Planner::new(tables);
    let mut parts = Vec::new();
    for (schema_id, predicate) in arms {
        let sid = planner.push(SqlParam::Smallint(schema_id.as_i16()));
        let arm = planner.list_statement(sid, Some(predicate), &[], window)?;
        parts.push(format!("({arm})"));
    }

    Ok(Plan {
        sql: format!("{}\nORDER BY row_id ASC", parts.join("\nUNION ALL\n")),
        params: planner.params,
    })
}

struct Planner<'a> {
    tables: &'a Tables,
    params: Vec<SqlParam>,
}

impl<'a> Planner<'a> {
    fn new(tables: &'a Tables) -> Self {
        Self {
            tables,
            params: Vec::new(),
        }
    }

    // Append a parameter, returning its 1-based placeholder number.
    fn push(&mut self, param: SqlParam) -> usize {
        self.params.push(param);
        self.params.len()
    }

    fn list_statement(
        &mut self,
        sid: usize,
        filter: Option<&Predicate>,
        sort: &[ResolvedSort],
        window: &PageWindow,
    ) -> Result<String, Error> {
        let entity = self.tables.entity.clone();
        let eav = self.tables.eav.clone();

        // Filter parameters are allocated before sort parameters, matching
        // their textual order in the statement.
        let filter_sql = match filter {
            Some(predicate) => format!(" AND {}", self.predicate_sql(sid, predicate)?),
            None => String::new(),
        };

        let mut sort_selects = String::new();
        let mut sort_joins = String::new();
        let mut inner_order = Vec::new();
        let mut outer_order = Vec::new();
        let mut joins_main = false;

        for (position, key) in sort.iter().enumerate() {
            let ordinal = position + 1;
            let expr = match key.storage {
                Storage::Main { column, .. } => {
                    joins_main = true;
                    format!("m.{}", column.name())
                }
                Storage::Eav => {
                    let attr = self.push(SqlParam::Smallint(key.attr_id.as_i16()));
                    let value_col = eav_value_column(key.value_type);
                    sort_joins.push_str(&format!("\n  LEFT JOIN LATERAL (SELECT e.{value_col} AS val FROM {eav} e WHERE e.schema_id = ${sid} AND e.row_id = a.row_id AND e.attr_id = ${attr} ORDER BY e.array_indices ASC LIMIT 1) s{ordinal} ON TRUE"));
                    format!("s{ordinal}.val")
                }
            };
            sort_selects.push_str(&format!(", {expr} AS ord_{ordinal}"));
            inner_order.push(format!("{expr} {}", key.direction.sql()));
            outer_order.push(format!("s.ord_{ordinal} {}", key.direction.sql()));
        }

        let main_join = if joins_main {
            format!("\n  JOIN {entity} m ON m.schema_id = ${sid} AND m.row_id = a.row_id")
        } else {
            String::new()
        };

        let limit = self.push(SqlParam::Bigint(window.limit));
        let offset = self.push(SqlParam::Bigint(window.offset));

        inner_order.push("a.row_id ASC".to_string());
        outer_order.push("t.row_id ASC".to_string());

        let mut sql = String::new();
        sql.push_str("WITH anchor AS (\n");
        sql.push_str(&format!("  SELECT t.row_id FROM {entity} t\n"));
        sql.push_str(&format!(
            "  WHERE t.schema_id = ${sid} AND t.ltbase_deleted_at IS NULL{filter_sql}\n"
        ));
        sql.push_str("), sorted AS (\n");
        sql.push_str(&format!(
            "  SELECT a.row_id{sort_selects} FROM anchor a{main_join}{sort_joins}\n"
        ));
        sql.push_str(&format!("  ORDER BY {}\n", inner_order.join(", ")));
        sql.push_str(&format!("  LIMIT ${limit} OFFSET ${offset}\n"));
        sql.push_str(")\n");
        sql.push_str(&format!("SELECT {}\n", entity_select_list()));
        sql.push_str("FROM sorted s\n");
        sql.push_str(&format!(
            "JOIN {entity} t ON t.schema_id = ${sid} AND t.row_id = s.row_id\n"
        ));
        sql.push_str(&format!("LEFT JOIN LATERAL (SELECT e.attr_id, e.array_indices, e.value_text, e.value_numeric FROM {eav} e WHERE e.schema_id = ${sid} AND e.row_id = s.row_id) e ON TRUE\n"));
        sql.push_str(&format!("ORDER BY {}", outer_order.join(", ")));
        Ok(sql)
    }

    fn predicate_sql(&mut self, sid: usize, predicate: &Predicate) -> Result<String, Error> {
        match predicate {
            Predicate::Composite { logic, children } => {
                let parts = children
                    .iter()
                    .map(|child| self.predicate_sql(sid, child))
                    .collect::<Result<Vec<_>, _>>()?;
                let separator = format!(" {} ", logic.sql());
                Ok(format!("({})", parts.join(separator.as_str())))
            }
            Predicate::Leaf(leaf) => match leaf.storage {
                Storage::Main { column, encoding } => self.main_leaf(leaf, column, encoding),
                Storage::Eav => self.eav_leaf(sid, leaf),
            },
        }
    }

    // A predicate over a bound hot column: `t.<col> <op> $n`, with the
    // declared fallbacks compensated at lowering time.
    fn main_leaf(
        &mut self,
        leaf: &Leaf,
        column: HotColumn,
        encoding: forma_models::Encoding,
    ) -> Result<String, Error> {
        let col = column.name();

        if leaf.op == CmpOp::Like {
            let pattern = like_pattern(text_literal(leaf)?, leaf.pattern);
            let n = self.push(SqlParam::Text(pattern));
            return Ok(format!("t.{col} LIKE ${n}"));
        }

        if leaf.op == CmpOp::Eq && leaf.fallback == Fallback::NumericToDouble {
            let center = numeric_literal(leaf)?;
            let lo = self.push(SqlParam::Double(center - NUMERIC_EPSILON));
            let hi = self.push(SqlParam::Double(center + NUMERIC_EPSILON));
            return Ok(format!("t.{col} BETWEEN ${lo} AND ${hi}"));
        }

        let binding = ColumnBinding { column, encoding };
        let cell = binding.encode(&leaf.literal).map_err(|err| Error::Literal {
            path: leaf.path.clone(),
            err,
        })?;
        let n = self.push(hot_param(cell));
        Ok(format!("t.{col} {} ${n}", leaf.op.sql()))
    }

    // A predicate over EAV tuples: an EXISTS against the matching value
    // column. For attributes inside arrays this is element-wise: any tuple
    // of the record may satisfy the comparison.
    fn eav_leaf(&mut self, sid: usize, leaf: &Leaf) -> Result<String, Error> {
        let attr = self.push(SqlParam::Smallint(leaf.attr_id.as_i16()));
        let value_col = eav_value_column(leaf.value_type);

        let param = if leaf.op == CmpOp::Like {
            SqlParam::Text(like_pattern(text_literal(leaf)?, leaf.pattern))
        } else {
            eav_param(&leaf.literal)
        };
        let v = self.push(param);

        Ok(format!(
            "EXISTS (SELECT 1 FROM {eav} e WHERE e.schema_id = ${sid} AND e.row_id = t.row_id \
             AND e.attr_id = ${attr} AND e.{value_col} {op} ${v})",
            eav = self.tables.eav,
            op = leaf.op.sql(),
        ))
    }
}

fn eav_value_column(value_type: ValueType) -> &'static str {
    if value_type.is_eav_numeric() {
        "value_numeric"
    } else {
        "value_text"
    }
}

fn entity_select_list() -> String {
    let mut columns = vec![
        "t.schema_id".to_string(),
        "t.row_id".to_string(),
        "t.ltbase_created_at".to_string(),
        "t.ltbase_updated_at".to_string(),
        "t.ltbase_deleted_at".to_string(),
    ];
    columns.extend(HotColumn::ALL.iter().map(|c| format!("t.{}", c.name())));
    columns.extend(
        ["e.attr_id", "e.array_indices", "e.value_text", "e.value_numeric"]
            .iter()
            .map(|c| c.to_string()),
    );
    columns.join(", ")
}

fn hot_param(cell: HotValue) -> SqlParam {
    match cell {
        HotValue::Text(v) => SqlParam::Text(v),
        HotValue::Smallint(v) => SqlParam::Smallint(v),
        HotValue::Integer(v) => SqlParam::Integer(v),
        HotValue::Bigint(v) => SqlParam::Bigint(v),
        HotValue::Double(v) => SqlParam::Double(v),
        HotValue::Uuid(v) => SqlParam::Uuid(v),
    }
}

fn eav_param(literal: &Scalar) -> SqlParam {
    match literal.eav_value() {
        (Some(text), None) => SqlParam::Text(text),
        (None, Some(numeric)) => SqlParam::Double(numeric),
        _ => unreachable!("eav_value sets exactly one column"),
    }
}

fn text_literal(leaf: &Leaf) -> Result<&str, Error> {
    match &leaf.literal {
        Scalar::Text(s) => Ok(s),
        other => Err(Error::Literal {
            path: leaf.path.clone(),
            err: CoerceError::Mismatch {
                expected: ValueType::Text,
                found: other.value_type().as_str(),
            },
        }),
    }
}

fn numeric_literal(leaf: &Leaf) -> Result<f64, Error> {
    match leaf.literal {
        Scalar::Smallint(v) => Ok(f64::from(v)),
        Scalar::Integer(v) => Ok(f64::from(v)),
        Scalar::Bigint(v) => Ok(v as f64),
        Scalar::Double(v) => Ok(v),
        ref other => Err(Error::Literal {
            path: leaf.path.clone(),
            err: CoerceError::Mismatch {
                expected: ValueType::Double,
                found: other.value_type().as_str(),
            },
        }),
    }
}

// LIKE special characters in literals are always escaped; patterns are
// assembled only from the wildcards the operator itself introduces.
fn like_pattern(literal: &str, pattern: Pattern) -> String {
    let escaped = literal
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    match pattern {
        Pattern::Prefix => format!("{escaped}%"),
        Pattern::Contains => format!("%{escaped}%"),
        Pattern::None => escaped,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dsl::{ConditionNode, Direction, Pagination, SortKey};
    use crate::predicate::{normalize, resolve_sort, search_predicate};
    use crate::test_support::lead_cache;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn condition(v: serde_json::Value) -> ConditionNode {
        serde_json::from_value(v).unwrap()
    }

    fn window() -> PageWindow {
        Pagination::default().window(100)
    }

    #[test]
    fn unfiltered_plan_shape() {
        let cache = lead_cache();
        let plan = plan_list(
            &Tables::default(),
            cache.schema_id(),
            None,
            &[],
            &window(),
        )
        .unwrap();

        let expected = format!(
            concat!(
                "WITH anchor AS (\n",
                "  SELECT t.row_id FROM entity_main t\n",
                "  WHERE t.schema_id = $1 AND t.ltbase_deleted_at IS NULL\n",
                "), sorted AS (\n",
                "  SELECT a.row_id FROM anchor a\n",
                "  ORDER BY a.row_id ASC\n",
                "  LIMIT $2 OFFSET $3\n",
                ")\n",
                "SELECT {}\n",
                "FROM sorted s\n",
                "JOIN entity_main t ON t.schema_id = $1 AND t.row_id = s.row_id\n",
                "LEFT JOIN LATERAL (SELECT e.attr_id, e.array_indices, e.value_text, ",
                "e.value_numeric FROM eav_data e WHERE e.schema_id = $1 AND e.row_id = s.row_id) ",
                "e ON TRUE\n",
                "ORDER BY t.row_id ASC",
            ),
            entity_select_list(),
        );
        assert_eq!(plan.sql, expected);
        assert_eq!(
            plan.params,
            vec![
                SqlParam::Smallint(1),
                SqlParam::Bigint(20),
                SqlParam::Bigint(0),
            ]
        );
    }

    #[test]
    fn mixed_storage_and_filter() {
        let cache = lead_cache();
        let predicate = normalize(
            &cache,
            &condition(json!({
                "l": "and",
                "c": [
                    {"a": "status", "v": "hot"},
                    {"a": "amount", "v": "gt:100"},
                ],
            })),
        )
        .unwrap();

        let plan = plan_list(
            &Tables::default(),
            cache.schema_id(),
            Some(&predicate),
            &[],
            &window(),
        )
        .unwrap();

        assert!(plan.sql.contains(
            "(EXISTS (SELECT 1 FROM eav_data e WHERE e.schema_id = $1 AND e.row_id = t.row_id \
             AND e.attr_id = $2 AND e.value_text = $3) AND t.double_01 > $4)"
        ));
        assert_eq!(
            plan.params,
            vec![
                SqlParam::Smallint(1),
                SqlParam::Smallint(11),
                SqlParam::Text("hot".to_string()),
                SqlParam::Double(100.0),
                SqlParam::Bigint(20),
                SqlParam::Bigint(0),
            ]
        );
    }

    #[test]
    fn equality_over_double_column_becomes_a_range() {
        let cache = lead_cache();
        let predicate = normalize(&cache, &condition(json!({"a": "price", "v": "42"}))).unwrap();
        let plan = plan_list(
            &Tables::default(),
            cache.schema_id(),
            Some(&predicate),
            &[],
            &window(),
        )
        .unwrap();

        assert!(plan.sql.contains("t.double_02 BETWEEN $2 AND $3"));
        assert_eq!(plan.params[1], SqlParam::Double(42.0 - NUMERIC_EPSILON));
        assert_eq!(plan.params[2], SqlParam::Double(42.0 + NUMERIC_EPSILON));
    }

    #[test]
    fn bool_text_fallback_binds_token_text() {
        let cache = lead_cache();
        let predicate =
            normalize(&cache, &condition(json!({"a": "flagged", "v": "yes"}))).unwrap();
        let plan = plan_list(
            &Tables::default(),
            cache.schema_id(),
            Some(&predicate),
            &[],
            &window(),
        )
        .unwrap();

        assert!(plan.sql.contains("t.text_01 = $2"));
        assert_eq!(plan.params[1], SqlParam::Text("true".to_string()));
    }

    #[test]
    fn unix_ms_date_literals_bind_as_epoch_millis() {
        let cache = lead_cache();
        let predicate = normalize(
            &cache,
            &condition(json!({"a": "created", "v": "gte:2024-01-02T00:00:00Z"})),
        )
        .unwrap();
        let plan = plan_list(
            &Tables::default(),
            cache.schema_id(),
            Some(&predicate),
            &[],
            &window(),
        )
        .unwrap();

        assert!(plan.sql.contains("t.bigint_02 >= $2"));
        assert_eq!(plan.params[1], SqlParam::Bigint(1_704_153_600_000));
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        let cache = lead_cache();
        let predicate = normalize(
            &cache,
            &condition(json!({"a": "status", "v": "starts_with:50%_done"})),
        )
        .unwrap();
        let plan = plan_list(
            &Tables::default(),
            cache.schema_id(),
            Some(&predicate),
            &[],
            &window(),
        )
        .unwrap();

        assert!(plan.sql.contains("e.value_text LIKE $3"));
        assert_eq!(
            plan.params[2],
            SqlParam::Text("50\\%\\_done%".to_string())
        );
    }

    #[test]
    fn sort_lowering_joins_per_storage() {
        let cache = lead_cache();
        let sort = resolve_sort(
            &cache,
            &[
                SortKey {
                    attr: "amount".to_string(),
                    direction: Direction::Desc,
                },
                SortKey {
                    attr: "status".to_string(),
                    direction: Direction::Asc,
                },
            ],
        )
        .unwrap();

        let plan = plan_list(
            &Tables::default(),
            cache.schema_id(),
            None,
            &sort,
            &Pagination { page: 3, per_page: 10 }.window(100),
        )
        .unwrap();

        assert!(plan
            .sql
            .contains("JOIN entity_main m ON m.schema_id = $1 AND m.row_id = a.row_id"));
        assert!(plan.sql.contains(
            "LEFT JOIN LATERAL (SELECT e.value_text AS val FROM eav_data e \
             WHERE e.schema_id = $1 AND e.row_id = a.row_id AND e.attr_id = $2 \
             ORDER BY e.array_indices ASC LIMIT 1) s2 ON TRUE"
        ));
        assert!(plan
            .sql
            .contains("ORDER BY m.double_01 DESC, s2.val ASC, a.row_id ASC"));
        assert!(plan
            .sql
            .contains("ORDER BY s.ord_1 DESC, s.ord_2 ASC, t.row_id ASC"));
        // attr param, then limit/offset for page 3 of 10.
        assert_eq!(
            plan.params,
            vec![
                SqlParam::Smallint(1),
                SqlParam::Smallint(11),
                SqlParam::Bigint(10),
                SqlParam::Bigint(20),
            ]
        );
    }

    #[test]
    fn plans_are_deterministic() {
        let cache = lead_cache();
        let predicate = normalize(
            &cache,
            &condition(json!({
                "l": "or",
                "c": [
                    {"a": "status", "v": "hot"},
                    {"a": "price", "v": "lte:9"},
                ],
            })),
        )
        .unwrap();
        let sort = resolve_sort(
            &cache,
            &[SortKey {
                attr: "amount".to_string(),
                direction: Direction::Asc,
            }],
        )
        .unwrap();

        let once = plan_list(
            &Tables::default(),
            cache.schema_id(),
            Some(&predicate),
            &sort,
            &window(),
        )
        .unwrap();
        let twice = plan_list(
            &Tables::default(),
            cache.schema_id(),
            Some(&predicate),
            &sort,
            &window(),
        )
        .unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn search_unions_per_schema_arms() {
        let lead = lead_cache();
        let listing = crate::test_support::listing_cache();

        let arms = vec![
            (
                lead.schema_id(),
                search_predicate(&lead, "Benchmark", Some(&["name".to_string()]))
                    .unwrap()
                    .unwrap(),
            ),
            (
                listing.schema_id(),
                search_predicate(&listing, "Benchmark", Some(&["name".to_string()]))
                    .unwrap()
                    .unwrap(),
            ),
        ];
        let plan = plan_search(&Tables::default(), &arms, &window()).unwrap();

        assert_eq!(plan.sql.matches("UNION ALL").count(), 1);
        assert!(plan.sql.ends_with("ORDER BY row_id ASC"));
        // Each arm binds its own schema id and window.
        assert_eq!(plan.params[0], SqlParam::Smallint(1));
        assert!(plan.params.contains(&SqlParam::Smallint(2)));
        assert_eq!(
            plan.params
                .iter()
                .filter(|p| matches!(p, SqlParam::Text(t) if t == "%Benchmark%"))
                .count(),
            2
        );

        assert!(matches!(
            plan_search(&Tables::default(), &[], &window()),
            Err(Error::EmptySearch)
        ));
    }
}
