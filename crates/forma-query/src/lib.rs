//! The condition IR and query planner: parses the wire condition DSL,
//! normalises it against a schema's attribute cache, and compiles filters,
//! sorts and pagination into a single parameterised SQL statement over the
//! dual storage model.

use forma_models::{CoerceError, ValueType};

mod dsl;
mod plan;
mod predicate;

pub use dsl::{
    split_value, ConditionNode, Direction, Logic, Op, PageWindow, Pagination, SortKey,
};
pub use plan::{plan_list, plan_search, Plan, SqlParam, Tables, NUMERIC_EPSILON};
pub use predicate::{
    normalize, resolve_sort, search_predicate, CmpOp, Fallback, Leaf, Pattern, Predicate,
    ResolvedSort, Storage,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("condition group must contain at least one condition")]
    EmptyComposite,
    #[error("unknown operator {token:?}")]
    UnknownOperator { token: String },
    #[error("unknown attribute {path:?}")]
    UnknownAttribute { path: String },
    #[error("operator {op} requires a text attribute, but {path:?} is {value_type}")]
    TextOperator {
        op: Op,
        path: String,
        value_type: ValueType,
    },
    #[error("operator {op} cannot order booleans ({path:?})")]
    BoolOrdering { op: Op, path: String },
    #[error("attribute {path:?}: {err}")]
    Literal {
        path: String,
        #[source]
        err: CoerceError,
    },
    #[error("attribute {path:?} is not text and cannot be searched")]
    NotSearchable { path: String },
    #[error("search matched no schemas")]
    EmptySearch,
}

#[cfg(test)]
pub(crate) mod test_support {
    use forma_models::{AttrId, Encoding, HotColumn, SchemaId, ValueType};
    use forma_registry::{AllocationDocument, AttributeCache, AttributeDecl, SchemaDocument};

    fn attribute(
        path: &str,
        value_type: ValueType,
        column: Option<HotColumn>,
        encoding: Option<Encoding>,
    ) -> AttributeDecl {
        AttributeDecl {
            path: path.to_string(),
            attribute_id: None,
            value_type,
            column,
            encoding,
        }
    }

    pub fn lead_cache() -> AttributeCache {
        let mut status = attribute("status", ValueType::Text, None, None);
        status.attribute_id = Some(AttrId::new(11).unwrap());

        let doc = SchemaDocument {
            name: "lead".to_string(),
            version: 1,
            required: Vec::new(),
            attributes: vec![
                status,
                attribute("name", ValueType::Text, None, None),
                attribute("amount", ValueType::Double, Some(HotColumn::Double01), None),
                attribute("price", ValueType::Bigint, Some(HotColumn::Double02), None),
                attribute(
                    "active",
                    ValueType::Bool,
                    Some(HotColumn::Smallint01),
                    Some(Encoding::BoolSmallint),
                ),
                attribute(
                    "flagged",
                    ValueType::Bool,
                    Some(HotColumn::Text01),
                    Some(Encoding::BoolText),
                ),
                attribute(
                    "created",
                    ValueType::Datetime,
                    Some(HotColumn::Bigint02),
                    Some(Encoding::UnixMs),
                ),
                attribute("labels[]", ValueType::Text, None, None),
            ],
            json_schema: None,
        };
        AttributeCache::build(
            SchemaId::new(1).unwrap(),
            &doc,
            &AllocationDocument::default(),
        )
        .unwrap()
    }

    pub fn listing_cache() -> AttributeCache {
        let doc = SchemaDocument {
            name: "listing".to_string(),
            version: 1,
            required: Vec::new(),
            attributes: vec![
                attribute("name", ValueType::Text, None, None),
                attribute("sqft", ValueType::Integer, Some(HotColumn::Integer01), None),
            ],
            json_schema: None,
        };
        AttributeCache::build(
            SchemaId::new(2).unwrap(),
            &doc,
            &AllocationDocument::default(),
        )
        .unwrap()
    }
}
