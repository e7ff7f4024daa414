//! The record transformer: flattens nested JSON records into typed attribute
//! tuples for the dual storage model, and reconstructs nested JSON from rows
//! read back out of it.

use forma_models::{CoerceError, ColumnTypeError, HotColumn};

mod flatten;
mod restore;

pub use flatten::{to_attributes, Flattened, Strictness};
pub use restore::from_rows;

// A schema shared by tests of both transform directions.
#[cfg(test)]
pub(crate) fn lead_cache() -> forma_registry::AttributeCache {
    use forma_models::{AttrId, SchemaId, ValueType};
    use forma_registry::{AllocationDocument, AttributeDecl, SchemaDocument};

    let attribute = |path: &str, value_type, column, encoding| AttributeDecl {
        path: path.to_string(),
        attribute_id: None,
        value_type,
        column,
        encoding,
    };

    let mut status = attribute("status", ValueType::Text, None, None);
    status.attribute_id = Some(AttrId::new(11).unwrap());

    let doc = SchemaDocument {
        name: "lead".to_string(),
        version: 1,
        required: vec!["status".to_string()],
        attributes: vec![
            status,
            attribute(
                "amount",
                ValueType::Double,
                Some(forma_models::HotColumn::Double01),
                None,
            ),
            attribute("contact.email", ValueType::Text, None, None),
            attribute("items[].id", ValueType::Text, None, None),
            attribute("items[].qty", ValueType::Integer, None, None),
            attribute("tags[]", ValueType::Text, None, None),
            attribute(
                "seen_at",
                ValueType::Datetime,
                Some(forma_models::HotColumn::Bigint01),
                Some(forma_models::Encoding::UnixMs),
            ),
            attribute(
                "active",
                ValueType::Bool,
                Some(forma_models::HotColumn::Smallint01),
                Some(forma_models::Encoding::BoolSmallint),
            ),
            attribute("note", ValueType::Text, None, None),
            attribute("when", ValueType::Datetime, None, None),
        ],
        json_schema: None,
    };
    forma_registry::AttributeCache::build(
        SchemaId::new(1).unwrap(),
        &doc,
        &AllocationDocument::default(),
    )
    .unwrap()
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("record root must be a JSON object")]
    RootNotObject,
    #[error("unknown attribute {path:?}")]
    UnknownAttribute { path: String },
    #[error("attribute {path:?}: {err}")]
    Coerce {
        path: String,
        #[source]
        err: CoerceError,
    },
    #[error("attribute {path:?} is bound to {column} but was reached inside an array")]
    BoundUnderArray { path: String, column: HotColumn },
    #[error("attribute {path:?}: {err}")]
    Column {
        path: String,
        #[source]
        err: ColumnTypeError,
    },
}
