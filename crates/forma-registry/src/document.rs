use forma_models::{AttrId, ColumnBinding, Encoding, HotColumn, ValueType};
use std::collections::BTreeMap;

/// SchemaDocument is the authored metadata document for one schema: the
/// declared attribute paths with their types and optional hot-column
/// bindings, plus the JSON Schema kept verbatim for external validators.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaDocument {
    pub name: String,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub required: Vec<String>,
    pub attributes: Vec<AttributeDecl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<serde_json::Value>,
}

/// One declared attribute. `attribute_id` may be pinned by the document;
/// unpinned paths receive ids deterministically at load time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttributeDecl {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute_id: Option<AttrId>,
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<HotColumn>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,
}

impl AttributeDecl {
    pub fn binding(&self) -> Option<ColumnBinding> {
        self.column.map(|column| ColumnBinding {
            column,
            encoding: self.encoding.unwrap_or_default(),
        })
    }
}

/// AllocationDocument is the persisted id-allocation ledger for one schema:
/// every path ever assigned an id, including paths since dropped from the
/// schema document (tombstones). Ids listed here are never renumbered.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AllocationDocument {
    #[serde(default)]
    pub assigned: BTreeMap<String, AttrId>,
}
