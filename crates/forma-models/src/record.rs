use crate::{AttrId, RowId, Scalar, SchemaId};

/// EavTuple is one row of the narrow attribute table, scoped to a record by
/// the caller. `array_indices` is the comma-joined list of array positions
/// along the attribute path, empty for scalars. Exactly one of the two value
/// columns is set, decided by the attribute's ValueType.
#[derive(Clone, Debug, PartialEq)]
pub struct EavTuple {
    pub attr_id: AttrId,
    pub array_indices: String,
    pub value_text: Option<String>,
    pub value_numeric: Option<f64>,
}

impl EavTuple {
    pub fn new(attr_id: AttrId, indices: &[usize], value: &Scalar) -> Self {
        let (value_text, value_numeric) = value.eav_value();
        let array_indices = indices
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self {
            attr_id,
            array_indices,
            value_text,
            value_numeric,
        }
    }

    /// The array positions along the path, parsed back out of the
    /// comma-joined form. None if any component is malformed.
    pub fn indices(&self) -> Option<Vec<usize>> {
        if self.array_indices.is_empty() {
            return Some(Vec::new());
        }
        self.array_indices
            .split(',')
            .map(|part| part.parse::<usize>().ok())
            .collect()
    }
}

/// StoredRecord is a reconstructed record handed back by reads: identity,
/// audit timestamps (epoch milliseconds), and the rebuilt JSON document.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct StoredRecord {
    pub schema_id: SchemaId,
    pub row_id: RowId,
    pub created_at: i64,
    pub updated_at: i64,
    pub document: serde_json::Value,
}
