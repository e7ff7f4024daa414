mod attribute;
mod columns;
mod id;
mod record;
mod value;

pub use attribute::{path_crosses_array, AttributeMetadata, ColumnBinding, ARRAY_MARKER};
pub use columns::{ColumnFamily, ColumnTypeError, Encoding, HotColumn, HotValue, HotValues};
pub use id::{AttrId, RowId, SchemaId};
pub use record::{EavTuple, StoredRecord};
pub use value::{CoerceError, Scalar, ValueType};
