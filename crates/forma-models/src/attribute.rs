use crate::{
    AttrId, CoerceError, ColumnFamily, Encoding, HotColumn, HotValue, Scalar, ValueType,
};

/// Marker appended to a path segment for each array level it crosses,
/// e.g. `items[].id` or `matrix[][]`.
pub const ARRAY_MARKER: &str = "[]";

pub fn path_crosses_array(path: &str) -> bool {
    path.contains(ARRAY_MARKER)
}

/// ColumnBinding pins an attribute to one hot column of the entity table,
/// together with the encoding applied on the way in and out.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ColumnBinding {
    pub column: HotColumn,
    #[serde(default)]
    pub encoding: Encoding,
}

impl ColumnBinding {
    /// Whether this binding can physically hold values of `value_type`.
    /// The registry rejects incompatible bindings at load time.
    pub fn compatible_with(&self, value_type: ValueType) -> bool {
        match (self.column.family(), value_type, self.encoding) {
            (ColumnFamily::Text, ValueType::Text, Encoding::Default) => true,
            (ColumnFamily::Text, ValueType::Uuid, Encoding::Default) => true,
            (ColumnFamily::Text, ValueType::Date, Encoding::Default | Encoding::Iso8601) => true,
            (ColumnFamily::Text, ValueType::Datetime, Encoding::Iso8601) => true,
            (ColumnFamily::Text, ValueType::Bool, Encoding::BoolText) => true,
            (ColumnFamily::Smallint, ValueType::Smallint, Encoding::Default) => true,
            (ColumnFamily::Smallint, ValueType::Bool, Encoding::BoolSmallint) => true,
            (ColumnFamily::Integer, ValueType::Integer, Encoding::Default) => true,
            (ColumnFamily::Bigint, ValueType::Bigint, Encoding::Default) => true,
            (ColumnFamily::Bigint, ValueType::Datetime, Encoding::UnixMs) => true,
            (ColumnFamily::Double, vt, Encoding::Default) => vt.is_numeric(),
            (ColumnFamily::Uuid, ValueType::Uuid, Encoding::Default) => true,
            _ => false,
        }
    }

    /// Encode a coerced value into the bound column's cell.
    pub fn encode(&self, scalar: &Scalar) -> Result<HotValue, CoerceError> {
        let incompatible = || CoerceError::Mismatch {
            expected: scalar.value_type(),
            found: self.column.name(),
        };

        Ok(match (scalar, self.column.family(), self.encoding) {
            (Scalar::Text(s), ColumnFamily::Text, Encoding::Default) => HotValue::Text(s.clone()),
            (Scalar::Uuid(u), ColumnFamily::Uuid, Encoding::Default) => HotValue::Uuid(*u),
            (Scalar::Uuid(u), ColumnFamily::Text, Encoding::Default) => {
                HotValue::Text(u.to_string())
            }
            (Scalar::Date(d), ColumnFamily::Text, Encoding::Default | Encoding::Iso8601) => {
                HotValue::Text(crate::value::format_date(d))
            }
            (Scalar::Datetime(dt), ColumnFamily::Bigint, Encoding::UnixMs) => {
                HotValue::Bigint(dt.timestamp_millis())
            }
            (Scalar::Datetime(dt), ColumnFamily::Text, Encoding::Iso8601) => {
                HotValue::Text(crate::value::format_datetime(dt))
            }
            (Scalar::Bool(b), ColumnFamily::Text, Encoding::BoolText) => {
                HotValue::Text(if *b { "true" } else { "false" }.to_string())
            }
            (Scalar::Bool(b), ColumnFamily::Smallint, Encoding::BoolSmallint) => {
                HotValue::Smallint(i16::from(*b))
            }
            (Scalar::Smallint(v), ColumnFamily::Smallint, Encoding::Default) => {
                HotValue::Smallint(*v)
            }
            (Scalar::Integer(v), ColumnFamily::Integer, Encoding::Default) => {
                HotValue::Integer(*v)
            }
            (Scalar::Bigint(v), ColumnFamily::Bigint, Encoding::Default) => HotValue::Bigint(*v),
            (Scalar::Smallint(v), ColumnFamily::Double, Encoding::Default) => {
                HotValue::Double(f64::from(*v))
            }
            (Scalar::Integer(v), ColumnFamily::Double, Encoding::Default) => {
                HotValue::Double(f64::from(*v))
            }
            (Scalar::Bigint(v), ColumnFamily::Double, Encoding::Default) => {
                HotValue::Double(*v as f64)
            }
            (Scalar::Double(v), ColumnFamily::Double, Encoding::Default) => HotValue::Double(*v),
            _ => return Err(incompatible()),
        })
    }

    /// Reverse `encode`: reconstruct the logical value from a column cell.
    pub fn decode(&self, value: &HotValue, value_type: ValueType) -> Result<Scalar, CoerceError> {
        match (value, value_type, self.encoding) {
            (HotValue::Text(s), ValueType::Text, Encoding::Default) => Ok(Scalar::Text(s.clone())),
            (HotValue::Uuid(u), ValueType::Uuid, Encoding::Default) => Ok(Scalar::Uuid(*u)),
            (HotValue::Text(s), ValueType::Uuid, Encoding::Default)
            | (HotValue::Text(s), ValueType::Date, Encoding::Default | Encoding::Iso8601)
            | (HotValue::Text(s), ValueType::Datetime, Encoding::Iso8601) => {
                Scalar::from_literal(value_type, s)
            }
            (HotValue::Bigint(millis), ValueType::Datetime, Encoding::UnixMs) => {
                crate::value::datetime_from_millis(*millis)
            }
            (HotValue::Text(s), ValueType::Bool, Encoding::BoolText) => {
                Scalar::from_literal(ValueType::Bool, s)
            }
            (HotValue::Smallint(v), ValueType::Bool, Encoding::BoolSmallint) => {
                Ok(Scalar::Bool(*v != 0))
            }
            (HotValue::Smallint(v), ValueType::Smallint, Encoding::Default) => {
                Ok(Scalar::Smallint(*v))
            }
            (HotValue::Integer(v), ValueType::Integer, Encoding::Default) => {
                Ok(Scalar::Integer(*v))
            }
            (HotValue::Bigint(v), ValueType::Bigint, Encoding::Default) => Ok(Scalar::Bigint(*v)),
            (HotValue::Double(v), vt, Encoding::Default) if vt.is_numeric() => {
                Scalar::from_eav(vt, None, Some(*v))
            }
            _ => Err(CoerceError::Mismatch {
                expected: value_type,
                found: self.column.name(),
            }),
        }
    }
}

/// AttributeMetadata is the registry's record for one JSON path of a schema:
/// the stable attribute id, the logical value type, the optional hot-column
/// binding, and whether the path crosses an array level.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeMetadata {
    pub id: AttrId,
    pub path: String,
    pub value_type: ValueType,
    pub binding: Option<ColumnBinding>,
    pub inside_array: bool,
}

impl AttributeMetadata {
    pub fn new(
        id: AttrId,
        path: impl Into<String>,
        value_type: ValueType,
        binding: Option<ColumnBinding>,
    ) -> Self {
        let path = path.into();
        let inside_array = path_crosses_array(&path);
        Self {
            id,
            path,
            value_type,
            binding,
            inside_array,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn binding_compatibility_table() {
        let bind = |column, encoding| ColumnBinding { column, encoding };

        assert!(bind(HotColumn::Text01, Encoding::Default).compatible_with(ValueType::Text));
        assert!(bind(HotColumn::Bigint01, Encoding::UnixMs).compatible_with(ValueType::Datetime));
        assert!(bind(HotColumn::Double02, Encoding::Default).compatible_with(ValueType::Integer));
        assert!(bind(HotColumn::Smallint01, Encoding::BoolSmallint).compatible_with(ValueType::Bool));

        // A datetime binding must pick a physical representation explicitly.
        assert!(!bind(HotColumn::Bigint01, Encoding::Default).compatible_with(ValueType::Datetime));
        assert!(!bind(HotColumn::Text01, Encoding::Default).compatible_with(ValueType::Datetime));
        assert!(!bind(HotColumn::Integer01, Encoding::Default).compatible_with(ValueType::Bigint));
        assert!(!bind(HotColumn::Text01, Encoding::Default).compatible_with(ValueType::Bool));
    }

    #[test]
    fn unix_ms_encoding_round_trips() {
        let binding = ColumnBinding {
            column: HotColumn::Bigint02,
            encoding: Encoding::UnixMs,
        };
        let dt = chrono::Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap();
        let cell = binding.encode(&Scalar::Datetime(dt)).unwrap();
        assert_eq!(cell, HotValue::Bigint(dt.timestamp_millis()));
        assert_eq!(
            binding.decode(&cell, ValueType::Datetime).unwrap(),
            Scalar::Datetime(dt)
        );
    }

    #[test]
    fn bool_encodings_round_trip() {
        let text = ColumnBinding {
            column: HotColumn::Text03,
            encoding: Encoding::BoolText,
        };
        let cell = text.encode(&Scalar::Bool(true)).unwrap();
        assert_eq!(cell, HotValue::Text("true".into()));
        assert_eq!(
            text.decode(&cell, ValueType::Bool).unwrap(),
            Scalar::Bool(true)
        );

        let small = ColumnBinding {
            column: HotColumn::Smallint02,
            encoding: Encoding::BoolSmallint,
        };
        let cell = small.encode(&Scalar::Bool(false)).unwrap();
        assert_eq!(cell, HotValue::Smallint(0));
        assert_eq!(
            small.decode(&cell, ValueType::Bool).unwrap(),
            Scalar::Bool(false)
        );
    }

    #[test]
    fn numeric_to_double_binding_narrows_on_decode() {
        let binding = ColumnBinding {
            column: HotColumn::Double01,
            encoding: Encoding::Default,
        };
        let cell = binding.encode(&Scalar::Integer(42)).unwrap();
        assert_eq!(cell, HotValue::Double(42.0));
        assert_eq!(
            binding.decode(&cell, ValueType::Integer).unwrap(),
            Scalar::Integer(42)
        );
    }

    #[test]
    fn array_marker_detection() {
        assert!(path_crosses_array("items[].id"));
        assert!(path_crosses_array("tags[]"));
        assert!(!path_crosses_array("contact.email"));
    }
}
