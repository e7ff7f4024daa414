/// The typed families of the wide entity table's generic columns.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColumnFamily {
    Text,
    Smallint,
    Integer,
    Bigint,
    Double,
    Uuid,
}

/// HotColumn enumerates the fixed physical columns of the entity table:
/// `text_01..text_10`, `smallint_01..smallint_03`, `integer_01..integer_03`,
/// `bigint_01..bigint_05`, `double_01..double_05`, `uuid_01..uuid_02`.
///
/// The column list is part of the physical contract. Attribute bindings are
/// metadata pointing into this list, resolved at registry load into a
/// compile-time index rather than carried around as strings.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HotColumn {
    Text01,
    Text02,
    Text03,
    Text04,
    Text05,
    Text06,
    Text07,
    Text08,
    Text09,
    Text10,
    Smallint01,
    Smallint02,
    Smallint03,
    Integer01,
    Integer02,
    Integer03,
    Bigint01,
    Bigint02,
    Bigint03,
    Bigint04,
    Bigint05,
    Double01,
    Double02,
    Double03,
    Double04,
    Double05,
    Uuid01,
    Uuid02,
}

use HotColumn::*;

impl HotColumn {
    pub const ALL: &'static [HotColumn] = &[
        Text01, Text02, Text03, Text04, Text05, Text06, Text07, Text08, Text09, Text10,
        Smallint01, Smallint02, Smallint03, Integer01, Integer02, Integer03, Bigint01, Bigint02,
        Bigint03, Bigint04, Bigint05, Double01, Double02, Double03, Double04, Double05, Uuid01,
        Uuid02,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Text01 => "text_01",
            Text02 => "text_02",
            Text03 => "text_03",
            Text04 => "text_04",
            Text05 => "text_05",
            Text06 => "text_06",
            Text07 => "text_07",
            Text08 => "text_08",
            Text09 => "text_09",
            Text10 => "text_10",
            Smallint01 => "smallint_01",
            Smallint02 => "smallint_02",
            Smallint03 => "smallint_03",
            Integer01 => "integer_01",
            Integer02 => "integer_02",
            Integer03 => "integer_03",
            Bigint01 => "bigint_01",
            Bigint02 => "bigint_02",
            Bigint03 => "bigint_03",
            Bigint04 => "bigint_04",
            Bigint05 => "bigint_05",
            Double01 => "double_01",
            Double02 => "double_02",
            Double03 => "double_03",
            Double04 => "double_04",
            Double05 => "double_05",
            Uuid01 => "uuid_01",
            Uuid02 => "uuid_02",
        }
    }

    pub fn family(self) -> ColumnFamily {
        match self {
            Text01 | Text02 | Text03 | Text04 | Text05 | Text06 | Text07 | Text08 | Text09
            | Text10 => ColumnFamily::Text,
            Smallint01 | Smallint02 | Smallint03 => ColumnFamily::Smallint,
            Integer01 | Integer02 | Integer03 => ColumnFamily::Integer,
            Bigint01 | Bigint02 | Bigint03 | Bigint04 | Bigint05 => ColumnFamily::Bigint,
            Double01 | Double02 | Double03 | Double04 | Double05 => ColumnFamily::Double,
            Uuid01 | Uuid02 => ColumnFamily::Uuid,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.name() == name)
    }

    // Zero-based index within the column's family.
    fn slot(self) -> usize {
        match self {
            Text01 | Smallint01 | Integer01 | Bigint01 | Double01 | Uuid01 => 0,
            Text02 | Smallint02 | Integer02 | Bigint02 | Double02 | Uuid02 => 1,
            Text03 | Smallint03 | Integer03 | Bigint03 | Double03 => 2,
            Text04 | Bigint04 | Double04 => 3,
            Text05 | Bigint05 | Double05 => 4,
            Text06 => 5,
            Text07 => 6,
            Text08 => 7,
            Text09 => 8,
            Text10 => 9,
        }
    }
}

impl std::fmt::Display for HotColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::fmt::Debug for HotColumn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl serde::Serialize for HotColumn {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> serde::Deserialize<'de> for HotColumn {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;
        let raw = std::borrow::Cow::<'de, str>::deserialize(deserializer)?;
        Self::from_name(&raw).ok_or_else(|| D::Error::custom(format!("unknown column {raw:?}")))
    }
}

/// Encoding is the declared representational mapping between an attribute's
/// logical value and its bound hot column.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    #[default]
    Default,
    UnixMs,
    Iso8601,
    BoolText,
    BoolSmallint,
}

/// One value destined for (or read from) a hot column.
#[derive(Clone, Debug, PartialEq)]
pub enum HotValue {
    Text(String),
    Smallint(i16),
    Integer(i32),
    Bigint(i64),
    Double(f64),
    Uuid(uuid::Uuid),
}

impl HotValue {
    pub fn family(&self) -> ColumnFamily {
        match self {
            HotValue::Text(_) => ColumnFamily::Text,
            HotValue::Smallint(_) => ColumnFamily::Smallint,
            HotValue::Integer(_) => ColumnFamily::Integer,
            HotValue::Bigint(_) => ColumnFamily::Bigint,
            HotValue::Double(_) => ColumnFamily::Double,
            HotValue::Uuid(_) => ColumnFamily::Uuid,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{value_family:?} value cannot be stored in column {column}")]
pub struct ColumnTypeError {
    pub column: HotColumn,
    pub value_family: ColumnFamily,
}

/// HotValues holds the bound-column cells of one record as a flat record of
/// per-family arrays, indexed by the compile-time column slot. A cell that is
/// None was not provided by the record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HotValues {
    pub text: [Option<String>; 10],
    pub smallint: [Option<i16>; 3],
    pub integer: [Option<i32>; 3],
    pub bigint: [Option<i64>; 5],
    pub double: [Option<f64>; 5],
    pub uuid: [Option<uuid::Uuid>; 2],
}

impl HotValues {
    pub fn set(&mut self, column: HotColumn, value: HotValue) -> Result<(), ColumnTypeError> {
        let slot = column.slot();
        match (column.family(), value) {
            (ColumnFamily::Text, HotValue::Text(v)) => self.text[slot] = Some(v),
            (ColumnFamily::Smallint, HotValue::Smallint(v)) => self.smallint[slot] = Some(v),
            (ColumnFamily::Integer, HotValue::Integer(v)) => self.integer[slot] = Some(v),
            (ColumnFamily::Bigint, HotValue::Bigint(v)) => self.bigint[slot] = Some(v),
            (ColumnFamily::Double, HotValue::Double(v)) => self.double[slot] = Some(v),
            (ColumnFamily::Uuid, HotValue::Uuid(v)) => self.uuid[slot] = Some(v),
            (_, value) => {
                return Err(ColumnTypeError {
                    column,
                    value_family: value.family(),
                })
            }
        }
        Ok(())
    }

    pub fn get(&self, column: HotColumn) -> Option<HotValue> {
        let slot = column.slot();
        match column.family() {
            ColumnFamily::Text => self.text[slot].clone().map(HotValue::Text),
            ColumnFamily::Smallint => self.smallint[slot].map(HotValue::Smallint),
            ColumnFamily::Integer => self.integer[slot].map(HotValue::Integer),
            ColumnFamily::Bigint => self.bigint[slot].map(HotValue::Bigint),
            ColumnFamily::Double => self.double[slot].map(HotValue::Double),
            ColumnFamily::Uuid => self.uuid[slot].map(HotValue::Uuid),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Set cells in physical column order.
    pub fn iter(&self) -> impl Iterator<Item = (HotColumn, HotValue)> + '_ {
        HotColumn::ALL
            .iter()
            .filter_map(move |&column| self.get(column).map(|value| (column, value)))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn names_round_trip() {
        for &column in HotColumn::ALL {
            assert_eq!(HotColumn::from_name(column.name()), Some(column));
        }
        assert_eq!(HotColumn::from_name("text_11"), None);
        assert_eq!(HotColumn::from_name("double_1"), None);
    }

    #[test]
    fn set_and_iterate_in_column_order() {
        let mut values = HotValues::default();
        values
            .set(HotColumn::Double01, HotValue::Double(150.0))
            .unwrap();
        values
            .set(HotColumn::Text02, HotValue::Text("warm".into()))
            .unwrap();

        let got: Vec<_> = values.iter().collect();
        assert_eq!(
            got,
            vec![
                (HotColumn::Text02, HotValue::Text("warm".into())),
                (HotColumn::Double01, HotValue::Double(150.0)),
            ]
        );
    }

    #[test]
    fn family_mismatch_is_rejected() {
        let mut values = HotValues::default();
        let err = values
            .set(HotColumn::Uuid01, HotValue::Text("oops".into()))
            .unwrap_err();
        assert_eq!(err.column, HotColumn::Uuid01);
        assert_eq!(err.value_family, ColumnFamily::Text);
    }

    #[test]
    fn column_serde_uses_physical_names() {
        let column: HotColumn = serde_json::from_str("\"bigint_04\"").unwrap();
        assert_eq!(column, HotColumn::Bigint04);
        assert_eq!(serde_json::to_string(&column).unwrap(), "\"bigint_04\"");
        assert!(serde_json::from_str::<HotColumn>("\"bigint_06\"").is_err());
    }
}
