use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};

/// ValueType is the logical type of an attribute, declared in the schema
/// document. It decides coercion of JSON leaves and wire literals, which EAV
/// value column a tuple lands in, and which hot-column families an attribute
/// may bind to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Text,
    Smallint,
    Integer,
    Bigint,
    Double,
    Date,
    Datetime,
    Uuid,
    Bool,
}

impl ValueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Text => "text",
            ValueType::Smallint => "smallint",
            ValueType::Integer => "integer",
            ValueType::Bigint => "bigint",
            ValueType::Double => "double",
            ValueType::Date => "date",
            ValueType::Datetime => "datetime",
            ValueType::Uuid => "uuid",
            ValueType::Bool => "bool",
        }
    }

    /// True for types whose EAV tuples populate `value_numeric`.
    /// All others populate `value_text`.
    pub fn is_eav_numeric(&self) -> bool {
        matches!(
            self,
            ValueType::Smallint
                | ValueType::Integer
                | ValueType::Bigint
                | ValueType::Double
                | ValueType::Bool
        )
    }

    /// True for the integer and floating types, which may bind to a
    /// `double_NN` column under the numeric-to-double fallback.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ValueType::Smallint | ValueType::Integer | ValueType::Bigint | ValueType::Double
        )
    }
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CoerceError {
    #[error("expected {expected}, found {found}")]
    Mismatch {
        expected: ValueType,
        found: &'static str,
    },
    #[error("value {value:?} is out of range for {expected}")]
    OutOfRange { expected: ValueType, value: String },
    #[error("cannot parse {value:?} as {expected}")]
    Parse { expected: ValueType, value: String },
    #[error("{expected} value is stored in the wrong eav column")]
    EavColumn { expected: ValueType },
}

/// Scalar is one coerced attribute value: the meeting point between JSON
/// leaves, wire literals, hot-column cells and EAV value columns.
#[derive(Clone, Debug, PartialEq)]
pub enum Scalar {
    Text(String),
    Smallint(i16),
    Integer(i32),
    Bigint(i64),
    Double(f64),
    Date(NaiveDate),
    Datetime(DateTime<Utc>),
    Uuid(uuid::Uuid),
    Bool(bool),
}

impl Scalar {
    /// Coerce a JSON leaf to `value_type`. Containers and nulls are the
    /// caller's concern; passing one is reported as a mismatch.
    pub fn from_json(value_type: ValueType, value: &serde_json::Value) -> Result<Self, CoerceError> {
        use serde_json::Value;

        let mismatch = || CoerceError::Mismatch {
            expected: value_type,
            found: json_type_name(value),
        };

        match value_type {
            ValueType::Text => match value {
                Value::String(s) => Ok(Scalar::Text(s.clone())),
                _ => Err(mismatch()),
            },
            ValueType::Smallint => match value {
                Value::Number(_) => {
                    let wide = integral(value).ok_or_else(mismatch)?;
                    narrow_i16(value_type, wide).map(Scalar::Smallint)
                }
                Value::String(s) => parse_int::<i16>(value_type, s).map(Scalar::Smallint),
                _ => Err(mismatch()),
            },
            ValueType::Integer => match value {
                Value::Number(_) => {
                    let wide = integral(value).ok_or_else(mismatch)?;
                    narrow_i32(value_type, wide).map(Scalar::Integer)
                }
                Value::String(s) => parse_int::<i32>(value_type, s).map(Scalar::Integer),
                _ => Err(mismatch()),
            },
            ValueType::Bigint => match value {
                Value::Number(_) => integral(value).map(Scalar::Bigint).ok_or_else(mismatch),
                Value::String(s) => parse_int::<i64>(value_type, s).map(Scalar::Bigint),
                _ => Err(mismatch()),
            },
            ValueType::Double => match value {
                Value::Number(n) => n.as_f64().map(Scalar::Double).ok_or_else(mismatch),
                Value::String(s) => s.parse::<f64>().map(Scalar::Double).map_err(|_| {
                    CoerceError::Parse {
                        expected: value_type,
                        value: s.clone(),
                    }
                }),
                _ => Err(mismatch()),
            },
            ValueType::Date => match value {
                Value::String(s) => parse_date(s),
                _ => Err(mismatch()),
            },
            ValueType::Datetime => match value {
                Value::String(s) => parse_datetime(s),
                Value::Number(_) => {
                    let millis = integral(value).ok_or_else(mismatch)?;
                    datetime_from_millis(millis)
                }
                _ => Err(mismatch()),
            },
            ValueType::Uuid => match value {
                Value::String(s) => {
                    uuid::Uuid::parse_str(s)
                        .map(Scalar::Uuid)
                        .map_err(|_| CoerceError::Parse {
                            expected: value_type,
                            value: s.clone(),
                        })
                }
                _ => Err(mismatch()),
            },
            ValueType::Bool => match value {
                Value::Bool(b) => Ok(Scalar::Bool(*b)),
                Value::Number(_) => match integral(value) {
                    Some(0) => Ok(Scalar::Bool(false)),
                    Some(1) => Ok(Scalar::Bool(true)),
                    _ => Err(mismatch()),
                },
                Value::String(s) => parse_bool(s).map(Scalar::Bool).ok_or(CoerceError::Parse {
                    expected: value_type,
                    value: s.clone(),
                }),
                _ => Err(mismatch()),
            },
        }
    }

    /// Coerce a wire literal (the text after the operator token) to
    /// `value_type`. Numerics try i64 first, then f64.
    pub fn from_literal(value_type: ValueType, literal: &str) -> Result<Self, CoerceError> {
        let parse = || CoerceError::Parse {
            expected: value_type,
            value: literal.to_string(),
        };

        match value_type {
            ValueType::Text => Ok(Scalar::Text(literal.to_string())),
            ValueType::Smallint => parse_int::<i16>(value_type, literal).map(Scalar::Smallint),
            ValueType::Integer => parse_int::<i32>(value_type, literal).map(Scalar::Integer),
            ValueType::Bigint => parse_int::<i64>(value_type, literal).map(Scalar::Bigint),
            ValueType::Double => match literal.parse::<i64>() {
                Ok(n) => Ok(Scalar::Double(n as f64)),
                Err(_) => literal.parse::<f64>().map(Scalar::Double).map_err(|_| parse()),
            },
            ValueType::Date => parse_date(literal),
            ValueType::Datetime => parse_datetime(literal),
            ValueType::Uuid => uuid::Uuid::parse_str(literal)
                .map(Scalar::Uuid)
                .map_err(|_| parse()),
            ValueType::Bool => parse_bool(literal).map(Scalar::Bool).ok_or_else(parse),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Scalar::Text(_) => ValueType::Text,
            Scalar::Smallint(_) => ValueType::Smallint,
            Scalar::Integer(_) => ValueType::Integer,
            Scalar::Bigint(_) => ValueType::Bigint,
            Scalar::Double(_) => ValueType::Double,
            Scalar::Date(_) => ValueType::Date,
            Scalar::Datetime(_) => ValueType::Datetime,
            Scalar::Uuid(_) => ValueType::Uuid,
            Scalar::Bool(_) => ValueType::Bool,
        }
    }

    /// The JSON rendering used on reconstruction.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Scalar::Text(s) => Value::String(s.clone()),
            Scalar::Smallint(v) => Value::from(*v),
            Scalar::Integer(v) => Value::from(*v),
            Scalar::Bigint(v) => Value::from(*v),
            Scalar::Double(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Scalar::Date(d) => Value::String(format_date(d)),
            Scalar::Datetime(dt) => Value::String(format_datetime(dt)),
            Scalar::Uuid(u) => Value::String(u.to_string()),
            Scalar::Bool(b) => Value::Bool(*b),
        }
    }

    /// Split into the `(value_text, value_numeric)` EAV columns.
    /// Exactly one side is always Some.
    pub fn eav_value(&self) -> (Option<String>, Option<f64>) {
        match self {
            Scalar::Text(s) => (Some(s.clone()), None),
            Scalar::Uuid(u) => (Some(u.to_string()), None),
            Scalar::Date(d) => (Some(format_date(d)), None),
            Scalar::Datetime(dt) => (Some(format_datetime(dt)), None),
            Scalar::Smallint(v) => (None, Some(f64::from(*v))),
            Scalar::Integer(v) => (None, Some(f64::from(*v))),
            Scalar::Bigint(v) => (None, Some(*v as f64)),
            Scalar::Double(v) => (None, Some(*v)),
            Scalar::Bool(b) => (None, Some(if *b { 1.0 } else { 0.0 })),
        }
    }

    /// Rebuild a Scalar from the EAV value columns.
    pub fn from_eav(
        value_type: ValueType,
        value_text: Option<&str>,
        value_numeric: Option<f64>,
    ) -> Result<Self, CoerceError> {
        let wrong_column = || CoerceError::EavColumn {
            expected: value_type,
        };

        if value_type.is_eav_numeric() {
            let v = value_numeric.ok_or_else(wrong_column)?;
            match value_type {
                ValueType::Smallint => narrow_i16(value_type, whole(value_type, v)?).map(Scalar::Smallint),
                ValueType::Integer => narrow_i32(value_type, whole(value_type, v)?).map(Scalar::Integer),
                ValueType::Bigint => whole(value_type, v).map(Scalar::Bigint),
                ValueType::Double => Ok(Scalar::Double(v)),
                ValueType::Bool => Ok(Scalar::Bool(v != 0.0)),
                _ => unreachable!("is_eav_numeric covers exactly these types"),
            }
        } else {
            let s = value_text.ok_or_else(wrong_column)?;
            match value_type {
                ValueType::Text => Ok(Scalar::Text(s.to_string())),
                ValueType::Uuid => uuid::Uuid::parse_str(s)
                    .map(Scalar::Uuid)
                    .map_err(|_| CoerceError::Parse {
                        expected: value_type,
                        value: s.to_string(),
                    }),
                ValueType::Date => parse_date(s),
                ValueType::Datetime => parse_datetime(s),
                _ => unreachable!("remaining types are text-valued"),
            }
        }
    }
}

/// The token set accepted for boolean literals, case-insensitive.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Canonical datetime rendering: RFC3339, UTC, millisecond precision.
/// EAV tuples store this form, which makes lexicographic comparison of
/// `value_text` agree with chronological order.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn format_date(d: &NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn parse_date(s: &str) -> Result<Scalar, CoerceError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map(Scalar::Date)
        .map_err(|_| CoerceError::Parse {
            expected: ValueType::Date,
            value: s.to_string(),
        })
}

fn parse_datetime(s: &str) -> Result<Scalar, CoerceError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| Scalar::Datetime(dt.with_timezone(&Utc)))
        .map_err(|_| CoerceError::Parse {
            expected: ValueType::Datetime,
            value: s.to_string(),
        })
}

pub(crate) fn datetime_from_millis(millis: i64) -> Result<Scalar, CoerceError> {
    match Utc.timestamp_millis_opt(millis) {
        chrono::LocalResult::Single(dt) => Ok(Scalar::Datetime(dt)),
        _ => Err(CoerceError::OutOfRange {
            expected: ValueType::Datetime,
            value: millis.to_string(),
        }),
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// An i64 view of a JSON number, accepting floats with a zero fraction.
fn integral(value: &serde_json::Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    match value.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
            Some(f as i64)
        }
        _ => None,
    }
}

fn whole(value_type: ValueType, v: f64) -> Result<i64, CoerceError> {
    if v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Ok(v as i64)
    } else {
        Err(CoerceError::OutOfRange {
            expected: value_type,
            value: v.to_string(),
        })
    }
}

fn narrow_i16(value_type: ValueType, wide: i64) -> Result<i16, CoerceError> {
    i16::try_from(wide).map_err(|_| CoerceError::OutOfRange {
        expected: value_type,
        value: wide.to_string(),
    })
}

fn narrow_i32(value_type: ValueType, wide: i64) -> Result<i32, CoerceError> {
    i32::try_from(wide).map_err(|_| CoerceError::OutOfRange {
        expected: value_type,
        value: wide.to_string(),
    })
}

fn parse_int<T: std::str::FromStr>(value_type: ValueType, s: &str) -> Result<T, CoerceError> {
    s.trim().parse::<T>().map_err(|_| CoerceError::Parse {
        expected: value_type,
        value: s.to_string(),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_coercion_happy_paths() {
        assert_eq!(
            Scalar::from_json(ValueType::Text, &json!("")).unwrap(),
            Scalar::Text(String::new())
        );
        assert_eq!(
            Scalar::from_json(ValueType::Smallint, &json!(7)).unwrap(),
            Scalar::Smallint(7)
        );
        assert_eq!(
            Scalar::from_json(ValueType::Bigint, &json!(1_234_567_890_123i64)).unwrap(),
            Scalar::Bigint(1_234_567_890_123)
        );
        assert_eq!(
            Scalar::from_json(ValueType::Double, &json!(1.5)).unwrap(),
            Scalar::Double(1.5)
        );
        assert_eq!(
            Scalar::from_json(ValueType::Integer, &json!(2.0)).unwrap(),
            Scalar::Integer(2)
        );
        assert_eq!(
            Scalar::from_json(ValueType::Bool, &json!(1)).unwrap(),
            Scalar::Bool(true)
        );
        assert_eq!(
            Scalar::from_json(ValueType::Date, &json!("2024-03-09")).unwrap(),
            Scalar::Date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())
        );
    }

    #[test]
    fn json_coercion_failures() {
        assert!(matches!(
            Scalar::from_json(ValueType::Smallint, &json!(40_000)),
            Err(CoerceError::OutOfRange { .. })
        ));
        assert!(matches!(
            Scalar::from_json(ValueType::Text, &json!(3)),
            Err(CoerceError::Mismatch { found: "number", .. })
        ));
        assert!(matches!(
            Scalar::from_json(ValueType::Integer, &json!(1.25)),
            Err(CoerceError::Mismatch { .. })
        ));
        assert!(matches!(
            Scalar::from_json(ValueType::Uuid, &json!("not-a-uuid")),
            Err(CoerceError::Parse { .. })
        ));
    }

    #[test]
    fn literal_coercion() {
        assert_eq!(
            Scalar::from_literal(ValueType::Double, "42").unwrap(),
            Scalar::Double(42.0)
        );
        assert_eq!(
            Scalar::from_literal(ValueType::Double, "41.5").unwrap(),
            Scalar::Double(41.5)
        );
        assert_eq!(
            Scalar::from_literal(ValueType::Bool, "Yes").unwrap(),
            Scalar::Bool(true)
        );
        assert_eq!(
            Scalar::from_literal(ValueType::Text, "gt:odd").unwrap(),
            Scalar::Text("gt:odd".to_string())
        );
        assert!(Scalar::from_literal(ValueType::Bigint, "12x").is_err());
        assert!(Scalar::from_literal(ValueType::Datetime, "yesterday").is_err());
    }

    #[test]
    fn eav_values_are_exclusive() {
        let cases = [
            Scalar::Text("a".into()),
            Scalar::Smallint(1),
            Scalar::Integer(2),
            Scalar::Bigint(3),
            Scalar::Double(4.5),
            Scalar::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()),
            Scalar::Datetime(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            Scalar::Uuid(uuid::Uuid::nil()),
            Scalar::Bool(true),
        ];
        for scalar in cases {
            let (text, numeric) = scalar.eav_value();
            assert_eq!(
                text.is_some(),
                numeric.is_none(),
                "exactly one column must be set for {scalar:?}"
            );
        }
    }

    #[test]
    fn eav_round_trips() {
        let dt = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        for scalar in [
            Scalar::Text("x".into()),
            Scalar::Smallint(-3),
            Scalar::Bigint(1 << 40),
            Scalar::Double(0.25),
            Scalar::Datetime(dt),
            Scalar::Bool(false),
        ] {
            let (text, numeric) = scalar.eav_value();
            let back =
                Scalar::from_eav(scalar.value_type(), text.as_deref(), numeric).unwrap();
            assert_eq!(back, scalar);
        }
    }

    #[test]
    fn datetime_canonical_form_is_utc_millis() {
        let parsed = Scalar::from_literal(ValueType::Datetime, "2024-01-02T05:04:05.1+02:00");
        let Ok(Scalar::Datetime(dt)) = parsed else {
            panic!("expected datetime");
        };
        assert_eq!(format_datetime(&dt), "2024-01-02T03:04:05.100Z");
    }
}
