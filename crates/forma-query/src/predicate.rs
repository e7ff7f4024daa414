use crate::dsl::{split_value, ConditionNode, Direction, Logic, Op, SortKey};
use crate::Error;
use forma_models::{AttrId, ColumnFamily, Encoding, HotColumn, Scalar, ValueType};
use forma_registry::AttributeCache;

/// Where a predicate evaluates: against a bound hot column of the entity
/// table, or against EAV tuples.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Storage {
    Main {
        column: HotColumn,
        encoding: Encoding,
    },
    Eav,
}

/// The SQL comparison a wire operator lowers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
}

impl CmpOp {
    pub fn sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Like => "LIKE",
        }
    }
}

/// The LIKE pattern shape, when the operator is a pattern match.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pattern {
    None,
    Prefix,
    Contains,
}

/// A lossy physical encoding the planner must compensate for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fallback {
    None,
    /// The attribute lives in a double column; equality becomes a BETWEEN
    /// range around the literal.
    NumericToDouble,
    /// Booleans stored as `"true"`/`"false"` text.
    BoolText,
    /// Booleans stored as 0/1 smallints.
    BoolSmallint,
}

/// One resolved attribute predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub path: String,
    pub attr_id: AttrId,
    pub value_type: ValueType,
    pub storage: Storage,
    pub op: CmpOp,
    pub pattern: Pattern,
    pub fallback: Fallback,
    pub literal: Scalar,
}

/// The normalised predicate tree the planner lowers. The boolean structure
/// of the wire condition is preserved exactly.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Composite {
        logic: Logic,
        children: Vec<Predicate>,
    },
    Leaf(Leaf),
}

/// Resolve and validate a wire condition tree against a schema's attribute
/// cache.
pub fn normalize(cache: &AttributeCache, node: &ConditionNode) -> Result<Predicate, Error> {
    match node {
        ConditionNode::Composite { logic, conditions } => {
            if conditions.is_empty() {
                return Err(Error::EmptyComposite);
            }
            let children = conditions
                .iter()
                .map(|child| normalize(cache, child))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Predicate::Composite {
                logic: *logic,
                children,
            })
        }
        ConditionNode::Leaf { attr, value } => normalize_leaf(cache, attr, value).map(Predicate::Leaf),
    }
}

fn normalize_leaf(cache: &AttributeCache, attr: &str, value: &str) -> Result<Leaf, Error> {
    let meta = cache.attribute(attr).ok_or_else(|| Error::UnknownAttribute {
        path: attr.to_string(),
    })?;
    let (op, literal) = split_value(value)?;

    if op.is_pattern() && meta.value_type != ValueType::Text {
        return Err(Error::TextOperator {
            op,
            path: attr.to_string(),
            value_type: meta.value_type,
        });
    }
    if op.is_ordering() && meta.value_type == ValueType::Bool {
        return Err(Error::BoolOrdering {
            op,
            path: attr.to_string(),
        });
    }

    let literal = Scalar::from_literal(meta.value_type, literal).map_err(|err| Error::Literal {
        path: attr.to_string(),
        err,
    })?;

    let storage = match &meta.binding {
        Some(binding) => Storage::Main {
            column: binding.column,
            encoding: binding.encoding,
        },
        None => Storage::Eav,
    };

    let fallback = match storage {
        Storage::Main { column, encoding } => {
            if column.family() == ColumnFamily::Double && meta.value_type.is_numeric() {
                Fallback::NumericToDouble
            } else if encoding == Encoding::BoolText {
                Fallback::BoolText
            } else if encoding == Encoding::BoolSmallint {
                Fallback::BoolSmallint
            } else {
                Fallback::None
            }
        }
        Storage::Eav => Fallback::None,
    };

    let (op, pattern) = match op {
        Op::Equals => (CmpOp::Eq, Pattern::None),
        Op::NotEquals => (CmpOp::Ne, Pattern::None),
        Op::Gt => (CmpOp::Gt, Pattern::None),
        Op::Gte => (CmpOp::Ge, Pattern::None),
        Op::Lt => (CmpOp::Lt, Pattern::None),
        Op::Lte => (CmpOp::Le, Pattern::None),
        Op::StartsWith => (CmpOp::Like, Pattern::Prefix),
        Op::Contains => (CmpOp::Like, Pattern::Contains),
    };

    Ok(Leaf {
        path: attr.to_string(),
        attr_id: meta.id,
        value_type: meta.value_type,
        storage,
        op,
        pattern,
        fallback,
        literal,
    })
}

/// One resolved sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSort {
    pub path: String,
    pub attr_id: AttrId,
    pub value_type: ValueType,
    pub storage: Storage,
    pub direction: Direction,
}

pub fn resolve_sort(cache: &AttributeCache, keys: &[SortKey]) -> Result<Vec<ResolvedSort>, Error> {
    keys.iter()
        .map(|key| {
            let meta = cache
                .attribute(&key.attr)
                .ok_or_else(|| Error::UnknownAttribute {
                    path: key.attr.clone(),
                })?;
            let storage = match &meta.binding {
                Some(binding) => Storage::Main {
                    column: binding.column,
                    encoding: binding.encoding,
                },
                None => Storage::Eav,
            };
            Ok(ResolvedSort {
                path: meta.path.clone(),
                attr_id: meta.id,
                value_type: meta.value_type,
                storage,
                direction: key.direction,
            })
        })
        .collect()
}

/// Build the filter of one cross-schema search arm: `contains` over the
/// schema's text attributes, or over the caller's chosen subset of them.
///
/// Returns None when the schema exposes none of the requested attributes,
/// which excludes it from the search rather than failing it.
pub fn search_predicate(
    cache: &AttributeCache,
    needle: &str,
    attributes: Option<&[String]>,
) -> Result<Option<Predicate>, Error> {
    let mut leaves = Vec::new();

    match attributes {
        Some(paths) => {
            for path in paths {
                let Some(meta) = cache.attribute(path) else {
                    continue;
                };
                if meta.value_type != ValueType::Text {
                    return Err(Error::NotSearchable { path: path.clone() });
                }
                leaves.push(normalize_leaf(cache, path, &format!("contains:{needle}"))?);
            }
        }
        None => {
            for meta in cache.text_attributes() {
                leaves.push(normalize_leaf(cache, &meta.path, &format!("contains:{needle}"))?);
            }
        }
    }

    Ok(match leaves.len() {
        0 => None,
        1 => Some(Predicate::Leaf(leaves.pop().expect("one leaf is present"))),
        _ => Some(Predicate::Composite {
            logic: Logic::Or,
            children: leaves.into_iter().map(Predicate::Leaf).collect(),
        }),
    })
}
