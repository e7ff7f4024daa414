use crate::Error;

/// ConditionNode is the wire form of a filter: a recursive tree of composite
/// and/or groups over attribute predicates. Both the compact keys (`l`, `c`,
/// `a`, `v`) and their long spellings are accepted.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Composite {
        #[serde(rename = "l", alias = "logic")]
        logic: Logic,
        #[serde(rename = "c", alias = "conditions")]
        conditions: Vec<ConditionNode>,
    },
    Leaf {
        #[serde(rename = "a", alias = "attr")]
        attr: String,
        #[serde(rename = "v", alias = "value")]
        value: String,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    And,
    Or,
}

impl Logic {
    pub fn sql(self) -> &'static str {
        match self {
            Logic::And => "AND",
            Logic::Or => "OR",
        }
    }
}

/// The wire operators. A leaf value is `<op>:<literal>`, or a bare literal
/// which means `equals`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Op {
    Equals,
    NotEquals,
    Gt,
    Gte,
    Lt,
    Lte,
    StartsWith,
    Contains,
}

impl Op {
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "equals" => Op::Equals,
            "not_equals" => Op::NotEquals,
            "gt" => Op::Gt,
            "gte" => Op::Gte,
            "lt" => Op::Lt,
            "lte" => Op::Lte,
            "starts_with" => Op::StartsWith,
            "contains" => Op::Contains,
            _ => return None,
        })
    }

    pub fn token(self) -> &'static str {
        match self {
            Op::Equals => "equals",
            Op::NotEquals => "not_equals",
            Op::Gt => "gt",
            Op::Gte => "gte",
            Op::Lt => "lt",
            Op::Lte => "lte",
            Op::StartsWith => "starts_with",
            Op::Contains => "contains",
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, Op::Gt | Op::Gte | Op::Lt | Op::Lte)
    }

    pub fn is_pattern(self) -> bool {
        matches!(self, Op::StartsWith | Op::Contains)
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.token())
    }
}

/// Split a wire value into its operator and literal.
///
/// The value is split at the first `:`. A prefix that names a known operator
/// selects it; a prefix that merely looks like an operator token (lowercase
/// letters and underscores) is rejected so that typos fail loudly. Anything
/// else, e.g. the `10:30` of a timestamp literal, falls through to `equals`
/// on the whole value.
pub fn split_value(value: &str) -> Result<(Op, &str), Error> {
    if let Some((token, literal)) = value.split_once(':') {
        if let Some(op) = Op::from_token(token) {
            return Ok((op, literal));
        }
        if !token.is_empty()
            && token
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_')
        {
            return Err(Error::UnknownOperator {
                token: token.to_string(),
            });
        }
    }
    Ok((Op::Equals, value))
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn sql(self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One sort key of a query's sort specification, in significance order.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SortKey {
    pub attr: String,
    #[serde(default)]
    pub direction: Direction,
}

/// Wire pagination. `per_page` is clamped to the store's limit and `page` to
/// at least 1 when the window is computed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_per_page", alias = "items_per_page")]
    pub per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

/// The LIMIT/OFFSET window of a clamped pagination request.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageWindow {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub fn window(&self, max_limit: u32) -> PageWindow {
        let limit = self.per_page.clamp(1, max_limit.max(1));
        let page = self.page.max(1);
        PageWindow {
            limit: i64::from(limit),
            offset: i64::from(page - 1) * i64::from(limit),
        }
    }
}
