use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CompileError;
use crate::types::{CollectionName, Document};

// ---------------------------------------------------------------------------
// FieldPath
// ---------------------------------------------------------------------------

/// A dotted attribute path.
///
/// `"characters.name"` becomes `FieldPath(vec!["characters", "name"])`. When the
/// first segment names a collection or alias in scope, compilers resolve it to
/// that collection's iteration variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Creates a new `FieldPath` from a dotted string like `"residence.city"`.
    pub fn parse(s: &str) -> Result<Self, CompileError> {
        if s.is_empty() {
            return Err(CompileError::EmptyFieldPath);
        }
        let segments: Vec<String> = s.split('.').map(String::from).collect();
        Self::from_segments(segments)
    }

    /// Creates a `FieldPath` from a single attribute name (no dots).
    pub fn single(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Creates a `FieldPath` from pre-split segments.
    pub fn from_segments(segments: Vec<String>) -> Result<Self, CompileError> {
        if segments.is_empty() {
            return Err(CompileError::EmptyFieldPath);
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(CompileError::InvalidFieldPath {
                path: segments.join("."),
                reason: "path contains empty segment".to_string(),
            });
        }
        Ok(Self(segments))
    }

    /// Re-checks the path invariants. Paths built through `From<&str>` are not
    /// validated until this runs.
    pub fn validate(&self) -> Result<(), CompileError> {
        Self::from_segments(self.0.clone()).map(|_| ())
    }

    /// Returns the path segments.
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns true if this is a single-segment path.
    pub fn is_simple(&self) -> bool {
        self.0.len() == 1
    }

    /// Returns the first segment.
    pub fn root(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    /// Returns the last segment.
    pub fn leaf(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Returns the path without its first segment, if any remain.
    pub fn tail(&self) -> Option<FieldPath> {
        if self.0.len() < 2 {
            return None;
        }
        Some(Self(self.0[1..].to_vec()))
    }

    /// Returns the dotted string representation.
    pub fn as_dotted(&self) -> String {
        self.0.join(".")
    }
}

impl From<&str> for FieldPath {
    fn from(s: &str) -> Self {
        Self(s.split('.').map(String::from).collect())
    }
}

impl From<String> for FieldPath {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

/// Comparison operators accepted in predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
    NotLike,
    In,
    NotIn,
    RegexMatch,
    RegexNotMatch,
}

impl Operator {
    /// The canonical spelling of this operator in the document query language.
    ///
    /// `=` is never produced: equality is always `==`.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::RegexMatch => "=~",
            Self::RegexNotMatch => "!~",
        }
    }

    /// The operator that holds exactly when this one does not.
    pub fn negate(self) -> Self {
        match self {
            Self::Eq => Self::Ne,
            Self::Ne => Self::Eq,
            Self::Lt => Self::Gte,
            Self::Lte => Self::Gt,
            Self::Gt => Self::Lte,
            Self::Gte => Self::Lt,
            Self::Like => Self::NotLike,
            Self::NotLike => Self::Like,
            Self::In => Self::NotIn,
            Self::NotIn => Self::In,
            Self::RegexMatch => Self::RegexNotMatch,
            Self::RegexNotMatch => Self::RegexMatch,
        }
    }
}

impl FromStr for Operator {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let op = match normalized.as_str() {
            "=" | "==" => Self::Eq,
            "!=" | "<>" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "like" => Self::Like,
            "not like" => Self::NotLike,
            "in" => Self::In,
            "not in" => Self::NotIn,
            "=~" | "regexp" => Self::RegexMatch,
            "!~" | "not regexp" => Self::RegexNotMatch,
            _ => return Err(CompileError::UnknownOperator(s.to_string())),
        };
        Ok(op)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

// ---------------------------------------------------------------------------
// Boolean / Direction
// ---------------------------------------------------------------------------

/// How a predicate joins the predicates before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Boolean {
    #[default]
    And,
    Or,
}

impl fmt::Display for Boolean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ascending => write!(f, "ASC"),
            Self::Descending => write!(f, "DESC"),
        }
    }
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// The right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Operand {
    /// A literal, sent as a bind parameter.
    Value(Value),
    /// Another attribute, possibly of an outer collection.
    Column(FieldPath),
    /// A pre-rendered expression, passed through unchanged.
    Expression(String),
    /// A nested query whose result is compared against.
    Subquery(Box<QueryState>),
}

impl From<Value> for Operand {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

/// What a single predicate tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PredicateKind {
    /// `field <op> operand`.
    Basic {
        field: FieldPath,
        operator: Operator,
        operand: Operand,
    },
    /// `field IN [values]` or its negation.
    In {
        field: FieldPath,
        values: Vec<Value>,
        negated: bool,
    },
    /// `field == null` or `field != null`.
    Null { field: FieldPath, negated: bool },
    /// Inclusive range test or its negation.
    Between {
        field: FieldPath,
        low: Value,
        high: Value,
        negated: bool,
    },
    /// A parenthesized group of predicates.
    Nested { predicates: Vec<Predicate> },
    /// The nested query returns at least one result (or none, when negated).
    Exists {
        query: Box<QueryState>,
        negated: bool,
    },
    /// `COUNT(<query>) <op> operand`: "has N related records".
    Count {
        query: Box<QueryState>,
        operator: Operator,
        operand: Operand,
    },
    /// A pre-rendered filter expression.
    Raw { expression: String },
}

/// A predicate plus the conjunction joining it to the predicates before it.
///
/// The conjunction of the first predicate in a list is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    pub boolean: Boolean,
    pub kind: PredicateKind,
}

impl Predicate {
    /// Create a basic comparison joined with AND.
    pub fn basic(field: impl Into<FieldPath>, operator: Operator, operand: impl Into<Operand>) -> Self {
        Self::and(PredicateKind::Basic {
            field: field.into(),
            operator,
            operand: operand.into(),
        })
    }

    /// Create a column-to-column comparison joined with AND.
    pub fn column(first: impl Into<FieldPath>, operator: Operator, second: impl Into<FieldPath>) -> Self {
        Self::and(PredicateKind::Basic {
            field: first.into(),
            operator,
            operand: Operand::Column(second.into()),
        })
    }

    /// Wrap a kind with AND.
    pub fn and(kind: PredicateKind) -> Self {
        Self {
            boolean: Boolean::And,
            kind,
        }
    }

    /// Wrap a kind with OR.
    pub fn or(kind: PredicateKind) -> Self {
        Self {
            boolean: Boolean::Or,
            kind,
        }
    }

    /// Returns this predicate joined with OR instead.
    pub fn or_else(mut self) -> Self {
        self.boolean = Boolean::Or;
        self
    }

    fn validate(&self) -> Result<(), CompileError> {
        match &self.kind {
            PredicateKind::Basic { field, operand, .. } => {
                field.validate()?;
                validate_operand(operand)
            }
            PredicateKind::In { field, .. }
            | PredicateKind::Null { field, .. }
            | PredicateKind::Between { field, .. } => field.validate(),
            PredicateKind::Nested { predicates } => {
                predicates.iter().try_for_each(Predicate::validate)
            }
            PredicateKind::Exists { query, .. } => query.validate(),
            PredicateKind::Count { query, operand, .. } => {
                query.validate()?;
                validate_operand(operand)
            }
            PredicateKind::Raw { .. } => Ok(()),
        }
    }
}

fn validate_operand(operand: &Operand) -> Result<(), CompileError> {
    match operand {
        Operand::Column(path) => path.validate(),
        Operand::Subquery(query) => query.validate(),
        Operand::Value(_) | Operand::Expression(_) => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Orderings, projections, aggregates, joins
// ---------------------------------------------------------------------------

/// A single sort key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Ordering {
    Field {
        field: FieldPath,
        direction: Direction,
    },
    /// A pre-rendered sort expression, passed through unchanged.
    Raw { expression: String },
}

/// Aggregate functions over a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Count,
    Max,
    Min,
    Sum,
    Avg,
}

impl AggregateFunction {
    /// Lower-case name, used when deriving output aliases.
    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Max => "max",
            Self::Min => "min",
            Self::Sum => "sum",
            Self::Avg => "avg",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// How a correlated sub-select is reduced to a single value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubSelectKind {
    /// Apply an aggregate function to the sub-query's results.
    Aggregate(AggregateFunction),
    /// Take the first result of a sub-query capped at one row.
    First,
    /// True when the sub-query returns anything.
    Exists,
}

/// A nested query attached to a projection under an output alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubSelect {
    pub query: Box<QueryState>,
    pub kind: SubSelectKind,
}

/// One projected output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Column {
    /// The whole document.
    All,
    /// `alias: var.field`; the alias defaults to the field's leaf.
    Field {
        field: FieldPath,
        alias: Option<String>,
    },
    /// `alias: <sub-select>`.
    SubSelect { alias: String, select: SubSelect },
}

impl Column {
    /// Parses `"field"`, `"field as alias"` or `"*"`.
    pub fn parse(spec: &str) -> Self {
        let (name, alias) = split_alias(spec);
        if name == "*" {
            return Self::All;
        }
        Self::Field {
            field: FieldPath::from(name.as_str()),
            alias,
        }
    }

    /// The output attribute name, when the column has one.
    pub fn output_name(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Field { field, alias } => Some(alias.as_deref().unwrap_or_else(|| field.leaf())),
            Self::SubSelect { alias, .. } => Some(alias),
        }
    }
}

/// Splits `"name as alias"` into its parts.
///
/// Only exactly three space-separated tokens with a case-insensitive `as` in
/// the middle count as aliased; anything else is returned whole as the name.
pub fn split_alias(spec: &str) -> (String, Option<String>) {
    let segments: Vec<&str> = spec.split(' ').collect();
    if segments.len() == 3 && segments[1].eq_ignore_ascii_case("as") {
        return (segments[0].to_string(), Some(segments[2].to_string()));
    }
    (spec.to_string(), None)
}

/// An aggregate request replacing the normal projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub function: AggregateFunction,
    /// Empty means `*`.
    pub columns: Vec<FieldPath>,
}

/// Join flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Cross,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "INNER JOIN"),
            Self::Left => write!(f, "LEFT JOIN"),
            Self::Right => write!(f, "RIGHT JOIN"),
            Self::Cross => write!(f, "CROSS JOIN"),
        }
    }
}

/// A joined collection with its join conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub kind: JoinKind,
    pub collection: CollectionName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on: Vec<Predicate>,
}

impl Join {
    /// An inner join on `first <op> second`.
    pub fn inner(
        collection: CollectionName,
        first: impl Into<FieldPath>,
        operator: Operator,
        second: impl Into<FieldPath>,
    ) -> Self {
        Self {
            kind: JoinKind::Inner,
            collection,
            alias: None,
            on: vec![Predicate::column(first, operator, second)],
        }
    }

    /// A join of any kind with no conditions yet.
    pub fn new(kind: JoinKind, collection: CollectionName) -> Self {
        Self {
            kind,
            collection,
            alias: None,
            on: Vec::new(),
        }
    }

    /// Adds a join condition.
    pub fn on(mut self, predicate: Predicate) -> Self {
        self.on.push(predicate);
        self
    }

    /// Sets the alias used to refer to the joined collection.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The name under which the joined collection is referenced.
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.collection.as_str())
    }
}

/// Pessimistic lock requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    Shared,
    Exclusive,
}

// ---------------------------------------------------------------------------
// QueryState
// ---------------------------------------------------------------------------

/// The abstract, relational-style description of a read or write query.
///
/// A `QueryState` is built by the caller, consumed once by a compiler, and
/// owns no external resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryState {
    pub collection: CollectionName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub distinct: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub joins: Vec<Join>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wheres: Vec<Predicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<FieldPath>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub havings: Vec<Predicate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub orders: Vec<Ordering>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<Aggregate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock: Option<LockMode>,
}

impl QueryState {
    /// A query over `collection` with no clauses.
    pub fn new(collection: CollectionName) -> Self {
        Self {
            collection,
            alias: None,
            columns: Vec::new(),
            distinct: false,
            joins: Vec::new(),
            wheres: Vec::new(),
            groups: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            aggregate: None,
            lock: None,
        }
    }

    /// The name under which the queried collection is referenced.
    pub fn reference_name(&self) -> &str {
        self.alias.as_deref().unwrap_or_else(|| self.collection.as_str())
    }

    /// Refer to the collection by `alias` instead of its name.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Project the given columns; each may be `"field"`, `"field as alias"` or `"*"`.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns.extend(columns.iter().map(|c| Column::parse(c)));
        self
    }

    /// Add an already-built column.
    pub fn add_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Return distinct results only.
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Add a predicate as-is.
    pub fn push_where(mut self, predicate: Predicate) -> Self {
        self.wheres.push(predicate);
        self
    }

    /// `AND field <op> value`.
    pub fn where_op(self, field: impl Into<FieldPath>, operator: Operator, value: Value) -> Self {
        self.push_where(Predicate::basic(field, operator, value))
    }

    /// `OR field <op> value`.
    pub fn or_where_op(self, field: impl Into<FieldPath>, operator: Operator, value: Value) -> Self {
        self.push_where(Predicate::basic(field, operator, value).or_else())
    }

    /// `AND field == value`.
    pub fn where_eq(self, field: impl Into<FieldPath>, value: Value) -> Self {
        self.where_op(field, Operator::Eq, value)
    }

    /// `AND first <op> second` between two attributes.
    pub fn where_column(
        self,
        first: impl Into<FieldPath>,
        operator: Operator,
        second: impl Into<FieldPath>,
    ) -> Self {
        self.push_where(Predicate::column(first, operator, second))
    }

    /// `AND field IN values`.
    pub fn where_in(self, field: impl Into<FieldPath>, values: Vec<Value>) -> Self {
        self.push_where(Predicate::and(PredicateKind::In {
            field: field.into(),
            values,
            negated: false,
        }))
    }

    /// `AND field NOT IN values`.
    pub fn where_not_in(self, field: impl Into<FieldPath>, values: Vec<Value>) -> Self {
        self.push_where(Predicate::and(PredicateKind::In {
            field: field.into(),
            values,
            negated: true,
        }))
    }

    /// `AND field == null`.
    pub fn where_null(self, field: impl Into<FieldPath>) -> Self {
        self.push_where(Predicate::and(PredicateKind::Null {
            field: field.into(),
            negated: false,
        }))
    }

    /// `AND field != null`.
    pub fn where_not_null(self, field: impl Into<FieldPath>) -> Self {
        self.push_where(Predicate::and(PredicateKind::Null {
            field: field.into(),
            negated: true,
        }))
    }

    /// `AND low <= field <= high`.
    pub fn where_between(self, field: impl Into<FieldPath>, low: Value, high: Value) -> Self {
        self.push_where(Predicate::and(PredicateKind::Between {
            field: field.into(),
            low,
            high,
            negated: false,
        }))
    }

    /// A parenthesized group joined with `boolean`.
    pub fn where_nested(self, boolean: Boolean, predicates: Vec<Predicate>) -> Self {
        self.push_where(Predicate {
            boolean,
            kind: PredicateKind::Nested { predicates },
        })
    }

    /// `AND` the nested query has results.
    pub fn where_exists(self, query: QueryState) -> Self {
        self.push_where(Predicate::and(PredicateKind::Exists {
            query: Box::new(query),
            negated: false,
        }))
    }

    /// `AND` the nested query has no results.
    pub fn where_not_exists(self, query: QueryState) -> Self {
        self.push_where(Predicate::and(PredicateKind::Exists {
            query: Box::new(query),
            negated: true,
        }))
    }

    /// `AND COUNT(query) <op> count`.
    pub fn where_count(self, query: QueryState, operator: Operator, count: u64) -> Self {
        self.push_where(Predicate::and(PredicateKind::Count {
            query: Box::new(query),
            operator,
            operand: Operand::Value(Value::from(count)),
        }))
    }

    /// `AND <expression>` passed through unchanged.
    pub fn where_raw(self, expression: impl Into<String>) -> Self {
        self.push_where(Predicate::and(PredicateKind::Raw {
            expression: expression.into(),
        }))
    }

    /// Join another collection.
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Group results by an attribute.
    pub fn group_by(mut self, field: impl Into<FieldPath>) -> Self {
        self.groups.push(field.into());
        self
    }

    /// Filter grouped results.
    pub fn having(mut self, predicate: Predicate) -> Self {
        self.havings.push(predicate);
        self
    }

    /// Sort by an attribute.
    pub fn order_by(mut self, field: impl Into<FieldPath>, direction: Direction) -> Self {
        self.orders.push(Ordering::Field {
            field: field.into(),
            direction,
        });
        self
    }

    /// Sort by a pre-rendered expression.
    pub fn order_by_raw(mut self, expression: impl Into<String>) -> Self {
        self.orders.push(Ordering::Raw {
            expression: expression.into(),
        });
        self
    }

    /// Set the maximum number of results.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the number of results to skip.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Replace the projection with an aggregate.
    pub fn with_aggregate(mut self, function: AggregateFunction, columns: Vec<FieldPath>) -> Self {
        self.aggregate = Some(Aggregate { function, columns });
        self
    }

    /// Request a pessimistic lock.
    pub fn with_lock(mut self, mode: LockMode) -> Self {
        self.lock = Some(mode);
        self
    }

    /// Validate every field path reachable from this query.
    pub fn validate(&self) -> Result<(), CompileError> {
        for column in &self.columns {
            match column {
                Column::Field { field, .. } => field.validate()?,
                Column::SubSelect { select, .. } => select.query.validate()?,
                Column::All => {}
            }
        }
        for join in &self.joins {
            join.on.iter().try_for_each(Predicate::validate)?;
        }
        self.wheres.iter().try_for_each(Predicate::validate)?;
        self.havings.iter().try_for_each(Predicate::validate)?;
        for group in &self.groups {
            group.validate()?;
        }
        for order in &self.orders {
            if let Ordering::Field { field, .. } = order {
                field.validate()?;
            }
        }
        if let Some(aggregate) = &self.aggregate {
            for column in &aggregate.columns {
                column.validate()?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// InsertValues
// ---------------------------------------------------------------------------

/// Values for an insert: one associative record or an already-batched list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InsertValues {
    Record(Document),
    Records(Vec<Document>),
}

impl InsertValues {
    /// True when there is nothing to insert.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Record(doc) => doc.is_empty(),
            Self::Records(docs) => docs.is_empty(),
        }
    }

    /// Normalize to batch form.
    ///
    /// A single record is wrapped as-is. Each record of an existing batch has
    /// its keys sorted so every document in one statement shares a field order.
    pub fn into_batch(self) -> Vec<Document> {
        match self {
            Self::Record(doc) if doc.is_empty() => Vec::new(),
            Self::Record(doc) => vec![doc],
            Self::Records(docs) => docs.into_iter().map(sort_keys).collect(),
        }
    }
}

fn sort_keys(doc: Document) -> Document {
    let mut entries: Vec<(String, Value)> = doc.into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.cmp(b));
    entries.into_iter().collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn characters() -> CollectionName {
        CollectionName::new("characters").unwrap()
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    // -- FieldPath tests --

    #[test]
    fn field_path_parse_dotted() {
        let fp = FieldPath::parse("residence.city").unwrap();
        assert_eq!(fp.segments(), &["residence", "city"]);
        assert!(!fp.is_simple());
        assert_eq!(fp.root(), "residence");
        assert_eq!(fp.leaf(), "city");
        assert_eq!(fp.tail().unwrap().as_dotted(), "city");
    }

    #[test]
    fn field_path_rejects_empty_segments() {
        assert!(matches!(FieldPath::parse(""), Err(CompileError::EmptyFieldPath)));
        assert!(matches!(
            FieldPath::parse("a..b"),
            Err(CompileError::InvalidFieldPath { .. })
        ));
        assert!(FieldPath::from("a.").validate().is_err());
    }

    #[test]
    fn field_path_simple_has_no_tail() {
        assert!(FieldPath::single("name").tail().is_none());
    }

    // -- Operator tests --

    #[test]
    fn equals_normalizes_to_double_equals() {
        assert_eq!("=".parse::<Operator>().unwrap(), Operator::Eq);
        assert_eq!(Operator::Eq.symbol(), "==");
        assert_eq!("<>".parse::<Operator>().unwrap(), Operator::Ne);
    }

    #[test]
    fn operator_parse_is_case_insensitive() {
        assert_eq!("NOT LIKE".parse::<Operator>().unwrap(), Operator::NotLike);
        assert_eq!("Not In".parse::<Operator>().unwrap(), Operator::NotIn);
    }

    #[test]
    fn unknown_operator_is_rejected() {
        assert!(matches!(
            "<=>".parse::<Operator>(),
            Err(CompileError::UnknownOperator(_))
        ));
    }

    #[test]
    fn operator_negation_is_involutive() {
        for op in [Operator::Eq, Operator::Lt, Operator::Like, Operator::In] {
            assert_eq!(op.negate().negate(), op);
        }
    }

    // -- Column / alias tests --

    #[test]
    fn split_alias_requires_three_tokens() {
        assert_eq!(split_alias("posts as articles"), ("posts".into(), Some("articles".into())));
        assert_eq!(split_alias("posts AS articles"), ("posts".into(), Some("articles".into())));
        assert_eq!(split_alias("posts"), ("posts".into(), None));
        assert_eq!(split_alias("posts as"), ("posts as".into(), None));
        assert_eq!(split_alias("a b c"), ("a b c".into(), None));
    }

    #[test]
    fn column_parse() {
        assert_eq!(Column::parse("*"), Column::All);
        let col = Column::parse("age as years");
        assert_eq!(col.output_name(), Some("years"));
        let col = Column::parse("residence.city");
        assert_eq!(col.output_name(), Some("city"));
    }

    // -- QueryState tests --

    #[test]
    fn builder_accumulates_clauses() {
        let q = QueryState::new(characters())
            .select(&["name", "age"])
            .where_eq("alive", json!(true))
            .or_where_op("age", Operator::Gt, json!(40))
            .order_by("name", Direction::Ascending)
            .with_limit(10)
            .with_offset(5);
        assert_eq!(q.columns.len(), 2);
        assert_eq!(q.wheres.len(), 2);
        assert_eq!(q.wheres[1].boolean, Boolean::Or);
        assert_eq!(q.limit, Some(10));
        assert_eq!(q.offset, Some(5));
        assert!(q.validate().is_ok());
    }

    #[test]
    fn validate_reaches_nested_queries() {
        let inner = QueryState::new(characters()).where_eq("a..b", json!(1));
        let q = QueryState::new(characters()).where_exists(inner);
        assert!(q.validate().is_err());
    }

    #[test]
    fn reference_name_prefers_alias() {
        let q = QueryState::new(characters());
        assert_eq!(q.reference_name(), "characters");
        assert_eq!(q.with_alias("c").reference_name(), "c");
    }

    #[test]
    fn query_state_serde_roundtrip() {
        let q = QueryState::new(characters())
            .where_in("name", vec![json!("Ned"), json!("Arya")])
            .order_by_raw("RAND()");
        let json = serde_json::to_string(&q).unwrap();
        let back: QueryState = serde_json::from_str(&json).unwrap();
        assert_eq!(q, back);
    }

    // -- InsertValues tests --

    #[test]
    fn single_record_keeps_field_order() {
        let values = InsertValues::Record(doc(json!({"surname": "Stark", "name": "Ned"})));
        let batch = values.into_batch();
        let keys: Vec<&String> = batch[0].keys().collect();
        assert_eq!(keys, ["surname", "name"]);
    }

    #[test]
    fn batch_records_get_sorted_keys() {
        let values = InsertValues::Records(vec![
            doc(json!({"surname": "Stark", "name": "Ned"})),
            doc(json!({"name": "Arya", "surname": "Stark"})),
        ]);
        let batch = values.into_batch();
        for record in &batch {
            let keys: Vec<&String> = record.keys().collect();
            assert_eq!(keys, ["name", "surname"]);
        }
    }

    #[test]
    fn empty_values_normalize_to_empty_batch() {
        assert!(InsertValues::Record(Document::new()).into_batch().is_empty());
        assert!(InsertValues::Records(vec![]).is_empty());
    }
}
