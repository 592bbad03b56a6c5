//! Structured AQL: expressions, operations, bind parameters and rendering.
//!
//! Statements are built as data so they can be rendered to text for the
//! server and also evaluated in-process by `MemoryDatabase`.

use std::fmt;

use docforge_core::query::{Direction, Operator};
use docforge_core::CompileError;
use serde::Serialize;
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// Logical connective in a flat filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Logical {
    And,
    Or,
}

impl fmt::Display for Logical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

/// An AQL expression.
#[derive(Debug, Clone, PartialEq)]
pub enum AqlExpr {
    /// An inline JSON literal.
    Literal(Value),
    /// `@name`.
    Bind(String),
    /// A declared variable, including the `NEW`/`OLD` pseudo-variables.
    Variable(String),
    /// A collection used as a data source.
    Collection(String),
    /// `base.a.b`.
    Attribute { base: Box<AqlExpr>, path: Vec<String> },
    /// `left <op> right`.
    Compare {
        left: Box<AqlExpr>,
        op: Operator,
        right: Box<AqlExpr>,
    },
    /// `first AND b OR c …`, rendered flat so AND binds tighter than OR.
    Chain {
        first: Box<AqlExpr>,
        rest: Vec<(Logical, AqlExpr)>,
    },
    /// `( inner )`.
    Group(Box<AqlExpr>),
    /// `NOT inner`.
    Not(Box<AqlExpr>),
    /// `FN(args…)`.
    Call { function: String, args: Vec<AqlExpr> },
    /// `( FOR … RETURN … )`.
    Subquery(Box<AqlQuery>),
    /// `{ key: value, … }`.
    Object(Vec<(String, AqlExpr)>),
    /// `[ a, b, … ]`.
    Array(Vec<AqlExpr>),
    /// Pre-rendered text, emitted unchanged.
    Raw(String),
}

impl AqlExpr {
    pub fn var(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// `base.path…`; an empty path yields `base` itself.
    pub fn attribute(base: AqlExpr, path: &[String]) -> Self {
        if path.is_empty() {
            return base;
        }
        Self::Attribute {
            base: Box::new(base),
            path: path.to_vec(),
        }
    }

    /// `variable.name`.
    pub fn field(variable: &str, name: &str) -> Self {
        Self::attribute(Self::var(variable), &[name.to_string()])
    }

    pub fn compare(left: AqlExpr, op: Operator, right: AqlExpr) -> Self {
        Self::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn call(function: impl Into<String>, args: Vec<AqlExpr>) -> Self {
        Self::Call {
            function: function.into(),
            args,
        }
    }

    pub fn subquery(query: AqlQuery) -> Self {
        Self::Subquery(Box::new(query))
    }

    pub fn group(inner: AqlExpr) -> Self {
        Self::Group(Box::new(inner))
    }

    /// Joins `parts` with `op`. Returns `None` for an empty list.
    pub fn join(op: Logical, parts: Vec<AqlExpr>) -> Option<Self> {
        let mut iter = parts.into_iter();
        let first = iter.next()?;
        let rest: Vec<(Logical, AqlExpr)> = iter.map(|e| (op, e)).collect();
        if rest.is_empty() {
            return Some(first);
        }
        Some(Self::Chain {
            first: Box::new(first),
            rest,
        })
    }
}

impl fmt::Display for AqlExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v}"),
            Self::Bind(name) => write!(f, "@{name}"),
            Self::Variable(name) => write!(f, "{name}"),
            Self::Collection(name) => write!(f, "{}", quote_identifier(name)),
            Self::Attribute { base, path } => {
                write!(f, "{base}")?;
                for segment in path {
                    write!(f, ".{}", quote_identifier(segment))?;
                }
                Ok(())
            }
            Self::Compare { left, op, right } => write!(f, "{left} {op} {right}"),
            Self::Chain { first, rest } => {
                write!(f, "{first}")?;
                for (op, expr) in rest {
                    write!(f, " {op} {expr}")?;
                }
                Ok(())
            }
            Self::Group(inner) => write!(f, "({inner})"),
            Self::Not(inner) => write!(f, "NOT {inner}"),
            Self::Call { function, args } => {
                write!(f, "{function}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Self::Subquery(query) => write!(f, "({query})"),
            Self::Object(entries) => {
                if entries.is_empty() {
                    return write!(f, "{{}}");
                }
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: {value}", object_key(key))?;
                }
                write!(f, " }}")
            }
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Raw(text) => write!(f, "{text}"),
        }
    }
}

/// True when `name` can appear unquoted after a dot or as an object key.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `name`, backtick-quoted unless it is a plain identifier.
pub fn quote_identifier(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "\\`"))
    }
}

fn object_key(name: &str) -> String {
    if is_plain_identifier(name) {
        name.to_string()
    } else {
        Value::String(name.to_string()).to_string()
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// One `SORT` key.
#[derive(Debug, Clone, PartialEq)]
pub enum SortKey {
    Expr { expr: AqlExpr, direction: Direction },
    Raw(String),
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expr { expr, direction } => write!(f, "{expr} {direction}"),
            Self::Raw(text) => write!(f, "{text}"),
        }
    }
}

/// A `COLLECT` operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Collect {
    pub groups: Vec<(String, AqlExpr)>,
    pub aggregates: Vec<(String, AqlExpr)>,
    pub count_into: Option<String>,
}

impl fmt::Display for Collect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "COLLECT")?;
        for (i, (name, expr)) in self.groups.iter().enumerate() {
            let sep = if i == 0 { " " } else { ", " };
            write!(f, "{sep}{name} = {expr}")?;
        }
        if !self.aggregates.is_empty() {
            write!(f, " AGGREGATE")?;
            for (i, (name, expr)) in self.aggregates.iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(f, "{sep}{name} = {expr}")?;
            }
        }
        if let Some(count) = &self.count_into {
            write!(f, " WITH COUNT INTO {count}")?;
        }
        Ok(())
    }
}

/// A single high-level AQL operation.
#[derive(Debug, Clone, PartialEq)]
pub enum AqlOperation {
    For { variable: String, source: AqlExpr },
    Filter(AqlExpr),
    Let { variable: String, value: AqlExpr },
    Collect(Collect),
    Sort(Vec<SortKey>),
    /// `LIMIT offset, count` or `LIMIT count`.
    Limit { offset: Option<u64>, count: u64 },
    Return { distinct: bool, value: AqlExpr },
    Insert { document: AqlExpr, collection: String },
    Update {
        key: AqlExpr,
        with: AqlExpr,
        collection: String,
        options: Option<AqlExpr>,
    },
    Remove { key: AqlExpr, collection: String },
}

impl fmt::Display for AqlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::For { variable, source } => write!(f, "FOR {variable} IN {source}"),
            Self::Filter(expr) => write!(f, "FILTER {expr}"),
            Self::Let { variable, value } => write!(f, "LET {variable} = {value}"),
            Self::Collect(collect) => write!(f, "{collect}"),
            Self::Sort(keys) => {
                write!(f, "SORT")?;
                for (i, key) in keys.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{sep}{key}")?;
                }
                Ok(())
            }
            Self::Limit {
                offset: Some(offset),
                count,
            } => write!(f, "LIMIT {offset}, {count}"),
            Self::Limit {
                offset: None,
                count,
            } => write!(f, "LIMIT {count}"),
            Self::Return { distinct, value } => {
                if *distinct {
                    write!(f, "RETURN DISTINCT {value}")
                } else {
                    write!(f, "RETURN {value}")
                }
            }
            Self::Insert {
                document,
                collection,
            } => write!(f, "INSERT {document} INTO {}", quote_identifier(collection)),
            Self::Update {
                key,
                with,
                collection,
                options,
            } => {
                write!(f, "UPDATE {key} WITH {with} IN {}", quote_identifier(collection))?;
                if let Some(options) = options {
                    write!(f, " OPTIONS {options}")?;
                }
                Ok(())
            }
            Self::Remove { key, collection } => {
                write!(f, "REMOVE {key} IN {}", quote_identifier(collection))
            }
        }
    }
}

/// An ordered list of operations forming one query or sub-query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AqlQuery {
    operations: Vec<AqlOperation>,
}

impl AqlQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operations(&self) -> &[AqlOperation] {
        &self.operations
    }

    pub fn push(&mut self, operation: AqlOperation) {
        self.operations.push(operation);
    }

    pub fn extend(&mut self, operations: impl IntoIterator<Item = AqlOperation>) {
        self.operations.extend(operations);
    }

    pub fn for_in(mut self, variable: impl Into<String>, source: AqlExpr) -> Self {
        self.push(AqlOperation::For {
            variable: variable.into(),
            source,
        });
        self
    }

    pub fn filter(mut self, expr: AqlExpr) -> Self {
        self.push(AqlOperation::Filter(expr));
        self
    }

    pub fn let_var(mut self, variable: impl Into<String>, value: AqlExpr) -> Self {
        self.push(AqlOperation::Let {
            variable: variable.into(),
            value,
        });
        self
    }

    pub fn sort(mut self, keys: Vec<SortKey>) -> Self {
        self.push(AqlOperation::Sort(keys));
        self
    }

    pub fn limit(mut self, offset: Option<u64>, count: u64) -> Self {
        self.push(AqlOperation::Limit { offset, count });
        self
    }

    pub fn return_value(mut self, value: AqlExpr) -> Self {
        self.push(AqlOperation::Return {
            distinct: false,
            value,
        });
        self
    }

    pub fn insert(mut self, document: AqlExpr, collection: impl Into<String>) -> Self {
        self.push(AqlOperation::Insert {
            document,
            collection: collection.into(),
        });
        self
    }

    pub fn remove(mut self, key: AqlExpr, collection: impl Into<String>) -> Self {
        self.push(AqlOperation::Remove {
            key,
            collection: collection.into(),
        });
        self
    }
}

impl fmt::Display for AqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, op) in self.operations.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{op}")?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// Bind parameters of one statement.
///
/// Generated names (`value1`, `value2`, …) are unique within the instance,
/// which an outer query shares with all of its sub-queries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bindings {
    values: Map<String, Value>,
    counter: usize,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` under a fresh generated name.
    pub fn bind(&mut self, value: Value) -> AqlExpr {
        loop {
            self.counter += 1;
            let name = format!("value{}", self.counter);
            if !self.values.contains_key(&name) {
                self.values.insert(name.clone(), value);
                return AqlExpr::Bind(name);
            }
        }
    }

    /// Bind `value` under an explicit name, failing if the name is taken.
    pub fn bind_named(&mut self, name: &str, value: Value) -> Result<AqlExpr, CompileError> {
        if self.values.contains_key(name) {
            return Err(CompileError::Binding {
                name: name.to_string(),
                reason: "name is already bound".to_string(),
            });
        }
        self.values.insert(name.to_string(), value);
        Ok(AqlExpr::Bind(name.to_string()))
    }

    /// Serialize and bind `value` under an explicit name.
    pub fn bind_serialized<T: Serialize>(&mut self, name: &str, value: &T) -> Result<AqlExpr, CompileError> {
        let value = serde_json::to_value(value).map_err(|e| CompileError::Binding {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        self.bind_named(name, value)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    /// The `bindVars` object sent alongside the query text.
    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone())
    }
}

// ---------------------------------------------------------------------------
// Statement
// ---------------------------------------------------------------------------

/// A complete statement: query plus bind parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct AqlStatement {
    pub query: AqlQuery,
    pub bindings: Bindings,
}

impl AqlStatement {
    pub fn new(query: AqlQuery, bindings: Bindings) -> Self {
        Self { query, bindings }
    }

    /// The rendered statement text.
    pub fn text(&self) -> String {
        self.query.to_string()
    }

    /// The `bindVars` object for the cursor API.
    pub fn bind_vars(&self) -> Value {
        self.bindings.to_json()
    }
}

impl fmt::Display for AqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_basic_pipeline() {
        let mut bindings = Bindings::new();
        let value = bindings.bind(json!("Stark"));
        let query = AqlQuery::new()
            .for_in("characterDoc", AqlExpr::Collection("characters".into()))
            .filter(AqlExpr::compare(
                AqlExpr::field("characterDoc", "surname"),
                Operator::Eq,
                value,
            ))
            .sort(vec![SortKey::Expr {
                expr: AqlExpr::field("characterDoc", "name"),
                direction: Direction::Ascending,
            }])
            .limit(Some(5), 10)
            .return_value(AqlExpr::var("characterDoc"));
        assert_eq!(
            query.to_string(),
            "FOR characterDoc IN characters FILTER characterDoc.surname == @value1 \
             SORT characterDoc.name ASC LIMIT 5, 10 RETURN characterDoc"
        );
        assert_eq!(bindings.get("value1"), Some(&json!("Stark")));
    }

    #[test]
    fn quotes_unusual_attribute_names() {
        let expr = AqlExpr::attribute(
            AqlExpr::var("doc"),
            &["first-name".to_string(), "x".to_string()],
        );
        assert_eq!(expr.to_string(), "doc.`first-name`.x");
    }

    #[test]
    fn hyphenated_collections_are_quoted() {
        let query = AqlQuery::new()
            .for_in("doc", AqlExpr::Collection("house-words".into()))
            .remove(AqlExpr::var("doc"), "house-words");
        assert_eq!(
            query.to_string(),
            "FOR doc IN `house-words` REMOVE doc IN `house-words`"
        );
    }

    #[test]
    fn object_keys_are_quoted_when_needed() {
        let expr = AqlExpr::Object(vec![
            ("name".into(), AqlExpr::Literal(json!("Ned"))),
            ("house name".into(), AqlExpr::Literal(json!("Stark"))),
        ]);
        assert_eq!(expr.to_string(), r#"{ name: "Ned", "house name": "Stark" }"#);
        assert_eq!(AqlExpr::Object(vec![]).to_string(), "{}");
    }

    #[test]
    fn chain_renders_flat() {
        let chain = AqlExpr::Chain {
            first: Box::new(AqlExpr::Raw("a".into())),
            rest: vec![
                (Logical::And, AqlExpr::Raw("b".into())),
                (Logical::Or, AqlExpr::Raw("c".into())),
            ],
        };
        assert_eq!(chain.to_string(), "a AND b OR c");
    }

    #[test]
    fn join_of_single_part_is_the_part() {
        let joined = AqlExpr::join(Logical::And, vec![AqlExpr::Raw("a".into())]).unwrap();
        assert_eq!(joined, AqlExpr::Raw("a".into()));
        assert!(AqlExpr::join(Logical::Or, vec![]).is_none());
    }

    #[test]
    fn collect_rendering() {
        let collect = Collect {
            groups: vec![("surname".into(), AqlExpr::field("c", "surname"))],
            aggregates: vec![(
                "aggregateResult".into(),
                AqlExpr::call("MAX", vec![AqlExpr::field("c", "age")]),
            )],
            count_into: None,
        };
        assert_eq!(
            collect.to_string(),
            "COLLECT surname = c.surname AGGREGATE aggregateResult = MAX(c.age)"
        );
        let count = Collect {
            count_into: Some("total".into()),
            ..Collect::default()
        };
        assert_eq!(count.to_string(), "COLLECT WITH COUNT INTO total");
    }

    #[test]
    fn subquery_in_call_is_parenthesized() {
        let sub = AqlQuery::new()
            .for_in("c", AqlExpr::Collection("characters".into()))
            .return_value(AqlExpr::field("c", "age"));
        let expr = AqlExpr::call("MAX", vec![AqlExpr::subquery(sub)]);
        assert_eq!(expr.to_string(), "MAX((FOR c IN characters RETURN c.age))");
    }

    #[test]
    fn generated_binding_names_are_unique() {
        let mut bindings = Bindings::new();
        bindings.bind_named("value2", json!(0)).unwrap();
        let a = bindings.bind(json!(1));
        let b = bindings.bind(json!(2));
        assert_eq!(a, AqlExpr::Bind("value1".into()));
        assert_eq!(b, AqlExpr::Bind("value3".into()));
        assert_eq!(bindings.len(), 3);
    }

    #[test]
    fn named_binding_collision_is_an_error() {
        let mut bindings = Bindings::new();
        bindings.bind_named("batch", json!(1)).unwrap();
        let err = bindings.bind_named("batch", json!(2)).unwrap_err();
        assert!(matches!(err, CompileError::Binding { .. }));
    }

    #[test]
    fn update_with_options() {
        let op = AqlOperation::Update {
            key: AqlExpr::var("doc"),
            with: AqlExpr::Object(vec![("a".into(), AqlExpr::Literal(Value::Null))]),
            collection: "characters".into(),
            options: Some(AqlExpr::Object(vec![(
                "keepNull".into(),
                AqlExpr::Literal(json!(false)),
            )])),
        };
        assert_eq!(
            op.to_string(),
            "UPDATE doc WITH { a: null } IN characters OPTIONS { keepNull: false }"
        );
    }

    #[test]
    fn bind_vars_object() {
        let mut bindings = Bindings::new();
        bindings.bind(json!([1, 2]));
        assert_eq!(bindings.to_json(), json!({"value1": [1, 2]}));
    }
}
