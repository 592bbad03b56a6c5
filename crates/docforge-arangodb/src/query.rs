//! Compile `QueryState` into AQL statements.
//!
//! A select is compiled by walking a fixed component list. Each call builds
//! its own `SelectPass`, so the offset cached between the offset and limit
//! components never outlives one compilation.

use convert_case::{Case, Casing};
use docforge_backend::StatementCompiler;
use docforge_core::query::{
    Aggregate, AggregateFunction, Boolean, Column, FieldPath, InsertValues, JoinKind, Operand,
    Operator, Ordering, Predicate, PredicateKind, QueryState, SubSelect, SubSelectKind,
};
use docforge_core::{CollectionName, CompileError, ConnectionConfig, Document, KeyType};
use serde_json::Value;

use crate::aql::{
    is_plain_identifier, AqlExpr, AqlOperation, AqlQuery, AqlStatement, Bindings, Collect,
    Logical, SortKey,
};

/// Variable holding an aggregate's result after `COLLECT`.
pub const AGGREGATE_VARIABLE: &str = "aggregateResult";

/// Attribute under which aggregate queries return their result.
pub const AGGREGATE_ATTRIBUTE: &str = "aggregate";

const VARIABLE_SUFFIX: &str = "Doc";

/// Select components, in compilation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Component {
    Lock,
    Aggregate,
    From,
    Joins,
    Wheres,
    Groups,
    Havings,
    Orders,
    Offset,
    Limit,
    Columns,
}

const SELECT_COMPONENTS: [Component; 11] = [
    Component::Lock,
    Component::Aggregate,
    Component::From,
    Component::Joins,
    Component::Wheres,
    Component::Groups,
    Component::Havings,
    Component::Orders,
    Component::Offset,
    Component::Limit,
    Component::Columns,
];

/// Components shared by predicate-driven updates and deletes.
const WRITE_COMPONENTS: [Component; 5] = [
    Component::From,
    Component::Wheres,
    Component::Orders,
    Component::Offset,
    Component::Limit,
];

/// The AQL name of an aggregate function.
pub fn aggregate_function_name(function: AggregateFunction) -> &'static str {
    match function {
        AggregateFunction::Count => "COUNT",
        AggregateFunction::Max => "MAX",
        AggregateFunction::Min => "MIN",
        AggregateFunction::Sum => "SUM",
        AggregateFunction::Avg => "AVERAGE",
    }
}

/// Compiles abstract queries into AQL for one connection.
///
/// Holds configuration only; compiling never mutates the compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AqlCompiler {
    prefix: String,
}

impl AqlCompiler {
    pub fn new(config: &ConnectionConfig) -> Self {
        Self::with_prefix(config.prefix.clone())
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Insert of documents already in batch form, keeping each document's
    /// field order. `None` when `batch` is empty.
    pub fn compile_insert_batch(&self, collection: &CollectionName, batch: Vec<Document>) -> Option<AqlStatement> {
        if batch.is_empty() {
            tracing::debug!(collection = %collection, "empty insert, nothing to compile");
            return None;
        }
        let target = self.prefixed(collection);
        let variable = iteration_variable(collection.as_str());
        let mut bindings = Bindings::new();
        let documents = bindings.bind(Value::Array(
            batch.into_iter().map(Value::Object).collect(),
        ));
        let aql = AqlQuery::new()
            .for_in(variable.clone(), documents)
            .insert(AqlExpr::var(variable), target)
            .return_value(AqlExpr::field("NEW", "_key"));
        let statement = AqlStatement::new(aql, bindings);
        tracing::debug!(statement = %statement, "compiled insert");
        Some(statement)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The stored name of `collection`.
    pub fn prefixed(&self, collection: &CollectionName) -> String {
        format!("{}{}", self.prefix, collection)
    }

    fn validate_write(query: &QueryState, context: &str) -> Result<(), CompileError> {
        query.validate()?;
        if !query.joins.is_empty() {
            return Err(CompileError::unsupported("JOIN", context));
        }
        Ok(())
    }
}

impl StatementCompiler for AqlCompiler {
    type Statement = AqlStatement;

    fn compile_select(&self, query: &QueryState) -> Result<AqlStatement, CompileError> {
        query.validate()?;
        let mut bindings = Bindings::new();
        let aql = SelectPass::new(self, query, &mut bindings, Scope::default())
            .run(&SELECT_COMPONENTS)?;
        let statement = AqlStatement::new(aql, bindings);
        tracing::debug!(statement = %statement, "compiled select");
        Ok(statement)
    }

    fn compile_insert(
        &self,
        collection: &CollectionName,
        values: InsertValues,
    ) -> Result<Option<AqlStatement>, CompileError> {
        Ok(self.compile_insert_batch(collection, values.into_batch()))
    }

    fn compile_update(
        &self,
        query: &QueryState,
        values: &Document,
    ) -> Result<AqlStatement, CompileError> {
        Self::validate_write(query, "UPDATE")?;
        if values.is_empty() {
            return Err(CompileError::EmptyUpdate);
        }
        let mut bindings = Bindings::new();
        let mut pass = SelectPass::new(self, query, &mut bindings, Scope::default());
        pass.compile_components(&WRITE_COMPONENTS)?;
        let with = pass.bindings.bind(Value::Object(values.clone()));
        let key = AqlExpr::var(pass.variable.clone());
        pass.operations.push(AqlOperation::Update {
            key,
            with,
            collection: self.prefixed(&query.collection),
            options: None,
        });
        let aql = pass.into_query();
        let statement = AqlStatement::new(aql, bindings);
        tracing::debug!(statement = %statement, "compiled update");
        Ok(statement)
    }

    fn compile_delete(&self, query: &QueryState) -> Result<AqlStatement, CompileError> {
        Self::validate_write(query, "DELETE")?;
        let mut bindings = Bindings::new();
        let mut pass = SelectPass::new(self, query, &mut bindings, Scope::default());
        pass.compile_components(&WRITE_COMPONENTS)?;
        let key = AqlExpr::var(pass.variable.clone());
        pass.operations.push(AqlOperation::Remove {
            key,
            collection: self.prefixed(&query.collection),
        });
        let aql = pass.into_query();
        let statement = AqlStatement::new(aql, bindings);
        tracing::debug!(statement = %statement, "compiled delete");
        Ok(statement)
    }

    fn compile_delete_by_key(
        &self,
        collection: &CollectionName,
        key: &Value,
    ) -> Result<AqlStatement, CompileError> {
        let mut bindings = Bindings::new();
        let key = bindings.bind(KeyType::default().normalize(key));
        let aql = AqlQuery::new().remove(key, self.prefixed(collection));
        Ok(AqlStatement::new(aql, bindings))
    }
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Reference names visible to a query, mapped to their iteration variables.
///
/// Nested queries start from a copy of the enclosing scope, which is how a
/// correlated sub-query reaches the outer document.
#[derive(Debug, Clone, Default)]
struct Scope {
    entries: Vec<(String, String)>,
}

impl Scope {
    fn push(&mut self, reference: &str, variable: &str) {
        self.entries.push((reference.to_string(), variable.to_string()));
    }

    /// The innermost variable bound to `reference`.
    fn lookup(&self, reference: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(name, _)| name == reference)
            .map(|(_, variable)| variable.as_str())
    }

    fn is_taken(&self, variable: &str) -> bool {
        self.entries.iter().any(|(_, v)| v == variable)
    }

    /// A fresh iteration variable for `reference`: `characters` becomes
    /// `characterDoc`, then `characterDoc2` if that is already in scope.
    fn allocate(&self, reference: &str) -> String {
        let base = iteration_variable(reference);
        if !self.is_taken(&base) {
            return base;
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}{n}");
            if !self.is_taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// `characters` → `characterDoc`, `house_words` → `houseWordDoc`.
pub fn iteration_variable(collection: &str) -> String {
    let stem = singularize(collection).to_case(Case::Camel);
    if stem.is_empty() || !is_plain_identifier(&stem) {
        return "doc".to_string();
    }
    format!("{stem}{VARIABLE_SUFFIX}")
}

/// Simple English singularization of the last word.
fn singularize(s: &str) -> String {
    let lower = s.to_ascii_lowercase();
    if lower.ends_with("ies") && s.len() > 3 {
        format!("{}y", &s[..s.len() - 3])
    } else if ["sses", "shes", "ches", "xes", "zes"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
    {
        s[..s.len() - 2].to_string()
    } else if lower.ends_with('s') && !lower.ends_with("ss") && s.len() > 1 {
        s[..s.len() - 1].to_string()
    } else {
        s.to_string()
    }
}

// ---------------------------------------------------------------------------
// SelectPass
// ---------------------------------------------------------------------------

/// State of one compilation. Never reused.
struct SelectPass<'a> {
    compiler: &'a AqlCompiler,
    query: &'a QueryState,
    bindings: &'a mut Bindings,
    scope: Scope,
    variable: String,
    join_variables: Vec<String>,
    operations: Vec<AqlOperation>,
    aggregate: Option<&'a Aggregate>,
    /// Offset seen by the offset component, waiting for a limit.
    offset: Option<u64>,
    /// Group variables, once a `COLLECT` has been emitted.
    groups: Option<Vec<(FieldPath, String)>>,
    /// Return a lone projected column as a bare value.
    scalar: bool,
}

impl<'a> SelectPass<'a> {
    fn new(
        compiler: &'a AqlCompiler,
        query: &'a QueryState,
        bindings: &'a mut Bindings,
        mut scope: Scope,
    ) -> Self {
        let variable = scope.allocate(query.reference_name());
        scope.push(query.reference_name(), &variable);
        Self {
            compiler,
            query,
            bindings,
            scope,
            variable,
            join_variables: Vec::new(),
            operations: Vec::new(),
            aggregate: None,
            offset: None,
            groups: None,
            scalar: false,
        }
    }

    fn scalar(mut self) -> Self {
        self.scalar = true;
        self
    }

    fn run(mut self, components: &[Component]) -> Result<AqlQuery, CompileError> {
        self.compile_components(components)?;
        Ok(self.into_query())
    }

    fn into_query(self) -> AqlQuery {
        let mut query = AqlQuery::new();
        query.extend(self.operations);
        query
    }

    fn compile_components(&mut self, components: &[Component]) -> Result<(), CompileError> {
        for component in components {
            match component {
                Component::Lock => self.compile_lock(),
                Component::Aggregate => self.aggregate = self.query.aggregate.as_ref(),
                Component::From => self.compile_from(),
                Component::Joins => self.compile_joins()?,
                Component::Wheres => self.compile_wheres()?,
                Component::Groups => self.compile_groups()?,
                Component::Havings => self.compile_havings()?,
                Component::Orders => self.compile_orders()?,
                Component::Offset => self.offset = self.query.offset,
                Component::Limit => self.compile_limit(),
                Component::Columns => self.compile_columns()?,
            }
        }
        Ok(())
    }

    fn compile_lock(&self) {
        if let Some(mode) = self.query.lock {
            tracing::warn!(?mode, collection = %self.query.collection, "lock request has no AQL form");
        }
    }

    fn compile_from(&mut self) {
        self.operations.push(AqlOperation::For {
            variable: self.variable.clone(),
            source: AqlExpr::Collection(self.compiler.prefixed(&self.query.collection)),
        });
    }

    fn compile_joins(&mut self) -> Result<(), CompileError> {
        let query = self.query;
        for join in &query.joins {
            if matches!(join.kind, JoinKind::Left | JoinKind::Right) {
                return Err(CompileError::unsupported(join.kind.to_string(), "SELECT"));
            }
            let variable = self.scope.allocate(join.reference_name());
            self.scope.push(join.reference_name(), &variable);
            self.operations.push(AqlOperation::For {
                variable: variable.clone(),
                source: AqlExpr::Collection(self.compiler.prefixed(&join.collection)),
            });
            self.join_variables.push(variable);
            if let Some(filter) = self.compile_predicates(&join.on)? {
                self.operations.push(AqlOperation::Filter(filter));
            }
        }
        Ok(())
    }

    fn compile_wheres(&mut self) -> Result<(), CompileError> {
        let query = self.query;
        if let Some(filter) = self.compile_predicates(&query.wheres)? {
            self.operations.push(AqlOperation::Filter(filter));
        }
        Ok(())
    }

    fn compile_groups(&mut self) -> Result<(), CompileError> {
        let query = self.query;
        if query.groups.is_empty() && self.aggregate.is_none() {
            return Ok(());
        }
        let mut collect = Collect::default();
        let mut groups = Vec::with_capacity(query.groups.len());
        for (i, field) in query.groups.iter().enumerate() {
            let expr = self.resolve_field(field)?;
            let name = group_variable(field, i);
            collect.groups.push((name.clone(), expr));
            groups.push((field.clone(), name));
        }
        if let Some(aggregate) = self.aggregate {
            self.compile_aggregate(aggregate, &mut collect)?;
        }
        self.operations.push(AqlOperation::Collect(collect));
        self.groups = Some(groups);
        Ok(())
    }

    fn compile_aggregate(
        &mut self,
        aggregate: &Aggregate,
        collect: &mut Collect,
    ) -> Result<(), CompileError> {
        let column = aggregate.columns.iter().find(|c| c.as_dotted() != "*");
        let distinct = self.query.distinct;
        let expr = match (aggregate.function, column) {
            (AggregateFunction::Count, None) if !distinct => {
                collect.count_into = Some(AGGREGATE_VARIABLE.to_string());
                return Ok(());
            }
            (AggregateFunction::Count, None) => {
                AqlExpr::call("COUNT_DISTINCT", vec![AqlExpr::var(self.variable.clone())])
            }
            (AggregateFunction::Count, Some(field)) => {
                let function = if distinct { "COUNT_DISTINCT" } else { "COUNT" };
                AqlExpr::call(function, vec![self.resolve_field(field)?])
            }
            (function, Some(field)) => AqlExpr::call(
                aggregate_function_name(function),
                vec![self.resolve_field(field)?],
            ),
            (function, None) => {
                return Err(CompileError::unsupported(
                    format!("{}(*)", aggregate_function_name(function)),
                    "aggregate",
                ));
            }
        };
        collect
            .aggregates
            .push((AGGREGATE_VARIABLE.to_string(), expr));
        Ok(())
    }

    fn compile_havings(&mut self) -> Result<(), CompileError> {
        let query = self.query;
        if query.havings.is_empty() {
            return Ok(());
        }
        if self.groups.is_none() {
            return Err(CompileError::unsupported("HAVING", "ungrouped query"));
        }
        if let Some(filter) = self.compile_predicates(&query.havings)? {
            self.operations.push(AqlOperation::Filter(filter));
        }
        Ok(())
    }

    fn compile_orders(&mut self) -> Result<(), CompileError> {
        let query = self.query;
        if query.orders.is_empty() {
            return Ok(());
        }
        if self.aggregate.is_some() {
            tracing::debug!(collection = %query.collection, "orderings dropped from aggregate query");
            return Ok(());
        }
        let mut keys = Vec::with_capacity(query.orders.len());
        for order in &query.orders {
            keys.push(match order {
                Ordering::Field { field, direction } => SortKey::Expr {
                    expr: self.resolve_field(field)?,
                    direction: *direction,
                },
                Ordering::Raw { expression } => SortKey::Raw(expression.clone()),
            });
        }
        self.operations.push(AqlOperation::Sort(keys));
        Ok(())
    }

    /// Emits `LIMIT offset, count` or `LIMIT count`. An offset with no limit
    /// is dropped: AQL has no offset-only form.
    fn compile_limit(&mut self) {
        let offset = self.offset.take();
        match self.query.limit {
            Some(count) => self.operations.push(AqlOperation::Limit { offset, count }),
            None => {
                if let Some(offset) = offset {
                    tracing::warn!(offset, "offset without limit dropped");
                }
            }
        }
    }

    fn compile_columns(&mut self) -> Result<(), CompileError> {
        let query = self.query;
        let value = if self.aggregate.is_some() {
            let mut entries = vec![(
                AGGREGATE_ATTRIBUTE.to_string(),
                AqlExpr::var(AGGREGATE_VARIABLE),
            )];
            entries.extend(self.group_entries());
            AqlExpr::Object(entries)
        } else if self.groups.is_some() && query.columns.is_empty() {
            AqlExpr::Object(self.group_entries())
        } else if query.columns.is_empty() {
            self.whole_document(Vec::new())
        } else {
            self.project(&query.columns)?
        };
        self.operations.push(AqlOperation::Return {
            distinct: query.distinct,
            value,
        });
        Ok(())
    }

    fn group_entries(&self) -> Vec<(String, AqlExpr)> {
        self.groups
            .iter()
            .flatten()
            .map(|(_, name)| (name.clone(), AqlExpr::var(name.clone())))
            .collect()
    }

    /// The iteration document, merged with joined documents and `extra`.
    fn whole_document(&self, extra: Vec<AqlExpr>) -> AqlExpr {
        let base = AqlExpr::var(self.variable.clone());
        if self.join_variables.is_empty() && extra.is_empty() {
            return base;
        }
        let mut args = vec![base];
        args.extend(self.join_variables.iter().cloned().map(AqlExpr::var));
        args.extend(extra);
        AqlExpr::call("MERGE", args)
    }

    fn project(&mut self, columns: &[Column]) -> Result<AqlExpr, CompileError> {
        if self.scalar && columns.len() == 1 {
            if let Column::Field { field, .. } = &columns[0] {
                return self.resolve_field(field);
            }
        }
        let mut include_all = false;
        let mut entries = Vec::with_capacity(columns.len());
        for column in columns {
            match column {
                Column::All => include_all = true,
                Column::Field { field, .. } => {
                    let name = column.output_name().unwrap_or_else(|| field.leaf());
                    entries.push((name.to_string(), self.resolve_field(field)?));
                }
                Column::SubSelect { alias, select } => {
                    entries.push((alias.clone(), self.compile_sub_select(select)?));
                }
            }
        }
        if !include_all {
            return Ok(AqlExpr::Object(entries));
        }
        if entries.is_empty() {
            return Ok(self.whole_document(Vec::new()));
        }
        Ok(self.whole_document(vec![AqlExpr::Object(entries)]))
    }

    fn compile_sub_select(&mut self, select: &SubSelect) -> Result<AqlExpr, CompileError> {
        let scope = self.scope.clone();
        let sub = SelectPass::new(self.compiler, &select.query, &mut *self.bindings, scope)
            .scalar()
            .run(&SELECT_COMPONENTS)?;
        let sub = AqlExpr::subquery(sub);
        Ok(match select.kind {
            SubSelectKind::Aggregate(function) => {
                AqlExpr::call(aggregate_function_name(function), vec![sub])
            }
            SubSelectKind::First => AqlExpr::call("FIRST", vec![sub]),
            SubSelectKind::Exists => AqlExpr::compare(
                AqlExpr::call("LENGTH", vec![sub]),
                Operator::Gt,
                AqlExpr::Literal(Value::from(0)),
            ),
        })
    }

    fn nested(&mut self, query: &QueryState) -> Result<AqlExpr, CompileError> {
        let scope = self.scope.clone();
        let sub = SelectPass::new(self.compiler, query, &mut *self.bindings, scope)
            .run(&SELECT_COMPONENTS)?;
        Ok(AqlExpr::subquery(sub))
    }

    // -- predicates --

    /// Combines predicates left to right with their own conjunctions.
    /// Returns `None` for an empty list.
    fn compile_predicates(
        &mut self,
        predicates: &[Predicate],
    ) -> Result<Option<AqlExpr>, CompileError> {
        let mut first = None;
        let mut rest = Vec::new();
        for predicate in predicates {
            let expr = self.compile_predicate(&predicate.kind)?;
            if first.is_none() {
                first = Some(expr);
            } else {
                rest.push((logical(predicate.boolean), expr));
            }
        }
        Ok(first.map(|first| {
            if rest.is_empty() {
                first
            } else {
                AqlExpr::Chain {
                    first: Box::new(first),
                    rest,
                }
            }
        }))
    }

    fn compile_predicate(&mut self, kind: &PredicateKind) -> Result<AqlExpr, CompileError> {
        match kind {
            PredicateKind::Basic {
                field,
                operator,
                operand,
            } => {
                let left = self.resolve_field(field)?;
                let right = self.compile_operand(operand)?;
                Ok(AqlExpr::compare(left, *operator, right))
            }
            PredicateKind::In {
                field,
                values,
                negated,
            } => {
                let left = self.resolve_field(field)?;
                let op = if *negated { Operator::NotIn } else { Operator::In };
                let right = self.bindings.bind(Value::Array(values.clone()));
                Ok(AqlExpr::compare(left, op, right))
            }
            PredicateKind::Null { field, negated } => {
                let left = self.resolve_field(field)?;
                let op = if *negated { Operator::Ne } else { Operator::Eq };
                Ok(AqlExpr::compare(left, op, AqlExpr::Literal(Value::Null)))
            }
            PredicateKind::Between {
                field,
                low,
                high,
                negated,
            } => {
                let left = self.resolve_field(field)?;
                let low = self.bindings.bind(low.clone());
                let high = self.bindings.bind(high.clone());
                let (low_op, high_op, joiner) = if *negated {
                    (Operator::Lt, Operator::Gt, Logical::Or)
                } else {
                    (Operator::Gte, Operator::Lte, Logical::And)
                };
                Ok(AqlExpr::group(AqlExpr::Chain {
                    first: Box::new(AqlExpr::compare(left.clone(), low_op, low)),
                    rest: vec![(joiner, AqlExpr::compare(left, high_op, high))],
                }))
            }
            PredicateKind::Nested { predicates } => Ok(self
                .compile_predicates(predicates)?
                .map(AqlExpr::group)
                .unwrap_or(AqlExpr::Literal(Value::Bool(true)))),
            PredicateKind::Exists { query, negated } => {
                let sub = self.nested(query)?;
                let op = if *negated { Operator::Eq } else { Operator::Gt };
                Ok(AqlExpr::compare(
                    AqlExpr::call("LENGTH", vec![sub]),
                    op,
                    AqlExpr::Literal(Value::from(0)),
                ))
            }
            PredicateKind::Count {
                query,
                operator,
                operand,
            } => {
                let sub = self.nested(query)?;
                let right = self.compile_operand(operand)?;
                Ok(AqlExpr::compare(
                    AqlExpr::call("COUNT", vec![sub]),
                    *operator,
                    right,
                ))
            }
            PredicateKind::Raw { expression } => Ok(AqlExpr::Raw(expression.clone())),
        }
    }

    fn compile_operand(&mut self, operand: &Operand) -> Result<AqlExpr, CompileError> {
        match operand {
            Operand::Value(value) => Ok(self.bindings.bind(value.clone())),
            Operand::Column(field) => self.resolve_field(field),
            Operand::Expression(expression) => Ok(AqlExpr::Raw(expression.clone())),
            Operand::Subquery(query) => self.nested(query),
        }
    }

    /// Resolves an attribute reference.
    ///
    /// After a `COLLECT` only group keys (and the aggregate) remain visible.
    /// Otherwise `ref.path` resolves through the scope when `ref` names a
    /// collection or alias, and anything else belongs to the current document.
    fn resolve_field(&self, field: &FieldPath) -> Result<AqlExpr, CompileError> {
        if let Some(groups) = &self.groups {
            if let Some((_, name)) = groups
                .iter()
                .find(|(path, _)| path == field || path.tail().as_ref() == Some(field))
            {
                return Ok(AqlExpr::var(name.clone()));
            }
            if self.aggregate.is_some() && field.as_dotted() == AGGREGATE_ATTRIBUTE {
                return Ok(AqlExpr::var(AGGREGATE_VARIABLE));
            }
            return Err(CompileError::unsupported(
                format!("reference to ungrouped attribute {field}"),
                "grouped query",
            ));
        }
        if let Some(tail) = field.tail() {
            if let Some(variable) = self.scope.lookup(field.root()) {
                return Ok(AqlExpr::attribute(AqlExpr::var(variable), tail.segments()));
            }
        }
        Ok(AqlExpr::attribute(
            AqlExpr::var(self.variable.clone()),
            field.segments(),
        ))
    }
}

fn logical(boolean: Boolean) -> Logical {
    match boolean {
        Boolean::And => Logical::And,
        Boolean::Or => Logical::Or,
    }
}

fn group_variable(field: &FieldPath, index: usize) -> String {
    let name = field.segments().join("_");
    if is_plain_identifier(&name) && name != AGGREGATE_VARIABLE {
        name
    } else {
        format!("group{}", index + 1)
    }
}
