//! Relation queries and aggregate sub-selects.
//!
//! Everything here is a free function over a [`RelationDescriptor`]: the
//! functions build [`QueryState`] values, and the query compiler turns the
//! results into correlated sub-queries, so a parent row and its relation
//! aggregates come back in one round trip.

use convert_case::{Case, Casing};
use docforge_core::query::{
    split_alias, AggregateFunction, Column, FieldPath, InsertValues, Join, Operator, QueryState,
    SubSelect, SubSelectKind,
};
use docforge_core::relation::{RelationDescriptor, RelationLink, RelationRegistry};
use docforge_core::{CompileError, Document};
use serde_json::Value;

/// The correlated query selecting the records related to a parent row.
///
/// The parent is referenced by its collection name.
pub fn relation_query(relation: &RelationDescriptor) -> QueryState {
    related_query(relation, relation.parent.as_str())
}

/// Like [`relation_query`], with the parent referenced as `parent`.
///
/// A self-relation refers to the related side by the relation's name, so the
/// parent and related documents stay distinguishable.
fn related_query(relation: &RelationDescriptor, parent: &str) -> QueryState {
    let mut query = QueryState::new(relation.related.clone());
    if relation.related.as_str() == parent {
        let alias = if relation.name == parent {
            format!("{}_related", relation.name)
        } else {
            relation.name.clone()
        };
        query = query.with_alias(alias);
    }
    let related = query.reference_name().to_string();

    let mut morph_owner = related.clone();
    query = match &relation.link {
        RelationLink::HasOneOrMany {
            foreign_key,
            local_key,
        } => query.where_column(
            format!("{related}.{foreign_key}"),
            Operator::Eq,
            format!("{parent}.{local_key}"),
        ),
        RelationLink::BelongsTo {
            foreign_key,
            owner_key,
        } => query.where_column(
            format!("{related}.{owner_key}"),
            Operator::Eq,
            format!("{parent}.{foreign_key}"),
        ),
        RelationLink::BelongsToMany {
            pivot,
            parent_key,
            related_key,
        } => {
            let pivot_ref = pivot.collection.as_str();
            morph_owner = pivot_ref.to_string();
            query
                .join(Join::inner(
                    pivot.collection.clone(),
                    format!("{pivot_ref}.{}", pivot.related_pivot_key),
                    Operator::Eq,
                    format!("{related}.{related_key}"),
                ))
                .where_column(
                    format!("{pivot_ref}.{}", pivot.foreign_pivot_key),
                    Operator::Eq,
                    format!("{parent}.{parent_key}"),
                )
        }
    };

    if let Some(morph) = &relation.morph {
        query = query.where_eq(
            format!("{morph_owner}.{}", morph.type_attribute),
            Value::String(morph.type_value.clone()),
        );
    }
    query
}

fn lookup<'r>(registry: &'r RelationRegistry, name: &str) -> Result<&'r RelationDescriptor, CompileError> {
    registry
        .get(name)
        .ok_or_else(|| CompileError::UnknownRelation(name.to_string()))
}

/// Keep parent rows with related records matching `operator count`.
///
/// `>= 1` is an existence check; anything else counts.
pub fn where_has(
    state: QueryState,
    registry: &RelationRegistry,
    relation: &str,
    operator: Operator,
    count: u64,
) -> Result<QueryState, CompileError> {
    let related = related_query(lookup(registry, relation)?, state.reference_name());
    if operator == Operator::Gte && count == 1 {
        return Ok(state.where_exists(related));
    }
    Ok(state.where_count(related, operator, count))
}

/// Keep parent rows without any related record.
pub fn where_doesnt_have(
    state: QueryState,
    registry: &RelationRegistry,
    relation: &str,
) -> Result<QueryState, CompileError> {
    let related = related_query(lookup(registry, relation)?, state.reference_name());
    Ok(state.where_not_exists(related))
}

/// Attach one sub-select per relation to the projection.
///
/// Each entry of `relations` is a relation name, optionally `"name as alias"`.
/// With a `function` the sub-query's values are aggregated; without one the
/// sub-query is capped at one result and its first value is used. `column`
/// is the related attribute, or `*` for whole documents.
pub fn with_aggregate(
    state: QueryState,
    registry: &RelationRegistry,
    relations: &[&str],
    column: &str,
    function: Option<AggregateFunction>,
) -> Result<QueryState, CompileError> {
    let kind = match function {
        Some(function) => SubSelectKind::Aggregate(function),
        None => SubSelectKind::First,
    };
    attach_sub_selects(state, registry, relations, column, kind, function.map_or("", |f| f.name()))
}

fn attach_sub_selects(
    mut state: QueryState,
    registry: &RelationRegistry,
    relations: &[&str],
    column: &str,
    kind: SubSelectKind,
    function_name: &str,
) -> Result<QueryState, CompileError> {
    if relations.is_empty() {
        return Ok(state);
    }
    if state.columns.is_empty() {
        state.columns.push(Column::All);
    }

    let projected = if column == "*" {
        None
    } else {
        Some(FieldPath::parse(column)?)
    };

    for spec in relations {
        let (name, alias) = split_alias(spec);
        if name.is_empty() || name.contains(' ') {
            return Err(CompileError::InvalidRelationSpec(spec.to_string()));
        }
        let relation = lookup(registry, &name)?;

        let mut query = related_query(relation, state.reference_name());
        query.orders.clear();
        query.columns.truncate(1);
        if let Some(field) = &projected {
            query.columns = vec![Column::Field {
                field: field.clone(),
                alias: None,
            }];
        }
        if kind == SubSelectKind::First {
            query.limit = Some(1);
        }

        let alias = alias.unwrap_or_else(|| default_alias(&name, function_name, column));
        tracing::debug!(relation = %name, alias = %alias, "relation sub-select attached");
        state.columns.push(Column::SubSelect {
            alias,
            select: SubSelect {
                query: Box::new(query),
                kind,
            },
        });
    }
    Ok(state)
}

/// `posts` + `count` + `*` → `posts_count`.
fn default_alias(relation: &str, function: &str, column: &str) -> String {
    let raw = format!("{relation} {function} {column}");
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '_')
        .collect();
    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_case(Case::Snake)
}

/// Count of related records, as `{relation}_count`.
pub fn with_count(
    state: QueryState,
    registry: &RelationRegistry,
    relations: &[&str],
) -> Result<QueryState, CompileError> {
    with_aggregate(state, registry, relations, "*", Some(AggregateFunction::Count))
}

pub fn with_max(
    state: QueryState,
    registry: &RelationRegistry,
    relations: &[&str],
    column: &str,
) -> Result<QueryState, CompileError> {
    with_aggregate(state, registry, relations, column, Some(AggregateFunction::Max))
}

pub fn with_min(
    state: QueryState,
    registry: &RelationRegistry,
    relations: &[&str],
    column: &str,
) -> Result<QueryState, CompileError> {
    with_aggregate(state, registry, relations, column, Some(AggregateFunction::Min))
}

pub fn with_sum(
    state: QueryState,
    registry: &RelationRegistry,
    relations: &[&str],
    column: &str,
) -> Result<QueryState, CompileError> {
    with_aggregate(state, registry, relations, column, Some(AggregateFunction::Sum))
}

pub fn with_avg(
    state: QueryState,
    registry: &RelationRegistry,
    relations: &[&str],
    column: &str,
) -> Result<QueryState, CompileError> {
    with_aggregate(state, registry, relations, column, Some(AggregateFunction::Avg))
}

/// Whether any related record exists, as `{relation}_exists`.
pub fn with_exists(
    state: QueryState,
    registry: &RelationRegistry,
    relations: &[&str],
) -> Result<QueryState, CompileError> {
    attach_sub_selects(state, registry, relations, "*", SubSelectKind::Exists, "exists")
}

fn pivot_link(relation: &RelationDescriptor) -> Result<&docforge_core::relation::Pivot, CompileError> {
    relation.pivot().ok_or_else(|| {
        CompileError::unsupported(
            format!("pivot records for relation {}", relation.name),
            "non many-to-many relation",
        )
    })
}

/// Pivot records linking `parent_key` to each of `related_keys`.
///
/// `attributes` are copied onto every record. Keys are normalized to the
/// store's string form.
pub fn attach_records(
    relation: &RelationDescriptor,
    parent_key: &Value,
    related_keys: &[Value],
    attributes: &Document,
) -> Result<InsertValues, CompileError> {
    let pivot = pivot_link(relation)?;
    let parent_key = relation.key_type.normalize(parent_key);
    let records = related_keys
        .iter()
        .map(|key| {
            let mut record = Document::new();
            record.insert(pivot.foreign_pivot_key.clone(), parent_key.clone());
            record.insert(pivot.related_pivot_key.clone(), relation.key_type.normalize(key));
            if let Some(morph) = &relation.morph {
                record.insert(morph.type_attribute.clone(), Value::String(morph.type_value.clone()));
            }
            for (name, value) in attributes {
                record.insert(name.clone(), value.clone());
            }
            record
        })
        .collect();
    Ok(InsertValues::Records(records))
}

/// Delete query over the pivot collection for `parent_key`.
///
/// An empty `related_keys` detaches everything.
pub fn detach_query(
    relation: &RelationDescriptor,
    parent_key: &Value,
    related_keys: &[Value],
) -> Result<QueryState, CompileError> {
    let pivot = pivot_link(relation)?;
    let mut query = QueryState::new(pivot.collection.clone()).where_eq(
        pivot.foreign_pivot_key.as_str(),
        relation.key_type.normalize(parent_key),
    );
    if !related_keys.is_empty() {
        let keys = related_keys
            .iter()
            .map(|key| relation.key_type.normalize(key))
            .collect();
        query = query.where_in(pivot.related_pivot_key.as_str(), keys);
    }
    if let Some(morph) = &relation.morph {
        query = query.where_eq(
            morph.type_attribute.as_str(),
            Value::String(morph.type_value.clone()),
        );
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::AqlCompiler;
    use docforge_backend::StatementCompiler;
    use docforge_core::relation::Pivot;
    use docforge_core::{CollectionName, KeyType};
    use serde_json::json;

    fn name(s: &str) -> CollectionName {
        CollectionName::new(s).unwrap()
    }

    fn characters() -> QueryState {
        QueryState::new(name("characters"))
    }

    fn allegiances() -> RelationDescriptor {
        RelationDescriptor::belongs_to_many(
            "houses",
            name("characters"),
            name("houses"),
            Pivot {
                collection: name("allegiances"),
                foreign_pivot_key: "character_key".into(),
                related_pivot_key: "house_key".into(),
            },
        )
    }

    fn registry() -> RelationRegistry {
        RelationRegistry::new()
            .register(RelationDescriptor::has_many(
                "children",
                name("characters"),
                name("children"),
                "parent_key",
            ))
            .register(RelationDescriptor::belongs_to(
                "location",
                name("characters"),
                name("locations"),
                "residence_key",
            ))
            .register(allegiances())
    }

    fn text(query: &QueryState) -> String {
        AqlCompiler::default().compile_select(query).unwrap().text()
    }

    #[test]
    fn with_count_adds_correlated_sub_select() {
        let query = with_count(characters(), &registry(), &["children"]).unwrap();
        assert_eq!(
            text(&query),
            "FOR characterDoc IN characters RETURN MERGE(characterDoc, { children_count: COUNT((FOR childrenDoc IN children FILTER childrenDoc.parent_key == characterDoc._key RETURN childrenDoc)) })"
        );
    }

    #[test]
    fn explicit_alias_is_used() {
        let query = with_count(characters(), &registry(), &["children as offspring"]).unwrap();
        assert_eq!(query.columns[1].output_name(), Some("offspring"));
    }

    #[test]
    fn aggregate_over_column_collapses_to_scalar() {
        let query = with_max(characters(), &registry(), &["children"], "age").unwrap();
        assert_eq!(query.columns[1].output_name(), Some("children_max_age"));
        assert!(text(&query).contains(
            "children_max_age: MAX((FOR childrenDoc IN children FILTER childrenDoc.parent_key == characterDoc._key RETURN childrenDoc.age))"
        ));
    }

    #[test]
    fn no_function_takes_first_value() {
        let query = with_aggregate(characters(), &registry(), &["location"], "name", None).unwrap();
        assert!(text(&query).contains(
            "location_name: FIRST((FOR locationDoc IN locations FILTER locationDoc._key == characterDoc.residence_key LIMIT 1 RETURN locationDoc.name))"
        ));
    }

    #[test]
    fn explicit_columns_are_kept() {
        let query = with_count(characters().select(&["name"]), &registry(), &["children"]).unwrap();
        assert!(text(&query).starts_with(
            "FOR characterDoc IN characters RETURN { name: characterDoc.name, children_count: COUNT("
        ));
    }

    #[test]
    fn unknown_relation_is_rejected() {
        let err = with_count(characters(), &registry(), &["dragons"]).unwrap_err();
        assert_eq!(err, CompileError::UnknownRelation("dragons".into()));
    }

    #[test]
    fn empty_relation_list_changes_nothing() {
        let query = with_count(characters(), &registry(), &[]).unwrap();
        assert!(query.columns.is_empty());
    }

    #[test]
    fn self_relation_aliases_related_side() {
        let registry = RelationRegistry::new().register(RelationDescriptor::has_many(
            "children",
            name("characters"),
            name("characters"),
            "parent_key",
        ));
        let query = with_count(characters(), &registry, &["children"]).unwrap();
        assert!(text(&query).contains(
            "COUNT((FOR childrenDoc IN characters FILTER childrenDoc.parent_key == characterDoc._key RETURN childrenDoc))"
        ));
    }

    #[test]
    fn belongs_to_many_joins_pivot() {
        let query = with_count(characters(), &registry(), &["houses"]).unwrap();
        assert!(text(&query).contains(
            "FOR houseDoc IN houses FOR allegianceDoc IN allegiances FILTER allegianceDoc.house_key == houseDoc._key FILTER allegianceDoc.character_key == characterDoc._key"
        ));
    }

    #[test]
    fn where_has_one_is_existence() {
        let query = where_has(characters(), &registry(), "children", Operator::Gte, 1).unwrap();
        assert!(text(&query).contains("FILTER LENGTH((FOR childrenDoc IN children"));
    }

    #[test]
    fn where_has_many_counts() {
        let query = where_has(characters(), &registry(), "children", Operator::Gte, 3).unwrap();
        assert!(text(&query).contains("FILTER COUNT((FOR childrenDoc IN children"));
        assert!(text(&query).ends_with(">= @value1 RETURN characterDoc"));
    }

    #[test]
    fn morph_filters_on_type() {
        let relation = RelationDescriptor::has_many("tags", name("characters"), name("taggables"), "taggable_key")
            .with_morph("taggable_type", "Character");
        let query = relation_query(&relation);
        let stmt = AqlCompiler::default().compile_select(&query).unwrap();
        assert!(stmt.text().contains("AND taggableDoc.taggable_type == @value1"));
        assert_eq!(stmt.bindings.get("value1"), Some(&json!("Character")));
    }

    #[test]
    fn default_alias_is_snake_cased() {
        assert_eq!(default_alias("children", "count", "*"), "children_count");
        assert_eq!(default_alias("houseWords", "sum", "length"), "house_words_sum_length");
        assert_eq!(default_alias("location", "", "name"), "location_name");
    }

    #[test]
    fn attach_records_normalize_keys() {
        let relation = allegiances().with_key_type(KeyType::Integer);
        let mut attributes = Document::new();
        attributes.insert("sworn".into(), json!(true));
        let records = attach_records(&relation, &json!(7), &[json!(1), json!("stark")], &attributes)
            .unwrap()
            .into_batch();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["character_key"], json!("7"));
        assert_eq!(records[0]["house_key"], json!("1"));
        assert_eq!(records[1]["house_key"], json!("stark"));
        assert_eq!(records[1]["sworn"], json!(true));
    }

    #[test]
    fn attach_requires_pivot() {
        let relation = registry().get("children").cloned().unwrap();
        assert!(attach_records(&relation, &json!("ned"), &[], &Document::new()).is_err());
    }

    #[test]
    fn detach_query_filters_pivot() {
        let query = detach_query(&allegiances(), &json!("ned"), &[json!("stark")]).unwrap();
        let stmt = AqlCompiler::default().compile_delete(&query).unwrap();
        assert_eq!(
            stmt.text(),
            "FOR allegianceDoc IN allegiances FILTER allegianceDoc.character_key == @value1 AND allegianceDoc.house_key IN @value2 REMOVE allegianceDoc IN allegiances"
        );
    }
}
