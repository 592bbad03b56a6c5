//! Pure functions implementing AQL value semantics over `serde_json::Value`.
//!
//! Used by the in-memory engine for comparisons, sorting, truthiness and
//! aggregation. Values of different types order as
//! `null < bool < number < string < array < object`.

use std::cmp::Ordering;

use serde_json::{Map, Value};

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over values, following AQL's cross-type rules.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(_), Value::Number(_)) => {
            let x = a.as_f64().unwrap_or_default();
            let y = b.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => compare_arrays(x, y),
        (Value::Object(x), Value::Object(y)) => compare_objects(x, y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

/// Arrays compare element-wise; a missing element counts as `null`.
fn compare_arrays(x: &[Value], y: &[Value]) -> Ordering {
    let len = x.len().max(y.len());
    for i in 0..len {
        let ord = compare_values(x.get(i).unwrap_or(&Value::Null), y.get(i).unwrap_or(&Value::Null));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Objects compare attribute by attribute in name order; a missing attribute
/// counts as `null`.
fn compare_objects(x: &Map<String, Value>, y: &Map<String, Value>) -> Ordering {
    let mut keys: Vec<&String> = x.keys().chain(y.keys()).collect();
    keys.sort();
    keys.dedup();
    for key in keys {
        let ord = compare_values(x.get(key).unwrap_or(&Value::Null), y.get(key).unwrap_or(&Value::Null));
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// `a == b` under AQL rules, so `1 == 1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// AQL truthiness: `null`, `false`, `0` and `""` are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// A whole number as an integer, anything else as a float.
pub fn number_value(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        Value::from(f)
    }
}

/// `LIKE` matching: `%` matches any run of characters, `_` exactly one, and
/// a backslash escapes the next pattern character.
pub fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '\\' => LikeToken::Literal(chars.next().unwrap_or('\\')),
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            other => LikeToken::Literal(other),
        });
    }

    // matches[j]: the first i characters of text match the first j tokens.
    let mut matches = vec![false; tokens.len() + 1];
    matches[0] = true;
    for (j, token) in tokens.iter().enumerate() {
        matches[j + 1] = matches[j] && *token == LikeToken::Any;
    }
    for c in &text {
        let mut next = vec![false; tokens.len() + 1];
        for (j, token) in tokens.iter().enumerate() {
            next[j + 1] = match token {
                LikeToken::Any => next[j] || matches[j + 1],
                LikeToken::One => matches[j],
                LikeToken::Literal(l) => matches[j] && l == c,
            };
        }
        matches = next;
    }
    matches[tokens.len()]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    Any,
    One,
    Literal(char),
}

/// Apply an aggregate function to a list of values.
///
/// Returns `None` for names that are not aggregate functions.
pub fn aggregate(function: &str, values: &[Value]) -> Option<Value> {
    let non_null = || values.iter().filter(|v| !v.is_null());
    let result = match function {
        "COUNT" | "LENGTH" => Value::from(values.len()),
        "COUNT_DISTINCT" => {
            let mut distinct: Vec<&Value> = Vec::new();
            for value in values {
                if !distinct.iter().any(|seen| values_equal(seen, value)) {
                    distinct.push(value);
                }
            }
            Value::from(distinct.len())
        }
        "MAX" => non_null()
            .max_by(|a, b| compare_values(a, b))
            .cloned()
            .unwrap_or(Value::Null),
        "MIN" => non_null()
            .min_by(|a, b| compare_values(a, b))
            .cloned()
            .unwrap_or(Value::Null),
        "SUM" => number_value(non_null().filter_map(Value::as_f64).sum()),
        "AVERAGE" | "AVG" => {
            let numbers: Vec<f64> = non_null().filter_map(Value::as_f64).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                number_value(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        _ => return None,
    };
    Some(result)
}
