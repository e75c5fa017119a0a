//! Value helpers shared by the evaluator and builtins: ordering, arithmetic,
//! indexing and error descriptions, following jq's semantics for JSON values.

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

use super::Failure;

/// Largest integer that survives a round trip through `f64`.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

pub fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Convert an `f64` result back into a JSON number, keeping integers integral.
/// NaN has no JSON form and becomes `null`; infinities clamp to the largest finite value.
#[allow(clippy::cast_possible_truncation)]
pub fn number(value: f64) -> Value {
    if value.is_nan() {
        return Value::Null;
    }
    let value = if value.is_infinite() {
        f64::MAX.copysign(value)
    } else {
        value
    };
    if value.fract() == 0.0 && value.abs() < MAX_SAFE_INTEGER {
        return Value::Number(Number::from(value as i64));
    }
    Number::from_f64(value).map_or(Value::Null, Value::Number)
}

pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        _ => None,
    }
}

/// Short rendering of a value for error messages, truncated like jq does.
pub fn describe(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > 11 {
        let truncated: String = text.chars().take(10).collect();
        format!("{} ({truncated}...)", type_name(value))
    } else {
        format!("{} ({text})", type_name(value))
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// Total order over JSON values: null < false < true < numbers < strings < arrays < objects.
pub fn compare(left: &Value, right: &Value) -> Ordering {
    let rank = type_rank(left).cmp(&type_rank(right));
    if rank != Ordering::Equal {
        return rank;
    }

    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                let ordering = compare(x, y);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            let mut a_keys: Vec<&String> = a.keys().collect();
            let mut b_keys: Vec<&String> = b.keys().collect();
            a_keys.sort();
            b_keys.sort();
            let keys = a_keys.cmp(&b_keys);
            if keys != Ordering::Equal {
                return keys;
            }
            for key in a_keys {
                let ordering = compare(&a[key.as_str()], &b[key.as_str()]);
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        }
        _ => Ordering::Equal,
    }
}

pub fn equals(left: &Value, right: &Value) -> bool {
    compare(left, right) == Ordering::Equal
}

pub fn add(left: Value, right: Value) -> Result<Value, Failure> {
    match (left, right) {
        (Value::Null, other) | (other, Value::Null) => Ok(other),
        (Value::Number(a), Value::Number(b)) => Ok(number(
            a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default(),
        )),
        (Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (Value::Object(mut a), Value::Object(b)) => {
            a.extend(b);
            Ok(Value::Object(a))
        }
        (a, b) => Err(Failure::message(format!(
            "{} and {} cannot be added",
            describe(&a),
            describe(&b)
        ))),
    }
}

pub fn subtract(left: Value, right: Value) -> Result<Value, Failure> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(number(
            a.as_f64().unwrap_or_default() - b.as_f64().unwrap_or_default(),
        )),
        (Value::Array(a), Value::Array(b)) => Ok(Value::Array(
            a.into_iter()
                .filter(|item| !b.iter().any(|removed| equals(item, removed)))
                .collect(),
        )),
        (a, b) => Err(Failure::message(format!(
            "{} and {} cannot be subtracted",
            describe(&a),
            describe(&b)
        ))),
    }
}

pub fn multiply(left: Value, right: Value) -> Result<Value, Failure> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(number(
            a.as_f64().unwrap_or_default() * b.as_f64().unwrap_or_default(),
        )),
        (Value::String(text), Value::Number(times)) | (Value::Number(times), Value::String(text)) => {
            repeat_string(&text, times.as_f64().unwrap_or_default())
        }
        (Value::Object(a), Value::Object(b)) => Ok(Value::Object(deep_merge(a, b))),
        (a, b) => Err(Failure::message(format!(
            "{} and {} cannot be multiplied",
            describe(&a),
            describe(&b)
        ))),
    }
}

/// Largest string `string * number` may build.
pub const MAX_REPEAT_BYTES: usize = 1 << 28;

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn repeat_string(text: &str, times: f64) -> Result<Value, Failure> {
    if times.is_nan() || times <= 0.0 {
        return Ok(Value::Null);
    }
    if text.is_empty() {
        return Ok(Value::String(String::new()));
    }
    let count = times.ceil();
    // Checked in f64 first: the product may not fit in usize.
    if !count.is_finite() || count * text.len() as f64 > MAX_REPEAT_BYTES as f64 {
        return Err(Failure::message("Repeat string result too long"));
    }
    let count = count as usize;
    match text.len().checked_mul(count) {
        Some(total) if total <= MAX_REPEAT_BYTES => Ok(Value::String(text.repeat(count))),
        _ => Err(Failure::message("Repeat string result too long")),
    }
}

fn deep_merge(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        let merged = match (base.remove(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                Value::Object(deep_merge(existing, incoming))
            }
            (_, incoming) => incoming,
        };
        base.insert(key, merged);
    }
    base
}

pub fn divide(left: Value, right: Value) -> Result<Value, Failure> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let divisor = b.as_f64().unwrap_or_default();
            if divisor == 0.0 {
                return Err(Failure::message(format!(
                    "{} and {} cannot be divided because the divisor is zero",
                    describe(&Value::Number(a)),
                    describe(&Value::Number(b))
                )));
            }
            Ok(number(a.as_f64().unwrap_or_default() / divisor))
        }
        (Value::String(text), Value::String(separator)) => Ok(split_string(&text, &separator)),
        (a, b) => Err(Failure::message(format!(
            "{} and {} cannot be divided",
            describe(&a),
            describe(&b)
        ))),
    }
}

#[allow(clippy::cast_possible_truncation)]
pub fn modulo(left: Value, right: Value) -> Result<Value, Failure> {
    match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or_default() as i64;
            let b = b.as_f64().unwrap_or_default() as i64;
            if b == 0 {
                return Err(Failure::message(format!(
                    "{} and {} cannot be divided because the divisor is zero",
                    describe(&left),
                    describe(&right)
                )));
            }
            Ok(Value::from(a.wrapping_rem(b.wrapping_abs())))
        }
        _ => Err(Failure::message(format!(
            "{} and {} cannot be divided",
            describe(&left),
            describe(&right)
        ))),
    }
}

pub fn split_string(text: &str, separator: &str) -> Value {
    if text.is_empty() {
        return Value::Array(Vec::new());
    }
    let parts: Vec<Value> = if separator.is_empty() {
        text.chars().map(|ch| Value::String(ch.to_string())).collect()
    } else {
        text.split(separator)
            .map(|part| Value::String(part.to_string()))
            .collect()
    };
    Value::Array(parts)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn resolve_position(position: f64, len: usize) -> Option<usize> {
    let position = position.floor() as i64;
    let resolved = if position < 0 {
        len as i64 + position
    } else {
        position
    };
    usize::try_from(resolved).ok()
}

/// `target[index]`
pub fn index(target: &Value, index: &Value) -> Result<Value, Failure> {
    match (target, index) {
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::Array(items), Value::Number(position)) => {
            let position = position.as_f64().unwrap_or_default();
            Ok(resolve_position(position, items.len())
                .and_then(|i| items.get(i))
                .cloned()
                .unwrap_or(Value::Null))
        }
        (Value::Null, Value::String(_) | Value::Number(_) | Value::Null) => Ok(Value::Null),
        (Value::Array(_) | Value::Null | Value::String(_), Value::Object(bounds)) => {
            let from = bounds.get("start").cloned().unwrap_or(Value::Null);
            let to = bounds.get("end").cloned().unwrap_or(Value::Null);
            slice(target, &from, &to)
        }
        (target, Value::String(key)) => Err(Failure::message(format!(
            "Cannot index {} with \"{key}\"",
            type_name(target)
        ))),
        (target, index) => Err(Failure::message(format!(
            "Cannot index {} with {}",
            type_name(target),
            type_name(index)
        ))),
    }
}

/// `target[from:to]` on arrays and strings; bounds are clamped.
pub fn slice(target: &Value, from: &Value, to: &Value) -> Result<Value, Failure> {
    let bound = |value: &Value, default: usize, len: usize| -> Result<usize, Failure> {
        match value {
            Value::Null => Ok(default),
            Value::Number(number) => {
                let position = number.as_f64().unwrap_or_default();
                Ok(resolve_position(position, len).unwrap_or(0).min(len))
            }
            other => Err(Failure::message(format!(
                "Start and end indices of an slice must be numbers, not {}",
                type_name(other)
            ))),
        }
    };

    match target {
        Value::Null => Ok(Value::Null),
        Value::Array(items) => {
            let start = bound(from, 0, items.len())?;
            let end = bound(to, items.len(), items.len())?;
            Ok(Value::Array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }
        Value::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let start = bound(from, 0, chars.len())?;
            let end = bound(to, chars.len(), chars.len())?;
            Ok(Value::String(if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            }))
        }
        other => Err(Failure::message(format!(
            "Cannot index {} with object",
            type_name(other)
        ))),
    }
}

/// Children of `.[]`.
pub fn iterate(value: Value) -> Result<Vec<Value>, Failure> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(map) => Ok(map.into_iter().map(|(_, value)| value).collect()),
        other => Err(Failure::message(format!(
            "Cannot iterate over {}",
            describe(&other)
        ))),
    }
}

/// String form used by `tostring`, `join` and string interpolation.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_repetition_is_bounded() {
        assert_eq!(multiply(json!("ab"), json!(3)).unwrap(), json!("ababab"));
        assert_eq!(multiply(json!("ab"), json!(0)).unwrap(), Value::Null);
        assert!(multiply(json!("ab"), json!(1e18)).is_err());
        assert!(multiply(json!(f64::MAX), json!("ab")).is_err());
        assert_eq!(multiply(json!(""), json!(1e18)).unwrap(), json!(""));
    }

    #[test]
    fn integral_results_stay_integers() {
        assert_eq!(number(3.0), json!(3));
        assert_eq!(number(0.5), json!(0.5));
        assert_eq!(number(f64::NAN), Value::Null);
    }

    #[test]
    fn ordering_follows_type_rank() {
        let mut values = vec![json!({"a": 1}), json!("b"), json!(2), json!(null), json!(true), json!([1])];
        values.sort_by(compare);
        assert_eq!(
            values,
            vec![json!(null), json!(true), json!(2), json!("b"), json!([1]), json!({"a": 1})]
        );
    }

    #[test]
    fn integer_and_float_compare_equal() {
        assert!(equals(&json!(1), &json!(1.0)));
    }

    #[test]
    fn negative_index_counts_from_end() {
        let array = json!([1, 2, 3]);
        assert_eq!(index(&array, &json!(-1)).ok(), Some(json!(3)));
        assert_eq!(index(&array, &json!(7)).ok(), Some(Value::Null));
    }

    #[test]
    fn describe_truncates_long_values() {
        assert_eq!(describe(&json!("abcdefghijklmnop")), "string (\"abcdefghi...)");
        assert_eq!(describe(&json!(1)), "number (1)");
    }
}
