//! Builtin functions, looked up by name and arity.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::value::{self, as_f64, compare, describe, equals, number, to_text, truthy, type_name};
use super::{
    Ctx, Failure, ValueIter, ValueResult, children, collect, empty, eval, fail, first_value,
    lift, recurse_with, single, then,
};
use crate::ast::Expr;

/// `$ENV` is always bound.
pub const ENV_VARIABLE: &str = "ENV";

const BUILTINS: &[(&str, usize)] = &[
    ("length", 0),
    ("utf8bytelength", 0),
    ("keys", 0),
    ("keys_unsorted", 0),
    ("values", 0),
    ("add", 0),
    ("any", 0),
    ("all", 0),
    ("empty", 0),
    ("not", 0),
    ("type", 0),
    ("tostring", 0),
    ("tonumber", 0),
    ("tojson", 0),
    ("fromjson", 0),
    ("ascii_downcase", 0),
    ("ascii_upcase", 0),
    ("floor", 0),
    ("ceil", 0),
    ("sqrt", 0),
    ("abs", 0),
    ("reverse", 0),
    ("sort", 0),
    ("unique", 0),
    ("min", 0),
    ("max", 0),
    ("to_entries", 0),
    ("from_entries", 0),
    ("env", 0),
    ("infinite", 0),
    ("nan", 0),
    ("recurse", 0),
    ("error", 0),
    ("first", 0),
    ("last", 0),
    ("map", 1),
    ("select", 1),
    ("recurse", 1),
    ("first", 1),
    ("last", 1),
    ("range", 1),
    ("repeat", 1),
    ("has", 1),
    ("contains", 1),
    ("startswith", 1),
    ("endswith", 1),
    ("ltrimstr", 1),
    ("rtrimstr", 1),
    ("split", 1),
    ("join", 1),
    ("with_entries", 1),
    ("sort_by", 1),
    ("error", 1),
    ("any", 1),
    ("all", 1),
    ("limit", 2),
    ("range", 2),
    ("until", 2),
    ("while", 2),
];

pub fn is_builtin(name: &str, arity: usize) -> bool {
    BUILTINS.iter().any(|&(builtin, n)| builtin == name && n == arity)
}

pub fn arities(name: &str) -> impl Iterator<Item = usize> + '_ {
    BUILTINS
        .iter()
        .filter(move |(builtin, _)| *builtin == name)
        .map(|&(_, arity)| arity)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|&(name, _)| name)
}

pub fn call<'a>(name: &'a str, args: &'a [Expr], ctx: &Ctx<'a>, input: Value) -> ValueIter<'a> {
    match (name, args) {
        ("empty", []) => empty(),
        ("error", []) => fail(Failure::Raised(input)),
        ("not", []) => single(Value::Bool(!truthy(&input))),
        ("env", []) => single(ctx.env().clone()),
        ("infinite", []) => single(number(f64::INFINITY)),
        ("nan", []) => single(number(f64::NAN)),
        ("recurse", []) => recurse_with(ctx.clone(), input, children),
        ("first", []) => lift(value::index(&input, &Value::from(0))),
        ("last", []) => lift(value::index(&input, &Value::from(-1))),
        ("values", []) => {
            if input.is_null() {
                empty()
            } else {
                single(input)
            }
        }
        (_, []) => lift(simple(name, input)),

        ("map", [f]) => lift(map(f, ctx, input)),
        ("select", [f]) => then(eval(f, ctx, input.clone()), move |condition| {
            if truthy(&condition) {
                single(input.clone())
            } else {
                empty()
            }
        }),
        ("recurse" | "repeat", [f]) => {
            let step_ctx = ctx.clone();
            recurse_with(ctx.clone(), input, move |value| {
                eval(f, &step_ctx, value.clone())
            })
        }
        ("first", [f]) => Box::new(eval(f, ctx, input).take(1)),
        ("last", [f]) => match last(eval(f, ctx, input)) {
            Ok(Some(value)) => single(value),
            Ok(None) => empty(),
            Err(failure) => fail(failure),
        },
        ("range", [upto]) => {
            let ctx = ctx.clone();
            then(eval(upto, &ctx.clone(), input), move |upto| {
                match as_f64(&upto) {
                    Some(upto) => count_up(ctx.clone(), 0.0, upto),
                    None => fail(Failure::message("Range bounds must be numeric")),
                }
            })
        }
        ("error", [message]) => then(eval(message, ctx, input), |message| {
            fail(Failure::Raised(message))
        }),
        ("any" | "all", [f]) => lift(quantify(name == "all", f, ctx, input)),
        ("with_entries", [f]) => lift(with_entries(f, ctx, input)),
        ("sort_by", [f]) => lift(sort_by(f, ctx, input)),
        (_, [arg]) => then(eval(arg, ctx, input.clone()), move |arg| {
            lift(with_argument(name, &input, arg))
        }),

        ("limit", [count, f]) => {
            let ctx = ctx.clone();
            let original = input.clone();
            then(eval(count, &ctx.clone(), input), move |count| match as_f64(&count) {
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                Some(count) if count > 0.0 => {
                    let limited = eval(f, &ctx, original.clone()).take(count as usize);
                    let ctx = ctx.clone();
                    let checked: ValueIter<'a> = Box::new(limited.map(move |item| {
                        ctx.check()?;
                        item
                    }));
                    checked
                }
                Some(_) => empty(),
                None => fail(Failure::message("Invalid limit: must be a number")),
            })
        }
        ("range", [from, upto]) => {
            let ctx = ctx.clone();
            let original = input.clone();
            then(eval(from, &ctx.clone(), input), move |from| {
                let ctx = ctx.clone();
                then(eval(upto, &ctx.clone(), original.clone()), move |upto| {
                    match (as_f64(&from), as_f64(&upto)) {
                        (Some(from), Some(upto)) => count_up(ctx.clone(), from, upto),
                        _ => fail(Failure::message("Range bounds must be numeric")),
                    }
                })
            })
        }
        ("until", [cond, update]) => until(cond, update, ctx.clone(), input),
        ("while", [cond, update]) => repeat_while(cond, update, ctx.clone(), input),

        _ => fail(Failure::message(format!(
            "{name}/{} is not defined",
            args.len()
        ))),
    }
}

fn number_input(name: &str, input: &Value) -> Result<f64, Failure> {
    as_f64(input).ok_or_else(|| Failure::message(format!("{} number required for {name}", describe(input))))
}

fn string_input<'v>(name: &str, input: &'v Value) -> Result<&'v str, Failure> {
    input.as_str().ok_or_else(|| {
        Failure::message(format!("{name} input must be a string, not {}", type_name(input)))
    })
}

fn sorted_array(input: Value) -> Result<Vec<Value>, Failure> {
    match input {
        Value::Array(mut items) => {
            items.sort_by(compare);
            Ok(items)
        }
        other => Err(Failure::message(format!(
            "{} cannot be sorted, as it is not an array",
            describe(&other)
        ))),
    }
}

fn key_list(input: &Value, sorted: bool) -> ValueResult {
    match input {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            if sorted {
                keys.sort();
            }
            Ok(Value::Array(keys.into_iter().map(|key| Value::String(key.clone())).collect()))
        }
        Value::Array(items) => Ok(Value::Array((0..items.len()).map(Value::from).collect())),
        other => Err(Failure::message(format!("{} has no keys", describe(other)))),
    }
}

/// Zero-argument builtins that map one input to one output.
fn simple(name: &str, input: Value) -> ValueResult {
    match name {
        "length" => match &input {
            Value::Null => Ok(Value::from(0)),
            Value::Bool(_) => Err(Failure::message(format!("{} has no length", describe(&input)))),
            Value::Number(n) => Ok(number(n.as_f64().unwrap_or_default().abs())),
            Value::String(text) => Ok(Value::from(text.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
        },
        "utf8bytelength" => Ok(Value::from(string_input(name, &input)?.len())),
        "keys" => key_list(&input, true),
        "keys_unsorted" => key_list(&input, false),
        "add" => {
            let items = match input {
                Value::Null => return Ok(Value::Null),
                Value::Array(items) => items,
                Value::Object(map) => map.into_iter().map(|(_, value)| value).collect(),
                other => {
                    return Err(Failure::message(format!(
                        "Cannot iterate over {}",
                        describe(&other)
                    )));
                }
            };
            items.into_iter().try_fold(Value::Null, value::add)
        }
        "any" => quantify_items(false, value::iterate(input)?.iter().map(truthy)),
        "all" => quantify_items(true, value::iterate(input)?.iter().map(truthy)),
        "type" => Ok(Value::String(type_name(&input).to_string())),
        "tostring" => Ok(Value::String(to_text(&input))),
        "tonumber" => match &input {
            Value::Number(n) => Ok(Value::Number(n.clone())),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .map(number)
                .map_err(|_| Failure::message(format!("Cannot parse '{text}' as JSON"))),
            other => Err(Failure::message(format!(
                "{} cannot be parsed as a number",
                describe(other)
            ))),
        },
        "tojson" => Ok(Value::String(input.to_string())),
        "fromjson" => {
            let text = string_input(name, &input)?;
            serde_json::from_str(text)
                .map_err(|error| Failure::message(format!("{error} (while parsing '{text}')")))
        }
        "ascii_downcase" => Ok(Value::String(string_input(name, &input)?.to_ascii_lowercase())),
        "ascii_upcase" => Ok(Value::String(string_input(name, &input)?.to_ascii_uppercase())),
        "floor" => Ok(number(number_input(name, &input)?.floor())),
        "ceil" => Ok(number(number_input(name, &input)?.ceil())),
        "sqrt" => Ok(number(number_input(name, &input)?.sqrt())),
        "abs" => Ok(number(number_input(name, &input)?.abs())),
        "reverse" => match input {
            Value::Null => Ok(Value::Array(Vec::new())),
            Value::Array(mut items) => {
                items.reverse();
                Ok(Value::Array(items))
            }
            Value::String(text) => Ok(Value::String(text.chars().rev().collect())),
            other => Err(Failure::message(format!("Cannot reverse {}", describe(&other)))),
        },
        "sort" => sorted_array(input).map(Value::Array),
        "unique" => {
            let mut items = sorted_array(input)?;
            items.dedup_by(|a, b| equals(a, b));
            Ok(Value::Array(items))
        }
        "min" | "max" => {
            let items = match input {
                Value::Array(items) => items,
                other => {
                    return Err(Failure::message(format!(
                        "{} cannot be searched for its {name}imum",
                        describe(&other)
                    )));
                }
            };
            let wanted = if name == "min" {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            Ok(items
                .into_iter()
                .reduce(|best, item| {
                    if compare(&item, &best) == wanted {
                        item
                    } else {
                        best
                    }
                })
                .unwrap_or(Value::Null))
        }
        "to_entries" => to_entries(input),
        "from_entries" => from_entries(input),
        _ => Err(Failure::message(format!("{name}/0 is not defined"))),
    }
}

/// One-argument builtins whose argument is a plain value.
fn with_argument(name: &str, input: &Value, arg: Value) -> ValueResult {
    match name {
        "has" => match (input, &arg) {
            (Value::Object(map), Value::String(key)) => Ok(Value::Bool(map.contains_key(key))),
            (Value::Array(items), Value::Number(index)) => {
                let index = index.as_f64().unwrap_or(-1.0);
                #[allow(clippy::cast_precision_loss)]
                let len = items.len() as f64;
                Ok(Value::Bool(index >= 0.0 && index < len))
            }
            _ => Err(Failure::message(format!(
                "Cannot check whether {} has a {} key",
                type_name(input),
                type_name(&arg)
            ))),
        },
        "contains" => {
            if type_name(input) == type_name(&arg)
                || matches!((input, &arg), (Value::Bool(_), Value::Bool(_)))
            {
                Ok(Value::Bool(contains(input, &arg)))
            } else {
                Err(Failure::message(format!(
                    "{} and {} cannot have their containment checked",
                    describe(input),
                    describe(&arg)
                )))
            }
        }
        "startswith" | "endswith" => match (input, &arg) {
            (Value::String(text), Value::String(affix)) => Ok(Value::Bool(if name == "startswith" {
                text.starts_with(affix.as_str())
            } else {
                text.ends_with(affix.as_str())
            })),
            _ => Err(Failure::message(format!("{name}() requires string inputs"))),
        },
        "ltrimstr" => Ok(match (input, &arg) {
            (Value::String(text), Value::String(prefix)) => text
                .strip_prefix(prefix.as_str())
                .map_or_else(|| input.clone(), |rest| Value::String(rest.to_string())),
            _ => input.clone(),
        }),
        "rtrimstr" => Ok(match (input, &arg) {
            (Value::String(text), Value::String(suffix)) => text
                .strip_suffix(suffix.as_str())
                .map_or_else(|| input.clone(), |rest| Value::String(rest.to_string())),
            _ => input.clone(),
        }),
        "split" => match (input, &arg) {
            (Value::String(text), Value::String(separator)) => {
                Ok(value::split_string(text, separator))
            }
            _ => Err(Failure::message("split input and separator must be strings")),
        },
        "join" => join(input, &arg),
        _ => Err(Failure::message(format!("{name}/1 is not defined"))),
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::Object(a), Value::Object(b)) => b
            .iter()
            .all(|(key, wanted)| a.get(key).is_some_and(|found| contains(found, wanted))),
        (Value::Array(a), Value::Array(b)) => b
            .iter()
            .all(|wanted| a.iter().any(|found| contains(found, wanted))),
        (Value::String(a), Value::String(b)) => a.contains(b.as_str()),
        (a, b) => equals(a, b),
    }
}

fn join(input: &Value, separator: &Value) -> ValueResult {
    let Value::String(separator) = separator else {
        return Err(Failure::message(format!(
            "{} cannot be used as a separator",
            describe(separator)
        )));
    };
    let items = match input {
        Value::Array(items) => items,
        other => {
            return Err(Failure::message(format!(
                "Cannot iterate over {}",
                describe(other)
            )));
        }
    };
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        parts.push(match item {
            Value::Null => String::new(),
            Value::String(text) => text.clone(),
            Value::Number(_) | Value::Bool(_) => item.to_string(),
            other => {
                return Err(Failure::message(format!(
                    "Cannot join with {}",
                    type_name(other)
                )));
            }
        });
    }
    Ok(Value::String(parts.join(separator)))
}

fn to_entries(input: Value) -> ValueResult {
    match input {
        Value::Object(map) => Ok(Value::Array(
            map.into_iter()
                .map(|(key, value)| {
                    let mut entry = Map::new();
                    entry.insert("key".to_string(), Value::String(key));
                    entry.insert("value".to_string(), value);
                    Value::Object(entry)
                })
                .collect(),
        )),
        other => Err(Failure::message(format!("{} has no keys", describe(&other)))),
    }
}

fn from_entries(input: Value) -> ValueResult {
    const KEY_FIELDS: [&str; 6] = ["key", "k", "name", "Name", "K", "Key"];

    let Value::Array(entries) = input else {
        return Err(Failure::message(format!(
            "Cannot iterate over {}",
            describe(&input)
        )));
    };
    let mut object = Map::new();
    for entry in entries {
        let Value::Object(fields) = &entry else {
            return Err(Failure::message(format!(
                "Cannot index {} with \"key\"",
                type_name(&entry)
            )));
        };
        let key = KEY_FIELDS
            .iter()
            .filter_map(|name| fields.get(*name))
            .find(|key| truthy(key))
            .map_or_else(|| "null".to_string(), to_text);
        let value = fields
            .get("value")
            .or_else(|| fields.get("v"))
            .cloned()
            .unwrap_or(Value::Null);
        object.insert(key, value);
    }
    Ok(Value::Object(object))
}

fn quantify_items(all: bool, mut flags: impl Iterator<Item = bool>) -> ValueResult {
    Ok(Value::Bool(if all {
        flags.all(|flag| flag)
    } else {
        flags.any(|flag| flag)
    }))
}

/// `any(f)` / `all(f)` over the input's elements.
fn quantify<'a>(all: bool, f: &'a Expr, ctx: &Ctx<'a>, input: Value) -> ValueResult {
    let mut flags = Vec::new();
    for item in value::iterate(input)? {
        for output in eval(f, ctx, item) {
            flags.push(truthy(&output?));
        }
    }
    quantify_items(all, flags.into_iter())
}

fn map<'a>(f: &'a Expr, ctx: &Ctx<'a>, input: Value) -> ValueResult {
    let mut mapped = Vec::new();
    for item in value::iterate(input)? {
        mapped.extend(collect(eval(f, ctx, item))?);
    }
    Ok(Value::Array(mapped))
}

fn with_entries<'a>(f: &'a Expr, ctx: &Ctx<'a>, input: Value) -> ValueResult {
    let entries = to_entries(input)?;
    from_entries(map(f, ctx, entries)?)
}

fn sort_by<'a>(f: &'a Expr, ctx: &Ctx<'a>, input: Value) -> ValueResult {
    let Value::Array(items) = input else {
        return Err(Failure::message(format!(
            "{} cannot be sorted, as it is not an array",
            describe(&input)
        )));
    };
    let mut keyed = Vec::with_capacity(items.len());
    for item in items {
        let key = Value::Array(collect(eval(f, ctx, item.clone()))?);
        keyed.push((key, item));
    }
    keyed.sort_by(|(a, _), (b, _)| compare(a, b));
    Ok(Value::Array(keyed.into_iter().map(|(_, item)| item).collect()))
}

fn last(outputs: ValueIter<'_>) -> Result<Option<Value>, Failure> {
    let mut last = None;
    for output in outputs {
        last = Some(output?);
    }
    Ok(last)
}

fn count_up<'a>(ctx: Ctx<'a>, from: f64, upto: f64) -> ValueIter<'a> {
    let mut current = from;
    let mut stopped = false;
    Box::new(std::iter::from_fn(move || {
        if stopped || current >= upto {
            return None;
        }
        if let Err(failure) = ctx.check() {
            stopped = true;
            return Some(Err(failure));
        }
        let output = number(current);
        current += 1.0;
        Some(Ok(output))
    }))
}

/// `until(cond; update)`: apply `update` until `cond` holds, then emit once.
fn until<'a>(cond: &'a Expr, update: &'a Expr, ctx: Ctx<'a>, input: Value) -> ValueIter<'a> {
    Box::new(
        std::iter::once_with(move || {
            let mut state = input;
            loop {
                if let Err(failure) = ctx.check() {
                    return Some(Err(failure));
                }
                match first_value(eval(cond, &ctx, state.clone())) {
                    Err(failure) => return Some(Err(failure)),
                    Ok(None) => return None,
                    Ok(Some(condition)) if truthy(&condition) => return Some(Ok(state)),
                    Ok(Some(_)) => {}
                }
                match first_value(eval(update, &ctx, state)) {
                    Err(failure) => return Some(Err(failure)),
                    Ok(None) => return None,
                    Ok(Some(next)) => state = next,
                }
            }
        })
        .flatten(),
    )
}

/// `while(cond; update)`: emit each state while `cond` holds.
fn repeat_while<'a>(cond: &'a Expr, update: &'a Expr, ctx: Ctx<'a>, input: Value) -> ValueIter<'a> {
    let mut current = Some(input);
    let mut emitted: Option<Value> = None;
    Box::new(std::iter::from_fn(move || {
        if let Some(previous) = emitted.take() {
            match first_value(eval(update, &ctx, previous)) {
                Ok(next) => current = next,
                Err(failure) => return Some(Err(failure)),
            }
        }
        let state = current.take()?;
        if let Err(failure) = ctx.check() {
            return Some(Err(failure));
        }
        match first_value(eval(cond, &ctx, state.clone())) {
            Err(failure) => Some(Err(failure)),
            Ok(Some(condition)) if truthy(&condition) => {
                emitted = Some(state.clone());
                Some(Ok(state))
            }
            Ok(_) => None,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_no_duplicates() {
        let mut seen = std::collections::HashSet::new();
        for entry in BUILTINS {
            assert!(seen.insert(*entry), "duplicate builtin {entry:?}");
        }
    }

    #[test]
    fn arities_lists_every_form() {
        let mut found: Vec<usize> = arities("range").collect();
        found.sort_unstable();
        assert_eq!(found, vec![1, 2]);
        assert!(is_builtin("limit", 2));
        assert!(!is_builtin("limit", 1));
    }

    #[test]
    fn join_skips_nulls() {
        let input = serde_json::json!(["a", null, 1, true]);
        let joined = join(&input, &Value::String("-".into())).unwrap();
        assert_eq!(joined, Value::String("a--1-true".into()));
    }

    #[test]
    fn from_entries_accepts_alternate_key_names() {
        let input = serde_json::json!([{"name": "a", "v": 1}, {"k": "b", "value": 2}]);
        assert_eq!(from_entries(input).unwrap(), serde_json::json!({"a": 1, "b": 2}));
    }
}
