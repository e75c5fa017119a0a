//! `{{ filter }}` templates over JSON documents.
//!
//! A string made of exactly one template evaluates to the filter's typed
//! result; anything else is rendered as text with each template replaced by
//! its result. Objects and arrays are rendered recursively, keys included.

use std::future::Future;
use std::ops::Range;
use std::pin::Pin;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::engine::FilterEngine;
use crate::executor::{ExecOptions, Executor};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const SPREAD_KEYWORD: &str = "spreadValue";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("found double braces at index {at} inside the template opened at index {outer}")]
    NestedOpening { at: usize, outer: usize },
    #[error("found closing double braces at index {at} without opening double braces")]
    UnmatchedClosing { at: usize },
    #[error("found opening double braces at index {at} without closing double braces")]
    UnterminatedOpening { at: usize },
    #[error("value under `{key}` should render to an object, got {rendered}")]
    SpreadNotObject { key: String, rendered: Value },
    #[error("object key `{key}` should render to a string or null, got {rendered}")]
    InvalidKey { key: String, rendered: Value },
}

/// Byte ranges of the filter text inside each `{{ }}` pair, in order.
///
/// Braces inside quoted strings and escaped characters within a template do
/// not count. A third brace in a row belongs to the filter.
pub fn find_template_ranges(template: &str) -> Result<Vec<Range<usize>>, TemplateError> {
    let bytes = template.as_bytes();
    let mut ranges = Vec::new();
    let mut quote: Option<u8> = None;
    let mut start: Option<usize> = None;

    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if start.is_some() && byte == b'\\' {
            i += 2;
            continue;
        }

        let prev = i.checked_sub(1).map(|p| bytes[p]);
        if start.is_some() && (byte == b'"' || byte == b'\'') {
            match quote {
                None => quote = Some(byte),
                Some(open) if open == byte => quote = None,
                Some(_) => {}
            }
        } else if quote.is_none() && byte == b'{' && prev == Some(b'{') {
            if let Some(outer) = start {
                return Err(TemplateError::NestedOpening {
                    at: i - 1,
                    outer: outer - OPEN.len(),
                });
            }
            start = Some(i + 1);
            if bytes.get(i + 1) == Some(&b'{') {
                i += 1;
            }
        } else if quote.is_none() && byte == b'}' && prev == Some(b'}') {
            let Some(opened) = start.take() else {
                return Err(TemplateError::UnmatchedClosing { at: i - 1 });
            };
            ranges.push(opened..i - 1);
            if bytes.get(i + 1) == Some(&b'}') {
                i += 1;
            }
        }
        i += 1;
    }

    match start {
        Some(opened) => Err(TemplateError::UnterminatedOpening {
            at: opened - OPEN.len(),
        }),
        None => Ok(ranges),
    }
}

fn is_whole_template(template: &str, ranges: &[Range<usize>]) -> bool {
    let trimmed = template.trim();
    ranges.len() == 1 && trimmed.starts_with(OPEN) && trimmed.ends_with(CLOSE)
}

fn push_rendered(out: &mut String, value: Value) {
    match value {
        Value::String(text) => out.push_str(&text),
        other => out.push_str(&other.to_string()),
    }
}

/// Text between templates: before the first, between each pair, after the last.
fn literal_after<'t>(template: &'t str, ranges: &[Range<usize>], index: usize) -> &'t str {
    let from = ranges[index].end + CLOSE.len();
    let to = ranges
        .get(index + 1)
        .map_or(template.len(), |next| next.start - OPEN.len());
    &template[from..to]
}

fn is_spread_key(key: &str) -> bool {
    key.trim()
        .strip_prefix(OPEN)
        .and_then(|rest| rest.strip_suffix(CLOSE))
        .map(str::trim)
        .and_then(|call| call.strip_prefix(SPREAD_KEYWORD))
        .and_then(|rest| rest.trim_start().strip_prefix('('))
        .is_some_and(|rest| rest.trim() == ")")
}

fn check_spread(key: &str, rendered: Value) -> Result<Map<String, Value>, TemplateError> {
    match rendered {
        Value::Object(map) => Ok(map),
        other => Err(TemplateError::SpreadNotObject {
            key: key.to_string(),
            rendered: other,
        }),
    }
}

fn check_key(key: &str, rendered: Value) -> Result<Option<String>, TemplateError> {
    match rendered {
        Value::Null => Ok(None),
        Value::String(text) if text.is_empty() => Ok(None),
        Value::String(text) => Ok(Some(text)),
        other => Err(TemplateError::InvalidKey {
            key: key.to_string(),
            rendered: other,
        }),
    }
}

/// Render one string. Filter failures render as `null`.
pub fn render<E: FilterEngine>(
    executor: &Executor<E>,
    input: &Value,
    template: &str,
    options: &ExecOptions,
) -> Result<Value, TemplateError> {
    let ranges = find_template_ranges(template)?;
    let Some(first) = ranges.first() else {
        return Ok(Value::String(template.to_string()));
    };
    if is_whole_template(template, &ranges) {
        return Ok(executor.exec(input, &template[first.clone()], options));
    }

    let mut out = template[..first.start - OPEN.len()].to_string();
    for (index, range) in ranges.iter().enumerate() {
        push_rendered(&mut out, executor.exec(input, &template[range.clone()], options));
        out.push_str(literal_after(template, &ranges, index));
    }
    Ok(Value::String(out))
}

pub fn render_recursively<E: FilterEngine>(
    executor: &Executor<E>,
    input: &Value,
    template: &Value,
    options: &ExecOptions,
) -> Result<Value, TemplateError> {
    match template {
        Value::String(text) => render(executor, input, text, options),
        Value::Array(items) => items
            .iter()
            .map(|item| render_recursively(executor, input, item, options))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(entries) => {
            let mut rendered = Map::new();
            for (key, value) in entries {
                if is_spread_key(key) {
                    let spread = render_recursively(executor, input, value, options)?;
                    rendered.extend(check_spread(key, spread)?);
                    continue;
                }
                let name = render(executor, input, key, options)?;
                if let Some(name) = check_key(key, name)? {
                    rendered.insert(name, render_recursively(executor, input, value, options)?);
                }
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

pub async fn render_async<E: FilterEngine>(
    executor: &Executor<E>,
    input: &Value,
    template: &str,
    options: &ExecOptions,
) -> Result<Value, TemplateError> {
    let ranges = find_template_ranges(template)?;
    let Some(first) = ranges.first() else {
        return Ok(Value::String(template.to_string()));
    };
    if is_whole_template(template, &ranges) {
        return Ok(executor.exec_async(input, &template[first.clone()], options).await);
    }

    let mut out = template[..first.start - OPEN.len()].to_string();
    for (index, range) in ranges.iter().enumerate() {
        let value = executor.exec_async(input, &template[range.clone()], options).await;
        push_rendered(&mut out, value);
        out.push_str(literal_after(template, &ranges, index));
    }
    Ok(Value::String(out))
}

type RenderFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, TemplateError>> + Send + 'a>>;

/// [`render_recursively`] with every filter evaluated on the worker pool.
pub fn render_recursively_async<'a, E: FilterEngine>(
    executor: &'a Executor<E>,
    input: &'a Value,
    template: &'a Value,
    options: &'a ExecOptions,
) -> RenderFuture<'a> {
    Box::pin(async move {
        match template {
            Value::String(text) => render_async(executor, input, text, options).await,
            Value::Array(items) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items {
                    rendered.push(render_recursively_async(executor, input, item, options).await?);
                }
                Ok(Value::Array(rendered))
            }
            Value::Object(entries) => {
                let mut rendered = Map::new();
                for (key, value) in entries {
                    if is_spread_key(key) {
                        let spread = render_recursively_async(executor, input, value, options).await?;
                        rendered.extend(check_spread(key, spread)?);
                        continue;
                    }
                    let name = render_async(executor, input, key, options).await?;
                    if let Some(name) = check_key(key, name)? {
                        let value = render_recursively_async(executor, input, value, options).await?;
                        rendered.insert(name, value);
                    }
                }
                Ok(Value::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_every_template() {
        let ranges = find_template_ranges("a {{ .x }} b {{.y}}").unwrap();
        assert_eq!(ranges, vec![4..8, 15..17]);
    }

    #[test]
    fn braces_in_quotes_are_not_templates() {
        let template = r#"{{ "}}" }}"#;
        let ranges = find_template_ranges(template).unwrap();
        assert_eq!(&template[ranges[0].clone()], r#" "}}" "#);
    }

    #[test]
    fn triple_braces_keep_the_object_literal() {
        let template = "{{{a: 1} }}";
        let ranges = find_template_ranges(template).unwrap();
        assert_eq!(&template[ranges[0].clone()], "{a: 1} ");
    }

    #[test]
    fn malformed_templates_are_rejected() {
        assert_eq!(
            find_template_ranges("{{ {{ }}"),
            Err(TemplateError::NestedOpening { at: 3, outer: 0 })
        );
        assert_eq!(
            find_template_ranges("x }}"),
            Err(TemplateError::UnmatchedClosing { at: 2 })
        );
        assert_eq!(
            find_template_ranges("ab {{ .a"),
            Err(TemplateError::UnterminatedOpening { at: 3 })
        );
    }

    #[test]
    fn spread_keys_allow_whitespace() {
        assert!(is_spread_key("{{spreadValue()}}"));
        assert!(is_spread_key("  {{ spreadValue( ) }} "));
        assert!(!is_spread_key("{{ spreadValues() }}"));
        assert!(!is_spread_key("{{ spreadValue }}"));
    }
}
