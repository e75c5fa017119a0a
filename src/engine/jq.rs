use std::sync::Arc;
use std::time::Instant;

use jqexec_utils::{Diagnostic, render_diagnostics};
use serde_json::{Map, Value};
use tracing::debug;

use super::{CompileError, Deadline, FilterEngine, FilterKey, Outputs, resolve};
use crate::ast::{Expr, Filter};
use crate::lexer::{Token, TokenKind, tokenize};
use crate::parser::parse;
use crate::runtime::eval;

const SOURCE_ID: &str = "<filter>";

/// The built-in jq-style filter language.
#[derive(Debug, Default, Clone, Copy)]
pub struct JqEngine;

impl JqEngine {
    pub fn new() -> Self {
        Self
    }
}

/// A filter that has been lexed, parsed and resolved.
#[derive(Debug)]
pub struct CompiledFilter {
    source: Arc<str>,
    filter: Filter,
    env: Value,
}

impl CompiledFilter {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }
}

fn compile_error(diagnostics: &[Diagnostic], source: &str) -> CompileError {
    let message = diagnostics
        .first()
        .map_or_else(|| "invalid filter".to_string(), |d| d.message().to_string());
    CompileError {
        message,
        diagnostic: render_diagnostics(diagnostics, source),
    }
}

fn process_env() -> Value {
    Value::Object(
        std::env::vars()
            .map(|(name, value)| (name, Value::String(value)))
            .collect::<Map<_, _>>(),
    )
}

fn only_eof(tokens: &[Token]) -> bool {
    matches!(tokens, [token] if token.kind == TokenKind::Eof)
}

impl FilterEngine for JqEngine {
    type Program = CompiledFilter;

    fn compile(&self, key: &FilterKey) -> Result<CompiledFilter, CompileError> {
        let started = Instant::now();
        let source = key.source();

        let tokens = tokenize(source).map_err(|errors| {
            let diagnostics: Vec<_> = errors.iter().map(|e| e.to_diagnostic(SOURCE_ID)).collect();
            compile_error(&diagnostics, source)
        })?;

        // An empty filter behaves like `.`
        let filter = if only_eof(&tokens) {
            Filter::new(Expr::Identity)
        } else {
            parse(&tokens).map_err(|errors| {
                let diagnostics: Vec<_> =
                    errors.iter().map(|e| e.to_diagnostic(SOURCE_ID)).collect();
                compile_error(&diagnostics, source)
            })?
        };

        resolve::check(&filter).map_err(|errors| {
            let diagnostics: Vec<_> = errors.iter().map(|e| e.to_diagnostic(SOURCE_ID)).collect();
            compile_error(&diagnostics, source)
        })?;

        let env = if key.env_enabled() {
            process_env()
        } else {
            Value::Object(Map::new())
        };

        debug!(filter = %key, elapsed = ?started.elapsed(), "compiled filter");
        Ok(CompiledFilter {
            source: Arc::from(source),
            filter,
            env,
        })
    }

    fn run<'p>(
        &self,
        program: &'p mut CompiledFilter,
        input: Value,
        deadline: Option<Deadline>,
    ) -> Outputs<'p> {
        let program: &'p CompiledFilter = program;
        eval::run(&program.filter, &program.env, input, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outputs(filter: &str, input: Value) -> Vec<Value> {
        let engine = JqEngine::new();
        let mut program = engine.compile(&FilterKey::new(filter)).unwrap();
        engine
            .run(&mut program, input, None)
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn empty_filter_is_identity() {
        assert_eq!(outputs("  ", json!({"a": 1})), vec![json!({"a": 1})]);
    }

    #[test]
    fn env_is_empty_unless_enabled() {
        assert_eq!(outputs("$ENV", Value::Null), vec![json!({})]);
        let engine = JqEngine::new();
        let key = FilterKey::new("env | type").with_env(true);
        let mut program = engine.compile(&key).unwrap();
        let first = engine.run(&mut program, Value::Null, None).next();
        assert_eq!(first, Some(Ok(json!("object"))));
    }

    #[test]
    fn compile_error_renders_diagnostic() {
        let error = JqEngine::new().compile(&FilterKey::new(".a | lenght")).unwrap_err();
        assert_eq!(error.message, "lenght/0 is not defined");
        assert!(error.diagnostic.contains("did you mean `length`?"));
    }
}
