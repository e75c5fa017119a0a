//! Name resolution: every call must reach an earlier `def` or a builtin of the
//! same arity, and every `$variable` must be bound by an enclosing `as`.

use jqexec_span::Span;
use jqexec_utils::{Diagnostic, find_best_match};

use crate::ast::{Expr, Filter, ObjectKey};
use crate::runtime::eval::builtins::{self, ENV_VARIABLE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolveError {
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl ResolveError {
    pub fn to_diagnostic(&self, source_id: &str) -> Diagnostic {
        let diagnostic =
            Diagnostic::error(source_id, self.span, self.message.clone()).with_label("not defined");
        match &self.help {
            Some(help) => diagnostic.with_help(help.clone()),
            None => diagnostic,
        }
    }
}

#[derive(Default)]
struct Scope<'a> {
    variables: Vec<&'a str>,
    definitions: Vec<&'a str>,
    errors: Vec<ResolveError>,
}

pub(crate) fn check(filter: &Filter) -> Result<(), Vec<ResolveError>> {
    let mut scope = Scope::default();
    scope.visit(&filter.body);
    if scope.errors.is_empty() {
        Ok(())
    } else {
        Err(scope.errors)
    }
}

impl<'a> Scope<'a> {
    fn visit(&mut self, expr: &'a Expr) {
        match expr {
            Expr::Identity | Expr::RecurseAll | Expr::Literal(_) => {}
            Expr::Field { target, .. } | Expr::Iterate(target) | Expr::Neg(target) => {
                self.visit(target);
            }
            Expr::Index { target, index } => {
                self.visit(target);
                self.visit(index);
            }
            Expr::Slice { target, from, to } => {
                self.visit(target);
                for bound in [from, to].into_iter().flatten() {
                    self.visit(bound);
                }
            }
            Expr::Array(body) => {
                if let Some(body) = body {
                    self.visit(body);
                }
            }
            Expr::Object(entries) => {
                for entry in entries {
                    match &entry.key {
                        ObjectKey::Static(_) => {}
                        ObjectKey::Variable { name, span } => self.variable(name, *span),
                        ObjectKey::Computed(key) => self.visit(key),
                    }
                    if let Some(value) = &entry.value {
                        self.visit(value);
                    }
                }
            }
            Expr::Binary { left, right, .. }
            | Expr::Alternative(left, right)
            | Expr::Pipe(left, right)
            | Expr::Comma(left, right) => {
                self.visit(left);
                self.visit(right);
            }
            Expr::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.visit(cond);
                self.visit(then_branch);
                if let Some(else_branch) = else_branch {
                    self.visit(else_branch);
                }
            }
            Expr::Try { body, handler } => {
                self.visit(body);
                if let Some(handler) = handler {
                    self.visit(handler);
                }
            }
            Expr::Reduce {
                source,
                var,
                init,
                update,
            } => {
                self.visit(source);
                self.visit(init);
                self.variables.push(var);
                self.visit(update);
                self.variables.pop();
            }
            Expr::Bind { source, var, body } => {
                self.visit(source);
                self.variables.push(var);
                self.visit(body);
                self.variables.pop();
            }
            Expr::Def { name, body, rest } => {
                // The name is only visible after the definition, so bodies cannot recurse.
                self.visit(body);
                self.definitions.push(name);
                self.visit(rest);
                self.definitions.pop();
            }
            Expr::Variable { name, span } => self.variable(name, *span),
            Expr::Call { name, args, span } => {
                for arg in args {
                    self.visit(arg);
                }
                self.call(name, args.len(), *span);
            }
        }
    }

    fn variable(&mut self, name: &str, span: Span) {
        if name == ENV_VARIABLE || self.variables.iter().any(|bound| *bound == name) {
            return;
        }
        let candidates = self
            .variables
            .iter()
            .copied()
            .chain(std::iter::once(ENV_VARIABLE));
        let help = find_best_match(name, candidates).map(|found| format!("did you mean `${found}`?"));
        self.errors.push(ResolveError {
            message: format!("${name} is not defined"),
            span,
            help,
        });
    }

    fn call(&mut self, name: &str, arity: usize, span: Span) {
        let user_defined = arity == 0 && self.definitions.iter().any(|def| *def == name);
        if user_defined || builtins::is_builtin(name, arity) {
            return;
        }

        let mut arities: Vec<usize> = builtins::arities(name).collect();
        if self.definitions.iter().any(|def| *def == name) {
            arities.push(0);
        }
        let help = if arities.is_empty() {
            let mut candidates: Vec<&str> = self.definitions.clone();
            for builtin in builtins::names() {
                candidates.push(builtin);
            }
            find_best_match(name, candidates).map(|found| format!("did you mean `{found}`?"))
        } else {
            arities.sort_unstable();
            arities.dedup();
            let listed: Vec<String> = arities.iter().map(|n| format!("{name}/{n}")).collect();
            Some(format!("available as {}", listed.join(", ")))
        };

        self.errors.push(ResolveError {
            message: format!("{name}/{arity} is not defined"),
            span,
            help,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::parse;

    fn resolve_source(source: &str) -> Result<(), Vec<ResolveError>> {
        let tokens = tokenize(source).unwrap();
        let filter = parse(&tokens).unwrap();
        check(&filter)
    }

    #[test]
    fn bound_variables_resolve() {
        assert!(resolve_source(".[] as $x | $x + 1").is_ok());
        assert!(resolve_source("reduce .[] as $x (0; . + $x)").is_ok());
        assert!(resolve_source("$ENV.HOME").is_ok());
    }

    #[test]
    fn variable_scope_ends_with_body() {
        let errors = resolve_source("(1 as $x | $x), $x").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "$x is not defined");
    }

    #[test]
    fn misspelled_builtin_gets_suggestion() {
        let errors = resolve_source("lenght").unwrap_err();
        assert_eq!(errors[0].message, "lenght/0 is not defined");
        assert_eq!(errors[0].help.as_deref(), Some("did you mean `length`?"));
    }

    #[test]
    fn wrong_arity_lists_available_forms() {
        let errors = resolve_source("map").unwrap_err();
        assert_eq!(errors[0].help.as_deref(), Some("available as map/1"));
    }

    #[test]
    fn definitions_cannot_recurse() {
        assert!(resolve_source("def f: f; 1").is_err());
        assert!(resolve_source("def f: 1; def g: f + 1; g").is_ok());
    }
}
