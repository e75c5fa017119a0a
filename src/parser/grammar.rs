use std::ops::Range;

use chumsky::Stream;
use chumsky::error::SimpleReason;
use chumsky::prelude::*;

use crate::ast::nodes::{BinaryOp, Expr, Filter, Literal, ObjectEntry, ObjectKey};
use crate::lexer::token::{Span, Token, TokenKind};
use jqexec_utils::Diagnostic;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserError {
    pub message: String,
    pub span: Span,
    pub expected: Vec<String>,
}

impl ParserError {
    pub fn to_diagnostic(&self, source_id: &str) -> Diagnostic {
        let diagnostic = Diagnostic::error(source_id, self.span, self.message.clone());
        if self.expected.is_empty() {
            diagnostic
        } else {
            diagnostic.with_help(format!("expected {}", self.expected.join(", ")))
        }
    }
}

impl From<Simple<TokenKind>> for ParserError {
    fn from(value: Simple<TokenKind>) -> Self {
        let span = Span::from(value.span());
        let message = match value.reason() {
            SimpleReason::Custom(message) => message.clone(),
            SimpleReason::Unclosed { delimiter, .. } => format!("unclosed {delimiter}"),
            SimpleReason::Unexpected => match value.found() {
                Some(found) => format!("unexpected {found}"),
                None => "unexpected end of filter".to_string(),
            },
        };
        let mut expected: Vec<String> = value
            .expected()
            .filter_map(|token| token.as_ref().map(ToString::to_string))
            .collect();
        expected.sort();
        expected.dedup();
        Self {
            message,
            span,
            expected,
        }
    }
}

pub fn parse(tokens: &[Token]) -> Result<Filter, Vec<ParserError>> {
    let eof_span = tokens.last().map_or_else(|| Span::new(0, 0), |token| token.span);

    let end = eof_span.end();
    let stream = Stream::from_iter(
        end..end + 1,
        tokens
            .iter()
            .cloned()
            .map(|token| (token.kind, Range::from(token.span))),
    );

    filter_parser()
        .parse(stream)
        .map_err(|errors| errors.into_iter().map(ParserError::from).collect())
}

#[derive(Clone)]
enum Suffix {
    Field(String),
    Index(Expr),
    Slice(Option<Expr>, Option<Expr>),
    Iterate,
    Try,
}

fn apply_suffix(target: Expr, suffix: Suffix) -> Expr {
    let target = Box::new(target);
    match suffix {
        Suffix::Field(name) => Expr::Field { target, name },
        Suffix::Index(index) => Expr::Index {
            target,
            index: Box::new(index),
        },
        Suffix::Slice(from, to) => Expr::Slice {
            target,
            from: from.map(Box::new),
            to: to.map(Box::new),
        },
        Suffix::Iterate => Expr::Iterate(target),
        Suffix::Try => Expr::Try {
            body: target,
            handler: None,
        },
    }
}

fn identifier_parser() -> impl Parser<TokenKind, String, Error = Simple<TokenKind>> + Clone {
    select! { TokenKind::Identifier(name) => name }
}

fn variable_parser() -> impl Parser<TokenKind, String, Error = Simple<TokenKind>> + Clone {
    select! { TokenKind::Variable(name) => name }
}

fn string_parser() -> impl Parser<TokenKind, String, Error = Simple<TokenKind>> + Clone {
    select! { TokenKind::StringLiteral(value) => value }
}

/// Keywords may still name object keys: `{if: 1}`.
fn keyword_key_parser() -> impl Parser<TokenKind, String, Error = Simple<TokenKind>> + Clone {
    select! {
        TokenKind::If => "if".to_string(),
        TokenKind::Then => "then".to_string(),
        TokenKind::Elif => "elif".to_string(),
        TokenKind::Else => "else".to_string(),
        TokenKind::End => "end".to_string(),
        TokenKind::As => "as".to_string(),
        TokenKind::Def => "def".to_string(),
        TokenKind::Reduce => "reduce".to_string(),
        TokenKind::Try => "try".to_string(),
        TokenKind::Catch => "catch".to_string(),
        TokenKind::And => "and".to_string(),
        TokenKind::Or => "or".to_string(),
        TokenKind::True => "true".to_string(),
        TokenKind::False => "false".to_string(),
        TokenKind::Null => "null".to_string(),
    }
}

fn literal_parser() -> impl Parser<TokenKind, Expr, Error = Simple<TokenKind>> + Clone {
    select! {
        TokenKind::Null => Expr::Literal(Literal::Null),
        TokenKind::True => Expr::Literal(Literal::Bool(true)),
        TokenKind::False => Expr::Literal(Literal::Bool(false)),
        TokenKind::Number(text) => Expr::Literal(Literal::Number(text.parse().unwrap_or_default())),
        TokenKind::StringLiteral(value) => Expr::Literal(Literal::String(value)),
    }
}

fn filter_parser() -> impl Parser<TokenKind, Filter, Error = Simple<TokenKind>> {
    let mut pipe: Recursive<'_, TokenKind, Expr, Simple<TokenKind>> = Recursive::declare();
    let mut alternative: Recursive<'_, TokenKind, Expr, Simple<TokenKind>> = Recursive::declare();
    let mut postfix: Recursive<'_, TokenKind, Expr, Simple<TokenKind>> = Recursive::declare();

    let call_args = pipe
        .clone()
        .separated_by(just(TokenKind::Semicolon))
        .at_least(1)
        .delimited_by(just(TokenKind::LParen), just(TokenKind::RParen));

    let call = identifier_parser()
        .then(call_args.or_not())
        .map_with_span(|(name, args), span: Range<usize>| Expr::Call {
            name,
            args: args.unwrap_or_default(),
            span: span.into(),
        });

    let variable = variable_parser().map_with_span(|name, span: Range<usize>| Expr::Variable {
        name,
        span: span.into(),
    });

    let if_expr = just(TokenKind::If)
        .ignore_then(pipe.clone())
        .then_ignore(just(TokenKind::Then))
        .then(pipe.clone())
        .then(
            just(TokenKind::Elif)
                .ignore_then(pipe.clone())
                .then_ignore(just(TokenKind::Then))
                .then(pipe.clone())
                .repeated(),
        )
        .then(just(TokenKind::Else).ignore_then(pipe.clone()).or_not())
        .then_ignore(just(TokenKind::End))
        .map(|(((cond, then_branch), elifs), else_branch)| {
            let else_branch = elifs
                .into_iter()
                .rev()
                .fold(else_branch, |otherwise, (cond, then_branch)| {
                    Some(Expr::If {
                        cond: Box::new(cond),
                        then_branch: Box::new(then_branch),
                        else_branch: otherwise.map(Box::new),
                    })
                });
            Expr::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: else_branch.map(Box::new),
            }
        });

    let try_expr = just(TokenKind::Try)
        .ignore_then(postfix.clone())
        .then(just(TokenKind::Catch).ignore_then(postfix.clone()).or_not())
        .map(|(body, handler)| Expr::Try {
            body: Box::new(body),
            handler: handler.map(Box::new),
        });

    let reduce_expr = just(TokenKind::Reduce)
        .ignore_then(postfix.clone())
        .then_ignore(just(TokenKind::As))
        .then(variable_parser())
        .then_ignore(just(TokenKind::LParen))
        .then(pipe.clone())
        .then_ignore(just(TokenKind::Semicolon))
        .then(pipe.clone())
        .then_ignore(just(TokenKind::RParen))
        .map(|(((source, var), init), update)| Expr::Reduce {
            source: Box::new(source),
            var,
            init: Box::new(init),
            update: Box::new(update),
        });

    let array = pipe
        .clone()
        .or_not()
        .delimited_by(just(TokenKind::LBracket), just(TokenKind::RBracket))
        .map(|body| Expr::Array(body.map(Box::new)));

    let object_value = alternative
        .clone()
        .then(just(TokenKind::Pipe).ignore_then(alternative.clone()).repeated())
        .foldl(|left, right| Expr::Pipe(Box::new(left), Box::new(right)));

    let object_key = choice((
        variable_parser().map_with_span(|name, span: Range<usize>| ObjectKey::Variable {
            name,
            span: span.into(),
        }),
        identifier_parser().map(ObjectKey::Static),
        keyword_key_parser().map(ObjectKey::Static),
        string_parser().map(ObjectKey::Static),
        pipe.clone()
            .delimited_by(just(TokenKind::LParen), just(TokenKind::RParen))
            .map(ObjectKey::Computed),
    ));

    let object_entry = object_key
        .then(just(TokenKind::Colon).ignore_then(object_value).or_not())
        .try_map(|(key, value), span| {
            if matches!(key, ObjectKey::Computed(_)) && value.is_none() {
                Err(Simple::custom(span, "computed object keys need a value"))
            } else {
                Ok(ObjectEntry { key, value })
            }
        });

    let object = object_entry
        .separated_by(just(TokenKind::Comma))
        .allow_trailing()
        .delimited_by(just(TokenKind::LBrace), just(TokenKind::RBrace))
        .map(Expr::Object);

    let primary = choice((
        just(TokenKind::Dot)
            .ignore_then(string_parser())
            .map(|name| Expr::field(Expr::Identity, name)),
        select! { TokenKind::Field(name) => Expr::field(Expr::Identity, name) },
        just(TokenKind::DoubleDot).to(Expr::RecurseAll),
        just(TokenKind::Dot).to(Expr::Identity),
        literal_parser(),
        variable,
        if_expr,
        try_expr,
        reduce_expr,
        call,
        pipe.clone()
            .delimited_by(just(TokenKind::LParen), just(TokenKind::RParen)),
        array,
        object,
    ))
    .boxed();

    let bracket = choice((
        just(TokenKind::LBracket)
            .then(just(TokenKind::RBracket))
            .to(Suffix::Iterate),
        pipe.clone()
            .or_not()
            .then_ignore(just(TokenKind::Colon))
            .then(pipe.clone().or_not())
            .delimited_by(just(TokenKind::LBracket), just(TokenKind::RBracket))
            .map(|(from, to)| Suffix::Slice(from, to)),
        pipe.clone()
            .delimited_by(just(TokenKind::LBracket), just(TokenKind::RBracket))
            .map(Suffix::Index),
    ))
    .boxed();

    let suffix = choice((
        select! { TokenKind::Field(name) => Suffix::Field(name) },
        just(TokenKind::Dot)
            .ignore_then(string_parser())
            .map(Suffix::Field),
        bracket.clone(),
        // `.a.[0]` is the same as `.a[0]`
        just(TokenKind::Dot).ignore_then(bracket),
        just(TokenKind::Question).to(Suffix::Try),
    ));

    postfix.define(primary.then(suffix.repeated()).foldl(apply_suffix));

    let unary = just(TokenKind::Minus)
        .repeated()
        .then(postfix.clone())
        .foldr(|_, expr| match expr {
            Expr::Literal(Literal::Number(value)) => Expr::Literal(Literal::Number(-value)),
            other => Expr::Neg(Box::new(other)),
        })
        .boxed();

    let product = unary
        .clone()
        .then(
            choice((
                just(TokenKind::Star).to(BinaryOp::Mul),
                just(TokenKind::Slash).to(BinaryOp::Div),
                just(TokenKind::Percent).to(BinaryOp::Mod),
            ))
            .then(unary)
            .repeated(),
        )
        .foldl(|left, (op, right)| Expr::binary(op, left, right));

    let sum = product
        .clone()
        .then(
            choice((
                just(TokenKind::Plus).to(BinaryOp::Add),
                just(TokenKind::Minus).to(BinaryOp::Sub),
            ))
            .then(product)
            .repeated(),
        )
        .foldl(|left, (op, right)| Expr::binary(op, left, right))
        .boxed();

    let comparison = sum
        .clone()
        .then(
            choice((
                just(TokenKind::EqEq).to(BinaryOp::Eq),
                just(TokenKind::Neq).to(BinaryOp::Ne),
                just(TokenKind::LtEq).to(BinaryOp::LtEq),
                just(TokenKind::GtEq).to(BinaryOp::GtEq),
                just(TokenKind::Lt).to(BinaryOp::Lt),
                just(TokenKind::Gt).to(BinaryOp::Gt),
            ))
            .then(sum)
            .or_not(),
        )
        .map(|(left, rest)| match rest {
            Some((op, right)) => Expr::binary(op, left, right),
            None => left,
        });

    let conjunction = comparison
        .clone()
        .then(just(TokenKind::And).to(BinaryOp::And).then(comparison).repeated())
        .foldl(|left, (op, right)| Expr::binary(op, left, right));

    let disjunction = conjunction
        .clone()
        .then(just(TokenKind::Or).to(BinaryOp::Or).then(conjunction).repeated())
        .foldl(|left, (op, right)| Expr::binary(op, left, right))
        .boxed();

    let alternative_tail = alternative.clone();
    alternative.define(
        disjunction
            .then(just(TokenKind::Alternative).ignore_then(alternative_tail).or_not())
            .map(|(left, right)| match right {
                Some(right) => Expr::Alternative(Box::new(left), Box::new(right)),
                None => left,
            }),
    );

    let comma = alternative
        .clone()
        .then(just(TokenKind::Comma).ignore_then(alternative.clone()).repeated())
        .foldl(|left, right| Expr::Comma(Box::new(left), Box::new(right)));

    let def_expr = just(TokenKind::Def)
        .ignore_then(identifier_parser())
        .then_ignore(just(TokenKind::Colon))
        .then(pipe.clone())
        .then_ignore(just(TokenKind::Semicolon))
        .then(pipe.clone())
        .map(|((name, body), rest)| Expr::Def {
            name,
            body: Box::new(body),
            rest: Box::new(rest),
        });

    let bind_expr = postfix
        .clone()
        .then_ignore(just(TokenKind::As))
        .then(variable_parser())
        .then_ignore(just(TokenKind::Pipe))
        .then(pipe.clone())
        .map(|((source, var), body)| Expr::Bind {
            source: Box::new(source),
            var,
            body: Box::new(body),
        });

    let pipe_tail = pipe.clone();
    let piped = comma
        .then(just(TokenKind::Pipe).ignore_then(pipe_tail).or_not())
        .map(|(left, right)| match right {
            Some(right) => Expr::Pipe(Box::new(left), Box::new(right)),
            None => left,
        });

    pipe.define(choice((def_expr, bind_expr, piped)));

    pipe.then_ignore(just(TokenKind::Eof)).map(Filter::new)
}
