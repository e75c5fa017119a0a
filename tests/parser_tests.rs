use jqexec::ast::{BinaryOp, Expr, Filter, Literal};
use jqexec::lexer::tokenize;
use jqexec::parser::parse;

fn parse_source(source: &str) -> Filter {
    let tokens = tokenize(source).expect("tokenization should succeed");
    parse(&tokens).expect("parsing should succeed")
}

fn field(target: Expr, name: &str) -> Expr {
    Expr::Field {
        target: Box::new(target),
        name: name.to_string(),
    }
}

#[test]
fn parses_nested_field_access() {
    let filter = parse_source(".a.b");
    assert_eq!(filter.body, field(field(Expr::Identity, "a"), "b"));
}

#[test]
fn pipe_binds_looser_than_comma() {
    let filter = parse_source(".a, .b | .c");
    match filter.body {
        Expr::Pipe(left, right) => {
            assert!(matches!(*left, Expr::Comma(_, _)));
            assert_eq!(*right, field(Expr::Identity, "c"));
        }
        other => panic!("expected pipe, got {other:?}"),
    }
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let filter = parse_source("1 + 2 * 3");
    match filter.body {
        Expr::Binary { op, left, right } => {
            assert_eq!(op, BinaryOp::Add);
            assert_eq!(*left, Expr::Literal(Literal::Number(1.0)));
            assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }));
        }
        other => panic!("expected binary expression, got {other:?}"),
    }
}

#[test]
fn negative_literals_fold() {
    let filter = parse_source("-3");
    assert_eq!(filter.body, Expr::Literal(Literal::Number(-3.0)));
}

#[test]
fn elif_chains_nest_into_else_branches() {
    let filter = parse_source("if . then 1 elif .a then 2 else 3 end");
    let Expr::If { else_branch, .. } = filter.body else {
        panic!("expected if expression");
    };
    let nested = else_branch.expect("elif becomes an else branch");
    assert!(matches!(*nested, Expr::If { else_branch: Some(_), .. }));
}

#[test]
fn optional_suffix_becomes_try_without_handler() {
    let filter = parse_source(".a?");
    assert!(matches!(filter.body, Expr::Try { handler: None, .. }));
}

#[test]
fn parses_definitions_bindings_and_reductions() {
    assert!(matches!(
        parse_source("def inc: . + 1; inc").body,
        Expr::Def { .. }
    ));
    assert!(matches!(
        parse_source(".[] as $x | $x").body,
        Expr::Bind { .. }
    ));
    assert!(matches!(
        parse_source("reduce .[] as $x (0; . + $x)").body,
        Expr::Reduce { .. }
    ));
}

#[test]
fn object_construction_allows_keyword_keys_and_shorthand() {
    let filter = parse_source("{if: 1, a, \"b c\": .d, (.e): 2}");
    let Expr::Object(entries) = filter.body else {
        panic!("expected object");
    };
    assert_eq!(entries.len(), 4);
    assert!(entries[1].value.is_none());
}

#[test]
fn unclosed_bracket_is_an_error() {
    let tokens = tokenize(".[0").expect("tokenization should succeed");
    let errors = parse(&tokens).expect_err("missing closing bracket");
    assert!(!errors.is_empty());
}

#[test]
fn trailing_pipe_is_an_error() {
    let tokens = tokenize(".a |").expect("tokenization should succeed");
    assert!(parse(&tokens).is_err());
}
