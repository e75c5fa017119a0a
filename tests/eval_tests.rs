use anyhow::Result;
use jqexec::{ExecError, Executor, ExecutorConfig};
use serde_json::{Value, json};

fn executor() -> Executor {
    Executor::new(ExecutorConfig {
        workers: 1,
        ..ExecutorConfig::default()
    })
    .expect("failed to build executor")
}

fn first(filter: &str, input: &Value) -> Result<Option<Value>> {
    Ok(executor().evaluate_sync(&input.to_string(), filter)?.value)
}

fn value(filter: &str, input: Value) -> Value {
    first(filter, &input)
        .unwrap_or_else(|error| panic!("`{filter}` failed: {error}"))
        .unwrap_or_else(|| panic!("`{filter}` produced no output"))
}

#[test]
fn paths_and_indexes() {
    let doc = json!({"a": {"b": [10, 20, 30]}, "k y": 1});
    assert_eq!(value(".a.b[1]", doc.clone()), json!(20));
    assert_eq!(value(".a.b[-1]", doc.clone()), json!(30));
    assert_eq!(value(".a.b[1:]", doc.clone()), json!([20, 30]));
    assert_eq!(value(".\"k y\"", doc.clone()), json!(1));
    assert_eq!(value(".missing", doc), Value::Null);
    assert_eq!(value(".[1:]", json!("abc")), json!("bc"));
}

#[test]
fn only_the_first_output_is_returned() {
    assert_eq!(value(".[]", json!([3, 4, 5])), json!(3));
    assert_eq!(value(".a, .b", json!({"a": 1, "b": 2})), json!(1));
}

#[test]
fn filters_without_output_yield_none() -> Result<()> {
    assert_eq!(first("empty", &json!(1))?, None);
    assert_eq!(first(".[] | select(. > 10)", &json!([1, 2]))?, None);
    assert_eq!(first(".a?", &json!(5))?, None);
    Ok(())
}

#[test]
fn arithmetic_and_comparison() {
    assert_eq!(value("1 + 2 * 3", Value::Null), json!(7));
    assert_eq!(value("3 / 2", Value::Null), json!(1.5));
    assert_eq!(value("7 % 3", Value::Null), json!(1));
    assert_eq!(value(".a + .b", json!({"a": "x", "b": "y"})), json!("xy"));
    assert_eq!(value(". + [3]", json!([1, 2])), json!([1, 2, 3]));
    assert_eq!(value(". - [2]", json!([1, 2, 3])), json!([1, 3]));
    assert_eq!(
        value(". * {\"a\": {\"c\": 2}}", json!({"a": {"b": 1}})),
        json!({"a": {"b": 1, "c": 2}})
    );
    assert_eq!(value("null + 1", Value::Null), json!(1));
    assert_eq!(value(".a < .b", json!({"a": 1, "b": "x"})), json!(true));
}

#[test]
fn collection_builders() {
    let doc = json!({"items": [{"n": 3}, {"n": 1}, {"n": 2}]});
    assert_eq!(value("[.items[].n]", doc.clone()), json!([3, 1, 2]));
    assert_eq!(value(".items | map(.n * 2)", doc.clone()), json!([6, 2, 4]));
    assert_eq!(value(".items | sort_by(.n) | map(.n)", doc.clone()), json!([1, 2, 3]));
    assert_eq!(value("[.items[] | select(.n > 1) | .n]", doc), json!([3, 2]));
    assert_eq!(
        value("{name: .a, \"b\": 1, (.k): true}", json!({"a": "x", "k": "dyn"})),
        json!({"name": "x", "b": 1, "dyn": true})
    );
}

#[test]
fn object_construction_multiplies_outputs() {
    assert_eq!(
        value("[{a: (1, 2), b: (3, 4)}]", Value::Null),
        json!([{"a": 1, "b": 3}, {"a": 1, "b": 4}, {"a": 2, "b": 3}, {"a": 2, "b": 4}])
    );
}

#[test]
fn control_flow() {
    assert_eq!(value("if . > 1 then \"big\" else \"small\" end", json!(2)), json!("big"));
    assert_eq!(
        value("if . == 0 then \"zero\" elif . < 0 then \"neg\" else \"pos\" end", json!(-4)),
        json!("neg")
    );
    assert_eq!(value(".missing // \"default\"", json!({})), json!("default"));
    assert_eq!(value("(false, null, 1) // 2", Value::Null), json!(1));
    assert_eq!(value("error(\"x\") // 2", Value::Null), json!(2));
    assert_eq!(value("try error(\"boom\") catch .", Value::Null), json!("boom"));
    assert_eq!(value("[.[] | (1 / .)?]", json!([1, 0])), json!([1]));
}

#[test]
fn variables_reductions_and_definitions() {
    assert_eq!(value("reduce .[] as $x (0; . + $x)", json!([1, 2, 3])), json!(6));
    assert_eq!(value(".a as $v | .b + $v", json!({"a": 1, "b": 2})), json!(3));
    assert_eq!(value("def double: . * 2; map(double)", json!([1, 2])), json!([2, 4]));
}

#[test]
fn builtins() {
    assert_eq!(value("length", json!("héllo")), json!(5));
    assert_eq!(value("length", json!({"a": 1, "b": 2})), json!(2));
    assert_eq!(value("keys", json!({"b": 1, "a": 2})), json!(["a", "b"]));
    assert_eq!(value("to_entries", json!({"a": 1})), json!([{"key": "a", "value": 1}]));
    assert_eq!(
        value("with_entries({key: .key, value: (.value + 1)})", json!({"a": 1})),
        json!({"a": 2})
    );
    assert_eq!(value("split(\",\") | join(\"-\")", json!("a,b,c")), json!("a-b-c"));
    assert_eq!(value("[range(3)]", Value::Null), json!([0, 1, 2]));
    assert_eq!(value("[limit(3; repeat(. * 2))]", json!(1)), json!([1, 2, 4]));
    assert_eq!(value("first(range(10; 20))", Value::Null), json!(10));
    assert_eq!(value("[.[] | tostring]", json!([1, "a"])), json!(["1", "a"]));
    assert_eq!(value("tojson | fromjson", json!({"a": [1]})), json!({"a": [1]}));
    assert_eq!(value("unique", json!([2, 1, 2])), json!([1, 2]));
    assert_eq!(value("contains({a: [1]})", json!({"a": [1, 2]})), json!(true));
    assert_eq!(value("type", json!(1.5)), json!("number"));
    assert_eq!(value("ascii_upcase", json!("abc")), json!("ABC"));
    assert_eq!(value("[until(. > 100; . * 2)]", json!(3)), json!([192]));
}

#[test]
fn runtime_errors_carry_the_message() -> Result<()> {
    let executor = executor();
    match executor.evaluate_sync("{}", "error(\"bad thing\")") {
        Err(ExecError::Runtime(message)) => assert_eq!(message, "bad thing"),
        other => panic!("expected runtime error, got {other:?}"),
    }
    match executor.evaluate_sync("5", ".a") {
        Err(ExecError::Runtime(message)) => assert!(message.contains("Cannot index number")),
        other => panic!("expected runtime error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn undefined_names_fail_to_compile() {
    let executor = executor();
    match executor.evaluate_sync("{}", "$nope") {
        Err(ExecError::Compile { message, .. }) => assert!(message.contains("$nope is not defined")),
        other => panic!("expected compile error, got {other:?}"),
    }
    match executor.evaluate_sync("{}", "lenght") {
        Err(error @ ExecError::Compile { .. }) => {
            let diagnostic = error.diagnostic().expect("compile errors carry a diagnostic");
            assert!(diagnostic.contains("length"), "suggests the builtin: {diagnostic}");
        }
        other => panic!("expected compile error, got {other:?}"),
    }
}

#[test]
fn empty_filter_is_identity() {
    assert_eq!(value("", json!({"a": 1})), json!({"a": 1}));
}
