//! Lazy evaluator for resolved filters.
//!
//! Every expression evaluates to a boxed iterator of results, so generators
//! such as `range` or `repeat` only do as much work as their consumer pulls.
//! Bindings and definitions live in persistent `Rc` lists shared between the
//! iterators that capture them.

pub mod builtins;
pub mod value;

use std::rc::Rc;

use serde_json::{Map, Value};

use crate::ast::{BinaryOp, Expr, Filter, Literal, ObjectEntry, ObjectKey};
use crate::engine::{Deadline, Outputs, RunError};

use self::builtins::ENV_VARIABLE;
use self::value::{describe, truthy, type_name};

/// Why evaluation stopped. Raised errors carry the value given to `error`,
/// which `try ... catch` hands to its handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Failure {
    Raised(Value),
    Timeout,
}

impl Failure {
    pub fn message(text: impl Into<String>) -> Self {
        Failure::Raised(Value::String(text.into()))
    }
}

impl From<Failure> for RunError {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Raised(Value::String(message)) => RunError::Runtime(message),
            Failure::Raised(other) => RunError::Runtime(format!("{other} (not a string)")),
            Failure::Timeout => RunError::Timeout,
        }
    }
}

pub type ValueResult = Result<Value, Failure>;
pub type ValueIter<'a> = Box<dyn Iterator<Item = ValueResult> + 'a>;

struct Shared<'a> {
    env: &'a Value,
    deadline: Option<Deadline>,
}

struct Binding<'a> {
    name: &'a str,
    value: Value,
    next: Option<Rc<Binding<'a>>>,
}

struct Definition<'a> {
    name: &'a str,
    body: &'a Expr,
    scope: Ctx<'a>,
    next: Option<Rc<Definition<'a>>>,
}

/// Evaluation context: variables and definitions in scope plus the run-wide
/// environment object and deadline.
#[derive(Clone)]
pub struct Ctx<'a> {
    shared: Rc<Shared<'a>>,
    bindings: Option<Rc<Binding<'a>>>,
    definitions: Option<Rc<Definition<'a>>>,
}

impl<'a> Ctx<'a> {
    fn new(env: &'a Value, deadline: Option<Deadline>) -> Self {
        Self {
            shared: Rc::new(Shared { env, deadline }),
            bindings: None,
            definitions: None,
        }
    }

    pub fn check(&self) -> Result<(), Failure> {
        match self.shared.deadline {
            Some(deadline) if deadline.expired() => Err(Failure::Timeout),
            _ => Ok(()),
        }
    }

    pub fn env(&self) -> &'a Value {
        self.shared.env
    }

    fn bind(&self, name: &'a str, value: Value) -> Self {
        let mut scope = self.clone();
        scope.bindings = Some(Rc::new(Binding {
            name,
            value,
            next: self.bindings.clone(),
        }));
        scope
    }

    fn define(&self, name: &'a str, body: &'a Expr) -> Self {
        let mut scope = self.clone();
        scope.definitions = Some(Rc::new(Definition {
            name,
            body,
            scope: self.clone(),
            next: self.definitions.clone(),
        }));
        scope
    }

    fn variable(&self, name: &str) -> Option<Value> {
        let mut cursor = self.bindings.as_ref();
        while let Some(binding) = cursor {
            if binding.name == name {
                return Some(binding.value.clone());
            }
            cursor = binding.next.as_ref();
        }
        (name == ENV_VARIABLE).then(|| self.env().clone())
    }

    fn definition(&self, name: &str) -> Option<Rc<Definition<'a>>> {
        let mut cursor = self.definitions.as_ref();
        while let Some(definition) = cursor {
            if definition.name == name {
                return Some(Rc::clone(definition));
            }
            cursor = definition.next.as_ref();
        }
        None
    }
}

/// Run `filter` against `input`. The first error ends the stream.
pub fn run<'a>(
    filter: &'a Filter,
    env: &'a Value,
    input: Value,
    deadline: Option<Deadline>,
) -> Outputs<'a> {
    let ctx = Ctx::new(env, deadline);
    let mut outputs = eval(&filter.body, &ctx, input);
    let mut finished = false;
    Box::new(std::iter::from_fn(move || {
        if finished {
            return None;
        }
        let item = outputs.next().map(|item| item.and_then(|value| ctx.check().map(|()| value)));
        match item {
            Some(Ok(value)) => Some(Ok(value)),
            Some(Err(failure)) => {
                finished = true;
                Some(Err(failure.into()))
            }
            None => {
                finished = true;
                None
            }
        }
    }))
}

pub fn single<'a>(value: Value) -> ValueIter<'a> {
    Box::new(std::iter::once(Ok(value)))
}

pub fn fail<'a>(failure: Failure) -> ValueIter<'a> {
    Box::new(std::iter::once(Err(failure)))
}

pub fn empty<'a>() -> ValueIter<'a> {
    Box::new(std::iter::empty())
}

pub fn lift<'a>(result: ValueResult) -> ValueIter<'a> {
    Box::new(std::iter::once(result))
}

/// Feed every successful output of `outputs` to `f`, passing failures through.
pub fn then<'a, F>(outputs: ValueIter<'a>, mut f: F) -> ValueIter<'a>
where
    F: FnMut(Value) -> ValueIter<'a> + 'a,
{
    Box::new(outputs.flat_map(move |item| match item {
        Ok(value) => f(value),
        Err(failure) => fail(failure),
    }))
}

/// Collect outputs up to the first failure.
pub fn collect(outputs: ValueIter<'_>) -> Result<Vec<Value>, Failure> {
    outputs.collect()
}

pub fn first_value(mut outputs: ValueIter<'_>) -> Result<Option<Value>, Failure> {
    outputs.next().transpose()
}

/// Depth-first traversal yielding `input` and then, recursively, everything
/// `step` produces from each yielded value.
pub fn recurse_with<'a, F>(ctx: Ctx<'a>, input: Value, mut step: F) -> ValueIter<'a>
where
    F: FnMut(&Value) -> ValueIter<'a> + 'a,
{
    let mut stack: Vec<ValueIter<'a>> = vec![single(input)];
    Box::new(std::iter::from_fn(move || {
        loop {
            let top = stack.last_mut()?;
            match top.next() {
                Some(Ok(value)) => {
                    if let Err(failure) = ctx.check() {
                        stack.clear();
                        return Some(Err(failure));
                    }
                    stack.push(step(&value));
                    return Some(Ok(value));
                }
                Some(Err(failure)) => return Some(Err(failure)),
                None => {
                    stack.pop();
                }
            }
        }
    }))
}

/// Immediate children, as `.[]?` yields them.
pub fn children<'a>(value: &Value) -> ValueIter<'a> {
    match value {
        Value::Array(items) => Box::new(items.clone().into_iter().map(Ok)),
        Value::Object(map) => Box::new(map.values().cloned().collect::<Vec<_>>().into_iter().map(Ok)),
        _ => empty(),
    }
}

pub fn field(target: &Value, name: &str) -> ValueResult {
    match target {
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(Failure::message(format!(
            "Cannot index {} with \"{name}\"",
            type_name(other)
        ))),
    }
}

fn literal(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(flag) => Value::Bool(*flag),
        Literal::Number(number) => value::number(*number),
        Literal::String(text) => Value::String(text.clone()),
    }
}

pub fn eval<'a>(expr: &'a Expr, ctx: &Ctx<'a>, input: Value) -> ValueIter<'a> {
    if let Err(failure) = ctx.check() {
        return fail(failure);
    }

    match expr {
        Expr::Identity => single(input),
        Expr::RecurseAll => recurse_with(ctx.clone(), input, children),
        Expr::Literal(value) => single(literal(value)),
        Expr::Field { target, name } => then(eval(target, ctx, input), move |value| {
            lift(field(&value, name))
        }),
        Expr::Index { target, index } => {
            let ctx = ctx.clone();
            let original = input.clone();
            then(eval(target, &ctx.clone(), input), move |container| {
                Box::new(
                    eval(index, &ctx, original.clone())
                        .map(move |key| key.and_then(|key| value::index(&container, &key))),
                )
            })
        }
        Expr::Slice { target, from, to } => {
            let ctx = ctx.clone();
            let original = input.clone();
            then(eval(target, &ctx.clone(), input), move |container| {
                let ctx = ctx.clone();
                let original = original.clone();
                then(optional(to.as_deref(), &ctx.clone(), original.clone()), move |end| {
                    let container = container.clone();
                    Box::new(optional(from.as_deref(), &ctx, original.clone()).map(move |start| {
                        start.and_then(|start| value::slice(&container, &start, &end))
                    }))
                })
            })
        }
        Expr::Iterate(target) => then(eval(target, ctx, input), |container| {
            match value::iterate(container) {
                Ok(items) => Box::new(items.into_iter().map(Ok)),
                Err(failure) => fail(failure),
            }
        }),
        Expr::Array(None) => single(Value::Array(Vec::new())),
        Expr::Array(Some(body)) => match collect(eval(body, ctx, input)) {
            Ok(items) => single(Value::Array(items)),
            Err(failure) => fail(failure),
        },
        Expr::Object(entries) => match construct_object(entries, ctx, &input) {
            Ok(objects) => Box::new(objects.into_iter().map(|map| Ok(Value::Object(map)))),
            Err(failure) => fail(failure),
        },
        Expr::Neg(operand) => Box::new(eval(operand, ctx, input).map(|item| {
            item.and_then(|value| match value::as_f64(&value) {
                Some(number) => Ok(value::number(-number)),
                None => Err(Failure::message(format!(
                    "{} cannot be negated",
                    describe(&value)
                ))),
            })
        })),
        Expr::Binary {
            op: op @ (BinaryOp::And | BinaryOp::Or),
            left,
            right,
        } => logical(*op == BinaryOp::And, left, right, ctx, input),
        Expr::Binary { op, left, right } => arithmetic(*op, left, right, ctx, input),
        Expr::Alternative(left, right) => alternative(left, right, ctx, input),
        Expr::Pipe(left, right) => {
            let ctx = ctx.clone();
            then(eval(left, &ctx.clone(), input), move |value| eval(right, &ctx, value))
        }
        Expr::Comma(left, right) => {
            let later = ctx.clone();
            let original = input.clone();
            Box::new(
                eval(left, ctx, input)
                    .chain(std::iter::once_with(move || eval(right, &later, original)).flatten()),
            )
        }
        Expr::If {
            cond,
            then_branch,
            else_branch,
        } => {
            let ctx = ctx.clone();
            let original = input.clone();
            then(eval(cond, &ctx.clone(), input), move |condition| {
                if truthy(&condition) {
                    eval(then_branch, &ctx, original.clone())
                } else {
                    match else_branch {
                        Some(branch) => eval(branch, &ctx, original.clone()),
                        None => single(original.clone()),
                    }
                }
            })
        }
        Expr::Try { body, handler } => attempt(body, handler.as_deref(), ctx, input),
        Expr::Reduce {
            source,
            var,
            init,
            update,
        } => {
            let ctx = ctx.clone();
            let original = input.clone();
            then(eval(init, &ctx.clone(), input), move |initial| {
                match fold(source, var, update, &ctx, original.clone(), initial) {
                    Ok(result) => single(result),
                    Err(failure) => fail(failure),
                }
            })
        }
        Expr::Bind { source, var, body } => {
            let ctx = ctx.clone();
            let original = input.clone();
            then(eval(source, &ctx.clone(), input), move |bound| {
                eval(body, &ctx.bind(var, bound), original.clone())
            })
        }
        Expr::Def { name, body, rest } => eval(rest, &ctx.define(name, body), input),
        Expr::Variable { name, .. } => match ctx.variable(name) {
            Some(value) => single(value),
            None => fail(Failure::message(format!("${name} is not defined"))),
        },
        Expr::Call { name, args, .. } => {
            if args.is_empty() {
                if let Some(definition) = ctx.definition(name) {
                    return eval(definition.body, &definition.scope, input);
                }
            }
            builtins::call(name, args, ctx, input)
        }
    }
}

fn optional<'a>(expr: Option<&'a Expr>, ctx: &Ctx<'a>, input: Value) -> ValueIter<'a> {
    match expr {
        Some(expr) => eval(expr, ctx, input),
        None => single(Value::Null),
    }
}

fn construct_object<'a>(
    entries: &'a [ObjectEntry],
    ctx: &Ctx<'a>,
    input: &Value,
) -> Result<Vec<Map<String, Value>>, Failure> {
    let mut partials = vec![Map::new()];

    for entry in entries {
        let keys = match &entry.key {
            ObjectKey::Static(name) | ObjectKey::Variable { name, .. } => vec![name.clone()],
            ObjectKey::Computed(expr) => collect(eval(expr, ctx, input.clone()))?
                .into_iter()
                .map(|key| match key {
                    Value::String(key) => Ok(key),
                    other => Err(Failure::message(format!(
                        "Object keys must be strings, not {}",
                        type_name(&other)
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let values = match (&entry.value, &entry.key) {
            (Some(expr), _) => collect(eval(expr, ctx, input.clone()))?,
            (None, ObjectKey::Static(name)) => vec![field(input, name)?],
            (None, ObjectKey::Variable { name, .. }) => match ctx.variable(name) {
                Some(value) => vec![value],
                None => return Err(Failure::message(format!("${name} is not defined"))),
            },
            (None, ObjectKey::Computed(_)) => {
                return Err(Failure::message("computed object keys need a value"));
            }
        };

        let mut next = Vec::with_capacity(partials.len() * keys.len() * values.len());
        for partial in &partials {
            for key in &keys {
                for value in &values {
                    let mut object = partial.clone();
                    object.insert(key.clone(), value.clone());
                    next.push(object);
                }
            }
        }
        partials = next;
    }

    Ok(partials)
}

fn logical<'a>(
    is_and: bool,
    left: &'a Expr,
    right: &'a Expr,
    ctx: &Ctx<'a>,
    input: Value,
) -> ValueIter<'a> {
    let ctx = ctx.clone();
    let original = input.clone();
    then(eval(left, &ctx.clone(), input), move |lhs| {
        // `false and _` and `true or _` never evaluate the right side.
        if truthy(&lhs) != is_and {
            return single(Value::Bool(!is_and));
        }
        Box::new(
            eval(right, &ctx, original.clone())
                .map(|rhs| rhs.map(|rhs| Value::Bool(truthy(&rhs)))),
        )
    })
}

fn arithmetic<'a>(
    op: BinaryOp,
    left: &'a Expr,
    right: &'a Expr,
    ctx: &Ctx<'a>,
    input: Value,
) -> ValueIter<'a> {
    let ctx = ctx.clone();
    let original = input.clone();
    // The right operand varies slowest: `(1,2) + (10,20)` is 11, 12, 21, 22.
    then(eval(right, &ctx.clone(), input), move |rhs| {
        Box::new(
            eval(left, &ctx, original.clone())
                .map(move |lhs| lhs.and_then(|lhs| apply(op, lhs, rhs.clone()))),
        )
    })
}

fn apply(op: BinaryOp, lhs: Value, rhs: Value) -> ValueResult {
    use std::cmp::Ordering;

    match op {
        BinaryOp::Add => value::add(lhs, rhs),
        BinaryOp::Sub => value::subtract(lhs, rhs),
        BinaryOp::Mul => value::multiply(lhs, rhs),
        BinaryOp::Div => value::divide(lhs, rhs),
        BinaryOp::Mod => value::modulo(lhs, rhs),
        BinaryOp::Eq => Ok(Value::Bool(value::equals(&lhs, &rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!value::equals(&lhs, &rhs))),
        BinaryOp::Lt => Ok(Value::Bool(value::compare(&lhs, &rhs) == Ordering::Less)),
        BinaryOp::LtEq => Ok(Value::Bool(value::compare(&lhs, &rhs) != Ordering::Greater)),
        BinaryOp::Gt => Ok(Value::Bool(value::compare(&lhs, &rhs) == Ordering::Greater)),
        BinaryOp::GtEq => Ok(Value::Bool(value::compare(&lhs, &rhs) != Ordering::Less)),
        BinaryOp::And => Ok(Value::Bool(truthy(&lhs) && truthy(&rhs))),
        BinaryOp::Or => Ok(Value::Bool(truthy(&lhs) || truthy(&rhs))),
    }
}

fn alternative<'a>(left: &'a Expr, right: &'a Expr, ctx: &Ctx<'a>, input: Value) -> ValueIter<'a> {
    let mut found = Vec::new();
    for item in eval(left, ctx, input.clone()) {
        match item {
            Ok(value) if truthy(&value) => found.push(value),
            Ok(_) | Err(Failure::Raised(_)) => {}
            Err(Failure::Timeout) => return fail(Failure::Timeout),
        }
    }
    if found.is_empty() {
        eval(right, ctx, input)
    } else {
        Box::new(found.into_iter().map(Ok))
    }
}

/// `try body catch handler`: outputs of `body` until its first raised error,
/// which goes to `handler` (or is dropped). Timeouts are never caught.
fn attempt<'a>(
    body: &'a Expr,
    handler: Option<&'a Expr>,
    ctx: &Ctx<'a>,
    input: Value,
) -> ValueIter<'a> {
    let ctx = ctx.clone();
    let mut body_outputs = Some(eval(body, &ctx, input));
    let mut handler_outputs: Option<ValueIter<'a>> = None;

    Box::new(std::iter::from_fn(move || {
        if let Some(outputs) = handler_outputs.as_mut() {
            return outputs.next();
        }
        let outputs = body_outputs.as_mut()?;
        match outputs.next() {
            Some(Ok(value)) => Some(Ok(value)),
            None => {
                body_outputs = None;
                None
            }
            Some(Err(Failure::Timeout)) => {
                body_outputs = None;
                Some(Err(Failure::Timeout))
            }
            Some(Err(Failure::Raised(error))) => {
                body_outputs = None;
                let mut outputs = eval(handler?, &ctx, error);
                let first = outputs.next();
                handler_outputs = Some(outputs);
                first
            }
        }
    }))
}

fn fold<'a>(
    source: &'a Expr,
    var: &'a str,
    update: &'a Expr,
    ctx: &Ctx<'a>,
    input: Value,
    initial: Value,
) -> ValueResult {
    let mut accumulator = initial;
    for item in eval(source, ctx, input) {
        let item = item?;
        ctx.check()?;
        let scope = ctx.bind(var, item);
        let mut last = None;
        for output in eval(update, &scope, accumulator) {
            last = Some(output?);
        }
        accumulator = last.unwrap_or(Value::Null);
    }
    Ok(accumulator)
}
