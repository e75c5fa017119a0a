use jqexec_span::Span;

/// A parsed filter: a single expression, possibly prefixed by definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub body: Expr,
}

impl Filter {
    pub fn new(body: Expr) -> Self {
        Self { body }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKey {
    /// `name` or `"name"`
    Static(String),
    /// `$name`, which also supplies the value when none is given.
    Variable { name: String, span: Span },
    /// `(expr)`
    Computed(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectEntry {
    pub key: ObjectKey,
    /// `None` means the shorthand `{name}` / `{$name}`.
    pub value: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `.`
    Identity,
    /// `..`
    RecurseAll,
    Literal(Literal),
    /// `target.name`, `.name`, `."name"`
    Field {
        target: Box<Expr>,
        name: String,
    },
    /// `target[index]`
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    /// `target[from:to]`
    Slice {
        target: Box<Expr>,
        from: Option<Box<Expr>>,
        to: Option<Box<Expr>>,
    },
    /// `target[]`
    Iterate(Box<Expr>),
    /// `[body]`, `[]`
    Array(Option<Box<Expr>>),
    Object(Vec<ObjectEntry>),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `left // right`
    Alternative(Box<Expr>, Box<Expr>),
    Pipe(Box<Expr>, Box<Expr>),
    Comma(Box<Expr>, Box<Expr>),
    /// `elif` chains are nested into `else_branch`.
    If {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Option<Box<Expr>>,
    },
    /// `try body catch handler`; postfix `?` has no handler.
    Try {
        body: Box<Expr>,
        handler: Option<Box<Expr>>,
    },
    /// `reduce source as $var (init; update)`
    Reduce {
        source: Box<Expr>,
        var: String,
        init: Box<Expr>,
        update: Box<Expr>,
    },
    /// `source as $var | body`
    Bind {
        source: Box<Expr>,
        var: String,
        body: Box<Expr>,
    },
    /// `def name: body; rest`
    Def {
        name: String,
        body: Box<Expr>,
        rest: Box<Expr>,
    },
    Variable {
        name: String,
        span: Span,
    },
    Call {
        name: String,
        args: Vec<Expr>,
        span: Span,
    },
}

impl Expr {
    pub fn field(target: Expr, name: impl Into<String>) -> Self {
        Expr::Field {
            target: Box::new(target),
            name: name.into(),
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }
}
