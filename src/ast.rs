use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Eq,
    NotEq,
    Add,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// Expression inside call arguments and function bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Ident(String),
    Member(Box<Expr>, String),    // foo.bar
    Index(Box<Expr>, Box<Expr>),  // foo['bar']
    Call(Box<Expr>, Vec<Expr>),   // foo(1, 2)
    Function(Arc<Lambda>),
    Unary(UnaryOp, Box<Expr>),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

/// `function (params) { body }`
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Return(Option<Expr>),
}

/// Where the head of a tag path is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The scope stack, innermost frame first.
    Scope,
    /// `*name`: the global context.
    Global,
    /// `@name`: iteration metadata of the nearest array row.
    Iteration,
    /// `~name`: the helper registry.
    Helper,
}

/// One step after the head of a tag path.
#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    Member(String),
    Call(Vec<Expr>),
    /// The rest of the tag failed to parse; evaluating it reports the message.
    Invalid(String),
}

/// A tag reference such as `--foo.bar(1).baz`.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub name: String,
    /// Count of leading `-` markers.
    pub backtrack: usize,
    pub origin: Origin,
    pub chain: Vec<Accessor>,
}

impl Path {
    pub fn new(name: impl Into<String>, origin: Origin) -> Self {
        Self {
            name: name.into(),
            backtrack: 0,
            origin,
            chain: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Var {
        path: Path,
        encode: bool,
    },
    Section {
        path: Path,
        negated: bool,
        children: Vec<Node>,
    },
    Partial(String),
    PartialDecl {
        name: String,
        children: Vec<Node>,
    },
    /// Source between `{{$}}` and its closer, emitted verbatim.
    Raw(String),
}
