use crate::ast::{Accessor, BinOp, Expr, Lambda, Stmt, UnaryOp};
use crate::context::Iteration;
use crate::error::{CallError, EvalError};
use crate::helpers;
use crate::value::{format_number, member_of, Function, Map, Value};
use std::borrow::Cow;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bindings visible to an expression.
#[derive(Clone, Copy)]
pub struct Env<'e> {
    pub data: &'e Value,
    pub global: &'e Value,
    pub extra: Option<Iteration>,
    pub vars: &'e Map,
    pub plugins: &'e Value,
    pub locals: &'e [(String, Value)],
    /// Template-defined functions currently executing in this render.
    pub active: &'e Arc<AtomicUsize>,
    pub max_depth: usize,
}

pub struct Evaluator<'e> {
    env: Env<'e>,
}

impl<'e> Evaluator<'e> {
    pub fn new(env: Env<'e>) -> Self {
        Self { env }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.eval_ref(expr).map(Cow::into_owned)
    }

    pub fn eval_args(&self, args: &[Expr]) -> Result<Vec<Value>, EvalError> {
        args.iter().map(|a| self.eval(a)).collect()
    }

    /// Apply a tag's accessor chain to an already resolved head.
    /// `this` is the value the head was read from.
    pub fn apply_chain<'v>(
        &self,
        label: &str,
        mut current: Cow<'v, Value>,
        mut this: Cow<'v, Value>,
        chain: &[Accessor],
    ) -> Result<Cow<'v, Value>, EvalError> {
        let mut label = label.to_string();
        for accessor in chain {
            match accessor {
                Accessor::Member(key) => {
                    let next = member_of(&current, key).unwrap_or(Cow::Owned(Value::Undefined));
                    this = std::mem::replace(&mut current, next);
                    label.push('.');
                    label.push_str(key);
                }
                Accessor::Call(args) => {
                    let args = self.eval_args(args)?;
                    let Value::Function(f) = current.as_ref() else {
                        return Err(EvalError::NotCallable(label));
                    };
                    let result = f.call(this.as_ref(), &args)?;
                    this = Cow::Owned(Value::Undefined);
                    current = Cow::Owned(result);
                    label.push_str("(...)");
                }
                Accessor::Invalid(message) => return Err(EvalError::Syntax(message.clone())),
            }
        }
        Ok(current)
    }

    /// Execute a function body. The first `return` wins; falling off the
    /// end yields `undefined`.
    pub fn run(&self, body: &[Stmt]) -> Result<Value, EvalError> {
        for stmt in body {
            match stmt {
                Stmt::Expr(expr) => {
                    self.eval_ref(expr)?;
                }
                Stmt::Return(Some(expr)) => return self.eval(expr),
                Stmt::Return(None) => return Ok(Value::Undefined),
            }
        }
        Ok(Value::Undefined)
    }

    fn eval_ref(&self, expr: &Expr) -> Result<Cow<'e, Value>, EvalError> {
        match expr {
            Expr::Ident(name) => self.ident(name),
            Expr::Member(obj, key) => {
                let base = self.eval_ref(obj)?;
                Ok(member_of(&base, key).unwrap_or(Cow::Owned(Value::Undefined)))
            }
            Expr::Index(obj, idx) => {
                let base = self.eval_ref(obj)?;
                let key = key_of(&self.eval(idx)?);
                Ok(member_of(&base, &key).unwrap_or(Cow::Owned(Value::Undefined)))
            }
            Expr::Call(callee, args) => self.call(callee, args).map(Cow::Owned),
            other => self.eval_value(other).map(Cow::Owned),
        }
    }

    fn ident(&self, name: &str) -> Result<Cow<'e, Value>, EvalError> {
        let env = self.env;
        if let Some((_, v)) = env.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(Cow::Borrowed(v));
        }
        match name {
            "data" => Ok(Cow::Borrowed(env.data)),
            "global" => Ok(Cow::Borrowed(env.global)),
            "extra" => Ok(Cow::Owned(
                env.extra.map(|it| it.to_value()).unwrap_or_default(),
            )),
            "var" => Ok(Cow::Owned(Value::Object(env.vars.clone()))),
            "helpers" => Ok(Cow::Owned(self.helpers_object())),
            _ => Err(EvalError::Undefined(name.to_string())),
        }
    }

    fn helpers_object(&self) -> Value {
        Value::object([
            ("var", Value::Object(self.env.vars.clone())),
            ("plugins", self.env.plugins.clone()),
            ("equal", Value::function(|_, args| Ok(helpers::equal(args)))),
            ("contains", Value::function(|_, args| Ok(helpers::contains(args)))),
        ])
    }

    fn call(&self, callee: &Expr, args: &[Expr]) -> Result<Value, EvalError> {
        let (func, this) = match callee {
            Expr::Member(obj, key) => {
                let this = self.eval_ref(obj)?;
                let func = member_of(&this, key).map(Cow::into_owned);
                (func, this)
            }
            Expr::Index(obj, idx) => {
                let this = self.eval_ref(obj)?;
                let key = key_of(&self.eval(idx)?);
                let func = member_of(&this, &key).map(Cow::into_owned);
                (func, this)
            }
            other => (Some(self.eval(other)?), Cow::Owned(Value::Undefined)),
        };
        let args = self.eval_args(args)?;
        match func {
            Some(Value::Function(f)) => Ok(f.call(this.as_ref(), &args)?),
            _ => Err(EvalError::NotCallable(label(callee))),
        }
    }

    fn eval_value(&self, expr: &Expr) -> Result<Value, EvalError> {
        Ok(match expr {
            Expr::Undefined => Value::Undefined,
            Expr::Null => Value::Null,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Number(n) => Value::Number(*n),
            Expr::String(s) => Value::String(s.clone()),
            Expr::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.operand(item))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), self.operand(v)?)))
                    .collect::<Result<Map, EvalError>>()?,
            ),
            Expr::Function(lambda) => self.closure(Arc::clone(lambda)),
            Expr::Unary(UnaryOp::Not, operand) => Value::Bool(!self.operand(operand)?.is_truthy()),
            Expr::Unary(UnaryOp::Neg, operand) => match self.operand(operand)? {
                Value::Number(n) => Value::Number(-n),
                _ => Value::Number(f64::NAN),
            },
            Expr::Binary(lhs, op, rhs) => self.binary(lhs, *op, rhs)?,
            Expr::Ident(_) | Expr::Member(..) | Expr::Index(..) | Expr::Call(..) => {
                self.eval(expr)?
            }
        })
    }

    /// Evaluate a sub-expression of a literal or operator. A bare unknown
    /// identifier here is `undefined` rather than an error.
    fn operand(&self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Ident(name) => match self.ident(name) {
                Ok(value) => Ok(value.into_owned()),
                Err(EvalError::Undefined(_)) => Ok(Value::Undefined),
                Err(err) => Err(err),
            },
            other => self.eval(other),
        }
    }

    fn binary(&self, lhs: &Expr, op: BinOp, rhs: &Expr) -> Result<Value, EvalError> {
        let l = self.operand(lhs)?;
        Ok(match op {
            BinOp::And if l.is_truthy() => self.operand(rhs)?,
            BinOp::Or if !l.is_truthy() => self.operand(rhs)?,
            BinOp::And | BinOp::Or => l,
            BinOp::Eq => Value::Bool(l == self.operand(rhs)?),
            BinOp::NotEq => Value::Bool(l != self.operand(rhs)?),
            BinOp::Add => match (l, self.operand(rhs)?) {
                (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
                (l, r) => Value::String(l.render() + &r.render()),
            },
        })
    }

    /// Capture the current bindings into a callable value.
    fn closure(&self, lambda: Arc<Lambda>) -> Value {
        let captured = Captured::capture(&self.env);
        Value::Function(Function::new(move |_this, args| {
            captured.invoke(&lambda, args).map_err(CallError::from)
        }))
    }
}

/// Owned copy of the bindings a function literal closes over.
struct Captured {
    data: Value,
    global: Value,
    extra: Option<Iteration>,
    vars: Map,
    plugins: Value,
    locals: Vec<(String, Value)>,
    active: Arc<AtomicUsize>,
    max_depth: usize,
}

impl Captured {
    fn capture(env: &Env<'_>) -> Self {
        Self {
            data: env.data.clone(),
            global: env.global.clone(),
            extra: env.extra,
            vars: env.vars.clone(),
            plugins: env.plugins.clone(),
            locals: env.locals.to_vec(),
            active: Arc::clone(env.active),
            max_depth: env.max_depth,
        }
    }

    fn invoke(&self, lambda: &Lambda, args: &[Value]) -> Result<Value, EvalError> {
        let _guard = DepthGuard::enter(&self.active, self.max_depth)?;

        let mut locals = self.locals.clone();
        for (i, param) in lambda.params.iter().enumerate() {
            locals.push((param.clone(), args.get(i).cloned().unwrap_or_default()));
        }
        let env = Env {
            data: &self.data,
            global: &self.global,
            extra: self.extra,
            vars: &self.vars,
            plugins: &self.plugins,
            locals: &locals,
            active: &self.active,
            max_depth: self.max_depth,
        };
        Evaluator::new(env).run(&lambda.body)
    }
}

struct DepthGuard<'g>(&'g AtomicUsize);

impl<'g> DepthGuard<'g> {
    fn enter(active: &'g AtomicUsize, max: usize) -> Result<Self, EvalError> {
        if active.fetch_add(1, Ordering::SeqCst) >= max {
            active.fetch_sub(1, Ordering::SeqCst);
            return Err(EvalError::DepthExceeded(max));
        }
        Ok(Self(active))
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn key_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => format_number(*n),
        other => other.render(),
    }
}

/// Dotted description of a callee for error messages.
fn label(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.clone(),
        Expr::Member(obj, key) => format!("{}.{key}", label(obj)),
        Expr::Index(obj, _) => format!("{}[...]", label(obj)),
        Expr::Call(callee, _) => format!("{}(...)", label(callee)),
        _ => "expression".to_string(),
    }
}
