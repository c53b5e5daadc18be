use crate::ast::{Accessor, Node, Origin, Path};
use crate::config::Config;
use crate::context::{Frame, Iteration, Scope};
use crate::error::EvalError;
use crate::eval::{Env, Evaluator};
use crate::helpers::{self, Builtin, Helper, HelperHost, Helpers};
use crate::partials::PartialRegistry;
use crate::sink::LogSink;
use crate::value::{Map, Value};
use std::borrow::Cow;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

pub(crate) struct Renderer<'r> {
    helpers: &'r Helpers,
    partials: PartialRegistry<'r>,
    sink: &'r dyn LogSink,
    config: &'r Config,
    global: &'r Value,
    scope: Scope<'r>,
    /// `setVar` bag; lives for one render call.
    vars: Map,
    partial_depth: usize,
    active: Arc<AtomicUsize>,
}

impl<'r> Renderer<'r> {
    pub fn new(
        helpers: &'r Helpers,
        partials: PartialRegistry<'r>,
        sink: &'r dyn LogSink,
        config: &'r Config,
        data: &'r Value,
        global: &'r Value,
    ) -> Self {
        Self {
            helpers,
            partials,
            sink,
            config,
            global,
            scope: Scope::new(data),
            vars: Map::new(),
            partial_depth: 0,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn render(mut self, nodes: &'r [Node]) -> String {
        let mut out = String::new();
        self.render_nodes(nodes, &mut out);
        out
    }

    fn render_nodes(&mut self, nodes: &'r [Node], out: &mut String) {
        for node in nodes {
            match node {
                Node::Text(text) | Node::Raw(text) => out.push_str(text),
                Node::Var { path, encode } => match self.resolve(path) {
                    Ok(value) => {
                        let text = value.render();
                        if *encode {
                            out.push_str(&html_escape::encode_text(&text));
                        } else {
                            out.push_str(&text);
                        }
                    }
                    Err(err) => self.diagnostic(&path.name, &err),
                },
                Node::Section {
                    path,
                    negated,
                    children,
                } => self.section(path, *negated, children, out),
                Node::Partial(name) => {
                    if let Err(err) = self.partial(name, out) {
                        self.diagnostic(name, &err);
                    }
                }
                Node::PartialDecl { .. } => {}
            }
        }
    }

    fn section(&mut self, path: &'r Path, negated: bool, children: &'r [Node], out: &mut String) {
        let value = self.resolve(path).unwrap_or_else(|err| {
            self.diagnostic(&path.name, &err);
            Cow::Owned(Value::Undefined)
        });

        if negated {
            if !value.is_truthy() {
                self.scoped(Frame::new(value), children, out);
            }
            return;
        }

        match value {
            Cow::Borrowed(Value::Array(items)) => {
                self.rows(items.iter().map(Cow::Borrowed), children, out)
            }
            Cow::Owned(Value::Array(items)) => {
                self.rows(items.into_iter().map(Cow::Owned), children, out)
            }
            value if value.is_truthy() => self.scoped(Frame::new(value), children, out),
            _ => {}
        }
    }

    fn rows<I>(&mut self, rows: I, children: &'r [Node], out: &mut String)
    where
        I: ExactSizeIterator<Item = Cow<'r, Value>>,
    {
        let len = rows.len();
        tracing::trace!(len, "iterating section");
        for (index, row) in rows.enumerate() {
            self.scoped(Frame::row(row, Iteration::new(index, len)), children, out);
        }
    }

    fn scoped(&mut self, frame: Frame<'r>, children: &'r [Node], out: &mut String) {
        let limit = self.config.max_section_depth;
        if self.scope.depth() > limit {
            self.diagnostic("section", &EvalError::DepthExceeded(limit));
            return;
        }
        self.scope.push(frame);
        self.render_nodes(children, out);
        self.scope.pop();
    }

    fn partial(&mut self, name: &str, out: &mut String) -> Result<(), EvalError> {
        let Some(nodes) = self.partials.get(name) else {
            tracing::debug!(partial = name, "partial not found, rendering nothing");
            return Ok(());
        };
        if self.partial_depth >= self.config.max_partial_depth {
            return Err(EvalError::DepthExceeded(self.config.max_partial_depth));
        }
        self.partial_depth += 1;
        self.render_nodes(nodes, out);
        self.partial_depth -= 1;
        Ok(())
    }

    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(Env {
            data: self.scope.data(),
            global: self.global,
            extra: self.scope.iteration(),
            vars: &self.vars,
            plugins: self.helpers.plugins(),
            locals: &[],
            active: &self.active,
            max_depth: self.config.max_call_depth,
        })
    }

    fn resolve(&mut self, path: &'r Path) -> Result<Cow<'r, Value>, EvalError> {
        let undefined = || Cow::Owned(Value::Undefined);
        match path.origin {
            Origin::Scope => {
                let (head, this) = match self.scope.lookup(&path.name, path.backtrack) {
                    // The holder is only needed as the receiver of a direct call.
                    Some(found) if matches!(path.chain.first(), Some(Accessor::Call(_))) => {
                        (found.value, self.scope.holder(found.frame))
                    }
                    Some(found) => (found.value, undefined()),
                    None => {
                        tracing::trace!(name = %path.name, backtrack = path.backtrack, "unresolved");
                        (undefined(), undefined())
                    }
                };
                self.evaluator().apply_chain(&path.name, head, this, &path.chain)
            }
            Origin::Global => {
                let global = self.global;
                let head = global.member(&path.name).unwrap_or_else(undefined);
                self.evaluator()
                    .apply_chain(&path.name, head, Cow::Borrowed(global), &path.chain)
            }
            Origin::Iteration => {
                let head = self
                    .scope
                    .iteration_from(path.backtrack)
                    .and_then(|it| it.get(&path.name))
                    .unwrap_or_default();
                self.evaluator()
                    .apply_chain(&path.name, Cow::Owned(head), undefined(), &path.chain)
            }
            Origin::Helper => self.helper(path),
        }
    }

    fn helper(&mut self, path: &'r Path) -> Result<Cow<'r, Value>, EvalError> {
        let registry = self.helpers;
        let Some(helper) = registry.get(&path.name) else {
            return Err(EvalError::Undefined(format!("~{}", path.name)));
        };
        let none = || Cow::Owned(Value::Undefined);

        match helper {
            Helper::Builtin(Builtin::Var) => {
                let vars = Cow::Owned(Value::Object(self.vars.clone()));
                return self.evaluator().apply_chain(&path.name, vars, none(), &path.chain);
            }
            Helper::Builtin(Builtin::Plugins) => {
                let plugins = Cow::Borrowed(registry.plugins());
                return self.evaluator().apply_chain(&path.name, plugins, none(), &path.chain);
            }
            _ => {}
        }

        let (args, rest) = match path.chain.split_first() {
            Some((Accessor::Call(args), rest)) => (args, rest),
            Some((Accessor::Invalid(message), _)) => {
                return Err(EvalError::Syntax(message.clone()))
            }
            _ => {
                return Err(EvalError::Syntax(format!(
                    "helper `{}` must be called",
                    path.name
                )))
            }
        };

        let args = self.evaluator().eval_args(args)?;
        let result = match helper {
            Helper::Builtin(builtin) => helpers::invoke(*builtin, &args, self)?,
            Helper::Host(f) => f.call(&Value::Undefined, &args)?,
        };
        self.evaluator()
            .apply_chain(&path.name, Cow::Owned(result), none(), rest)
    }

    fn diagnostic(&self, tag: &str, err: &EvalError) {
        tracing::debug!(tag, error = %err, "tag rendered empty");
        self.sink.warn(&err.to_string());
    }
}

impl HelperHost for Renderer<'_> {
    fn set_var(&mut self, name: String, value: Value) {
        self.vars.insert(name, value);
    }

    fn render_partial(&mut self, name: &str) -> String {
        let mut out = String::new();
        if let Err(err) = self.partial(name, &mut out) {
            self.diagnostic(name, &err);
        }
        out
    }

    fn log(&mut self, values: &[Value]) {
        let values: Vec<_> = values
            .iter()
            .map(|v| v.to_json(self.config.max_log_depth))
            .collect();
        self.sink.log(&values);
    }
}
