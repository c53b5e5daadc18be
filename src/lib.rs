//! goatee: a mustache-flavoured template engine with scoped lookups,
//! partials and a small, sandboxed call language.
//!
//! Tags:
//! - `{{name}}`, `{{%name}}`: output, raw or HTML-encoded.
//! - `{{:name}}...{{/name}}` (or `{{#name}}`): render the body when the value
//!   is truthy, once per element for arrays.
//! - `{{!name}}...{{/}}`: render the body when the value is falsy.
//! - `{{>name}}`: include a partial; `{{+name}}...{{/name}}` declares one.
//! - `{{$}}...{{/}}`: emit the body untouched.
//!
//! Paths take prefixes: each `-` starts the lookup one scope further out,
//! `*` reads the global context, `@` reads iteration metadata (`row`,
//! `first`, `last`, `even`, `odd`) and `~` calls a helper
//! (`equal`, `contains`, `setVar`, `var`, `exec`, `partial`, `log`,
//! `plugins`). Keys match exact case first, then case-insensitively.
//!
//! A path may end in member accesses and calls, e.g.
//! `{{foo(2).bar({ "k": [1, true] }).baz}}`. Arguments are evaluated by a
//! tree-walking interpreter that only sees `data`, `global`, `extra`, `var`
//! and `helpers`.
//!
//! Failure model:
//! - Unbalanced or malformed tags are an [`Error`] and nothing is rendered.
//! - Anything else (missing keys, bad arguments, failing host functions)
//!   renders the tag as the empty string and reports through the engine's
//!   [`LogSink`].
//!
//! ```
//! use goatee::Value;
//! use serde_json::json;
//!
//! let data = Value::from(json!({ "items": [{ "name": "a" }, { "name": "b" }] }));
//! let out = goatee::fill("{{#items}}{{@row}}={{name}} {{/items}}", &data).unwrap();
//! assert_eq!(out, "1=a 2=b ");
//! ```

mod ast;
mod config;
mod context;
mod error;
mod eval;
mod expr;
mod helpers;
mod lexer;
mod parser;
mod partials;
mod render;
mod sink;
mod value;

pub use config::Config;
pub use error::{CallError, Error, EvalError, Location};
pub use partials::Partials;
pub use sink::{LogSink, MemorySink, TracingSink};
pub use value::{Function, Map, Value};

use ast::Node;
use helpers::Helpers;
use partials::PartialRegistry;
use render::Renderer;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A parsed template. Cheap to clone and safe to share across threads.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Arc<[Node]>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, Error> {
        Ok(Self {
            nodes: parser::parse(source)?.into(),
        })
    }
}

/// Helpers, plugins and engine-wide partials plus the sink diagnostics go to.
///
/// An engine is immutable while rendering, so one instance can serve
/// concurrent renders; each render call gets its own variable bag.
pub struct Engine {
    helpers: Helpers,
    partials: Partials,
    sink: Arc<dyn LogSink>,
    config: Config,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("helpers", &self.helpers)
            .field("partials", &self.partials)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            helpers: Helpers::new(),
            partials: Partials::new(),
            sink: Arc::new(TracingSink),
            config,
        }
    }

    /// Replace the sink that receives `log` output and diagnostics.
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Make `methods` callable as `{{~plugins.<name>.<method>(...)}}`.
    pub fn add_plugin<K, I>(&mut self, name: impl Into<String>, methods: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Function)>,
    {
        self.helpers.add_plugin(name, methods);
    }

    /// Make `f` callable as `{{~name(...)}}`. A helper registered under a
    /// built-in's exact name replaces it.
    pub fn add_helper(&mut self, name: impl Into<String>, f: Function) {
        self.helpers.add_helper(name, f);
    }

    /// Engine-wide partial, consulted after declared and per-call partials.
    pub fn add_partial(&mut self, name: impl Into<String>, source: &str) -> Result<(), Error> {
        self.partials.insert(name, source)
    }

    pub fn compile(&self, source: &str) -> Result<Template, Error> {
        Template::parse(source)
    }

    /// Render a compiled template. `global` defaults to `data`.
    pub fn render(
        &self,
        template: &Template,
        data: &Value,
        partials: Option<&Partials>,
        global: Option<&Value>,
    ) -> String {
        let nodes = &template.nodes[..];
        let registry = PartialRegistry::build(nodes, partials, &self.partials);
        let renderer = Renderer::new(
            &self.helpers,
            registry,
            self.sink.as_ref(),
            &self.config,
            data,
            global.unwrap_or(data),
        );
        renderer.render(nodes)
    }

    /// Parse and render in one step.
    pub fn fill(
        &self,
        source: &str,
        data: &Value,
        partials: Option<&Partials>,
        global: Option<&Value>,
    ) -> Result<String, Error> {
        let template = self.compile(source)?;
        Ok(self.render(&template, data, partials, global))
    }
}

fn default_engine() -> &'static Engine {
    static ENGINE: OnceLock<Engine> = OnceLock::new();
    ENGINE.get_or_init(Engine::new)
}

/// Render `source` against `data` with the default engine.
pub fn fill(source: &str, data: &Value) -> Result<String, Error> {
    default_engine().fill(source, data, None, None)
}

/// [`fill`] with per-call partials and an explicit global context.
pub fn fill_with(
    source: &str,
    data: &Value,
    partials: Option<&Partials>,
    global: Option<&Value>,
) -> Result<String, Error> {
    default_engine().fill(source, data, partials, global)
}
