use crate::error::EvalError;
use crate::value::{format_number, lookup_folded, Function, Map, Value};
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Equal,
    Contains,
    SetVar,
    Exec,
    Partial,
    Log,
    /// `var.<name>`: the per-render variable bag.
    Var,
    /// `plugins.<namespace>.<method>`.
    Plugins,
}

impl Builtin {
    pub const ALL: [Builtin; 8] = [
        Builtin::Equal,
        Builtin::Contains,
        Builtin::SetVar,
        Builtin::Exec,
        Builtin::Partial,
        Builtin::Log,
        Builtin::Var,
        Builtin::Plugins,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Equal => "equal",
            Builtin::Contains => "contains",
            Builtin::SetVar => "setVar",
            Builtin::Exec => "exec",
            Builtin::Partial => "partial",
            Builtin::Log => "log",
            Builtin::Var => "var",
            Builtin::Plugins => "plugins",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Helper {
    Builtin(Builtin),
    Host(Function),
}

/// Render-time services the stateful built-ins need.
pub trait HelperHost {
    fn set_var(&mut self, name: String, value: Value);
    fn render_partial(&mut self, name: &str) -> String;
    fn log(&mut self, values: &[Value]);
}

#[derive(Debug, Clone)]
pub struct Helpers {
    entries: IndexMap<String, Helper>,
    plugins: Value,
}

impl Default for Helpers {
    fn default() -> Self {
        Self::new()
    }
}

impl Helpers {
    pub fn new() -> Self {
        let entries = Builtin::ALL
            .iter()
            .map(|b| (b.name().to_string(), Helper::Builtin(*b)))
            .collect();
        Self {
            entries,
            plugins: Value::Object(Map::new()),
        }
    }

    /// Exact name first, then the first case-insensitive match.
    pub fn get(&self, name: &str) -> Option<&Helper> {
        lookup_folded(&self.entries, name)
    }

    pub fn add_helper(&mut self, name: impl Into<String>, f: Function) {
        self.entries.insert(name.into(), Helper::Host(f));
    }

    /// Attach `methods` under `plugins.<name>`. Adding to an existing
    /// namespace merges, replacing methods of the same name.
    pub fn add_plugin<K, I>(&mut self, name: impl Into<String>, methods: I)
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Function)>,
    {
        let Value::Object(namespaces) = &mut self.plugins else {
            return;
        };
        let namespace = namespaces
            .entry(name.into())
            .or_insert_with(|| Value::Object(Map::new()));
        if !matches!(namespace, Value::Object(_)) {
            *namespace = Value::Object(Map::new());
        }
        if let Value::Object(map) = namespace {
            for (method, f) in methods {
                map.insert(method.into(), Value::Function(f));
            }
        }
    }

    /// All plugin namespaces as one object.
    pub fn plugins(&self) -> &Value {
        &self.plugins
    }
}

/// Run a call-style built-in on already evaluated arguments.
pub fn invoke(
    builtin: Builtin,
    args: &[Value],
    host: &mut dyn HelperHost,
) -> Result<Value, EvalError> {
    match builtin {
        Builtin::Equal => Ok(equal(args)),
        Builtin::Contains => Ok(contains(args)),
        Builtin::SetVar => {
            if let Some(name) = args.first().and_then(var_name) {
                host.set_var(name, args.get(1).cloned().unwrap_or_default());
            }
            Ok(Value::Undefined)
        }
        Builtin::Exec => match args.first() {
            Some(Value::Function(f)) => Ok(f.call(&Value::Undefined, &[])?),
            Some(other) => Ok(other.clone()),
            None => Ok(Value::Undefined),
        },
        Builtin::Partial => match args.first().and_then(Value::as_str) {
            Some(name) => Ok(Value::String(host.render_partial(name))),
            None => Ok(Value::Undefined),
        },
        Builtin::Log => {
            host.log(args);
            Ok(Value::Undefined)
        }
        Builtin::Var | Builtin::Plugins => Ok(Value::Undefined),
    }
}

/// `equal(a, b)`: strict structural equality. Missing operands are undefined.
pub fn equal(args: &[Value]) -> Value {
    let a = args.first().unwrap_or(&Value::Undefined);
    let b = args.get(1).unwrap_or(&Value::Undefined);
    Value::Bool(a == b)
}

/// `contains(collection, item)`: array membership, or case-sensitive
/// substring test when both sides are strings. Anything else is `false`.
pub fn contains(args: &[Value]) -> Value {
    let found = match (args.first(), args.get(1)) {
        (Some(Value::Array(items)), Some(item)) => items.contains(item),
        (Some(Value::String(haystack)), Some(Value::String(needle))) => {
            haystack.contains(needle.as_str())
        }
        _ => false,
    };
    Value::Bool(found)
}

fn var_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(format_number(*n)),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CallError;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        vars: Map,
        logged: Vec<Vec<Value>>,
    }

    impl HelperHost for Recorder {
        fn set_var(&mut self, name: String, value: Value) {
            self.vars.insert(name, value);
        }

        fn render_partial(&mut self, name: &str) -> String {
            format!("<{name}>")
        }

        fn log(&mut self, values: &[Value]) {
            self.logged.push(values.to_vec());
        }
    }

    #[test]
    fn equal_is_strict() {
        assert_eq!(equal(&[Value::from(1), Value::from(1)]), Value::Bool(true));
        assert_eq!(equal(&[Value::from(1), Value::from("1")]), Value::Bool(false));
        assert_eq!(equal(&[Value::Undefined, Value::from(3)]), Value::Bool(false));
        assert_eq!(equal(&[]), Value::Bool(true));
    }

    #[test]
    fn contains_handles_arrays_strings_and_junk() {
        let list = Value::from(json!([1, 2, 3]));
        assert_eq!(contains(&[list.clone(), Value::from(2)]), Value::Bool(true));
        assert_eq!(contains(&[list, Value::from(4)]), Value::Bool(false));
        assert_eq!(contains(&[Value::from("foo"), Value::from("f")]), Value::Bool(true));
        assert_eq!(contains(&[Value::from("foo"), Value::from("F")]), Value::Bool(false));
        assert_eq!(contains(&[Value::from(5), Value::from(2)]), Value::Bool(false));
        assert_eq!(contains(&[Value::Undefined]), Value::Bool(false));
    }

    #[test]
    fn lookup_prefers_exact_case() {
        let mut helpers = Helpers::new();
        helpers.add_helper("SETVAR", Function::new(|_, _| Ok(Value::Null)));
        assert!(matches!(helpers.get("setvar"), Some(Helper::Builtin(Builtin::SetVar))));
        assert!(matches!(helpers.get("SETVAR"), Some(Helper::Host(_))));
        assert!(matches!(helpers.get("Equal"), Some(Helper::Builtin(Builtin::Equal))));
        assert!(helpers.get("nope").is_none());
    }

    #[test]
    fn plugins_merge_into_namespaces() {
        let mut helpers = Helpers::new();
        helpers.add_plugin("test", [("io", Function::new(|_, _| Ok(Value::from("a"))))]);
        helpers.add_plugin("test", [("other", Function::new(|_, _| Ok(Value::from("b"))))]);
        let ns = helpers.plugins().member("test").unwrap();
        assert!(ns.member("io").is_some());
        assert!(ns.member("other").is_some());
    }

    #[test]
    fn stateful_builtins_use_the_host() {
        let mut host = Recorder::default();
        invoke(Builtin::SetVar, &[Value::from("foo"), Value::from(1)], &mut host).unwrap();
        invoke(Builtin::SetVar, &[Value::Undefined, Value::from(2)], &mut host).unwrap();
        assert_eq!(host.vars.len(), 1);
        assert_eq!(host.vars["foo"], Value::from(1));

        let rendered = invoke(Builtin::Partial, &[Value::from("p")], &mut host).unwrap();
        assert_eq!(rendered, Value::from("<p>"));

        invoke(Builtin::Log, &[Value::from("x")], &mut host).unwrap();
        assert_eq!(host.logged, vec![vec![Value::from("x")]]);
    }

    #[test]
    fn exec_calls_functions_and_passes_values_through() {
        let mut host = Recorder::default();
        let f = Value::function(|_, _| Ok(Value::from("yes")));
        assert_eq!(invoke(Builtin::Exec, &[f], &mut host).unwrap(), Value::from("yes"));
        assert_eq!(
            invoke(Builtin::Exec, &[Value::from("foo")], &mut host).unwrap(),
            Value::from("foo")
        );

        let failing = Value::function(|_, _| Err(CallError::new("boom")));
        let err = invoke(Builtin::Exec, &[failing], &mut host).unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
