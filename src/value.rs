use crate::error::CallError;
use indexmap::IndexMap;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

/// Insertion-ordered object map.
pub type Map = IndexMap<String, Value>;

type HostFn = dyn Fn(&Value, &[Value]) -> Result<Value, CallError> + Send + Sync;

/// A callable value: a host function bound into data or a plugin, or a
/// function literal written inside a template.
///
/// The first argument of the underlying closure is the receiver, i.e. the
/// object the function was read from (`Value::Undefined` for free calls).
#[derive(Clone)]
pub struct Function(Arc<HostFn>);

impl Function {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value, CallError> {
        (self.0)(this, args)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[function]")
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(Map),
    Function(Function),
}

impl Value {
    /// Build an object from `(key, value)` pairs.
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Wrap a host closure.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        Value::Function(Function::new(f))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(_) | Value::Function(_) => true,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    /// Invoke this value as a function.
    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value, CallError> {
        match self {
            Value::Function(f) => f.call(this, args),
            other => Err(CallError::new(format!(
                "{} is not a function",
                other.type_name()
            ))),
        }
    }

    /// Property or index lookup. Objects prefer an exact key and fall back to
    /// the first case-insensitive match; arrays take numeric indices and
    /// `length`. Anything else is not indexable.
    pub fn member(&self, key: &str) -> Option<Cow<'_, Value>> {
        match self {
            Value::Object(map) => lookup_folded(map, key).map(Cow::Borrowed),
            Value::Array(items) => {
                if key.eq_ignore_ascii_case("length") {
                    return Some(Cow::Owned(Value::Number(items.len() as f64)));
                }
                key.parse::<usize>()
                    .ok()
                    .and_then(|i| items.get(i))
                    .map(Cow::Borrowed)
            }
            _ => None,
        }
    }

    /// Text emitted for this value by a variable tag.
    pub fn render(&self) -> String {
        match self {
            Value::Undefined | Value::Null | Value::Object(_) | Value::Function(_) => {
                String::new()
            }
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .iter()
                .map(Value::render)
                .collect::<Vec<_>>()
                .join(","),
        }
    }

    /// Convert for the log sink. Functions and undefined become `null`
    /// (and are dropped from objects); anything nested deeper than
    /// `max_depth` is replaced by a marker string.
    pub fn to_json(&self, max_depth: usize) -> serde_json::Value {
        self.to_json_at(0, max_depth)
    }

    fn to_json_at(&self, depth: usize, max_depth: usize) -> serde_json::Value {
        use serde_json::Value as Json;

        if depth > max_depth {
            return Json::String("[depth limit]".to_string());
        }
        match self {
            Value::Undefined | Value::Null | Value::Function(_) => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9e15 => Json::from(*n as i64),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(
                items
                    .iter()
                    .map(|v| v.to_json_at(depth + 1, max_depth))
                    .collect(),
            ),
            Value::Object(map) => Json::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, Value::Undefined | Value::Function(_)))
                    .map(|(k, v)| (k.clone(), v.to_json_at(depth + 1, max_depth)))
                    .collect(),
            ),
        }
    }
}

/// Descend one member from a possibly-borrowed value, keeping the borrow
/// when there is one.
pub(crate) fn member_of<'v>(value: &Cow<'v, Value>, key: &str) -> Option<Cow<'v, Value>> {
    match value {
        Cow::Borrowed(v) => v.member(key),
        Cow::Owned(v) => v.member(key).map(|m| Cow::Owned(m.into_owned())),
    }
}

/// Exact key first, then the first case-insensitive match.
pub(crate) fn lookup_folded<'m, V>(map: &'m IndexMap<String, V>, key: &str) -> Option<&'m V> {
    map.get(key).or_else(|| {
        map.iter()
            .find(|(k, _)| eq_folded(k, key))
            .map(|(_, v)| v)
    })
}

pub(crate) fn eq_folded(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

pub(crate) fn fold(name: &str) -> String {
    name.chars().flat_map(char::to_lowercase).collect()
}

pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Value::Object(map)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_follows_emptiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::Array(vec![]).is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(Value::from("no").is_truthy());
        assert!(Value::Object(Map::new()).is_truthy());
    }

    #[test]
    fn numbers_render_without_trailing_zero() {
        assert_eq!(Value::from(3).render(), "3");
        assert_eq!(Value::from(1.5).render(), "1.5");
        assert_eq!(Value::from(-2.0).render(), "-2");
        assert_eq!(Value::from(f64::NAN).render(), "NaN");
    }

    #[test]
    fn arrays_render_comma_joined() {
        let v = Value::from(json!([1, "a", true, null]));
        assert_eq!(v.render(), "1,a,true,");
    }

    #[test]
    fn member_prefers_exact_case() {
        let v = Value::from(json!({ "foo": "no", "FoO": "yes" }));
        assert_eq!(v.member("FoO").unwrap().as_ref(), &Value::from("yes"));
        assert_eq!(v.member("FOO").unwrap().as_ref(), &Value::from("no"));
    }

    #[test]
    fn array_members_are_indices_and_length() {
        let v = Value::from(json!([1, { "foo": "yes" }, 3]));
        assert_eq!(v.member("length").unwrap().as_ref(), &Value::from(3));
        assert_eq!(
            v.member("1").unwrap().member("foo").unwrap().as_ref(),
            &Value::from("yes")
        );
        assert!(v.member("7").is_none());
    }

    #[test]
    fn scalars_are_not_indexable() {
        assert!(Value::from("abc").member("length").is_none());
        assert!(Value::from(5).member("x").is_none());
        assert!(Value::Undefined.member("x").is_none());
    }

    #[test]
    fn json_conversion_drops_functions_and_bounds_depth() {
        let v = Value::object([
            ("a", Value::from("a")),
            ("f", Value::function(|_, _| Ok(Value::Null))),
            ("deep", Value::from(json!({ "x": { "y": 1 } }))),
        ]);
        assert_eq!(
            v.to_json(8),
            json!({ "a": "a", "deep": { "x": { "y": 1 } } })
        );
        assert_eq!(
            v.to_json(1),
            json!({ "a": "a", "deep": { "x": "[depth limit]" } })
        );
    }

    #[test]
    fn functions_compare_by_identity() {
        let f = Function::new(|_, _| Ok(Value::Null));
        let g = Function::new(|_, _| Ok(Value::Null));
        assert_eq!(Value::Function(f.clone()), Value::Function(f));
        assert_ne!(
            Value::Function(g),
            Value::Function(Function::new(|_, _| Ok(Value::Null)))
        );
    }
}
