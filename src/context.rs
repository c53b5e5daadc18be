use crate::value::{eq_folded, member_of, Map, Value};
use std::borrow::Cow;

/// Position of a frame within the array it was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iteration {
    /// 1-based row.
    pub row: usize,
    pub len: usize,
}

impl Iteration {
    pub const FIELDS: [&'static str; 5] = ["row", "first", "last", "even", "odd"];

    pub fn new(index: usize, len: usize) -> Self {
        Self {
            row: index + 1,
            len,
        }
    }

    pub fn first(&self) -> bool {
        self.row == 1
    }

    pub fn last(&self) -> bool {
        self.row == self.len
    }

    pub fn even(&self) -> bool {
        self.row % 2 == 0
    }

    pub fn odd(&self) -> bool {
        self.row % 2 == 1
    }

    /// Case-insensitive field lookup.
    pub fn get(&self, name: &str) -> Option<Value> {
        let field = Self::FIELDS.iter().find(|f| eq_folded(f, name))?;
        Some(match *field {
            "row" => Value::from(self.row),
            "first" => Value::Bool(self.first()),
            "last" => Value::Bool(self.last()),
            "even" => Value::Bool(self.even()),
            _ => Value::Bool(self.odd()),
        })
    }

    pub fn to_value(&self) -> Value {
        Value::Object(
            Self::FIELDS
                .iter()
                .filter_map(|f| self.get(f).map(|v| (f.to_string(), v)))
                .collect::<Map>(),
        )
    }
}

/// One level of the scope stack.
#[derive(Debug, Clone)]
pub struct Frame<'a> {
    pub value: Cow<'a, Value>,
    pub iteration: Option<Iteration>,
}

impl<'a> Frame<'a> {
    pub fn new(value: Cow<'a, Value>) -> Self {
        Self {
            value,
            iteration: None,
        }
    }

    pub fn row(value: Cow<'a, Value>, iteration: Iteration) -> Self {
        Self {
            value,
            iteration: Some(iteration),
        }
    }
}

/// A name found on the stack and the index of the frame that held it.
#[derive(Debug)]
pub struct Found<'a> {
    pub value: Cow<'a, Value>,
    pub frame: usize,
}

#[derive(Debug)]
pub struct Scope<'a> {
    frames: Vec<Frame<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new(root: &'a Value) -> Self {
        Self {
            frames: vec![Frame::new(Cow::Borrowed(root))],
        }
    }

    pub fn push(&mut self, frame: Frame<'a>) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Number of frames, counting the data root.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Value of the innermost frame.
    pub fn data(&self) -> &Value {
        // The root frame is never popped.
        self.frames.last().map(|f| f.value.as_ref()).unwrap_or(&Value::Undefined)
    }

    /// Iteration metadata of the nearest array row.
    pub fn iteration(&self) -> Option<Iteration> {
        self.iteration_from(0)
    }

    /// Like [`Scope::iteration`], skipping the innermost `backtrack` frames.
    pub fn iteration_from(&self, backtrack: usize) -> Option<Iteration> {
        let start = self.frames.len().checked_sub(backtrack)?;
        self.frames[..start].iter().rev().find_map(|f| f.iteration)
    }

    /// Resolve the first segment of a path. Starts `backtrack` frames out from
    /// the innermost one, then keeps walking outward until some frame has the
    /// name. Only frames whose values are objects or arrays can match.
    pub fn lookup(&self, name: &str, backtrack: usize) -> Option<Found<'a>> {
        if backtrack >= self.frames.len() {
            return None;
        }
        let start = self.frames.len() - backtrack;
        self.frames[..start]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, frame)| {
                member_of(&frame.value, name).map(|value| Found {
                    value,
                    frame: index,
                })
            })
    }

    /// Value of the frame at `index`, used as the receiver of a root call.
    pub fn holder(&self, index: usize) -> Cow<'a, Value> {
        self.frames
            .get(index)
            .map(|f| f.value.clone())
            .unwrap_or(Cow::Owned(Value::Undefined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row_values(len: usize) -> Vec<(usize, bool, bool, bool, bool)> {
        (0..len)
            .map(|i| {
                let it = Iteration::new(i, len);
                (it.row, it.first(), it.last(), it.even(), it.odd())
            })
            .collect()
    }

    #[test]
    fn iteration_flags() {
        assert_eq!(
            row_values(3),
            vec![
                (1, true, false, false, true),
                (2, false, false, true, false),
                (3, false, true, false, true),
            ]
        );
        assert_eq!(row_values(1), vec![(1, true, true, false, true)]);
    }

    #[test]
    fn iteration_fields_ignore_case() {
        let it = Iteration::new(0, 2);
        assert_eq!(it.get("FiRst"), Some(Value::Bool(true)));
        assert_eq!(it.get("ROW"), Some(Value::from(1)));
        assert_eq!(it.get("index"), None);
        assert_eq!(
            it.to_value(),
            Value::from(json!({ "row": 1, "first": true, "last": false, "even": false, "odd": true }))
        );
    }

    #[test]
    fn lookup_walks_outward() {
        let root = Value::from(json!({ "outer": "o", "shared": "root" }));
        let inner = Value::from(json!({ "shared": "inner" }));
        let mut scope = Scope::new(&root);
        scope.push(Frame::new(Cow::Borrowed(&inner)));

        assert_eq!(scope.lookup("shared", 0).unwrap().value.as_ref(), &Value::from("inner"));
        assert_eq!(scope.lookup("outer", 0).unwrap().value.as_ref(), &Value::from("o"));
        assert_eq!(scope.lookup("shared", 1).unwrap().value.as_ref(), &Value::from("root"));
        assert!(scope.lookup("shared", 2).is_none());
        assert!(scope.lookup("missing", 0).is_none());

        let found = scope.lookup("outer", 0).unwrap();
        assert_eq!(found.frame, 0);
        assert_eq!(scope.holder(found.frame).as_ref(), &root);
    }

    #[test]
    fn scalar_frames_are_skipped() {
        let root = Value::from(json!({ "name": "root" }));
        let row = Value::from(5);
        let mut scope = Scope::new(&root);
        scope.push(Frame::row(Cow::Borrowed(&row), Iteration::new(0, 1)));

        assert_eq!(scope.lookup("name", 0).unwrap().value.as_ref(), &Value::from("root"));
        assert_eq!(scope.data(), &Value::from(5));
        assert_eq!(scope.iteration(), Some(Iteration::new(0, 1)));
        scope.pop();
        assert_eq!(scope.iteration(), None);
        assert_eq!(scope.depth(), 1);
    }

    #[test]
    fn root_frame_is_never_popped() {
        let root = Value::from(json!({ "a": 1 }));
        let mut scope = Scope::new(&root);
        scope.pop();
        assert_eq!(scope.depth(), 1);
        assert_eq!(scope.data(), &root);
    }
}
