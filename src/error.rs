use std::fmt;
use thiserror::Error;

/// A position in template source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Byte offset of the tag's opening `{{`.
    pub offset: usize,
    /// 1-based line.
    pub line: usize,
    /// 1-based column, counted in characters.
    pub column: usize,
}

impl Location {
    pub(crate) fn in_source(source: &str, offset: usize) -> Self {
        let before = &source[..offset.min(source.len())];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;
        Self {
            offset,
            line,
            column,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// Structural template errors. Fatal to the parse or render call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("closing tag `/{name}` at {location} has no open block")]
    UnexpectedClose { name: String, location: Location },

    #[error("closing tag `/{found}` at {location} does not match `{expected}` opened at {opened}")]
    MismatchedClose {
        expected: String,
        found: String,
        location: Location,
        opened: Location,
    },

    #[error("block `{name}` opened at {location} is never closed")]
    Unclosed { name: String, location: Location },

    #[error("malformed tag `{tag}` at {location}: {reason}")]
    MalformedTag {
        tag: String,
        reason: String,
        location: Location,
    },
}

impl Error {
    /// Where in the source the problem was detected.
    pub fn location(&self) -> Location {
        match self {
            Error::UnexpectedClose { location, .. }
            | Error::MismatchedClose { location, .. }
            | Error::Unclosed { location, .. }
            | Error::MalformedTag { location, .. } => *location,
        }
    }
}

/// Failure raised by a host callable or a template-defined function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct CallError {
    message: String,
}

impl CallError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Recoverable evaluation failure of a single tag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("{0} is not defined")]
    Undefined(String),

    #[error("{0} is not a function")]
    NotCallable(String),

    #[error("{0}")]
    Syntax(String),

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("nesting limit of {0} exceeded")]
    DepthExceeded(usize),
}

impl From<EvalError> for CallError {
    fn from(err: EvalError) -> Self {
        match err {
            EvalError::Call(inner) => inner,
            other => CallError::new(other.to_string()),
        }
    }
}
