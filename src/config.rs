use serde::Deserialize;

/// Limits applied while rendering. Every bound turns into a diagnostic and
/// empty output for the offending tag, never a panic.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How deeply partials may include other partials.
    pub max_partial_depth: usize,
    /// How many sections may be open at once, counted across partials.
    pub max_section_depth: usize,
    /// How many template-defined functions may be executing at once.
    pub max_call_depth: usize,
    /// Nesting kept when values are serialized for the log sink.
    pub max_log_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_partial_depth: 32,
            max_section_depth: 128,
            max_call_depth: 64,
            max_log_depth: 32,
        }
    }
}
