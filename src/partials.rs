use crate::ast::Node;
use crate::error::Error;
use crate::parser::parse;
use crate::value::fold;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;

/// Parsed partial sources keyed by name.
#[derive(Debug, Clone, Default)]
pub struct Partials {
    entries: IndexMap<String, Arc<[Node]>>,
}

impl Partials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `source` and store it under `name`, replacing any partial with
    /// exactly the same name.
    pub fn insert(&mut self, name: impl Into<String>, source: &str) -> Result<(), Error> {
        let nodes = parse(source)?;
        self.entries.insert(name.into(), nodes.into());
        Ok(())
    }

    /// Builder form of [`Partials::insert`].
    pub fn with(mut self, name: impl Into<String>, source: &str) -> Result<Self, Error> {
        self.insert(name, source)?;
        Ok(self)
    }

    /// Parse every `(name, source)` pair. Stops at the first structural error.
    pub fn from_sources<K, S, I>(sources: I) -> Result<Self, Error>
    where
        K: Into<String>,
        S: AsRef<str>,
        I: IntoIterator<Item = (K, S)>,
    {
        sources
            .into_iter()
            .try_fold(Self::new(), |partials, (name, source)| {
                partials.with(name, source.as_ref())
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &[Node])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_ref()))
    }
}

/// Partials visible to one render call.
pub(crate) struct PartialRegistry<'t> {
    by_folded: HashMap<String, Vec<(&'t str, &'t [Node])>>,
}

impl<'t> PartialRegistry<'t> {
    pub fn build(template: &'t [Node], per_call: Option<&'t Partials>, engine: &'t Partials) -> Self {
        let mut registry = Self {
            by_folded: HashMap::new(),
        };
        registry.declare_all(template);
        for (name, nodes) in per_call.into_iter().flat_map(Partials::iter) {
            registry.add(name, nodes);
        }
        for (name, nodes) in engine.iter() {
            registry.add(name, nodes);
        }
        registry
    }

    /// Exact name first, anywhere in the registry; otherwise the first
    /// case-insensitive match in precedence order.
    pub fn get(&self, name: &str) -> Option<&'t [Node]> {
        let candidates = self.by_folded.get(&fold(name))?;
        candidates
            .iter()
            .find(|(exact, _)| *exact == name)
            .or_else(|| candidates.first())
            .map(|(_, nodes)| *nodes)
    }

    fn add(&mut self, name: &'t str, nodes: &'t [Node]) {
        self.by_folded
            .entry(fold(name))
            .or_default()
            .push((name, nodes));
    }

    /// Register every `{{+name}}` block, including ones nested in sections
    /// or in other declarations. Raw blocks hold no nodes and are skipped.
    fn declare_all(&mut self, nodes: &'t [Node]) {
        for node in nodes {
            match node {
                Node::PartialDecl { name, children } => {
                    self.add(name, children);
                    self.declare_all(children);
                }
                Node::Section { children, .. } => self.declare_all(children),
                Node::Text(_) | Node::Var { .. } | Node::Partial(_) | Node::Raw(_) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(nodes: Option<&[Node]>) -> Option<String> {
        match nodes? {
            [Node::Text(t)] => Some(t.clone()),
            _ => None,
        }
    }

    #[test]
    fn exact_case_wins_over_order() {
        let per_call = Partials::from_sources([("foo", "a"), ("foO", "b"), ("FoO", "c")]).unwrap();
        let engine = Partials::new();
        let registry = PartialRegistry::build(&[], Some(&per_call), &engine);

        assert_eq!(text_of(registry.get("FoO")), Some("c".into()));
        assert_eq!(text_of(registry.get("foO")), Some("b".into()));
        assert_eq!(text_of(registry.get("FOO")), Some("a".into()));
        assert!(registry.get("bar").is_none());
    }

    #[test]
    fn declared_beat_per_call_beat_engine() {
        let template = parse("{{:x}}{{+foo}}declared{{/foo}}{{/x}}").unwrap();
        let per_call = Partials::new().with("foo", "call").unwrap().with("bar", "call").unwrap();
        let engine = Partials::new()
            .with("foo", "engine")
            .unwrap()
            .with("bar", "engine")
            .unwrap()
            .with("baz", "engine")
            .unwrap();
        let registry = PartialRegistry::build(&template, Some(&per_call), &engine);

        assert_eq!(text_of(registry.get("foo")), Some("declared".into()));
        assert_eq!(text_of(registry.get("bar")), Some("call".into()));
        assert_eq!(text_of(registry.get("baz")), Some("engine".into()));
    }

    #[test]
    fn declarations_inside_raw_blocks_are_ignored() {
        let template = parse("{{$}}{{+foo}}x{{/foo}}{{/}}").unwrap();
        let engine = Partials::new();
        let registry = PartialRegistry::build(&template, None, &engine);
        assert!(registry.get("foo").is_none());
    }

    #[test]
    fn names_are_kept_verbatim() {
        let partials = Partials::from_sources([("Row", "a"), ("row", "b")]).unwrap();
        assert_eq!(partials.len(), 2);
        assert!(partials.contains("Row"));
        assert!(!partials.contains("ROW"));
        assert!(Partials::new().is_empty());
    }

    #[test]
    fn bad_partial_source_is_reported() {
        let err = Partials::new().with("broken", "{{:open}}").unwrap_err();
        assert!(matches!(err, Error::Unclosed { .. }));
    }
}
