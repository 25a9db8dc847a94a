/// A named collection of compiled grammars.
///
/// Registered plans can be embedded into other grammars as word sources,
/// and grammar definitions loaded from files resolve their sub-grammar
/// references through a registry.
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::core::sequencer::Sequencer;

#[derive(Default)]
pub struct GrammarRegistry {
    grammars: FxHashMap<String, Arc<Sequencer>>,
}

impl GrammarRegistry {
    pub fn new() -> GrammarRegistry {
        GrammarRegistry::default()
    }

    /// Register a grammar under a name, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, grammar: impl Into<Arc<Sequencer>>) {
        self.grammars.insert(name.into(), grammar.into());
    }

    pub fn get(&self, name: &str) -> Option<Arc<Sequencer>> {
        self.grammars.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.grammars.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.grammars.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.grammars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grammars.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::GrammarBuilder;

    #[test]
    fn register_and_fetch() {
        let mut registry = GrammarRegistry::new();
        let mut b = GrammarBuilder::named("noun");
        b.say("cat");
        registry.register("noun", b.compile().unwrap());

        assert!(registry.contains("noun"));
        assert_eq!(registry.len(), 1);
        let grammar = registry.get("noun").unwrap();
        assert_eq!(grammar.words(1).unwrap(), vec!["cat"]);
        assert!(registry.get("verb").is_none());
    }

    #[test]
    fn reregistering_replaces() {
        let mut registry = GrammarRegistry::new();
        let mut b = GrammarBuilder::new();
        b.say("old");
        registry.register("g", b.compile().unwrap());
        let mut b = GrammarBuilder::new();
        b.say("new");
        registry.register("g", b.compile().unwrap());

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("g").unwrap().words(1).unwrap(), vec!["new"]);
    }
}
