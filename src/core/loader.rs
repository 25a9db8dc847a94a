/// Loading grammar definitions from RON.
///
/// A definition mirrors the builder surface declaratively:
///
/// ```ron
/// (
///     id: Some("greeting"),
///     phrases: [
///         (
///             id: Some("opener"),
///             alternatives: [
///                 (words: ["hello"], weight: Some(Fixed(3))),
///                 (words: ["why", "hello", "there"]),
///             ],
///         ),
///         (
///             position: Anywhere,
///             after: Some("opener"),
///             alternatives: [(words: ["{name}"])],
///         ),
///     ],
/// )
/// ```
///
/// A word written as `{name}` embeds the grammar registered under that
/// name in the supplied [`GrammarRegistry`].
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::core::builder::{CompileError, GrammarBuilder, PhraseDecl, Position};
use crate::core::registry::GrammarRegistry;
use crate::core::sequencer::Sequencer;
use crate::core::word::WordSource;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read grammar file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed grammar definition: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("reference to unregistered sub-grammar `{0}`")]
    UnknownSubGrammar(String),
}

#[derive(Debug, Deserialize)]
struct RonGrammar {
    #[serde(default)]
    id: Option<String>,
    phrases: Vec<RonPhrase>,
}

#[derive(Debug, Deserialize)]
struct RonPhrase {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    position: RonPosition,
    /// Anywhere-phrase bounds.
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    before: Option<String>,
    #[serde(default)]
    recur: Option<RonCount>,
    alternatives: Vec<RonAlternative>,
}

#[derive(Debug, Default, Deserialize)]
enum RonPosition {
    #[default]
    Normal,
    First,
    Last,
    Anywhere,
    Before(String),
    After(String),
}

#[derive(Debug, Deserialize)]
struct RonAlternative {
    #[serde(default)]
    words: Vec<String>,
    #[serde(default)]
    weight: Option<RonCount>,
    #[serde(default)]
    repeat: Option<RonCount>,
    /// Ids that must have spoken before this alternative may.
    #[serde(default)]
    requires: Vec<String>,
    /// Ids that must not have spoken.
    #[serde(default)]
    excludes: Vec<String>,
}

#[derive(Debug, Deserialize)]
enum RonCount {
    Fixed(u32),
    Range(u32, u32),
}

/// Parse a RON grammar definition and compile it, resolving `{name}`
/// words through the registry.
pub fn load_grammar_str(
    source: &str,
    registry: &GrammarRegistry,
) -> Result<Sequencer, LoadError> {
    let grammar: RonGrammar = ron::from_str(source)?;
    compile_grammar(grammar, registry)
}

/// Read, parse, and compile a RON grammar definition from disk.
pub fn load_grammar_file(
    path: impl AsRef<Path>,
    registry: &GrammarRegistry,
) -> Result<Sequencer, LoadError> {
    let source = fs::read_to_string(path)?;
    load_grammar_str(&source, registry)
}

fn compile_grammar(
    grammar: RonGrammar,
    registry: &GrammarRegistry,
) -> Result<Sequencer, LoadError> {
    let mut builder = match grammar.id {
        Some(id) => GrammarBuilder::named(id),
        None => GrammarBuilder::new(),
    };

    for phrase in grammar.phrases {
        let position = match phrase.position {
            RonPosition::Normal => Position::Normal,
            RonPosition::First => Position::First,
            RonPosition::Last => Position::Last,
            RonPosition::Anywhere => Position::Anywhere,
            RonPosition::Before(target) => Position::Before(target),
            RonPosition::After(target) => Position::After(target),
        };
        let decl = builder.declare(position);

        if let Some(id) = phrase.id {
            decl.with_id(id);
        }
        if let Some(bound) = phrase.after {
            decl.after(bound);
        }
        if let Some(bound) = phrase.before {
            decl.before(bound);
        }
        match phrase.recur {
            Some(RonCount::Fixed(n)) => {
                decl.recur(n);
            }
            Some(RonCount::Range(lo, hi)) => {
                decl.recur_range(lo, hi);
            }
            None => {}
        }

        for alternative in phrase.alternatives {
            add_alternative(decl, alternative, registry)?;
        }
    }

    Ok(builder.compile()?)
}

fn add_alternative(
    decl: &mut PhraseDecl,
    alternative: RonAlternative,
    registry: &GrammarRegistry,
) -> Result<(), LoadError> {
    let mut words = alternative.words.into_iter();
    match words.next() {
        Some(word) => {
            decl.say(word_source(&word, registry)?);
            for word in words {
                decl.and(word_source(&word, registry)?);
            }
        }
        None => {
            decl.nothing();
        }
    }

    match alternative.weight {
        Some(RonCount::Fixed(n)) => {
            decl.weight(n);
        }
        Some(RonCount::Range(lo, hi)) => {
            decl.weight_range(lo, hi);
        }
        None => {}
    }
    match alternative.repeat {
        Some(RonCount::Fixed(n)) => {
            decl.repeat(n);
        }
        Some(RonCount::Range(lo, hi)) => {
            decl.repeat_range(lo, hi);
        }
        None => {}
    }
    for id in alternative.requires {
        decl.if_spoken(id);
    }
    for id in alternative.excludes {
        decl.unless_spoken(id);
    }
    Ok(())
}

/// A `{name}` word is a sub-grammar reference; anything else is literal.
fn word_source(word: &str, registry: &GrammarRegistry) -> Result<WordSource, LoadError> {
    match word.strip_prefix('{').and_then(|rest| rest.strip_suffix('}')) {
        Some(name) => registry
            .get(name)
            .map(WordSource::Grammar)
            .ok_or_else(|| LoadError::UnknownSubGrammar(name.to_string())),
        None => Ok(WordSource::from(word)),
    }
}
