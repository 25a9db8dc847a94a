/// Word sources — the closed set of value kinds an instruction can speak,
/// and the resolver that flattens them into plain strings at run time.
use rand::rngs::StdRng;
use std::fmt;
use std::sync::Arc;

use crate::core::context::Context;
use crate::core::sequencer::{SequenceError, Sequencer};

/// A deferred word computation, evaluated against the live run context.
pub type WordFn = Arc<dyn Fn(&Context) -> WordSource + Send + Sync>;

/// One candidate source of words inside an instruction.
///
/// Resolution is lazy: nothing here is evaluated until the owning phrase
/// is asked to speak, so closures and sub-grammars can vary per run.
#[derive(Clone)]
pub enum WordSource {
    /// Literal text. The empty string contributes nothing.
    Literal(String),
    /// A closure producing another word source — possibly another closure.
    Lazy(WordFn),
    /// An ordered collection, flattened into the parent.
    List(Vec<WordSource>),
    /// A compiled grammar, fully evaluated under a child context.
    Grammar(Arc<Sequencer>),
}

impl WordSource {
    /// Wrap a closure as a lazy word source.
    pub fn lazy<F>(f: F) -> WordSource
    where
        F: Fn(&Context) -> WordSource + Send + Sync + 'static,
    {
        WordSource::Lazy(Arc::new(f))
    }

    /// Wrap a closure producing plain text.
    pub fn lazy_text<F>(f: F) -> WordSource
    where
        F: Fn(&Context) -> String + Send + Sync + 'static,
    {
        WordSource::Lazy(Arc::new(move |ctx| WordSource::Literal(f(ctx))))
    }

    /// Build a list source from anything convertible to word sources.
    pub fn list<I, T>(items: I) -> WordSource
    where
        I: IntoIterator<Item = T>,
        T: Into<WordSource>,
    {
        WordSource::List(items.into_iter().map(Into::into).collect())
    }
}

impl fmt::Debug for WordSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WordSource::Literal(s) => f.debug_tuple("Literal").field(s).finish(),
            WordSource::Lazy(_) => f.write_str("Lazy(<fn>)"),
            WordSource::List(items) => f.debug_tuple("List").field(items).finish(),
            WordSource::Grammar(g) => f
                .debug_tuple("Grammar")
                .field(&g.id().unwrap_or("<anonymous>"))
                .finish(),
        }
    }
}

impl From<&str> for WordSource {
    fn from(s: &str) -> Self {
        WordSource::Literal(s.to_string())
    }
}

impl From<String> for WordSource {
    fn from(s: String) -> Self {
        WordSource::Literal(s)
    }
}

impl From<i32> for WordSource {
    fn from(n: i32) -> Self {
        WordSource::Literal(n.to_string())
    }
}

impl From<i64> for WordSource {
    fn from(n: i64) -> Self {
        WordSource::Literal(n.to_string())
    }
}

impl<T: Into<WordSource>> From<Vec<T>> for WordSource {
    fn from(items: Vec<T>) -> Self {
        WordSource::list(items)
    }
}

impl From<Sequencer> for WordSource {
    fn from(seq: Sequencer) -> Self {
        WordSource::Grammar(Arc::new(seq))
    }
}

impl From<Arc<Sequencer>> for WordSource {
    fn from(seq: Arc<Sequencer>) -> Self {
        WordSource::Grammar(seq)
    }
}

/// Resolve a word source into a flat list of non-empty strings.
///
/// Lazy sources are invoked (repeatedly, so a closure may hand back
/// another closure), lists are flattened recursively, and sub-grammars
/// run to completion under a fresh child context that is attached to
/// the current one for later inspection.
pub(crate) fn resolve(
    source: &WordSource,
    ctx: &mut Context,
    rng: &mut StdRng,
) -> Result<Vec<String>, SequenceError> {
    match source {
        WordSource::Literal(s) => {
            if s.is_empty() {
                Ok(Vec::new())
            } else {
                Ok(vec![s.clone()])
            }
        }
        WordSource::Lazy(f) => {
            let next = f(ctx);
            resolve(&next, ctx, rng)
        }
        WordSource::List(items) => {
            let mut words = Vec::new();
            for item in items {
                words.extend(resolve(item, ctx, rng)?);
            }
            Ok(words)
        }
        WordSource::Grammar(seq) => {
            let mut child = Context::new();
            let nodes = seq.execute(&mut child, rng)?;
            let words = nodes.into_iter().flat_map(|node| node.words).collect();
            ctx.add_child(child);
            Ok(words)
        }
    }
}
