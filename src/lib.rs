//! Sentence Engine — declarative sentence and phrase generation.
//!
//! Grammars are declared through a fluent builder (or loaded from RON
//! definitions) and compiled into immutable plans. Each run linearizes
//! the plan's phrases — honoring first/last directives, before/after
//! dependencies, and randomly spliced anywhere-phrases — while weighted
//! alternation, conditional guards, and repetition policies shape what
//! every phrase actually says.
//!
//! ```
//! use sentence_engine::{GrammarBuilder, RunOptions};
//!
//! let mut b = GrammarBuilder::new();
//! b.phrase("subject").say("the cat").say("a fox");
//! b.say("jumps").say("sneaks").weight(2);
//! b.last().say("away");
//! b.anywhere().say("quietly").before("subject");
//!
//! let grammar = b.compile().unwrap();
//! let result = grammar.run(RunOptions::seeded(42)).unwrap();
//! assert!(result.context.was_spoken("subject"));
//! assert!(!result.sentence().is_empty());
//! ```

pub mod core;

pub use crate::core::{
    load_grammar_file, load_grammar_str, CompileError, Context, Count, GrammarBuilder,
    GrammarRegistry, Guard, Hook, LoadError, PhraseDecl, RunOptions, RunResult, SequenceError,
    Sequencer, SpokenUnit, Value, Weight, WordSource,
};
