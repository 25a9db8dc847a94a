pub mod builder;
pub mod context;
pub mod instruction;
pub mod loader;
pub mod phrase;
pub mod registry;
pub mod sequencer;
pub mod word;

pub use builder::{CompileError, GrammarBuilder, PhraseDecl};
pub use context::{Context, Value};
pub use instruction::{Count, Guard, Weight, DEFAULT_WEIGHT};
pub use loader::{load_grammar_file, load_grammar_str, LoadError};
pub use phrase::Phrase;
pub use registry::GrammarRegistry;
pub use sequencer::{Hook, RunOptions, RunResult, SequenceError, Sequencer, SpokenUnit};
pub use word::{WordFn, WordSource};
