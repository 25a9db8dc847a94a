/// The sequencer — compiled generation plans and the run algorithm that
/// linearizes phrases, resolves dependencies, and splices anywhere-phrases.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::core::context::{Context, RecurState, Value};
use crate::core::phrase::Phrase;

#[derive(Debug, Error)]
pub enum SequenceError {
    /// An anywhere-phrase window resolved with its lower bound past its
    /// upper bound while both bounds were present in the sequence.
    #[error("bounding failure between after({after}) and before({before})")]
    BoundingConflict { after: String, before: String },
    /// A splice slot fell outside the live sequence. Indicates an
    /// internal bookkeeping bug rather than a caller error.
    #[error("no node at splice position {0}")]
    SpliceSlot(usize),
}

/// A callback given mutable access to the run context, used for setup,
/// teardown, and pre-run hooks.
pub type Hook = Arc<dyn Fn(&mut Context) + Send + Sync>;

/// An anywhere-phrase together with its positional bounds.
#[derive(Clone, Debug)]
pub(crate) struct AnytimeEntry {
    pub(crate) phrase: usize,
    pub(crate) after: Option<String>,
    pub(crate) before: Option<String>,
}

/// One evaluated phrase in the linear sequence.
pub(crate) struct SpokenNode {
    pub(crate) phrase: usize,
    pub(crate) words: Vec<String>,
}

/// One element of a run's linear output: the phrase id (when it has one)
/// and the words it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SpokenUnit {
    pub phrase: Option<String>,
    pub words: Vec<String>,
}

/// Everything a generation run produces.
pub struct RunResult {
    /// The flattened output words, in final order.
    pub words: Vec<String>,
    /// The linear (phrase, words) sequence behind `words`.
    pub sequence: Vec<SpokenUnit>,
    /// The run's context, for introspection.
    pub context: Context,
}

impl std::fmt::Debug for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunResult")
            .field("words", &self.words)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl RunResult {
    /// The output joined with single spaces.
    pub fn sentence(&self) -> String {
        self.words.join(" ")
    }
}

/// Options for one generation run.
#[derive(Default)]
pub struct RunOptions {
    seed: Option<u64>,
    data: FxHashMap<String, Value>,
    pre_hook: Option<Hook>,
}

impl RunOptions {
    pub fn new() -> RunOptions {
        RunOptions::default()
    }

    /// Seed the run's RNG for reproducible output.
    pub fn seeded(seed: u64) -> RunOptions {
        RunOptions {
            seed: Some(seed),
            ..RunOptions::default()
        }
    }

    pub fn seed(mut self, seed: u64) -> RunOptions {
        self.seed = Some(seed);
        self
    }

    /// Attach a caller data entry, visible to guards and lazy words.
    pub fn data(mut self, key: impl Into<String>, value: impl Into<Value>) -> RunOptions {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Invoke a callback with the fresh context before any phrase runs.
    pub fn pre_hook<F>(mut self, f: F) -> RunOptions
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.pre_hook = Some(Arc::new(f));
        self
    }
}

/// A compiled, immutable generation plan.
///
/// Built by [`GrammarBuilder::compile`](crate::core::builder::GrammarBuilder::compile).
/// A `Sequencer` holds no per-run state, so separate runs may execute
/// concurrently against one plan.
pub struct Sequencer {
    pub(crate) id: Option<String>,
    pub(crate) phrases: Vec<Phrase>,
    /// Top-level phrase order, with first/last directives applied.
    pub(crate) steps: Vec<usize>,
    /// Before-dependents per target id, in declaration order.
    pub(crate) befores: FxHashMap<String, Vec<usize>>,
    /// After-dependents per target id, in declaration order.
    pub(crate) afters: FxHashMap<String, Vec<usize>>,
    pub(crate) anytimes: Vec<AnytimeEntry>,
    pub(crate) setup: Vec<Hook>,
    pub(crate) teardown: Vec<Hook>,
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("id", &self.id)
            .field("steps", &self.steps)
            .field("befores", &self.befores)
            .field("afters", &self.afters)
            .field("anytimes", &self.anytimes)
            .finish_non_exhaustive()
    }
}

impl Sequencer {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn phrase_count(&self) -> usize {
        self.phrases.len()
    }

    /// Execute the plan once.
    pub fn run(&self, options: RunOptions) -> Result<RunResult, SequenceError> {
        let mut rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let mut ctx = Context::new();
        ctx.merge_data(options.data);
        if let Some(hook) = &options.pre_hook {
            hook(&mut ctx);
        }

        let nodes = self.execute(&mut ctx, &mut rng)?;

        let sequence: Vec<SpokenUnit> = nodes
            .into_iter()
            .map(|node| SpokenUnit {
                phrase: self.phrases[node.phrase].id.clone(),
                words: node.words,
            })
            .collect();
        let words = sequence
            .iter()
            .flat_map(|unit| unit.words.iter().cloned())
            .collect();

        Ok(RunResult {
            words,
            sequence,
            context: ctx,
        })
    }

    /// The output words for a seeded run.
    pub fn words(&self, seed: u64) -> Result<Vec<String>, SequenceError> {
        self.run(RunOptions::seeded(seed)).map(|result| result.words)
    }

    /// The space-joined sentence for a seeded run.
    pub fn sentence(&self, seed: u64) -> Result<String, SequenceError> {
        self.run(RunOptions::seeded(seed))
            .map(|result| result.sentence())
    }

    /// The shared run path, also entered by sub-grammar word sources with
    /// the parent's RNG and a fresh child context.
    pub(crate) fn execute(
        &self,
        ctx: &mut Context,
        rng: &mut StdRng,
    ) -> Result<Vec<SpokenNode>, SequenceError> {
        for hook in &self.setup {
            hook(ctx);
        }

        // Resolve every recurrence policy into per-run state up front so
        // the plan itself stays untouched.
        ctx.recur = self
            .phrases
            .iter()
            .map(|phrase| RecurState::resolve(phrase.recur.as_ref(), rng))
            .collect();

        let mut nodes = Vec::new();
        for &step in &self.steps {
            self.traverse(step, ctx, rng, &mut nodes)?;
        }

        self.splice_anytimes(ctx, rng, &mut nodes)?;

        for hook in &self.teardown {
            hook(ctx);
        }

        Ok(nodes)
    }

    /// Evaluate one phrase and, when it speaks, weave in its dependency
    /// subtree: before-dependents ahead of it, after-dependents behind it,
    /// each recursively carrying dependents of their own. A silent phrase
    /// drops its entire subtree — dependents of silence are never run.
    fn traverse(
        &self,
        index: usize,
        ctx: &mut Context,
        rng: &mut StdRng,
        out: &mut Vec<SpokenNode>,
    ) -> Result<(), SequenceError> {
        let words = self.evaluate(index, ctx, rng)?;
        if words.is_empty() {
            return Ok(());
        }

        if let Some(id) = self.phrases[index].id() {
            // Later declarations layer outward from the reference, so the
            // declaration-ordered list is walked back-to-front.
            if let Some(deps) = self.befores.get(id) {
                for &dep in deps.iter().rev() {
                    self.traverse(dep, ctx, rng, out)?;
                }
            }
        }

        out.push(SpokenNode {
            phrase: index,
            words,
        });

        if let Some(id) = self.phrases[index].id() {
            if let Some(deps) = self.afters.get(id) {
                for &dep in deps {
                    self.traverse(dep, ctx, rng, out)?;
                }
            }
        }

        Ok(())
    }

    fn evaluate(
        &self,
        index: usize,
        ctx: &mut Context,
        rng: &mut StdRng,
    ) -> Result<Vec<String>, SequenceError> {
        let words = self.phrases[index].speak(ctx, rng)?;
        if words.is_empty() {
            ctx.record_silent(index);
        } else {
            ctx.record_spoken(index, self.phrases[index].id());
        }
        Ok(words)
    }

    /// Splice anywhere-phrases into the linear sequence, one at a time in
    /// declaration order, re-evaluating per recurrence. Windows are
    /// recomputed against the sequence as it grows, so later splices see
    /// earlier ones.
    fn splice_anytimes(
        &self,
        ctx: &mut Context,
        rng: &mut StdRng,
        nodes: &mut Vec<SpokenNode>,
    ) -> Result<(), SequenceError> {
        for entry in &self.anytimes {
            loop {
                let len = nodes.len() as i64;

                // Window end: a before-target at the head leaves no room.
                // A bound absent from the sequence is unconstrained.
                let mut to = len - 1;
                let mut before_found = false;
                if let Some(target) = &entry.before {
                    if let Some(at) = self.index_of(nodes, target) {
                        if at == 0 {
                            break;
                        }
                        before_found = true;
                        to = at as i64;
                    }
                }

                // Window start: an after-target at the tail leaves no room.
                let mut from: i64 = 0;
                if let Some(target) = &entry.after {
                    if let Some(at) = self.index_of(nodes, target) {
                        if at as i64 == len - 1 {
                            break;
                        }
                        from = at as i64;
                        if to < from {
                            if before_found {
                                return Err(SequenceError::BoundingConflict {
                                    after: target.clone(),
                                    before: entry.before.clone().unwrap_or_default(),
                                });
                            }
                            // Partially bounded: collapse to the single
                            // remaining slot.
                            from = to;
                        }
                    }
                }

                let mut sub = Vec::new();
                self.traverse(entry.phrase, ctx, rng, &mut sub)?;
                if sub.is_empty() {
                    // Recurrence exhausted, or the phrase went silent.
                    break;
                }

                // Insertion lands after the chosen node; back the window
                // end off by one so the splice never becomes the tail.
                to -= 1;
                if to < 0 {
                    to = 0;
                }
                let slot = if from >= to {
                    from as usize
                } else {
                    rng.gen_range(from..=to) as usize
                };

                if nodes.is_empty() {
                    // Nothing else spoke; the anywhere output stands alone.
                    nodes.extend(sub);
                } else {
                    let at = slot + 1;
                    if at > nodes.len() {
                        return Err(SequenceError::SpliceSlot(at));
                    }
                    nodes.splice(at..at, sub);
                }
            }
        }
        Ok(())
    }

    /// Index of the first sequence node belonging to the phrase with the
    /// given id.
    fn index_of(&self, nodes: &[SpokenNode], id: &str) -> Option<usize> {
        nodes
            .iter()
            .position(|node| self.phrases[node.phrase].id() == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::builder::GrammarBuilder;

    #[test]
    fn empty_plan_runs_to_empty_output() {
        let seq = GrammarBuilder::new().compile().unwrap();
        let result = seq.run(RunOptions::seeded(1)).unwrap();
        assert!(result.words.is_empty());
        assert!(result.sequence.is_empty());
    }

    #[test]
    fn run_result_exposes_sequence_pairs() {
        let mut b = GrammarBuilder::new();
        b.phrase("greet").say("hello");
        b.say("world");
        let seq = b.compile().unwrap();

        let result = seq.run(RunOptions::seeded(1)).unwrap();
        assert_eq!(result.words, vec!["hello", "world"]);
        assert_eq!(result.sequence.len(), 2);
        assert_eq!(result.sequence[0].phrase.as_deref(), Some("greet"));
        assert_eq!(result.sequence[1].phrase, None);
        assert_eq!(result.sentence(), "hello world");
    }

    #[test]
    fn bounding_conflict_is_a_run_error_and_plan_survives() {
        let mut b = GrammarBuilder::new();
        b.say("one");
        b.phrase("lower").say("two");
        b.phrase("upper")
            .say("three")
            .when(|ctx| ctx.flag("with-upper"));
        b.say("four");
        // upper follows lower in the sequence, so a window that must start
        // after upper yet end before lower crosses whenever both speak.
        b.anywhere().say("never").between("upper", "lower");
        let seq = b.compile().unwrap();

        let err = seq
            .run(RunOptions::seeded(3).data("with-upper", true))
            .unwrap_err();
        assert!(matches!(err, SequenceError::BoundingConflict { .. }));

        // Same plan, upper silent: the before-bound is unconstrained and
        // the run succeeds.
        let result = seq.run(RunOptions::seeded(3)).unwrap();
        assert!(result.words.contains(&"never".to_string()));
    }

    #[test]
    fn anywhere_adopts_empty_sequence() {
        let mut b = GrammarBuilder::new();
        b.anywhere().say("alone");
        let seq = b.compile().unwrap();
        assert_eq!(seq.words(9).unwrap(), vec!["alone"]);
    }
}
