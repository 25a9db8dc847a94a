/// Phrases — named choice-points that pick one viable instruction per
/// evaluation and speak through it.
use rand::rngs::StdRng;
use rand::Rng;

use crate::core::context::Context;
use crate::core::instruction::{Count, Guard, Instruction};
use crate::core::sequencer::SequenceError;

/// A compiled phrase: an ordered list of alternative instructions plus
/// phrase-level guards and an optional recurrence policy. Immutable after
/// plan compilation; all per-run state lives in the [`Context`].
#[derive(Clone, Debug)]
pub struct Phrase {
    pub(crate) index: usize,
    pub(crate) id: Option<String>,
    pub(crate) guards: Vec<Guard>,
    pub(crate) recur: Option<Count>,
    pub(crate) instructions: Vec<Instruction>,
}

impl Phrase {
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Evaluate this phrase once.
    ///
    /// The recurrence gate is consulted first (a phrase defaults to a
    /// single evaluation per run), then the phrase guards, then one
    /// instruction is selected — proportionally by weight when there are
    /// two or more — and asked to speak. An empty result means the phrase
    /// is silent for this evaluation.
    pub(crate) fn speak(
        &self,
        ctx: &mut Context,
        rng: &mut StdRng,
    ) -> Result<Vec<String>, SequenceError> {
        if !ctx.recur_step(self.index) {
            return Ok(Vec::new());
        }

        if !self.guards.iter().all(|guard| guard.test(ctx)) {
            return Ok(Vec::new());
        }

        let chosen = self.select(ctx, rng);
        match chosen {
            Some(choice) => {
                ctx.record_instruction(self.index, choice);
                self.instructions[choice].speak(ctx, rng)
            }
            None => Ok(Vec::new()),
        }
    }

    /// Pick the instruction to speak through, or `None` if nothing is
    /// viable. With a single instruction only its guards apply. With two
    /// or more, sibling weights are laid end-to-end on `[0, total)`, a
    /// single roll lands in exactly one band, and that instruction must
    /// also pass its guards — a failed guard silences the phrase rather
    /// than falling through to a different band.
    fn select(&self, ctx: &Context, rng: &mut StdRng) -> Option<usize> {
        if self.instructions.len() < 2 {
            return match self.instructions.first() {
                Some(only) if only.test(ctx) => Some(0),
                _ => None,
            };
        }

        let weights: Vec<u32> = self
            .instructions
            .iter()
            .map(|ins| ins.resolve_weight(ctx, rng))
            .collect();
        // Bands are laid out in u64 so sibling weights near u32::MAX
        // cannot overflow the running total.
        let total: u64 = weights.iter().map(|weight| u64::from(*weight)).sum();
        if total == 0 {
            return None;
        }

        let roll = rng.gen_range(0..total);
        let mut lower: u64 = 0;
        for (index, weight) in weights.iter().enumerate() {
            let upper = lower + u64::from(*weight);
            if roll >= lower && roll < upper {
                let candidate = &self.instructions[index];
                return candidate.test(ctx).then_some(index);
            }
            lower = upper;
        }
        None
    }
}
