/// Instructions — the alternative word-producing strategies inside a
/// phrase, together with their guard, weight, and repeat policies.
use rand::rngs::StdRng;
use rand::Rng;
use std::fmt;
use std::sync::Arc;

use crate::core::context::Context;
use crate::core::sequencer::SequenceError;
use crate::core::word::{self, WordSource};

/// Weight assigned to an instruction when none is declared.
pub const DEFAULT_WEIGHT: u32 = 1;

/// A boolean predicate over the run context.
pub type GuardFn = Arc<dyn Fn(&Context) -> bool + Send + Sync>;
/// A lazily computed selection weight.
pub type WeightFn = Arc<dyn Fn(&Context) -> u32 + Send + Sync>;
/// A continuation predicate receiving the running count.
pub type CountFn = Arc<dyn Fn(u32, &Context) -> bool + Send + Sync>;

/// A condition gating whether an instruction (or phrase) may be used.
#[derive(Clone)]
pub enum Guard {
    /// Passes once the referenced phrase has contributed words this run.
    Spoken(String),
    /// Passes while the referenced phrase has not contributed words.
    NotSpoken(String),
    /// Custom predicate.
    When(GuardFn),
}

impl Guard {
    pub(crate) fn test(&self, ctx: &Context) -> bool {
        match self {
            Guard::Spoken(id) => ctx.was_spoken(id),
            Guard::NotSpoken(id) => !ctx.was_spoken(id),
            Guard::When(f) => f(ctx),
        }
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Guard::Spoken(id) => f.debug_tuple("Spoken").field(id).finish(),
            Guard::NotSpoken(id) => f.debug_tuple("NotSpoken").field(id).finish(),
            Guard::When(_) => f.write_str("When(<fn>)"),
        }
    }
}

/// Relative likelihood of an instruction among its siblings.
#[derive(Clone)]
pub enum Weight {
    Fixed(u32),
    /// Inclusive range, sampled once per phrase evaluation.
    Range(u32, u32),
    With(WeightFn),
}

impl Weight {
    pub(crate) fn resolve(&self, ctx: &Context, rng: &mut StdRng) -> u32 {
        match self {
            Weight::Fixed(n) => *n,
            Weight::Range(lo, hi) => rng.gen_range(*lo..=*hi),
            Weight::With(f) => f(ctx),
        }
    }
}

impl fmt::Debug for Weight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Weight::Fixed(n) => f.debug_tuple("Fixed").field(n).finish(),
            Weight::Range(lo, hi) => f.debug_tuple("Range").field(lo).field(hi).finish(),
            Weight::With(_) => f.write_str("With(<fn>)"),
        }
    }
}

/// A repetition or recurrence policy.
#[derive(Clone)]
pub enum Count {
    Fixed(u32),
    /// Inclusive range, sampled from the per-run RNG.
    Range(u32, u32),
    /// Continue while the predicate holds for the running count.
    While(CountFn),
}

impl fmt::Debug for Count {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Count::Fixed(n) => f.debug_tuple("Fixed").field(n).finish(),
            Count::Range(lo, hi) => f.debug_tuple("Range").field(lo).field(hi).finish(),
            Count::While(_) => f.write_str("While(<fn>)"),
        }
    }
}

/// One alternative within a phrase: an ordered list of word sources plus
/// behavior modifiers. Identity is the instruction's position in its
/// phrase; selection among siblings is proportional to weight.
#[derive(Clone, Debug)]
pub struct Instruction {
    pub(crate) sources: Vec<WordSource>,
    pub(crate) guards: Vec<Guard>,
    pub(crate) weight: Option<Weight>,
    pub(crate) repeat: Option<Count>,
}

impl Instruction {
    pub(crate) fn new() -> Instruction {
        Instruction {
            sources: Vec::new(),
            guards: Vec::new(),
            weight: None,
            repeat: None,
        }
    }

    /// True when every guard passes.
    pub(crate) fn test(&self, ctx: &Context) -> bool {
        self.guards.iter().all(|guard| guard.test(ctx))
    }

    /// Resolve this instruction's weight, defaulting when undeclared.
    pub(crate) fn resolve_weight(&self, ctx: &Context, rng: &mut StdRng) -> u32 {
        match &self.weight {
            Some(weight) => weight.resolve(ctx, rng),
            None => DEFAULT_WEIGHT,
        }
    }

    /// Produce this instruction's words.
    ///
    /// With a repeat policy attached, the sources are re-resolved per
    /// iteration — each pass is a fresh attempt, not a copy of the first —
    /// and an empty yield ends the repetition early regardless of the
    /// remaining budget.
    pub(crate) fn speak(
        &self,
        ctx: &mut Context,
        rng: &mut StdRng,
    ) -> Result<Vec<String>, SequenceError> {
        let repeat = match &self.repeat {
            None => return self.speak_once(ctx, rng),
            Some(repeat) => repeat.clone(),
        };

        let limit = match &repeat {
            Count::Fixed(n) => Some(*n),
            Count::Range(lo, hi) => Some(rng.gen_range(*lo..=*hi)),
            Count::While(_) => None,
        };

        let mut composite = Vec::new();
        let mut count: u32 = 0;
        loop {
            let proceed = match (&repeat, limit) {
                (Count::While(f), _) => f(count, ctx),
                (_, Some(limit)) => count < limit,
                _ => false,
            };
            if !proceed {
                break;
            }

            let words = self.speak_once(ctx, rng)?;
            if words.is_empty() {
                break;
            }
            composite.extend(words);
            count += 1;
        }

        Ok(composite)
    }

    fn speak_once(&self, ctx: &mut Context, rng: &mut StdRng) -> Result<Vec<String>, SequenceError> {
        let mut words = Vec::new();
        for source in &self.sources {
            words.extend(word::resolve(source, ctx, rng)?);
        }
        Ok(words)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn instruction(sources: Vec<WordSource>) -> Instruction {
        Instruction {
            sources,
            guards: Vec::new(),
            weight: None,
            repeat: None,
        }
    }

    #[test]
    fn speak_concatenates_sources() {
        let ins = instruction(vec![WordSource::from("one"), WordSource::from("two")]);
        let mut ctx = Context::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(ins.speak(&mut ctx, &mut rng).unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn repeat_fixed_concatenates_blocks() {
        let mut ins = instruction(vec![WordSource::from("la")]);
        ins.repeat = Some(Count::Fixed(3));
        let mut ctx = Context::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            ins.speak(&mut ctx, &mut rng).unwrap(),
            vec!["la", "la", "la"]
        );
    }

    #[test]
    fn repeat_zero_yields_nothing() {
        let mut ins = instruction(vec![WordSource::from("la")]);
        ins.repeat = Some(Count::Fixed(0));
        let mut ctx = Context::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert!(ins.speak(&mut ctx, &mut rng).unwrap().is_empty());
    }

    #[test]
    fn repeat_range_stays_within_bounds() {
        let mut ins = instruction(vec![WordSource::from("x")]);
        ins.repeat = Some(Count::Range(1, 3));
        for seed in 0..50 {
            let mut ctx = Context::new();
            let mut rng = StdRng::seed_from_u64(seed);
            let n = ins.speak(&mut ctx, &mut rng).unwrap().len();
            assert!((1..=3).contains(&n), "got {} repetitions", n);
        }
    }

    #[test]
    fn repeat_while_stops_on_predicate() {
        let mut ins = instruction(vec![WordSource::from("tick")]);
        ins.repeat = Some(Count::While(Arc::new(|count, _| count < 2)));
        let mut ctx = Context::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(ins.speak(&mut ctx, &mut rng).unwrap(), vec!["tick", "tick"]);
    }

    #[test]
    fn repeat_stops_early_on_empty_yield() {
        // Source yields words twice, then nothing; budget of 5 is cut short.
        let remaining = Arc::new(std::sync::atomic::AtomicU32::new(2));
        let source = {
            let remaining = Arc::clone(&remaining);
            WordSource::lazy_text(move |_| {
                use std::sync::atomic::Ordering;
                if remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    n.checked_sub(1)
                }).is_ok()
                {
                    "word".to_string()
                } else {
                    String::new()
                }
            })
        };
        let mut ins = instruction(vec![source]);
        ins.repeat = Some(Count::Fixed(5));
        let mut ctx = Context::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(ins.speak(&mut ctx, &mut rng).unwrap(), vec!["word", "word"]);
    }

    #[test]
    fn guard_conjunction() {
        let mut ins = instruction(vec![WordSource::from("x")]);
        ins.guards.push(Guard::When(Arc::new(|_| true)));
        ins.guards.push(Guard::When(Arc::new(|_| false)));
        assert!(!ins.test(&Context::new()));
    }

    #[test]
    fn weight_defaults_to_one() {
        let ins = instruction(vec![]);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(ins.resolve_weight(&Context::new(), &mut rng), DEFAULT_WEIGHT);
    }

    #[test]
    fn weight_range_samples_inclusively() {
        let mut ins = instruction(vec![]);
        ins.weight = Some(Weight::Range(2, 4));
        let ctx = Context::new();
        let mut seen = std::collections::HashSet::new();
        for seed in 0..200 {
            let mut rng = StdRng::seed_from_u64(seed);
            let w = ins.resolve_weight(&ctx, &mut rng);
            assert!((2..=4).contains(&w));
            seen.insert(w);
        }
        assert_eq!(seen.len(), 3, "all range values should occur");
    }
}
