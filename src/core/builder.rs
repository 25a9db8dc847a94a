/// The grammar builder — the mutable, fluent declaration surface that
/// compiles into an immutable [`Sequencer`].
use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::core::context::Context;
use crate::core::instruction::{Count, CountFn, Guard, Instruction, Weight};
use crate::core::phrase::Phrase;
use crate::core::sequencer::{AnytimeEntry, Hook, Sequencer};
use crate::core::word::WordSource;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("duplicate phrase id `{0}`")]
    DuplicateId(String),
    #[error("reference to undeclared phrase `{0}`")]
    UnknownReference(String),
    #[error("dependency cycle through phrase `{0}`")]
    DependencyCycle(String),
    #[error("invalid range {lo}..={hi}")]
    InvalidRange { lo: u32, hi: u32 },
    #[error("{0}")]
    Misuse(String),
}

/// Where a phrase sits relative to the rest of the plan.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Position {
    Normal,
    First,
    Last,
    Anywhere,
    Before(String),
    After(String),
}

/// A phrase under construction. Obtained from the builder's declaration
/// methods; every modifier returns `&mut Self` for chaining.
pub struct PhraseDecl {
    id: Option<String>,
    position: Position,
    after_bound: Option<String>,
    before_bound: Option<String>,
    guards: Vec<Guard>,
    recur: Option<Count>,
    instructions: Vec<Instruction>,
    // First misuse of the fluent surface, reported by compile() so that
    // declaration chains never have to unwrap mid-sentence.
    misuse: Option<String>,
}

impl PhraseDecl {
    fn at(position: Position) -> PhraseDecl {
        PhraseDecl {
            id: None,
            position,
            after_bound: None,
            before_bound: None,
            guards: Vec::new(),
            recur: None,
            instructions: Vec::new(),
            misuse: None,
        }
    }

    fn flag_misuse(&mut self, message: &str) {
        if self.misuse.is_none() {
            self.misuse = Some(message.to_string());
        }
    }

    fn current(&mut self, modifier: &str) -> Option<&mut Instruction> {
        if self.instructions.is_empty() {
            self.flag_misuse(&format!("{modifier} requires a preceding alternative"));
            return None;
        }
        self.instructions.last_mut()
    }

    /// Name this phrase so guards and dependents can reference it.
    pub fn with_id(&mut self, id: impl Into<String>) -> &mut Self {
        self.id = Some(id.into());
        self
    }

    /// Start a new alternative speaking the given source. Alternatives
    /// within one phrase compete by weight; exactly one speaks per
    /// evaluation.
    pub fn say(&mut self, source: impl Into<WordSource>) -> &mut Self {
        let mut instruction = Instruction::new();
        instruction.sources.push(source.into());
        self.instructions.push(instruction);
        self
    }

    /// Append another source to the current alternative.
    pub fn and(&mut self, source: impl Into<WordSource>) -> &mut Self {
        let source = source.into();
        if let Some(instruction) = self.current("and") {
            instruction.sources.push(source);
        }
        self
    }

    /// Add a silent alternative, letting the phrase sometimes say nothing.
    pub fn nothing(&mut self) -> &mut Self {
        self.instructions.push(Instruction::new());
        self
    }

    /// Fix the current alternative's selection weight.
    pub fn weight(&mut self, weight: u32) -> &mut Self {
        if let Some(instruction) = self.current("weight") {
            instruction.weight = Some(Weight::Fixed(weight));
        }
        self
    }

    /// Sample the current alternative's weight from an inclusive range at
    /// each evaluation.
    pub fn weight_range(&mut self, lo: u32, hi: u32) -> &mut Self {
        if let Some(instruction) = self.current("weight_range") {
            instruction.weight = Some(Weight::Range(lo, hi));
        }
        self
    }

    /// Compute the current alternative's weight from the live context.
    pub fn weight_with<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Context) -> u32 + Send + Sync + 'static,
    {
        if let Some(instruction) = self.current("weight_with") {
            instruction.weight = Some(Weight::With(Arc::new(f)));
        }
        self
    }

    /// Guard the current alternative with a context predicate.
    pub fn when<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        if let Some(instruction) = self.current("when") {
            instruction.guards.push(Guard::When(Arc::new(f)));
        }
        self
    }

    /// Guard the current alternative with a negated context predicate.
    pub fn when_not<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        if let Some(instruction) = self.current("when_not") {
            instruction
                .guards
                .push(Guard::When(Arc::new(move |ctx| !f(ctx))));
        }
        self
    }

    /// Let the current alternative speak only once another phrase has.
    pub fn if_spoken(&mut self, id: impl Into<String>) -> &mut Self {
        let id = id.into();
        if let Some(instruction) = self.current("if_spoken") {
            instruction.guards.push(Guard::Spoken(id));
        }
        self
    }

    /// Let the current alternative speak only while another phrase has not.
    pub fn unless_spoken(&mut self, id: impl Into<String>) -> &mut Self {
        let id = id.into();
        if let Some(instruction) = self.current("unless_spoken") {
            instruction.guards.push(Guard::NotSpoken(id));
        }
        self
    }

    /// Guard the whole phrase, regardless of which alternative would win.
    pub fn gate<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.guards.push(Guard::When(Arc::new(f)));
        self
    }

    /// Speak the current alternative a fixed number of times in a row.
    pub fn repeat(&mut self, times: u32) -> &mut Self {
        if let Some(instruction) = self.current("repeat") {
            instruction.repeat = Some(Count::Fixed(times));
        }
        self
    }

    /// Speak the current alternative a random number of times, inclusive.
    pub fn repeat_range(&mut self, lo: u32, hi: u32) -> &mut Self {
        if let Some(instruction) = self.current("repeat_range") {
            instruction.repeat = Some(Count::Range(lo, hi));
        }
        self
    }

    /// Keep speaking the current alternative while the predicate holds.
    pub fn repeat_while<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(u32, &Context) -> bool + Send + Sync + 'static,
    {
        if let Some(instruction) = self.current("repeat_while") {
            instruction.repeat = Some(Count::While(Arc::new(f) as CountFn));
        }
        self
    }

    /// Allow this phrase to be evaluated up to `times` times per run.
    pub fn recur(&mut self, times: u32) -> &mut Self {
        self.recur = Some(Count::Fixed(times));
        self
    }

    /// Allow a per-run random number of evaluations, inclusive.
    pub fn recur_range(&mut self, lo: u32, hi: u32) -> &mut Self {
        self.recur = Some(Count::Range(lo, hi));
        self
    }

    /// Allow further evaluations while the predicate holds for the count
    /// of evaluations so far.
    pub fn recur_while<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(u32, &Context) -> bool + Send + Sync + 'static,
    {
        self.recur = Some(Count::While(Arc::new(f) as CountFn));
        self
    }

    /// Keep an anywhere-phrase after the named phrase in the output.
    pub fn after(&mut self, id: impl Into<String>) -> &mut Self {
        if self.position == Position::Anywhere {
            self.after_bound = Some(id.into());
        } else {
            self.flag_misuse("after bound applies only to anywhere-phrases");
        }
        self
    }

    /// Keep an anywhere-phrase before the named phrase in the output.
    pub fn before(&mut self, id: impl Into<String>) -> &mut Self {
        if self.position == Position::Anywhere {
            self.before_bound = Some(id.into());
        } else {
            self.flag_misuse("before bound applies only to anywhere-phrases");
        }
        self
    }

    /// Bound an anywhere-phrase on both sides: after `lower`, before
    /// `upper`.
    pub fn between(&mut self, lower: impl Into<String>, upper: impl Into<String>) -> &mut Self {
        self.after(lower);
        self.before(upper)
    }
}

/// Accumulates phrase declarations and run hooks, then compiles them into
/// a [`Sequencer`]. The builder stays usable after `compile`, so a plan
/// can be grown and recompiled.
#[derive(Default)]
pub struct GrammarBuilder {
    id: Option<String>,
    decls: Vec<PhraseDecl>,
    setup: Vec<Hook>,
    teardown: Vec<Hook>,
}

impl GrammarBuilder {
    pub fn new() -> GrammarBuilder {
        GrammarBuilder::default()
    }

    pub fn named(id: impl Into<String>) -> GrammarBuilder {
        GrammarBuilder {
            id: Some(id.into()),
            ..GrammarBuilder::default()
        }
    }

    pub(crate) fn declare(&mut self, position: Position) -> &mut PhraseDecl {
        self.decls.push(PhraseDecl::at(position));
        self.decls.last_mut().expect("just pushed")
    }

    /// Declare a named phrase in declaration order.
    pub fn phrase(&mut self, id: impl Into<String>) -> &mut PhraseDecl {
        self.declare(Position::Normal).with_id(id)
    }

    /// Declare an anonymous phrase speaking the given source.
    pub fn say(&mut self, source: impl Into<WordSource>) -> &mut PhraseDecl {
        self.declare(Position::Normal).say(source)
    }

    /// Declare a phrase forced to the front of the sequence. With several,
    /// the most recently declared comes foremost.
    pub fn first(&mut self) -> &mut PhraseDecl {
        self.declare(Position::First)
    }

    /// Declare a phrase forced to the end of the sequence.
    pub fn last(&mut self) -> &mut PhraseDecl {
        self.declare(Position::Last)
    }

    /// Declare an anywhere-phrase, spliced into a random viable position
    /// after the base sequence is built.
    pub fn anywhere(&mut self) -> &mut PhraseDecl {
        self.declare(Position::Anywhere)
    }

    /// Declare a phrase spoken immediately before the named phrase,
    /// whenever that phrase speaks. Successive dependents on the same
    /// target stack outward from it.
    pub fn before(&mut self, target: impl Into<String>) -> &mut PhraseDecl {
        self.declare(Position::Before(target.into()))
    }

    /// Declare a phrase spoken immediately after the named phrase,
    /// whenever that phrase speaks.
    pub fn after(&mut self, target: impl Into<String>) -> &mut PhraseDecl {
        self.declare(Position::After(target.into()))
    }

    /// Run a callback against the context before any phrase, after
    /// previously registered setup callbacks.
    pub fn setup<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.setup.push(Arc::new(f));
        self
    }

    /// Run a setup callback ahead of those already registered.
    pub fn setup_first<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.setup.insert(0, Arc::new(f));
        self
    }

    /// Run a callback against the context after the full sequence is
    /// assembled.
    pub fn teardown<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.teardown.push(Arc::new(f));
        self
    }

    /// Run a teardown callback ahead of those already registered.
    pub fn teardown_first<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.teardown.insert(0, Arc::new(f));
        self
    }

    /// Validate the declarations and produce an immutable plan.
    pub fn compile(&self) -> Result<Sequencer, CompileError> {
        let mut ids: FxHashMap<String, usize> = FxHashMap::default();
        for (index, decl) in self.decls.iter().enumerate() {
            if let Some(id) = &decl.id {
                if ids.insert(id.clone(), index).is_some() {
                    return Err(CompileError::DuplicateId(id.clone()));
                }
            }
        }

        for decl in &self.decls {
            if let Some(message) = &decl.misuse {
                return Err(CompileError::Misuse(message.clone()));
            }
            self.check_ranges(decl)?;
            for target in self.references(decl) {
                if !ids.contains_key(target) {
                    return Err(CompileError::UnknownReference(target.clone()));
                }
            }
        }

        let mut phrases = Vec::with_capacity(self.decls.len());
        let mut steps = Vec::new();
        let mut firsts = Vec::new();
        let mut lasts = Vec::new();
        let mut befores: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        let mut afters: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        let mut anytimes = Vec::new();

        for (index, decl) in self.decls.iter().enumerate() {
            phrases.push(Phrase {
                index,
                id: decl.id.clone(),
                guards: decl.guards.clone(),
                recur: decl.recur.clone(),
                instructions: decl.instructions.clone(),
            });
            match &decl.position {
                Position::Normal => steps.push(index),
                Position::First => firsts.push(index),
                Position::Last => lasts.push(index),
                Position::Anywhere => anytimes.push(AnytimeEntry {
                    phrase: index,
                    after: decl.after_bound.clone(),
                    before: decl.before_bound.clone(),
                }),
                Position::Before(target) => {
                    befores.entry(target.clone()).or_default().push(index)
                }
                Position::After(target) => afters.entry(target.clone()).or_default().push(index),
            }
        }

        let mut ordered: Vec<usize> = firsts.into_iter().rev().collect();
        ordered.extend(steps);
        ordered.extend(lasts);

        if let Some(id) = detect_cycle(&phrases, &befores, &afters) {
            return Err(CompileError::DependencyCycle(id));
        }

        Ok(Sequencer {
            id: self.id.clone(),
            phrases,
            steps: ordered,
            befores,
            afters,
            anytimes,
            setup: self.setup.clone(),
            teardown: self.teardown.clone(),
        })
    }

    fn check_ranges(&self, decl: &PhraseDecl) -> Result<(), CompileError> {
        let check = |lo: u32, hi: u32| {
            if lo > hi {
                Err(CompileError::InvalidRange { lo, hi })
            } else {
                Ok(())
            }
        };
        if let Some(Count::Range(lo, hi)) = &decl.recur {
            check(*lo, *hi)?;
        }
        for instruction in &decl.instructions {
            if let Some(Weight::Range(lo, hi)) = &instruction.weight {
                check(*lo, *hi)?;
            }
            if let Some(Count::Range(lo, hi)) = &instruction.repeat {
                check(*lo, *hi)?;
            }
        }
        Ok(())
    }

    fn references<'a>(&self, decl: &'a PhraseDecl) -> Vec<&'a String> {
        let mut refs = Vec::new();
        match &decl.position {
            Position::Before(target) | Position::After(target) => refs.push(target),
            _ => {}
        }
        refs.extend(decl.after_bound.iter());
        refs.extend(decl.before_bound.iter());
        refs
    }
}

/// Dependency edges run from a phrase to the dependents declared against
/// its id; a cycle among them would recurse without progress, so it is
/// rejected at compile time.
fn detect_cycle(
    phrases: &[Phrase],
    befores: &FxHashMap<String, Vec<usize>>,
    afters: &FxHashMap<String, Vec<usize>>,
) -> Option<String> {
    const FRESH: u8 = 0;
    const ACTIVE: u8 = 1;
    const DONE: u8 = 2;

    fn visit(
        index: usize,
        phrases: &[Phrase],
        befores: &FxHashMap<String, Vec<usize>>,
        afters: &FxHashMap<String, Vec<usize>>,
        state: &mut [u8],
    ) -> Option<String> {
        state[index] = ACTIVE;
        if let Some(id) = phrases[index].id() {
            let deps = befores
                .get(id)
                .into_iter()
                .chain(afters.get(id))
                .flatten();
            for &dep in deps {
                match state[dep] {
                    ACTIVE => {
                        let name = phrases[dep].id().unwrap_or(id);
                        return Some(name.to_string());
                    }
                    FRESH => {
                        if let Some(cycle) = visit(dep, phrases, befores, afters, state) {
                            return Some(cycle);
                        }
                    }
                    _ => {}
                }
            }
        }
        state[index] = DONE;
        None
    }

    let mut state = vec![FRESH; phrases.len()];
    for index in 0..phrases.len() {
        if state[index] == FRESH {
            if let Some(cycle) = visit(index, phrases, befores, afters, &mut state) {
                return Some(cycle);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sequencer::RunOptions;

    #[test]
    fn first_and_last_override_declaration_order() {
        let mut b = GrammarBuilder::new();
        b.say("middle");
        b.first().say("early");
        b.last().say("late");
        b.first().say("earliest");
        let seq = b.compile().unwrap();
        assert_eq!(
            seq.words(1).unwrap(),
            vec!["earliest", "early", "middle", "late"]
        );
    }

    #[test]
    fn and_extends_the_same_alternative() {
        let mut b = GrammarBuilder::new();
        b.say("strong").and("and").and("stable");
        let seq = b.compile().unwrap();
        for seed in 0..20 {
            assert_eq!(seq.words(seed).unwrap(), vec!["strong", "and", "stable"]);
        }
    }

    #[test]
    fn alternatives_each_get_selected() {
        let mut b = GrammarBuilder::new();
        b.say("heads").say("tails");
        let seq = b.compile().unwrap();
        let mut heads = 0;
        let mut tails = 0;
        for seed in 0..200 {
            match seq.words(seed).unwrap()[0].as_str() {
                "heads" => heads += 1,
                "tails" => tails += 1,
                other => panic!("unexpected word {other}"),
            }
        }
        assert!(heads > 0 && tails > 0);
    }

    #[test]
    fn nothing_makes_a_phrase_sometimes_silent() {
        let mut b = GrammarBuilder::new();
        b.say("anchor");
        b.say("maybe").nothing();
        let seq = b.compile().unwrap();
        let mut spoken = 0;
        let mut silent = 0;
        for seed in 0..200 {
            let words = seq.words(seed).unwrap();
            if words.len() == 2 {
                spoken += 1;
            } else {
                assert_eq!(words, vec!["anchor"]);
                silent += 1;
            }
        }
        assert!(spoken > 0 && silent > 0);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut b = GrammarBuilder::new();
        b.phrase("twice").say("a");
        b.phrase("twice").say("b");
        assert!(matches!(
            b.compile().unwrap_err(),
            CompileError::DuplicateId(id) if id == "twice"
        ));
    }

    #[test]
    fn undeclared_references_are_rejected() {
        let mut b = GrammarBuilder::new();
        b.say("real");
        b.before("ghost").say("boo");
        assert!(matches!(
            b.compile().unwrap_err(),
            CompileError::UnknownReference(id) if id == "ghost"
        ));

        let mut b = GrammarBuilder::new();
        b.say("real");
        b.anywhere().say("x").after("ghost");
        assert!(matches!(
            b.compile().unwrap_err(),
            CompileError::UnknownReference(id) if id == "ghost"
        ));
    }

    #[test]
    fn dependency_cycles_are_rejected() {
        let mut b = GrammarBuilder::new();
        b.before("b").with_id("a").say("a");
        b.before("a").with_id("b").say("b");
        assert!(matches!(
            b.compile().unwrap_err(),
            CompileError::DependencyCycle(_)
        ));

        let mut b = GrammarBuilder::new();
        b.before("selfish").with_id("selfish").say("me");
        assert!(matches!(
            b.compile().unwrap_err(),
            CompileError::DependencyCycle(id) if id == "selfish"
        ));
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let mut b = GrammarBuilder::new();
        b.say("a").weight_range(5, 2).say("b");
        assert!(matches!(
            b.compile().unwrap_err(),
            CompileError::InvalidRange { lo: 5, hi: 2 }
        ));

        let mut b = GrammarBuilder::new();
        b.say("a").repeat_range(3, 1);
        assert!(matches!(
            b.compile().unwrap_err(),
            CompileError::InvalidRange { lo: 3, hi: 1 }
        ));

        let mut b = GrammarBuilder::new();
        b.phrase("p").say("a").recur_range(9, 4);
        assert!(matches!(
            b.compile().unwrap_err(),
            CompileError::InvalidRange { lo: 9, hi: 4 }
        ));
    }

    #[test]
    fn modifiers_without_an_alternative_are_misuse() {
        let mut b = GrammarBuilder::new();
        b.phrase("bare").weight(3);
        assert!(matches!(b.compile().unwrap_err(), CompileError::Misuse(_)));

        let mut b = GrammarBuilder::new();
        b.phrase("bound").say("x").before("bound");
        assert!(matches!(b.compile().unwrap_err(), CompileError::Misuse(_)));
    }

    #[test]
    fn builder_recompiles_after_growth() {
        let mut b = GrammarBuilder::new();
        b.say("one");
        let small = b.compile().unwrap();
        b.say("two");
        let grown = b.compile().unwrap();
        assert_eq!(small.phrase_count(), 1);
        assert_eq!(grown.phrase_count(), 2);
        assert_eq!(grown.words(0).unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn named_plan_carries_its_id() {
        let seq = GrammarBuilder::named("greeting").compile().unwrap();
        assert_eq!(seq.id(), Some("greeting"));
    }

    #[test]
    fn data_is_visible_to_guards() {
        let mut b = GrammarBuilder::new();
        b.say("always");
        b.say("flagged").when(|ctx| ctx.flag("armed"));
        let seq = b.compile().unwrap();

        let bare = seq.run(RunOptions::seeded(5)).unwrap();
        assert_eq!(bare.words, vec!["always"]);

        let armed = seq
            .run(RunOptions::seeded(5).data("armed", true))
            .unwrap();
        assert_eq!(armed.words, vec!["always", "flagged"]);
    }
}
