/// Per-run execution state — spoken/silent tracking, caller data, and
/// the child contexts produced by sub-grammar evaluation.
use rand::rngs::StdRng;
use rand::Rng;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use crate::core::instruction::{Count, CountFn};

/// A dynamic value carried in the context's data map.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Float(f64),
    Int(i64),
    Bool(bool),
}

impl Value {
    /// The boolean reading of this value; non-bool values are `false`.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Bool(true))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Per-run recurrence limit, resolved from a phrase's policy at the start
/// of each run so that randomness never touches the shared plan.
#[derive(Clone)]
pub(crate) enum RecurLimit {
    Count(u32),
    Predicate(CountFn),
}

pub(crate) struct RecurState {
    limit: RecurLimit,
    count: u32,
}

impl RecurState {
    pub(crate) fn resolve(policy: Option<&Count>, rng: &mut StdRng) -> RecurState {
        let limit = match policy {
            // A phrase only speaks once unless told otherwise.
            None => RecurLimit::Count(1),
            Some(Count::Fixed(n)) => RecurLimit::Count(*n),
            Some(Count::Range(lo, hi)) => RecurLimit::Count(rng.gen_range(*lo..=*hi)),
            Some(Count::While(f)) => RecurLimit::Predicate(Arc::clone(f)),
        };
        RecurState { limit, count: 0 }
    }
}

/// Mutable state for one generation run. Created fresh per run, mutated
/// only during it, and handed back to the caller for inspection.
#[derive(Default)]
pub struct Context {
    spoken: Vec<usize>,
    silent: Vec<usize>,
    spoken_ids: Vec<String>,
    used: Vec<(usize, usize)>,
    data: FxHashMap<String, Value>,
    children: Vec<Context>,
    pub(crate) recur: Vec<RecurState>,
}

impl Context {
    pub fn new() -> Context {
        Context::default()
    }

    /// True if the phrase with the given id has contributed words so far.
    pub fn was_spoken(&self, id: &str) -> bool {
        self.spoken_ids.iter().any(|spoken| spoken == id)
    }

    /// Ids of phrases that have spoken, in execution order.
    pub fn spoken_ids(&self) -> &[String] {
        &self.spoken_ids
    }

    /// Indices of phrases that contributed words, in execution order.
    pub fn spoken(&self) -> &[usize] {
        &self.spoken
    }

    /// Indices of phrases that were evaluated but contributed nothing.
    pub fn silent(&self) -> &[usize] {
        &self.silent
    }

    /// The (phrase, instruction) index pairs actually used, in order.
    pub fn instructions_used(&self) -> &[(usize, usize)] {
        &self.used
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// The boolean reading of a data entry; absent keys are `false`.
    pub fn flag(&self, key: &str) -> bool {
        self.data.get(key).map(Value::is_true).unwrap_or(false)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn data(&self) -> &FxHashMap<String, Value> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut FxHashMap<String, Value> {
        &mut self.data
    }

    /// Contexts of immediate sub-grammar runs, in evaluation order.
    pub fn children(&self) -> &[Context] {
        &self.children
    }

    /// All descendant contexts, flattened depth-first. Excludes `self`.
    pub fn descendants(&self) -> Vec<&Context> {
        let mut all = Vec::new();
        for child in &self.children {
            all.push(child);
            all.extend(child.descendants());
        }
        all
    }

    pub(crate) fn add_child(&mut self, child: Context) {
        self.children.push(child);
    }

    pub(crate) fn merge_data(&mut self, data: FxHashMap<String, Value>) {
        self.data.extend(data);
    }

    pub(crate) fn record_spoken(&mut self, phrase: usize, id: Option<&str>) {
        self.spoken.push(phrase);
        if let Some(id) = id {
            self.spoken_ids.push(id.to_string());
        }
    }

    pub(crate) fn record_silent(&mut self, phrase: usize) {
        self.silent.push(phrase);
    }

    pub(crate) fn record_instruction(&mut self, phrase: usize, instruction: usize) {
        self.used.push((phrase, instruction));
    }

    /// Advance the recurrence counter for a phrase and report whether
    /// another evaluation is allowed. The predicate sees the count from
    /// before this step.
    pub(crate) fn recur_step(&mut self, phrase: usize) -> bool {
        let limit = self.recur[phrase].limit.clone();
        let count = self.recur[phrase].count;
        self.recur[phrase].count += 1;
        match limit {
            RecurLimit::Count(n) => count < n,
            RecurLimit::Predicate(f) => f(count, self),
        }
    }
}
