//! Sampler chain: an ordered pipeline of stages over one logits vector.
//!
//! Stages run left to right: temperature → top-p → grammar → selector.
//! Filtering stages mask candidates by setting their logit to `-inf`; the
//! final stage must be a [`Selector`] and always returns exactly one token.

use crate::config::{SamplingParams, SelectorKind};
use crate::errors::SlmError;
use crate::grammar::GrammarMatcher;
use crate::tokenizer::TokenId;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use std::sync::Arc;

/// Top-p always keeps at least this many candidates.
pub const NUCLEUS_MIN_KEEP: usize = 1;

/// One vocabulary entry as it moves through the chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub id: TokenId,
    pub logit: f32,
}

impl Candidate {
    fn alive(&self) -> bool {
        self.logit > f32::NEG_INFINITY
    }

    fn mask(&mut self) {
        self.logit = f32::NEG_INFINITY;
    }
}

/// Temperature scaling is applied only for a positive, finite temperature.
pub fn temperature_enabled(temperature: f32) -> bool {
    temperature.is_finite() && temperature > 0.0
}

/// Top-p filtering is applied only for `0 < p < 1`.
pub fn nucleus_enabled(p: f32) -> bool {
    p > 0.0 && p < 1.0
}

/// Grammar constraint: masks every token whose piece would leave the grammar.
#[derive(Debug, Clone)]
pub struct GrammarStage {
    matcher: GrammarMatcher,
    /// Decoded piece for every token id.
    pieces: Arc<Vec<Vec<u8>>>,
    eos: TokenId,
}

impl GrammarStage {
    pub fn new(matcher: GrammarMatcher, pieces: Arc<Vec<Vec<u8>>>, eos: TokenId) -> Self {
        Self {
            matcher,
            pieces,
            eos,
        }
    }

    pub fn matcher(&self) -> &GrammarMatcher {
        &self.matcher
    }

    fn allows(&self, id: TokenId) -> bool {
        if id == self.eos {
            return self.matcher.is_complete();
        }
        self.pieces
            .get(id as usize)
            .is_some_and(|piece| self.matcher.accepts(piece))
    }

    fn apply(&self, candidates: &mut [Candidate]) {
        candidates.par_iter_mut().for_each(|c| {
            if c.alive() && !self.allows(c.id) {
                c.mask();
            }
        });
    }

    /// Advance the parse state by the token that was actually chosen.
    fn advance(&mut self, id: TokenId) {
        if id == self.eos {
            return;
        }
        if let Some(piece) = self.pieces.get(id as usize) {
            self.matcher.accept(piece);
        }
    }
}

/// Terminal stage.
#[derive(Debug, Clone)]
pub enum Selector {
    /// Highest logit; ties go to the lowest token id.
    Greedy,
    /// Sample in proportion to the surviving distribution.
    Sample(StdRng),
}

impl Selector {
    pub fn from_params(params: &SamplingParams) -> Self {
        let sample = match params.selector {
            SelectorKind::Greedy => false,
            SelectorKind::Sample => true,
            SelectorKind::Auto => temperature_enabled(params.temperature),
        };
        if !sample {
            return Selector::Greedy;
        }
        let rng = match params.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Selector::Sample(rng)
    }

    fn select(&mut self, candidates: &[Candidate]) -> Option<TokenId> {
        match self {
            Selector::Greedy => greedy(candidates),
            Selector::Sample(rng) => {
                let probs = softmax(candidates);
                match WeightedIndex::new(&probs) {
                    Ok(dist) => Some(candidates[dist.sample(rng)].id),
                    Err(_) => greedy(candidates),
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum SamplerStage {
    Temperature(f32),
    TopP { p: f32, min_keep: usize },
    Grammar(GrammarStage),
    Select(Selector),
}

impl SamplerStage {
    pub fn name(&self) -> &'static str {
        match self {
            SamplerStage::Temperature(_) => "temperature",
            SamplerStage::TopP { .. } => "top-p",
            SamplerStage::Grammar(_) => "grammar",
            SamplerStage::Select(Selector::Greedy) => "greedy",
            SamplerStage::Select(Selector::Sample(_)) => "sample",
        }
    }
}

/// Per-request sampler chain.
#[derive(Debug, Clone, Default)]
pub struct SamplerChain {
    stages: Vec<SamplerStage>,
    /// Number of tokens sampled so far.
    step: usize,
}

impl SamplerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, stage: SamplerStage) {
        self.stages.push(stage);
    }

    /// Build the chain for one request. Disabled stages are omitted.
    pub fn for_request(params: &SamplingParams, grammar: Option<GrammarStage>) -> Self {
        let mut chain = Self::new();
        if temperature_enabled(params.temperature) {
            chain.push(SamplerStage::Temperature(params.temperature));
        }
        if nucleus_enabled(params.top_p) {
            chain.push(SamplerStage::TopP {
                p: params.top_p,
                min_keep: NUCLEUS_MIN_KEEP,
            });
        }
        if let Some(stage) = grammar {
            chain.push(SamplerStage::Grammar(stage));
        }
        chain.push(SamplerStage::Select(Selector::from_params(params)));
        chain
    }

    pub fn stages(&self) -> &[SamplerStage] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(SamplerStage::name).collect()
    }

    pub fn has_grammar(&self) -> bool {
        self.stages
            .iter()
            .any(|s| matches!(s, SamplerStage::Grammar(_)))
    }

    /// Tokens sampled so far.
    pub fn steps(&self) -> usize {
        self.step
    }

    /// Run every stage over `logits` and return the selected token.
    pub fn sample(&mut self, logits: &[f32]) -> Result<TokenId, SlmError> {
        if !matches!(self.stages.last(), Some(SamplerStage::Select(_))) {
            return Err(SlmError::InvalidConfig(
                "sampler chain must end with a selector".to_string(),
            ));
        }
        if logits.is_empty() {
            return Err(SlmError::EmptyLogits);
        }
        let step = self.step + 1;
        let mut candidates: Vec<Candidate> = logits
            .iter()
            .enumerate()
            .map(|(i, &logit)| Candidate {
                id: i as TokenId,
                logit: if logit.is_nan() { f32::NEG_INFINITY } else { logit },
            })
            .collect();

        let mut chosen = None;
        for stage in &mut self.stages {
            match stage {
                SamplerStage::Temperature(t) => {
                    for c in candidates.iter_mut() {
                        c.logit /= *t;
                    }
                }
                SamplerStage::TopP { p, min_keep } => {
                    let keep = nucleus_retain(&candidates, *p, *min_keep);
                    let mut retained = vec![false; candidates.len()];
                    for i in keep {
                        retained[i] = true;
                    }
                    for (c, keep) in candidates.iter_mut().zip(retained) {
                        if !keep {
                            c.mask();
                        }
                    }
                }
                SamplerStage::Grammar(grammar) => {
                    grammar.apply(&mut candidates);
                    if !candidates.iter().any(Candidate::alive) {
                        return Err(SlmError::GrammarExhausted { step });
                    }
                }
                SamplerStage::Select(selector) => {
                    chosen = selector.select(&candidates);
                }
            }
        }
        let token = chosen.ok_or_else(|| {
            SlmError::InvalidConfig("sampler chain produced no token".to_string())
        })?;

        for stage in &mut self.stages {
            if let SamplerStage::Grammar(grammar) = stage {
                grammar.advance(token);
            }
        }
        self.step = step;
        Ok(token)
    }
}

/// Indices of the minimal highest-probability prefix whose cumulative
/// probability reaches `p`, never fewer than `min_keep`. Masked candidates
/// are never retained.
pub fn nucleus_retain(candidates: &[Candidate], p: f32, min_keep: usize) -> Vec<usize> {
    let probs = softmax(candidates);
    let mut order: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].alive())
        .collect();
    // Stable sort keeps lower ids first among equal probabilities.
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));

    let mut cumulative = 0.0f32;
    let mut keep = 0;
    for &i in &order {
        cumulative += probs[i];
        keep += 1;
        if cumulative >= p && keep >= min_keep {
            break;
        }
    }
    order.truncate(keep.max(min_keep.min(order.len())));
    order
}

/// Probabilities over `candidates`; masked entries get 0.
pub fn softmax(candidates: &[Candidate]) -> Vec<f32> {
    let max = candidates
        .iter()
        .map(|c| c.logit)
        .fold(f32::NEG_INFINITY, f32::max);
    if max == f32::NEG_INFINITY {
        return vec![0.0; candidates.len()];
    }
    let exp: Vec<f32> = candidates.iter().map(|c| (c.logit - max).exp()).collect();
    let sum: f32 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

fn greedy(candidates: &[Candidate]) -> Option<TokenId> {
    let mut best: Option<Candidate> = None;
    for c in candidates {
        match best {
            // Strictly greater, so the earliest (lowest id) wins ties.
            Some(b) if c.logit <= b.logit => {}
            _ => best = Some(*c),
        }
    }
    best.map(|c| c.id)
}
