//! Request and sampling configuration.
//!
//! [`GenerationConfig`] is the file/environment-facing form; it produces
//! [`GenerationRequest`]s, which is what the controller consumes.

use crate::errors::SlmError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_MAX_NEW_TOKENS: &str = "SLM_MAX_NEW_TOKENS";
pub const ENV_TEMPERATURE: &str = "SLM_TEMPERATURE";
pub const ENV_TOP_P: &str = "SLM_TOP_P";
pub const ENV_SEED: &str = "SLM_SEED";
pub const ENV_GRAMMAR_FILE: &str = "SLM_GRAMMAR_FILE";

/// Which terminal selector ends the sampler chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorKind {
    /// Greedy when temperature ≤ 0, sampling otherwise.
    #[default]
    Auto,
    Greedy,
    Sample,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    /// ≤ 0 disables temperature scaling.
    pub temperature: f32,
    /// Outside (0, 1) disables top-p filtering.
    pub top_p: f32,
    /// Seed for the sampling selector; `None` draws one from the OS.
    pub seed: Option<u64>,
    pub selector: SelectorKind,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_p: 1.0,
            seed: Some(42),
            selector: SelectorKind::Auto,
        }
    }
}

impl SamplingParams {
    pub fn validate(&self) -> Result<(), SlmError> {
        if !self.temperature.is_finite() {
            return Err(SlmError::InvalidConfig(format!(
                "temperature must be finite, got {}",
                self.temperature
            )));
        }
        if !self.top_p.is_finite() {
            return Err(SlmError::InvalidConfig(format!(
                "top_p must be finite, got {}",
                self.top_p
            )));
        }
        Ok(())
    }
}

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Grammar source text; `None` or blank means unconstrained.
    pub grammar: Option<String>,
    pub max_new_tokens: usize,
    pub sampling: SamplingParams,
    /// Let the tokenizer add BOS/EOS markers around the prompt.
    pub add_special: bool,
    /// Let the tokenizer turn special-token text in the prompt into ids.
    pub parse_special: bool,
    /// Stop at the first `}` after the first `{`.
    pub stop_on_closing_brace: bool,
    /// Progress is reported every this many tokens.
    pub progress_interval: usize,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        let defaults = GenerationConfig::default();
        Self {
            prompt: prompt.into(),
            grammar: None,
            max_new_tokens: defaults.max_new_tokens,
            sampling: defaults.sampling(),
            add_special: defaults.add_special,
            parse_special: defaults.parse_special,
            stop_on_closing_brace: defaults.stop_on_closing_brace,
            progress_interval: defaults.progress_interval,
        }
    }

    pub fn grammar(mut self, grammar: impl Into<String>) -> Self {
        self.grammar = Some(grammar.into());
        self
    }

    pub fn max_new_tokens(mut self, n: usize) -> Self {
        self.max_new_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.sampling.temperature = t;
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.sampling.top_p = p;
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.sampling.seed = seed;
        self
    }

    pub fn selector(mut self, selector: SelectorKind) -> Self {
        self.sampling.selector = selector;
        self
    }

    pub fn add_special(mut self, yes: bool) -> Self {
        self.add_special = yes;
        self
    }

    pub fn parse_special(mut self, yes: bool) -> Self {
        self.parse_special = yes;
        self
    }

    pub fn stop_on_closing_brace(mut self, yes: bool) -> Self {
        self.stop_on_closing_brace = yes;
        self
    }

    pub fn progress_interval(mut self, n: usize) -> Self {
        self.progress_interval = n;
        self
    }

    /// Grammar text if one was supplied and is not blank.
    pub fn grammar_source(&self) -> Option<&str> {
        self.grammar.as_deref().filter(|g| !g.trim().is_empty())
    }

    pub fn validate(&self) -> Result<(), SlmError> {
        if self.max_new_tokens == 0 {
            return Err(SlmError::InvalidConfig(
                "max_new_tokens must be greater than 0".to_string(),
            ));
        }
        if self.progress_interval == 0 {
            return Err(SlmError::InvalidConfig(
                "progress_interval must be greater than 0".to_string(),
            ));
        }
        self.sampling.validate()
    }
}

/// Generation settings loaded from JSON and the environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub seed: Option<u64>,
    pub selector: SelectorKind,
    pub add_special: bool,
    pub parse_special: bool,
    pub stop_on_closing_brace: bool,
    /// Grammar file applied to every request built from this config.
    pub grammar_file: Option<PathBuf>,
    pub progress_interval: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 48,
            temperature: 0.0,
            top_p: 1.0,
            seed: Some(42),
            selector: SelectorKind::Auto,
            add_special: true,
            parse_special: false,
            stop_on_closing_brace: true,
            grammar_file: None,
            progress_interval: 8,
        }
    }
}

impl GenerationConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SlmError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Override fields from `SLM_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), SlmError> {
        self.apply_vars(std::env::vars())
    }

    /// Override fields from `(key, value)` pairs named like the `SLM_*`
    /// variables. Empty values are ignored.
    pub fn apply_vars<I, K, V>(&mut self, vars: I) -> Result<(), SlmError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let (key, value) = (key.as_ref(), value.as_ref().trim());
            if value.is_empty() {
                continue;
            }
            match key {
                ENV_MAX_NEW_TOKENS => self.max_new_tokens = parse_var(key, value)?,
                ENV_TEMPERATURE => self.temperature = parse_var(key, value)?,
                ENV_TOP_P => self.top_p = parse_var(key, value)?,
                ENV_SEED => self.seed = Some(parse_var(key, value)?),
                ENV_GRAMMAR_FILE => self.grammar_file = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn sampling(&self) -> SamplingParams {
        SamplingParams {
            temperature: self.temperature,
            top_p: self.top_p,
            seed: self.seed,
            selector: self.selector,
        }
    }

    pub fn validate(&self) -> Result<(), SlmError> {
        if self.max_new_tokens == 0 {
            return Err(SlmError::InvalidConfig(
                "max_new_tokens must be greater than 0".to_string(),
            ));
        }
        if self.progress_interval == 0 {
            return Err(SlmError::InvalidConfig(
                "progress_interval must be greater than 0".to_string(),
            ));
        }
        self.sampling().validate()
    }

    /// Build a request for `prompt`, reading the grammar file if configured.
    pub fn request(&self, prompt: impl Into<String>) -> Result<GenerationRequest, SlmError> {
        self.validate()?;
        let grammar = match &self.grammar_file {
            Some(path) => Some(std::fs::read_to_string(path)?),
            None => None,
        };
        Ok(GenerationRequest {
            prompt: prompt.into(),
            grammar,
            max_new_tokens: self.max_new_tokens,
            sampling: self.sampling(),
            add_special: self.add_special,
            parse_special: self.parse_special,
            stop_on_closing_brace: self.stop_on_closing_brace,
            progress_interval: self.progress_interval,
        })
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SlmError> {
    value
        .parse()
        .map_err(|_| SlmError::InvalidConfig(format!("{}: cannot parse '{}'", key, value)))
}
