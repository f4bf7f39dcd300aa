//! Token estimation for LLM context budgeting
//!
//! The default estimator is a cheap heuristic built from two signals:
//! - words: whitespace-separated word count / 0.75
//! - chars: character count / 4
//!
//! `EstimateMethod` picks how the two are combined. The `cl100k` and `o200k`
//! methods count with a real BPE encoding (via tiktoken) and fall back to the
//! heuristic `max` when the encoding cannot be loaded.
//!
//! ```rust
//! use ctxsync::core::tokenizer::{estimate, EstimateMethod};
//!
//! assert_eq!(estimate("Hello world 1234", EstimateMethod::Max), 4);
//! ```

use once_cell::sync::Lazy;
use std::fmt;
use std::str::FromStr;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};
use tracing::debug;

use crate::core::model::FileNode;
use crate::core::settings::BatchOptions;

/// How word- and char-based estimates are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EstimateMethod {
    Average,
    Words,
    Chars,
    #[default]
    Max,
    Min,
    /// cl100k_base BPE (GPT-4, GPT-3.5-turbo)
    Cl100k,
    /// o200k_base BPE (GPT-4o)
    O200k,
}

impl EstimateMethod {
    /// List all available methods
    pub fn available_methods() -> &'static [&'static str] {
        &["average", "words", "chars", "max", "min", "cl100k", "o200k"]
    }

    fn bpe(&self) -> Option<&'static CoreBPE> {
        match self {
            EstimateMethod::Cl100k => CL100K_BPE.as_ref().ok(),
            EstimateMethod::O200k => O200K_BPE.as_ref().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for EstimateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EstimateMethod::Average => "average",
            EstimateMethod::Words => "words",
            EstimateMethod::Chars => "chars",
            EstimateMethod::Max => "max",
            EstimateMethod::Min => "min",
            EstimateMethod::Cl100k => "cl100k",
            EstimateMethod::O200k => "o200k",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for EstimateMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "average" | "avg" => Ok(EstimateMethod::Average),
            "words" => Ok(EstimateMethod::Words),
            "chars" | "characters" => Ok(EstimateMethod::Chars),
            "max" | "default" => Ok(EstimateMethod::Max),
            "min" => Ok(EstimateMethod::Min),
            "cl100k" | "cl100k_base" | "gpt4" => Ok(EstimateMethod::Cl100k),
            "o200k" | "o200k_base" | "gpt4o" => Ok(EstimateMethod::O200k),
            _ => Err(format!(
                "Unknown method: {}. Available: {}",
                s,
                EstimateMethod::available_methods().join(", ")
            )),
        }
    }
}

// Lazy-initialized BPE encodings (loaded once on first use)
static CL100K_BPE: Lazy<Result<CoreBPE, String>> =
    Lazy::new(|| cl100k_base().map_err(|e| format!("Failed to load cl100k_base: {}", e)));

static O200K_BPE: Lazy<Result<CoreBPE, String>> =
    Lazy::new(|| o200k_base().map_err(|e| format!("Failed to load o200k_base: {}", e)));

/// Estimate the number of tokens in `text`
pub fn estimate(text: &str, method: EstimateMethod) -> usize {
    if text.is_empty() {
        return 0;
    }

    if matches!(method, EstimateMethod::Cl100k | EstimateMethod::O200k) {
        match method.bpe() {
            Some(bpe) => return bpe.encode_with_special_tokens(text).len(),
            None => {
                debug!("{} encoding unavailable, using heuristic", method);
                return estimate(text, EstimateMethod::Max);
            }
        }
    }

    let words = text.split_whitespace().count() as f64 / 0.75;
    let chars = text.chars().count() as f64 / 4.0;

    let value = match method {
        EstimateMethod::Average => (words + chars) / 2.0,
        EstimateMethod::Words => words,
        EstimateMethod::Chars => chars,
        EstimateMethod::Min => words.min(chars),
        _ => words.max(chars),
    };
    value.floor() as usize
}

/// Estimate every file node that carries cached content.
///
/// Nodes are walked in chunks of `options.size`; chunking only sets the
/// iteration granularity, `callback` still fires once per qualifying node.
/// Returns the sum of all estimates.
pub fn stream_estimate<F>(
    nodes: &[FileNode],
    method: EstimateMethod,
    options: BatchOptions,
    mut callback: F,
) -> usize
where
    F: FnMut(usize),
{
    let mut total = 0;
    for chunk in nodes.chunks(options.size.max(1)) {
        for node in chunk {
            if node.is_dir() {
                continue;
            }
            if let Some(content) = &node.content {
                let tokens = estimate(content, method);
                total += tokens;
                callback(tokens);
            }
        }
    }
    total
}

/// Running token total; only grows until cleared
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounter {
    total: usize,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to the running total and return the new value
    pub fn add(&mut self, tokens: usize) -> usize {
        self.total = self.total.saturating_add(tokens);
        self.total
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn clear(&mut self) {
        self.total = 0;
    }
}
