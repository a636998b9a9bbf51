//! Generation configuration.

use serde::{Deserialize, Serialize};

/// Configuration for text generation.
///
/// The cutoff has no default: it controls how aggressively the candidate
/// set widens and must be chosen explicitly by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Relative-drop threshold for cutoff truncation sampling
    pub cutoff: f32,

    /// Maximum number of new tokens to generate
    pub max_tokens: usize,

    /// Stream text to stdout as it is produced
    pub verbose: bool,

    /// Random seed; `None` seeds from OS entropy
    pub seed: Option<u64>,
}

impl GenerationConfig {
    /// Create a configuration with the given cutoff
    pub fn new(cutoff: f32) -> Self {
        Self {
            cutoff,
            max_tokens: 100,
            verbose: false,
            seed: None,
        }
    }

    /// Set max new tokens
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the random seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Enable or disable streaming output
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
