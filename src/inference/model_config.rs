use serde::Deserialize;

/// Sampling settings applied to every generation call. Sampling stays
/// enabled by default, so identical prompts may produce different output.
#[derive(Deserialize, Debug, Copy, Clone)]
pub struct SamplingConfig {
    /// Fixed rng seed; `None` picks a random seed at pipeline construction
    pub seed: Option<u64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub repeat_penalty: f32,
    pub repeat_context_size: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            seed: None,
            temperature: Some(0.8),
            top_p: Some(0.95),
            repeat_penalty: 1.1,
            repeat_context_size: 64,
        }
    }
}
