use anyhow::Result;

pub mod chat_model;
pub mod model_config;
pub mod text_pipeline;
pub mod token_output_stream;

/// Seam between the HTTP layer and the model: a prompt in, the generated
/// text out. Generation mutates model state (kv cache, sampler rng), hence
/// `&mut self`; the caller provides the locking discipline.
pub trait TextGenerator: Send {
    fn generate(&mut self, prompt: &str, max_new_tokens: usize) -> Result<String>;
}
