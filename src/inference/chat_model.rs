use anyhow::Result;
use candle_transformers::models::mixformer;
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use tracing::info;

use crate::inference::model_config::SamplingConfig;
use crate::inference::text_pipeline::TextGeneratorPipeline;
use crate::inference::TextGenerator;

const REPO_ID: &str = "lmz/candle-quantized-phi";
const REPO_REVISION: &str = "main";
const TOKENIZER_FILENAME: &str = "tokenizer-puffin-phi-v2.json";
const GGUF_FILENAME: &str = "model-puffin-phi-v2-q80.gguf";

/// The one pretrained model this server exposes: quantized puffin-phi-v2,
/// fetched from the Hugging Face hub and cached locally.
pub struct ChatModel {
    pipeline: TextGeneratorPipeline,
}

impl ChatModel {
    /// Downloads the weights on a cold cache and builds the generation
    /// pipeline. Blocking and potentially slow; meant to run once at startup.
    pub fn load(api: Api, sampling: SamplingConfig) -> Result<Self> {
        let repo = api.repo(Repo::with_revision(
            REPO_ID.into(),
            RepoType::Model,
            REPO_REVISION.into(),
        ));
        let pipeline = TextGeneratorPipeline::with_quantized_gguf(
            &repo,
            mixformer::Config::puffin_phi_v2(),
            TOKENIZER_FILENAME,
            GGUF_FILENAME,
            sampling,
        )?;

        Ok(ChatModel { pipeline })
    }
}

impl TextGenerator for ChatModel {
    fn generate(&mut self, prompt: &str, max_new_tokens: usize) -> Result<String> {
        let (output, inference_time) = self.pipeline.generate(prompt, max_new_tokens)?;
        info!(inference_time, max_new_tokens, "generation finished");
        Ok(output)
    }
}
