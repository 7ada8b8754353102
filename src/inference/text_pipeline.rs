use anyhow::{bail, Result};
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::mixformer;
use candle_transformers::models::quantized_mixformer::MixFormerSequentialForCausalLM as QMixFormer;
use candle_transformers::quantized_var_builder::VarBuilder;
use hf_hub::api::sync::ApiRepo;
use rand::random;
use tokenizers::Tokenizer;

use crate::inference::model_config::SamplingConfig;
use crate::inference::token_output_stream::TokenOutputStream;

// Adapted from
// https://github.com/huggingface/candle/blob/main/candle-examples/examples/phi/main.rs
// https://github.com/huggingface/candle/blob/main/candle-examples/examples/quantized/main.rs
pub struct TextGeneratorPipeline {
    model: QMixFormer,
    device: Device,
    tokenizer: TokenOutputStream,
    logits_processor: LogitsProcessor,
    repeat_penalty: f32,
    repeat_context_size: usize,
}

impl TextGeneratorPipeline {
    /// Fetches the tokenizer and gguf weights from the repo (cached after the
    /// first download) and builds the model on the CPU device.
    pub fn with_quantized_gguf(
        repo: &ApiRepo,
        config: mixformer::Config,
        tokenizer_filename: &str,
        gguf_filename: &str,
        sampling: SamplingConfig,
    ) -> Result<TextGeneratorPipeline> {
        let tokenizer_file = repo.get(tokenizer_filename)?;
        let gguf_file = repo.get(gguf_filename)?;

        let device = Device::Cpu;
        let vb = VarBuilder::from_gguf(gguf_file, &device)?;
        let model = QMixFormer::new(&config, vb)?;
        let tokenizer = Tokenizer::from_file(tokenizer_file).map_err(anyhow::Error::msg)?;

        Ok(TextGeneratorPipeline {
            model,
            device,
            tokenizer: TokenOutputStream::new(tokenizer),
            logits_processor: LogitsProcessor::new(
                sampling.seed.unwrap_or(random()),
                sampling.temperature,
                sampling.top_p,
            ),
            repeat_penalty: sampling.repeat_penalty,
            repeat_context_size: sampling.repeat_context_size,
        })
    }

    /// Generates up to `max_new_tokens` tokens beyond the prompt. The
    /// returned string starts with the prompt itself followed by the
    /// continuation, along with the wall-clock generation time in seconds.
    pub fn generate(&mut self, prompt: &str, max_new_tokens: usize) -> Result<(String, f64)> {
        self.model.clear_kv_cache();
        self.tokenizer.clear();

        let mut tokens = self
            .tokenizer
            .tokenizer()
            .encode(prompt, true)
            .map_err(anyhow::Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.is_empty() {
            bail!("Prompt is empty");
        }

        let eos_token = match self
            .tokenizer
            .tokenizer()
            .get_vocab(true)
            .get("<|endoftext|>")
        {
            Some(token) => *token,
            None => bail!("Cannot find the <|endoftext|> token"),
        };

        let mut output = String::from(prompt);
        let start_gen = std::time::Instant::now();
        for index in 0..max_new_tokens {
            let context_size = if index > 0 { 1 } else { tokens.len() };
            let start_pos = tokens.len().saturating_sub(context_size);
            let input = Tensor::new(&tokens[start_pos..], &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&input)?;
            let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
            let logits = if (self.repeat_penalty - 1.).abs() < f32::EPSILON {
                logits
            } else {
                let start_at = tokens.len().saturating_sub(self.repeat_context_size);
                candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    self.repeat_penalty,
                    &tokens[start_at..],
                )?
            };

            let next_token = self.logits_processor.sample(&logits)?;
            tokens.push(next_token);
            if next_token == eos_token {
                break;
            }

            if let Some(text) = self.tokenizer.next_token(next_token)? {
                output.push_str(&text);
            }
        }
        if let Some(text) = self.tokenizer.decode_rest()? {
            output.push_str(&text);
        }

        Ok((output, start_gen.elapsed().as_secs_f64()))
    }
}
