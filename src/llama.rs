//! llama.cpp backed [`TextGenerator`], built with the `llama` feature.

use crate::local::{GenerationError, GenerationParams, TextGenerator};
use anyhow::{anyhow, Context};
use encoding_rs::{CoderResult, Decoder, UTF_8};
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaLoraAdapter, LlamaModel, Special};
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::DecodeError;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Clone, Debug)]
pub struct LlamaGeneratorConfig {
    pub model_path: PathBuf,
    pub adapter_path: Option<PathBuf>,
    pub ctx_size: u32,
    pub threads: i32,
    pub seed: u32,
}

/// Base weights loaded once for the life of the process, optionally with a
/// LoRA adapter applied to every context.
///
/// Each call builds its own `LlamaContext`; dropping it at the end of the
/// call releases the KV cache and batch buffers whatever the outcome.
pub struct LlamaCppGenerator {
    // Drop order: adapter, model, then backend.
    adapter: Option<Mutex<LlamaLoraAdapter>>,
    model: LlamaModel,
    backend: LlamaBackend,
    ctx_size: u32,
    threads: i32,
    seed: u32,
}

impl LlamaCppGenerator {
    pub fn load(cfg: LlamaGeneratorConfig) -> anyhow::Result<Self> {
        if !cfg.model_path.exists() {
            return Err(anyhow!("local model not found: {}", cfg.model_path.display()));
        }
        let backend = LlamaBackend::init().context("init llama backend")?;
        let model = LlamaModel::load_from_file(&backend, &cfg.model_path, &LlamaModelParams::default())
            .with_context(|| format!("load model {}", cfg.model_path.display()))?;

        let adapter = match &cfg.adapter_path {
            Some(path) => Some(Mutex::new(load_adapter(&model, path)?)),
            None => None,
        };

        log::info!(
            "Loaded local model {} (adapter: {})",
            cfg.model_path.display(),
            cfg.adapter_path
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string())
        );

        Ok(Self {
            adapter,
            model,
            backend,
            ctx_size: cfg.ctx_size.max(256),
            threads: cfg.threads,
            seed: cfg.seed,
        })
    }

    fn new_context(&self) -> Result<LlamaContext<'_>, GenerationError> {
        let mut params = LlamaContextParams::default().with_n_ctx(NonZeroU32::new(self.ctx_size));
        if self.threads > 0 {
            params = params
                .with_n_threads(self.threads)
                .with_n_threads_batch(self.threads);
        }
        #[allow(unused_mut)]
        let mut ctx = self.model.new_context(&self.backend, params).map_err(|e| {
            log::error!("Failed to allocate llama context: {}", e);
            GenerationError::OutOfMemory
        })?;

        if let Some(adapter) = &self.adapter {
            let mut adapter = adapter
                .lock()
                .map_err(|_| GenerationError::Failed("adapter lock poisoned".to_string()))?;
            ctx.lora_adapter_set(&mut adapter, 1.0)
                .map_err(|e| GenerationError::Failed(format!("apply adapter: {}", e)))?;
        }
        Ok(ctx)
    }

    fn run(&self, ctx: &mut LlamaContext<'_>, prompt: &str, params: &GenerationParams) -> Result<String, GenerationError> {
        let tokens = self
            .model
            .str_to_token(prompt, add_bos_for(prompt))
            .map_err(|e| GenerationError::Failed(format!("tokenize prompt: {}", e)))?;
        if tokens.is_empty() {
            return Err(GenerationError::Failed("empty prompt".to_string()));
        }

        let n_ctx = ctx.n_ctx() as usize;
        let available = n_ctx.saturating_sub(tokens.len() + 1);
        if available == 0 {
            return Err(GenerationError::Failed(format!(
                "prompt too long: {} tokens for a {} token context",
                tokens.len(),
                n_ctx
            )));
        }
        let max_new = (params.max_new_tokens as usize).min(available);

        let n_batch = (ctx.n_batch() as usize).max(1);
        let last_index = tokens.len() - 1;
        for (chunk_idx, chunk) in tokens.chunks(n_batch).enumerate() {
            let mut batch = LlamaBatch::new(chunk.len(), 1);
            for (i, token) in chunk.iter().copied().enumerate() {
                let pos = chunk_idx * n_batch + i;
                batch
                    .add(token, pos as i32, &[0], pos == last_index)
                    .map_err(|e| GenerationError::Failed(format!("batch prompt: {}", e)))?;
            }
            decode(ctx, &mut batch)?;
        }

        let mut sampler = LlamaSampler::chain_simple([
            LlamaSampler::temp(params.temperature),
            LlamaSampler::top_p(params.top_p, 1),
            if params.temperature <= 0.0 {
                LlamaSampler::greedy()
            } else {
                LlamaSampler::dist(self.seed)
            },
        ]);

        let mut decoder = UTF_8.new_decoder();
        let mut out = String::from(prompt);
        let mut batch = LlamaBatch::new(1, 1);
        let mut n_cur = tokens.len() as i32;
        for _ in 0..max_new {
            let token = sampler.sample(ctx, -1);
            sampler.accept(token);
            if self.model.is_eog_token(token) {
                out.push_str("</s>");
                break;
            }
            let bytes = self
                .model
                .token_to_bytes(token, Special::Tokenize)
                .map_err(|e| GenerationError::Failed(format!("detokenize: {}", e)))?;
            out.push_str(&decode_piece(&mut decoder, &bytes, false));

            batch.clear();
            batch
                .add(token, n_cur, &[0], true)
                .map_err(|e| GenerationError::Failed(format!("batch token: {}", e)))?;
            n_cur += 1;
            decode(ctx, &mut batch)?;
        }

        out.push_str(&decode_piece(&mut decoder, &[], true));
        Ok(out)
    }
}

impl TextGenerator for LlamaCppGenerator {
    fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String, GenerationError> {
        let mut ctx = self.new_context()?;
        let result = self.run(&mut ctx, prompt, params);
        drop(ctx);
        result
    }
}

fn load_adapter(model: &LlamaModel, path: &Path) -> anyhow::Result<LlamaLoraAdapter> {
    model
        .lora_adapter_init(path)
        .with_context(|| format!("load adapter {}", path.display()))
}

fn decode(ctx: &mut LlamaContext<'_>, batch: &mut LlamaBatch) -> Result<(), GenerationError> {
    ctx.decode(batch).map_err(|err| match err {
        DecodeError::NoKvCacheSlot => GenerationError::OutOfMemory,
        // foreign exception from ggml, almost always an allocation failure
        DecodeError::Unknown(-2) => GenerationError::OutOfMemory,
        other => GenerationError::Failed(format!("decode: {}", other)),
    })
}

/// Decodes one token's bytes, carrying split multi-byte sequences over to
/// the next call. Grows the buffer until the decoder has consumed `bytes`.
fn decode_piece(decoder: &mut Decoder, mut bytes: &[u8], last: bool) -> String {
    let mut piece = String::new();
    loop {
        let needed = decoder
            .max_utf8_buffer_length(bytes.len())
            .unwrap_or(bytes.len() * 3 + 4);
        piece.reserve(needed.max(4));
        let (result, read, _) = decoder.decode_to_string(bytes, &mut piece, last);
        bytes = &bytes[read..];
        match result {
            CoderResult::InputEmpty => return piece,
            CoderResult::OutputFull => continue,
        }
    }
}

fn add_bos_for(prompt: &str) -> AddBos {
    if prompt.trim_start().starts_with("<s>") {
        AddBos::Never
    } else {
        AddBos::Always
    }
}
