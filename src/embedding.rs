//! # Semantic encoder
//!
//! Dense sentence embeddings via a pretrained BERT model
//! (all-MiniLM-L6-v2) running on Candle, a pure Rust ML framework. The
//! model is stateless per call: there is no fitting step, so re-embedding a
//! post is always exact and order-independent.
//!
//! Output vectors are **L2-normalized before they leave this module**. The
//! embedding geometry is approximately isotropic, and normalizing here means
//! the downstream cosine comparison is a plain dot product regardless of the
//! encoder's raw scale — the one deliberate asymmetry with the lexical
//! space, whose raw vectors are normalized inside the comparison instead.
//!
//! Model weights are fetched from the Hugging Face Hub on first load and
//! cached locally by `hf-hub`.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::Tokenizer;

use crate::encoder::TextEncoder;
use crate::error::{EngineError, EngineResult};

/// Dimensionality of MiniLM-L6 sentence embeddings.
pub const EMBEDDING_DIMENSION: usize = 384;

const MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Pretrained sentence-embedding model behind the [`TextEncoder`] capability.
pub struct BertEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl BertEncoder {
    /// Load the model from the Hugging Face Hub (cached after first use).
    ///
    /// # Errors
    /// Returns `EngineError::Encoding` if the weights, config, or tokenizer
    /// cannot be fetched or loaded.
    pub fn load() -> EngineResult<Self> {
        let device = Device::Cpu;

        let repo = Repo::with_revision(MODEL_ID.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().map_err(encoding_err)?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo.get("config.json").map_err(encoding_err)?;
        let tokenizer_filename = api_repo.get("tokenizer.json").map_err(encoding_err)?;
        let weights_filename = api_repo.get("model.safetensors").map_err(encoding_err)?;

        let config = std::fs::read_to_string(&config_filename)
            .map_err(|e| EngineError::storage(config_filename, e))?;
        let config: Config = serde_json::from_str(&config).map_err(encoding_err)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| EngineError::Encoding(format!("failed to load tokenizer: {e}")))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)
                .map_err(encoding_err)?
        };
        let model = BertModel::load(vb, &config).map_err(encoding_err)?;

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    fn encode(&self, text: &str) -> EngineResult<Vec<f32>> {
        // Tokenize with automatic truncation at 512 tokens.
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| EngineError::Encoding(format!("tokenization error: {e}")))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(encoding_err)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(encoding_err)?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, None)
            .map_err(encoding_err)?;

        let pooled = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let normalized = self.l2_normalize(&pooled)?;

        normalized.to_vec1::<f32>().map_err(encoding_err)
    }

    /// Mean pooling over token embeddings, weighted by the attention mask.
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> EngineResult<Tensor> {
        // embeddings: [1, seq_len, hidden]; mask must broadcast as [1, seq_len, 1].
        let mask = Tensor::new(attention_mask, &self.device)
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.unsqueeze(0))
            .and_then(|t| t.unsqueeze(2))
            .map_err(encoding_err)?;

        let masked = embeddings.broadcast_mul(&mask).map_err(encoding_err)?;
        let sum = masked.sum(1).map_err(encoding_err)?;
        let count = mask
            .sum(1)
            .and_then(|t| t.clamp(1f32, f32::INFINITY))
            .map_err(encoding_err)?;
        sum.broadcast_div(&count)
            .and_then(|t| t.squeeze(0))
            .map_err(encoding_err)
    }

    /// L2-normalize so downstream cosine reduces to a dot product.
    fn l2_normalize(&self, tensor: &Tensor) -> EngineResult<Tensor> {
        let norm = tensor
            .sqr()
            .and_then(|t| t.sum_all())
            .and_then(|t| t.sqrt())
            .map_err(encoding_err)?;
        tensor.broadcast_div(&norm).map_err(encoding_err)
    }
}

impl TextEncoder for BertEncoder {
    fn transform(&self, text: &str) -> EngineResult<Vec<f32>> {
        self.encode(text)
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIMENSION
    }
}

fn encoding_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Encoding(e.to_string())
}
