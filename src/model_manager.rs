use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use serde::Deserialize;
use tokenizers::{
    Encoding,
    PaddingParams,
    PaddingStrategy,
    Tokenizer,
    TruncationParams,
};
use tracing::{info, warn};

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    reranker::Reranker,
};

pub const DEFAULT_EMBEDDING_MODEL: &str =
    "sentence-transformers/all-MiniLM-L6-v2";
pub const DEFAULT_RERANKER_MODEL: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";
pub const EMBEDDING_MODEL_ENV_VAR: &str = "CATSEEK_EMBEDDING_MODEL";
pub const RERANKER_MODEL_ENV_VAR: &str = "CATSEEK_RERANKER_MODEL";
pub const DEVICE_ENV_VAR: &str = "CATSEEK_DEVICE";

/// Longest token sequence fed to either model.
const MAX_SEQUENCE_LENGTH: usize = 512;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum DeviceChoice {
    /// CUDA or Metal when compiled in and available, else CPU
    #[default]
    Auto,
    Cpu,
    #[value(alias = "gpu")]
    Cuda,
    #[value(alias = "mps")]
    Metal,
}

impl FromStr for DeviceChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" | "gpu" => Ok(Self::Cuda),
            "metal" | "mps" => Ok(Self::Metal),
            other => Err(Error::Config(format!("unknown device: {other}"))),
        }
    }
}

impl fmt::Display for DeviceChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Cpu => "cpu",
            Self::Cuda => "cuda",
            Self::Metal => "metal",
        })
    }
}

impl DeviceChoice {
    pub fn resolve(self) -> Result<Device> {
        match self {
            Self::Auto => Ok(default_device()),
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda => Ok(Device::new_cuda(0)?),
            Self::Metal => Ok(Device::new_metal(0)?),
        }
    }
}

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Resolves which models and device to use, and loads them on request.
#[derive(Debug, Clone)]
pub struct ModelManager {
    embedding_model: String,
    reranker_model: String,
    device: DeviceChoice,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Model ids come from `CATSEEK_EMBEDDING_MODEL` and
    /// `CATSEEK_RERANKER_MODEL`, the device from `CATSEEK_DEVICE`; unset
    /// variables fall back to the built-in defaults.
    pub fn new() -> Self {
        let device = match std::env::var(DEVICE_ENV_VAR) {
            Ok(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("{e}, falling back to auto");
                DeviceChoice::Auto
            }),
            Err(_) => DeviceChoice::Auto,
        };

        Self {
            embedding_model: std::env::var(EMBEDDING_MODEL_ENV_VAR)
                .unwrap_or_else(|_| DEFAULT_EMBEDDING_MODEL.to_string()),
            reranker_model: std::env::var(RERANKER_MODEL_ENV_VAR)
                .unwrap_or_else(|_| DEFAULT_RERANKER_MODEL.to_string()),
            device,
        }
    }

    pub fn with_embedding_model(mut self, model_id: impl Into<String>) -> Self {
        self.embedding_model = model_id.into();
        self
    }

    pub fn with_reranker_model(mut self, model_id: impl Into<String>) -> Self {
        self.reranker_model = model_id.into();
        self
    }

    pub fn with_device(mut self, device: DeviceChoice) -> Self {
        self.device = device;
        self
    }

    pub fn embedding_model_id(&self) -> &str {
        &self.embedding_model
    }

    pub fn reranker_model_id(&self) -> &str {
        &self.reranker_model
    }

    pub fn device(&self) -> DeviceChoice {
        self.device
    }

    /// Load the bi-encoder, downloading it from the Hugging Face Hub if
    /// the id is not a local directory.
    pub fn load_embedder(&self) -> Result<BertEmbedder> {
        BertEmbedder::load(&self.embedding_model, &self.device.resolve()?)
    }

    pub fn load_reranker(&self) -> Result<CrossEncoder> {
        CrossEncoder::load(&self.reranker_model, &self.device.resolve()?)
    }
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl ModelFiles {
    fn locate(model_id: &str) -> Result<Self> {
        let local = Path::new(model_id);
        if local.is_dir() {
            return Ok(Self {
                config: local.join("config.json"),
                tokenizer: local.join("tokenizer.json"),
                weights: local.join("model.safetensors"),
            });
        }

        info!(model = model_id, "fetching model files from the hub");
        let hub_err = |e: hf_hub::api::sync::ApiError| {
            Error::Model(format!("{model_id}: {e}"))
        };
        let api = hf_hub::api::sync::Api::new().map_err(hub_err)?;
        let repo = api.model(model_id.to_string());

        Ok(Self {
            config: repo.get("config.json").map_err(hub_err)?,
            tokenizer: repo.get("tokenizer.json").map_err(hub_err)?,
            weights: repo.get("model.safetensors").map_err(hub_err)?,
        })
    }

    fn read_config(&self) -> Result<(Config, usize)> {
        #[derive(Deserialize)]
        struct Dims {
            hidden_size: usize,
        }

        let text = std::fs::read_to_string(&self.config)?;
        let config: Config = serde_json::from_str(&text)?;
        let dims: Dims = serde_json::from_str(&text)?;
        Ok((config, dims.hidden_size))
    }

    fn var_builder(&self, device: &Device) -> Result<VarBuilder<'static>> {
        let bytes = std::fs::read(&self.weights)?;
        Ok(VarBuilder::from_buffered_safetensors(bytes, DTYPE, device)?)
    }

    fn tokenizer(&self) -> Result<Tokenizer> {
        let mut tokenizer =
            Tokenizer::from_file(&self.tokenizer).map_err(|e| {
                Error::Model(format!("failed to load tokenizer: {e}"))
            })?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| Error::Model(format!("invalid truncation: {e}")))?;
        Ok(tokenizer)
    }
}

/// Token ids, type ids and attention mask of a padded batch, each shaped
/// `[batch, tokens]`.
struct BatchTensors {
    ids: Tensor,
    type_ids: Tensor,
    mask: Tensor,
}

impl BatchTensors {
    fn new(encodings: &[Encoding], device: &Device) -> Result<Self> {
        let rows = encodings.len();
        let cols = encodings.first().map_or(0, |e| e.get_ids().len());

        let flatten = |field: fn(&Encoding) -> &[u32]| -> Result<Tensor> {
            let flat: Vec<u32> = encodings
                .iter()
                .flat_map(|e| field(e).iter().copied())
                .collect();
            Ok(Tensor::from_vec(flat, (rows, cols), device)?)
        };

        Ok(Self {
            ids: flatten(Encoding::get_ids)?,
            type_ids: flatten(Encoding::get_type_ids)?,
            mask: flatten(Encoding::get_attention_mask)?,
        })
    }
}

/// Sentence-transformers style bi-encoder: BERT, masked mean pooling.
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    dimension: usize,
}

impl BertEmbedder {
    pub fn load(model_id: &str, device: &Device) -> Result<Self> {
        let files = ModelFiles::locate(model_id)?;
        let (config, dimension) = files.read_config()?;
        let model = BertModel::load(files.var_builder(device)?, &config)?;

        info!(model = model_id, dimension, "embedding model loaded");
        Ok(Self {
            model,
            tokenizer: files.tokenizer()?,
            device: device.clone(),
            model_id: model_id.to_string(),
            dimension,
        })
    }
}

impl Embedder for BertEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| Error::Model(format!("tokenization failed: {e}")))?;
        let batch = BatchTensors::new(&encodings, &self.device)?;

        // [batch, tokens, hidden]
        let hidden =
            self.model
                .forward(&batch.ids, &batch.type_ids, Some(&batch.mask))?;

        let mask = batch.mask.to_dtype(DType::F32)?.unsqueeze(2)?;
        let summed = hidden.broadcast_mul(&mask)?.sum(1)?;
        let counts = mask.sum(1)?;
        let pooled = summed.broadcast_div(&counts)?;

        Ok(pooled.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }
}

/// BERT sequence-pair classifier producing one relevance logit per pair.
pub struct CrossEncoder {
    bert: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
}

impl CrossEncoder {
    pub fn load(model_id: &str, device: &Device) -> Result<Self> {
        let files = ModelFiles::locate(model_id)?;
        let (config, hidden) = files.read_config()?;
        let vb = files.var_builder(device)?;

        let bert = BertModel::load(vb.pp("bert"), &config)?;
        let pooler =
            candle_nn::linear(hidden, hidden, vb.pp("bert.pooler.dense"))?;
        let classifier = candle_nn::linear(hidden, 1, vb.pp("classifier"))?;

        info!(model = model_id, "reranker model loaded");
        Ok(Self {
            bert,
            pooler,
            classifier,
            tokenizer: files.tokenizer()?,
            device: device.clone(),
            model_id: model_id.to_string(),
        })
    }
}

impl Reranker for CrossEncoder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn score(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let pairs: Vec<(String, String)> = candidates
            .iter()
            .map(|c| (query.to_string(), c.clone()))
            .collect();
        let encodings = self
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| Error::Model(format!("tokenization failed: {e}")))?;
        let batch = BatchTensors::new(&encodings, &self.device)?;

        let hidden = self.bert.forward(
            &batch.ids,
            &batch.type_ids,
            Some(&batch.mask),
        )?;
        let cls = hidden.i((.., 0))?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits = self.classifier.forward(&pooled)?.squeeze(1)?;

        Ok(logits.to_dtype(DType::F32)?.to_vec1::<f32>()?)
    }
}
