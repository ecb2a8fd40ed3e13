//! Text embedding backends.
//!
//! [`FastEmbedder`] runs a local ONNX model through fastembed;
//! [`HashingEmbedder`] is a deterministic feature-hashing embedder for
//! offline runs where no model can be downloaded.

use crate::rag::entity_index::normalize;
use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::info;

/// Pure, deterministic `text → vector` function with a fixed dimension.
#[async_trait]
pub trait Embedder: Send + Sync + std::fmt::Debug {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

// =============================================================================
// FastEmbed
// =============================================================================

/// A CPU-bound model shared with the blocking pool.
///
/// The model never leaves shared state: each call locks it on a blocking
/// thread, so a caller whose future is dropped mid-call (a timeout, say)
/// leaves the model in place for the next one.
struct BlockingModel<M> {
    inner: Arc<Mutex<M>>,
}

impl<M: Send + 'static> BlockingModel<M> {
    fn new(model: M) -> Self {
        Self {
            inner: Arc::new(Mutex::new(model)),
        }
    }

    async fn run<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut M) -> R + Send + 'static,
        R: Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut model = inner
                .lock()
                .map_err(|_| anyhow::anyhow!("embedding model lock poisoned"))?;
            Ok(f(&mut model))
        })
        .await?
    }
}

/// Local BGE-small embedding model (384 dimensions).
///
/// Loaded on first use unless [`FastEmbedder::initialize`] ran first; the
/// binary initializes eagerly so loading never eats into a query's budget.
pub struct FastEmbedder {
    model: OnceCell<BlockingModel<TextEmbedding>>,
}

impl std::fmt::Debug for FastEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedder")
            .field("model", &"BGESmallENV15")
            .field("loaded", &self.model.initialized())
            .finish()
    }
}

impl FastEmbedder {
    pub const DIMENSION: usize = 384;

    pub fn new() -> Self {
        Self {
            model: OnceCell::new(),
        }
    }

    pub async fn initialize(&self) -> Result<()> {
        self.model().await.map(|_| ())
    }

    async fn model(&self) -> Result<&BlockingModel<TextEmbedding>> {
        self.model
            .get_or_try_init(|| async {
                info!("Initializing fastembed model (BG-Small-En-V1.5)...");
                let options = InitOptions::new(EmbeddingModel::BGESmallENV15);
                let model = tokio::task::spawn_blocking(move || TextEmbedding::try_new(options))
                    .await?
                    .context("loading fastembed model")?;
                Ok(BlockingModel::new(model))
            })
            .await
    }
}

impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Embedder for FastEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = vec![text.to_string()];
        self.model()
            .await?
            .run(move |model| model.embed(input, None))
            .await?
            .map_err(|e| anyhow::anyhow!(e))?
            .into_iter()
            .next()
            .context("No embedding generated")
    }

    fn dimension(&self) -> usize {
        Self::DIMENSION
    }
}

// =============================================================================
// Feature hashing
// =============================================================================

/// Signed feature hashing of normalized unigrams and bigrams, L2-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        feature.hash(&mut hasher);
        let h = hasher.finish();
        let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
        ((h >> 1) as usize % self.dimension, sign)
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let normalized = normalize(text);
        let tokens: Vec<&str> = normalized.split(' ').filter(|t| !t.is_empty()).collect();
        let mut v = vec![0.0_f32; self.dimension];

        for token in &tokens {
            let (i, s) = self.bucket(token);
            v[i] += s;
        }
        for pair in tokens.windows(2) {
            let (i, s) = self.bucket(&format!("{} {}", pair[0], pair[1]));
            v[i] += 0.5 * s;
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
