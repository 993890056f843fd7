//! 测试替身

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use orion_core::{CollectionsConfig, IngestConfig, OrionError, Result};

use crate::archivist::{CompletionRequest, ExtractionClient};
use crate::classifier::KeywordClassifier;
use crate::embedding::{Embedding, Embeddings, EmbeddingProvider};
use crate::gateway::CollectionRegistry;
use crate::ingest::Ingestor;
use crate::text::normalize;

const MOCK_DIMENSIONS: usize = 32;

/// 查表嵌入：表中没有的文本按哈希生成确定性的伪随机向量
#[derive(Default)]
pub struct MockEmbedding {
    table: HashMap<String, Embedding>,
    calls: AtomicUsize,
}

impl MockEmbedding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.table.insert(normalize(text), vector);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn hashed(text: &str) -> Embedding {
        // FNV-1a 作种子，线性同余展开
        let mut state: u64 = 0xcbf29ce484222325;
        for byte in text.bytes() {
            state ^= u64::from(byte);
            state = state.wrapping_mul(0x100000001b3);
        }
        (0..MOCK_DIMENSIONS)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((state >> 33) as f32 / (1u64 << 31) as f32) * 2.0 - 1.0
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbedding {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-embedding"
    }

    fn dimensions(&self) -> usize {
        MOCK_DIMENSIONS
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = normalize(text);
        Ok(self
            .table
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Self::hashed(&key)))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Embeddings> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// 返回固定响应并记录调用的提取服务
pub struct MockExtractionClient {
    response: Option<String>,
    calls: AtomicUsize,
    last_request: Mutex<Option<CompletionRequest>>,
}

impl MockExtractionClient {
    pub fn new(response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: None,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<CompletionRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExtractionClient for MockExtractionClient {
    fn model(&self) -> &str {
        "mock-archivist"
    }

    async fn chat_completion(&self, request: &CompletionRequest) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        self.response
            .clone()
            .ok_or_else(|| OrionError::Extraction("connection refused".to_string()))
    }
}

pub fn test_registry() -> Arc<CollectionRegistry> {
    Arc::new(CollectionRegistry::in_memory(CollectionsConfig::default()))
}

pub fn test_ingestor() -> Ingestor {
    Ingestor::new(
        test_registry(),
        Arc::new(MockEmbedding::new()),
        Arc::new(KeywordClassifier::new()),
        IngestConfig::default(),
    )
}
