//! Embedding Provider Trait
//!
//! 定义独立的嵌入向量生成接口。同一规范化文本必须得到同一向量，
//! 去重和召回都依赖这一点。

use std::sync::Arc;

use async_trait::async_trait;
use orion_core::{EmbeddingConfig, OrionError, Result};

pub type Embedding = Vec<f32>;
pub type Embeddings = Vec<Embedding>;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Embedding>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Embeddings>;
}

fn parse_vector(value: &serde_json::Value) -> Result<Embedding> {
    let values = value
        .as_array()
        .ok_or_else(|| OrionError::Embedding("Invalid response format".to_string()))?;
    let embedding: Embedding = values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect();
    if embedding.is_empty() {
        return Err(OrionError::Embedding("Empty embedding returned".to_string()));
    }
    Ok(embedding)
}

pub struct OpenAIEmbedding {
    client: reqwest::Client,
    model: String,
    dimensions: usize,
    api_key: String,
    base_url: String,
}

impl OpenAIEmbedding {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            api_key,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self.dimensions = match model {
            "text-embedding-3-large" => 3072,
            _ => 1536,
        };
        self
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbedding {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| OrionError::Embedding("Empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Embeddings> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": texts,
                "model": self.model,
            }))
            .send()
            .await
            .map_err(|e| OrionError::Embedding(e.to_string()))?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(OrionError::Embedding(error));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OrionError::Embedding(e.to_string()))?;

        json["data"]
            .as_array()
            .ok_or_else(|| OrionError::Embedding("Invalid response format".to_string()))?
            .iter()
            .map(|item| parse_vector(&item["embedding"]))
            .collect()
    }
}

pub struct OllamaEmbedding {
    client: reqwest::Client,
    model: String,
    base_url: String,
    dimensions: usize,
}

impl OllamaEmbedding {
    pub fn new(model: &str) -> Self {
        let dimensions = match model {
            "mxbai-embed-large" => 1024,
            "all-minilm" => 384,
            _ => 768,
        };
        Self {
            client: reqwest::Client::new(),
            model: model.to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimensions,
        }
    }

    pub fn with_base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedding {
    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let response = self
            .client
            .post(format!("{}/api/embeddings", self.base_url))
            .json(&serde_json::json!({
                "model": self.model,
                "prompt": text,
            }))
            .send()
            .await
            .map_err(|e| OrionError::Embedding(e.to_string()))?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(OrionError::Embedding(error));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| OrionError::Embedding(e.to_string()))?;

        parse_vector(&json["embedding"])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Embeddings> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }
}

/// 按配置创建嵌入服务
pub fn create_embedding_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.to_lowercase().as_str() {
        "ollama" => {
            let mut provider =
                OllamaEmbedding::new(&config.model).with_dimensions(config.dimensions);
            if let Some(url) = &config.base_url {
                provider = provider.with_base_url(url);
            }
            Ok(Arc::new(provider))
        }
        "openai" => {
            let api_key = config
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .ok_or_else(|| {
                    OrionError::Config("openai 嵌入服务需要 embedding.api_key".to_string())
                })?;
            let mut provider = OpenAIEmbedding::new(api_key).with_model(&config.model);
            if let Some(url) = &config.base_url {
                provider = provider.with_base_url(url);
            }
            Ok(Arc::new(provider))
        }
        other => Err(OrionError::Config(format!("未知的嵌入服务: {}", other))),
    }
}
