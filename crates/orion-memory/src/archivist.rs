//! 后台 archivist
//!
//! 在内存中缓存最近的对话轮次，每累计 `min_new_turns` 个助手轮次就把窗口内的
//! 用户发言交给外部提取服务，解析出的事实作为语义候选写入。
//! 这条路径是尽力而为的：调用方记录错误后丢弃，不影响对话。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orion_core::{ArchivistConfig, ArchivistPoolConfig, OrionError, Result, Role, Turn};
use orion_vector::{MetaValue, Metadata};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::ingest::{IngestRequest, Ingestor, MemoryKind};
use crate::promote::{PromoteOptions, promote_candidates};

/// 提取服务的系统提示
pub const REFLECTION_CONTRACT: &str = "\
You are Orion's background archivist. Read the chat turns and extract stable, reusable facts \
about the USER that will still be true in future sessions: preferences, environment, tools, \
projects, long-lived goals. Ignore small talk, emotions, one-off events and anything said about \
the assistant itself.

Respond with exactly one JSON object and nothing else:
{\"relevant\": true|false, \"facts\": [{\"text\": \"...\", \"category\": \"...\", \"confidence\": 0.0-1.0}]}

- relevant is false when the turns contain no durable facts; facts is then empty.
- text is a single self-contained sentence in third person (\"The user prefers ...\").
- category is one of: preference, environment, project, identity, skill, other.
- confidence reflects how certain and how durable the fact is.";

const USER_PROMPT_HEADER: &str = "Analyze the following chat turns and extract ONLY durable semantic facts about the USER.\n\
Return JSON that strictly conforms to the contract.\n\
Turns:\n";

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout: Duration,
}

/// 外部对话补全服务
#[async_trait]
pub trait ExtractionClient: Send + Sync {
    fn model(&self) -> &str;
    async fn chat_completion(&self, request: &CompletionRequest) -> Result<String>;
}

/// OpenAI 兼容的 `/chat/completions` 接口 (Ollama、LM Studio、vLLM 等)
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    pub fn from_config(config: &ArchivistConfig) -> Self {
        Self::new(&config.base_url, &config.api_key, &config.model)
    }
}

#[async_trait]
impl ExtractionClient for OpenAiCompatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn chat_completion(&self, request: &CompletionRequest) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(request.timeout)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": request.system},
                    {"role": "user", "content": request.user},
                ],
                "temperature": request.temperature,
                "max_tokens": request.max_tokens,
                "stream": false,
            }))
            .send()
            .await
            .map_err(|e| OrionError::Extraction(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OrionError::Extraction(format!("HTTP {}: {}", status, body)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| OrionError::Extraction(e.to_string()))?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| OrionError::Extraction(format!("Unexpected response shape: {}", json)))
    }
}

/// 从第一个 `{` 开始按括号配对截取 JSON 对象，忽略前后多余文本
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let chunk = &text[start..=start + offset];
                    return match serde_json::from_str::<Value>(chunk) {
                        Ok(Value::Object(map)) => Some(map),
                        _ => None,
                    };
                }
            }
            _ => {}
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFact {
    pub text: String,
    pub category: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub relevant: bool,
    pub facts: Vec<ExtractedFact>,
}

fn coerce_confidence(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// 只保留 text 和 category 都是非空字符串的事实
pub fn parse_extraction(object: &Map<String, Value>) -> Extraction {
    let relevant = object
        .get("relevant")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let facts = object
        .get("facts")
        .and_then(Value::as_array)
        .map(|facts| {
            facts
                .iter()
                .filter_map(|fact| {
                    let text = fact.get("text")?.as_str()?.trim();
                    let category = fact.get("category")?.as_str()?.trim();
                    if text.is_empty() || category.is_empty() {
                        return None;
                    }
                    Some(ExtractedFact {
                        text: text.to_string(),
                        category: category.to_string(),
                        confidence: coerce_confidence(fact.get("confidence")),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Extraction { relevant, facts }
}

/// 轮次缓冲区与新轮次计数
#[derive(Debug)]
pub struct ArchivistPool {
    turns: Vec<Turn>,
    new_turns: usize,
    window_turns: usize,
    min_new_turns: usize,
}

impl ArchivistPool {
    pub fn new(config: &ArchivistPoolConfig) -> Self {
        Self {
            turns: Vec::new(),
            new_turns: 0,
            window_turns: config.window_turns.max(1),
            min_new_turns: config.min_new_turns.max(1),
        }
    }

    /// 助手轮次计入新轮次计数
    pub fn push(&mut self, turn: Turn) {
        if turn.role == Role::Assistant {
            self.new_turns += 1;
        }
        self.turns.push(turn);
    }

    /// 计数达到阈值时取出窗口内的用户发言，同时清零计数并裁剪缓冲区
    pub fn take_due(&mut self) -> Option<Vec<Turn>> {
        if self.new_turns < self.min_new_turns {
            return None;
        }
        let start = self.turns.len().saturating_sub(self.window_turns);
        let window: Vec<Turn> = self.turns[start..]
            .iter()
            .filter(|t| t.role == Role::User && !t.is_empty())
            .cloned()
            .collect();

        self.new_turns = 0;
        let cap = self.window_turns * 2;
        if self.turns.len() > cap {
            let excess = self.turns.len() - cap;
            self.turns.drain(..excess);
        }
        Some(window)
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn new_turns(&self) -> usize {
        self.new_turns
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchivistReport {
    /// 本轮是否调用了提取服务
    pub invoked: bool,
    pub relevant: bool,
    pub facts_seen: usize,
    pub facts_staged: usize,
    pub promoted: usize,
}

pub struct Archivist {
    pool: Mutex<ArchivistPool>,
    client: Arc<dyn ExtractionClient>,
    ingestor: Arc<Ingestor>,
    config: ArchivistConfig,
}

impl Archivist {
    pub fn new(
        config: ArchivistConfig,
        client: Arc<dyn ExtractionClient>,
        ingestor: Arc<Ingestor>,
    ) -> Self {
        Self {
            pool: Mutex::new(ArchivistPool::new(&config.pool)),
            client,
            ingestor,
            config,
        }
    }

    /// 记录一条用户轮次
    pub async fn observe(&self, turn: Turn) {
        self.pool.lock().await.push(turn);
    }

    pub async fn buffered(&self) -> usize {
        self.pool.lock().await.len()
    }

    /// 记录助手轮次，计数到达阈值时触发一次提取
    pub async fn on_assistant_turn(&self, turn: Turn) -> Result<ArchivistReport> {
        let window = {
            let mut pool = self.pool.lock().await;
            pool.push(turn);
            pool.take_due()
        };

        let Some(window) = window else {
            return Ok(ArchivistReport::default());
        };
        if window.is_empty() {
            tracing::debug!("Archivist window has no user turns, skipping extraction");
            return Ok(ArchivistReport::default());
        }

        self.extract(&window).await
    }

    async fn extract(&self, window: &[Turn]) -> Result<ArchivistReport> {
        let request = CompletionRequest {
            system: REFLECTION_CONTRACT.to_string(),
            user: format!("{}{}", USER_PROMPT_HEADER, serde_json::to_string(window)?),
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            timeout: Duration::from_secs(self.config.timeout_s),
        };

        tracing::debug!("Invoking archivist on {} user turns", window.len());
        let raw = self.client.chat_completion(&request).await?;

        let mut report = ArchivistReport {
            invoked: true,
            ..ArchivistReport::default()
        };

        let Some(object) = extract_json_object(&raw) else {
            tracing::warn!("Archivist response contained no JSON object");
            return Ok(report);
        };
        let extraction = parse_extraction(&object);
        report.relevant = extraction.relevant;
        report.facts_seen = extraction.facts.len();
        if !extraction.relevant {
            return Ok(report);
        }

        for fact in extraction.facts {
            let mut metadata = Metadata::new();
            metadata.insert("source".to_string(), MetaValue::from("archivist"));
            metadata.insert("model".to_string(), MetaValue::from(self.client.model()));
            metadata.insert("category".to_string(), MetaValue::from(fact.category));
            metadata.insert("confidence".to_string(), MetaValue::Float(fact.confidence));

            let request =
                IngestRequest::new(MemoryKind::Candidate, fact.text).with_metadata(metadata);
            if self.ingestor.ingest(request).await?.id().is_some() {
                report.facts_staged += 1;
            }
        }

        if self.config.write.auto_promote && report.facts_staged > 0 {
            let options = PromoteOptions {
                min_confidence: f64::from(self.config.write.promote_min_confidence),
                source: Some("archivist".to_string()),
                ..PromoteOptions::default()
            };
            report.promoted = promote_candidates(&self.ingestor, &options).await?.promoted;
        }

        tracing::info!(
            "Archivist staged {} of {} facts",
            report.facts_staged,
            report.facts_seen
        );
        Ok(report)
    }
}
