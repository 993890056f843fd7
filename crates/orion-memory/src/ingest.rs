//! 写入管线 - 规范化、长度门槛、去重、分配 id

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use orion_core::{IngestConfig, OrionError, Result, Role};
use orion_vector::{MetaValue, Metadata};
use tokio::sync::Mutex;

use crate::classifier::Classifier;
use crate::embedding::EmbeddingProvider;
use crate::gateway::{Collection, CollectionRegistry};
use crate::text::{content_hash, normalize, word_count};

/// 写入目标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryKind {
    Persona,
    Episodic,
    Semantic,
    Candidate,
}

impl MemoryKind {
    pub fn collection(&self) -> Collection {
        match self {
            MemoryKind::Persona => Collection::Persona,
            MemoryKind::Episodic => Collection::Episodic,
            MemoryKind::Semantic => Collection::Semantic,
            MemoryKind::Candidate => Collection::SemanticCandidates,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryKind::Persona => "persona",
            MemoryKind::Episodic => "episodic",
            MemoryKind::Semantic => "semantic",
            MemoryKind::Candidate => "candidate",
        }
    }

    /// 内容寻址 id 的前缀，顺序 id 的类型返回 None
    fn hash_prefix(&self) -> Option<&'static str> {
        match self {
            MemoryKind::Semantic => Some("semantic"),
            MemoryKind::Candidate => Some("semcand"),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryKind {
    type Err = OrionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "persona" => Ok(MemoryKind::Persona),
            "episodic" => Ok(MemoryKind::Episodic),
            "semantic" => Ok(MemoryKind::Semantic),
            "candidate" | "candidates" => Ok(MemoryKind::Candidate),
            other => Err(OrionError::InvalidArgument(format!("未知记忆类型: {}", other))),
        }
    }
}

/// 内容被拒绝的原因，不是错误
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    Empty,
    TooShort { words: usize, min_length: usize },
    LowValue,
    Duplicate { distance: f32 },
    AlreadyExists { id: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Empty => f.write_str("empty"),
            Rejection::TooShort { words, min_length } => {
                write!(f, "too short ({} < {} words)", words, min_length)
            }
            Rejection::LowValue => f.write_str("low value"),
            Rejection::Duplicate { distance } => write!(f, "near duplicate (distance {:.4})", distance),
            Rejection::AlreadyExists { id } => write!(f, "already exists ({})", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Stored(String),
    Rejected(Rejection),
}

impl IngestOutcome {
    pub fn id(&self) -> Option<&str> {
        match self {
            IngestOutcome::Stored(id) => Some(id),
            IngestOutcome::Rejected(_) => None,
        }
    }

    pub fn into_id(self) -> Option<String> {
        match self {
            IngestOutcome::Stored(id) => Some(id),
            IngestOutcome::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub kind: MemoryKind,
    pub text: String,
    pub metadata: Metadata,
    /// 为空时使用配置中该类型的默认值
    pub min_length: Option<usize>,
    pub id: Option<String>,
}

impl IngestRequest {
    pub fn new(kind: MemoryKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            metadata: Metadata::new(),
            min_length: None,
            id: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_min_length(mut self, min_length: usize) -> Self {
        self.min_length = Some(min_length);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// `<session_id>:<role>:<turn_index:04>`
pub fn episodic_turn_id(session_id: &str, role: Role, turn_index: i64) -> String {
    format!("{}:{}:{:04}", session_id, role.as_str(), turn_index)
}

/// 元数据里同时有 session_id / role / turn_index 时得到溯源 id
fn provenance_id(metadata: &Metadata) -> Option<String> {
    let session = metadata.get("session_id")?.as_str()?;
    let role: Role = metadata.get("role")?.as_str()?.parse().ok()?;
    let turn_index = metadata.get("turn_index")?.as_i64()?;
    if session.is_empty() {
        return None;
    }
    Some(episodic_turn_id(session, role, turn_index))
}

/// 顺序 id 计数器，首次使用时从集合中已有的最大序号继续
#[derive(Default)]
struct SequenceCounter {
    next: Mutex<Option<u64>>,
}

impl SequenceCounter {
    async fn next_id(
        &self,
        prefix: &str,
        registry: &CollectionRegistry,
        collection: Collection,
    ) -> Result<String> {
        let mut next = self.next.lock().await;
        let value = match *next {
            Some(v) => v,
            None => {
                let marker = format!("{}-", prefix);
                registry
                    .list(collection, None)
                    .await?
                    .iter()
                    .filter_map(|item| item.id.strip_prefix(&marker)?.parse::<u64>().ok())
                    .max()
                    .unwrap_or(0)
                    + 1
            }
        };
        *next = Some(value + 1);
        Ok(format!("{}-{}", prefix, value))
    }
}

pub struct Ingestor {
    registry: Arc<CollectionRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    classifier: Arc<dyn Classifier>,
    config: IngestConfig,
    persona_seq: SequenceCounter,
    episodic_seq: SequenceCounter,
}

impl Ingestor {
    pub fn new(
        registry: Arc<CollectionRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
        classifier: Arc<dyn Classifier>,
        config: IngestConfig,
    ) -> Self {
        Self {
            registry,
            embedder,
            classifier,
            config,
            persona_seq: SequenceCounter::default(),
            episodic_seq: SequenceCounter::default(),
        }
    }

    pub fn registry(&self) -> &Arc<CollectionRegistry> {
        &self.registry
    }

    pub fn classifier(&self) -> &Arc<dyn Classifier> {
        &self.classifier
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    fn default_min_length(&self, kind: MemoryKind) -> usize {
        match kind {
            MemoryKind::Persona => self.config.persona_min_length,
            MemoryKind::Episodic => self.config.episodic_min_length,
            MemoryKind::Semantic => self.config.semantic_min_length,
            MemoryKind::Candidate => self.config.candidate_min_length,
        }
    }

    /// 写入一条记忆。内容不合格返回 `Rejected`，只有存储或嵌入服务故障才返回错误
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let IngestRequest {
            kind,
            text,
            metadata,
            min_length,
            id,
        } = request;
        let collection = kind.collection();

        let mut clean = normalize(&text);
        if clean.is_empty() {
            return Ok(self.reject(kind, Rejection::Empty));
        }

        if kind == MemoryKind::Candidate {
            clean = self.classifier.strip_leading_greeting(&clean);
            if self.classifier.is_low_value(&clean, Some(&metadata)) {
                return Ok(self.reject(kind, Rejection::LowValue));
            }
        }

        let min_length = min_length.unwrap_or_else(|| self.default_min_length(kind));
        let words = word_count(&clean);
        if words < min_length {
            return Ok(self.reject(kind, Rejection::TooShort { words, min_length }));
        }

        let hashed_id = kind
            .hash_prefix()
            .map(|prefix| format!("{}-{}", prefix, content_hash(&clean)));
        if hashed_id.is_some() {
            let check_id = id.as_ref().or(hashed_id.as_ref());
            if let Some(check_id) = check_id {
                if self.registry.exists(collection, check_id).await? {
                    return Ok(self.reject(
                        kind,
                        Rejection::AlreadyExists {
                            id: check_id.clone(),
                        },
                    ));
                }
            }
        }

        let vector = self.embedder.embed(&clean).await?;

        if kind == MemoryKind::Episodic {
            let nearest = self
                .registry
                .query(collection, vector.clone(), 1, None)
                .await?;
            if let Some(hit) = nearest.first() {
                if hit.distance < self.config.dedup_distance {
                    return Ok(self.reject(
                        kind,
                        Rejection::Duplicate {
                            distance: hit.distance,
                        },
                    ));
                }
            }
        }

        let id = match id.or(hashed_id) {
            Some(id) => id,
            None => match kind {
                MemoryKind::Episodic => match provenance_id(&metadata) {
                    Some(id) => id,
                    None => {
                        self.episodic_seq
                            .next_id("episodic", &self.registry, collection)
                            .await?
                    }
                },
                _ => {
                    self.persona_seq
                        .next_id("persona", &self.registry, collection)
                        .await?
                }
            },
        };

        self.registry
            .upsert(collection, &id, vector, &clean, metadata)
            .await?;
        tracing::debug!("Stored {} memory {}", kind, id);
        Ok(IngestOutcome::Stored(id))
    }

    fn reject(&self, kind: MemoryKind, reason: Rejection) -> IngestOutcome {
        tracing::debug!("Rejected {} memory: {}", kind, reason);
        IngestOutcome::Rejected(reason)
    }

    /// 结构化情景轮次，写入 `<session>:<role>:<index>` 与 {role, session_id, turn_index, ts}
    pub async fn ingest_turn(
        &self,
        session_id: &str,
        role: Role,
        turn_index: i64,
        text: &str,
        ts: Option<&str>,
        mut metadata: Metadata,
    ) -> Result<IngestOutcome> {
        if session_id.trim().is_empty() {
            return Err(OrionError::InvalidArgument("session_id 不能为空".to_string()));
        }
        metadata.insert("role".to_string(), MetaValue::from(role.as_str()));
        metadata.insert("session_id".to_string(), MetaValue::from(session_id));
        metadata.insert("turn_index".to_string(), MetaValue::Int(turn_index));
        if let Some(ts) = ts.filter(|t| !t.trim().is_empty()) {
            metadata.insert("ts".to_string(), MetaValue::from(ts));
        }

        let request = IngestRequest::new(MemoryKind::Episodic, text)
            .with_metadata(metadata)
            .with_id(episodic_turn_id(session_id, role, turn_index));
        self.ingest(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KeywordClassifier;
    use crate::testing::MockEmbedding;
    use orion_core::CollectionsConfig;

    fn ingestor_with(embedder: MockEmbedding) -> Ingestor {
        Ingestor::new(
            Arc::new(CollectionRegistry::in_memory(CollectionsConfig::default())),
            Arc::new(embedder),
            Arc::new(KeywordClassifier::new()),
            IngestConfig::default(),
        )
    }

    fn ingestor() -> Ingestor {
        ingestor_with(MockEmbedding::new())
    }

    const LONG_TEXT: &str =
        "We spent the afternoon wiring the sqlite backend into the orion memory engine";

    #[tokio::test]
    async fn test_semantic_idempotence() {
        let ing = ingestor();
        let first = ing
            .ingest(IngestRequest::new(MemoryKind::Semantic, "The user prefers dark mode"))
            .await
            .unwrap();
        let id = first.id().unwrap().to_string();
        assert!(id.starts_with("semantic-"));
        assert_eq!(id.len(), "semantic-".len() + 16);

        let second = ing
            .ingest(IngestRequest::new(MemoryKind::Semantic, "  The user   prefers dark mode "))
            .await
            .unwrap();
        assert_eq!(second, IngestOutcome::Rejected(Rejection::AlreadyExists { id }));
        assert_eq!(ing.registry().count(Collection::Semantic).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_candidate_idempotence_and_filter() {
        let ing = ingestor();
        let text = "I prefer using PowerShell on Windows for this repo";
        let id = ing
            .ingest(IngestRequest::new(MemoryKind::Candidate, text))
            .await
            .unwrap()
            .into_id()
            .unwrap();
        assert!(id.starts_with("semcand-"));
        assert!(ing
            .ingest(IngestRequest::new(MemoryKind::Candidate, text))
            .await
            .unwrap()
            .id()
            .is_none());

        let rejected = ing
            .ingest(IngestRequest::new(MemoryKind::Candidate, "ok thanks"))
            .await
            .unwrap();
        assert_eq!(rejected, IngestOutcome::Rejected(Rejection::LowValue));
        assert_eq!(
            ing.registry().count(Collection::SemanticCandidates).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_candidate_greeting_is_stripped_before_storage() {
        let ing = ingestor();
        let id = ing
            .ingest(IngestRequest::new(
                MemoryKind::Candidate,
                "Hi, I always use C:\\Orion\\ as my project root",
            ))
            .await
            .unwrap()
            .into_id()
            .unwrap();
        let stored = ing
            .registry()
            .get(Collection::SemanticCandidates, &id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.document, "I always use C:\\Orion\\ as my project root");
    }

    #[tokio::test]
    async fn test_min_length_gate() {
        let ing = ingestor();
        for min_length in [1usize, 3, 5, 8] {
            let outcome = ing
                .ingest(
                    IngestRequest::new(MemoryKind::Persona, "I am Orion")
                        .with_min_length(min_length),
                )
                .await
                .unwrap();
            if min_length > 3 {
                assert_eq!(
                    outcome,
                    IngestOutcome::Rejected(Rejection::TooShort {
                        words: 3,
                        min_length
                    })
                );
            } else {
                assert!(outcome.id().is_some());
            }
        }

        // 情景记忆默认 10 个词
        let short = ing
            .ingest(IngestRequest::new(MemoryKind::Episodic, "too short to keep"))
            .await
            .unwrap();
        assert!(matches!(short, IngestOutcome::Rejected(Rejection::TooShort { .. })));
    }

    #[tokio::test]
    async fn test_episodic_dedup() {
        let embedder = MockEmbedding::new()
            .with(LONG_TEXT, vec![1.0, 0.0, 0.0])
            .with(
                "We spent the afternoon wiring the sqlite backend into the orion memory engine today",
                vec![0.999, 0.01, 0.0],
            )
            .with(
                "Completely different topic about hiking in the mountains with some friends last",
                vec![0.0, 1.0, 0.0],
            );
        let ing = ingestor_with(embedder);

        let first = ing
            .ingest(IngestRequest::new(MemoryKind::Episodic, LONG_TEXT))
            .await
            .unwrap();
        assert_eq!(first.id(), Some("episodic-1"));

        let near = ing
            .ingest(IngestRequest::new(
                MemoryKind::Episodic,
                "We spent the afternoon wiring the sqlite backend into the orion memory engine today",
            ))
            .await
            .unwrap();
        assert!(matches!(near, IngestOutcome::Rejected(Rejection::Duplicate { .. })));

        let other = ing
            .ingest(IngestRequest::new(
                MemoryKind::Episodic,
                "Completely different topic about hiking in the mountains with some friends last",
            ))
            .await
            .unwrap();
        assert_eq!(other.id(), Some("episodic-2"));
    }

    #[tokio::test]
    async fn test_persona_sequential_ids_continue_after_existing() {
        let ing = ingestor();
        ing.registry()
            .upsert(Collection::Persona, "persona-7", vec![0.3, 0.3], "existing", Metadata::new())
            .await
            .unwrap();

        let a = ing
            .ingest(IngestRequest::new(MemoryKind::Persona, "Orion is curious"))
            .await
            .unwrap();
        let b = ing
            .ingest(IngestRequest::new(MemoryKind::Persona, "Orion is calm"))
            .await
            .unwrap();
        assert_eq!(a.id(), Some("persona-8"));
        assert_eq!(b.id(), Some("persona-9"));
    }

    #[tokio::test]
    async fn test_concurrent_sequential_ids_are_unique() {
        let ing = Arc::new(ingestor());
        let mut handles = Vec::new();
        for i in 0..10 {
            let ing = ing.clone();
            handles.push(tokio::spawn(async move {
                ing.ingest(IngestRequest::new(MemoryKind::Persona, format!("persona fact {}", i)))
                    .await
                    .unwrap()
                    .into_id()
                    .unwrap()
            }));
        }
        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[tokio::test]
    async fn test_ingest_turn_provenance() {
        let ing = ingestor();
        let outcome = ing
            .ingest_turn(
                "20240105-14-30-00",
                Role::Assistant,
                2,
                "Sure, the sqlite store keeps one table per collection in the same database file.",
                Some("2024-01-05T14:30:00"),
                Metadata::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.id(), Some("20240105-14-30-00:assistant:0002"));

        let item = ing
            .registry()
            .get(Collection::Episodic, "20240105-14-30-00:assistant:0002")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.metadata.get("role"), Some(&MetaValue::from("assistant")));
        assert_eq!(item.metadata.get("turn_index"), Some(&MetaValue::Int(2)));
        assert_eq!(item.metadata.get("ts"), Some(&MetaValue::from("2024-01-05T14:30:00")));

        assert!(ing
            .ingest_turn("  ", Role::User, 1, LONG_TEXT, None, Metadata::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_provenance_from_metadata() {
        let ing = ingestor();
        let mut meta = Metadata::new();
        meta.insert("role".to_string(), "user".into());
        meta.insert("session_id".to_string(), "s1".into());
        meta.insert("turn_index".to_string(), MetaValue::Int(3));
        let outcome = ing
            .ingest(IngestRequest::new(MemoryKind::Episodic, LONG_TEXT).with_metadata(meta))
            .await
            .unwrap();
        assert_eq!(outcome.id(), Some("s1:user:0003"));
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!("candidates".parse::<MemoryKind>().unwrap(), MemoryKind::Candidate);
        assert!("working".parse::<MemoryKind>().is_err());
    }
}
