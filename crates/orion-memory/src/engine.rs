//! 记忆引擎
//!
//! 组合集合注册表、写入管线、召回与 archivist，对外提供统一入口。
//! 所有协作者都通过构建器注入，没有全局状态。

use std::sync::Arc;

use chrono::Utc;
use orion_core::{OrionConfig, OrionError, Result, Role, Turn};
use orion_vector::{Filter, Metadata, VectorItem};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::archivist::{Archivist, ArchivistReport, ExtractionClient, OpenAiCompatClient};
use crate::classifier::{Classifier, KeywordClassifier};
use crate::embedding::{EmbeddingProvider, create_embedding_provider};
use crate::gateway::{Collection, CollectionRegistry};
use crate::heuristics::{heuristic_metadata, keeper_sentences, texts_from_jsonl};
use crate::ingest::{IngestOutcome, IngestRequest, Ingestor, MemoryKind};
use crate::promote::{PromoteOptions, PromoteReport, promote_candidates};
use crate::recall::Recaller;
use crate::transfer::{ExportRecord, parse_chat_jsonl, parse_import_jsonl, parse_persona};

/// 各集合的记录数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub persona: usize,
    pub episodic: usize,
    pub semantic: usize,
    pub candidates: usize,
}

/// 批量导入结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub stored: usize,
    pub rejected: usize,
}

impl ImportReport {
    fn record(&mut self, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Stored(_) => self.stored += 1,
            IngestOutcome::Rejected(_) => self.rejected += 1,
        }
    }
}

/// 助手轮次处理结果：存储在后台任务中进行
pub struct AssistantTurnHandle {
    pub store: JoinHandle<()>,
    pub archivist: Option<ArchivistReport>,
}

pub struct MemoryEngineBuilder {
    config: OrionConfig,
    registry: Option<Arc<CollectionRegistry>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    classifier: Option<Arc<dyn Classifier>>,
    extraction: Option<Arc<dyn ExtractionClient>>,
}

impl MemoryEngineBuilder {
    pub fn with_registry(mut self, registry: Arc<CollectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// 注入提取服务后 archivist 总是启用
    pub fn with_extraction_client(mut self, client: Arc<dyn ExtractionClient>) -> Self {
        self.extraction = Some(client);
        self
    }

    pub fn build(self) -> Result<MemoryEngine> {
        let config = self.config;
        let registry = self.registry.unwrap_or_else(|| {
            Arc::new(CollectionRegistry::from_config(
                &config.store,
                config.collections.clone(),
            ))
        });
        let embedder = match self.embedder {
            Some(embedder) => embedder,
            None => create_embedding_provider(&config.embedding)?,
        };
        let classifier = self
            .classifier
            .unwrap_or_else(|| Arc::new(KeywordClassifier::new()));

        let ingestor = Arc::new(Ingestor::new(
            registry.clone(),
            embedder.clone(),
            classifier.clone(),
            config.ingest.clone(),
        ));
        let recaller = Recaller::new(registry.clone(), embedder, classifier, config.recall.clone());

        let extraction = match self.extraction {
            Some(client) => Some(client),
            None if config.archivist.enabled => Some(
                Arc::new(OpenAiCompatClient::from_config(&config.archivist))
                    as Arc<dyn ExtractionClient>,
            ),
            None => None,
        };
        let archivist = extraction
            .map(|client| Archivist::new(config.archivist.clone(), client, ingestor.clone()));

        tracing::debug!(
            "Memory engine ready (profile {}, archivist {})",
            config.profile,
            if archivist.is_some() { "on" } else { "off" }
        );
        Ok(MemoryEngine {
            config,
            registry,
            ingestor,
            recaller,
            archivist,
        })
    }
}

pub struct MemoryEngine {
    config: OrionConfig,
    registry: Arc<CollectionRegistry>,
    ingestor: Arc<Ingestor>,
    recaller: Recaller,
    archivist: Option<Archivist>,
}

impl MemoryEngine {
    pub fn builder(config: OrionConfig) -> MemoryEngineBuilder {
        MemoryEngineBuilder {
            config,
            registry: None,
            embedder: None,
            classifier: None,
            extraction: None,
        }
    }

    /// 完全按配置创建
    pub fn from_config(config: OrionConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &OrionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<CollectionRegistry> {
        &self.registry
    }

    pub fn archivist(&self) -> Option<&Archivist> {
        self.archivist.as_ref()
    }

    // ---- 写入 ----

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        self.ingestor.ingest(request).await
    }

    async fn ingest_kind(
        &self,
        kind: MemoryKind,
        text: &str,
        metadata: Metadata,
    ) -> Result<Option<String>> {
        let request = IngestRequest::new(kind, text).with_metadata(metadata);
        Ok(self.ingestor.ingest(request).await?.into_id())
    }

    pub async fn ingest_persona(&self, text: &str, metadata: Metadata) -> Result<Option<String>> {
        self.ingest_kind(MemoryKind::Persona, text, metadata).await
    }

    pub async fn ingest_episodic(&self, text: &str, metadata: Metadata) -> Result<Option<String>> {
        self.ingest_kind(MemoryKind::Episodic, text, metadata).await
    }

    pub async fn ingest_semantic(&self, text: &str, metadata: Metadata) -> Result<Option<String>> {
        self.ingest_kind(MemoryKind::Semantic, text, metadata).await
    }

    pub async fn ingest_candidate(&self, text: &str, metadata: Metadata) -> Result<Option<String>> {
        self.ingest_kind(MemoryKind::Candidate, text, metadata).await
    }

    pub async fn ingest_turn(
        &self,
        session_id: &str,
        role: Role,
        turn_index: i64,
        text: &str,
        ts: Option<&str>,
    ) -> Result<Option<String>> {
        Ok(self
            .ingestor
            .ingest_turn(session_id, role, turn_index, text, ts, Metadata::new())
            .await?
            .into_id())
    }

    /// 用户轮次：同步写入情景记忆并放入 archivist 缓冲区
    pub async fn on_user_turn(
        &self,
        session_id: &str,
        turn_index: i64,
        text: &str,
    ) -> Result<Option<String>> {
        let ts = Utc::now().to_rfc3339();
        let id = self
            .ingest_turn(session_id, Role::User, turn_index, text, Some(&ts))
            .await?;
        if let Some(archivist) = &self.archivist {
            archivist.observe(Turn::user(text)).await;
        }
        Ok(id)
    }

    /// 助手轮次：存储放到后台任务，随后驱动 archivist。两者的失败都只记录日志
    pub async fn on_assistant_turn(
        &self,
        session_id: &str,
        turn_index: i64,
        text: &str,
    ) -> AssistantTurnHandle {
        let ingestor = self.ingestor.clone();
        let session = session_id.to_string();
        let content = text.to_string();
        let ts = Utc::now().to_rfc3339();
        let store = tokio::spawn(async move {
            let result = ingestor
                .ingest_turn(
                    &session,
                    Role::Assistant,
                    turn_index,
                    &content,
                    Some(&ts),
                    Metadata::new(),
                )
                .await;
            if let Err(e) = result {
                tracing::warn!("Background assistant turn storage failed: {}", e);
            }
        });

        let archivist = match &self.archivist {
            Some(archivist) => match archivist.on_assistant_turn(Turn::assistant(text)).await {
                Ok(report) => Some(report),
                Err(e) => {
                    tracing::warn!("Archivist failed: {}", e);
                    None
                }
            },
            None => None,
        };

        AssistantTurnHandle { store, archivist }
    }

    // ---- 召回 ----

    pub async fn recall_persona(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        self.recaller.recall_persona(query, top_k).await
    }

    pub async fn recall_episodic(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        self.recaller.recall_episodic(query, top_k).await
    }

    pub async fn recall_semantic(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        self.recaller.recall_semantic(query, top_k).await
    }

    /// 拼装注入提示词的记忆块，没有召回内容时返回空字符串
    pub async fn build_context(&self, query: &str) -> String {
        let ltm = &self.config.ltm;
        let mut sections = Vec::new();

        let persona = self.recall_persona(query, ltm.topk_persona).await;
        push_section(&mut sections, "Persona", persona);

        if ltm.semantic_enabled && ltm.topk_semantic > 0 {
            let semantic = self.recall_semantic(query, ltm.topk_semantic).await;
            push_section(&mut sections, "Semantic", semantic);
        }

        let episodic = self.recall_episodic(query, ltm.topk_episodic).await;
        push_section(&mut sections, "Episodic", episodic);

        sections.join("\n\n")
    }

    // ---- 维护 ----

    pub async fn promote_candidates(&self, options: &PromoteOptions) -> Result<PromoteReport> {
        promote_candidates(&self.ingestor, options).await
    }

    pub async fn stats(&self) -> Result<MemoryStats> {
        Ok(MemoryStats {
            persona: self.registry.count(Collection::Persona).await?,
            episodic: self.registry.count(Collection::Episodic).await?,
            semantic: self.registry.count(Collection::Semantic).await?,
            candidates: self.registry.count(Collection::SemanticCandidates).await?,
        })
    }

    pub async fn reset(&self, collection: Collection) -> Result<()> {
        self.registry.reset(collection).await
    }

    /// 按创建时间列出记录，可按 metadata.source 过滤；`limit` 为 0 时不限
    pub async fn list(
        &self,
        collection: Collection,
        source: Option<&str>,
        limit: usize,
    ) -> Result<Vec<VectorItem>> {
        let filter = source.map(|s| Filter::eq("source", s));
        let mut items = self.registry.list(collection, filter.as_ref()).await?;
        if limit > 0 {
            items.truncate(limit);
        }
        Ok(items)
    }

    pub async fn export(
        &self,
        collection: Collection,
        source: Option<&str>,
    ) -> Result<Vec<ExportRecord>> {
        Ok(self
            .list(collection, source, 0)
            .await?
            .into_iter()
            .map(ExportRecord::from)
            .collect())
    }

    /// 导入语义或候选 JSONL
    pub async fn import(
        &self,
        kind: MemoryKind,
        content: &str,
        default_source: &str,
    ) -> Result<ImportReport> {
        if !matches!(kind, MemoryKind::Semantic | MemoryKind::Candidate) {
            return Err(OrionError::InvalidArgument(format!(
                "只能导入 semantic 或 candidates，收到 {}",
                kind
            )));
        }
        let mut report = ImportReport::default();
        for record in parse_import_jsonl(content, default_source)? {
            let request = IngestRequest::new(kind, record.text).with_metadata(record.metadata);
            report.record(&self.ingestor.ingest(request).await?);
        }
        tracing::info!(
            "Imported {} {} records ({} rejected)",
            report.stored,
            kind,
            report.rejected
        );
        Ok(report)
    }

    pub async fn import_chat(&self, content: &str, default_session: &str) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        for turn in parse_chat_jsonl(content, default_session)? {
            let outcome = self
                .ingestor
                .ingest_turn(
                    &turn.session_id,
                    turn.role,
                    turn.turn_index,
                    &turn.text,
                    turn.ts.as_deref(),
                    Metadata::new(),
                )
                .await?;
            report.record(&outcome);
        }
        tracing::info!(
            "Imported {} chat turns ({} rejected)",
            report.stored,
            report.rejected
        );
        Ok(report)
    }

    pub async fn import_persona(&self, content: &str, yaml: bool) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        for (text, metadata) in parse_persona(content, yaml)? {
            let request = IngestRequest::new(MemoryKind::Persona, text).with_metadata(metadata);
            report.record(&self.ingestor.ingest(request).await?);
        }
        Ok(report)
    }

    /// 从聊天 JSONL 中抽取关键句写入候选集合
    pub async fn stage_heuristics(&self, content: &str, max: usize) -> Result<ImportReport> {
        let texts = texts_from_jsonl(content);
        let mut report = ImportReport::default();
        for sentence in keeper_sentences(&texts, max) {
            let request =
                IngestRequest::new(MemoryKind::Candidate, sentence).with_metadata(heuristic_metadata());
            report.record(&self.ingestor.ingest(request).await?);
        }
        tracing::info!(
            "Staged {} heuristic candidates from {} texts",
            report.stored,
            texts.len()
        );
        Ok(report)
    }
}

fn push_section(sections: &mut Vec<String>, label: &str, recalled: Result<Vec<String>>) {
    let items = match recalled {
        Ok(items) => items,
        Err(e) => {
            tracing::warn!("{} recall failed: {}", label, e);
            return;
        }
    };
    if items.is_empty() {
        return;
    }
    let body = items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n");
    sections.push(format!("### Relevant {} Memory\n{}", label, body));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEmbedding, MockExtractionClient, test_registry};
    use orion_core::ArchivistPoolConfig;

    fn engine_with(config: OrionConfig, client: Option<Arc<MockExtractionClient>>) -> MemoryEngine {
        let mut builder = MemoryEngine::builder(config)
            .with_registry(test_registry())
            .with_embedding_provider(Arc::new(MockEmbedding::new()));
        if let Some(client) = client {
            builder = builder.with_extraction_client(client);
        }
        builder.build().unwrap()
    }

    fn engine() -> MemoryEngine {
        engine_with(OrionConfig::default(), None)
    }

    #[tokio::test]
    async fn test_build_context_empty() {
        assert_eq!(engine().build_context("anything").await, "");
    }

    #[tokio::test]
    async fn test_build_context_sections() {
        let engine = engine();
        engine
            .ingest_persona("Orion is a local-first assistant", Metadata::new())
            .await
            .unwrap()
            .unwrap();
        engine
            .ingest_semantic("The user prefers dark mode", Metadata::new())
            .await
            .unwrap()
            .unwrap();
        engine
            .ingest_turn(
                "s1",
                Role::User,
                1,
                "Can you remind me how the sqlite backend stores vectors on disk",
                None,
            )
            .await
            .unwrap()
            .unwrap();

        let context = engine.build_context("sqlite vectors").await;
        let sections: Vec<&str> = context.split("\n\n").collect();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0], "### Relevant Persona Memory\n- Orion is a local-first assistant");
        assert!(sections[1].starts_with("### Relevant Episodic Memory\n- User: Can you remind me"));
        assert!(!context.contains("Semantic"));
    }

    #[tokio::test]
    async fn test_build_context_with_semantic_enabled() {
        let mut config = OrionConfig::default();
        config.ltm.semantic_enabled = true;
        config.ltm.topk_semantic = 3;
        let engine = engine_with(config, None);
        engine
            .ingest_semantic("The user prefers dark mode", Metadata::new())
            .await
            .unwrap();

        let context = engine.build_context("theme").await;
        assert_eq!(context, "### Relevant Semantic Memory\n- The user prefers dark mode");
    }

    #[tokio::test]
    async fn test_rejection_is_none() {
        let engine = engine();
        assert!(engine.ingest_episodic("too short", Metadata::new()).await.unwrap().is_none());
        assert!(engine.ingest_candidate("ok thanks", Metadata::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assistant_turn_stored_in_background() {
        let engine = engine();
        let handle = engine
            .on_assistant_turn("s1", 2, "The sqlite backend stores each vector as a little endian blob")
            .await;
        assert!(handle.archivist.is_none());
        handle.store.await.unwrap();

        let item = engine
            .registry()
            .get(Collection::Episodic, "s1:assistant:0002")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.metadata.get("role").and_then(|v| v.as_str()), Some("assistant"));
        assert!(item.metadata.contains_key("ts"));
    }

    #[tokio::test]
    async fn test_archivist_through_engine() {
        let mut config = OrionConfig::default();
        config.archivist.pool = ArchivistPoolConfig {
            window_turns: 4,
            min_new_turns: 2,
        };
        let client = Arc::new(MockExtractionClient::new(
            r#"{"relevant": true, "facts": [{"text": "The user uses the fish shell on Linux", "category": "environment", "confidence": 0.8}]}"#,
        ));
        let engine = engine_with(config, Some(client.clone()));

        engine
            .on_user_turn("s1", 1, "I use the fish shell on my Linux laptop every day")
            .await
            .unwrap();
        let first = engine.on_assistant_turn("s1", 2, "Fish has great autosuggestions and sensible defaults for interactive shell use.").await;
        assert_eq!(first.archivist, Some(ArchivistReport::default()));

        engine
            .on_user_turn("s1", 3, "And I keep dotfiles in a github repo for backups")
            .await
            .unwrap();
        let second = engine.on_assistant_turn("s1", 4, "Nice, keeping dotfiles in a repo makes setting up new machines much easier.").await;
        let report = second.archivist.unwrap();
        assert!(report.invoked);
        assert_eq!(report.facts_staged, 1);
        assert_eq!(client.calls(), 1);

        first.store.await.unwrap();
        second.store.await.unwrap();
        let stats = engine.stats().await.unwrap();
        assert_eq!(
            stats,
            MemoryStats {
                persona: 0,
                episodic: 4,
                semantic: 0,
                candidates: 1,
            }
        );
    }

    #[tokio::test]
    async fn test_archivist_failure_is_swallowed() {
        let mut config = OrionConfig::default();
        config.archivist.pool.min_new_turns = 1;
        let engine = engine_with(config, Some(Arc::new(MockExtractionClient::failing())));

        engine
            .on_user_turn("s1", 1, "I prefer tabs to spaces in every repository")
            .await
            .unwrap();
        let handle = engine.on_assistant_turn("s1", 2, "Noted.").await;
        assert!(handle.archivist.is_none());
        handle.store.await.unwrap();
    }

    #[tokio::test]
    async fn test_import_export_and_list() {
        let engine = engine();
        let content = concat!(
            "{\"text\": \"The user prefers dark mode\", \"meta\": {\"source\": \"manual\"}}\n",
            "{\"text\": \"The user runs Linux on the lab server\"}\n",
            "{\"text\": \"The user prefers dark mode\"}\n",
        );
        let report = engine.import(MemoryKind::Semantic, content, "import").await.unwrap();
        assert_eq!(report, ImportReport { stored: 2, rejected: 1 });

        let manual = engine.list(Collection::Semantic, Some("manual"), 0).await.unwrap();
        assert_eq!(manual.len(), 1);
        assert_eq!(engine.list(Collection::Semantic, None, 1).await.unwrap().len(), 1);

        let exported = engine.export(Collection::Semantic, Some("import")).await.unwrap();
        assert_eq!(exported.len(), 1);
        assert_eq!(exported[0].text, "The user runs Linux on the lab server");

        assert!(engine.import(MemoryKind::Persona, content, "import").await.is_err());
    }

    #[tokio::test]
    async fn test_import_chat_pairs_turns() {
        let engine = engine();
        let content = r#"{"session_id": "s9", "user": "How do I switch the orion store backend to sqlite", "response": "Set store.backend to sqlite in the config file and restart."}"#;
        let report = engine.import_chat(content, "fallback").await.unwrap();
        assert_eq!(report.stored, 2);

        let recalled = engine
            .recall_episodic("How do I switch the orion store backend to sqlite", 1)
            .await
            .unwrap();
        assert_eq!(
            recalled,
            vec![
                "User: How do I switch the orion store backend to sqlite\nAssistant: Set store.backend to sqlite in the config file and restart."
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_stage_heuristics_and_reset() {
        let engine = engine();
        let content = "{\"user_text\": \"Hello! I use PowerShell on Windows. Nice weather.\"}\n";
        let report = engine.stage_heuristics(content, 0).await.unwrap();
        assert_eq!(report.stored, 1);

        let staged = engine.list(Collection::SemanticCandidates, Some("heuristics"), 0).await.unwrap();
        assert_eq!(staged[0].document, "I use PowerShell on Windows.");

        engine.reset(Collection::SemanticCandidates).await.unwrap();
        assert_eq!(engine.stats().await.unwrap(), MemoryStats::default());
    }

    #[tokio::test]
    async fn test_import_persona_yaml() {
        let engine = engine();
        let report = engine
            .import_persona("- Orion is curious\n- text: Orion is concise\n  tone: dry\n", true)
            .await
            .unwrap();
        assert_eq!(report.stored, 2);
        let ids: Vec<String> = engine
            .list(Collection::Persona, None, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["persona-1", "persona-2"]);
    }
}
