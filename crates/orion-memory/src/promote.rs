//! 候选事实晋升为语义记忆

use orion_core::Result;

use crate::classifier::metadata_confidence;
use crate::gateway::Collection;
use crate::ingest::{IngestOutcome, IngestRequest, Ingestor, MemoryKind};

#[derive(Debug, Clone)]
pub struct PromoteOptions {
    /// 最多晋升条数
    pub limit: usize,
    pub min_confidence: f64,
    /// 只处理 metadata.source 等于该值的候选
    pub source: Option<String>,
    /// 晋升成功后从候选集合删除
    pub delete_from_source: bool,
}

impl Default for PromoteOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            min_confidence: 0.0,
            source: None,
            delete_from_source: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromoteReport {
    pub promoted: usize,
    pub scanned: usize,
    pub promoted_ids: Vec<String>,
}

pub async fn promote_candidates(ingestor: &Ingestor, options: &PromoteOptions) -> Result<PromoteReport> {
    let registry = ingestor.registry();
    let classifier = ingestor.classifier();
    let candidates = registry.list(Collection::SemanticCandidates, None).await?;

    let mut report = PromoteReport::default();
    let mut promoted_candidates = Vec::new();

    for candidate in candidates {
        report.scanned += 1;
        if report.promoted >= options.limit {
            break;
        }

        if let Some(source) = &options.source {
            let matches = candidate
                .metadata
                .get("source")
                .and_then(|v| v.as_str())
                .is_some_and(|s| s == source);
            if !matches {
                continue;
            }
        }

        if metadata_confidence(&candidate.metadata) < options.min_confidence {
            continue;
        }

        if classifier.is_low_value(&candidate.document, Some(&candidate.metadata)) {
            continue;
        }

        let request = IngestRequest::new(MemoryKind::Semantic, candidate.document.clone())
            .with_metadata(candidate.metadata.clone());
        if let IngestOutcome::Stored(id) = ingestor.ingest(request).await? {
            report.promoted += 1;
            report.promoted_ids.push(id);
            promoted_candidates.push(candidate.id);
        }
    }

    if options.delete_from_source && !promoted_candidates.is_empty() {
        registry
            .delete(Collection::SemanticCandidates, &promoted_candidates)
            .await?;
    }

    tracing::info!(
        "Promoted {} of {} scanned candidates",
        report.promoted,
        report.scanned
    );
    Ok(report)
}
