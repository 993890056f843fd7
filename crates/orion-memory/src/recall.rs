//! 记忆召回
//!
//! 人设和语义记忆按相似度直接返回。情景记忆分两个阶段：
//!
//! 1. 在用户轮次中选锚点：相似度加信息密度，减去低信息量惩罚；
//!    每个会话先取一条，不足再按分数补齐。延续性查询若选中的多为寒暄，
//!    改为取最近的用户轮次。
//! 2. 每个锚点按确定性 id 找紧随其后的助手回复拼成一对；结果仍不足时，
//!    从助手轮次中补最多两条。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use orion_core::{RecallConfig, Result, Role};
use orion_vector::{Filter, Metadata, SearchResult};
use regex::Regex;

use crate::classifier::Classifier;
use crate::embedding::EmbeddingProvider;
use crate::gateway::{Collection, CollectionRegistry};
use crate::ingest::episodic_turn_id;
use crate::text::truncate_chars;

static SESSION_TS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})-?(\d{2})-?(\d{2})(?:[T_\- ]?(\d{2})[-_:]?(\d{2})[-_:]?(\d{2}))?")
        .expect("valid regex")
});

const TS_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y%m%d-%H-%M-%S",
];

/// 解析 metadata.ts，支持 RFC3339 和几种常见本地格式
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    TS_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// 从会话 id 中提取时间，如 `20240105-14-30-00`
pub fn session_timestamp(session_id: &str) -> Option<NaiveDateTime> {
    let caps = SESSION_TS_RE.captures(session_id)?;
    let num = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    let date = NaiveDate::from_ymd_opt(num(1)? as i32, num(2)?, num(3)?)?;
    match (num(4), num(5), num(6)) {
        (Some(h), Some(m), Some(s)) => date.and_hms_opt(h, m, s),
        _ => date.and_hms_opt(0, 0, 0),
    }
}

#[derive(Debug, Clone)]
struct Anchor {
    id: String,
    session_id: Option<String>,
    turn_index: Option<i64>,
    text: String,
    score: f32,
    when: Option<NaiveDateTime>,
    low_substance: bool,
}

impl Anchor {
    fn new(id: &str, text: &str, metadata: &Metadata) -> Self {
        let session_id = metadata
            .get("session_id")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let when = metadata
            .get("ts")
            .and_then(|v| parse_timestamp(&v.to_string()))
            .or_else(|| session_id.as_deref().and_then(session_timestamp));
        Self {
            id: id.to_string(),
            turn_index: metadata.get("turn_index").and_then(|v| v.as_i64()),
            session_id,
            text: text.to_string(),
            score: 0.0,
            when,
            low_substance: false,
        }
    }

    /// 同一会话同一轮次只保留一条
    fn turn_key(&self) -> (String, Option<i64>) {
        match (&self.session_id, self.turn_index) {
            (Some(session), Some(index)) => (session.clone(), Some(index)),
            _ => (self.id.clone(), None),
        }
    }

    fn session_key(&self) -> String {
        self.session_id.clone().unwrap_or_else(|| self.id.clone())
    }
}

/// 分数降序，同分时较新的在前
fn by_score_then_recency(a: &Anchor, b: &Anchor) -> std::cmp::Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| b.when.cmp(&a.when))
        .then_with(|| a.id.cmp(&b.id))
}

pub struct Recaller {
    registry: Arc<CollectionRegistry>,
    embedder: Arc<dyn EmbeddingProvider>,
    classifier: Arc<dyn Classifier>,
    config: RecallConfig,
}

impl Recaller {
    pub fn new(
        registry: Arc<CollectionRegistry>,
        embedder: Arc<dyn EmbeddingProvider>,
        classifier: Arc<dyn Classifier>,
        config: RecallConfig,
    ) -> Self {
        Self {
            registry,
            embedder,
            classifier,
            config,
        }
    }

    pub async fn recall_persona(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        self.similar_documents(Collection::Persona, query, top_k).await
    }

    pub async fn recall_semantic(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        self.similar_documents(Collection::Semantic, query, top_k).await
    }

    async fn similar_documents(
        &self,
        collection: Collection,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<String>> {
        if top_k == 0 || self.registry.count(collection).await? == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        Ok(self
            .registry
            .query(collection, vector, top_k, None)
            .await?
            .into_iter()
            .map(|hit| hit.document)
            .filter(|doc| !doc.is_empty())
            .collect())
    }

    /// 返回 `User: ..\nAssistant: ..`、`User: ..` 或 `Assistant (fallback): ..` 格式的条目
    pub async fn recall_episodic(&self, query: &str, top_k: usize) -> Result<Vec<String>> {
        if top_k == 0 || self.registry.count(Collection::Episodic).await? == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(query).await?;
        let continuity = self.classifier.is_continuity_query(query);

        let mut anchors = self.select_anchors(&vector, continuity, top_k).await?;
        if continuity && self.mostly_low_substance(&anchors) {
            tracing::debug!("Continuity query matched mostly small talk, using recent turns");
            anchors = self.recent_user_turns(top_k).await?;
        }

        let (mut results, paired) = self.pair(anchors).await?;
        if results.len() < top_k {
            let fallback = self
                .assistant_fallback(&vector, top_k - results.len(), &paired)
                .await?;
            results.extend(fallback);
        }
        Ok(results)
    }

    fn score_hit(&self, hit: &SearchResult, continuity: bool) -> Anchor {
        let mut anchor = Anchor::new(&hit.id, &hit.document, &hit.metadata);
        anchor.low_substance = self.classifier.is_low_substance(&hit.document);
        let penalty = match (anchor.low_substance, continuity) {
            (true, true) => self.config.continuity_penalty,
            (true, false) => self.config.low_substance_penalty,
            _ => 0.0,
        };
        anchor.score = (1.0 - hit.distance)
            + self.config.info_density_weight * self.classifier.info_density(&hit.document)
            - penalty;
        anchor
    }

    async fn select_anchors(
        &self,
        vector: &[f32],
        continuity: bool,
        top_k: usize,
    ) -> Result<Vec<Anchor>> {
        let hits = self
            .registry
            .query(
                Collection::Episodic,
                vector.to_vec(),
                top_k.saturating_mul(self.config.candidate_multiplier),
                Some(Filter::eq("role", Role::User.as_str())),
            )
            .await?;

        let mut seen = HashSet::new();
        let mut scored: Vec<Anchor> = hits
            .iter()
            .map(|hit| self.score_hit(hit, continuity))
            .filter(|anchor| seen.insert(anchor.turn_key()))
            .collect();
        scored.sort_by(by_score_then_recency);

        let mut sessions = HashSet::new();
        let mut chosen = Vec::with_capacity(top_k.min(scored.len()));
        let mut backfill = Vec::new();
        for anchor in scored {
            if sessions.insert(anchor.session_key()) {
                if chosen.len() < top_k {
                    chosen.push(anchor);
                }
            } else {
                backfill.push(anchor);
            }
        }
        let missing = top_k.saturating_sub(chosen.len());
        chosen.extend(backfill.into_iter().take(missing));
        Ok(chosen)
    }

    fn mostly_low_substance(&self, anchors: &[Anchor]) -> bool {
        if anchors.is_empty() {
            return false;
        }
        let low = anchors.iter().filter(|a| a.low_substance).count();
        low as f32 / anchors.len() as f32 >= self.config.continuity_fallback_ratio
    }

    /// 所有会话中最近的用户轮次，新的在前
    async fn recent_user_turns(&self, top_k: usize) -> Result<Vec<Anchor>> {
        let filter = Filter::eq("role", Role::User.as_str());
        let items = self
            .registry
            .list(Collection::Episodic, Some(&filter))
            .await?;

        let mut anchors: Vec<(Anchor, NaiveDateTime)> = items
            .iter()
            .map(|item| {
                let anchor = Anchor::new(&item.id, &item.document, &item.metadata);
                (anchor, item.created_at.naive_utc())
            })
            .collect();
        anchors.sort_by(|(a, a_created), (b, b_created)| {
            b.when
                .cmp(&a.when)
                .then_with(|| b_created.cmp(a_created))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(anchors
            .into_iter()
            .take(top_k)
            .map(|(anchor, _)| anchor)
            .collect())
    }

    async fn pair(&self, anchors: Vec<Anchor>) -> Result<(Vec<String>, HashSet<String>)> {
        let mut results = Vec::with_capacity(anchors.len());
        let mut paired = HashSet::new();

        for anchor in anchors {
            let reply = match (&anchor.session_id, anchor.turn_index) {
                (Some(session), Some(index)) => {
                    let id = episodic_turn_id(session, Role::Assistant, index + 1);
                    self.registry.get(Collection::Episodic, &id).await?
                }
                _ => None,
            };
            match reply {
                Some(reply) => {
                    results.push(format!(
                        "User: {}\nAssistant: {}",
                        anchor.text,
                        truncate_chars(&reply.document, self.config.pair_max_chars)
                    ));
                    paired.insert(reply.id);
                }
                None => results.push(format!("User: {}", anchor.text)),
            }
        }
        Ok((results, paired))
    }

    async fn assistant_fallback(
        &self,
        vector: &[f32],
        need: usize,
        paired: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let cap = self.config.assistant_fallback_cap.min(need);
        if cap == 0 {
            return Ok(Vec::new());
        }
        let hits = self
            .registry
            .query(
                Collection::Episodic,
                vector.to_vec(),
                cap.saturating_mul(self.config.candidate_multiplier),
                Some(Filter::eq("role", Role::Assistant.as_str())),
            )
            .await?;

        let mut scored: Vec<Anchor> = hits
            .iter()
            .filter(|hit| !paired.contains(&hit.id))
            .map(|hit| {
                let mut anchor = Anchor::new(&hit.id, &hit.document, &hit.metadata);
                let too_long = hit.document.chars().count() > self.config.pair_max_chars;
                anchor.score = (1.0 - hit.distance)
                    - if too_long {
                        self.config.long_assistant_penalty
                    } else {
                        0.0
                    };
                anchor
            })
            .collect();
        scored.sort_by(by_score_then_recency);

        Ok(scored
            .into_iter()
            .take(cap)
            .map(|a| {
                format!(
                    "Assistant (fallback): {}",
                    truncate_chars(&a.text, self.config.pair_max_chars)
                )
            })
            .collect())
    }
}
