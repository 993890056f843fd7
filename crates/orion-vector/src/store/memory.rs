//! 内存向量存储 (用于测试和开发)

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::VectorStore;
use crate::types::{Filter, SearchQuery, SearchResult, StoreStats, VectorItem, cosine_distance};
use orion_core::{OrionError, Result};

/// 内存向量存储
pub struct MemoryStore {
    data: RwLock<HashMap<String, VectorItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    fn poisoned() -> OrionError {
        OrionError::Storage("Lock poisoned".to_string())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn upsert(&self, item: VectorItem) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        data.insert(item.id.clone(), item);
        Ok(())
    }

    async fn upsert_batch(&self, items: Vec<VectorItem>) -> Result<usize> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        let count = items.len();
        for item in items {
            data.insert(item.id.clone(), item);
        }
        Ok(count)
    }

    async fn search(&self, query: SearchQuery) -> Result<Vec<SearchResult>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;

        let mut scored: Vec<(&VectorItem, f32)> = data
            .values()
            .filter(|item| query.filter.as_ref().is_none_or(|f| f.matches(&item.metadata)))
            .map(|item| (item, cosine_distance(&query.vector, &item.vector)))
            .collect();

        // 距离相同时较新的记录排前
        scored.sort_by(|(a, da), (b, db)| {
            da.partial_cmp(db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(query.limit);

        Ok(scored
            .into_iter()
            .map(|(item, distance)| SearchResult {
                id: item.id.clone(),
                document: item.document.clone(),
                metadata: item.metadata.clone(),
                distance,
            })
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<VectorItem>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(data.get(id).cloned())
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<VectorItem>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(ids.iter().filter_map(|id| data.get(id).cloned()).collect())
    }

    async fn list(&self, filter: Option<&Filter>) -> Result<Vec<VectorItem>> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        let mut items: Vec<VectorItem> = data
            .values()
            .filter(|item| filter.is_none_or(|f| f.matches(&item.metadata)))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        data.remove(id);
        Ok(())
    }

    async fn delete_many(&self, ids: &[String]) -> Result<usize> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        Ok(ids.iter().filter(|id| data.remove(id.as_str()).is_some()).count())
    }

    async fn delete_by_filter(&self, filter: Filter) -> Result<usize> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        let before = data.len();
        data.retain(|_, item| !filter.matches(&item.metadata));
        Ok(before - data.len())
    }

    async fn count(&self) -> Result<usize> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(data.len())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let data = self.data.read().map_err(|_| Self::poisoned())?;
        Ok(StoreStats {
            total_vectors: data.len(),
            total_size_bytes: data.values().map(|v| v.vector.len() * 4).sum(),
            last_updated: Utc::now(),
        })
    }

    async fn clear(&self) -> Result<()> {
        let mut data = self.data.write().map_err(|_| Self::poisoned())?;
        data.clear();
        Ok(())
    }
}
