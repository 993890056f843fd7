//! 向量存储抽象层实现

mod memory;
mod sqlite;

use async_trait::async_trait;
use orion_core::Result;
use std::path::PathBuf;
use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use super::types::{Filter, SearchQuery, SearchResult, StoreStats, VectorItem};

/// 向量存储 Trait - 单个集合
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// 按 id 整条替换
    async fn upsert(&self, item: VectorItem) -> Result<()>;
    async fn upsert_batch(&self, items: Vec<VectorItem>) -> Result<usize>;
    /// 余弦距离升序
    async fn search(&self, query: SearchQuery) -> Result<Vec<SearchResult>>;
    async fn get(&self, id: &str) -> Result<Option<VectorItem>>;
    async fn get_many(&self, ids: &[String]) -> Result<Vec<VectorItem>>;
    /// 按插入时间升序列出
    async fn list(&self, filter: Option<&Filter>) -> Result<Vec<VectorItem>>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn delete_many(&self, ids: &[String]) -> Result<usize>;
    async fn delete_by_filter(&self, filter: Filter) -> Result<usize>;
    async fn count(&self) -> Result<usize>;
    async fn stats(&self) -> Result<StoreStats>;
    async fn clear(&self) -> Result<()>;
}

#[derive(Debug, Clone)]
pub enum StoreBackend {
    Memory,
    SQLite { path: PathBuf, table: String },
}

pub fn create_store(backend: StoreBackend) -> Result<Arc<dyn VectorStore>> {
    match backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::SQLite { path, table } => {
            let store = SqliteStore::new(path, &table)?;
            Ok(Arc::new(store))
        }
    }
}
