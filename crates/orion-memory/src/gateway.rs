//! 集合注册表 - 按名称懒加载并缓存向量集合

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use orion_core::{CollectionsConfig, OrionError, Result, StoreConfig, StoreKind};
use orion_vector::{
    Filter, Metadata, SearchQuery, SearchResult, StoreBackend, VectorItem, VectorStore,
    create_store,
};

/// 四类记忆集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Persona,
    Episodic,
    Semantic,
    SemanticCandidates,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Persona,
        Collection::Episodic,
        Collection::Semantic,
        Collection::SemanticCandidates,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Persona => "persona",
            Collection::Episodic => "episodic",
            Collection::Semantic => "semantic",
            Collection::SemanticCandidates => "candidates",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = OrionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "persona" => Ok(Collection::Persona),
            "episodic" => Ok(Collection::Episodic),
            "semantic" => Ok(Collection::Semantic),
            "candidates" | "candidate" | "semantic_candidates" => {
                Ok(Collection::SemanticCandidates)
            }
            other => Err(OrionError::InvalidArgument(format!("未知集合: {}", other))),
        }
    }
}

/// 按集合名创建底层存储
pub type StoreFactory = Arc<dyn Fn(&str) -> Result<Arc<dyn VectorStore>> + Send + Sync>;

pub struct CollectionRegistry {
    names: CollectionsConfig,
    factory: StoreFactory,
    stores: Mutex<HashMap<String, Arc<dyn VectorStore>>>,
}

impl CollectionRegistry {
    pub fn new(names: CollectionsConfig, factory: StoreFactory) -> Self {
        Self {
            names,
            factory,
            stores: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory(names: CollectionsConfig) -> Self {
        Self::new(names, Arc::new(|_: &str| create_store(StoreBackend::Memory)))
    }

    pub fn from_config(store: &StoreConfig, names: CollectionsConfig) -> Self {
        match store.backend {
            StoreKind::Memory => Self::in_memory(names),
            StoreKind::Sqlite => {
                let path = store.path.clone();
                Self::new(
                    names,
                    Arc::new(move |table: &str| {
                        create_store(StoreBackend::SQLite {
                            path: path.clone(),
                            table: table.to_string(),
                        })
                    }),
                )
            }
        }
    }

    pub fn name(&self, collection: Collection) -> &str {
        match collection {
            Collection::Persona => &self.names.persona,
            Collection::Episodic => &self.names.episodic,
            Collection::Semantic => &self.names.semantic,
            Collection::SemanticCandidates => &self.names.semantic_candidates,
        }
    }

    /// 首次访问时创建，之后整个进程复用同一个句柄
    pub fn collection(&self, collection: Collection) -> Result<Arc<dyn VectorStore>> {
        let name = self.name(collection);
        let mut stores = self
            .stores
            .lock()
            .map_err(|_| OrionError::Storage("Lock poisoned".to_string()))?;
        if let Some(store) = stores.get(name) {
            return Ok(store.clone());
        }
        let store = (self.factory)(name)?;
        tracing::debug!("Created collection {}", name);
        stores.insert(name.to_string(), store.clone());
        Ok(store)
    }

    pub async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        vector: Vec<f32>,
        text: &str,
        metadata: Metadata,
    ) -> Result<()> {
        let item = VectorItem::new(id, vector, text).with_metadata(metadata);
        self.collection(collection)?.upsert(item).await
    }

    pub async fn query(
        &self,
        collection: Collection,
        vector: Vec<f32>,
        k: usize,
        filter: Option<Filter>,
    ) -> Result<Vec<SearchResult>> {
        let mut query = SearchQuery::new(vector).with_limit(k);
        if let Some(filter) = filter {
            query = query.with_filter(filter);
        }
        self.collection(collection)?.search(query).await
    }

    pub async fn get(&self, collection: Collection, id: &str) -> Result<Option<VectorItem>> {
        self.collection(collection)?.get(id).await
    }

    pub async fn get_many(&self, collection: Collection, ids: &[String]) -> Result<Vec<VectorItem>> {
        self.collection(collection)?.get_many(ids).await
    }

    pub async fn list(
        &self,
        collection: Collection,
        filter: Option<&Filter>,
    ) -> Result<Vec<VectorItem>> {
        self.collection(collection)?.list(filter).await
    }

    pub async fn exists(&self, collection: Collection, id: &str) -> Result<bool> {
        Ok(self.get(collection, id).await?.is_some())
    }

    pub async fn delete(&self, collection: Collection, ids: &[String]) -> Result<usize> {
        self.collection(collection)?.delete_many(ids).await
    }

    pub async fn delete_where(&self, collection: Collection, filter: Filter) -> Result<usize> {
        self.collection(collection)?.delete_by_filter(filter).await
    }

    pub async fn count(&self, collection: Collection) -> Result<usize> {
        self.collection(collection)?.count().await
    }

    /// 清空整个集合
    pub async fn reset(&self, collection: Collection) -> Result<()> {
        tracing::info!("Resetting collection {}", self.name(collection));
        self.collection(collection)?.clear().await
    }
}
