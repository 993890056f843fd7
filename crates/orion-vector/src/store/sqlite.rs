//! SQLite 向量存储实现 - 每个集合一张表，相似度在进程内计算

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::VectorStore;
use crate::types::{
    Filter, Metadata, SearchQuery, SearchResult, StoreStats, VectorItem, cosine_distance,
};
use orion_core::{OrionError, Result};

/// SQLite 向量存储
pub struct SqliteStore {
    conn: Mutex<Connection>,
    table_name: String,
}

fn storage_err(e: impl std::fmt::Display) -> OrionError {
    OrionError::Storage(e.to_string())
}

fn valid_table_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

impl SqliteStore {
    pub fn new(path: PathBuf, table_name: &str) -> Result<Self> {
        if !valid_table_name(table_name) {
            return Err(OrionError::InvalidArgument(format!(
                "集合名称只能包含字母、数字和下划线: {}",
                table_name
            )));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path).map_err(storage_err)?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id TEXT PRIMARY KEY,
                    vector BLOB NOT NULL,
                    document TEXT NOT NULL,
                    metadata TEXT NOT NULL,
                    created_at TEXT NOT NULL
                )",
                table_name
            ),
            [],
        )
        .map_err(storage_err)?;

        tracing::debug!("Opened sqlite collection {} at {}", table_name, path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            table_name: table_name.to_string(),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(storage_err)
    }

    fn write_item(conn: &Connection, table: &str, item: &VectorItem) -> Result<()> {
        let metadata = serde_json::to_string(&item.metadata)?;
        conn.execute(
            &format!(
                "INSERT OR REPLACE INTO {} (id, vector, document, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                table
            ),
            params![
                item.id,
                serialize_vector(&item.vector),
                item.document,
                metadata,
                item.created_at.to_rfc3339()
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    pub fn upsert(&self, item: VectorItem) -> Result<()> {
        let conn = self.lock()?;
        Self::write_item(&conn, &self.table_name, &item)
    }

    pub fn upsert_batch(&self, items: Vec<VectorItem>) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        for item in &items {
            Self::write_item(&tx, &self.table_name, item)?;
        }
        tx.commit().map_err(storage_err)?;
        Ok(items.len())
    }

    /// 全部记录，按写入顺序
    fn load_all(&self) -> Result<Vec<VectorItem>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, vector, document, metadata, created_at FROM {} ORDER BY rowid",
                self.table_name
            ))
            .map_err(storage_err)?;
        let rows = stmt.query_map([], read_row).map_err(storage_err)?;

        let mut items = Vec::new();
        for row in rows {
            items.push(decode_row(row.map_err(storage_err)?)?);
        }
        Ok(items)
    }

    pub fn search(&self, query: SearchQuery) -> Result<Vec<SearchResult>> {
        let items = self.load_all()?;
        let mut scored: Vec<(usize, VectorItem, f32)> = items
            .into_iter()
            .enumerate()
            .filter(|(_, item)| query.filter.as_ref().is_none_or(|f| f.matches(&item.metadata)))
            .map(|(pos, item)| {
                let distance = cosine_distance(&query.vector, &item.vector);
                (pos, item, distance)
            })
            .collect();

        // 距离相同时后写入的排前
        scored.sort_by(|(pa, _, da), (pb, _, db)| {
            da.partial_cmp(db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| pb.cmp(pa))
        });
        scored.truncate(query.limit);

        Ok(scored
            .into_iter()
            .map(|(_, item, distance)| SearchResult {
                id: item.id,
                document: item.document,
                metadata: item.metadata,
                distance,
            })
            .collect())
    }

    pub fn get(&self, id: &str) -> Result<Option<VectorItem>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, vector, document, metadata, created_at FROM {} WHERE id = ?1",
                self.table_name
            ))
            .map_err(storage_err)?;
        let mut rows = stmt.query_map(params![id], read_row).map_err(storage_err)?;
        match rows.next() {
            Some(row) => Ok(Some(decode_row(row.map_err(storage_err)?)?)),
            None => Ok(None),
        }
    }

    pub fn get_many(&self, ids: &[String]) -> Result<Vec<VectorItem>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = self.get(id)? {
                out.push(item);
            }
        }
        Ok(out)
    }

    pub fn list(&self, filter: Option<&Filter>) -> Result<Vec<VectorItem>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|item| filter.is_none_or(|f| f.matches(&item.metadata)))
            .collect())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.table_name),
            params![id],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    pub fn delete_many(&self, ids: &[String]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(storage_err)?;
        let mut removed = 0;
        for id in ids {
            removed += tx
                .execute(
                    &format!("DELETE FROM {} WHERE id = ?1", self.table_name),
                    params![id],
                )
                .map_err(storage_err)?;
        }
        tx.commit().map_err(storage_err)?;
        Ok(removed)
    }

    pub fn delete_by_filter(&self, filter: Filter) -> Result<usize> {
        let ids: Vec<String> = self
            .list(Some(&filter))?
            .into_iter()
            .map(|item| item.id)
            .collect();
        self.delete_many(&ids)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", self.table_name),
                [],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        Ok(count as usize)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let (count, size): (i64, i64) = conn
            .query_row(
                &format!(
                    "SELECT COUNT(*), COALESCE(SUM(LENGTH(vector)), 0) FROM {}",
                    self.table_name
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(storage_err)?;
        Ok(StoreStats {
            total_vectors: count as usize,
            total_size_bytes: size as usize,
            last_updated: Utc::now(),
        })
    }

    pub fn clear(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(&format!("DELETE FROM {}", self.table_name), [])
            .map_err(storage_err)?;
        Ok(())
    }
}

type RawRow = (String, Vec<u8>, String, String, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_row((id, blob, document, metadata, created_at): RawRow) -> Result<VectorItem> {
    let metadata: Metadata = serde_json::from_str(&metadata)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| OrionError::Storage(format!("无效的时间戳 {}: {}", created_at, e)))?;
    Ok(VectorItem {
        id,
        vector: deserialize_vector(&blob),
        document,
        metadata,
        created_at,
    })
}

fn serialize_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn upsert(&self, item: VectorItem) -> Result<()> {
        self.upsert(item)
    }

    async fn upsert_batch(&self, items: Vec<VectorItem>) -> Result<usize> {
        self.upsert_batch(items)
    }

    async fn search(&self, query: SearchQuery) -> Result<Vec<SearchResult>> {
        self.search(query)
    }

    async fn get(&self, id: &str) -> Result<Option<VectorItem>> {
        self.get(id)
    }

    async fn get_many(&self, ids: &[String]) -> Result<Vec<VectorItem>> {
        self.get_many(ids)
    }

    async fn list(&self, filter: Option<&Filter>) -> Result<Vec<VectorItem>> {
        self.list(filter)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.delete(id)
    }

    async fn delete_many(&self, ids: &[String]) -> Result<usize> {
        self.delete_many(ids)
    }

    async fn delete_by_filter(&self, filter: Filter) -> Result<usize> {
        self.delete_by_filter(filter)
    }

    async fn count(&self) -> Result<usize> {
        self.count()
    }

    async fn stats(&self) -> Result<StoreStats> {
        self.stats()
    }

    async fn clear(&self) -> Result<()> {
        self.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetaValue;
    use tempfile::tempdir;

    fn item(id: &str, vector: Vec<f32>, role: &str) -> VectorItem {
        let mut meta = Metadata::new();
        meta.insert("role".to_string(), MetaValue::from(role));
        meta.insert("turn_index".to_string(), MetaValue::Int(1));
        VectorItem::new(id, vector, format!("doc {}", id)).with_metadata(meta)
    }

    #[test]
    fn test_vector_serialization() {
        let vector = vec![1.0f32, -2.5, 3.25];
        assert_eq!(deserialize_vector(&serialize_vector(&vector)), vector);
    }

    #[tokio::test]
    async fn test_sqlite_search_and_get() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("test.db"), "episodic").unwrap();

        store.upsert(item("a", vec![1.0, 0.0], "user")).unwrap();
        store.upsert(item("b", vec![0.0, 1.0], "assistant")).unwrap();

        let results = store
            .search(SearchQuery::new(vec![1.0, 0.1]).with_limit(1))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "a");

        let got = store.get("b").unwrap().unwrap();
        assert_eq!(got.document, "doc b");
        assert_eq!(got.metadata.get("turn_index"), Some(&MetaValue::Int(1)));
        assert!(store.get("missing").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_filter_and_delete() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::new(dir.path().join("test.db"), "episodic").unwrap();
        store
            .upsert_batch(vec![
                item("u1", vec![1.0, 0.0], "user"),
                item("u2", vec![0.9, 0.1], "user"),
                item("a1", vec![1.0, 0.0], "assistant"),
            ])
            .unwrap();

        let hits = store
            .search(SearchQuery::new(vec![1.0, 0.0]).with_filter(Filter::eq("role", "assistant")))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a1");

        assert_eq!(store.delete_by_filter(Filter::eq("role", "user")).unwrap(), 2);
        assert_eq!(store.count().unwrap(), 1);

        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_handles() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");
        {
            let store = SqliteStore::new(path.clone(), "semantic").unwrap();
            store.upsert(item("s", vec![0.5, 0.5], "user")).unwrap();
        }
        let reopened = SqliteStore::new(path, "semantic").unwrap();
        assert_eq!(reopened.count().unwrap(), 1);
        assert_eq!(reopened.stats().unwrap().total_size_bytes, 8);
    }

    #[test]
    fn test_table_name_validation() {
        assert!(valid_table_name("orion_episodic_ltm"));
        assert!(!valid_table_name("1abc"));
        assert!(!valid_table_name("a-b"));
        assert!(!valid_table_name(""));
    }
}
