//! 向量存储类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// 元数据值 - 后端只接受标量
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            MetaValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            MetaValue::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// 数值或可解析为数值的字符串
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Int(i) => Some(*i as f64),
            MetaValue::Float(f) => Some(*f),
            MetaValue::Str(s) => s.trim().parse().ok(),
            MetaValue::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn from_json_scalar(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(MetaValue::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(MetaValue::Int)
                .or_else(|| n.as_f64().map(MetaValue::Float)),
            serde_json::Value::String(s) => Some(MetaValue::Str(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(b) => write!(f, "{}", b),
            MetaValue::Int(i) => write!(f, "{}", i),
            MetaValue::Float(x) => write!(f, "{}", x),
            MetaValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::Str(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::Str(s)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        MetaValue::Int(i)
    }
}

impl From<u32> for MetaValue {
    fn from(i: u32) -> Self {
        MetaValue::Int(i as i64)
    }
}

impl From<f64> for MetaValue {
    fn from(f: f64) -> Self {
        MetaValue::Float(f)
    }
}

impl From<f32> for MetaValue {
    fn from(f: f32) -> Self {
        MetaValue::Float(f as f64)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

/// 标量元数据
pub type Metadata = BTreeMap<String, MetaValue>;

/// 将任意 JSON 元数据压平成标量: 数组 -> 逗号拼接, 对象 -> JSON 字符串, null 丢弃
pub fn flatten_metadata(raw: &serde_json::Map<String, serde_json::Value>) -> Metadata {
    let mut out = Metadata::new();
    for (key, value) in raw {
        let flat = match value {
            serde_json::Value::Null => continue,
            serde_json::Value::Array(items) => MetaValue::Str(
                items
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            serde_json::Value::Object(_) => MetaValue::Str(value.to_string()),
            scalar => match MetaValue::from_json_scalar(scalar) {
                Some(v) => v,
                None => continue,
            },
        };
        out.insert(key.clone(), flat);
    }
    out
}

/// 向量项
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorItem {
    pub id: String,
    pub vector: Vec<f32>,
    /// 规范化后的原文
    pub document: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl VectorItem {
    pub fn new(id: impl Into<String>, vector: Vec<f32>, document: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            vector,
            document: document.into(),
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// 搜索查询
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// 查询向量
    pub vector: Vec<f32>,
    /// 返回数量
    pub limit: usize,
    /// 过滤条件
    pub filter: Option<Filter>,
}

impl SearchQuery {
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            limit: 10,
            filter: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// 过滤条件 (AND 语义)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<FilterCondition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    pub field: String,
    pub operator: FilterOperator,
    pub value: MetaValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        Self::new().and(field, FilterOperator::Eq, value)
    }

    pub fn and(
        mut self,
        field: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<MetaValue>,
    ) -> Self {
        self.conditions.push(FilterCondition {
            field: field.into(),
            operator,
            value: value.into(),
        });
        self
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.conditions.iter().all(|c| {
            let Some(actual) = metadata.get(&c.field) else {
                return c.operator == FilterOperator::Ne;
            };
            match c.operator {
                FilterOperator::Eq => values_equal(actual, &c.value),
                FilterOperator::Ne => !values_equal(actual, &c.value),
                op => match (actual.as_f64(), c.value.as_f64()) {
                    (Some(a), Some(b)) => match op {
                        FilterOperator::Gt => a > b,
                        FilterOperator::Gte => a >= b,
                        FilterOperator::Lt => a < b,
                        FilterOperator::Lte => a <= b,
                        _ => false,
                    },
                    _ => false,
                },
            }
        })
    }
}

fn values_equal(a: &MetaValue, b: &MetaValue) -> bool {
    match (a, b) {
        (MetaValue::Int(_) | MetaValue::Float(_), MetaValue::Int(_) | MetaValue::Float(_)) => {
            a.as_f64() == b.as_f64()
        }
        _ => a == b,
    }
}

/// 搜索结果，按 distance 升序排列
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub document: String,
    pub metadata: Metadata,
    /// 余弦距离 = 1 - 余弦相似度
    pub distance: f32,
}

/// 存储统计信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_vectors: usize,
    pub total_size_bytes: usize,
    pub last_updated: DateTime<Utc>,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_metadata() {
        let raw = json!({
            "tags": ["greeting", "smalltalk"],
            "nested": {"a": 1},
            "confidence": 0.9,
            "turn_index": 3,
            "source": "archivist",
            "skip": null,
            "ok": true
        });
        let flat = flatten_metadata(raw.as_object().unwrap());

        assert_eq!(flat.get("tags"), Some(&MetaValue::from("greeting,smalltalk")));
        assert_eq!(flat.get("nested"), Some(&MetaValue::from(r#"{"a":1}"#)));
        assert_eq!(flat.get("confidence"), Some(&MetaValue::Float(0.9)));
        assert_eq!(flat.get("turn_index"), Some(&MetaValue::Int(3)));
        assert_eq!(flat.get("ok"), Some(&MetaValue::Bool(true)));
        assert!(!flat.contains_key("skip"));
    }

    #[test]
    fn test_filter_matches() {
        let mut meta = Metadata::new();
        meta.insert("role".to_string(), "user".into());
        meta.insert("turn_index".to_string(), MetaValue::Int(4));

        assert!(Filter::eq("role", "user").matches(&meta));
        assert!(!Filter::eq("role", "assistant").matches(&meta));
        assert!(Filter::eq("turn_index", 4.0).matches(&meta));
        assert!(
            Filter::eq("role", "user")
                .and("turn_index", FilterOperator::Gt, 2i64)
                .matches(&meta)
        );
        assert!(Filter::new().and("source", FilterOperator::Ne, "cli").matches(&meta));
        assert!(!Filter::eq("source", "cli").matches(&meta));
    }

    #[test]
    fn test_meta_value_coercion() {
        assert_eq!(MetaValue::from("0.75").as_f64(), Some(0.75));
        assert_eq!(MetaValue::from("abc").as_f64(), None);
        assert_eq!(MetaValue::Float(12.0).as_i64(), Some(12));
        assert_eq!(MetaValue::from("0007").as_i64(), Some(7));
    }

    #[test]
    fn test_cosine_distance() {
        assert!(cosine_distance(&[1.0, 0.0], &[1.0, 0.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_distance(&[], &[]) - 1.0).abs() < 1e-6);
    }
}
