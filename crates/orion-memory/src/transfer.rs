//! 导入导出格式
//!
//! - 聊天记录 JSONL：每行 `{session_id?, user, response, timestamp?}`
//! - 人设文件：纯文本逐行，或 YAML 列表
//! - 语义/候选记录 JSONL：导入 `{text|doc|document, meta|metadata}`，导出 `{id, text, meta}`

use std::collections::HashMap;

use chrono::NaiveDateTime;
use orion_core::{OrionError, Result, Role};
use orion_vector::{MetaValue, Metadata, VectorItem, flatten_metadata};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 界面导出日志中的分隔标记，不是真实消息
const SENTINELS: [&str; 4] = [
    "<|BEGIN-VISIBLE-CHAT|>",
    "<|END-VISIBLE-CHAT|>",
    "<|BEGIN-CHAT|>",
    "<|END-CHAT|>",
];

/// 聊天导入后的单个轮次
#[derive(Debug, Clone, PartialEq)]
pub struct ChatTurn {
    pub session_id: String,
    pub role: Role,
    pub turn_index: i64,
    pub text: String,
    pub ts: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatPair {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    source_file: Option<String>,
}

/// 文件名形如 `20240105-14-30-00` 时取出时间
fn stem_timestamp(name: &str) -> Option<String> {
    let stem = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let stem = stem.split('.').next().unwrap_or(stem);
    NaiveDateTime::parse_from_str(stem, "%Y%m%d-%H-%M-%S")
        .ok()
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// 解析聊天 JSONL
///
/// 每个会话内第 n 对（从 0 开始）的用户轮次序号为 2n+1，助手为 2n+2，
/// 召回时据此按 `turn_index + 1` 找到回复。缺少 session_id 时使用 `default_session`。
pub fn parse_chat_jsonl(content: &str, default_session: &str) -> Result<Vec<ChatTurn>> {
    let mut turns = Vec::new();
    let mut pair_counts: HashMap<String, i64> = HashMap::new();

    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let raw: Value = serde_json::from_str(line)
            .map_err(|e| OrionError::Parse(format!("第 {} 行: {}", line_no + 1, e)))?;
        if raw.get("_meta").is_some() {
            continue;
        }
        let pair: ChatPair = serde_json::from_value(raw)
            .map_err(|e| OrionError::Parse(format!("第 {} 行: {}", line_no + 1, e)))?;

        let user = non_blank(pair.user);
        if user.as_deref().is_some_and(|u| SENTINELS.contains(&u)) {
            continue;
        }
        let response = non_blank(pair.response);
        if user.is_none() && response.is_none() {
            continue;
        }

        let session_id = non_blank(pair.session_id).unwrap_or_else(|| default_session.to_string());
        let ts = non_blank(pair.timestamp)
            .or_else(|| pair.source_file.as_deref().and_then(stem_timestamp))
            .or_else(|| stem_timestamp(&session_id));

        let n = pair_counts.entry(session_id.clone()).or_insert(0);
        let user_index = 2 * *n + 1;
        *n += 1;

        if let Some(text) = user {
            turns.push(ChatTurn {
                session_id: session_id.clone(),
                role: Role::User,
                turn_index: user_index,
                text,
                ts: ts.clone(),
            });
        }
        if let Some(text) = response {
            turns.push(ChatTurn {
                session_id,
                role: Role::Assistant,
                turn_index: user_index + 1,
                text,
                ts,
            });
        }
    }
    Ok(turns)
}

/// 解析人设文件：YAML 列表（字符串或 `{text, ...}` 映射），否则按行读取，跳过 `#` 注释
pub fn parse_persona(content: &str, yaml: bool) -> Result<Vec<(String, Metadata)>> {
    if !yaml {
        return Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| (l.to_string(), Metadata::new()))
            .collect());
    }

    let doc: Value = serde_yaml::from_str(content)
        .map_err(|e| OrionError::Parse(format!("人设 YAML 解析失败: {}", e)))?;
    let entries = match doc {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("persona").or_else(|| map.remove("entries")) {
            Some(Value::Array(items)) => items,
            _ => return Err(OrionError::Parse("人设 YAML 需要列表".to_string())),
        },
        Value::Null => Vec::new(),
        _ => return Err(OrionError::Parse("人设 YAML 需要列表".to_string())),
    };

    let mut out = Vec::new();
    for entry in entries {
        match entry {
            Value::String(text) if !text.trim().is_empty() => {
                out.push((text.trim().to_string(), Metadata::new()));
            }
            Value::Object(mut map) => {
                let Some(Value::String(text)) = map.remove("text") else {
                    tracing::warn!("Persona entry without text skipped");
                    continue;
                };
                if !text.trim().is_empty() {
                    out.push((text.trim().to_string(), flatten_metadata(&map)));
                }
            }
            _ => {}
        }
    }
    Ok(out)
}

/// 待导入的语义或候选记录
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    pub text: String,
    pub metadata: Metadata,
}

fn take_object(map: &mut Map<String, Value>, keys: &[&str]) -> Map<String, Value> {
    keys.iter()
        .find_map(|k| match map.remove(*k) {
            Some(Value::Object(obj)) => Some(obj),
            _ => None,
        })
        .unwrap_or_default()
}

/// 解析导入 JSONL，没有文本的行跳过；metadata 缺少 source 时写入 `default_source`
pub fn parse_import_jsonl(content: &str, default_source: &str) -> Result<Vec<ImportRecord>> {
    let mut records = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .map_err(|e| OrionError::Parse(format!("第 {} 行: {}", line_no + 1, e)))?;
        let Value::Object(mut map) = value else {
            return Err(OrionError::Parse(format!("第 {} 行不是 JSON 对象", line_no + 1)));
        };

        let text = ["text", "doc", "document"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let Some(text) = text else {
            tracing::debug!("Import line {} has no text", line_no + 1);
            continue;
        };

        let mut metadata = flatten_metadata(&take_object(&mut map, &["meta", "metadata", "metadatas"]));
        metadata
            .entry("source".to_string())
            .or_insert_with(|| MetaValue::from(default_source));
        records.push(ImportRecord { text, metadata });
    }
    Ok(records)
}

/// 导出格式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: String,
    pub text: String,
    pub meta: Metadata,
}

impl From<VectorItem> for ExportRecord {
    fn from(item: VectorItem) -> Self {
        Self {
            id: item.id,
            text: item.document,
            meta: item.metadata,
        }
    }
}

pub fn export_jsonl(records: &[ExportRecord]) -> Result<String> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok(out)
}
