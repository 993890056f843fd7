//! 启发式事实抽取
//!
//! 从聊天记录中挑出可能包含长期偏好或环境信息的句子，作为候选写入。
//! 不依赖 LLM，适合对历史日志做一次性预处理。

use std::collections::HashSet;

use once_cell::sync::Lazy;
use orion_vector::{MetaValue, Metadata};
use regex::Regex;
use serde_json::Value;

const KEEP_PHRASES: [&str; 22] = [
    "i prefer",
    "i like",
    "my favorite",
    "i use",
    "i want",
    "i need",
    "i am on",
    "i work on",
    "i'm on",
    "powershell",
    "windows",
    "linux",
    "macos",
    "config.yaml",
    "chroma",
    "embedding",
    "ollama",
    "localhost",
    "http://",
    "https://",
    "github.com",
    "c:\\",
];

const TEXT_KEYS: [&str; 6] = ["user_text", "assistant_text", "text", "content", "message", "value"];
const CONTAINER_KEYS: [&str; 5] = ["turns", "data", "items", "entries", "log"];

static PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Za-z]:\\").expect("valid regex"));
static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)https?://").expect("valid regex"));

/// 在 `.` `!` `?` 后的空白处断句，句内空白折叠
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.trim().chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().is_some_and(|next| next.is_whitespace());
        if boundary {
            push_sentence(&mut sentences, &current);
            current.clear();
        }
    }
    push_sentence(&mut sentences, &current);
    sentences
}

fn push_sentence(out: &mut Vec<String>, raw: &str) {
    let sentence = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if !sentence.is_empty() {
        out.push(sentence);
    }
}

pub fn is_keeper(sentence: &str) -> bool {
    let lower = sentence.to_lowercase();
    KEEP_PHRASES.iter().any(|p| lower.contains(p))
        || PATH_RE.is_match(sentence)
        || URL_RE.is_match(sentence)
}

/// 从一条 JSON 记录里收集消息文本，兼容多种日志格式
pub fn texts_from_value(value: &Value) -> Vec<String> {
    let mut out = Vec::new();
    collect_texts(value, &mut out);
    out
}

fn non_blank(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn collect_texts(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Array(items) => items.iter().for_each(|item| collect_texts(item, out)),
        Value::Object(map) => {
            for key in TEXT_KEYS {
                if let Some(text) = non_blank(map.get(key)) {
                    out.push(text.to_string());
                }
            }

            if let Some(Value::Object(message)) = map.get("message") {
                if let Some(text) = non_blank(message.get("content")).or(non_blank(message.get("text"))) {
                    out.push(text.to_string());
                }
            }

            if let Some(Value::Array(messages)) = map.get("messages") {
                for message in messages.iter().filter_map(Value::as_object) {
                    if let Some(text) = non_blank(message.get("content")).or(non_blank(message.get("text"))) {
                        out.push(text.to_string());
                    }
                }
            }

            for key in CONTAINER_KEYS {
                if let Some(Value::Array(items)) = map.get(key) {
                    items.iter().for_each(|item| collect_texts(item, out));
                }
            }
        }
        _ => {}
    }
}

/// 逐行解析 JSONL，跳过空行和无法解析的行
pub fn texts_from_jsonl(content: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut skipped = 0usize;
    for line in content.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Value>(line) {
            Ok(value) => collect_texts(&value, &mut out),
            Err(_) => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::warn!("Skipped {} unparseable JSONL lines", skipped);
    }
    out
}

/// 去重后的关键句，保持出现顺序；`max` 为 0 时不限数量
pub fn keeper_sentences<S: AsRef<str>>(texts: &[S], max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for text in texts {
        for sentence in split_sentences(text.as_ref()) {
            if !is_keeper(&sentence) || !seen.insert(sentence.clone()) {
                continue;
            }
            out.push(sentence);
            if max > 0 && out.len() >= max {
                return out;
            }
        }
    }
    out
}

pub fn heuristic_metadata() -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("source".to_string(), MetaValue::from("heuristics"));
    meta.insert("confidence".to_string(), MetaValue::Float(1.0));
    meta.insert("tags".to_string(), MetaValue::from("heuristic"));
    meta
}
