//! 配置管理
//!
//! 加载顺序: 内置默认值 -> YAML 配置文件 (可选) -> `ORION__*` / `ORION_*` 环境变量

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};

use crate::{OrionError, Result};

const ENV_PREFIX: &str = "ORION__";
const LEGACY_ENV_PREFIX: &str = "ORION_";

/// 主配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrionConfig {
    /// 当前 profile 名称
    pub profile: String,
    /// 向量存储配置
    pub store: StoreConfig,
    /// 嵌入服务配置
    pub embedding: EmbeddingConfig,
    /// 集合命名
    pub collections: CollectionsConfig,
    /// 召回数量配置
    pub ltm: LtmConfig,
    /// 写入门槛
    pub ingest: IngestConfig,
    /// 情景召回参数
    pub recall: RecallConfig,
    /// 后台 archivist 配置
    pub archivist: ArchivistConfig,
}

impl Default for OrionConfig {
    fn default() -> Self {
        Self {
            profile: "orion_main".to_string(),
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            collections: CollectionsConfig::default(),
            ltm: LtmConfig::default(),
            ingest: IngestConfig::default(),
            recall: RecallConfig::default(),
            archivist: ArchivistConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreKind,
    /// SQLite 数据库文件路径
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreKind::Sqlite,
            path: default_data_dir().join("memory.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// openai | ollama
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            base_url: None,
            api_key: None,
            dimensions: 768,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionsConfig {
    pub persona: String,
    pub episodic: String,
    pub semantic: String,
    pub semantic_candidates: String,
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            persona: "orion_persona".to_string(),
            episodic: "orion_episodic_ltm".to_string(),
            semantic: "orion_semantic_ltm".to_string(),
            semantic_candidates: "orion_semantic_candidates".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LtmConfig {
    pub topk_persona: usize,
    pub topk_episodic: usize,
    /// 0 表示关闭语义召回
    pub topk_semantic: usize,
    pub semantic_enabled: bool,
}

impl Default for LtmConfig {
    fn default() -> Self {
        Self {
            topk_persona: 5,
            topk_episodic: 10,
            topk_semantic: 0,
            semantic_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub episodic_min_length: usize,
    pub persona_min_length: usize,
    pub semantic_min_length: usize,
    pub candidate_min_length: usize,
    /// 情景记忆去重阈值 (余弦距离)，尚未用真实数据校准
    pub dedup_distance: f32,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            episodic_min_length: 10,
            persona_min_length: 0,
            semantic_min_length: 0,
            candidate_min_length: 0,
            dedup_distance: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecallConfig {
    /// 候选数量 = top_k * candidate_multiplier
    pub candidate_multiplier: usize,
    pub info_density_weight: f32,
    /// 延续性查询命中低信息量锚点时的惩罚
    pub continuity_penalty: f32,
    pub low_substance_penalty: f32,
    /// 低信息量锚点占比达到该值时触发按时间回退
    pub continuity_fallback_ratio: f32,
    pub pair_max_chars: usize,
    pub assistant_fallback_cap: usize,
    pub long_assistant_penalty: f32,
}

impl Default for RecallConfig {
    fn default() -> Self {
        Self {
            candidate_multiplier: 5,
            info_density_weight: 0.12,
            continuity_penalty: 0.35,
            low_substance_penalty: 0.10,
            continuity_fallback_ratio: 0.6,
            pair_max_chars: 400,
            assistant_fallback_cap: 2,
            long_assistant_penalty: 0.30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivistPoolConfig {
    pub window_turns: usize,
    pub min_new_turns: usize,
}

impl Default for ArchivistPoolConfig {
    fn default() -> Self {
        Self {
            window_turns: 20,
            min_new_turns: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivistWriteConfig {
    pub auto_promote: bool,
    pub promote_min_confidence: f32,
}

impl Default for ArchivistWriteConfig {
    fn default() -> Self {
        Self {
            auto_promote: false,
            promote_min_confidence: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchivistConfig {
    pub enabled: bool,
    /// OpenAI 兼容接口地址
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_s: u64,
    pub pool: ArchivistPoolConfig,
    pub write: ArchivistWriteConfig,
}

impl Default for ArchivistConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: "http://localhost:11434/v1".to_string(),
            api_key: "ollama".to_string(),
            model: "qwen3:4b".to_string(),
            temperature: 0.2,
            max_tokens: 800,
            timeout_s: 60,
            pool: ArchivistPoolConfig::default(),
            write: ArchivistWriteConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("orion")
}

impl OrionConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("orion")
            .join("config.yaml")
    }

    /// 加载配置文件并应用环境变量覆盖
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let vars: Vec<(String, String)> = std::env::vars().collect();
        Self::load_with_env(path, &vars)
    }

    pub fn load_with_env(path: Option<&Path>, vars: &[(String, String)]) -> Result<Self> {
        let mut root = match path {
            Some(p) if p.exists() => {
                tracing::debug!("Loading config from {}", p.display());
                let content = std::fs::read_to_string(p)
                    .map_err(|e| OrionError::Config(format!("读取配置文件失败: {}", e)))?;
                let value: Value = serde_yaml::from_str(&content)
                    .map_err(|e| OrionError::Config(format!("解析配置文件失败: {}", e)))?;
                match value {
                    Value::Mapping(m) => m,
                    Value::Null => Mapping::new(),
                    _ => {
                        return Err(OrionError::Config(format!(
                            "配置文件顶层必须是映射: {}",
                            p.display()
                        )));
                    }
                }
            }
            _ => Mapping::new(),
        };

        apply_env_overrides(&mut root, vars);

        let config: OrionConfig = serde_yaml::from_value(Value::Mapping(root))
            .map_err(|e| OrionError::Config(format!("配置字段无效: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let pool = &self.archivist.pool;
        if pool.window_turns == 0 {
            return Err(OrionError::Config("archivist.pool.window_turns 必须大于 0".to_string()));
        }
        if pool.min_new_turns == 0 {
            return Err(OrionError::Config("archivist.pool.min_new_turns 必须大于 0".to_string()));
        }
        if self.recall.candidate_multiplier == 0 {
            return Err(OrionError::Config("recall.candidate_multiplier 必须大于 0".to_string()));
        }
        let unit_checks = [
            ("ingest.dedup_distance", self.ingest.dedup_distance),
            ("recall.continuity_fallback_ratio", self.recall.continuity_fallback_ratio),
            ("archivist.write.promote_min_confidence", self.archivist.write.promote_min_confidence),
        ];
        for (name, value) in unit_checks {
            if !(0.0..=1.0).contains(&value) {
                return Err(OrionError::Config(format!("{} 必须在 [0, 1] 区间: {}", name, value)));
            }
        }
        Ok(())
    }

    /// 保存配置到文件
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| OrionError::Config(format!("创建目录失败: {}", e)))?;
        }
        let content = serde_yaml::to_string(self)
            .map_err(|e| OrionError::Config(format!("序列化配置失败: {}", e)))?;
        std::fs::write(path, content)
            .map_err(|e| OrionError::Config(format!("写入配置文件失败: {}", e)))?;
        Ok(())
    }
}

/// `ORION__ARCHIVIST__POOL__WINDOW_TURNS=8` -> archivist.pool.window_turns = 8
/// 旧式 `ORION_PROFILE` / `ORION_STORE_PATH` 仅覆盖少数顶层字段
fn apply_env_overrides(root: &mut Mapping, vars: &[(String, String)]) {
    for (key, raw) in vars {
        if let Some(rest) = key.strip_prefix(ENV_PREFIX) {
            let path: Vec<String> = rest
                .split("__")
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase())
                .collect();
            if !path.is_empty() {
                set_nested(root, &path, parse_env_value(raw));
            }
        } else if let Some(field) = key.strip_prefix(LEGACY_ENV_PREFIX) {
            match field {
                "PROFILE" => set_nested(root, &["profile".to_string()], Value::String(raw.clone())),
                "STORE_PATH" => set_nested(
                    root,
                    &["store".to_string(), "path".to_string()],
                    Value::String(raw.clone()),
                ),
                _ => {}
            }
        }
    }
}

fn parse_env_value(raw: &str) -> Value {
    serde_yaml::from_str::<Value>(raw)
        .ok()
        .filter(|v| !matches!(v, Value::Mapping(_) | Value::Sequence(_) | Value::Null))
        .unwrap_or_else(|| Value::String(raw.to_string()))
}

fn set_nested(root: &mut Mapping, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for key in parents {
        let entry = current
            .entry(Value::String(key.clone()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if !entry.is_mapping() {
            *entry = Value::Mapping(Mapping::new());
        }
        current = match entry {
            Value::Mapping(m) => m,
            _ => return,
        };
    }
    current.insert(Value::String(last.clone()), value);
}
