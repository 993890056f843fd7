//! 语义记忆整理命令

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;
use orion_memory::{Collection, MemoryEngine, MemoryKind, export_jsonl};

use crate::ingest_cmd::{print_report, read};

#[derive(Debug, Subcommand)]
pub enum SemanticCommand {
    /// 列出记录
    List {
        /// semantic | candidates
        #[arg(long, default_value = "semantic")]
        target: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        source: Option<String>,
    },
    /// 导出为 JSONL {id, text, meta}
    Export {
        #[arg(long, default_value = "semantic")]
        target: String,
        /// 输出文件，省略时写到标准输出
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long)]
        source: Option<String>,
    },
    /// 导入 JSONL {text|doc|document, meta|metadata}
    Import {
        file: PathBuf,
        #[arg(long, default_value = "candidates")]
        target: String,
        /// metadata 缺少 source 时写入的值
        #[arg(long, default_value = "import")]
        source: String,
    },
    /// 从聊天 JSONL 中启发式抽取关键句作为候选
    Heuristics {
        file: PathBuf,
        /// 0 表示不限
        #[arg(long, default_value_t = 0)]
        max: usize,
    },
}

impl SemanticCommand {
    pub async fn execute(&self, engine: &MemoryEngine) -> Result<()> {
        match self {
            SemanticCommand::List {
                target,
                limit,
                source,
            } => {
                let collection: Collection = target.parse()?;
                let items = engine.list(collection, source.as_deref(), *limit).await?;
                if items.is_empty() {
                    println!("(empty)");
                }
                for item in items {
                    let source = item
                        .metadata
                        .get("source")
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{}  [{}]  {}", item.id, source, item.document);
                }
            }
            SemanticCommand::Export {
                target,
                out,
                source,
            } => {
                let collection: Collection = target.parse()?;
                let records = engine.export(collection, source.as_deref()).await?;
                let content = export_jsonl(&records)?;
                match out {
                    Some(path) => {
                        std::fs::write(path, content)
                            .with_context(|| format!("failed to write {}", path.display()))?;
                        eprintln!("✅ Exported {} records to {}", records.len(), path.display());
                    }
                    None => print!("{}", content),
                }
            }
            SemanticCommand::Import {
                file,
                target,
                source,
            } => {
                let kind: MemoryKind = target.parse()?;
                let content = read(file)?;
                let report = engine.import(kind, &content, source).await?;
                print_report(&kind.to_string(), &report);
            }
            SemanticCommand::Heuristics { file, max } => {
                let content = read(file)?;
                let report = engine.stage_heuristics(&content, *max).await?;
                print_report("heuristic candidates", &report);
            }
        }
        Ok(())
    }
}
