//! 写入命令

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use orion_core::Role;
use orion_memory::{ImportReport, IngestOutcome, IngestRequest, MemoryEngine, MemoryKind};
use orion_vector::{MetaValue, Metadata};

#[derive(Debug, Subcommand)]
pub enum IngestCommand {
    /// 人设：直接给文本，或 --file 指向文本 / YAML 文件
    Persona {
        source: String,
        #[arg(long)]
        file: bool,
    },
    /// 情景记忆，提供 session/role/turn 时按轮次写入
    Episodic {
        text: String,
        #[arg(long)]
        session: Option<String>,
        /// user | assistant
        #[arg(long)]
        role: Option<String>,
        #[arg(long)]
        turn: Option<i64>,
        #[arg(long)]
        ts: Option<String>,
        /// 覆盖最小词数
        #[arg(long)]
        min_length: Option<usize>,
    },
    /// 直接写入语义记忆
    Semantic {
        text: String,
        #[arg(long, default_value = "manual")]
        source: String,
        #[arg(long)]
        confidence: Option<f64>,
    },
    /// 写入候选
    Candidate {
        text: String,
        #[arg(long, default_value = "manual")]
        source: String,
        #[arg(long)]
        confidence: Option<f64>,
    },
    /// 导入聊天 JSONL，每行 {session_id?, user, response, timestamp?}
    Chat {
        file: PathBuf,
        /// 缺少 session_id 时使用，默认为文件名
        #[arg(long)]
        session: Option<String>,
    },
}

impl IngestCommand {
    pub async fn execute(&self, engine: &MemoryEngine) -> Result<()> {
        match self {
            IngestCommand::Persona { source, file } => {
                if *file {
                    let path = Path::new(source);
                    let content = read(path)?;
                    let yaml = matches!(
                        path.extension().and_then(|e| e.to_str()),
                        Some("yaml" | "yml")
                    );
                    print_report("persona", &engine.import_persona(&content, yaml).await?);
                } else {
                    let outcome = engine
                        .ingest(IngestRequest::new(MemoryKind::Persona, source.as_str()))
                        .await?;
                    print_outcome(&outcome);
                }
            }
            IngestCommand::Episodic {
                text,
                session,
                role,
                turn,
                ts,
                min_length,
            } => {
                let outcome = match (session, role, turn) {
                    (Some(session), Some(role), Some(turn)) => {
                        let role: Role = role.parse()?;
                        let id = engine
                            .ingest_turn(session, role, *turn, text, ts.as_deref())
                            .await?;
                        match id {
                            Some(id) => IngestOutcome::Stored(id),
                            None => {
                                println!("⏭️  Rejected");
                                return Ok(());
                            }
                        }
                    }
                    (None, None, None) => {
                        let mut request = IngestRequest::new(MemoryKind::Episodic, text.as_str());
                        if let Some(min) = min_length {
                            request = request.with_min_length(*min);
                        }
                        engine.ingest(request).await?
                    }
                    _ => bail!("--session, --role and --turn must be given together"),
                };
                print_outcome(&outcome);
            }
            IngestCommand::Semantic {
                text,
                source,
                confidence,
            } => {
                let request = IngestRequest::new(MemoryKind::Semantic, text.as_str())
                    .with_metadata(curated_metadata(source, *confidence));
                print_outcome(&engine.ingest(request).await?);
            }
            IngestCommand::Candidate {
                text,
                source,
                confidence,
            } => {
                let request = IngestRequest::new(MemoryKind::Candidate, text.as_str())
                    .with_metadata(curated_metadata(source, *confidence));
                print_outcome(&engine.ingest(request).await?);
            }
            IngestCommand::Chat { file, session } => {
                let content = read(file)?;
                let default_session = match session {
                    Some(s) => s.clone(),
                    None => file
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("chat")
                        .to_string(),
                };
                print_report("chat turns", &engine.import_chat(&content, &default_session).await?);
            }
        }
        Ok(())
    }
}

pub fn read(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn curated_metadata(source: &str, confidence: Option<f64>) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert("source".to_string(), MetaValue::from(source));
    if let Some(confidence) = confidence {
        meta.insert("confidence".to_string(), MetaValue::Float(confidence));
    }
    meta
}

fn print_outcome(outcome: &IngestOutcome) {
    match outcome {
        IngestOutcome::Stored(id) => println!("✅ Stored {}", id),
        IngestOutcome::Rejected(reason) => println!("⏭️  Rejected: {}", reason),
    }
}

pub fn print_report(what: &str, report: &ImportReport) {
    println!(
        "✅ Stored {} {} ({} rejected)",
        report.stored, what, report.rejected
    );
}
