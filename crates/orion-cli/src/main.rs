//! Orion CLI - 长期记忆命令行工具

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use orion_core::OrionConfig;
use orion_memory::{Collection, MemoryEngine, PromoteOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config_cmd;
mod ingest_cmd;
mod semantic_cmd;

#[derive(Parser)]
#[command(name = "orion")]
#[command(about = "Orion - long-term memory for a local assistant", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, global = true, env = "ORION_CONFIG")]
    config: Option<PathBuf>,
    /// 输出调试日志
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store persona, episodic, semantic or candidate memory
    Ingest {
        #[command(subcommand)]
        command: ingest_cmd::IngestCommand,
    },
    /// Recall memories similar to a query
    Recall {
        query: String,
        /// persona | episodic | semantic
        #[arg(long, default_value = "episodic")]
        collection: String,
        #[arg(short = 'k', long, default_value_t = 5)]
        top_k: usize,
    },
    /// Print the memory block injected into the prompt
    Context { query: String },
    /// Promote candidates into semantic memory
    Promote {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long, default_value_t = 0.0)]
        min_confidence: f64,
        /// Only candidates whose metadata.source matches
        #[arg(long)]
        source: Option<String>,
        /// Delete promoted candidates
        #[arg(long)]
        delete: bool,
    },
    /// Record counts per collection
    Stats,
    /// Semantic and candidate curation
    Semantic {
        #[command(subcommand)]
        command: semantic_cmd::SemanticCommand,
    },
    /// Delete every record in a collection
    Reset {
        collection: String,
        /// Skip the confirmation guard
        #[arg(long)]
        yes: bool,
    },
    /// Show or create the configuration file
    Config {
        #[command(subcommand)]
        command: config_cmd::ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "orion=debug,info" } else { "orion=info,warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = cli.config.unwrap_or_else(OrionConfig::default_path);

    // 配置命令不需要连接存储和嵌入服务
    if let Commands::Config { command } = &cli.command {
        return command.execute(&config_path);
    }

    let config = OrionConfig::load(Some(config_path.as_path()))?;
    let engine = MemoryEngine::from_config(config)?;

    match cli.command {
        Commands::Ingest { command } => command.execute(&engine).await?,
        Commands::Recall {
            query,
            collection,
            top_k,
        } => {
            let results = match collection.parse::<Collection>()? {
                Collection::Persona => engine.recall_persona(&query, top_k).await?,
                Collection::Episodic => engine.recall_episodic(&query, top_k).await?,
                Collection::Semantic => engine.recall_semantic(&query, top_k).await?,
                Collection::SemanticCandidates => {
                    bail!("candidates are not recalled, use `orion semantic list --target candidates`")
                }
            };
            if results.is_empty() {
                println!("(no memories)");
            }
            for (i, item) in results.iter().enumerate() {
                println!("[{}] {}", i + 1, item);
            }
        }
        Commands::Context { query } => {
            let context = engine.build_context(&query).await;
            if context.is_empty() {
                println!("(no memories)");
            } else {
                println!("{}", context);
            }
        }
        Commands::Promote {
            limit,
            min_confidence,
            source,
            delete,
        } => {
            let options = PromoteOptions {
                limit,
                min_confidence,
                source,
                delete_from_source: delete,
            };
            let report = engine.promote_candidates(&options).await?;
            println!(
                "✅ Promoted {} of {} scanned candidates",
                report.promoted, report.scanned
            );
            for id in report.promoted_ids {
                println!("   {}", id);
            }
        }
        Commands::Stats => {
            let stats = engine.stats().await?;
            let names = &engine.config().collections;
            println!("{:<28} {:>8}", names.persona, stats.persona);
            println!("{:<28} {:>8}", names.episodic, stats.episodic);
            println!("{:<28} {:>8}", names.semantic, stats.semantic);
            println!("{:<28} {:>8}", names.semantic_candidates, stats.candidates);
        }
        Commands::Semantic { command } => command.execute(&engine).await?,
        Commands::Reset { collection, yes } => {
            let collection = collection.parse::<Collection>()?;
            let name = engine.registry().name(collection).to_string();
            if !yes {
                bail!("refusing to reset {} without --yes", name);
            }
            engine.reset(collection).await?;
            println!("✅ Reset {}", name);
        }
        Commands::Config { command } => command.execute(&config_path)?,
    }

    Ok(())
}
