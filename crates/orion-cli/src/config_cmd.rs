//! 配置文件命令

use std::path::Path;

use anyhow::{Result, bail};
use clap::Subcommand;
use orion_core::OrionConfig;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// 打印合并环境变量后的有效配置
    Show,
    /// 写入默认配置文件
    Init {
        /// 覆盖已有文件
        #[arg(long)]
        force: bool,
    },
}

impl ConfigCommand {
    pub fn execute(&self, path: &Path) -> Result<()> {
        match self {
            ConfigCommand::Show => {
                let mut config = OrionConfig::load(Some(path))?;
                config.archivist.api_key = mask(&config.archivist.api_key);
                config.embedding.api_key = config.embedding.api_key.as_deref().map(mask);
                println!("# {}", path.display());
                print!("{}", serde_yaml::to_string(&config)?);
            }
            ConfigCommand::Init { force } => {
                if path.exists() && !force {
                    bail!("{} already exists, pass --force to overwrite", path.display());
                }
                OrionConfig::default().save(path)?;
                println!("✅ Wrote default config to {}", path.display());
            }
        }
        Ok(())
    }
}

fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask() {
        assert_eq!(mask("ollama"), "******");
        assert_eq!(mask("sk-1234567890abcd"), "sk-1...abcd");
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orion").join("config.yaml");

        ConfigCommand::Init { force: false }.execute(&path).unwrap();
        assert!(ConfigCommand::Init { force: false }.execute(&path).is_err());
        ConfigCommand::Init { force: true }.execute(&path).unwrap();
        assert!(OrionConfig::load(Some(path.as_path())).is_ok());
    }
}
