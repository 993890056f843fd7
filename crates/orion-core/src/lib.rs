//! Orion Core - 核心类型和抽象
//!
//! 提供错误类型、配置加载与对话轮次等基础定义。

pub mod config;
pub mod error;
pub mod message;

pub use config::*;
pub use error::*;
pub use message::*;
