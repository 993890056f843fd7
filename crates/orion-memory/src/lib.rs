//! Orion Memory - 长期记忆引擎
//!
//! 四个集合：
//! - 人设 (persona): 关于助手自身的固定描述
//! - 情景 (episodic): 按轮次存储的对话记录，召回时配对用户发言与助手回复
//! - 语义 (semantic): 经过筛选的长期事实
//! - 候选 (candidates): 等待晋升的事实，来自 archivist、启发式抽取或导入
//!
//! [`MemoryEngine`] 是对外入口。

pub mod archivist;
pub mod classifier;
pub mod embedding;
pub mod engine;
pub mod gateway;
pub mod heuristics;
pub mod ingest;
pub mod promote;
pub mod recall;
pub mod text;
pub mod transfer;

#[cfg(test)]
mod testing;

pub use archivist::*;
pub use classifier::*;
pub use embedding::*;
pub use engine::*;
pub use gateway::*;
pub use ingest::*;
pub use promote::*;
pub use recall::*;
pub use transfer::*;
