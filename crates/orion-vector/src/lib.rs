//! Orion Vector - 向量存储抽象层
//!
//! 提供统一的向量集合接口，支持两种后端：
//! - Memory (进程内，测试和开发使用)
//! - SQLite (持久化，每个集合一张表)

pub mod store;
pub mod types;

pub use store::*;
pub use types::*;
