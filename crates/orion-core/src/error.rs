//! 统一错误处理

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrionError {
    #[error("配置错误: {0}")]
    Config(String),

    /// 向量存储后端故障 (I/O、索引损坏等)
    #[error("向量存储错误: {0}")]
    Storage(String),

    /// 嵌入服务故障
    #[error("嵌入服务错误: {0}")]
    Embedding(String),

    /// 提取服务 (archivist) 故障
    #[error("提取服务错误: {0}")]
    Extraction(String),

    #[error("解析错误: {0}")]
    Parse(String),

    #[error("参数错误: {0}")]
    InvalidArgument(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrionError {
    /// 外部协作方 (嵌入 / 提取服务) 引起的错误
    pub fn is_collaborator(&self) -> bool {
        matches!(self, OrionError::Embedding(_) | OrionError::Extraction(_))
    }

    pub fn is_storage(&self) -> bool {
        matches!(self, OrionError::Storage(_) | OrionError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, OrionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(OrionError::Embedding("down".to_string()).is_collaborator());
        assert!(OrionError::Extraction("timeout".to_string()).is_collaborator());
        assert!(!OrionError::Storage("corrupt".to_string()).is_collaborator());
        assert!(OrionError::Storage("corrupt".to_string()).is_storage());

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert!(OrionError::from(io).is_storage());
    }

    #[test]
    fn test_error_display() {
        let err = OrionError::Parse("bad json".to_string());
        assert_eq!(err.to_string(), "解析错误: bad json");
    }
}
