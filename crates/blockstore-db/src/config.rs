//! 存储配置

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Zstd 压缩级别（1-22，3 是默认值，平衡速度和压缩比）
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// 自动压缩前允许追加的日志帧数
pub const DEFAULT_AUTO_COMPACT_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 快照压缩级别
    pub compression_level: i32,

    /// 追加日志帧达到该数量后自动压缩（0 表示禁用）
    pub auto_compact_threshold: usize,

    /// 宿主应用版本标识，写入元数据
    pub application_version: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            auto_compact_threshold: DEFAULT_AUTO_COMPACT_THRESHOLD,
            application_version: format!("blockstore {}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl StoreConfig {
    /// 从 JSON 文件加载配置，缺省字段使用默认值
    pub fn from_json_file(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn with_application_version(mut self, version: impl Into<String>) -> Self {
        self.application_version = version.into();
        self
    }

    pub fn with_auto_compact_threshold(mut self, threshold: usize) -> Self {
        self.auto_compact_threshold = threshold;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_config_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "auto_compact_threshold": 8 }}"#).unwrap();

        let config = StoreConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.auto_compact_threshold, 8);
        assert_eq!(config.compression_level, DEFAULT_COMPRESSION_LEVEL);
        assert!(config.application_version.starts_with("blockstore "));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            StoreConfig::from_json_file(file.path()),
            Err(StoreError::Json(_))
        ));
    }
}
