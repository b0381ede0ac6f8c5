//! 集合版本
//!
//! 每个注册的构件类型都声明一个 `major.minor.patch` 版本，描述该类型当前的存储形态。
//! 元数据中记录的是上次保存时的版本，两者不同时由集合自行选择解码策略。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 集合版本号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CollectionVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl CollectionVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for CollectionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// 版本解析错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid collection version '{0}', expected major.minor.patch")]
pub struct VersionParseError(pub String);

impl FromStr for CollectionVersion {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionParseError(s.to_string());

        let mut parts = s.trim().split('.');
        let mut next = || -> Result<u32, VersionParseError> {
            parts
                .next()
                .ok_or_else(invalid)?
                .parse::<u32>()
                .map_err(|_| invalid())
        };

        let version = Self::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

impl From<CollectionVersion> for String {
    fn from(version: CollectionVersion) -> Self {
        version.to_string()
    }
}

impl TryFrom<String> for CollectionVersion {
    type Error = VersionParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let version: CollectionVersion = "1.10.2".parse().unwrap();
        assert_eq!(version, CollectionVersion::new(1, 10, 2));
        assert_eq!(version.to_string(), "1.10.2");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in ["", "1", "1.0", "1.0.0.0", "1.x.0", "-1.0.0"] {
            assert!(text.parse::<CollectionVersion>().is_err(), "{text}");
        }
    }

    #[test]
    fn test_ordering() {
        let v100 = CollectionVersion::new(1, 0, 0);
        let v110 = CollectionVersion::new(1, 1, 0);
        let v1_9 = CollectionVersion::new(1, 9, 0);
        let v1_10 = CollectionVersion::new(1, 10, 0);

        assert!(v100 < v110);
        assert!(v1_9 < v1_10);
    }

    #[test]
    fn test_serde_as_string() {
        let version = CollectionVersion::new(2, 0, 1);
        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"2.0.1\"");
        let back: CollectionVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(back, version);
    }
}
