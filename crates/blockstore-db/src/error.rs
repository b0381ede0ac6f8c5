//! 持久化错误定义

use blockstore_core::version::{CollectionVersion, VersionParseError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("MessagePack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    #[error("MessagePack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Storage engine error: {0}")]
    Engine(String),

    #[error("Codec error in collection '{collection}': {source}")]
    Codec {
        collection: String,
        #[source]
        source: CodecError,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// 编码/解码错误
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoded block is not a document")]
    NotADocument,

    #[error("Missing field '{0}'")]
    MissingField(String),

    #[error("Migration from {from} failed: {message}")]
    Migration {
        from: CollectionVersion,
        message: String,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// 注册表构建错误
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Collection name '{0}' is registered more than once")]
    DuplicateName(String),

    #[error("Block type {0} is registered more than once")]
    DuplicateType(&'static str),

    #[error("Collection name '{0}' is reserved")]
    ReservedName(String),

    #[error("Collection '{0}' is not registered")]
    UnknownCollection(String),

    #[error("Metadata holds an invalid version for collection '{collection}': {source}")]
    InvalidMetadataVersion {
        collection: String,
        #[source]
        source: VersionParseError,
    },
}
