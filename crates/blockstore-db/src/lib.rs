//! 构件持久化
//!
//! 提供：
//! - 版本化的持久集合（每个构件类型一个集合）
//! - 显式注册清单与存储元数据
//! - 原生文件存储（zstd + MessagePack 快照，追加式日志）
//! - 同时维护依赖树和集合的可撤销命令

pub mod collection;
pub mod command;
pub mod config;
pub mod context;
pub mod database;
pub mod error;
pub mod metadata;
pub mod native;
pub mod registry;
pub mod store;

#[cfg(test)]
mod testing;

pub use collection::{CollectionHandle, PersistedCollection, PersistentBlock, RecordMapper};
pub use command::{CommandState, CreateCommand, DeleteCommand, ModelCommand};
pub use config::StoreConfig;
pub use context::ModelContext;
pub use database::Database;
pub use error::{CodecError, RegistryError, StoreError};
pub use metadata::{StoreMetadata, METADATA_COLLECTION};
pub use native::FileStore;
pub use registry::{CollectionRegistry, CollectionSchema, RegistryBuilder};
pub use store::{DocumentStore, MemoryStore, StoredDocument};
