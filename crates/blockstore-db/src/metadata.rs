//! 存储元数据
//!
//! 保存在保留集合中，记录写入该存储的应用版本和每个集合的版本。

use crate::error::{RegistryError, StoreError};
use crate::store::DocumentStore;
use blockstore_core::version::CollectionVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// 保留的元数据集合名
pub const METADATA_COLLECTION: &str = "__metadata__";

/// 元数据文档键
pub const METADATA_KEY: &str = "store";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// 写入该存储的应用版本
    pub application_version: String,

    /// 集合名 -> 版本字符串
    pub collections: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl StoreMetadata {
    pub fn new(application_version: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            application_version: application_version.into(),
            collections: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 从存储读取元数据；新存储返回 `None`
    pub fn load(store: &dyn DocumentStore) -> Result<Option<Self>, StoreError> {
        store
            .get(METADATA_COLLECTION, METADATA_KEY)?
            .map(|document| serde_json::from_value(Value::Object(document)).map_err(StoreError::from))
            .transpose()
    }

    pub fn save(&mut self, store: &mut dyn DocumentStore) -> Result<(), StoreError> {
        self.updated_at = Utc::now();
        let Value::Object(document) = serde_json::to_value(&*self)? else {
            return Err(StoreError::InvalidFormat(
                "metadata did not serialize to a document".to_string(),
            ));
        };
        store.upsert(METADATA_COLLECTION, METADATA_KEY, document)?;
        Ok(())
    }

    /// 集合的保存版本
    pub fn version_of(&self, collection: &str) -> Result<Option<CollectionVersion>, RegistryError> {
        self.collections
            .get(collection)
            .map(|text| {
                text.parse()
                    .map_err(|source| RegistryError::InvalidMetadataVersion {
                        collection: collection.to_string(),
                        source,
                    })
            })
            .transpose()
    }

    pub fn set_version(&mut self, collection: &str, version: CollectionVersion) {
        self.collections
            .insert(collection.to_string(), version.to_string());
    }

    pub fn has_collection(&self, collection: &str) -> bool {
        self.collections.contains_key(collection)
    }
}
