//! 文档存储引擎接口
//!
//! 存储引擎对上层是不透明的"集合 + 键 -> 文档"存储，提供：
//! - 按集合的增删查
//! - 整库原始字节导出
//! - 显式压缩
//!
//! 只有 `Database` 门面和集合句柄会直接接触存储引擎。

use crate::error::StoreError;
use std::collections::BTreeMap;

/// 存储文档
pub type StoredDocument = serde_json::Map<String, serde_json::Value>;

/// 集合名 -> (键 -> 文档)
pub(crate) type Collections = BTreeMap<String, BTreeMap<String, StoredDocument>>;

/// 文档存储引擎
pub trait DocumentStore {
    /// 插入文档；键已存在时不做修改并返回 `false`
    fn insert(
        &mut self,
        collection: &str,
        key: &str,
        document: StoredDocument,
    ) -> Result<bool, StoreError>;

    /// 插入或覆盖文档，返回旧值
    fn upsert(
        &mut self,
        collection: &str,
        key: &str,
        document: StoredDocument,
    ) -> Result<Option<StoredDocument>, StoreError>;

    fn get(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// 删除文档，返回被删除的文档
    fn remove(&mut self, collection: &str, key: &str)
        -> Result<Option<StoredDocument>, StoreError>;

    /// 集合内全部文档（按键排序）
    fn documents(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError>;

    fn contains(&self, collection: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(collection, key)?.is_some())
    }

    /// 集合内文档数
    fn count(&self, collection: &str) -> Result<usize, StoreError> {
        Ok(self.documents(collection)?.len())
    }

    /// 非空集合的名称
    fn collection_names(&self) -> Vec<String>;

    /// 导出整库的原始字节
    fn export_bytes(&self) -> Result<Vec<u8>, StoreError>;

    /// 压缩存储
    fn compact(&mut self) -> Result<(), StoreError>;

    /// 将缓冲写入持久介质
    fn flush(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// 内存存储引擎
#[derive(Debug, Clone)]
pub struct MemoryStore {
    collections: Collections,
    compression_level: i32,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            collections: Collections::new(),
            compression_level: crate::config::DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub(crate) fn from_collections(collections: Collections) -> Self {
        Self {
            collections,
            compression_level: crate::config::DEFAULT_COMPRESSION_LEVEL,
        }
    }

    pub(crate) fn collections(&self) -> &Collections {
        &self.collections
    }

    /// 全部集合的文档总数
    pub fn total_documents(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    pub fn set_compression_level(&mut self, level: i32) {
        self.compression_level = level;
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentStore for MemoryStore {
    fn insert(
        &mut self,
        collection: &str,
        key: &str,
        document: StoredDocument,
    ) -> Result<bool, StoreError> {
        let documents = self.collections.entry(collection.to_string()).or_default();
        if documents.contains_key(key) {
            return Ok(false);
        }
        documents.insert(key.to_string(), document);
        Ok(true)
    }

    fn upsert(
        &mut self,
        collection: &str,
        key: &str,
        document: StoredDocument,
    ) -> Result<Option<StoredDocument>, StoreError> {
        Ok(self
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), document))
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        Ok(self
            .collections
            .get(collection)
            .and_then(|documents| documents.get(key))
            .cloned())
    }

    fn remove(
        &mut self,
        collection: &str,
        key: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        Ok(self
            .collections
            .get_mut(collection)
            .and_then(|documents| documents.remove(key)))
    }

    fn documents(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError> {
        Ok(self
            .collections
            .get(collection)
            .map(|documents| documents.values().cloned().collect())
            .unwrap_or_default())
    }

    fn contains(&self, collection: &str, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .collections
            .get(collection)
            .is_some_and(|documents| documents.contains_key(key)))
    }

    fn count(&self, collection: &str) -> Result<usize, StoreError> {
        Ok(self.collections.get(collection).map_or(0, |c| c.len()))
    }

    fn collection_names(&self) -> Vec<String> {
        self.collections
            .iter()
            .filter(|(_, documents)| !documents.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn export_bytes(&self) -> Result<Vec<u8>, StoreError> {
        crate::native::encode_image(&self.collections, self.compression_level)
    }

    fn compact(&mut self) -> Result<(), StoreError> {
        self.collections.retain(|_, documents| !documents.is_empty());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> StoredDocument {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_insert_rejects_existing_key() {
        let mut store = MemoryStore::new();
        assert!(store.insert("sketches", "a", doc(json!({"n": 1}))).unwrap());
        assert!(!store.insert("sketches", "a", doc(json!({"n": 2}))).unwrap());
        assert_eq!(store.get("sketches", "a").unwrap(), Some(doc(json!({"n": 1}))));
    }

    #[test]
    fn test_remove_and_counts() {
        let mut store = MemoryStore::new();
        store.insert("sketches", "a", doc(json!({}))).unwrap();
        store.insert("sketches", "b", doc(json!({}))).unwrap();
        store.insert("extrudes", "c", doc(json!({}))).unwrap();

        assert_eq!(store.count("sketches").unwrap(), 2);
        assert!(store.remove("sketches", "a").unwrap().is_some());
        assert!(store.remove("sketches", "a").unwrap().is_none());
        assert!(store.remove("missing", "a").unwrap().is_none());
        assert_eq!(store.total_documents(), 2);

        store.remove("extrudes", "c").unwrap();
        assert_eq!(store.collection_names(), vec!["sketches".to_string()]);
        store.compact().unwrap();
        assert_eq!(store.collections().len(), 1);
    }

    #[test]
    fn test_upsert_returns_previous() {
        let mut store = MemoryStore::new();
        assert!(store.upsert("meta", "k", doc(json!({"v": 1}))).unwrap().is_none());
        let previous = store.upsert("meta", "k", doc(json!({"v": 2}))).unwrap();
        assert_eq!(previous, Some(doc(json!({"v": 1}))));
    }
}
