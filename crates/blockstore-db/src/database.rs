//! 数据库门面
//!
//! 唯一持有存储引擎的对象。集合句柄、命令层和维护操作都经由这里访问存储。

use crate::collection::{CollectionHandle, PersistentBlock};
use crate::config::StoreConfig;
use crate::error::{RegistryError, StoreError};
use crate::native::FileStore;
use crate::registry::{CollectionRegistry, RegistryBuilder};
use crate::store::{DocumentStore, MemoryStore, StoredDocument};
use blockstore_core::record::{BlockId, DataRecord};
use std::path::Path;

pub struct Database {
    store: Box<dyn DocumentStore>,
    registry: CollectionRegistry,
    config: StoreConfig,
}

impl Database {
    /// 在给定存储引擎上构建注册表并打开数据库
    pub fn open(
        mut store: Box<dyn DocumentStore>,
        builder: RegistryBuilder,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        let registry = builder.build(store.as_mut(), &config.application_version)?;
        tracing::info!(
            "Opened database with {} collection(s): {}",
            registry.len(),
            registry.names().join(", ")
        );
        Ok(Self {
            store,
            registry,
            config,
        })
    }

    /// 打开（或创建）文件数据库
    pub fn open_file(
        path: impl AsRef<Path>,
        builder: RegistryBuilder,
        config: StoreConfig,
    ) -> Result<Self, StoreError> {
        let store = FileStore::open(path, &config)?;
        Self::open(Box::new(store), builder, config)
    }

    /// 内存数据库
    pub fn in_memory(builder: RegistryBuilder) -> Result<Self, StoreError> {
        Self::open(Box::new(MemoryStore::new()), builder, StoreConfig::default())
    }

    pub fn registry(&self) -> &CollectionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// 构件类型绑定的集合；未注册时返回 `None`
    pub fn collection<B: PersistentBlock>(&mut self) -> Option<CollectionHandle<'_, B>> {
        let collection = self.registry.collection::<B>()?;
        Some(CollectionHandle::new(collection, self.store.as_mut()))
    }

    pub fn collection_of<B: PersistentBlock>(
        &mut self,
        _sample: &B,
    ) -> Option<CollectionHandle<'_, B>> {
        self.collection::<B>()
    }

    /// 读取构件
    pub fn read<B: PersistentBlock>(&self, id: &BlockId) -> Result<Option<B>, StoreError> {
        let collection = self.registry.collection::<B>().ok_or_else(|| {
            RegistryError::UnknownCollection(std::any::type_name::<B>().to_string())
        })?;
        collection.read(self.store.as_ref(), id)
    }

    /// 持有该构件文档的集合
    pub fn owner_of(&self, id: &BlockId) -> Result<Option<&'static str>, StoreError> {
        let key = id.to_key();
        for collection in self.registry.iter() {
            if self.store.contains(collection.name(), &key)? {
                return Ok(Some(collection.name()));
            }
        }
        Ok(None)
    }

    /// 从所属集合中删除构件文档，返回集合名与原始文档
    pub fn remove_document(
        &mut self,
        id: &BlockId,
    ) -> Result<Option<(&'static str, StoredDocument)>, StoreError> {
        let Some(collection) = self.owner_of(id)? else {
            return Ok(None);
        };
        Ok(self
            .store
            .remove(collection, &id.to_key())?
            .map(|document| (collection, document)))
    }

    /// 把原始文档放回集合；文档已存在时返回 `false`
    pub fn restore_document(
        &mut self,
        collection: &str,
        id: &BlockId,
        document: StoredDocument,
    ) -> Result<bool, StoreError> {
        if self.registry.by_name(collection).is_none() {
            return Err(RegistryError::UnknownCollection(collection.to_string()).into());
        }
        self.store.insert(collection, &id.to_key(), document)
    }

    /// 各集合的数据记录，按注册顺序
    pub fn load_records(&self) -> Vec<(&'static str, Result<Vec<DataRecord>, StoreError>)> {
        self.registry
            .iter()
            .map(|collection| (collection.name(), collection.read_records(self.store.as_ref())))
            .collect()
    }

    /// 各集合的文档数，按注册顺序
    pub fn collection_counts(&self) -> Result<Vec<(&'static str, usize)>, StoreError> {
        self.registry
            .iter()
            .map(|collection| Ok((collection.name(), self.store.count(collection.name())?)))
            .collect()
    }

    /// 用当前映射重写集合中的全部文档，并把元数据版本更新为声明版本
    pub fn upgrade_collection(&mut self, name: &str) -> Result<usize, StoreError> {
        let collection = self
            .registry
            .by_name(name)
            .ok_or_else(|| RegistryError::UnknownCollection(name.to_string()))?;
        let from = collection.saved_version();
        let to = collection.version();
        let count = collection.reencode_all(self.store.as_mut())?;

        self.registry.stamp_version(self.store.as_mut(), name)?;
        tracing::info!(
            "Upgraded collection '{}' from {} to {} ({} document(s))",
            name,
            from,
            to,
            count
        );
        Ok(count)
    }

    pub fn compact(&mut self) -> Result<(), StoreError> {
        self.store.compact()
    }

    pub fn export_bytes(&self) -> Result<Vec<u8>, StoreError> {
        self.store.export_bytes()
    }

    pub fn flush(&mut self) -> Result<(), StoreError> {
        self.store.flush()
    }

    /// 关闭数据库：刷新并压缩存储
    pub fn close(mut self) -> Result<(), StoreError> {
        self.store.flush()?;
        self.store.compact()?;
        tracing::info!("Database closed");
        Ok(())
    }
}
