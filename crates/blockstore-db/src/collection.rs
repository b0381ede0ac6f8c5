//! 持久化集合
//!
//! 每个构件类型绑定一个集合。集合持有显式的编码/解码映射：
//! - 编码总是写出当前形态，`id` 与 `parents` 作为一级字段，并在 `__v` 中记下写入时的版本
//! - 解码按文档自身的 `__v` 选择升级起点；没有 `__v` 的文档按元数据中的保存版本（`map_object`）处理

use crate::error::{CodecError, StoreError};
use crate::store::{DocumentStore, StoredDocument};
use blockstore_core::record::{BlockId, BuildingBlock, DataRecord};
use blockstore_core::version::CollectionVersion;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::marker::PhantomData;

/// `id` 字段名
pub const ID_FIELD: &str = "id";

/// `parents` 字段名
pub const PARENTS_FIELD: &str = "parents";

/// 文档写入时的集合版本
pub const VERSION_FIELD: &str = "__v";

/// 可持久化的构件
pub trait PersistentBlock: BuildingBlock + Serialize + DeserializeOwned {}

impl<T: BuildingBlock + Serialize + DeserializeOwned> PersistentBlock for T {}

type UpgradeFn = Box<dyn Fn(&mut StoredDocument) -> Result<(), CodecError>>;

/// 解码策略
///
/// 由一串升级步骤组成，每一步把文档从上一个版本改写到 `to` 版本。
/// 解码时只执行高于文档版本的步骤。
pub struct RecordMapper<B> {
    saved: CollectionVersion,
    upgrades: Vec<(CollectionVersion, UpgradeFn)>,
    _marker: PhantomData<fn() -> B>,
}

impl<B: PersistentBlock> RecordMapper<B> {
    /// 针对 `saved` 版本数据的解码策略，初始不含升级步骤
    pub fn new(saved: CollectionVersion) -> Self {
        Self {
            saved,
            upgrades: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// 添加升级步骤
    pub fn upgrade<F>(mut self, to: CollectionVersion, step: F) -> Self
    where
        F: Fn(&mut StoredDocument) -> Result<(), CodecError> + 'static,
    {
        self.upgrades.push((to, Box::new(step)));
        self.upgrades.sort_by_key(|(version, _)| *version);
        self
    }

    pub fn saved_version(&self) -> CollectionVersion {
        self.saved
    }

    /// 保存版本的文档需要经过的升级步骤数
    pub fn upgrade_count(&self) -> usize {
        self.upgrades
            .iter()
            .filter(|(to, _)| self.saved < *to)
            .count()
    }

    pub fn encode(&self, block: &B) -> Result<StoredDocument, CodecError> {
        let Value::Object(mut document) = serde_json::to_value(block)? else {
            return Err(CodecError::NotADocument);
        };

        // 无论构件自身如何序列化，id/parents 都作为一级字段写出
        document.insert(ID_FIELD.to_string(), serde_json::to_value(block.id())?);
        document.insert(
            PARENTS_FIELD.to_string(),
            serde_json::to_value(block.parents())?,
        );
        Ok(document)
    }

    pub fn decode(&self, mut document: StoredDocument) -> Result<B, CodecError> {
        for field in [ID_FIELD, PARENTS_FIELD] {
            if !document.contains_key(field) {
                return Err(CodecError::MissingField(field.to_string()));
            }
        }

        let from = match document.remove(VERSION_FIELD) {
            Some(version) => serde_json::from_value(version)?,
            None => self.saved,
        };
        for (_, step) in self.upgrades.iter().filter(|(to, _)| from < *to) {
            step(&mut document)?;
        }

        Ok(serde_json::from_value(Value::Object(document))?)
    }
}

/// 从文档中只取出数据记录部分
pub fn decode_record(document: &StoredDocument) -> Result<DataRecord, CodecError> {
    let id = document
        .get(ID_FIELD)
        .ok_or_else(|| CodecError::MissingField(ID_FIELD.to_string()))?;
    let parents = document
        .get(PARENTS_FIELD)
        .ok_or_else(|| CodecError::MissingField(PARENTS_FIELD.to_string()))?;

    let id: BlockId = serde_json::from_value(id.clone())?;
    let parents: Vec<BlockId> = serde_json::from_value(parents.clone())?;
    Ok(DataRecord::new(id, parents))
}

/// 持久化集合
pub struct PersistedCollection<B> {
    name: &'static str,
    version: CollectionVersion,
    saved_version: CollectionVersion,
    factory: fn(CollectionVersion) -> RecordMapper<B>,
    mapper: RecordMapper<B>,
}

impl<B: PersistentBlock> PersistedCollection<B> {
    /// 创建集合，初始假定存储形态与声明版本一致
    pub fn new(
        name: &'static str,
        version: CollectionVersion,
        factory: fn(CollectionVersion) -> RecordMapper<B>,
    ) -> Self {
        Self {
            name,
            version,
            saved_version: version,
            factory,
            mapper: factory(version),
        }
    }

    /// 为 `saved` 版本的存储数据安装解码策略
    pub fn map_object(&mut self, saved: CollectionVersion) {
        self.mapper = (self.factory)(saved);
        self.saved_version = saved;
        if self.mapper.upgrade_count() > 0 {
            tracing::info!(
                "Collection '{}' decodes {} data through {} upgrade step(s) to {}",
                self.name,
                saved,
                self.mapper.upgrade_count(),
                self.version
            );
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 声明的当前版本
    pub fn version(&self) -> CollectionVersion {
        self.version
    }

    /// 元数据记录的保存版本
    pub fn saved_version(&self) -> CollectionVersion {
        self.saved_version
    }

    /// 编码为当前形态，并标记声明版本
    pub fn encode(&self, block: &B) -> Result<StoredDocument, StoreError> {
        let mut document = self.mapper.encode(block).map_err(|e| self.codec_error(e))?;
        let version = serde_json::to_value(self.version)
            .map_err(|e| self.codec_error(CodecError::from(e)))?;
        document.insert(VERSION_FIELD.to_string(), version);
        Ok(document)
    }

    pub fn decode(&self, document: StoredDocument) -> Result<B, StoreError> {
        self.mapper.decode(document).map_err(|e| self.codec_error(e))
    }

    /// 写入构件；ID 已存在时返回 `false`
    pub fn create(&self, store: &mut dyn DocumentStore, block: &B) -> Result<bool, StoreError> {
        let document = self.encode(block)?;
        store.insert(self.name, &block.id().to_key(), document)
    }

    pub fn read(&self, store: &dyn DocumentStore, id: &BlockId) -> Result<Option<B>, StoreError> {
        store
            .get(self.name, &id.to_key())?
            .map(|document| self.decode(document))
            .transpose()
    }

    /// 删除构件并返回被删除的内容
    pub fn delete(
        &self,
        store: &mut dyn DocumentStore,
        id: &BlockId,
    ) -> Result<Option<B>, StoreError> {
        store
            .remove(self.name, &id.to_key())?
            .map(|document| self.decode(document))
            .transpose()
    }

    pub fn read_all(&self, store: &dyn DocumentStore) -> Result<Vec<B>, StoreError> {
        store
            .documents(self.name)?
            .into_iter()
            .map(|document| self.decode(document))
            .collect()
    }

    fn codec_error(&self, source: CodecError) -> StoreError {
        StoreError::Codec {
            collection: self.name.to_string(),
            source,
        }
    }
}

/// 类型擦除后的集合，供注册表统一管理
pub trait AnyCollection: Any {
    fn name(&self) -> &'static str;

    fn version(&self) -> CollectionVersion;

    fn saved_version(&self) -> CollectionVersion;

    /// 绑定的构件类型名
    fn block_type(&self) -> &'static str;

    fn map_object(&mut self, saved: CollectionVersion);

    /// 集合中全部文档的数据记录
    fn read_records(&self, store: &dyn DocumentStore) -> Result<Vec<DataRecord>, StoreError>;

    /// 用当前映射重新编码全部文档，返回改写的文档数
    fn reencode_all(&self, store: &mut dyn DocumentStore) -> Result<usize, StoreError>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<B: PersistentBlock> AnyCollection for PersistedCollection<B> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn version(&self) -> CollectionVersion {
        self.version
    }

    fn saved_version(&self) -> CollectionVersion {
        self.saved_version
    }

    fn block_type(&self) -> &'static str {
        std::any::type_name::<B>()
    }

    fn map_object(&mut self, saved: CollectionVersion) {
        PersistedCollection::map_object(self, saved);
    }

    fn read_records(&self, store: &dyn DocumentStore) -> Result<Vec<DataRecord>, StoreError> {
        store
            .documents(self.name)?
            .iter()
            .map(|document| decode_record(document).map_err(|e| self.codec_error(e)))
            .collect()
    }

    fn reencode_all(&self, store: &mut dyn DocumentStore) -> Result<usize, StoreError> {
        let blocks = self.read_all(&*store)?;
        for block in &blocks {
            let document = self.encode(block)?;
            store.upsert(self.name, &block.id().to_key(), document)?;
        }
        Ok(blocks.len())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// 绑定到存储引擎的集合句柄
pub struct CollectionHandle<'a, B> {
    collection: &'a PersistedCollection<B>,
    store: &'a mut dyn DocumentStore,
}

impl<'a, B: PersistentBlock> CollectionHandle<'a, B> {
    pub(crate) fn new(
        collection: &'a PersistedCollection<B>,
        store: &'a mut dyn DocumentStore,
    ) -> Self {
        Self { collection, store }
    }

    pub fn name(&self) -> &'static str {
        self.collection.name()
    }

    pub fn create(&mut self, block: &B) -> Result<bool, StoreError> {
        self.collection.create(&mut *self.store, block)
    }

    pub fn read(&self, id: &BlockId) -> Result<Option<B>, StoreError> {
        self.collection.read(&*self.store, id)
    }

    pub fn delete(&mut self, id: &BlockId) -> Result<Option<B>, StoreError> {
        self.collection.delete(&mut *self.store, id)
    }

    pub fn read_all(&self) -> Result<Vec<B>, StoreError> {
        self.collection.read_all(&*self.store)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.store.count(self.collection.name())
    }
}
