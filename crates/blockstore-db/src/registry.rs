//! 集合注册表
//!
//! 注册通过显式清单完成：每个构件类型实现 [`CollectionSchema`]，
//! 在 [`RegistryBuilder`] 中逐一登记。构建时：
//! - 重名或重复的构件类型立即报错
//! - 没有元数据时写入全部集合的版本
//! - 已有元数据时把各集合的保存版本交给各自的 `map_object`

use crate::collection::{AnyCollection, PersistedCollection, PersistentBlock, RecordMapper};
use crate::error::{RegistryError, StoreError};
use crate::metadata::{StoreMetadata, METADATA_COLLECTION};
use crate::store::DocumentStore;
use blockstore_core::version::CollectionVersion;
use std::any::TypeId;
use std::collections::{HashMap, HashSet};

/// 集合声明
pub trait CollectionSchema: 'static {
    type Block: PersistentBlock;

    /// 集合名
    const NAME: &'static str;

    /// 当前存储形态的版本
    const VERSION: CollectionVersion;

    /// 为保存版本 `saved` 的数据构造解码策略
    fn map_object(saved: CollectionVersion) -> RecordMapper<Self::Block> {
        RecordMapper::new(saved)
    }
}

struct Registration {
    type_id: TypeId,
    collection: Box<dyn AnyCollection>,
}

/// 注册清单
#[derive(Default)]
pub struct RegistryBuilder {
    registrations: Vec<Registration>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<S: CollectionSchema>(mut self) -> Self {
        self.registrations.push(Registration {
            type_id: TypeId::of::<S::Block>(),
            collection: Box::new(PersistedCollection::new(
                S::NAME,
                S::VERSION,
                S::map_object,
            )),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let mut names = HashSet::new();
        let mut types = HashSet::new();

        for registration in &self.registrations {
            let collection = &registration.collection;
            let name = collection.name();
            if name.is_empty() || name == METADATA_COLLECTION {
                return Err(RegistryError::ReservedName(name.to_string()));
            }
            if !names.insert(name) {
                return Err(RegistryError::DuplicateName(name.to_string()));
            }
            if !types.insert(registration.type_id) {
                return Err(RegistryError::DuplicateType(collection.block_type()));
            }
        }
        Ok(())
    }

    /// 校验清单并与存储中的元数据对齐
    pub fn build(
        self,
        store: &mut dyn DocumentStore,
        application_version: &str,
    ) -> Result<CollectionRegistry, StoreError> {
        self.validate()?;

        let mut registrations = self.registrations;
        let metadata = match StoreMetadata::load(&*store)? {
            None => {
                let mut metadata = StoreMetadata::new(application_version);
                for registration in &registrations {
                    let collection = &registration.collection;
                    metadata.set_version(collection.name(), collection.version());
                }
                metadata.save(store)?;
                tracing::info!(
                    "Wrote store metadata for {} collection(s)",
                    metadata.collections.len()
                );
                metadata
            }
            Some(mut metadata) => {
                let mut appended = false;
                for registration in &mut registrations {
                    let collection = &mut registration.collection;
                    match metadata.version_of(collection.name())? {
                        Some(saved) => {
                            if saved != collection.version() {
                                tracing::info!(
                                    "Collection '{}' was saved at {}, declared {}",
                                    collection.name(),
                                    saved,
                                    collection.version()
                                );
                            }
                            collection.map_object(saved);
                        }
                        None => {
                            metadata.set_version(collection.name(), collection.version());
                            appended = true;
                        }
                    }
                }
                if appended {
                    metadata.save(store)?;
                    tracing::info!("Appended new collections to store metadata");
                }
                metadata
            }
        };

        let mut by_type = HashMap::new();
        let mut by_name = HashMap::new();
        let mut collections = Vec::with_capacity(registrations.len());
        for (index, registration) in registrations.into_iter().enumerate() {
            by_type.insert(registration.type_id, index);
            by_name.insert(registration.collection.name(), index);
            collections.push(registration.collection);
        }

        Ok(CollectionRegistry {
            collections,
            by_type,
            by_name,
            metadata,
        })
    }
}

/// 集合注册表
pub struct CollectionRegistry {
    collections: Vec<Box<dyn AnyCollection>>,
    by_type: HashMap<TypeId, usize>,
    by_name: HashMap<&'static str, usize>,
    metadata: StoreMetadata,
}

impl CollectionRegistry {
    /// 构件类型绑定的集合
    pub fn collection<B: PersistentBlock>(&self) -> Option<&PersistedCollection<B>> {
        let index = *self.by_type.get(&TypeId::of::<B>())?;
        self.collections[index]
            .as_any()
            .downcast_ref::<PersistedCollection<B>>()
    }

    /// 样例实例所属类型绑定的集合
    pub fn collection_of<B: PersistentBlock>(
        &self,
        _sample: &B,
    ) -> Option<&PersistedCollection<B>> {
        self.collection::<B>()
    }

    pub fn by_name(&self, name: &str) -> Option<&dyn AnyCollection> {
        let index = *self.by_name.get(name)?;
        Some(self.collections[index].as_ref())
    }

    /// 按注册顺序遍历
    pub fn iter(&self) -> impl Iterator<Item = &dyn AnyCollection> {
        self.collections.iter().map(|c| c.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.collections.iter().map(|c| c.name()).collect()
    }

    pub fn metadata(&self) -> &StoreMetadata {
        &self.metadata
    }

    /// 把集合的元数据版本标记为声明版本，并切换到当前解码策略
    pub fn stamp_version(
        &mut self,
        store: &mut dyn DocumentStore,
        name: &str,
    ) -> Result<(), StoreError> {
        let index = *self
            .by_name
            .get(name)
            .ok_or_else(|| RegistryError::UnknownCollection(name.to_string()))?;
        let collection = &mut self.collections[index];
        let version = collection.version();

        self.metadata.set_version(name, version);
        self.metadata.save(store)?;
        collection.map_object(version);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}
