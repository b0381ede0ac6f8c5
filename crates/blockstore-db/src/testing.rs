//! 测试用构件、集合声明与可注入故障的存储引擎

use crate::collection::RecordMapper;
use crate::error::StoreError;
use crate::registry::CollectionSchema;
use crate::store::{DocumentStore, MemoryStore, StoredDocument};
use blockstore_core::record::{BlockId, BuildingBlock, DataRecord};
use blockstore_core::version::CollectionVersion;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sketch {
    #[serde(flatten)]
    pub record: DataRecord,
    pub name: String,
}

impl Sketch {
    pub fn new(name: &str) -> Self {
        Self {
            record: DataRecord::root(BlockId::new()),
            name: name.to_string(),
        }
    }
}

impl BuildingBlock for Sketch {
    fn record(&self) -> &DataRecord {
        &self.record
    }
}

pub struct SketchSchema;

impl CollectionSchema for SketchSchema {
    type Block = Sketch;
    const NAME: &'static str = "sketches";
    const VERSION: CollectionVersion = CollectionVersion::new(1, 0, 0);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extrude {
    #[serde(flatten)]
    pub record: DataRecord,
    pub depth: f64,
    /// 1.1.0 新增
    pub taper: f64,
}

impl Extrude {
    pub fn new(profile: &Sketch, depth: f64) -> Self {
        Self {
            record: DataRecord::new(BlockId::new(), [profile.id()]),
            depth,
            taper: 0.0,
        }
    }
}

impl BuildingBlock for Extrude {
    fn record(&self) -> &DataRecord {
        &self.record
    }
}

pub struct ExtrudeSchema;

impl CollectionSchema for ExtrudeSchema {
    type Block = Extrude;
    const NAME: &'static str = "extrudes";
    const VERSION: CollectionVersion = CollectionVersion::new(1, 1, 0);

    fn map_object(saved: CollectionVersion) -> RecordMapper<Extrude> {
        RecordMapper::new(saved).upgrade(CollectionVersion::new(1, 1, 0), |document| {
            document.entry("taper").or_insert(json!(0.0));
            Ok(())
        })
    }
}

/// 1.0.0 形态的零件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartV1 {
    #[serde(flatten)]
    pub record: DataRecord,
    pub length: f64,
}

impl PartV1 {
    pub fn new(length: f64) -> Self {
        Self {
            record: DataRecord::root(BlockId::new()),
            length,
        }
    }
}

impl BuildingBlock for PartV1 {
    fn record(&self) -> &DataRecord {
        &self.record
    }
}

pub struct PartV1Schema;

impl CollectionSchema for PartV1Schema {
    type Block = PartV1;
    const NAME: &'static str = "parts";
    const VERSION: CollectionVersion = CollectionVersion::new(1, 0, 0);
}

/// 1.1.0 形态的零件，新增材料字段
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartV2 {
    #[serde(flatten)]
    pub record: DataRecord,
    pub length: f64,
    pub material: String,
}

impl BuildingBlock for PartV2 {
    fn record(&self) -> &DataRecord {
        &self.record
    }
}

pub struct PartV2Schema;

impl CollectionSchema for PartV2Schema {
    type Block = PartV2;
    const NAME: &'static str = "parts";
    const VERSION: CollectionVersion = CollectionVersion::new(1, 1, 0);

    fn map_object(saved: CollectionVersion) -> RecordMapper<PartV2> {
        RecordMapper::new(saved).upgrade(CollectionVersion::new(1, 1, 0), |document| {
            document.insert("material".to_string(), json!("steel"));
            Ok(())
        })
    }
}

/// 故障开关，克隆共享同一组开关
#[derive(Debug, Clone, Default)]
pub struct FailSwitch {
    writes: Arc<AtomicBool>,
    removes: Arc<AtomicBool>,
    /// 删除开始失败前还允许成功的次数
    removes_allowed: Arc<AtomicUsize>,
}

impl FailSwitch {
    pub fn fail_writes(&self, fail: bool) {
        self.writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_removes(&self, fail: bool) {
        self.removes_allowed.store(0, Ordering::SeqCst);
        self.removes.store(fail, Ordering::SeqCst);
    }

    /// 再成功 `successes` 次删除后开始失败
    pub fn fail_removes_after(&self, successes: usize) {
        self.removes_allowed.store(successes, Ordering::SeqCst);
        self.removes.store(true, Ordering::SeqCst);
    }

    fn check_remove(&self) -> Result<(), StoreError> {
        let allowed = self
            .removes_allowed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if allowed {
            return Ok(());
        }
        Self::check(&self.removes, "remove")
    }

    fn check(flag: &AtomicBool, operation: &str) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Engine(format!("injected {} failure", operation)));
        }
        Ok(())
    }
}

/// 可注入故障的内存存储
pub struct FailingStore {
    inner: MemoryStore,
    switch: FailSwitch,
}

impl FailingStore {
    pub fn new(switch: FailSwitch) -> Self {
        Self {
            inner: MemoryStore::new(),
            switch,
        }
    }
}

impl DocumentStore for FailingStore {
    fn insert(
        &mut self,
        collection: &str,
        key: &str,
        document: StoredDocument,
    ) -> Result<bool, StoreError> {
        FailSwitch::check(&self.switch.writes, "insert")?;
        self.inner.insert(collection, key, document)
    }

    fn upsert(
        &mut self,
        collection: &str,
        key: &str,
        document: StoredDocument,
    ) -> Result<Option<StoredDocument>, StoreError> {
        FailSwitch::check(&self.switch.writes, "upsert")?;
        self.inner.upsert(collection, key, document)
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.inner.get(collection, key)
    }

    fn remove(
        &mut self,
        collection: &str,
        key: &str,
    ) -> Result<Option<StoredDocument>, StoreError> {
        self.switch.check_remove()?;
        self.inner.remove(collection, key)
    }

    fn documents(&self, collection: &str) -> Result<Vec<StoredDocument>, StoreError> {
        self.inner.documents(collection)
    }

    fn collection_names(&self) -> Vec<String> {
        self.inner.collection_names()
    }

    fn export_bytes(&self) -> Result<Vec<u8>, StoreError> {
        self.inner.export_bytes()
    }

    fn compact(&mut self) -> Result<(), StoreError> {
        self.inner.compact()
    }
}
