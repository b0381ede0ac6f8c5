//! 演示模型：草图 -> 拉伸 -> 圆角

use blockstore_core::record::{BlockId, BuildingBlock, DataRecord};
use blockstore_core::version::CollectionVersion;
use blockstore_db::{CollectionSchema, RecordMapper, RegistryBuilder};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// 草图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sketch {
    #[serde(flatten)]
    pub record: DataRecord,
    pub name: String,
    pub points: Vec<[f64; 2]>,
}

impl Sketch {
    pub fn new(name: &str, points: Vec<[f64; 2]>) -> Self {
        Self {
            record: DataRecord::root(BlockId::new()),
            name: name.to_string(),
            points,
        }
    }
}

impl BuildingBlock for Sketch {
    fn record(&self) -> &DataRecord {
        &self.record
    }
}

/// 拉伸
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extrude {
    #[serde(flatten)]
    pub record: DataRecord,
    pub depth: f64,
    /// 对称拉伸（1.1.0）
    pub symmetric: bool,
}

impl Extrude {
    pub fn new(profile: &Sketch, depth: f64) -> Self {
        Self {
            record: DataRecord::new(BlockId::new(), [profile.id()]),
            depth,
            symmetric: false,
        }
    }
}

impl BuildingBlock for Extrude {
    fn record(&self) -> &DataRecord {
        &self.record
    }
}

/// 圆角
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fillet {
    #[serde(flatten)]
    pub record: DataRecord,
    pub radius: f64,
}

impl Fillet {
    pub fn new(body: &Extrude, radius: f64) -> Self {
        Self {
            record: DataRecord::new(BlockId::new(), [body.id()]),
            radius,
        }
    }
}

impl BuildingBlock for Fillet {
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

pub struct ExtrudeSchema;

impl CollectionSchema for ExtrudeSchema {
    type Block = Extrude;
    const NAME: &'static str = "extrudes";
    const VERSION: CollectionVersion = CollectionVersion::new(1, 1, 0);

    fn map_object(saved: CollectionVersion) -> RecordMapper<Extrude> {
        RecordMapper::new(saved).upgrade(CollectionVersion::new(1, 1, 0), |document| {
            document.entry("symmetric").or_insert(json!(false));
            Ok(())
        })
    }
}

pub struct FilletSchema;

impl CollectionSchema for FilletSchema {
    type Block = Fillet;
    const NAME: &'static str = "fillets";
    const VERSION: CollectionVersion = CollectionVersion::new(1, 0, 0);
}

/// 应用的注册清单
pub fn registry() -> RegistryBuilder {
    RegistryBuilder::new()
        .register::<SketchSchema>()
        .register::<ExtrudeSchema>()
        .register::<FilletSchema>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockstore_db::{Database, StoredDocument};

    #[test]
    fn test_registry_covers_all_blocks() {
        let database = Database::in_memory(registry()).unwrap();
        assert_eq!(
            database.registry().names(),
            vec![SketchSchema::NAME, ExtrudeSchema::NAME, FilletSchema::NAME]
        );
    }

    #[test]
    fn test_extrude_upgrade_defaults_symmetric() {
        let sketch = Sketch::new("profile", vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0]]);
        let mapper = ExtrudeSchema::map_object(CollectionVersion::new(1, 0, 0));

        let mut document = StoredDocument::new();
        document.insert("id".to_string(), json!(BlockId::new().to_string()));
        document.insert("parents".to_string(), json!([sketch.id().to_string()]));
        document.insert("depth".to_string(), json!(5.0));

        let extrude = mapper.decode(document).unwrap();
        assert!(!extrude.symmetric);
        assert_eq!(extrude.parents().len(), 1);
    }
}
