//! 数据记录
//!
//! 构件（building block）的原子单元：唯一标识符 + 所依赖的父记录集合。
//!
//! 记录一旦创建便不可修改，"更新"以删除后用新ID重建的方式表达。

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// 构件ID（128位）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(Uuid);

impl BlockId {
    /// 生成新的随机ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// 存储引擎中使用的键
    pub fn to_key(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for BlockId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for BlockId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for BlockId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// 数据记录
///
/// 依赖树中的节点。`parents` 中的每个ID都必须先于本记录存在。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    id: BlockId,
    #[serde(default)]
    parents: BTreeSet<BlockId>,
}

impl DataRecord {
    pub fn new(id: BlockId, parents: impl IntoIterator<Item = BlockId>) -> Self {
        Self {
            id,
            parents: parents.into_iter().collect(),
        }
    }

    /// 创建没有父记录的根记录
    pub fn root(id: BlockId) -> Self {
        Self::new(id, [])
    }

    /// 以新生成的ID创建记录
    pub fn with_parents(parents: impl IntoIterator<Item = BlockId>) -> Self {
        Self::new(BlockId::new(), parents)
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn parents(&self) -> &BTreeSet<BlockId> {
        &self.parents
    }

    pub fn depends_on(&self, id: &BlockId) -> bool {
        self.parents.contains(id)
    }
}

/// 构件
///
/// 应用层的设计元素（草图、拉伸、圆角……），每个构件携带一条数据记录。
pub trait BuildingBlock: Clone + 'static {
    fn record(&self) -> &DataRecord;

    fn id(&self) -> BlockId {
        self.record().id()
    }

    fn parents(&self) -> &BTreeSet<BlockId> {
        self.record().parents()
    }
}

impl BuildingBlock for DataRecord {
    fn record(&self) -> &DataRecord {
        self
    }
}
