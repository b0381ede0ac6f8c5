//! 构件依赖模型核心
//!
//! 参数化设计中的每个构件都是一条可能依赖其他记录的数据记录。本 crate 提供：
//! - `DataRecord`: 不可变的ID + 父记录集合
//! - `DependencyTree`: 带引用完整性与无环约束的内存依赖树
//! - `DescendantResolver`: 后代计算、环检测与拓扑处理顺序
//! - `Diagnostics`: 分级的异常上报接口
//!
//! # 示例
//!
//! ```rust
//! use blockstore_core::prelude::*;
//!
//! let mut tree = DependencyTree::new();
//! let sketch = DataRecord::root(BlockId::new());
//! let extrude = DataRecord::with_parents([sketch.id()]);
//!
//! assert!(tree.add_node(sketch.clone()));
//! assert!(tree.add_node(extrude.clone()));
//!
//! let order = tree.resolver().execution_sequence([sketch.id()]).unwrap();
//! assert_eq!(order, vec![extrude.id()]);
//! ```

pub mod diagnostics;
pub mod record;
pub mod resolver;
pub mod tree;
pub mod version;

pub mod prelude {
    //! 常用类型的便捷导入
    pub use crate::diagnostics::{Diagnostics, RecordingDiagnostics, Severity, TracingDiagnostics};
    pub use crate::record::{BlockId, BuildingBlock, DataRecord};
    pub use crate::resolver::{DependencyGraph, DescendantResolver, RecordGraph, ResolveError};
    pub use crate::tree::DependencyTree;
    pub use crate::version::CollectionVersion;
}
