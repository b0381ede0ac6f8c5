//! 模型上下文
//!
//! 一次编辑会话的全部状态：依赖树、数据库和诊断接收器。
//! 由宿主显式构造，以 `&mut` 传给每个命令，用 [`ModelContext::close`] 结束。

use crate::collection::PersistentBlock;
use crate::database::Database;
use crate::error::StoreError;
use blockstore_core::diagnostics::Diagnostics;
use blockstore_core::record::{BlockId, DataRecord};
use blockstore_core::resolver::ResolveError;
use blockstore_core::tree::DependencyTree;
use std::sync::Arc;

pub struct ModelContext {
    tree: DependencyTree,
    database: Database,
    diagnostics: Arc<dyn Diagnostics>,
}

impl ModelContext {
    /// 打开会话，并从所有已注册集合重建依赖树
    ///
    /// 记录按父节点优先的顺序插入；父节点缺失或处于环中的记录被跳过，以错误诊断报告。
    pub fn open(database: Database, diagnostics: Arc<dyn Diagnostics>) -> Self {
        let mut records: Vec<DataRecord> = Vec::new();
        for (name, loaded) in database.load_records() {
            match loaded {
                Ok(loaded) => records.extend(loaded),
                Err(e) => diagnostics.error(&format!("Failed to load collection '{}': {}", name, e)),
            }
        }

        let total = records.len();
        let mut tree = DependencyTree::new();
        let rejected = tree.extend_ordered(records);
        for record in &rejected {
            diagnostics.error(&format!(
                "Skipped block {} while loading: duplicate id, missing parent or dependency cycle",
                record.id()
            ));
        }

        tracing::info!("Loaded {} of {} block(s) into the dependency tree", tree.len(), total);

        Self {
            tree,
            database,
            diagnostics,
        }
    }

    pub fn tree(&self) -> &DependencyTree {
        &self.tree
    }

    pub(crate) fn tree_mut(&mut self) -> &mut DependencyTree {
        &mut self.tree
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn database_mut(&mut self) -> &mut Database {
        &mut self.database
    }

    pub fn diagnostics(&self) -> &dyn Diagnostics {
        self.diagnostics.as_ref()
    }

    /// 变更 `changed` 后需要按顺序重建的构件
    pub fn invalidation_order(
        &self,
        changed: impl IntoIterator<Item = BlockId>,
    ) -> Result<Vec<BlockId>, ResolveError> {
        self.tree.resolver().execution_sequence(changed)
    }

    pub fn read<B: PersistentBlock>(&self, id: &BlockId) -> Result<Option<B>, StoreError> {
        self.database.read(id)
    }

    /// 结束会话：刷新并压缩存储
    pub fn close(self) -> Result<(), StoreError> {
        self.database.close()
    }
}
