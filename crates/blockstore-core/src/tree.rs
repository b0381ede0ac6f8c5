//! 依赖树
//!
//! 所有已知数据记录的内存镜像，维护两个不变量：
//! - 引用完整性：任何记录的父ID都必须存在于树中
//! - 无环：正常API下，任何节点都不能经由父关系到达自身
//!
//! 反向索引（节点 -> 直接子节点）由插入/删除同步维护，供级联删除和后代解析使用。

use crate::record::{BlockId, DataRecord};
use crate::resolver::{DependencyGraph, DescendantResolver};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// 依赖树
#[derive(Debug, Clone, Default)]
pub struct DependencyTree {
    /// ID -> 数据记录
    nodes: BTreeMap<BlockId, DataRecord>,

    /// ID -> 直接子节点（反向索引）
    children: BTreeMap<BlockId, BTreeSet<BlockId>>,
}

impl DependencyTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入节点
    ///
    /// 仅当ID不存在且所有父节点都已存在时插入；否则返回 `false`，树保持不变。
    pub fn add_node(&mut self, record: DataRecord) -> bool {
        let id = record.id();
        if self.nodes.contains_key(&id) {
            tracing::debug!("Rejected node {}: id already present", id);
            return false;
        }

        if let Some(missing) = record.parents().iter().find(|p| !self.nodes.contains_key(p)) {
            tracing::debug!("Rejected node {}: parent {} is missing", id, missing);
            return false;
        }

        for parent in record.parents() {
            self.children.entry(*parent).or_default().insert(id);
        }
        self.children.entry(id).or_default();
        self.nodes.insert(id, record);

        true
    }

    /// 删除节点及其全部传递依赖者
    ///
    /// 返回实际删除的ID集合；节点不存在时返回 `None`。
    pub fn remove_node(&mut self, id: &BlockId) -> Option<BTreeSet<BlockId>> {
        if !self.nodes.contains_key(id) {
            return None;
        }

        // 收集传递闭包
        let mut removed = BTreeSet::new();
        let mut stack = vec![*id];
        while let Some(current) = stack.pop() {
            if !removed.insert(current) {
                continue;
            }
            if let Some(children) = self.children.get(&current) {
                stack.extend(children.iter().copied());
            }
        }

        for removed_id in &removed {
            if let Some(record) = self.nodes.remove(removed_id) {
                for parent in record.parents() {
                    if removed.contains(parent) {
                        continue;
                    }
                    if let Some(siblings) = self.children.get_mut(parent) {
                        siblings.remove(removed_id);
                    }
                }
            }
            self.children.remove(removed_id);
        }

        tracing::debug!("Removed {} node(s) rooted at {}", removed.len(), id);
        Some(removed)
    }

    /// 按父节点优先的顺序批量插入记录
    ///
    /// 输入顺序任意。无法插入的记录（父节点缺失、ID重复或处于环中）原样返回，按ID排序。
    pub fn extend_ordered(
        &mut self,
        records: impl IntoIterator<Item = DataRecord>,
    ) -> Vec<DataRecord> {
        let mut rejected = Vec::new();
        let mut pending: HashMap<BlockId, DataRecord> = HashMap::new();
        for record in records {
            if pending.contains_key(&record.id()) {
                rejected.push(record);
            } else {
                pending.insert(record.id(), record);
            }
        }

        // 缺失父节点 -> 等待它的记录
        let mut waiting: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        let mut unresolved: HashMap<BlockId, usize> = HashMap::new();
        let mut ready = BTreeSet::new();

        for (id, record) in &pending {
            let missing: Vec<BlockId> = record
                .parents()
                .iter()
                .filter(|p| !self.nodes.contains_key(p))
                .copied()
                .collect();
            if missing.is_empty() {
                ready.insert(*id);
            } else {
                unresolved.insert(*id, missing.len());
                for parent in missing {
                    waiting.entry(parent).or_default().push(*id);
                }
            }
        }

        while let Some(id) = ready.pop_first() {
            let Some(record) = pending.remove(&id) else {
                continue;
            };
            if self.nodes.contains_key(&id) {
                rejected.push(record);
                continue;
            }
            self.add_node(record);

            for dependent in waiting.remove(&id).unwrap_or_default() {
                if let Some(count) = unresolved.get_mut(&dependent) {
                    *count -= 1;
                    if *count == 0 {
                        unresolved.remove(&dependent);
                        ready.insert(dependent);
                    }
                }
            }
        }

        rejected.extend(pending.into_values());
        rejected.sort_by_key(|r| r.id());
        rejected
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &BlockId) -> Option<&DataRecord> {
        self.nodes.get(id)
    }

    /// 直接子节点
    pub fn children_of(&self, id: &BlockId) -> Option<&BTreeSet<BlockId>> {
        self.children.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 按ID顺序遍历全部记录
    pub fn records(&self) -> impl Iterator<Item = &DataRecord> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &BlockId> {
        self.nodes.keys()
    }

    /// 基于当前状态的后代解析器
    pub fn resolver(&self) -> DescendantResolver<'_, Self> {
        DescendantResolver::new(self)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.children.clear();
    }
}

impl DependencyGraph for DependencyTree {
    fn contains(&self, id: &BlockId) -> bool {
        self.nodes.contains_key(id)
    }

    fn parents_of(&self, id: &BlockId) -> Option<&BTreeSet<BlockId>> {
        self.nodes.get(id).map(|r| r.parents())
    }

    fn children_of(&self, id: &BlockId) -> Option<&BTreeSet<BlockId>> {
        self.children.get(id)
    }
}
