//! 后代解析
//!
//! 在依赖图上计算传递依赖者，检测环，并给出拓扑有效的处理顺序。
//!
//! 解析器基于子节点邻接索引做迭代广度优先遍历，复杂度 O(V + E)：
//! - `find_descendants`: 某节点的全部后代
//! - `execution_sequence`: 若干起点后代的并集，按拓扑顺序排列
//!
//! 典型用途：某个设计输入变化后，计算需要按序失效/重建的构件。

use crate::record::{BlockId, DataRecord};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// 解析错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Dependency cycle detected at node {node}")]
    Cycle { node: BlockId },
}

/// 可供解析的依赖图
pub trait DependencyGraph {
    fn contains(&self, id: &BlockId) -> bool;

    fn parents_of(&self, id: &BlockId) -> Option<&BTreeSet<BlockId>>;

    fn children_of(&self, id: &BlockId) -> Option<&BTreeSet<BlockId>>;
}

/// 从任意记录集合构建的依赖图
///
/// 不做引用完整性和无环检查，用于分析持久化数据或外部导入的记录。
#[derive(Debug, Clone, Default)]
pub struct RecordGraph {
    nodes: BTreeMap<BlockId, DataRecord>,
    children: BTreeMap<BlockId, BTreeSet<BlockId>>,
}

impl RecordGraph {
    pub fn from_records(records: impl IntoIterator<Item = DataRecord>) -> Self {
        let mut graph = Self::default();
        for record in records {
            for parent in record.parents() {
                graph.children.entry(*parent).or_default().insert(record.id());
            }
            graph.nodes.insert(record.id(), record);
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn resolver(&self) -> DescendantResolver<'_, Self> {
        DescendantResolver::new(self)
    }
}

impl DependencyGraph for RecordGraph {
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

/// 后代解析器
pub struct DescendantResolver<'a, G: DependencyGraph> {
    graph: &'a G,
}

impl<'a, G: DependencyGraph> DescendantResolver<'a, G> {
    pub fn new(graph: &'a G) -> Self {
        Self { graph }
    }

    /// 计算 `start` 的全部传递依赖者（不含 `start` 本身）
    ///
    /// 如果遍历中再次遇到 `start`，说明图中存在环，返回 [`ResolveError::Cycle`]。
    /// 图中不存在的起点没有后代。
    pub fn find_descendants(&self, start: BlockId) -> Result<BTreeSet<BlockId>, ResolveError> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::from([start]);

        while let Some(current) = queue.pop_front() {
            let Some(children) = self.graph.children_of(&current) else {
                continue;
            };
            for child in children {
                if *child == start {
                    tracing::warn!("Node {} is its own descendant", start);
                    return Err(ResolveError::Cycle { node: start });
                }
                if found.insert(*child) {
                    queue.push_back(*child);
                }
            }
        }

        Ok(found)
    }

    /// 计算若干起点后代的处理顺序
    ///
    /// 结果不含起点本身；每个节点都排在它在结果集内依赖的所有节点之后。
    /// 同一层级内按ID升序排列。
    pub fn execution_sequence(
        &self,
        starts: impl IntoIterator<Item = BlockId>,
    ) -> Result<Vec<BlockId>, ResolveError> {
        let starts: BTreeSet<BlockId> = starts.into_iter().collect();

        let mut targets = BTreeSet::new();
        for start in &starts {
            targets.extend(self.find_descendants(*start)?);
        }
        for start in &starts {
            targets.remove(start);
        }

        // 只统计结果集内部的入度
        let mut in_degree: BTreeMap<BlockId, usize> = targets
            .iter()
            .map(|id| {
                let degree = self
                    .graph
                    .parents_of(id)
                    .map(|parents| parents.iter().filter(|p| targets.contains(p)).count())
                    .unwrap_or(0);
                (*id, degree)
            })
            .collect();

        let mut layer: Vec<BlockId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(targets.len());

        while !layer.is_empty() {
            let mut next = BTreeSet::new();
            for id in &layer {
                order.push(*id);
                let Some(children) = self.graph.children_of(id) else {
                    continue;
                };
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(*child);
                        }
                    }
                }
            }
            layer = next.into_iter().collect();
        }

        // 入度未归零的节点只能处于环中
        if let Some((stuck, _)) = in_degree.iter().find(|(_, degree)| **degree > 0) {
            tracing::warn!("Execution sequence blocked by a cycle through {}", stuck);
            return Err(ResolveError::Cycle { node: *stuck });
        }

        Ok(order)
    }
}
