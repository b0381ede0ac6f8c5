//! 可撤销的模型命令
//!
//! 命令同时修改依赖树和集合，二者保持一致：
//! - 先改依赖树，成功后再写存储
//! - 存储失败时回滚依赖树，命令返回 `false` 并报告诊断
//! - 存储错误不会穿过命令边界
//!
//! 状态机：`Created -> Executed -> Undone -> Executed -> ...`，重做即再次执行。

use crate::collection::PersistentBlock;
use crate::context::ModelContext;
use crate::store::StoredDocument;
use blockstore_core::record::{BlockId, BuildingBlock, DataRecord};
use std::collections::BTreeSet;

/// 宿主撤销栈使用的命令接口
pub trait ModelCommand {
    fn description(&self) -> String;

    /// 执行（或重做）命令
    fn execute(&mut self, context: &mut ModelContext) -> bool;

    fn undo(&mut self, context: &mut ModelContext) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandState {
    Created,
    Executed,
    Undone,
}

/// 检查状态转换，非法转换报告警告
fn check_transition(
    context: &ModelContext,
    description: &str,
    state: CommandState,
    undo: bool,
) -> bool {
    let allowed = if undo {
        state == CommandState::Executed
    } else {
        state != CommandState::Executed
    };
    if !allowed {
        let action = if undo { "undo" } else { "execute" };
        context.diagnostics().warning(&format!(
            "Cannot {} '{}' in state {:?}",
            action, description, state
        ));
    }
    allowed
}

/// 从依赖树删除单个节点，数量异常时报告警告
fn remove_single(context: &mut ModelContext, id: BlockId) -> BTreeSet<BlockId> {
    match context.tree_mut().remove_node(&id) {
        Some(removed) => {
            if removed.len() != 1 {
                context.diagnostics().warning(&format!(
                    "Consistency: removing block {} took {} node(s) from the dependency tree",
                    id,
                    removed.len()
                ));
            }
            removed
        }
        None => {
            context.diagnostics().warning(&format!(
                "Consistency: block {} was not in the dependency tree",
                id
            ));
            BTreeSet::new()
        }
    }
}

/// 删除时捕获的构件
#[derive(Debug, Clone)]
struct CapturedBlock {
    record: DataRecord,
    stored: Option<(&'static str, StoredDocument)>,
}

/// 依赖树中 `root` 的全部后代记录
fn descendant_records(context: &ModelContext, root: BlockId) -> Result<Vec<DataRecord>, String> {
    let tree = context.tree();
    let descendants = tree
        .resolver()
        .find_descendants(root)
        .map_err(|e| e.to_string())?;
    Ok(descendants
        .into_iter()
        .filter_map(|id| tree.get(&id).cloned())
        .collect())
}

/// 依次删除记录对应的文档并捕获原始内容；失败时放回已删除的文档
fn capture_documents(
    context: &mut ModelContext,
    records: &[DataRecord],
) -> Result<Vec<CapturedBlock>, String> {
    let mut captured = Vec::with_capacity(records.len());
    for record in records {
        match context.database_mut().remove_document(&record.id()) {
            Ok(stored) => {
                if stored.is_none() {
                    context.diagnostics().warning(&format!(
                        "Consistency: block {} had no stored document",
                        record.id()
                    ));
                }
                captured.push(CapturedBlock {
                    record: record.clone(),
                    stored,
                });
            }
            Err(e) => {
                if let Err(reason) = restore_documents(context, &captured) {
                    context.diagnostics().error(&format!(
                        "Consistency: rollback of stored blocks failed at {}",
                        reason
                    ));
                }
                return Err(format!("block {}: {}", record.id(), e));
            }
        }
    }
    Ok(captured)
}

/// 放回捕获的文档；失败时撤掉已放回的部分
fn restore_documents(context: &mut ModelContext, captured: &[CapturedBlock]) -> Result<(), String> {
    let mut restored = Vec::new();
    for block in captured {
        let Some((collection, document)) = &block.stored else {
            continue;
        };
        let id = block.record.id();
        match context
            .database_mut()
            .restore_document(collection, &id, document.clone())
        {
            Ok(true) => restored.push(id),
            Ok(false) => context.diagnostics().warning(&format!(
                "Consistency: block {} was already present in '{}'",
                id, collection
            )),
            Err(e) => {
                for id in restored {
                    if let Err(e) = context.database_mut().remove_document(&id) {
                        context.diagnostics().error(&format!(
                            "Failed to roll back restored block {}: {}",
                            id, e
                        ));
                    }
                }
                return Err(format!("block {}: {}", id, e));
            }
        }
    }
    Ok(())
}

fn reinsert_records(context: &mut ModelContext, records: impl IntoIterator<Item = DataRecord>) {
    let rejected = context.tree_mut().extend_ordered(records);
    for record in rejected {
        context.diagnostics().warning(&format!(
            "Consistency: block {} could not be reinserted into the dependency tree",
            record.id()
        ));
    }
}

/// 创建构件
///
/// 撤销时若已有构件依赖它，这些依赖构件一并删除并被捕获，重做时恢复。
pub struct CreateCommand<B> {
    block: B,
    dependents: Vec<CapturedBlock>,
    state: CommandState,
}

impl<B: PersistentBlock> CreateCommand<B> {
    pub fn new(block: B) -> Self {
        Self {
            block,
            dependents: Vec::new(),
            state: CommandState::Created,
        }
    }

    pub fn block(&self) -> &B {
        &self.block
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    /// 上次撤销时一并删除的依赖构件
    pub fn dependents(&self) -> Vec<BlockId> {
        self.dependents.iter().map(|c| c.record.id()).collect()
    }

    fn persist(&self, context: &mut ModelContext) -> Result<(), String> {
        let id = self.block.id();
        let Some(mut collection) = context.database_mut().collection_of(&self.block) else {
            return Err(format!(
                "no collection registered for {}",
                std::any::type_name::<B>()
            ));
        };
        match collection.create(&self.block) {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!(
                "document {} already exists in '{}'",
                id,
                collection.name()
            )),
            Err(e) => Err(e.to_string()),
        }
    }

    fn unpersist(&self, context: &mut ModelContext) -> Result<bool, String> {
        let id = self.block.id();
        let Some(mut collection) = context.database_mut().collection_of(&self.block) else {
            return Err(format!(
                "no collection registered for {}",
                std::any::type_name::<B>()
            ));
        };
        collection
            .delete(&id)
            .map(|deleted| deleted.is_some())
            .map_err(|e| e.to_string())
    }

    /// 撤掉本命令写入的节点和文档
    fn rollback_own(&self, context: &mut ModelContext) {
        let id = self.block.id();
        remove_single(context, id);
        if let Err(reason) = self.unpersist(context) {
            context.diagnostics().error(&format!(
                "Consistency: failed to roll back stored block {}: {}",
                id, reason
            ));
        }
    }
}

impl<B: PersistentBlock> ModelCommand for CreateCommand<B> {
    fn description(&self) -> String {
        format!("Create block {}", self.block.id())
    }

    fn execute(&mut self, context: &mut ModelContext) -> bool {
        if !check_transition(context, &self.description(), self.state, false) {
            return false;
        }

        let id = self.block.id();
        if !context.tree_mut().add_node(self.block.record().clone()) {
            context.diagnostics().diagnostic(&format!(
                "Block {} rejected: duplicate id or missing parent",
                id
            ));
            return false;
        }

        if let Err(reason) = self.persist(context) {
            context
                .diagnostics()
                .error(&format!("Failed to persist block {}: {}", id, reason));
            remove_single(context, id);
            return false;
        }

        // 重做：恢复撤销时一并删除的依赖构件
        if !self.dependents.is_empty() {
            if let Err(reason) = restore_documents(context, &self.dependents) {
                context.diagnostics().error(&format!(
                    "Failed to restore dependents of block {}: {}",
                    id, reason
                ));
                self.rollback_own(context);
                return false;
            }
            let dependents = std::mem::take(&mut self.dependents);
            reinsert_records(context, dependents.into_iter().map(|c| c.record));
        }

        self.state = CommandState::Executed;
        true
    }

    fn undo(&mut self, context: &mut ModelContext) -> bool {
        if !check_transition(context, &self.description(), self.state, true) {
            return false;
        }

        let id = self.block.id();
        let dependents = match descendant_records(context, id) {
            Ok(records) => records,
            Err(reason) => {
                context
                    .diagnostics()
                    .error(&format!("Cannot undo create of {}: {}", id, reason));
                return false;
            }
        };

        // 先删除自身文档；失败时树和存储都未改动
        let had_document = match self.unpersist(context) {
            Ok(deleted) => deleted,
            Err(reason) => {
                context
                    .diagnostics()
                    .error(&format!("Failed to delete block {}: {}", id, reason));
                return false;
            }
        };
        if !had_document {
            context.diagnostics().warning(&format!(
                "Consistency: block {} was not in its collection on undo",
                id
            ));
        }

        remove_single(context, id);

        let captured = match capture_documents(context, &dependents) {
            Ok(captured) => captured,
            Err(reason) => {
                context.diagnostics().error(&format!(
                    "Failed to remove dependents of block {}: {}",
                    id, reason
                ));
                if had_document {
                    if let Err(reason) = self.persist(context) {
                        context.diagnostics().error(&format!(
                            "Consistency: block {} could not be restored to its collection: {}",
                            id, reason
                        ));
                    }
                }
                reinsert_records(
                    context,
                    std::iter::once(self.block.record().clone()).chain(dependents),
                );
                return false;
            }
        };

        self.dependents = captured;
        self.state = CommandState::Undone;
        true
    }
}

/// 删除构件及其全部依赖构件
pub struct DeleteCommand {
    target: BlockId,
    captured: Vec<CapturedBlock>,
    state: CommandState,
}

impl DeleteCommand {
    pub fn new(target: BlockId) -> Self {
        Self {
            target,
            captured: Vec::new(),
            state: CommandState::Created,
        }
    }

    pub fn target(&self) -> BlockId {
        self.target
    }

    pub fn state(&self) -> CommandState {
        self.state
    }

    /// 上次执行删除的构件
    pub fn removed(&self) -> Vec<BlockId> {
        self.captured.iter().map(|c| c.record.id()).collect()
    }
}

impl ModelCommand for DeleteCommand {
    fn description(&self) -> String {
        format!("Delete block {}", self.target)
    }

    fn execute(&mut self, context: &mut ModelContext) -> bool {
        if !check_transition(context, &self.description(), self.state, false) {
            return false;
        }

        let Some(target) = context.tree().get(&self.target).cloned() else {
            context.diagnostics().warning(&format!(
                "Cannot delete block {}: not in the dependency tree",
                self.target
            ));
            return false;
        };

        // 目标在前
        let records: Vec<DataRecord> = match descendant_records(context, self.target) {
            Ok(descendants) => std::iter::once(target).chain(descendants).collect(),
            Err(reason) => {
                context.diagnostics().error(&format!(
                    "Cannot delete block {}: {}",
                    self.target, reason
                ));
                return false;
            }
        };

        if let Some(removed) = context.tree_mut().remove_node(&self.target) {
            if removed.len() != records.len() {
                context.diagnostics().warning(&format!(
                    "Consistency: expected to remove {} block(s), removed {}",
                    records.len(),
                    removed.len()
                ));
            }
        }

        let captured = match capture_documents(context, &records) {
            Ok(captured) => captured,
            Err(reason) => {
                context.diagnostics().error(&format!(
                    "Failed to delete stored {}",
                    reason
                ));
                reinsert_records(context, records);
                return false;
            }
        };

        tracing::debug!("Deleted {} block(s) rooted at {}", captured.len(), self.target);
        self.captured = captured;
        self.state = CommandState::Executed;
        true
    }

    fn undo(&mut self, context: &mut ModelContext) -> bool {
        if !check_transition(context, &self.description(), self.state, true) {
            return false;
        }

        if let Err(reason) = restore_documents(context, &self.captured) {
            context.diagnostics().error(&format!(
                "Failed to undo delete of {}: {}",
                self.target, reason
            ));
            return false;
        }
        reinsert_records(context, self.captured.iter().map(|c| c.record.clone()));

        self.captured.clear();
        self.state = CommandState::Undone;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::registry::{CollectionSchema, RegistryBuilder};
    use crate::testing::{Extrude, ExtrudeSchema, FailSwitch, FailingStore, Sketch, SketchSchema};
    use blockstore_core::diagnostics::{RecordingDiagnostics, Severity};
    use crate::config::StoreConfig;
    use std::sync::Arc;

    fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
            .register::<SketchSchema>()
            .register::<ExtrudeSchema>()
    }

    fn context() -> (ModelContext, RecordingDiagnostics) {
        let diagnostics = RecordingDiagnostics::new();
        let database = Database::in_memory(builder()).unwrap();
        let context = ModelContext::open(database, Arc::new(diagnostics.clone()));
        (context, diagnostics)
    }

    fn failing_context() -> (ModelContext, RecordingDiagnostics, FailSwitch) {
        let switch = FailSwitch::default();
        let store = FailingStore::new(switch.clone());
        let database =
            Database::open(Box::new(store), builder(), StoreConfig::default()).unwrap();
        let diagnostics = RecordingDiagnostics::new();
        let context = ModelContext::open(database, Arc::new(diagnostics.clone()));
        (context, diagnostics, switch)
    }

    fn stored(context: &ModelContext, name: &str, id: BlockId) -> bool {
        context
            .database()
            .store()
            .contains(name, &id.to_key())
            .unwrap()
    }

    #[test]
    fn test_create_then_undo_is_noop() {
        let (mut context, diagnostics) = context();
        let sketch = Sketch::new("base");
        let mut create = CreateCommand::new(sketch.clone());

        assert!(create.execute(&mut context));
        assert!(context.tree().contains(&sketch.id()));
        assert!(stored(&context, SketchSchema::NAME, sketch.id()));

        assert!(create.undo(&mut context));
        assert!(context.tree().is_empty());
        assert!(!stored(&context, SketchSchema::NAME, sketch.id()));
        assert_eq!(create.state(), CommandState::Undone);
        assert_eq!(diagnostics.count(Severity::Warning), 0);

        // 重做
        assert!(create.execute(&mut context));
        assert!(stored(&context, SketchSchema::NAME, sketch.id()));
    }

    #[test]
    fn test_create_with_missing_parent_writes_nothing() {
        let (mut context, _) = context();
        let missing = Sketch::new("missing");
        let extrude = Extrude::new(&missing, 1.0);

        let mut tree = context.tree().clone();
        assert!(!tree.add_node(extrude.record.clone()));

        let mut create = CreateCommand::new(extrude.clone());
        assert!(!create.execute(&mut context));
        assert!(context.tree().is_empty());
        assert!(!stored(&context, ExtrudeSchema::NAME, extrude.id()));
        assert_eq!(create.state(), CommandState::Created);
    }

    #[test]
    fn test_invalid_transitions_warn() {
        let (mut context, diagnostics) = context();
        let mut create = CreateCommand::new(Sketch::new("base"));

        assert!(!create.undo(&mut context));
        assert!(create.execute(&mut context));
        assert!(!create.execute(&mut context));
        assert_eq!(diagnostics.count(Severity::Warning), 2);
    }

    #[test]
    fn test_create_compensates_on_storage_failure() {
        let (mut context, diagnostics, switch) = failing_context();
        let sketch = Sketch::new("base");

        switch.fail_writes(true);
        let mut create = CreateCommand::new(sketch.clone());
        assert!(!create.execute(&mut context));
        assert!(!context.tree().contains(&sketch.id()));
        assert_eq!(diagnostics.count(Severity::Error), 1);
        assert_eq!(diagnostics.count(Severity::Warning), 0);

        switch.fail_writes(false);
        assert!(create.execute(&mut context));
        assert!(context.tree().contains(&sketch.id()));
    }

    #[test]
    fn test_create_undo_keeps_tree_on_storage_failure() {
        let (mut context, _, switch) = failing_context();
        let sketch = Sketch::new("base");
        let mut create = CreateCommand::new(sketch.clone());
        assert!(create.execute(&mut context));

        switch.fail_removes(true);
        assert!(!create.undo(&mut context));
        assert!(context.tree().contains(&sketch.id()));
        assert_eq!(create.state(), CommandState::Executed);

        switch.fail_removes(false);
        assert!(create.undo(&mut context));
    }

    #[test]
    fn test_create_undo_with_dependent_keeps_everything_on_failure() {
        let (mut context, diagnostics, switch) = failing_context();
        let sketch = Sketch::new("base");
        let extrude = Extrude::new(&sketch, 1.0);
        let mut create = CreateCommand::new(sketch.clone());
        assert!(create.execute(&mut context));
        assert!(CreateCommand::new(extrude.clone()).execute(&mut context));

        switch.fail_removes(true);
        assert!(!create.undo(&mut context));
        assert_eq!(create.state(), CommandState::Executed);
        assert_eq!(context.tree().len(), 2);
        assert!(stored(&context, SketchSchema::NAME, sketch.id()));
        assert!(stored(&context, ExtrudeSchema::NAME, extrude.id()));
        assert_eq!(diagnostics.count(Severity::Error), 1);
    }

    #[test]
    fn test_create_undo_restores_self_when_dependent_removal_fails() {
        let (mut context, diagnostics, switch) = failing_context();
        let sketch = Sketch::new("base");
        let extrude = Extrude::new(&sketch, 1.0);
        let mut create = CreateCommand::new(sketch.clone());
        assert!(create.execute(&mut context));
        assert!(CreateCommand::new(extrude.clone()).execute(&mut context));

        // 自身文档删除成功，依赖构件删除失败
        switch.fail_removes_after(1);
        assert!(!create.undo(&mut context));
        switch.fail_removes(false);

        assert_eq!(create.state(), CommandState::Executed);
        assert_eq!(context.tree().len(), 2);
        assert!(context.tree().get(&extrude.id()).unwrap().depends_on(&sketch.id()));
        assert!(stored(&context, SketchSchema::NAME, sketch.id()));
        assert!(stored(&context, ExtrudeSchema::NAME, extrude.id()));
        assert_eq!(diagnostics.count(Severity::Error), 1);

        assert!(create.undo(&mut context));
        assert!(context.tree().is_empty());
    }

    #[test]
    fn test_create_undo_captures_dependents_for_redo() {
        let (mut context, diagnostics) = context();
        let sketch = Sketch::new("base");
        let extrude = Extrude::new(&sketch, 1.0);
        let mut create = CreateCommand::new(sketch.clone());
        assert!(create.execute(&mut context));
        assert!(CreateCommand::new(extrude.clone()).execute(&mut context));

        assert!(create.undo(&mut context));
        assert!(context.tree().is_empty());
        assert!(!stored(&context, SketchSchema::NAME, sketch.id()));
        assert!(!stored(&context, ExtrudeSchema::NAME, extrude.id()));
        assert_eq!(create.dependents(), vec![extrude.id()]);
        assert_eq!(diagnostics.count(Severity::Warning), 1);

        // 重做
        assert!(create.execute(&mut context));
        assert_eq!(context.tree().len(), 2);
        let restored: Extrude = context.read(&extrude.id()).unwrap().unwrap();
        assert_eq!(restored, extrude);
        assert!(create.dependents().is_empty());
    }

    #[test]
    fn test_undo_of_create_with_missing_document_warns() {
        let (mut context, diagnostics) = context();
        let sketch = Sketch::new("base");
        let mut create = CreateCommand::new(sketch.clone());
        assert!(create.execute(&mut context));

        context.database_mut().remove_document(&sketch.id()).unwrap();
        assert!(create.undo(&mut context));
        assert_eq!(diagnostics.count(Severity::Warning), 1);
    }

    #[test]
    fn test_delete_cascades_and_undo_restores() {
        let (mut context, _) = context();
        let sketch = Sketch::new("base");
        let first = Extrude::new(&sketch, 1.0);
        let second = Extrude::new(&sketch, 2.0);
        let other = Sketch::new("other");

        assert!(CreateCommand::new(sketch.clone()).execute(&mut context));
        assert!(CreateCommand::new(first.clone()).execute(&mut context));
        assert!(CreateCommand::new(second.clone()).execute(&mut context));
        assert!(CreateCommand::new(other.clone()).execute(&mut context));

        let mut delete = DeleteCommand::new(sketch.id());
        assert!(delete.execute(&mut context));
        assert_eq!(delete.removed().len(), 3);
        assert_eq!(context.tree().len(), 1);
        assert!(!stored(&context, SketchSchema::NAME, sketch.id()));
        assert!(!stored(&context, ExtrudeSchema::NAME, first.id()));
        assert!(stored(&context, SketchSchema::NAME, other.id()));

        assert!(delete.undo(&mut context));
        assert_eq!(context.tree().len(), 4);
        assert!(context.tree().get(&second.id()).unwrap().depends_on(&sketch.id()));
        let restored: Extrude = context.read(&first.id()).unwrap().unwrap();
        assert_eq!(restored, first);

        // 重做
        assert!(delete.execute(&mut context));
        assert_eq!(context.tree().len(), 1);
    }

    #[test]
    fn test_delete_missing_target() {
        let (mut context, diagnostics) = context();
        let mut delete = DeleteCommand::new(BlockId::new());
        assert!(!delete.execute(&mut context));
        assert_eq!(delete.state(), CommandState::Created);
        assert_eq!(diagnostics.count(Severity::Warning), 1);
    }

    #[test]
    fn test_delete_rolls_back_on_storage_failure() {
        let (mut context, diagnostics, switch) = failing_context();
        let sketch = Sketch::new("base");
        let extrude = Extrude::new(&sketch, 1.0);
        assert!(CreateCommand::new(sketch.clone()).execute(&mut context));
        assert!(CreateCommand::new(extrude.clone()).execute(&mut context));

        switch.fail_removes(true);
        let mut delete = DeleteCommand::new(sketch.id());
        assert!(!delete.execute(&mut context));
        assert_eq!(diagnostics.count(Severity::Error), 1);

        assert_eq!(context.tree().len(), 2);
        assert!(stored(&context, SketchSchema::NAME, sketch.id()));
        assert!(stored(&context, ExtrudeSchema::NAME, extrude.id()));
        assert_eq!(delete.state(), CommandState::Created);
    }
}
