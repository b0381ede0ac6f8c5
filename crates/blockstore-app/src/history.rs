//! 宿主撤销/重做栈
//!
//! 只负责按顺序调用命令的 `execute`/`undo`；一致性由命令自己维护。

use blockstore_db::{ModelCommand, ModelContext};

/// 历史记录最大深度
pub const HISTORY_MAX_DEPTH: usize = 500;

/// 一次撤销/重做的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryStep {
    /// 已应用，附命令描述
    Applied(String),
    /// 命令拒绝执行，历史位置不变
    Failed(String),
    /// 没有可撤销/重做的命令
    Empty,
}

pub struct CommandHistory {
    items: Vec<Box<dyn ModelCommand>>,
    /// 已执行命令的数量，之后的是可重做命令
    cursor: usize,
    max_depth: usize,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::with_max_depth(HISTORY_MAX_DEPTH)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            items: Vec::new(),
            cursor: 0,
            max_depth: max_depth.max(1),
        }
    }

    /// 执行命令，成功后压入历史
    pub fn execute(&mut self, mut command: Box<dyn ModelCommand>, context: &mut ModelContext) -> bool {
        if !command.execute(context) {
            return false;
        }

        // 截断 redo 历史
        self.items.truncate(self.cursor);
        self.items.push(command);
        if self.items.len() > self.max_depth {
            let overflow = self.items.len() - self.max_depth;
            self.items.drain(..overflow);
        }
        self.cursor = self.items.len();
        true
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor < self.items.len()
    }

    pub fn undo(&mut self, context: &mut ModelContext) -> HistoryStep {
        if !self.can_undo() {
            return HistoryStep::Empty;
        }
        let command = &mut self.items[self.cursor - 1];
        let description = command.description();
        if command.undo(context) {
            self.cursor -= 1;
            HistoryStep::Applied(description)
        } else {
            HistoryStep::Failed(description)
        }
    }

    pub fn redo(&mut self, context: &mut ModelContext) -> HistoryStep {
        if !self.can_redo() {
            return HistoryStep::Empty;
        }
        let command = &mut self.items[self.cursor];
        let description = command.description();
        if command.execute(context) {
            self.cursor += 1;
            HistoryStep::Applied(description)
        } else {
            HistoryStep::Failed(description)
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl Default for CommandHistory {
    fn default() -> Self {
        Self::new()
    }
}
