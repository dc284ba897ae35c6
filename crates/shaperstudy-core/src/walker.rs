//! 研究树遍历
//!
//! 深度优先、先父后子、同级按 tag 顺序。保存、名称导出和断链都依赖这个顺序。

use crate::tree::{NodeId, StudyTree};

/// 惰性遍历某个节点的全部后代（不含起点本身）
///
/// 可以 `clone()` 出一个从当前位置继续的副本，或用 [`TreeWalker::new`] 重新开始。
#[derive(Debug, Clone)]
pub struct TreeWalker<'a> {
    tree: &'a StudyTree,
    stack: Vec<NodeId>,
}

impl<'a> TreeWalker<'a> {
    pub fn new(tree: &'a StudyTree, root: NodeId) -> Self {
        Self {
            tree,
            stack: tree.children(root).rev().collect(),
        }
    }
}

impl Iterator for TreeWalker<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.stack.pop()?;
        self.stack.extend(self.tree.children(current).rev());
        Some(current)
    }
}
