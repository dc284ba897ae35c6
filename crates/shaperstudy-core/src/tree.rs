//! 宿主研究树
//!
//! 仅追加的有序树：节点从不删除，每个节点在父节点下有一个结构位置（tag），
//! 子节点按 tag 排序。节点上保存名称、图标、对象引用字符串，以及最多一条
//! 指向其它节点的引用边。

use crate::entity::ObjectRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 树节点ID（在本树的节点表中的下标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// 引用边；`active`（"红色"引用）表示本节点在概念上是目标实体的活实例
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub target: NodeId,
    pub active: bool,
}

/// 树节点
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Node {
    parent: Option<NodeId>,
    tag: u32,
    children: BTreeMap<u32, NodeId>,

    /// 组件根节点的数据类型
    component: Option<String>,

    name: Option<String>,
    pixmap: Option<String>,
    object_ref: Option<ObjectRef>,
    reference: Option<Reference>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn pixmap(&self) -> Option<&str> {
        self.pixmap.as_deref()
    }

    pub fn object_ref(&self) -> Option<&ObjectRef> {
        self.object_ref.as_ref()
    }

    pub fn reference(&self) -> Option<Reference> {
        self.reference
    }
}

/// 研究树
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyTree {
    nodes: Vec<Node>,
}

impl StudyTree {
    /// 创建只有根节点（entry "0"）的树
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0)
    }

    /// 查找组件根节点
    pub fn find_component(&self, data_type: &str) -> Option<NodeId> {
        self.children(self.root())
            .find(|&id| self.nodes[id.0].component.as_deref() == Some(data_type))
    }

    /// 在根下创建组件节点
    pub fn new_component(&mut self, data_type: &str) -> NodeId {
        let id = self.new_object(self.root());
        self.nodes[id.0].component = Some(data_type.to_string());
        id
    }

    /// 在父节点下按下一个可用 tag 创建子节点
    pub fn new_object(&mut self, parent: NodeId) -> NodeId {
        let tag = self.next_tag(parent);
        self.new_object_to_tag(parent, tag)
    }

    /// 在指定 tag 创建子节点；该 tag 已被占用时返回已有节点
    pub fn new_object_to_tag(&mut self, parent: NodeId, tag: u32) -> NodeId {
        if let Some(existing) = self.find_sub_object(parent, tag) {
            return existing;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            parent: Some(parent),
            tag,
            ..Default::default()
        });
        if let Some(parent_node) = self.node_mut(parent) {
            parent_node.children.insert(tag, id);
        }
        id
    }

    /// 父节点下一个可用的 tag（最大 tag + 1，从1开始）
    pub fn next_tag(&self, parent: NodeId) -> u32 {
        self.node(parent)
            .and_then(|node| node.children.keys().next_back().copied())
            .map(|tag| tag + 1)
            .unwrap_or(1)
    }

    pub fn find_sub_object(&self, parent: NodeId, tag: u32) -> Option<NodeId> {
        self.node(parent)?.children.get(&tag).copied()
    }

    /// 按 tag 顺序遍历直接子节点
    pub fn children(&self, parent: NodeId) -> impl DoubleEndedIterator<Item = NodeId> + '_ {
        self.node(parent)
            .into_iter()
            .flat_map(|node| node.children.values().copied())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id)?.parent
    }

    pub fn tag(&self, id: NodeId) -> Option<u32> {
        self.node(id).map(|node| node.tag)
    }

    /// 节点的研究entry，如 "0:1:3:2"
    pub fn entry(&self, id: NodeId) -> String {
        let mut tags = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let Some(node) = self.node(node_id) else {
                break;
            };
            if node.parent.is_some() {
                tags.push(node.tag.to_string());
            }
            current = node.parent;
        }
        tags.push("0".to_string());
        tags.reverse();
        tags.join(":")
    }

    /// 按研究entry查找节点
    pub fn find_object_id(&self, entry: &str) -> Option<NodeId> {
        let mut parts = entry.split(':');
        if parts.next()? != "0" {
            return None;
        }
        let mut current = self.root();
        for part in parts {
            let tag: u32 = part.parse().ok()?;
            current = self.find_sub_object(current, tag)?;
        }
        Some(current)
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.node(id)?.name()
    }

    pub fn set_name(&mut self, id: NodeId, name: impl Into<String>) {
        if let Some(node) = self.node_mut(id) {
            node.name = Some(name.into());
        }
    }

    pub fn pixmap(&self, id: NodeId) -> Option<&str> {
        self.node(id)?.pixmap()
    }

    pub fn set_pixmap(&mut self, id: NodeId, pixmap: impl Into<String>) {
        if let Some(node) = self.node_mut(id) {
            node.pixmap = Some(pixmap.into());
        }
    }

    pub fn object_ref(&self, id: NodeId) -> Option<&ObjectRef> {
        self.node(id)?.object_ref()
    }

    pub fn set_object_ref(&mut self, id: NodeId, object_ref: ObjectRef) {
        if let Some(node) = self.node_mut(id) {
            node.object_ref = Some(object_ref);
        }
    }

    /// 建立引用边；节点原有的引用被替换
    pub fn add_reference(&mut self, from: NodeId, to: NodeId, active: bool) {
        if let Some(node) = self.node_mut(from) {
            node.reference = Some(Reference { target: to, active });
        }
    }

    pub fn remove_reference(&mut self, from: NodeId) -> Option<Reference> {
        self.node_mut(from)?.reference.take()
    }

    pub fn referenced_object(&self, id: NodeId) -> Option<Reference> {
        self.node(id)?.reference
    }

    /// 节点是否以活动引用指向目标
    pub fn is_active_reference_to(&self, from: NodeId, to: NodeId) -> bool {
        self.referenced_object(from)
            .is_some_and(|r| r.active && r.target == to)
    }
}

impl Default for StudyTree {
    fn default() -> Self {
        Self::new()
    }
}
