//! 研究会话
//!
//! [`Study`] 是一次研究会话的显式上下文：几何内核、宿主树、实体注册表、
//! 导出名称表和形状消费者都挂在这里，不使用进程级全局状态。
//! 构造时和每次加载前，注册表和名称表都会被清空。

use crate::config::StudyConfig;
use crate::entity::{
    Entity, EntityKind, Entry, FieldData, ObjectRef, SelectionData, StepValues, ValueKind,
};
use crate::error::{StudyError, StudyResult};
use crate::kernel::{GeometryKernel, ShapeType};
use crate::lifecycle::ShapeConsumer;
use crate::registry::EntityRegistry;
use crate::schema::{FIELD_PREFIX, FIRST_CHILD_TAG, GROUP_PREFIX, REFERENCE_TAG};
use crate::shape::ShapeData;
use crate::tree::{NodeId, StudyTree};
use crate::walker::TreeWalker;
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap, HashSet};

pub struct Study {
    pub(crate) config: StudyConfig,
    pub(crate) kernel: Box<dyn GeometryKernel>,
    pub(crate) tree: StudyTree,
    pub(crate) registry: EntityRegistry,

    /// 研究entry → 导出脚本中的变量名
    pub(crate) dump_names: BTreeMap<String, String>,

    /// 挂在树节点上的形状消费者（如网格）
    pub(crate) consumers: HashMap<NodeId, Box<dyn ShapeConsumer>>,
}

impl Study {
    /// 使用默认配置和空研究树创建会话
    pub fn new(kernel: impl GeometryKernel + 'static) -> Self {
        Self::with_config(StudyConfig::default(), kernel)
    }

    pub fn with_config(config: StudyConfig, kernel: impl GeometryKernel + 'static) -> Self {
        Self::with_tree(config, kernel, StudyTree::new())
    }

    /// 在已有的研究树上打开会话（如文档服务重新打开的研究）
    pub fn with_tree(
        config: StudyConfig,
        kernel: impl GeometryKernel + 'static,
        tree: StudyTree,
    ) -> Self {
        Self {
            config,
            kernel: Box::new(kernel),
            tree,
            registry: EntityRegistry::new(),
            dump_names: BTreeMap::new(),
            consumers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    pub fn kernel(&self) -> &dyn GeometryKernel {
        self.kernel.as_ref()
    }

    pub fn tree(&self) -> &StudyTree {
        &self.tree
    }

    /// 换上另一棵研究树（如从文件打开）
    ///
    /// 注册表、名称表和挂在旧树节点上的消费者一并清空。
    pub fn replace_tree(&mut self, tree: StudyTree) {
        self.tree = tree;
        self.reset_for_load();
        self.consumers.clear();
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn entity(&self, entry: &Entry) -> Option<&Entity> {
        self.registry.resolve(entry)
    }

    pub(crate) fn entity_or_err(&self, entry: &Entry) -> StudyResult<&Entity> {
        self.registry
            .resolve(entry)
            .ok_or_else(|| StudyError::UnknownEntry(entry.to_string()))
    }

    pub(crate) fn entity_mut_or_err(&mut self, entry: &Entry) -> StudyResult<&mut Entity> {
        self.registry
            .resolve_mut(entry)
            .ok_or_else(|| StudyError::UnknownEntry(entry.to_string()))
    }

    /// 树节点上发布的实体
    pub fn entity_at(&self, node: NodeId) -> Option<&Entity> {
        self.tree
            .object_ref(node)
            .and_then(|object_ref| self.registry.resolve_ref(object_ref))
    }

    /// 组件根节点
    pub fn component(&self) -> Option<NodeId> {
        self.tree.find_component(&self.config.component_type)
    }

    pub fn find_or_create_component(&mut self) -> NodeId {
        if let Some(component) = self.component() {
            return component;
        }
        let component = self.tree.new_component(&self.config.component_type);
        self.tree.set_name(component, self.config.component_name.clone());
        self.tree
            .set_pixmap(component, self.config.component_pixmap.clone());
        tracing::debug!("Created component {}", self.tree.entry(component));
        component
    }

    // === 形状 ===

    /// 注册一个新的活形状（尚未发布）
    pub fn create_shape(&mut self, entry: &Entry, stream: Vec<u8>) -> StudyResult<&Entity> {
        if !entry.is_plain_shape_entry() {
            return Err(StudyError::InvalidEntry(entry.to_string()));
        }
        let entity = Entity::new_shape(entry.clone(), ShapeData::new(stream));
        let entity = self.registry.register(entity)?;
        Ok(&*entity)
    }

    /// 用新的形状流更新活形状；返回是否真的发生了变化
    pub fn update_shape(&mut self, entry: &Entry, stream: Vec<u8>) -> StudyResult<bool> {
        let entity = self.entity_mut_or_err(entry)?;
        if entity.kind() != EntityKind::Shape {
            return Err(StudyError::WrongKind {
                entry: entry.to_string(),
                expected: "live shape",
            });
        }
        let changed = entity.update_shape(stream);
        if changed {
            tracing::debug!("Shape {} updated to tick {}", entry, entity.tick());
        }
        Ok(changed)
    }

    /// 建模器发布或重新发布形状：已存在时原地更新并改名，否则创建并加入研究树
    pub fn publish_shape(
        &mut self,
        entry: &Entry,
        name: &str,
        stream: Vec<u8>,
        father: Option<&Entry>,
    ) -> StudyResult<NodeId> {
        if self.registry.contains(entry) {
            self.update_shape(entry, stream)?;
            let node = self
                .entity_or_err(entry)?
                .node()
                .ok_or_else(|| StudyError::NotPublished(entry.to_string()))?;
            self.tree.set_name(node, name);
            return Ok(node);
        }

        self.create_shape(entry, stream)?;
        self.add_in_study(entry, name, father)?
            .ok_or_else(|| StudyError::NotPublished(entry.to_string()))
    }

    /// 把实体加入研究树
    ///
    /// 组/场必须挂在父形状下，没有父节点时返回 `Ok(None)`。
    /// 非组实体额外获得一个指回自身的活动引用子节点。
    pub fn add_in_study(
        &mut self,
        entry: &Entry,
        name: &str,
        father: Option<&Entry>,
    ) -> StudyResult<Option<NodeId>> {
        let entity = self.entity_or_err(entry)?;
        if entity.node().is_some() {
            return Err(StudyError::AlreadyPublished(entry.to_string()));
        }
        let kind = entity.kind();
        if kind.is_group_like() && father.is_none() {
            tracing::warn!("Group {} can not be published without a father shape", entry);
            return Ok(None);
        }

        let node = match father {
            Some(father) => {
                let father_node = self
                    .entity_or_err(father)?
                    .node()
                    .ok_or_else(|| StudyError::NotPublished(father.to_string()))?;
                let tag = self.tree.next_tag(father_node).max(FIRST_CHILD_TAG);
                self.tree.new_object_to_tag(father_node, tag)
            }
            None => {
                let component = self.find_or_create_component();
                self.tree.new_object(component)
            }
        };

        self.bind_node(entry, node, name)?;
        if kind.is_group_like() {
            self.entity_mut_or_err(entry)?.owner = father.cloned();
        }

        if !kind.is_group_like() {
            let reference = self.tree.new_object_to_tag(node, REFERENCE_TAG);
            self.tree.add_reference(reference, node, true);
        }

        tracing::info!(
            "Published {} '{}' at {}",
            entry,
            name,
            self.tree.entry(node)
        );
        Ok(Some(node))
    }

    /// 把实体绑定到树节点：回指节点，写入名称、对象引用和图标
    pub(crate) fn bind_node(&mut self, entry: &Entry, node: NodeId, name: &str) -> StudyResult<()> {
        let pixmap = self.pixmap_for(entry);
        let entity = self.entity_mut_or_err(entry)?;
        entity.node = Some(node);
        let object_ref = entity.object_ref().clone();

        self.tree.set_name(node, name);
        self.tree.set_object_ref(node, object_ref);
        self.tree.set_pixmap(node, pixmap);
        Ok(())
    }

    /// 发布到组件根下；失败时返回空字符串
    pub fn add_to_study(&mut self, entry: &Entry, name: &str) -> String {
        match self.add_in_study(entry, name, None) {
            Ok(Some(node)) => self.tree.entry(node),
            Ok(None) => String::new(),
            Err(e) => {
                tracing::error!("addToStudy() failed: {}", e);
                String::new()
            }
        }
    }

    /// 发布到父形状下；失败时返回空字符串
    pub fn add_to_study_in_father(&mut self, father: &Entry, entry: &Entry, name: &str) -> String {
        match self.add_in_study(entry, name, Some(father)) {
            Ok(Some(node)) => self.tree.entry(node),
            Ok(None) => String::new(),
            Err(e) => {
                tracing::error!("addToStudyInFather() failed: {}", e);
                String::new()
            }
        }
    }

    /// 按实体种类和拓扑/选择类型选择图标
    fn pixmap_for(&self, entry: &Entry) -> &'static str {
        let Some(entity) = self.registry.resolve(entry) else {
            return "ICON_OBJBROWSER_SHAPE";
        };
        if entity.kind().is_field() {
            return "ICON_OBJBROWSER_FIELD";
        }
        if let Some(selection) = entity.selection() {
            return match selection.selection_type {
                ShapeType::Vertex => "ICON_OBJBROWSER_GROUP_PNT",
                ShapeType::Edge => "ICON_OBJBROWSER_GROUP_EDGE",
                ShapeType::Face => "ICON_OBJBROWSER_GROUP_FACE",
                _ => "ICON_OBJBROWSER_GROUP_SOLID",
            };
        }
        let shape_type = entity
            .shape()
            .map(|data| self.kernel.shape_type(data.stream()))
            .unwrap_or(ShapeType::Shape);
        match shape_type {
            ShapeType::Compound => "ICON_OBJBROWSER_COMPOUND",
            ShapeType::CompSolid => "ICON_OBJBROWSER_COMPSOLID",
            ShapeType::Solid => "ICON_OBJBROWSER_SOLID",
            ShapeType::Shell => "ICON_OBJBROWSER_SHELL",
            ShapeType::Face => "ICON_OBJBROWSER_FACE",
            ShapeType::Wire => "ICON_OBJBROWSER_WIRE",
            ShapeType::Edge => "ICON_OBJBROWSER_EDGE",
            ShapeType::Vertex => "ICON_OBJBROWSER_VERTEX",
            ShapeType::Shape | ShapeType::Flat => "ICON_OBJBROWSER_SHAPE",
        }
    }

    /// 实体所在节点的研究entry
    pub fn study_entry(&self, entry: &Entry) -> Option<String> {
        let node = self.entity(entry)?.node()?;
        Some(self.tree.entry(node))
    }

    pub fn name(&self, entry: &Entry) -> Option<&str> {
        let node = self.entity(entry)?.node()?;
        self.tree.name(node)
    }

    /// 组/场所属的主形状：优先取父节点上的形状，其次取创建时记录的形状
    pub fn main_shape(&self, entry: &Entry) -> Option<&Entity> {
        let entity = self.entity(entry)?;
        if entity.kind().is_shape() {
            return None;
        }
        let from_tree = entity
            .node()
            .and_then(|node| self.tree.parent(node))
            .and_then(|parent| self.entity_at(parent))
            .filter(|parent| parent.kind().is_shape());
        from_tree.or_else(|| entity.owner().and_then(|owner| self.entity(owner)))
    }

    /// 实体的形状流；组/场的形状由主形状的当前版本和选择按需计算
    pub fn shape_stream(&self, entry: &Entry) -> Option<Cow<'_, [u8]>> {
        let entity = self.entity(entry)?;
        if let Some(data) = entity.shape() {
            return Some(Cow::Borrowed(data.stream()));
        }
        let selection = entity.selection()?;
        let main = self.main_shape(entry)?.shape()?;
        Some(Cow::Owned(
            self.kernel.group_shape(main.stream(), selection.indices()),
        ))
    }

    pub fn old_shape_stream(&self, entry: &Entry) -> Option<&[u8]> {
        self.entity(entry)?.shape().map(|data| data.old_stream())
    }

    /// 形状的拓扑类型；组/场返回选择类型
    pub fn shape_type(&self, entry: &Entry) -> Option<ShapeType> {
        let entity = self.entity(entry)?;
        match (entity.shape(), entity.selection()) {
            (Some(data), _) => Some(self.kernel.shape_type(data.stream())),
            (None, Some(selection)) => Some(selection.selection_type),
            (None, None) => None,
        }
    }

    /// 直接发布在形状节点下的组和场，按 tag 顺序
    pub fn sub_entities(&self, shape: &Entry) -> Vec<&Entity> {
        let Some(node) = self.entity(shape).and_then(|e| e.node()) else {
            return Vec::new();
        };
        self.tree
            .children(node)
            .filter_map(|child| self.entity_at(child))
            .filter(|e| e.kind().is_group_like())
            .collect()
    }

    // === 组与场 ===

    fn require_shape(&self, main: &Entry) -> StudyResult<()> {
        if !self.entity_or_err(main)?.kind().is_shape() {
            return Err(StudyError::WrongKind {
                entry: main.to_string(),
                expected: "shape",
            });
        }
        Ok(())
    }

    /// 在主形状上创建一个空组（未发布）
    pub fn create_group(&mut self, main: &Entry, selection_type: ShapeType) -> StudyResult<Entry> {
        self.require_shape(main)?;
        if !selection_type.is_group_selectable() {
            return Err(StudyError::UnsupportedSelectionType(selection_type));
        }
        let entry = self.registry.allocate(GROUP_PREFIX);
        let mut group = Entity::new_group(entry.clone(), SelectionData::new(selection_type));
        group.owner = Some(main.clone());
        self.registry.register(group)?;
        tracing::debug!("Created group {} of {:?} on {}", entry, selection_type, main);
        Ok(entry)
    }

    /// 在主形状上创建一个场（未发布）
    pub fn create_field(
        &mut self,
        main: &Entry,
        selection_type: ShapeType,
        value_kind: ValueKind,
        components: Vec<String>,
    ) -> StudyResult<Entry> {
        self.require_shape(main)?;
        if !selection_type.is_group_selectable() && selection_type != ShapeType::Shape {
            return Err(StudyError::UnsupportedSelectionType(selection_type));
        }
        let entry = self.registry.allocate(FIELD_PREFIX);
        let data = FieldData::new(SelectionData::new(selection_type), value_kind, components);
        let mut field = Entity::new_field(entry.clone(), data);
        field.owner = Some(main.clone());
        self.registry.register(field)?;
        Ok(entry)
    }

    fn require_live_group(&self, entry: &Entry) -> StudyResult<()> {
        let entity = self.entity_or_err(entry)?;
        if !entity.kind().is_group_like() || entity.is_dead() {
            return Err(StudyError::WrongKind {
                entry: entry.to_string(),
                expected: "live group or field",
            });
        }
        Ok(())
    }

    /// 替换组/场的选择，旧选择保留
    pub fn set_selection(&mut self, entry: &Entry, indices: Vec<i64>) -> StudyResult<bool> {
        self.require_live_group(entry)?;
        Ok(self.entity_mut_or_err(entry)?.set_selection(indices))
    }

    /// 向选择追加索引，已存在的索引被忽略，保持插入顺序
    pub fn union_indices(&mut self, entry: &Entry, indices: &[i64]) -> StudyResult<bool> {
        self.require_live_group(entry)?;
        let entity = self.entity_mut_or_err(entry)?;
        let mut merged: Vec<i64> = entity
            .selection()
            .map(|s| s.indices().to_vec())
            .unwrap_or_default();
        let mut seen: HashSet<i64> = merged.iter().copied().collect();
        for &index in indices {
            if seen.insert(index) {
                merged.push(index);
            }
        }
        Ok(entity.set_selection(merged))
    }

    /// 追加场的时间步
    pub fn add_field_step(
        &mut self,
        entry: &Entry,
        step: u32,
        stamp: i64,
        values: StepValues,
    ) -> StudyResult<()> {
        self.require_live_group(entry)?;
        let field = self
            .entity_mut_or_err(entry)?
            .field_mut()
            .ok_or_else(|| StudyError::WrongKind {
                entry: entry.to_string(),
                expected: "field",
            })?;
        field.add_step(step, stamp, values)
    }

    // === 持久化协议 ===

    /// 组件子树中发布了实体的节点，按遍历顺序
    pub fn published(&self) -> Vec<(NodeId, &Entity)> {
        let Some(component) = self.component() else {
            return Vec::new();
        };
        TreeWalker::new(&self.tree, component)
            .filter_map(|node| self.entity_at(node).map(|entity| (node, entity)))
            .collect()
    }

    /// 开始一次新的加载：清空注册表和名称表
    pub fn reset_for_load(&mut self) {
        self.registry.clear();
        self.dump_names.clear();
    }

    /// 注册反序列化得到的实体；先整体校验，有重复 entry 时不做任何修改
    pub fn insert_loaded(&mut self, entities: Vec<Entity>) -> StudyResult<usize> {
        let mut seen = HashSet::new();
        for entity in &entities {
            if !seen.insert(entity.entry().clone()) || self.registry.contains(entity.entry()) {
                return Err(StudyError::DuplicateEntry(entity.entry().to_string()));
            }
        }
        let count = entities.len();
        for entity in entities {
            self.registry.register(entity)?;
        }
        Ok(count)
    }

    /// 节点的持久ID（即实体 entry）
    pub fn persistent_id(&self, node: NodeId) -> Option<Entry> {
        self.entity_at(node).map(|entity| entity.entry().clone())
    }

    /// 持久ID → 对象引用，同时完成实体到树节点的延迟绑定
    ///
    /// 父节点是形状时，组/场的 tick 取父形状的 tick。
    pub fn restore_reference(&mut self, node: NodeId, persistent_id: &str) -> Option<ObjectRef> {
        let entry = Entry::new(persistent_id).ok()?;
        let parent_shape = self
            .tree
            .parent(node)
            .and_then(|parent| self.entity_at(parent))
            .filter(|parent| parent.kind().is_shape())
            .map(|parent| (parent.entry().clone(), parent.tick()));

        let entity = self.registry.resolve_mut(&entry)?;
        entity.node = Some(node);
        if entity.kind().is_group_like() {
            if let Some((owner, tick)) = parent_shape {
                entity.owner = Some(owner);
                entity.tick = tick;
            }
        }
        let object_ref = entity.object_ref().clone();
        self.tree.set_object_ref(node, object_ref.clone());
        Some(object_ref)
    }

    /// 在节点上挂接形状消费者；断链时它会收到死亡副本
    pub fn attach_consumer(&mut self, node: NodeId, consumer: Box<dyn ShapeConsumer>) {
        self.consumers.insert(node, consumer);
    }

    // === 外部子系统的节点 ===
    //
    // 网格等子系统在自己的组件下建节点、挂引用；本组件子树只由会话自己修改。

    /// 查找或创建其他子系统的组件根
    pub fn foreign_component(&mut self, data_type: &str) -> StudyResult<NodeId> {
        if data_type == self.config.component_type {
            return Err(StudyError::ReservedNode(data_type.to_string()));
        }
        Ok(match self.tree.find_component(data_type) {
            Some(component) => component,
            None => self.tree.new_component(data_type),
        })
    }

    /// 在外部节点下按下一个可用 tag 创建子节点
    pub fn new_foreign_object(&mut self, parent: NodeId) -> StudyResult<NodeId> {
        self.require_foreign(parent)?;
        Ok(self.tree.new_object(parent))
    }

    /// 在外部节点的引用位置（tag 1）建子节点并指向 `target`
    pub fn new_reference_object(
        &mut self,
        parent: NodeId,
        target: NodeId,
        active: bool,
    ) -> StudyResult<NodeId> {
        self.require_foreign(parent)?;
        self.require_node(target)?;
        let node = self.tree.new_object_to_tag(parent, REFERENCE_TAG);
        self.tree.add_reference(node, target, active);
        Ok(node)
    }

    /// 替换外部节点的引用边
    pub fn set_reference(&mut self, from: NodeId, to: NodeId, active: bool) -> StudyResult<()> {
        self.require_foreign(from)?;
        self.require_node(to)?;
        self.tree.add_reference(from, to, active);
        Ok(())
    }

    fn require_node(&self, node: NodeId) -> StudyResult<()> {
        if self.tree.node(node).is_none() {
            return Err(StudyError::UnknownNode(format!("#{}", node.index())));
        }
        Ok(())
    }

    /// 节点存在且不在本组件子树内（也不是树根）
    fn require_foreign(&self, node: NodeId) -> StudyResult<()> {
        self.require_node(node)?;
        let component = self.component();
        let mut current = Some(node);
        while let Some(id) = current {
            if id == self.tree.root() || Some(id) == component {
                return Err(StudyError::ReservedNode(self.tree.entry(node)));
            }
            current = self.tree.parent(id);
        }
        Ok(())
    }
}
