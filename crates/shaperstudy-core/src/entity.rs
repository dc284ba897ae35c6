//! 实体定义
//!
//! 采用组合而不是继承：
//! - `Entity`: 标识（entry）、对象引用、修改计数、树节点回指
//! - `EntityBody`: 形状数据 / 组的选择 / 场的选择加时间步
//!
//! 实体种类在发布或反序列化时一次性确定（[`EntityKind`]），之后用模式匹配分派。

use crate::error::{StudyError, StudyResult};
use crate::kernel::ShapeType;
use crate::schema::{DEAD_PREFIX, FIELD_PREFIX, GROUP_PREFIX};
use crate::shape::ShapeData;
use crate::tree::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 实体在组件数据树中的唯一标识
///
/// 前缀编码种类：`dead<N>_<原entry>` 是第N代历史快照，`group...` 是组，
/// `field...` 是场，其余是普通形状。entry 永不复用。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entry(String);

impl Entry {
    /// 创建 entry；不能为空，不能包含空白、`|` 或 `;`（它们是持久化格式的分隔符）
    pub fn new(text: impl Into<String>) -> StudyResult<Self> {
        let text = text.into();
        let valid = !text.is_empty()
            && !text
                .chars()
                .any(|c| c.is_whitespace() || c == '|' || c == ';');
        if !valid {
            return Err(StudyError::InvalidEntry(text));
        }
        Ok(Self(text))
    }

    /// 第 `generation` 代死亡副本的 entry
    pub fn dead(generation: u32, original: &Entry) -> Self {
        Self(format!("{}{}_{}", DEAD_PREFIX, generation, original.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_dead(&self) -> bool {
        self.0.starts_with(DEAD_PREFIX)
    }

    /// 死亡副本的代数
    pub fn dead_generation(&self) -> Option<u32> {
        split_dead(&self.0).map(|(generation, _)| generation)
    }

    /// 去掉死亡前缀后的原始 entry
    pub fn origin(&self) -> &str {
        let mut text = self.0.as_str();
        while let Some((_, original)) = split_dead(text) {
            text = original;
        }
        text
    }

    pub fn is_group_entry(&self) -> bool {
        self.origin().starts_with(GROUP_PREFIX)
    }

    pub fn is_field_entry(&self) -> bool {
        self.origin().starts_with(FIELD_PREFIX)
    }

    /// 普通形状的 entry 不能与组、场、死亡前缀冲突
    pub fn is_plain_shape_entry(&self) -> bool {
        !self.is_dead() && !self.is_group_entry() && !self.is_field_entry()
    }
}

/// 拆出 `dead<N>_` 前缀：返回 (代数, 原entry)
fn split_dead(text: &str) -> Option<(u32, &str)> {
    let rest = text.strip_prefix(DEAD_PREFIX)?;
    let (digits, original) = rest.split_once('_')?;
    let generation = digits.parse().ok()?;
    Some((generation, original))
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 不透明的对象引用字符串，存放在树节点上
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef(String);

impl ObjectRef {
    pub fn new() -> Self {
        Self(format!("IOR:{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 实体种类（封闭的标签变体）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Shape,
    Group,
    Field,
    DeadShape,
    DeadGroup,
    DeadField,
}

impl EntityKind {
    /// 按 entry 前缀推断种类（反序列化时使用）
    pub fn from_entry(entry: &Entry) -> Self {
        match (entry.is_dead(), entry.is_group_entry(), entry.is_field_entry()) {
            (false, true, _) => EntityKind::Group,
            (false, _, true) => EntityKind::Field,
            (false, _, _) => EntityKind::Shape,
            (true, true, _) => EntityKind::DeadGroup,
            (true, _, true) => EntityKind::DeadField,
            (true, _, _) => EntityKind::DeadShape,
        }
    }

    pub fn is_dead(self) -> bool {
        matches!(
            self,
            EntityKind::DeadShape | EntityKind::DeadGroup | EntityKind::DeadField
        )
    }

    pub fn is_shape(self) -> bool {
        matches!(self, EntityKind::Shape | EntityKind::DeadShape)
    }

    /// 组和场都挂在形状下面
    pub fn is_group_like(self) -> bool {
        !self.is_shape()
    }

    pub fn is_field(self) -> bool {
        matches!(self, EntityKind::Field | EntityKind::DeadField)
    }
}

/// 场数据类型；数值与持久化格式一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Bool = 0,
    Int = 1,
    Double = 2,
    String = 3,
}

impl ValueKind {
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => ValueKind::Bool,
            1 => ValueKind::Int,
            2 => ValueKind::Double,
            3 => ValueKind::String,
            _ => return None,
        })
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// 一个时间步的取值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepValues {
    Bool(Vec<bool>),
    Int(Vec<i64>),
    Double(Vec<f64>),
    String(Vec<String>),
}

impl StepValues {
    pub fn empty(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Bool => StepValues::Bool(Vec::new()),
            ValueKind::Int => StepValues::Int(Vec::new()),
            ValueKind::Double => StepValues::Double(Vec::new()),
            ValueKind::String => StepValues::String(Vec::new()),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            StepValues::Bool(_) => ValueKind::Bool,
            StepValues::Int(_) => ValueKind::Int,
            StepValues::Double(_) => ValueKind::Double,
            StepValues::String(_) => ValueKind::String,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            StepValues::Bool(v) => v.len(),
            StepValues::Int(v) => v.len(),
            StepValues::Double(v) => v.len(),
            StepValues::String(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 场的时间步
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldStep {
    /// 时间戳
    pub stamp: i64,
    pub values: StepValues,
}

/// 组的选择：子形状类型和子形状索引（相对于所属形状的当前版本解释）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionData {
    pub selection_type: ShapeType,
    indices: Vec<i64>,
    old_indices: Vec<i64>,
}

impl SelectionData {
    pub fn new(selection_type: ShapeType) -> Self {
        Self {
            selection_type,
            indices: Vec::new(),
            old_indices: Vec::new(),
        }
    }

    pub fn restore(selection_type: ShapeType, indices: Vec<i64>, old_indices: Vec<i64>) -> Self {
        Self {
            selection_type,
            indices,
            old_indices,
        }
    }

    pub fn indices(&self) -> &[i64] {
        &self.indices
    }

    pub fn old_indices(&self) -> &[i64] {
        &self.old_indices
    }

    /// 替换选择，旧选择保留为 old；未变化时返回 false
    pub fn set(&mut self, indices: Vec<i64>) -> bool {
        if self.indices == indices {
            return false;
        }
        self.old_indices = std::mem::replace(&mut self.indices, indices);
        true
    }
}

/// 场：选择 + 数据类型 + 分量名 + 时间步（第n步存放在下标 n-1）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldData {
    pub selection: SelectionData,
    pub value_kind: ValueKind,
    pub components: Vec<String>,
    steps: Vec<FieldStep>,
}

impl FieldData {
    pub fn new(selection: SelectionData, value_kind: ValueKind, components: Vec<String>) -> Self {
        Self {
            selection,
            value_kind,
            components,
            steps: Vec::new(),
        }
    }

    /// 时间步编号，从1开始连续
    pub fn step_ids(&self) -> Vec<u32> {
        (1..=self.steps.len() as u32).collect()
    }

    pub fn steps(&self) -> &[FieldStep] {
        &self.steps
    }

    pub fn step(&self, id: u32) -> Option<&FieldStep> {
        (id as usize).checked_sub(1).and_then(|i| self.steps.get(i))
    }

    /// 每个时间步的取值个数
    pub fn values_per_step(&self) -> usize {
        self.steps.first().map(|s| s.values.len()).unwrap_or(0)
    }

    /// 追加时间步：编号必须是下一个，类型和取值个数必须与已有步一致
    pub fn add_step(&mut self, id: u32, stamp: i64, values: StepValues) -> StudyResult<()> {
        let expected = self.steps.len() as u32 + 1;
        if id != expected {
            return Err(StudyError::InvalidFieldStep(format!(
                "step {} added, step {} expected",
                id, expected
            )));
        }
        if values.kind() != self.value_kind {
            return Err(StudyError::InvalidFieldStep(format!(
                "{:?} values in a {:?} field",
                values.kind(),
                self.value_kind
            )));
        }
        if !self.steps.is_empty() && values.len() != self.values_per_step() {
            return Err(StudyError::InvalidFieldStep(format!(
                "{} values, {} expected",
                values.len(),
                self.values_per_step()
            )));
        }
        self.steps.push(FieldStep { stamp, values });
        Ok(())
    }

    /// 整体替换时间步（归档导入），先校验后替换
    pub(crate) fn replace_steps(&mut self, steps: Vec<FieldStep>) -> StudyResult<()> {
        let mut staged = FieldData::new(
            self.selection.clone(),
            self.value_kind,
            self.components.clone(),
        );
        for (i, step) in steps.into_iter().enumerate() {
            staged.add_step(i as u32 + 1, step.stamp, step.values)?;
        }
        self.steps = staged.steps;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityBody {
    Shape(ShapeData),
    Group(SelectionData),
    Field(FieldData),
}

/// 发布到研究树中的实体
#[derive(Debug, Clone)]
pub struct Entity {
    entry: Entry,
    object_ref: ObjectRef,
    kind: EntityKind,

    /// 修改计数，从1开始
    pub(crate) tick: u32,

    /// 宿主树节点（不拥有）；加载后在首次解析时延迟绑定
    pub(crate) node: Option<NodeId>,

    /// 组/场所属的形状
    pub(crate) owner: Option<Entry>,

    pub(crate) body: EntityBody,
}

impl Entity {
    fn with_body(entry: Entry, body: EntityBody) -> Self {
        let kind = EntityKind::from_entry(&entry);
        let kind = match (&body, kind.is_dead()) {
            (EntityBody::Shape(_), false) => EntityKind::Shape,
            (EntityBody::Shape(_), true) => EntityKind::DeadShape,
            (EntityBody::Group(_), false) => EntityKind::Group,
            (EntityBody::Group(_), true) => EntityKind::DeadGroup,
            (EntityBody::Field(_), false) => EntityKind::Field,
            (EntityBody::Field(_), true) => EntityKind::DeadField,
        };
        Self {
            entry,
            object_ref: ObjectRef::new(),
            kind,
            tick: 1,
            node: None,
            owner: None,
            body,
        }
    }

    pub fn new_shape(entry: Entry, data: ShapeData) -> Self {
        Self::with_body(entry, EntityBody::Shape(data))
    }

    pub fn new_group(entry: Entry, selection: SelectionData) -> Self {
        Self::with_body(entry, EntityBody::Group(selection))
    }

    pub fn new_field(entry: Entry, field: FieldData) -> Self {
        Self::with_body(entry, EntityBody::Field(field))
    }

    pub fn with_tick(mut self, tick: u32) -> Self {
        self.tick = tick;
        self
    }

    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    pub fn object_ref(&self) -> &ObjectRef {
        &self.object_ref
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn is_dead(&self) -> bool {
        self.kind.is_dead()
    }

    /// 仍与参数化模型相连（未死亡）
    pub fn is_parametrical(&self) -> bool {
        !self.is_dead()
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn owner(&self) -> Option<&Entry> {
        self.owner.as_ref()
    }

    pub fn body(&self) -> &EntityBody {
        &self.body
    }

    pub fn shape(&self) -> Option<&ShapeData> {
        match &self.body {
            EntityBody::Shape(data) => Some(data),
            _ => None,
        }
    }

    pub fn selection(&self) -> Option<&SelectionData> {
        match &self.body {
            EntityBody::Group(selection) => Some(selection),
            EntityBody::Field(field) => Some(&field.selection),
            EntityBody::Shape(_) => None,
        }
    }

    pub fn field(&self) -> Option<&FieldData> {
        match &self.body {
            EntityBody::Field(field) => Some(field),
            _ => None,
        }
    }

    pub(crate) fn shape_mut(&mut self) -> Option<&mut ShapeData> {
        match &mut self.body {
            EntityBody::Shape(data) => Some(data),
            _ => None,
        }
    }

    pub(crate) fn selection_mut(&mut self) -> Option<&mut SelectionData> {
        match &mut self.body {
            EntityBody::Group(selection) => Some(selection),
            EntityBody::Field(field) => Some(&mut field.selection),
            EntityBody::Shape(_) => None,
        }
    }

    pub(crate) fn field_mut(&mut self) -> Option<&mut FieldData> {
        match &mut self.body {
            EntityBody::Field(field) => Some(field),
            _ => None,
        }
    }

    /// 同一个实体：种类与 entry 都相同
    pub fn is_same(&self, other: &Entity) -> bool {
        self.kind == other.kind && self.entry == other.entry
    }

    /// 重新发布形状；流有变化时 tick 加一
    pub(crate) fn update_shape(&mut self, stream: Vec<u8>) -> bool {
        let changed = self.shape_mut().is_some_and(|data| data.update(stream));
        if changed {
            self.tick += 1;
        }
        changed
    }

    /// 替换组/场的选择；有变化时 tick 加一
    pub(crate) fn set_selection(&mut self, indices: Vec<i64>) -> bool {
        let changed = self
            .selection_mut()
            .is_some_and(|selection| selection.set(indices));
        if changed {
            self.tick += 1;
        }
        changed
    }
}
