//! 操作接口
//!
//! 组、子形状、测量、场四类操作。每个操作对象记录最近一次调用的结果：
//! 失败时 [`OperationStatus::is_done`] 为 false，错误描述可由
//! [`OperationStatus::error_code`] 取得，返回值为 `None` 或空集合。

use crate::entity::{Entry, FieldData, FieldStep, StepValues, ValueKind};
use crate::error::{StudyError, StudyResult};
use crate::kernel::{ShapeType, SubShape};
use crate::study::Study;
use nalgebra::Point3;
use std::borrow::Cow;

/// 最近一次操作的状态
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationStatus {
    error: Option<String>,
}

impl OperationStatus {
    pub fn is_done(&self) -> bool {
        self.error.is_none()
    }

    /// 错误描述，成功时为空串
    pub fn error_code(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }

    fn record<T>(&mut self, result: StudyResult<T>) -> Option<T> {
        match result {
            Ok(value) => {
                self.error = None;
                Some(value)
            }
            Err(e) => {
                tracing::warn!("Operation failed: {}", e);
                self.error = Some(e.to_string());
                None
            }
        }
    }
}

/// 操作的形状参数：研究中的实体，或内核查询得到的未发布子形状
#[derive(Debug, Clone, Copy)]
pub enum ShapeArg<'a> {
    Entity(&'a Entry),
    Sub(&'a SubShape),
}

impl<'a> From<&'a Entry> for ShapeArg<'a> {
    fn from(entry: &'a Entry) -> Self {
        ShapeArg::Entity(entry)
    }
}

impl<'a> From<&'a SubShape> for ShapeArg<'a> {
    fn from(sub: &'a SubShape) -> Self {
        ShapeArg::Sub(sub)
    }
}

impl<'a> ShapeArg<'a> {
    /// 形状流和拓扑类型
    fn resolve<'s>(self, study: &'s Study) -> StudyResult<(Cow<'s, [u8]>, ShapeType)>
    where
        'a: 's,
    {
        match self {
            ShapeArg::Sub(sub) => Ok((Cow::Borrowed(sub.stream.as_slice()), sub.shape_type)),
            ShapeArg::Entity(entry) => {
                let stream = study
                    .shape_stream(entry)
                    .ok_or_else(|| StudyError::UnknownEntry(entry.to_string()))?;
                let shape_type = study
                    .shape_type(entry)
                    .ok_or_else(|| StudyError::UnknownEntry(entry.to_string()))?;
                Ok((stream, shape_type))
            }
        }
    }
}

impl Study {
    pub fn group_operations(&mut self) -> GroupOperations<'_> {
        GroupOperations::new(self)
    }

    pub fn field_operations(&mut self) -> FieldOperations<'_> {
        FieldOperations::new(self)
    }

    pub fn shapes_operations(&self) -> ShapesOperations<'_> {
        ShapesOperations::new(self)
    }

    pub fn measure_operations(&self) -> MeasureOperations<'_> {
        MeasureOperations::new(self)
    }
}

// ========== 组 ==========

pub struct GroupOperations<'a> {
    study: &'a mut Study,
    status: OperationStatus,
}

impl<'a> GroupOperations<'a> {
    pub fn new(study: &'a mut Study) -> Self {
        Self {
            study,
            status: OperationStatus::default(),
        }
    }

    pub fn status(&self) -> &OperationStatus {
        &self.status
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    pub fn error_code(&self) -> &str {
        self.status.error_code()
    }

    /// 创建组；只支持 VERTEX/EDGE/FACE/SOLID
    pub fn create_group(&mut self, main: &Entry, shape_type: ShapeType) -> Option<Entry> {
        let result = self.study.create_group(main, shape_type);
        self.status.record(result)
    }

    /// 把子形状加入组；类型必须与组的选择类型一致，已存在的被忽略
    pub fn union_list(&mut self, group: &Entry, items: &[ShapeArg<'_>]) -> bool {
        let result = self.union_list_impl(group, items);
        self.status.record(result).is_some()
    }

    fn union_list_impl(&mut self, group: &Entry, items: &[ShapeArg<'_>]) -> StudyResult<bool> {
        let (selection_type, main) = self.group_context(group)?;
        let mut ids = Vec::with_capacity(items.len());
        for item in items {
            let (stream, shape_type) = item.resolve(self.study)?;
            if shape_type != selection_type {
                return Err(StudyError::MismatchedSubShape {
                    expected: selection_type,
                    found: shape_type,
                });
            }
            let index = self
                .study
                .kernel()
                .sub_shape_index(&main, &stream)
                .ok_or(StudyError::SubShapeNotFound)?;
            ids.push(index);
        }
        self.study.union_indices(group, &ids)
    }

    /// 按全局索引把子形状加入组
    pub fn union_ids(&mut self, group: &Entry, ids: &[i64]) -> bool {
        let result = self.union_ids_impl(group, ids);
        self.status.record(result).is_some()
    }

    fn union_ids_impl(&mut self, group: &Entry, ids: &[i64]) -> StudyResult<bool> {
        let (selection_type, main) = self.group_context(group)?;
        for &id in ids {
            let sub = self
                .study
                .kernel()
                .sub_shape(&main, id)
                .ok_or(StudyError::SubShapeNotFound)?;
            if sub.shape_type != selection_type {
                return Err(StudyError::MismatchedSubShape {
                    expected: selection_type,
                    found: sub.shape_type,
                });
            }
        }
        self.study.union_indices(group, ids)
    }

    /// 组的选择类型和主形状的当前流
    fn group_context(&self, group: &Entry) -> StudyResult<(ShapeType, Vec<u8>)> {
        let selection_type = self
            .study
            .entity_or_err(group)?
            .selection()
            .map(|selection| selection.selection_type)
            .ok_or_else(|| StudyError::WrongKind {
                entry: group.to_string(),
                expected: "group",
            })?;
        let main = self
            .study
            .main_shape(group)
            .and_then(|main| main.shape())
            .map(|data| data.stream().to_vec())
            .ok_or_else(|| StudyError::NotPublished(group.to_string()))?;
        Ok((selection_type, main))
    }

    pub fn get_main_shape(&mut self, group: &Entry) -> Option<Entry> {
        let result = self
            .study
            .main_shape(group)
            .map(|main| main.entry().clone())
            .ok_or_else(|| StudyError::UnknownEntry(group.to_string()));
        self.status.record(result)
    }

    pub fn get_type(&mut self, group: &Entry) -> Option<ShapeType> {
        let result = self
            .study
            .entity_or_err(group)
            .map(|entity| entity.selection().map(|s| s.selection_type));
        self.status.record(result).flatten()
    }

    /// 组中子形状的全局索引，按加入顺序
    pub fn get_objects(&mut self, group: &Entry) -> Vec<i64> {
        let result = self.study.entity_or_err(group).map(|entity| {
            entity
                .selection()
                .map(|s| s.indices().to_vec())
                .unwrap_or_default()
        });
        self.status.record(result).unwrap_or_default()
    }
}

// ========== 子形状 ==========

pub struct ShapesOperations<'a> {
    study: &'a Study,
    status: OperationStatus,
}

impl<'a> ShapesOperations<'a> {
    pub fn new(study: &'a Study) -> Self {
        Self {
            study,
            status: OperationStatus::default(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    pub fn error_code(&self) -> &str {
        self.status.error_code()
    }

    fn stream_of(&self, main: &Entry) -> StudyResult<Cow<'a, [u8]>> {
        self.study
            .shape_stream(main)
            .ok_or_else(|| StudyError::UnknownEntry(main.to_string()))
    }

    pub fn get_all_sub_shapes_ids(
        &mut self,
        main: &Entry,
        shape_type: ShapeType,
        sorted: bool,
    ) -> Vec<i64> {
        let result = self
            .stream_of(main)
            .map(|stream| self.study.kernel().all_sub_shape_ids(&stream, shape_type, sorted));
        self.status.record(result).unwrap_or_default()
    }

    pub fn get_sub_shape(&mut self, main: &Entry, id: i64) -> Option<SubShape> {
        let result = self.stream_of(main).and_then(|stream| {
            self.study
                .kernel()
                .sub_shape(&stream, id)
                .ok_or(StudyError::SubShapeNotFound)
        });
        self.status.record(result)
    }

    pub fn get_sub_shape_index(&mut self, main: &Entry, sub: ShapeArg<'_>) -> Option<i64> {
        let result = self.index_impl(main, sub, false);
        self.status.record(result)
    }

    /// 子形状在同类型子形状中的编号
    pub fn get_topology_index(&mut self, main: &Entry, sub: ShapeArg<'_>) -> Option<i64> {
        let result = self.index_impl(main, sub, true);
        self.status.record(result)
    }

    fn index_impl(&self, main: &Entry, sub: ShapeArg<'_>, topological: bool) -> StudyResult<i64> {
        let main = self.stream_of(main)?;
        let (sub, _) = sub.resolve(self.study)?;
        let kernel = self.study.kernel();
        let index = if topological {
            kernel.topology_index(&main, &sub)
        } else {
            kernel.sub_shape_index(&main, &sub)
        };
        index.ok_or(StudyError::SubShapeNotFound)
    }

    pub fn extract_sub_shapes(
        &mut self,
        main: &Entry,
        shape_type: ShapeType,
        sorted: bool,
    ) -> Vec<SubShape> {
        let result = self
            .stream_of(main)
            .map(|stream| self.study.kernel().extract_sub_shapes(&stream, shape_type, sorted));
        self.status.record(result).unwrap_or_default()
    }

    pub fn get_shared_shapes(
        &mut self,
        first: ShapeArg<'_>,
        second: ShapeArg<'_>,
        shape_type: ShapeType,
    ) -> Vec<SubShape> {
        let result = first.resolve(self.study).and_then(|(first, _)| {
            let (second, _) = second.resolve(self.study)?;
            Ok(self
                .study
                .kernel()
                .shared_shapes(&first, &second, shape_type))
        });
        self.status.record(result).unwrap_or_default()
    }

    pub fn get_shape_type(&mut self, shape: ShapeArg<'_>) -> Option<ShapeType> {
        let result = shape.resolve(self.study).map(|(_, shape_type)| shape_type);
        self.status.record(result)
    }

    pub fn number_of_edges(&mut self, shape: ShapeArg<'_>) -> Option<usize> {
        self.count(shape, ShapeType::Edge)
    }

    pub fn number_of_faces(&mut self, shape: ShapeArg<'_>) -> Option<usize> {
        self.count(shape, ShapeType::Face)
    }

    fn count(&mut self, shape: ShapeArg<'_>, shape_type: ShapeType) -> Option<usize> {
        let result = shape
            .resolve(self.study)
            .map(|(stream, _)| self.study.kernel().count(&stream, shape_type));
        self.status.record(result)
    }

    /// 子形状的默认名称，如 `EDGE_2`
    pub fn sub_shape_name(&mut self, main: &Entry, sub: ShapeArg<'_>) -> Option<String> {
        let result = sub.resolve(self.study).and_then(|(_, shape_type)| {
            let index = self.index_impl(main, sub, true)?;
            Ok(format!("{}_{}", shape_type.name(), index))
        });
        self.status.record(result)
    }
}

// ========== 测量 ==========

pub struct MeasureOperations<'a> {
    study: &'a Study,
    status: OperationStatus,
}

impl<'a> MeasureOperations<'a> {
    pub fn new(study: &'a Study) -> Self {
        Self {
            study,
            status: OperationStatus::default(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    pub fn error_code(&self) -> &str {
        self.status.error_code()
    }

    fn vertex_query<T>(
        &mut self,
        shape: ShapeArg<'_>,
        query: impl FnOnce(&[u8]) -> Option<T>,
    ) -> Option<T> {
        let result = shape.resolve(self.study).and_then(|(stream, shape_type)| {
            query(stream.as_ref()).ok_or(StudyError::WrongKind {
                entry: shape_type.name().to_string(),
                expected: "vertex",
            })
        });
        self.status.record(result)
    }

    pub fn point_coordinates(&mut self, vertex: ShapeArg<'_>) -> Option<Point3<f64>> {
        let study = self.study;
        self.vertex_query(vertex, |stream| study.kernel().point_coordinates(stream))
    }

    pub fn tolerance(&mut self, vertex: ShapeArg<'_>) -> Option<f64> {
        let study = self.study;
        self.vertex_query(vertex, |stream| study.kernel().tolerance(stream))
    }

    pub fn min_distance(&mut self, first: ShapeArg<'_>, second: ShapeArg<'_>) -> Option<f64> {
        let result = second.resolve(self.study).and_then(|(second, _)| {
            let (first, _) = first.resolve(self.study)?;
            self.study
                .kernel()
                .min_distance(&first, &second)
                .ok_or(StudyError::SubShapeNotFound)
        });
        self.status.record(result)
    }

    /// 边的第 `index` 个顶点（0 为起点，其余为终点）
    pub fn get_vertex_by_index(
        &mut self,
        edge: ShapeArg<'_>,
        index: usize,
        use_orientation: bool,
    ) -> Option<SubShape> {
        let result = edge.resolve(self.study).and_then(|(stream, shape_type)| {
            self.study
                .kernel()
                .vertex_by_index(&stream, index, use_orientation)
                .ok_or(StudyError::WrongKind {
                    entry: shape_type.name().to_string(),
                    expected: "edge",
                })
        });
        self.status.record(result)
    }
}

// ========== 场 ==========

pub struct FieldOperations<'a> {
    study: &'a mut Study,
    status: OperationStatus,
}

impl<'a> FieldOperations<'a> {
    pub fn new(study: &'a mut Study) -> Self {
        Self {
            study,
            status: OperationStatus::default(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }

    pub fn error_code(&self) -> &str {
        self.status.error_code()
    }

    /// 创建场；`shape_type` 为 [`ShapeType::Shape`] 时场定义在整个形状上
    pub fn create_field(
        &mut self,
        main: &Entry,
        shape_type: ShapeType,
        value_kind: ValueKind,
        components: &[&str],
    ) -> Option<Entry> {
        let components = components.iter().map(|c| c.to_string()).collect();
        let result = self
            .study
            .create_field(main, shape_type, value_kind, components);
        self.status.record(result)
    }

    pub fn add_step(&mut self, field: &Entry, step: u32, stamp: i64, values: StepValues) -> bool {
        let result = self.study.add_field_step(field, step, stamp, values);
        self.status.record(result).is_some()
    }

    /// 形状上的活场：先是已发布的（按树中顺序），再是未发布的（按 entry）
    pub fn get_fields(&mut self, shape: &Entry) -> Vec<Entry> {
        let result = self.study.entity_or_err(shape).map(|_| {
            let mut fields: Vec<Entry> = self
                .study
                .sub_entities(shape)
                .into_iter()
                .filter(|e| e.kind().is_field() && !e.is_dead())
                .map(|e| e.entry().clone())
                .collect();
            let mut loose: Vec<Entry> = self
                .study
                .registry()
                .iter()
                .filter(|e| e.kind().is_field() && !e.is_dead() && e.node().is_none())
                .filter(|e| e.owner() == Some(shape))
                .map(|e| e.entry().clone())
                .collect();
            loose.sort();
            fields.extend(loose);
            fields
        });
        self.status.record(result).unwrap_or_default()
    }

    pub fn get_dimension(&mut self, field: &Entry) -> Option<i32> {
        let result = self.field_selection_type(field);
        self.status.record(result).map(ShapeType::dimension)
    }

    pub fn get_value_kind(&mut self, field: &Entry) -> Option<ValueKind> {
        let result = self.with_field(field, |data| data.value_kind);
        self.status.record(result)
    }

    pub fn get_components(&mut self, field: &Entry) -> Vec<String> {
        let result = self.with_field(field, |data| data.components.clone());
        self.status.record(result).unwrap_or_default()
    }

    pub fn get_steps(&mut self, field: &Entry) -> Vec<u32> {
        let result = self.with_field(field, |data| data.step_ids());
        self.status.record(result).unwrap_or_default()
    }

    pub fn get_step(&mut self, field: &Entry, step: u32) -> Option<FieldStep> {
        let result = self
            .with_field(field, |data| data.step(step).cloned())
            .and_then(|found| {
                found.ok_or_else(|| StudyError::InvalidFieldStep(format!("no step {}", step)))
            });
        self.status.record(result)
    }

    fn field_selection_type(&self, field: &Entry) -> StudyResult<ShapeType> {
        self.with_field(field, |data| data.selection.selection_type)
    }

    fn with_field<T>(
        &self,
        field: &Entry,
        read: impl FnOnce(&FieldData) -> T,
    ) -> StudyResult<T> {
        self.study
            .entity_or_err(field)?
            .field()
            .map(read)
            .ok_or_else(|| StudyError::WrongKind {
                entry: field.to_string(),
                expected: "field",
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::samples::{BOX_SOLID, SQUARE_FACE};
    use crate::listing::ListingKernel;

    fn square_study() -> (Study, Entry) {
        let mut study = Study::new(ListingKernel::new());
        let face = Entry::new("0:1:2").unwrap();
        study
            .publish_shape(&face, "Face_1", SQUARE_FACE.into(), None)
            .unwrap();
        (study, face)
    }

    #[test]
    fn test_union_list_all_edges_twice() {
        let (mut study, face) = square_study();
        let edges = study
            .shapes_operations()
            .extract_sub_shapes(&face, ShapeType::Edge, false);
        assert_eq!(edges.len(), 4);
        let expected: Vec<i64> = edges
            .iter()
            .map(|e| {
                study
                    .shapes_operations()
                    .get_sub_shape_index(&face, e.into())
                    .unwrap()
            })
            .collect();

        let mut groups = study.group_operations();
        let group = groups.create_group(&face, ShapeType::Edge).unwrap();
        let args: Vec<ShapeArg> = edges.iter().map(ShapeArg::Sub).collect();
        assert!(groups.union_list(&group, &args));
        assert!(groups.union_list(&group, &args));
        assert!(groups.is_done());

        assert_eq!(groups.get_objects(&group), expected);
        assert_eq!(expected, vec![3, 6, 8, 10]);
        assert_eq!(groups.get_main_shape(&group), Some(face.clone()));
        assert_eq!(groups.get_type(&group), Some(ShapeType::Edge));
    }

    #[test]
    fn test_union_list_rejects_wrong_kind() {
        let (mut study, face) = square_study();
        let vertex = study
            .shapes_operations()
            .get_sub_shape(&face, 4)
            .unwrap();

        let mut groups = study.group_operations();
        let group = groups.create_group(&face, ShapeType::Edge).unwrap();
        assert!(!groups.union_list(&group, &[ShapeArg::from(&vertex)]));
        assert!(!groups.is_done());
        assert!(groups.error_code().contains("can not be added"));
        assert!(groups.get_objects(&group).is_empty());
        assert!(groups.is_done());

        assert!(!groups.union_ids(&group, &[4]));
        assert!(groups.union_ids(&group, &[6, 3]));
        assert_eq!(groups.get_objects(&group), vec![6, 3]);
    }

    #[test]
    fn test_create_group_unsupported_type() {
        let (mut study, face) = square_study();
        let mut groups = study.group_operations();
        assert_eq!(groups.create_group(&face, ShapeType::Compound), None);
        assert!(!groups.is_done());
        assert!(!groups.error_code().is_empty());
    }

    #[test]
    fn test_sub_shape_queries() {
        let (study, face) = square_study();
        let mut shapes = study.shapes_operations();

        assert_eq!(
            shapes.get_all_sub_shapes_ids(&face, ShapeType::Vertex, false),
            vec![4, 5, 7, 9]
        );
        assert_eq!(shapes.number_of_edges(ShapeArg::from(&face)), Some(4));
        assert_eq!(shapes.number_of_faces(ShapeArg::from(&face)), Some(1));
        assert_eq!(shapes.get_shape_type(ShapeArg::from(&face)), Some(ShapeType::Face));

        let edge = shapes.get_sub_shape(&face, 6).unwrap();
        assert_eq!(shapes.get_topology_index(&face, (&edge).into()), Some(2));
        assert_eq!(
            shapes.sub_shape_name(&face, (&edge).into()),
            Some("EDGE_2".to_string())
        );

        let other = Entry::new("0:1:3").unwrap();
        assert!(shapes.get_sub_shape(&other, 1).is_none());
        assert!(!shapes.is_done());
    }

    #[test]
    fn test_shared_shapes() {
        let (study, face) = square_study();
        let mut shapes = study.shapes_operations();
        let e1 = shapes.get_sub_shape(&face, 3).unwrap();
        let e2 = shapes.get_sub_shape(&face, 6).unwrap();
        let shared = shapes.get_shared_shapes((&e1).into(), (&e2).into(), ShapeType::Vertex);
        assert_eq!(shared.len(), 1);
        assert_eq!(
            shapes.get_sub_shape_index(&face, (&shared[0]).into()),
            Some(5)
        );
    }

    #[test]
    fn test_measurements() {
        let (study, face) = square_study();
        let (v1, v4, e4) = {
            let mut shapes = study.shapes_operations();
            (
                shapes.get_sub_shape(&face, 4).unwrap(),
                shapes.get_sub_shape(&face, 9).unwrap(),
                shapes.get_sub_shape(&face, 10).unwrap(),
            )
        };

        let mut measure = study.measure_operations();
        assert_eq!(
            measure.point_coordinates((&v4).into()),
            Some(Point3::new(0.0, 10.0, 0.0))
        );
        assert_eq!(measure.tolerance((&v4).into()), Some(0.001));
        assert_eq!(measure.min_distance((&v1).into(), (&v4).into()), Some(10.0));

        // e4 是反向边：v4 -> v1
        let first = measure.get_vertex_by_index((&e4).into(), 0, false).unwrap();
        assert_eq!(measure.point_coordinates((&first).into()), Some(Point3::new(0.0, 10.0, 0.0)));
        let oriented = measure.get_vertex_by_index((&e4).into(), 0, true).unwrap();
        assert_eq!(
            measure.point_coordinates((&oriented).into()),
            Some(Point3::origin())
        );

        assert_eq!(measure.point_coordinates((&e4).into()), None);
        assert!(!measure.is_done());
    }

    #[test]
    fn test_field_steps() {
        let mut study = Study::new(ListingKernel::new());
        let shape = Entry::new("0:1:1").unwrap();
        study
            .publish_shape(&shape, "Box", BOX_SOLID.into(), None)
            .unwrap();

        let mut fields = study.field_operations();
        let field = fields
            .create_field(&shape, ShapeType::Face, ValueKind::Double, &["A B", "C|D"])
            .unwrap();
        assert!(fields.add_step(&field, 1, 10, StepValues::Double(vec![1.0, 2.0])));
        assert!(fields.add_step(&field, 2, 20, StepValues::Double(vec![3.0, 4.5])));
        assert!(!fields.add_step(&field, 4, 40, StepValues::Double(vec![0.0, 0.0])));
        assert!(!fields.add_step(&field, 3, 30, StepValues::Int(vec![1, 2])));
        assert!(!fields.add_step(&field, 3, 30, StepValues::Double(vec![1.0])));

        assert_eq!(fields.get_components(&field), vec!["A B", "C|D"]);
        assert_eq!(fields.get_steps(&field), vec![1, 2]);
        assert_eq!(fields.get_dimension(&field), Some(2));
        assert_eq!(fields.get_value_kind(&field), Some(ValueKind::Double));
        let step = fields.get_step(&field, 2).unwrap();
        assert_eq!(step.stamp, 20);
        assert_eq!(step.values, StepValues::Double(vec![3.0, 4.5]));
        assert!(fields.get_step(&field, 3).is_none());
        assert_eq!(fields.get_fields(&shape), vec![field.clone()]);

        let whole = fields
            .create_field(&shape, ShapeType::Shape, ValueKind::Int, &["n"])
            .unwrap();
        assert_eq!(fields.get_dimension(&whole), Some(-1));
        assert_eq!(fields.get_fields(&shape).len(), 2);
    }
}
