//! 形状归档
//!
//! 活形状及其组、场可以导出为归档；归档可以导回到一个死亡形状中，
//! 替换它的几何，并按显示名称恢复死亡组/场的选择和时间步。
//! 文件读写在 shaperstudy-file 中。

use crate::entity::{
    EntityBody, EntityKind, Entry, FieldData, FieldStep, SelectionData, ValueKind,
};
use crate::error::{StudyError, StudyResult};
use crate::kernel::ShapeType;
use crate::study::Study;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub author: String,

    /// 形状流；导入时必须存在
    pub shape: Option<Vec<u8>>,

    pub groups: Vec<ArchiveGroup>,
    pub fields: Vec<ArchiveField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveGroup {
    pub name: String,
    pub dimension: ShapeType,
    pub elements: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveField {
    pub name: String,
    pub dimension: ShapeType,
    pub elements: Vec<i64>,
    pub value_kind: ValueKind,
    pub components: Vec<String>,
    pub steps: Vec<FieldStep>,
}

impl Study {
    /// 把形状和直接发布在它下面的组、场导出为归档
    pub fn export_archive(&self, entry: &Entry, author: &str) -> StudyResult<Archive> {
        let entity = self.entity_or_err(entry)?;
        let data = entity.shape().ok_or_else(|| StudyError::WrongKind {
            entry: entry.to_string(),
            expected: "shape",
        })?;

        let mut archive = Archive {
            author: author.to_string(),
            shape: Some(data.stream().to_vec()),
            ..Default::default()
        };
        for sub in self.sub_entities(entry) {
            let name = sub
                .node()
                .and_then(|node| self.tree.name(node))
                .unwrap_or_default()
                .to_string();
            match sub.body() {
                EntityBody::Group(selection) => archive.groups.push(ArchiveGroup {
                    name,
                    dimension: selection.selection_type,
                    elements: selection.indices().to_vec(),
                }),
                EntityBody::Field(field) => archive.fields.push(ArchiveField {
                    name,
                    dimension: field.selection.selection_type,
                    elements: field.selection.indices().to_vec(),
                    value_kind: field.value_kind,
                    components: field.components.clone(),
                    steps: field.steps().to_vec(),
                }),
                EntityBody::Shape(_) => {}
            }
        }
        Ok(archive)
    }

    /// 把归档导入死亡形状；返回更新的组/场个数
    ///
    /// 先完成全部校验再修改：归档没有形状、目标不是死亡形状、
    /// 场的时间步不合法时，什么都不改变。
    pub fn import_archive(&mut self, dead: &Entry, archive: &Archive) -> StudyResult<usize> {
        if self.entity_or_err(dead)?.kind() != EntityKind::DeadShape {
            return Err(StudyError::WrongKind {
                entry: dead.to_string(),
                expected: "dead shape",
            });
        }
        let stream = archive.shape.clone().ok_or(StudyError::MissingArchiveShape)?;

        let mut updates = Vec::new();
        for sub in self.sub_entities(dead) {
            let name = sub
                .node()
                .and_then(|node| self.tree.name(node))
                .unwrap_or_default();
            let body = match sub.body() {
                EntityBody::Group(selection) => archive
                    .groups
                    .iter()
                    .find(|g| g.name == name && g.dimension == selection.selection_type)
                    .map(|g| {
                        EntityBody::Group(SelectionData::restore(
                            g.dimension,
                            g.elements.clone(),
                            g.elements.clone(),
                        ))
                    }),
                EntityBody::Field(_) => match archive.fields.iter().find(|f| f.name == name) {
                    Some(f) => {
                        let selection =
                            SelectionData::restore(f.dimension, f.elements.clone(), f.elements.clone());
                        let mut data = FieldData::new(selection, f.value_kind, f.components.clone());
                        data.replace_steps(f.steps.clone())?;
                        Some(EntityBody::Field(data))
                    }
                    None => None,
                },
                EntityBody::Shape(_) => continue,
            };
            match body {
                Some(body) => updates.push((sub.entry().clone(), body)),
                None => tracing::warn!("No archive data for '{}' ({})", name, sub.entry()),
            }
        }

        if let Some(data) = self.entity_mut_or_err(dead)?.shape_mut() {
            data.replace(stream);
        }
        let count = updates.len();
        for (entry, body) in updates {
            self.entity_mut_or_err(&entry)?.body = body;
        }
        tracing::info!(
            "Archive by '{}' imported into {}: {} groups/fields restored",
            archive.author,
            dead,
            count
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::StepValues;
    use crate::listing::samples::{BOX_SOLID, BOX_SOLID_V2, BOX_SOLID_V3};
    use crate::listing::ListingKernel;

    fn study_with_groups() -> (Study, Entry, Entry) {
        let mut study = Study::new(ListingKernel::new());
        let shape = Entry::new("0:1:1").unwrap();
        study
            .publish_shape(&shape, "Box", BOX_SOLID.into(), None)
            .unwrap();
        study
            .publish_shape(&shape, "Box", BOX_SOLID_V2.into(), None)
            .unwrap();

        let group = study.create_group(&shape, ShapeType::Face).unwrap();
        study.set_selection(&group, vec![3]).unwrap();
        study.add_in_study(&group, "Top", Some(&shape)).unwrap();

        let field = study
            .create_field(&shape, ShapeType::Face, ValueKind::Int, vec!["n".into()])
            .unwrap();
        study.set_selection(&field, vec![3, 4]).unwrap();
        study
            .add_field_step(&field, 1, 0, StepValues::Int(vec![1, 2]))
            .unwrap();
        study.add_in_study(&field, "Count", Some(&shape)).unwrap();

        let (dead, _) = study.make_dead(&shape).unwrap();
        (study, shape, dead)
    }

    #[test]
    fn test_export_live_shape() {
        let (study, shape, _) = study_with_groups();
        let archive = study.export_archive(&shape, "tester").unwrap();
        assert_eq!(archive.shape.as_deref(), Some(BOX_SOLID_V2.as_bytes()));
        assert_eq!(archive.groups.len(), 1);
        assert_eq!(archive.groups[0].name, "Top");
        assert_eq!(archive.groups[0].elements, vec![3]);
        assert_eq!(archive.fields.len(), 1);
        assert_eq!(archive.fields[0].steps.len(), 1);
    }

    #[test]
    fn test_import_into_dead_shape() {
        let (mut study, _, dead) = study_with_groups();
        let archive = Archive {
            author: "tester".into(),
            shape: Some(BOX_SOLID_V3.as_bytes().to_vec()),
            groups: vec![ArchiveGroup {
                name: "Top".into(),
                dimension: ShapeType::Face,
                elements: vec![4],
            }],
            fields: vec![ArchiveField {
                name: "Count".into(),
                dimension: ShapeType::Face,
                elements: vec![4],
                value_kind: ValueKind::Int,
                components: vec!["n".into()],
                steps: vec![
                    FieldStep {
                        stamp: 5,
                        values: StepValues::Int(vec![7]),
                    },
                    FieldStep {
                        stamp: 6,
                        values: StepValues::Int(vec![8]),
                    },
                ],
            }],
        };

        assert_eq!(study.import_archive(&dead, &archive).unwrap(), 2);
        let data = study.entity(&dead).unwrap().shape().unwrap();
        assert_eq!(data.stream(), BOX_SOLID_V3.as_bytes());

        let subs = study.sub_entities(&dead);
        let group = subs.iter().find(|e| !e.kind().is_field()).unwrap();
        assert_eq!(group.selection().unwrap().indices(), &[4]);
        let field = subs.iter().find(|e| e.kind().is_field()).unwrap();
        assert_eq!(field.field().unwrap().steps().len(), 2);
    }

    #[test]
    fn test_import_without_shape_changes_nothing() {
        let (mut study, _, dead) = study_with_groups();
        let before = study.entity(&dead).unwrap().shape().unwrap().clone();
        let archive = Archive {
            groups: vec![ArchiveGroup {
                name: "Top".into(),
                dimension: ShapeType::Face,
                elements: vec![4],
            }],
            ..Default::default()
        };

        assert!(matches!(
            study.import_archive(&dead, &archive),
            Err(StudyError::MissingArchiveShape)
        ));
        assert_eq!(study.entity(&dead).unwrap().shape().unwrap(), &before);
        let group = study.sub_entities(&dead)[0];
        assert_eq!(group.selection().unwrap().indices(), &[3]);
    }

    #[test]
    fn test_import_into_live_shape_is_rejected() {
        let (mut study, shape, _) = study_with_groups();
        let archive = study.export_archive(&shape, "tester").unwrap();
        assert!(study.import_archive(&shape, &archive).is_err());
    }

    #[test]
    fn test_invalid_field_steps_abort_import() {
        let (mut study, _, dead) = study_with_groups();
        let archive = Archive {
            shape: Some(BOX_SOLID_V3.as_bytes().to_vec()),
            fields: vec![ArchiveField {
                name: "Count".into(),
                dimension: ShapeType::Face,
                elements: vec![4],
                value_kind: ValueKind::Int,
                components: vec!["n".into()],
                steps: vec![FieldStep {
                    stamp: 0,
                    values: StepValues::Double(vec![1.0]),
                }],
            }],
            ..Default::default()
        };
        assert!(study.import_archive(&dead, &archive).is_err());
        let data = study.entity(&dead).unwrap().shape().unwrap();
        assert_eq!(data.stream(), BOX_SOLID.as_bytes());
    }
}
