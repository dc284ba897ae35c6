//! 组件字节流
//!
//! 组件子树中每个发布的实体按遍历顺序（先父后子，同级按 tag）写成
//! 一条三字段记录，字段之间、记录之间都用 `|` 分隔：
//!
//! ```text
//! 形状: "<entry> <tick>" | <当前形状流> | <上一版本形状流>
//! 组:   "<entry>" | "<选择类型>" | "<索引...>;<旧索引...>"
//! 场:   "<entry>" | "<选择类型> <数据类型> <步数> <分量数> <分量...> <每步取值数> [<时间戳> <取值...>]..." | "<索引...>;<旧索引...>"
//! ```
//!
//! 分量名和字符串取值中的空格、`|` 被替换为 `__space__`、`__pipe__`；
//! 本身含有这两个记号的文本无法还原，保存时报错。
//! 加载时先解析整个缓冲区，出错时不修改注册表。

use crate::error::FileError;
use shaperstudy_core::entity::{
    Entity, EntityBody, EntityKind, Entry, FieldData, SelectionData, StepValues, ValueKind,
};
use shaperstudy_core::kernel::ShapeType;
use shaperstudy_core::shape::ShapeData;
use shaperstudy_core::study::Study;
use shaperstudy_core::tree::NodeId;
use std::collections::HashSet;
use std::str::FromStr;

/// 字段分隔符
const DELIMITER: u8 = b'|';

/// 每条记录的字段数
const RECORD_FIELDS: usize = 3;

const SPACE_TOKEN: &str = "__space__";
const PIPE_TOKEN: &str = "__pipe__";

fn escape(entry: &Entry, text: &str) -> Result<String, FileError> {
    if text.contains(SPACE_TOKEN) || text.contains(PIPE_TOKEN) {
        return Err(FileError::ReservedToken {
            entry: entry.to_string(),
            text: text.to_string(),
        });
    }
    Ok(text.replace(' ', SPACE_TOKEN).replace('|', PIPE_TOKEN))
}

fn unescape(token: &str) -> String {
    token.replace(PIPE_TOKEN, "|").replace(SPACE_TOKEN, " ")
}

fn invalid(message: impl Into<String>) -> FileError {
    FileError::InvalidFormat(message.into())
}

// ========== 保存 ==========

/// 把组件子树中发布的实体写成字节流
pub fn save(study: &Study) -> Result<Vec<u8>, FileError> {
    let mut buffer = Vec::new();
    let mut records = 0;
    for (_, entity) in study.published() {
        for (i, field) in encode(entity)?.iter().enumerate() {
            if records > 0 || i > 0 {
                buffer.push(DELIMITER);
            }
            buffer.extend_from_slice(field);
        }
        records += 1;
    }

    tracing::info!("Saved {} records ({} bytes)", records, buffer.len());
    Ok(buffer)
}

fn encode(entity: &Entity) -> Result<[Vec<u8>; RECORD_FIELDS], FileError> {
    let entry = entity.entry();
    match entity.body() {
        EntityBody::Shape(data) => {
            if data.stream().contains(&DELIMITER) || data.old_stream().contains(&DELIMITER) {
                return Err(FileError::DelimiterInStream(entry.to_string()));
            }
            Ok([
                format!("{} {}", entry, entity.tick()).into_bytes(),
                data.stream().to_vec(),
                data.old_stream().to_vec(),
            ])
        }
        EntityBody::Group(selection) => Ok([
            entry.to_string().into_bytes(),
            selection.selection_type.as_i32().to_string().into_bytes(),
            encode_selection(selection).into_bytes(),
        ]),
        EntityBody::Field(field) => Ok([
            entry.to_string().into_bytes(),
            encode_field(entry, field)?.into_bytes(),
            encode_selection(&field.selection).into_bytes(),
        ]),
    }
}

fn join_indices(indices: &[i64]) -> String {
    indices
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn encode_selection(selection: &SelectionData) -> String {
    format!(
        "{};{}",
        join_indices(selection.indices()),
        join_indices(selection.old_indices())
    )
}

fn encode_field(entry: &Entry, field: &FieldData) -> Result<String, FileError> {
    let mut tokens = vec![
        field.selection.selection_type.as_i32().to_string(),
        field.value_kind.as_i32().to_string(),
        field.steps().len().to_string(),
        field.components.len().to_string(),
    ];
    for component in &field.components {
        tokens.push(escape(entry, component)?);
    }
    tokens.push(field.values_per_step().to_string());
    for step in field.steps() {
        tokens.push(step.stamp.to_string());
        match &step.values {
            StepValues::Bool(values) => tokens.extend(
                values
                    .iter()
                    .map(|&v| if v { "1" } else { "0" }.to_string()),
            ),
            StepValues::Int(values) => tokens.extend(values.iter().map(i64::to_string)),
            StepValues::Double(values) => tokens.extend(values.iter().map(f64::to_string)),
            StepValues::String(values) => {
                for value in values {
                    tokens.push(escape(entry, value)?);
                }
            }
        }
    }
    Ok(tokens.join(" "))
}

// ========== 加载 ==========

/// 用字节流重建注册表；返回实体个数
///
/// 注册表和导出名称表先被清空。实体与树节点的绑定在
/// [`Study::restore_reference`] 时完成。
pub fn load(study: &mut Study, buffer: &[u8]) -> Result<usize, FileError> {
    let entities = parse(buffer)?;
    study.reset_for_load();
    let count = study.insert_loaded(entities)?;

    tracing::info!("Loaded {} entities ({} bytes)", count, buffer.len());
    Ok(count)
}

/// 解析整个字节流；任何一条记录不合法都会使整个解析失败
pub fn parse(buffer: &[u8]) -> Result<Vec<Entity>, FileError> {
    if buffer.is_empty() {
        return Ok(Vec::new());
    }
    let fields: Vec<&[u8]> = buffer.split(|&b| b == DELIMITER).collect();
    if fields.len() % RECORD_FIELDS != 0 {
        return Err(invalid(format!(
            "{} fields do not form complete records",
            fields.len()
        )));
    }

    let mut seen = HashSet::new();
    let mut entities = Vec::with_capacity(fields.len() / RECORD_FIELDS);
    for (i, record) in fields.chunks_exact(RECORD_FIELDS).enumerate() {
        let entity = decode(record).map_err(|e| match e {
            FileError::InvalidFormat(message) => invalid(format!("record {}: {}", i, message)),
            other => other,
        })?;
        if !seen.insert(entity.entry().clone()) {
            return Err(invalid(format!("duplicate entry {}", entity.entry())));
        }
        entities.push(entity);
    }
    Ok(entities)
}

fn text<'a>(field: &'a [u8], what: &str) -> Result<&'a str, FileError> {
    std::str::from_utf8(field).map_err(|_| invalid(format!("{} is not UTF-8", what)))
}

fn decode(record: &[&[u8]]) -> Result<Entity, FileError> {
    let head = text(record[0], "entry")?;
    let (entry_text, tick) = match head.rsplit_once(' ') {
        Some((entry, tick)) => (entry, parse_number::<u32>(tick, "tick")?),
        None => (head, 1),
    };
    let entry = Entry::new(entry_text).map_err(|_| invalid(format!("bad entry '{}'", entry_text)))?;

    let kind = EntityKind::from_entry(&entry);
    if kind.is_shape() {
        let data = ShapeData::restore(record[1].to_vec(), record[2].to_vec());
        return Ok(Entity::new_shape(entry, data).with_tick(tick));
    }

    let selection_text = text(record[2], "selection")?;
    if kind.is_field() {
        let description = text(record[1], "field description")?;
        return decode_field(entry, description, selection_text);
    }

    let selection_type = shape_type(parse_number(text(record[1], "selection type")?.trim(), "selection type")?)?;
    let (indices, old_indices) = decode_selection(selection_text)?;
    Ok(Entity::new_group(
        entry,
        SelectionData::restore(selection_type, indices, old_indices),
    ))
}

fn parse_number<T: FromStr>(token: &str, what: &str) -> Result<T, FileError> {
    token
        .parse()
        .map_err(|_| invalid(format!("bad {} '{}'", what, token)))
}

fn shape_type(value: i32) -> Result<ShapeType, FileError> {
    ShapeType::from_i32(value).ok_or_else(|| invalid(format!("unknown shape type {}", value)))
}

fn decode_indices(text: &str) -> Result<Vec<i64>, FileError> {
    text.split_whitespace()
        .map(|token| parse_number(token, "index"))
        .collect()
}

fn decode_selection(text: &str) -> Result<(Vec<i64>, Vec<i64>), FileError> {
    let (current, old) = text
        .split_once(';')
        .ok_or_else(|| invalid("selection without ';'"))?;
    Ok((decode_indices(current)?, decode_indices(old)?))
}

/// 以单个空格分隔的记号流（保留空记号）
struct Tokens<'a> {
    inner: std::str::Split<'a, char>,
}

impl<'a> Tokens<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            inner: text.split(' '),
        }
    }

    fn token(&mut self, what: &str) -> Result<&'a str, FileError> {
        self.inner
            .next()
            .ok_or_else(|| invalid(format!("missing {}", what)))
    }

    fn number<T: FromStr>(&mut self, what: &str) -> Result<T, FileError> {
        let token = self.token(what)?;
        parse_number(token, what)
    }

    fn values(&mut self, kind: ValueKind, count: usize) -> Result<StepValues, FileError> {
        Ok(match kind {
            ValueKind::Bool => StepValues::Bool(
                (0..count)
                    .map(|_| match self.token("value")? {
                        "1" | "true" => Ok(true),
                        "0" | "false" => Ok(false),
                        other => Err(invalid(format!("bad bool '{}'", other))),
                    })
                    .collect::<Result<_, _>>()?,
            ),
            ValueKind::Int => StepValues::Int(
                (0..count)
                    .map(|_| self.number("value"))
                    .collect::<Result<_, _>>()?,
            ),
            ValueKind::Double => StepValues::Double(
                (0..count)
                    .map(|_| self.number("value"))
                    .collect::<Result<_, _>>()?,
            ),
            ValueKind::String => StepValues::String(
                (0..count)
                    .map(|_| self.token("value").map(unescape))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    fn finish(mut self) -> Result<(), FileError> {
        match self.inner.next() {
            Some(extra) => Err(invalid(format!("unexpected token '{}'", extra))),
            None => Ok(()),
        }
    }
}

fn decode_field(entry: Entry, description: &str, selection: &str) -> Result<Entity, FileError> {
    let mut tokens = Tokens::new(description);
    let selection_type = shape_type(tokens.number("selection type")?)?;
    let value_kind = tokens.number("value kind")?;
    let value_kind = ValueKind::from_i32(value_kind)
        .ok_or_else(|| invalid(format!("unknown value kind {}", value_kind)))?;
    let step_count: u32 = tokens.number("step count")?;
    let component_count: usize = tokens.number("component count")?;
    let components = (0..component_count)
        .map(|_| tokens.token("component").map(unescape))
        .collect::<Result<Vec<_>, _>>()?;
    let values_per_step: usize = tokens.number("values per step")?;

    let (indices, old_indices) = decode_selection(selection)?;
    let mut data = FieldData::new(
        SelectionData::restore(selection_type, indices, old_indices),
        value_kind,
        components,
    );
    for step in 1..=step_count {
        let stamp = tokens.number("stamp")?;
        let values = tokens.values(value_kind, values_per_step)?;
        data.add_step(step, stamp, values)?;
    }
    tokens.finish()?;

    Ok(Entity::new_field(entry, data))
}

// ========== 持久ID ==========

/// 组件子树中每个发布节点的持久ID，按遍历顺序
pub fn persistent_ids(study: &Study) -> Vec<(NodeId, Entry)> {
    study
        .published()
        .into_iter()
        .map(|(node, entity)| (node, entity.entry().clone()))
        .collect()
}

/// 按持久ID把加载的实体绑定回树节点；返回成功绑定的个数
pub fn rebind(study: &mut Study, ids: &[(NodeId, Entry)]) -> usize {
    ids.iter()
        .filter(|(node, entry)| study.restore_reference(*node, entry.as_str()).is_some())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shaperstudy_core::config::StudyConfig;
    use shaperstudy_core::listing::samples::{BOX_SOLID, BOX_SOLID_V2};
    use shaperstudy_core::listing::ListingKernel;

    fn entry(text: &str) -> Entry {
        Entry::new(text).unwrap()
    }

    /// 一个活形状（tick 2），两个组，一个场，以及一个死亡副本
    fn sample_study() -> Study {
        let mut study = Study::new(ListingKernel::new());
        let shape = entry("0:1:1");
        study
            .publish_shape(&shape, "Box_1_1", BOX_SOLID.into(), None)
            .unwrap();
        study
            .publish_shape(&shape, "Box_1_1", BOX_SOLID_V2.into(), None)
            .unwrap();

        let top = study.create_group(&shape, ShapeType::Face).unwrap();
        study.set_selection(&top, vec![3]).unwrap();
        study.set_selection(&top, vec![3, 4]).unwrap();
        study.add_in_study(&top, "Faces", Some(&shape)).unwrap();

        let field = study
            .create_field(
                &shape,
                ShapeType::Face,
                ValueKind::Double,
                vec!["A B".into(), "C|D".into()],
            )
            .unwrap();
        study.set_selection(&field, vec![3]).unwrap();
        study
            .add_field_step(&field, 1, 10, StepValues::Double(vec![1.0, 2.0]))
            .unwrap();
        study
            .add_field_step(&field, 2, 20, StepValues::Double(vec![3.0, 4.5]))
            .unwrap();
        study.add_in_study(&field, "Pressure", Some(&shape)).unwrap();

        study.make_dead(&shape).unwrap();
        study
    }

    /// 模拟文档服务：复制树，加载字节流，再按持久ID绑定
    fn reopen(study: &Study, buffer: &[u8]) -> Study {
        let ids = persistent_ids(study);
        let mut reopened = Study::with_tree(
            StudyConfig::default(),
            ListingKernel::new(),
            study.tree().clone(),
        );
        load(&mut reopened, buffer).unwrap();
        assert_eq!(rebind(&mut reopened, &ids), ids.len());
        reopened
    }

    #[test]
    fn test_record_layout() {
        let mut study = Study::new(ListingKernel::new());
        let face = entry("0:1:1");
        study
            .publish_shape(&face, "Face", b"FACE f1".to_vec(), None)
            .unwrap();
        let group = study.create_group(&face, ShapeType::Edge).unwrap();
        study.set_selection(&group, vec![3, 6]).unwrap();
        study.set_selection(&group, vec![3, 6, 8]).unwrap();
        study.add_in_study(&group, "Edges", Some(&face)).unwrap();

        let buffer = save(&study).unwrap();
        assert_eq!(
            String::from_utf8(buffer).unwrap(),
            "0:1:1 1|FACE f1|FACE f1|group1|6|3 6 8;3 6"
        );
    }

    #[test]
    fn test_field_record_escaping() {
        let study = sample_study();
        let buffer = String::from_utf8(save(&study).unwrap()).unwrap();
        assert!(buffer.contains("|4 2 2 2 A__space__B C__pipe__D 2 10 1 2 20 3 4.5|3;"));
    }

    #[test]
    fn test_save_load_roundtrip() {
        let study = sample_study();
        let buffer = save(&study).unwrap();
        let reopened = reopen(&study, &buffer);

        assert_eq!(reopened.registry().len(), study.registry().len());
        for original in study.registry().iter() {
            let loaded = reopened.entity(original.entry()).unwrap();
            assert_eq!(loaded.kind(), original.kind());
            assert_eq!(loaded.body(), original.body());
            assert_eq!(loaded.node(), original.node());
            if original.kind().is_shape() {
                assert_eq!(loaded.tick(), original.tick());
            }
        }

        let field = entry("field1");
        let data = reopened.entity(&field).unwrap().field().unwrap();
        assert_eq!(data.components, vec!["A B", "C|D"]);
        assert_eq!(data.step(2).unwrap().stamp, 20);
        assert_eq!(data.step(2).unwrap().values, StepValues::Double(vec![3.0, 4.5]));

        let group = reopened.entity(&entry("group1")).unwrap();
        assert_eq!(group.selection().unwrap().indices(), &[3, 4]);
        assert_eq!(group.selection().unwrap().old_indices(), &[3]);
    }

    #[test]
    fn test_resave_is_identical() {
        let study = sample_study();
        let buffer = save(&study).unwrap();
        let reopened = reopen(&study, &buffer);
        assert_eq!(save(&reopened).unwrap(), buffer);
    }

    #[test]
    fn test_group_tick_trails_parent() {
        let study = sample_study();
        let buffer = save(&study).unwrap();
        let reopened = reopen(&study, &buffer);

        let shape = reopened.entity(&entry("0:1:1")).unwrap();
        assert_eq!(shape.tick(), 2);
        assert_eq!(reopened.entity(&entry("field1")).unwrap().tick(), 2);
        assert_eq!(reopened.entity(&entry("group1")).unwrap().tick(), 2);
    }

    #[test]
    fn test_unpublished_entities_are_skipped() {
        let mut study = Study::new(ListingKernel::new());
        let shape = entry("0:1:1");
        study.create_shape(&shape, b"SOLID s".to_vec()).unwrap();
        study.create_group(&shape, ShapeType::Face).unwrap();
        assert!(save(&study).unwrap().is_empty());
    }

    #[test]
    fn test_delimiter_in_stream() {
        let mut study = Study::new(ListingKernel::new());
        let shape = entry("0:1:1");
        study
            .publish_shape(&shape, "Bad", b"SOLID a|b".to_vec(), None)
            .unwrap();
        assert!(matches!(save(&study), Err(FileError::DelimiterInStream(_))));
    }

    #[test]
    fn test_reserved_token_in_text() {
        fn string_field(component: &str, value: &str) -> Study {
            let mut study = Study::new(ListingKernel::new());
            let shape = entry("0:1:1");
            study
                .publish_shape(&shape, "Box", BOX_SOLID.into(), None)
                .unwrap();
            let field = study
                .create_field(
                    &shape,
                    ShapeType::Shape,
                    ValueKind::String,
                    vec![component.to_string()],
                )
                .unwrap();
            study
                .add_field_step(&field, 1, 0, StepValues::String(vec![value.to_string()]))
                .unwrap();
            study.add_in_study(&field, "Tokens", Some(&shape)).unwrap();
            study
        }

        assert!(matches!(
            save(&string_field("x__pipe__y", "v")),
            Err(FileError::ReservedToken { ref text, .. }) if text == "x__pipe__y"
        ));
        assert!(matches!(
            save(&string_field("c", "a__space__b")),
            Err(FileError::ReservedToken { ref entry, .. }) if entry == "field1"
        ));
        // 普通下划线不受影响
        assert!(save(&string_field("a_b", "__x")).is_ok());
    }

    #[test]
    fn test_malformed_buffer_leaves_registry() {
        let study = sample_study();
        let buffer = save(&study).unwrap();
        let mut reopened = reopen(&study, &buffer);
        let count = reopened.registry().len();

        for bad in [
            &b"0:1:1 1|SOLID s"[..],
            &b"0:1:1 x|SOLID s|SOLID s"[..],
            &b"group1|6|3 6"[..],
            &b"group1|42|3;"[..],
            &b"field1|4 2 1 0 1 10|;"[..],
            &b"field1|4 2 1 0 1 10 1.5 extra|;"[..],
            &b"0:1:1 1|a|a|0:1:1 2|b|b"[..],
        ] {
            let result = load(&mut reopened, bad);
            assert!(matches!(result, Err(FileError::InvalidFormat(_))), "{:?}", result);
            assert_eq!(reopened.registry().len(), count);
        }
    }

    #[test]
    fn test_empty_buffer() {
        let mut study = sample_study();
        assert_eq!(load(&mut study, b"").unwrap(), 0);
        assert!(study.registry().is_empty());
    }

    #[test]
    fn test_string_and_bool_values() {
        let mut study = Study::new(ListingKernel::new());
        let shape = entry("0:1:1");
        study
            .publish_shape(&shape, "Box", BOX_SOLID.into(), None)
            .unwrap();
        let names = study
            .create_field(&shape, ShapeType::Shape, ValueKind::String, vec!["".into()])
            .unwrap();
        study
            .add_field_step(&names, 1, 0, StepValues::String(vec!["a b|c".into()]))
            .unwrap();
        study.add_in_study(&names, "Names", Some(&shape)).unwrap();
        let flags = study
            .create_field(&shape, ShapeType::Face, ValueKind::Bool, vec!["on".into()])
            .unwrap();
        study
            .add_field_step(&flags, 1, 0, StepValues::Bool(vec![true, false]))
            .unwrap();
        study.add_in_study(&flags, "Flags", Some(&shape)).unwrap();

        let buffer = save(&study).unwrap();
        let reopened = reopen(&study, &buffer);
        let names = reopened.entity(&names).unwrap().field().unwrap();
        assert_eq!(names.components, vec![String::new()]);
        assert_eq!(
            names.step(1).unwrap().values,
            StepValues::String(vec!["a b|c".into()])
        );
        let flags = reopened.entity(&flags).unwrap().field().unwrap();
        assert_eq!(flags.step(1).unwrap().values, StepValues::Bool(vec![true, false]));
    }
}
